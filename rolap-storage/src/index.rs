//! The segment index: which regions are cached, loading, or absent.
//!
//! Headers are partitioned by (star, measure). Each partition maps an exact
//! header to the slot that owns its lifecycle. A slot's state lives in a
//! `tokio::sync::watch` channel so that every transition is atomic and
//! immediately visible to all waiters.
//!
//! # Lifecycle
//!
//! - [`SegmentIndex::register`] is the only way to create a slot. For a
//!   given exact header at most one live (pending or ready) slot exists.
//! - [`SegmentIndex::install`] publishes the loaded segment. If the slot was
//!   flushed while loading, the data is discarded and the outcome is
//!   [`InstallOutcome::Stale`].
//! - [`SegmentIndex::fail`] releases waiters with the error and evicts the slot.
//! - [`SegmentIndex::flush`] evicts matching slots and marks them stale; waiters
//!   on a flushed pending slot are released at once and must retry.

use chrono::Utc;
use dashmap::DashMap;
use rolap_core::{
    CellKey, HeaderId, MeasureId, RolapError, RolapResult, Segment, SegmentError, SegmentHeader,
    SegmentState, Specificity, StarId, Timestamp,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::watch;

// =============================================================================
// Slot state
// =============================================================================

/// State published by a slot to its waiters.
#[derive(Debug, Clone)]
pub enum SlotState {
    Pending,
    Ready(Arc<Segment>),
    Failed(RolapError),
    Stale,
}

impl SlotState {
    pub fn segment_state(&self) -> SegmentState {
        match self {
            SlotState::Pending => SegmentState::Pending,
            SlotState::Ready(_) => SegmentState::Ready,
            SlotState::Failed(_) => SegmentState::Failed,
            SlotState::Stale => SegmentState::Stale,
        }
    }
}

#[derive(Debug)]
struct SegmentSlot {
    id: u64,
    header: Arc<SegmentHeader>,
    header_id: HeaderId,
    state: watch::Sender<SlotState>,
    registered_at: Timestamp,
}

impl SegmentSlot {
    fn state(&self) -> SlotState {
        self.state.borrow().clone()
    }

    fn waiter(&self) -> SegmentWaiter {
        SegmentWaiter {
            header_id: self.header_id.clone(),
            rx: self.state.subscribe(),
        }
    }

    /// Move a live slot to stale. Returns true if it was live.
    fn mark_stale(&self) -> bool {
        self.state.send_if_modified(|state| match state {
            SlotState::Pending | SlotState::Ready(_) => {
                *state = SlotState::Stale;
                true
            }
            _ => false,
        })
    }
}

type Slots = HashMap<Arc<SegmentHeader>, Arc<SegmentSlot>>;

#[derive(Debug, Default)]
struct Partition {
    slots: RwLock<Slots>,
}

#[derive(Debug, Default)]
struct IndexInner {
    partitions: DashMap<(StarId, MeasureId), Arc<Partition>>,
    next_slot: AtomicU64,
}

impl IndexInner {
    fn partition(&self, star: &StarId, measure: &MeasureId) -> Option<Arc<Partition>> {
        self.partitions
            .get(&(star.clone(), measure.clone()))
            .map(|p| Arc::clone(p.value()))
    }

    /// Fail a pending slot and evict it if it still owns its header.
    fn fail_slot(&self, slot: &Arc<SegmentSlot>, cause: RolapError) {
        let failed = slot.state.send_if_modified(|state| match state {
            SlotState::Pending => {
                *state = SlotState::Failed(cause.clone());
                true
            }
            _ => false,
        });
        if !failed {
            return;
        }
        tracing::warn!(
            segment = %slot.header_id.short(),
            error = %cause,
            "Segment load failed"
        );

        let Some(partition) = self.partition(slot.header.star(), slot.header.measure()) else {
            return;
        };
        let mut slots = match partition.slots.write() {
            Ok(slots) => slots,
            Err(_) => {
                tracing::error!(
                    segment = %slot.header_id.short(),
                    "Index lock poisoned while evicting failed segment"
                );
                return;
            }
        };
        if slots.get(&*slot.header).is_some_and(|s| s.id == slot.id) {
            slots.remove(&*slot.header);
        }
    }
}

// =============================================================================
// Handles and waiters
// =============================================================================

/// Result of [`SegmentIndex::register`].
#[derive(Debug)]
pub enum Registration {
    /// The caller created the pending slot and must load it.
    Owner(SegmentHandle),
    /// An equivalent pending or ready slot exists; await it instead.
    AlreadyPresent(SegmentWaiter),
}

/// Ownership of a pending slot. Exactly one exists per pending slot.
///
/// Dropping a handle without installing or failing it fails the slot so that
/// waiters are never stranded.
#[derive(Debug)]
pub struct SegmentHandle {
    index: Arc<IndexInner>,
    slot: Arc<SegmentSlot>,
    completed: bool,
}

impl SegmentHandle {
    pub fn header(&self) -> &Arc<SegmentHeader> {
        &self.slot.header
    }

    pub fn header_id(&self) -> &HeaderId {
        &self.slot.header_id
    }

    /// A waiter on this slot, for the caller that registered it.
    pub fn subscribe(&self) -> SegmentWaiter {
        self.slot.waiter()
    }
}

impl Drop for SegmentHandle {
    fn drop(&mut self) {
        if !self.completed {
            self.index.fail_slot(
                &self.slot,
                SegmentError::LoadFailed {
                    segment: self.slot.header_id.short().to_string(),
                    reason: "load abandoned".to_string(),
                }
                .into(),
            );
        }
    }
}

/// Awaits the outcome of a slot.
///
/// Dropping a waiter abandons only the wait; the load itself carries on.
#[derive(Debug)]
pub struct SegmentWaiter {
    header_id: HeaderId,
    rx: watch::Receiver<SlotState>,
}

impl SegmentWaiter {
    pub fn header_id(&self) -> &HeaderId {
        &self.header_id
    }

    /// Current state without waiting.
    pub fn state(&self) -> SegmentState {
        self.rx.borrow().segment_state()
    }

    /// Wait until the slot leaves the pending state.
    ///
    /// A flushed slot yields [`SegmentError::StaleRead`]; the caller is
    /// expected to retry its resolution.
    pub async fn wait(mut self) -> RolapResult<Arc<Segment>> {
        loop {
            if let Some(outcome) = self.settled() {
                return outcome;
            }
            if self.rx.changed().await.is_err() {
                return self.settled().unwrap_or_else(|| {
                    Err(SegmentError::LoadFailed {
                        segment: self.header_id.short().to_string(),
                        reason: "load abandoned".to_string(),
                    }
                    .into())
                });
            }
        }
    }

    fn settled(&mut self) -> Option<RolapResult<Arc<Segment>>> {
        match &*self.rx.borrow_and_update() {
            SlotState::Pending => None,
            SlotState::Ready(segment) => Some(Ok(Arc::clone(segment))),
            SlotState::Failed(err) => Some(Err(err.clone())),
            SlotState::Stale => Some(Err(SegmentError::StaleRead {
                segment: self.header_id.short().to_string(),
                attempts: 0,
            }
            .into())),
        }
    }
}

/// Result of [`SegmentIndex::install`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The segment is ready and servable.
    Installed,
    /// The slot was flushed during the load; the data was discarded.
    Stale,
}

// =============================================================================
// Lookup results
// =============================================================================

/// Cells that a pending load will answer.
#[derive(Debug)]
pub struct PendingMatch {
    pub waiter: SegmentWaiter,
    pub cells: Vec<CellKey>,
}

/// Answer to [`SegmentIndex::lookup`].
///
/// Every requested cell appears in exactly one of `served`, `pending` or
/// `residual`.
#[derive(Debug, Default)]
pub struct MatchResult {
    /// Cells answered by a ready segment, with the segment that answers them.
    pub served: Vec<(CellKey, Arc<Segment>)>,
    /// Cells covered by an in-flight load.
    pub pending: Vec<PendingMatch>,
    /// Cells no cached or loading segment covers.
    pub residual: Vec<CellKey>,
}

impl MatchResult {
    fn miss(cells: &[CellKey]) -> Self {
        Self {
            residual: cells.to_vec(),
            ..Self::default()
        }
    }

    pub fn is_complete_hit(&self) -> bool {
        self.pending.is_empty() && self.residual.is_empty()
    }
}

/// Answer to [`SegmentIndex::find_covering`].
#[derive(Debug)]
pub enum Coverage {
    Ready(Arc<Segment>),
    Pending(SegmentWaiter),
}

// =============================================================================
// Introspection
// =============================================================================

/// One indexed segment, for monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentInfo {
    pub id: HeaderId,
    pub schema: String,
    pub star: String,
    pub measure: String,
    pub columns: Vec<String>,
    pub state: SegmentState,
    pub rows: Option<usize>,
    pub registered_at: Timestamp,
    pub loaded_at: Option<Timestamp>,
}

/// Live slot counts. Failed and stale slots are evicted and only appear in
/// the cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexCounts {
    pub pending: usize,
    pub ready: usize,
}

// =============================================================================
// SegmentIndex
// =============================================================================

/// Concurrent index of segment slots. Cloning shares the index.
#[derive(Debug, Clone, Default)]
pub struct SegmentIndex {
    inner: Arc<IndexInner>,
}

impl SegmentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn partition_or_create(&self, star: &StarId, measure: &MeasureId) -> Arc<Partition> {
        let entry = self
            .inner
            .partitions
            .entry((star.clone(), measure.clone()))
            .or_default();
        Arc::clone(entry.value())
    }

    fn all_partitions(&self) -> Vec<Arc<Partition>> {
        self.inner
            .partitions
            .iter()
            .map(|p| Arc::clone(p.value()))
            .collect()
    }

    /// Claim `header` for loading, or join the existing live slot.
    pub fn register(&self, header: SegmentHeader) -> RolapResult<Registration> {
        let partition = self.partition_or_create(header.star(), header.measure());
        let mut slots = partition
            .slots
            .write()
            .map_err(|_| SegmentError::LockPoisoned)?;

        if let Some(existing) = slots.get(&header) {
            if existing.state.borrow().segment_state().is_live() {
                tracing::trace!(segment = %existing.header_id.short(), "Joined existing segment");
                return Ok(Registration::AlreadyPresent(existing.waiter()));
            }
        }

        let header = Arc::new(header);
        let (state, _) = watch::channel(SlotState::Pending);
        let slot = Arc::new(SegmentSlot {
            id: self.inner.next_slot.fetch_add(1, Ordering::Relaxed),
            header_id: header.unique_id(),
            header: Arc::clone(&header),
            state,
            registered_at: Utc::now(),
        });
        slots.insert(header, Arc::clone(&slot));
        tracing::debug!(
            segment = %slot.header_id.short(),
            star = %slot.header.star(),
            measure = %slot.header.measure(),
            "Registered pending segment"
        );

        Ok(Registration::Owner(SegmentHandle {
            index: Arc::clone(&self.inner),
            slot,
            completed: false,
        }))
    }

    /// Publish a loaded segment.
    pub fn install(&self, mut handle: SegmentHandle, segment: Segment) -> InstallOutcome {
        handle.completed = true;
        let segment = Arc::new(segment);
        let rows = segment.row_count();
        let installed = handle.slot.state.send_if_modified(|state| match state {
            SlotState::Pending => {
                *state = SlotState::Ready(segment);
                true
            }
            _ => false,
        });

        if installed {
            tracing::debug!(segment = %handle.slot.header_id.short(), rows, "Installed segment");
            InstallOutcome::Installed
        } else {
            tracing::info!(
                segment = %handle.slot.header_id.short(),
                "Discarded segment flushed while loading"
            );
            InstallOutcome::Stale
        }
    }

    /// Fail a pending segment; every waiter receives `cause`.
    pub fn fail(&self, mut handle: SegmentHandle, cause: RolapError) {
        handle.completed = true;
        self.inner.fail_slot(&handle.slot, cause);
    }

    /// Evict and mark stale every live segment whose header matches.
    ///
    /// Returns the number of segments flushed. Does not wait for pending
    /// loads.
    pub fn flush<P>(&self, predicate: P) -> RolapResult<usize>
    where
        P: Fn(&SegmentHeader) -> bool,
    {
        let mut flushed = 0;
        for partition in self.all_partitions() {
            let mut slots = partition
                .slots
                .write()
                .map_err(|_| SegmentError::LockPoisoned)?;
            let doomed: Vec<Arc<SegmentHeader>> =
                slots.keys().filter(|h| predicate(h)).cloned().collect();
            for header in doomed {
                if let Some(slot) = slots.remove(&header) {
                    if slot.mark_stale() {
                        flushed += 1;
                    }
                }
            }
        }
        Ok(flushed)
    }

    /// Find the segments that answer `cells` of one star and measure.
    ///
    /// Candidates are tried most specific first and each cell is attributed to
    /// the first candidate covering it, so no cell is ever counted twice.
    /// Ready segments are preferred over pending ones.
    pub fn lookup(
        &self,
        star: &StarId,
        measure: &MeasureId,
        cells: &[CellKey],
        rollable: bool,
    ) -> RolapResult<MatchResult> {
        let Some(partition) = self.inner.partition(star, measure) else {
            return Ok(MatchResult::miss(cells));
        };
        let (ready, pending) = snapshot(&partition)?;

        let mut result = MatchResult::default();
        let mut waiting: BTreeMap<u64, (Arc<SegmentSlot>, Vec<CellKey>)> = BTreeMap::new();
        for cell in cells {
            if let Some((_, segment)) = ready
                .iter()
                .find(|(_, s)| s.header().covers_cell(cell, rollable))
            {
                result.served.push((cell.clone(), Arc::clone(segment)));
            } else if let Some((_, slot)) = pending
                .iter()
                .find(|(_, s)| s.header.covers_cell(cell, rollable))
            {
                waiting
                    .entry(slot.id)
                    .or_insert_with(|| (Arc::clone(slot), Vec::new()))
                    .1
                    .push(cell.clone());
            } else {
                result.residual.push(cell.clone());
            }
        }
        result.pending = waiting
            .into_values()
            .map(|(slot, cells)| PendingMatch {
                waiter: slot.waiter(),
                cells,
            })
            .collect();
        Ok(result)
    }

    /// Find the most specific live segment whose region contains all of
    /// `header`'s region.
    pub fn find_covering(
        &self,
        header: &SegmentHeader,
        rollable: bool,
    ) -> RolapResult<Option<Coverage>> {
        let Some(partition) = self.inner.partition(header.star(), header.measure()) else {
            return Ok(None);
        };
        let (ready, pending) = snapshot(&partition)?;

        if let Some((_, segment)) = ready
            .into_iter()
            .find(|(_, s)| s.header().covers_header(header, rollable))
        {
            return Ok(Some(Coverage::Ready(segment)));
        }
        Ok(pending
            .into_iter()
            .find(|(_, s)| s.header.covers_header(header, rollable))
            .map(|(_, slot)| Coverage::Pending(slot.waiter())))
    }

    /// State of the live slot for exactly `header`, if any.
    pub fn state_of(&self, header: &SegmentHeader) -> RolapResult<Option<SegmentState>> {
        let Some(partition) = self.inner.partition(header.star(), header.measure()) else {
            return Ok(None);
        };
        let slots = partition
            .slots
            .read()
            .map_err(|_| SegmentError::LockPoisoned)?;
        Ok(slots.get(header).map(|s| s.state.borrow().segment_state()))
    }

    /// Count live slots by state.
    pub fn counts(&self) -> RolapResult<IndexCounts> {
        let mut counts = IndexCounts::default();
        for partition in self.all_partitions() {
            let slots = partition
                .slots
                .read()
                .map_err(|_| SegmentError::LockPoisoned)?;
            for slot in slots.values() {
                match slot.state.borrow().segment_state() {
                    SegmentState::Pending => counts.pending += 1,
                    SegmentState::Ready => counts.ready += 1,
                    _ => {}
                }
            }
        }
        Ok(counts)
    }

    /// Number of live slots.
    pub fn len(&self) -> RolapResult<usize> {
        let counts = self.counts()?;
        Ok(counts.pending + counts.ready)
    }

    pub fn is_empty(&self) -> RolapResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Describe every live slot, ordered by registration.
    pub fn segments(&self) -> RolapResult<Vec<SegmentInfo>> {
        let mut infos: Vec<(u64, SegmentInfo)> = Vec::new();
        for partition in self.all_partitions() {
            let slots = partition
                .slots
                .read()
                .map_err(|_| SegmentError::LockPoisoned)?;
            for slot in slots.values() {
                let state = slot.state();
                let (rows, loaded_at) = match &state {
                    SlotState::Ready(segment) => {
                        (Some(segment.row_count()), Some(segment.loaded_at()))
                    }
                    _ => (None, None),
                };
                infos.push((
                    slot.id,
                    SegmentInfo {
                        id: slot.header_id.clone(),
                        schema: slot.header.schema().to_string(),
                        star: slot.header.star().to_string(),
                        measure: slot.header.measure().to_string(),
                        columns: slot.header.column_names(),
                        state: state.segment_state(),
                        rows,
                        registered_at: slot.registered_at,
                        loaded_at,
                    },
                ));
            }
        }
        infos.sort_by_key(|(id, _)| *id);
        Ok(infos.into_iter().map(|(_, info)| info).collect())
    }
}

type ReadyCandidates = Vec<(Specificity, Arc<Segment>)>;
type PendingCandidates = Vec<(Specificity, Arc<SegmentSlot>)>;

/// Ready and pending candidates of a partition, most specific first.
fn snapshot(partition: &Partition) -> RolapResult<(ReadyCandidates, PendingCandidates)> {
    let slots = partition
        .slots
        .read()
        .map_err(|_| SegmentError::LockPoisoned)?;
    let mut ready = Vec::new();
    let mut pending = Vec::new();
    for slot in slots.values() {
        match slot.state() {
            SlotState::Ready(segment) => ready.push((slot.header.specificity(), segment)),
            SlotState::Pending => pending.push((slot.header.specificity(), Arc::clone(slot))),
            SlotState::Failed(_) | SlotState::Stale => {}
        }
    }
    drop(slots);
    ready.sort_by_key(|(spec, _)| *spec);
    pending.sort_by_key(|(spec, _)| *spec);
    Ok((ready, pending))
}

// =============================================================================
// TESTS
// =============================================================================
