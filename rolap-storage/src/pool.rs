//! Database connection pool with a separate admission path for nested queries.
//!
//! Segment loads take a *primary* connection for their aggregation query. A
//! load may also issue *nested* queries (cardinality checks) while it holds
//! its primary connection. If nested queries waited on the same pool, N loads
//! holding N connections could each wait forever for an (N+1)th.
//!
//! Nested acquisition therefore goes through [`ConnectionPool::acquire_nested`]:
//!
//! 1. take a permit from the reserved nested sub-pool without waiting;
//! 2. else take a primary permit without waiting;
//! 3. else release the load's primary connection, then wait for either.
//!
//! A load never waits while holding a connection, so the pool cannot
//! deadlock for any capacity of at least one. Every wait is bounded by the
//! acquire timeout and surfaces as [`SegmentError::ResourceExhausted`].

use dashmap::DashMap;
use rolap_core::{CacheConfig, RolapResult, SegmentError};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

// =============================================================================
// Load identity and hold state
// =============================================================================

/// Identifies one segment load for connection accounting. Unique per pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct LoadId(u64);

impl LoadId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for LoadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "load-{}", self.0)
    }
}

/// What a load currently holds or waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum HoldState {
    /// Waiting for its primary connection; holds nothing.
    AwaitingPrimary,
    /// Holds its primary connection.
    HoldingPrimary,
    /// Waiting for a nested connection; holds nothing.
    AwaitingNested,
    /// Holds a nested connection, possibly alongside its primary one.
    HoldingNested,
    /// Holds nothing: its primary connection was released for a nested
    /// query and has not been re-acquired yet.
    Released,
}

impl HoldState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HoldState::AwaitingPrimary => "awaiting_primary",
            HoldState::HoldingPrimary => "holding_primary",
            HoldState::AwaitingNested => "awaiting_nested",
            HoldState::HoldingNested => "holding_nested",
            HoldState::Released => "released",
        }
    }

    /// Returns true for states in which the load is blocked.
    pub fn is_waiting(&self) -> bool {
        matches!(self, HoldState::AwaitingPrimary | HoldState::AwaitingNested)
    }
}

impl fmt::Display for HoldState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The purpose a connection was granted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ConnectionClass {
    Primary,
    Nested,
}

// =============================================================================
// Lease
// =============================================================================

#[derive(Debug)]
struct PoolInner {
    primary: Arc<Semaphore>,
    nested: Arc<Semaphore>,
    capacity: usize,
    reserved: usize,
    acquire_timeout: Duration,
    in_use: AtomicUsize,
    peak_in_use: AtomicUsize,
    nested_escapes: AtomicU64,
    timeouts: AtomicU64,
    next_load: AtomicU64,
    holds: DashMap<LoadId, HoldState>,
}

impl PoolInner {
    fn update_peak(&self, current: usize) {
        let mut peak = self.peak_in_use.load(Ordering::Relaxed);
        while current > peak {
            match self.peak_in_use.compare_exchange_weak(
                peak,
                current,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(p) => peak = p,
            }
        }
    }
}

/// A pooled connection granted to a load. Returned to the pool on drop.
///
/// Dropping a nested lease moves the load back to the hold state it had
/// before the nested query.
pub struct ConnectionLease {
    _permit: OwnedSemaphorePermit,
    pool: Arc<PoolInner>,
    load: LoadId,
    class: ConnectionClass,
    after: HoldState,
}

impl ConnectionLease {
    pub fn load(&self) -> LoadId {
        self.load
    }

    pub fn class(&self) -> ConnectionClass {
        self.class
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        self.pool.in_use.fetch_sub(1, Ordering::Relaxed);
        if self.class == ConnectionClass::Nested {
            if let Some(mut hold) = self.pool.holds.get_mut(&self.load) {
                if *hold == HoldState::HoldingNested {
                    *hold = self.after;
                }
            }
        }
    }
}

impl fmt::Debug for ConnectionLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionLease")
            .field("load", &self.load)
            .field("class", &self.class)
            .finish()
    }
}

// =============================================================================
// Pool
// =============================================================================

/// Point-in-time pool usage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub capacity: usize,
    pub reserved_nested: usize,
    pub in_use: usize,
    pub peak_in_use: usize,
    pub available_primary: usize,
    pub available_nested: usize,
    pub awaiting_primary: usize,
    pub holding_primary: usize,
    pub awaiting_nested: usize,
    pub holding_nested: usize,
    pub released: usize,
    /// Nested acquisitions that released a primary connection before waiting.
    pub nested_escapes: u64,
    pub timeouts: u64,
}

/// Bounded connection pool shared by all segment loads. Cloning shares it.
#[derive(Debug, Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Build a pool from a validated config.
    pub fn new(config: &CacheConfig) -> Self {
        let reserved = config.effective_reserved();
        let capacity = config.pool_capacity;
        Self {
            inner: Arc::new(PoolInner {
                primary: Arc::new(Semaphore::new(capacity - reserved)),
                nested: Arc::new(Semaphore::new(reserved)),
                capacity,
                reserved,
                acquire_timeout: config.acquire_timeout,
                in_use: AtomicUsize::new(0),
                peak_in_use: AtomicUsize::new(0),
                nested_escapes: AtomicU64::new(0),
                timeouts: AtomicU64::new(0),
                next_load: AtomicU64::new(1),
                holds: DashMap::new(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn reserved_nested(&self) -> usize {
        self.inner.reserved
    }

    /// Allocate an id for a new load.
    pub fn next_load_id(&self) -> LoadId {
        LoadId(self.inner.next_load.fetch_add(1, Ordering::Relaxed))
    }

    fn lease(
        &self,
        permit: OwnedSemaphorePermit,
        load: LoadId,
        class: ConnectionClass,
        after: HoldState,
    ) -> ConnectionLease {
        let current = self.inner.in_use.fetch_add(1, Ordering::Relaxed) + 1;
        self.inner.update_peak(current);
        ConnectionLease {
            _permit: permit,
            pool: Arc::clone(&self.inner),
            load,
            class,
            after,
        }
    }

    fn set_hold(&self, load: LoadId, state: HoldState) {
        self.inner.holds.insert(load, state);
    }

    fn exhausted(&self, load: LoadId, resource: &str, started: Instant) -> SegmentError {
        self.inner.holds.remove(&load);
        self.inner.timeouts.fetch_add(1, Ordering::Relaxed);
        let waited_ms = started.elapsed().as_millis() as u64;
        tracing::warn!(load_id = %load, resource, waited_ms, "Connection acquisition timed out");
        SegmentError::ResourceExhausted {
            resource: resource.to_string(),
            waited_ms,
        }
    }

    /// Acquire the primary connection of `load`, waiting up to the acquire
    /// timeout.
    pub async fn acquire_primary(&self, load: LoadId) -> RolapResult<ConnectionLease> {
        self.set_hold(load, HoldState::AwaitingPrimary);
        let started = Instant::now();
        let acquire = Arc::clone(&self.inner.primary).acquire_owned();
        match tokio::time::timeout(self.inner.acquire_timeout, acquire).await {
            Ok(Ok(permit)) => {
                self.set_hold(load, HoldState::HoldingPrimary);
                tracing::trace!(load_id = %load, "Acquired primary connection");
                Ok(self.lease(
                    permit,
                    load,
                    ConnectionClass::Primary,
                    HoldState::HoldingPrimary,
                ))
            }
            Ok(Err(_)) | Err(_) => {
                Err(self.exhausted(load, "primary connection", started).into())
            }
        }
    }

    /// Try the nested sub-pool, then the primary pool, without waiting.
    fn try_acquire_nested(&self, load: LoadId, after: HoldState) -> Option<ConnectionLease> {
        let permit = Arc::clone(&self.inner.nested)
            .try_acquire_owned()
            .or_else(|_| Arc::clone(&self.inner.primary).try_acquire_owned())
            .ok()?;
        self.set_hold(load, HoldState::HoldingNested);
        Some(self.lease(permit, load, ConnectionClass::Nested, after))
    }

    /// Acquire a connection for a query issued on behalf of `load`.
    ///
    /// If no connection is free, the load's primary connection is taken out
    /// of `primary` and released before waiting. Call
    /// [`ConnectionPool::restore_primary`] once the nested query is done.
    pub async fn acquire_nested(
        &self,
        load: LoadId,
        primary: &mut Option<ConnectionLease>,
    ) -> RolapResult<ConnectionLease> {
        let after = if primary.is_some() {
            HoldState::HoldingPrimary
        } else {
            HoldState::Released
        };
        if let Some(lease) = self.try_acquire_nested(load, after) {
            return Ok(lease);
        }

        if primary.take().is_some() {
            self.inner.nested_escapes.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                load_id = %load,
                "Released primary connection to wait for nested connection"
            );
        }
        self.set_hold(load, HoldState::AwaitingNested);

        let started = Instant::now();
        let nested = Arc::clone(&self.inner.nested);
        let shared = Arc::clone(&self.inner.primary);
        let acquire = async move {
            tokio::select! {
                biased;
                permit = nested.acquire_owned() => permit,
                permit = shared.acquire_owned() => permit,
            }
        };
        match tokio::time::timeout(self.inner.acquire_timeout, acquire).await {
            Ok(Ok(permit)) => {
                self.set_hold(load, HoldState::HoldingNested);
                Ok(self.lease(
                    permit,
                    load,
                    ConnectionClass::Nested,
                    HoldState::Released,
                ))
            }
            Ok(Err(_)) | Err(_) => {
                Err(self.exhausted(load, "nested connection", started).into())
            }
        }
    }

    /// Make sure `load` holds its primary connection again after a nested
    /// query, re-acquiring it if it was released.
    pub async fn restore_primary<'a>(
        &self,
        load: LoadId,
        primary: &'a mut Option<ConnectionLease>,
    ) -> RolapResult<&'a ConnectionLease> {
        let lease = match primary.take() {
            Some(lease) => {
                self.set_hold(load, HoldState::HoldingPrimary);
                lease
            }
            None => self.acquire_primary(load).await?,
        };
        Ok(&*primary.insert(lease))
    }

    /// Forget `load`'s hold state once it has returned all its connections.
    pub fn finish(&self, load: LoadId) {
        self.inner.holds.remove(&load);
    }

    /// Current hold state of `load`.
    pub fn hold_state(&self, load: LoadId) -> Option<HoldState> {
        self.inner.holds.get(&load).map(|h| *h.value())
    }

    /// Hold state of every active load, ordered by load id.
    pub fn holds(&self) -> Vec<(LoadId, HoldState)> {
        let mut holds: Vec<(LoadId, HoldState)> = self
            .inner
            .holds
            .iter()
            .map(|h| (*h.key(), *h.value()))
            .collect();
        holds.sort_by_key(|(load, _)| *load);
        holds
    }

    pub fn stats(&self) -> PoolStats {
        let mut stats = PoolStats {
            capacity: self.inner.capacity,
            reserved_nested: self.inner.reserved,
            in_use: self.inner.in_use.load(Ordering::Relaxed),
            peak_in_use: self.inner.peak_in_use.load(Ordering::Relaxed),
            available_primary: self.inner.primary.available_permits(),
            available_nested: self.inner.nested.available_permits(),
            nested_escapes: self.inner.nested_escapes.load(Ordering::Relaxed),
            timeouts: self.inner.timeouts.load(Ordering::Relaxed),
            ..PoolStats::default()
        };
        for hold in self.inner.holds.iter() {
            match hold.value() {
                HoldState::AwaitingPrimary => stats.awaiting_primary += 1,
                HoldState::HoldingPrimary => stats.holding_primary += 1,
                HoldState::AwaitingNested => stats.awaiting_nested += 1,
                HoldState::HoldingNested => stats.holding_nested += 1,
                HoldState::Released => stats.released += 1,
            }
        }
        stats
    }
}

// =============================================================================
// TESTS
// =============================================================================
