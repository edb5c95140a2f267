//! The load coordinator: turns missing segment headers into SQL executions.
//!
//! Duplicate loads are prevented by [`SegmentIndex::register`]; only the
//! caller that wins the registration issues SQL, everyone else waits on the
//! same slot. Each owned load runs on its own task so that it completes and
//! installs even if every query waiting on it is cancelled.
//!
//! Connection use follows the rules of [`ConnectionPool`]: a load acquires its
//! primary connection, runs any cardinality checks through the nested
//! admission path, then runs its aggregation query.

use crate::executor::{AggregationStatement, SqlExecutor};
use crate::index::{InstallOutcome, Registration, SegmentHandle, SegmentIndex, SegmentWaiter};
use crate::pool::{ConnectionLease, ConnectionPool, LoadId};
use crate::stats::CacheStats;
use dashmap::DashMap;
use rolap_core::{
    AggregationFunction, CacheConfig, RolapError, RolapResult, SchemaId, Segment, SegmentError,
    SegmentHeader, StarId,
};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

/// One header to load, with the aggregator of its measure.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadItem {
    pub header: SegmentHeader,
    pub aggregator: AggregationFunction,
}

/// The headers one query needs loaded, submitted together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadRequest {
    items: Vec<LoadItem>,
}

impl LoadRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(header: SegmentHeader, aggregator: AggregationFunction) -> Self {
        Self::new().with(header, aggregator)
    }

    pub fn with(mut self, header: SegmentHeader, aggregator: AggregationFunction) -> Self {
        self.push(header, aggregator);
        self
    }

    pub fn push(&mut self, header: SegmentHeader, aggregator: AggregationFunction) {
        self.items.push(LoadItem { header, aggregator });
    }

    pub fn items(&self) -> &[LoadItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

type CardinalityKey = (SchemaId, StarId, String);

struct CoordinatorInner {
    index: SegmentIndex,
    pool: ConnectionPool,
    executor: Arc<dyn SqlExecutor>,
    stats: Arc<CacheStats>,
    cardinalities: DashMap<CardinalityKey, u64>,
    check_cardinality: bool,
}

/// Schedules segment loads. Cloning shares the coordinator.
#[derive(Clone)]
pub struct LoadCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl fmt::Debug for LoadCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadCoordinator")
            .field("pool", &self.inner.pool)
            .field("cached_cardinalities", &self.inner.cardinalities.len())
            .field("check_cardinality", &self.inner.check_cardinality)
            .finish()
    }
}

impl LoadCoordinator {
    pub fn new(
        config: &CacheConfig,
        index: SegmentIndex,
        executor: Arc<dyn SqlExecutor>,
        stats: Arc<CacheStats>,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                index,
                pool: ConnectionPool::new(config),
                executor,
                stats,
                cardinalities: DashMap::new(),
                check_cardinality: config.check_cardinality,
            }),
        }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.inner.pool
    }

    /// Submit a request and return one waiter per item, in order.
    ///
    /// Items whose header is already pending or ready join the existing slot.
    /// The remaining items start loading immediately on their own tasks.
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, request: LoadRequest) -> RolapResult<Vec<SegmentWaiter>> {
        let mut waiters = Vec::with_capacity(request.len());
        for item in request.items {
            match self.inner.index.register(item.header)? {
                Registration::Owner(handle) => {
                    waiters.push(handle.subscribe());
                    self.inner.stats.record_load_started();
                    let inner = Arc::clone(&self.inner);
                    let aggregator = item.aggregator;
                    tokio::spawn(async move { inner.run_load(handle, aggregator).await });
                }
                Registration::AlreadyPresent(waiter) => {
                    self.inner.stats.record_coalesced(1);
                    waiters.push(waiter);
                }
            }
        }
        Ok(waiters)
    }

    /// Forget cached column cardinalities, for one schema or all.
    pub fn clear_cardinalities(&self, schema: Option<&SchemaId>) {
        match schema {
            Some(schema) => self
                .inner
                .cardinalities
                .retain(|(s, _, _), _| s != schema),
            None => self.inner.cardinalities.clear(),
        }
    }

    /// Number of cached column cardinalities.
    pub fn cached_cardinalities(&self) -> usize {
        self.inner.cardinalities.len()
    }
}

impl CoordinatorInner {
    async fn run_load(&self, handle: SegmentHandle, aggregator: AggregationFunction) {
        let load = self.pool.next_load_id();
        let header = Arc::clone(handle.header());
        let span = tracing::debug_span!(
            "segment_load",
            load_id = %load,
            segment = %handle.header_id().short()
        );

        let result = self.load(load, &header, aggregator).instrument(span).await;
        self.pool.finish(load);

        match result {
            Ok(segment) => match self.index.install(handle, segment) {
                InstallOutcome::Installed => self.stats.record_load_completed(),
                InstallOutcome::Stale => self.stats.record_stale_install(),
            },
            Err(err) => {
                self.stats.record_load_failed();
                self.index.fail(handle, err);
            }
        }
    }

    async fn load(
        &self,
        load: LoadId,
        header: &Arc<SegmentHeader>,
        aggregator: AggregationFunction,
    ) -> RolapResult<Segment> {
        let started = Instant::now();
        let mut primary = Some(self.pool.acquire_primary(load).await?);

        let mut statement = AggregationStatement::for_header(header, aggregator);
        if self.check_cardinality {
            statement = self
                .prune_covered_filters(load, header, statement, &mut primary)
                .await?;
        }

        let connection = self.pool.restore_primary(load, &mut primary).await?;
        let rows = self
            .executor
            .execute(connection, &statement)
            .await
            .map_err(|e| load_failure(header, e))?;
        drop(primary);

        let segment = Segment::from_rows(Arc::clone(header), rows, aggregator)?;
        tracing::debug!(
            rows = segment.row_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Loaded segment"
        );
        Ok(segment)
    }

    /// Drop filters that admit at least as many values as their column has.
    async fn prune_covered_filters(
        &self,
        load: LoadId,
        header: &SegmentHeader,
        mut statement: AggregationStatement,
        primary: &mut Option<ConnectionLease>,
    ) -> RolapResult<AggregationStatement> {
        let enumerated: Vec<(String, usize)> = statement
            .filters
            .iter()
            .filter_map(|(column, p)| p.cardinality().map(|n| (column.clone(), n)))
            .collect();

        for (column, requested) in enumerated {
            let cardinality = self.cardinality(load, header, &column, primary).await?;
            if requested as u64 >= cardinality {
                tracing::trace!(column = %column, cardinality, "Filter covers whole column");
                statement = statement.without_filter(&column);
            }
        }
        Ok(statement)
    }

    async fn cardinality(
        &self,
        load: LoadId,
        header: &SegmentHeader,
        column: &str,
        primary: &mut Option<ConnectionLease>,
    ) -> RolapResult<u64> {
        let key = (
            header.schema().clone(),
            header.star().clone(),
            column.to_string(),
        );
        if let Some(cached) = self.cardinalities.get(&key) {
            return Ok(*cached);
        }

        let connection = self.pool.acquire_nested(load, primary).await?;
        self.stats.record_cardinality_query();
        let result = self
            .executor
            .cardinality(&connection, header.star(), column)
            .await;
        drop(connection);

        let cardinality = result.map_err(|e| load_failure(header, e))?;
        self.cardinalities.insert(key, cardinality);
        Ok(cardinality)
    }
}

/// Attribute an executor error to the segment being loaded.
fn load_failure(header: &SegmentHeader, err: RolapError) -> RolapError {
    match err {
        RolapError::Segment(SegmentError::LoadFailed { .. })
        | RolapError::Segment(SegmentError::ResourceExhausted { .. }) => err,
        other => SegmentError::LoadFailed {
            segment: header.unique_id().short().to_string(),
            reason: other.to_string(),
        }
        .into(),
    }
}

// =============================================================================
// TESTS
// =============================================================================
