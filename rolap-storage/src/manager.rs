//! The cache manager: single entry point for reads, loads and invalidation.

use crate::admin::AdminSurface;
use crate::catalog::SchemaCatalog;
use crate::coordinator::{LoadCoordinator, LoadRequest};
use crate::executor::SqlExecutor;
use crate::index::{Coverage, SegmentIndex, SegmentWaiter};
use crate::stats::{CacheStats, CacheStatsSnapshot};
use rolap_core::{
    AggregationFunction, AllocationPolicy, CacheConfig, CatalogError, CellKey, CellRequest,
    ColumnPredicate, EditError, MeasureId, RolapError, RolapResult, ScenarioId, SchemaId, Segment,
    SegmentError, SegmentHeader, StarId,
};
use rolap_scenario::{EditTarget, ScenarioContext, ScenarioRegistry, WritebackEdit};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Owns the segment index, the load coordinator and the scenario registry.
///
/// Reads proceed concurrently; each index mutation is atomic per partition.
/// A resolution that observes a flushed load is retried up to
/// `max_stale_retries` times, and the whole resolution is bounded by
/// `query_timeout`. Dropping a resolution future abandons only its wait.
///
/// # Example
///
/// ```ignore
/// let manager = CacheManager::new(CacheConfig::from_env(), catalog, executor)?;
///
/// let drink = CellRequest::new("sales", "unit_sales").at("family", "Drink");
/// let value = manager.resolve(&drink).await?;
///
/// let scenario = manager.create_scenario();
/// manager.set_value(
///     scenario,
///     EditTarget::new(CellKey::new("sales", "unit_sales").at("family", "Drink")),
///     23597.0,
///     Some(AllocationPolicy::EqualIncrement),
/// )?;
/// let edited = manager
///     .resolve_in(&ScenarioContext::none().with_connection(scenario), &drink)
///     .await?;
/// ```
pub struct CacheManager {
    config: CacheConfig,
    index: SegmentIndex,
    coordinator: LoadCoordinator,
    catalog: Arc<dyn SchemaCatalog>,
    scenarios: ScenarioRegistry,
    stats: Arc<CacheStats>,
}

impl fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheManager")
            .field("config", &self.config)
            .field("coordinator", &self.coordinator)
            .field("scenarios", &self.scenarios.len())
            .finish()
    }
}

/// A segment still to be awaited and the cells it must answer.
struct PendingCells {
    waiter: SegmentWaiter,
    cells: Vec<CellKey>,
    aggregator: AggregationFunction,
}

impl CacheManager {
    /// Create a manager. Fails if the config is invalid.
    pub fn new(
        config: CacheConfig,
        catalog: Arc<dyn SchemaCatalog>,
        executor: Arc<dyn SqlExecutor>,
    ) -> RolapResult<Self> {
        config.validate()?;
        let index = SegmentIndex::new();
        let stats = Arc::new(CacheStats::new());
        let coordinator =
            LoadCoordinator::new(&config, index.clone(), executor, Arc::clone(&stats));
        tracing::info!(
            pool_capacity = config.pool_capacity,
            reserved_nested = config.effective_reserved(),
            check_cardinality = config.check_cardinality,
            "Segment cache initialized"
        );
        Ok(Self {
            config,
            index,
            coordinator,
            catalog,
            scenarios: ScenarioRegistry::new(),
            stats,
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn index(&self) -> &SegmentIndex {
        &self.index
    }

    pub fn coordinator(&self) -> &LoadCoordinator {
        &self.coordinator
    }

    pub fn scenarios(&self) -> &ScenarioRegistry {
        &self.scenarios
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    /// Administrative operations and monitoring.
    pub fn admin(&self) -> AdminSurface<'_> {
        AdminSurface::new(self)
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    /// Value of one cell with no scenario applied. `None` is an empty cell.
    pub async fn resolve(&self, request: &CellRequest) -> RolapResult<Option<f64>> {
        let mut values = self.resolve_batch(std::slice::from_ref(request)).await?;
        Ok(values.pop().flatten())
    }

    /// Values of several cells, loading everything missing as one request.
    pub async fn resolve_batch(&self, requests: &[CellRequest]) -> RolapResult<Vec<Option<f64>>> {
        self.retrying(|| self.try_resolve_batch(requests)).await
    }

    /// Value of a cell under the scenario bound by `context`, if any.
    pub async fn resolve_in(
        &self,
        context: &ScenarioContext,
        request: &CellRequest,
    ) -> RolapResult<Option<f64>> {
        let Some(scenario) = context.effective() else {
            return self.resolve(request).await;
        };
        let measure_cell = CellKey::new(request.star.clone(), request.measure.clone());
        let edits = self.scenarios.edits_for(scenario, &measure_cell)?;
        let cells = request.expand();
        let touched = cells
            .iter()
            .any(|cell| edits.iter().any(|e| e.target.overlaps(cell)));
        if !touched {
            return self.resolve(request).await;
        }

        let aggregator = self.catalog.aggregator(&request.star, &request.measure)?;
        self.retrying(|| self.try_resolve_overlaid(scenario, &edits, &cells, aggregator))
            .await
    }

    /// Run `attempt` until it does not fail stale, within the retry budget and
    /// the query timeout.
    async fn retrying<T, F, Fut>(&self, mut attempt: F) -> RolapResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RolapResult<T>>,
    {
        let budget = self.config.max_stale_retries;
        let run = async {
            let mut retries = 0u32;
            loop {
                match attempt().await {
                    Err(RolapError::Segment(SegmentError::StaleRead { segment, .. })) => {
                        if retries >= budget {
                            tracing::warn!(
                                segment = %segment,
                                retries,
                                "Giving up after repeated flushes"
                            );
                            return Err(SegmentError::StaleRead {
                                segment,
                                attempts: retries + 1,
                            }
                            .into());
                        }
                        retries += 1;
                        self.stats.record_stale_retry();
                        tracing::debug!(
                            segment = %segment,
                            retries,
                            "Segment flushed while waiting, retrying"
                        );
                    }
                    other => return other,
                }
            }
        };

        let timeout = self.config.query_timeout;
        match tokio::time::timeout(timeout, run).await {
            Ok(result) => result,
            Err(_) => {
                let waited_ms = timeout.as_millis() as u64;
                tracing::warn!(waited_ms, "Query timed out waiting for segments");
                Err(SegmentError::QueryTimeout { waited_ms }.into())
            }
        }
    }

    async fn try_resolve_batch(&self, requests: &[CellRequest]) -> RolapResult<Vec<Option<f64>>> {
        let mut plans: Vec<(AggregationFunction, Vec<CellKey>)> =
            Vec::with_capacity(requests.len());
        let mut wanted: BTreeMap<(StarId, MeasureId), (AggregationFunction, BTreeSet<CellKey>)> =
            BTreeMap::new();
        for request in requests {
            let aggregator = self.catalog.aggregator(&request.star, &request.measure)?;
            let cells = request.expand();
            if cells.len() > 1 && !aggregator.is_rollable() {
                return Err(SegmentError::NotRollable {
                    measure: request.measure.to_string(),
                    reason: format!("{} cannot combine a set of members", aggregator),
                }
                .into());
            }
            wanted
                .entry((request.star.clone(), request.measure.clone()))
                .or_insert_with(|| (aggregator, BTreeSet::new()))
                .1
                .extend(cells.iter().cloned());
            plans.push((aggregator, cells));
        }

        let mut values: HashMap<CellKey, Option<f64>> = HashMap::new();
        let mut pending: Vec<PendingCells> = Vec::new();
        let mut load = LoadRequest::new();
        let mut loading: Vec<(Vec<CellKey>, AggregationFunction)> = Vec::new();

        for ((star, measure), (aggregator, cells)) in wanted {
            let cells: Vec<CellKey> = cells.into_iter().collect();
            let found = self
                .index
                .lookup(&star, &measure, &cells, aggregator.is_rollable())?;

            self.stats.record_hits(found.served.len());
            for (cell, segment) in found.served {
                let value = segment.value_at(&cell, aggregator);
                values.insert(cell, value);
            }
            for matched in found.pending {
                self.stats.record_coalesced(matched.cells.len());
                pending.push(PendingCells {
                    waiter: matched.waiter,
                    cells: matched.cells,
                    aggregator,
                });
            }
            if !found.residual.is_empty() {
                self.stats.record_misses(found.residual.len());
                let schema = self.catalog.schema_of(&star)?;
                for (header, group) in plan_headers(&schema, &star, &measure, found.residual) {
                    load.push(header, aggregator);
                    loading.push((group, aggregator));
                }
            }
        }

        if !load.is_empty() {
            tracing::debug!(headers = load.len(), "Submitting segment loads");
        }
        let waiters = self.coordinator.submit(load)?;
        pending.extend(
            waiters
                .into_iter()
                .zip(loading)
                .map(|(waiter, (cells, aggregator))| PendingCells {
                    waiter,
                    cells,
                    aggregator,
                }),
        );

        for job in pending {
            let segment = job.waiter.wait().await?;
            for cell in job.cells {
                let value = segment.value_at(&cell, job.aggregator);
                values.insert(cell, value);
            }
        }

        Ok(plans
            .into_iter()
            .map(|(aggregator, cells)| {
                aggregator.combine(cells.iter().filter_map(|c| values.get(c).copied().flatten()))
            })
            .collect())
    }

    // =========================================================================
    // Scenarios
    // =========================================================================

    /// Create an empty scenario.
    pub fn create_scenario(&self) -> ScenarioId {
        self.scenarios.create_scenario().id()
    }

    /// Record a writeback edit in `scenario`.
    ///
    /// The measure must be additive and the target may only fix leaf
    /// columns of its star. A rejected edit leaves the scenario unchanged.
    pub fn set_value(
        &self,
        scenario: ScenarioId,
        target: EditTarget,
        new_value: f64,
        policy: Option<AllocationPolicy>,
    ) -> RolapResult<Arc<WritebackEdit>> {
        let cell = &target.cell;
        let aggregator = self.catalog.aggregator(&cell.star, &cell.measure)?;
        if !matches!(aggregator, AggregationFunction::Sum | AggregationFunction::Count) {
            return Err(EditError::UnsupportedMeasure {
                measure: cell.measure.to_string(),
                aggregator: aggregator.to_string(),
            }
            .into());
        }
        let leaf_columns = self.catalog.leaf_columns(&cell.star)?;
        check_leaf_columns(cell, &leaf_columns)?;
        self.scenarios.set_value(scenario, target, new_value, policy)
    }

    /// Edits of `scenario` in append order.
    pub fn scenario_history(&self, scenario: ScenarioId) -> RolapResult<Vec<Arc<WritebackEdit>>> {
        self.scenarios.history(scenario)
    }

    async fn try_resolve_overlaid(
        &self,
        scenario: ScenarioId,
        edits: &[Arc<WritebackEdit>],
        cells: &[CellKey],
        aggregator: AggregationFunction,
    ) -> RolapResult<Option<f64>> {
        let mut targets: Vec<CellKey> = edits.iter().map(|e| e.target.clone()).collect();
        targets.extend(cells.iter().cloned());
        let leaves: Vec<(CellKey, f64)> = self
            .leaf_values(aggregator, &targets)
            .await?
            .into_iter()
            .collect();

        let mut values = Vec::with_capacity(cells.len());
        for cell in cells {
            let base = aggregator.combine(
                leaves
                    .iter()
                    .filter(|(leaf, _)| leaf.is_descendant_of(cell))
                    .map(|(_, v)| *v),
            );
            let resolution = self.scenarios.resolve(scenario, edits, cell, base, &leaves)?;
            values.push(resolution.value);
        }
        Ok(AggregationFunction::Sum.combine(values.into_iter().flatten()))
    }

    /// Base values of the leaf cells under each of `targets`.
    async fn leaf_values(
        &self,
        aggregator: AggregationFunction,
        targets: &[CellKey],
    ) -> RolapResult<BTreeMap<CellKey, f64>> {
        let mut headers: Vec<(SegmentHeader, Vec<&CellKey>)> = Vec::new();
        for target in targets {
            let header = self.leaf_header(target)?;
            match headers.iter_mut().find(|(h, _)| *h == header) {
                Some((_, covered)) => covered.push(target),
                None => headers.push((header, vec![target])),
            }
        }

        let mut segments: Vec<(Arc<Segment>, Vec<&CellKey>)> = Vec::new();
        let mut waiting: Vec<(SegmentWaiter, Vec<&CellKey>)> = Vec::new();
        let mut load = LoadRequest::new();
        let mut loading: Vec<Vec<&CellKey>> = Vec::new();
        for (header, covered) in headers {
            match self.index.find_covering(&header, false)? {
                Some(Coverage::Ready(segment)) => {
                    self.stats.record_hits(1);
                    segments.push((segment, covered));
                }
                Some(Coverage::Pending(waiter)) => {
                    self.stats.record_coalesced(1);
                    waiting.push((waiter, covered));
                }
                None => {
                    self.stats.record_misses(1);
                    load.push(header, aggregator);
                    loading.push(covered);
                }
            }
        }
        waiting.extend(self.coordinator.submit(load)?.into_iter().zip(loading));
        for (waiter, covered) in waiting {
            segments.push((waiter.wait().await?, covered));
        }

        let mut leaves = BTreeMap::new();
        for (segment, covered) in segments {
            let star = segment.header().star().clone();
            let measure = segment.header().measure().clone();
            for (coordinates, value) in segment.cells() {
                let leaf = CellKey {
                    star: star.clone(),
                    measure: measure.clone(),
                    coordinates,
                };
                if covered.iter().any(|t| leaf.is_descendant_of(t)) {
                    leaves.insert(leaf, value);
                }
            }
        }
        Ok(leaves)
    }

    /// Header of the leaf-level segment under `target`.
    fn leaf_header(&self, target: &CellKey) -> RolapResult<SegmentHeader> {
        let schema = self.catalog.schema_of(&target.star)?;
        let leaf_columns = self.catalog.leaf_columns(&target.star)?;
        check_leaf_columns(target, &leaf_columns)?;

        let mut builder =
            SegmentHeader::builder(schema, target.star.clone(), target.measure.clone());
        for column in leaf_columns {
            builder = match target.coordinates.get(&column) {
                Some(value) => builder.column(column, ColumnPredicate::Value(value.clone())),
                None => builder.unconstrained(column),
            };
        }
        Ok(builder.build())
    }

    // =========================================================================
    // Invalidation
    // =========================================================================

    /// Invalidate every segment of `schema`. Does not wait for pending loads.
    pub fn flush_schema(&self, schema: &SchemaId) -> RolapResult<usize> {
        let flushed = self.index.flush(|h| h.schema() == schema)?;
        self.coordinator.clear_cardinalities(Some(schema));
        self.stats.record_flushed(flushed);
        tracing::info!(schema = %schema, flushed, "Flushed schema segments");
        Ok(flushed)
    }

    /// Invalidate every segment. Does not wait for pending loads.
    pub fn flush_all(&self) -> RolapResult<usize> {
        let flushed = self.index.flush(|_| true)?;
        self.coordinator.clear_cardinalities(None);
        self.stats.record_flushed(flushed);
        tracing::info!(flushed, "Flushed all segments");
        Ok(flushed)
    }
}

/// Group missing cells by column set into one header per group, each column
/// enumerating the values its cells ask for.
fn plan_headers(
    schema: &SchemaId,
    star: &StarId,
    measure: &MeasureId,
    cells: Vec<CellKey>,
) -> Vec<(SegmentHeader, Vec<CellKey>)> {
    let mut groups: BTreeMap<Vec<String>, Vec<CellKey>> = BTreeMap::new();
    for cell in cells {
        groups
            .entry(cell.coordinates.keys().cloned().collect())
            .or_default()
            .push(cell);
    }

    groups
        .into_iter()
        .map(|(columns, cells)| {
            let mut builder =
                SegmentHeader::builder(schema.clone(), star.clone(), measure.clone());
            for column in columns {
                let predicate = ColumnPredicate::any_of(
                    cells
                        .iter()
                        .filter_map(|c| c.coordinates.get(&column).cloned()),
                );
                builder = builder.column(column, predicate);
            }
            (builder.build(), cells)
        })
        .collect()
}

fn check_leaf_columns(cell: &CellKey, leaf_columns: &[String]) -> RolapResult<()> {
    match cell.coordinates.keys().find(|c| !leaf_columns.contains(c)) {
        Some(column) => Err(CatalogError::UnknownColumn {
            star: cell.star.to_string(),
            column: column.clone(),
        }
        .into()),
        None => Ok(()),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{InMemoryCatalog, StarDefinition};
    use crate::testing::ScriptedExecutor;
    use rolap_core::{AggregatedRow, ColumnValue, MemberRef};
    use std::time::Duration;

    fn rows() -> Vec<AggregatedRow> {
        let mut rows = Vec::new();
        for (family, state, v) in [
            ("Drink", "CA", 10.0),
            ("Drink", "OR", 20.0),
            ("Food", "CA", 30.0),
            ("Food", "OR", 40.0),
        ] {
            rows.push(AggregatedRow::new(
                vec![ColumnValue::from(family), ColumnValue::from(state)],
                v,
            ));
        }
        rows
    }

    fn catalog() -> Arc<InMemoryCatalog> {
        Arc::new(
            InMemoryCatalog::new().with_star(
                StarDefinition::new("FoodMart", "sales")
                    .with_leaf_column("family")
                    .with_leaf_column("state")
                    .with_measure("unit_sales", AggregationFunction::Sum)
                    .with_measure("customers", AggregationFunction::DistinctCount)
                    .with_measure("low_price", AggregationFunction::Min),
            ),
        )
    }

    fn manager(executor: Arc<ScriptedExecutor>) -> CacheManager {
        let config = CacheConfig::default()
            .with_pool_capacity(4)
            .with_query_timeout(Duration::from_secs(5));
        CacheManager::new(config, catalog(), executor).unwrap()
    }

    fn request() -> CellRequest {
        CellRequest::new("sales", "unit_sales")
    }

    #[test]
    fn test_invalid_config_rejected() {
        let executor = Arc::new(ScriptedExecutor::new(rows()));
        let config = CacheConfig::default().with_pool_capacity(0);
        assert!(matches!(
            CacheManager::new(config, catalog(), executor),
            Err(RolapError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_miss_then_hit() {
        let executor = Arc::new(ScriptedExecutor::new(rows()));
        let manager = manager(Arc::clone(&executor));
        let cell = request().at("family", "Drink").at("state", "CA");

        assert_eq!(manager.resolve(&cell).await.unwrap(), Some(10.0));
        assert_eq!(manager.resolve(&cell).await.unwrap(), Some(10.0));
        assert_eq!(executor.execute_calls(), 1);

        let stats = manager.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
    }

    #[tokio::test]
    async fn test_set_coordinate_combines_cells() {
        let executor = Arc::new(ScriptedExecutor::new(rows()));
        let manager = manager(executor);
        let slicer = request()
            .at("family", "Food")
            .any_of("state", ["CA", "OR"]);
        assert_eq!(manager.resolve(&slicer).await.unwrap(), Some(70.0));
    }

    #[tokio::test]
    async fn test_batch_loads_once() {
        let executor = Arc::new(ScriptedExecutor::new(rows()));
        let manager = manager(Arc::clone(&executor));
        let cells = vec![
            request().at("family", "Drink").at("state", "CA"),
            request().at("family", "Food").at("state", "OR"),
            request().at("family", "Snacks").at("state", "OR"),
        ];
        let values = manager.resolve_batch(&cells).await.unwrap();
        assert_eq!(values, vec![Some(10.0), Some(40.0), None]);
        assert_eq!(executor.execute_calls(), 1);
    }

    #[tokio::test]
    async fn test_distinct_count_set_is_not_rollable() {
        let executor = Arc::new(ScriptedExecutor::new(rows()));
        let manager = manager(executor);
        let slicer = CellRequest::new("sales", "customers").any_of("state", ["CA", "OR"]);
        assert!(matches!(
            manager.resolve(&slicer).await,
            Err(RolapError::Segment(SegmentError::NotRollable { .. }))
        ));
    }

    #[tokio::test]
    async fn test_load_failure_propagates() {
        let executor = Arc::new(ScriptedExecutor::new(rows()).failing_on("Food"));
        let manager = manager(executor);
        let bad = request().at("family", "Food").at("state", "CA");
        assert!(matches!(
            manager.resolve(&bad).await,
            Err(RolapError::Segment(SegmentError::LoadFailed { .. }))
        ));
        let good = request().at("family", "Drink").at("state", "CA");
        assert_eq!(manager.resolve(&good).await.unwrap(), Some(10.0));
    }

    #[tokio::test]
    async fn test_flush_forces_reload() {
        let executor = Arc::new(ScriptedExecutor::new(rows()));
        let manager = manager(Arc::clone(&executor));
        let cell = request().at("family", "Drink").at("state", "OR");

        manager.resolve(&cell).await.unwrap();
        assert_eq!(manager.flush_schema(&SchemaId::new("FoodMart")).unwrap(), 1);
        assert_eq!(manager.flush_schema(&SchemaId::new("Other")).unwrap(), 0);
        manager.resolve(&cell).await.unwrap();
        assert_eq!(executor.execute_calls(), 2);
        assert_eq!(manager.stats().flushed_segments, 1);
    }

    #[tokio::test]
    async fn test_writeback_rejects_non_additive_measure() {
        let executor = Arc::new(ScriptedExecutor::new(rows()));
        let manager = manager(executor);
        let scenario = manager.create_scenario();
        let target = EditTarget::new(CellKey::new("sales", "low_price").at("family", "Drink"));
        let err = manager
            .set_value(scenario, target, 1.0, Some(AllocationPolicy::EqualIncrement))
            .unwrap_err();
        assert!(matches!(
            err,
            RolapError::InvalidEdit(EditError::UnsupportedMeasure { .. })
        ));
        assert!(manager.scenario_history(scenario).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_writeback_rejects_non_leaf_column() {
        let executor = Arc::new(ScriptedExecutor::new(rows()));
        let manager = manager(executor);
        let scenario = manager.create_scenario();
        let target = EditTarget::new(CellKey::new("sales", "unit_sales").at("year", 1997));
        assert!(matches!(
            manager.set_value(scenario, target, 1.0, Some(AllocationPolicy::EqualIncrement)),
            Err(RolapError::Catalog(CatalogError::UnknownColumn { .. }))
        ));
    }

    #[tokio::test]
    async fn test_scenario_overlay_and_isolation() {
        let executor = Arc::new(ScriptedExecutor::new(rows()));
        let manager = manager(executor);
        let scenario = manager.create_scenario();
        let drink = CellKey::new("sales", "unit_sales").at("family", "Drink");

        manager
            .set_value(
                scenario,
                EditTarget::new(drink.clone())
                    .with_member(MemberRef::stored("Product", "[Product].[Drink]")),
                60.0,
                Some(AllocationPolicy::EqualAllocation),
            )
            .unwrap();

        let bound = ScenarioContext::none().with_connection(scenario);
        let drink_request = CellRequest::from(drink);
        assert_eq!(manager.resolve_in(&bound, &drink_request).await.unwrap(), Some(60.0));

        let drink_ca = request().at("family", "Drink").at("state", "CA");
        assert_eq!(manager.resolve_in(&bound, &drink_ca).await.unwrap(), Some(20.0));

        let food = request().at("family", "Food").at("state", "OR");
        assert_eq!(manager.resolve_in(&bound, &food).await.unwrap(), Some(40.0));

        assert_eq!(
            manager
                .resolve_in(&ScenarioContext::none(), &drink_request)
                .await
                .unwrap(),
            Some(30.0)
        );
    }

    #[test]
    fn test_plan_headers_groups_by_column_set() {
        let cells = vec![
            CellKey::new("sales", "unit_sales").at("family", "Drink").at("state", "CA"),
            CellKey::new("sales", "unit_sales").at("family", "Food").at("state", "OR"),
            CellKey::new("sales", "unit_sales").at("family", "Food"),
        ];
        let planned = plan_headers(
            &SchemaId::new("FoodMart"),
            &StarId::new("sales"),
            &MeasureId::new("unit_sales"),
            cells,
        );
        assert_eq!(planned.len(), 2);
        let (wide, wide_cells) = &planned[0];
        assert_eq!(wide.column_names(), vec!["family".to_string(), "state".to_string()]);
        assert_eq!(
            wide.columns()["family"],
            ColumnPredicate::any_of(["Drink", "Food"])
        );
        assert_eq!(wide_cells.len(), 2);
        for cell in wide_cells {
            assert!(wide.covers_cell(cell, true));
        }
    }
}
