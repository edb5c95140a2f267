//! ROLAP Test Utilities
//!
//! Centralized test infrastructure for the ROLAP workspace:
//! - An in-memory warehouse that executes aggregation statements
//! - FoodMart fixtures with known totals
//! - Proptest generators for cells, policies and leaf values
//! - Custom assertions for segment cache errors

pub use rolap_core::{
    AggregatedRow, AggregationFunction, AllocationPolicy, CacheConfig, CellKey, CellRequest,
    ColumnPredicate, ColumnValue, EditError, MeasureId, MemberRef, RolapError, RolapResult,
    SchemaId, SegmentError, StarId,
};
pub use rolap_scenario::{EditTarget, ScenarioContext};
pub use rolap_storage::{CacheManager, InMemoryCatalog, StarDefinition};

use async_trait::async_trait;
use rolap_storage::{AggregationStatement, ConnectionLease, SqlExecutor};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

static NULL: ColumnValue = ColumnValue::Null;

// ============================================================================
// IN-MEMORY WAREHOUSE
// ============================================================================

/// One row of a fact table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FactRow {
    pub coordinates: BTreeMap<String, ColumnValue>,
    pub measures: BTreeMap<MeasureId, f64>,
}

impl FactRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(mut self, column: impl Into<String>, value: impl Into<ColumnValue>) -> Self {
        self.coordinates.insert(column.into(), value.into());
        self
    }

    pub fn measure(mut self, measure: impl Into<MeasureId>, value: f64) -> Self {
        self.measures.insert(measure.into(), value);
        self
    }

    /// Value of `column`; a column the row does not carry reads as null.
    pub fn value_of(&self, column: &str) -> &ColumnValue {
        self.coordinates.get(column).unwrap_or(&NULL)
    }
}

/// A [`SqlExecutor`] over fact rows held in memory.
///
/// Tracks how many statements run at once so tests can check that the
/// connection pool bound is honored.
#[derive(Debug, Default)]
pub struct InMemoryWarehouse {
    facts: HashMap<StarId, Vec<FactRow>>,
    latency: Duration,
    failing: Option<(String, ColumnValue)>,
    executed: AtomicUsize,
    cardinality_queries: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

struct InFlight<'a> {
    warehouse: &'a InMemoryWarehouse,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.warehouse.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl InMemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fact(mut self, star: impl Into<StarId>, row: FactRow) -> Self {
        self.facts.entry(star.into()).or_default().push(row);
        self
    }

    pub fn with_facts<I>(mut self, star: impl Into<StarId>, rows: I) -> Self
    where
        I: IntoIterator<Item = FactRow>,
    {
        self.facts.entry(star.into()).or_default().extend(rows);
        self
    }

    /// Delay every statement, holding its connection meanwhile.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail aggregation statements whose filter on `column` admits `value`.
    pub fn failing_on(mut self, column: impl Into<String>, value: impl Into<ColumnValue>) -> Self {
        self.failing = Some((column.into(), value.into()));
        self
    }

    pub fn executed(&self) -> usize {
        self.executed.load(Ordering::SeqCst)
    }

    pub fn cardinality_queries(&self) -> usize {
        self.cardinality_queries.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Most statements ever running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn enter(&self) -> InFlight<'_> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let mut peak = self.peak_in_flight.load(Ordering::SeqCst);
        while current > peak {
            match self.peak_in_flight.compare_exchange_weak(
                peak,
                current,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(p) => peak = p,
            }
        }
        InFlight { warehouse: self }
    }

    fn rows(&self, star: &StarId) -> &[FactRow] {
        self.facts.get(star).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn aggregate(aggregator: AggregationFunction, values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let value = match aggregator {
        AggregationFunction::Sum => values.iter().sum(),
        AggregationFunction::Count => values.len() as f64,
        AggregationFunction::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        AggregationFunction::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        AggregationFunction::DistinctCount => {
            values.iter().map(|v| v.to_bits()).collect::<BTreeSet<_>>().len() as f64
        }
    };
    Some(value)
}

#[async_trait]
impl SqlExecutor for InMemoryWarehouse {
    async fn cardinality(
        &self,
        _connection: &ConnectionLease,
        star: &StarId,
        column: &str,
    ) -> RolapResult<u64> {
        let _guard = self.enter();
        self.cardinality_queries.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let distinct: BTreeSet<&ColumnValue> =
            self.rows(star).iter().map(|row| row.value_of(column)).collect();
        Ok(distinct.len() as u64)
    }

    async fn execute(
        &self,
        _connection: &ConnectionLease,
        statement: &AggregationStatement,
    ) -> RolapResult<Vec<AggregatedRow>> {
        let _guard = self.enter();
        self.executed.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if let Some((column, value)) = &self.failing {
            if statement.filters.get(column).is_some_and(|p| p.accepts(value)) {
                return Err(SegmentError::LoadFailed {
                    segment: statement.segment.short().to_string(),
                    reason: format!("warehouse rejected {} = {}", column, value),
                }
                .into());
            }
        }

        let mut groups: BTreeMap<Vec<ColumnValue>, Vec<f64>> = BTreeMap::new();
        for row in self.rows(&statement.star) {
            let admitted = statement
                .filters
                .iter()
                .all(|(column, predicate)| predicate.accepts(row.value_of(column)))
                && statement.compound.iter().all(|p| p.accepts(&row.coordinates));
            if !admitted {
                continue;
            }
            let Some(value) = row.measures.get(&statement.measure) else {
                continue;
            };
            let key = statement
                .group_by
                .iter()
                .map(|column| row.value_of(column).clone())
                .collect();
            groups.entry(key).or_default().push(*value);
        }

        Ok(groups
            .into_iter()
            .filter_map(|(key, values)| {
                aggregate(statement.aggregator, &values).map(|v| AggregatedRow::new(key, v))
            })
            .collect())
    }
}

// ============================================================================
// TRACING
// ============================================================================

/// Install a test-friendly subscriber once per process. `RUST_LOG` overrides
/// the default filter.
pub fn init_test_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("rolap_storage=debug,warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    use super::*;
    use std::sync::Arc;

    pub const FOODMART: &str = "FoodMart";
    pub const SALES: &str = "sales";
    pub const UNIT_SALES: &str = "unit_sales";
    pub const SALES_COUNT: &str = "sales_count";
    pub const CUSTOMERS: &str = "customer_count";
    pub const MIN_PRICE: &str = "min_price";

    /// Leaf columns of the sales star, coarsest first.
    pub const SALES_LEAF_COLUMNS: [&str; 4] = ["year", "state", "family", "product"];

    /// Drink products: (product, state, unit sales). All sold in 1997.
    pub const DRINK_PRODUCTS: [(&str, &str, f64); 12] = [
        ("Amigo Lemonade", "CA", 2512.0),
        ("Best Choice Cola", "OR", 1836.0),
        ("Cormorant Beer", "WA", 2394.0),
        ("Excellent Coffee", "CA", 1770.0),
        ("Fabulous Milk", "OR", 2113.0),
        ("Good Chablis", "WA", 1948.0),
        ("Imagine Apple Juice", "CA", 2207.0),
        ("Landslide Tea", "OR", 1689.0),
        ("Pearl Merlot", "WA", 2050.0),
        ("Portsmouth Light Beer", "CA", 2301.0),
        ("Skinner Root Beer", "OR", 1925.0),
        ("Walrus Wine", "WA", 1852.0),
    ];

    /// Sum of [`DRINK_PRODUCTS`].
    pub const DRINK_UNIT_SALES: f64 = 24597.0;

    /// Food products: (year, product, state, unit sales).
    pub const FOOD_PRODUCTS: [(i64, &str, &str, f64); 6] = [
        (1997, "Booker Bread", "CA", 3120.0),
        (1997, "Carrington Cheese", "OR", 2875.0),
        (1997, "Ebony Eggs", "WA", 1990.0),
        (1998, "Hermanos Fruit", "CA", 3305.0),
        (1998, "Monarch Pasta", "OR", 2640.0),
        (1998, "Thresher Soup", "WA", 2211.0),
    ];

    pub fn sales_star() -> StarDefinition {
        SALES_LEAF_COLUMNS.iter().fold(
            StarDefinition::new(FOODMART, SALES)
                .with_measure(UNIT_SALES, AggregationFunction::Sum)
                .with_measure(SALES_COUNT, AggregationFunction::Count)
                .with_measure(CUSTOMERS, AggregationFunction::DistinctCount)
                .with_measure(MIN_PRICE, AggregationFunction::Min),
            |star, column| star.with_leaf_column(*column),
        )
    }

    pub fn foodmart_catalog() -> InMemoryCatalog {
        InMemoryCatalog::new().with_star(sales_star())
    }

    /// Each product is recorded as two fact rows so that loads aggregate.
    pub fn foodmart_warehouse() -> InMemoryWarehouse {
        let mut rows = Vec::new();
        let mut customer = 0.0;
        let drinks = DRINK_PRODUCTS
            .iter()
            .map(|(product, state, units)| (1997, "Drink", *product, *state, *units));
        let foods = FOOD_PRODUCTS
            .iter()
            .map(|(year, product, state, units)| (*year, "Food", *product, *state, *units));
        for (year, family, product, state, units) in drinks.chain(foods) {
            let first = (units / 2.0).floor();
            for part in [first, units - first] {
                customer += 1.0;
                rows.push(
                    FactRow::new()
                        .at("year", year)
                        .at("state", state)
                        .at("family", family)
                        .at("product", product)
                        .measure(UNIT_SALES, part)
                        .measure(SALES_COUNT, 1.0)
                        .measure(CUSTOMERS, customer % 7.0)
                        .measure(MIN_PRICE, (part % 10.0) + 0.5),
                );
            }
        }
        InMemoryWarehouse::new().with_facts(SALES, rows)
    }

    /// The Drink product family cell.
    pub fn drink_cell() -> CellKey {
        CellKey::new(SALES, UNIT_SALES).at("family", "Drink")
    }

    pub fn test_config() -> CacheConfig {
        CacheConfig::default()
            .with_pool_capacity(4)
            .with_acquire_timeout(Duration::from_secs(5))
            .with_query_timeout(Duration::from_secs(10))
    }

    /// A manager over the FoodMart fixture, with the warehouse it queries.
    pub fn foodmart_manager(
        config: CacheConfig,
        warehouse: InMemoryWarehouse,
    ) -> (CacheManager, Arc<InMemoryWarehouse>) {
        let warehouse = Arc::new(warehouse);
        let manager = CacheManager::new(
            config,
            Arc::new(foodmart_catalog()),
            Arc::clone(&warehouse) as Arc<dyn SqlExecutor>,
        )
        .expect("fixture config is valid");
        (manager, warehouse)
    }

    pub const WIDE: &str = "wide";
    pub const WIDE_SCHEMA: &str = "Stress";
    pub const WIDE_MEASURE: &str = "amount";

    pub fn wide_column(i: usize) -> String {
        format!("c{:02}", i)
    }

    /// A star with `columns` leaf columns of `values` values each.
    pub fn wide_catalog(columns: usize) -> InMemoryCatalog {
        let star = (0..columns).fold(
            StarDefinition::new(WIDE_SCHEMA, WIDE)
                .with_measure(WIDE_MEASURE, AggregationFunction::Sum),
            |star, i| star.with_leaf_column(wide_column(i)),
        );
        InMemoryCatalog::new().with_star(star)
    }

    /// One fact row per value index; row `v` has value `v` in every column and
    /// an amount of `v + 1`.
    pub fn wide_warehouse(columns: usize, values: i64) -> InMemoryWarehouse {
        let rows = (0..values).map(|v| {
            (0..columns)
                .fold(FactRow::new(), |row, i| row.at(wide_column(i), v))
                .measure(WIDE_MEASURE, (v + 1) as f64)
        });
        InMemoryWarehouse::new().with_facts(WIDE, rows)
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::prelude::*;

    pub fn arb_column_value() -> impl Strategy<Value = ColumnValue> {
        prop_oneof![
            Just(ColumnValue::Null),
            any::<bool>().prop_map(ColumnValue::Bool),
            (-1000i64..1000).prop_map(ColumnValue::Int),
            "[A-Z][a-z]{1,8}".prop_map(ColumnValue::Text),
        ]
    }

    pub fn arb_policy() -> impl Strategy<Value = AllocationPolicy> {
        prop_oneof![
            Just(AllocationPolicy::EqualAllocation),
            Just(AllocationPolicy::EqualIncrement),
        ]
    }

    /// Non-empty leaf values, allowed to include zeros.
    pub fn arb_leaf_values() -> impl Strategy<Value = Vec<f64>> {
        prop::collection::vec(prop_oneof![Just(0.0), 0.0f64..10_000.0], 1..24)
    }

    /// A non-empty subset of the Drink products of the fixture.
    pub fn arb_drink_products() -> impl Strategy<Value = Vec<&'static str>> {
        prop::sample::subsequence(
            fixtures::DRINK_PRODUCTS.iter().map(|(p, _, _)| *p).collect::<Vec<_>>(),
            1..=fixtures::DRINK_PRODUCTS.len(),
        )
    }

    /// A unit-sales cell of the sales star at some subset of its leaf columns.
    pub fn arb_sales_cell() -> impl Strategy<Value = CellKey> {
        (
            prop::option::of(prop_oneof![Just(1997i64), Just(1998i64)]),
            prop::option::of(prop_oneof![Just("CA"), Just("OR"), Just("WA")]),
            prop::option::of(prop_oneof![Just("Drink"), Just("Food")]),
        )
            .prop_map(|(year, state, family)| {
                let mut cell = CellKey::new(fixtures::SALES, fixtures::UNIT_SALES);
                if let Some(year) = year {
                    cell = cell.at("year", year);
                }
                if let Some(state) = state {
                    cell = cell.at("state", state);
                }
                if let Some(family) = family {
                    cell = cell.at("family", family);
                }
                cell
            })
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    use super::*;

    const TOLERANCE: f64 = 1e-6;

    pub fn assert_close(actual: Option<f64>, expected: f64) {
        match actual {
            Some(v) => assert!(
                (v - expected).abs() <= TOLERANCE * expected.abs().max(1.0),
                "Expected {}, got {}",
                expected,
                v
            ),
            None => panic!("Expected {}, got an empty cell", expected),
        }
    }

    pub fn assert_stale_read<T: std::fmt::Debug>(result: &RolapResult<T>) {
        assert!(
            matches!(result, Err(RolapError::Segment(SegmentError::StaleRead { .. }))),
            "Expected StaleRead, got {:?}",
            result
        );
    }

    pub fn assert_load_failed<T: std::fmt::Debug>(result: &RolapResult<T>) {
        assert!(
            matches!(result, Err(RolapError::Segment(SegmentError::LoadFailed { .. }))),
            "Expected LoadFailed, got {:?}",
            result
        );
    }

    pub fn assert_resource_exhausted<T: std::fmt::Debug>(result: &RolapResult<T>) {
        assert!(
            matches!(
                result,
                Err(RolapError::Segment(SegmentError::ResourceExhausted { .. }))
            ),
            "Expected ResourceExhausted, got {:?}",
            result
        );
    }

    pub fn assert_invalid_edit<T: std::fmt::Debug>(result: &RolapResult<T>) {
        assert!(
            matches!(result, Err(RolapError::InvalidEdit(_))),
            "Expected InvalidEdit, got {:?}",
            result
        );
    }
}

// ============================================================================
// TESTS
// ============================================================================
