//! Writeback Scenario Tests
//!
//! Edits recorded in a scenario are allocated to the leaf cells under their
//! target and replayed in order on every read bound to that scenario. Reads
//! without the scenario, and reads bound to other scenarios, never see them.

use proptest::prelude::*;
use rolap_core::{ScenarioId, SCENARIO_DIMENSION};
use rolap_storage::CacheManager;
use rolap_test_utils::assertions::{assert_close, assert_invalid_edit};
use rolap_test_utils::fixtures::*;
use rolap_test_utils::generators::{arb_drink_products, arb_leaf_values, arb_policy};
use rolap_test_utils::{
    AllocationPolicy, CellKey, CellRequest, EditError, EditTarget, FactRow, InMemoryWarehouse,
    MemberRef, RolapError, ScenarioContext,
};
use std::sync::Arc;

// ============================================================================
// HELPERS
// ============================================================================

fn manager() -> (CacheManager, Arc<InMemoryWarehouse>) {
    foodmart_manager(test_config(), foodmart_warehouse())
}

fn product_cell(product: &str) -> CellKey {
    drink_cell().at("product", product)
}

fn drink_target() -> EditTarget {
    EditTarget::new(drink_cell()).with_member(MemberRef::stored("Product", "[Product].[Drink]"))
}

fn bound(scenario: ScenarioId) -> ScenarioContext {
    ScenarioContext::none().with_connection(scenario)
}

const DECREASE: f64 = 1000.0;

// ============================================================================
// ALLOCATION
// ============================================================================

#[tokio::test]
async fn test_equal_increment_on_drink_family() {
    let (manager, _) = manager();
    let drink = CellRequest::from(drink_cell());
    assert_close(manager.resolve(&drink).await.unwrap(), DRINK_UNIT_SALES);

    let scenario = manager.create_scenario();
    manager
        .set_value(
            scenario,
            drink_target(),
            DRINK_UNIT_SALES - DECREASE,
            Some(AllocationPolicy::EqualIncrement),
        )
        .unwrap();

    let context = bound(scenario);
    assert_close(
        manager.resolve_in(&context, &drink).await.unwrap(),
        DRINK_UNIT_SALES - DECREASE,
    );
    for (product, _, units) in DRINK_PRODUCTS {
        let cell = CellRequest::from(product_cell(product));
        assert_close(
            manager.resolve_in(&context, &cell).await.unwrap(),
            units - DECREASE / 12.0,
        );
    }

    // Unbound reads still see the warehouse data.
    assert_close(manager.resolve(&drink).await.unwrap(), DRINK_UNIT_SALES);
    assert_close(
        manager
            .resolve_in(&ScenarioContext::none(), &drink)
            .await
            .unwrap(),
        DRINK_UNIT_SALES,
    );
}

#[tokio::test]
async fn test_equal_allocation_keeps_proportions() {
    let (manager, _) = manager();
    let scenario = manager.create_scenario();
    manager
        .set_value(
            scenario,
            drink_target(),
            DRINK_UNIT_SALES * 2.0,
            Some(AllocationPolicy::EqualAllocation),
        )
        .unwrap();

    let context = bound(scenario);
    for (product, _, units) in DRINK_PRODUCTS {
        let cell = CellRequest::from(product_cell(product));
        assert_close(manager.resolve_in(&context, &cell).await.unwrap(), units * 2.0);
    }
}

#[tokio::test]
async fn test_overlapping_cell_sees_its_share() {
    let (manager, _) = manager();
    let scenario = manager.create_scenario();
    manager
        .set_value(
            scenario,
            drink_target(),
            DRINK_UNIT_SALES - DECREASE,
            Some(AllocationPolicy::EqualIncrement),
        )
        .unwrap();

    // California holds four Drink products and two Food products.
    let california = CellRequest::new(SALES, UNIT_SALES).at("state", "CA");
    let base = manager.resolve(&california).await.unwrap().unwrap();
    let drink_in_california = DRINK_PRODUCTS.iter().filter(|(_, s, _)| *s == "CA").count();
    assert_eq!(drink_in_california, 4);
    assert_close(
        manager.resolve_in(&bound(scenario), &california).await.unwrap(),
        base - DECREASE / 12.0 * drink_in_california as f64,
    );

    // Food is untouched.
    let food = CellRequest::new(SALES, UNIT_SALES).at("family", "Food");
    assert_eq!(
        manager.resolve_in(&bound(scenario), &food).await.unwrap(),
        manager.resolve(&food).await.unwrap()
    );
}

#[tokio::test]
async fn test_edits_compose_in_order() {
    let (manager, _) = manager();
    let scenario = manager.create_scenario();
    manager
        .set_value(
            scenario,
            drink_target(),
            DRINK_UNIT_SALES - DECREASE,
            Some(AllocationPolicy::EqualIncrement),
        )
        .unwrap();
    manager
        .set_value(
            scenario,
            EditTarget::new(product_cell("Walrus Wine")),
            2000.0,
            Some(AllocationPolicy::EqualAllocation),
        )
        .unwrap();

    let context = bound(scenario);
    let walrus = CellRequest::from(product_cell("Walrus Wine"));
    assert_close(manager.resolve_in(&context, &walrus).await.unwrap(), 2000.0);

    let walrus_after_first = 1852.0 - DECREASE / 12.0;
    assert_close(
        manager
            .resolve_in(&context, &CellRequest::from(drink_cell()))
            .await
            .unwrap(),
        DRINK_UNIT_SALES - DECREASE - walrus_after_first + 2000.0,
    );
    assert_eq!(manager.scenario_history(scenario).unwrap().len(), 2);
}

#[tokio::test]
async fn test_edit_on_empty_region_creates_value() {
    let (manager, _) = manager();
    let scenario = manager.create_scenario();
    let next_year = drink_cell().at("year", 1998);
    assert_eq!(
        manager
            .resolve(&CellRequest::from(next_year.clone()))
            .await
            .unwrap(),
        None
    );

    manager
        .set_value(
            scenario,
            EditTarget::new(next_year.clone()),
            500.0,
            Some(AllocationPolicy::EqualIncrement),
        )
        .unwrap();

    let context = bound(scenario);
    assert_close(
        manager
            .resolve_in(&context, &CellRequest::from(next_year))
            .await
            .unwrap(),
        500.0,
    );
    assert_close(
        manager
            .resolve_in(&context, &CellRequest::from(drink_cell()))
            .await
            .unwrap(),
        DRINK_UNIT_SALES + 500.0,
    );
}

#[tokio::test]
async fn test_set_coordinates_under_scenario() {
    let (manager, _) = manager();
    let scenario = manager.create_scenario();
    manager
        .set_value(
            scenario,
            drink_target(),
            DRINK_UNIT_SALES - DECREASE,
            Some(AllocationPolicy::EqualIncrement),
        )
        .unwrap();

    let pair = CellRequest::from(drink_cell()).any_of("product", ["Amigo Lemonade", "Walrus Wine"]);
    assert_close(
        manager.resolve_in(&bound(scenario), &pair).await.unwrap(),
        2512.0 + 1852.0 - 2.0 * DECREASE / 12.0,
    );
}

// ============================================================================
// ISOLATION
// ============================================================================

#[tokio::test]
async fn test_scenarios_are_isolated() {
    let (manager, _) = manager();
    let first = manager.create_scenario();
    let second = manager.create_scenario();
    manager
        .set_value(first, drink_target(), 100.0, Some(AllocationPolicy::EqualAllocation))
        .unwrap();
    manager
        .set_value(second, drink_target(), 200.0, Some(AllocationPolicy::EqualAllocation))
        .unwrap();

    let drink = CellRequest::from(drink_cell());
    assert_close(manager.resolve_in(&bound(first), &drink).await.unwrap(), 100.0);
    assert_close(manager.resolve_in(&bound(second), &drink).await.unwrap(), 200.0);

    // A slicer binding wins over the connection binding.
    let both = ScenarioContext::none()
        .with_connection(first)
        .with_slicer(second);
    assert_close(manager.resolve_in(&both, &drink).await.unwrap(), 200.0);

    let untouched = manager.create_scenario();
    assert_close(
        manager.resolve_in(&bound(untouched), &drink).await.unwrap(),
        DRINK_UNIT_SALES,
    );
}

#[tokio::test]
async fn test_scenario_reads_reuse_cached_segments() {
    let (manager, warehouse) = manager();
    let scenario = manager.create_scenario();
    manager
        .set_value(scenario, drink_target(), 1.0, Some(AllocationPolicy::EqualIncrement))
        .unwrap();

    let drink = CellRequest::from(drink_cell());
    manager.resolve_in(&bound(scenario), &drink).await.unwrap();
    let executed = warehouse.executed();
    manager.resolve_in(&bound(scenario), &drink).await.unwrap();
    assert_eq!(warehouse.executed(), executed);
}

// ============================================================================
// REJECTED EDITS
// ============================================================================

#[tokio::test]
async fn test_calculated_member_edit_rejected() {
    let (manager, _) = manager();
    let scenario = manager.create_scenario();
    manager
        .set_value(scenario, drink_target(), 1.0, Some(AllocationPolicy::EqualIncrement))
        .unwrap();
    let before = manager.scenario_history(scenario).unwrap().len();

    let target = EditTarget::new(drink_cell())
        .with_member(MemberRef::calculated("Measures", "[Measures].[Profit Growth]"));
    let result = manager.set_value(scenario, target, 5.0, Some(AllocationPolicy::EqualIncrement));
    assert_invalid_edit(&result);
    assert!(matches!(
        result,
        Err(RolapError::InvalidEdit(EditError::CalculatedMember { .. }))
    ));
    assert_eq!(manager.scenario_history(scenario).unwrap().len(), before);
}

#[tokio::test]
async fn test_calculated_scenario_member_allowed() {
    let (manager, _) = manager();
    let scenario = manager.create_scenario();
    let target = EditTarget::new(drink_cell())
        .with_member(MemberRef::calculated(SCENARIO_DIMENSION, "[Scenario].[Budget]"));
    manager
        .set_value(scenario, target, 1.0, Some(AllocationPolicy::EqualIncrement))
        .unwrap();
    assert_eq!(manager.scenario_history(scenario).unwrap().len(), 1);
}

#[tokio::test]
async fn test_edit_without_policy_rejected() {
    let (manager, _) = manager();
    let scenario = manager.create_scenario();
    let result = manager.set_value(scenario, drink_target(), 1.0, None);
    assert!(matches!(
        result,
        Err(RolapError::InvalidEdit(EditError::MissingPolicy))
    ));
    assert!(manager.scenario_history(scenario).unwrap().is_empty());
}

#[tokio::test]
async fn test_edit_on_distinct_count_rejected() {
    let (manager, _) = manager();
    let scenario = manager.create_scenario();
    let target = EditTarget::new(CellKey::new(SALES, CUSTOMERS).at("family", "Drink"));
    let result = manager.set_value(scenario, target, 1.0, Some(AllocationPolicy::EqualIncrement));
    assert!(matches!(
        result,
        Err(RolapError::InvalidEdit(EditError::UnsupportedMeasure { .. }))
    ));
}

// ============================================================================
// PROPERTY TESTS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Setting a cell and reading it back under the same scenario returns the
    /// value set, whatever the policy; the base data never changes.
    #[test]
    fn prop_set_then_read_returns_new_value(
        policy in arb_policy(),
        new_value in 1.0f64..100_000.0,
        products in arb_drink_products(),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let (manager, _) = manager();
            let scenario = manager.create_scenario();
            manager.set_value(scenario, drink_target(), new_value, Some(policy)).unwrap();

            let drink = CellRequest::from(drink_cell());
            let edited = manager.resolve_in(&bound(scenario), &drink).await.unwrap().unwrap();
            prop_assert!((edited - new_value).abs() < 1e-6 * new_value.max(1.0));

            let subset = CellRequest::from(drink_cell()).any_of("product", products.clone());
            let base = manager.resolve(&subset).await.unwrap().unwrap();
            let expected: f64 = DRINK_PRODUCTS
                .iter()
                .filter(|(p, _, _)| products.contains(p))
                .map(|(_, _, v)| v)
                .sum();
            prop_assert!((base - expected).abs() < 1e-6);
            Ok(())
        })?;
    }

    /// Every generated Drink leaf ends up where its policy puts it, including
    /// leaves whose base value is zero.
    #[test]
    fn prop_allocation_over_generated_leaves(
        policy in arb_policy(),
        new_value in 1.0f64..100_000.0,
        leaves in arb_leaf_values(),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let products: Vec<String> =
                (0..leaves.len()).map(|i| format!("Generated {:02}", i)).collect();
            let rows = products.iter().zip(&leaves).map(|(product, units)| {
                FactRow::new()
                    .at("year", 1997)
                    .at("state", "CA")
                    .at("family", "Drink")
                    .at("product", product.as_str())
                    .measure(UNIT_SALES, *units)
            });
            let warehouse = InMemoryWarehouse::new().with_facts(SALES, rows);
            let (manager, _) = foodmart_manager(test_config(), warehouse);

            let scenario = manager.create_scenario();
            manager.set_value(scenario, drink_target(), new_value, Some(policy)).unwrap();

            let n = leaves.len() as f64;
            let total: f64 = leaves.iter().sum();
            let magnitude = new_value.max(total).max(1.0);
            for (product, base) in products.iter().zip(&leaves) {
                let expected = match policy {
                    AllocationPolicy::EqualIncrement => base + (new_value - total) / n,
                    AllocationPolicy::EqualAllocation if total == 0.0 => new_value / n,
                    AllocationPolicy::EqualAllocation => new_value * base / total,
                };
                let cell = CellRequest::from(product_cell(product));
                let actual = manager.resolve_in(&bound(scenario), &cell).await.unwrap();
                prop_assert!(actual.is_some());
                let actual = actual.unwrap_or_default();
                prop_assert!(
                    (actual - expected).abs() <= 1e-9 * magnitude,
                    "{}: {} != {}",
                    product,
                    actual,
                    expected
                );
            }
            Ok(())
        })?;
    }
}
