//! Replaying a scenario's edits over base leaf values.

use crate::allocation::allocate;
use crate::scenario::WritebackEdit;
use rolap_core::CellKey;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Result of resolving a cell under a scenario.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayResolution {
    /// The cell's value after the overlay; `None` for an empty cell.
    pub value: Option<f64>,
    /// The leaves under the cell with their overlaid values, ordered by key.
    pub leaves: Vec<(CellKey, f64)>,
    /// Number of edits that changed at least one leaf under the cell.
    pub applied_edits: usize,
}

/// Apply `edits` in order to the leaf universe `leaves` and evaluate `cell`.
///
/// `leaves` must contain every base leaf under each edit's target; an edit
/// allocates over the leaves it can see. Each edit sees the values left by
/// the edits before it. An edit whose target has no leaves materialises the
/// target itself as a leaf holding the new value.
///
/// If no edit overlaps `cell`, `base_value` is returned unchanged.
pub fn replay(
    edits: &[Arc<WritebackEdit>],
    cell: &CellKey,
    base_value: Option<f64>,
    leaves: &[(CellKey, f64)],
) -> OverlayResolution {
    let relevant: Vec<&Arc<WritebackEdit>> = edits
        .iter()
        .filter(|e| e.target.star == cell.star && e.target.measure == cell.measure)
        .collect();

    let mut current: BTreeMap<CellKey, f64> = leaves.iter().cloned().collect();

    if !relevant.iter().any(|e| e.target.overlaps(cell)) {
        return OverlayResolution {
            value: base_value,
            leaves: under(&current, cell),
            applied_edits: 0,
        };
    }

    let mut applied_edits = 0;
    for edit in relevant {
        let keys: Vec<CellKey> = current
            .keys()
            .filter(|k| k.is_descendant_of(&edit.target))
            .cloned()
            .collect();

        let touches_cell = if keys.is_empty() {
            edit.target.is_descendant_of(cell)
        } else {
            keys.iter().any(|k| k.is_descendant_of(cell))
        };
        if touches_cell {
            applied_edits += 1;
        }

        if keys.is_empty() {
            current.insert(edit.target.clone(), edit.new_value);
            continue;
        }
        let before: Vec<f64> = keys.iter().map(|k| current[k]).collect();
        let after = allocate(edit.policy, edit.new_value, &before);
        for (key, value) in keys.into_iter().zip(after) {
            current.insert(key, value);
        }
    }

    let leaves = under(&current, cell);
    let value = if leaves.is_empty() {
        None
    } else {
        Some(leaves.iter().map(|(_, v)| v).sum())
    };
    OverlayResolution {
        value,
        leaves,
        applied_edits,
    }
}

fn under(current: &BTreeMap<CellKey, f64>, cell: &CellKey) -> Vec<(CellKey, f64)> {
    current
        .iter()
        .filter(|(k, _)| k.is_descendant_of(cell))
        .map(|(k, v)| (k.clone(), *v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rolap_core::AllocationPolicy;

    fn edit(seq: u64, target: CellKey, value: f64, policy: AllocationPolicy) -> Arc<WritebackEdit> {
        Arc::new(WritebackEdit {
            sequence: seq,
            target,
            new_value: value,
            policy,
            recorded_at: Utc::now(),
        })
    }

    fn family(name: &str) -> CellKey {
        CellKey::new("sales", "unit_sales").at("family", name)
    }

    fn leaf(family_name: &str, product: &str) -> CellKey {
        family(family_name).at("product", product)
    }

    fn drink_leaves() -> Vec<(CellKey, f64)> {
        vec![
            (leaf("Drink", "Beer"), 10.0),
            (leaf("Drink", "Juice"), 30.0),
            (leaf("Food", "Bread"), 50.0),
        ]
    }

    #[test]
    fn test_no_edits_returns_base() {
        let out = replay(&[], &family("Drink"), Some(40.0), &drink_leaves());
        assert_eq!(out.value, Some(40.0));
        assert_eq!(out.applied_edits, 0);
        assert_eq!(out.leaves.len(), 2);
    }

    #[test]
    fn test_unrelated_edit_returns_base() {
        let edits = vec![edit(1, family("Food"), 100.0, AllocationPolicy::EqualIncrement)];
        let out = replay(&edits, &family("Drink"), Some(40.0), &drink_leaves());
        assert_eq!(out.value, Some(40.0));
        assert_eq!(out.applied_edits, 0);
    }

    #[test]
    fn test_parent_edit_reads_back() {
        let edits = vec![edit(1, family("Drink"), 60.0, AllocationPolicy::EqualAllocation)];
        let out = replay(&edits, &family("Drink"), Some(40.0), &drink_leaves());
        assert_eq!(out.value, Some(60.0));
        assert_eq!(out.leaves[0], (leaf("Drink", "Beer"), 15.0));
        assert_eq!(out.leaves[1], (leaf("Drink", "Juice"), 45.0));
    }

    #[test]
    fn test_leaf_sees_ancestor_edit() {
        let edits = vec![edit(1, family("Drink"), 60.0, AllocationPolicy::EqualIncrement)];
        let out = replay(&edits, &leaf("Drink", "Beer"), Some(10.0), &drink_leaves());
        assert_eq!(out.value, Some(20.0));
        assert_eq!(out.applied_edits, 1);
    }

    #[test]
    fn test_edits_compose_in_order() {
        // Beer 10 -> 20, then Drink (20 + 30) -> 100 proportionally.
        let edits = vec![
            edit(1, leaf("Drink", "Beer"), 20.0, AllocationPolicy::EqualIncrement),
            edit(2, family("Drink"), 100.0, AllocationPolicy::EqualAllocation),
        ];
        let out = replay(&edits, &family("Drink"), Some(40.0), &drink_leaves());
        assert_eq!(out.value, Some(100.0));
        assert_eq!(out.leaves[0].1, 40.0);
        assert_eq!(out.leaves[1].1, 60.0);
    }

    #[test]
    fn test_edit_without_leaves_materialises_target() {
        let edits = vec![edit(1, family("Snacks"), 12.0, AllocationPolicy::EqualIncrement)];
        let out = replay(&edits, &family("Snacks"), None, &drink_leaves());
        assert_eq!(out.value, Some(12.0));
        assert_eq!(out.applied_edits, 1);

        let total = CellKey::new("sales", "unit_sales");
        let out = replay(&edits, &total, Some(90.0), &drink_leaves());
        assert_eq!(out.value, Some(102.0));
    }
}
