//! Allocation of a parent-cell edit over its descendant leaf cells.

use rolap_core::AllocationPolicy;

/// Totals whose magnitude is below this are treated as zero when allocating
/// proportionally.
pub const ZERO_TOTAL_EPSILON: f64 = 1e-12;

/// Compute new leaf values so that their sum equals `new_value`.
///
/// `current` holds the leaves' values before the edit, in the caller's order;
/// the result has the same order and length.
///
/// - `EqualIncrement`: every leaf moves by `(new_value - sum) / n`.
/// - `EqualAllocation`: every leaf becomes `new_value * leaf / sum`; when the
///   sum is zero the new value is split equally.
///
/// An empty leaf set yields an empty result.
pub fn allocate(policy: AllocationPolicy, new_value: f64, current: &[f64]) -> Vec<f64> {
    if current.is_empty() {
        return Vec::new();
    }
    let n = current.len() as f64;
    let total: f64 = current.iter().sum();

    match policy {
        AllocationPolicy::EqualIncrement => {
            let delta = (new_value - total) / n;
            current.iter().map(|v| v + delta).collect()
        }
        AllocationPolicy::EqualAllocation => {
            if total.abs() < ZERO_TOTAL_EPSILON {
                let share = new_value / n;
                vec![share; current.len()]
            } else {
                current.iter().map(|v| new_value * (v / total)).collect()
            }
        }
    }
}
