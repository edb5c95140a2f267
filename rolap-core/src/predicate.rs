//! Column constraints of segment headers and cell requests.

use crate::{ColumnValue, SegmentError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Upper bound on the cartesian product checked when testing per-column sets
/// against a compound predicate.
const MAX_COMPOUND_EXPANSION: usize = 4096;

/// Constraint on a single dimension column.
///
/// Construct through [`ColumnPredicate::value`] or [`ColumnPredicate::any_of`]
/// so that a one-element set is always represented as `Value`; headers that
/// describe the same region must hash equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ColumnPredicate {
    /// Every value of the column, including null.
    Unconstrained,
    /// Exactly one value.
    Value(ColumnValue),
    /// An enumerated set of allowed values.
    Values(BTreeSet<ColumnValue>),
}

impl ColumnPredicate {
    /// Constrain to a single value.
    pub fn value(value: impl Into<ColumnValue>) -> Self {
        ColumnPredicate::Value(value.into())
    }

    /// Constrain to an enumerated set, normalised.
    pub fn any_of<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<ColumnValue>,
    {
        Self::from_set(values.into_iter().map(Into::into).collect())
    }

    /// Canonical form: a one-element set becomes `Value`.
    pub fn normalized(self) -> Self {
        match self {
            ColumnPredicate::Values(set) => Self::from_set(set),
            other => other,
        }
    }

    fn from_set(mut set: BTreeSet<ColumnValue>) -> Self {
        if set.len() == 1 {
            if let Some(only) = set.pop_first() {
                return ColumnPredicate::Value(only);
            }
        }
        ColumnPredicate::Values(set)
    }

    /// Returns true if the column is not constrained.
    pub fn is_unconstrained(&self) -> bool {
        matches!(self, ColumnPredicate::Unconstrained)
    }

    /// Returns true if `value` satisfies this predicate.
    pub fn accepts(&self, value: &ColumnValue) -> bool {
        match self {
            ColumnPredicate::Unconstrained => true,
            ColumnPredicate::Value(v) => v == value,
            ColumnPredicate::Values(set) => set.contains(value),
        }
    }

    /// Returns true if every value accepted by `other` is accepted by `self`.
    pub fn covers(&self, other: &ColumnPredicate) -> bool {
        match (self, other) {
            (ColumnPredicate::Unconstrained, _) => true,
            (_, ColumnPredicate::Unconstrained) => false,
            (_, ColumnPredicate::Value(v)) => self.accepts(v),
            (_, ColumnPredicate::Values(set)) => set.iter().all(|v| self.accepts(v)),
        }
    }

    /// Number of values accepted, or `None` when unconstrained.
    pub fn cardinality(&self) -> Option<usize> {
        match self {
            ColumnPredicate::Unconstrained => None,
            ColumnPredicate::Value(_) => Some(1),
            ColumnPredicate::Values(set) => Some(set.len()),
        }
    }

    /// Enumerated values in ascending order; empty when unconstrained.
    pub fn enumerated(&self) -> Vec<&ColumnValue> {
        match self {
            ColumnPredicate::Unconstrained => Vec::new(),
            ColumnPredicate::Value(v) => vec![v],
            ColumnPredicate::Values(set) => set.iter().collect(),
        }
    }

    /// The smallest predicate accepting everything either side accepts.
    pub fn union(&self, other: &ColumnPredicate) -> ColumnPredicate {
        if self.is_unconstrained() || other.is_unconstrained() {
            return ColumnPredicate::Unconstrained;
        }
        let set: BTreeSet<ColumnValue> = self
            .enumerated()
            .into_iter()
            .chain(other.enumerated())
            .cloned()
            .collect();
        Self::from_set(set)
    }
}

/// A constraint over several columns jointly, as a set of allowed tuples.
///
/// Used for join constraints such as `(year, quarter) in {(1997, Q1), (1998, Q4)}`
/// which cannot be written as independent per-column sets.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CompoundPredicate {
    columns: Vec<String>,
    tuples: BTreeSet<Vec<ColumnValue>>,
}

impl CompoundPredicate {
    /// Create a compound predicate. Every tuple must have one value per column.
    pub fn new(
        columns: Vec<String>,
        tuples: impl IntoIterator<Item = Vec<ColumnValue>>,
    ) -> Result<Self, SegmentError> {
        if columns.is_empty() {
            return Err(SegmentError::InvalidHeader {
                reason: "compound predicate needs at least one column".to_string(),
            });
        }
        let distinct: BTreeSet<&String> = columns.iter().collect();
        if distinct.len() != columns.len() {
            return Err(SegmentError::InvalidHeader {
                reason: format!("compound predicate repeats a column: {:?}", columns),
            });
        }
        let tuples: BTreeSet<Vec<ColumnValue>> = tuples.into_iter().collect();
        if let Some(bad) = tuples.iter().find(|t| t.len() != columns.len()) {
            return Err(SegmentError::InvalidHeader {
                reason: format!(
                    "tuple {:?} has {} values, expected {}",
                    bad,
                    bad.len(),
                    columns.len()
                ),
            });
        }
        Ok(Self { columns, tuples })
    }

    /// Columns constrained jointly.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Allowed tuples, in column order.
    pub fn tuples(&self) -> &BTreeSet<Vec<ColumnValue>> {
        &self.tuples
    }

    /// Returns true if the fixed coordinates form an allowed tuple.
    ///
    /// A column that is absent from `coordinates` is being rolled up, which
    /// this predicate cannot admit.
    pub fn accepts(&self, coordinates: &BTreeMap<String, ColumnValue>) -> bool {
        let mut tuple = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            match coordinates.get(column) {
                Some(value) => tuple.push(value.clone()),
                None => return false,
            }
        }
        self.tuples.contains(&tuple)
    }

    /// Returns true if every cell admitted by the request constraints is
    /// admitted by this predicate.
    pub fn covers(
        &self,
        columns: &BTreeMap<String, ColumnPredicate>,
        compound: &BTreeSet<CompoundPredicate>,
    ) -> bool {
        let same_shape = compound
            .iter()
            .any(|c| c.columns == self.columns && c.tuples.is_subset(&self.tuples));
        if same_shape {
            return true;
        }

        let mut axes = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            match columns.get(column) {
                Some(p) if !p.is_unconstrained() => axes.push(p.enumerated()),
                _ => return false,
            }
        }
        let product = axes
            .iter()
            .try_fold(1usize, |acc, axis| acc.checked_mul(axis.len()));
        match product {
            Some(n) if n <= MAX_COMPOUND_EXPANSION => {}
            _ => return false,
        }
        cartesian(&axes)
            .into_iter()
            .all(|tuple| self.tuples.contains(&tuple))
    }
}

/// Cartesian product of enumerated axes.
pub(crate) fn cartesian(axes: &[Vec<&ColumnValue>]) -> Vec<Vec<ColumnValue>> {
    let mut out: Vec<Vec<ColumnValue>> = vec![Vec::new()];
    for axis in axes {
        let mut next = Vec::with_capacity(out.len() * axis.len());
        for prefix in &out {
            for value in axis {
                let mut tuple = prefix.clone();
                tuple.push((*value).clone());
                next.push(tuple);
            }
        }
        out = next;
    }
    out
}
