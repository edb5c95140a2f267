//! Cell coordinates as seen by the cache.
//!
//! The evaluator resolves MDX members down to dimension-column values before it
//! asks the cache for a cell. A column that is not mentioned is rolled up.

use crate::predicate::cartesian;
use crate::{ColumnPredicate, ColumnValue, MeasureId, StarId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// An atomic cell: one value per constrained column.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellKey {
    pub star: StarId,
    pub measure: MeasureId,
    pub coordinates: BTreeMap<String, ColumnValue>,
}

impl CellKey {
    /// Create a cell with no fixed coordinates (the grand total).
    pub fn new(star: impl Into<StarId>, measure: impl Into<MeasureId>) -> Self {
        Self {
            star: star.into(),
            measure: measure.into(),
            coordinates: BTreeMap::new(),
        }
    }

    /// Fix a column to a value.
    pub fn at(mut self, column: impl Into<String>, value: impl Into<ColumnValue>) -> Self {
        self.coordinates.insert(column.into(), value.into());
        self
    }

    /// Returns true if `self` lies under `ancestor`: same star and measure,
    /// and every coordinate of the ancestor is fixed to the same value here.
    ///
    /// A cell is a descendant of itself.
    pub fn is_descendant_of(&self, ancestor: &CellKey) -> bool {
        self.star == ancestor.star
            && self.measure == ancestor.measure
            && ancestor
                .coordinates
                .iter()
                .all(|(column, value)| self.coordinates.get(column) == Some(value))
    }

    /// Returns true if the two cells share at least one descendant.
    pub fn overlaps(&self, other: &CellKey) -> bool {
        self.star == other.star
            && self.measure == other.measure
            && self
                .coordinates
                .iter()
                .all(|(column, value)| other.coordinates.get(column).map_or(true, |v| v == value))
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}(", self.star, self.measure)?;
        for (i, (column, value)) in self.coordinates.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", column, value)?;
        }
        f.write_str(")")
    }
}

/// A cell request whose coordinates may be value sets.
///
/// A set coordinate denotes the aggregate over its members (for example a
/// slicer naming two stores). It is expanded into atomic cells which are
/// resolved independently and combined with the measure's aggregator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellRequest {
    pub star: StarId,
    pub measure: MeasureId,
    pub coordinates: BTreeMap<String, ColumnPredicate>,
}

impl CellRequest {
    /// Create a request with no fixed coordinates.
    pub fn new(star: impl Into<StarId>, measure: impl Into<MeasureId>) -> Self {
        Self {
            star: star.into(),
            measure: measure.into(),
            coordinates: BTreeMap::new(),
        }
    }

    /// Fix a column to a single value.
    pub fn at(mut self, column: impl Into<String>, value: impl Into<ColumnValue>) -> Self {
        self.coordinates
            .insert(column.into(), ColumnPredicate::value(value));
        self
    }

    /// Constrain a column to a set of values to be aggregated together.
    pub fn any_of<I, V>(mut self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<ColumnValue>,
    {
        self.coordinates
            .insert(column.into(), ColumnPredicate::any_of(values));
        self
    }

    /// Returns true if every coordinate is a single value.
    pub fn is_atomic(&self) -> bool {
        self.coordinates
            .values()
            .all(|p| matches!(p, ColumnPredicate::Value(_)))
    }

    /// Expand set coordinates into atomic cells.
    ///
    /// An unconstrained coordinate is treated as absent (rolled up). An empty
    /// value set yields no cells.
    pub fn expand(&self) -> Vec<CellKey> {
        let constrained: Vec<(&String, Vec<&ColumnValue>)> = self
            .coordinates
            .iter()
            .filter(|(_, p)| !p.is_unconstrained())
            .map(|(c, p)| (c, p.enumerated()))
            .collect();
        let axes: Vec<Vec<&ColumnValue>> = constrained.iter().map(|(_, a)| a.clone()).collect();
        cartesian(&axes)
            .into_iter()
            .map(|tuple| CellKey {
                star: self.star.clone(),
                measure: self.measure.clone(),
                coordinates: constrained
                    .iter()
                    .map(|(c, _)| (*c).clone())
                    .zip(tuple)
                    .collect(),
            })
            .collect()
    }
}

impl From<CellKey> for CellRequest {
    fn from(cell: CellKey) -> Self {
        Self {
            star: cell.star,
            measure: cell.measure,
            coordinates: cell
                .coordinates
                .into_iter()
                .map(|(c, v)| (c, ColumnPredicate::Value(v)))
                .collect(),
        }
    }
}
