//! Segment headers: the immutable description of a cacheable region.

use crate::{
    CellKey, ColumnPredicate, CompoundPredicate, HeaderId, MeasureId, SchemaId, StarId,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

/// Identifies a cacheable region of one measure.
///
/// The header's columns are the segment's dimensionality: a loaded segment
/// holds one value per distinct tuple of these columns. Two structurally equal
/// headers denote interchangeable cache entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentHeader {
    schema: SchemaId,
    star: StarId,
    measure: MeasureId,
    columns: BTreeMap<String, ColumnPredicate>,
    compound: BTreeSet<CompoundPredicate>,
}

/// Ordering key for "most specific first".
///
/// Compared lexicographically: fewer unconstrained columns, then fewer
/// enumerated value combinations, then fewer columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Specificity {
    pub unconstrained_columns: usize,
    pub enumerated_volume: u128,
    pub column_count: usize,
}

impl SegmentHeader {
    /// Start building a header.
    pub fn builder(
        schema: impl Into<SchemaId>,
        star: impl Into<StarId>,
        measure: impl Into<MeasureId>,
    ) -> SegmentHeaderBuilder {
        SegmentHeaderBuilder {
            header: SegmentHeader {
                schema: schema.into(),
                star: star.into(),
                measure: measure.into(),
                columns: BTreeMap::new(),
                compound: BTreeSet::new(),
            },
        }
    }

    pub fn schema(&self) -> &SchemaId {
        &self.schema
    }

    pub fn star(&self) -> &StarId {
        &self.star
    }

    pub fn measure(&self) -> &MeasureId {
        &self.measure
    }

    /// Per-column constraints, ordered by column name.
    pub fn columns(&self) -> &BTreeMap<String, ColumnPredicate> {
        &self.columns
    }

    /// Column names in key order. Segment data keys follow this order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.keys().cloned().collect()
    }

    /// Multi-column constraints.
    pub fn compound(&self) -> &BTreeSet<CompoundPredicate> {
        &self.compound
    }

    /// Stable digest of the header's content.
    pub fn unique_id(&self) -> HeaderId {
        let mut canonical = String::new();
        let _ = write!(
            canonical,
            "{}|{}|{}",
            self.schema, self.star, self.measure
        );
        for (column, predicate) in &self.columns {
            let _ = write!(canonical, "|{}:{:?}", column, predicate);
        }
        for predicate in &self.compound {
            let _ = write!(canonical, "|compound:{:?}", predicate);
        }
        HeaderId::digest(canonical.as_bytes())
    }

    /// Ordering key for "most specific first" lookups.
    pub fn specificity(&self) -> Specificity {
        let mut unconstrained_columns = 0;
        let mut enumerated_volume: u128 = 1;
        for predicate in self.columns.values() {
            match predicate.cardinality() {
                None => unconstrained_columns += 1,
                Some(n) => enumerated_volume = enumerated_volume.saturating_mul(n as u128),
            }
        }
        for predicate in &self.compound {
            enumerated_volume = enumerated_volume.min(predicate.tuples().len() as u128);
        }
        Specificity {
            unconstrained_columns,
            enumerated_volume,
            column_count: self.columns.len(),
        }
    }

    /// Returns true if a segment with this header can serve `cell`.
    ///
    /// Every fixed coordinate must be a column of the header accepted by its
    /// predicate. Header columns the cell does not fix are rolled up, which
    /// requires them to be unconstrained and the measure to be rollable.
    pub fn covers_cell(&self, cell: &CellKey, rollable: bool) -> bool {
        if cell.star != self.star || cell.measure != self.measure {
            return false;
        }
        for (column, value) in &cell.coordinates {
            match self.columns.get(column) {
                Some(predicate) if predicate.accepts(value) => {}
                _ => return false,
            }
        }
        for (column, predicate) in &self.columns {
            let fixed = cell.coordinates.contains_key(column);
            if !fixed && (!rollable || !predicate.is_unconstrained()) {
                return false;
            }
        }
        self.compound.iter().all(|c| c.accepts(&cell.coordinates))
    }

    /// Returns true if every cell of `other`'s region can be served by a
    /// segment with this header.
    pub fn covers_header(&self, other: &SegmentHeader, rollable: bool) -> bool {
        if self.star != other.star || self.measure != other.measure {
            return false;
        }
        for (column, wanted) in &other.columns {
            match self.columns.get(column) {
                Some(have) if have.covers(wanted) => {}
                _ => return false,
            }
        }
        for (column, predicate) in &self.columns {
            if !other.columns.contains_key(column) && (!rollable || !predicate.is_unconstrained()) {
                return false;
            }
        }
        self.compound
            .iter()
            .all(|c| c.covers(&other.columns, &other.compound))
    }

    /// Returns a copy with one column's predicate replaced.
    pub fn with_column(&self, column: impl Into<String>, predicate: ColumnPredicate) -> Self {
        let mut header = self.clone();
        header.columns.insert(column.into(), predicate.normalized());
        header
    }
}

/// Builder for [`SegmentHeader`].
#[derive(Debug, Clone)]
pub struct SegmentHeaderBuilder {
    header: SegmentHeader,
}

impl SegmentHeaderBuilder {
    /// Add a column with its constraint, normalised.
    pub fn column(mut self, column: impl Into<String>, predicate: ColumnPredicate) -> Self {
        self.header
            .columns
            .insert(column.into(), predicate.normalized());
        self
    }

    /// Add an unconstrained column.
    pub fn unconstrained(self, column: impl Into<String>) -> Self {
        self.column(column, ColumnPredicate::Unconstrained)
    }

    /// Add a multi-column constraint.
    pub fn compound(mut self, predicate: CompoundPredicate) -> Self {
        self.header.compound.insert(predicate);
        self
    }

    pub fn build(self) -> SegmentHeader {
        self.header
    }
}
