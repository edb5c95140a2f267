//! Segments: loaded, immutable slices of aggregated fact data.

use crate::{AggregationFunction, CellKey, ColumnValue, SegmentError, SegmentHeader, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Lifecycle state of a segment in the index.
///
/// ```text
/// (absent) ── register ──→ Pending ── install ──→ Ready
///                             │                     │
///                           fail                  flush
///                             ↓                     ↓
///                          Failed                 Stale
/// ```
///
/// A flush also moves a Pending segment straight to Stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SegmentState {
    /// Registered, load in flight.
    Pending,
    /// Loaded, immutable, servable.
    Ready,
    /// Load failed; evicted from the index.
    Failed,
    /// Invalidated by a flush; no longer servable.
    Stale,
}

impl SegmentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentState::Pending => "pending",
            SegmentState::Ready => "ready",
            SegmentState::Failed => "failed",
            SegmentState::Stale => "stale",
        }
    }

    /// Returns true for states that occupy the header's slot in the index.
    pub fn is_live(&self) -> bool {
        matches!(self, SegmentState::Pending | SegmentState::Ready)
    }
}

impl fmt::Display for SegmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row returned by the aggregation query: the group-by key in header
/// column order, and the aggregated measure value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedRow {
    pub key: Vec<ColumnValue>,
    pub value: f64,
}

impl AggregatedRow {
    pub fn new(key: Vec<ColumnValue>, value: f64) -> Self {
        Self { key, value }
    }
}

/// The value store of a loaded segment.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SegmentBody {
    columns: Vec<String>,
    cells: HashMap<Vec<ColumnValue>, f64>,
}

impl SegmentBody {
    /// Build a body from query rows.
    ///
    /// Rows with the wrong arity are rejected. Duplicate keys are combined
    /// with the measure's rollup function.
    pub fn from_rows(
        columns: Vec<String>,
        rows: Vec<AggregatedRow>,
        aggregator: AggregationFunction,
    ) -> Result<Self, SegmentError> {
        let mut cells: HashMap<Vec<ColumnValue>, f64> = HashMap::with_capacity(rows.len());
        for row in rows {
            if row.key.len() != columns.len() {
                return Err(SegmentError::InvalidHeader {
                    reason: format!(
                        "row key has {} values, segment has {} columns",
                        row.key.len(),
                        columns.len()
                    ),
                });
            }
            match cells.get_mut(&row.key) {
                Some(existing) => {
                    *existing = aggregator
                        .combine([*existing, row.value])
                        .ok_or_else(|| SegmentError::NotRollable {
                            measure: aggregator.to_string(),
                            reason: "duplicate group-by key in load result".to_string(),
                        })?;
                }
                None => {
                    cells.insert(row.key, row.value);
                }
            }
        }
        Ok(Self { columns, cells })
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// A loaded segment. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct Segment {
    header: Arc<SegmentHeader>,
    body: SegmentBody,
    loaded_at: Timestamp,
}

impl Segment {
    /// Compile query rows into a segment for `header`.
    pub fn from_rows(
        header: Arc<SegmentHeader>,
        rows: Vec<AggregatedRow>,
        aggregator: AggregationFunction,
    ) -> Result<Self, SegmentError> {
        let body = SegmentBody::from_rows(header.column_names(), rows, aggregator)?;
        Ok(Self {
            header,
            body,
            loaded_at: Utc::now(),
        })
    }

    pub fn header(&self) -> &Arc<SegmentHeader> {
        &self.header
    }

    pub fn loaded_at(&self) -> Timestamp {
        self.loaded_at
    }

    /// Number of non-empty cells.
    pub fn row_count(&self) -> usize {
        self.body.len()
    }

    /// Value of `cell`, rolling up header columns the cell does not fix.
    ///
    /// Returns `None` for an empty cell. The caller must have checked that the
    /// header covers the cell.
    pub fn value_at(&self, cell: &CellKey, aggregator: AggregationFunction) -> Option<f64> {
        if cell.coordinates.len() == self.body.columns.len() {
            let key: Option<Vec<ColumnValue>> = self
                .body
                .columns
                .iter()
                .map(|c| cell.coordinates.get(c).cloned())
                .collect();
            return key.and_then(|k| self.body.cells.get(&k).copied());
        }

        let fixed: Vec<(usize, &ColumnValue)> = self
            .body
            .columns
            .iter()
            .enumerate()
            .filter_map(|(i, c)| cell.coordinates.get(c).map(|v| (i, v)))
            .collect();
        aggregator.combine(
            self.body
                .cells
                .iter()
                .filter(|(key, _)| fixed.iter().all(|(i, v)| &key[*i] == *v))
                .map(|(_, value)| *value),
        )
    }

    /// All non-empty cells as (coordinates, value), ordered by coordinates.
    pub fn cells(&self) -> Vec<(BTreeMap<String, ColumnValue>, f64)> {
        let mut out: Vec<(BTreeMap<String, ColumnValue>, f64)> = self
            .body
            .cells
            .iter()
            .map(|(key, value)| {
                (
                    self.body.columns.iter().cloned().zip(key.iter().cloned()).collect(),
                    *value,
                )
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}
