//! Measure aggregation functions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a measure's fact values are aggregated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregationFunction {
    Sum,
    Count,
    Min,
    Max,
    DistinctCount,
}

impl AggregationFunction {
    /// The function used to combine already-aggregated values of this
    /// measure, or `None` if partial aggregates cannot be combined.
    pub fn rollup(&self) -> Option<AggregationFunction> {
        match self {
            AggregationFunction::Sum | AggregationFunction::Count => Some(AggregationFunction::Sum),
            AggregationFunction::Min => Some(AggregationFunction::Min),
            AggregationFunction::Max => Some(AggregationFunction::Max),
            AggregationFunction::DistinctCount => None,
        }
    }

    /// Returns true if partial aggregates of this measure can be combined.
    pub fn is_rollable(&self) -> bool {
        self.rollup().is_some()
    }

    /// Combine partial aggregates with this measure's rollup function.
    ///
    /// Returns `None` for an empty input (an empty cell) and for
    /// distinct-count measures with more than one partial.
    pub fn combine<I>(&self, values: I) -> Option<f64>
    where
        I: IntoIterator<Item = f64>,
    {
        let mut iter = values.into_iter();
        let first = iter.next()?;
        match self.rollup() {
            Some(AggregationFunction::Min) => Some(iter.fold(first, f64::min)),
            Some(AggregationFunction::Max) => Some(iter.fold(first, f64::max)),
            Some(_) => Some(iter.fold(first, |acc, v| acc + v)),
            None => match iter.next() {
                None => Some(first),
                Some(_) => None,
            },
        }
    }

    /// Name as used in schema definitions.
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationFunction::Sum => "sum",
            AggregationFunction::Count => "count",
            AggregationFunction::Min => "min",
            AggregationFunction::Max => "max",
            AggregationFunction::DistinctCount => "distinct-count",
        }
    }
}

impl fmt::Display for AggregationFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error when parsing an unknown aggregator name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationParseError(pub String);

impl fmt::Display for AggregationParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown aggregator: {}", self.0)
    }
}

impl std::error::Error for AggregationParseError {}

impl FromStr for AggregationFunction {
    type Err = AggregationParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sum" => Ok(AggregationFunction::Sum),
            "count" => Ok(AggregationFunction::Count),
            "min" => Ok(AggregationFunction::Min),
            "max" => Ok(AggregationFunction::Max),
            "distinct-count" | "distinct count" => Ok(AggregationFunction::DistinctCount),
            _ => Err(AggregationParseError(s.to_string())),
        }
    }
}
