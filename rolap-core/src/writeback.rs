//! Writeback vocabulary shared by the scenario overlay and the cache.

use crate::EditError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Name of the dimension that carries scenario members.
pub const SCENARIO_DIMENSION: &str = "Scenario";

/// How a parent-cell edit is distributed over its descendant leaf cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AllocationPolicy {
    /// Each leaf gets the new value in proportion to its share of the old total.
    EqualAllocation,
    /// Each leaf moves by the same amount.
    EqualIncrement,
}

impl AllocationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationPolicy::EqualAllocation => "EQUAL_ALLOCATION",
            AllocationPolicy::EqualIncrement => "EQUAL_INCREMENT",
        }
    }
}

impl fmt::Display for AllocationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AllocationPolicy {
    type Err = EditError;

    /// Parse a policy name. The weighted variants are recognised but not
    /// supported.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "EQUAL_ALLOCATION" => Ok(AllocationPolicy::EqualAllocation),
            "EQUAL_INCREMENT" => Ok(AllocationPolicy::EqualIncrement),
            "" => Err(EditError::MissingPolicy),
            other => Err(EditError::UnsupportedPolicy {
                policy: other.to_string(),
            }),
        }
    }
}

/// A member in the context of an edited cell, as resolved by the evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberRef {
    pub dimension: String,
    pub unique_name: String,
    /// True if the member is derived from a formula rather than stored data.
    pub calculated: bool,
}

impl MemberRef {
    /// A stored member.
    pub fn stored(dimension: impl Into<String>, unique_name: impl Into<String>) -> Self {
        Self {
            dimension: dimension.into(),
            unique_name: unique_name.into(),
            calculated: false,
        }
    }

    /// A calculated member.
    pub fn calculated(dimension: impl Into<String>, unique_name: impl Into<String>) -> Self {
        Self {
            dimension: dimension.into(),
            unique_name: unique_name.into(),
            calculated: true,
        }
    }

    /// Returns true if this member is on the scenario dimension.
    pub fn is_scenario_member(&self) -> bool {
        self.dimension == SCENARIO_DIMENSION
    }

    /// Returns true if writing a cell with this member in context is refused.
    pub fn blocks_writeback(&self) -> bool {
        self.calculated && !self.is_scenario_member()
    }
}
