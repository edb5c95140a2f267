//! Error types for segment cache and writeback operations

use crate::ScenarioId;
use thiserror::Error;

/// Segment loading and cache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SegmentError {
    #[error("Load failed for segment {segment}: {reason}")]
    LoadFailed { segment: String, reason: String },

    #[error("Resource exhausted: no {resource} available after {waited_ms}ms")]
    ResourceExhausted { resource: String, waited_ms: u64 },

    #[error("Segment {segment} flushed during load, gave up after {attempts} attempts")]
    StaleRead { segment: String, attempts: u32 },

    #[error("Query timed out after {waited_ms}ms waiting for segments")]
    QueryTimeout { waited_ms: u64 },

    #[error("Measure {measure} cannot be rolled up: {reason}")]
    NotRollable { measure: String, reason: String },

    #[error("Invalid segment header: {reason}")]
    InvalidHeader { reason: String },

    #[error("Cache lock poisoned")]
    LockPoisoned,
}

/// Writeback edit errors. An edit that fails validation leaves the scenario
/// unchanged.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EditError {
    #[error("Cannot write to a cell whose context contains calculated member {member}")]
    CalculatedMember { member: String },

    #[error("Allocation policy is required")]
    MissingPolicy,

    #[error("Unsupported allocation policy: {policy}")]
    UnsupportedPolicy { policy: String },

    #[error("Writeback value must be finite, got {value}")]
    NonFiniteValue { value: String },

    #[error("Scenario not found: {id}")]
    UnknownScenario { id: ScenarioId },

    #[error("Measure {measure} uses {aggregator}; writeback needs an additive measure")]
    UnsupportedMeasure { measure: String, aggregator: String },
}

/// Schema catalog errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Unknown star: {star}")]
    UnknownStar { star: String },

    #[error("Unknown measure {measure} in star {star}")]
    UnknownMeasure { star: String, measure: String },

    #[error("Column {column} is not a leaf column of star {star}")]
    UnknownColumn { star: String, column: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all ROLAP cache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RolapError {
    #[error("Segment error: {0}")]
    Segment(#[from] SegmentError),

    #[error("Invalid edit: {0}")]
    InvalidEdit(#[from] EditError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl RolapError {
    /// Returns true if a retry of the same resolution may succeed.
    pub fn is_stale(&self) -> bool {
        matches!(self, RolapError::Segment(SegmentError::StaleRead { .. }))
    }
}

/// Result type alias for ROLAP cache operations.
pub type RolapResult<T> = Result<T, RolapError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_error_display_load_failed() {
        let err = SegmentError::LoadFailed {
            segment: "3fa2c1d09e11".to_string(),
            reason: "relation \"sales_fact\" does not exist".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Load failed"));
        assert!(msg.contains("3fa2c1d09e11"));
        assert!(msg.contains("sales_fact"));
    }

    #[test]
    fn test_segment_error_display_resource_exhausted() {
        let err = SegmentError::ResourceExhausted {
            resource: "database connection".to_string(),
            waited_ms: 1500,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Resource exhausted"));
        assert!(msg.contains("1500"));
    }

    #[test]
    fn test_edit_error_display_calculated_member() {
        let err = EditError::CalculatedMember {
            member: "[Measures].[Profit]".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("calculated member"));
        assert!(msg.contains("[Measures].[Profit]"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "pool_capacity".to_string(),
            value: "0".to_string(),
            reason: "must be positive".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("pool_capacity"));
        assert!(msg.contains("must be positive"));
    }

    #[test]
    fn test_rolap_error_from_variants() {
        let segment = RolapError::from(SegmentError::LockPoisoned);
        assert!(matches!(segment, RolapError::Segment(_)));

        let edit = RolapError::from(EditError::MissingPolicy);
        assert!(matches!(edit, RolapError::InvalidEdit(_)));

        let catalog = RolapError::from(CatalogError::UnknownStar {
            star: "inventory".to_string(),
        });
        assert!(matches!(catalog, RolapError::Catalog(_)));

        let config = RolapError::from(ConfigError::InvalidValue {
            field: "f".to_string(),
            value: "v".to_string(),
            reason: "r".to_string(),
        });
        assert!(matches!(config, RolapError::Config(_)));
    }

    #[test]
    fn test_is_stale() {
        let stale = RolapError::from(SegmentError::StaleRead {
            segment: "abc".to_string(),
            attempts: 3,
        });
        assert!(stale.is_stale());
        assert!(!RolapError::from(SegmentError::LockPoisoned).is_stale());
    }
}
