//! ROLAP Core - Segment Cache Data Types
//!
//! Pure data structures shared by the segment index, the load coordinator and
//! the scenario overlay. This crate performs no I/O and holds no locks.

pub mod aggregate;
pub mod cell;
pub mod config;
pub mod error;
pub mod header;
pub mod identity;
pub mod predicate;
pub mod segment;
pub mod value;
pub mod writeback;

pub use aggregate::{AggregationFunction, AggregationParseError};
pub use cell::{CellKey, CellRequest};
pub use config::CacheConfig;
pub use error::{CatalogError, ConfigError, EditError, RolapError, RolapResult, SegmentError};
pub use header::{SegmentHeader, SegmentHeaderBuilder, Specificity};
pub use identity::{HeaderId, MeasureId, ScenarioId, SchemaId, StarId, Timestamp};
pub use predicate::{ColumnPredicate, CompoundPredicate};
pub use segment::{AggregatedRow, Segment, SegmentBody, SegmentState};
pub use value::ColumnValue;
pub use writeback::{AllocationPolicy, MemberRef, SCENARIO_DIMENSION};
