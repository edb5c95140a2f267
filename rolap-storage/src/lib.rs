//! ROLAP Storage - Segment Cache and Load Coordination
//!
//! Caches aggregated segments of a relational star schema, deduplicates
//! concurrent loads, and bounds warehouse connections without deadlocking
//! on nested cardinality queries. The SQL layer and the schema model are
//! supplied by the caller through [`SqlExecutor`] and [`SchemaCatalog`].

pub mod admin;
pub mod catalog;
pub mod coordinator;
pub mod executor;
pub mod index;
pub mod manager;
pub mod pool;
pub mod stats;

#[cfg(test)]
mod testing;

pub use admin::{AdminSurface, CacheSnapshot};
pub use catalog::{InMemoryCatalog, SchemaCatalog, StarDefinition};
pub use coordinator::{LoadCoordinator, LoadItem, LoadRequest};
pub use executor::{AggregationStatement, SqlExecutor};
pub use index::{
    Coverage, IndexCounts, InstallOutcome, MatchResult, PendingMatch, Registration, SegmentHandle,
    SegmentIndex, SegmentInfo, SegmentWaiter, SlotState,
};
pub use manager::CacheManager;
pub use pool::{ConnectionClass, ConnectionLease, ConnectionPool, HoldState, LoadId, PoolStats};
pub use stats::{CacheStats, CacheStatsSnapshot};
