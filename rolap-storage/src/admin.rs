//! Administrative surface: invalidation and monitoring.

use crate::index::{IndexCounts, SegmentInfo};
use crate::manager::CacheManager;
use crate::pool::{HoldState, LoadId, PoolStats};
use crate::stats::CacheStatsSnapshot;
use chrono::Utc;
use rolap_core::{RolapResult, SchemaId, Timestamp};
use serde::Serialize;

/// Borrowed view of a [`CacheManager`] for operators.
#[derive(Debug, Clone, Copy)]
pub struct AdminSurface<'a> {
    manager: &'a CacheManager,
}

/// Everything an operator sees at once.
#[derive(Debug, Clone, Serialize)]
pub struct CacheSnapshot {
    pub taken_at: Timestamp,
    pub stats: CacheStatsSnapshot,
    pub hit_rate: f64,
    pub segments: IndexCounts,
    pub pool: PoolStats,
    pub scenarios: usize,
    pub cached_cardinalities: usize,
}

impl<'a> AdminSurface<'a> {
    pub(crate) fn new(manager: &'a CacheManager) -> Self {
        Self { manager }
    }

    /// Invalidate every cached segment.
    pub fn flush_all(&self) -> RolapResult<usize> {
        self.manager.flush_all()
    }

    /// Invalidate every cached segment of one schema.
    pub fn flush_schema(&self, schema: impl Into<SchemaId>) -> RolapResult<usize> {
        self.manager.flush_schema(&schema.into())
    }

    /// Live segments, oldest registration first.
    pub fn segments(&self) -> RolapResult<Vec<SegmentInfo>> {
        self.manager.index().segments()
    }

    /// Connection holdings of loads in flight.
    pub fn load_holds(&self) -> Vec<(LoadId, HoldState)> {
        self.manager.coordinator().pool().holds()
    }

    pub fn snapshot(&self) -> RolapResult<CacheSnapshot> {
        let stats = self.manager.stats();
        Ok(CacheSnapshot {
            taken_at: Utc::now(),
            stats,
            hit_rate: stats.hit_rate(),
            segments: self.manager.index().counts()?,
            pool: self.manager.coordinator().pool().stats(),
            scenarios: self.manager.scenarios().len(),
            cached_cardinalities: self.manager.coordinator().cached_cardinalities(),
        })
    }
}
