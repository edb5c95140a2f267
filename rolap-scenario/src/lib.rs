//! ROLAP Scenario - Writeback Overlay
//!
//! A scenario is an isolated, append-only log of edits. Reading a cell under
//! a scenario replays the log over the base leaf values supplied by the
//! segment cache; the cache itself is never modified.

pub mod allocation;
pub mod binding;
pub mod overlay;
pub mod registry;
pub mod scenario;

pub use allocation::{allocate, ZERO_TOTAL_EPSILON};
pub use binding::ScenarioContext;
pub use overlay::{replay, OverlayResolution};
pub use registry::ScenarioRegistry;
pub use scenario::{EditTarget, Scenario, WritebackEdit};
