//! Which scenario, if any, a query evaluates under.

use rolap_core::ScenarioId;
use serde::{Deserialize, Serialize};

/// Scenario sources visible to one query.
///
/// A scenario named explicitly in the query's slicer wins over the one made
/// active on the connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioContext {
    pub slicer: Option<ScenarioId>,
    pub connection: Option<ScenarioId>,
}

impl ScenarioContext {
    /// No scenario bound.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_slicer(mut self, id: ScenarioId) -> Self {
        self.slicer = Some(id);
        self
    }

    pub fn with_connection(mut self, id: ScenarioId) -> Self {
        self.connection = Some(id);
        self
    }

    /// The scenario the query is bound to.
    pub fn effective(&self) -> Option<ScenarioId> {
        self.slicer.or(self.connection)
    }
}
