//! Registry of live scenarios.

use crate::overlay::{replay, OverlayResolution};
use crate::scenario::{EditTarget, Scenario, WritebackEdit};
use dashmap::DashMap;
use rolap_core::{AllocationPolicy, CellKey, EditError, RolapResult, ScenarioId};
use std::sync::Arc;

/// Owns every scenario created on this server.
///
/// Scenarios are independent of one another; an edit in one is never visible
/// from another, nor from a query with no scenario bound.
#[derive(Debug, Default)]
pub struct ScenarioRegistry {
    scenarios: DashMap<ScenarioId, Arc<Scenario>>,
}

impl ScenarioRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new, empty scenario.
    pub fn create_scenario(&self) -> Arc<Scenario> {
        let scenario = Arc::new(Scenario::new(ScenarioId::new()));
        self.scenarios
            .insert(scenario.id(), Arc::clone(&scenario));
        tracing::info!(scenario = %scenario.id(), "Created scenario");
        scenario
    }

    pub fn get(&self, id: ScenarioId) -> Option<Arc<Scenario>> {
        self.scenarios.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    fn require(&self, id: ScenarioId) -> Result<Arc<Scenario>, EditError> {
        self.get(id).ok_or(EditError::UnknownScenario { id })
    }

    /// Drop a scenario and its edits. Returns false if it did not exist.
    pub fn remove(&self, id: ScenarioId) -> bool {
        let removed = self.scenarios.remove(&id).is_some();
        if removed {
            tracing::info!(scenario = %id, "Removed scenario");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }

    /// Record an edit setting `target` to `new_value` under `id`.
    ///
    /// The edit is validated before anything is recorded; a rejected edit
    /// leaves the scenario's log untouched.
    pub fn set_value(
        &self,
        id: ScenarioId,
        target: EditTarget,
        new_value: f64,
        policy: Option<AllocationPolicy>,
    ) -> RolapResult<Arc<WritebackEdit>> {
        let policy = policy.ok_or(EditError::MissingPolicy)?;
        if !new_value.is_finite() {
            return Err(EditError::NonFiniteValue {
                value: new_value.to_string(),
            }
            .into());
        }
        if let Some(member) = target.members.iter().find(|m| m.blocks_writeback()) {
            return Err(EditError::CalculatedMember {
                member: member.unique_name.clone(),
            }
            .into());
        }
        let scenario = self.require(id)?;

        let edit = scenario.append(target.cell, new_value, policy)?;
        tracing::info!(
            scenario = %id,
            sequence = edit.sequence,
            cell = %edit.target,
            value = new_value,
            policy = %policy,
            "Recorded writeback edit"
        );
        Ok(edit)
    }

    /// The scenario's edits in append order.
    pub fn history(&self, id: ScenarioId) -> RolapResult<Vec<Arc<WritebackEdit>>> {
        self.require(id)?.edits()
    }

    /// Edits of the scenario on the same star and measure as `cell`.
    pub fn edits_for(
        &self,
        id: ScenarioId,
        cell: &CellKey,
    ) -> RolapResult<Vec<Arc<WritebackEdit>>> {
        Ok(self
            .history(id)?
            .into_iter()
            .filter(|e| e.target.star == cell.star && e.target.measure == cell.measure)
            .collect())
    }

    /// Evaluate `cell` under scenario `id`, replaying `edits`.
    ///
    /// `edits` is a snapshot taken from [`ScenarioRegistry::edits_for`] once
    /// per read, so every cell of the read sees the same log. `leaves` are
    /// the base leaf values covering every edit target and the cell itself;
    /// `base_value` is the cell's value with no scenario.
    pub fn resolve(
        &self,
        id: ScenarioId,
        edits: &[Arc<WritebackEdit>],
        cell: &CellKey,
        base_value: Option<f64>,
        leaves: &[(CellKey, f64)],
    ) -> RolapResult<OverlayResolution> {
        self.require(id)?;
        let resolution = replay(edits, cell, base_value, leaves);
        tracing::debug!(
            scenario = %id,
            cell = %cell,
            edits = edits.len(),
            applied = resolution.applied_edits,
            "Resolved cell under scenario"
        );
        Ok(resolution)
    }
}
