//! Scenarios: append-only logs of writeback edits.

use chrono::Utc;
use rolap_core::{
    AllocationPolicy, CellKey, MemberRef, RolapResult, ScenarioId, SegmentError, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// The cell an edit writes to, with the members of its evaluation context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditTarget {
    pub cell: CellKey,
    /// Members the evaluator resolved for the cell, used to refuse writes
    /// through calculated members.
    pub members: Vec<MemberRef>,
}

impl EditTarget {
    pub fn new(cell: CellKey) -> Self {
        Self {
            cell,
            members: Vec::new(),
        }
    }

    pub fn with_member(mut self, member: MemberRef) -> Self {
        self.members.push(member);
        self
    }
}

/// One recorded writeback edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WritebackEdit {
    /// Position in the scenario's log, starting at 1.
    pub sequence: u64,
    pub target: CellKey,
    pub new_value: f64,
    pub policy: AllocationPolicy,
    pub recorded_at: Timestamp,
}

/// An isolated overlay of writeback edits.
///
/// The log only grows; readers take a snapshot of the `Arc`ed entries and
/// never observe an edit being modified.
#[derive(Debug)]
pub struct Scenario {
    id: ScenarioId,
    created_at: Timestamp,
    edits: RwLock<Vec<Arc<WritebackEdit>>>,
}

impl Scenario {
    pub(crate) fn new(id: ScenarioId) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            edits: RwLock::new(Vec::new()),
        }
    }

    pub fn id(&self) -> ScenarioId {
        self.id
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// Append an edit and return it with its assigned sequence number.
    pub(crate) fn append(
        &self,
        target: CellKey,
        new_value: f64,
        policy: AllocationPolicy,
    ) -> RolapResult<Arc<WritebackEdit>> {
        let mut edits = self.edits.write().map_err(|_| SegmentError::LockPoisoned)?;
        let edit = Arc::new(WritebackEdit {
            sequence: edits.len() as u64 + 1,
            target,
            new_value,
            policy,
            recorded_at: Utc::now(),
        });
        edits.push(Arc::clone(&edit));
        Ok(edit)
    }

    /// Snapshot of the log in append order.
    pub fn edits(&self) -> RolapResult<Vec<Arc<WritebackEdit>>> {
        let edits = self.edits.read().map_err(|_| SegmentError::LockPoisoned)?;
        Ok(edits.clone())
    }

    /// Number of edits recorded.
    pub fn len(&self) -> RolapResult<usize> {
        let edits = self.edits.read().map_err(|_| SegmentError::LockPoisoned)?;
        Ok(edits.len())
    }

    pub fn is_empty(&self) -> RolapResult<bool> {
        Ok(self.len()? == 0)
    }
}
