//! Step list container
//!
//! Owns the ordered raw field sets of every step, assigns each step a stable
//! id, and publishes structural and field events as they change.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::branch;
use crate::error::{BranchError, EditorError};
use crate::events::{EditorEvents, StructureChange};
use crate::extract::extract;
use crate::fields::{canonical_name, FieldSet, FieldValue};
use crate::preview::StepSource;
use crate::types::{BranchCandidate, StepRecord, StepType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepId(Uuid);

impl StepId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for StepId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepEntry {
    pub id: StepId,
    pub step_type: StepType,
    pub fields: FieldSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Transition {
    pub from: StepId,
    pub to: StepId,
}

pub struct StepList {
    steps: Vec<StepEntry>,
    transitions: IndexSet<Transition>,
    events: EditorEvents,
}

impl StepList {
    pub fn new(events: EditorEvents) -> Self {
        Self {
            steps: Vec::new(),
            transitions: IndexSet::new(),
            events,
        }
    }

    pub fn events(&self) -> &EditorEvents {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&StepEntry> {
        self.steps.get(index)
    }

    pub fn index_of(&self, id: StepId) -> Option<usize> {
        self.steps.iter().position(|s| s.id == id)
    }

    fn require(&self, id: StepId) -> Result<usize, EditorError> {
        self.index_of(id)
            .ok_or_else(|| EditorError::UnknownStep(id.as_uuid()))
    }

    pub fn add_step(&mut self, step_type: StepType, fields: FieldSet) -> StepId {
        let id = StepId::new();
        self.steps.push(StepEntry {
            id,
            step_type,
            fields,
        });
        let index = self.steps.len() - 1;
        debug!(%id, index, %step_type, "step added");
        self.events
            .publish_structure(StructureChange::StepAdded { index });
        id
    }

    pub fn insert_step(
        &mut self,
        index: usize,
        step_type: StepType,
        fields: FieldSet,
    ) -> Result<StepId, EditorError> {
        if index > self.steps.len() {
            return Err(EditorError::IndexOutOfRange {
                index,
                len: self.steps.len(),
            });
        }
        let id = StepId::new();
        self.steps.insert(
            index,
            StepEntry {
                id,
                step_type,
                fields,
            },
        );
        self.events
            .publish_structure(StructureChange::StepAdded { index });
        Ok(id)
    }

    /// Remove a step together with every transition touching it.
    pub fn remove_step(&mut self, id: StepId) -> Result<StepEntry, EditorError> {
        let index = self.require(id).inspect_err(|e| warn!(error = %e, "remove_step"))?;
        let entry = self.steps.remove(index);
        self.transitions.retain(|t| t.from != id && t.to != id);
        self.events
            .publish_structure(StructureChange::StepRemoved { index });
        Ok(entry)
    }

    pub fn move_step(&mut self, from: usize, to: usize) -> Result<(), EditorError> {
        let len = self.steps.len();
        for index in [from, to] {
            if index >= len {
                return Err(EditorError::IndexOutOfRange { index, len });
            }
        }
        if from == to {
            return Ok(());
        }
        let entry = self.steps.remove(from);
        self.steps.insert(to, entry);
        self.events
            .publish_structure(StructureChange::StepMoved { from, to });
        Ok(())
    }

    /// Write one raw field and publish a field event under its canonical name.
    pub fn set_field(
        &mut self,
        index: usize,
        name: &str,
        value: impl Into<FieldValue>,
    ) -> Result<(), EditorError> {
        let len = self.steps.len();
        let entry = self
            .steps
            .get_mut(index)
            .ok_or(EditorError::IndexOutOfRange { index, len })?;
        entry.fields.insert(name, value);
        self.events.publish_field(index, canonical_name(name));
        Ok(())
    }

    pub fn fields(&self, index: usize) -> Option<&FieldSet> {
        self.steps.get(index).map(|s| &s.fields)
    }

    pub fn record(&self, index: usize) -> Option<StepRecord> {
        self.steps
            .get(index)
            .map(|s| extract(&s.fields, s.step_type, index))
    }

    pub fn records(&self) -> Vec<StepRecord> {
        self.steps
            .iter()
            .enumerate()
            .map(|(index, s)| extract(&s.fields, s.step_type, index))
            .collect()
    }

    /// Overwrite the branches of a decision step with a candidate.
    pub fn apply_candidate(
        &mut self,
        decision: StepId,
        candidate: &BranchCandidate,
    ) -> Result<usize, EditorError> {
        let index = self.require(decision)?;
        let entry = &mut self.steps[index];
        if entry.step_type != StepType::Decision {
            return Err(BranchError::NotADecision(index).into());
        }
        branch::apply(candidate, &mut entry.fields);
        self.events.publish_field(index, "branches");
        Ok(index)
    }

    pub fn connect(&mut self, from: StepId, to: StepId) -> Result<(), EditorError> {
        self.require(from)?;
        self.require(to)?;
        self.transitions.insert(Transition { from, to });
        Ok(())
    }

    pub fn disconnect(&mut self, from: StepId, to: StepId) -> Result<(), EditorError> {
        self.require(from)?;
        self.require(to)?;
        if !self.transitions.shift_remove(&Transition { from, to }) {
            return Err(EditorError::UnknownTransition {
                from: from.as_uuid(),
                to: to.as_uuid(),
            });
        }
        Ok(())
    }

    pub fn transitions(&self) -> impl Iterator<Item = &Transition> {
        self.transitions.iter()
    }

    pub fn transitions_from(&self, id: StepId) -> Vec<StepId> {
        self.transitions
            .iter()
            .filter(|t| t.from == id)
            .map(|t| t.to)
            .collect()
    }
}

/// Step list shared between the session and its background listeners
#[derive(Clone)]
pub struct SharedSteps(Arc<RwLock<StepList>>);

impl SharedSteps {
    pub fn new(list: StepList) -> Self {
        Self(Arc::new(RwLock::new(list)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, StepList> {
        self.0.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, StepList> {
        self.0.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl StepSource for SharedSteps {
    fn step_fields(&self, step_index: usize) -> Option<(StepType, FieldSet)> {
        let list = self.read();
        list.get(step_index)
            .map(|s| (s.step_type, s.fields.clone()))
    }
}
