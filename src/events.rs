//! Typed editor notifications
//!
//! One broadcast channel per event kind. Components subscribe to the kinds
//! they care about instead of listening on a document-wide bus.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::types::BranchCandidate;

const DEFAULT_CAPACITY: usize = 256;

/// The step list's membership or ordering changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StructureChange {
    StepAdded { index: usize },
    StepRemoved { index: usize },
    StepMoved { from: usize, to: usize },
}

/// A field within one step changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldChanged {
    pub step_index: usize,
    pub field: String,
}

/// Candidate produced by branch inference, for the decision step editor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchSuggestion {
    pub decision_index: usize,
    pub candidate: BranchCandidate,
}

#[derive(Debug, Clone)]
pub struct EditorEvents {
    structure: broadcast::Sender<StructureChange>,
    fields: broadcast::Sender<FieldChanged>,
    branches: broadcast::Sender<BranchSuggestion>,
}

impl Default for EditorEvents {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EditorEvents {
    pub fn new(capacity: usize) -> Self {
        let (structure, _) = broadcast::channel(capacity);
        let (fields, _) = broadcast::channel(capacity);
        let (branches, _) = broadcast::channel(capacity);
        Self {
            structure,
            fields,
            branches,
        }
    }

    pub fn subscribe_structure(&self) -> broadcast::Receiver<StructureChange> {
        self.structure.subscribe()
    }

    pub fn subscribe_fields(&self) -> broadcast::Receiver<FieldChanged> {
        self.fields.subscribe()
    }

    pub fn subscribe_branch_suggestions(&self) -> broadcast::Receiver<BranchSuggestion> {
        self.branches.subscribe()
    }

    // A send with no subscribers is not an error for a notification
    pub fn publish_structure(&self, change: StructureChange) {
        let _ = self.structure.send(change);
    }

    pub fn publish_field(&self, step_index: usize, field: impl Into<String>) {
        let _ = self.fields.send(FieldChanged {
            step_index,
            field: field.into(),
        });
    }

    pub fn publish_branch_suggestion(&self, suggestion: BranchSuggestion) {
        let _ = self.branches.send(suggestion);
    }
}
