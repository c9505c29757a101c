use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;

use super::stream::{Fragment, FragmentAction};

/// Where rendered previews end up
pub trait PreviewSurface: Send + Sync {
    /// Replace the whole preview for a step.
    fn replace(&self, step_index: usize, html: String);

    /// Apply one targeted fragment to a step's preview.
    fn apply_fragment(&self, step_index: usize, fragment: &Fragment);
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PaneContent {
    pub html: String,
    pub regions: IndexMap<String, String>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// In-memory preview pane, one content slot per step
#[derive(Debug, Default)]
pub struct PreviewPane {
    steps: Mutex<HashMap<usize, PaneContent>>,
}

impl PreviewPane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(&self, step_index: usize) -> Option<PaneContent> {
        let steps = self.steps.lock().unwrap_or_else(|e| e.into_inner());
        steps.get(&step_index).cloned()
    }

    pub fn html(&self, step_index: usize) -> Option<String> {
        self.content(step_index).map(|c| c.html)
    }

    pub fn region(&self, step_index: usize, target: &str) -> Option<String> {
        self.content(step_index)
            .and_then(|c| c.regions.get(target).cloned())
    }

    pub fn clear(&self, step_index: usize) {
        let mut steps = self.steps.lock().unwrap_or_else(|e| e.into_inner());
        steps.remove(&step_index);
    }
}

impl PreviewSurface for PreviewPane {
    fn replace(&self, step_index: usize, html: String) {
        let mut steps = self.steps.lock().unwrap_or_else(|e| e.into_inner());
        let slot = steps.entry(step_index).or_default();
        slot.html = html;
        slot.regions.clear();
        slot.updated_at = Some(Utc::now());
    }

    fn apply_fragment(&self, step_index: usize, fragment: &Fragment) {
        let mut steps = self.steps.lock().unwrap_or_else(|e| e.into_inner());
        let slot = steps.entry(step_index).or_default();
        let target = fragment.target.clone();

        match fragment.action {
            FragmentAction::Replace | FragmentAction::Update => {
                slot.regions.insert(target, fragment.content.clone());
            }
            FragmentAction::Append => {
                slot.regions
                    .entry(target)
                    .or_default()
                    .push_str(&fragment.content);
            }
            FragmentAction::Prepend => {
                let region = slot.regions.entry(target).or_default();
                region.insert_str(0, &fragment.content);
            }
            FragmentAction::Remove => {
                slot.regions.shift_remove(&target);
            }
        }
        slot.updated_at = Some(Utc::now());
    }
}
