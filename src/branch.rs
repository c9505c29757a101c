//! Branch inference for decision steps
//!
//! Looks back from a decision step for yes/no questions and turns the one the
//! user picks into a pair of branch conditions.

use tracing::debug;

use crate::error::BranchError;
use crate::extract::write_branches;
use crate::fields::FieldSet;
use crate::types::{AnswerType, Branch, BranchCandidate, SourceQuestion, StepRecord};

/// Yes/no questions before `decision_index` that set a variable, nearest first.
pub fn infer_preceding(decision_index: usize, steps: &[StepRecord]) -> Vec<SourceQuestion> {
    let end = decision_index.min(steps.len());

    steps[..end]
        .iter()
        .enumerate()
        .rev()
        .filter_map(|(position, record)| {
            let question = record.as_question()?;
            if question.answer_type != AnswerType::YesNo {
                return None;
            }
            let variable_name = question.variable_name.trim();
            if variable_name.is_empty() {
                return None;
            }
            Some(SourceQuestion {
                title: record.title.clone(),
                variable_name: variable_name.to_string(),
                step_index: position,
            })
        })
        .collect()
}

pub fn build_candidate(
    question: &SourceQuestion,
    yes_path: &str,
    no_path: &str,
) -> BranchCandidate {
    let var = &question.variable_name;
    BranchCandidate {
        source_question: question.clone(),
        branches: [
            Branch {
                condition: format!("{} == 'yes'", var),
                path: yes_path.to_string(),
            },
            Branch {
                condition: format!("{} == 'no'", var),
                path: no_path.to_string(),
            },
        ],
    }
}

/// Overwrite the branch fields of a decision step with the candidate's pair.
///
/// Existing branches are removed first, not merged.
pub fn apply(candidate: &BranchCandidate, fields: &mut FieldSet) {
    let removed = fields.remove_group("branches");
    if removed > 0 {
        debug!(removed, "replacing existing branch fields");
    }
    write_branches(fields, &candidate.branches);
}

/// Open suggestion panel for one decision step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferencePanel {
    decision_index: usize,
    candidates: Vec<SourceQuestion>,
    selected: Option<usize>,
}

impl InferencePanel {
    /// Open the panel with the nearest question pre-selected.
    pub fn open(decision_index: usize, steps: &[StepRecord]) -> Result<Self, BranchError> {
        match steps.get(decision_index) {
            Some(record) if record.as_decision().is_some() => {}
            _ => return Err(BranchError::NotADecision(decision_index)),
        }

        let candidates = infer_preceding(decision_index, steps);
        let selected = if candidates.is_empty() { None } else { Some(0) };
        Ok(Self {
            decision_index,
            candidates,
            selected,
        })
    }

    pub fn decision_index(&self) -> usize {
        self.decision_index
    }

    pub fn candidates(&self) -> &[SourceQuestion] {
        &self.candidates
    }

    pub fn selected(&self) -> Option<&SourceQuestion> {
        self.selected.and_then(|i| self.candidates.get(i))
    }

    pub fn select(&mut self, index: usize) -> Result<(), BranchError> {
        if index >= self.candidates.len() {
            return Err(BranchError::InvalidSelection {
                index,
                available: self.candidates.len(),
            });
        }
        self.selected = Some(index);
        Ok(())
    }

    /// Recompute candidates after the step list changed.
    ///
    /// The decision step may have moved, so its current index is passed in.
    /// A selected question that is still present stays selected.
    pub fn refresh(&mut self, decision_index: usize, steps: &[StepRecord]) {
        let previous = self.selected().cloned();
        self.decision_index = decision_index;
        self.candidates = infer_preceding(decision_index, steps);

        self.selected = previous
            .and_then(|prev| {
                self.candidates.iter().position(|c| {
                    c.variable_name == prev.variable_name && c.title == prev.title
                })
            })
            .or(if self.candidates.is_empty() { None } else { Some(0) });
    }

    pub fn confirm(&self, yes_path: &str, no_path: &str) -> Result<BranchCandidate, BranchError> {
        let question = self.selected().ok_or(BranchError::NoSelection)?;
        Ok(build_candidate(question, yes_path, no_path))
    }
}
