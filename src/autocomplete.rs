//! Variable autocomplete for free-text step fields
//!
//! One engine serves the whole editor, so at most one suggestion list is open
//! at a time. States:
//!
//! - `Idle`: nothing shown
//! - `Suggesting`: the cursor is in an open `{{` span and the catalog has
//!   matches for its query
//!
//! Committing a suggestion passes briefly through an insert step and lands
//! back in `Idle`. Time is supplied by the caller, which keeps the
//! blur-versus-click race deterministic: a blur only schedules the dismissal,
//! and a commit at or before the scheduled instant still wins.

use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::catalog::VariableCatalog;
use crate::span::{find_active_span, splice, ActiveSpan};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FieldId {
    pub step_index: usize,
    pub field: String,
}

impl FieldId {
    pub fn new(step_index: usize, field: impl Into<String>) -> Self {
        Self {
            step_index,
            field: field.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavKey {
    Down,
    Up,
    Enter,
    Tab,
    Escape,
}

/// Result of committing a suggestion: the field's full new text and where
/// the cursor goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Insertion {
    pub field: FieldId,
    pub name: String,
    pub text: String,
    pub cursor: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyOutcome {
    /// Not ours; the key should reach the field
    Ignored,
    Navigated,
    Dismissed,
    Inserted(Insertion),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Suggesting,
}

#[derive(Debug, Clone)]
struct Suggestions {
    field: FieldId,
    text: String,
    span: ActiveSpan,
    items: Vec<String>,
    highlighted: Option<usize>,
    dismiss_at: Option<Instant>,
}

#[derive(Debug, Clone, Default)]
enum State {
    #[default]
    Idle,
    Suggesting(Suggestions),
}

pub struct VariableAutocompleteEngine {
    catalog: Arc<VariableCatalog>,
    blur_grace: Duration,
    state: State,
}

impl VariableAutocompleteEngine {
    pub fn new(catalog: Arc<VariableCatalog>, blur_grace: Duration) -> Self {
        Self {
            catalog,
            blur_grace,
            state: State::Idle,
        }
    }

    pub fn phase(&self) -> Phase {
        match self.state {
            State::Idle => Phase::Idle,
            State::Suggesting(_) => Phase::Suggesting,
        }
    }

    pub fn active_field(&self) -> Option<&FieldId> {
        match &self.state {
            State::Suggesting(s) => Some(&s.field),
            State::Idle => None,
        }
    }

    pub fn active_span(&self) -> Option<&ActiveSpan> {
        match &self.state {
            State::Suggesting(s) => Some(&s.span),
            State::Idle => None,
        }
    }

    pub fn suggestions(&self) -> &[String] {
        match &self.state {
            State::Suggesting(s) => &s.items,
            State::Idle => &[],
        }
    }

    pub fn highlighted(&self) -> Option<usize> {
        match &self.state {
            State::Suggesting(s) => s.highlighted,
            State::Idle => None,
        }
    }

    /// Re-evaluate after the text or cursor of `field` changed.
    ///
    /// Returns whether a suggestion list is open afterwards.
    pub fn on_text_change(&mut self, field: &FieldId, text: &str, cursor: usize) -> bool {
        // Another field's list is closed before this one may open
        if self.active_field().is_some_and(|active| active != field) {
            self.state = State::Idle;
        }

        let Some(span) = find_active_span(text, cursor) else {
            self.state = State::Idle;
            return false;
        };

        let items = self.catalog.filter(&span.query);
        if items.is_empty() {
            self.state = State::Idle;
            return false;
        }

        let highlighted = match &self.state {
            State::Suggesting(prev) if prev.items == items => prev.highlighted,
            _ => Some(0),
        };

        self.state = State::Suggesting(Suggestions {
            field: field.clone(),
            text: text.to_string(),
            span,
            items,
            highlighted,
            dismiss_at: None,
        });
        true
    }

    /// Keyboard input while suggestions are open. A commit after the blur
    /// grace window has run out closes the list instead of inserting.
    pub fn on_key(&mut self, key: NavKey, now: Instant) -> KeyOutcome {
        let State::Suggesting(s) = &mut self.state else {
            return KeyOutcome::Ignored;
        };
        let len = s.items.len();

        match key {
            NavKey::Down => {
                s.highlighted = Some(match s.highlighted {
                    None => 0,
                    Some(i) => (i + 1) % len,
                });
                KeyOutcome::Navigated
            }
            NavKey::Up => {
                s.highlighted = Some(match s.highlighted {
                    None => 0,
                    Some(0) => len - 1,
                    Some(i) => i - 1,
                });
                KeyOutcome::Navigated
            }
            NavKey::Enter | NavKey::Tab => {
                if s.dismiss_at.is_some_and(|deadline| now > deadline) {
                    self.state = State::Idle;
                    return KeyOutcome::Dismissed;
                }
                let highlighted = s.highlighted;
                match highlighted {
                    Some(i) => self
                        .commit(i)
                        .map(KeyOutcome::Inserted)
                        .unwrap_or(KeyOutcome::Ignored),
                    None => KeyOutcome::Ignored,
                }
            }
            NavKey::Escape => {
                self.state = State::Idle;
                KeyOutcome::Dismissed
            }
        }
    }

    /// Pointer click on suggestion `index`.
    pub fn on_pointer_select(&mut self, index: usize, now: Instant) -> Option<Insertion> {
        let State::Suggesting(s) = &self.state else {
            return None;
        };

        if s.dismiss_at.is_some_and(|deadline| now > deadline) {
            self.state = State::Idle;
            return None;
        }

        self.commit(index)
    }

    /// The field lost focus. Dismissal waits out the grace window.
    pub fn on_blur(&mut self, field: &FieldId, now: Instant) {
        let grace = self.blur_grace;
        if let State::Suggesting(s) = &mut self.state {
            if s.field == *field {
                s.dismiss_at = Some(now + grace);
            }
        }
    }

    /// A field gained focus.
    pub fn on_focus(&mut self, field: &FieldId) {
        let other_field = match &mut self.state {
            State::Suggesting(s) if s.field == *field => {
                s.dismiss_at = None;
                false
            }
            State::Suggesting(_) => true,
            State::Idle => false,
        };
        if other_field {
            self.state = State::Idle;
        }
    }

    /// Apply a pending blur dismissal once its window has passed.
    ///
    /// Returns whether the list was closed by this call.
    pub fn poll(&mut self, now: Instant) -> bool {
        let expired = matches!(
            &self.state,
            State::Suggesting(s) if s.dismiss_at.is_some_and(|deadline| now > deadline)
        );
        if expired {
            self.state = State::Idle;
        }
        expired
    }

    /// Close any open list (cursor left every field, editor torn down).
    pub fn dismiss(&mut self) {
        self.state = State::Idle;
    }

    fn commit(&mut self, index: usize) -> Option<Insertion> {
        let State::Suggesting(s) = std::mem::take(&mut self.state) else {
            return None;
        };

        let Some(name) = s.items.get(index).cloned() else {
            self.state = State::Suggesting(s);
            return None;
        };

        let (text, cursor) = splice(&s.text, &s.span, &name);
        Some(Insertion {
            field: s.field,
            name,
            text,
            cursor,
        })
    }
}
