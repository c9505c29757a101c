pub mod autocomplete;
pub mod branch;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod editor;
pub mod error;
pub mod events;
pub mod extract;
pub mod fields;
pub mod preview;
pub mod session;
pub mod span;
pub mod types;

#[cfg(test)]
mod tests;

// Re-export main types
pub use types::*;

pub use config::Config;
pub use editor::{StepId, StepList};
pub use extract::{extract, to_fields};
pub use fields::{FieldSet, FieldValue};
pub use session::{EditorSession, SessionBuilder};
