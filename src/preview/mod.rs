//! Live preview synchronization
//!
//! Field edits are debounced per step, extracted into a record, sent to the
//! rendering endpoint and the result is swapped into a preview surface.

pub mod client;
pub mod engine;
pub mod stream;
pub mod surface;

pub use client::{query_pairs, HttpPreviewFetcher, PreviewFetcher, PreviewResponse};
pub use engine::{PreviewOutcome, PreviewSyncEngine, StepSource};
pub use stream::{parse_stream, Fragment, FragmentAction, STREAM_MIME};
pub use surface::{PaneContent, PreviewPane, PreviewSurface};
