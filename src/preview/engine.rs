use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::client::{PreviewFetcher, PreviewResponse};
use super::surface::PreviewSurface;
use crate::extract::extract;
use crate::fields::FieldSet;
use crate::types::{PreviewRequest, StepType};

/// Read access to the raw fields of one step
pub trait StepSource: Send + Sync {
    fn step_fields(&self, step_index: usize) -> Option<(StepType, FieldSet)>;
}

/// What happened to one preview request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewOutcome {
    /// Response was applied to the surface
    Applied,
    /// A newer request for the step was issued first, or the engine shut down
    Stale,
    /// Fetch failed; the previous preview is untouched
    Failed,
    /// Step no longer exists or the engine is shut down
    Skipped,
}

struct PendingTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct State {
    timers: HashMap<usize, PendingTimer>,
    latest: HashMap<usize, u64>,
    next_request_id: u64,
    generation: u64,
}

struct Inner {
    source: Arc<dyn StepSource>,
    fetcher: Arc<dyn PreviewFetcher>,
    surface: Arc<dyn PreviewSurface>,
    delay: Duration,
    state: Mutex<State>,
    shutdown: CancellationToken,
}

/// Debounced, race-free preview refresh per step.
///
/// Each step has at most one pending timer. A response is applied only if
/// its request id is still the latest one issued for that step.
#[derive(Clone)]
pub struct PreviewSyncEngine {
    inner: Arc<Inner>,
}

impl PreviewSyncEngine {
    pub fn new(
        source: Arc<dyn StepSource>,
        fetcher: Arc<dyn PreviewFetcher>,
        surface: Arc<dyn PreviewSurface>,
        delay: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                fetcher,
                surface,
                delay,
                state: Mutex::new(State::default()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Restart the debounce window for `step_index`.
    pub fn on_field_change(&self, step_index: usize) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }

        let mut state = self.state();
        state.generation += 1;
        let generation = state.generation;

        if let Some(previous) = state.timers.remove(&step_index) {
            previous.handle.abort();
        }

        let engine = self.clone();
        let delay = self.inner.delay;
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = engine.inner.shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            if !engine.take_timer(step_index, generation) {
                return;
            }
            engine.request_now(step_index).await;
        });

        state
            .timers
            .insert(step_index, PendingTimer { generation, handle });
        debug!(step_index, "preview refresh scheduled");
    }

    // The fired timer removes itself, unless a newer one has replaced it
    fn take_timer(&self, step_index: usize, generation: u64) -> bool {
        let mut state = self.state();
        match state.timers.get(&step_index) {
            Some(timer) if timer.generation == generation => {
                state.timers.remove(&step_index);
                true
            }
            _ => false,
        }
    }

    /// Extract, fetch and apply a preview for one step immediately.
    pub async fn request_now(&self, step_index: usize) -> PreviewOutcome {
        if self.inner.shutdown.is_cancelled() {
            return PreviewOutcome::Skipped;
        }

        let Some((step_type, fields)) = self.inner.source.step_fields(step_index) else {
            debug!(step_index, "step gone before preview fetch");
            return PreviewOutcome::Skipped;
        };
        let record = extract(&fields, step_type, step_index);

        let request_id = {
            let mut state = self.state();
            state.next_request_id += 1;
            let id = state.next_request_id;
            state.latest.insert(step_index, id);
            id
        };

        let request = PreviewRequest {
            step_index,
            record,
            request_id,
        };

        let response = match self.inner.fetcher.fetch(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(step_index, request_id, error = %e, "preview fetch failed");
                return PreviewOutcome::Failed;
            }
        };

        // Check and apply under one lock so an older response can never
        // land after a newer one
        let state = self.state();
        if self.inner.shutdown.is_cancelled() {
            debug!(step_index, request_id, "discarding preview after shutdown");
            return PreviewOutcome::Stale;
        }
        if state.latest.get(&step_index) != Some(&request_id) {
            debug!(step_index, request_id, "discarding stale preview response");
            return PreviewOutcome::Stale;
        }

        match response {
            PreviewResponse::Html(html) => self.inner.surface.replace(step_index, html),
            PreviewResponse::Stream(fragments) => {
                for fragment in &fragments {
                    self.inner.surface.apply_fragment(step_index, fragment);
                }
            }
        }
        drop(state);

        PreviewOutcome::Applied
    }

    /// Steps with a debounce timer still pending, in ascending order
    pub fn pending_steps(&self) -> Vec<usize> {
        let state = self.state();
        let mut steps: Vec<usize> = state.timers.keys().copied().collect();
        steps.sort_unstable();
        steps
    }

    pub fn latest_request_id(&self, step_index: usize) -> Option<u64> {
        self.state().latest.get(&step_index).copied()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Cancel every pending timer and ignore any response still in flight.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let mut state = self.state();
        for (_, timer) in state.timers.drain() {
            timer.handle.abort();
        }
    }
}
