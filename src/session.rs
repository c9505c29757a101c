//! Editor session
//!
//! Wires the step list, variable catalog, autocomplete, preview sync and
//! branch inference together. Components never call each other directly:
//! field edits reach the preview through field events, and structural edits
//! reach the catalog and the inference panel through structure events.

use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Instant;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::autocomplete::{FieldId, Insertion, KeyOutcome, NavKey, VariableAutocompleteEngine};
use crate::branch::InferencePanel;
use crate::catalog::{HttpVariableSource, VariableCatalog, VariableSource};
use crate::config::Config;
use crate::editor::{SharedSteps, StepId, StepList};
use crate::error::{BranchError, CatalogError, EditorError, PreviewError};
use crate::events::{BranchSuggestion, EditorEvents};
use crate::fields::{FieldSet, FieldValue};
use crate::preview::{
    HttpPreviewFetcher, PreviewFetcher, PreviewOutcome, PreviewPane, PreviewSurface,
    PreviewSyncEngine,
};
use crate::types::{BranchCandidate, SourceQuestion, StepType};

type SharedSource = Arc<RwLock<Option<Arc<dyn VariableSource>>>>;
type SharedPanel = Arc<Mutex<Option<OpenPanel>>>;

struct OpenPanel {
    decision: StepId,
    panel: InferencePanel,
}

#[derive(Default)]
pub struct SessionBuilder {
    config: Option<Config>,
    fetcher: Option<Arc<dyn PreviewFetcher>>,
    surface: Option<Arc<dyn PreviewSurface>>,
    variable_source: Option<Arc<dyn VariableSource>>,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Preview fetcher to use instead of HTTP against the configured URL
    pub fn fetcher(mut self, fetcher: Arc<dyn PreviewFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn surface(mut self, surface: Arc<dyn PreviewSurface>) -> Self {
        self.surface = Some(surface);
        self
    }

    /// Fixed variable source, used for every workflow id
    pub fn variable_source(mut self, source: Arc<dyn VariableSource>) -> Self {
        self.variable_source = Some(source);
        self
    }

    /// Build the session and start its listeners. Needs a tokio runtime.
    pub fn build(self) -> Result<EditorSession, PreviewError> {
        let config = self.config.unwrap_or_default();

        let fetcher: Arc<dyn PreviewFetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpPreviewFetcher::new(
                config.endpoints.preview_url.clone(),
                config.http_timeout(),
            )?),
        };
        let surface = self
            .surface
            .unwrap_or_else(|| Arc::new(PreviewPane::new()) as Arc<dyn PreviewSurface>);

        let events = EditorEvents::default();
        let steps = SharedSteps::new(StepList::new(events.clone()));
        let catalog = Arc::new(VariableCatalog::new());
        let preview = PreviewSyncEngine::new(
            Arc::new(steps.clone()),
            fetcher,
            surface,
            config.preview_debounce(),
        );
        let autocomplete = VariableAutocompleteEngine::new(catalog.clone(), config.blur_grace());

        let session = EditorSession {
            fixed_source: self.variable_source.is_some(),
            source: Arc::new(RwLock::new(self.variable_source)),
            panel: Arc::new(Mutex::new(None)),
            autocomplete: Mutex::new(autocomplete),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            config,
            events,
            steps,
            catalog,
            preview,
        };
        session.start_listeners();

        info!("editor session started");
        Ok(session)
    }
}

pub struct EditorSession {
    config: Config,
    events: EditorEvents,
    steps: SharedSteps,
    catalog: Arc<VariableCatalog>,
    preview: PreviewSyncEngine,
    autocomplete: Mutex<VariableAutocompleteEngine>,
    source: SharedSource,
    fixed_source: bool,
    panel: SharedPanel,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl EditorSession {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    fn start_listeners(&self) {
        let field_task = {
            let mut rx = self.events.subscribe_fields();
            let steps = self.steps.clone();
            let preview = self.preview.clone();
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        msg = rx.recv() => match msg {
                            Ok(change) => preview.on_field_change(change.step_index),
                            Err(RecvError::Lagged(skipped)) => {
                                // Dropped edits could be on any step
                                let len = steps.read().len();
                                warn!(skipped, steps = len, "field listener lagged");
                                for index in 0..len {
                                    preview.on_field_change(index);
                                }
                            }
                            Err(RecvError::Closed) => break,
                        },
                    }
                }
            })
        };

        let structure_task = {
            let mut rx = self.events.subscribe_structure();
            let steps = self.steps.clone();
            let catalog = self.catalog.clone();
            let source = self.source.clone();
            let panel = self.panel.clone();
            let shutdown = self.shutdown.clone();
            let delay = self.config.catalog_reload_debounce();
            tokio::spawn(async move {
                let mut reload_at: Option<tokio::time::Instant> = None;
                loop {
                    let deadline = reload_at;
                    let reload_due = async move {
                        match deadline {
                            Some(at) => tokio::time::sleep_until(at).await,
                            None => std::future::pending::<()>().await,
                        }
                    };
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        msg = rx.recv() => match msg {
                            Ok(_) | Err(RecvError::Lagged(_)) => {
                                refresh_panel(&steps, &panel);
                                reload_at = Some(tokio::time::Instant::now() + delay);
                            }
                            Err(RecvError::Closed) => break,
                        },
                        _ = reload_due => {
                            reload_at = None;
                            reload_catalog(&source, &catalog).await;
                        }
                    }
                }
            })
        };

        self.tasks().extend([field_task, structure_task]);
    }

    fn tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn autocomplete(&self) -> MutexGuard<'_, VariableAutocompleteEngine> {
        self.autocomplete.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn panel(&self) -> MutexGuard<'_, Option<OpenPanel>> {
        self.panel.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn events(&self) -> &EditorEvents {
        &self.events
    }

    pub fn steps(&self) -> &SharedSteps {
        &self.steps
    }

    pub fn catalog(&self) -> &Arc<VariableCatalog> {
        &self.catalog
    }

    pub fn preview(&self) -> &PreviewSyncEngine {
        &self.preview
    }

    // ----- Step list -----

    pub fn add_step(&self, step_type: StepType, fields: FieldSet) -> StepId {
        self.steps.write().add_step(step_type, fields)
    }

    pub fn insert_step(
        &self,
        index: usize,
        step_type: StepType,
        fields: FieldSet,
    ) -> Result<StepId, EditorError> {
        self.steps
            .write()
            .insert_step(index, step_type, fields)
            .inspect_err(|e| warn!(error = %e, "insert_step rejected"))
    }

    pub fn remove_step(&self, id: StepId) -> Result<(), EditorError> {
        self.steps
            .write()
            .remove_step(id)
            .map(|_| ())
            .inspect_err(|e| warn!(error = %e, "remove_step rejected"))
    }

    pub fn move_step(&self, from: usize, to: usize) -> Result<(), EditorError> {
        self.steps
            .write()
            .move_step(from, to)
            .inspect_err(|e| warn!(error = %e, "move_step rejected"))
    }

    pub fn set_field(
        &self,
        step_index: usize,
        name: &str,
        value: impl Into<FieldValue>,
    ) -> Result<(), EditorError> {
        self.steps.write().set_field(step_index, name, value)
    }

    pub fn connect(&self, from: StepId, to: StepId) -> Result<(), EditorError> {
        self.steps
            .write()
            .connect(from, to)
            .inspect_err(|e| warn!(error = %e, "connect rejected"))
    }

    pub fn disconnect(&self, from: StepId, to: StepId) -> Result<(), EditorError> {
        self.steps
            .write()
            .disconnect(from, to)
            .inspect_err(|e| warn!(error = %e, "disconnect rejected"))
    }

    /// Render a step's preview now, skipping the debounce.
    pub async fn render_step(&self, id: StepId) -> Result<PreviewOutcome, EditorError> {
        let index = self
            .steps
            .read()
            .index_of(id)
            .ok_or_else(|| EditorError::UnknownStep(id.as_uuid()))?;
        Ok(self.preview.request_now(index).await)
    }

    // ----- Variables -----

    /// Point the catalog at a workflow and reload it right away.
    pub async fn set_workflow_id(&self, workflow_id: &str) -> Result<usize, CatalogError> {
        if !self.fixed_source {
            let source = HttpVariableSource::for_workflow(
                &self.config.endpoints.variables_url,
                workflow_id,
                self.config.http_timeout(),
            )?;
            debug!(url = source.url(), "variable source updated");
            let mut slot = self.source.write().unwrap_or_else(|e| e.into_inner());
            *slot = Some(Arc::new(source));
        }
        self.reload_variables().await
    }

    pub async fn reload_variables(&self) -> Result<usize, CatalogError> {
        let source = current_source(&self.source).ok_or(CatalogError::MissingWorkflow)?;
        self.catalog.reload(source.as_ref()).await
    }

    // ----- Autocomplete -----

    /// Record typed text in the field and update suggestions.
    ///
    /// Returns whether suggestions are showing afterwards.
    pub fn on_text_input(
        &self,
        field: &FieldId,
        text: &str,
        cursor: usize,
    ) -> Result<bool, EditorError> {
        self.set_field(field.step_index, &field.field, text)?;
        Ok(self.autocomplete().on_text_change(field, text, cursor))
    }

    pub fn on_key(&self, key: NavKey, now: Instant) -> Result<KeyOutcome, EditorError> {
        let outcome = self.autocomplete().on_key(key, now);
        if let KeyOutcome::Inserted(insertion) = &outcome {
            self.apply_insertion(insertion)?;
        }
        Ok(outcome)
    }

    pub fn on_pointer_select(
        &self,
        index: usize,
        now: Instant,
    ) -> Result<Option<Insertion>, EditorError> {
        let insertion = self.autocomplete().on_pointer_select(index, now);
        if let Some(insertion) = &insertion {
            self.apply_insertion(insertion)?;
        }
        Ok(insertion)
    }

    pub fn on_focus(&self, field: &FieldId) {
        self.autocomplete().on_focus(field);
    }

    pub fn on_blur(&self, field: &FieldId, now: Instant) {
        self.autocomplete().on_blur(field, now);
    }

    /// Advance pending blur dismissals. Returns true if suggestions closed.
    pub fn poll_autocomplete(&self, now: Instant) -> bool {
        self.autocomplete().poll(now)
    }

    pub fn suggestions(&self) -> Vec<String> {
        self.autocomplete().suggestions().to_vec()
    }

    pub fn highlighted_suggestion(&self) -> Option<usize> {
        self.autocomplete().highlighted()
    }

    /// Write a committed suggestion into its field.
    ///
    /// This goes through the normal field path, so the preview refresh is
    /// triggered by the resulting field event.
    pub fn apply_insertion(&self, insertion: &Insertion) -> Result<(), EditorError> {
        debug!(
            step_index = insertion.field.step_index,
            field = %insertion.field.field,
            name = %insertion.name,
            "variable inserted"
        );
        self.set_field(
            insertion.field.step_index,
            &insertion.field.field,
            insertion.text.as_str(),
        )
    }

    // ----- Branch inference -----

    /// Open the inference panel for a decision step, replacing any open one.
    pub fn open_branch_inference(
        &self,
        decision: StepId,
    ) -> Result<Vec<SourceQuestion>, EditorError> {
        let steps = self.steps.read();
        let index = steps
            .index_of(decision)
            .ok_or_else(|| EditorError::UnknownStep(decision.as_uuid()))?;
        let panel = InferencePanel::open(index, &steps.records())
            .inspect_err(|e| warn!(error = %e, "branch inference rejected"))?;
        drop(steps);

        let candidates = panel.candidates().to_vec();
        *self.panel() = Some(OpenPanel { decision, panel });
        Ok(candidates)
    }

    pub fn branch_candidates(&self) -> Option<Vec<SourceQuestion>> {
        self.panel()
            .as_ref()
            .map(|open| open.panel.candidates().to_vec())
    }

    pub fn selected_branch_source(&self) -> Option<SourceQuestion> {
        self.panel()
            .as_ref()
            .and_then(|open| open.panel.selected().cloned())
    }

    pub fn select_branch_source(&self, index: usize) -> Result<(), EditorError> {
        let mut guard = self.panel();
        let open = guard.as_mut().ok_or(BranchError::PanelClosed)?;
        open.panel
            .select(index)
            .inspect_err(|e| warn!(error = %e, "branch selection rejected"))?;
        Ok(())
    }

    /// Build the candidate for the selected question and publish it.
    ///
    /// The panel closes on success. Nothing is written to the decision step
    /// until the candidate is applied.
    pub fn confirm_branch_inference(
        &self,
        yes_path: &str,
        no_path: &str,
    ) -> Result<BranchCandidate, EditorError> {
        let mut guard = self.panel();
        let open = guard.as_ref().ok_or(BranchError::PanelClosed)?;
        let candidate = open
            .panel
            .confirm(yes_path, no_path)
            .inspect_err(|e| warn!(error = %e, "branch confirmation rejected"))?;

        self.events.publish_branch_suggestion(BranchSuggestion {
            decision_index: open.panel.decision_index(),
            candidate: candidate.clone(),
        });
        *guard = None;
        Ok(candidate)
    }

    pub fn close_branch_inference(&self) {
        *self.panel() = None;
    }

    /// Replace the decision step's branches with the candidate's pair.
    pub fn apply_branch_candidate(
        &self,
        decision: StepId,
        candidate: &BranchCandidate,
    ) -> Result<usize, EditorError> {
        self.steps
            .write()
            .apply_candidate(decision, candidate)
            .inspect_err(|e| warn!(error = %e, "branch apply rejected"))
    }

    // ----- Lifecycle -----

    pub fn is_torn_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop listeners and timers, and drop session-scoped state.
    pub async fn teardown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        self.preview.shutdown();

        let tasks: Vec<JoinHandle<()>> = self.tasks().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }

        self.autocomplete().dismiss();
        self.close_branch_inference();
        self.catalog.clear();
        info!("editor session torn down");
    }
}

fn current_source(source: &SharedSource) -> Option<Arc<dyn VariableSource>> {
    source
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .clone()
}

async fn reload_catalog(source: &SharedSource, catalog: &VariableCatalog) {
    match current_source(source) {
        // Failures are logged by the catalog and the previous set stays
        Some(source) => {
            let _ = catalog.reload(source.as_ref()).await;
        }
        None => debug!("no variable source yet, skipping catalog reload"),
    }
}

fn refresh_panel(steps: &SharedSteps, panel: &SharedPanel) {
    let mut guard = panel.lock().unwrap_or_else(|e| e.into_inner());
    let Some(open) = guard.as_mut() else {
        return;
    };

    let list = steps.read();
    match list.index_of(open.decision) {
        Some(index) => open.panel.refresh(index, &list.records()),
        None => {
            debug!(decision = %open.decision, "decision step removed, closing inference panel");
            *guard = None;
        }
    }
}
