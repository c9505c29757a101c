use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_test::{assert_err, assert_ok};

use crate::autocomplete::{FieldId, KeyOutcome, NavKey};
use crate::catalog::VariableSource;
use crate::config::Config;
use crate::error::{BranchError, CatalogError, EditorError, PreviewError};
use crate::fields::FieldSet;
use crate::preview::{PreviewFetcher, PreviewPane, PreviewResponse};
use crate::session::EditorSession;
use crate::types::{PreviewRequest, StepPayload, StepType};

// =============================================================================
// Fixtures
// =============================================================================

#[derive(Default)]
struct RecordingFetcher {
    requests: Mutex<Vec<PreviewRequest>>,
}

impl RecordingFetcher {
    fn count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn last(&self) -> PreviewRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl PreviewFetcher for RecordingFetcher {
    async fn fetch(&self, request: &PreviewRequest) -> Result<PreviewResponse, PreviewError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(PreviewResponse::Html(format!(
            "<h2>{}</h2>",
            request.record.title
        )))
    }
}

/// Serves a settable list and counts fetches
struct CountingSource {
    names: Mutex<Option<Vec<String>>>,
    fetches: AtomicUsize,
}

impl CountingSource {
    fn new(names: &[&str]) -> Self {
        Self {
            names: Mutex::new(Some(names.iter().map(|s| s.to_string()).collect())),
            fetches: AtomicUsize::new(0),
        }
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn set(&self, names: Option<&[&str]>) {
        *self.names.lock().unwrap() = names.map(|n| n.iter().map(|s| s.to_string()).collect());
    }
}

#[async_trait]
impl VariableSource for CountingSource {
    async fn fetch_variables(&self) -> Result<Vec<String>, CatalogError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.names
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| CatalogError::Network("connection refused".to_string()))
    }
}

struct Harness {
    session: EditorSession,
    fetcher: Arc<RecordingFetcher>,
    pane: Arc<PreviewPane>,
    source: Arc<CountingSource>,
}

fn harness(variables: &[&str]) -> Harness {
    let fetcher = Arc::new(RecordingFetcher::default());
    let pane = Arc::new(PreviewPane::new());
    let source = Arc::new(CountingSource::new(variables));
    let session = EditorSession::builder()
        .config(Config::default())
        .fetcher(fetcher.clone())
        .surface(pane.clone())
        .variable_source(source.clone())
        .build()
        .unwrap();

    Harness {
        session,
        fetcher,
        pane,
        source,
    }
}

fn fields(pairs: &[(&str, &str)]) -> FieldSet {
    pairs.iter().copied().collect()
}

fn yes_no_question(title: &str, var: &str) -> FieldSet {
    fields(&[
        ("title", title),
        ("question", "?"),
        ("answer_type", "yes_no"),
        ("variable_name", var),
    ])
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

// =============================================================================
// Preview through field events
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_field_edits_reach_preview_once() {
    let h = harness(&[]);
    h.session.add_step(StepType::Message, FieldSet::new());

    for title in ["W", "We", "Welcome"] {
        assert_ok!(h.session.set_field(0, "title", title));
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(h.fetcher.count(), 1);
    assert_eq!(h.fetcher.last().record.title, "Welcome");
    assert_eq!(h.pane.html(0).as_deref(), Some("<h2>Welcome</h2>"));
}

#[tokio::test(start_paused = true)]
async fn test_burst_of_edits_still_previews_every_step() {
    let h = harness(&[]);
    h.session.add_step(StepType::Message, FieldSet::new());
    h.session.add_step(StepType::Message, FieldSet::new());

    // More edits than the field channel holds, before the listener runs
    assert_ok!(h.session.set_field(0, "title", "edited"));
    for i in 0..300 {
        assert_ok!(h.session.set_field(1, "content", format!("line {}", i)));
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    let mut indices: Vec<usize> = h
        .fetcher
        .requests
        .lock()
        .unwrap()
        .iter()
        .map(|r| r.step_index)
        .collect();
    indices.sort_unstable();
    indices.dedup();
    assert_eq!(indices, vec![0, 1]);
    assert_eq!(h.pane.html(0).as_deref(), Some("<h2>edited</h2>"));
}

#[tokio::test(start_paused = true)]
async fn test_render_step_skips_debounce() {
    let h = harness(&[]);
    let id = h
        .session
        .add_step(StepType::Message, fields(&[("title", "New")]));

    let outcome = h.session.render_step(id).await.unwrap();

    assert_eq!(outcome, crate::preview::PreviewOutcome::Applied);
    assert_eq!(h.pane.html(0).as_deref(), Some("<h2>New</h2>"));
}

// =============================================================================
// Autocomplete
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_keyboard_insertion_updates_field_and_preview() {
    let h = harness(&["customer.name", "customer.email", "ticket.id"]);
    assert_eq!(h.session.set_workflow_id("wf-1").await.unwrap(), 3);
    h.session.add_step(StepType::Message, FieldSet::new());

    let field = FieldId::new(0, "content");
    assert!(h.session.on_text_input(&field, "Dear {{cust", 11).unwrap());
    assert_eq!(
        h.session.suggestions(),
        vec!["customer.name", "customer.email"]
    );

    let now = Instant::now();
    assert_eq!(h.session.on_key(NavKey::Down, now).unwrap(), KeyOutcome::Navigated);
    assert_eq!(h.session.highlighted_suggestion(), Some(1));

    match h.session.on_key(NavKey::Enter, now).unwrap() {
        KeyOutcome::Inserted(insertion) => {
            assert_eq!(insertion.text, "Dear {{customer.email}}");
            assert_eq!(insertion.cursor, insertion.text.len());
        }
        other => panic!("expected insertion, got {:?}", other),
    }
    assert!(h.session.suggestions().is_empty());

    tokio::time::sleep(Duration::from_millis(600)).await;

    // Typing and the insertion coalesce into a single preview fetch
    assert_eq!(h.fetcher.count(), 1);
    match h.fetcher.last().record.payload {
        StepPayload::Message(m) => assert_eq!(m.content, "Dear {{customer.email}}"),
        other => panic!("unexpected payload {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_pointer_select_within_blur_grace_wins() {
    let h = harness(&["order.id"]);
    h.session.set_workflow_id("wf").await.unwrap();
    h.session.add_step(StepType::Message, FieldSet::new());

    let field = FieldId::new(0, "content");
    h.session.on_text_input(&field, "{{ord", 5).unwrap();

    let now = Instant::now();
    h.session.on_blur(&field, now);
    let insertion = h
        .session
        .on_pointer_select(0, now + Duration::from_millis(100))
        .unwrap()
        .unwrap();

    assert_eq!(insertion.text, "{{order.id}}");
    let steps = h.session.steps().read();
    assert_eq!(steps.fields(0).unwrap().text("content"), "{{order.id}}");
}

#[tokio::test(start_paused = true)]
async fn test_blur_dismisses_after_grace() {
    let h = harness(&["order.id"]);
    h.session.set_workflow_id("wf").await.unwrap();
    h.session.add_step(StepType::Message, FieldSet::new());

    let field = FieldId::new(0, "content");
    h.session.on_text_input(&field, "{{", 2).unwrap();

    let now = Instant::now();
    h.session.on_blur(&field, now);
    assert!(!h.session.poll_autocomplete(now + Duration::from_millis(100)));
    assert!(h.session.poll_autocomplete(now + Duration::from_millis(200)));
    assert!(h.session.suggestions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_focus_moves_close_previous_list() {
    let h = harness(&["a.one", "a.two"]);
    h.session.set_workflow_id("wf").await.unwrap();
    h.session.add_step(StepType::Message, FieldSet::new());
    h.session.add_step(StepType::Message, FieldSet::new());

    h.session
        .on_text_input(&FieldId::new(0, "content"), "{{a", 3)
        .unwrap();
    h.session.on_focus(&FieldId::new(1, "content"));

    assert!(h.session.suggestions().is_empty());
    let outcome = h.session.on_key(NavKey::Enter, Instant::now()).unwrap();
    assert_eq!(outcome, KeyOutcome::Ignored);
}

// =============================================================================
// Variable catalog
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_structure_changes_debounce_catalog_reload() {
    let h = harness(&["x"]);
    h.session.set_workflow_id("wf").await.unwrap();
    assert_eq!(h.source.fetches(), 1);

    for _ in 0..3 {
        h.session.add_step(StepType::Message, FieldSet::new());
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.source.fetches(), 1);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(h.source.fetches(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_reload_keeps_variables() {
    let h = harness(&["kept"]);
    h.session.set_workflow_id("wf").await.unwrap();

    h.source.set(None);
    h.session.add_step(StepType::Message, FieldSet::new());
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(h.source.fetches(), 2);
    assert_eq!(h.session.catalog().filter(""), vec!["kept"]);

    h.source.set(Some(&["fresh"][..]));
    assert_eq!(h.session.reload_variables().await.unwrap(), 1);
    assert_eq!(h.session.catalog().filter(""), vec!["fresh"]);
}

// =============================================================================
// Branch inference
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_branch_inference_confirm_and_apply() {
    let h = harness(&[]);
    h.session
        .add_step(StepType::Question, yes_no_question("Account", "has_account"));
    h.session.add_step(StepType::Message, FieldSet::new());
    let decision = h.session.add_step(
        StepType::Decision,
        fields(&[("branches[0][condition]", "stale"), ("branches[0][path]", "x")]),
    );
    let mut suggestions = h.session.events().subscribe_branch_suggestions();

    let candidates = h.session.open_branch_inference(decision).unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].variable_name, "has_account");

    let candidate = h.session.confirm_branch_inference("signup", "login").unwrap();
    let published = suggestions.recv().await.unwrap();
    assert_eq!(published.decision_index, 2);
    assert_eq!(published.candidate, candidate);

    // Confirming only proposes; branches are written on apply
    let before = h.session.steps().read().record(2).unwrap();
    assert_eq!(before.as_decision().unwrap().branches[0].condition, "stale");

    assert_eq!(h.session.apply_branch_candidate(decision, &candidate), Ok(2));
    let after = h.session.steps().read().record(2).unwrap();
    let branches = &after.as_decision().unwrap().branches;
    assert_eq!(branches.len(), 2);
    assert_eq!(branches[0].condition, "has_account == 'yes'");
    assert_eq!(branches[0].path, "signup");
    assert_eq!(branches[1].path, "login");

    assert_eq!(
        h.session.confirm_branch_inference("a", "b"),
        Err(EditorError::Branch(BranchError::PanelClosed))
    );
}

#[tokio::test(start_paused = true)]
async fn test_confirm_without_candidates_is_rejected() {
    let h = harness(&[]);
    h.session.add_step(StepType::Message, FieldSet::new());
    let decision = h.session.add_step(StepType::Decision, FieldSet::new());

    assert!(h.session.open_branch_inference(decision).unwrap().is_empty());
    assert_eq!(
        h.session.confirm_branch_inference("a", "b"),
        Err(EditorError::Branch(BranchError::NoSelection))
    );
    assert_eq!(
        h.session.select_branch_source(0),
        Err(EditorError::Branch(BranchError::InvalidSelection {
            index: 0,
            available: 0
        }))
    );
}

#[tokio::test(start_paused = true)]
async fn test_panel_follows_structure_changes() {
    let h = harness(&[]);
    h.session
        .add_step(StepType::Question, yes_no_question("Account", "has_account"));
    let decision = h.session.add_step(StepType::Decision, FieldSet::new());
    h.session.open_branch_inference(decision).unwrap();

    assert_ok!(h.session.insert_step(
        0,
        StepType::Question,
        yes_no_question("Region", "in_eu")
    ));
    settle().await;

    let candidates = h.session.branch_candidates().unwrap();
    assert_eq!(candidates.len(), 2);
    let selected = h.session.selected_branch_source().unwrap();
    assert_eq!(selected.variable_name, "has_account");
    assert_eq!(selected.step_index, 1);

    assert_ok!(h.session.remove_step(decision));
    settle().await;
    assert!(h.session.branch_candidates().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_open_inference_on_non_decision() {
    let h = harness(&[]);
    let message = h.session.add_step(StepType::Message, FieldSet::new());

    assert_eq!(
        h.session.open_branch_inference(message),
        Err(EditorError::Branch(BranchError::NotADecision(0)))
    );
}

// =============================================================================
// Step list errors and teardown
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_unknown_step_ids_are_rejected() {
    let h = harness(&[]);
    let a = h.session.add_step(StepType::Message, FieldSet::new());
    let ghost = crate::editor::StepId::new();

    assert_err!(h.session.connect(a, ghost));
    assert_err!(h.session.disconnect(a, ghost));
    assert_err!(h.session.remove_step(ghost));
    assert_eq!(
        h.session.render_step(ghost).await,
        Err(EditorError::UnknownStep(ghost.as_uuid()))
    );
}

#[tokio::test(start_paused = true)]
async fn test_teardown_stops_all_activity() {
    let h = harness(&["v"]);
    h.session.set_workflow_id("wf").await.unwrap();
    h.session.add_step(StepType::Message, FieldSet::new());
    h.session.set_field(0, "title", "pending").unwrap();
    settle().await;
    assert_eq!(h.session.preview().pending_steps(), vec![0]);

    h.session.teardown().await;

    assert!(h.session.is_torn_down());
    assert!(h.session.preview().pending_steps().is_empty());
    assert!(h.session.catalog().is_empty());

    h.session.set_field(0, "title", "after").unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(h.fetcher.count(), 0);

    // Second teardown is a no-op
    h.session.teardown().await;
}
