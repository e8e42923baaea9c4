//! Integration tests for flow loading and execution
//!
//! These tests run the transactions flow end to end using mock components.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

use stepflow::capability::{
    AlertError, Alerter, DataSource, DataSourceError, FileSource, MemoryStore, Persistence,
    Record, SqliteStore,
};
use stepflow::engine::{AlertStatus, Context, Overlay, Run, StepBody, StepOutcome};
use stepflow::error::{EngineError, StepError};
use stepflow::flow::transactions::{self, INPUT_SOURCE};
use stepflow::flow::{Flow, FlowBuilder, StepRegistry};

// ============================================================================
// Mock Components
// ============================================================================

static SAMPLE_TRANSACTIONS: Lazy<Value> = Lazy::new(|| {
    json!([
        {"id": 1, "wording": "CB TATA 12/03", "amount": 350.0},
        {"id": 2, "wording": "VIR TOTO TUTU", "amount": -250.0},
        {"id": 3, "wording": "PRLV TAXI", "amount": -20.0},
        {"id": 4, "wording": "CHQ 0012", "amount": 0.0},
        {"id": 5, "wording": "SALAIRE", "amount": 120.0}
    ])
});

/// Data source that always returns the sample transactions
struct SampleSource;

#[async_trait]
impl DataSource for SampleSource {
    async fn load_records(&self, _source: &str) -> Result<Vec<Record>, DataSourceError> {
        Ok(serde_json::from_value(SAMPLE_TRANSACTIONS.clone()).unwrap())
    }
}

/// Alerter that records every message it receives
#[derive(Default)]
struct RecordingAlerter {
    messages: Mutex<Vec<String>>,
}

impl RecordingAlerter {
    fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Alerter for RecordingAlerter {
    async fn notify(&self, message: &str) -> Result<(), AlertError> {
        self.messages.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

/// Step body that fails with a fixed message
struct FailingBody(&'static str);

#[async_trait]
impl StepBody for FailingBody {
    async fn run(&self, _ctx: &Context) -> Result<Overlay, StepError> {
        Err(StepError::other(self.0))
    }
}

async fn registry(store: Arc<dyn Persistence>) -> StepRegistry {
    let registry = StepRegistry::new();
    transactions::register_steps(&registry, Arc::new(SampleSource), store).await;
    registry
}

async fn build(registry: StepRegistry, fail_step: Option<&str>) -> Flow {
    FlowBuilder::new(registry)
        .simulate_failure(fail_step)
        .build(&transactions::definition().unwrap())
        .await
        .unwrap()
}

// ============================================================================
// Transactions Flow Tests
// ============================================================================

#[tokio::test]
async fn test_clean_run_publishes_everything() {
    let store = Arc::new(MemoryStore::new());
    let alerter = Arc::new(RecordingAlerter::default());
    let flow = build(registry(store.clone()).await, None).await;

    let report = Run::new(flow.graph.clone())
        .with_param(INPUT_SOURCE, "sample")
        .with_reporter(flow.reporter(alerter.clone()))
        .execute()
        .await
        .unwrap();

    assert!(report.failures.is_clean());
    assert_eq!(report.failures.alert, AlertStatus::NotNeeded);
    assert!(alerter.messages().is_empty());
    assert_eq!(store.len("tags").await, 5);
    assert_eq!(store.len("annotations").await, 4);
    assert_eq!(report.context.get("tags_published").unwrap(), &json!(5));
    assert_eq!(
        report.context.get("annotations_published").unwrap(),
        &json!(4)
    );
    assert!(report
        .steps
        .iter()
        .all(|r| r.outcome == StepOutcome::Succeeded));
    assert_eq!(report.steps.len(), 8);
}

#[tokio::test]
async fn test_tag_failure_is_caught_and_reported_once() {
    let store = Arc::new(MemoryStore::new());
    let alerter = Arc::new(RecordingAlerter::default());
    let registry = registry(store.clone()).await;
    registry
        .register("tag_transactions", Arc::new(FailingBody("tagger exploded")))
        .await;
    let flow = build(registry, None).await;

    let report = Run::new(flow.graph.clone())
        .with_param(INPUT_SOURCE, "sample")
        .with_reporter(flow.reporter(alerter.clone()))
        .execute()
        .await
        .unwrap();

    // The terminal context carries the tag branch's flag but not annotate's
    assert!(report.context.is_flagged("tag_failed"));
    assert!(!report.context.is_flagged("annotate_failed"));
    assert_eq!(report.context.flag("tag_failed").unwrap().step, "tag");
    assert!(!report.context.contains("tags"));

    // The annotate branch ran to completion and published
    assert!(report.ran("annotate"));
    assert!(report.ran("publish_annotations"));
    assert_eq!(store.len("annotations").await, 4);

    // publish_tags saw the flag and skipped the upsert
    assert!(report.ran("publish_tags"));
    assert_eq!(store.len("tags").await, 0);
    assert!(!report.context.contains("tags_published"));

    let messages = alerter.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("tag (tagger exploded)"));
    assert!(messages[0].contains(&report.run_id));
    assert_eq!(report.failures.steps(), vec!["tag"]);
    assert_eq!(report.failures.alert, AlertStatus::Sent);
}

#[tokio::test]
async fn test_both_branches_failing_sends_single_alert() {
    let store = Arc::new(MemoryStore::new());
    let alerter = Arc::new(RecordingAlerter::default());
    let registry = registry(store.clone()).await;
    registry
        .register("tag_transactions", Arc::new(FailingBody("no tags")))
        .await;
    registry
        .register("annotate_transactions", Arc::new(FailingBody("no notes")))
        .await;
    let flow = build(registry, None).await;

    let report = Run::new(flow.graph.clone())
        .with_param(INPUT_SOURCE, "sample")
        .with_reporter(flow.reporter(alerter.clone()))
        .execute()
        .await
        .unwrap();

    assert_eq!(report.failures.steps(), vec!["tag", "annotate"]);
    let messages = alerter.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("2 failed step(s)"));
    assert_eq!(store.len("tags").await, 0);
    assert_eq!(store.len("annotations").await, 0);
}

#[tokio::test]
async fn test_simulated_failure_in_read_aborts_run() {
    let store = Arc::new(MemoryStore::new());
    let alerter = Arc::new(RecordingAlerter::default());
    let flow = build(registry(store.clone()).await, Some("read")).await;

    let err = Run::new(flow.graph.clone())
        .with_param(INPUT_SOURCE, "sample")
        .with_reporter(flow.reporter(alerter.clone()))
        .execute()
        .await
        .unwrap_err();

    assert_eq!(err.failed_step(), Some("read"));
    match err {
        EngineError::FatalStepFailure { source, .. } => {
            assert!(matches!(*source, StepError::Simulated(ref s) if s == "read"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(alerter.messages().is_empty());
    assert_eq!(store.len("tags").await, 0);
    assert_eq!(store.len("annotations").await, 0);
}

#[tokio::test]
async fn test_simulated_failure_in_publish_is_caught() {
    let store = Arc::new(MemoryStore::new());
    let alerter = Arc::new(RecordingAlerter::default());
    let flow = build(registry(store.clone()).await, Some("publish_annotations")).await;

    let report = Run::new(flow.graph.clone())
        .with_param(INPUT_SOURCE, "sample")
        .with_reporter(flow.reporter(alerter.clone()))
        .execute()
        .await
        .unwrap();

    assert!(report.context.is_flagged("publish_annotations_failed"));
    assert_eq!(store.len("tags").await, 5);
    assert_eq!(store.len("annotations").await, 0);
    assert_eq!(alerter.messages().len(), 1);
}

#[tokio::test]
async fn test_missing_input_source_is_fatal() {
    let flow = build(registry(Arc::new(MemoryStore::new())).await, None).await;

    let err = Run::new(flow.graph.clone()).execute().await.unwrap_err();
    assert_eq!(err.failed_step(), Some("read"));
}

// ============================================================================
// File and SQLite Tests
// ============================================================================

#[tokio::test]
async fn test_file_source_into_sqlite_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("transactions.json");
    std::fs::write(&input, SAMPLE_TRANSACTIONS.to_string()).unwrap();
    let database = dir.path().join("out").join("stepflow.db");

    let store = Arc::new(SqliteStore::open(&database).unwrap());
    let registry = StepRegistry::new();
    transactions::register_steps(&registry, Arc::new(FileSource::new()), store.clone()).await;
    let flow = build(registry, None).await;

    for _ in 0..2 {
        let report = Run::new(flow.graph.clone())
            .with_param(INPUT_SOURCE, input.to_string_lossy().to_string())
            .execute()
            .await
            .unwrap();
        assert!(report.failures.is_clean());
    }

    let tags = store.fetch_all("tags").await.unwrap();
    assert_eq!(tags.len(), 5);
    let first = tags
        .iter()
        .find(|t| t.get("transaction_id") == Some(&json!(1)))
        .unwrap();
    assert_eq!(first.get("tag"), Some(&json!("TATA")));

    let annotations = store.fetch_all("annotations").await.unwrap();
    assert_eq!(annotations.len(), 4);
    assert!(annotations
        .iter()
        .all(|a| a.get("transaction_id") != Some(&json!(4))));
}

#[tokio::test]
async fn test_inline_yaml_input() {
    let store = Arc::new(MemoryStore::new());
    let registry = StepRegistry::new();
    transactions::register_steps(&registry, Arc::new(FileSource::new()), store.clone()).await;
    let flow = build(registry, None).await;

    let inline = "- {id: 10, wording: TOTO, amount: 500}\n- {id: 11, wording: misc, amount: -1}\n";
    let report = Run::new(flow.graph.clone())
        .with_param(INPUT_SOURCE, inline)
        .execute()
        .await
        .unwrap();

    assert!(report.failures.is_clean());
    assert_eq!(store.len("tags").await, 2);
    let annotations = store.fetch_all("annotations").await.unwrap();
    assert_eq!(annotations[0].get("annotation"), Some(&json!("LARGE SALE")));
    assert_eq!(
        annotations[1].get("annotation"),
        Some(&json!("SMALL EXPENSE"))
    );
}

// ============================================================================
// Flow Definition Tests
// ============================================================================

#[tokio::test]
async fn test_build_flow_from_yaml_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tags_only.yaml");
    std::fs::write(
        &path,
        r#"
name: tags_only
steps:
  - name: start
    body: noop
    next: read
  - name: read
    body: read_transactions
    next: tag
  - name: tag
    body: tag_transactions
    catch: tag_failed
    next: end
  - name: end
    body: publish_tags
"#,
    )
    .unwrap();

    let store = Arc::new(MemoryStore::new());
    let flow = FlowBuilder::new(registry(store.clone()).await)
        .build_file(&path)
        .await
        .unwrap();
    assert_eq!(flow.name, "tags_only");
    assert_eq!(flow.report_flags, vec!["tag_failed".to_string()]);

    let report = Run::new(flow.graph.clone())
        .with_param(INPUT_SOURCE, "sample")
        .execute()
        .await
        .unwrap();
    assert!(report.failures.is_clean());
    assert_eq!(store.len("tags").await, 5);
    assert_eq!(store.len("annotations").await, 0);
}

#[tokio::test]
async fn test_report_serializes_to_json() {
    let registry = registry(Arc::new(MemoryStore::new())).await;
    let flow = build(registry, Some("tag")).await;

    let report = Run::new(flow.graph.clone())
        .with_param(INPUT_SOURCE, "sample")
        .execute()
        .await
        .unwrap();

    let value = serde_json::to_value(&report).unwrap();
    assert_eq!(value["run_id"], json!(report.run_id));
    let tag = value["steps"]
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["step"] == "tag")
        .unwrap();
    assert_eq!(tag["outcome"], "caught");
    assert_eq!(tag["flag"], "tag_failed");
}
