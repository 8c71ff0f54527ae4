// tests/support/mod.rs
//
// Shared doubles for the integration tests: a scripted AI backend, a
// notifier that records what it was asked to send, and a record store whose
// `save` always fails.

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use companion_risk_analyzer::alert::AlertDispatcher;
use companion_risk_analyzer::analyze::{
    AiClient, AiTask, ContentClassifier, RiskScorer, TopicExtractor,
};
use companion_risk_analyzer::config::AnalysisSettings;
use companion_risk_analyzer::error::{AiError, StorageError};
use companion_risk_analyzer::model::{
    AlertNotification, MessageRole, RiskScoreRecord, SaveOutcome, TopicMention,
};
use companion_risk_analyzer::notify::Notifier;
use companion_risk_analyzer::store::{AnalysisRecordStore, SqliteStore};
use companion_risk_analyzer::worker::{AnalysisWorker, WorkerDeps};

pub const GUARDIAN_EMAIL: &str = "guardian@example.com";

// ---------- scripted AI ----------

#[derive(Default)]
pub struct StubAi {
    responses: HashMap<&'static str, Result<Value, AiError>>,
    delays: HashMap<&'static str, Duration>,
    calls: Mutex<HashMap<&'static str, usize>>,
}

impl StubAi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, task: AiTask, out: Result<Value, AiError>) -> Self {
        self.responses.insert(task.name(), out);
        self
    }

    pub fn delay(mut self, task: AiTask, d: Duration) -> Self {
        self.delays.insert(task.name(), d);
        self
    }

    pub fn calls(&self, task: AiTask) -> usize {
        self.calls.lock().get(task.name()).copied().unwrap_or(0)
    }

    /// Classifier says YES, scorer returns the given governing axes.
    pub fn risky(self_harm: f64, urgency: f64) -> Self {
        Self::new()
            .respond(AiTask::Classify, Ok(json!({ "verdict": "YES" })))
            .respond(AiTask::Score, Ok(scores_json(self_harm, urgency)))
            .respond(AiTask::Topics, Ok(json!({ "topics": ["School", "friends"] })))
    }

    pub fn benign() -> Self {
        Self::new()
            .respond(AiTask::Classify, Ok(json!({ "verdict": "NO" })))
            .respond(AiTask::Topics, Ok(json!({ "topics": ["games"] })))
    }
}

pub fn scores_json(self_harm: f64, urgency: f64) -> Value {
    json!({
        "depression_score": 0.6,
        "anxiety_score": 0.5,
        "self_harm_risk_score": self_harm,
        "isolation_score": 0.4,
        "urgency_score": urgency
    })
}

impl AiClient for StubAi {
    fn complete_json<'a>(
        &'a self,
        task: AiTask,
        _input: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Value, AiError>> + Send + 'a>> {
        *self.calls.lock().entry(task.name()).or_insert(0) += 1;
        let delay = self.delays.get(task.name()).copied();
        let out = self
            .responses
            .get(task.name())
            .cloned()
            .unwrap_or(Err(AiError::Disabled));
        Box::pin(async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            out
        })
    }

    fn provider_name(&self) -> &'static str {
        "stub"
    }
}

// ---------- notifier ----------

#[derive(Default)]
pub struct RecordingNotifier {
    pub fail: bool,
    sent: Mutex<Vec<(String, AlertNotification)>>,
    attempts: Mutex<usize>,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<(String, AlertNotification)> {
        self.sent.lock().clone()
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, contact: &str, alert: &AlertNotification) -> anyhow::Result<()> {
        *self.attempts.lock() += 1;
        if self.fail {
            anyhow::bail!("notification channel unavailable");
        }
        self.sent.lock().push((contact.to_string(), alert.clone()));
        Ok(())
    }
}

// ---------- record store whose writes fail ----------

pub struct FailingRecordStore {
    pub inner: SqliteStore,
}

#[async_trait]
impl AnalysisRecordStore for FailingRecordStore {
    async fn save(&self, _record: &RiskScoreRecord) -> Result<SaveOutcome, StorageError> {
        Err(StorageError::Backend("disk I/O error".into()))
    }

    async fn increment_topic_mention(&self, child_id: &str, topic: &str) -> Result<(), StorageError> {
        self.inner.increment_topic_mention(child_id, topic).await
    }

    async fn claim_topic_tally(&self, message_id: i64) -> Result<bool, StorageError> {
        self.inner.claim_topic_tally(message_id).await
    }

    async fn pending_alert(
        &self,
        child_id: &str,
        message_id: i64,
    ) -> Result<Option<RiskScoreRecord>, StorageError> {
        self.inner.pending_alert(child_id, message_id).await
    }

    async fn mark_alert_dispatched(&self, child_id: &str, message_id: i64) -> Result<(), StorageError> {
        self.inner.mark_alert_dispatched(child_id, message_id).await
    }

    async fn latest_record(&self, child_id: &str) -> Result<Option<RiskScoreRecord>, StorageError> {
        self.inner.latest_record(child_id).await
    }

    async fn top_topics(&self, child_id: &str, limit: usize) -> Result<Vec<TopicMention>, StorageError> {
        self.inner.top_topics(child_id, limit).await
    }
}

// ---------- harness ----------

pub struct Harness {
    pub store: SqliteStore,
    pub ai: Arc<StubAi>,
    pub notifier: Arc<RecordingNotifier>,
    pub worker: AnalysisWorker,
}

pub struct HarnessOpts {
    pub with_guardian: bool,
    pub failing_records: bool,
    pub call_timeout_ms: u64,
    /// Overrides the worker's requeue age cutoff when set.
    pub requeue_after_secs: Option<u64>,
    pub notifier: RecordingNotifier,
}

impl Default for HarnessOpts {
    fn default() -> Self {
        Self {
            with_guardian: true,
            failing_records: false,
            call_timeout_ms: 200,
            requeue_after_secs: None,
            notifier: RecordingNotifier::default(),
        }
    }
}

pub fn test_settings(call_timeout_ms: u64) -> AnalysisSettings {
    let mut settings = AnalysisSettings::default();
    settings.worker.call_timeout_ms = call_timeout_ms;
    settings.alert.delivery_timeout_ms = 1_000;
    settings
}

pub async fn harness(ai: StubAi, opts: HarnessOpts) -> Harness {
    let store = SqliteStore::open_in_memory().await.unwrap();
    if opts.with_guardian {
        store.insert_guardian("g1", Some(GUARDIAN_EMAIL)).await.unwrap();
        store.insert_child("c1", Some("Mia"), Some("g1")).await.unwrap();
    } else {
        store.insert_child("c1", Some("Mia"), None).await.unwrap();
    }

    let ai = Arc::new(ai);
    let notifier = Arc::new(opts.notifier);
    let mut settings = test_settings(opts.call_timeout_ms);
    if let Some(secs) = opts.requeue_after_secs {
        settings.worker.requeue_after_secs = secs;
    }
    let timeout = settings.worker.call_timeout();
    let shared = Arc::new(store.clone());

    let records: Arc<dyn AnalysisRecordStore> = if opts.failing_records {
        Arc::new(FailingRecordStore {
            inner: store.clone(),
        })
    } else {
        shared.clone()
    };

    let deps = WorkerDeps {
        queue: shared.clone(),
        messages: shared.clone(),
        records,
        classifier: ContentClassifier::new(ai.clone(), timeout),
        scorer: RiskScorer::new(ai.clone(), timeout),
        topics: Some(TopicExtractor::new(ai.clone(), timeout, 5)),
        dispatcher: Arc::new(AlertDispatcher::new(
            &settings.alert,
            shared,
            notifier.clone(),
        )),
    };

    Harness {
        store,
        ai,
        notifier,
        worker: AnalysisWorker::new(deps, settings.worker),
    }
}

/// Store a child message and enqueue it; returns (message_id, job_id).
pub async fn enqueue_message(store: &SqliteStore, role: MessageRole, content: &str) -> (i64, i64) {
    use companion_risk_analyzer::store::JobQueue;
    let message_id = store.insert_message("c1", role, content).await.unwrap();
    let job = store.enqueue(message_id).await.unwrap();
    (message_id, job.id)
}
