// src/worker.rs
//! Queue worker: turns pending analysis jobs into terminal states.
//!
//! One invocation = one bounded batch. Jobs in a batch run concurrently and
//! share no per-job state; a job's failure never aborts its siblings.
//! Per job the order is strict: claim, fetch, classify, score, persist, alert,
//! complete.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::join_all;
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::alert::{AlertDispatcher, AlertOutcome};
use crate::analyze::{ContentClassifier, RiskScorer, TopicExtractor};
use crate::config::WorkerSettings;
use crate::error::StorageError;
use crate::model::{AnalysisJob, MessageRole, RiskScoreRecord, SaveOutcome, SourceMessage};
use crate::store::{AnalysisRecordStore, JobQueue, MessageSource};
use crate::telemetry::anon_hash;

pub const NOTE_NOT_RISKY: &str = "skipped: not risky";
pub const NOTE_NOT_USER: &str = "skipped: not a user message";
pub const NOTE_EMPTY: &str = "skipped: empty message";

// ten years; keeps chrono arithmetic in range for absurd settings
const MAX_SWEEP_SECS: u64 = 315_360_000;

/// Terminal result of handling one job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Scored (and persisted, best-effort); `alert` says what the dispatcher did.
    /// `None` when the record already existed and alerting was skipped.
    Completed { alert: Option<AlertOutcome> },
    /// Completed without scoring, with the annotation stored on the job.
    Skipped(&'static str),
    Failed(String),
    /// Another invocation won the claim; this one did nothing.
    Contended,
    /// The claim itself errored; the job is untouched and still `pending`.
    ClaimFailed(String),
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Completed { .. } => "completed",
            JobOutcome::Skipped(_) => "skipped",
            JobOutcome::Failed(_) => "failed",
            JobOutcome::Contended => "contended",
            JobOutcome::ClaimFailed(_) => "claim_error",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub processed: usize,
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub contended: usize,
    pub claim_errors: usize,
}

impl BatchSummary {
    fn tally(outcomes: &[JobOutcome]) -> Self {
        let mut s = BatchSummary {
            processed: outcomes.len(),
            ..Default::default()
        };
        for o in outcomes {
            match o {
                JobOutcome::Completed { .. } => s.completed += 1,
                JobOutcome::Skipped(_) => s.skipped += 1,
                JobOutcome::Failed(_) => s.failed += 1,
                JobOutcome::Contended => s.contended += 1,
                JobOutcome::ClaimFailed(_) => s.claim_errors += 1,
            }
        }
        s
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RequeueSummary {
    pub requeued: usize,
    pub reclaimed: usize,
}

/// Everything the worker talks to, injected by the entry point.
pub struct WorkerDeps {
    pub queue: Arc<dyn JobQueue>,
    pub messages: Arc<dyn MessageSource>,
    pub records: Arc<dyn AnalysisRecordStore>,
    pub classifier: ContentClassifier,
    pub scorer: RiskScorer,
    pub topics: Option<TopicExtractor>,
    pub dispatcher: Arc<AlertDispatcher>,
}

pub struct AnalysisWorker {
    deps: WorkerDeps,
    settings: WorkerSettings,
}

fn secs_before(now: DateTime<Utc>, secs: u64) -> DateTime<Utc> {
    now - ChronoDuration::seconds(secs.min(MAX_SWEEP_SECS) as i64)
}

impl AnalysisWorker {
    pub fn new(deps: WorkerDeps, settings: WorkerSettings) -> Self {
        Self { deps, settings }
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    /// Fetch up to `batch_size` pending jobs and drive each to a terminal state.
    /// Only the initial fetch can fail the batch.
    pub async fn run_batch(&self) -> Result<BatchSummary, StorageError> {
        let jobs = self
            .deps
            .queue
            .fetch_pending(self.settings.batch_size)
            .await?;
        gauge!("analysis_batch_jobs").set(jobs.len() as f64);
        gauge!("analysis_batch_last_run_ts").set(Utc::now().timestamp().max(0) as f64);

        if jobs.is_empty() {
            debug!(target: "worker", "no pending analysis jobs");
            return Ok(BatchSummary::default());
        }

        let outcomes = join_all(jobs.into_iter().map(|job| self.process_job(job))).await;
        let summary = BatchSummary::tally(&outcomes);
        info!(
            target: "worker",
            processed = summary.processed,
            completed = summary.completed,
            skipped = summary.skipped,
            failed = summary.failed,
            contended = summary.contended,
            claim_errors = summary.claim_errors,
            "analysis batch finished"
        );
        Ok(summary)
    }

    /// Claim, run, and record the terminal transition of one job.
    pub async fn process_job(&self, job: AnalysisJob) -> JobOutcome {
        let started = Instant::now();
        match self.deps.queue.claim(job.id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(target: "worker", job_id = job.id, "job claimed elsewhere");
                counter!("analysis_jobs_total", "outcome" => "contended").increment(1);
                return JobOutcome::Contended;
            }
            Err(e) => {
                // job is untouched and stays pending
                warn!(target: "worker", job_id = job.id, error = %e, "claim failed");
                counter!("analysis_jobs_total", "outcome" => "claim_error").increment(1);
                return JobOutcome::ClaimFailed(e.to_string());
            }
        }

        let outcome = self.run_claimed(&job).await;

        let transition = match &outcome {
            JobOutcome::Completed { .. } => self.deps.queue.complete(job.id, None).await,
            JobOutcome::Skipped(note) => self.deps.queue.complete(job.id, Some(*note)).await,
            JobOutcome::Failed(reason) => self.deps.queue.fail(job.id, reason).await,
            JobOutcome::Contended | JobOutcome::ClaimFailed(_) => Ok(()),
        };
        if let Err(e) = transition {
            // stays `processing`; the stale-claim sweep returns it to the queue
            error!(target: "worker", job_id = job.id, outcome = outcome.as_str(), error = %e, "could not record job outcome");
        }

        counter!("analysis_jobs_total", "outcome" => outcome.as_str()).increment(1);
        histogram!("analysis_job_duration_ms").record(started.elapsed().as_secs_f64() * 1000.0);
        match &outcome {
            JobOutcome::Failed(reason) => {
                warn!(target: "worker", job_id = job.id, message_id = job.message_id, reason = %reason, "analysis job failed")
            }
            other => {
                info!(target: "worker", job_id = job.id, message_id = job.message_id, outcome = other.as_str(), "analysis job done")
            }
        }
        outcome
    }

    async fn run_claimed(&self, job: &AnalysisJob) -> JobOutcome {
        let msg = match self.deps.messages.message(job.message_id).await {
            Ok(Some(m)) => m,
            Ok(None) => return JobOutcome::Failed(format!("message {} not found", job.message_id)),
            Err(e) => return JobOutcome::Failed(format!("message lookup failed: {e}")),
        };
        if let Err(note) = enqueue_filter(&msg) {
            return JobOutcome::Skipped(note);
        }

        let (risky, topics) = tokio::join!(
            self.deps.classifier.might_be_risky(&msg.content),
            self.extract_topics(&msg.content)
        );

        // topics are only counted once the job can no longer fail
        if !risky {
            self.record_topics(&msg, &topics).await;
            return JobOutcome::Skipped(NOTE_NOT_RISKY);
        }

        let scores = match self.deps.scorer.score(&msg.content).await {
            Ok(s) => s,
            Err(e) => return JobOutcome::Failed(e.to_string()),
        };

        let record = RiskScoreRecord {
            child_id: msg.child_id.clone(),
            conversation_id: msg.id,
            scores,
            is_alert_triggered: self.deps.dispatcher.policy().is_triggered(&scores),
            analyzed_at: Utc::now(),
        };

        let saved = self.deps.records.save(&record).await;
        self.record_topics(&msg, &topics).await;

        let alert = match saved {
            Ok(SaveOutcome::Inserted) => Some(self.alert_and_mark(&record).await),
            Ok(SaveOutcome::AlreadyAnalyzed) => self.resume_pending_alert(job, &msg).await,
            Err(e) => {
                counter!("record_store_errors_total").increment(1);
                error!(target: "worker", job_id = job.id, message_id = msg.id, child_id = %msg.child_id, error = %e, "persisting risk record failed; alerting anyway");
                Some(self.alert_if_needed(&record).await)
            }
        };
        JobOutcome::Completed { alert }
    }

    async fn alert_if_needed(&self, record: &RiskScoreRecord) -> AlertOutcome {
        if !record.is_alert_triggered {
            return AlertOutcome::NoAlert;
        }
        self.deps.dispatcher.dispatch(record).await
    }

    /// Alert for a freshly stored record and record the dispatch on it.
    async fn alert_and_mark(&self, record: &RiskScoreRecord) -> AlertOutcome {
        let outcome = self.alert_if_needed(record).await;
        if record.is_alert_triggered && outcome.is_settled() {
            if let Err(e) = self
                .deps
                .records
                .mark_alert_dispatched(&record.child_id, record.conversation_id)
                .await
            {
                warn!(target: "worker", child_id = %record.child_id, message_id = record.conversation_id, error = %e, "could not mark alert dispatched");
            }
        }
        outcome
    }

    /// A rerun of an already stored message alerts only if the earlier run
    /// stopped before its dispatch settled.
    async fn resume_pending_alert(&self, job: &AnalysisJob, msg: &SourceMessage) -> Option<AlertOutcome> {
        match self.deps.records.pending_alert(&msg.child_id, msg.id).await {
            Ok(Some(stored)) => {
                info!(target: "worker", job_id = job.id, message_id = msg.id, "message already analyzed; resuming its alert");
                Some(self.alert_and_mark(&stored).await)
            }
            Ok(None) => {
                info!(target: "worker", job_id = job.id, message_id = msg.id, "message already analyzed; not alerting again");
                None
            }
            Err(e) => {
                warn!(target: "worker", job_id = job.id, message_id = msg.id, error = %e, "pending alert lookup failed");
                None
            }
        }
    }

    async fn extract_topics(&self, text: &str) -> Vec<String> {
        match &self.deps.topics {
            Some(t) => t.extract(text).await,
            None => Vec::new(),
        }
    }

    async fn record_topics(&self, msg: &SourceMessage, topics: &[String]) {
        if topics.is_empty() {
            return;
        }
        match self.deps.records.claim_topic_tally(msg.id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(target: "worker", message_id = msg.id, "topics already counted");
                return;
            }
            Err(e) => {
                warn!(target: "worker", message_id = msg.id, error = %e, "topic tally claim failed");
                return;
            }
        }
        let child_id = msg.child_id.as_str();
        for topic in topics {
            match self
                .deps
                .records
                .increment_topic_mention(child_id, topic)
                .await
            {
                Ok(()) => counter!("topic_mentions_total").increment(1),
                Err(e) => {
                    warn!(target: "worker", child_id = %child_id, error = %e, "topic increment failed")
                }
            }
        }
    }

    /// Operator sweep: retry old failures that still have attempts left and
    /// return abandoned claims to the queue.
    pub async fn requeue_sweep(&self) -> Result<RequeueSummary, StorageError> {
        let now = Utc::now();
        let requeued = self
            .deps
            .queue
            .requeue_failed(
                secs_before(now, self.settings.requeue_after_secs),
                self.settings.max_attempts,
            )
            .await?;
        let reclaimed = self
            .deps
            .queue
            .reclaim_stale(secs_before(now, self.settings.stale_claim_secs))
            .await?;
        if requeued + reclaimed > 0 {
            info!(target: "worker", requeued, reclaimed, "requeue sweep");
        }
        Ok(RequeueSummary {
            requeued,
            reclaimed,
        })
    }
}

/// Whether a stored message should be queued at all.
pub fn enqueue_filter(msg: &SourceMessage) -> Result<(), &'static str> {
    if msg.role != MessageRole::User {
        return Err(NOTE_NOT_USER);
    }
    if msg.content.trim().is_empty() {
        return Err(NOTE_EMPTY);
    }
    debug!(target: "worker", message_id = msg.id, id = %anon_hash(&msg.content), "message accepted for analysis");
    Ok(())
}
