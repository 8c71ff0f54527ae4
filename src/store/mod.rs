//! Storage seams consumed by the pipeline.
//!
//! The traits mirror the collaborators the pipeline talks to; `SqliteStore`
//! implements all of them over one injected connection handle.

pub mod schema;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageError;
use crate::model::{AnalysisJob, RiskScoreRecord, SaveOutcome, SourceMessage, TopicMention};

pub use sqlite::SqliteStore;

/// Durable work queue of analysis jobs.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Insert a `pending` job for `message_id`.
    async fn enqueue(&self, message_id: i64) -> Result<AnalysisJob, StorageError>;

    /// Up to `limit` pending jobs, oldest first. Does not claim them.
    async fn fetch_pending(&self, limit: usize) -> Result<Vec<AnalysisJob>, StorageError>;

    /// Compare-and-set `pending -> processing`. `false` means another worker won.
    async fn claim(&self, job_id: i64) -> Result<bool, StorageError>;

    /// `processing -> completed`, with an optional annotation.
    async fn complete(&self, job_id: i64, note: Option<&str>) -> Result<(), StorageError>;

    /// `processing -> failed`, recording the reason.
    async fn fail(&self, job_id: i64, reason: &str) -> Result<(), StorageError>;

    /// Operator sweep: `failed` jobs processed before `older_than` with fewer
    /// than `max_attempts` attempts go back to `pending`.
    async fn requeue_failed(
        &self,
        older_than: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<usize, StorageError>;

    /// `processing` jobs claimed before `claimed_before` (crashed worker) go back to `pending`.
    async fn reclaim_stale(&self, claimed_before: DateTime<Utc>) -> Result<usize, StorageError>;

    async fn job(&self, job_id: i64) -> Result<Option<AnalysisJob>, StorageError>;
}

/// Read access to the chat pipeline's stored messages.
#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn message(&self, message_id: i64) -> Result<Option<SourceMessage>, StorageError>;
}

/// Persistence of analysis results.
#[async_trait]
pub trait AnalysisRecordStore: Send + Sync {
    /// One durable write. A duplicate (child, message) pair is `AlreadyAnalyzed`.
    async fn save(&self, record: &RiskScoreRecord) -> Result<SaveOutcome, StorageError>;

    /// Atomic `+1` at the storage layer, never read-modify-write.
    async fn increment_topic_mention(
        &self,
        child_id: &str,
        topic: &str,
    ) -> Result<(), StorageError>;

    /// Marks the topics of `message_id` as counted. `false` means an earlier
    /// run already counted them.
    async fn claim_topic_tally(&self, message_id: i64) -> Result<bool, StorageError>;

    /// Stored record for (child, message) that is alert-triggered but has no
    /// recorded dispatch yet.
    async fn pending_alert(
        &self,
        child_id: &str,
        message_id: i64,
    ) -> Result<Option<RiskScoreRecord>, StorageError>;

    async fn mark_alert_dispatched(
        &self,
        child_id: &str,
        message_id: i64,
    ) -> Result<(), StorageError>;

    async fn latest_record(&self, child_id: &str)
        -> Result<Option<RiskScoreRecord>, StorageError>;

    async fn top_topics(
        &self,
        child_id: &str,
        limit: usize,
    ) -> Result<Vec<TopicMention>, StorageError>;
}

/// child -> managing guardian -> contact address.
#[async_trait]
pub trait GuardianResolver: Send + Sync {
    async fn guardian_contact(&self, child_id: &str) -> Result<Option<String>, StorageError>;
}
