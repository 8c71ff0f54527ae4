//! Core records shared by the queue, the store, and the alert path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    /// Claimed by exactly one worker invocation.
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StorageError> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(StorageError::Corrupt(format!("unknown job status {other:?}"))),
        }
    }
}

/// A queued "analyze this message" unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub id: i64,
    pub message_id: i64,
    pub status: JobStatus,
    pub attempts: u32,
    /// Annotation on completed jobs, e.g. "skipped: not risky".
    pub note: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    #[serde(alias = "model", alias = "assistant")]
    Ai,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Ai => "ai",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StorageError> {
        match s {
            "user" => Ok(MessageRole::User),
            "ai" | "model" | "assistant" => Ok(MessageRole::Ai),
            other => Err(StorageError::Corrupt(format!("unknown role {other:?}"))),
        }
    }
}

/// A conversation row as the chat pipeline stored it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMessage {
    pub id: i64,
    pub child_id: String,
    pub role: MessageRole,
    pub content: String,
}

/// The five clinical risk axes, each in `[0.0, 1.0]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskScores {
    pub depression_score: f64,
    pub anxiety_score: f64,
    pub self_harm_risk_score: f64,
    pub isolation_score: f64,
    pub urgency_score: f64,
}

impl RiskScores {
    pub const FIELDS: [&'static str; 5] = [
        "depression_score",
        "anxiety_score",
        "self_harm_risk_score",
        "isolation_score",
        "urgency_score",
    ];

    pub fn axes(&self) -> [(&'static str, f64); 5] {
        [
            ("depression_score", self.depression_score),
            ("anxiety_score", self.anxiety_score),
            ("self_harm_risk_score", self.self_harm_risk_score),
            ("isolation_score", self.isolation_score),
            ("urgency_score", self.urgency_score),
        ]
    }
}

/// Persisted result of scoring one message. Written once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskScoreRecord {
    pub child_id: String,
    pub conversation_id: i64,
    pub scores: RiskScores,
    pub is_alert_triggered: bool,
    pub analyzed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveOutcome {
    Inserted,
    /// A record for (child, message) already existed; treated as success.
    AlreadyAnalyzed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicMention {
    pub child_id: String,
    pub topic: String,
    pub mention_count: u64,
    pub last_mentioned_at: DateTime<Utc>,
}

/// Guardian-facing alert. A signal, not a transcript: there is no field that
/// could carry the child's words.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertNotification {
    pub child_id: String,
    pub conversation_id: i64,
    pub scores: RiskScores,
    /// Axis names that crossed their threshold.
    pub triggered_by: Vec<&'static str>,
    pub summary: String,
    pub analyzed_at: DateTime<Utc>,
}
