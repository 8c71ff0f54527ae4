//! Error taxonomy for the analysis pipeline.
//!
//! Errors that corrupt the score itself (`ScoreError`) abort a job. Errors in
//! secondary effects (`StorageError` on save, `DispatchError`) are contained by
//! the caller and only logged.

use std::time::Duration;

use thiserror::Error;

/// Failure of the generative backend call itself.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AiError {
    #[error("AI backend is disabled")]
    Disabled,

    #[error("AI request failed: {0}")]
    Transport(String),

    #[error("AI backend returned HTTP {0}")]
    Status(u16),

    #[error("AI response was blocked by the provider's safety filter")]
    SafetyBlocked,

    #[error("AI response contained no candidate text")]
    Empty,

    #[error("AI response is not valid JSON: {0}")]
    InvalidJson(String),
}

/// Pre-filter failure. Never escapes the classifier: it is logged and mapped
/// to "not risky".
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClassificationError {
    #[error(transparent)]
    Backend(#[from] AiError),

    #[error("classification timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected classifier verdict: {0:?}")]
    UnexpectedVerdict(String),
}

/// The scorer returned something that is not a complete five-axis record.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("malformed score response: {reason}")]
pub struct MalformedScoreResponse {
    pub reason: String,
}

impl MalformedScoreResponse {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScoreError {
    #[error("scoring backend failed: {0}")]
    Backend(#[from] AiError),

    #[error("scoring timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Malformed(#[from] MalformedScoreResponse),
}

impl ScoreError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ScoreError::Backend(_) => "backend",
            ScoreError::Timeout(_) => "timeout",
            ScoreError::Malformed(_) => "malformed",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("storage connection is closed")]
    ConnectionClosed,

    #[error("job {job_id} is not in status '{expected}'")]
    InvalidTransition { job_id: i64, expected: &'static str },

    #[error("stored value is corrupt: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::Backend(e.to_string())
    }
}

/// Guardian lookup or notification hand-off failure. Logged, never fails a job.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DispatchError {
    #[error("guardian lookup failed: {0}")]
    GuardianResolution(#[from] StorageError),

    #[error("no guardian contact on file for child {0}")]
    NoGuardian(String),

    #[error("notification delivery failed: {0}")]
    NotificationDelivery(String),

    #[error("notification delivery timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("parsing {path}: {message}")]
    Parse { path: String, message: String },

    #[error("missing environment variable {0}")]
    MissingEnv(&'static str),

    #[error("unsupported AI provider: {0}")]
    UnsupportedProvider(String),

    #[error("invalid value for {field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_error_kinds_are_stable_metric_labels() {
        assert_eq!(ScoreError::Backend(AiError::Empty).kind(), "backend");
        assert_eq!(
            ScoreError::Timeout(Duration::from_millis(5)).kind(),
            "timeout"
        );
        assert_eq!(
            ScoreError::from(MalformedScoreResponse::new("x")).kind(),
            "malformed"
        );
    }

    #[test]
    fn malformed_message_names_the_reason() {
        let e = ScoreError::from(MalformedScoreResponse::new("missing field urgency_score"));
        assert_eq!(
            e.to_string(),
            "malformed score response: missing field urgency_score"
        );
    }
}
