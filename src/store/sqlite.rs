//! SQLite implementation of every storage seam.
//!
//! All statements run on tokio-rusqlite's single background thread, so each
//! `call` is serialized. Status transitions and counter bumps are still single
//! conditional statements so they stay correct against other processes
//! sharing the file.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension};
use tokio_rusqlite::Connection;
use tracing::info;

use super::{schema, AnalysisRecordStore, GuardianResolver, JobQueue, MessageSource};
use crate::error::StorageError;
use crate::model::{
    AnalysisJob, JobStatus, MessageRole, RiskScoreRecord, RiskScores, SaveOutcome, SourceMessage,
    TopicMention,
};

const JOB_COLUMNS: &str = "id, conversation_id, status, attempts, note, error_message, \
                           created_at, claimed_at, processed_at";

/// Handle owned by the process entry point and injected into components.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Connection,
}

fn map_call_err(e: tokio_rusqlite::Error<StorageError>) -> StorageError {
    match e {
        tokio_rusqlite::Error::Error(inner) => inner,
        tokio_rusqlite::Error::ConnectionClosed => StorageError::ConnectionClosed,
        other => StorageError::Backend(other.to_string()),
    }
}

pub(crate) fn ts(dt: DateTime<Utc>) -> String {
    // Fixed width, so lexicographic order == time order inside SQL.
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("timestamp {s:?}: {e}")))
}

fn parse_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>, StorageError> {
    s.as_deref().map(parse_ts).transpose()
}

struct RawJob {
    id: i64,
    conversation_id: i64,
    status: String,
    attempts: i64,
    note: Option<String>,
    error_message: Option<String>,
    created_at: String,
    claimed_at: Option<String>,
    processed_at: Option<String>,
}

impl RawJob {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            status: row.get(2)?,
            attempts: row.get(3)?,
            note: row.get(4)?,
            error_message: row.get(5)?,
            created_at: row.get(6)?,
            claimed_at: row.get(7)?,
            processed_at: row.get(8)?,
        })
    }

    fn into_job(self) -> Result<AnalysisJob, StorageError> {
        Ok(AnalysisJob {
            id: self.id,
            message_id: self.conversation_id,
            status: JobStatus::parse(&self.status)?,
            attempts: u32::try_from(self.attempts.max(0)).unwrap_or(u32::MAX),
            note: self.note,
            error_message: self.error_message,
            created_at: parse_ts(&self.created_at)?,
            claimed_at: parse_opt_ts(self.claimed_at)?,
            processed_at: parse_opt_ts(self.processed_at)?,
        })
    }
}

// Timestamp column parsed in place so row mappers can build whole records.
fn ts_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn record_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RiskScoreRecord> {
    Ok(RiskScoreRecord {
        child_id: row.get(0)?,
        conversation_id: row.get(1)?,
        scores: RiskScores {
            depression_score: row.get(2)?,
            anxiety_score: row.get(3)?,
            self_harm_risk_score: row.get(4)?,
            isolation_score: row.get(5)?,
            urgency_score: row.get(6)?,
        },
        is_alert_triggered: row.get(7)?,
        analyzed_at: ts_column(row, 8)?,
    })
}

impl SqliteStore {
    pub async fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StorageError::Backend(format!("create {}: {e}", parent.display())))?;
            }
        }
        let conn = Connection::open(path)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let store = Self { conn };
        store.init_schema(true).await?;
        info!(target: "store", path = %path.display(), "analysis store opened");
        Ok(store)
    }

    pub async fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let store = Self { conn };
        store.init_schema(false).await?;
        Ok(store)
    }

    async fn init_schema(&self, wal: bool) -> Result<(), StorageError> {
        self.conn
            .call(move |conn| -> Result<(), StorageError> {
                if wal {
                    // journal_mode answers with a row, so it cannot go through execute_batch
                    conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
                }
                conn.pragma_update(None, "foreign_keys", "ON")?;
                conn.busy_timeout(Duration::from_secs(5))?;
                conn.execute_batch(schema::SQL)?;
                Ok(())
            })
            .await
            .map_err(map_call_err)
    }

    pub async fn close(self) -> Result<(), StorageError> {
        self.conn
            .close()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))
    }

    // --- chat-side writes (the pipeline never calls these) ---

    pub async fn insert_guardian(&self, id: &str, email: Option<&str>) -> Result<(), StorageError> {
        let (id, email) = (id.to_string(), email.map(str::to_string));
        self.conn
            .call(move |conn| -> Result<(), StorageError> {
                conn.execute(
                    "INSERT INTO guardians (id, email) VALUES (?1, ?2)",
                    params![id, email],
                )?;
                Ok(())
            })
            .await
            .map_err(map_call_err)
    }

    pub async fn insert_child(
        &self,
        id: &str,
        nickname: Option<&str>,
        guardian_id: Option<&str>,
    ) -> Result<(), StorageError> {
        let (id, nickname, guardian_id) = (
            id.to_string(),
            nickname.map(str::to_string),
            guardian_id.map(str::to_string),
        );
        let now = ts(Utc::now());
        self.conn
            .call(move |conn| -> Result<(), StorageError> {
                conn.execute(
                    "INSERT INTO children (id, nickname, managed_by_guardian_id, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![id, nickname, guardian_id, now],
                )?;
                Ok(())
            })
            .await
            .map_err(map_call_err)
    }

    /// Store a chat message; returns its id.
    pub async fn insert_message(
        &self,
        child_id: &str,
        role: MessageRole,
        content: &str,
    ) -> Result<i64, StorageError> {
        let (child_id, content) = (child_id.to_string(), content.to_string());
        let now = ts(Utc::now());
        self.conn
            .call(move |conn| -> Result<i64, StorageError> {
                conn.execute(
                    "INSERT INTO conversations (child_id, role, content, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![child_id, role.as_str(), content, now],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(map_call_err)
    }

    /// Number of score rows for a message; used by operators and tests.
    pub async fn count_records_for_message(&self, message_id: i64) -> Result<i64, StorageError> {
        self.conn
            .call(move |conn| -> Result<i64, StorageError> {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM mental_health_scores WHERE conversation_id = ?1",
                    params![message_id],
                    |row| row.get(0),
                )?)
            })
            .await
            .map_err(map_call_err)
    }

    async fn transition(
        &self,
        job_id: i64,
        to: JobStatus,
        note: Option<String>,
        error_message: Option<String>,
    ) -> Result<(), StorageError> {
        let now = ts(Utc::now());
        self.conn
            .call(move |conn| -> Result<(), StorageError> {
                let changed = conn.execute(
                    "UPDATE analysis_queue
                     SET status = ?1, processed_at = ?2, note = ?3, error_message = ?4
                     WHERE id = ?5 AND status = 'processing'",
                    params![to.as_str(), now, note, error_message, job_id],
                )?;
                if changed == 0 {
                    return Err(StorageError::InvalidTransition {
                        job_id,
                        expected: JobStatus::Processing.as_str(),
                    });
                }
                Ok(())
            })
            .await
            .map_err(map_call_err)
    }
}

#[async_trait]
impl JobQueue for SqliteStore {
    async fn enqueue(&self, message_id: i64) -> Result<AnalysisJob, StorageError> {
        let now = Utc::now();
        let created = ts(now);
        let id = self
            .conn
            .call(move |conn| -> Result<i64, StorageError> {
                conn.execute(
                    "INSERT INTO analysis_queue (conversation_id, status, created_at)
                     VALUES (?1, 'pending', ?2)",
                    params![message_id, created],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(map_call_err)?;
        Ok(AnalysisJob {
            id,
            message_id,
            status: JobStatus::Pending,
            attempts: 0,
            note: None,
            error_message: None,
            // same millisecond precision as the stored column
            created_at: parse_ts(&ts(now))?,
            claimed_at: None,
            processed_at: None,
        })
    }

    async fn fetch_pending(&self, limit: usize) -> Result<Vec<AnalysisJob>, StorageError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.conn
            .call(move |conn| -> Result<Vec<AnalysisJob>, StorageError> {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {JOB_COLUMNS} FROM analysis_queue
                     WHERE status = 'pending' ORDER BY id ASC LIMIT ?1"
                ))?;
                let raws = stmt
                    .query_map(params![limit], RawJob::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                raws.into_iter().map(RawJob::into_job).collect()
            })
            .await
            .map_err(map_call_err)
    }

    async fn claim(&self, job_id: i64) -> Result<bool, StorageError> {
        let now = ts(Utc::now());
        self.conn
            .call(move |conn| -> Result<bool, StorageError> {
                let changed = conn.execute(
                    "UPDATE analysis_queue
                     SET status = 'processing', claimed_at = ?1, attempts = attempts + 1
                     WHERE id = ?2 AND status = 'pending'",
                    params![now, job_id],
                )?;
                Ok(changed == 1)
            })
            .await
            .map_err(map_call_err)
    }

    async fn complete(&self, job_id: i64, note: Option<&str>) -> Result<(), StorageError> {
        self.transition(job_id, JobStatus::Completed, note.map(str::to_string), None)
            .await
    }

    async fn fail(&self, job_id: i64, reason: &str) -> Result<(), StorageError> {
        self.transition(job_id, JobStatus::Failed, None, Some(reason.to_string()))
            .await
    }

    async fn requeue_failed(
        &self,
        older_than: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<usize, StorageError> {
        let cutoff = ts(older_than);
        self.conn
            .call(move |conn| -> Result<usize, StorageError> {
                Ok(conn.execute(
                    "UPDATE analysis_queue
                     SET status = 'pending', claimed_at = NULL, processed_at = NULL
                     WHERE status = 'failed' AND processed_at <= ?1 AND attempts < ?2",
                    params![cutoff, max_attempts],
                )?)
            })
            .await
            .map_err(map_call_err)
    }

    async fn reclaim_stale(&self, claimed_before: DateTime<Utc>) -> Result<usize, StorageError> {
        let cutoff = ts(claimed_before);
        self.conn
            .call(move |conn| -> Result<usize, StorageError> {
                Ok(conn.execute(
                    "UPDATE analysis_queue
                     SET status = 'pending', claimed_at = NULL
                     WHERE status = 'processing' AND claimed_at <= ?1",
                    params![cutoff],
                )?)
            })
            .await
            .map_err(map_call_err)
    }

    async fn job(&self, job_id: i64) -> Result<Option<AnalysisJob>, StorageError> {
        self.conn
            .call(move |conn| -> Result<Option<AnalysisJob>, StorageError> {
                let raw = conn
                    .query_row(
                        &format!("SELECT {JOB_COLUMNS} FROM analysis_queue WHERE id = ?1"),
                        params![job_id],
                        RawJob::from_row,
                    )
                    .optional()?;
                raw.map(RawJob::into_job).transpose()
            })
            .await
            .map_err(map_call_err)
    }
}

#[async_trait]
impl MessageSource for SqliteStore {
    async fn message(&self, message_id: i64) -> Result<Option<SourceMessage>, StorageError> {
        self.conn
            .call(move |conn| -> Result<Option<SourceMessage>, StorageError> {
                let raw: Option<(i64, String, String, String)> = conn
                    .query_row(
                        "SELECT id, child_id, role, content FROM conversations WHERE id = ?1",
                        params![message_id],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                    )
                    .optional()?;
                raw.map(|(id, child_id, role, content)| {
                    Ok(SourceMessage {
                        id,
                        child_id,
                        role: MessageRole::parse(&role)?,
                        content,
                    })
                })
                .transpose()
            })
            .await
            .map_err(map_call_err)
    }
}

#[async_trait]
impl AnalysisRecordStore for SqliteStore {
    async fn save(&self, record: &RiskScoreRecord) -> Result<SaveOutcome, StorageError> {
        let r = record.clone();
        let analyzed_at = ts(r.analyzed_at);
        self.conn
            .call(move |conn| -> Result<SaveOutcome, StorageError> {
                let changed = conn.execute(
                    "INSERT INTO mental_health_scores
                       (child_id, conversation_id, depression_score, anxiety_score,
                        self_harm_risk_score, isolation_score, urgency_score,
                        is_alert_triggered, analyzed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                     ON CONFLICT (child_id, conversation_id) DO NOTHING",
                    params![
                        r.child_id,
                        r.conversation_id,
                        r.scores.depression_score,
                        r.scores.anxiety_score,
                        r.scores.self_harm_risk_score,
                        r.scores.isolation_score,
                        r.scores.urgency_score,
                        r.is_alert_triggered,
                        analyzed_at,
                    ],
                )?;
                Ok(if changed == 1 {
                    SaveOutcome::Inserted
                } else {
                    SaveOutcome::AlreadyAnalyzed
                })
            })
            .await
            .map_err(map_call_err)
    }

    async fn increment_topic_mention(
        &self,
        child_id: &str,
        topic: &str,
    ) -> Result<(), StorageError> {
        let (child_id, topic) = (child_id.to_string(), topic.to_string());
        let now = ts(Utc::now());
        self.conn
            .call(move |conn| -> Result<(), StorageError> {
                conn.execute(
                    "INSERT INTO child_topic_trends (child_id, topic, mention_count, last_mentioned_at)
                     VALUES (?1, ?2, 1, ?3)
                     ON CONFLICT (child_id, topic) DO UPDATE SET
                       mention_count = mention_count + 1,
                       last_mentioned_at = excluded.last_mentioned_at",
                    params![child_id, topic, now],
                )?;
                Ok(())
            })
            .await
            .map_err(map_call_err)
    }

    async fn claim_topic_tally(&self, message_id: i64) -> Result<bool, StorageError> {
        let now = ts(Utc::now());
        self.conn
            .call(move |conn| -> Result<bool, StorageError> {
                let changed = conn.execute(
                    "INSERT INTO topic_tallies (conversation_id, tallied_at) VALUES (?1, ?2)
                     ON CONFLICT (conversation_id) DO NOTHING",
                    params![message_id, now],
                )?;
                Ok(changed == 1)
            })
            .await
            .map_err(map_call_err)
    }

    async fn pending_alert(
        &self,
        child_id: &str,
        message_id: i64,
    ) -> Result<Option<RiskScoreRecord>, StorageError> {
        let child_id = child_id.to_string();
        self.conn
            .call(move |conn| -> Result<Option<RiskScoreRecord>, StorageError> {
                Ok(conn
                    .query_row(
                        "SELECT child_id, conversation_id, depression_score, anxiety_score,
                                self_harm_risk_score, isolation_score, urgency_score,
                                is_alert_triggered, analyzed_at
                         FROM mental_health_scores
                         WHERE child_id = ?1 AND conversation_id = ?2
                           AND is_alert_triggered = 1 AND alert_dispatched_at IS NULL",
                        params![child_id, message_id],
                        record_from_row,
                    )
                    .optional()?)
            })
            .await
            .map_err(map_call_err)
    }

    async fn mark_alert_dispatched(
        &self,
        child_id: &str,
        message_id: i64,
    ) -> Result<(), StorageError> {
        let child_id = child_id.to_string();
        let now = ts(Utc::now());
        self.conn
            .call(move |conn| -> Result<(), StorageError> {
                conn.execute(
                    "UPDATE mental_health_scores SET alert_dispatched_at = ?3
                     WHERE child_id = ?1 AND conversation_id = ?2 AND alert_dispatched_at IS NULL",
                    params![child_id, message_id, now],
                )?;
                Ok(())
            })
            .await
            .map_err(map_call_err)
    }

    async fn latest_record(
        &self,
        child_id: &str,
    ) -> Result<Option<RiskScoreRecord>, StorageError> {
        let child_id = child_id.to_string();
        self.conn
            .call(move |conn| -> Result<Option<RiskScoreRecord>, StorageError> {
                Ok(conn
                    .query_row(
                        "SELECT child_id, conversation_id, depression_score, anxiety_score,
                                self_harm_risk_score, isolation_score, urgency_score,
                                is_alert_triggered, analyzed_at
                         FROM mental_health_scores
                         WHERE child_id = ?1
                         ORDER BY analyzed_at DESC, id DESC
                         LIMIT 1",
                        params![child_id],
                        record_from_row,
                    )
                    .optional()?)
            })
            .await
            .map_err(map_call_err)
    }

    async fn top_topics(
        &self,
        child_id: &str,
        limit: usize,
    ) -> Result<Vec<TopicMention>, StorageError> {
        let child_id = child_id.to_string();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.conn
            .call(move |conn| -> Result<Vec<TopicMention>, StorageError> {
                let mut stmt = conn.prepare(
                    "SELECT child_id, topic, mention_count, last_mentioned_at
                     FROM child_topic_trends
                     WHERE child_id = ?1
                     ORDER BY mention_count DESC, topic ASC
                     LIMIT ?2",
                )?;
                let topics = stmt
                    .query_map(params![child_id, limit], |row| {
                        let count: i64 = row.get(2)?;
                        Ok(TopicMention {
                            child_id: row.get(0)?,
                            topic: row.get(1)?,
                            mention_count: u64::try_from(count).unwrap_or(0),
                            last_mentioned_at: ts_column(row, 3)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(topics)
            })
            .await
            .map_err(map_call_err)
    }
}

#[async_trait]
impl GuardianResolver for SqliteStore {
    async fn guardian_contact(&self, child_id: &str) -> Result<Option<String>, StorageError> {
        let child_id = child_id.to_string();
        self.conn
            .call(move |conn| -> Result<Option<String>, StorageError> {
                let email: Option<Option<String>> = conn
                    .query_row(
                        "SELECT g.email
                         FROM children c
                         LEFT JOIN guardians g ON g.id = c.managed_by_guardian_id
                         WHERE c.id = ?1",
                        params![child_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(email
                    .flatten()
                    .map(|e| e.trim().to_string())
                    .filter(|e| !e.is_empty()))
            })
            .await
            .map_err(map_call_err)
    }
}
