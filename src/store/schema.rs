//! SQLite schema. Applied idempotently on open.
//!
//! `children`, `guardians` and `conversations` belong to the chat side; the
//! analysis pipeline only reads them.

pub(super) const SQL: &str = r#"
CREATE TABLE IF NOT EXISTS guardians (
  id TEXT PRIMARY KEY,
  email TEXT
);

CREATE TABLE IF NOT EXISTS children (
  id TEXT PRIMARY KEY,
  nickname TEXT,
  managed_by_guardian_id TEXT REFERENCES guardians(id),
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS conversations (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  child_id TEXT NOT NULL,
  role TEXT NOT NULL,
  content TEXT NOT NULL,
  emotion TEXT,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS analysis_queue (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  conversation_id INTEGER NOT NULL,
  status TEXT NOT NULL DEFAULT 'pending'
    CHECK (status IN ('pending', 'processing', 'completed', 'failed')),
  attempts INTEGER NOT NULL DEFAULT 0,
  note TEXT,
  error_message TEXT,
  created_at TEXT NOT NULL,
  claimed_at TEXT,
  processed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_analysis_queue_status
  ON analysis_queue (status, id);

CREATE TABLE IF NOT EXISTS mental_health_scores (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  child_id TEXT NOT NULL,
  conversation_id INTEGER NOT NULL,
  depression_score REAL NOT NULL,
  anxiety_score REAL NOT NULL,
  self_harm_risk_score REAL NOT NULL,
  isolation_score REAL NOT NULL,
  urgency_score REAL NOT NULL,
  is_alert_triggered INTEGER NOT NULL,
  analyzed_at TEXT NOT NULL,
  alert_dispatched_at TEXT,
  UNIQUE (child_id, conversation_id)
);

CREATE INDEX IF NOT EXISTS idx_scores_child_time
  ON mental_health_scores (child_id, analyzed_at);

-- one row per message whose topics were added to child_topic_trends
CREATE TABLE IF NOT EXISTS topic_tallies (
  conversation_id INTEGER PRIMARY KEY,
  tallied_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS child_topic_trends (
  child_id TEXT NOT NULL,
  topic TEXT NOT NULL,
  mention_count INTEGER NOT NULL DEFAULT 0,
  last_mentioned_at TEXT NOT NULL,
  PRIMARY KEY (child_id, topic)
);
"#;
