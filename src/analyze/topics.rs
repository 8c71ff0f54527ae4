//! Best-effort topic extraction feeding the per-child topic counters.

use std::collections::BTreeSet;
use std::time::Duration;

use once_cell::sync::OnceCell;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use super::ai_adapter::{AiTask, DynAiClient};
use crate::telemetry::anon_hash;

const MAX_TOPIC_CHARS: usize = 40;

#[derive(Clone)]
pub struct TopicExtractor {
    ai: DynAiClient,
    timeout: Duration,
    max_topics: usize,
}

impl TopicExtractor {
    pub fn new(ai: DynAiClient, timeout: Duration, max_topics: usize) -> Self {
        Self {
            ai,
            timeout,
            max_topics,
        }
    }

    /// Normalised labels; empty on any failure.
    pub async fn extract(&self, text: &str) -> Vec<String> {
        if self.max_topics == 0 {
            return Vec::new();
        }
        let raw =
            match tokio::time::timeout(self.timeout, self.ai.complete_json(AiTask::Topics, text))
                .await
            {
                Ok(Ok(v)) => v,
                Ok(Err(e)) => {
                    debug!(target: "topics", id = %anon_hash(text), error = %e, "topic extraction failed");
                    return Vec::new();
                }
                Err(_) => {
                    debug!(target: "topics", id = %anon_hash(text), "topic extraction timed out");
                    return Vec::new();
                }
            };
        normalize_topics(&raw, self.max_topics)
    }
}

/// Lowercase, collapse whitespace, strip punctuation, dedupe, cap length and count.
pub fn normalize_topics(raw: &Value, max_topics: usize) -> Vec<String> {
    let items = match raw {
        Value::Array(a) => a.as_slice(),
        Value::Object(o) => match o.get("topics") {
            Some(Value::Array(a)) => a.as_slice(),
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    static RE_NOISE: OnceCell<Regex> = OnceCell::new();
    let re_noise = RE_NOISE.get_or_init(|| Regex::new(r"[^\p{L}\p{N}\s\-]+").expect("topic regex"));
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex"));

    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for item in items {
        let Some(s) = item.as_str() else { continue };
        let cleaned = re_noise.replace_all(&s.to_lowercase(), " ").to_string();
        let cleaned = re_ws.replace_all(cleaned.trim(), " ").to_string();
        if cleaned.is_empty() {
            continue;
        }
        let capped: String = cleaned.chars().take(MAX_TOPIC_CHARS).collect();
        let capped = capped.trim_end().to_string();
        if seen.insert(capped.clone()) {
            out.push(capped);
        }
        if out.len() >= max_topics {
            break;
        }
    }
    out
}
