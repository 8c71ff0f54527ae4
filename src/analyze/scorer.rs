//! Multi-axis risk scoring for messages the pre-filter let through.
//!
//! A partial response is a failure, never a best-effort pass: a missing
//! `self_harm_risk_score` must not read as 0.0 and suppress an alert.
//! No retries here; the queue owns retry policy.

use std::time::Duration;

use metrics::counter;
use serde_json::{Map, Value};
use tracing::warn;

use super::ai_adapter::{AiTask, DynAiClient};
use crate::error::{MalformedScoreResponse, ScoreError};
use crate::model::RiskScores;
use crate::telemetry::anon_hash;

#[derive(Clone)]
pub struct RiskScorer {
    ai: DynAiClient,
    timeout: Duration,
}

impl RiskScorer {
    pub fn new(ai: DynAiClient, timeout: Duration) -> Self {
        Self { ai, timeout }
    }

    pub async fn score(&self, text: &str) -> Result<RiskScores, ScoreError> {
        let outcome = match tokio::time::timeout(
            self.timeout,
            self.ai.complete_json(AiTask::Score, text),
        )
        .await
        {
            Err(_) => Err(ScoreError::Timeout(self.timeout)),
            Ok(Err(e)) => Err(ScoreError::Backend(e)),
            Ok(Ok(raw)) => parse_scores(&raw).map_err(ScoreError::from),
        };

        if let Err(e) = &outcome {
            counter!("scorer_failures_total", "kind" => e.kind()).increment(1);
            warn!(
                target: "scorer",
                id = %anon_hash(text),
                provider = self.ai.provider_name(),
                error = %e,
                "risk scoring failed"
            );
        }
        outcome
    }
}

/// Validate and coerce a raw response into the five-axis record.
///
/// Numbers and numeric strings are accepted; anything missing, non-numeric,
/// non-finite, or outside `[0.0, 1.0]` is rejected.
pub fn parse_scores(raw: &Value) -> Result<RiskScores, MalformedScoreResponse> {
    let obj = unwrap_scores_object(raw)?;
    let field = |name: &str| -> Result<f64, MalformedScoreResponse> {
        let v = obj
            .get(name)
            .ok_or_else(|| MalformedScoreResponse::new(format!("missing field {name}")))?;
        let n = match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .ok_or_else(|| MalformedScoreResponse::new(format!("{name} is not a number: {v}")))?;
        if !n.is_finite() || !(0.0..=1.0).contains(&n) {
            return Err(MalformedScoreResponse::new(format!(
                "{name} = {n} is outside 0.0..=1.0"
            )));
        }
        Ok(n)
    };

    Ok(RiskScores {
        depression_score: field("depression_score")?,
        anxiety_score: field("anxiety_score")?,
        self_harm_risk_score: field("self_harm_risk_score")?,
        isolation_score: field("isolation_score")?,
        urgency_score: field("urgency_score")?,
    })
}

// Tolerate a single wrapper object such as `{"scores": {...}}`.
fn unwrap_scores_object(raw: &Value) -> Result<&Map<String, Value>, MalformedScoreResponse> {
    let obj = raw
        .as_object()
        .ok_or_else(|| MalformedScoreResponse::new("response is not a JSON object"))?;
    if obj.contains_key("self_harm_risk_score") {
        return Ok(obj);
    }
    match obj.get("scores").and_then(Value::as_object) {
        Some(inner) => Ok(inner),
        None => Ok(obj),
    }
}
