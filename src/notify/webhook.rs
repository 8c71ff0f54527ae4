// src/notify/webhook.rs
use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use super::Notifier;
use crate::model::{AlertNotification, RiskScores};

const MIN_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(100);

/// POSTs the alert as JSON to an internal notify endpoint.
#[derive(Clone)]
pub struct WebhookNotifier {
    url: String,
    bearer: Option<String>,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

#[derive(Serialize)]
struct WebhookBody<'a> {
    child_id: &'a str,
    conversation_id: i64,
    guardian_email: &'a str,
    scores: &'a RiskScores,
    triggered_by: &'a [&'static str],
    summary: &'a str,
    analyzed_at: String,
}

impl<'a> WebhookBody<'a> {
    fn new(contact: &'a str, alert: &'a AlertNotification) -> Self {
        Self {
            child_id: &alert.child_id,
            conversation_id: alert.conversation_id,
            guardian_email: contact,
            scores: &alert.scores,
            triggered_by: &alert.triggered_by,
            summary: &alert.summary,
            analyzed_at: alert.analyzed_at.to_rfc3339(),
        }
    }
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        Self {
            url,
            bearer: None,
            client: Client::new(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    /// Empty token means no Authorization header.
    pub fn with_bearer(mut self, token: &str) -> Self {
        self.bearer = Some(token.trim().to_string()).filter(|t| !t.is_empty());
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    /// Fit every attempt plus the backoff between them inside `budget`.
    /// Drops attempts whose backoff alone would not fit.
    pub fn within_budget(mut self, budget: Duration) -> Self {
        while self.max_retries > 1 && Self::total_backoff(self.max_retries) >= budget {
            self.max_retries -= 1;
        }
        let left = budget.saturating_sub(Self::total_backoff(self.max_retries));
        self.timeout = (left / u32::from(self.max_retries)).max(MIN_ATTEMPT_TIMEOUT);
        self
    }

    fn backoff(attempt: u8) -> Duration {
        Duration::from_millis(500u64 << (attempt.saturating_sub(1)).min(6))
    }

    /// Sleep time spent between `attempts` tries.
    fn total_backoff(attempts: u8) -> Duration {
        (1..attempts).map(Self::backoff).sum()
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, contact: &str, alert: &AlertNotification) -> Result<()> {
        let body = WebhookBody::new(contact, alert);

        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let mut req = self.client.post(&self.url).timeout(self.timeout).json(&body);
            if let Some(token) = &self.bearer {
                req = req.bearer_auth(token);
            }

            match req.send().await {
                Ok(rsp) => {
                    if let Err(e) = rsp.error_for_status_ref() {
                        // 4xx other than throttling will not get better on retry
                        let retryable = rsp.status().is_server_error()
                            || rsp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS;
                        if retryable && attempt < self.max_retries {
                            tokio::time::sleep(Self::backoff(attempt)).await;
                            continue;
                        }
                        return Err(anyhow!("notify webhook HTTP error: {e}"));
                    }
                    return Ok(());
                }
                Err(e) => {
                    if attempt < self.max_retries {
                        tokio::time::sleep(Self::backoff(attempt)).await;
                        continue;
                    }
                    return Err(anyhow!("notify webhook request failed: {e}"));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn body_carries_scores_but_no_text_fields() {
        let alert = AlertNotification {
            child_id: "c1".into(),
            conversation_id: 42,
            scores: RiskScores {
                depression_score: 0.1,
                anxiety_score: 0.1,
                self_harm_risk_score: 0.95,
                isolation_score: 0.1,
                urgency_score: 0.9,
            },
            triggered_by: vec!["self_harm_risk_score", "urgency_score"],
            summary: "advisory".into(),
            analyzed_at: Utc::now(),
        };
        let v = serde_json::to_value(WebhookBody::new("p@example.com", &alert)).unwrap();
        assert_eq!(v["conversation_id"], 42);
        assert_eq!(v["scores"]["self_harm_risk_score"], 0.95);
        assert_eq!(v["guardian_email"], "p@example.com");
        let obj = v.as_object().unwrap();
        assert!(!obj.contains_key("message_content"));
        assert!(!obj.contains_key("content"));
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(WebhookNotifier::backoff(1), Duration::from_millis(500));
        assert_eq!(WebhookNotifier::backoff(2), Duration::from_millis(1000));
        assert_eq!(WebhookNotifier::backoff(3), Duration::from_millis(2000));
    }

    #[test]
    fn attempts_and_backoff_fit_the_delivery_budget() {
        for (budget_ms, retries) in [(10_000, 3), (1_000, 3), (2_000, 5), (300, 3)] {
            let budget = Duration::from_millis(budget_ms);
            let n = WebhookNotifier::new("http://localhost".into())
                .with_retries(retries)
                .within_budget(budget);
            let worst = n.timeout * u32::from(n.max_retries)
                + WebhookNotifier::total_backoff(n.max_retries);
            assert!(worst <= budget, "{budget_ms}ms: worst case {worst:?}");
            assert!(n.max_retries >= 1);
        }

        let n = WebhookNotifier::new("http://localhost".into())
            .with_retries(3)
            .within_budget(Duration::from_secs(10));
        assert_eq!(n.max_retries, 3);
        assert_eq!(n.timeout, Duration::from_millis(8_500) / 3);
    }

    #[test]
    fn blank_bearer_is_dropped() {
        let n = WebhookNotifier::new("http://localhost".into()).with_bearer("  ");
        assert!(n.bearer.is_none());
    }
}
