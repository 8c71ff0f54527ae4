// src/alert/mod.rs
//! Alert decision and guardian notification hand-off.
//!
//! `Scored -> NoAlert | AlertPending -> AlertSent | AlertFailed`. Nothing in
//! here can fail the analysis job: every error ends as a logged
//! [`AlertOutcome`].

pub mod cooldown;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use tracing::{info, warn};

use crate::config::AlertSettings;
use crate::error::DispatchError;
use crate::model::{AlertNotification, RiskScoreRecord, RiskScores};
use crate::notify::Notifier;
use crate::store::GuardianResolver;

pub use cooldown::AlertCooldown;

pub const ADVISORY_SUMMARY: &str = "Recent conversations suggest your child may benefit from a \
     check-in. These scores are an automated indication, not a diagnosis.";

/// Threshold rule on the two governing axes. Inclusive on both.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertPolicy {
    pub self_harm_threshold: f64,
    pub urgency_threshold: f64,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            self_harm_threshold: crate::config::analysis::DEFAULT_ALERT_THRESHOLD,
            urgency_threshold: crate::config::analysis::DEFAULT_ALERT_THRESHOLD,
        }
    }
}

impl AlertPolicy {
    pub fn from_settings(s: &AlertSettings) -> Self {
        Self {
            self_harm_threshold: s.self_harm_threshold,
            urgency_threshold: s.urgency_threshold,
        }
    }

    pub fn triggered_by(&self, scores: &RiskScores) -> Vec<&'static str> {
        let mut out = Vec::new();
        if scores.self_harm_risk_score >= self.self_harm_threshold {
            out.push("self_harm_risk_score");
        }
        if scores.urgency_score >= self.urgency_threshold {
            out.push("urgency_score");
        }
        out
    }

    pub fn is_triggered(&self, scores: &RiskScores) -> bool {
        !self.triggered_by(scores).is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertOutcome {
    NoAlert,
    Sent,
    SuppressedByCooldown,
    SkippedNoGuardian,
    GuardianLookupFailed,
    DeliveryFailed,
}

impl AlertOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertOutcome::NoAlert => "no_alert",
            AlertOutcome::Sent => "sent",
            AlertOutcome::SuppressedByCooldown => "suppressed",
            AlertOutcome::SkippedNoGuardian => "no_guardian",
            AlertOutcome::GuardianLookupFailed => "lookup_failed",
            AlertOutcome::DeliveryFailed => "delivery_failed",
        }
    }

    /// Whether this dispatch is final for its record. Lookup and delivery
    /// failures leave the alert open for a later rerun of the same message.
    pub fn is_settled(self) -> bool {
        !matches!(
            self,
            AlertOutcome::GuardianLookupFailed | AlertOutcome::DeliveryFailed
        )
    }
}

pub struct AlertDispatcher {
    policy: AlertPolicy,
    guardians: Arc<dyn GuardianResolver>,
    notifier: Arc<dyn Notifier>,
    cooldown: AlertCooldown,
    delivery_timeout: Duration,
}

impl AlertDispatcher {
    pub fn new(
        settings: &AlertSettings,
        guardians: Arc<dyn GuardianResolver>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            policy: AlertPolicy::from_settings(settings),
            guardians,
            notifier,
            cooldown: AlertCooldown::new(settings.cooldown_secs),
            delivery_timeout: settings.delivery_timeout(),
        }
    }

    pub fn policy(&self) -> &AlertPolicy {
        &self.policy
    }

    /// Guardian-facing payload. Built from scores only.
    pub fn build_notification(&self, record: &RiskScoreRecord) -> AlertNotification {
        AlertNotification {
            child_id: record.child_id.clone(),
            conversation_id: record.conversation_id,
            scores: record.scores,
            triggered_by: self.policy.triggered_by(&record.scores),
            summary: ADVISORY_SUMMARY.to_string(),
            analyzed_at: record.analyzed_at,
        }
    }

    /// Evaluate and, if needed, notify. Never errors; the outcome is logged and counted.
    pub async fn dispatch(&self, record: &RiskScoreRecord) -> AlertOutcome {
        let outcome = match self.try_dispatch_at(record, Utc::now()).await {
            Ok(o) => o,
            Err(DispatchError::NoGuardian(child)) => {
                info!(target: "alert", child_id = %child, conversation_id = record.conversation_id, "no guardian contact; notification skipped");
                AlertOutcome::SkippedNoGuardian
            }
            Err(e @ DispatchError::GuardianResolution(_)) => {
                warn!(target: "alert", child_id = %record.child_id, error = %e, "guardian lookup failed");
                AlertOutcome::GuardianLookupFailed
            }
            Err(e) => {
                warn!(target: "alert", child_id = %record.child_id, conversation_id = record.conversation_id, error = %e, "guardian notification failed");
                AlertOutcome::DeliveryFailed
            }
        };
        if outcome != AlertOutcome::NoAlert {
            counter!("alerts_total", "outcome" => outcome.as_str()).increment(1);
        }
        outcome
    }

    pub async fn try_dispatch_at(
        &self,
        record: &RiskScoreRecord,
        now: DateTime<Utc>,
    ) -> Result<AlertOutcome, DispatchError> {
        if !self.policy.is_triggered(&record.scores) {
            return Ok(AlertOutcome::NoAlert);
        }
        if !self.cooldown.try_reserve(&record.child_id, now) {
            info!(target: "alert", child_id = %record.child_id, conversation_id = record.conversation_id, "alert suppressed by cooldown");
            return Ok(AlertOutcome::SuppressedByCooldown);
        }

        let result = self.deliver(record).await;
        if result.is_err() {
            self.cooldown.release(&record.child_id, now);
        }
        result
    }

    async fn deliver(&self, record: &RiskScoreRecord) -> Result<AlertOutcome, DispatchError> {
        let contact = self
            .guardians
            .guardian_contact(&record.child_id)
            .await?
            .ok_or_else(|| DispatchError::NoGuardian(record.child_id.clone()))?;

        let alert = self.build_notification(record);
        match tokio::time::timeout(self.delivery_timeout, self.notifier.send(&contact, &alert)).await
        {
            Ok(Ok(())) => {
                info!(target: "alert", child_id = %record.child_id, conversation_id = record.conversation_id, triggered_by = ?alert.triggered_by, "guardian notified");
                Ok(AlertOutcome::Sent)
            }
            Ok(Err(e)) => Err(DispatchError::NotificationDelivery(format!("{e:#}"))),
            Err(_) => Err(DispatchError::Timeout(self.delivery_timeout)),
        }
    }
}
