// src/notify/mod.rs
//! Guardian notification channels and the fan-out multiplexer.

pub mod email;
pub mod webhook;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use futures::future::join_all;
use tracing::{info, warn};

use crate::config::NotifySettings;
use crate::model::AlertNotification;

pub use email::EmailNotifier;
pub use webhook::WebhookNotifier;

/// One delivery route to a guardian. Implementations must not put anything
/// but the `AlertNotification` fields on the wire.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;
    async fn send(&self, contact: &str, alert: &AlertNotification) -> Result<()>;
}

/// Sends to every configured channel. Succeeds when at least one channel did.
#[derive(Clone, Default)]
pub struct NotifierMux {
    channels: Vec<Arc<dyn Notifier>>,
}

impl NotifierMux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(mut self, channel: Arc<dyn Notifier>) -> Self {
        self.channels.push(channel);
        self
    }

    /// Webhook when a URL is configured, email when enabled and SMTP env is present.
    /// `delivery_budget` bounds one full webhook send including its retries.
    pub fn from_settings(settings: &NotifySettings, bearer: &str, delivery_budget: Duration) -> Self {
        let mut mux = Self::new();
        if let Some(url) = settings.webhook_url.as_deref() {
            let hook = WebhookNotifier::new(url.to_string())
                .with_bearer(bearer)
                .with_retries(settings.webhook_retries)
                .within_budget(delivery_budget);
            mux = mux.with_channel(Arc::new(hook));
        }
        if settings.email_enabled {
            match EmailNotifier::from_env() {
                Ok(mailer) => mux = mux.with_channel(Arc::new(mailer)),
                Err(e) => warn!(target: "notify", error = %e, "email channel disabled"),
            }
        }
        info!(target: "notify", channels = mux.len(), "notification channels ready");
        mux
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }
}

#[async_trait::async_trait]
impl Notifier for NotifierMux {
    fn name(&self) -> &'static str {
        "mux"
    }

    async fn send(&self, contact: &str, alert: &AlertNotification) -> Result<()> {
        if self.channels.is_empty() {
            return Err(anyhow!("no notification channel configured"));
        }
        let results = join_all(self.channels.iter().map(|c| async move {
            (c.name(), c.send(contact, alert).await)
        }))
        .await;

        let mut delivered = 0usize;
        let mut last_err = None;
        for (name, res) in results {
            match res {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(target: "notify", channel = name, child_id = %alert.child_id, error = %e, "channel delivery failed");
                    last_err = Some(e);
                }
            }
        }
        match (delivered, last_err) {
            (0, Some(e)) => Err(e.context("all notification channels failed")),
            _ => Ok(()),
        }
    }
}
