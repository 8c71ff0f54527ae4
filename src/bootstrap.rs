// src/bootstrap.rs
//! Process wiring: one store handle, one AI client, one notifier, injected
//! into every component.

use std::sync::Arc;

use tracing::{info, warn};

use crate::alert::AlertDispatcher;
use crate::analyze::{
    build_client_from_config, ContentClassifier, DynAiClient, RiskScorer, TopicExtractor,
};
use crate::api::{AppState, BearerAuth};
use crate::config::{AiConfig, AnalysisSettings};
use crate::notify::{Notifier, NotifierMux};
use crate::store::SqliteStore;
use crate::worker::{AnalysisWorker, WorkerDeps};

pub struct AnalysisRuntime {
    pub settings: AnalysisSettings,
    pub store: SqliteStore,
    pub worker: Arc<AnalysisWorker>,
}

impl AnalysisRuntime {
    /// Load config files + env, open the database and build the AI client
    /// and notification channels.
    pub async fn from_env() -> anyhow::Result<Self> {
        let settings = AnalysisSettings::load_default()?;
        let ai_cfg = AiConfig::load_default()?;
        // only provider + enabled + key length, never the key
        info!(
            provider = %ai_cfg.provider,
            enabled = ai_cfg.enabled,
            key_len = ai_cfg.api_key.len(),
            "AI config loaded"
        );
        let ai = build_client_from_config(&ai_cfg)?;

        if settings.webhook_secret.is_empty() {
            warn!("ANALYSIS_WEBHOOK_SECRET is empty; every protected request will be rejected");
        }

        let store = SqliteStore::open(&settings.storage.database_path).await?;
        let notifier = NotifierMux::from_settings(
            &settings.notify,
            &settings.webhook_secret,
            settings.alert.delivery_timeout(),
        );
        if notifier.is_empty() {
            warn!(target: "notify", "no notification channel configured; alerts will be logged as undelivered");
        }

        Ok(Self::assemble(settings, store, ai, Arc::new(notifier)))
    }

    /// Wire already-built collaborators. Tests use this with doubles.
    pub fn assemble(
        settings: AnalysisSettings,
        store: SqliteStore,
        ai: DynAiClient,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let shared = Arc::new(store.clone());
        let timeout = settings.worker.call_timeout();

        let topics = settings.topics.enabled.then(|| {
            TopicExtractor::new(ai.clone(), timeout, settings.topics.max_per_message)
        });
        let dispatcher = Arc::new(AlertDispatcher::new(
            &settings.alert,
            shared.clone(),
            notifier,
        ));
        let deps = WorkerDeps {
            queue: shared.clone(),
            messages: shared.clone(),
            records: shared,
            classifier: ContentClassifier::new(ai.clone(), timeout),
            scorer: RiskScorer::new(ai, timeout),
            topics,
            dispatcher,
        };
        let worker = Arc::new(AnalysisWorker::new(deps, settings.worker.clone()));

        Self {
            settings,
            store,
            worker,
        }
    }

    pub fn app_state(&self) -> AppState {
        let shared = Arc::new(self.store.clone());
        AppState {
            worker: self.worker.clone(),
            queue: shared.clone(),
            messages: shared.clone(),
            records: shared,
            auth: BearerAuth::new(&self.settings.webhook_secret),
        }
    }
}
