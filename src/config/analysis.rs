// src/config/analysis.rs
//! Pipeline settings from `config/analysis.toml` plus env overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use crate::error::ConfigError;

// --- env defaults & names ---
pub const DEFAULT_ANALYSIS_CONFIG_PATH: &str = "config/analysis.toml";
pub const DEFAULT_ALERT_THRESHOLD: f64 = 0.8;

pub const ENV_ANALYSIS_CONFIG_PATH: &str = "ANALYSIS_CONFIG_PATH";
pub const ENV_BATCH_SIZE: &str = "ANALYSIS_BATCH_SIZE";
pub const ENV_ALERT_THRESHOLD: &str = "ANALYSIS_ALERT_THRESHOLD";
pub const ENV_DATABASE_PATH: &str = "ANALYSIS_DATABASE_PATH";
pub const ENV_WEBHOOK_SECRET: &str = "ANALYSIS_WEBHOOK_SECRET";
pub const ENV_NOTIFY_WEBHOOK_URL: &str = "NOTIFY_WEBHOOK_URL";

const MAX_BATCH_SIZE: usize = 50;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    pub worker: WorkerSettings,
    pub alert: AlertSettings,
    pub topics: TopicSettings,
    pub storage: StorageSettings,
    pub notify: NotifySettings,
    /// Never read from the file; only from `ANALYSIS_WEBHOOK_SECRET`.
    #[serde(skip)]
    pub webhook_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub batch_size: usize,
    pub call_timeout_ms: u64,
    /// 0 disables the in-process scheduler (external trigger only).
    pub interval_secs: u64,
    pub max_attempts: u32,
    pub requeue_after_secs: u64,
    pub stale_claim_secs: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            batch_size: 5,
            call_timeout_ms: 15_000,
            interval_secs: 0,
            max_attempts: 3,
            requeue_after_secs: 3_600,
            stale_claim_secs: 600,
        }
    }
}

impl WorkerSettings {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertSettings {
    pub self_harm_threshold: f64,
    pub urgency_threshold: f64,
    pub cooldown_secs: i64,
    pub delivery_timeout_ms: u64,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            self_harm_threshold: DEFAULT_ALERT_THRESHOLD,
            urgency_threshold: DEFAULT_ALERT_THRESHOLD,
            cooldown_secs: 900,
            delivery_timeout_ms: 10_000,
        }
    }
}

impl AlertSettings {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TopicSettings {
    pub enabled: bool,
    pub max_per_message: usize,
}

impl Default for TopicSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_per_message: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub database_path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/analysis.db"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotifySettings {
    pub webhook_url: Option<String>,
    pub webhook_retries: u8,
    pub email_enabled: bool,
}

impl Default for NotifySettings {
    fn default() -> Self {
        Self {
            webhook_url: None,
            webhook_retries: 3,
            email_enabled: false,
        }
    }
}

// parse optional float env and clamp to <0.0..=1.0>
fn parse_threshold_env(raw: Option<String>) -> Option<f64> {
    raw.and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .map(|v| v.clamp(0.0, 1.0))
}

impl AnalysisSettings {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let cfg: AnalysisSettings = toml::from_str(s).map_err(|e| ConfigError::Parse {
            path: "<inline>".to_string(),
            message: e.to_string(),
        })?;
        cfg.validated()
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    /// Load using env var + fallbacks:
    /// 1) $ANALYSIS_CONFIG_PATH (must exist)
    /// 2) config/analysis.toml
    /// 3) built-in defaults
    ///
    /// Env overrides are applied last.
    pub fn load_default() -> Result<Self, ConfigError> {
        let mut cfg = match env::var(ENV_ANALYSIS_CONFIG_PATH) {
            Ok(p) => Self::load_from_file(Path::new(&p))?,
            Err(_) => {
                let p = PathBuf::from(DEFAULT_ANALYSIS_CONFIG_PATH);
                if p.exists() {
                    Self::load_from_file(&p)?
                } else {
                    Self::default()
                }
            }
        };
        cfg.apply_env_overrides()?;
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(raw) = env::var(ENV_BATCH_SIZE) {
            self.worker.batch_size = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                field: "worker.batch_size",
                message: format!("{raw:?} is not a positive integer"),
            })?;
        }
        if let Some(t) = parse_threshold_env(env::var(ENV_ALERT_THRESHOLD).ok()) {
            self.alert.self_harm_threshold = t;
            self.alert.urgency_threshold = t;
        }
        if let Ok(p) = env::var(ENV_DATABASE_PATH) {
            self.storage.database_path = PathBuf::from(p);
        }
        if let Ok(url) = env::var(ENV_NOTIFY_WEBHOOK_URL) {
            if !url.trim().is_empty() {
                self.notify.webhook_url = Some(url.trim().to_string());
            }
        }
        self.webhook_secret = env::var(ENV_WEBHOOK_SECRET).unwrap_or_default();

        let validated = std::mem::take(self).validated()?;
        *self = validated;
        Ok(())
    }

    fn validated(mut self) -> Result<Self, ConfigError> {
        if self.worker.batch_size == 0 || self.worker.batch_size > MAX_BATCH_SIZE {
            return Err(ConfigError::Invalid {
                field: "worker.batch_size",
                message: format!("must be within 1..={MAX_BATCH_SIZE}"),
            });
        }
        for (field, v) in [
            ("alert.self_harm_threshold", self.alert.self_harm_threshold),
            ("alert.urgency_threshold", self.alert.urgency_threshold),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(ConfigError::Invalid {
                    field,
                    message: format!("{v} is outside 0.0..=1.0"),
                });
            }
        }
        if self.worker.max_attempts == 0 {
            self.worker.max_attempts = 1;
        }
        self.alert.cooldown_secs = self.alert.cooldown_secs.max(0);
        Ok(self)
    }
}
