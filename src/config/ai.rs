// src/config/ai.rs
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path};

use crate::error::ConfigError;

pub const DEFAULT_AI_CONFIG_PATH: &str = "config/ai.json";
pub const ENV_AI_CONFIG_PATH: &str = "AI_CONFIG_PATH";

fn default_provider() -> String {
    "gemini".to_string()
}
fn default_classify_model() -> String {
    "gemini-2.5-flash-lite".to_string()
}
fn default_score_model() -> String {
    "gemini-2.5-flash".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    pub enabled: bool,
    /// "gemini" | "openai" (case-insensitive)
    #[serde(default = "default_provider")]
    pub provider: String,
    /// "ENV" means: read from GEMINI_API_KEY / OPENAI_API_KEY (by provider)
    #[serde(default)]
    pub api_key: String,
    /// Cheap model used by the pre-filter and topic extraction.
    #[serde(default = "default_classify_model")]
    pub classify_model: String,
    /// Model used for the five-axis scoring pass.
    #[serde(default = "default_score_model")]
    pub score_model: String,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: default_provider(),
            api_key: String::new(),
            classify_model: default_classify_model(),
            score_model: default_score_model(),
        }
    }
}

impl AiConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().display().to_string();
        let data = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path_str.clone(),
            source,
        })?;
        Self::from_json_str(&data).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path_str,
                message,
            },
            other => other,
        })
    }

    pub fn from_json_str(data: &str) -> Result<Self, ConfigError> {
        let mut cfg: AiConfig = serde_json::from_str(data).map_err(|e| ConfigError::Parse {
            path: "<inline>".to_string(),
            message: e.to_string(),
        })?;

        // Normalize provider
        cfg.provider = cfg.provider.trim().to_lowercase();
        if !matches!(cfg.provider.as_str(), "gemini" | "openai") {
            return Err(ConfigError::UnsupportedProvider(cfg.provider));
        }

        // Resolve api key if "ENV"
        if cfg.enabled && cfg.api_key.trim().eq_ignore_ascii_case("env") {
            cfg.api_key = match cfg.provider.as_str() {
                "gemini" => env::var("GEMINI_API_KEY")
                    .map_err(|_| ConfigError::MissingEnv("GEMINI_API_KEY"))?,
                _ => env::var("OPENAI_API_KEY")
                    .map_err(|_| ConfigError::MissingEnv("OPENAI_API_KEY"))?,
            };
        }

        Ok(cfg)
    }

    /// `$AI_CONFIG_PATH`, then `config/ai.json`; a missing file means AI is disabled.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = env::var(ENV_AI_CONFIG_PATH).unwrap_or_else(|_| DEFAULT_AI_CONFIG_PATH.into());
        if !Path::new(&path).exists() {
            return Ok(Self::default());
        }
        Self::load_from_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_is_normalized_and_models_default() {
        let cfg = AiConfig::from_json_str(r#"{"enabled": false, "provider": " Gemini "}"#).unwrap();
        assert_eq!(cfg.provider, "gemini");
        assert_eq!(cfg.score_model, "gemini-2.5-flash");
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let err = AiConfig::from_json_str(r#"{"enabled": true, "provider": "claude"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedProvider(p) if p == "claude"));
    }

    #[serial_test::serial]
    #[test]
    fn env_key_is_resolved_only_when_enabled() {
        env::set_var("OPENAI_API_KEY", "sk-test");
        let cfg = AiConfig::from_json_str(
            r#"{"enabled": true, "provider": "openai", "api_key": "ENV"}"#,
        )
        .unwrap();
        assert_eq!(cfg.api_key, "sk-test");
        env::remove_var("OPENAI_API_KEY");

        let off = AiConfig::from_json_str(
            r#"{"enabled": false, "provider": "openai", "api_key": "ENV"}"#,
        )
        .unwrap();
        assert_eq!(off.api_key, "ENV");
    }
}
