//! Cheap binary pre-filter: does this message deserve the scoring pass?

use std::time::Duration;

use metrics::counter;
use serde_json::Value;
use tracing::{debug, warn};

use super::ai_adapter::{AiTask, DynAiClient};
use crate::error::ClassificationError;
use crate::telemetry::anon_hash;

#[derive(Clone)]
pub struct ContentClassifier {
    ai: DynAiClient,
    timeout: Duration,
}

impl ContentClassifier {
    pub fn new(ai: DynAiClient, timeout: Duration) -> Self {
        Self { ai, timeout }
    }

    /// `true` when the message might indicate risk.
    ///
    /// Fails safe: any backend error, timeout, or unreadable verdict yields
    /// `false`. Every message stays in storage and can be re-analysed later.
    pub async fn might_be_risky(&self, text: &str) -> bool {
        match self.classify(text).await {
            Ok(verdict) => {
                debug!(target: "classifier", id = %anon_hash(text), verdict, "classified");
                verdict
            }
            Err(e) => {
                counter!("classifier_failures_total").increment(1);
                warn!(
                    target: "classifier",
                    id = %anon_hash(text),
                    provider = self.ai.provider_name(),
                    error = %e,
                    "classification failed; skipping deep analysis"
                );
                false
            }
        }
    }

    /// Fallible form, exposed for diagnostics and tests.
    pub async fn classify(&self, text: &str) -> Result<bool, ClassificationError> {
        let raw = tokio::time::timeout(self.timeout, self.ai.complete_json(AiTask::Classify, text))
            .await
            .map_err(|_| ClassificationError::Timeout(self.timeout))??;
        parse_verdict(&raw)
    }
}

/// Accepts `{"verdict": "YES"}` or a bare `"YES"` / `"NO"` string.
pub(crate) fn parse_verdict(raw: &Value) -> Result<bool, ClassificationError> {
    let word = match raw {
        Value::String(s) => s.as_str(),
        Value::Object(map) => map
            .get("verdict")
            .and_then(Value::as_str)
            .ok_or_else(|| ClassificationError::UnexpectedVerdict(raw.to_string()))?,
        other => return Err(ClassificationError::UnexpectedVerdict(other.to_string())),
    };
    match word.trim().to_ascii_uppercase().as_str() {
        "YES" => Ok(true),
        "NO" => Ok(false),
        _ => Err(ClassificationError::UnexpectedVerdict(word.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::ai_adapter::{AiClient, DisabledClient};
    use crate::error::AiError;
    use serde_json::json;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Arc;

    struct Fixed(Result<Value, AiError>);

    impl AiClient for Fixed {
        fn complete_json<'a>(
            &'a self,
            _task: AiTask,
            _input: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<Value, AiError>> + Send + 'a>> {
            let out = self.0.clone();
            Box::pin(async move { out })
        }
        fn provider_name(&self) -> &'static str {
            "fixed"
        }
    }

    struct Hanging;

    impl AiClient for Hanging {
        fn complete_json<'a>(
            &'a self,
            _task: AiTask,
            _input: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<Value, AiError>> + Send + 'a>> {
            Box::pin(std::future::pending())
        }
        fn provider_name(&self) -> &'static str {
            "hanging"
        }
    }

    fn classifier(ai: impl AiClient + 'static) -> ContentClassifier {
        ContentClassifier::new(Arc::new(ai), Duration::from_millis(50))
    }

    #[test]
    fn verdict_parsing_is_case_insensitive() {
        assert_eq!(parse_verdict(&json!({"verdict": "yes"})), Ok(true));
        assert_eq!(parse_verdict(&json!(" NO ")), Ok(false));
        assert!(parse_verdict(&json!({"verdict": "maybe"})).is_err());
        assert!(parse_verdict(&json!({"answer": "YES"})).is_err());
        assert!(parse_verdict(&json!(1)).is_err());
    }

    #[tokio::test]
    async fn positive_verdict_passes_through() {
        let c = classifier(Fixed(Ok(json!({"verdict": "YES"}))));
        assert!(c.might_be_risky("I feel so alone").await);
    }

    #[tokio::test]
    async fn backend_error_fails_safe_to_false() {
        let c = classifier(Fixed(Err(AiError::Status(503))));
        assert!(!c.might_be_risky("anything").await);
        let d = classifier(DisabledClient);
        assert!(!d.might_be_risky("anything").await);
    }

    #[tokio::test]
    async fn malformed_verdict_fails_safe_to_false() {
        let c = classifier(Fixed(Ok(json!({"verdict": "perhaps"}))));
        assert!(!c.might_be_risky("anything").await);
    }

    #[tokio::test]
    async fn timeout_is_reported_and_fails_safe() {
        let c = classifier(Hanging);
        assert!(matches!(
            c.classify("anything").await,
            Err(ClassificationError::Timeout(_))
        ));
        assert!(!c.might_be_risky("anything").await);
    }
}
