//! AI adapter: provider abstraction over the generative backend.
//!
//! Every call is a structured (JSON) completion for one of three tasks. The
//! adapter only moves JSON; shape validation belongs to the classifier,
//! scorer, and topic extractor.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::AiConfig;
use crate::error::AiError;

// ------------------------------------------------------------
// Public surface
// ------------------------------------------------------------

/// What the backend is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiTask {
    /// `{"verdict": "YES" | "NO"}`
    Classify,
    /// Five named floats, see `RiskScores::FIELDS`.
    Score,
    /// `{"topics": [string]}`
    Topics,
}

impl AiTask {
    pub fn name(self) -> &'static str {
        match self {
            AiTask::Classify => "classify",
            AiTask::Score => "score",
            AiTask::Topics => "topics",
        }
    }

    fn instruction(self) -> &'static str {
        match self {
            AiTask::Classify => "You screen messages written by a child to a companion app. Answer YES if the message might indicate depression, anxiety, self-harm, isolation or an urgent safety concern and deserves a closer look; otherwise NO. Respond as JSON {\"verdict\": \"YES\"|\"NO\"}.",
            AiTask::Score => "You assess a message written by a child for mental-health risk. Return JSON with exactly these numeric fields, each between 0.0 and 1.0: depression_score, anxiety_score, self_harm_risk_score, isolation_score, urgency_score.",
            AiTask::Topics => "Extract up to five short topic labels (one or two words each) the child is talking about. Respond as JSON {\"topics\": [string]}.",
        }
    }

    /// Gemini `responseSchema` for this task.
    fn schema(self) -> Value {
        match self {
            AiTask::Classify => json!({
                "type": "OBJECT",
                "properties": { "verdict": { "type": "STRING", "enum": ["YES", "NO"] } },
                "required": ["verdict"]
            }),
            AiTask::Score => {
                let mut props = serde_json::Map::new();
                for f in crate::model::RiskScores::FIELDS {
                    props.insert(f.to_string(), json!({ "type": "NUMBER" }));
                }
                json!({
                    "type": "OBJECT",
                    "properties": props,
                    "required": crate::model::RiskScores::FIELDS
                })
            }
            AiTask::Topics => json!({
                "type": "OBJECT",
                "properties": { "topics": { "type": "ARRAY", "items": { "type": "STRING" } } },
                "required": ["topics"]
            }),
        }
    }
}

/// Trait object used by the pipeline stages (and by test doubles).
pub trait AiClient: Send + Sync {
    /// Run `task` over `input` and return the parsed JSON body.
    fn complete_json<'a>(
        &'a self,
        task: AiTask,
        input: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Value, AiError>> + Send + 'a>>;
    /// Provider name for diagnostics.
    fn provider_name(&self) -> &'static str;
}

/// Convenient alias used by callers.
pub type DynAiClient = Arc<dyn AiClient>;

/// Factory: build a client according to config and environment variables.
///
/// * If `AI_TEST_MODE=mock`, returns the deterministic keyword client.
/// * Else if `config.enabled==false`, returns a disabled client.
/// * Else builds the configured provider.
pub fn build_client_from_config(config: &AiConfig) -> Result<DynAiClient, AiError> {
    if std::env::var("AI_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        return Ok(Arc::new(KeywordMockClient));
    }

    if !config.enabled {
        return Ok(Arc::new(DisabledClient));
    }

    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiProvider::new(config)?)),
        _ => Ok(Arc::new(GeminiProvider::new(config)?)),
    }
}

fn http_client() -> Result<reqwest::Client, AiError> {
    reqwest::Client::builder()
        .user_agent("companion-risk-analyzer/0.1")
        .connect_timeout(Duration::from_secs(4))
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| AiError::Transport(e.to_string()))
}

fn parse_json_text(text: &str) -> Result<Value, AiError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(AiError::Empty);
    }
    // Some models wrap JSON in a markdown fence despite the mime type.
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .unwrap_or(trimmed);
    serde_json::from_str(unfenced.trim()).map_err(|e| AiError::InvalidJson(e.to_string()))
}

// ------------------------------------------------------------
// Gemini (generateContent with a response schema)
// ------------------------------------------------------------

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiProvider {
    http: reqwest::Client,
    api_key: String,
    classify_model: String,
    score_model: String,
}

impl GeminiProvider {
    pub fn new(cfg: &AiConfig) -> Result<Self, AiError> {
        Ok(Self {
            http: http_client()?,
            api_key: cfg.api_key.clone(),
            classify_model: cfg.classify_model.clone(),
            score_model: cfg.score_model.clone(),
        })
    }

    fn model_for(&self, task: AiTask) -> &str {
        match task {
            AiTask::Score => &self.score_model,
            AiTask::Classify | AiTask::Topics => &self.classify_model,
        }
    }

    async fn call(&self, task: AiTask, input: &str) -> Result<Value, AiError> {
        #[derive(Serialize)]
        struct Part<'a> {
            text: &'a str,
        }
        #[derive(Serialize)]
        struct Content<'a> {
            #[serde(skip_serializing_if = "Option::is_none")]
            role: Option<&'a str>,
            parts: Vec<Part<'a>>,
        }
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct GenerationConfig {
            response_mime_type: &'static str,
            response_schema: Value,
            temperature: f32,
        }
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Req<'a> {
            system_instruction: Content<'a>,
            contents: Vec<Content<'a>>,
            generation_config: GenerationConfig,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Resp {
            #[serde(default)]
            candidates: Vec<Candidate>,
            #[serde(default)]
            prompt_feedback: Option<PromptFeedback>,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct PromptFeedback {
            #[serde(default)]
            block_reason: Option<String>,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Candidate {
            #[serde(default)]
            content: Option<RespContent>,
            #[serde(default)]
            finish_reason: Option<String>,
        }
        #[derive(Deserialize)]
        struct RespContent {
            #[serde(default)]
            parts: Vec<RespPart>,
        }
        #[derive(Deserialize)]
        struct RespPart {
            #[serde(default)]
            text: Option<String>,
        }

        if self.api_key.is_empty() {
            return Err(AiError::Disabled);
        }

        let req = Req {
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: task.instruction(),
                }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part { text: input }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                response_schema: task.schema(),
                temperature: 0.0,
            },
        };

        let url = format!(
            "{}/models/{}:generateContent",
            GEMINI_BASE_URL,
            self.model_for(task)
        );
        let resp = self
            .http
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| AiError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(AiError::Status(resp.status().as_u16()));
        }
        let body: Resp = resp
            .json()
            .await
            .map_err(|e| AiError::InvalidJson(e.to_string()))?;

        if body
            .prompt_feedback
            .and_then(|f| f.block_reason)
            .is_some()
        {
            return Err(AiError::SafetyBlocked);
        }
        let first = body.candidates.into_iter().next().ok_or(AiError::Empty)?;
        if first.finish_reason.as_deref() == Some("SAFETY") {
            return Err(AiError::SafetyBlocked);
        }
        let text = first
            .content
            .and_then(|c| c.parts.into_iter().find_map(|p| p.text))
            .ok_or(AiError::Empty)?;
        parse_json_text(&text)
    }
}

impl AiClient for GeminiProvider {
    fn complete_json<'a>(
        &'a self,
        task: AiTask,
        input: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Value, AiError>> + Send + 'a>> {
        Box::pin(self.call(task, input))
    }
    fn provider_name(&self) -> &'static str {
        "gemini"
    }
}

// ------------------------------------------------------------
// OpenAI (Chat Completions, JSON object output)
// ------------------------------------------------------------

pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    classify_model: String,
    score_model: String,
}

impl OpenAiProvider {
    pub fn new(cfg: &AiConfig) -> Result<Self, AiError> {
        // Gemini model names are meaningless here; fall back to a small OpenAI model.
        let pick = |m: &str| {
            if m.starts_with("gemini") {
                "gpt-4o-mini".to_string()
            } else {
                m.to_string()
            }
        };
        Ok(Self {
            http: http_client()?,
            api_key: cfg.api_key.clone(),
            classify_model: pick(&cfg.classify_model),
            score_model: pick(&cfg.score_model),
        })
    }

    async fn call(&self, task: AiTask, input: &str) -> Result<Value, AiError> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct ResponseFormat {
            #[serde(rename = "type")]
            kind: &'static str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            response_format: ResponseFormat,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
            #[serde(default)]
            finish_reason: Option<String>,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            #[serde(default)]
            content: Option<String>,
        }

        if self.api_key.is_empty() {
            return Err(AiError::Disabled);
        }

        let model = match task {
            AiTask::Score => &self.score_model,
            AiTask::Classify | AiTask::Topics => &self.classify_model,
        };
        let req = Req {
            model,
            messages: vec![
                Msg {
                    role: "system",
                    content: task.instruction(),
                },
                Msg {
                    role: "user",
                    content: input,
                },
            ],
            temperature: 0.0,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let resp = self
            .http
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| AiError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(AiError::Status(resp.status().as_u16()));
        }
        let body: Resp = resp
            .json()
            .await
            .map_err(|e| AiError::InvalidJson(e.to_string()))?;
        let choice = body.choices.into_iter().next().ok_or(AiError::Empty)?;
        if choice.finish_reason.as_deref() == Some("content_filter") {
            return Err(AiError::SafetyBlocked);
        }
        parse_json_text(choice.message.content.as_deref().unwrap_or(""))
    }
}

impl AiClient for OpenAiProvider {
    fn complete_json<'a>(
        &'a self,
        task: AiTask,
        input: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Value, AiError>> + Send + 'a>> {
        Box::pin(self.call(task, input))
    }
    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

// ------------------------------------------------------------
// Disabled + offline clients
// ------------------------------------------------------------

/// Fails every call with `AiError::Disabled`; used when AI is off.
pub struct DisabledClient;

impl AiClient for DisabledClient {
    fn complete_json<'a>(
        &'a self,
        _task: AiTask,
        _input: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Value, AiError>> + Send + 'a>> {
        Box::pin(async { Err(AiError::Disabled) })
    }
    fn provider_name(&self) -> &'static str {
        "disabled"
    }
}

const MOCK_ACUTE_CUES: &[&str] = &[
    "hurt myself",
    "kill myself",
    "end it all",
    "don't want to live",
    "want to die",
];
const MOCK_CONCERN_CUES: &[&str] = &[
    "sad", "alone", "lonely", "scared", "afraid", "cry", "hate myself", "nobody",
];
const MOCK_TOPICS: &[&str] = &[
    "school", "friends", "family", "games", "music", "sports", "homework", "pets",
];

/// Deterministic keyword client for local runs (`AI_TEST_MODE=mock`).
pub struct KeywordMockClient;

impl KeywordMockClient {
    fn respond(task: AiTask, input: &str) -> Value {
        let lower = input.to_lowercase();
        let acute = MOCK_ACUTE_CUES.iter().any(|c| lower.contains(c));
        let concern = MOCK_CONCERN_CUES.iter().any(|c| lower.contains(c));
        match task {
            AiTask::Classify => json!({ "verdict": if acute || concern { "YES" } else { "NO" } }),
            AiTask::Score if acute => json!({
                "depression_score": 0.7,
                "anxiety_score": 0.6,
                "self_harm_risk_score": 0.92,
                "isolation_score": 0.5,
                "urgency_score": 0.85
            }),
            AiTask::Score => json!({
                "depression_score": 0.4,
                "anxiety_score": 0.35,
                "self_harm_risk_score": 0.05,
                "isolation_score": 0.3,
                "urgency_score": 0.1
            }),
            AiTask::Topics => {
                let topics: Vec<&str> = MOCK_TOPICS
                    .iter()
                    .copied()
                    .filter(|t| lower.contains(t))
                    .collect();
                json!({ "topics": topics })
            }
        }
    }
}

impl AiClient for KeywordMockClient {
    fn complete_json<'a>(
        &'a self,
        task: AiTask,
        input: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Value, AiError>> + Send + 'a>> {
        let out = Self::respond(task, input);
        Box::pin(async move { Ok(out) })
    }
    fn provider_name(&self) -> &'static str {
        "mock"
    }
}
