// src/analyze/mod.rs
//! Message analysis: AI transport, the cheap risk gate, the five-axis scorer
//! and topic extraction.

pub mod ai_adapter;
pub mod classifier;
pub mod scorer;
pub mod topics;

pub use ai_adapter::{build_client_from_config, AiClient, AiTask, DynAiClient};
pub use classifier::ContentClassifier;
pub use scorer::{parse_scores, RiskScorer};
pub use topics::{normalize_topics, TopicExtractor};
