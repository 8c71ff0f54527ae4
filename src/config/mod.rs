pub mod ai;
pub mod analysis;

pub use ai::AiConfig;
pub use analysis::{
    AlertSettings, AnalysisSettings, NotifySettings, StorageSettings, TopicSettings,
    WorkerSettings,
};
