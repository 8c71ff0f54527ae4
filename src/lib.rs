// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod alert;
pub mod analyze;
pub mod api;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod notify;
pub mod scheduler;
pub mod store;
pub mod telemetry;
pub mod worker;

pub use crate::api::create_router;
pub use crate::bootstrap::AnalysisRuntime;

use axum::Router;
use tracing::info;

/// Full service router: API routes plus `/metrics`. Starts the in-process
/// scheduler when `worker.interval_secs > 0`.
pub async fn app() -> anyhow::Result<Router> {
    let runtime = AnalysisRuntime::from_env().await?;
    let metrics = metrics::Metrics::init()?;

    let interval = runtime.settings.worker.interval_secs;
    if interval > 0 {
        scheduler::spawn_batch_scheduler(runtime.worker.clone(), interval);
        info!(interval_secs = interval, "in-process batch scheduler started");
    }

    Ok(create_router(runtime.app_state()).merge(metrics.router()))
}
