// src/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::worker::AnalysisWorker;

/// In-process trigger for deployments without an external cron.
/// Each tick runs one bounded batch. Failed jobs are left for the explicit
/// requeue operation.
pub fn spawn_batch_scheduler(worker: Arc<AnalysisWorker>, interval_secs: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match worker.run_batch().await {
                Ok(summary) => tracing::debug!(
                    target: "worker",
                    processed = summary.processed,
                    "scheduled batch tick"
                ),
                Err(e) => tracing::error!(target: "worker", error = %e, "scheduled batch failed"),
            }
        }
    })
}
