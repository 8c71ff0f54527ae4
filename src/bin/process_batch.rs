//! One bounded analysis batch, then exit. Meant for cron-style triggers.
//!
//! Runs the requeue sweep first when `--requeue` is passed.

use companion_risk_analyzer::{telemetry, AnalysisRuntime};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    telemetry::init_tracing();

    let runtime = AnalysisRuntime::from_env().await?;

    if std::env::args().any(|a| a == "--requeue") {
        let swept = runtime.worker.requeue_sweep().await?;
        println!("{}", serde_json::to_string(&swept)?);
    }

    let summary = runtime.worker.run_batch().await?;
    println!("{}", serde_json::to_string(&summary)?);

    runtime.store.close().await?;
    Ok(())
}
