//! Risk-analysis service entrypoint.
//! Boots the Axum HTTP server with the analysis routes and `/metrics`.

use shuttle_axum::ShuttleAxum;

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    companion_risk_analyzer::telemetry::init_tracing();

    let router = companion_risk_analyzer::app().await?;
    Ok(router.into())
}
