// src/metrics.rs
use anyhow::Context;
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder and describe the pipeline's series.
    /// Later calls reuse the process-wide recorder.
    pub fn init() -> anyhow::Result<Self> {
        let handle = HANDLE.get_or_try_init(install)?.clone();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router<S>(&self) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

fn install() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("prometheus: install recorder")?;

    describe_counter!("analysis_jobs_total", "Analysis jobs by terminal outcome");
    describe_counter!(
        "classifier_failures_total",
        "Pre-filter calls that failed and defaulted to not risky"
    );
    describe_counter!("scorer_failures_total", "Risk scoring failures by kind");
    describe_counter!(
        "record_store_errors_total",
        "Risk records that could not be persisted"
    );
    describe_counter!("topic_mentions_total", "Topic mention increments written");
    describe_counter!("alerts_total", "Guardian alert attempts by outcome");
    describe_gauge!("analysis_batch_jobs", "Jobs fetched by the last batch");
    describe_gauge!(
        "analysis_batch_last_run_ts",
        Unit::Seconds,
        "Unix time of the last batch run"
    );
    describe_histogram!(
        "analysis_job_duration_ms",
        Unit::Milliseconds,
        "Wall time per claimed job"
    );

    Ok(handle)
}
