use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// One-time metrics registration so series show up on /metrics before first
/// increment.
fn describe_series() {
    describe_counter!("bulk_runs_total", "Bulk analysis runs started.");
    describe_counter!(
        "bulk_items_processed_total",
        "URLs that received a persisted sentiment result."
    );
    describe_counter!(
        "bulk_items_failed_total",
        "URLs skipped due to a per-item pipeline failure."
    );
    describe_counter!(
        "fetch_fallback_total",
        "Direct fetches that fell back to headless rendering."
    );
    describe_counter!(
        "fetch_failed_total",
        "URLs where both fetch strategies failed."
    );
    describe_counter!("classify_errors_total", "Completion calls that errored.");
    describe_gauge!("bulk_last_run_ts", "Unix ts when a bulk run last started.");
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Initialize the Prometheus recorder.
    pub fn init() -> Self {
        // Default buckets to avoid API differences across crate versions.
        let builder = PrometheusBuilder::new();
        let handle = builder
            .install_recorder()
            .expect("prometheus: install recorder");

        describe_series();
        gauge!("bulk_last_run_ts").set(0.0);

        Self { handle }
    }

    /// Router exposing `/metrics` in the Prometheus exposition format.
    pub fn router(&self) -> Router {
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
