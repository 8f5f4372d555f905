use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// One recorder per process; tests build many routers.
static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

#[derive(Clone)]
pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder (first call only) and describe the series.
    pub fn init() -> anyhow::Result<Self> {
        let handle = HANDLE
            .get_or_try_init(|| {
                let handle = PrometheusBuilder::new()
                    .install_recorder()
                    .map_err(|e| anyhow::anyhow!("prometheus: install recorder: {e}"))?;
                describe();
                Ok::<_, anyhow::Error>(handle)
            })?
            .clone();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
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

fn describe() {
    describe_counter!("analyze_requests_total", "Analyze submissions received.");
    describe_counter!(
        "analyze_fallback_total",
        "Analyses served by the heuristic scorer, by reason."
    );
    describe_counter!(
        "analyze_duplicates_total",
        "Submissions rejected as already stored."
    );
    describe_counter!("analyze_errors_total", "Failed submissions, by kind.");
    describe_histogram!("ai_call_duration_ms", "Model call latency in milliseconds.");
    describe_counter!(
        "embedding_failures_total",
        "Articles stored without an embedding vector."
    );
    describe_counter!("batch_articles_total", "Articles taken up by batch runs.");
    describe_gauge!("feed_subscribers", "Open real-time feed subscriptions.");
    gauge!("feed_subscribers").set(0.0);
}
