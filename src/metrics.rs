//! Metric names and Prometheus exporter setup.

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::MetricsConfig;
use crate::error::Result;

/// Queries seen by the packet loop, labelled by `verdict`.
pub const QUERIES_TOTAL: &str = "nxgate_queries_total";
/// Forwarded queries that got no upstream answer.
pub const UPSTREAM_FAILURES_TOTAL: &str = "nxgate_upstream_failures_total";
/// Filter list downloads that failed during a refresh.
pub const REFRESH_FAILURES_TOTAL: &str = "nxgate_refresh_failures_total";
/// Size of the currently published blocked set.
pub const BLOCKED_DOMAINS: &str = "nxgate_blocked_domains";

/// Initialize the metrics system based on configuration.
///
/// When metrics are enabled, this starts an HTTP server that exposes
/// a `/metrics` endpoint for Prometheus to scrape.
///
/// When metrics are disabled, this is a no-op. The `metrics` crate
/// handles unregistered metrics gracefully (they become no-ops).
pub fn init(config: &MetricsConfig) -> Result<()> {
    if !config.enabled {
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(config.listen)
        .install()?;
    describe();

    Ok(())
}

fn describe() {
    ::metrics::describe_counter!(QUERIES_TOTAL, "DNS queries seen, by verdict");
    ::metrics::describe_counter!(
        UPSTREAM_FAILURES_TOTAL,
        "Forwarded queries dropped without an upstream answer"
    );
    ::metrics::describe_counter!(REFRESH_FAILURES_TOTAL, "Failed filter list downloads");
    ::metrics::describe_gauge!(BLOCKED_DOMAINS, "Domains in the published blocked set");
}
