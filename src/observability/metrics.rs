//! Metrics for enrichment runs, recorded through the `metrics` facade.
//!
//! Nothing is exported unless a recorder is installed; `init` installs the
//! Prometheus exporter on `TAXREF_METRICS_PORT` when that variable is set.

use std::net::SocketAddr;
use tracing::{info, warn};

/// Every metric name used by the crate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    LookupsTotal,
    LookupDuration,
    RecordsUpdated,
    RecordsSkipped,
    BatchesCompleted,
    BatchDuration,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::LookupsTotal => "taxref_lookups_total",
            MetricName::LookupDuration => "taxref_lookup_duration_seconds",
            MetricName::RecordsUpdated => "taxref_records_updated_total",
            MetricName::RecordsSkipped => "taxref_records_skipped_total",
            MetricName::BatchesCompleted => "taxref_batches_completed_total",
            MetricName::BatchDuration => "taxref_batch_duration_seconds",
        }
    }
}

/// Install the Prometheus exporter if `TAXREF_METRICS_PORT` is set
pub fn init() {
    let Some(port) = std::env::var("TAXREF_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
    else {
        return;
    };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr);
    match builder.install() {
        Ok(()) => info!("Prometheus exporter listening on http://{}/metrics", addr),
        Err(e) => warn!("Prometheus exporter install failed: {}", e),
    }
}

pub mod lookup {
    use super::MetricName;

    /// One finished job; `outcome` is "updated" or an error kind
    pub fn completed(strategy: &'static str, outcome: &'static str, secs: f64) {
        ::metrics::counter!(MetricName::LookupsTotal.as_str(), "strategy" => strategy, "outcome" => outcome)
            .increment(1);
        ::metrics::histogram!(MetricName::LookupDuration.as_str(), "strategy" => strategy).record(secs);
    }
}

pub mod batch {
    use super::MetricName;

    pub fn records_updated(strategy: &'static str, count: usize) {
        ::metrics::counter!(MetricName::RecordsUpdated.as_str(), "strategy" => strategy).increment(count as u64);
    }

    pub fn records_skipped(strategy: &'static str, count: usize) {
        ::metrics::counter!(MetricName::RecordsSkipped.as_str(), "strategy" => strategy).increment(count as u64);
    }

    pub fn completed(strategy: &'static str, secs: f64) {
        ::metrics::counter!(MetricName::BatchesCompleted.as_str(), "strategy" => strategy).increment(1);
        ::metrics::histogram!(MetricName::BatchDuration.as_str(), "strategy" => strategy).record(secs);
    }
}
