//! # Prometheus Metrics
//!
//! Exposes ledger activity for scraping at `/metrics` on the configured
//! metrics port.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] with
//! the `custody` prefix so they do not collide with any default global
//! registry consumers.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Holds all Prometheus metric handles for the node.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Successful deposits.
    pub deposits_total: IntCounter,
    /// Successful withdrawals.
    pub withdrawals_total: IntCounter,
    /// Successful owner recoveries.
    pub recoveries_total: IntCounter,
    /// Rejected ledger operations, labelled by error kind.
    pub rejected_total: IntCounterVec,
    /// Sequence number of the latest committed ledger event.
    pub last_event_seq: IntGauge,
    /// Wall time of mutating ledger calls, including the gateway round trip.
    pub operation_latency_seconds: Histogram,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("custody".into()), None)?;

        let deposits_total = IntCounter::new("deposits_total", "Total number of successful deposits")?;
        registry.register(Box::new(deposits_total.clone()))?;

        let withdrawals_total =
            IntCounter::new("withdrawals_total", "Total number of successful withdrawals")?;
        registry.register(Box::new(withdrawals_total.clone()))?;

        let recoveries_total =
            IntCounter::new("recoveries_total", "Total number of owner recoveries")?;
        registry.register(Box::new(recoveries_total.clone()))?;

        let rejected_total = IntCounterVec::new(
            Opts::new("rejected_total", "Ledger operations rejected, by error kind"),
            &["kind"],
        )?;
        registry.register(Box::new(rejected_total.clone()))?;

        let last_event_seq = IntGauge::new(
            "last_event_seq",
            "Sequence number of the latest committed ledger event",
        )?;
        registry.register(Box::new(last_event_seq.clone()))?;

        let operation_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "operation_latency_seconds",
                "Latency of deposit, withdraw, and recover calls in seconds",
            )
            .buckets(vec![
                0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1,
            ]),
        )?;
        registry.register(Box::new(operation_latency_seconds.clone()))?;

        Ok(Self {
            registry,
            deposits_total,
            withdrawals_total,
            recoveries_total,
            rejected_total,
            last_event_seq,
            operation_latency_seconds,
        })
    }

    /// Counts one rejected operation under `kind`.
    pub fn record_rejection(&self, kind: &str) {
        self.rejected_total.with_label_values(&[kind]).inc();
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<NodeMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
