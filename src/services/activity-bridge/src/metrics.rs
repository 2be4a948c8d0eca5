//! Prometheus metrics for the bridge
//!
//! All collectors live in a private [`Registry`] under the `activity_bridge`
//! namespace, exported as text by the `/metrics` route.

use crate::dispatcher::DeliveryOutcome;
use crate::error::{BridgeError, Result};

use prometheus::core::Collector;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::Arc;
use tracing::info;

const NAMESPACE: &str = "activity_bridge";

/// Metrics collector shared by every pipeline
#[derive(Clone)]
pub struct BridgeMetrics {
    registry: Arc<Registry>,

    // Counters
    activities_received: IntCounterVec,
    events_matched: IntCounterVec,
    deliveries: IntCounterVec,

    // Gauges
    pipelines_running: IntGauge,

    // Histograms
    delivery_duration: HistogramVec,
}

impl BridgeMetrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self> {
        info!("Initializing bridge metrics");

        let registry = Registry::new();

        let activities_received = IntCounterVec::new(
            Opts::new(
                "activities_received_total",
                "Activities delivered by the transport",
            )
            .namespace(NAMESPACE),
            &["pipeline", "verb"],
        )
        .map_err(|e| metric_error("activities_received_total", e))?;

        let events_matched = IntCounterVec::new(
            Opts::new(
                "events_matched_total",
                "Activities that passed a pipeline's subscription filter",
            )
            .namespace(NAMESPACE),
            &["pipeline", "resource", "event"],
        )
        .map_err(|e| metric_error("events_matched_total", e))?;

        let deliveries = IntCounterVec::new(
            Opts::new("deliveries_total", "Webhook delivery attempts by outcome")
                .namespace(NAMESPACE),
            &["pipeline", "outcome"],
        )
        .map_err(|e| metric_error("deliveries_total", e))?;

        let pipelines_running = IntGauge::with_opts(
            Opts::new("pipelines_running", "Pipelines currently in the running state")
                .namespace(NAMESPACE),
        )
        .map_err(|e| metric_error("pipelines_running", e))?;

        let delivery_duration = HistogramVec::new(
            HistogramOpts::new(
                "delivery_duration_seconds",
                "Time taken by a single webhook POST",
            )
            .namespace(NAMESPACE)
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["pipeline"],
        )
        .map_err(|e| metric_error("delivery_duration_seconds", e))?;

        register(&registry, "activities_received_total", &activities_received)?;
        register(&registry, "events_matched_total", &events_matched)?;
        register(&registry, "deliveries_total", &deliveries)?;
        register(&registry, "pipelines_running", &pipelines_running)?;
        register(&registry, "delivery_duration_seconds", &delivery_duration)?;

        Ok(Self {
            registry: Arc::new(registry),
            activities_received,
            events_matched,
            deliveries,
            pipelines_running,
            delivery_duration,
        })
    }

    pub fn record_activity(&self, pipeline: &str, verb: &str) {
        self.activities_received
            .with_label_values(&[pipeline, verb])
            .inc();
    }

    pub fn record_match(&self, pipeline: &str, resource: &str, event: &str) {
        self.events_matched
            .with_label_values(&[pipeline, resource, event])
            .inc();
    }

    /// Record one destination's outcome and how long it took
    pub fn record_delivery(&self, pipeline: &str, outcome: &DeliveryOutcome) {
        self.deliveries
            .with_label_values(&[pipeline, outcome.label()])
            .inc();
        self.delivery_duration
            .with_label_values(&[pipeline])
            .observe(outcome.duration.as_secs_f64());
    }

    pub fn pipeline_started(&self) {
        self.pipelines_running.inc();
    }

    pub fn pipeline_stopped(&self) {
        self.pipelines_running.dec();
    }

    pub fn pipelines_running(&self) -> i64 {
        self.pipelines_running.get()
    }

    /// Export metrics in Prometheus text format
    pub fn export(&self) -> Result<String> {
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();

        encoder
            .encode_to_string(&metric_families)
            .map_err(|e| BridgeError::internal(format!("Failed to encode metrics: {}", e)))
    }
}

fn register<C>(registry: &Registry, name: &str, collector: &C) -> Result<()>
where
    C: Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|e| BridgeError::internal(format!("Failed to register {}: {}", name, e)))
}

fn metric_error(name: &str, err: prometheus::Error) -> BridgeError {
    BridgeError::internal(format!("Failed to create {}: {}", name, err))
}
