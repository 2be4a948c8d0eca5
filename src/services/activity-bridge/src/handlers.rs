//! Request handlers for the health and metrics surface

use crate::error::Result;
use crate::metrics::BridgeMetrics;
use crate::pipeline::RuntimeState;
use crate::supervisor::PipelineSupervisor;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error};

/// Shared state behind the HTTP routes
#[derive(Clone)]
pub struct BridgeState {
    pub supervisor: Arc<PipelineSupervisor>,
    pub metrics: BridgeMetrics,
}

impl BridgeState {
    pub fn new(supervisor: Arc<PipelineSupervisor>, metrics: BridgeMetrics) -> Self {
        Self {
            supervisor,
            metrics,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub service: &'static str,
    pub version: &'static str,
    pub status: &'static str,
    pub pipelines: Vec<PipelineHealth>,
}

#[derive(Debug, Serialize)]
pub struct PipelineHealth {
    pub name: String,
    pub state: String,
    pub session: &'static str,
    pub destinations: Vec<String>,
    pub subscriptions: Vec<SubscriptionReport>,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionReport {
    pub resource: String,
    pub events: String,
}

/// Health check handler.
///
/// Healthy only while every pipeline is running with its session up.
pub async fn health_handler(State(state): State<BridgeState>) -> impl IntoResponse {
    let pipelines: Vec<PipelineHealth> = state
        .supervisor
        .runtimes()
        .iter()
        .map(|runtime| PipelineHealth {
            name: runtime.name().to_string(),
            state: runtime.state().to_string(),
            session: if runtime.session_connected() {
                "connected"
            } else {
                "disconnected"
            },
            destinations: runtime.destinations().to_vec(),
            subscriptions: runtime
                .subscriptions()
                .into_iter()
                .map(|(resource, filter)| SubscriptionReport {
                    resource,
                    events: filter.to_string(),
                })
                .collect(),
        })
        .collect();

    let healthy = !pipelines.is_empty()
        && pipelines
            .iter()
            .all(|p| p.state == RuntimeState::Running.as_str() && p.session == "connected");
    let (status, label) = if healthy {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };
    debug!("Health check: {}", label);

    (
        status,
        Json(HealthReport {
            service: crate::SERVICE_NAME,
            version: crate::VERSION,
            status: label,
            pipelines,
        }),
    )
}

/// Prometheus text exposition
pub async fn metrics_handler(State(state): State<BridgeState>) -> Result<impl IntoResponse> {
    let body = state.metrics.export().map_err(|e| {
        error!("Metrics export failed: {}", e);
        e
    })?;

    Ok((
        [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
        body,
    ))
}
