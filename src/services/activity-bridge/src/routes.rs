//! HTTP routes for the bridge
//!
//! Only operational endpoints: `/health` and `/metrics`. Activities never
//! arrive over HTTP.

use crate::error::{BridgeError, Result};
use crate::handlers::{health_handler, metrics_handler, BridgeState};

use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

/// Build the router for the operational surface
pub fn create_router(state: BridgeState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(Duration::from_secs(10)))
                .into_inner(),
        )
}

/// Serve `router` on `addr` until `cancel` fires
pub async fn serve(addr: SocketAddr, router: Router, cancel: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| BridgeError::server(format!("Failed to bind to {}: {}", addr, e)))?;

    info!("Health check: http://{}/health", addr);
    info!("Metrics: http://{}/metrics", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| BridgeError::server(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;
    use crate::config::{BridgeSettings, ValidatedConfig, ValidatedPipeline};
    use crate::dispatcher::{DispatchConfig, Dispatcher};
    use crate::identity::MockIdentityVerifier;
    use crate::metrics::BridgeMetrics;
    use crate::models::{Credential, Identity};
    use crate::subscription::EventFilter;
    use crate::supervisor::PipelineSupervisor;
    use crate::transport::fake::FakeTransportFactory;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn state() -> BridgeState {
        let mut verifier = MockIdentityVerifier::new();
        verifier
            .expect_verify()
            .returning(|_| Ok(Identity::named("Bridge Bot")));

        let metrics = BridgeMetrics::new().unwrap();
        let supervisor = PipelineSupervisor::new(
            Arc::new(verifier),
            Arc::new(FakeTransportFactory::default()),
            Dispatcher::new(&DispatchConfig::default()).unwrap(),
        )
        .with_metrics(metrics.clone());

        BridgeState::new(Arc::new(supervisor), metrics)
    }

    fn one_pipeline() -> ValidatedConfig {
        ValidatedConfig {
            settings: BridgeSettings::default(),
            pipelines: vec![ValidatedPipeline {
                name: "bot".to_string(),
                credential: Credential::new("token"),
                resources: vec![catalog::resource("messages").unwrap()],
                filter: EventFilter::All,
                destinations: vec!["http://localhost:8080".to_string()],
                firehose: false,
            }],
        }
    }

    async fn get(router: Router, uri: &str) -> (StatusCode, String) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_health_reports_running_pipelines() {
        let state = state();
        state.supervisor.run(&one_pipeline()).await.unwrap();

        let (status, body) = get(create_router(state), "/health").await;
        assert_eq!(status, StatusCode::OK);

        let report: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(report["status"], "healthy");
        assert_eq!(report["pipelines"][0]["name"], "bot");
        assert_eq!(report["pipelines"][0]["state"], "running");
        assert_eq!(report["pipelines"][0]["session"], "connected");
        assert_eq!(report["pipelines"][0]["subscriptions"][0]["resource"], "messages");
        assert_eq!(report["pipelines"][0]["subscriptions"][0]["events"], "all");
    }

    #[tokio::test]
    async fn test_health_degraded_after_shutdown() {
        let state = state();
        state.supervisor.run(&one_pipeline()).await.unwrap();
        state.supervisor.shutdown().await.unwrap();

        let (status, body) = get(create_router(state), "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body.contains("\"stopped\""));
    }

    #[tokio::test]
    async fn test_health_degraded_when_session_lost() {
        let transports = Arc::new(FakeTransportFactory::default());
        let mut verifier = MockIdentityVerifier::new();
        verifier
            .expect_verify()
            .returning(|_| Ok(Identity::named("Bridge Bot")));
        let metrics = BridgeMetrics::new().unwrap();
        let supervisor = PipelineSupervisor::new(
            Arc::new(verifier),
            Arc::clone(&transports) as Arc<dyn crate::transport::TransportFactory>,
            Dispatcher::new(&DispatchConfig::default()).unwrap(),
        );
        supervisor.run(&one_pipeline()).await.unwrap();
        let state = BridgeState::new(Arc::new(supervisor), metrics);

        transports
            .transport("bot")
            .unwrap()
            .connected
            .store(false, std::sync::atomic::Ordering::SeqCst);

        let (status, body) = get(create_router(state), "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let report: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(report["status"], "degraded");
        assert_eq!(report["pipelines"][0]["state"], "running");
        assert_eq!(report["pipelines"][0]["session"], "disconnected");
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let state = state();
        state.supervisor.run(&one_pipeline()).await.unwrap();

        let (status, body) = get(create_router(state), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("activity_bridge_pipelines_running 1"));
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let (status, _) = get(create_router(state()), "/api/v1/activities").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
