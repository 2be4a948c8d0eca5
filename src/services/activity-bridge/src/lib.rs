//! # Activity Bridge
//!
//! Forwards a real-time collaboration activity feed to HTTP webhooks.
//!
//! Each pipeline authenticates as one identity, opens one transport session,
//! and forwards the activities its subscriptions match to every configured
//! destination:
//!
//! - **Translation**: upstream verbs map to stable `(resource, event)` pairs
//! - **Filtering**: per-pipeline subscriptions with an `all` wildcard
//! - **Fan-out**: one best-effort POST per destination, never retried
//! - **Supervision**: many pipelines in parallel, one coordinated shutdown
//!
//! ## Usage
//!
//! ```rust,no_run
//! use activity_bridge::{ActivityBridge, BridgeConfig, EnvSecrets};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BridgeConfig::load("bridge.yml")?.validate(&EnvSecrets)?;
//!     let bridge = ActivityBridge::new(&config.settings)?;
//!
//!     bridge.start(&config).await?;
//!     tokio::signal::ctrl_c().await?;
//!     bridge.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

pub mod catalog;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod routes;
pub mod subscription;
pub mod supervisor;
pub mod transport;

pub use config::{BridgeConfig, BridgeSettings, ConfigValidator, EnvSecrets, ValidatedConfig};
pub use dispatcher::{DispatchConfig, Dispatcher};
pub use error::{BridgeError, ConfigError, CredentialError, PipelineError, Result};
pub use metrics::BridgeMetrics;
pub use models::{Activity, WebhookEvent};
pub use pipeline::{PipelineRuntime, RuntimeState};
pub use subscription::{EventFilter, SubscriptionRegistry};
pub use supervisor::PipelineSupervisor;

/// Service name reported by `/health`
pub const SERVICE_NAME: &str = "activity-bridge";

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Production wiring: relay transport, people-API verifier, shared metrics
#[derive(Clone)]
pub struct ActivityBridge {
    supervisor: Arc<PipelineSupervisor>,
    metrics: BridgeMetrics,
}

impl ActivityBridge {
    pub fn new(settings: &BridgeSettings) -> Result<Self> {
        let metrics = BridgeMetrics::new()?;
        let dispatcher = Dispatcher::new(&DispatchConfig::from(settings))?;
        let verifier = identity::PeopleApiVerifier::new(
            &settings.identity_url,
            Duration::from_secs(settings.connect_timeout_seconds),
            &settings.user_agent,
        )?;
        let transports = transport::RelayTransportFactory::new(
            settings.transport_url.clone(),
            Duration::from_secs(settings.connect_timeout_seconds),
        );

        let supervisor =
            PipelineSupervisor::new(Arc::new(verifier), Arc::new(transports), dispatcher)
                .with_metrics(metrics.clone());

        Ok(Self {
            supervisor: Arc::new(supervisor),
            metrics,
        })
    }

    /// Start every pipeline in `config`
    pub async fn start(&self, config: &ValidatedConfig) -> Result<Vec<Arc<PipelineRuntime>>> {
        self.supervisor.run(config).await
    }

    /// Stop every pipeline. In-flight deliveries are left running.
    pub async fn shutdown(&self) -> Result<()> {
        self.supervisor.shutdown().await
    }

    /// Wait up to `grace` for in-flight deliveries
    pub async fn drain(&self, grace: Duration) -> bool {
        self.supervisor.wait_for_inflight(grace).await
    }

    pub fn supervisor(&self) -> Arc<PipelineSupervisor> {
        Arc::clone(&self.supervisor)
    }

    pub fn metrics(&self) -> &BridgeMetrics {
        &self.metrics
    }

    /// State for the `/health` and `/metrics` routes
    pub fn http_state(&self) -> handlers::BridgeState {
        handlers::BridgeState::new(self.supervisor(), self.metrics.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_from_default_settings() {
        let bridge = ActivityBridge::new(&BridgeSettings::default()).unwrap();
        assert!(bridge.supervisor().runtimes().is_empty());
        assert_eq!(bridge.metrics().pipelines_running(), 0);
    }

    #[test]
    fn test_service_identity() {
        assert_eq!(SERVICE_NAME, "activity-bridge");
        assert!(!VERSION.is_empty());
    }
}
