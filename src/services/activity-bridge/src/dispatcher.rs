//! Webhook fan-out over HTTP POST
//!
//! One attempt per destination per event. A failing destination never stops
//! delivery to its siblings, and nothing is retried or queued.

use crate::config::BridgeSettings;
use crate::error::{BridgeError, DispatchError, Result};
use crate::models::WebhookEvent;
use futures::future::join_all;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// HTTP client settings for destinations
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Whole-request ceiling, so a hung destination is eventually abandoned
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: format!("activity-bridge/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl From<&BridgeSettings> for DispatchConfig {
    fn from(settings: &BridgeSettings) -> Self {
        Self {
            timeout: Duration::from_secs(settings.dispatch_timeout_seconds),
            connect_timeout: Duration::from_secs(settings.connect_timeout_seconds),
            user_agent: settings.user_agent.clone(),
        }
    }
}

/// Result of one delivery attempt
#[derive(Debug)]
pub struct DeliveryOutcome {
    pub destination: String,
    pub result: std::result::Result<StatusCode, DispatchError>,
    pub duration: Duration,
}

impl DeliveryOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Metrics label for this outcome
    pub fn label(&self) -> &'static str {
        match &self.result {
            Ok(_) => "delivered",
            Err(e) => e.kind(),
        }
    }
}

/// Sends webhook events to destination URLs
#[derive(Clone)]
pub struct Dispatcher {
    client: Client,
}

impl Dispatcher {
    pub fn new(config: &DispatchConfig) -> Result<Self> {
        // Redirects are not followed: a 3xx is a delivered response, not a hop.
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| BridgeError::internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// POST `event` to every destination independently, preserving destination order
    /// in the returned outcomes. `pipeline` tags every log line.
    pub async fn dispatch(
        &self,
        pipeline: &str,
        destinations: &[String],
        event: &WebhookEvent,
    ) -> Vec<DeliveryOutcome> {
        let body = match event.to_pretty_json() {
            Ok(body) => body,
            Err(e) => {
                warn!(
                    pipeline = %pipeline,
                    event_id = %event.id,
                    "Failed to serialize event: {}",
                    e
                );
                return destinations
                    .iter()
                    .map(|destination| DeliveryOutcome {
                        destination: destination.clone(),
                        result: Err(DispatchError::Serialization {
                            message: e.to_string(),
                        }),
                        duration: Duration::ZERO,
                    })
                    .collect();
            }
        };

        debug!(
            pipeline = %pipeline,
            event_id = %event.id,
            "Forwarding payload:\n{}",
            String::from_utf8_lossy(&body)
        );

        let deliveries = destinations.iter().map(|destination| {
            let body = body.clone();
            async move {
                let started = Instant::now();
                let result = self.deliver(destination, body).await;
                DeliveryOutcome {
                    destination: destination.clone(),
                    result,
                    duration: started.elapsed(),
                }
            }
        });

        let outcomes = join_all(deliveries).await;

        for outcome in &outcomes {
            match &outcome.result {
                Ok(status) => info!(
                    pipeline = %pipeline,
                    event_id = %event.id,
                    resource = %event.resource,
                    event = %event.event,
                    status = status.as_u16(),
                    "Event forwarded to {}",
                    outcome.destination
                ),
                Err(e) => warn!(
                    pipeline = %pipeline,
                    event_id = %event.id,
                    resource = %event.resource,
                    event = %event.event,
                    "Forward to {} failed: {}",
                    outcome.destination,
                    e
                ),
            }
        }

        outcomes
    }

    /// One POST of an already-serialized body
    pub async fn deliver(
        &self,
        destination: &str,
        body: Vec<u8>,
    ) -> std::result::Result<StatusCode, DispatchError> {
        let response = self
            .client
            .post(destination)
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_LENGTH, body.len())
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(DispatchError::Rejected {
                status: status.as_u16(),
            });
        }

        Ok(status)
    }
}
