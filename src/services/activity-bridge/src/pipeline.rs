//! Pipeline runtime
//!
//! One runtime per authenticated identity. It owns one transport session, one
//! [`SubscriptionRegistry`] and one destination list, and moves through
//! `NotStarted -> Running -> Stopped` exactly once.
//!
//! Activities are qualified on the transport's reader task. Matching events
//! are handed to a [`TaskTracker`] so a slow destination never holds up the
//! next activity. Delivery order between events is therefore not preserved.

use crate::catalog::{self, Resource};
use crate::dispatcher::Dispatcher;
use crate::error::PipelineError;
use crate::metrics::BridgeMetrics;
use crate::models::{Activity, Credential, WebhookEvent};
use crate::subscription::{EventFilter, SubscriptionRegistry};
use crate::transport::Transport;

use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Lifecycle of a pipeline runtime. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    NotStarted,
    Running,
    Stopped,
}

impl RuntimeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeState::NotStarted => "not_started",
            RuntimeState::Running => "running",
            RuntimeState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification path shared with the transport's handlers.
///
/// Holds no reference to the transport itself, so the handlers stored in the
/// transport cannot keep it alive.
struct ActivityProcessor {
    pipeline: String,
    registry: Arc<SubscriptionRegistry>,
    state: Arc<RwLock<RuntimeState>>,
    destinations: Arc<Vec<String>>,
    dispatcher: Dispatcher,
    tracker: TaskTracker,
    handle: Handle,
    metrics: Option<BridgeMetrics>,
}

impl ActivityProcessor {
    fn handle(&self, activity: Activity) {
        // A session can deliver before connect() returns, so only Stopped drops.
        if *self.state.read() == RuntimeState::Stopped {
            debug!(
                pipeline = %self.pipeline,
                verb = %activity.verb,
                "Dropping activity, pipeline stopped"
            );
            return;
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_activity(&self.pipeline, &activity.verb);
        }

        if let Some(event) = self.qualify(&activity) {
            self.submit(event);
        }
    }

    /// Translate and filter. `None` means the activity is not of interest.
    fn qualify(&self, activity: &Activity) -> Option<WebhookEvent> {
        let mapping = catalog::translate(&activity.verb)?;

        if !self.registry.matches(mapping.resource, mapping.event) {
            debug!(
                pipeline = %self.pipeline,
                resource = mapping.resource,
                event = mapping.event,
                "No subscription for event"
            );
            return None;
        }

        info!(
            pipeline = %self.pipeline,
            resource = mapping.resource,
            event = mapping.event,
            "Received {}:{}",
            mapping.resource,
            mapping.event
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_match(&self.pipeline, mapping.resource, mapping.event);
        }

        Some(WebhookEvent::from_activity(
            mapping.resource,
            mapping.event,
            activity,
        ))
    }

    fn submit(&self, event: WebhookEvent) {
        let pipeline = self.pipeline.clone();
        let dispatcher = self.dispatcher.clone();
        let destinations = Arc::clone(&self.destinations);
        let metrics = self.metrics.clone();

        self.tracker.spawn_on(
            async move {
                let outcomes = dispatcher
                    .dispatch(&pipeline, &destinations, &event)
                    .await;
                if let Some(metrics) = metrics {
                    for outcome in &outcomes {
                        metrics.record_delivery(&pipeline, outcome);
                    }
                }
            },
            &self.handle,
        );
    }
}

/// One forwarding pipeline
pub struct PipelineRuntime {
    name: String,
    credential: Credential,
    destinations: Arc<Vec<String>>,
    transport: Arc<dyn Transport>,
    dispatcher: Dispatcher,
    registry: Arc<SubscriptionRegistry>,
    state: Arc<RwLock<RuntimeState>>,
    // serializes start/stop so session work is never interleaved
    lifecycle: tokio::sync::Mutex<()>,
    handlers_registered: AtomicBool,
    tracker: TaskTracker,
    metrics: Option<BridgeMetrics>,
}

impl PipelineRuntime {
    pub fn new<S: Into<String>>(
        name: S,
        credential: Credential,
        destinations: Vec<String>,
        transport: Arc<dyn Transport>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            name: name.into(),
            credential,
            destinations: Arc::new(destinations),
            transport,
            dispatcher,
            registry: Arc::new(SubscriptionRegistry::new()),
            state: Arc::new(RwLock::new(RuntimeState::NotStarted)),
            lifecycle: tokio::sync::Mutex::new(()),
            handlers_registered: AtomicBool::new(false),
            tracker: TaskTracker::new(),
            metrics: None,
        }
    }

    /// Track dispatch tasks on a tracker shared with other runtimes
    pub fn with_tracker(mut self, tracker: TaskTracker) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_metrics(mut self, metrics: BridgeMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> RuntimeState {
        *self.state.read()
    }

    pub fn destinations(&self) -> &[String] {
        &self.destinations
    }

    /// Active subscriptions, sorted by resource
    pub fn subscriptions(&self) -> Vec<(String, EventFilter)> {
        self.registry.active_resources()
    }

    /// False when the transport has lost its session, even if still `Running`
    pub fn session_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// In-flight dispatch tasks
    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    /// Subscribe to `resource` with `filter`.
    ///
    /// The first successful call connects the transport. Later calls only
    /// replace subscriptions. A failed connect leaves the runtime
    /// `NotStarted`; calling again retries it.
    pub async fn start(
        &self,
        resource: &Resource,
        filter: EventFilter,
    ) -> Result<(), PipelineError> {
        let _guard = self.lifecycle.lock().await;

        let state = self.state();
        if state == RuntimeState::Stopped {
            return Err(PipelineError::Stopped {
                pipeline: self.name.clone(),
            });
        }

        if !filter.is_all() && !resource.supports(filter.as_str()) {
            warn!(
                pipeline = %self.name,
                resource = resource.name,
                "Resource {} never emits {:?} events",
                resource.name,
                filter.as_str()
            );
        }

        self.registry.subscribe(resource.name, filter.clone());
        info!(
            pipeline = %self.name,
            "Listening for events from the {} resource",
            resource.name
        );
        if filter.is_all() {
            for event in resource.concrete_events() {
                info!(
                    pipeline = %self.name,
                    "Registered handler to forward {}:{}",
                    resource.name,
                    event
                );
            }
        } else {
            info!(
                pipeline = %self.name,
                "Registered handler to forward {}:{}",
                resource.name,
                filter
            );
        }

        if state == RuntimeState::Running {
            return Ok(());
        }

        self.establish_session().await
    }

    async fn establish_session(&self) -> Result<(), PipelineError> {
        if !self.handlers_registered.swap(true, Ordering::SeqCst) {
            let processor = Arc::new(ActivityProcessor {
                pipeline: self.name.clone(),
                registry: Arc::clone(&self.registry),
                state: Arc::clone(&self.state),
                destinations: Arc::clone(&self.destinations),
                dispatcher: self.dispatcher.clone(),
                tracker: self.tracker.clone(),
                handle: Handle::current(),
                metrics: self.metrics.clone(),
            });

            for verb in catalog::verbs() {
                let processor = Arc::clone(&processor);
                self.transport
                    .on_activity(verb, Arc::new(move |activity| processor.handle(activity)));
            }
        }

        info!(pipeline = %self.name, "Connecting session");
        self.transport
            .connect(&self.credential)
            .await
            .map_err(|source| {
                error!(pipeline = %self.name, "Session establishment failed: {}", source);
                PipelineError::Transport {
                    pipeline: self.name.clone(),
                    source,
                }
            })?;

        *self.state.write() = RuntimeState::Running;
        if let Some(metrics) = &self.metrics {
            metrics.pipeline_started();
        }
        info!(pipeline = %self.name, destinations = ?self.destinations, "Pipeline running");
        Ok(())
    }

    /// Stop the pipeline. Safe to call repeatedly.
    ///
    /// The state moves to `Stopped` even when disconnect fails; the failure is
    /// still returned. In-flight dispatches are left to finish.
    pub async fn stop(&self) -> Result<(), PipelineError> {
        let _guard = self.lifecycle.lock().await;

        let previous = std::mem::replace(&mut *self.state.write(), RuntimeState::Stopped);
        if previous == RuntimeState::Stopped {
            return Ok(());
        }

        for (resource, filter) in self.registry.active_resources() {
            info!(pipeline = %self.name, "Stopping {}:{} subscription", resource, filter);
        }

        if previous == RuntimeState::NotStarted {
            info!(pipeline = %self.name, "Pipeline stopped before a session was established");
            return Ok(());
        }

        if let Some(metrics) = &self.metrics {
            metrics.pipeline_stopped();
        }

        match self.transport.disconnect().await {
            Ok(()) => {
                info!(pipeline = %self.name, "Pipeline stopped");
                Ok(())
            }
            Err(source) => {
                warn!(pipeline = %self.name, "Disconnect failed: {}", source);
                Err(PipelineError::Transport {
                    pipeline: self.name.clone(),
                    source,
                })
            }
        }
    }
}

impl fmt::Debug for PipelineRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineRuntime")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("destinations", &self.destinations)
            .finish_non_exhaustive()
    }
}
