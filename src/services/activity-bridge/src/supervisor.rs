//! Multi-pipeline lifecycle
//!
//! Starts every validated pipeline in order and coordinates shutdown across
//! them. A credential that fails verification aborts startup for the whole
//! process; pipelines already started are stopped first.

use crate::config::{ValidatedConfig, ValidatedPipeline};
use crate::dispatcher::Dispatcher;
use crate::error::{BridgeError, Result};
use crate::identity::IdentityVerifier;
use crate::metrics::BridgeMetrics;
use crate::pipeline::PipelineRuntime;
use crate::transport::TransportFactory;

use futures::future::join_all;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

/// Owns every running pipeline
pub struct PipelineSupervisor {
    verifier: Arc<dyn IdentityVerifier>,
    transports: Arc<dyn TransportFactory>,
    dispatcher: Dispatcher,
    tracker: TaskTracker,
    metrics: Option<BridgeMetrics>,
    runtimes: RwLock<Vec<Arc<PipelineRuntime>>>,
}

impl PipelineSupervisor {
    pub fn new(
        verifier: Arc<dyn IdentityVerifier>,
        transports: Arc<dyn TransportFactory>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            verifier,
            transports,
            dispatcher,
            tracker: TaskTracker::new(),
            metrics: None,
            runtimes: RwLock::new(Vec::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: BridgeMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Handles to every runtime created so far
    pub fn runtimes(&self) -> Vec<Arc<PipelineRuntime>> {
        self.runtimes.read().clone()
    }

    /// Verify, build and start each pipeline in definition order.
    ///
    /// The first failure stops whatever already started and is returned.
    pub async fn run(&self, config: &ValidatedConfig) -> Result<Vec<Arc<PipelineRuntime>>> {
        let mut started = Vec::with_capacity(config.pipelines.len());

        for pipeline in &config.pipelines {
            match self.start_pipeline(pipeline).await {
                Ok(runtime) => started.push(runtime),
                Err(e) => {
                    error!(pipeline = %pipeline.name, "Startup aborted: {}", e);
                    if let Err(stop_error) = self.shutdown().await {
                        warn!("Cleanup after failed startup: {}", stop_error);
                    }
                    return Err(e);
                }
            }
        }

        info!("{} pipeline(s) running", started.len());
        Ok(started)
    }

    async fn start_pipeline(&self, pipeline: &ValidatedPipeline) -> Result<Arc<PipelineRuntime>> {
        let identity = self
            .verifier
            .verify(&pipeline.credential)
            .await
            .map_err(|e| e.for_pipeline(&pipeline.name))?;

        info!(
            pipeline = %pipeline.name,
            destinations = ?pipeline.destinations,
            "Authenticated as {}",
            identity.display_name
        );
        if pipeline.firehose {
            info!(pipeline = %pipeline.name, "No resources configured, forwarding every resource");
        }

        let mut runtime = PipelineRuntime::new(
            pipeline.name.clone(),
            pipeline.credential.clone(),
            pipeline.destinations.clone(),
            self.transports.create(&pipeline.name),
            self.dispatcher.clone(),
        )
        .with_tracker(self.tracker.clone());
        if let Some(metrics) = &self.metrics {
            runtime = runtime.with_metrics(metrics.clone());
        }

        let runtime = Arc::new(runtime);
        self.runtimes.write().push(Arc::clone(&runtime));

        for resource in &pipeline.resources {
            runtime.start(resource, pipeline.filter.clone()).await?;
        }

        Ok(runtime)
    }

    /// Stop every runtime, collecting rather than short-circuiting failures
    pub async fn shutdown(&self) -> Result<()> {
        let runtimes = self.runtimes();
        info!("Stopping {} pipeline(s)", runtimes.len());

        let errors: Vec<_> = join_all(runtimes.iter().map(|runtime| runtime.stop()))
            .await
            .into_iter()
            .filter_map(|result| result.err())
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(BridgeError::Shutdown(errors))
        }
    }

    /// Wait up to `grace` for dispatches already in flight.
    /// Returns `false` if some were still running when the grace period ran out.
    pub async fn wait_for_inflight(&self, grace: Duration) -> bool {
        self.tracker.close();
        let pending = self.tracker.len();
        if pending > 0 {
            info!("Waiting for {} in-flight deliveries", pending);
        }

        let drained = tokio::time::timeout(grace, self.tracker.wait()).await.is_ok();
        if !drained {
            warn!(
                "{} deliveries still in flight after {:?}",
                self.tracker.len(),
                grace
            );
        }
        drained
    }
}
