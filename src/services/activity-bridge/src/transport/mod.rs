//! Transport seam
//!
//! A transport owns one real-time session for one pipeline. The bridge only
//! needs a handler per verb, connect with a credential, disconnect, and a
//! liveness check for `/health`. Handlers run on whatever task the transport reads
//! on, so they must not block.

pub mod relay;

use crate::error::TransportError;
use crate::models::{Activity, Credential};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

pub use relay::{RelayTransport, RelayTransportFactory};

#[cfg(test)]
pub(crate) mod fake;

/// Callback invoked once per inbound activity
pub type ActivityHandler = Arc<dyn Fn(Activity) + Send + Sync>;

/// One real-time session
#[async_trait]
pub trait Transport: Send + Sync {
    /// Register `handler` for activities tagged with `verb`.
    /// Called for every known verb before [`Transport::connect`].
    fn on_activity(&self, verb: &str, handler: ActivityHandler);

    /// Establish the session
    async fn connect(&self, credential: &Credential) -> Result<(), TransportError>;

    /// Tear the session down
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// False once the session is gone, including when the remote end dropped it
    fn is_connected(&self) -> bool;
}

/// Creates an independent transport for each pipeline
pub trait TransportFactory: Send + Sync {
    fn create(&self, pipeline: &str) -> Arc<dyn Transport>;
}

/// Verb-keyed handler table shared by transport implementations
#[derive(Default)]
pub struct HandlerTable {
    handlers: RwLock<HashMap<String, Vec<ActivityHandler>>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, verb: &str, handler: ActivityHandler) {
        self.handlers
            .write()
            .entry(verb.to_string())
            .or_default()
            .push(handler);
    }

    /// Hand `activity` to every handler registered for its verb.
    /// Returns how many handlers ran.
    pub fn deliver(&self, activity: Activity) -> usize {
        let handlers = match self.handlers.read().get(&activity.verb) {
            Some(handlers) => handlers.clone(),
            None => return 0,
        };

        let count = handlers.len();
        if let Some((last, rest)) = handlers.split_last() {
            for handler in rest {
                handler(activity.clone());
            }
            last(activity);
        }
        count
    }

    pub fn verbs(&self) -> Vec<String> {
        let mut verbs: Vec<String> = self.handlers.read().keys().cloned().collect();
        verbs.sort();
        verbs
    }
}
