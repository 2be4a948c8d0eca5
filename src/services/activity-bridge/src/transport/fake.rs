//! In-memory transport for unit tests

use super::{ActivityHandler, HandlerTable, Transport, TransportFactory};
use crate::error::TransportError;
use crate::models::{Activity, Credential};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
pub(crate) struct FakeTransport {
    pub handlers: HandlerTable,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    /// Number of upcoming connects that fail
    pub failing_connects: AtomicUsize,
    pub fail_disconnect: AtomicBool,
    pub connected: AtomicBool,
    /// Verbs delivered from inside `connect`, before it returns
    pub emit_during_connect: Mutex<Vec<String>>,
}

impl FakeTransport {
    /// Push an activity with `verb` through the registered handlers
    pub fn emit(&self, verb: &str) -> usize {
        self.handlers.deliver(Activity {
            id: format!("act-{}", verb),
            verb: verb.to_string(),
            ..Default::default()
        })
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn on_activity(&self, verb: &str, handler: ActivityHandler) {
        self.handlers.register(verb, handler);
    }

    async fn connect(&self, _credential: &Credential) -> Result<(), TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failing_connects.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_connects.store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::connect("handshake refused"));
        }
        self.connected.store(true, Ordering::SeqCst);

        let verbs: Vec<String> = self.emit_during_connect.lock().drain(..).collect();
        for verb in verbs {
            self.emit(&verb);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        if self.fail_disconnect.load(Ordering::SeqCst) {
            return Err(TransportError::disconnect("socket already closed"));
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Hands out one [`FakeTransport`] per pipeline and remembers them by name
#[derive(Default)]
pub(crate) struct FakeTransportFactory {
    created: Mutex<HashMap<String, Arc<FakeTransport>>>,
    fail_disconnect: bool,
}

impl FakeTransportFactory {
    pub fn failing_disconnects() -> Self {
        Self {
            created: Mutex::new(HashMap::new()),
            fail_disconnect: true,
        }
    }

    pub fn transport(&self, pipeline: &str) -> Option<Arc<FakeTransport>> {
        self.created.lock().get(pipeline).cloned()
    }
}

impl TransportFactory for FakeTransportFactory {
    fn create(&self, pipeline: &str) -> Arc<dyn Transport> {
        let transport = Arc::new(FakeTransport::default());
        transport
            .fail_disconnect
            .store(self.fail_disconnect, Ordering::SeqCst);
        self.created
            .lock()
            .insert(pipeline.to_string(), Arc::clone(&transport));
        transport
    }
}
