//! WebSocket relay transport
//!
//! Connects to a relay that pushes activity envelopes as JSON text frames:
//!
//! ```json
//! {"data": {"eventType": "conversation.activity", "activity": {"id": "...", "verb": "post", ...}}}
//! ```
//!
//! Frames with any other `eventType` are ignored. Device registration and
//! payload decryption are the relay's job.

use crate::error::TransportError;
use crate::models::{Activity, Credential};
use crate::transport::{ActivityHandler, HandlerTable, Transport, TransportFactory};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const ACTIVITY_EVENT_TYPE: &str = "conversation.activity";

struct RelaySession {
    cancel: CancellationToken,
    reader: JoinHandle<Result<(), TransportError>>,
}

/// Relay-backed transport, one per pipeline
pub struct RelayTransport {
    pipeline: String,
    url: String,
    connect_timeout: Duration,
    handlers: Arc<HandlerTable>,
    session: tokio::sync::Mutex<Option<RelaySession>>,
    connected: Arc<AtomicBool>,
}

impl RelayTransport {
    pub fn new<P: Into<String>, U: Into<String>>(
        pipeline: P,
        url: U,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            pipeline: pipeline.into(),
            url: url.into(),
            connect_timeout,
            handlers: Arc::new(HandlerTable::new()),
            session: tokio::sync::Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl Transport for RelayTransport {
    fn on_activity(&self, verb: &str, handler: ActivityHandler) {
        self.handlers.register(verb, handler);
    }

    async fn connect(&self, credential: &Credential) -> Result<(), TransportError> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Ok(());
        }

        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| {
                TransportError::connect(format!("invalid relay url {}: {}", self.url, e))
            })?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", credential.expose()))
            .map_err(|e| TransportError::connect(format!("invalid credential header: {}", e)))?;
        request.headers_mut().insert("Authorization", bearer);

        info!(pipeline = %self.pipeline, url = %self.url, "Connecting to relay");
        let (stream, _response) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| {
                    TransportError::connect(format!(
                        "timed out after {:?} connecting to {}",
                        self.connect_timeout, self.url
                    ))
                })?
                .map_err(|e| TransportError::connect(e.to_string()))?;
        info!(pipeline = %self.pipeline, "Connected to relay");

        let cancel = CancellationToken::new();
        self.connected.store(true, Ordering::SeqCst);
        let reader = tokio::spawn(read_loop(
            self.pipeline.clone(),
            stream,
            Arc::clone(&self.handlers),
            cancel.clone(),
            Arc::clone(&self.connected),
        ));

        *session = Some(RelaySession { cancel, reader });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let Some(session) = self.session.lock().await.take() else {
            return Ok(());
        };

        session.cancel.cancel();
        let joined = session.reader.await;
        self.connected.store(false, Ordering::SeqCst);
        joined.map_err(|e| TransportError::disconnect(format!("reader task failed: {}", e)))?
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

async fn read_loop<S>(
    pipeline: String,
    stream: tokio_tungstenite::WebSocketStream<S>,
    handlers: Arc<HandlerTable>,
    cancel: CancellationToken,
    connected: Arc<AtomicBool>,
) -> Result<(), TransportError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let result = read_frames(&pipeline, stream, &handlers, &cancel).await;
    connected.store(false, Ordering::SeqCst);
    result
}

async fn read_frames<S>(
    pipeline: &str,
    stream: tokio_tungstenite::WebSocketStream<S>,
    handlers: &HandlerTable,
    cancel: &CancellationToken,
) -> Result<(), TransportError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(pipeline = %pipeline, "Closing relay session");
                return write
                    .send(Message::Close(None))
                    .await
                    .map_err(|e| TransportError::disconnect(e.to_string()));
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(pipeline, text.as_bytes(), handlers)
                    }
                    Some(Ok(Message::Binary(bytes))) => handle_frame(pipeline, &bytes, handlers),
                    Some(Ok(Message::Close(frame))) => {
                        warn!(pipeline = %pipeline, ?frame, "Relay closed the session");
                        return Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let error = TransportError::session(e.to_string());
                        warn!(pipeline = %pipeline, "{}", error);
                        return Ok(());
                    }
                    None => {
                        warn!(pipeline = %pipeline, "Relay stream ended");
                        return Ok(());
                    }
                }
            }
        }
    }
}

fn handle_frame(pipeline: &str, bytes: &[u8], handlers: &HandlerTable) {
    let envelope: Value = match serde_json::from_slice(bytes) {
        Ok(value) => value,
        Err(e) => {
            debug!(pipeline = %pipeline, "Ignoring non-JSON frame: {}", e);
            return;
        }
    };

    if let Some(activity) = activity_from_envelope(envelope) {
        let verb = activity.verb.clone();
        if handlers.deliver(activity) == 0 {
            debug!(pipeline = %pipeline, verb = %verb, "No handler for verb");
        }
    }
}

/// Extract the activity carried by a relay envelope
pub fn activity_from_envelope(envelope: Value) -> Option<Activity> {
    let data = envelope.get("data")?;
    if data.get("eventType")?.as_str()? != ACTIVITY_EVENT_TYPE {
        return None;
    }

    let mut activity: Activity = serde_json::from_value(data.get("activity")?.clone()).ok()?;
    if activity.content.is_empty() {
        if let Some(text) = activity
            .object
            .as_ref()
            .and_then(|object| object.get("displayName"))
            .and_then(Value::as_str)
        {
            activity.content = text.to_string();
        }
    }
    activity.raw_data = Some(data.clone());
    Some(activity)
}

/// Builds one [`RelayTransport`] per pipeline against the same relay
#[derive(Debug, Clone)]
pub struct RelayTransportFactory {
    url: String,
    connect_timeout: Duration,
}

impl RelayTransportFactory {
    pub fn new<U: Into<String>>(url: U, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
        }
    }
}

impl TransportFactory for RelayTransportFactory {
    fn create(&self, pipeline: &str) -> Arc<dyn Transport> {
        Arc::new(RelayTransport::new(
            pipeline,
            self.url.clone(),
            self.connect_timeout,
        ))
    }
}
