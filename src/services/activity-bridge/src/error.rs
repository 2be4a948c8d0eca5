//! Error handling for the activity bridge
//!
//! Errors are split by where they surface:
//! - [`ConfigError`] and [`CredentialError`] are startup-fatal
//! - [`TransportError`] is reported and leaves the caller free to retry
//! - [`DispatchError`] is per destination, per event, and only ever logged
//!
//! [`BridgeError`] aggregates all of them for the binary and the supervisor.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Top-level error type for the bridge
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// Several runtimes failed to stop cleanly
    #[error("{} pipeline(s) failed to stop: {}", .0.len(), join_errors(.0))]
    Shutdown(Vec<PipelineError>),

    /// Errors from the health/metrics surface
    #[error("Server error: {message}")]
    Server { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Configuration validation and loading errors
///
/// Index values are zero-based positions in the pipeline list.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("config must define at least one pipeline")]
    EmptyConfig,

    #[error("pipeline {index} ({name:?}): token_env is required and must resolve to a credential")]
    MissingCredential { index: usize, name: String },

    #[error("pipeline {index} ({name:?}): at least one target is required")]
    NoDestinations { index: usize, name: String },

    #[error("pipeline {index} ({name:?}): target url must not be empty")]
    InvalidDestination { index: usize, name: String },

    #[error("pipeline {index} ({name:?}): unknown resource {resource:?}")]
    UnknownResource {
        index: usize,
        name: String,
        resource: String,
    },

    #[error("failed to read config file {path}: {message}")]
    Read { path: String, message: String },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: String, message: String },

    #[error("invalid setting {field}: {message}")]
    InvalidSetting { field: String, message: String },
}

impl ConfigError {
    /// Create a read error
    pub fn read<P: Into<String>, S: Into<String>>(path: P, message: S) -> Self {
        Self::Read {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a parse error
    pub fn parse<P: Into<String>, S: Into<String>>(path: P, message: S) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an invalid setting error
    pub fn invalid_setting<F: Into<String>, S: Into<String>>(field: F, message: S) -> Self {
        Self::InvalidSetting {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Name of the pipeline the error refers to, if any
    pub fn pipeline_name(&self) -> Option<&str> {
        match self {
            ConfigError::MissingCredential { name, .. }
            | ConfigError::NoDestinations { name, .. }
            | ConfigError::InvalidDestination { name, .. }
            | ConfigError::UnknownResource { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// Identity verification errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("pipeline {pipeline:?}: the token is not valid or has expired (HTTP {status})")]
    Rejected { pipeline: String, status: u16 },

    #[error("pipeline {pipeline:?}: identity service unreachable: {message}")]
    Unreachable { pipeline: String, message: String },

    #[error("pipeline {pipeline:?}: unexpected identity response: {message}")]
    InvalidResponse { pipeline: String, message: String },
}

impl CredentialError {
    /// Pipeline whose credential failed
    pub fn pipeline(&self) -> &str {
        match self {
            CredentialError::Rejected { pipeline, .. }
            | CredentialError::Unreachable { pipeline, .. }
            | CredentialError::InvalidResponse { pipeline, .. } => pipeline,
        }
    }

    /// Attach the pipeline name to an error raised before it was known
    pub fn for_pipeline<S: Into<String>>(self, name: S) -> Self {
        let name = name.into();
        match self {
            CredentialError::Rejected { status, .. } => CredentialError::Rejected {
                pipeline: name,
                status,
            },
            CredentialError::Unreachable { message, .. } => CredentialError::Unreachable {
                pipeline: name,
                message,
            },
            CredentialError::InvalidResponse { message, .. } => CredentialError::InvalidResponse {
                pipeline: name,
                message,
            },
        }
    }
}

/// Transport session errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("failed to connect session: {message}")]
    Connect { message: String },

    #[error("failed to disconnect session: {message}")]
    Disconnect { message: String },

    #[error("session failed: {message}")]
    Session { message: String },
}

impl TransportError {
    /// Create a connect error
    pub fn connect<S: Into<String>>(message: S) -> Self {
        Self::Connect {
            message: message.into(),
        }
    }

    /// Create a disconnect error
    pub fn disconnect<S: Into<String>>(message: S) -> Self {
        Self::Disconnect {
            message: message.into(),
        }
    }

    /// Create a mid-session error
    pub fn session<S: Into<String>>(message: S) -> Self {
        Self::Session {
            message: message.into(),
        }
    }
}

/// Delivery failure for a single destination
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("failed to serialize event: {message}")]
    Serialization { message: String },

    #[error("destination unreachable: {message}")]
    Network { message: String },

    #[error("request timed out: {message}")]
    Timeout { message: String },

    #[error("destination rejected event with HTTP {status}")]
    Rejected { status: u16 },

    #[error("request failed: {message}")]
    Request { message: String },
}

impl DispatchError {
    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::Serialization { .. } => "serialization",
            DispatchError::Network { .. } => "network",
            DispatchError::Timeout { .. } => "timeout",
            DispatchError::Rejected { .. } => "rejected",
            DispatchError::Request { .. } => "request",
        }
    }
}

impl From<reqwest::Error> for DispatchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DispatchError::Timeout {
                message: err.to_string(),
            }
        } else if err.is_connect() {
            DispatchError::Network {
                message: err.to_string(),
            }
        } else {
            DispatchError::Request {
                message: err.to_string(),
            }
        }
    }
}

/// Runtime lifecycle errors, always tagged with the pipeline name
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("pipeline {pipeline:?}: {source}")]
    Transport {
        pipeline: String,
        #[source]
        source: TransportError,
    },

    #[error("pipeline {pipeline:?}: runtime already stopped")]
    Stopped { pipeline: String },
}

impl PipelineError {
    /// Pipeline the error belongs to
    pub fn pipeline(&self) -> &str {
        match self {
            PipelineError::Transport { pipeline, .. } | PipelineError::Stopped { pipeline } => {
                pipeline
            }
        }
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::Parse {
            path: String::from("<sources>"),
            message: err.to_string(),
        }
    }
}

impl BridgeError {
    /// Create a server error
    pub fn server<S: Into<String>>(message: S) -> Self {
        Self::Server {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the process must refuse to start because of this error
    pub fn is_startup_fatal(&self) -> bool {
        matches!(self, BridgeError::Config(_) | BridgeError::Credential(_))
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            BridgeError::Credential(_) => StatusCode::UNAUTHORIZED,
            BridgeError::Pipeline(_) | BridgeError::Shutdown(_) => StatusCode::SERVICE_UNAVAILABLE,
            BridgeError::Config(_) | BridgeError::Server { .. } | BridgeError::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            BridgeError::Config(_) => "CONFIG_ERROR",
            BridgeError::Credential(_) => "CREDENTIAL_ERROR",
            BridgeError::Pipeline(_) => "PIPELINE_ERROR",
            BridgeError::Shutdown(_) => "SHUTDOWN_ERROR",
            BridgeError::Server { .. } => "SERVER_ERROR",
            BridgeError::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": {
                "code": self.error_code(),
                "message": self.to_string(),
                "status": status.as_u16()
            }
        }));

        (status, body).into_response()
    }
}

fn join_errors(errors: &[PipelineError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
