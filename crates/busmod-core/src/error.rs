// ── Core error types ──
//
// Runtime-facing errors from busmod-core. Transport details are folded
// into a handful of bus variants by the `From<busmod_api::Error>` impl;
// persistence errors always carry the artifact path.

use std::path::PathBuf;

use thiserror::Error;

use crate::model::BundleState;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Bus errors ───────────────────────────────────────────────────
    #[error("Cannot connect to bus at {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("Bus connection closed")]
    BusClosed,

    #[error("Bus error: {message}")]
    Bus { message: String },

    // ── Instance errors ──────────────────────────────────────────────
    #[error("Instance not found: {id}")]
    InstanceNotFound { id: String },

    #[error("Invalid instance id '{id}': {reason}")]
    InvalidInstanceId { id: String, reason: String },

    // ── Persistence errors ───────────────────────────────────────────
    #[error("Cannot access {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt record {}: {source}", path.display())]
    CorruptRecord {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Delete verification failed, file still exists: {}", path.display())]
    DeleteVerification { path: PathBuf },

    // ── Lifecycle errors ─────────────────────────────────────────────
    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Bundle status cannot move from {from} to {to}")]
    InvalidTransition { from: BundleState, to: BundleState },

    #[error("Operation not supported: {operation}")]
    Unsupported { operation: String },

    #[error(transparent)]
    Handler(#[from] HandlerError),

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub(crate) fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<busmod_api::Error> for CoreError {
    fn from(err: busmod_api::Error) -> Self {
        match err {
            busmod_api::Error::Connect { endpoint, source } => CoreError::ConnectionFailed {
                endpoint,
                reason: source.to_string(),
            },
            busmod_api::Error::Closed => CoreError::BusClosed,
            busmod_api::Error::Io(e) => CoreError::Bus {
                message: e.to_string(),
            },
            busmod_api::Error::Encode(e) => CoreError::Internal(format!("event encoding: {e}")),
            busmod_api::Error::Decode(e) => CoreError::Bus {
                message: e.to_string(),
            },
        }
    }
}

// ── Handler-reported failure ─────────────────────────────────────────

/// Failure reported by module code (validator, init, hooks, tools).
///
/// The message is surfaced verbatim in bundle status and API responses.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<CoreError> for HandlerError {
    fn from(err: CoreError) -> Self {
        Self::new(err.to_string())
    }
}
