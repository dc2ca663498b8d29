//! CLI error types with miette diagnostics.
//!
//! Maps runtime, config and transport errors into user-facing errors with
//! help text and a process exit code.

use miette::Diagnostic;
use thiserror::Error;

use busmod_config::ConfigError;
use busmod_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Bus ──────────────────────────────────────────────────────────
    #[error("Could not connect to the bus at {endpoint}")]
    #[diagnostic(
        code(busmod::connection_failed),
        help(
            "Check that the core (or `busmod harness --socket {endpoint}`) is running.\n\
             Reason: {reason}"
        )
    )]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("Bus connection lost")]
    #[diagnostic(
        code(busmod::bus_closed),
        help("The bus hung up. The module exits so its supervisor can restart it.")
    )]
    BusClosed,

    // ── Settings ─────────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(
        code(busmod::validation),
        help("Set it with a flag, the matching environment variable, or the settings file.")
    )]
    Validation { field: String, reason: String },

    #[error(transparent)]
    #[diagnostic(code(busmod::config))]
    Config(Box<ConfigError>),

    // ── Runtime ──────────────────────────────────────────────────────
    #[error("Instance '{id}' not found")]
    #[diagnostic(code(busmod::not_found))]
    NotFound { id: String },

    #[error(transparent)]
    #[diagnostic(code(busmod::runtime))]
    Runtime(Box<CoreError>),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(busmod::json), help("Event data must be a JSON object."))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::BusClosed => exit_code::CONNECTION,
            Self::Validation { .. } => exit_code::USAGE,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            _ => exit_code::GENERAL,
        }
    }
}

// ── Conversions ──────────────────────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { endpoint, reason } => {
                Self::ConnectionFailed { endpoint, reason }
            }
            CoreError::BusClosed => Self::BusClosed,
            CoreError::InstanceNotFound { id } => Self::NotFound { id },
            CoreError::Config { message } => Self::Validation {
                field: "settings".into(),
                reason: message,
            },
            other => Self::Runtime(Box::new(other)),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            other => Self::Config(Box::new(other)),
        }
    }
}

impl From<busmod_api::Error> for CliError {
    fn from(err: busmod_api::Error) -> Self {
        CoreError::from(err).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_error_class() {
        let refused = CliError::from(CoreError::ConnectionFailed {
            endpoint: "/tmp/bus.sock".into(),
            reason: "refused".into(),
        });
        assert_eq!(refused.exit_code(), exit_code::CONNECTION);
        assert_eq!(CliError::from(CoreError::BusClosed).exit_code(), exit_code::CONNECTION);

        let missing = CliError::from(ConfigError::Validation {
            field: "module_id".into(),
            reason: "must be set".into(),
        });
        assert_eq!(missing.exit_code(), exit_code::USAGE);

        let unknown = CliError::from(CoreError::InstanceNotFound { id: "d1".into() });
        assert_eq!(unknown.exit_code(), exit_code::NOT_FOUND);

        let other = CliError::from(CoreError::Internal("boom".into()));
        assert_eq!(other.exit_code(), exit_code::GENERAL);
    }

    #[test]
    fn transport_errors_fold_through_core() {
        let err = CliError::from(busmod_api::Error::Closed);
        assert!(matches!(err, CliError::BusClosed));
    }
}
