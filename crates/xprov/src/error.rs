//! CLI error types with miette diagnostics.
//!
//! Provisioning failures stay generic at this boundary: users see a
//! correlation id, operators grep the logs for it. Everything else maps
//! to actionable help text.

use miette::Diagnostic;
use thiserror::Error;
use uuid::Uuid;

use xprov_core::{EngineError, ProvisionFailure};

/// Exit codes.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Provisioning ─────────────────────────────────────────────────
    #[error("Provisioning failed (correlation id {correlation_id})")]
    #[diagnostic(
        code(xprov::provisioning_failed),
        help(
            "The operation did not complete. Re-run with -vv for detail, or\n\
             search the service logs for the correlation id above."
        )
    )]
    Provision {
        correlation_id: Uuid,
        #[source]
        source: EngineError,
    },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration file not found")]
    #[diagnostic(
        code(xprov::no_config),
        help(
            "Create one with: xprov config init\n\
             Expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(xprov::profile_not_found),
        help("Available profiles: {available}")
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No credentials configured for profile '{profile}'")]
    #[diagnostic(
        code(xprov::no_credentials),
        help(
            "Set a password in the profile, point password_env at an\n\
             environment variable, or store one in the system keyring."
        )
    )]
    NoCredentials { profile: String },

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(xprov::validation))]
    Validation { field: String, reason: String },

    #[error("Configuration error: {message}")]
    #[diagnostic(code(xprov::config))]
    Config { message: String },

    // ── IO / serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON payload: {0}")]
    #[diagnostic(code(xprov::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Provision { source, .. } => match source {
                EngineError::Authentication { .. } => exit_code::AUTH,
                EngineError::InboundNotFound { .. } => exit_code::NOT_FOUND,
                EngineError::Discovery { .. } => exit_code::CONNECTION,
                EngineError::ProtocolValidation { .. } | EngineError::Config { .. } => {
                    exit_code::USAGE
                }
                _ => exit_code::GENERAL,
            },
            Self::Validation { .. } => exit_code::USAGE,
            Self::NoCredentials { .. } => exit_code::AUTH,
            Self::ProfileNotFound { .. } | Self::NoConfig { .. } => exit_code::NOT_FOUND,
            _ => exit_code::GENERAL,
        }
    }
}

impl From<ProvisionFailure> for CliError {
    fn from(failure: ProvisionFailure) -> Self {
        Self::Provision {
            correlation_id: failure.correlation_id,
            source: failure.error,
        }
    }
}

impl From<EngineError> for CliError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Config { message } => Self::Config { message },
            EngineError::ProtocolValidation { message } => Self::Validation {
                field: "server profile".into(),
                reason: message,
            },
            other => Self::Config {
                message: other.to_string(),
            },
        }
    }
}

impl From<xprov_config::ConfigError> for CliError {
    fn from(err: xprov_config::ConfigError) -> Self {
        match err {
            xprov_config::ConfigError::NoCredentials { profile } => {
                Self::NoCredentials { profile }
            }
            xprov_config::ConfigError::Validation { field, reason } => {
                Self::Validation { field, reason }
            }
            other => Self::Config {
                message: other.to_string(),
            },
        }
    }
}
