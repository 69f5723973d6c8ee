//! Error types for server supervision
//!
//! Aggregates the per-layer errors (launch, readiness, transport, client)
//! into the supervisor's error type, with helper constructors for the cases
//! that carry context.

use std::path::PathBuf;
use std::time::Duration;

use crate::io::process::LaunchError;
use crate::lsp::client::ClientError;
use crate::nbls::readiness::ReadinessError;

// ============================================================================
// Supervisor Errors
// ============================================================================

/// Errors raised while activating or supervising the server
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// Launching the external process failed
    #[error("Launch error: {0}")]
    Launch(#[from] LaunchError),

    /// The server never produced its readiness marker
    #[error("Readiness error: {0}")]
    Readiness(#[from] ReadinessError),

    /// LSP client errors (handshake, requests, shutdown)
    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    /// Configuration validation errors
    #[error("Configuration error: {0}")]
    Config(#[from] LaunchConfigError),

    /// The tracked process could not be killed
    #[error("Cannot kill server process {pid}")]
    KillFailed { pid: u32 },

    /// The server did not connect back within the handshake timeout
    #[error("Server did not connect within {timeout:?}")]
    ConnectTimeout { timeout: Duration },

    /// The supervisor was shut down deliberately
    #[error("Supervisor is closed")]
    Closed,

    /// Unexpected failure with free-form context
    #[error("Unexpected supervisor failure: {reason}")]
    UnexpectedFailure { reason: String },
}

impl SupervisorError {
    /// Create an unexpected failure with context
    pub fn unexpected(reason: impl Into<String>) -> Self {
        Self::UnexpectedFailure {
            reason: reason.into(),
        }
    }
}

// ============================================================================
// Launch Configuration Errors
// ============================================================================

/// Configuration validation and preparation errors
#[derive(Debug, thiserror::Error)]
pub enum LaunchConfigError {
    /// Missing required configuration field
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    /// Server binary validation failed
    #[error("Cannot execute server binary: {server_path}")]
    ServerBinaryValidation {
        server_path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The storage/userdir path could not be prepared
    #[error("Cannot prepare storage directory: {storage_dir}")]
    StorageValidation {
        storage_dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid timeout value
    #[error("Invalid timeout: {timeout:?} - {reason}")]
    InvalidTimeout { timeout: Duration, reason: String },
}

impl LaunchConfigError {
    /// Create a missing field error
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Create an invalid timeout error
    pub fn invalid_timeout(timeout: Duration, reason: impl Into<String>) -> Self {
        Self::InvalidTimeout {
            timeout,
            reason: reason.into(),
        }
    }
}
