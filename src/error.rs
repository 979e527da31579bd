//! Error types for simbridge.

use std::path::PathBuf;
use std::time::Duration;

/// Errors raised by the job registry.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Unknown job_id: {id}")]
    NotFound { id: String },

    #[error("Timed out after {timeout:?} waiting for job {id}")]
    WaitTimeout { id: String, timeout: Duration },

    #[error("Job registry is shutting down")]
    ShuttingDown,

    #[error("Failed to start job worker: {reason}")]
    Spawn { reason: String },
}

/// Errors raised while persisting or reading job artifacts.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("Failed to write artifact {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read artifact {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid job resource locator: {0}")]
    InvalidLocator(String),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors raised by the injection store.
#[derive(Debug, thiserror::Error)]
pub enum InjectionError {
    #[error("message cannot be empty")]
    EmptyMessage,
}

/// Errors raised when talking to the simulation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SimError {
    #[error("Simulation client unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Failed to connect to {address}:{rpc_port}/{stream_port}: {reason}")]
    Connect {
        address: String,
        rpc_port: u16,
        stream_port: u16,
        reason: String,
    },

    #[error("Procedure not supported: {procedure}")]
    Unsupported { procedure: String },

    #[error("Call to {procedure} failed: {reason}")]
    Call { procedure: String, reason: String },

    #[error("Connection closed")]
    Closed,
}

impl SimError {
    /// Short kind label used in diagnostics payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            SimError::Unavailable { .. } => "Unavailable",
            SimError::Connect { .. } => "ConnectionError",
            SimError::Unsupported { .. } => "Unsupported",
            SimError::Call { .. } => "CallError",
            SimError::Closed => "Closed",
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

/// Errors raised by the HTTP server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind to {addr}: {reason}")]
    Bind { addr: String, reason: String },

    #[error("Server error: {0}")]
    Serve(#[from] std::io::Error),
}
