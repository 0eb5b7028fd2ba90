//! Error types for the monitoring agent.
//!
//! Hand-rolled, matching the rest of the collector stack: every variant maps
//! to a single failure mode the caller needs to branch on, with a plain
//! `Display` impl instead of a derive macro.

use std::fmt;

/// Top-level error for agent-core operations.
#[derive(Debug)]
pub enum AgentError {
    /// Configuration failed to load or validate.
    ConfigInvalid(String),
    /// The database could not be reached at all (pool verification failure).
    DbUnreachable(String),
    /// A sampler query failed. Carries the sampler name for logging.
    SamplerFailure { sampler: &'static str, message: String },
    /// HTTP transport failure (network error, non-2xx status).
    Transport(String),
    /// The circuit breaker is open; the caller must buffer instead of sending.
    CircuitOpen,
    /// Local log tailing hit an I/O error that isn't a expected rotation race.
    LogTailerIo(String),
    /// The persistent buffer store failed (open, read, or write).
    BufferStore(String),
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::ConfigInvalid(msg) => write!(f, "invalid configuration: {msg}"),
            AgentError::DbUnreachable(msg) => write!(f, "database unreachable: {msg}"),
            AgentError::SamplerFailure { sampler, message } => {
                write!(f, "{sampler} collection failed: {message}")
            }
            AgentError::Transport(msg) => write!(f, "transport error: {msg}"),
            AgentError::CircuitOpen => write!(f, "circuit breaker is open"),
            AgentError::LogTailerIo(msg) => write!(f, "log tailer I/O error: {msg}"),
            AgentError::BufferStore(msg) => write!(f, "buffer store error: {msg}"),
        }
    }
}

impl std::error::Error for AgentError {}

impl From<postgres::Error> for AgentError {
    fn from(e: postgres::Error) -> Self {
        AgentError::DbUnreachable(e.to_string())
    }
}

impl From<r2d2::Error> for AgentError {
    fn from(e: r2d2::Error) -> Self {
        AgentError::DbUnreachable(e.to_string())
    }
}

impl From<rusqlite::Error> for AgentError {
    fn from(e: rusqlite::Error) -> Self {
        AgentError::BufferStore(e.to_string())
    }
}
