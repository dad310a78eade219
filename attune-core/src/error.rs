//! Error types for attune-core

use thiserror::Error;

use crate::assessment::ProviderError;

/// Error type for monitoring pipeline operations
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Operation referenced a session that is not active.
    #[error("session not found: {0}")]
    NotFound(String),

    /// `start_session` was called with an ID that is already active.
    #[error("session already active: {0}")]
    AlreadyActive(String),

    /// The assessment provider failed; the turn was aborted with no state change.
    #[error("assessment unavailable: {0}")]
    AssessmentUnavailable(#[from] ProviderError),

    /// Operation is not valid for the session's current lifecycle state.
    ///
    /// The registry evicts a session when it ends, so operations after
    /// `end_session` surface as [`MonitorError::NotFound`]. This variant
    /// is reserved for embedders that layer extra lifecycle states (for
    /// example paused or archived sessions) on top of the registry.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Configuration could not be parsed.
    #[error("config error: {0}")]
    Config(String),

    /// IO operation failed (config loading).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for monitoring operations
pub type Result<T> = std::result::Result<T, MonitorError>;
