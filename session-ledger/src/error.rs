//! Error types for the session ledger

use crate::types::{PlayerId, SessionId};
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Session lookup failed
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    /// Player lookup failed
    #[error("Player {player_id} not found in session {session_id}")]
    PlayerNotFound {
        /// Session searched
        session_id: SessionId,
        /// Missing player
        player_id: PlayerId,
    },

    /// Missing or malformed input (ids, amounts)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// External read exceeded its budget
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        /// Operation that stalled
        operation: String,
        /// Budget that was exceeded
        timeout_ms: u64,
    },

    /// Session source failure
    #[error("Source error: {0}")]
    Source(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether retrying the same request may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout { .. } | Error::Source(_))
    }
}
