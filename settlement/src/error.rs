//! Error types for the settlement core

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Result type for settlement operations
pub type Result<T> = std::result::Result<T, Error>;

/// Severity attached to consistency findings
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    /// Informational
    Low,
    /// Needs review
    Medium,
    /// Blocks the settlement
    High,
    /// Blocks the settlement and needs escalation
    Critical,
}

/// Error classes, one per handling policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing/invalid ids, non-positive amounts
    InputValidation,
    /// Unbalanced positions, unknown session or player
    Precondition,
    /// Over budget
    Timeout,
    /// Precision, rounding or balance mismatch
    Consistency,
    /// Tampered or stale proof
    Integrity,
    /// Configuration, IO, serialization, metrics
    Internal,
}

/// Settlement errors
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid caller input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Net positions do not sum to zero
    #[error("Unbalanced settlement: net positions sum to {net} (tolerance {tolerance})")]
    UnbalancedSettlement {
        /// Σ net positions
        net: Decimal,
        /// Tolerance applied
        tolerance: Decimal,
    },

    /// Operation exceeded its budget
    #[error("{operation} timed out after {elapsed_ms}ms")]
    Timeout {
        /// Operation name
        operation: String,
        /// Time spent before giving up
        elapsed_ms: u64,
    },

    /// Balance, precision or rounding discrepancy
    #[error("Consistency error ({severity:?}): {message}")]
    Consistency {
        /// What went wrong
        message: String,
        /// How bad it is
        severity: ErrorSeverity,
    },

    /// Proof failed verification
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Unknown warning id
    #[error("Warning not found: {0}")]
    WarningNotFound(Uuid),

    /// Session ledger error
    #[error("Ledger error: {0}")]
    Ledger(#[from] session_ledger::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Handling class of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidInput(_) => ErrorKind::InputValidation,
            Error::UnbalancedSettlement { .. } | Error::WarningNotFound(_) => ErrorKind::Precondition,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Consistency { .. } => ErrorKind::Consistency,
            Error::Integrity(_) => ErrorKind::Integrity,
            Error::Ledger(inner) => match inner {
                session_ledger::Error::SessionNotFound(_)
                | session_ledger::Error::PlayerNotFound { .. } => ErrorKind::Precondition,
                session_ledger::Error::InvalidInput(_) => ErrorKind::InputValidation,
                session_ledger::Error::Timeout { .. } => ErrorKind::Timeout,
                _ => ErrorKind::Internal,
            },
            Error::Serialization(_) | Error::Config(_) | Error::Metrics(_) | Error::Io(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Whether retrying the same request may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Ledger(inner) => inner.is_retryable(),
            other => other.kind() == ErrorKind::Timeout,
        }
    }
}
