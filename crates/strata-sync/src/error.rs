//! Error types for synchronization and data access.

use strata_core::{ArgumentContractError, ModelError};

/// Errors raised while synchronizing a database or accessing its data.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The score is invalid.
    #[error("Invalid score: {0}")]
    Model(#[from] ModelError),

    /// The dialect cannot express a required schema operation.
    #[error("Unsupported operation '{operation}' for '{grain}.{element}' on {dialect}")]
    Unsupported {
        /// Grain being synchronized.
        grain: String,
        /// Table, view or index concerned.
        element: String,
        /// Requested operation.
        operation: &'static str,
        /// Dialect name.
        dialect: &'static str,
    },

    /// A grain could not be brought to its declared state.
    #[error("Grain '{grain}' did not converge at '{element}': {reason}")]
    Convergence {
        /// Grain being synchronized.
        grain: String,
        /// Table, view or index concerned.
        element: String,
        /// What failed.
        reason: String,
    },

    /// A record was changed by someone else since it was read.
    #[error("Record of '{element}' was changed concurrently, reload and retry")]
    ConcurrencyViolation {
        /// Table of the record.
        element: String,
    },

    /// Too many data accessors are open on one call context.
    #[error("Too many data accessors open on one call context (limit {limit})")]
    ResourceLeak {
        /// Maximum number of open accessors.
        limit: usize,
    },

    /// Arguments do not match a statement.
    #[error(transparent)]
    ArgumentContract(#[from] ArgumentContractError),

    /// The score has no such table or view.
    #[error("Unknown element '{grain}.{name}'")]
    UnknownElement {
        /// Grain name.
        grain: String,
        /// Element name.
        name: String,
    },

    /// The call context or accessor was already closed.
    #[error("Call context is closed")]
    Closed,

    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO error (reading scores or writing reports).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// Returns true when repeating the unit of work may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyViolation { .. })
    }
}

/// Result type for synchronization and data access.
pub type Result<T> = std::result::Result<T, SyncError>;
