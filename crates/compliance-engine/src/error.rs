//! Error types for the compliance engine

use shared_types::ValidationError;
use thiserror::Error;

/// Storage and connectivity failures reported by a [`crate::store::ComplianceStore`]
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Invalid {table} row: {reason}")]
    InvalidRow { table: &'static str, reason: String },

    #[error("Unique constraint violated: {0}")]
    Conflict(String),
}

impl StoreError {
    /// Connectivity and query failures may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Query(_))
    }
}

#[derive(Debug, Error)]
pub enum ComplianceError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Driver not found: {0}")]
    DriverNotFound(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// `retryable` holds when every unit failed on a retryable storage error.
    #[error("All {failed} units of {operation} failed")]
    AllUnitsFailed {
        operation: &'static str,
        failed: u32,
        retryable: bool,
    },
}

impl ComplianceError {
    /// Storage failures may succeed on retry; everything else will not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ComplianceError::Storage(e) => e.is_retryable(),
            ComplianceError::AllUnitsFailed { retryable, .. } => *retryable,
            _ => false,
        }
    }
}

impl From<ValidationError> for ComplianceError {
    fn from(err: ValidationError) -> Self {
        ComplianceError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ComplianceError>;
