// Error types shared across the tracker
use thiserror::Error;

/// Failures surfaced by tracking operations.
///
/// `Clone` so one single-flight result can be handed to every waiter.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TrackerError {
    #[error("upstream request failed: {0}")]
    Upstream(String),

    #[error("all {0} batches failed")]
    AllBatchesFailed(usize),

    #[error("operation timed out after {0}s")]
    Timeout(u64),

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<anyhow::Error> for TrackerError {
    fn from(err: anyhow::Error) -> Self {
        TrackerError::Upstream(format!("{:#}", err))
    }
}

/// Failures of the underlying key-value storage
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage quota exceeded ({needed} bytes needed, {limit} allowed)")]
    QuotaExceeded { needed: usize, limit: usize },

    #[error("storage unavailable")]
    Unavailable,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
