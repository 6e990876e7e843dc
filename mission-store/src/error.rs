//! Store error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite failure.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("mission not found: {0}")]
    NotFound(i64),

    /// The requested status change violates the mission DAG.
    #[error("illegal status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Storage(e.to_string())
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        StoreError::Storage(format!("blocking task failed: {e}"))
    }
}
