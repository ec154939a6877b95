//! Error types for store operations.

use std::time::Duration;

use thiserror::Error;

/// Error type for store operations.
///
/// Groups store failures by how callers react to them: `Connection` and
/// `Timeout` mean the store is unreachable and the caller degrades,
/// `Internal` means the store answered with something unusable.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Network interaction error.
    ///
    /// Connection refused, reset, authentication failure and the like.
    #[error(transparent)]
    Connection(Box<dyn std::error::Error + Send + Sync>),

    /// The store did not answer within the configured deadline.
    #[error("store did not respond within {0:?}")]
    Timeout(Duration),

    /// Internal store error, state or protocol error.
    ///
    /// Any error not related to reaching the store.
    #[error(transparent)]
    Internal(Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    /// Whether the error means the store could not be reached.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Connection(_) | StoreError::Timeout(_))
    }

    /// Wraps an arbitrary message as an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        StoreError::Internal(message.into().into())
    }
}
