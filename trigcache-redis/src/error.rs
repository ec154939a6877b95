//! Error types for Redis store operations.
//!
//! All errors convert into [`StoreError`] so the cache and quota layers can
//! tell an unreachable Redis apart from a Redis that answered badly.
//!
//! [`StoreError`]: trigcache_backend::StoreError

use redis::RedisError;
use trigcache_backend::StoreError;

/// Error type for Redis store operations.
///
/// # When You'll Encounter This
///
/// - [`RedisStoreBuilder::build`] with an invalid connection URL
/// - The first store operation when Redis is unreachable (the connection is
///   established lazily)
/// - Any operation when the Redis server returns an error
///
/// [`RedisStoreBuilder::build`]: crate::RedisStoreBuilder::build
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An error from the underlying Redis client.
    #[error("Redis store error: {0}")]
    Redis(#[from] RedisError),

    /// A reply that could not be interpreted.
    #[error("unexpected Redis reply: {0}")]
    UnexpectedReply(String),
}

impl From<Error> for StoreError {
    fn from(error: Error) -> Self {
        match &error {
            Error::Redis(e)
                if e.is_io_error()
                    || e.is_connection_refusal()
                    || e.is_connection_dropped()
                    || e.is_timeout() =>
            {
                StoreError::Connection(Box::new(error))
            }
            _ => StoreError::Internal(Box::new(error)),
        }
    }
}
