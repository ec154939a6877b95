//! Redis store for trigcache.
//!
//! [`RedisStore`] implements [`trigcache_backend::Store`] on top of a lazily
//! created [`redis::aio::ConnectionManager`]. Pattern deletes use `SCAN` +
//! `UNLINK` in batches and never `KEYS`; quota counters are incremented in a
//! `MULTI`/`EXEC` block together with their expiry.
#![warn(missing_docs)]

pub mod error;
pub mod store;

#[doc(inline)]
pub use crate::error::Error;
#[doc(inline)]
pub use crate::store::{RedisStore, RedisStoreBuilder};
