//! In-process store for trigcache.
//!
//! [`MemoryStore`] implements [`trigcache_backend::Store`] with a
//! [`dashmap::DashMap`]. It is what local development runs against when no
//! Redis is configured and what the trigcache test suites use, including to
//! simulate an unreachable store via [`MemoryStore::set_available`].
#![warn(missing_docs)]

mod glob;
mod store;

pub use store::{MemoryStore, StoreCounters};
