//! Traits and structs for interacting with the shared key-value store.
//!
//! If you want to put trigcache on top of a new store, implement [`Store`].
mod error;
mod store;

use std::time::Duration;

pub use error::StoreError;
pub use store::{Store, StoreResult};
use trigcache_core::Raw;

/// Status of a delete.
#[derive(Debug, PartialEq, Eq)]
pub enum DeleteStatus {
    /// Record successfully deleted.
    Deleted(u32),
    /// Record already missing.
    Missing,
}

impl DeleteStatus {
    /// Whether anything was removed.
    pub fn is_deleted(&self) -> bool {
        matches!(self, DeleteStatus::Deleted(_))
    }
}

/// Raw value read from the store with its remaining lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredValue {
    /// Stored bytes.
    pub data: Raw,
    /// Lifetime left according to the store, `None` if the key never expires.
    pub remaining_ttl: Option<Duration>,
}

/// Server-level statistics reported by a store.
///
/// Fields a store can't report stay `None` / zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreInfo {
    /// Keys in the whole database, across every namespace.
    pub total_keys: u64,
    /// Memory used by the store in bytes.
    pub memory_used: Option<u64>,
    /// Memory used, as formatted by the store.
    pub memory_used_human: Option<String>,
    /// Successful key lookups since the store started.
    pub hits: u64,
    /// Failed key lookups since the store started.
    pub misses: u64,
    /// Number of connected clients.
    pub connected_clients: Option<u64>,
    /// Store uptime.
    pub uptime: Option<Duration>,
}

impl StoreInfo {
    /// `hits / (hits + misses)`, or `None` before any lookups.
    pub fn hit_rate(&self) -> Option<f64> {
        let total = self.hits + self.misses;
        (total > 0).then(|| self.hits as f64 / total as f64)
    }
}
