//! Response extensions shared between handlers and the services.

/// Set by a handler on a response that must never be stored, even when it
/// is a `200` JSON response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NonCacheable;

/// Set by the cache service on responses served from the store.
///
/// The quota service reads it to count the request as free.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServedFromCache;
