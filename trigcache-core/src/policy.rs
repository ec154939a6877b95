//! Handler-declared cacheability.
//!
//! A handler states whether its result may be stored by returning one of the
//! two [`CachePolicy`] variants. The cache never inspects the shape of the
//! result to guess: binary or streamed results are returned as
//! [`CachePolicy::NonCacheable`] and pass through untouched.

/// Result of a handler, tagged with whether it may be cached.
///
/// # Type Parameters
///
/// * `C` - Serializable value that may be written to the store
/// * `N` - Anything else (streams, binary bodies) that must pass through
///
/// # Example
///
/// ```
/// use trigcache_core::CachePolicy;
///
/// fn photo(thumbnail: bool) -> CachePolicy<serde_json::Value, Vec<u8>> {
///     if thumbnail {
///         CachePolicy::NonCacheable(vec![0xff, 0xd8])
///     } else {
///         CachePolicy::Cacheable(serde_json::json!({"id": 1}))
///     }
/// }
///
/// assert!(photo(false).is_cacheable());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachePolicy<C, N> {
    /// Value may be stored and served to later callers.
    Cacheable(C),
    /// Value is returned to this caller only.
    NonCacheable(N),
}

impl<C, N> CachePolicy<C, N> {
    /// Whether this is the `Cacheable` variant.
    pub fn is_cacheable(&self) -> bool {
        matches!(self, CachePolicy::Cacheable(_))
    }

    /// Maps the cacheable value, leaving pass-through values untouched.
    pub fn map_cacheable<T>(self, f: impl FnOnce(C) -> T) -> CachePolicy<T, N> {
        match self {
            CachePolicy::Cacheable(value) => CachePolicy::Cacheable(f(value)),
            CachePolicy::NonCacheable(value) => CachePolicy::NonCacheable(value),
        }
    }
}
