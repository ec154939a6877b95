#![warn(missing_docs)]
//! # trigcache-core
//!
//! Core types shared by every trigcache crate.
//!
//! - [`KeyCodec`] builds deterministic, namespaced, versioned [`CacheKey`]s
//!   from a [`ResourceType`], an optional resource id and sub-resource, and a
//!   normalized [`Params`] set.
//! - [`CacheEntry`] is the envelope written to the store.
//! - [`CacheStatus`] and [`CacheAnnotation`] describe what the cache did for
//!   a response.
//! - [`CachePolicy`] lets a handler declare whether its result may be stored.

pub mod context;
pub mod key;
pub mod policy;
pub mod value;

pub use context::{
    CACHE_AGE_HEADER, CACHE_KEY_HEADER, CACHE_STATUS_HEADER, CACHE_TTL_HEADER, CacheAnnotation,
    CacheStatus,
};
pub use key::{
    CacheKey, DEFAULT_KEY_VERSION, KEY_DELIMITER, KeyBuilder, KeyCodec, KeyError, Namespace,
    PARAMS_DIGEST_LEN, Params, ResourceType, escape_segment,
};
pub use policy::CachePolicy;
pub use value::CacheEntry;

/// Raw byte data as read from or written to a store.
/// Using `Bytes` provides cheap cloning via reference counting.
pub type Raw = bytes::Bytes;
