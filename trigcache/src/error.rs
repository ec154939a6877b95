use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use trigcache_core::KeyError;

/// Error raised while loading [`Settings`](crate::config::Settings) or
/// building the components they describe.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration from {path}: {source}")]
    Read {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The YAML document did not match the settings schema.
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_saphyr::Error),

    /// The namespace or key version is not usable in keys.
    #[error(transparent)]
    Key(#[from] KeyError),

    /// The configured store was not compiled into this build.
    #[error("{0} store is not available, enable the `{0}` feature")]
    StoreNotAvailable(&'static str),

    /// Quota counters would expire before their week is over.
    #[error("quota counter_expiry {configured:?} is shorter than the minimum {minimum:?}")]
    CounterExpiryTooShort {
        /// Configured lifetime.
        configured: Duration,
        /// Shortest accepted lifetime.
        minimum: Duration,
    },

    /// The store could not be constructed from the settings.
    #[error("invalid {store} settings: {reason}")]
    InvalidStore {
        /// Which store.
        store: &'static str,
        /// What was wrong.
        reason: String,
    },
}

/// Error raised when a bulk-delete pattern is rejected before reaching the
/// store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    /// Empty pattern.
    #[error("pattern must not be empty")]
    Empty,

    /// A pattern made only of wildcards would wipe the whole namespace.
    #[error("pattern `{0}` matches every key, use flush_namespace instead")]
    MatchesEverything(String),

    /// The pattern is not a valid glob.
    #[error("malformed pattern `{pattern}`: {reason}")]
    Malformed {
        /// The rejected pattern.
        pattern: String,
        /// What is wrong with it.
        reason: &'static str,
    },
}
