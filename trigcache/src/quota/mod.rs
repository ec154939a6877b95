//! Weekly tile quota.
//!
//! Protects the paid upstream tile API. Every request is classified
//! [`Free`](Classification::Free) or [`Metered`](Classification::Metered)
//! from its layer and zoom, then counted per ISO week along several
//! [`Dimension`]s in the shared store:
//!
//! `app:env:quota:weekly:<ISO-year>-<ISO-week>:<dimension>[:<identifier>]:<classification>`
//!
//! A proxy in front of the upstream uses it like this:
//!
//! ```ignore
//! let request = UsageRequest::new(layer, zoom).client_address(addr);
//! if let QuotaDecision::Denied(denial) = quota.check(&request).await {
//!     return Err(denial.into());
//! }
//! let tile = upstream.fetch(&layer, zoom, x, y).await?;
//! quota.record(&request).await;
//! ```

mod classify;
mod limits;
mod tracker;
mod week;

pub use classify::{Classification, DEFAULT_MAX_FREE_ZOOM, LayerTable};
pub use limits::{Ceiling, Dimension, UsageLimits};
pub use tracker::{
    DEFAULT_COUNTER_EXPIRY, MIN_COUNTER_EXPIRY, QuotaDecision, QuotaDenial, QuotaTracker, UsageEntry, UsageReport,
    UsageRequest,
};
pub use week::{WeekId, until_next_week};
