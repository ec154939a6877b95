//! Weekly usage counters in the shared store.

use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};
use trigcache_core::{Namespace, escape_segment};

use super::week::{WeekId, until_next_week};
use super::{Classification, Dimension, LayerTable, UsageLimits};
use crate::metrics;
use crate::store::SharedStore;

/// Default counter lifetime: two weeks, so a counter always outlives its own
/// week even with clock skew between instances.
pub const DEFAULT_COUNTER_EXPIRY: Duration = Duration::from_secs(14 * 24 * 3600);

/// Shortest counter lifetime accepted: one week plus a day of slack.
pub const MIN_COUNTER_EXPIRY: Duration = Duration::from_secs(8 * 24 * 3600);

/// One tile request as seen by the quota.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageRequest {
    /// Tile layer, e.g. `Outdoor_3857`.
    pub layer: String,
    /// Requested zoom level.
    pub zoom: u8,
    /// Served from a local tile cache without calling the upstream.
    pub from_cache: bool,
    /// Authenticated user id, `None` for anonymous callers.
    pub user: Option<String>,
    /// Client address, if known.
    pub client_address: Option<IpAddr>,
}

impl UsageRequest {
    /// Anonymous, uncached request for a tile of `layer` at `zoom`.
    pub fn new(layer: impl Into<String>, zoom: u8) -> Self {
        Self {
            layer: layer.into(),
            zoom,
            from_cache: false,
            user: None,
            client_address: None,
        }
    }

    /// Marks the request as served from a local cache.
    pub fn from_cache(mut self, from_cache: bool) -> Self {
        self.from_cache = from_cache;
        self
    }

    /// Sets the authenticated user.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Sets the client address.
    pub fn client_address(mut self, address: IpAddr) -> Self {
        self.client_address = Some(address);
        self
    }
}

/// A rejected quota check.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "weekly {classification} quota exceeded for {dimension}: {used} of {limit} used in week {week}"
)]
pub struct QuotaDenial {
    /// First dimension found at its ceiling.
    pub dimension: Dimension,
    /// Classification of the rejected request.
    pub classification: Classification,
    /// Counter value at check time.
    pub used: u64,
    /// Configured ceiling.
    pub limit: u64,
    /// Week the counter belongs to.
    pub week: WeekId,
    retry_after: Duration,
}

impl QuotaDenial {
    /// Time until the counters roll over to the next week.
    pub fn retry_after(&self) -> Duration {
        self.retry_after
    }
}

/// Outcome of [`QuotaTracker::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaDecision {
    /// The request may proceed.
    Allowed {
        /// Classification the request was counted under.
        classification: Classification,
        /// The store could not be consulted and the check failed open.
        fail_open: bool,
    },
    /// A ceiling is reached.
    Denied(QuotaDenial),
}

impl QuotaDecision {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, QuotaDecision::Allowed { .. })
    }

    /// The denial, if any.
    pub fn denial(&self) -> Option<&QuotaDenial> {
        match self {
            QuotaDecision::Denied(denial) => Some(denial),
            QuotaDecision::Allowed { .. } => None,
        }
    }

    /// Converts into a `Result` for use with `?` at the boundary.
    pub fn into_result(self) -> Result<Classification, QuotaDenial> {
        match self {
            QuotaDecision::Allowed { classification, .. } => Ok(classification),
            QuotaDecision::Denied(denial) => Err(denial),
        }
    }
}

/// One row of a [`UsageReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageEntry {
    /// Counted dimension.
    pub dimension: Dimension,
    /// User id or client address for scoped dimensions.
    pub identifier: Option<String>,
    /// Counted classification.
    pub classification: Classification,
    /// Requests recorded this week.
    pub used: u64,
    /// Weekly ceiling.
    pub limit: u64,
    /// `limit - used`, never negative.
    pub remaining: u64,
}

/// Current-week usage against the configured ceilings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageReport {
    /// Week being reported.
    pub week: WeekId,
    /// Seconds until the counters reset.
    pub resets_in: u64,
    /// One row per dimension and classification.
    pub entries: Vec<UsageEntry>,
}

impl UsageReport {
    /// Row for `dimension` and `classification`.
    pub fn entry(
        &self,
        dimension: Dimension,
        classification: Classification,
    ) -> Option<&UsageEntry> {
        self.entries
            .iter()
            .find(|e| e.dimension == dimension && e.classification == classification)
    }
}

struct Counter {
    dimension: Dimension,
    identifier: Option<String>,
}

/// Weekly quota over the shared store.
///
/// Callers gate a metered operation with [`check`](Self::check), perform it,
/// and call [`record`](Self::record) only if it succeeded. `check` never
/// writes, so retried pre-flight checks cost nothing.
///
/// # Soft limit
///
/// `check` and `record` are separate round-trips and nothing is reserved in
/// between. Concurrent requests arriving at the ceiling can all pass `check`
/// before any of them records, so a counter may end a week slightly above its
/// limit. The overshoot is bounded by the concurrency at the boundary.
///
/// # Failure
///
/// When the store is unreachable `check` allows the request and logs a
/// warning, and `record` is skipped.
#[derive(Debug, Clone)]
pub struct QuotaTracker {
    store: SharedStore,
    namespace: Namespace,
    limits: UsageLimits,
    layers: LayerTable,
    counter_expiry: Duration,
    clock: fn() -> DateTime<Utc>,
}

impl QuotaTracker {
    /// Creates a tracker with the default layer table.
    pub fn new(store: SharedStore, namespace: Namespace, limits: UsageLimits) -> Self {
        Self {
            store,
            namespace,
            limits,
            layers: LayerTable::default(),
            counter_expiry: DEFAULT_COUNTER_EXPIRY,
            clock: Utc::now,
        }
    }

    /// Replaces the layer table.
    pub fn with_layers(mut self, layers: LayerTable) -> Self {
        self.layers = layers;
        self
    }

    /// Sets how long counters live after their last increment.
    ///
    /// Values below [`MIN_COUNTER_EXPIRY`] are raised to it, so a counter is
    /// never pruned before its week ends.
    pub fn with_counter_expiry(mut self, expiry: Duration) -> Self {
        self.counter_expiry = expiry.max(MIN_COUNTER_EXPIRY);
        self
    }

    /// How long counters live after their last increment.
    pub fn counter_expiry(&self) -> Duration {
        self.counter_expiry
    }

    /// Replaces the wall clock used to pick the current week.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    /// Configured ceilings.
    pub fn limits(&self) -> &UsageLimits {
        &self.limits
    }

    /// Configured layer table.
    pub fn layers(&self) -> &LayerTable {
        &self.layers
    }

    /// Classifies `request` as free or metered.
    pub fn classify(&self, request: &UsageRequest) -> Classification {
        self.layers
            .classify(request.from_cache, &request.layer, request.zoom)
    }

    /// Checks every applicable ceiling without counting the request.
    ///
    /// Dimensions are checked in order: global, then per-user or anonymous,
    /// then per client address. The first one at its ceiling denies.
    pub async fn check(&self, request: &UsageRequest) -> QuotaDecision {
        let classification = self.classify(request);
        let now = (self.clock)();
        let week = WeekId::of(now);
        let counters = Self::counters(request.user.as_deref(), request.client_address);
        let keys = self.keys(week, &counters, classification);

        let Some(store) = self.store.available().await else {
            warn!(%classification, "quota store unavailable, allowing request");
            metrics::record_quota_check(classification, None, true);
            return QuotaDecision::Allowed {
                classification,
                fail_open: true,
            };
        };
        let values = match store.read_counters(&keys).await {
            Ok(values) => values,
            Err(error) => {
                warn!(%classification, %error, "quota check failed, allowing request");
                metrics::record_quota_check(classification, None, true);
                return QuotaDecision::Allowed {
                    classification,
                    fail_open: true,
                };
            }
        };

        for (counter, used) in counters.iter().zip(values) {
            let limit = self.limits.limit(counter.dimension, classification);
            if used >= limit {
                debug!(
                    dimension = %counter.dimension,
                    %classification,
                    used,
                    limit,
                    "quota exceeded"
                );
                metrics::record_quota_check(classification, Some(counter.dimension), false);
                return QuotaDecision::Denied(QuotaDenial {
                    dimension: counter.dimension,
                    classification,
                    used,
                    limit,
                    week,
                    retry_after: until_next_week(now),
                });
            }
        }

        debug!(%classification, "quota check passed");
        metrics::record_quota_check(classification, None, false);
        QuotaDecision::Allowed {
            classification,
            fail_open: false,
        }
    }

    /// Counts `request` against every applicable dimension.
    ///
    /// All counters move in one atomic step and have their expiry refreshed.
    /// Returns `false` if the store could not be updated.
    pub async fn record(&self, request: &UsageRequest) -> bool {
        let classification = self.classify(request);
        let week = WeekId::of((self.clock)());
        let counters = Self::counters(request.user.as_deref(), request.client_address);
        let keys = self.keys(week, &counters, classification);

        let Some(store) = self.store.available().await else {
            debug!(%classification, "quota store unavailable, usage not recorded");
            return false;
        };
        match store.increment(&keys, self.counter_expiry).await {
            Ok(values) => {
                debug!(%classification, ?values, "quota usage recorded");
                true
            }
            Err(error) => {
                warn!(%classification, %error, "quota usage could not be recorded");
                false
            }
        }
    }

    /// Current-week usage for the global counter, the user (or the anonymous
    /// aggregate when `user` is `None`) and the client address if given.
    ///
    /// `None` when the store is unreachable.
    pub async fn get_usage_stats(
        &self,
        user: Option<&str>,
        client_address: Option<IpAddr>,
    ) -> Option<UsageReport> {
        let now = (self.clock)();
        let week = WeekId::of(now);
        let counters = Self::counters(user, client_address);

        let mut keys = Vec::with_capacity(counters.len() * Classification::ALL.len());
        for classification in Classification::ALL {
            keys.extend(self.keys(week, &counters, classification));
        }

        let store = self.store.available().await?;
        let values = match store.read_counters(&keys).await {
            Ok(values) => values,
            Err(error) => {
                warn!(%error, "quota usage unavailable");
                return None;
            }
        };

        let rows = Classification::ALL
            .into_iter()
            .flat_map(|classification| counters.iter().map(move |c| (classification, c)));
        let entries = rows
            .zip(values)
            .map(|((classification, counter), used)| {
                let limit = self.limits.limit(counter.dimension, classification);
                UsageEntry {
                    dimension: counter.dimension,
                    identifier: counter.identifier.clone(),
                    classification,
                    used,
                    limit,
                    remaining: limit.saturating_sub(used),
                }
            })
            .collect();

        Some(UsageReport {
            week,
            resets_in: until_next_week(now).as_secs(),
            entries,
        })
    }

    fn counters(user: Option<&str>, client_address: Option<IpAddr>) -> Vec<Counter> {
        let mut counters = vec![Counter {
            dimension: Dimension::Global,
            identifier: None,
        }];
        counters.push(match user {
            Some(user) => Counter {
                dimension: Dimension::PerUser,
                identifier: Some(user.to_owned()),
            },
            None => Counter {
                dimension: Dimension::Anonymous,
                identifier: None,
            },
        });
        if let Some(address) = client_address {
            counters.push(Counter {
                dimension: Dimension::PerClientAddress,
                identifier: Some(address.to_string()),
            });
        }
        counters
    }

    /// `app:env:quota:weekly:<week>:<dimension>[:<identifier>]:<classification>`
    fn keys(
        &self,
        week: WeekId,
        counters: &[Counter],
        classification: Classification,
    ) -> Vec<String> {
        counters
            .iter()
            .map(|counter| {
                let scope = match &counter.identifier {
                    Some(id) => format!("{}:{}", counter.dimension, escape_segment(id)),
                    None => counter.dimension.to_string(),
                };
                self.namespace
                    .scoped(&format!("quota:weekly:{week}:{scope}:{classification}"))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use trigcache_backend::Store;
    use trigcache_memory::MemoryStore;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap()
    }

    fn tracker(memory: &MemoryStore, limits: UsageLimits) -> QuotaTracker {
        QuotaTracker::new(
            SharedStore::new(memory.clone()),
            Namespace::new("tuk", "test").unwrap(),
            limits,
        )
        .with_clock(fixed_now)
    }

    fn metered() -> UsageRequest {
        UsageRequest::new("Outdoor_3857", 18)
    }

    #[tokio::test]
    async fn test_counter_key_layout() {
        let memory = MemoryStore::new();
        let quota = tracker(&memory, UsageLimits::reduced());
        let request = metered()
            .user("alice")
            .client_address("2001:db8::1".parse().unwrap());
        assert!(quota.record(&request).await);

        assert_eq!(
            memory.keys(),
            vec![
                "tuk:test:quota:weekly:2024-10:global:metered".to_owned(),
                "tuk:test:quota:weekly:2024-10:ip:2001%3Adb8%3A%3A1:metered".to_owned(),
                "tuk:test:quota:weekly:2024-10:user:alice:metered".to_owned(),
            ]
        );
    }

    #[tokio::test]
    async fn test_check_never_records() {
        let memory = MemoryStore::new();
        let quota = tracker(&memory, UsageLimits::reduced());
        let request = metered().client_address("192.0.2.7".parse().unwrap());
        for _ in 0..100 {
            assert!(quota.check(&request).await.is_allowed());
        }
        assert!(memory.is_empty());
        assert_eq!(memory.counters().increments(), 0);
    }

    #[tokio::test]
    async fn test_global_ceiling() {
        let memory = MemoryStore::new();
        let limits =
            UsageLimits::reduced().with_limit(Dimension::Global, Classification::Metered, 5);
        let quota = tracker(&memory, limits);
        for _ in 0..5 {
            assert!(quota.check(&metered()).await.is_allowed());
            assert!(quota.record(&metered()).await);
        }

        let decision = quota.check(&metered()).await;
        let denial = decision.denial().unwrap();
        assert_eq!(denial.dimension, Dimension::Global);
        assert_eq!(denial.used, 5);
        assert!(denial.to_string().contains("global"));

        // Free requests have their own ceiling.
        let free = UsageRequest::new("Outdoor_3857", 10);
        assert!(quota.check(&free).await.is_allowed());
    }

    #[tokio::test]
    async fn test_dimension_order() {
        let memory = MemoryStore::new();
        let limits = UsageLimits::reduced()
            .with_limit(Dimension::PerUser, Classification::Metered, 1)
            .with_limit(Dimension::PerClientAddress, Classification::Metered, 1);
        let quota = tracker(&memory, limits);
        let request = metered()
            .user("bob")
            .client_address("192.0.2.1".parse().unwrap());
        quota.record(&request).await;

        let denial = quota.check(&request).await.into_result().unwrap_err();
        assert_eq!(denial.dimension, Dimension::PerUser);

        // Another user on the same address hits the address ceiling.
        let neighbour = metered()
            .user("carol")
            .client_address("192.0.2.1".parse().unwrap());
        let denial = quota.check(&neighbour).await.into_result().unwrap_err();
        assert_eq!(denial.dimension, Dimension::PerClientAddress);
    }

    #[tokio::test]
    async fn test_anonymous_aggregate() {
        let memory = MemoryStore::new();
        let limits =
            UsageLimits::reduced().with_limit(Dimension::Anonymous, Classification::Metered, 2);
        let quota = tracker(&memory, limits);
        quota.record(&metered()).await;
        quota.record(&metered()).await;

        let denial = quota.check(&metered()).await.into_result().unwrap_err();
        assert_eq!(denial.dimension, Dimension::Anonymous);
        assert!(quota.check(&metered().user("dave")).await.is_allowed());
    }

    #[tokio::test]
    async fn test_fail_open() {
        let quota = tracker(&MemoryStore::unreachable(), UsageLimits::reduced());
        let decision = quota.check(&metered().user("eve")).await;
        assert_eq!(
            decision,
            QuotaDecision::Allowed {
                classification: Classification::Metered,
                fail_open: true
            }
        );
        assert!(!quota.record(&metered()).await);
        assert!(quota.get_usage_stats(None, None).await.is_none());
    }

    #[tokio::test]
    async fn test_fail_open_after_outage() {
        let memory = MemoryStore::new();
        let limits =
            UsageLimits::reduced().with_limit(Dimension::Global, Classification::Metered, 0);
        let quota = tracker(&memory, limits);
        assert!(!quota.check(&metered()).await.is_allowed());

        memory.set_available(false);
        assert!(quota.check(&metered()).await.is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_refreshes_expiry() {
        let memory = MemoryStore::new();
        let quota =
            tracker(&memory, UsageLimits::reduced()).with_counter_expiry(MIN_COUNTER_EXPIRY);
        let day = Duration::from_secs(24 * 3600);
        quota.record(&metered()).await;
        tokio::time::advance(5 * day).await;
        quota.record(&metered()).await;
        tokio::time::advance(5 * day).await;

        let report = quota.get_usage_stats(None, None).await.unwrap();
        assert_eq!(
            report
                .entry(Dimension::Global, Classification::Metered)
                .unwrap()
                .used,
            2
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_counter_expiry_is_raised() {
        let memory = MemoryStore::new();
        let quota = tracker(&memory, UsageLimits::reduced())
            .with_counter_expiry(Duration::from_secs(3600));
        assert_eq!(quota.counter_expiry(), MIN_COUNTER_EXPIRY);

        quota.record(&metered()).await;
        let key = memory
            .keys()
            .into_iter()
            .find(|key| key.ends_with(":global:metered"))
            .unwrap();
        let ttl = memory.remaining_ttl(&key).await.unwrap().unwrap();
        assert!(ttl > Duration::from_secs(7 * 24 * 3600), "{ttl:?}");
    }

    #[tokio::test]
    async fn test_usage_report() {
        let memory = MemoryStore::new();
        let quota = tracker(&memory, UsageLimits::reduced());
        let address: IpAddr = "192.0.2.9".parse().unwrap();
        let request = metered().user("frank").client_address(address);
        quota.record(&request).await;
        quota
            .record(&UsageRequest::new("Outdoor_3857", 12).user("frank"))
            .await;

        let report = quota
            .get_usage_stats(Some("frank"), Some(address))
            .await
            .unwrap();
        assert_eq!(report.week.to_string(), "2024-10");
        assert_eq!(report.entries.len(), 6);

        let user = report
            .entry(Dimension::PerUser, Classification::Metered)
            .unwrap();
        assert_eq!(user.identifier.as_deref(), Some("frank"));
        assert_eq!(user.used, 1);
        assert_eq!(user.remaining, UsageLimits::reduced().per_user.metered - 1);

        let ip_free = report
            .entry(Dimension::PerClientAddress, Classification::Free)
            .unwrap();
        assert_eq!(ip_free.used, 0);
        assert!(report.entry(Dimension::Anonymous, Classification::Free).is_none());
    }

    #[test]
    fn test_from_cache_is_free() {
        let quota = tracker(&MemoryStore::new(), UsageLimits::reduced());
        assert_eq!(
            quota.classify(&metered().from_cache(true)),
            Classification::Free
        );
        assert_eq!(quota.classify(&metered()), Classification::Metered);
    }
}
