//! Redis store implementation.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::{Client, RedisResult, aio::ConnectionManager};
use tokio::sync::OnceCell;
use tracing::trace;
use trigcache_backend::{DeleteStatus, Store, StoreError, StoreInfo, StoreResult, StoredValue};
use trigcache_core::Raw;

use crate::error::Error;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Redis store based on the redis-rs crate.
///
/// Uses a [`ConnectionManager`] created on first use and shared by every
/// clone of the store. Each command is bounded by the response timeout and
/// the initial connection by the connect timeout, so an unreachable Redis
/// costs a caller at most a couple of seconds.
///
/// [`ConnectionManager`]: redis::aio::ConnectionManager
#[derive(Clone)]
pub struct RedisStore {
    client: Client,
    connection: std::sync::Arc<OnceCell<ConnectionManager>>,
    connect_timeout: Duration,
    response_timeout: Duration,
    name: String,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("name", &self.name)
            .field("connected", &self.connection.initialized())
            .field("connect_timeout", &self.connect_timeout)
            .field("response_timeout", &self.response_timeout)
            .finish()
    }
}

impl RedisStore {
    /// Creates a new store builder with default settings.
    #[must_use]
    pub fn builder() -> RedisStoreBuilder {
        RedisStoreBuilder::default()
    }

    /// Lazily connects via [`ConnectionManager`].
    async fn connection(&self) -> StoreResult<ConnectionManager> {
        trace!("Get connection manager");
        let manager = self
            .connection
            .get_or_try_init(|| async {
                trace!("Initialize new redis connection manager");
                match tokio::time::timeout(
                    self.connect_timeout,
                    self.client.get_connection_manager(),
                )
                .await
                {
                    Ok(result) => result.map_err(|e| StoreError::from(Error::from(e))),
                    Err(_) => Err(StoreError::Timeout(self.connect_timeout)),
                }
            })
            .await?;
        Ok(manager.clone())
    }

    async fn bounded<T>(&self, command: impl Future<Output = RedisResult<T>>) -> StoreResult<T> {
        match tokio::time::timeout(self.response_timeout, command).await {
            Ok(result) => result.map_err(|e| Error::from(e).into()),
            Err(_) => Err(StoreError::Timeout(self.response_timeout)),
        }
    }
}

/// Part of builder pattern implementation for RedisStore.
pub struct RedisStoreBuilder {
    connection_info: String,
    connect_timeout: Duration,
    response_timeout: Duration,
    name: String,
}

impl Default for RedisStoreBuilder {
    fn default() -> Self {
        Self {
            connection_info: "redis://127.0.0.1/".to_owned(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            name: "redis".to_owned(),
        }
    }
}

impl RedisStoreBuilder {
    /// Set connection info (host, port, database, etc.) for RedisStore.
    pub fn server(mut self, connection_info: impl Into<String>) -> Self {
        self.connection_info = connection_info.into();
        self
    }

    /// Deadline for establishing the connection.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Deadline for each command round-trip.
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Set a custom name used in logs and metric labels.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Create new instance of Redis store with passed settings.
    ///
    /// Only validates the URL; no connection is made until the first command.
    pub fn build(self) -> Result<RedisStore, Error> {
        Ok(RedisStore {
            client: Client::open(self.connection_info)?,
            connection: Default::default(),
            connect_timeout: self.connect_timeout,
            response_timeout: self.response_timeout,
            name: self.name,
        })
    }
}

fn millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl Store for RedisStore {
    async fn ping(&self) -> StoreResult<()> {
        let mut con = self.connection().await?;
        let pong: String = self
            .bounded(redis::cmd("PING").query_async(&mut con))
            .await?;
        if pong.eq_ignore_ascii_case("PONG") {
            Ok(())
        } else {
            Err(Error::UnexpectedReply(pong).into())
        }
    }

    async fn read(&self, key: &str) -> StoreResult<Option<StoredValue>> {
        let mut con = self.connection().await?;

        // Pipeline: GET + PTTL
        let (data, pttl): (Option<Vec<u8>>, i64) = self
            .bounded(
                redis::pipe()
                    .cmd("GET")
                    .arg(key)
                    .cmd("PTTL")
                    .arg(key)
                    .query_async(&mut con),
            )
            .await?;

        // PTTL returns: -2 if key doesn't exist, -1 if no TTL, else milliseconds
        Ok(data.map(|data| StoredValue {
            data: Raw::from(data),
            remaining_ttl: (pttl >= 0).then(|| Duration::from_millis(pttl as u64)),
        }))
    }

    async fn write(&self, key: &str, data: Raw, ttl: Duration) -> StoreResult<()> {
        let mut con = self.connection().await?;
        self.bounded(
            redis::cmd("SET")
                .arg(key)
                .arg(data.as_ref())
                .arg("PX")
                .arg(millis(ttl))
                .query_async::<()>(&mut con),
        )
        .await
    }

    async fn remove(&self, key: &str) -> StoreResult<DeleteStatus> {
        let mut con = self.connection().await?;
        let deleted: u32 = self
            .bounded(redis::cmd("DEL").arg(key).query_async(&mut con))
            .await?;

        if deleted > 0 {
            Ok(DeleteStatus::Deleted(deleted))
        } else {
            Ok(DeleteStatus::Missing)
        }
    }

    async fn remaining_ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let mut con = self.connection().await?;
        let pttl: i64 = self
            .bounded(redis::cmd("PTTL").arg(key).query_async(&mut con))
            .await?;
        Ok((pttl >= 0).then(|| Duration::from_millis(pttl as u64)))
    }

    async fn remove_matching(&self, pattern: &str, batch: usize) -> StoreResult<u64> {
        let mut con = self.connection().await?;
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;

        // SCAN keeps each step O(batch); UNLINK frees memory off the main thread.
        loop {
            let (next, keys): (u64, Vec<String>) = self
                .bounded(
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(batch)
                        .query_async(&mut con),
                )
                .await?;

            for chunk in keys.chunks(batch.max(1)) {
                let unlinked: u64 = self
                    .bounded(redis::cmd("UNLINK").arg(chunk).query_async(&mut con))
                    .await?;
                removed += unlinked;
            }

            trace!(pattern, cursor = next, removed, "scan step");
            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(removed)
    }

    async fn count_matching(&self, pattern: &str, batch: usize) -> StoreResult<u64> {
        let mut con = self.connection().await?;
        let mut cursor: u64 = 0;
        // SCAN may return a key more than once.
        let mut seen: HashSet<String> = HashSet::new();

        loop {
            let (next, keys): (u64, Vec<String>) = self
                .bounded(
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(batch)
                        .query_async(&mut con),
                )
                .await?;
            seen.extend(keys);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(seen.len() as u64)
    }

    async fn read_counters(&self, keys: &[String]) -> StoreResult<Vec<u64>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut con = self.connection().await?;
        let values: Vec<Option<u64>> = self
            .bounded(redis::cmd("MGET").arg(keys).query_async(&mut con))
            .await?;
        Ok(values.into_iter().map(Option::unwrap_or_default).collect())
    }

    async fn increment(&self, keys: &[String], expire: Duration) -> StoreResult<Vec<u64>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut con = self.connection().await?;

        // MULTI/EXEC: every counter moves together with its expiry.
        let mut pipe = redis::pipe();
        pipe.atomic();
        for key in keys {
            pipe.cmd("INCR").arg(key);
            pipe.cmd("PEXPIRE").arg(key).arg(millis(expire)).ignore();
        }
        self.bounded(pipe.query_async(&mut con)).await
    }

    async fn info(&self) -> StoreResult<StoreInfo> {
        let mut con = self.connection().await?;
        let (info, dbsize): (String, u64) = self
            .bounded(
                redis::pipe()
                    .cmd("INFO")
                    .cmd("DBSIZE")
                    .query_async(&mut con),
            )
            .await?;
        let mut parsed = parse_info(&info);
        parsed.total_keys = dbsize;
        Ok(parsed)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Parses the `field:value` lines of an `INFO` reply.
fn parse_info(info: &str) -> StoreInfo {
    let mut parsed = StoreInfo::default();
    for line in info.lines() {
        let Some((field, value)) = line.trim().split_once(':') else {
            continue;
        };
        match field {
            "used_memory" => parsed.memory_used = value.parse().ok(),
            "used_memory_human" => parsed.memory_used_human = Some(value.to_owned()),
            "keyspace_hits" => parsed.hits = value.parse().unwrap_or_default(),
            "keyspace_misses" => parsed.misses = value.parse().unwrap_or_default(),
            "connected_clients" => parsed.connected_clients = value.parse().ok(),
            "uptime_in_seconds" => {
                parsed.uptime = value.parse().ok().map(Duration::from_secs);
            }
            _ => {}
        }
    }
    parsed
}
