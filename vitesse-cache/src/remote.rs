//! Remote cache backend over a shared Redis server.
//!
//! Single-key operations map one-to-one onto `GET`/`SET`/`DEL` round trips
//! over a bounded connection pool; the pool issues a `PING` liveness probe
//! before handing out a previously used connection. Connections are
//! established lazily, so constructing the backend succeeds even while the
//! server is down - the first operation surfaces the failure.
//!
//! Every key is stored as `"{namespace}:{key}"`, letting several
//! applications share one server without colliding.
//!
//! Bulk eviction walks the keyspace with a cursor-driven `SCAN MATCH`
//! loop - never `KEYS`, which would block the server - and flushes a
//! bounded `DEL` batch between scan pages. As with the embedded backend,
//! each batch is atomic but the call as a whole is not; a mid-scan failure
//! after committed batches surfaces as a partial-eviction error and the
//! call is idempotent on retry.

use async_trait::async_trait;
use deadpool_redis::{Config as RedisPoolConfig, Connection, Pool, PoolConfig, Runtime};
use redis::AsyncCommands;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use vitesse_core::{BackendError, RemoteCacheConfig, VitesseResult};

use crate::codec::CacheEntry;
use crate::traits::Cache;

/// Shared, network-accessible cache over pooled Redis connections.
///
/// Callers beyond the pool's `max_size` block waiting for a connection,
/// up to the configured wait timeout.
pub struct RemoteCache {
    pool: Pool,
    namespace: String,
    scan_count: usize,
    delete_batch_size: usize,
}

impl RemoteCache {
    /// Build the connection pool for the configured server.
    ///
    /// No connection is opened here; the pool dials on first use.
    pub fn connect(config: &RemoteCacheConfig) -> VitesseResult<Self> {
        config.validate()?;

        let mut pool_config = PoolConfig::new(config.pool_max_size);
        pool_config.timeouts.create = Some(config.connect_timeout);
        pool_config.timeouts.wait = Some(config.wait_timeout);
        pool_config.timeouts.recycle = Some(config.recycle_timeout);

        let mut redis_config = RedisPoolConfig::from_url(config.url());
        redis_config.pool = Some(pool_config);

        let pool = redis_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| BackendError::Pool {
                reason: e.to_string(),
            })?;

        Ok(Self {
            pool,
            namespace: config.namespace.clone(),
            scan_count: config.scan_count,
            delete_batch_size: config.delete_batch_size,
        })
    }

    async fn conn(&self) -> Result<Connection, BackendError> {
        self.pool.get().await.map_err(|e| BackendError::Pool {
            reason: e.to_string(),
        })
    }

    /// Namespace a caller-supplied key for storage.
    fn scoped(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }

    /// Glob pattern matching every namespaced key starting with `prefix`.
    fn match_pattern(&self, prefix: &str) -> String {
        format!("{}:{}*", self.namespace, prefix)
    }

    /// Delete one batch of (already namespaced) keys in a single command.
    async fn delete_batch(
        &self,
        conn: &mut Connection,
        keys: &[String],
    ) -> Result<u64, BackendError> {
        let removed: u64 = redis::cmd("DEL")
            .arg(keys)
            .query_async(conn)
            .await
            .map_err(server_err)?;
        Ok(removed)
    }
}

#[async_trait]
impl Cache for RemoteCache {
    async fn get(&self, key: &str) -> VitesseResult<Value> {
        let mut conn = self.conn().await?;

        let payload: Option<Vec<u8>> =
            conn.get(self.scoped(key)).await.map_err(server_err)?;
        let payload = payload.ok_or_else(|| BackendError::NotFound {
            key: key.to_string(),
        })?;

        let entry = CacheEntry::decode(&payload, key)?;
        Ok(entry.value)
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> VitesseResult<()> {
        let payload = CacheEntry::new(key, value).encode()?;
        let mut conn = self.conn().await?;

        match ttl {
            Some(ttl) => {
                // Server expiry is whole seconds; round sub-second TTLs up
                // rather than storing an immortal record.
                let seconds = ttl.as_secs().max(1);
                let _: () = conn
                    .set_ex(self.scoped(key), payload, seconds)
                    .await
                    .map_err(server_err)?;
            }
            None => {
                let _: () = conn
                    .set(self.scoped(key), payload)
                    .await
                    .map_err(server_err)?;
            }
        }
        Ok(())
    }

    async fn forget(&self, key: &str) -> VitesseResult<()> {
        let mut conn = self.conn().await?;
        // DEL reports how many keys existed; absence is fine here.
        let _: u64 = conn.del(self.scoped(key)).await.map_err(server_err)?;
        Ok(())
    }

    async fn empty_by_match(&self, prefix: &str) -> VitesseResult<()> {
        let pattern = self.match_pattern(prefix);
        let mut conn = self.conn().await?;

        let mut cursor: u64 = 0;
        let mut batch: Vec<String> = Vec::with_capacity(self.delete_batch_size);
        let mut evicted = 0u64;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(self.scan_count)
                .query_async(&mut conn)
                .await
                .map_err(|e| partial(evicted, server_err(e)))?;

            cursor = next;
            batch.extend(keys);

            // A scan page can overshoot the capacity; flush in exact-size
            // chunks so no DEL ever carries more than the configured bound.
            while let Some(chunk) = take_full_batch(&mut batch, self.delete_batch_size) {
                evicted += self
                    .delete_batch(&mut conn, &chunk)
                    .await
                    .map_err(|e| partial(evicted, e))?;
                debug!(batch = chunk.len(), evicted, "flushed eviction batch");
            }

            if cursor == 0 {
                break;
            }
        }

        if !batch.is_empty() {
            evicted += self
                .delete_batch(&mut conn, &batch)
                .await
                .map_err(|e| partial(evicted, e))?;
            debug!(batch = batch.len(), evicted, "flushed final eviction batch");
        }

        Ok(())
    }
}

/// Detach one full-capacity delete batch, or `None` while below capacity.
fn take_full_batch(batch: &mut Vec<String>, capacity: usize) -> Option<Vec<String>> {
    if batch.len() < capacity {
        return None;
    }
    let rest = batch.split_off(capacity);
    Some(std::mem::replace(batch, rest))
}

/// Map a server error into the backend taxonomy.
fn server_err(e: redis::RedisError) -> BackendError {
    BackendError::Unavailable {
        reason: e.to_string(),
    }
}

/// Wrap an error that struck after `evicted` deletions already committed.
fn partial(evicted: u64, e: BackendError) -> BackendError {
    if evicted == 0 {
        e
    } else {
        warn!(evicted, error = %e, "bulk eviction aborted mid-way");
        BackendError::PartialEviction {
            evicted,
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vitesse_core::VitesseError;

    fn test_config() -> RemoteCacheConfig {
        RemoteCacheConfig::new("127.0.0.1", 6379, "vitesse-test").with_pool_max_size(4)
    }

    #[test]
    fn test_key_scoping() {
        let cache = RemoteCache::connect(&test_config()).expect("connect should succeed");
        assert_eq!(cache.scoped("user:42"), "vitesse-test:user:42");
        assert_eq!(cache.match_pattern("user:"), "vitesse-test:user:*");
        assert_eq!(cache.match_pattern(""), "vitesse-test:*");
    }

    #[test]
    fn test_connect_rejects_invalid_config() {
        let config = test_config().with_pool_max_size(0);
        assert!(RemoteCache::connect(&config).is_err());
    }

    #[test]
    fn test_take_full_batch_bounds_chunks() {
        let mut batch: Vec<String> = (0..5).map(|i| i.to_string()).collect();

        let first = take_full_batch(&mut batch, 2).expect("full chunk");
        assert_eq!(first, vec!["0", "1"]);
        let second = take_full_batch(&mut batch, 2).expect("full chunk");
        assert_eq!(second, vec!["2", "3"]);

        // The remainder stays below capacity for the final flush.
        assert!(take_full_batch(&mut batch, 2).is_none());
        assert_eq!(batch, vec!["4"]);
    }

    #[test]
    fn test_partial_eviction_wrapping() {
        let err = BackendError::Unavailable {
            reason: "boom".to_string(),
        };
        // Nothing committed yet: the underlying error passes through.
        assert_eq!(partial(0, err.clone()), err);

        match partial(3, err) {
            BackendError::PartialEviction { evicted, reason } => {
                assert_eq!(evicted, 3);
                assert!(reason.contains("boom"));
            }
            other => panic!("expected PartialEviction, got {other:?}"),
        }
    }

    #[test]
    fn test_connect_succeeds_without_server() {
        // Connections are lazy; construction must not dial.
        let config = RemoteCacheConfig::new("host.invalid", 6390, "ns");
        assert!(RemoteCache::connect(&config).is_ok());
    }

    // The tests below exercise a live server and are skipped by default:
    //
    //   cargo test -p vitesse-cache -- --ignored
    //
    // against a disposable local Redis.

    #[tokio::test]
    #[ignore = "requires a running Redis on 127.0.0.1:6379"]
    async fn test_set_get_forget_roundtrip() {
        let cache = RemoteCache::connect(&test_config()).expect("connect should succeed");

        let value = json!({"name": "ada", "visits": 7});
        cache
            .set("it:user", value.clone(), None)
            .await
            .expect("set should succeed");
        assert_eq!(
            cache.get("it:user").await.expect("get should succeed"),
            value
        );

        cache.forget("it:user").await.expect("forget should succeed");
        let err = cache.get("it:user").await.expect_err("get should fail");
        assert!(err.is_not_found());

        cache
            .forget("it:user")
            .await
            .expect("forgetting an absent key should succeed");
    }

    #[tokio::test]
    #[ignore = "requires a running Redis on 127.0.0.1:6379"]
    async fn test_ttl_expiry() {
        let cache = RemoteCache::connect(&test_config()).expect("connect should succeed");

        cache
            .set("it:ephemeral", json!(1), Some(Duration::from_secs(1)))
            .await
            .expect("set should succeed");
        assert!(cache.has("it:ephemeral").await);

        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert!(!cache.has("it:ephemeral").await);
        let err = cache.get("it:ephemeral").await.expect_err("get should fail");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    #[ignore = "requires a running Redis on 127.0.0.1:6379"]
    async fn test_prefix_eviction_across_batches() {
        let config = test_config().with_scan_count(8).with_delete_batch_size(8);
        let cache = RemoteCache::connect(&config).expect("connect should succeed");

        for i in 0..25 {
            cache
                .set(&format!("it:p:{i:02}"), json!(i), None)
                .await
                .expect("set should succeed");
        }
        cache
            .set("it:q:1", json!("survivor"), None)
            .await
            .expect("set should succeed");

        cache
            .empty_by_match("it:p:")
            .await
            .expect("eviction should succeed");

        for i in 0..25 {
            assert!(!cache.has(&format!("it:p:{i:02}")).await);
        }
        assert!(cache.has("it:q:1").await);

        cache.forget("it:q:1").await.expect("cleanup should succeed");
    }

    #[tokio::test]
    #[ignore = "requires a running Redis on 127.0.0.1:6379"]
    async fn test_empty_wipes_only_this_namespace() {
        let ours = RemoteCache::connect(&test_config()).expect("connect should succeed");
        let theirs = RemoteCache::connect(
            &RemoteCacheConfig::new("127.0.0.1", 6379, "vitesse-other"),
        )
        .expect("connect should succeed");

        ours.set("it:a", json!(1), None).await.expect("set should succeed");
        theirs
            .set("it:a", json!(2), None)
            .await
            .expect("set should succeed");

        ours.empty().await.expect("empty should succeed");

        assert!(!ours.has("it:a").await);
        assert_eq!(
            theirs.get("it:a").await.expect("get should succeed"),
            json!(2)
        );

        theirs.empty().await.expect("cleanup should succeed");
    }

    #[tokio::test]
    #[ignore = "requires a running Redis on 127.0.0.1:6379"]
    async fn test_corrupt_payload_is_codec_error() {
        let cache = RemoteCache::connect(&test_config()).expect("connect should succeed");

        let mut conn = cache.conn().await.expect("conn should succeed");
        let _: () = conn
            .set(cache.scoped("it:garbled"), "not json at all")
            .await
            .expect("raw set should succeed");

        let err = cache.get("it:garbled").await.expect_err("get should fail");
        assert!(matches!(err, VitesseError::Codec(_)));
        assert!(!cache.has("it:garbled").await);

        cache
            .forget("it:garbled")
            .await
            .expect("cleanup should succeed");
    }
}
