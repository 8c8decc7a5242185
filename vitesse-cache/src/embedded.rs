//! Embedded cache backend over LMDB (via heed).
//!
//! Records live in a single unnamed database inside a memory-mapped
//! environment. Each stored record is `[expires_at_ms: 8 bytes LE][payload]`,
//! where an all-zero header means "never expires". Expiry is enforced on
//! read: a record past its deadline reports as not-found exactly like an
//! absent key, and its bytes are reclaimed later by [`EmbeddedCache::sweep_expired`].
//!
//! # Bounded-batch prefix eviction
//!
//! A write transaction has a practical ceiling on how many mutations it can
//! hold, so bulk eviction never deletes an unbounded key set in one commit.
//! Instead it alternates short snapshot scans with bounded delete
//! transactions:
//!
//! 1. open a read transaction and walk the key range from the resume point,
//!    keys only, collecting matches up to the batch capacity;
//! 2. drop the read transaction and delete the whole batch in one write
//!    transaction;
//! 3. resume the scan just past the last deleted key, until a scan comes
//!    back empty.
//!
//! Each batch commit is atomic as a set; batches are not atomic with each
//! other. Keys written while the eviction runs may or may not be observed,
//! since every batch scans its own snapshot. A failure mid-way leaves
//! earlier batches committed and surfaces as a partial-eviction error;
//! retrying the call finishes the job.
//!
//! # Concurrency
//!
//! LMDB serializes writers and gives readers multi-version snapshots, so
//! `get` never blocks behind an in-flight `set`, `forget`, or eviction.

use std::ops::Bound;

use async_trait::async_trait;
use chrono::Utc;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use vitesse_core::{BackendError, CodecError, EmbeddedCacheConfig, VitesseResult};

use crate::codec::CacheEntry;
use crate::traits::Cache;

/// Byte length of the expiry header in front of every stored payload.
const HEADER_LEN: usize = 8;

/// Header value for records without a TTL.
const NO_EXPIRY: i64 = 0;

/// In-process, disk-backed cache over an LMDB environment.
///
/// The handle exclusively owns the environment for the life of the
/// process; LMDB's directory lock rejects a second writer on the same
/// path. Cloning the handle is not supported - share it behind an `Arc`.
///
/// # Example
///
/// ```ignore
/// use vitesse_cache::{Cache, EmbeddedCache};
/// use vitesse_core::EmbeddedCacheConfig;
///
/// let cache = EmbeddedCache::open(&EmbeddedCacheConfig::new("/var/cache/app"))?;
/// cache.set("user:42", serde_json::json!({"name": "ada"}), None).await?;
/// let value = cache.get("user:42").await?;
/// ```
pub struct EmbeddedCache {
    env: Env,
    db: Database<Bytes, Bytes>,
    eviction_batch_size: usize,
}

impl EmbeddedCache {
    /// Open (or create) the cache environment at the configured path.
    ///
    /// # Errors
    ///
    /// Fails when the configuration is invalid, the directory cannot be
    /// created, or the environment cannot be opened - including when
    /// another process already holds the directory lock.
    pub fn open(config: &EmbeddedCacheConfig) -> VitesseResult<Self> {
        config.validate()?;

        std::fs::create_dir_all(&config.path).map_err(|e| BackendError::Unavailable {
            reason: e.to_string(),
        })?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(config.max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(&config.path)
        }
        .map_err(|e| BackendError::Unavailable {
            reason: e.to_string(),
        })?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| BackendError::Unavailable {
                reason: e.to_string(),
            })?;
        wtxn.commit().map_err(txn_err)?;

        Ok(Self {
            env,
            db,
            eviction_batch_size: config.eviction_batch_size,
        })
    }

    /// Reclaim the space held by expired records.
    ///
    /// Expired records are unreadable the moment their deadline passes,
    /// but their bytes stay in the map until this pass deletes them. An
    /// external periodic task is expected to call this on a cadence (daily
    /// is plenty for most workloads); it is safe to run concurrently with
    /// reads and writes.
    ///
    /// Returns the number of records reclaimed.
    pub fn sweep_expired(&self) -> VitesseResult<u64> {
        let now_ms = Utc::now().timestamp_millis();
        let mut reclaimed = 0u64;
        let mut resume: Option<Vec<u8>> = None;

        loop {
            let (expired, next) = self
                .collect_expired_batch(resume.as_deref(), now_ms)
                .map_err(|e| partial(reclaimed, e))?;

            if !expired.is_empty() {
                reclaimed += self
                    .delete_expired_batch(&expired, now_ms)
                    .map_err(|e| partial(reclaimed, e))?;
            }

            match next {
                Some(key) => resume = Some(key),
                None => break,
            }
        }

        if reclaimed > 0 {
            debug!(reclaimed, "swept expired cache records");
        }
        Ok(reclaimed)
    }

    /// Delete every key starting with `prefix`, in bounded batches.
    ///
    /// Returns the number of keys deleted.
    fn evict_prefix(&self, prefix: &[u8]) -> Result<u64, BackendError> {
        self.evict_prefix_with(prefix, |keys| self.delete_batch(keys))
    }

    /// The eviction loop with the flush step supplied by the caller, so
    /// tests can fail a specific flush and observe which batches stayed
    /// committed.
    fn evict_prefix_with<F>(&self, prefix: &[u8], mut delete: F) -> Result<u64, BackendError>
    where
        F: FnMut(&[Vec<u8>]) -> Result<(), BackendError>,
    {
        let mut evicted = 0u64;
        let mut resume: Option<Vec<u8>> = None;

        loop {
            let batch = self
                .collect_prefix_batch(prefix, resume.as_deref())
                .map_err(|e| partial(evicted, e))?;

            let Some(last) = batch.last().cloned() else {
                break;
            };

            delete(&batch).map_err(|e| partial(evicted, e))?;
            evicted += batch.len() as u64;
            debug!(batch = batch.len(), evicted, "flushed eviction batch");

            if batch.len() < self.eviction_batch_size {
                // The scan ran off the end of the prefix range.
                break;
            }
            resume = Some(last);
        }

        Ok(evicted)
    }

    /// Scan one snapshot for keys matching `prefix`, starting past
    /// `resume`, collecting at most one batch. Keys only - the values stay
    /// untouched in the map.
    fn collect_prefix_batch(
        &self,
        prefix: &[u8],
        resume: Option<&[u8]>,
    ) -> Result<Vec<Vec<u8>>, BackendError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;

        let lower: Bound<&[u8]> = match resume {
            Some(key) => Bound::Excluded(key),
            None if prefix.is_empty() => Bound::Unbounded,
            None => Bound::Included(prefix),
        };
        let range: (Bound<&[u8]>, Bound<&[u8]>) = (lower, Bound::Unbounded);

        let iter = self
            .db
            .lazily_decode_data()
            .range(&rtxn, &range)
            .map_err(txn_err)?;

        let mut keys = Vec::with_capacity(self.eviction_batch_size);
        for item in iter {
            let (key, _value) = item.map_err(txn_err)?;
            if !key.starts_with(prefix) {
                // Keys are ordered, so the first non-match ends the range.
                break;
            }
            keys.push(key.to_vec());
            if keys.len() == self.eviction_batch_size {
                break;
            }
        }

        Ok(keys)
    }

    /// Delete one batch of keys in a single write transaction.
    fn delete_batch(&self, keys: &[Vec<u8>]) -> Result<(), BackendError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        for key in keys {
            self.db.delete(&mut wtxn, key).map_err(txn_err)?;
        }
        wtxn.commit().map_err(txn_err)
    }

    /// Scan one snapshot for expired records, bounded by the batch size in
    /// records examined. Returns the expired keys plus the resume point,
    /// or `None` when the keyspace is exhausted.
    fn collect_expired_batch(
        &self,
        resume: Option<&[u8]>,
        now_ms: i64,
    ) -> Result<(Vec<Vec<u8>>, Option<Vec<u8>>), BackendError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;

        let lower: Bound<&[u8]> = match resume {
            Some(key) => Bound::Excluded(key),
            None => Bound::Unbounded,
        };
        let range: (Bound<&[u8]>, Bound<&[u8]>) = (lower, Bound::Unbounded);

        let iter = self.db.range(&rtxn, &range).map_err(txn_err)?;

        let mut expired = Vec::new();
        let mut last: Option<Vec<u8>> = None;
        let mut examined = 0usize;
        for item in iter {
            let (key, record) = item.map_err(txn_err)?;
            examined += 1;
            last = Some(key.to_vec());
            // Unreadable records are left in place for get() to report.
            if let Ok((expires_at_ms, _)) = split_record(record) {
                if is_expired(expires_at_ms, now_ms) {
                    expired.push(key.to_vec());
                }
            }
            if examined == self.eviction_batch_size {
                break;
            }
        }

        let next = if examined < self.eviction_batch_size {
            None
        } else {
            last
        };
        Ok((expired, next))
    }

    /// Delete one batch of expired keys, re-checking each record under the
    /// write transaction so a key overwritten since the scan is left alone.
    fn delete_expired_batch(&self, keys: &[Vec<u8>], now_ms: i64) -> Result<u64, BackendError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let mut deleted = 0u64;
        for key in keys {
            let still_expired = match self.db.get(&wtxn, key).map_err(txn_err)? {
                Some(record) => matches!(
                    split_record(record),
                    Ok((expires_at_ms, _)) if is_expired(expires_at_ms, now_ms)
                ),
                None => false,
            };
            if still_expired && self.db.delete(&mut wtxn, key).map_err(txn_err)? {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(txn_err)?;
        Ok(deleted)
    }
}

#[async_trait]
impl Cache for EmbeddedCache {
    async fn get(&self, key: &str) -> VitesseResult<Value> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;

        let record = self
            .db
            .get(&rtxn, key.as_bytes())
            .map_err(txn_err)?
            .ok_or_else(|| BackendError::NotFound {
                key: key.to_string(),
            })?;

        let (expires_at_ms, payload) = split_record(record)?;
        if is_expired(expires_at_ms, Utc::now().timestamp_millis()) {
            return Err(BackendError::NotFound {
                key: key.to_string(),
            }
            .into());
        }

        let entry = CacheEntry::decode(payload, key)?;
        Ok(entry.value)
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> VitesseResult<()> {
        let payload = CacheEntry::new(key, value).encode()?;
        let expires_at_ms = match ttl {
            // Saturate oversized TTLs instead of wrapping into the past.
            Some(ttl) => {
                let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
                Utc::now().timestamp_millis().saturating_add(ttl_ms)
            }
            None => NO_EXPIRY,
        };
        let record = encode_record(&payload, expires_at_ms);

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.db
            .put(&mut wtxn, key.as_bytes(), &record)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    async fn forget(&self, key: &str) -> VitesseResult<()> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        // delete() reports whether the key existed; absence is fine here.
        self.db.delete(&mut wtxn, key.as_bytes()).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    async fn empty_by_match(&self, prefix: &str) -> VitesseResult<()> {
        self.evict_prefix(prefix.as_bytes())?;
        Ok(())
    }
}

/// Map an engine error into the backend taxonomy.
fn txn_err(e: heed::Error) -> BackendError {
    BackendError::Transaction {
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

/// Prepend the expiry header to a payload.
fn encode_record(payload: &[u8], expires_at_ms: i64) -> Vec<u8> {
    let mut record = Vec::with_capacity(HEADER_LEN + payload.len());
    record.extend_from_slice(&expires_at_ms.to_le_bytes());
    record.extend_from_slice(payload);
    record
}

/// Split a stored record into its expiry deadline and payload.
fn split_record(record: &[u8]) -> Result<(i64, &[u8]), CodecError> {
    if record.len() < HEADER_LEN {
        return Err(CodecError::Malformed {
            reason: format!("record shorter than its {HEADER_LEN}-byte header"),
        });
    }
    let header: [u8; HEADER_LEN] =
        record[..HEADER_LEN]
            .try_into()
            .map_err(|_| CodecError::Malformed {
                reason: "unreadable expiry header".to_string(),
            })?;
    Ok((i64::from_le_bytes(header), &record[HEADER_LEN..]))
}

/// Whether a record with the given deadline is past it.
fn is_expired(expires_at_ms: i64, now_ms: i64) -> bool {
    expires_at_ms != NO_EXPIRY && now_ms >= expires_at_ms
}
