//! The cache capability contract.
//!
//! Every backend satisfies [`Cache`]; application code depends only on
//! this trait, constructed once at startup via [`crate::from_config`].

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use vitesse_core::VitesseResult;

/// Pluggable cache contract.
///
/// Each operation is independently atomic at single-key granularity and
/// synchronous from the caller's perspective (it may block on disk or
/// network I/O). None of the operations retry internally; retry policy
/// belongs to the caller.
///
/// # Durability
///
/// Mutations are durable only to the extent the backend guarantees:
/// the embedded store commits per transaction, the remote store follows
/// its server-side persistence policy.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Fetch the live value for `key`.
    ///
    /// Fails with a not-found error when no live record exists, which
    /// covers both absent keys and records whose TTL has elapsed. Fails
    /// with a codec error when a record exists but cannot be decoded.
    async fn get(&self, key: &str) -> VitesseResult<Value>;

    /// Write or overwrite the record for `key`.
    ///
    /// With a TTL the record becomes unreadable once it elapses
    /// (granularity one second); without one it lives until deleted.
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> VitesseResult<()>;

    /// Delete the record for `key`. Deleting an absent key is not an error.
    async fn forget(&self, key: &str) -> VitesseResult<()>;

    /// Delete every record whose key starts with `prefix`.
    ///
    /// Deletions happen in bounded batches; each batch is atomic but the
    /// call as a whole is not. On failure the namespace may be partially
    /// evicted - the call is idempotent, so retrying finishes the job.
    /// Matching is a raw byte-prefix test with no separator convention.
    async fn empty_by_match(&self, prefix: &str) -> VitesseResult<()>;

    /// Whether `key` currently resolves to a live, decodable record.
    ///
    /// Deliberately lossy: every `get` failure, including genuine backend
    /// failures, reports as `false`. Callers that need to distinguish
    /// "absent" from "backend down" must call [`Cache::get`] directly.
    async fn has(&self, key: &str) -> bool {
        self.get(key).await.is_ok()
    }

    /// Delete every record in the cache's namespace.
    async fn empty(&self) -> VitesseResult<()> {
        self.empty_by_match("").await
    }
}
