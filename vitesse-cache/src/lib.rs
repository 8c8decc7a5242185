//! Cache layer with pluggable embedded and remote backends.
//!
//! This crate provides a uniform cache abstraction over two interchangeable
//! stores: an in-process LMDB environment and a shared Redis server. Callers
//! hold a [`Cache`] trait object selected once at startup from
//! [`CacheBackendConfig`] and never branch on the concrete backend.
//!
//! # Operations
//!
//! Every backend supports the same six operations: `has`, `get`, `set`
//! (with optional per-key TTL), `forget`, `empty`, and `empty_by_match`
//! (bulk eviction of a raw key prefix). Bulk eviction uses bounded delete
//! batches so a prefix matching millions of keys never produces an
//! oversized transaction or an unbounded server command.
//!
//! # Key namespaces
//!
//! Prefixes are raw byte prefixes with no reserved separator:
//! `empty_by_match("user")` also evicts `"users:42"`. Callers own their
//! naming convention; `"user:"` style prefixes avoid the collision.
//!
//! # Example
//!
//! ```ignore
//! use vitesse_cache::{from_config, Cache};
//! use vitesse_core::{CacheBackendConfig, EmbeddedCacheConfig};
//!
//! let cache = from_config(&CacheBackendConfig::Embedded(
//!     EmbeddedCacheConfig::new("/var/cache/app"),
//! ))?;
//!
//! cache.set("session:abc", serde_json::json!({"user": 42}), None).await?;
//! let value = cache.get("session:abc").await?;
//! cache.empty_by_match("session:").await?;
//! ```

pub mod codec;
pub mod embedded;
pub mod remote;
pub mod traits;

pub use codec::CacheEntry;
pub use embedded::EmbeddedCache;
pub use remote::RemoteCache;
pub use traits::Cache;

use vitesse_core::{CacheBackendConfig, VitesseResult};

/// Construct the backend named by configuration.
///
/// This is the single place concrete backend types appear; everything
/// downstream works against `dyn Cache`.
pub fn from_config(config: &CacheBackendConfig) -> VitesseResult<Box<dyn Cache>> {
    match config {
        CacheBackendConfig::Embedded(config) => Ok(Box::new(EmbeddedCache::open(config)?)),
        CacheBackendConfig::Remote(config) => Ok(Box::new(RemoteCache::connect(config)?)),
    }
}
