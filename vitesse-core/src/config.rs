//! Configuration types
//!
//! One config struct per backend, plus [`CacheBackendConfig`] for selecting
//! the concrete backend at startup. The constructing collaborator reads
//! these once and hands the resulting cache handle to everything else;
//! nothing re-reads configuration at runtime.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// How many matching keys a single eviction transaction may delete.
///
/// Bounds peak write-transaction size independent of how many keys match
/// the prefix overall.
pub const DEFAULT_EVICTION_BATCH_SIZE: usize = 100_000;

/// `COUNT` hint passed to the remote store's cursor scan.
pub const DEFAULT_SCAN_COUNT: usize = 512;

/// How many keys a single remote `DEL` command may carry.
pub const DEFAULT_DELETE_BATCH_SIZE: usize = 512;

/// Configuration for the embedded (LMDB-backed) cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedCacheConfig {
    /// Directory where the engine keeps its data files. Created if absent.
    /// The engine takes a directory-level lock; only one process may open it.
    pub path: PathBuf,
    /// Maximum size of the memory map in megabytes.
    pub max_size_mb: usize,
    /// Upper bound on keys deleted per eviction transaction.
    pub eviction_batch_size: usize,
}

impl EmbeddedCacheConfig {
    /// Create a config for the given storage directory with default sizing.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            max_size_mb: 256,
            eviction_batch_size: DEFAULT_EVICTION_BATCH_SIZE,
        }
    }

    /// Set the maximum map size in megabytes.
    pub fn with_max_size_mb(mut self, mb: usize) -> Self {
        self.max_size_mb = mb;
        self
    }

    /// Set the eviction batch capacity.
    pub fn with_eviction_batch_size(mut self, size: usize) -> Self {
        self.eviction_batch_size = size;
        self
    }

    /// Validate the configuration before opening the engine.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.path.as_os_str().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "path".to_string(),
            });
        }
        if self.max_size_mb == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_size_mb".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.eviction_batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "eviction_batch_size".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Configuration for the remote (Redis-backed) cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteCacheConfig {
    /// Server hostname or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Optional AUTH password.
    pub password: Option<String>,
    /// Namespace prepended to every key as `"{namespace}:{key}"`, so
    /// several applications can share one server without colliding.
    pub namespace: String,
    /// Maximum pooled connections; callers beyond this block for one.
    pub pool_max_size: usize,
    /// Timeout for establishing a new connection.
    pub connect_timeout: Duration,
    /// Timeout while waiting on a pooled connection.
    pub wait_timeout: Duration,
    /// Timeout for the liveness probe issued before reusing a connection.
    pub recycle_timeout: Duration,
    /// `COUNT` hint for cursor scans during bulk eviction.
    pub scan_count: usize,
    /// Upper bound on keys deleted per `DEL` command.
    pub delete_batch_size: usize,
}

impl RemoteCacheConfig {
    /// Create a config for the given server and key namespace with default
    /// pool sizing.
    pub fn new<H: Into<String>, N: Into<String>>(host: H, port: u16, namespace: N) -> Self {
        Self {
            host: host.into(),
            port,
            password: None,
            namespace: namespace.into(),
            pool_max_size: 16,
            connect_timeout: Duration::from_secs(5),
            wait_timeout: Duration::from_secs(5),
            recycle_timeout: Duration::from_secs(1),
            scan_count: DEFAULT_SCAN_COUNT,
            delete_batch_size: DEFAULT_DELETE_BATCH_SIZE,
        }
    }

    /// Set the AUTH password.
    pub fn with_password<S: Into<String>>(mut self, password: S) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the maximum pool size.
    pub fn with_pool_max_size(mut self, size: usize) -> Self {
        self.pool_max_size = size;
        self
    }

    /// Set the scan count hint.
    pub fn with_scan_count(mut self, count: usize) -> Self {
        self.scan_count = count;
        self
    }

    /// Set the delete batch capacity.
    pub fn with_delete_batch_size(mut self, size: usize) -> Self {
        self.delete_batch_size = size;
        self
    }

    /// Validate the configuration before building the pool.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "host".to_string(),
            });
        }
        if self.pool_max_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pool_max_size".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.scan_count == 0 {
            return Err(ConfigError::InvalidValue {
                field: "scan_count".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.delete_batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "delete_batch_size".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Render the connection URL for the client.
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => format!("redis://:{}@{}:{}/", password, self.host, self.port),
            None => format!("redis://{}:{}/", self.host, self.port),
        }
    }
}

/// Which concrete backend to construct at startup.
///
/// Application code selects one of these from its own configuration file
/// or environment and never branches on the concrete type afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CacheBackendConfig {
    /// In-process, disk-backed store.
    Embedded(EmbeddedCacheConfig),
    /// Shared network-accessible store.
    Remote(RemoteCacheConfig),
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_defaults() {
        let config = EmbeddedCacheConfig::new("/tmp/vitesse");
        assert_eq!(config.eviction_batch_size, DEFAULT_EVICTION_BATCH_SIZE);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_embedded_rejects_zero_batch() {
        let config = EmbeddedCacheConfig::new("/tmp/vitesse").with_eviction_batch_size(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_embedded_rejects_empty_path() {
        let config = EmbeddedCacheConfig::new("");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRequired { .. })
        ));
    }

    #[test]
    fn test_remote_defaults() {
        let config = RemoteCacheConfig::new("127.0.0.1", 6379, "app");
        assert_eq!(config.pool_max_size, 16);
        assert_eq!(config.scan_count, DEFAULT_SCAN_COUNT);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_remote_url_with_and_without_password() {
        let config = RemoteCacheConfig::new("cache.internal", 6380, "app");
        assert_eq!(config.url(), "redis://cache.internal:6380/");

        let config = config.with_password("hunter2");
        assert_eq!(config.url(), "redis://:hunter2@cache.internal:6380/");
    }

    #[test]
    fn test_remote_rejects_zero_pool() {
        let config = RemoteCacheConfig::new("127.0.0.1", 6379, "app").with_pool_max_size(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backend_config_serde_roundtrip() {
        let config = CacheBackendConfig::Embedded(EmbeddedCacheConfig::new("/var/cache/vitesse"));
        let json = serde_json::to_string(&config).expect("serialize should succeed");
        let back: CacheBackendConfig =
            serde_json::from_str(&json).expect("deserialize should succeed");
        assert_eq!(config, back);
    }
}
