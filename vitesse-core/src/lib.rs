//! Vitesse Core - Configuration and Errors
//!
//! Pure data types with no behavior. All other crates depend on this.
//! This crate contains ONLY configuration structs and the error taxonomy -
//! no cache logic.

pub mod config;
pub mod error;

pub use config::{
    CacheBackendConfig, EmbeddedCacheConfig, RemoteCacheConfig, DEFAULT_DELETE_BATCH_SIZE,
    DEFAULT_EVICTION_BATCH_SIZE, DEFAULT_SCAN_COUNT,
};
pub use error::{BackendError, CodecError, ConfigError, VitesseError, VitesseResult};
