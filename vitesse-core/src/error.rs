//! Error types for Vitesse cache operations

use thiserror::Error;

/// Payload codec errors.
///
/// Raised when a stored payload is present but cannot be turned back into
/// the entry that was written, which always indicates corruption or a
/// payload written by an incompatible codec.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Malformed cache payload: {reason}")]
    Malformed { reason: String },

    #[error("Cache payload held {entries} entries, expected exactly one")]
    WrongShape { entries: usize },

    #[error("Cache payload keyed by {found:?}, expected {expected:?}")]
    KeyMismatch { expected: String, found: String },
}

/// Backend errors.
///
/// `NotFound` covers both genuinely absent keys and records whose TTL has
/// elapsed - the two are deliberately indistinguishable. `PartialEviction`
/// means a bulk delete failed after at least one batch already committed;
/// the namespace is left partially evicted and the call is safe to retry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("Key not found: {key:?}")]
    NotFound { key: String },

    #[error("Backend unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Transaction failed: {reason}")]
    Transaction { reason: String },

    #[error("Connection pool error: {reason}")]
    Pool { reason: String },

    #[error("Eviction incomplete after {evicted} deletions: {reason}")]
    PartialEviction { evicted: u64, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all Vitesse operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VitesseError {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl VitesseError {
    /// Whether this error means "no live record for the key".
    ///
    /// Expired and absent records both report as not-found; callers cannot
    /// tell them apart and must not try.
    pub fn is_not_found(&self) -> bool {
        matches!(self, VitesseError::Backend(BackendError::NotFound { .. }))
    }
}

/// Result type alias for Vitesse operations.
pub type VitesseResult<T> = Result<T, VitesseError>;

// =============================================================================
// TESTS
// =============================================================================
