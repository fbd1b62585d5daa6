//! Error types for sweepcache.
//!
//! Cache operations are infallible: a missing or expired key is a normal
//! `None`, not an error. Errors only arise while building a configuration.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using `CacheError`.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Main error type for sweepcache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// A configuration value could not be parsed as an integer.
    #[error("Invalid value for {key}: '{value}' is not an integer")]
    InvalidConfig {
        /// Configuration key, e.g. `CACHE_TTL`
        key: String,
        /// Raw value as found in the source
        value: String,
    },

    /// A configuration file could not be read or parsed.
    #[error("Failed to read config file {}: {source}", path.display())]
    ConfigFile {
        /// File that was being loaded
        path: PathBuf,
        /// Underlying loader error
        #[source]
        source: dotenvy::Error,
    },
}

impl CacheError {
    /// Returns the configuration key involved, if any.
    pub fn config_key(&self) -> Option<&str> {
        match self {
            CacheError::InvalidConfig { key, .. } => Some(key),
            CacheError::ConfigFile { .. } => None,
        }
    }
}
