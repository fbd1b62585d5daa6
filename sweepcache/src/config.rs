//! Cache configuration.
//!
//! Two tunables drive a [`Cache`](crate::Cache): the default TTL and the
//! cleanup interval, both whole seconds. They can be given directly, read
//! from the process environment (with `.env` support), read from a
//! `KEY=VALUE` file, or pulled from any other key/value source through
//! [`CacheConfig::from_lookup`].

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::constants::{
    DEFAULT_CLEANUP_INTERVAL_SECONDS, DEFAULT_TTL_SECONDS, ENV_CACHE_CLEANUP_INTERVAL,
    ENV_CACHE_TTL,
};
use crate::error::{CacheError, Result};

/// Cache configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Default TTL in seconds
    pub ttl_seconds: u64,
    /// Seconds between sweep passes, 0 disables the sweeper
    pub cleanup_interval_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: DEFAULT_TTL_SECONDS,
            cleanup_interval_seconds: DEFAULT_CLEANUP_INTERVAL_SECONDS,
        }
    }
}

impl CacheConfig {
    /// Creates a configuration from explicit values.
    pub fn new(ttl_seconds: u64, cleanup_interval_seconds: u64) -> Self {
        Self {
            ttl_seconds,
            cleanup_interval_seconds,
        }
    }

    /// Sets the default TTL.
    pub fn with_ttl(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = ttl_seconds;
        self
    }

    /// Sets the cleanup interval. `0` disables the background sweeper.
    pub fn with_cleanup_interval(mut self, seconds: u64) -> Self {
        self.cleanup_interval_seconds = seconds;
        self
    }

    /// Default TTL as a `Duration`.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    /// Cleanup interval as a `Duration`.
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }

    /// Reads `CACHE_TTL` and `CACHE_CLEANUP_INTERVAL` from the environment.
    ///
    /// A `.env` file in the working directory (or a parent) is loaded first
    /// if one exists. Variables already set in the process win over the file.
    #[instrument]
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        Self::from_lookup(env_value)
    }

    /// Reads the configuration from a `KEY=VALUE` file.
    ///
    /// Lines starting with `#` are comments. Keys other than the two cache
    /// keys are ignored. A non-empty variable in the process environment
    /// takes precedence over the file's value for the same key.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        load_file(path.as_ref())
    }

    /// Builds a configuration from an arbitrary key/value source.
    ///
    /// Absent or blank values fall back to the defaults (600s TTL, 60s
    /// interval). Negative values are clamped to zero.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidConfig`] if a value is not an integer.
    #[instrument(skip(lookup))]
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self {
            ttl_seconds: read_seconds(&lookup, ENV_CACHE_TTL, DEFAULT_TTL_SECONDS)?,
            cleanup_interval_seconds: read_seconds(
                &lookup,
                ENV_CACHE_CLEANUP_INTERVAL,
                DEFAULT_CLEANUP_INTERVAL_SECONDS,
            )?,
        };

        debug!(
            ttl_seconds = config.ttl_seconds,
            cleanup_interval_seconds = config.cleanup_interval_seconds,
            "Resolved cache configuration"
        );
        Ok(config)
    }
}

#[instrument]
fn load_file(path: &Path) -> Result<CacheConfig> {
    let to_error = |source| CacheError::ConfigFile {
        path: path.to_path_buf(),
        source,
    };

    let mut values = HashMap::new();
    for item in dotenvy::from_path_iter(path).map_err(to_error)? {
        let (key, value) = item.map_err(to_error)?;
        values.insert(key, value);
    }

    CacheConfig::from_lookup(|key| env_value(key).or_else(|| values.get(key).cloned()))
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

fn read_seconds<F>(lookup: &F, key: &str, default: u64) -> Result<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = match lookup(key) {
        Some(raw) => raw,
        None => return Ok(default),
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(default);
    }

    if let Ok(seconds) = trimmed.parse::<u64>() {
        return Ok(seconds);
    }

    match trimmed.parse::<i64>() {
        Ok(negative) => {
            warn!(key, value = negative, "Negative cache setting clamped to 0");
            Ok(0)
        }
        Err(_) => Err(CacheError::InvalidConfig {
            key: key.to_string(),
            value: raw,
        }),
    }
}
