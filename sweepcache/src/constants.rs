//! Configuration keys and defaults.

// ═══════════════════════════════════════════════════════════════════════════════
// CONFIGURATION KEYS
// ═══════════════════════════════════════════════════════════════════════════════

/// Key holding the default time-to-live, in seconds.
pub const ENV_CACHE_TTL: &str = "CACHE_TTL";

/// Key holding the pause between sweep passes, in seconds.
/// A value of `0` disables the background sweeper.
pub const ENV_CACHE_CLEANUP_INTERVAL: &str = "CACHE_CLEANUP_INTERVAL";

// ═══════════════════════════════════════════════════════════════════════════════
// DEFAULTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Default TTL applied to every write (10 minutes).
pub const DEFAULT_TTL_SECONDS: u64 = 600;

/// Default pause between sweep passes (1 minute).
pub const DEFAULT_CLEANUP_INTERVAL_SECONDS: u64 = 60;

// ═══════════════════════════════════════════════════════════════════════════════
// SWEEPER
// ═══════════════════════════════════════════════════════════════════════════════

/// Name given to the background sweeper thread.
pub const SWEEPER_THREAD_NAME: &str = "sweepcache-sweeper";
