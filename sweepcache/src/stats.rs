//! Cache statistics.

use serde::Serialize;

/// Point-in-time view of a cache.
///
/// Entry counts are gathered shard by shard, so under concurrent writes they
/// are approximate.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Entries physically present (including expired)
    pub total_entries: usize,
    /// Present but already expired, waiting for a sweep
    pub expired_entries: usize,
    /// Live entries
    pub valid_entries: usize,
    /// Sweep passes completed since construction
    pub sweeps: u64,
    /// Entries removed by sweep passes since construction
    pub swept_entries: u64,
}

impl CacheStats {
    /// Fraction of present entries that are expired, in `[0.0, 1.0]`.
    pub fn expired_ratio(&self) -> f64 {
        if self.total_entries == 0 {
            0.0
        } else {
            self.expired_entries as f64 / self.total_entries as f64
        }
    }
}
