//! Concurrent TTL cache with lazy expiry and a background sweeper.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, trace};

use crate::config::CacheConfig;
use crate::error::Result;
use crate::stats::CacheStats;
use crate::sweeper::{self, SweepControl};

/// Stand-in expiry for TTLs too large to add to the current instant.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Cache entry with an absolute expiry.
struct CacheEntry<V> {
    value: Arc<V>,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: Arc<V>, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            value,
            expires_at: now.checked_add(ttl).unwrap_or(now + FAR_FUTURE),
        }
    }

    fn is_live_at(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// State shared by every handle to one cache and, weakly, by its sweeper.
pub(crate) struct Inner<V> {
    store: DashMap<String, CacheEntry<V>>,
    ttl: Duration,
    pub(crate) sweep_interval: Duration,
    pub(crate) sweeper: Arc<SweepControl>,
    sweeps: AtomicU64,
    swept_entries: AtomicU64,
}

impl<V> Inner<V> {
    /// Removes every entry whose expiry is at or before now.
    ///
    /// Walks the store one shard at a time; entries written during the pass
    /// may or may not be considered.
    pub(crate) fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0usize;

        self.store.retain(|_, entry| {
            let live = entry.is_live_at(now);
            if !live {
                removed += 1;
            }
            live
        });

        self.sweeps.fetch_add(1, Ordering::Relaxed);
        self.swept_entries
            .fetch_add(removed as u64, Ordering::Relaxed);

        if removed > 0 {
            debug!(removed, remaining = self.store.len(), "Swept expired entries");
        } else {
            trace!("Sweep found nothing to remove");
        }
        removed
    }
}

impl<V> Drop for Inner<V> {
    fn drop(&mut self) {
        self.sweeper.stop();
    }
}

/// In-memory cache keyed by string with a single default TTL.
///
/// Thread-safe: every operation may be called concurrently from any number
/// of threads. A single key's read or write is atomic; there are no
/// multi-key transactions.
///
/// `Cache` is a handle. Cloning it is cheap and every clone sees the same
/// entries and controls the same sweeper. When the last handle is dropped the
/// sweeper is told to stop.
///
/// Values are stored behind an [`Arc`] and handed out as shared references;
/// the cache never clones or inspects `V` itself.
///
/// # Expiry
///
/// Every write stamps the entry with `now + ttl`. Readers treat an entry as
/// absent once that instant has passed, whether or not it has been removed
/// yet. Physical removal is the sweeper's job, which runs every
/// `sweep_interval` unless the interval is zero.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use sweepcache::Cache;
///
/// let cache: Cache<String> = Cache::new(Duration::from_secs(600), Duration::from_secs(60));
///
/// let value = cache.get_with("greeting", || "hello".to_string(), false);
/// assert_eq!(value.as_str(), "hello");
///
/// // Cached: the closure is not called again.
/// let value = cache.get_with("greeting", || "ignored".to_string(), false);
/// assert_eq!(value.as_str(), "hello");
///
/// cache.stop();
/// ```
pub struct Cache<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for Cache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> Cache<V>
where
    V: Send + Sync + 'static,
{
    /// Creates a cache and starts the sweeper if `sweep_interval` is non-zero.
    pub fn new(ttl: Duration, sweep_interval: Duration) -> Self {
        let cache = Self {
            inner: Arc::new(Inner {
                store: DashMap::new(),
                ttl,
                sweep_interval,
                sweeper: Arc::new(SweepControl::new()),
                sweeps: AtomicU64::new(0),
                swept_entries: AtomicU64::new(0),
            }),
        };
        cache.start();
        cache
    }

    /// Creates a cache from a configuration.
    pub fn with_config(config: CacheConfig) -> Self {
        Self::new(config.ttl(), config.cleanup_interval())
    }

    /// Creates a cache configured from `CACHE_TTL` and
    /// `CACHE_CLEANUP_INTERVAL` (defaults 600 and 60 seconds).
    pub fn from_env() -> Result<Self> {
        Ok(Self::with_config(CacheConfig::from_env()?))
    }

    /// Starts the background sweeper.
    ///
    /// No-op if it is already running or the sweep interval is zero. A cache
    /// that was stopped can be started again.
    pub fn start(&self) {
        sweeper::start(&self.inner);
    }

    /// Asks the background sweeper to stop.
    ///
    /// Returns immediately. A sweep pass already in progress may finish after
    /// this returns, but no further pass is scheduled. Reads and writes keep
    /// working; expired entries are then only hidden, not removed.
    pub fn stop(&self) {
        if self.inner.sweeper.stop() {
            debug!("Sweeper stop requested");
        }
    }

    /// Returns true while the background sweeper is running.
    pub fn is_running(&self) -> bool {
        self.inner.sweeper.is_running()
    }

    /// Default TTL applied to every write.
    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Pause between sweep passes. Zero means no background sweeping.
    pub fn sweep_interval(&self) -> Duration {
        self.inner.sweep_interval
    }

    /// Returns the value for `key` if present and not expired.
    ///
    /// Never modifies the cache: an expired entry stays in place until the
    /// sweeper removes it.
    pub fn peek(&self, key: &str) -> Option<Arc<V>> {
        let now = Instant::now();
        self.inner
            .store
            .get(key)
            .filter(|entry| entry.is_live_at(now))
            .map(|entry| Arc::clone(&entry.value))
    }

    /// Returns the cached value for `key`, computing and storing it on a miss.
    ///
    /// With `skip == false` a live entry is returned as is and `compute` is
    /// not called. Otherwise (`skip == true`, key absent, or entry expired)
    /// `compute` runs once, its result is stored with a fresh TTL and
    /// returned.
    ///
    /// No lock is held while `compute` runs. Concurrent misses on the same
    /// key are not deduplicated: each caller runs its own `compute` and the
    /// last write wins. If `compute` panics nothing is stored.
    pub fn get_with<F>(&self, key: &str, compute: F, skip: bool) -> Arc<V>
    where
        F: FnOnce() -> V,
    {
        if !skip {
            if let Some(value) = self.peek(key) {
                trace!(key, "Cache hit");
                return value;
            }
        }

        trace!(key, skip, "Computing value");
        let value = Arc::new(compute());
        self.set_arc(key, Arc::clone(&value));
        value
    }

    /// Fallible variant of [`get_with`](Self::get_with).
    ///
    /// An error from `compute` is returned unchanged and nothing is stored.
    pub fn try_get_with<F, E>(&self, key: &str, compute: F, skip: bool) -> std::result::Result<Arc<V>, E>
    where
        F: FnOnce() -> std::result::Result<V, E>,
    {
        if !skip {
            if let Some(value) = self.peek(key) {
                trace!(key, "Cache hit");
                return Ok(value);
            }
        }

        trace!(key, skip, "Computing value");
        let value = Arc::new(compute()?);
        self.set_arc(key, Arc::clone(&value));
        Ok(value)
    }

    /// Stores `value` under `key` with the default TTL, replacing any
    /// previous entry.
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_arc(key, Arc::new(value));
    }

    /// Stores an already shared value under `key` with the default TTL.
    pub fn set_arc(&self, key: impl Into<String>, value: Arc<V>) {
        self.inner
            .store
            .insert(key.into(), CacheEntry::new(value, self.inner.ttl));
    }

    /// Removes `key`. Does nothing if it is absent.
    pub fn delete(&self, key: &str) {
        self.inner.store.remove(key);
    }

    /// Removes every entry.
    ///
    /// Clears one shard at a time, so entries inserted concurrently may
    /// survive.
    pub fn delete_all(&self) {
        self.inner.store.clear();
    }

    /// Runs one sweep pass on the calling thread and returns how many
    /// entries were removed.
    pub fn purge_expired(&self) -> usize {
        self.inner.purge_expired()
    }

    /// Number of entries physically present, expired ones included.
    pub fn len(&self) -> usize {
        self.inner.store.len()
    }

    /// Returns true if no entries are physically present.
    pub fn is_empty(&self) -> bool {
        self.inner.store.is_empty()
    }

    /// Returns cache statistics.
    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let mut total = 0usize;
        let mut expired = 0usize;
        for entry in self.inner.store.iter() {
            total += 1;
            if !entry.is_live_at(now) {
                expired += 1;
            }
        }

        CacheStats {
            total_entries: total,
            expired_entries: expired,
            valid_entries: total - expired,
            sweeps: self.inner.sweeps.load(Ordering::Relaxed),
            swept_entries: self.inner.swept_entries.load(Ordering::Relaxed),
        }
    }
}

impl<V> fmt::Debug for Cache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("ttl", &self.inner.ttl)
            .field("sweep_interval", &self.inner.sweep_interval)
            .field("entries", &self.inner.store.len())
            .field("running", &self.inner.sweeper.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    use proptest::prelude::*;

    const LONG: Duration = Duration::from_secs(3600);

    fn no_sweeper(ttl: Duration) -> Cache<String> {
        Cache::new(ttl, Duration::ZERO)
    }

    #[test]
    fn test_peek_miss() {
        let cache = no_sweeper(LONG);
        assert!(cache.peek("nonexistent").is_none());
    }

    #[test]
    fn test_set_then_peek() {
        let cache = no_sweeper(LONG);
        cache.set("a", "x".to_string());

        let value = cache.peek("a").unwrap();
        assert_eq!(value.as_str(), "x");
    }

    #[test]
    fn test_set_overwrites() {
        let cache = no_sweeper(LONG);
        cache.set("a", "x".to_string());
        cache.set("a", "y".to_string());

        assert_eq!(cache.peek("a").unwrap().as_str(), "y");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_get_with_caches_first_value() {
        let cache = no_sweeper(LONG);

        let v1 = cache.get_with("b", || "v1".to_string(), false);
        assert_eq!(v1.as_str(), "v1");

        let cached = cache.get_with("b", || panic!("must not recompute"), false);
        assert_eq!(cached.as_str(), "v1");

        let forced = cache.get_with("b", || "v2".to_string(), true);
        assert_eq!(forced.as_str(), "v2");
        assert_eq!(cache.peek("b").unwrap().as_str(), "v2");
    }

    #[test]
    fn test_get_with_computes_once_per_call() {
        let cache: Cache<usize> = Cache::new(LONG, Duration::ZERO);
        let calls = AtomicUsize::new(0);

        let compute = || calls.fetch_add(1, Ordering::SeqCst) + 10;
        assert_eq!(*cache.get_with("k", compute, false), 10);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let compute = || calls.fetch_add(1, Ordering::SeqCst) + 10;
        assert_eq!(*cache.get_with("k", compute, false), 10);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let compute = || calls.fetch_add(1, Ordering::SeqCst) + 10;
        assert_eq!(*cache.get_with("k", compute, true), 11);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_get_with_returns_shared_value() {
        let cache = no_sweeper(LONG);
        let first = cache.get_with("k", || "v".to_string(), false);
        let second = cache.get_with("k", || "w".to_string(), false);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_delete_then_recompute() {
        let cache = no_sweeper(LONG);
        cache.get_with("mykey", || "Hello World".to_string(), false);

        cache.delete("mykey");
        assert!(cache.peek("mykey").is_none());

        let value = cache.get_with("mykey", || "Fallera".to_string(), false);
        assert_eq!(value.as_str(), "Fallera");

        cache.set("mykey", "how cool".to_string());
        let value = cache.get_with("mykey", || "Fallera".to_string(), false);
        assert_eq!(value.as_str(), "how cool");
    }

    #[test]
    fn test_delete_missing_is_noop() {
        let cache = no_sweeper(LONG);
        cache.delete("missing");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_delete_all() {
        let cache = no_sweeper(LONG);
        cache.set("alice", "1".to_string());
        cache.set("bob", "2".to_string());

        cache.delete_all();

        assert!(cache.is_empty());
        assert!(cache.peek("alice").is_none());
        assert!(cache.peek("bob").is_none());
    }

    #[test]
    fn test_try_get_with_error_stores_nothing() {
        let cache = no_sweeper(LONG);

        let result: std::result::Result<_, &str> =
            cache.try_get_with("k", || Err("backend down"), false);
        assert_eq!(result.unwrap_err(), "backend down");
        assert!(cache.is_empty());

        let value = cache
            .try_get_with::<_, &str>("k", || Ok("ok".to_string()), false)
            .unwrap();
        assert_eq!(value.as_str(), "ok");
        assert_eq!(cache.peek("k").unwrap().as_str(), "ok");
    }

    #[test]
    fn test_try_get_with_error_keeps_previous_value() {
        let cache = no_sweeper(LONG);
        cache.set("k", "old".to_string());

        let result = cache.try_get_with("k", || Err::<String, _>("nope"), true);
        assert!(result.is_err());
        assert_eq!(cache.peek("k").unwrap().as_str(), "old");
    }

    #[test]
    fn test_panicking_compute_stores_nothing() {
        let cache = no_sweeper(LONG);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            cache.get_with("k", || panic!("compute failed"), false)
        }));

        assert!(result.is_err());
        assert!(cache.peek("k").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lazy_expiry_without_sweeper() {
        let cache = no_sweeper(Duration::from_millis(30));
        cache.set("a", "x".to_string());
        assert!(cache.peek("a").is_some());

        thread::sleep(Duration::from_millis(60));

        assert!(cache.peek("a").is_none());
        // Peek hides the entry but does not remove it.
        assert_eq!(cache.len(), 1);

        let stats = cache.stats();
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.expired_entries, 1);
        assert_eq!(stats.valid_entries, 0);
    }

    #[test]
    fn test_get_with_recomputes_expired() {
        let cache = no_sweeper(Duration::from_millis(30));
        cache.get_with("k", || "first".to_string(), false);

        thread::sleep(Duration::from_millis(60));

        let value = cache.get_with("k", || "second".to_string(), false);
        assert_eq!(value.as_str(), "second");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_zero_ttl_is_never_live() {
        let cache = no_sweeper(Duration::ZERO);
        cache.set("k", "v".to_string());
        assert!(cache.peek("k").is_none());
    }

    #[test]
    fn test_huge_ttl_does_not_overflow() {
        let cache = no_sweeper(Duration::from_secs(u64::MAX));
        cache.set("k", "v".to_string());
        assert!(cache.peek("k").is_some());
    }

    #[test]
    fn test_purge_expired() {
        let cache = no_sweeper(Duration::from_millis(20));
        cache.set("old", "1".to_string());
        thread::sleep(Duration::from_millis(40));

        let fresh = no_sweeper(LONG);
        fresh.set("new", "2".to_string());

        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
        assert_eq!(fresh.purge_expired(), 0);
        assert_eq!(fresh.len(), 1);

        let stats = cache.stats();
        assert_eq!(stats.sweeps, 1);
        assert_eq!(stats.swept_entries, 1);
    }

    #[test]
    fn test_zero_interval_never_runs_sweeper() {
        let cache = no_sweeper(LONG);
        assert!(!cache.is_running());

        cache.start();
        assert!(!cache.is_running());
    }

    #[test]
    fn test_sweeper_removes_expired() {
        let cache: Cache<String> =
            Cache::new(Duration::from_millis(20), Duration::from_millis(25));
        assert!(cache.is_running());

        cache.set("a", "x".to_string());
        thread::sleep(Duration::from_millis(300));

        assert!(cache.is_empty());
        let stats = cache.stats();
        assert!(stats.sweeps >= 1);
        assert_eq!(stats.swept_entries, 1);

        cache.stop();
    }

    #[test]
    fn test_sweeper_keeps_live_entries() {
        let cache: Cache<String> = Cache::new(LONG, Duration::from_millis(10));
        cache.set("a", "x".to_string());

        thread::sleep(Duration::from_millis(100));

        assert_eq!(cache.peek("a").unwrap().as_str(), "x");
        assert!(cache.stats().sweeps >= 1);
        cache.stop();
    }

    #[test]
    fn test_stop_halts_sweeping() {
        let cache: Cache<String> =
            Cache::new(Duration::from_millis(10), Duration::from_millis(10));
        cache.stop();
        assert!(!cache.is_running());

        cache.set("a", "x".to_string());
        thread::sleep(Duration::from_millis(100));

        assert!(cache.peek("a").is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_restart_after_stop() {
        let cache: Cache<String> =
            Cache::new(Duration::from_millis(10), Duration::from_millis(20));
        cache.stop();
        cache.start();
        assert!(cache.is_running());

        // Starting twice leaves a single sweeper in place.
        cache.start();
        assert!(cache.is_running());

        cache.set("a", "x".to_string());
        thread::sleep(Duration::from_millis(300));
        assert!(cache.is_empty());

        cache.stop();
    }

    #[test]
    fn test_clones_share_state() {
        let cache: Cache<String> = Cache::new(LONG, Duration::from_secs(60));
        let other = cache.clone();

        other.set("k", "v".to_string());
        assert_eq!(cache.peek("k").unwrap().as_str(), "v");

        other.stop();
        assert!(!cache.is_running());
    }

    #[test]
    fn test_drop_signals_sweeper() {
        let cache: Cache<String> = Cache::new(LONG, Duration::from_secs(60));
        let control = Arc::clone(&cache.inner.sweeper);
        assert!(control.is_running());

        drop(cache);
        assert!(!control.is_running());
    }

    #[test]
    fn test_with_config() {
        let cache: Cache<String> = Cache::with_config(CacheConfig::new(5, 0));
        assert_eq!(cache.ttl(), Duration::from_secs(5));
        assert_eq!(cache.sweep_interval(), Duration::ZERO);
        assert!(!cache.is_running());
    }

    #[test]
    fn test_debug_output() {
        let cache = no_sweeper(LONG);
        cache.set("k", "v".to_string());
        let debug = format!("{:?}", cache);
        assert!(debug.contains("entries: 1"));
        assert!(debug.contains("running: false"));
    }

    #[test]
    fn test_concurrent_writers() {
        let cache: Cache<usize> = Cache::new(LONG, Duration::from_millis(5));
        let mut handles = Vec::new();

        for t in 0..8 {
            let cache = cache.clone();
            handles.push(thread::spawn(move || {
                for i in 0..100 {
                    let key = format!("{}-{}", t, i);
                    cache.set(key.clone(), i);
                    assert_eq!(*cache.peek(&key).unwrap(), i);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.len(), 800);
        cache.stop();
    }

    #[test]
    fn test_concurrent_misses_last_write_wins() {
        let cache: Cache<usize> = Cache::new(LONG, Duration::ZERO);
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(std::sync::Barrier::new(8));
        let mut handles = Vec::new();

        for t in 0..8 {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                barrier.wait();
                cache.get_with(
                    "shared",
                    || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        t
                    },
                    false,
                )
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        // At least one compute ran; duplicates are allowed.
        let calls = calls.load(Ordering::SeqCst);
        assert!((1..=8).contains(&calls));
        assert_eq!(cache.len(), 1);
        assert!(*cache.peek("shared").unwrap() < 8);
    }

    #[test]
    fn test_sweep_scenario_in_seconds() {
        let cache: Cache<String> = Cache::new(Duration::from_secs(2), Duration::from_secs(1));

        cache.set("a", "x".to_string());
        assert_eq!(cache.peek("a").unwrap().as_str(), "x");

        thread::sleep(Duration::from_secs(3));
        assert!(cache.peek("a").is_none());

        thread::sleep(Duration::from_secs(2));
        assert_eq!(cache.len(), 0);

        cache.stop();
    }

    proptest! {
        #[test]
        fn prop_set_then_peek(key in ".{0,32}", value in any::<u64>()) {
            let cache: Cache<u64> = Cache::new(LONG, Duration::ZERO);
            cache.set(key.clone(), value);
            prop_assert_eq!(cache.peek(&key).map(|v| *v), Some(value));
        }

        #[test]
        fn prop_unwritten_keys_miss(written in ".{1,16}", other in ".{1,16}") {
            prop_assume!(written != other);
            let cache: Cache<u64> = Cache::new(LONG, Duration::ZERO);
            cache.set(written, 1);
            prop_assert!(cache.peek(&other).is_none());
        }
    }
}
