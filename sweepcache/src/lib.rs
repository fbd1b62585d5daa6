//! # sweepcache
//!
//! Concurrent in-memory key/value cache with time-based expiry.
//!
//! - **Lazy expiry**: an entry past its TTL reads as absent immediately
//! - **Background sweeper**: one thread per cache physically removes expired
//!   entries every cleanup interval (disabled with an interval of zero)
//! - **Get-or-compute**: [`Cache::get_with`] fills misses from a closure
//! - **Configuration**: `CACHE_TTL` / `CACHE_CLEANUP_INTERVAL` from the
//!   environment, a `.env`-style file, or any key/value source
//!
//! ## Example
//!
//! ```rust
//! use sweepcache::{Cache, CacheConfig};
//!
//! let cache: Cache<Vec<u8>> = Cache::with_config(CacheConfig::new(60, 10));
//!
//! cache.set("blob", vec![1, 2, 3]);
//! assert_eq!(cache.peek("blob").as_deref(), Some(&vec![1, 2, 3]));
//!
//! cache.delete("blob");
//! assert!(cache.peek("blob").is_none());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

mod cache;
pub mod config;
pub mod constants;
pub mod error;
mod stats;
mod sweeper;

pub use cache::Cache;
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use stats::CacheStats;
