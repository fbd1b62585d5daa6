//! sweepcache CLI
//!
//! Inspect the resolved cache configuration and run churn workloads against
//! a live cache to watch lazy expiry and the background sweeper at work.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{ensure, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use rand::Rng;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sweepcache::{Cache, CacheConfig};

/// sweepcache - concurrent TTL cache toolkit
#[derive(Parser, Debug)]
#[command(name = "sweepcache")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Read CACHE_TTL / CACHE_CLEANUP_INTERVAL from this file (exported variables still win)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the default TTL (seconds)
    #[arg(long, global = true)]
    ttl: Option<u64>,

    /// Override the cleanup interval (seconds, 0 disables the sweeper)
    #[arg(long, global = true)]
    interval: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the resolved cache configuration as JSON
    Config,

    /// Hammer a cache from several threads and report what the sweeper did
    Soak {
        /// Number of worker threads
        #[arg(short, long, default_value = "4")]
        threads: usize,
        /// Size of the key space
        #[arg(short, long, default_value = "1000")]
        keys: usize,
        /// How long to run
        #[arg(short, long, default_value = "10")]
        seconds: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "sweepcache=debug,info"
    } else {
        "sweepcache=info,warn"
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = resolve_config(&cli)?;

    match cli.command {
        Commands::Config => cmd_config(&config),
        Commands::Soak {
            threads,
            keys,
            seconds,
        } => cmd_soak(config, threads, keys, seconds),
    }
}

/// Loads the configuration from file or environment and applies overrides.
fn resolve_config(cli: &Cli) -> Result<CacheConfig> {
    let mut config = match &cli.config {
        Some(path) => CacheConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => CacheConfig::from_env().map_err(|e| {
            let context = match e.config_key() {
                Some(key) => format!("Invalid {} in environment", key),
                None => "Invalid cache configuration in environment".to_string(),
            };
            anyhow::Error::new(e).context(context)
        })?,
    };

    if let Some(ttl) = cli.ttl {
        config = config.with_ttl(ttl);
    }
    if let Some(interval) = cli.interval {
        config = config.with_cleanup_interval(interval);
    }

    Ok(config)
}

/// Print resolved configuration
fn cmd_config(config: &CacheConfig) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);

    if config.cleanup_interval_seconds == 0 {
        println!(
            "\n{}",
            "⚠️  Cleanup interval is 0: expired entries are hidden but never removed.".yellow()
        );
    }

    Ok(())
}

/// Run a concurrent churn workload
fn cmd_soak(config: CacheConfig, threads: usize, keys: usize, seconds: u64) -> Result<()> {
    ensure!(threads > 0, "--threads must be at least 1");
    ensure!(keys > 0, "--keys must be at least 1");
    let deadline = Instant::now()
        .checked_add(Duration::from_secs(seconds))
        .with_context(|| format!("--seconds {} is too large", seconds))?;

    println!(
        "{} {} threads, {} keys, {}s (ttl {}s, interval {}s)",
        "🔥 Soaking cache:".cyan().bold(),
        threads,
        keys,
        seconds,
        config.ttl_seconds,
        config.cleanup_interval_seconds,
    );

    let cache: Cache<String> = Cache::with_config(config);
    let counters = OpCounters::default();

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("   {spinner:.green} {elapsed} {msg}")?);

    thread::scope(|scope| {
        for _ in 0..threads {
            scope.spawn(|| churn(&cache, &counters, keys, deadline));
        }

        while Instant::now() < deadline {
            let stats = cache.stats();
            pb.set_message(format!(
                "{} ops, {} entries ({} expired), {} swept",
                counters.total(),
                stats.total_entries,
                stats.expired_entries,
                stats.swept_entries,
            ));
            pb.tick();
            thread::sleep(Duration::from_millis(100));
        }
    });
    pb.finish_and_clear();

    cache.stop();
    let stats = cache.stats();
    info!(ops = counters.total(), sweeps = stats.sweeps, "Soak finished");

    println!("\n{}", "📈 Results:".green().bold());
    println!("   {} {}", "Hits:".dimmed(), counters.hits.load(Ordering::Relaxed));
    println!("   {} {}", "Misses (computed):".dimmed(), counters.misses.load(Ordering::Relaxed));
    println!("   {} {}", "Sets:".dimmed(), counters.sets.load(Ordering::Relaxed));
    println!("   {} {}", "Peeks:".dimmed(), counters.peeks.load(Ordering::Relaxed));
    println!("   {} {}", "Deletes:".dimmed(), counters.deletes.load(Ordering::Relaxed));
    println!("\n{}", "🧹 Cache:".yellow().bold());
    println!("{}", serde_json::to_string_pretty(&stats)?);

    if stats.total_entries > keys {
        println!("   {} store grew past the key space", "❌".red());
    } else {
        println!("   {} store bounded by key space ({} ≤ {})", "✅".green(), stats.total_entries, keys);
    }

    Ok(())
}

#[derive(Default)]
struct OpCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    peeks: AtomicU64,
    deletes: AtomicU64,
}

impl OpCounters {
    fn total(&self) -> u64 {
        [&self.hits, &self.misses, &self.sets, &self.peeks, &self.deletes]
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .sum()
    }
}

fn churn(cache: &Cache<String>, counters: &OpCounters, keys: usize, deadline: Instant) {
    let mut rng = rand::thread_rng();

    while Instant::now() < deadline {
        let key = format!("key-{}", rng.gen_range(0..keys));
        match rng.gen_range(0..10) {
            0..=4 => {
                let mut computed = false;
                cache.get_with(
                    &key,
                    || {
                        computed = true;
                        format!("value-of-{}", key)
                    },
                    false,
                );
                let counter = if computed { &counters.misses } else { &counters.hits };
                counter.fetch_add(1, Ordering::Relaxed);
            }
            5..=6 => {
                cache.set(key, "overwritten".to_string());
                counters.sets.fetch_add(1, Ordering::Relaxed);
            }
            7..=8 => {
                cache.peek(&key);
                counters.peeks.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                cache.delete(&key);
                counters.deletes.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
