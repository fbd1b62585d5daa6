//! Background sweeper lifecycle.
//!
//! Each running cache owns at most one sweeper thread. The thread parks on a
//! condvar for one interval, wakes, purges expired entries and parks again.
//! Stopping bumps a generation counter and wakes the thread; a sweeper whose
//! generation is outdated exits instead of sweeping, so a restart never ends
//! up with two live sweepers.

use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use crate::cache::Inner;
use crate::constants::SWEEPER_THREAD_NAME;

#[derive(Debug, Default)]
struct SweepState {
    running: bool,
    generation: u64,
}

/// Running flag and wake-up signal shared between a cache and its sweeper.
#[derive(Debug, Default)]
pub(crate) struct SweepControl {
    state: Mutex<SweepState>,
    wake: Condvar,
}

impl SweepControl {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Flips `stopped -> running`.
    ///
    /// Returns the generation the new sweeper must carry, or `None` if a
    /// sweeper is already running.
    fn begin(&self) -> Option<u64> {
        let mut state = self.state.lock();
        if state.running {
            return None;
        }
        state.running = true;
        state.generation += 1;
        Some(state.generation)
    }

    /// Flips `running -> stopped` and wakes the sweeper. Does not wait for it.
    ///
    /// Returns false if nothing was running.
    pub(crate) fn stop(&self) -> bool {
        let mut state = self.state.lock();
        if !state.running {
            return false;
        }
        state.running = false;
        state.generation += 1;
        self.wake.notify_all();
        true
    }

    /// Rolls back a `begin` whose thread never came up.
    fn abandon(&self, generation: u64) {
        let mut state = self.state.lock();
        if state.generation == generation {
            state.running = false;
        }
    }

    /// Parks for `interval`.
    ///
    /// Returns true when the full interval elapsed and `generation` is still
    /// current, false when the sweeper has been superseded or stopped.
    fn park(&self, generation: u64, interval: Duration) -> bool {
        let deadline = Instant::now().checked_add(interval);
        let mut state = self.state.lock();
        while state.generation == generation {
            match deadline {
                Some(deadline) => {
                    if self.wake.wait_until(&mut state, deadline).timed_out() {
                        return state.generation == generation;
                    }
                }
                // Interval too large to represent: park until stopped.
                None => self.wake.wait(&mut state),
            }
        }
        false
    }
}

/// Starts a sweeper for `inner` unless one is already running.
pub(crate) fn start<V>(inner: &Arc<Inner<V>>)
where
    V: Send + Sync + 'static,
{
    let interval = inner.sweep_interval;
    if interval.is_zero() {
        return;
    }

    let control = Arc::clone(&inner.sweeper);
    let Some(generation) = control.begin() else {
        return;
    };

    let store = Arc::downgrade(inner);
    let thread_control = Arc::clone(&control);
    let spawned = thread::Builder::new()
        .name(SWEEPER_THREAD_NAME.into())
        .spawn(move || run(store, thread_control, generation, interval));

    match spawned {
        Ok(_) => debug!(generation, ?interval, "Sweeper started"),
        Err(e) => {
            control.abandon(generation);
            error!(error = %e, "Failed to spawn sweeper thread");
        }
    }
}

fn run<V>(store: Weak<Inner<V>>, control: Arc<SweepControl>, generation: u64, interval: Duration)
where
    V: Send + Sync + 'static,
{
    while control.park(generation, interval) {
        // Strong reference for the duration of one pass only.
        let Some(inner) = store.upgrade() else {
            break;
        };
        inner.purge_expired();
    }

    debug!(generation, "Sweeper exited");
}
