//! Time sources consumed by the frame pacer.
//!
//! The pacer never talks to an OS timer directly. It only needs to know
//! whether a clock is running, how many milliseconds have elapsed since the
//! last restart, and how to restart it.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

/// Minimal stopwatch capability used for frame pacing
pub trait Clock {
    /// Returns true once the clock has been started
    fn is_running(&self) -> bool;

    /// Milliseconds elapsed since the last restart, or 0 if never started
    fn elapsed_ms(&self) -> f64;

    /// (Re)starts the clock from zero
    fn restart(&mut self);
}

/// Monotonic clock backed by `std::time::Instant`
///
/// A fresh stopwatch is stopped; the first `restart` starts it.
#[derive(Debug, Default, Clone)]
pub struct Stopwatch {
    started_at: Option<Instant>,
}

impl Stopwatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&mut self) {
        self.started_at = None;
    }
}

impl Clock for Stopwatch {
    fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    fn elapsed_ms(&self) -> f64 {
        self.started_at
            .map(|start| start.elapsed().as_secs_f64() * 1000.0)
            .unwrap_or(0.0)
    }

    fn restart(&mut self) {
        self.started_at = Some(Instant::now());
    }
}

#[derive(Debug, Default)]
struct ManualState {
    running: bool,
    elapsed_ms: f64,
    restarts: u32,
}

/// Clock whose reading only changes when told to
///
/// Clones share the same reading, so a handle kept outside a pacer can step
/// time forward while the pacer owns its own copy. Useful for deterministic
/// replays and for tests.
#[derive(Debug, Default, Clone)]
pub struct ManualClock {
    state: Arc<Mutex<ManualState>>,
}

impl ManualClock {
    /// Creates a stopped clock reading 0 ms
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a clock that is already running at the given reading
    pub fn running_at(elapsed_ms: f64) -> Self {
        let clock = Self::default();
        {
            let mut state = clock.lock();
            state.running = true;
            state.elapsed_ms = elapsed_ms;
        }
        clock
    }

    pub fn set_elapsed_ms(&self, elapsed_ms: f64) {
        self.lock().elapsed_ms = elapsed_ms;
    }

    pub fn advance_ms(&self, ms: f64) {
        self.lock().elapsed_ms += ms;
    }

    /// Number of times `restart` has been called on any clone
    pub fn restart_count(&self) -> u32 {
        self.lock().restarts
    }

    fn lock(&self) -> MutexGuard<'_, ManualState> {
        // The state is plain data, a poisoned lock still holds a usable value
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Clock for ManualClock {
    fn is_running(&self) -> bool {
        self.lock().running
    }

    fn elapsed_ms(&self) -> f64 {
        self.lock().elapsed_ms
    }

    fn restart(&mut self) {
        let mut state = self.lock();
        state.running = true;
        state.elapsed_ms = 0.0;
        state.restarts += 1;
    }
}
