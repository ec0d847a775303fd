//! Frame-rate limiting for the main loop
//!
//! The pacer decides whether enough time has passed since the last accepted
//! frame for the caller to advance again, and records delta time and FPS for
//! every accepted frame.

use crate::clock::{Clock, Stopwatch};
use crate::error::EngineError;

/// Timing information for one accepted frame
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameTiming {
    /// Milliseconds between this frame and the previous accepted one
    pub delta_ms: f64,
    /// Rounded frames per second derived from `delta_ms`
    pub fps: u32,
    /// Number of frames accepted so far, this one included
    pub frame: u64,
    /// Clock reading at which the frame was accepted
    pub elapsed_ms: f64,
}

impl FrameTiming {
    pub fn delta_secs(&self) -> f64 {
        self.delta_ms / 1000.0
    }
}

/// Gates how often a loop may advance a frame
#[derive(Debug)]
pub struct FramePacer<C: Clock = Stopwatch> {
    clock: C,
    frame_cap: f64,
    wait_time_ms: f64,
    last_frame_time_ms: f64,
    delta_ms: f64,
    fps: u32,
    frame_count: u64,
}

impl FramePacer<Stopwatch> {
    /// Creates a pacer driven by a monotonic stopwatch
    ///
    /// Fails when `frame_cap` is zero, negative, NaN or infinite.
    pub fn new(frame_cap: f64) -> Result<Self, EngineError> {
        Self::with_clock(frame_cap, Stopwatch::new())
    }
}

impl<C: Clock> FramePacer<C> {
    pub fn with_clock(frame_cap: f64, clock: C) -> Result<Self, EngineError> {
        if !frame_cap.is_finite() || frame_cap <= 0.0 {
            return Err(EngineError::InvalidFrameCap(frame_cap));
        }

        Ok(Self {
            clock,
            frame_cap,
            wait_time_ms: 1000.0 / frame_cap,
            last_frame_time_ms: 0.0,
            delta_ms: 0.0,
            fps: 0,
            frame_count: 0,
        })
    }

    /// Returns true when a new frame is due and records its timing
    ///
    /// The clock is started lazily on the first call. A frame is due once the
    /// clock reading reaches `last_frame + wait_time`, boundary included.
    pub fn try_advance(&mut self) -> bool {
        if !self.clock.is_running() {
            self.clock.restart();
        }

        let now = self.clock.elapsed_ms();
        if now < self.last_frame_time_ms + self.wait_time_ms {
            return false;
        }

        self.delta_ms = now - self.last_frame_time_ms;
        self.fps = (1000.0 / self.delta_ms).round() as u32;
        self.last_frame_time_ms = now;
        self.frame_count += 1;
        true
    }

    /// Delta of the most recently accepted frame in milliseconds
    pub fn delta_ms(&self) -> f64 {
        self.delta_ms
    }

    /// FPS of the most recently accepted frame
    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn frame_cap(&self) -> f64 {
        self.frame_cap
    }

    pub fn wait_time_ms(&self) -> f64 {
        self.wait_time_ms
    }

    /// Snapshot of the most recently accepted frame
    pub fn timing(&self) -> FrameTiming {
        FrameTiming {
            delta_ms: self.delta_ms,
            fps: self.fps,
            frame: self.frame_count,
            elapsed_ms: self.last_frame_time_ms,
        }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }
}
