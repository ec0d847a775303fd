//! # Shared timing library
//!
//! Frame pacing and the top-level run loop used by the server host and by
//! any game built on top of it.
//!
//! ## Module Organization
//!
//! ### Clock (`clock`)
//! The narrow stopwatch capability the pacer depends on, a monotonic
//! implementation and a manually stepped one for deterministic runs.
//!
//! ### Pacer (`pacer`)
//! Frame-rate limiter. Accepts a frame once `1000 / frame_cap` milliseconds
//! have passed since the previous accepted frame and records delta time and
//! FPS for it.
//!
//! ### Game Loop (`game_loop`)
//! Lifecycle owner: initialize, then update and render on every accepted
//! frame until exit is requested, then dispose.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use shared::{FramePacer, GameLoop};
//!
//! fn main() -> Result<(), shared::EngineError> {
//!     let mut game_loop = GameLoop::new();
//!     let exit = game_loop.exit_handle();
//!
//!     game_loop.run(
//!         FramePacer::new(60.0)?,
//!         |timing| {
//!             if timing.frame == 600 {
//!                 exit.exit();
//!             }
//!         },
//!         |_timing| {},
//!     )?;
//!
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod error;
pub mod game_loop;
pub mod pacer;

pub use clock::{Clock, ManualClock, Stopwatch};
pub use error::EngineError;
pub use game_loop::{ExitHandle, GameLoop, LoopState};
pub use pacer::{FramePacer, FrameTiming};
