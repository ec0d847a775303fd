//! Top-level run loop
//!
//! `GameLoop` owns the lifecycle of a game or server host. Pacing is
//! delegated to a [`FramePacer`]; per-frame work is delegated to the update
//! and render callbacks passed to [`GameLoop::run`].

use crate::clock::Clock;
use crate::error::EngineError;
use crate::pacer::{FramePacer, FrameTiming};
use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How many accepted frames pass between two performance log lines
const STATS_LOG_INTERVAL: u64 = 600;

/// Lifecycle of a game loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Created,
    Initialized,
    Running,
    Stopped,
    Disposed,
}

/// Cloneable handle that asks a running loop to stop
///
/// The loop finishes the iteration in flight before it observes the request.
#[derive(Debug, Clone)]
pub struct ExitHandle {
    running: Arc<AtomicBool>,
}

impl ExitHandle {
    pub fn exit(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

type Initializer = Box<dyn FnMut() -> Result<(), EngineError> + Send>;
type DisposeHook = Box<dyn FnOnce() + Send>;

/// Fixed-rate game loop driver
pub struct GameLoop {
    state: LoopState,
    running: Arc<AtomicBool>,
    idle_sleep: Duration,
    initializer: Option<Initializer>,
    dispose_hooks: Vec<DisposeHook>,
}

impl GameLoop {
    pub fn new() -> Self {
        Self {
            state: LoopState::Created,
            running: Arc::new(AtomicBool::new(false)),
            idle_sleep: Duration::from_millis(1),
            initializer: None,
            dispose_hooks: Vec::new(),
        }
    }

    /// Sets how long the loop sleeps when no frame is due
    pub fn with_idle_sleep(mut self, idle_sleep: Duration) -> Self {
        self.idle_sleep = idle_sleep;
        self
    }

    /// Registers a hook that runs once at the start of every `run`
    pub fn with_initializer<F>(mut self, initializer: F) -> Self
    where
        F: FnMut() -> Result<(), EngineError> + Send + 'static,
    {
        self.initializer = Some(Box::new(initializer));
        self
    }

    /// Registers a resource release hook, run exactly once by `dispose`
    pub fn on_dispose<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.dispose_hooks.push(Box::new(hook));
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.state == LoopState::Disposed
    }

    pub fn exit_handle(&self) -> ExitHandle {
        ExitHandle {
            running: Arc::clone(&self.running),
        }
    }

    /// Requests the loop to stop after the current iteration
    pub fn exit(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Runs the loop on the calling thread until `exit` is requested
    ///
    /// Every accepted frame calls `on_update` and then `on_render`, both with
    /// the same timing snapshot. When no frame is due the thread sleeps for
    /// the idle duration instead.
    pub fn run<C, U, R>(
        &mut self,
        mut pacer: FramePacer<C>,
        mut on_update: U,
        mut on_render: R,
    ) -> Result<(), EngineError>
    where
        C: Clock,
        U: FnMut(&FrameTiming),
        R: FnMut(&FrameTiming),
    {
        if self.is_disposed() {
            return Err(EngineError::Disposed);
        }

        self.initialize()?;

        self.running.store(true, Ordering::SeqCst);
        self.state = LoopState::Running;
        info!(
            "Game loop running at {:.1} frames per second cap",
            pacer.frame_cap()
        );

        while self.running.load(Ordering::SeqCst) {
            if !pacer.try_advance() {
                std::thread::sleep(self.idle_sleep);
                continue;
            }

            let timing = pacer.timing();
            on_update(&timing);
            on_render(&timing);

            if timing.frame % STATS_LOG_INTERVAL == 0 {
                debug!(
                    "Frame {}: {} fps, {:.2}ms delta",
                    timing.frame, timing.fps, timing.delta_ms
                );
            }
        }

        self.state = LoopState::Stopped;
        info!("Game loop stopped after {} frames", pacer.frame_count());
        Ok(())
    }

    /// Releases resources held by the loop
    ///
    /// Safe to call any number of times; hooks run only on the first call.
    pub fn dispose(&mut self) {
        if self.is_disposed() {
            return;
        }

        self.running.store(false, Ordering::SeqCst);
        for hook in self.dispose_hooks.drain(..) {
            hook();
        }
        self.initializer = None;
        self.state = LoopState::Disposed;
        debug!("Game loop disposed");
    }

    fn initialize(&mut self) -> Result<(), EngineError> {
        if let Some(initializer) = self.initializer.as_mut() {
            initializer()?;
        }
        self.state = LoopState::Initialized;
        debug!("Game loop initialized");
        Ok(())
    }
}

impl Default for GameLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for GameLoop {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;

    /// Pacer whose clock only moves when the render callback advances it
    fn stepped_pacer(frame_cap: f64) -> (FramePacer<ManualClock>, ManualClock) {
        let clock = ManualClock::running_at(1000.0 / frame_cap);
        let pacer = FramePacer::with_clock(frame_cap, clock.clone()).unwrap();
        (pacer, clock)
    }

    #[test]
    fn test_new_loop_state() {
        let game_loop = GameLoop::new();
        assert_eq!(game_loop.state(), LoopState::Created);
        assert!(!game_loop.is_running());
        assert!(!game_loop.is_disposed());
    }

    #[test]
    fn test_update_then_render_every_frame() {
        let (pacer, clock) = stepped_pacer(10.0);
        let mut game_loop = GameLoop::new().with_idle_sleep(Duration::ZERO);
        let exit = game_loop.exit_handle();
        let calls = Mutex::new(Vec::new());

        game_loop
            .run(
                pacer,
                |timing| {
                    calls.lock().unwrap().push(format!("update {}", timing.frame));
                    if timing.frame == 3 {
                        exit.exit();
                    }
                },
                |timing| {
                    calls.lock().unwrap().push(format!("render {}", timing.frame));
                    clock.advance_ms(100.0);
                },
            )
            .unwrap();

        assert_eq!(
            calls.into_inner().unwrap(),
            vec![
                "update 1", "render 1", "update 2", "render 2", "update 3", "render 3"
            ]
        );
        assert_eq!(game_loop.state(), LoopState::Stopped);
        assert!(!game_loop.is_running());
    }

    #[test]
    fn test_exit_completes_current_iteration() {
        let (pacer, clock) = stepped_pacer(10.0);
        let mut game_loop = GameLoop::new().with_idle_sleep(Duration::ZERO);
        let exit = game_loop.exit_handle();
        let renders = AtomicU32::new(0);

        game_loop
            .run(
                pacer,
                |_| exit.exit(),
                |_| {
                    renders.fetch_add(1, Ordering::SeqCst);
                    clock.advance_ms(100.0);
                },
            )
            .unwrap();

        // Exit during update still lets render run for that frame
        assert_eq!(renders.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_no_callbacks_while_frame_not_due() {
        let clock = ManualClock::running_at(0.0);
        let pacer = FramePacer::with_clock(10.0, clock).unwrap();
        let mut game_loop = GameLoop::new();
        let exit = game_loop.exit_handle();

        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            exit.exit();
        });

        let mut updates = 0;
        let mut renders = 0;
        game_loop
            .run(pacer, |_| updates += 1, |_| renders += 1)
            .unwrap();
        stopper.join().unwrap();

        assert_eq!(updates, 0);
        assert_eq!(renders, 0);
    }

    #[test]
    fn test_initializer_runs_once_per_run() {
        let inits = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&inits);
        let mut game_loop = GameLoop::new()
            .with_idle_sleep(Duration::ZERO)
            .with_initializer(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        let exit = game_loop.exit_handle();

        let (pacer, _clock) = stepped_pacer(30.0);
        game_loop.run(pacer, |_| exit.exit(), |_| {}).unwrap();

        assert_eq!(inits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_initializer_error_aborts_run() {
        let mut game_loop = GameLoop::new().with_initializer(|| {
            Err(EngineError::Initialization("no display".to_string()))
        });
        let (pacer, _clock) = stepped_pacer(30.0);

        let mut updates = 0;
        let result = game_loop.run(pacer, |_| updates += 1, |_| {});

        assert!(matches!(result, Err(EngineError::Initialization(_))));
        assert_eq!(updates, 0);
        assert_eq!(game_loop.state(), LoopState::Created);
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let released = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&released);
        let mut game_loop = GameLoop::new().on_dispose(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        game_loop.dispose();
        game_loop.dispose();
        drop(game_loop);

        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_disposes() {
        let released = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&released);
        {
            let _game_loop = GameLoop::new().on_dispose(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_run_after_dispose_fails() {
        let mut game_loop = GameLoop::new();
        game_loop.dispose();

        let (pacer, _clock) = stepped_pacer(30.0);
        let result = game_loop.run(pacer, |_| {}, |_| {});

        assert!(matches!(result, Err(EngineError::Disposed)));
        assert_eq!(game_loop.state(), LoopState::Disposed);
    }
}
