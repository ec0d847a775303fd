use thiserror::Error;

/// Errors raised by the frame pacer and the game loop driver.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Frame caps must be finite and strictly positive, otherwise the wait
    /// time between frames is undefined.
    #[error("invalid frame cap {0}: must be finite and greater than zero")]
    InvalidFrameCap(f64),

    #[error("game loop has already been disposed")]
    Disposed,

    #[error("game loop initialization failed: {0}")]
    Initialization(String),
}
