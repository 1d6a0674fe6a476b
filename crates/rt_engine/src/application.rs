//! Hooks a program plugs into the engine loop

use thiserror::Error;

use crate::engine::{Engine, EngineError};
use crate::input::InputEvent;

/// Callbacks the engine invokes around each frame
///
/// The viewer binary is the reference implementation.
pub trait Application {
    /// Set up program state
    ///
    /// Called once after the engine is up and before the renderer is
    /// prepared. Models loaded here are part of the first frame.
    fn initialize(&mut self, engine: &mut Engine) -> Result<(), AppError>;

    /// Per-frame logic, run after events are handled and before the frame
    /// is rendered. `delta_time` is in seconds.
    fn update(&mut self, engine: &mut Engine, delta_time: f32) -> Result<(), AppError>;

    /// Handle an input event
    ///
    /// The engine has already applied its own reaction (quit, resize,
    /// camera controls) when this is called.
    fn handle_event(&mut self, _engine: &mut Engine, _event: &InputEvent) -> Result<(), AppError> {
        Ok(())
    }

    /// Called once when the main loop ends, before the renderer is torn down
    fn cleanup(&mut self, engine: &mut Engine);
}

/// Errors returned from [`Application`] callbacks
#[derive(Error, Debug)]
pub enum AppError {
    /// The engine refused an operation
    #[error("engine: {0}")]
    Engine(#[from] EngineError),

    /// Program-specific failure
    #[error("{0}")]
    Custom(String),
}
