//! Rendering: Vulkan primitives, the frame orchestrator and the two strategies

pub mod frame;
pub mod gpu_scene;
pub mod overlay;
pub mod raster;
pub mod raytracing;
pub mod uniforms;
pub mod vulkan;

use thiserror::Error;

pub use frame::{FrameBackend, FrameInputs, FrameOrchestrator, FrameOutcome, FrameTarget, LifecycleState, RenderStrategy};
pub use gpu_scene::GpuScene;
pub use overlay::{NullOverlay, UiOverlay};
pub use raster::RasterStrategy;
pub use raytracing::{AccelerationBuildError, RayTracingStrategy};
pub use uniforms::{LightUniform, MaterialUniform, NodeUniform, SceneUniforms};
pub use vulkan::{VulkanError, VulkanResult};

/// Errors raised by the frame loop and the strategies
#[derive(Error, Debug)]
pub enum RenderError {
    /// A Vulkan call failed
    #[error(transparent)]
    Vulkan(#[from] VulkanError),

    /// Building the scene's acceleration structures failed
    #[error(transparent)]
    Acceleration(#[from] AccelerationBuildError),

    /// An operation was attempted in the wrong lifecycle state
    #[error("cannot {operation} while {state:?}")]
    InvalidState {
        /// What was attempted
        operation: &'static str,
        /// State the orchestrator was in
        state: LifecycleState,
    },
}

/// Result type for frame-level operations
pub type RenderResult<T> = Result<T, RenderError>;
