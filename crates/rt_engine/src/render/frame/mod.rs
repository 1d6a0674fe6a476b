//! Frame lifecycle: the orchestrator, its GPU backend and the strategy seam

mod backend;
mod orchestrator;
mod strategy;

pub use backend::{FrameBackend, GpuContext, SwapchainFrameBackend};
pub use orchestrator::{FrameOrchestrator, FrameOutcome, LifecycleState};
pub use strategy::{FrameInputs, FrameTarget, RenderStrategy};
