//! Rendering strategy capability plugged into the frame orchestrator

use ash::vk;

use crate::render::RenderResult;
use crate::scene::{Camera, Light, Scene};

/// Command buffer and image the current frame records into
#[derive(Debug, Clone, Copy)]
pub struct FrameTarget {
    /// Primary command buffer, already in the recording state
    pub command_buffer: vk::CommandBuffer,
    /// Frame-in-flight slot; selects per-slot uniform buffers and sets
    pub frame_slot: usize,
    /// Acquired swapchain image index
    pub image_index: u32,
    /// Acquired swapchain image, in `UNDEFINED` layout at frame start
    pub swapchain_image: vk::Image,
    /// Swapchain extent
    pub extent: vk::Extent2D,
}

/// Per-frame state the uniforms are computed from
#[derive(Debug, Clone, Copy)]
pub struct FrameInputs<'a> {
    /// Active camera
    pub camera: &'a Camera,
    /// Scene lights; only the first [`MAX_LIGHTS`](crate::scene::MAX_LIGHTS) are used
    pub lights: &'a [Light],
    /// Width over height of the swapchain
    pub aspect: f32,
    /// Monotonic frame counter
    pub frame: u32,
}

/// What a renderer variant contributes to a frame
///
/// `G` is the GPU context the backend hands out. Commands recorded in
/// [`record_scene_commands`](Self::record_scene_commands) run before the
/// frame render pass begins; [`record_pass_commands`](Self::record_pass_commands)
/// runs inside it, before the UI overlay.
pub trait RenderStrategy<G> {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// How the frame render pass treats existing color contents
    ///
    /// Strategies that write the swapchain image before the pass return `LOAD`.
    fn color_load_op(&self) -> vk::AttachmentLoadOp;

    /// Create pipelines and per-slot resources, then upload `scene`
    fn on_prepare(&mut self, gpu: &G, scene: &Scene) -> RenderResult<()>;

    /// Recreate resources sized to the swapchain after it was rebuilt
    fn on_surface_recreated(&mut self, _gpu: &G) -> RenderResult<()> {
        Ok(())
    }

    /// Rebuild every scene-derived resource
    ///
    /// On error the previous scene resources stay in use.
    fn on_scene_changed(&mut self, gpu: &G, scene: &Scene) -> RenderResult<()>;

    /// Write this slot's uniform buffers
    fn update_uniforms(&mut self, gpu: &G, frame_slot: usize, inputs: &FrameInputs<'_>) -> RenderResult<()>;

    /// Record commands that run before the render pass
    fn record_scene_commands(&mut self, gpu: &G, target: &FrameTarget) -> RenderResult<()>;

    /// Record draws inside the render pass
    fn record_pass_commands(&mut self, _gpu: &G, _target: &FrameTarget) -> RenderResult<()> {
        Ok(())
    }

    /// Release every GPU resource; the device is idle
    fn on_cleanup(&mut self, gpu: &G);
}
