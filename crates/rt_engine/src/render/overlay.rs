//! Immediate-mode UI overlay seam
//!
//! The overlay draws inside the orchestrator's render pass after the scene,
//! so with ray tracing it lands on top of the copied output image.

use ash::vk;

use super::RenderResult;

/// UI drawn on top of each frame
pub trait UiOverlay {
    /// Advance UI state
    fn update_ui(&mut self, delta_time: f32);

    /// Rebuild vertex and index data for this frame's draw
    fn update_buffers(&mut self) -> RenderResult<()>;

    /// Record draws into the currently open render pass
    fn draw_frame(&mut self, command_buffer: vk::CommandBuffer);
}

/// Overlay that draws nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOverlay;

impl UiOverlay for NullOverlay {
    fn update_ui(&mut self, _delta_time: f32) {}

    fn update_buffers(&mut self) -> RenderResult<()> {
        Ok(())
    }

    fn draw_frame(&mut self, _command_buffer: vk::CommandBuffer) {}
}
