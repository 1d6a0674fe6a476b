//! Render pass management
//!
//! One subpass with a color and a depth attachment. The color attachment
//! either clears (raster path) or loads the image the ray tracer already
//! copied in, so the overlay draws on top of it.

use std::sync::Arc;

use ash::vk;

use super::device::Device;
use super::{VulkanError, VulkanResult};

/// Initial layout the color attachment is expected in for a load op
pub fn color_initial_layout(load_op: vk::AttachmentLoadOp) -> vk::ImageLayout {
    if load_op == vk::AttachmentLoadOp::LOAD {
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
    } else {
        vk::ImageLayout::UNDEFINED
    }
}

/// Render pass wrapper with RAII cleanup
pub struct RenderPass {
    device: Arc<Device>,
    handle: vk::RenderPass,
    color_load_op: vk::AttachmentLoadOp,
}

impl RenderPass {
    /// Create the forward pass ending with the color image ready for presentation
    pub fn new(
        device: Arc<Device>,
        color_format: vk::Format,
        depth_format: vk::Format,
        color_load_op: vk::AttachmentLoadOp,
    ) -> VulkanResult<Self> {
        let color_attachment = vk::AttachmentDescription::builder()
            .format(color_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(color_load_op)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(color_initial_layout(color_load_op))
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .build();

        let depth_attachment = vk::AttachmentDescription::builder()
            .format(depth_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .stencil_load_op(vk::AttachmentLoadOp::CLEAR)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .build();

        let attachments = [color_attachment, depth_attachment];

        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };

        let subpasses = [vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)
            .depth_stencil_attachment(&depth_ref)
            .build()];

        // The ray traced copy writes the image in the transfer stage before the pass starts
        let dependencies = [vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                    | vk::PipelineStageFlags::TRANSFER,
            )
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS)
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_READ
                    | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            )
            .build()];

        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let handle = unsafe {
            device
                .raw()
                .create_render_pass(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        log::debug!("Created render pass ({color_format:?}, depth {depth_format:?}, {color_load_op:?})");

        Ok(Self {
            device,
            handle,
            color_load_op,
        })
    }

    /// Render pass handle
    pub fn handle(&self) -> vk::RenderPass {
        self.handle
    }

    /// Whether the color attachment is cleared at the start of the pass
    pub fn clears_color(&self) -> bool {
        self.color_load_op == vk::AttachmentLoadOp::CLEAR
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_render_pass(self.handle, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loaded_color_expects_attachment_layout() {
        assert_eq!(
            color_initial_layout(vk::AttachmentLoadOp::LOAD),
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
        assert_eq!(color_initial_layout(vk::AttachmentLoadOp::CLEAR), vk::ImageLayout::UNDEFINED);
    }
}
