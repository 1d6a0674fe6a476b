//! Framebuffers and the shared depth/stencil target

use std::sync::Arc;

use ash::vk;

use super::device::Device;
use super::texture::Image;
use super::{VulkanError, VulkanResult};

/// Aspect flags for a depth format, adding stencil when the format carries one
pub fn depth_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D16_UNORM_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::DEPTH,
    }
}

/// Framebuffer wrapper with RAII cleanup
pub struct Framebuffer {
    device: Arc<Device>,
    handle: vk::Framebuffer,
}

impl Framebuffer {
    /// Create a framebuffer over `attachments` for `render_pass`
    pub fn new(
        device: Arc<Device>,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let handle = unsafe {
            device
                .raw()
                .create_framebuffer(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        Ok(Self { device, handle })
    }

    /// Framebuffer handle
    pub fn handle(&self) -> vk::Framebuffer {
        self.handle
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_framebuffer(self.handle, None) };
    }
}

/// Depth/stencil attachment shared by every swapchain framebuffer
pub struct DepthBuffer {
    image: Image,
}

impl DepthBuffer {
    /// Create a depth buffer in the device's preferred depth format
    pub fn new(device: &Arc<Device>, extent: vk::Extent2D) -> VulkanResult<Self> {
        let format = device.physical().depth_format;
        let image = Image::new(
            Arc::clone(device),
            extent,
            format,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            depth_aspect(format),
        )?;
        log::debug!("Created {}x{} depth buffer ({format:?})", extent.width, extent.height);
        Ok(Self { image })
    }

    /// View bound as the framebuffer's depth attachment
    pub fn image_view(&self) -> vk::ImageView {
        self.image.view()
    }
}

/// Build one framebuffer per swapchain view, each sharing `depth`
pub fn create_framebuffers(
    device: &Arc<Device>,
    render_pass: vk::RenderPass,
    color_views: &[vk::ImageView],
    depth: &DepthBuffer,
    extent: vk::Extent2D,
) -> VulkanResult<Vec<Framebuffer>> {
    color_views
        .iter()
        .map(|&view| Framebuffer::new(Arc::clone(device), render_pass, &[view, depth.image_view()], extent))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stencil_formats_include_stencil_aspect() {
        assert!(depth_aspect(vk::Format::D24_UNORM_S8_UINT).contains(vk::ImageAspectFlags::STENCIL));
        assert_eq!(depth_aspect(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
    }
}
