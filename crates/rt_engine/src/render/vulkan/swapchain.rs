//! Swapchain negotiation, image acquisition and presentation
//!
//! Out-of-date and suboptimal results are not errors here: they come back
//! as [`AcquireOutcome`] / [`PresentOutcome`] values so the frame loop can
//! recreate the swapchain and retry.

use std::sync::Arc;

use ash::vk;

use super::device::Device;
use super::surface::{Surface, SurfaceSupport};
use super::{VulkanError, VulkanResult};

/// Format used when the surface leaves the choice to the application
pub const DEFAULT_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Pick the surface format: BGRA8 when offered, else the first one reported
///
/// A single `UNDEFINED` entry means any format is acceptable.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> VulkanResult<vk::SurfaceFormatKHR> {
    match formats {
        [] => Err(VulkanError::InitializationFailed("Surface reports no formats".to_string())),
        [only] if only.format == vk::Format::UNDEFINED => Ok(DEFAULT_SURFACE_FORMAT),
        _ => Ok(formats
            .iter()
            .copied()
            .find(|f| f.format == DEFAULT_SURFACE_FORMAT.format)
            .unwrap_or(formats[0])),
    }
}

/// Pick mailbox when preferred and offered, otherwise FIFO
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], prefer_low_latency: bool) -> vk::PresentModeKHR {
    if prefer_low_latency && modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Three images for mailbox, two otherwise, clamped to the surface limits
pub fn choose_image_count(present_mode: vk::PresentModeKHR, capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = if present_mode == vk::PresentModeKHR::MAILBOX { 3 } else { 2 };
    let count = desired.max(capabilities.min_image_count);
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

/// Use the surface's current extent, or clamp the window size when the surface lets us choose
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, window: vk::Extent2D) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    vk::Extent2D {
        width: window
            .width
            .clamp(capabilities.min_image_extent.width, capabilities.max_image_extent.width),
        height: window
            .height
            .clamp(capabilities.min_image_extent.height, capabilities.max_image_extent.height),
    }
}

/// Result of asking for the next image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image is ready; `suboptimal` asks for recreation after this frame
    Acquired {
        /// Swapchain image index
        index: u32,
        /// The swapchain no longer matches the surface exactly
        suboptimal: bool,
    },
    /// The swapchain must be recreated before rendering
    OutOfDate,
}

/// Result of a present request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// Presented normally
    Presented,
    /// Presented, but the swapchain should be recreated
    Suboptimal,
    /// Not presented; the swapchain must be recreated
    OutOfDate,
}

impl PresentOutcome {
    /// Whether the swapchain should be rebuilt
    pub const fn needs_recreation(self) -> bool {
        !matches!(self, Self::Presented)
    }
}

/// Map a raw acquire result onto [`AcquireOutcome`]
pub fn classify_acquire(result: Result<(u32, bool), vk::Result>) -> VulkanResult<AcquireOutcome> {
    match result {
        Ok((index, suboptimal)) => Ok(AcquireOutcome::Acquired { index, suboptimal }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
        Err(error) => Err(VulkanError::from(error)),
    }
}

/// Map a raw present result onto [`PresentOutcome`]
pub fn classify_present(result: VulkanResult<bool>) -> VulkanResult<PresentOutcome> {
    match result {
        Ok(false) => Ok(PresentOutcome::Presented),
        Ok(true) | Err(VulkanError::Api(vk::Result::SUBOPTIMAL_KHR)) => Ok(PresentOutcome::Suboptimal),
        Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_DATE_KHR)) => Ok(PresentOutcome::OutOfDate),
        Err(error) => Err(error),
    }
}

/// Swapchain management wrapper with RAII cleanup
pub struct Swapchain {
    device: Arc<Device>,
    handle: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
}

impl Swapchain {
    /// Create a swapchain, retiring `old` if given
    pub fn new(
        device: Arc<Device>,
        surface: &Surface,
        window_extent: vk::Extent2D,
        prefer_low_latency: bool,
        old: Option<&Self>,
    ) -> VulkanResult<Self> {
        let SurfaceSupport {
            capabilities,
            formats,
            present_modes,
        } = surface.support(device.physical().handle)?;

        let required_usage = vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST;
        if !capabilities.supported_usage_flags.contains(required_usage) {
            return Err(VulkanError::InitializationFailed(
                "Swapchain images cannot be copy destinations on this surface".to_string(),
            ));
        }

        let format = choose_surface_format(&formats)?;
        let present_mode = choose_present_mode(&present_modes, prefer_low_latency);
        let image_count = choose_image_count(present_mode, &capabilities);
        let extent = choose_extent(&capabilities, window_extent);

        let families = device.physical().families;
        let family_indices = [families.graphics, families.present];
        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.handle())
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(required_usage)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old.map_or_else(vk::SwapchainKHR::null, |old| old.handle));
        create_info = if families.graphics == families.present {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&family_indices)
        };

        let loader = device.swapchain_loader();
        let handle = unsafe { loader.create_swapchain(&create_info, None).map_err(VulkanError::Api)? };
        let images = match unsafe { loader.get_swapchain_images(handle) } {
            Ok(images) => images,
            Err(error) => {
                unsafe { loader.destroy_swapchain(handle, None) };
                return Err(VulkanError::Api(error));
            }
        };

        let mut swapchain = Self {
            device,
            handle,
            images,
            image_views: Vec::new(),
            format,
            extent,
            present_mode,
        };
        swapchain.create_image_views()?;

        log::info!(
            "Created swapchain: {} images, {}x{}, {:?}, {:?}",
            swapchain.images.len(),
            extent.width,
            extent.height,
            format.format,
            present_mode
        );
        Ok(swapchain)
    }

    fn create_image_views(&mut self) -> VulkanResult<()> {
        for &image in &self.images {
            let create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.format.format)
                .components(vk::ComponentMapping::default())
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            let view = unsafe {
                self.device
                    .raw()
                    .create_image_view(&create_info, None)
                    .map_err(VulkanError::Api)?
            };
            self.image_views.push(view);
        }
        Ok(())
    }

    /// Wait for the next presentable image, signalling `signal` when it is ready
    pub fn acquire_next_image(&self, timeout_ns: u64, signal: vk::Semaphore) -> VulkanResult<AcquireOutcome> {
        let result = unsafe {
            self.device
                .swapchain_loader()
                .acquire_next_image(self.handle, timeout_ns, signal, vk::Fence::null())
        };
        classify_acquire(result)
    }

    /// Queue `image_index` for presentation once `wait` is signalled
    pub fn present(&self, queue: vk::Queue, image_index: u32, wait: vk::Semaphore) -> VulkanResult<PresentOutcome> {
        let wait_semaphores = [wait];
        let swapchains = [self.handle];
        let indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&indices);
        classify_present(self.device.queue_present(queue, &present_info))
    }

    /// Swapchain handle
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    /// Presentable images, owned by the swapchain
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    /// One color view per image
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    /// Negotiated format and color space
    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    /// Image size in pixels
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Negotiated presentation mode
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.raw().destroy_image_view(view, None);
            }
            self.device.swapchain_loader().destroy_swapchain(self.handle, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    fn capabilities(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_bgra_is_preferred() {
        let formats = [format(vk::Format::R8G8B8A8_UNORM), format(vk::Format::B8G8R8A8_UNORM)];
        assert_eq!(choose_surface_format(&formats).unwrap().format, vk::Format::B8G8R8A8_UNORM);
    }

    #[test]
    fn test_first_format_when_bgra_missing() {
        let formats = [format(vk::Format::R8G8B8A8_SRGB), format(vk::Format::R16G16B16A16_SFLOAT)];
        assert_eq!(choose_surface_format(&formats).unwrap().format, vk::Format::R8G8B8A8_SRGB);
    }

    #[test]
    fn test_undefined_sentinel_yields_default() {
        let formats = [format(vk::Format::UNDEFINED)];
        assert_eq!(choose_surface_format(&formats).unwrap(), DEFAULT_SURFACE_FORMAT);
    }

    #[test]
    fn test_no_formats_is_an_error() {
        assert!(choose_surface_format(&[]).is_err());
    }

    #[test]
    fn test_mailbox_preferred_when_available() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&modes, true), vk::PresentModeKHR::MAILBOX);
        assert_eq!(choose_present_mode(&modes, false), vk::PresentModeKHR::FIFO);
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO], true),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_image_count_follows_mode_and_clamps() {
        assert_eq!(choose_image_count(vk::PresentModeKHR::MAILBOX, &capabilities(2, 0)), 3);
        assert_eq!(choose_image_count(vk::PresentModeKHR::FIFO, &capabilities(2, 8)), 2);
        assert_eq!(choose_image_count(vk::PresentModeKHR::MAILBOX, &capabilities(1, 2)), 2);
        assert_eq!(choose_image_count(vk::PresentModeKHR::FIFO, &capabilities(3, 8)), 3);
    }

    #[test]
    fn test_extent_uses_current_or_clamps_window() {
        let mut caps = capabilities(2, 0);
        let window = vk::Extent2D {
            width: 5000,
            height: 600,
        };
        assert_eq!(
            choose_extent(&caps, window),
            vk::Extent2D {
                width: 4096,
                height: 600
            }
        );

        caps.current_extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        assert_eq!(choose_extent(&caps, window), caps.current_extent);
    }

    #[test]
    fn test_acquire_classification() {
        assert_eq!(
            classify_acquire(Ok((2, false))).unwrap(),
            AcquireOutcome::Acquired {
                index: 2,
                suboptimal: false
            }
        );
        assert_eq!(
            classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            AcquireOutcome::OutOfDate
        );
        assert_eq!(
            classify_acquire(Err(vk::Result::ERROR_DEVICE_LOST)),
            Err(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST))
        );
    }

    #[test]
    fn test_present_classification() {
        assert_eq!(classify_present(Ok(false)).unwrap(), PresentOutcome::Presented);
        assert_eq!(classify_present(Ok(true)).unwrap(), PresentOutcome::Suboptimal);
        assert_eq!(
            classify_present(Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_DATE_KHR))).unwrap(),
            PresentOutcome::OutOfDate
        );
        assert!(PresentOutcome::OutOfDate.needs_recreation());
        assert!(!PresentOutcome::Presented.needs_recreation());
    }
}
