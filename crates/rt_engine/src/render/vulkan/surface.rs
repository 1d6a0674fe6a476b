//! Window surface

use std::sync::Arc;

use ash::vk;

use super::instance::VulkanInstance;
use super::{VulkanError, VulkanResult};

/// Presentation surface with RAII cleanup
pub struct Surface {
    handle: vk::SurfaceKHR,
    instance: Arc<VulkanInstance>,
}

/// Surface properties queried for one physical device
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    /// Image count and extent limits
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Reported format/color space pairs
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Reported presentation modes
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl Surface {
    /// Take ownership of a surface created by the window system
    pub fn from_raw(instance: Arc<VulkanInstance>, handle: vk::SurfaceKHR) -> Self {
        Self { handle, instance }
    }

    /// Surface handle
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Whether a queue family of `device` can present to this surface
    pub fn supports_family(&self, device: vk::PhysicalDevice, family: u32) -> VulkanResult<bool> {
        unsafe {
            self.instance
                .surface_loader()
                .get_physical_device_surface_support(device, family, self.handle)
                .map_err(VulkanError::Api)
        }
    }

    /// Query capabilities, formats and present modes
    pub fn support(&self, device: vk::PhysicalDevice) -> VulkanResult<SurfaceSupport> {
        let loader = self.instance.surface_loader();
        unsafe {
            Ok(SurfaceSupport {
                capabilities: loader
                    .get_physical_device_surface_capabilities(device, self.handle)
                    .map_err(VulkanError::Api)?,
                formats: loader
                    .get_physical_device_surface_formats(device, self.handle)
                    .map_err(VulkanError::Api)?,
                present_modes: loader
                    .get_physical_device_surface_present_modes(device, self.handle)
                    .map_err(VulkanError::Api)?,
            })
        }
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.instance.surface_loader().destroy_surface(self.handle, None);
        }
    }
}
