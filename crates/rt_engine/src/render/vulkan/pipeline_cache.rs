//! Pipeline cache created once at prepare time

use std::sync::Arc;

use ash::vk;

use super::device::Device;
use super::{VulkanError, VulkanResult};

/// Pipeline cache wrapper with RAII cleanup
pub struct PipelineCache {
    device: Arc<Device>,
    handle: vk::PipelineCache,
}

impl PipelineCache {
    /// Create an empty cache
    pub fn new(device: Arc<Device>) -> VulkanResult<Self> {
        let create_info = vk::PipelineCacheCreateInfo::builder();
        let handle = unsafe {
            device
                .raw()
                .create_pipeline_cache(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        log::debug!("Created pipeline cache");
        Ok(Self { device, handle })
    }

    /// Cache handle
    pub fn handle(&self) -> vk::PipelineCache {
        self.handle
    }
}

impl Drop for PipelineCache {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_pipeline_cache(self.handle, None) };
    }
}
