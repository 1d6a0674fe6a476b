//! Semaphores, fences and per-frame synchronization
//!
//! Each frame slot owns an "image acquired" semaphore, a "render complete"
//! semaphore and an in-flight fence. The fence guards the slot's command
//! buffer: it is waited on before the buffer is recorded again.

use std::sync::Arc;

use ash::vk;

use super::device::Device;
use super::{VulkanError, VulkanResult};

/// Binary semaphore with RAII cleanup
pub struct Semaphore {
    device: Arc<Device>,
    handle: vk::Semaphore,
}

impl Semaphore {
    /// Create an unsignalled semaphore
    pub fn new(device: Arc<Device>) -> VulkanResult<Self> {
        let handle = unsafe {
            device
                .raw()
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
                .map_err(VulkanError::Api)?
        };
        Ok(Self { device, handle })
    }

    /// Semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.handle
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_semaphore(self.handle, None) };
    }
}

/// Fence with RAII cleanup
pub struct Fence {
    device: Arc<Device>,
    handle: vk::Fence,
}

impl Fence {
    /// Create a fence, optionally already signalled
    pub fn new(device: Arc<Device>, signaled: bool) -> VulkanResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::builder().flags(flags);
        let handle = unsafe {
            device
                .raw()
                .create_fence(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        Ok(Self { device, handle })
    }

    /// Block until signalled or `timeout_ns` passes
    pub fn wait(&self, timeout_ns: u64) -> VulkanResult<()> {
        unsafe {
            self.device
                .raw()
                .wait_for_fences(&[self.handle], true, timeout_ns)
                .map_err(VulkanError::from)
        }
    }

    /// Return the fence to the unsignalled state
    pub fn reset(&self) -> VulkanResult<()> {
        unsafe {
            self.device
                .raw()
                .reset_fences(&[self.handle])
                .map_err(VulkanError::Api)
        }
    }

    /// Whether the fence is signalled, without blocking
    pub fn is_signaled(&self) -> VulkanResult<bool> {
        unsafe { self.device.raw().get_fence_status(self.handle).map_err(VulkanError::Api) }
    }

    /// Fence handle
    pub fn handle(&self) -> vk::Fence {
        self.handle
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_fence(self.handle, None) };
    }
}

/// Synchronization objects for one frame slot
pub struct FrameSync {
    /// Signalled when the swapchain image is ready to be written
    pub image_available: Semaphore,
    /// Signalled when rendering finished and the image may be presented
    pub render_finished: Semaphore,
    /// Signalled when the GPU is done with the slot's command buffer
    pub in_flight: Fence,
}

impl FrameSync {
    /// Create the objects; the fence starts signalled so the first wait returns immediately
    pub fn new(device: &Arc<Device>) -> VulkanResult<Self> {
        Ok(Self {
            image_available: Semaphore::new(Arc::clone(device))?,
            render_finished: Semaphore::new(Arc::clone(device))?,
            in_flight: Fence::new(Arc::clone(device), true)?,
        })
    }
}
