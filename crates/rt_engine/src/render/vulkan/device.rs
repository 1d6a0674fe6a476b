//! Physical device selection and the logical device
//!
//! [`Device`] is the single owner of the `VkDevice`. Every GPU resource
//! holds an `Arc<Device>`, so the device outlives everything created from
//! it. One-shot uploads and acceleration structure builds go through
//! [`Device::submit_and_wait`]; every queue submission goes through a lock.

use std::ffi::CStr;
use std::sync::{Arc, Mutex, MutexGuard};

use ash::extensions::khr::{AccelerationStructure, DeferredHostOperations, RayTracingPipeline, Swapchain as SwapchainLoader};
use ash::vk;

use super::buffer::Buffer;
use super::instance::VulkanInstance;
use super::memory::resolve_memory_type;
use super::queue::{select_queue_family, QueueFamilies};
use super::surface::Surface;
use super::{VulkanError, VulkanResult};

/// Depth formats in order of preference
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 5] = [
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D32_SFLOAT,
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D16_UNORM_S8_UINT,
    vk::Format::D16_UNORM,
];

/// Ray tracing pipeline limits reported by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RayTracingProperties {
    /// Size of one shader group handle in bytes
    pub shader_group_handle_size: u32,
    /// Required alignment of each handle in the binding table
    pub shader_group_handle_alignment: u32,
    /// Required alignment of each binding table region
    pub shader_group_base_alignment: u32,
    /// Deepest supported `traceRayEXT` recursion
    pub max_ray_recursion_depth: u32,
    /// Required alignment of acceleration structure build scratch addresses
    pub min_scratch_offset_alignment: u32,
}

/// What the renderer needs from a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceRequirements {
    /// Require the ray tracing pipeline and acceleration structure extensions
    pub ray_tracing: bool,
}

impl DeviceRequirements {
    /// Device extensions that must be present
    pub fn extensions(&self) -> Vec<&'static CStr> {
        let mut names = vec![SwapchainLoader::name()];
        if self.ray_tracing {
            names.extend([
                AccelerationStructure::name(),
                RayTracingPipeline::name(),
                DeferredHostOperations::name(),
            ]);
        }
        names
    }
}

/// Pick the first candidate format the device supports as an optimal-tiling depth attachment
pub fn choose_depth_format(candidates: &[vk::Format], supports: impl Fn(vk::Format) -> bool) -> Option<vk::Format> {
    candidates.iter().copied().find(|&format| supports(format))
}

/// Names in `required` that `available` lacks
pub fn missing_extensions(available: &[String], required: &[&CStr]) -> Vec<String> {
    required
        .iter()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !available.contains(name))
        .collect()
}

/// Capability snapshot of the selected GPU
pub struct PhysicalDeviceInfo {
    /// Physical device handle
    pub handle: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Memory heaps and types
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Queue families
    pub queue_families: Vec<vk::QueueFamilyProperties>,
    /// Selected queue family indices
    pub families: QueueFamilies,
    /// Supported device extension names
    pub extensions: Vec<String>,
    /// Preferred depth/stencil attachment format
    pub depth_format: vk::Format,
    /// Ray tracing limits, when the extensions are present
    pub ray_tracing: Option<RayTracingProperties>,
}

impl PhysicalDeviceInfo {
    /// Human-readable device name
    pub fn name(&self) -> String {
        unsafe { CStr::from_ptr(self.properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }

    /// Select the best GPU able to render to `surface` under `requirements`
    ///
    /// Discrete GPUs win over integrated ones; unsuitable devices are logged
    /// and skipped.
    pub fn select(instance: &VulkanInstance, surface: &Surface, requirements: DeviceRequirements) -> VulkanResult<Self> {
        let devices = unsafe { instance.raw().enumerate_physical_devices().map_err(VulkanError::Api)? };

        let mut best: Option<(u32, Self)> = None;
        let mut last_error = None;
        for device in devices {
            match Self::evaluate(instance, device, surface, requirements) {
                Ok(info) => {
                    let score = match info.properties.device_type {
                        vk::PhysicalDeviceType::DISCRETE_GPU => 3,
                        vk::PhysicalDeviceType::INTEGRATED_GPU => 2,
                        vk::PhysicalDeviceType::VIRTUAL_GPU => 1,
                        _ => 0,
                    };
                    if best.as_ref().map_or(true, |(best_score, _)| score > *best_score) {
                        best = Some((score, info));
                    }
                }
                Err(error) => {
                    log::debug!("Skipping physical device: {error}");
                    last_error = Some(error);
                }
            }
        }

        match best {
            Some((_, info)) => {
                log::info!("Selected GPU: {} (depth format {:?})", info.name(), info.depth_format);
                Ok(info)
            }
            None => Err(last_error.unwrap_or_else(|| VulkanError::InitializationFailed("No Vulkan devices found".to_string()))),
        }
    }

    fn evaluate(
        instance: &VulkanInstance,
        device: vk::PhysicalDevice,
        surface: &Surface,
        requirements: DeviceRequirements,
    ) -> VulkanResult<Self> {
        let raw = instance.raw();
        let properties = unsafe { raw.get_physical_device_properties(device) };
        let memory_properties = unsafe { raw.get_physical_device_memory_properties(device) };
        let queue_families = unsafe { raw.get_physical_device_queue_family_properties(device) };

        let extensions: Vec<String> = unsafe { raw.enumerate_device_extension_properties(device).map_err(VulkanError::Api)? }
            .iter()
            .map(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }.to_string_lossy().into_owned())
            .collect();
        let missing = missing_extensions(&extensions, &requirements.extensions());
        if !missing.is_empty() {
            return Err(VulkanError::MissingExtension(missing.join(", ")));
        }

        let graphics = select_queue_family(&queue_families, vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
            .ok_or_else(|| VulkanError::InitializationFailed("No graphics queue family found".to_string()))?;
        let present = if surface.supports_family(device, graphics)? {
            graphics
        } else {
            let mut found = None;
            for index in 0..queue_families.len() as u32 {
                if surface.supports_family(device, index)? {
                    found = Some(index);
                    break;
                }
            }
            found.ok_or_else(|| VulkanError::InitializationFailed("No present queue family found".to_string()))?
        };
        let compute = select_queue_family(&queue_families, vk::QueueFlags::COMPUTE).unwrap_or(graphics);
        let transfer = select_queue_family(&queue_families, vk::QueueFlags::TRANSFER).unwrap_or(graphics);

        let depth_format = choose_depth_format(&DEPTH_FORMAT_CANDIDATES, |format| {
            let props = unsafe { raw.get_physical_device_format_properties(device, format) };
            props
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .ok_or_else(|| VulkanError::InitializationFailed("No supported depth format".to_string()))?;

        let ray_tracing = requirements.ray_tracing.then(|| {
            let mut rt_properties = vk::PhysicalDeviceRayTracingPipelinePropertiesKHR::default();
            let mut as_properties = vk::PhysicalDeviceAccelerationStructurePropertiesKHR::default();
            let mut properties2 = vk::PhysicalDeviceProperties2::builder()
                .push_next(&mut rt_properties)
                .push_next(&mut as_properties);
            unsafe { raw.get_physical_device_properties2(device, &mut properties2) };
            RayTracingProperties {
                shader_group_handle_size: rt_properties.shader_group_handle_size,
                shader_group_handle_alignment: rt_properties.shader_group_handle_alignment,
                shader_group_base_alignment: rt_properties.shader_group_base_alignment,
                max_ray_recursion_depth: rt_properties.max_ray_recursion_depth,
                min_scratch_offset_alignment: as_properties.min_acceleration_structure_scratch_offset_alignment,
            }
        });

        Ok(Self {
            handle: device,
            properties,
            memory_properties,
            queue_families,
            families: QueueFamilies {
                graphics,
                present,
                compute,
                transfer,
            },
            extensions,
            depth_format,
            ray_tracing,
        })
    }
}

/// Queues retrieved from the logical device
#[derive(Debug, Clone, Copy)]
pub struct Queues {
    /// Graphics, ray tracing and one-shot submissions
    pub graphics: vk::Queue,
    /// Presentation
    pub present: vk::Queue,
    /// Compute
    pub compute: vk::Queue,
    /// Transfer
    pub transfer: vk::Queue,
}

/// Logical device wrapper with RAII cleanup
pub struct Device {
    raw: ash::Device,
    physical: PhysicalDeviceInfo,
    queues: Queues,
    swapchain_loader: SwapchainLoader,
    one_shot_pool: Mutex<vk::CommandPool>,
    submit_lock: Mutex<()>,
    fence_timeout_ns: u64,
    instance: Arc<VulkanInstance>,
}

impl Device {
    /// Create the logical device with one queue per distinct family
    pub fn new(
        instance: Arc<VulkanInstance>,
        physical: PhysicalDeviceInfo,
        requirements: DeviceRequirements,
        fence_timeout_ns: u64,
    ) -> VulkanResult<Arc<Self>> {
        let priorities = [1.0f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = physical
            .families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let extension_names: Vec<*const std::os::raw::c_char> =
            requirements.extensions().iter().map(|name| name.as_ptr()).collect();

        let features = vk::PhysicalDeviceFeatures::builder().sampler_anisotropy(true).build();
        let mut vulkan12 = vk::PhysicalDeviceVulkan12Features::builder()
            .buffer_device_address(requirements.ray_tracing)
            .descriptor_indexing(true)
            .runtime_descriptor_array(true)
            .shader_storage_buffer_array_non_uniform_indexing(true)
            .shader_sampled_image_array_non_uniform_indexing(true)
            .shader_uniform_buffer_array_non_uniform_indexing(true)
            .scalar_block_layout(true);
        let mut acceleration_features =
            vk::PhysicalDeviceAccelerationStructureFeaturesKHR::builder().acceleration_structure(true);
        let mut pipeline_features = vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::builder().ray_tracing_pipeline(true);

        let mut create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features)
            .push_next(&mut vulkan12);
        if requirements.ray_tracing {
            create_info = create_info
                .push_next(&mut acceleration_features)
                .push_next(&mut pipeline_features);
        }

        let raw = unsafe {
            instance
                .raw()
                .create_device(physical.handle, &create_info, None)
                .map_err(VulkanError::Api)?
        };

        let families = physical.families;
        let queues = unsafe {
            Queues {
                graphics: raw.get_device_queue(families.graphics, 0),
                present: raw.get_device_queue(families.present, 0),
                compute: raw.get_device_queue(families.compute, 0),
                transfer: raw.get_device_queue(families.transfer, 0),
            }
        };

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::TRANSIENT | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(families.graphics);
        let one_shot_pool = match unsafe { raw.create_command_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(error) => {
                unsafe { raw.destroy_device(None) };
                return Err(VulkanError::Api(error));
            }
        };

        let swapchain_loader = SwapchainLoader::new(instance.raw(), &raw);
        log::info!(
            "Created logical device (graphics family {}, present family {}, compute family {}, transfer family {})",
            families.graphics,
            families.present,
            families.compute,
            families.transfer
        );

        Ok(Arc::new(Self {
            raw,
            physical,
            queues,
            swapchain_loader,
            one_shot_pool: Mutex::new(one_shot_pool),
            submit_lock: Mutex::new(()),
            fence_timeout_ns,
            instance,
        }))
    }

    /// Raw `ash` device
    pub fn raw(&self) -> &ash::Device {
        &self.raw
    }

    /// Instance the device was created from
    pub fn instance(&self) -> &VulkanInstance {
        &self.instance
    }

    /// Capability snapshot
    pub fn physical(&self) -> &PhysicalDeviceInfo {
        &self.physical
    }

    /// Optimal-tiling features the physical device supports for `format`
    pub fn format_features(&self, format: vk::Format) -> vk::FormatFeatureFlags {
        let properties = unsafe {
            self.instance
                .raw()
                .get_physical_device_format_properties(self.physical.handle, format)
        };
        properties.optimal_tiling_features
    }

    /// Device queues
    pub fn queues(&self) -> &Queues {
        &self.queues
    }

    /// `VK_KHR_swapchain` functions
    pub fn swapchain_loader(&self) -> &SwapchainLoader {
        &self.swapchain_loader
    }

    /// Upper bound for blocking fence waits
    pub fn fence_timeout_ns(&self) -> u64 {
        self.fence_timeout_ns
    }

    /// Resolve a memory type index for a resource
    pub fn resolve_memory_type(&self, type_bits: u32, properties: vk::MemoryPropertyFlags) -> VulkanResult<u32> {
        resolve_memory_type(&self.physical.memory_properties, type_bits, properties)
    }

    /// Create a buffer, optionally filled with `data`
    pub fn create_buffer(
        self: &Arc<Self>,
        usage: vk::BufferUsageFlags,
        memory_properties: vk::MemoryPropertyFlags,
        size: vk::DeviceSize,
        data: Option<&[u8]>,
    ) -> VulkanResult<Buffer> {
        let mut buffer = Buffer::new(Arc::clone(self), size, usage, memory_properties)?;
        if let Some(bytes) = data {
            buffer.upload(bytes)?;
        }
        Ok(buffer)
    }

    /// GPU virtual address of a buffer created with `SHADER_DEVICE_ADDRESS`
    pub fn buffer_address(&self, buffer: vk::Buffer) -> vk::DeviceAddress {
        let info = vk::BufferDeviceAddressInfo::builder().buffer(buffer);
        unsafe { self.raw.get_buffer_device_address(&info) }
    }

    /// Allocate a primary command buffer from the one-shot pool and begin recording
    pub fn begin_one_shot(&self) -> VulkanResult<vk::CommandBuffer> {
        let pool = self.lock_pool();
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(*pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = unsafe { self.raw.allocate_command_buffers(&alloc_info).map_err(VulkanError::Api)? }
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: "driver returned no command buffer".to_string(),
            })?;

        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.raw
                .begin_command_buffer(command_buffer, &begin_info)
                .map_err(VulkanError::Api)?;
        }
        Ok(command_buffer)
    }

    /// End `command_buffer`, submit it with a fresh fence and block until it completes
    ///
    /// With `free_after` the buffer returns to the one-shot pool, so it must
    /// have come from [`Device::begin_one_shot`]. On every return path the
    /// queue has stopped using the buffer and whatever it references, so
    /// callers may drop staging and scratch resources right away, even when
    /// this returns an error.
    pub fn submit_and_wait(&self, command_buffer: vk::CommandBuffer, queue: vk::Queue, free_after: bool) -> VulkanResult<()> {
        unsafe {
            self.raw.end_command_buffer(command_buffer).map_err(VulkanError::Api)?;
        }

        let fence = unsafe {
            self.raw
                .create_fence(&vk::FenceCreateInfo::default(), None)
                .map_err(VulkanError::Api)?
        };
        let command_buffers = [command_buffer];
        let submit = vk::SubmitInfo::builder().command_buffers(&command_buffers).build();

        let result = self
            .queue_submit(queue, &[submit], fence)
            .and_then(|()| unsafe {
                self.raw
                    .wait_for_fences(&[fence], true, self.fence_timeout_ns)
                    .map_err(VulkanError::from)
            });
        // The submission may still be executing after a failed wait
        let result = drain_on_failure(result, || self.wait_idle());

        unsafe { self.raw.destroy_fence(fence, None) };
        if free_after {
            let pool = self.lock_pool();
            unsafe { self.raw.free_command_buffers(*pool, &command_buffers) };
        }
        result
    }

    /// Submit work to a queue under the device-wide submission lock
    pub fn queue_submit(&self, queue: vk::Queue, submits: &[vk::SubmitInfo], fence: vk::Fence) -> VulkanResult<()> {
        let _guard = self.submit_lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        unsafe { self.raw.queue_submit(queue, submits, fence).map_err(VulkanError::Api) }
    }

    /// Present under the device-wide submission lock; `Ok(true)` means suboptimal
    pub fn queue_present(&self, queue: vk::Queue, present_info: &vk::PresentInfoKHR) -> VulkanResult<bool> {
        let _guard = self.submit_lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        unsafe { self.swapchain_loader.queue_present(queue, present_info).map_err(VulkanError::Api) }
    }

    /// Block until the device has finished all submitted work
    pub fn wait_idle(&self) -> VulkanResult<()> {
        let _guard = self.submit_lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        unsafe { self.raw.device_wait_idle().map_err(VulkanError::Api) }
    }

    fn lock_pool(&self) -> MutexGuard<'_, vk::CommandPool> {
        self.one_shot_pool.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            let _ = self.raw.device_wait_idle();
            let pool = *self.lock_pool();
            self.raw.destroy_command_pool(pool, None);
            self.raw.destroy_device(None);
        }
        log::debug!("Destroyed logical device");
    }
}

/// Block on `wait_idle` when `result` is an error, then hand `result` back
///
/// A failure in the idle wait is logged; the original error wins.
fn drain_on_failure(result: VulkanResult<()>, wait_idle: impl FnOnce() -> VulkanResult<()>) -> VulkanResult<()> {
    if let Err(error) = &result {
        log::warn!("One-shot submission failed ({error}), waiting for the device to go idle");
        if let Err(idle_error) = wait_idle() {
            log::error!("Device wait idle after failed submission: {idle_error}");
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_failed_wait_drains_the_device_before_release() {
        for failure in [VulkanError::FenceTimeout, VulkanError::Api(vk::Result::ERROR_DEVICE_LOST)] {
            let idled = Cell::new(false);
            let result = drain_on_failure(Err(failure.clone()), || {
                idled.set(true);
                Ok(())
            });
            assert!(idled.get());
            assert_eq!(result, Err(failure));
        }
    }

    #[test]
    fn test_successful_wait_skips_the_idle_wait() {
        let idled = Cell::new(false);
        let result = drain_on_failure(Ok(()), || {
            idled.set(true);
            Ok(())
        });
        assert!(!idled.get());
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn test_idle_failure_keeps_the_original_error() {
        let result = drain_on_failure(Err(VulkanError::FenceTimeout), || {
            Err(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST))
        });
        assert_eq!(result, Err(VulkanError::FenceTimeout));
    }

    #[test]
    fn test_depth_format_follows_preference_order() {
        let supported = [vk::Format::D24_UNORM_S8_UINT, vk::Format::D16_UNORM];
        let chosen = choose_depth_format(&DEPTH_FORMAT_CANDIDATES, |format| supported.contains(&format));
        assert_eq!(chosen, Some(vk::Format::D24_UNORM_S8_UINT));
    }

    #[test]
    fn test_no_depth_format_is_none() {
        assert_eq!(choose_depth_format(&DEPTH_FORMAT_CANDIDATES, |_| false), None);
    }

    #[test]
    fn test_ray_tracing_requires_extra_extensions() {
        let raster = DeviceRequirements { ray_tracing: false };
        let traced = DeviceRequirements { ray_tracing: true };
        assert_eq!(raster.extensions().len(), 1);
        assert_eq!(traced.extensions().len(), 4);
    }

    #[test]
    fn test_missing_extensions_are_reported_by_name() {
        let available = vec!["VK_KHR_swapchain".to_string()];
        let missing = missing_extensions(&available, &DeviceRequirements { ray_tracing: true }.extensions());
        assert_eq!(
            missing,
            vec![
                "VK_KHR_acceleration_structure".to_string(),
                "VK_KHR_ray_tracing_pipeline".to_string(),
                "VK_KHR_deferred_host_operations".to_string(),
            ]
        );
        assert!(missing_extensions(&available, &DeviceRequirements { ray_tracing: false }.extensions()).is_empty());
    }
}
