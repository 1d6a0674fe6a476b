//! Buffer management for vertex data, uniforms and ray tracing inputs
//!
//! A buffer is either unmapped or mapped by its single owner. Host writes
//! require a live mapping; mapping twice or unmapping an unmapped buffer
//! is an error rather than a silent no-op.

use std::ptr::NonNull;
use std::sync::Arc;

use ash::vk;

use super::device::Device;
use super::{VulkanError, VulkanResult};

/// Host mapping bookkeeping for one allocation
#[derive(Debug, Default)]
pub struct MappingState {
    ptr: Option<NonNull<u8>>,
    len: usize,
}

impl MappingState {
    /// Record a fresh mapping of `len` bytes at `ptr`
    pub fn begin(&mut self, ptr: *mut std::ffi::c_void, len: usize) -> VulkanResult<()> {
        if self.ptr.is_some() {
            return Err(VulkanError::InvalidOperation {
                reason: "buffer is already mapped".to_string(),
            });
        }
        let ptr = NonNull::new(ptr.cast::<u8>()).ok_or_else(|| VulkanError::InvalidOperation {
            reason: "driver returned a null mapping".to_string(),
        })?;
        self.ptr = Some(ptr);
        self.len = len;
        Ok(())
    }

    /// Forget the mapping
    pub fn end(&mut self) -> VulkanResult<()> {
        if self.ptr.take().is_none() {
            return Err(VulkanError::NotMapped);
        }
        self.len = 0;
        Ok(())
    }

    /// Whether a mapping is live
    pub fn is_mapped(&self) -> bool {
        self.ptr.is_some()
    }

    /// Mapped pointer, null when unmapped
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.map_or(std::ptr::null_mut(), NonNull::as_ptr)
    }

    /// Copy `data` into the mapping at `offset`
    pub fn copy_in(&mut self, offset: usize, data: &[u8]) -> VulkanResult<()> {
        let ptr = self.ptr.ok_or(VulkanError::NotMapped)?;
        let fits = offset.checked_add(data.len()).is_some_and(|end| end <= self.len);
        if !fits {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "write of {} bytes at offset {offset} exceeds mapped size {}",
                    data.len(),
                    self.len
                ),
            });
        }
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.as_ptr().add(offset), data.len());
        }
        Ok(())
    }
}

/// Buffer wrapper with memory management
pub struct Buffer {
    device: Arc<Device>,
    handle: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    memory_properties: vk::MemoryPropertyFlags,
    mapping: MappingState,
}

impl Buffer {
    /// Create a buffer and bind freshly allocated memory to it
    pub fn new(
        device: Arc<Device>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<Self> {
        if size == 0 {
            return Err(VulkanError::InvalidOperation {
                reason: "buffers cannot be empty".to_string(),
            });
        }

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let raw = device.raw();
        let handle = unsafe { raw.create_buffer(&buffer_info, None).map_err(VulkanError::Api)? };

        let requirements = unsafe { raw.get_buffer_memory_requirements(handle) };
        let memory = match Self::allocate(&device, &requirements, usage, memory_properties) {
            Ok(memory) => memory,
            Err(error) => {
                unsafe { raw.destroy_buffer(handle, None) };
                return Err(error);
            }
        };

        if let Err(error) = unsafe { raw.bind_buffer_memory(handle, memory, 0) } {
            unsafe {
                raw.destroy_buffer(handle, None);
                raw.free_memory(memory, None);
            }
            return Err(VulkanError::Api(error));
        }

        log::trace!("Created buffer of {size} bytes ({usage:?})");
        Ok(Self {
            device,
            handle,
            memory,
            size,
            usage,
            memory_properties,
            mapping: MappingState::default(),
        })
    }

    fn allocate(
        device: &Device,
        requirements: &vk::MemoryRequirements,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<vk::DeviceMemory> {
        let memory_type_index = device.resolve_memory_type(requirements.memory_type_bits, properties)?;
        let mut flags_info = vk::MemoryAllocateFlagsInfo::builder().flags(vk::MemoryAllocateFlags::DEVICE_ADDRESS);
        let mut alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);
        if usage.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS) {
            alloc_info = alloc_info.push_next(&mut flags_info);
        }
        unsafe { device.raw().allocate_memory(&alloc_info, None).map_err(VulkanError::Api) }
    }

    /// Map the whole buffer for host access
    pub fn map(&mut self) -> VulkanResult<*mut u8> {
        if !self.memory_properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
            return Err(VulkanError::InvalidOperation {
                reason: "buffer memory is not host visible".to_string(),
            });
        }
        if self.mapping.is_mapped() {
            return Err(VulkanError::InvalidOperation {
                reason: "buffer is already mapped".to_string(),
            });
        }
        let ptr = unsafe {
            self.device
                .raw()
                .map_memory(self.memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
                .map_err(VulkanError::Api)?
        };
        self.mapping.begin(ptr, self.size as usize)?;
        Ok(self.mapping.as_ptr())
    }

    /// Release the host mapping
    pub fn unmap(&mut self) -> VulkanResult<()> {
        self.mapping.end()?;
        unsafe { self.device.raw().unmap_memory(self.memory) };
        Ok(())
    }

    /// Copy bytes into the mapped buffer
    pub fn copy_to(&mut self, data: &[u8], offset: usize) -> VulkanResult<()> {
        self.mapping.copy_in(offset, data)
    }

    /// Make host writes visible to the device when memory is not coherent
    pub fn flush(&self) -> VulkanResult<()> {
        if self.memory_properties.contains(vk::MemoryPropertyFlags::HOST_COHERENT) {
            return Ok(());
        }
        let range = vk::MappedMemoryRange::builder()
            .memory(self.memory)
            .offset(0)
            .size(vk::WHOLE_SIZE)
            .build();
        unsafe {
            self.device
                .raw()
                .flush_mapped_memory_ranges(&[range])
                .map_err(VulkanError::Api)
        }
    }

    /// Map, copy, flush and unmap in one step
    pub fn upload(&mut self, data: &[u8]) -> VulkanResult<()> {
        self.map()?;
        let result = self.copy_to(data, 0).and_then(|()| self.flush());
        self.unmap()?;
        result
    }

    /// Whether the buffer is currently mapped
    pub fn is_mapped(&self) -> bool {
        self.mapping.is_mapped()
    }

    /// Buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.handle
    }

    /// Logical size in bytes
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Usage flags the buffer was created with
    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    /// Whole-buffer descriptor for binding
    pub fn descriptor(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.handle,
            offset: 0,
            range: vk::WHOLE_SIZE,
        }
    }

    /// GPU virtual address
    pub fn device_address(&self) -> VulkanResult<vk::DeviceAddress> {
        if !self.usage.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS) {
            return Err(VulkanError::InvalidOperation {
                reason: "buffer was not created with SHADER_DEVICE_ADDRESS usage".to_string(),
            });
        }
        Ok(self.device.buffer_address(self.handle))
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            if self.mapping.end().is_ok() {
                self.device.raw().unmap_memory(self.memory);
            }
            self.device.raw().destroy_buffer(self.handle, None);
            self.device.raw().free_memory(self.memory, None);
        }
    }
}
