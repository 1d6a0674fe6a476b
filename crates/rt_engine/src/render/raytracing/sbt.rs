//! Shader binding table
//!
//! Three positional records: raygen at 0, miss at one stride, closest hit
//! at two strides. The stride is the handle size rounded up to the
//! driver's region alignment, and dispatch uses the same stride.

use std::sync::Arc;

use ash::vk;

use super::capability::RayTracingDevice;
use crate::render::vulkan::{Buffer, Device, RayTracingProperties, VulkanError, VulkanResult};

/// Raygen group index
pub const RAYGEN_GROUP: u32 = 0;
/// Miss group index
pub const MISS_GROUP: u32 = 1;
/// Closest-hit group index
pub const HIT_GROUP: u32 = 2;
/// Number of shader groups in the pipeline
pub const GROUP_COUNT: u32 = 3;

/// Round `value` up to a multiple of `alignment` (zero alignment is treated as one)
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    let alignment = if alignment == 0 { 1 } else { alignment };
    value.div_ceil(alignment) * alignment
}

/// Record sizes and offsets of the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbtLayout {
    /// Bytes in one driver handle
    pub handle_size: u64,
    /// Bytes between consecutive records
    pub stride: u64,
}

impl SbtLayout {
    /// Layout for the driver's handle size and alignments
    pub fn new(properties: &RayTracingProperties) -> Self {
        let handle_size = u64::from(properties.shader_group_handle_size);
        let handle_aligned = align_up(handle_size, u64::from(properties.shader_group_handle_alignment));
        Self {
            handle_size,
            stride: align_up(handle_aligned, u64::from(properties.shader_group_base_alignment)),
        }
    }

    /// Byte offset of a group's record
    pub const fn offset(&self, group: u32) -> u64 {
        group as u64 * self.stride
    }

    /// Total table size
    pub const fn table_size(&self) -> u64 {
        GROUP_COUNT as u64 * self.stride
    }

    /// Copy tightly packed driver handles into their strided slots
    pub fn pack(&self, handles: &[u8]) -> VulkanResult<Vec<u8>> {
        let handle_size = self.handle_size as usize;
        let expected = handle_size * GROUP_COUNT as usize;
        if handles.len() != expected {
            return Err(VulkanError::InvalidOperation {
                reason: format!("expected {expected} bytes of shader group handles, got {}", handles.len()),
            });
        }
        let mut table = vec![0u8; self.table_size() as usize];
        for (group, handle) in handles.chunks_exact(handle_size).enumerate() {
            let offset = self.offset(group as u32) as usize;
            table[offset..offset + handle_size].copy_from_slice(handle);
        }
        Ok(table)
    }

    /// Strided region for one group starting at `base`
    pub fn region(&self, base: vk::DeviceAddress, group: u32) -> vk::StridedDeviceAddressRegionKHR {
        vk::StridedDeviceAddressRegionKHR {
            device_address: base + self.offset(group),
            stride: self.stride,
            size: self.stride,
        }
    }
}

/// Host-visible binding table buffer plus its dispatch regions
pub struct ShaderBindingTable {
    _buffer: Buffer,
    layout: SbtLayout,
    raygen: vk::StridedDeviceAddressRegionKHR,
    miss: vk::StridedDeviceAddressRegionKHR,
    hit: vk::StridedDeviceAddressRegionKHR,
}

impl ShaderBindingTable {
    /// Query the pipeline's group handles and write them into a new table
    pub fn new<D: RayTracingDevice>(device: &Arc<Device>, ray_tracing: &D, pipeline: vk::Pipeline) -> VulkanResult<Self> {
        let layout = SbtLayout::new(&ray_tracing.properties());
        let handles = ray_tracing.shader_group_handles(pipeline, GROUP_COUNT)?;
        let table = layout.pack(&handles)?;

        let buffer = device.create_buffer(
            vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            layout.table_size(),
            Some(&table),
        )?;
        let base = buffer.device_address()?;
        log::debug!("Created shader binding table ({} bytes, stride {})", layout.table_size(), layout.stride);

        Ok(Self {
            _buffer: buffer,
            layout,
            raygen: layout.region(base, RAYGEN_GROUP),
            miss: layout.region(base, MISS_GROUP),
            hit: layout.region(base, HIT_GROUP),
        })
    }

    /// Raygen region
    pub fn raygen(&self) -> &vk::StridedDeviceAddressRegionKHR {
        &self.raygen
    }

    /// Miss region
    pub fn miss(&self) -> &vk::StridedDeviceAddressRegionKHR {
        &self.miss
    }

    /// Closest-hit region
    pub fn hit(&self) -> &vk::StridedDeviceAddressRegionKHR {
        &self.hit
    }

    /// Record layout
    pub fn layout(&self) -> SbtLayout {
        self.layout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties(handle: u32, handle_alignment: u32, base_alignment: u32) -> RayTracingProperties {
        RayTracingProperties {
            shader_group_handle_size: handle,
            shader_group_handle_alignment: handle_alignment,
            shader_group_base_alignment: base_alignment,
            max_ray_recursion_depth: 1,
            min_scratch_offset_alignment: 128,
        }
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 64), 0);
        assert_eq!(align_up(1, 64), 64);
        assert_eq!(align_up(64, 64), 64);
        assert_eq!(align_up(65, 64), 128);
        assert_eq!(align_up(7, 0), 7);
    }

    #[test]
    fn test_stride_equals_handle_size_when_already_aligned() {
        let layout = SbtLayout::new(&properties(32, 32, 32));
        assert_eq!(layout.stride, 32);
        assert_eq!(layout.table_size(), 96);
        assert_eq!(layout.offset(MISS_GROUP), 32);
        assert_eq!(layout.offset(HIT_GROUP), 64);
    }

    #[test]
    fn test_stride_rounds_up_to_base_alignment() {
        let layout = SbtLayout::new(&properties(32, 32, 64));
        assert_eq!(layout.stride, 64);
        assert_eq!(layout.table_size(), 192);
    }

    #[test]
    fn test_pack_places_handles_at_fixed_slots() {
        let layout = SbtLayout::new(&properties(4, 4, 8));
        let handles = [1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3];
        let table = layout.pack(&handles).unwrap();
        assert_eq!(table, [1, 1, 1, 1, 0, 0, 0, 0, 2, 2, 2, 2, 0, 0, 0, 0, 3, 3, 3, 3, 0, 0, 0, 0]);
    }

    #[test]
    fn test_pack_rejects_wrong_handle_count() {
        let layout = SbtLayout::new(&properties(4, 4, 4));
        assert!(layout.pack(&[0; 8]).is_err());
    }

    #[test]
    fn test_regions_use_table_stride() {
        let layout = SbtLayout::new(&properties(32, 32, 64));
        let hit = layout.region(0x1000, HIT_GROUP);
        assert_eq!(hit.device_address, 0x1000 + 128);
        assert_eq!(hit.stride, 64);
        assert_eq!(hit.size, 64);
    }
}
