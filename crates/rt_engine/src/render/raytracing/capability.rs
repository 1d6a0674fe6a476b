//! Abstract ray tracing device capability and its Vulkan implementation
//!
//! The acceleration structure builder and the binding table only see
//! [`RayTracingDevice`]. [`VulkanRayTracing`] implements it over the
//! `VK_KHR_acceleration_structure` and `VK_KHR_ray_tracing_pipeline`
//! loaders; tests substitute an in-memory fake.

use std::sync::Arc;

use ash::extensions::khr::{AccelerationStructure as AccelerationLoader, RayTracingPipeline as PipelineLoader};
use ash::vk;

use super::acceleration::{GeometryInstance, PackedInstance};
use super::sbt::align_up;
use crate::render::vulkan::{Buffer, Device, RayTracingProperties, VulkanError, VulkanResult};

/// Triangle geometry of one primitive, referenced by device address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriangleGeometry {
    /// Address of the first vertex; positions are the leading three floats
    pub vertex_address: vk::DeviceAddress,
    /// Bytes between consecutive vertices
    pub vertex_stride: vk::DeviceSize,
    /// Number of vertices
    pub vertex_count: u32,
    /// Address of the `u32` index list
    pub index_address: vk::DeviceAddress,
    /// Number of triangles
    pub triangle_count: u32,
}

/// A built acceleration structure
pub trait BuiltStructure {
    /// Opaque structure handle
    fn handle(&self) -> vk::AccelerationStructureKHR;

    /// 64-bit address instances use to reference the structure
    fn device_address(&self) -> vk::DeviceAddress;
}

/// Everything the ray tracing path needs from the device
pub trait RayTracingDevice {
    /// Structure type produced by builds
    type Structure: BuiltStructure;

    /// Build one bottom-level structure and wait for the build to complete
    fn build_bottom_level(&self, geometry: &TriangleGeometry) -> VulkanResult<Self::Structure>;

    /// Build the top-level structure over `instances` and wait for it to complete
    fn build_top_level(&self, instances: &[GeometryInstance]) -> VulkanResult<Self::Structure>;

    /// Raw shader group handles for the first `group_count` groups of `pipeline`
    fn shader_group_handles(&self, pipeline: vk::Pipeline, group_count: u32) -> VulkanResult<Vec<u8>>;

    /// Pipeline limits
    fn properties(&self) -> RayTracingProperties;
}

/// Acceleration structure backed by device memory
pub struct VulkanAccelerationStructure {
    loader: AccelerationLoader,
    handle: vk::AccelerationStructureKHR,
    address: vk::DeviceAddress,
    _buffer: Buffer,
}

impl BuiltStructure for VulkanAccelerationStructure {
    fn handle(&self) -> vk::AccelerationStructureKHR {
        self.handle
    }

    fn device_address(&self) -> vk::DeviceAddress {
        self.address
    }
}

impl Drop for VulkanAccelerationStructure {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_acceleration_structure(self.handle, None) };
    }
}

/// Ray tracing capability of a [`Device`] created with the ray tracing extensions
pub struct VulkanRayTracing {
    device: Arc<Device>,
    acceleration: AccelerationLoader,
    pipeline: PipelineLoader,
    properties: RayTracingProperties,
}

impl VulkanRayTracing {
    /// Load the extension entry points; fails when the device was created without them
    pub fn new(device: Arc<Device>) -> VulkanResult<Self> {
        let properties = device
            .physical()
            .ray_tracing
            .ok_or_else(|| VulkanError::MissingExtension("VK_KHR_ray_tracing_pipeline".to_string()))?;
        let acceleration = AccelerationLoader::new(device.instance().raw(), device.raw());
        let pipeline = PipelineLoader::new(device.instance().raw(), device.raw());
        log::info!(
            "Ray tracing available: handle size {}, base alignment {}, max recursion {}",
            properties.shader_group_handle_size,
            properties.shader_group_base_alignment,
            properties.max_ray_recursion_depth
        );
        Ok(Self {
            device,
            acceleration,
            pipeline,
            properties,
        })
    }

    /// `VK_KHR_ray_tracing_pipeline` functions
    pub fn pipeline_loader(&self) -> &PipelineLoader {
        &self.pipeline
    }

    /// Device the capability belongs to
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Two-phase build: allocate and create the structure, then record the
    /// build with a scratch buffer and wait for it behind a build barrier
    fn build(
        &self,
        ty: vk::AccelerationStructureTypeKHR,
        geometry: vk::AccelerationStructureGeometryKHR,
        primitive_count: u32,
    ) -> VulkanResult<VulkanAccelerationStructure> {
        let geometries = [geometry];
        let mut build_info = vk::AccelerationStructureBuildGeometryInfoKHR::builder()
            .ty(ty)
            .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(&geometries)
            .build();

        let sizes = unsafe {
            self.acceleration.get_acceleration_structure_build_sizes(
                vk::AccelerationStructureBuildTypeKHR::DEVICE,
                &build_info,
                &[primitive_count],
            )
        };

        let buffer = Buffer::new(
            Arc::clone(&self.device),
            sizes.acceleration_structure_size,
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        let create_info = vk::AccelerationStructureCreateInfoKHR::builder()
            .buffer(buffer.handle())
            .size(sizes.acceleration_structure_size)
            .ty(ty);
        let handle = unsafe {
            self.acceleration
                .create_acceleration_structure(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        let mut structure = VulkanAccelerationStructure {
            loader: self.acceleration.clone(),
            handle,
            address: 0,
            _buffer: buffer,
        };

        let scratch_alignment = u64::from(self.properties.min_scratch_offset_alignment);
        let scratch = Buffer::new(
            Arc::clone(&self.device),
            scratch_allocation_size(sizes.build_scratch_size, scratch_alignment),
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        build_info.dst_acceleration_structure = handle;
        build_info.scratch_data = vk::DeviceOrHostAddressKHR {
            device_address: align_up(scratch.device_address()?, scratch_alignment),
        };

        let range = vk::AccelerationStructureBuildRangeInfoKHR {
            primitive_count,
            primitive_offset: 0,
            first_vertex: 0,
            transform_offset: 0,
        };
        let ranges = [range];

        let command_buffer = self.device.begin_one_shot()?;
        let barrier = vk::MemoryBarrier::builder()
            .src_access_mask(
                vk::AccessFlags::ACCELERATION_STRUCTURE_READ_KHR | vk::AccessFlags::ACCELERATION_STRUCTURE_WRITE_KHR,
            )
            .dst_access_mask(
                vk::AccessFlags::ACCELERATION_STRUCTURE_READ_KHR | vk::AccessFlags::ACCELERATION_STRUCTURE_WRITE_KHR,
            )
            .build();
        unsafe {
            self.acceleration
                .cmd_build_acceleration_structures(command_buffer, &[build_info], &[&ranges]);
            self.device.raw().cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR,
                vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[],
                &[],
            );
        }
        self.device
            .submit_and_wait(command_buffer, self.device.queues().graphics, true)?;

        let address_info = vk::AccelerationStructureDeviceAddressInfoKHR::builder().acceleration_structure(handle);
        structure.address = unsafe { self.acceleration.get_acceleration_structure_device_address(&address_info) };
        Ok(structure)
    }
}

impl RayTracingDevice for VulkanRayTracing {
    type Structure = VulkanAccelerationStructure;

    fn build_bottom_level(&self, geometry: &TriangleGeometry) -> VulkanResult<Self::Structure> {
        let triangles = vk::AccelerationStructureGeometryTrianglesDataKHR::builder()
            .vertex_format(vk::Format::R32G32B32_SFLOAT)
            .vertex_data(vk::DeviceOrHostAddressConstKHR {
                device_address: geometry.vertex_address,
            })
            .vertex_stride(geometry.vertex_stride)
            .max_vertex(geometry.vertex_count.saturating_sub(1))
            .index_type(vk::IndexType::UINT32)
            .index_data(vk::DeviceOrHostAddressConstKHR {
                device_address: geometry.index_address,
            })
            .build();
        let geometry_desc = vk::AccelerationStructureGeometryKHR::builder()
            .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
            .geometry(vk::AccelerationStructureGeometryDataKHR { triangles })
            .flags(vk::GeometryFlagsKHR::OPAQUE)
            .build();
        self.build(
            vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
            geometry_desc,
            geometry.triangle_count,
        )
    }

    fn build_top_level(&self, instances: &[GeometryInstance]) -> VulkanResult<Self::Structure> {
        // An empty scene still gets a valid instance buffer; the build just reads zero entries
        let mut packed: Vec<PackedInstance> = instances.iter().map(GeometryInstance::pack).collect();
        if packed.is_empty() {
            packed.push(PackedInstance::default());
        }
        let instance_buffer = self.device.create_buffer(
            vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
                | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            std::mem::size_of_val(packed.as_slice()) as vk::DeviceSize,
            Some(bytemuck::cast_slice(&packed)),
        )?;

        let instances_data = vk::AccelerationStructureGeometryInstancesDataKHR::builder()
            .array_of_pointers(false)
            .data(vk::DeviceOrHostAddressConstKHR {
                device_address: instance_buffer.device_address()?,
            })
            .build();
        let geometry = vk::AccelerationStructureGeometryKHR::builder()
            .geometry_type(vk::GeometryTypeKHR::INSTANCES)
            .geometry(vk::AccelerationStructureGeometryDataKHR {
                instances: instances_data,
            })
            .build();
        self.build(
            vk::AccelerationStructureTypeKHR::TOP_LEVEL,
            geometry,
            instances.len() as u32,
        )
    }

    fn shader_group_handles(&self, pipeline: vk::Pipeline, group_count: u32) -> VulkanResult<Vec<u8>> {
        let data_size = (group_count * self.properties.shader_group_handle_size) as usize;
        unsafe {
            self.pipeline
                .get_ray_tracing_shader_group_handles(pipeline, 0, group_count, data_size)
                .map_err(VulkanError::Api)
        }
    }

    fn properties(&self) -> RayTracingProperties {
        self.properties
    }
}

/// Bytes to allocate so that `size` bytes still fit after aligning the start
/// address up to `alignment`
fn scratch_allocation_size(size: vk::DeviceSize, alignment: vk::DeviceSize) -> vk::DeviceSize {
    size.max(1) + alignment.saturating_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aligned_scratch_region_fits_in_allocation() {
        let alignment = 128;
        for size in [0, 1, 100, 4096, 65_537] {
            let allocated = scratch_allocation_size(size, alignment);
            for base in [0x1000, 0x1004, 0x10ff, 0x2040] {
                let start = align_up(base, alignment);
                assert_eq!(start % alignment, 0);
                assert!(start + size.max(1) <= base + allocated);
            }
        }
    }

    #[test]
    fn test_unaligned_device_needs_no_padding() {
        assert_eq!(scratch_allocation_size(256, 0), 256);
        assert_eq!(scratch_allocation_size(256, 1), 256);
        assert_eq!(scratch_allocation_size(0, 1), 1);
    }
}
