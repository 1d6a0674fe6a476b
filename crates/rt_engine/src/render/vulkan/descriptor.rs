//! Descriptor set layouts, pools and batched writes
//!
//! Pools are sized from a fixed per-type quota and never grow. Sets are
//! rebuilt wholesale by dropping the pool and allocating a new one.

use std::sync::Arc;

use ash::vk;

use super::device::Device;
use super::{VulkanError, VulkanResult};

/// Builder for descriptor set layouts
#[derive(Default)]
pub struct DescriptorSetLayoutBuilder {
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
}

impl DescriptorSetLayoutBuilder {
    /// Start an empty layout
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a binding holding `count` descriptors of `ty`
    pub fn add_binding(
        mut self,
        binding: u32,
        ty: vk::DescriptorType,
        count: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(ty)
                .descriptor_count(count)
                .stage_flags(stage_flags)
                .build(),
        );
        self
    }

    /// Add a single uniform buffer binding
    pub fn add_uniform_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add_binding(binding, vk::DescriptorType::UNIFORM_BUFFER, 1, stage_flags)
    }

    /// Add a single combined image sampler binding
    pub fn add_combined_image_sampler(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add_binding(binding, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1, stage_flags)
    }

    /// Bindings added so far
    pub fn bindings(&self) -> &[vk::DescriptorSetLayoutBinding] {
        &self.bindings
    }

    /// Create the layout
    pub fn build(self, device: &Arc<Device>) -> VulkanResult<DescriptorSetLayout> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&self.bindings);
        let handle = unsafe {
            device
                .raw()
                .create_descriptor_set_layout(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        Ok(DescriptorSetLayout {
            device: Arc::clone(device),
            handle,
            bindings: self.bindings,
        })
    }
}

/// Descriptor set layout wrapper with RAII cleanup
pub struct DescriptorSetLayout {
    device: Arc<Device>,
    handle: vk::DescriptorSetLayout,
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
}

impl DescriptorSetLayout {
    /// Layout handle
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.handle
    }

    /// Bindings the layout was created with
    pub fn bindings(&self) -> &[vk::DescriptorSetLayoutBinding] {
        &self.bindings
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_descriptor_set_layout(self.handle, None) };
    }
}

/// Pool sizes granting `quota_per_type` descriptors to each distinct type, times the number of types
///
/// Duplicated types collapse into one entry.
pub fn pool_sizes(quota_per_type: u32, types: &[vk::DescriptorType]) -> Vec<vk::DescriptorPoolSize> {
    let mut distinct: Vec<vk::DescriptorType> = Vec::with_capacity(types.len());
    for &ty in types {
        if !distinct.contains(&ty) {
            distinct.push(ty);
        }
    }
    let per_type = quota_per_type.saturating_mul(distinct.len() as u32);
    distinct
        .into_iter()
        .map(|ty| vk::DescriptorPoolSize {
            ty,
            descriptor_count: per_type,
        })
        .collect()
}

/// Descriptor pool wrapper with RAII cleanup
pub struct DescriptorPool {
    device: Arc<Device>,
    handle: vk::DescriptorPool,
}

impl DescriptorPool {
    /// Create a pool over `types` sized by [`pool_sizes`]
    pub fn new(
        device: Arc<Device>,
        quota_per_type: u32,
        types: &[vk::DescriptorType],
        max_sets: u32,
    ) -> VulkanResult<Self> {
        let sizes = pool_sizes(quota_per_type, types);
        let create_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(max_sets.max(1))
            .pool_sizes(&sizes);
        let handle = unsafe {
            device
                .raw()
                .create_descriptor_pool(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        log::debug!("Created descriptor pool ({} types, {max_sets} sets)", sizes.len());
        Ok(Self { device, handle })
    }

    /// Allocate one set per layout
    pub fn allocate(&self, layouts: &[vk::DescriptorSetLayout]) -> VulkanResult<Vec<vk::DescriptorSet>> {
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.handle)
            .set_layouts(layouts);
        unsafe {
            self.device
                .raw()
                .allocate_descriptor_sets(&alloc_info)
                .map_err(VulkanError::Api)
        }
    }

    /// Allocate a single set
    pub fn allocate_one(&self, layout: vk::DescriptorSetLayout) -> VulkanResult<vk::DescriptorSet> {
        self.allocate(&[layout])?
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: "driver returned no descriptor set".to_string(),
            })
    }

    /// Pool handle
    pub fn handle(&self) -> vk::DescriptorPool {
        self.handle
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_descriptor_pool(self.handle, None) };
    }
}

enum PendingWrite {
    Buffers {
        set: vk::DescriptorSet,
        binding: u32,
        ty: vk::DescriptorType,
        infos: Vec<vk::DescriptorBufferInfo>,
    },
    Images {
        set: vk::DescriptorSet,
        binding: u32,
        ty: vk::DescriptorType,
        infos: Vec<vk::DescriptorImageInfo>,
    },
    AccelerationStructure {
        set: vk::DescriptorSet,
        binding: u32,
        handles: Vec<vk::AccelerationStructureKHR>,
    },
}

/// Collects descriptor writes and applies them in one update
///
/// Info arrays are owned by the writer until [`DescriptorSetWriter::update`],
/// so the pointers handed to the driver stay valid.
#[derive(Default)]
pub struct DescriptorSetWriter {
    pending: Vec<PendingWrite>,
}

impl DescriptorSetWriter {
    /// Start an empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Write an array of buffer descriptors starting at element 0
    pub fn write_buffers(
        mut self,
        set: vk::DescriptorSet,
        binding: u32,
        ty: vk::DescriptorType,
        infos: Vec<vk::DescriptorBufferInfo>,
    ) -> Self {
        if !infos.is_empty() {
            self.pending.push(PendingWrite::Buffers { set, binding, ty, infos });
        }
        self
    }

    /// Write one uniform buffer
    pub fn write_uniform_buffer(self, set: vk::DescriptorSet, binding: u32, info: vk::DescriptorBufferInfo) -> Self {
        self.write_buffers(set, binding, vk::DescriptorType::UNIFORM_BUFFER, vec![info])
    }

    /// Write an array of image descriptors starting at element 0
    pub fn write_images(
        mut self,
        set: vk::DescriptorSet,
        binding: u32,
        ty: vk::DescriptorType,
        infos: Vec<vk::DescriptorImageInfo>,
    ) -> Self {
        if !infos.is_empty() {
            self.pending.push(PendingWrite::Images { set, binding, ty, infos });
        }
        self
    }

    /// Write a top-level acceleration structure
    pub fn write_acceleration_structure(
        mut self,
        set: vk::DescriptorSet,
        binding: u32,
        handle: vk::AccelerationStructureKHR,
    ) -> Self {
        self.pending.push(PendingWrite::AccelerationStructure {
            set,
            binding,
            handles: vec![handle],
        });
        self
    }

    /// Number of queued writes
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Apply every queued write
    pub fn update(self, device: &Device) {
        let mut structure_infos: Vec<vk::WriteDescriptorSetAccelerationStructureKHR> = self
            .pending
            .iter()
            .filter_map(|write| match write {
                PendingWrite::AccelerationStructure { handles, .. } => Some(
                    vk::WriteDescriptorSetAccelerationStructureKHR::builder()
                        .acceleration_structures(handles)
                        .build(),
                ),
                _ => None,
            })
            .collect();
        let mut structure_infos = structure_infos.iter_mut();

        let mut writes = Vec::with_capacity(self.pending.len());
        for write in &self.pending {
            match write {
                PendingWrite::Buffers { set, binding, ty, infos } => writes.push(
                    vk::WriteDescriptorSet::builder()
                        .dst_set(*set)
                        .dst_binding(*binding)
                        .dst_array_element(0)
                        .descriptor_type(*ty)
                        .buffer_info(infos)
                        .build(),
                ),
                PendingWrite::Images { set, binding, ty, infos } => writes.push(
                    vk::WriteDescriptorSet::builder()
                        .dst_set(*set)
                        .dst_binding(*binding)
                        .dst_array_element(0)
                        .descriptor_type(*ty)
                        .image_info(infos)
                        .build(),
                ),
                PendingWrite::AccelerationStructure { set, binding, handles } => {
                    if let Some(info) = structure_infos.next() {
                        let mut write = vk::WriteDescriptorSet::builder()
                            .dst_set(*set)
                            .dst_binding(*binding)
                            .dst_array_element(0)
                            .descriptor_type(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR)
                            .push_next(info)
                            .build();
                        // The count comes from the chained struct, not an info array
                        write.descriptor_count = handles.len() as u32;
                        writes.push(write);
                    }
                }
            }
        }

        unsafe { device.raw().update_descriptor_sets(&writes, &[]) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_quota_scales_with_type_count() {
        let sizes = pool_sizes(
            64,
            &[
                vk::DescriptorType::UNIFORM_BUFFER,
                vk::DescriptorType::STORAGE_BUFFER,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            ],
        );
        assert_eq!(sizes.len(), 3);
        assert!(sizes.iter().all(|size| size.descriptor_count == 192));
    }

    #[test]
    fn test_duplicate_types_are_merged() {
        let sizes = pool_sizes(
            10,
            &[vk::DescriptorType::UNIFORM_BUFFER, vk::DescriptorType::UNIFORM_BUFFER],
        );
        assert_eq!(sizes.len(), 1);
        assert_eq!(sizes[0].descriptor_count, 10);
    }

    #[test]
    fn test_layout_builder_records_array_counts() {
        let builder = DescriptorSetLayoutBuilder::new()
            .add_binding(
                0,
                vk::DescriptorType::STORAGE_BUFFER,
                5,
                vk::ShaderStageFlags::CLOSEST_HIT_KHR,
            )
            .add_uniform_buffer(1, vk::ShaderStageFlags::RAYGEN_KHR);
        let bindings = builder.bindings();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].descriptor_count, 5);
        assert_eq!(bindings[1].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
    }

    #[test]
    fn test_empty_arrays_are_not_queued() {
        let writer = DescriptorSetWriter::new().write_images(
            vk::DescriptorSet::null(),
            0,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            Vec::new(),
        );
        assert!(writer.is_empty());
    }
}
