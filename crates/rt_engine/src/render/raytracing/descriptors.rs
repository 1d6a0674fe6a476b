//! Descriptor sets of the ray tracing pipeline
//!
//! - set 0 (raygen): top-level structure, output image, scene uniforms
//! - set 1 (rayhit): per-primitive arrays indexed by `gl_InstanceCustomIndexEXT`
//! - set 2 (raymiss): environment map
//!
//! Every rayhit array holds one element per primitive in traversal order.
//! Missing textures resolve to the placeholder so the arrays never have
//! holes. An empty scene still gets one padded element per array.

use std::sync::Arc;

use ash::vk;

use crate::render::vulkan::descriptor::{DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBuilder, DescriptorSetWriter};
use crate::render::vulkan::{Device, VulkanResult};
use crate::scene::TextureSlot;

/// Raygen set bindings
pub mod raygen {
    /// Top-level acceleration structure
    pub const ACCELERATION_STRUCTURE: u32 = 0;
    /// Output storage image
    pub const OUTPUT_IMAGE: u32 = 1;
    /// Scene uniform block
    pub const SCENE_UNIFORMS: u32 = 2;
}

/// Rayhit set bindings
pub mod rayhit {
    /// Vertex storage buffers
    pub const VERTICES: u32 = 0;
    /// Index storage buffers
    pub const INDICES: u32 = 1;
    /// Material uniform buffers
    pub const MATERIALS: u32 = 2;
    /// First texture array; slot `i` lives at `FIRST_TEXTURE + i`
    pub const FIRST_TEXTURE: u32 = 3;
}

/// Raymiss set bindings
pub mod raymiss {
    /// Equirectangular environment map
    pub const ENVIRONMENT: u32 = 0;
}

/// Descriptor types the ray tracing pool serves
const POOL_TYPES: [vk::DescriptorType; 5] = [
    vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
    vk::DescriptorType::STORAGE_IMAGE,
    vk::DescriptorType::UNIFORM_BUFFER,
    vk::DescriptorType::STORAGE_BUFFER,
    vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
];

/// Descriptors of one uploaded primitive
#[derive(Debug, Clone, Copy)]
pub struct PrimitiveBindings {
    /// Vertex storage buffer
    pub vertex: vk::DescriptorBufferInfo,
    /// Index storage buffer
    pub index: vk::DescriptorBufferInfo,
    /// Material uniform buffer
    pub material: vk::DescriptorBufferInfo,
    /// Material textures by [`TextureSlot::index`]
    pub textures: [Option<vk::DescriptorImageInfo>; 4],
}

/// Parallel rayhit arrays ready to be written
#[derive(Debug, Clone)]
pub struct RayHitArrays {
    /// Vertex buffers
    pub vertices: Vec<vk::DescriptorBufferInfo>,
    /// Index buffers
    pub indices: Vec<vk::DescriptorBufferInfo>,
    /// Material blocks
    pub materials: Vec<vk::DescriptorBufferInfo>,
    /// Texture arrays by [`TextureSlot::index`]
    pub textures: [Vec<vk::DescriptorImageInfo>; 4],
}

impl RayHitArrays {
    /// Assemble the arrays in `primitives` order
    ///
    /// Absent textures take `placeholder`. With no primitives every array gets
    /// a single element built from `placeholder` and `fallback_buffer`.
    pub fn assemble(
        primitives: &[PrimitiveBindings],
        placeholder: vk::DescriptorImageInfo,
        fallback_buffer: vk::DescriptorBufferInfo,
    ) -> Self {
        if primitives.is_empty() {
            return Self {
                vertices: vec![fallback_buffer],
                indices: vec![fallback_buffer],
                materials: vec![fallback_buffer],
                textures: std::array::from_fn(|_| vec![placeholder]),
            };
        }

        Self {
            vertices: primitives.iter().map(|p| p.vertex).collect(),
            indices: primitives.iter().map(|p| p.index).collect(),
            materials: primitives.iter().map(|p| p.material).collect(),
            textures: std::array::from_fn(|slot| {
                primitives
                    .iter()
                    .map(|p| p.textures[slot].unwrap_or(placeholder))
                    .collect()
            }),
        }
    }

    /// Elements per array
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    /// Always false; the arrays are padded to at least one element
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }
}

/// Per-type quota large enough for `array_len` primitives and `frames` raygen sets
pub fn effective_quota(configured: u32, array_len: u32, frames: u32) -> u32 {
    let samplers = array_len * TextureSlot::ALL.len() as u32 + 1;
    let storage_buffers = array_len * 2;
    let uniforms = array_len + frames;
    let largest = samplers.max(storage_buffers).max(uniforms);
    let required = largest.div_ceil(POOL_TYPES.len() as u32);
    configured.max(required)
}

/// Everything the sets point at
pub struct DescriptorInputs<'a> {
    /// Top-level acceleration structure
    pub top_level: vk::AccelerationStructureKHR,
    /// Output image in `GENERAL`
    pub output_image: vk::DescriptorImageInfo,
    /// Scene uniform buffer of each frame slot
    pub scene_uniforms: &'a [vk::DescriptorBufferInfo],
    /// Per-primitive arrays
    pub arrays: &'a RayHitArrays,
    /// Environment map
    pub environment: vk::DescriptorImageInfo,
}

/// Layouts, pool and sets for one scene generation
pub struct RayTracingDescriptors {
    raygen_sets: Vec<vk::DescriptorSet>,
    rayhit_set: vk::DescriptorSet,
    raymiss_set: vk::DescriptorSet,
    array_len: u32,
    _pool: DescriptorPool,
    raygen_layout: DescriptorSetLayout,
    rayhit_layout: DescriptorSetLayout,
    raymiss_layout: DescriptorSetLayout,
}

impl RayTracingDescriptors {
    /// Create layouts sized to the arrays, allocate every set and write it
    pub fn new(device: &Arc<Device>, quota_per_type: u32, inputs: &DescriptorInputs<'_>) -> VulkanResult<Self> {
        let array_len = inputs.arrays.len() as u32;
        let frames = inputs.scene_uniforms.len() as u32;
        let hit = vk::ShaderStageFlags::CLOSEST_HIT_KHR;

        let raygen_layout = DescriptorSetLayoutBuilder::new()
            .add_binding(
                raygen::ACCELERATION_STRUCTURE,
                vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
                1,
                vk::ShaderStageFlags::RAYGEN_KHR | hit,
            )
            .add_binding(
                raygen::OUTPUT_IMAGE,
                vk::DescriptorType::STORAGE_IMAGE,
                1,
                vk::ShaderStageFlags::RAYGEN_KHR,
            )
            .add_uniform_buffer(
                raygen::SCENE_UNIFORMS,
                vk::ShaderStageFlags::RAYGEN_KHR | vk::ShaderStageFlags::MISS_KHR | hit,
            )
            .build(device)?;

        let mut rayhit_builder = DescriptorSetLayoutBuilder::new()
            .add_binding(rayhit::VERTICES, vk::DescriptorType::STORAGE_BUFFER, array_len, hit)
            .add_binding(rayhit::INDICES, vk::DescriptorType::STORAGE_BUFFER, array_len, hit)
            .add_binding(rayhit::MATERIALS, vk::DescriptorType::UNIFORM_BUFFER, array_len, hit);
        for slot in TextureSlot::ALL {
            rayhit_builder = rayhit_builder.add_binding(
                rayhit::FIRST_TEXTURE + slot.index() as u32,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                array_len,
                hit,
            );
        }
        let rayhit_layout = rayhit_builder.build(device)?;

        let raymiss_layout = DescriptorSetLayoutBuilder::new()
            .add_combined_image_sampler(raymiss::ENVIRONMENT, vk::ShaderStageFlags::MISS_KHR | hit)
            .build(device)?;

        let quota = effective_quota(quota_per_type, array_len, frames);
        let pool = DescriptorPool::new(Arc::clone(device), quota, &POOL_TYPES, frames + 2)?;

        let raygen_layouts = vec![raygen_layout.handle(); inputs.scene_uniforms.len()];
        let raygen_sets = pool.allocate(&raygen_layouts)?;
        let rayhit_set = pool.allocate_one(rayhit_layout.handle())?;
        let raymiss_set = pool.allocate_one(raymiss_layout.handle())?;

        let mut writer = DescriptorSetWriter::new();
        for (&set, &uniform) in raygen_sets.iter().zip(inputs.scene_uniforms) {
            writer = writer
                .write_acceleration_structure(set, raygen::ACCELERATION_STRUCTURE, inputs.top_level)
                .write_images(
                    set,
                    raygen::OUTPUT_IMAGE,
                    vk::DescriptorType::STORAGE_IMAGE,
                    vec![inputs.output_image],
                )
                .write_uniform_buffer(set, raygen::SCENE_UNIFORMS, uniform);
        }

        let arrays = inputs.arrays;
        writer = writer
            .write_buffers(
                rayhit_set,
                rayhit::VERTICES,
                vk::DescriptorType::STORAGE_BUFFER,
                arrays.vertices.clone(),
            )
            .write_buffers(
                rayhit_set,
                rayhit::INDICES,
                vk::DescriptorType::STORAGE_BUFFER,
                arrays.indices.clone(),
            )
            .write_buffers(
                rayhit_set,
                rayhit::MATERIALS,
                vk::DescriptorType::UNIFORM_BUFFER,
                arrays.materials.clone(),
            );
        for slot in TextureSlot::ALL {
            writer = writer.write_images(
                rayhit_set,
                rayhit::FIRST_TEXTURE + slot.index() as u32,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                arrays.textures[slot.index()].clone(),
            );
        }
        writer = writer.write_images(
            raymiss_set,
            raymiss::ENVIRONMENT,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vec![inputs.environment],
        );
        writer.update(device);

        log::debug!("Wrote ray tracing descriptors ({array_len} primitives, {frames} frame slots)");
        Ok(Self {
            raygen_sets,
            rayhit_set,
            raymiss_set,
            array_len,
            _pool: pool,
            raygen_layout,
            rayhit_layout,
            raymiss_layout,
        })
    }

    /// Point every raygen set at a recreated output image
    pub fn write_output_image(&self, device: &Device, output_image: vk::DescriptorImageInfo) {
        let mut writer = DescriptorSetWriter::new();
        for &set in &self.raygen_sets {
            writer = writer.write_images(
                set,
                raygen::OUTPUT_IMAGE,
                vk::DescriptorType::STORAGE_IMAGE,
                vec![output_image],
            );
        }
        writer.update(device);
    }

    /// Layouts in set order, for the pipeline layout
    pub fn set_layouts(&self) -> [vk::DescriptorSetLayout; 3] {
        [
            self.raygen_layout.handle(),
            self.rayhit_layout.handle(),
            self.raymiss_layout.handle(),
        ]
    }

    /// Sets to bind for a frame slot
    pub fn sets(&self, frame_slot: usize) -> [vk::DescriptorSet; 3] {
        let raygen = self.raygen_sets[frame_slot % self.raygen_sets.len()];
        [raygen, self.rayhit_set, self.raymiss_set]
    }

    /// Elements in each rayhit array
    pub fn array_len(&self) -> u32 {
        self.array_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn buffer(id: u64) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: vk::Buffer::from_raw(id),
            offset: 0,
            range: vk::WHOLE_SIZE,
        }
    }

    fn image(id: u64) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo {
            sampler: vk::Sampler::from_raw(id),
            image_view: vk::ImageView::from_raw(id),
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }

    fn primitive(id: u64, textures: [Option<vk::DescriptorImageInfo>; 4]) -> PrimitiveBindings {
        PrimitiveBindings {
            vertex: buffer(id * 10 + 1),
            index: buffer(id * 10 + 2),
            material: buffer(id * 10 + 3),
            textures,
        }
    }

    #[test]
    fn test_every_array_has_one_element_per_primitive() {
        let placeholder = image(999);
        let primitives = [
            primitive(1, [Some(image(11)), None, None, None]),
            primitive(2, [None, Some(image(22)), Some(image(23)), None]),
            primitive(3, [None, None, None, Some(image(34))]),
        ];
        let arrays = RayHitArrays::assemble(&primitives, placeholder, buffer(0));

        assert_eq!(arrays.len(), 3);
        assert_eq!(arrays.indices.len(), 3);
        assert_eq!(arrays.materials.len(), 3);
        for texture_array in &arrays.textures {
            assert_eq!(texture_array.len(), 3);
        }
    }

    #[test]
    fn test_missing_textures_resolve_to_placeholder() {
        let placeholder = image(999);
        let primitives = [
            primitive(1, [Some(image(11)), None, None, None]),
            primitive(2, [None, None, None, None]),
        ];
        let arrays = RayHitArrays::assemble(&primitives, placeholder, buffer(0));

        let base_color = &arrays.textures[TextureSlot::BaseColor.index()];
        assert_eq!(base_color[0].image_view, image(11).image_view);
        assert_eq!(base_color[1].image_view, placeholder.image_view);
        for slot in [TextureSlot::MetallicRoughness, TextureSlot::Normal, TextureSlot::OcclusionEmissive] {
            assert!(arrays.textures[slot.index()]
                .iter()
                .all(|info| info.image_view == placeholder.image_view));
        }
    }

    #[test]
    fn test_arrays_follow_primitive_order() {
        let primitives = [primitive(4, [None; 4]), primitive(7, [None; 4])];
        let arrays = RayHitArrays::assemble(&primitives, image(999), buffer(0));
        assert_eq!(arrays.vertices[0].buffer, buffer(41).buffer);
        assert_eq!(arrays.vertices[1].buffer, buffer(71).buffer);
        assert_eq!(arrays.indices[1].buffer, buffer(72).buffer);
        assert_eq!(arrays.materials[0].buffer, buffer(43).buffer);
    }

    #[test]
    fn test_empty_scene_pads_each_array_once() {
        let arrays = RayHitArrays::assemble(&[], image(999), buffer(5));
        assert_eq!(arrays.len(), 1);
        assert!(!arrays.is_empty());
        assert_eq!(arrays.vertices[0].buffer, buffer(5).buffer);
        assert!(arrays.textures.iter().all(|t| t.len() == 1 && t[0].image_view == image(999).image_view));
    }

    #[test]
    fn test_quota_grows_for_large_scenes() {
        assert_eq!(effective_quota(64, 1, 2), 64);
        // 4 * 200 + 1 samplers spread over five types
        assert_eq!(effective_quota(64, 200, 2), 161);
    }
}
