//! Vertex input state for the raster pipeline
//!
//! [`Vertex`] interleaves `position.xyz, u` and `normal.xyz, v`, so the
//! raster path reads two `vec4` attributes and the ray tracer reads the same
//! buffer as a storage array without repacking.

use ash::vk;

use crate::scene::Vertex;

/// Vertex input binding and attributes for [`Vertex`]
pub struct VulkanVertexLayout;

impl VulkanVertexLayout {
    /// Single interleaved binding advancing per vertex
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    /// Location 0 is `position.xyz + u`, location 1 is `normal.xyz + v`
    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 2] {
        [
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 0,
                format: vk::Format::R32G32B32A32_SFLOAT,
                offset: 0,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 1,
                format: vk::Format::R32G32B32A32_SFLOAT,
                offset: 16,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attributes_cover_the_whole_vertex() {
        let binding = VulkanVertexLayout::binding_description();
        let attributes = VulkanVertexLayout::attribute_descriptions();
        assert_eq!(binding.stride, 32);
        let last = attributes[attributes.len() - 1];
        assert_eq!(last.offset + 16, binding.stride);
    }
}
