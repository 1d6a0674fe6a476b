//! Device-side copy of the scene's geometry, materials and textures
//!
//! Primitives are uploaded in [`Scene::primitives`] order, so
//! `primitives()[k]` is the primitive every other consumer calls `k`.

use std::sync::Arc;

use ash::vk;

use super::uniforms::MaterialUniform;
use super::vulkan::texture::Texture;
use super::vulkan::{Buffer, Device, VulkanError, VulkanResult};
use crate::assets::ImageData;
use crate::foundation::math::Mat4;
use crate::scene::{PrimitiveRef, Scene, TextureSlot, Vertex};

/// Sky color used when the scene has no environment map
const DEFAULT_SKY: [f32; 4] = [0.35, 0.45, 0.6, 1.0];

/// Size of the buffer bound into padded descriptor slots
const FALLBACK_BUFFER_SIZE: vk::DeviceSize = 256;

/// Extra usage flags geometry buffers need when the device traces rays
pub fn ray_tracing_geometry_usage(ray_tracing: bool) -> vk::BufferUsageFlags {
    if ray_tracing {
        vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
            | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
    } else {
        vk::BufferUsageFlags::empty()
    }
}

/// Copy `bytes` into a new device-local buffer through a staging buffer
pub fn upload_device_local(
    device: &Arc<Device>,
    usage: vk::BufferUsageFlags,
    bytes: &[u8],
) -> VulkanResult<Buffer> {
    let size = bytes.len() as vk::DeviceSize;
    let staging = device.create_buffer(
        vk::BufferUsageFlags::TRANSFER_SRC,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        size,
        Some(bytes),
    )?;
    let buffer = Buffer::new(
        Arc::clone(device),
        size,
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;

    let command_buffer = device.begin_one_shot()?;
    let region = vk::BufferCopy {
        src_offset: 0,
        dst_offset: 0,
        size,
    };
    unsafe {
        device
            .raw()
            .cmd_copy_buffer(command_buffer, staging.handle(), buffer.handle(), &[region]);
    }
    device.submit_and_wait(command_buffer, device.queues().graphics, true)?;
    Ok(buffer)
}

/// One uploaded primitive
pub struct GpuPrimitive {
    /// Interleaved [`Vertex`] data
    pub vertex_buffer: Buffer,
    /// `u32` triangle list
    pub index_buffer: Buffer,
    /// [`MaterialUniform`] block
    pub material_buffer: Buffer,
    /// Material textures by [`TextureSlot::index`]
    pub textures: [Option<Texture>; 4],
    /// Number of vertices
    pub vertex_count: u32,
    /// Number of indices
    pub index_count: u32,
    /// Owning node's model-to-world transform
    pub transform: Mat4,
}

impl GpuPrimitive {
    fn upload(device: &Arc<Device>, primitive: &PrimitiveRef<'_>, ray_tracing: bool) -> VulkanResult<Self> {
        let data = primitive.primitive;
        if data.vertices.is_empty() || data.indices.is_empty() {
            return Err(VulkanError::InvalidOperation {
                reason: format!("primitive {} has no triangles", primitive.index),
            });
        }

        let extra = ray_tracing_geometry_usage(ray_tracing);
        let vertex_buffer = upload_device_local(
            device,
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::STORAGE_BUFFER | extra,
            bytemuck::cast_slice::<Vertex, u8>(&data.vertices),
        )?;
        let index_buffer = upload_device_local(
            device,
            vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::STORAGE_BUFFER | extra,
            bytemuck::cast_slice::<u32, u8>(&data.indices),
        )?;

        let material = MaterialUniform::from(&data.material);
        let material_buffer = device.create_buffer(
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            std::mem::size_of::<MaterialUniform>() as vk::DeviceSize,
            Some(bytemuck::bytes_of(&material)),
        )?;

        let mut textures: [Option<Texture>; 4] = [None, None, None, None];
        for slot in TextureSlot::ALL {
            if let Some(image) = data.material.texture(slot) {
                textures[slot.index()] = Some(Texture::from_image_data(device, image)?);
            }
        }

        Ok(Self {
            vertex_buffer,
            index_buffer,
            material_buffer,
            textures,
            vertex_count: data.vertices.len() as u32,
            index_count: data.indices.len() as u32,
            transform: *primitive.transform,
        })
    }

    /// Texture for a slot, if the material has one
    pub fn texture(&self, slot: TextureSlot) -> Option<&Texture> {
        self.textures[slot.index()].as_ref()
    }
}

/// All device resources derived from one [`Scene`] generation
pub struct GpuScene {
    primitives: Vec<GpuPrimitive>,
    placeholder: Texture,
    environment: Texture,
    fallback_buffer: Buffer,
    generation: u64,
}

impl GpuScene {
    /// Upload every primitive plus the environment map
    ///
    /// With `ray_tracing` the geometry buffers are device-addressable and
    /// usable as acceleration structure build input.
    pub fn upload(device: &Arc<Device>, scene: &Scene, ray_tracing: bool) -> VulkanResult<Self> {
        let primitives = scene
            .primitives()
            .map(|primitive| GpuPrimitive::upload(device, &primitive, ray_tracing))
            .collect::<VulkanResult<Vec<_>>>()?;

        let placeholder = Texture::placeholder(device)?;
        let environment = match scene.environment() {
            Some(image) => Texture::from_image_data(device, image)?,
            None => Texture::from_image_data(device, &ImageData::solid_float(DEFAULT_SKY))?,
        };
        let fallback_buffer = device.create_buffer(
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            FALLBACK_BUFFER_SIZE,
            Some(&[0u8; FALLBACK_BUFFER_SIZE as usize]),
        )?;

        log::info!(
            "Uploaded scene generation {} ({} primitives)",
            scene.generation(),
            primitives.len()
        );
        Ok(Self {
            primitives,
            placeholder,
            environment,
            fallback_buffer,
            generation: scene.generation(),
        })
    }

    /// Uploaded primitives in traversal order
    pub fn primitives(&self) -> &[GpuPrimitive] {
        &self.primitives
    }

    /// Texture bound wherever a material lacks one
    pub fn placeholder(&self) -> &Texture {
        &self.placeholder
    }

    /// Environment map, or a flat sky
    pub fn environment(&self) -> &Texture {
        &self.environment
    }

    /// Small zeroed buffer bound into otherwise empty array slots
    pub fn fallback_buffer(&self) -> &Buffer {
        &self.fallback_buffer
    }

    /// Scene generation this upload reflects
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ray_tracing_adds_address_and_build_input_usage() {
        let usage = ray_tracing_geometry_usage(true);
        assert!(usage.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS));
        assert!(usage.contains(vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR));
        assert!(ray_tracing_geometry_usage(false).is_empty());
    }
}
