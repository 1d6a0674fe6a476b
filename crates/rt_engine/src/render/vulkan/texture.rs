//! Images: sampled textures and the ray tracing storage image
//!
//! Every image tracks the layout its last recorded barrier left it in.
//! Descriptor writes read that layout, so a texture is only bound once it
//! is `SHADER_READ_ONLY_OPTIMAL`.

use std::sync::Arc;

use ash::vk;

use super::buffer::Buffer;
use super::commands::{color_subresource_range, record_image_transition};
use super::device::Device;
use super::{VulkanError, VulkanResult};
use crate::assets::{ImageData, PixelFormat};

/// Vulkan format for decoded pixel data
pub const fn vk_format(format: PixelFormat) -> vk::Format {
    match format {
        PixelFormat::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
        PixelFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        PixelFormat::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
    }
}

/// Image, memory and view allocated together
pub struct Image {
    device: Arc<Device>,
    handle: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    format: vk::Format,
    extent: vk::Extent2D,
    aspect: vk::ImageAspectFlags,
    layout: vk::ImageLayout,
}

impl Image {
    /// Create a device-local 2D image with one mip level and a matching view
    pub fn new(
        device: Arc<Device>,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
    ) -> VulkanResult<Self> {
        let raw = device.raw();
        let create_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);
        let handle = unsafe { raw.create_image(&create_info, None).map_err(VulkanError::Api)? };

        let requirements = unsafe { raw.get_image_memory_requirements(handle) };
        let memory = device
            .resolve_memory_type(requirements.memory_type_bits, vk::MemoryPropertyFlags::DEVICE_LOCAL)
            .and_then(|memory_type_index| {
                let alloc_info = vk::MemoryAllocateInfo::builder()
                    .allocation_size(requirements.size)
                    .memory_type_index(memory_type_index);
                unsafe { raw.allocate_memory(&alloc_info, None).map_err(VulkanError::Api) }
            });
        let memory = match memory {
            Ok(memory) => memory,
            Err(error) => {
                unsafe { raw.destroy_image(handle, None) };
                return Err(error);
            }
        };

        let mut image = Self {
            device: Arc::clone(&device),
            handle,
            memory,
            view: vk::ImageView::null(),
            format,
            extent,
            aspect,
            layout: vk::ImageLayout::UNDEFINED,
        };
        unsafe {
            raw.bind_image_memory(handle, memory, 0).map_err(VulkanError::Api)?;
        }

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(handle)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        image.view = unsafe { raw.create_image_view(&view_info, None).map_err(VulkanError::Api)? };
        Ok(image)
    }

    /// Record a transition to `new` and remember it as the current layout
    pub fn record_transition(&mut self, command_buffer: vk::CommandBuffer, new: vk::ImageLayout) {
        let range = vk::ImageSubresourceRange {
            aspect_mask: self.aspect,
            ..color_subresource_range(1)
        };
        record_image_transition(self.device.raw(), command_buffer, self.handle, range, self.layout, new);
        self.layout = new;
    }

    /// Image handle
    pub fn handle(&self) -> vk::Image {
        self.handle
    }

    /// View handle
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Pixel format
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Size in pixels
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Layout left by the last recorded transition
    pub fn layout(&self) -> vk::ImageLayout {
        self.layout
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            let raw = self.device.raw();
            if self.view != vk::ImageView::null() {
                raw.destroy_image_view(self.view, None);
            }
            raw.destroy_image(self.handle, None);
            raw.free_memory(self.memory, None);
        }
    }
}

/// Sampled texture with RAII cleanup
pub struct Texture {
    image: Image,
    sampler: vk::Sampler,
}

impl Texture {
    /// Upload decoded pixels through a staging buffer and leave the image shader-readable
    pub fn from_image_data(device: &Arc<Device>, data: &ImageData) -> VulkanResult<Self> {
        let expected = data.width as usize * data.height as usize * data.format.bytes_per_pixel();
        if data.width == 0 || data.height == 0 || data.data.len() != expected {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "image data holds {} bytes, expected {expected} for {}x{}",
                    data.data.len(),
                    data.width,
                    data.height
                ),
            });
        }

        let staging = device.create_buffer(
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            data.data.len() as vk::DeviceSize,
            Some(&data.data),
        )?;

        let extent = vk::Extent2D {
            width: data.width,
            height: data.height,
        };
        let mut image = Image::new(
            Arc::clone(device),
            extent,
            vk_format(data.format),
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            vk::ImageAspectFlags::COLOR,
        )?;

        let command_buffer = device.begin_one_shot()?;
        image.record_transition(command_buffer, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        Self::record_copy(device, command_buffer, &staging, &image);
        image.record_transition(command_buffer, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        device.submit_and_wait(command_buffer, device.queues().graphics, true)?;

        let sampler = Self::create_sampler(device)?;
        log::debug!("Uploaded {}x{} texture ({:?})", data.width, data.height, data.format);
        Ok(Self { image, sampler })
    }

    /// 1x1 white texture bound wherever a material has no texture
    pub fn placeholder(device: &Arc<Device>) -> VulkanResult<Self> {
        Self::from_image_data(device, &ImageData::solid([255, 255, 255, 255]))
    }

    fn record_copy(device: &Device, command_buffer: vk::CommandBuffer, staging: &Buffer, image: &Image) {
        let region = vk::BufferImageCopy::builder()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_offset(vk::Offset3D::default())
            .image_extent(vk::Extent3D {
                width: image.extent.width,
                height: image.extent.height,
                depth: 1,
            })
            .build();
        unsafe {
            device.raw().cmd_copy_buffer_to_image(
                command_buffer,
                staging.handle(),
                image.handle(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
    }

    fn create_sampler(device: &Device) -> VulkanResult<vk::Sampler> {
        let max_anisotropy = device.physical().properties.limits.max_sampler_anisotropy.min(16.0);
        let create_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(true)
            .max_anisotropy(max_anisotropy)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .min_lod(0.0)
            .max_lod(0.0);
        unsafe { device.raw().create_sampler(&create_info, None).map_err(VulkanError::Api) }
    }

    /// Combined image sampler descriptor
    pub fn descriptor(&self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo {
            sampler: self.sampler,
            image_view: self.image.view(),
            image_layout: self.image.layout(),
        }
    }

    /// Underlying image
    pub fn image(&self) -> &Image {
        &self.image
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        unsafe { self.image.device.raw().destroy_sampler(self.sampler, None) };
    }
}

/// Format of the ray tracing output; matches the `rgba8` qualifier in the raygen shader
pub const STORAGE_OUTPUT_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Check that the output can be written by shaders and blitted onto a
/// `target_format` swapchain image
pub fn check_output_formats(
    storage_features: vk::FormatFeatureFlags,
    target_format: vk::Format,
    target_features: vk::FormatFeatureFlags,
) -> VulkanResult<()> {
    let storage_needs = vk::FormatFeatureFlags::STORAGE_IMAGE | vk::FormatFeatureFlags::BLIT_SRC;
    if !storage_features.contains(storage_needs) {
        return Err(VulkanError::InitializationFailed(format!(
            "{STORAGE_OUTPUT_FORMAT:?} lacks {:?} for the ray tracing output",
            storage_needs & !storage_features
        )));
    }
    if !target_features.contains(vk::FormatFeatureFlags::BLIT_DST) {
        return Err(VulkanError::InitializationFailed(format!(
            "Swapchain format {target_format:?} cannot be a blit destination"
        )));
    }
    Ok(())
}

/// Ray tracing output image, blitted onto the swapchain every frame
pub struct StorageImage {
    image: Image,
}

impl StorageImage {
    /// Create the output image and move it to `GENERAL`
    ///
    /// Fails when the device cannot blit it onto a `target_format` image.
    pub fn new(device: &Arc<Device>, extent: vk::Extent2D, target_format: vk::Format) -> VulkanResult<Self> {
        check_output_formats(
            device.format_features(STORAGE_OUTPUT_FORMAT),
            target_format,
            device.format_features(target_format),
        )?;
        let format = STORAGE_OUTPUT_FORMAT;
        let mut image = Image::new(
            Arc::clone(device),
            extent,
            format,
            vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::TRANSFER_SRC,
            vk::ImageAspectFlags::COLOR,
        )?;
        let command_buffer = device.begin_one_shot()?;
        image.record_transition(command_buffer, vk::ImageLayout::GENERAL);
        device.submit_and_wait(command_buffer, device.queues().graphics, true)?;
        log::debug!("Created {}x{} storage image ({format:?})", extent.width, extent.height);
        Ok(Self { image })
    }

    /// Storage image descriptor
    pub fn descriptor(&self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo {
            sampler: vk::Sampler::null(),
            image_view: self.image.view(),
            image_layout: vk::ImageLayout::GENERAL,
        }
    }

    /// Underlying image
    pub fn image(&self) -> &Image {
        &self.image
    }

    /// Underlying image, for recording transitions
    pub fn image_mut(&mut self) -> &mut Image {
        &mut self.image
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_formats_map_to_vulkan_formats() {
        assert_eq!(vk_format(PixelFormat::Rgba8Srgb), vk::Format::R8G8B8A8_SRGB);
        assert_eq!(vk_format(PixelFormat::Rgba8Unorm), vk::Format::R8G8B8A8_UNORM);
        assert_eq!(vk_format(PixelFormat::Rgba32Float), vk::Format::R32G32B32A32_SFLOAT);
    }

    #[test]
    fn test_output_without_storage_support_is_rejected() {
        let blit_dst = vk::FormatFeatureFlags::BLIT_DST;
        let missing_storage = check_output_formats(vk::FormatFeatureFlags::BLIT_SRC, vk::Format::B8G8R8A8_UNORM, blit_dst);
        assert!(matches!(
            missing_storage,
            Err(VulkanError::InitializationFailed(message)) if message.contains("STORAGE_IMAGE")
        ));
    }

    #[test]
    fn test_target_must_accept_blits() {
        let storage = vk::FormatFeatureFlags::STORAGE_IMAGE | vk::FormatFeatureFlags::BLIT_SRC;
        assert!(check_output_formats(storage, vk::Format::B8G8R8A8_SRGB, vk::FormatFeatureFlags::empty()).is_err());
        assert!(check_output_formats(storage, vk::Format::B8G8R8A8_SRGB, vk::FormatFeatureFlags::BLIT_DST).is_ok());
    }
}
