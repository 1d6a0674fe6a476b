//! SPIR-V loading and the raster graphics pipeline

use std::ffi::CStr;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use ash::vk;

use super::device::Device;
use super::vertex_layout::VulkanVertexLayout;
use super::{VulkanError, VulkanResult};

/// Entry point every shader in the engine uses
pub const ENTRY_POINT: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };

/// Decode a SPIR-V blob into words, rejecting truncated or mis-tagged data
pub fn decode_spirv(bytes: &[u8]) -> VulkanResult<Vec<u32>> {
    ash::util::read_spv(&mut Cursor::new(bytes))
        .map_err(|error| VulkanError::InitializationFailed(format!("Invalid SPIR-V: {error}")))
}

/// Shader module wrapper with RAII cleanup
pub struct ShaderModule {
    device: Arc<Device>,
    handle: vk::ShaderModule,
}

impl ShaderModule {
    /// Create a module from SPIR-V bytes
    pub fn from_bytes(device: Arc<Device>, bytes: &[u8]) -> VulkanResult<Self> {
        let code = decode_spirv(bytes)?;
        let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);
        let handle = unsafe {
            device
                .raw()
                .create_shader_module(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        Ok(Self { device, handle })
    }

    /// Load a module from a SPIR-V file
    pub fn from_file(device: Arc<Device>, path: impl AsRef<Path>) -> VulkanResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|error| {
            VulkanError::InitializationFailed(format!("Failed to read shader {}: {error}", path.display()))
        })?;
        let module = Self::from_bytes(device, &bytes)?;
        log::debug!("Loaded shader {}", path.display());
        Ok(module)
    }

    /// Module handle
    pub fn handle(&self) -> vk::ShaderModule {
        self.handle
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_shader_module(self.handle, None) };
    }
}

/// A loaded shader paired with the stage it runs in
pub struct ShaderStage {
    module: ShaderModule,
    stage: vk::ShaderStageFlags,
}

impl ShaderStage {
    /// Stage create info; valid while `self` lives
    pub fn create_info(&self) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(self.stage)
            .module(self.module.handle())
            .name(ENTRY_POINT)
            .build()
    }

    /// Pipeline stage
    pub fn stage(&self) -> vk::ShaderStageFlags {
        self.stage
    }
}

/// Read a precompiled shader and wrap it for pipeline creation
pub fn load_shader(device: &Arc<Device>, path: impl AsRef<Path>, stage: vk::ShaderStageFlags) -> VulkanResult<ShaderStage> {
    Ok(ShaderStage {
        module: ShaderModule::from_file(Arc::clone(device), path)?,
        stage,
    })
}

/// Create a pipeline layout over `set_layouts`
pub fn create_pipeline_layout(
    device: &Device,
    set_layouts: &[vk::DescriptorSetLayout],
    push_constants: &[vk::PushConstantRange],
) -> VulkanResult<vk::PipelineLayout> {
    let create_info = vk::PipelineLayoutCreateInfo::builder()
        .set_layouts(set_layouts)
        .push_constant_ranges(push_constants);
    unsafe { device.raw().create_pipeline_layout(&create_info, None).map_err(VulkanError::Api) }
}

/// Graphics pipeline wrapper with RAII cleanup
///
/// Viewport and scissor are dynamic, so the pipeline survives swapchain
/// recreation.
pub struct GraphicsPipeline {
    device: Arc<Device>,
    handle: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl GraphicsPipeline {
    /// Create an opaque, depth-tested triangle pipeline over [`crate::scene::Vertex`]
    pub fn new(
        device: Arc<Device>,
        render_pass: vk::RenderPass,
        vertex: &ShaderStage,
        fragment: &ShaderStage,
        set_layouts: &[vk::DescriptorSetLayout],
        cache: vk::PipelineCache,
    ) -> VulkanResult<Self> {
        let stages = [vertex.create_info(), fragment.create_info()];

        let bindings = [VulkanVertexLayout::binding_description()];
        let attributes = VulkanVertexLayout::attribute_descriptions();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
            .build()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let layout = create_pipeline_layout(&device, set_layouts, &[])?;

        let create_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0)
            .build();

        let pipelines = unsafe { device.raw().create_graphics_pipelines(cache, &[create_info], None) };
        let handle = match pipelines {
            Ok(pipelines) => pipelines.into_iter().next(),
            Err((_, error)) => {
                unsafe { device.raw().destroy_pipeline_layout(layout, None) };
                return Err(VulkanError::Api(error));
            }
        };
        let Some(handle) = handle else {
            unsafe { device.raw().destroy_pipeline_layout(layout, None) };
            return Err(VulkanError::InvalidOperation {
                reason: "driver returned no graphics pipeline".to_string(),
            });
        };

        log::debug!("Created raster graphics pipeline");
        Ok(Self { device, handle, layout })
    }

    /// Pipeline handle
    pub fn handle(&self) -> vk::Pipeline {
        self.handle
    }

    /// Layout handle
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.raw().destroy_pipeline(self.handle, None);
            self.device.raw().destroy_pipeline_layout(self.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncated_spirv_is_rejected() {
        assert!(decode_spirv(&[0x03, 0x02, 0x23]).is_err());
    }

    #[test]
    fn test_spirv_words_are_decoded() {
        let magic = 0x0723_0203u32.to_le_bytes();
        let mut bytes = magic.to_vec();
        bytes.extend_from_slice(&7u32.to_le_bytes());
        assert_eq!(decode_spirv(&bytes).unwrap(), vec![0x0723_0203, 7]);
    }

    #[test]
    fn test_entry_point_is_main() {
        assert_eq!(ENTRY_POINT.to_str().unwrap(), "main");
    }
}
