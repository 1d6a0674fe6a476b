//! Forward rasterization strategy
//!
//! Set 0 holds the scene uniforms of a frame slot. Set 1 is per primitive:
//! node transform, material block and base color texture.

use std::path::PathBuf;
use std::sync::Arc;

use ash::vk;

use crate::config::RendererConfig;
use crate::render::frame::{FrameInputs, FrameTarget, GpuContext, RenderStrategy};
use crate::render::gpu_scene::GpuScene;
use crate::render::uniforms::{NodeUniform, SceneUniforms};
use crate::render::vulkan::{
    load_shader, Buffer, DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBuilder, DescriptorSetWriter,
    GraphicsPipeline, VulkanError, VulkanResult,
};
use crate::render::RenderResult;
use crate::scene::{Scene, TextureSlot};

/// Scene uniform binding in set 0
const SCENE_UNIFORMS: u32 = 0;
/// Node uniform binding in set 1
const NODE_UNIFORM: u32 = 0;
/// Material uniform binding in set 1
const MATERIAL_UNIFORM: u32 = 1;
/// Base color texture binding in set 1
const BASE_COLOR: u32 = 2;

const POOL_TYPES: [vk::DescriptorType; 2] = [
    vk::DescriptorType::UNIFORM_BUFFER,
    vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
];

/// Full-extent viewport with the standard depth range
pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

/// Per-type quota covering two uniform blocks and one sampler per primitive
pub fn primitive_pool_quota(configured: u32, primitive_count: u32) -> u32 {
    configured.max(primitive_count)
}

/// Render pass and color format a pipeline was built against
pub type PassTarget = (vk::RenderPass, vk::Format);

/// Whether a pipeline built for `built_for` cannot be used inside `current`
///
/// The format is compared as well since a destroyed render pass handle may
/// be handed out again by the driver.
pub fn pipeline_outdated(built_for: PassTarget, current: PassTarget) -> bool {
    built_for != current
}

/// Descriptor sets and node buffers for one scene generation
struct RasterScene {
    primitive_sets: Vec<vk::DescriptorSet>,
    _pool: DescriptorPool,
    _node_buffers: Vec<Buffer>,
    gpu_scene: GpuScene,
}

/// Resources that live from prepare to cleanup
struct RasterState {
    scene: Option<RasterScene>,
    pipeline: GraphicsPipeline,
    pass_target: PassTarget,
    scene_sets: Vec<vk::DescriptorSet>,
    _scene_pool: DescriptorPool,
    scene_uniforms: Vec<Buffer>,
    primitive_layout: DescriptorSetLayout,
    scene_layout: DescriptorSetLayout,
}

/// [`RenderStrategy`] drawing every primitive inside the frame render pass
pub struct RasterStrategy {
    shader_dir: PathBuf,
    quota_per_type: u32,
    state: Option<RasterState>,
}

impl RasterStrategy {
    /// Strategy loading `raster.vert` and `raster.frag` SPIR-V from `shader_dir`
    pub fn new(shader_dir: impl Into<PathBuf>, config: &RendererConfig) -> Self {
        Self {
            shader_dir: shader_dir.into(),
            quota_per_type: config.descriptor_quota_per_type,
            state: None,
        }
    }

    fn build_pipeline(
        &self,
        gpu: &GpuContext,
        scene_layout: &DescriptorSetLayout,
        primitive_layout: &DescriptorSetLayout,
    ) -> VulkanResult<GraphicsPipeline> {
        let device = &gpu.device;
        let vertex = load_shader(device, self.shader_dir.join("raster.vert.spv"), vk::ShaderStageFlags::VERTEX)?;
        let fragment = load_shader(device, self.shader_dir.join("raster.frag.spv"), vk::ShaderStageFlags::FRAGMENT)?;
        GraphicsPipeline::new(
            Arc::clone(device),
            gpu.render_pass,
            &vertex,
            &fragment,
            &[scene_layout.handle(), primitive_layout.handle()],
            gpu.pipeline_cache,
        )
    }

    fn build_scene(&self, gpu: &GpuContext, state: &RasterState, scene: &Scene) -> VulkanResult<RasterScene> {
        let device = &gpu.device;
        let gpu_scene = GpuScene::upload(device, scene, false)?;
        let count = gpu_scene.primitives().len() as u32;

        let pool = DescriptorPool::new(
            Arc::clone(device),
            primitive_pool_quota(self.quota_per_type, count),
            &POOL_TYPES,
            count,
        )?;
        let layouts = vec![state.primitive_layout.handle(); count as usize];
        let primitive_sets = if layouts.is_empty() {
            Vec::new()
        } else {
            pool.allocate(&layouts)?
        };

        let mut node_buffers = Vec::with_capacity(count as usize);
        let mut writer = DescriptorSetWriter::new();
        for (primitive, &set) in gpu_scene.primitives().iter().zip(&primitive_sets) {
            let node = NodeUniform::new(&primitive.transform);
            let node_buffer = device.create_buffer(
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                std::mem::size_of::<NodeUniform>() as vk::DeviceSize,
                Some(bytemuck::bytes_of(&node)),
            )?;
            let base_color = primitive
                .texture(TextureSlot::BaseColor)
                .unwrap_or_else(|| gpu_scene.placeholder());
            writer = writer
                .write_uniform_buffer(set, NODE_UNIFORM, node_buffer.descriptor())
                .write_uniform_buffer(set, MATERIAL_UNIFORM, primitive.material_buffer.descriptor())
                .write_images(
                    set,
                    BASE_COLOR,
                    vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    vec![base_color.descriptor()],
                );
            node_buffers.push(node_buffer);
        }
        writer.update(device);

        log::info!("Built raster resources for {count} primitives");
        Ok(RasterScene {
            primitive_sets,
            _pool: pool,
            _node_buffers: node_buffers,
            gpu_scene,
        })
    }
}

fn not_prepared() -> VulkanError {
    VulkanError::InvalidOperation {
        reason: "raster strategy used before prepare".to_string(),
    }
}

impl RenderStrategy<GpuContext> for RasterStrategy {
    fn name(&self) -> &'static str {
        "raster"
    }

    fn color_load_op(&self) -> vk::AttachmentLoadOp {
        vk::AttachmentLoadOp::CLEAR
    }

    fn on_prepare(&mut self, gpu: &GpuContext, scene: &Scene) -> RenderResult<()> {
        let device = &gpu.device;
        let frames = gpu.frames_in_flight as u32;

        let scene_layout = DescriptorSetLayoutBuilder::new()
            .add_uniform_buffer(
                SCENE_UNIFORMS,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            )
            .build(device)?;
        let primitive_layout = DescriptorSetLayoutBuilder::new()
            .add_uniform_buffer(NODE_UNIFORM, vk::ShaderStageFlags::VERTEX)
            .add_uniform_buffer(MATERIAL_UNIFORM, vk::ShaderStageFlags::FRAGMENT)
            .add_combined_image_sampler(BASE_COLOR, vk::ShaderStageFlags::FRAGMENT)
            .build(device)?;

        let scene_uniforms = (0..frames)
            .map(|_| {
                Buffer::new(
                    Arc::clone(device),
                    std::mem::size_of::<SceneUniforms>() as vk::DeviceSize,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                    vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                )
            })
            .collect::<VulkanResult<Vec<_>>>()?;
        let scene_pool = DescriptorPool::new(Arc::clone(device), self.quota_per_type, &POOL_TYPES, frames)?;
        let scene_sets = scene_pool.allocate(&vec![scene_layout.handle(); frames as usize])?;
        let mut writer = DescriptorSetWriter::new();
        for (&set, buffer) in scene_sets.iter().zip(&scene_uniforms) {
            writer = writer.write_uniform_buffer(set, SCENE_UNIFORMS, buffer.descriptor());
        }
        writer.update(device);

        let pipeline = self.build_pipeline(gpu, &scene_layout, &primitive_layout)?;

        self.state = Some(RasterState {
            scene: None,
            pipeline,
            pass_target: (gpu.render_pass, gpu.color_format),
            scene_sets,
            _scene_pool: scene_pool,
            scene_uniforms,
            primitive_layout,
            scene_layout,
        });
        self.on_scene_changed(gpu, scene)
    }

    fn on_surface_recreated(&mut self, gpu: &GpuContext) -> RenderResult<()> {
        let state = self.state.as_ref().ok_or_else(not_prepared)?;
        let current = (gpu.render_pass, gpu.color_format);
        if !pipeline_outdated(state.pass_target, current) {
            return Ok(());
        }
        let pipeline = self.build_pipeline(gpu, &state.scene_layout, &state.primitive_layout)?;
        if let Some(state) = self.state.as_mut() {
            state.pipeline = pipeline;
            state.pass_target = current;
        }
        log::info!("Rebuilt raster pipeline for the new render pass");
        Ok(())
    }

    fn on_scene_changed(&mut self, gpu: &GpuContext, scene: &Scene) -> RenderResult<()> {
        let state = self.state.as_ref().ok_or_else(not_prepared)?;
        let built = self.build_scene(gpu, state, scene)?;
        if let Some(state) = self.state.as_mut() {
            state.scene = Some(built);
        }
        Ok(())
    }

    fn update_uniforms(&mut self, _gpu: &GpuContext, frame_slot: usize, inputs: &FrameInputs<'_>) -> RenderResult<()> {
        let state = self.state.as_mut().ok_or_else(not_prepared)?;
        let uniforms = SceneUniforms::new(inputs.camera, inputs.aspect, inputs.lights, inputs.frame);
        let slot = frame_slot % state.scene_uniforms.len().max(1);
        if let Some(buffer) = state.scene_uniforms.get_mut(slot) {
            buffer.upload(bytemuck::bytes_of(&uniforms))?;
        }
        Ok(())
    }

    fn record_scene_commands(&mut self, _gpu: &GpuContext, _target: &FrameTarget) -> RenderResult<()> {
        Ok(())
    }

    fn record_pass_commands(&mut self, gpu: &GpuContext, target: &FrameTarget) -> RenderResult<()> {
        let state = self.state.as_ref().ok_or_else(not_prepared)?;
        let Some(scene) = &state.scene else {
            return Ok(());
        };
        let raw = gpu.device.raw();
        let command_buffer = target.command_buffer;
        let scene_set = state.scene_sets[target.frame_slot % state.scene_sets.len()];
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: target.extent,
        };

        unsafe {
            raw.cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, state.pipeline.handle());
            raw.cmd_set_viewport(command_buffer, 0, &[full_viewport(target.extent)]);
            raw.cmd_set_scissor(command_buffer, 0, &[scissor]);
            raw.cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                state.pipeline.layout(),
                0,
                &[scene_set],
                &[],
            );
            for (primitive, &set) in scene.gpu_scene.primitives().iter().zip(&scene.primitive_sets) {
                raw.cmd_bind_descriptor_sets(
                    command_buffer,
                    vk::PipelineBindPoint::GRAPHICS,
                    state.pipeline.layout(),
                    1,
                    &[set],
                    &[],
                );
                raw.cmd_bind_vertex_buffers(command_buffer, 0, &[primitive.vertex_buffer.handle()], &[0]);
                raw.cmd_bind_index_buffer(command_buffer, primitive.index_buffer.handle(), 0, vk::IndexType::UINT32);
                raw.cmd_draw_indexed(command_buffer, primitive.index_count, 1, 0, 0, 0);
            }
        }
        Ok(())
    }

    fn on_cleanup(&mut self, _gpu: &GpuContext) {
        if self.state.take().is_some() {
            log::debug!("Released raster resources");
        }
    }
}
