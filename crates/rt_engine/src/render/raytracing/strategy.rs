//! Ray tracing strategy: trace into a storage image, blit it onto the swapchain
//!
//! Scene resources (geometry, acceleration structures, descriptors, pipeline
//! and binding table) are built together into a new set and only replace
//! the current set once every step has succeeded.

use std::path::PathBuf;
use std::sync::Arc;

use ash::vk;

use super::acceleration::{AccelerationStructureBuilder, PrimitiveGeometry, SceneAccelerationStructures};
use super::capability::{BuiltStructure, TriangleGeometry, VulkanAccelerationStructure, VulkanRayTracing};
use super::descriptors::{DescriptorInputs, PrimitiveBindings, RayHitArrays, RayTracingDescriptors};
use super::pipeline::{RayTracingPipeline, RayTracingShaders};
use super::sbt::ShaderBindingTable;
use crate::config::RendererConfig;
use crate::render::frame::{FrameInputs, FrameTarget, GpuContext, RenderStrategy};
use crate::render::gpu_scene::{GpuPrimitive, GpuScene};
use crate::render::uniforms::SceneUniforms;
use crate::render::vulkan::commands::{color_subresource_range, record_image_transition};
use crate::render::vulkan::texture::Texture;
use crate::render::vulkan::{load_shader, Buffer, Device, StorageImage, VulkanError, VulkanResult};
use crate::render::RenderResult;
use crate::scene::{Scene, Vertex};

/// Background written when no scene resources exist
const EMPTY_CLEAR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// Everything derived from one scene generation; fields drop top to bottom
struct SceneResources {
    sbt: ShaderBindingTable,
    pipeline: RayTracingPipeline,
    descriptors: RayTracingDescriptors,
    _acceleration: SceneAccelerationStructures<VulkanAccelerationStructure>,
    _gpu_scene: GpuScene,
}

/// Resources that live from prepare to cleanup
struct PreparedState {
    scene: Option<SceneResources>,
    output: StorageImage,
    scene_uniforms: Vec<Buffer>,
    shaders: RayTracingShaders,
    ray_tracing: VulkanRayTracing,
}

/// [`RenderStrategy`] tracing the scene with `VK_KHR_ray_tracing_pipeline`
pub struct RayTracingStrategy {
    shader_dir: PathBuf,
    quota_per_type: u32,
    max_recursion_depth: u32,
    state: Option<PreparedState>,
}

impl RayTracingStrategy {
    /// Strategy loading `raygen`, `miss` and `closesthit` SPIR-V from `shader_dir`
    pub fn new(shader_dir: impl Into<PathBuf>, config: &RendererConfig) -> Self {
        Self {
            shader_dir: shader_dir.into(),
            quota_per_type: config.descriptor_quota_per_type,
            max_recursion_depth: config.max_ray_recursion_depth,
            state: None,
        }
    }

    fn load_shaders(&self, device: &Arc<Device>) -> VulkanResult<RayTracingShaders> {
        Ok(RayTracingShaders {
            raygen: load_shader(
                device,
                self.shader_dir.join("raygen.rgen.spv"),
                vk::ShaderStageFlags::RAYGEN_KHR,
            )?,
            miss: load_shader(
                device,
                self.shader_dir.join("miss.rmiss.spv"),
                vk::ShaderStageFlags::MISS_KHR,
            )?,
            closest_hit: load_shader(
                device,
                self.shader_dir.join("closesthit.rchit.spv"),
                vk::ShaderStageFlags::CLOSEST_HIT_KHR,
            )?,
        })
    }

    fn state(&self) -> VulkanResult<&PreparedState> {
        self.state.as_ref().ok_or_else(not_prepared)
    }

    /// Build a complete resource set for `scene` without touching the current one
    fn build_scene(&self, gpu: &GpuContext, scene: &Scene) -> RenderResult<SceneResources> {
        let state = self.state()?;
        let device = &gpu.device;

        let gpu_scene = GpuScene::upload(device, scene, true)?;
        let geometry = primitive_geometry(&gpu_scene)?;
        let acceleration = AccelerationStructureBuilder::new(&state.ray_tracing).build(&geometry)?;

        let bindings: Vec<PrimitiveBindings> = gpu_scene.primitives().iter().map(primitive_bindings).collect();
        let arrays = RayHitArrays::assemble(
            &bindings,
            gpu_scene.placeholder().descriptor(),
            gpu_scene.fallback_buffer().descriptor(),
        );
        let scene_uniforms: Vec<vk::DescriptorBufferInfo> = state.scene_uniforms.iter().map(Buffer::descriptor).collect();
        let descriptors = RayTracingDescriptors::new(
            device,
            self.quota_per_type,
            &DescriptorInputs {
                top_level: acceleration.top_level().handle(),
                output_image: state.output.descriptor(),
                scene_uniforms: &scene_uniforms,
                arrays: &arrays,
                environment: gpu_scene.environment().descriptor(),
            },
        )?;

        let pipeline = RayTracingPipeline::new(
            &state.ray_tracing,
            &state.shaders,
            &descriptors.set_layouts(),
            self.max_recursion_depth,
            gpu.pipeline_cache,
        )?;
        let sbt = ShaderBindingTable::new(device, &state.ray_tracing, pipeline.handle())?;

        log::info!(
            "Built ray tracing resources for scene generation {} ({} primitives)",
            gpu_scene.generation(),
            gpu_scene.primitives().len()
        );
        Ok(SceneResources {
            sbt,
            pipeline,
            descriptors,
            _acceleration: acceleration,
            _gpu_scene: gpu_scene,
        })
    }
}

fn not_prepared() -> VulkanError {
    VulkanError::InvalidOperation {
        reason: "ray tracing strategy used before prepare".to_string(),
    }
}

/// Acceleration structure input for each uploaded primitive, in upload order
fn primitive_geometry(gpu_scene: &GpuScene) -> VulkanResult<Vec<PrimitiveGeometry>> {
    gpu_scene
        .primitives()
        .iter()
        .map(|primitive| {
            Ok(PrimitiveGeometry {
                triangles: TriangleGeometry {
                    vertex_address: primitive.vertex_buffer.device_address()?,
                    vertex_stride: std::mem::size_of::<Vertex>() as vk::DeviceSize,
                    vertex_count: primitive.vertex_count,
                    index_address: primitive.index_buffer.device_address()?,
                    triangle_count: primitive.index_count / 3,
                },
                transform: primitive.transform,
            })
        })
        .collect()
}

fn primitive_bindings(primitive: &GpuPrimitive) -> PrimitiveBindings {
    PrimitiveBindings {
        vertex: primitive.vertex_buffer.descriptor(),
        index: primitive.index_buffer.descriptor(),
        material: primitive.material_buffer.descriptor(),
        textures: std::array::from_fn(|slot| primitive.textures[slot].as_ref().map(Texture::descriptor)),
    }
}

impl RenderStrategy<GpuContext> for RayTracingStrategy {
    fn name(&self) -> &'static str {
        "ray tracing"
    }

    fn color_load_op(&self) -> vk::AttachmentLoadOp {
        vk::AttachmentLoadOp::LOAD
    }

    fn on_prepare(&mut self, gpu: &GpuContext, scene: &Scene) -> RenderResult<()> {
        let device = &gpu.device;
        let ray_tracing = VulkanRayTracing::new(Arc::clone(device))?;
        let shaders = self.load_shaders(device)?;
        let scene_uniforms = (0..gpu.frames_in_flight)
            .map(|_| {
                Buffer::new(
                    Arc::clone(device),
                    std::mem::size_of::<SceneUniforms>() as vk::DeviceSize,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                    vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                )
            })
            .collect::<VulkanResult<Vec<_>>>()?;
        let output = StorageImage::new(device, gpu.extent, gpu.color_format)?;

        self.state = Some(PreparedState {
            scene: None,
            output,
            scene_uniforms,
            shaders,
            ray_tracing,
        });
        self.on_scene_changed(gpu, scene)
    }

    fn on_surface_recreated(&mut self, gpu: &GpuContext) -> RenderResult<()> {
        let state = self.state.as_mut().ok_or_else(not_prepared)?;
        state.output = StorageImage::new(&gpu.device, gpu.extent, gpu.color_format)?;
        if let Some(scene) = &state.scene {
            scene.descriptors.write_output_image(&gpu.device, state.output.descriptor());
        }
        log::debug!("Recreated ray tracing output at {}x{}", gpu.extent.width, gpu.extent.height);
        Ok(())
    }

    fn on_scene_changed(&mut self, gpu: &GpuContext, scene: &Scene) -> RenderResult<()> {
        let resources = self.build_scene(gpu, scene)?;
        let state = self.state.as_mut().ok_or_else(not_prepared)?;
        state.scene = Some(resources);
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

    fn record_scene_commands(&mut self, gpu: &GpuContext, target: &FrameTarget) -> RenderResult<()> {
        let state = self.state.as_mut().ok_or_else(not_prepared)?;
        let raw = gpu.device.raw();
        let command_buffer = target.command_buffer;
        let output_extent = state.output.image().extent();

        if let Some(scene) = &state.scene {
            let empty_region = vk::StridedDeviceAddressRegionKHR::default();
            unsafe {
                raw.cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::RAY_TRACING_KHR, scene.pipeline.handle());
                raw.cmd_bind_descriptor_sets(
                    command_buffer,
                    vk::PipelineBindPoint::RAY_TRACING_KHR,
                    scene.pipeline.layout(),
                    0,
                    &scene.descriptors.sets(target.frame_slot),
                    &[],
                );
                state.ray_tracing.pipeline_loader().cmd_trace_rays(
                    command_buffer,
                    scene.sbt.raygen(),
                    scene.sbt.miss(),
                    scene.sbt.hit(),
                    &empty_region,
                    output_extent.width,
                    output_extent.height,
                    1,
                );
            }
        }

        let range = color_subresource_range(1);
        record_image_transition(
            raw,
            command_buffer,
            target.swapchain_image,
            range,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );

        if state.scene.is_some() {
            state
                .output
                .image_mut()
                .record_transition(command_buffer, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
            let layers = vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            };
            let corner = vk::Offset3D {
                x: output_extent.width.min(target.extent.width) as i32,
                y: output_extent.height.min(target.extent.height) as i32,
                z: 1,
            };
            let blit = vk::ImageBlit {
                src_subresource: layers,
                src_offsets: [vk::Offset3D::default(), corner],
                dst_subresource: layers,
                dst_offsets: [vk::Offset3D::default(), corner],
            };
            unsafe {
                raw.cmd_blit_image(
                    command_buffer,
                    state.output.image().handle(),
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    target.swapchain_image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[blit],
                    vk::Filter::NEAREST,
                );
            }
            state
                .output
                .image_mut()
                .record_transition(command_buffer, vk::ImageLayout::GENERAL);
        } else {
            unsafe {
                raw.cmd_clear_color_image(
                    command_buffer,
                    target.swapchain_image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &vk::ClearColorValue { float32: EMPTY_CLEAR },
                    &[range],
                );
            }
        }

        record_image_transition(
            raw,
            command_buffer,
            target.swapchain_image,
            range,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );
        Ok(())
    }

    fn on_cleanup(&mut self, _gpu: &GpuContext) {
        if self.state.take().is_some() {
            log::debug!("Released ray tracing resources");
        }
    }
}
