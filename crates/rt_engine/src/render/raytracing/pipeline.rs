//! Ray tracing pipeline with raygen, miss and closest-hit groups

use std::sync::Arc;

use ash::vk;

use super::capability::{RayTracingDevice, VulkanRayTracing};
use super::sbt::{HIT_GROUP, MISS_GROUP, RAYGEN_GROUP};
use crate::render::vulkan::shader::create_pipeline_layout;
use crate::render::vulkan::{Device, ShaderStage, VulkanError, VulkanResult};

/// Stage indices in the order the shaders are passed to the pipeline
const RAYGEN_STAGE: u32 = 0;
const MISS_STAGE: u32 = 1;
const CLOSEST_HIT_STAGE: u32 = 2;

/// Group descriptions: two general groups and one triangle hit group
pub fn shader_groups() -> [vk::RayTracingShaderGroupCreateInfoKHR; 3] {
    let group = |ty: vk::RayTracingShaderGroupTypeKHR, general: u32, closest_hit: u32| {
        vk::RayTracingShaderGroupCreateInfoKHR::builder()
            .ty(ty)
            .general_shader(general)
            .closest_hit_shader(closest_hit)
            .any_hit_shader(vk::SHADER_UNUSED_KHR)
            .intersection_shader(vk::SHADER_UNUSED_KHR)
            .build()
    };
    let general = vk::RayTracingShaderGroupTypeKHR::GENERAL;
    let mut groups = [vk::RayTracingShaderGroupCreateInfoKHR::default(); 3];
    groups[RAYGEN_GROUP as usize] = group(general, RAYGEN_STAGE, vk::SHADER_UNUSED_KHR);
    groups[MISS_GROUP as usize] = group(general, MISS_STAGE, vk::SHADER_UNUSED_KHR);
    groups[HIT_GROUP as usize] = group(
        vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP,
        vk::SHADER_UNUSED_KHR,
        CLOSEST_HIT_STAGE,
    );
    groups
}

/// The three shaders of the pipeline
pub struct RayTracingShaders {
    /// Ray generation shader
    pub raygen: ShaderStage,
    /// Miss shader
    pub miss: ShaderStage,
    /// Closest-hit shader
    pub closest_hit: ShaderStage,
}

/// Ray tracing pipeline wrapper with RAII cleanup
pub struct RayTracingPipeline {
    device: Arc<Device>,
    handle: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl RayTracingPipeline {
    /// Create the pipeline; recursion is clamped to what the device supports
    pub fn new(
        ray_tracing: &VulkanRayTracing,
        shaders: &RayTracingShaders,
        set_layouts: &[vk::DescriptorSetLayout],
        max_recursion_depth: u32,
        cache: vk::PipelineCache,
    ) -> VulkanResult<Self> {
        let device = Arc::clone(ray_tracing.device());
        let stages = [
            shaders.raygen.create_info(),
            shaders.miss.create_info(),
            shaders.closest_hit.create_info(),
        ];
        let groups = shader_groups();
        let device_limit = ray_tracing.properties().max_ray_recursion_depth.max(1);
        let recursion = max_recursion_depth.clamp(1, device_limit);

        let layout = create_pipeline_layout(&device, set_layouts, &[])?;
        let create_info = vk::RayTracingPipelineCreateInfoKHR::builder()
            .stages(&stages)
            .groups(&groups)
            .max_pipeline_ray_recursion_depth(recursion)
            .layout(layout)
            .build();

        let pipelines = unsafe {
            ray_tracing.pipeline_loader().create_ray_tracing_pipelines(
                vk::DeferredOperationKHR::null(),
                cache,
                &[create_info],
                None,
            )
        };
        let handle = match pipelines.map(|pipelines| pipelines.into_iter().next()) {
            Ok(Some(handle)) => handle,
            Ok(None) => {
                unsafe { device.raw().destroy_pipeline_layout(layout, None) };
                return Err(VulkanError::InvalidOperation {
                    reason: "driver returned no ray tracing pipeline".to_string(),
                });
            }
            Err(error) => {
                unsafe { device.raw().destroy_pipeline_layout(layout, None) };
                return Err(VulkanError::Api(error));
            }
        };

        log::debug!("Created ray tracing pipeline (recursion depth {recursion})");
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

impl Drop for RayTracingPipeline {
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
    fn test_group_order_matches_stage_order() {
        let groups = shader_groups();
        assert_eq!(groups[RAYGEN_GROUP as usize].ty, vk::RayTracingShaderGroupTypeKHR::GENERAL);
        assert_eq!(groups[RAYGEN_GROUP as usize].general_shader, 0);
        assert_eq!(groups[MISS_GROUP as usize].ty, vk::RayTracingShaderGroupTypeKHR::GENERAL);
        assert_eq!(groups[MISS_GROUP as usize].general_shader, 1);
        assert_eq!(
            groups[HIT_GROUP as usize].ty,
            vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP
        );
        assert_eq!(groups[HIT_GROUP as usize].closest_hit_shader, 2);
        assert_eq!(groups[HIT_GROUP as usize].general_shader, vk::SHADER_UNUSED_KHR);
    }
}
