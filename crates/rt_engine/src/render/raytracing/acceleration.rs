//! Scene acceleration structures
//!
//! One bottom-level structure per mesh primitive and a single top-level
//! structure whose instance `k` references bottom-level structure `k`.
//! The set is rebuilt wholesale; a failed build leaves whatever the caller
//! already holds untouched.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use thiserror::Error;

use super::capability::{BuiltStructure, RayTracingDevice, TriangleGeometry};
use crate::foundation::math::{pack_affine_3x4, Mat4};
use crate::render::vulkan::VulkanError;

/// Visibility mask every instance uses
pub const DEFAULT_INSTANCE_MASK: u8 = 0xFF;

/// Acceleration structure build failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccelerationBuildError {
    /// A bottom-level build failed
    #[error("bottom-level build for primitive {primitive} failed: {source}")]
    BottomLevel {
        /// Traversal index of the failing primitive
        primitive: usize,
        /// Underlying device error
        #[source]
        source: VulkanError,
    },

    /// The top-level build failed
    #[error("top-level build over {instance_count} instances failed: {source}")]
    TopLevel {
        /// Number of instances in the attempted build
        instance_count: usize,
        /// Underlying device error
        #[source]
        source: VulkanError,
    },
}

impl AccelerationBuildError {
    /// Device error behind the failed build
    pub fn device_error(&self) -> &VulkanError {
        match self {
            Self::BottomLevel { source, .. } | Self::TopLevel { source, .. } => source,
        }
    }
}

/// Per-instance record for the top-level build
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryInstance {
    /// Row-major 3x4 object-to-world transform
    pub transform: [f32; 12],
    /// Custom index visible to shaders as `gl_InstanceCustomIndexEXT` (24 bits)
    pub instance_id: u32,
    /// Visibility mask
    pub mask: u8,
    /// Offset into the hit group region (24 bits)
    pub sbt_offset: u32,
    /// Instance flags
    pub flags: vk::GeometryInstanceFlagsKHR,
    /// Address of the referenced bottom-level structure
    pub structure_address: vk::DeviceAddress,
}

impl GeometryInstance {
    /// Instance for traversal index `index`, using it as the custom index
    pub fn new(index: usize, transform: &Mat4, structure_address: vk::DeviceAddress) -> Self {
        Self {
            transform: pack_affine_3x4(transform),
            instance_id: index as u32,
            mask: DEFAULT_INSTANCE_MASK,
            sbt_offset: 0,
            flags: vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE,
            structure_address,
        }
    }

    /// Pack into the layout the driver reads from the instance buffer
    pub fn pack(&self) -> PackedInstance {
        PackedInstance {
            transform: self.transform,
            custom_index_and_mask: (self.instance_id & 0x00FF_FFFF) | (u32::from(self.mask) << 24),
            sbt_offset_and_flags: (self.sbt_offset & 0x00FF_FFFF) | ((self.flags.as_raw() & 0xFF) << 24),
            structure_reference: self.structure_address,
        }
    }
}

/// `VkAccelerationStructureInstanceKHR` as plain data
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct PackedInstance {
    /// Row-major 3x4 transform
    pub transform: [f32; 12],
    /// Custom index in the low 24 bits, mask in the high 8
    pub custom_index_and_mask: u32,
    /// Hit group offset in the low 24 bits, flags in the high 8
    pub sbt_offset_and_flags: u32,
    /// Bottom-level structure address
    pub structure_reference: u64,
}

/// Build input for one primitive
#[derive(Debug, Clone, Copy)]
pub struct PrimitiveGeometry {
    /// Geometry buffers
    pub triangles: TriangleGeometry,
    /// Owning node's model-to-world transform
    pub transform: Mat4,
}

/// Complete set of structures for one scene
pub struct SceneAccelerationStructures<S> {
    bottom: Vec<S>,
    instances: Vec<GeometryInstance>,
    top: S,
}

impl<S: BuiltStructure> SceneAccelerationStructures<S> {
    /// Bottom-level structures in traversal order
    pub fn bottom_level(&self) -> &[S] {
        &self.bottom
    }

    /// Instances the top-level structure was built from
    pub fn instances(&self) -> &[GeometryInstance] {
        &self.instances
    }

    /// The top-level structure bound at trace time
    pub fn top_level(&self) -> &S {
        &self.top
    }
}

/// Builds [`SceneAccelerationStructures`] through a [`RayTracingDevice`]
pub struct AccelerationStructureBuilder<'a, D> {
    device: &'a D,
}

impl<'a, D: RayTracingDevice> AccelerationStructureBuilder<'a, D> {
    /// Builder over `device`
    pub const fn new(device: &'a D) -> Self {
        Self { device }
    }

    /// Build every bottom-level structure in order, then the top level over them
    ///
    /// Each bottom-level build has completed before the next starts, so the
    /// top-level build only references finished structures. On failure the
    /// partial results are dropped.
    pub fn build(&self, primitives: &[PrimitiveGeometry]) -> Result<SceneAccelerationStructures<D::Structure>, AccelerationBuildError> {
        let mut bottom = Vec::with_capacity(primitives.len());
        for (index, primitive) in primitives.iter().enumerate() {
            let structure = self
                .device
                .build_bottom_level(&primitive.triangles)
                .map_err(|source| AccelerationBuildError::BottomLevel {
                    primitive: index,
                    source,
                })?;
            bottom.push(structure);
        }

        let instances: Vec<GeometryInstance> = primitives
            .iter()
            .zip(&bottom)
            .enumerate()
            .map(|(index, (primitive, structure))| {
                GeometryInstance::new(index, &primitive.transform, structure.device_address())
            })
            .collect();

        let top = self
            .device
            .build_top_level(&instances)
            .map_err(|source| AccelerationBuildError::TopLevel {
                instance_count: instances.len(),
                source,
            })?;

        log::info!("Built {} bottom-level structures and 1 top-level structure", bottom.len());
        Ok(SceneAccelerationStructures { bottom, instances, top })
    }
}
