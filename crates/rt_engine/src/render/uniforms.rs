//! GPU-visible uniform blocks
//!
//! All blocks are `#[repr(C)]` with 16-byte aligned members so they match
//! the std140 declarations in the shaders.

use bytemuck::{Pod, Zeroable};

use crate::foundation::math::{to_cols_array, Mat4};
use crate::scene::{Camera, Light, LightKind, MaterialData, TextureSlot, MAX_LIGHTS};

/// One packed light
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct LightUniform {
    /// `xyz` position or direction, `w` is 1 for point lights and 0 for directional
    pub position_or_direction: [f32; 4],
    /// `rgb` color, `a` intensity
    pub color_intensity: [f32; 4],
    /// `x` range for point lights
    pub params: [f32; 4],
}

impl From<&Light> for LightUniform {
    fn from(light: &Light) -> Self {
        let (position_or_direction, range) = match light.kind {
            LightKind::Directional { direction } => ([direction.x, direction.y, direction.z, 0.0], 0.0),
            LightKind::Point { position, range } => ([position.x, position.y, position.z, 1.0], range),
        };
        Self {
            position_or_direction,
            color_intensity: [light.color.x, light.color.y, light.color.z, light.intensity],
            params: [range, 0.0, 0.0, 0.0],
        }
    }
}

/// Per-frame camera and lighting block
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct SceneUniforms {
    /// Inverse view matrix, used by raygen to place rays in world space
    pub view_inverse: [[f32; 4]; 4],
    /// Inverse projection matrix
    pub projection_inverse: [[f32; 4]; 4],
    /// View matrix
    pub view: [[f32; 4]; 4],
    /// Projection matrix
    pub projection: [[f32; 4]; 4],
    /// World-space camera position, `w` unused
    pub camera_position: [f32; 4],
    /// Packed lights; only the first `light_count` are valid
    pub lights: [LightUniform; MAX_LIGHTS],
    /// Number of valid lights
    pub light_count: u32,
    /// Frame counter
    pub frame: u32,
    _padding: [u32; 2],
}

impl SceneUniforms {
    /// Pack camera and lights for one frame; lights past [`MAX_LIGHTS`] are dropped
    pub fn new<'a>(camera: &Camera, aspect: f32, lights: impl IntoIterator<Item = &'a Light>, frame: u32) -> Self {
        let view = camera.view_matrix();
        let projection = camera.projection_matrix(aspect);
        let view_inverse = view.try_inverse().unwrap_or_else(Mat4::identity);
        let projection_inverse = projection.try_inverse().unwrap_or_else(Mat4::identity);

        let mut packed = [LightUniform::default(); MAX_LIGHTS];
        let mut light_count = 0;
        for light in lights {
            if light_count == MAX_LIGHTS {
                log::trace!("Dropping lights beyond the first {MAX_LIGHTS}");
                break;
            }
            packed[light_count] = LightUniform::from(light);
            light_count += 1;
        }

        Self {
            view_inverse: to_cols_array(&view_inverse),
            projection_inverse: to_cols_array(&projection_inverse),
            view: to_cols_array(&view),
            projection: to_cols_array(&projection),
            camera_position: [camera.position.x, camera.position.y, camera.position.z, 1.0],
            lights: packed,
            light_count: light_count as u32,
            frame,
            _padding: [0; 2],
        }
    }
}

/// Material factors read by the closest-hit and fragment shaders
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct MaterialUniform {
    /// Linear RGBA base color
    pub base_color: [f32; 4],
    /// `rgb` emissive color
    pub emissive: [f32; 4],
    /// Metallic factor
    pub metallic: f32,
    /// Roughness factor
    pub roughness: f32,
    /// Bit `i` set when [`TextureSlot`] `i` holds a real texture
    pub texture_mask: u32,
    _padding: u32,
}

impl From<&MaterialData> for MaterialUniform {
    fn from(material: &MaterialData) -> Self {
        let texture_mask = TextureSlot::ALL
            .iter()
            .filter(|slot| material.texture(**slot).is_some())
            .fold(0u32, |mask, slot| mask | (1 << slot.index()));
        let [r, g, b] = material.emissive;
        Self {
            base_color: material.base_color,
            emissive: [r, g, b, 0.0],
            metallic: material.metallic,
            roughness: material.roughness,
            texture_mask,
            _padding: 0,
        }
    }
}

/// Per-node transform block for the raster path
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct NodeUniform {
    /// Model-to-world matrix
    pub model: [[f32; 4]; 4],
    /// Inverse-transpose of `model` for normals
    pub normal: [[f32; 4]; 4],
}

impl NodeUniform {
    /// Pack a node transform
    pub fn new(model: &Mat4) -> Self {
        let normal = model.try_inverse().map_or_else(Mat4::identity, |inverse| inverse.transpose());
        Self {
            model: to_cols_array(model),
            normal: to_cols_array(&normal),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::ImageData;
    use crate::foundation::math::Vec3;
    use approx::assert_relative_eq;

    #[test]
    fn test_block_sizes_are_multiples_of_sixteen() {
        assert_eq!(std::mem::size_of::<LightUniform>() % 16, 0);
        assert_eq!(std::mem::size_of::<SceneUniforms>() % 16, 0);
        assert_eq!(std::mem::size_of::<MaterialUniform>() % 16, 0);
        assert_eq!(std::mem::size_of::<NodeUniform>(), 128);
    }

    #[test]
    fn test_lights_are_packed_by_kind() {
        let sun = Light::directional(Vec3::new(0.0, -2.0, 0.0), Vec3::new(1.0, 0.9, 0.8), 3.0);
        let lamp = Light::point(Vec3::new(1.0, 2.0, 3.0), 10.0, Vec3::new(1.0, 1.0, 1.0), 5.0);
        let uniforms = SceneUniforms::new(&Camera::default(), 16.0 / 9.0, [&sun, &lamp], 7);

        assert_eq!(uniforms.light_count, 2);
        assert_eq!(uniforms.frame, 7);
        assert_relative_eq!(uniforms.lights[0].position_or_direction[1], -1.0);
        assert_relative_eq!(uniforms.lights[0].position_or_direction[3], 0.0);
        assert_eq!(uniforms.lights[1].position_or_direction, [1.0, 2.0, 3.0, 1.0]);
        assert_relative_eq!(uniforms.lights[1].params[0], 10.0);
        assert_relative_eq!(uniforms.lights[1].color_intensity[3], 5.0);
    }

    #[test]
    fn test_excess_lights_are_dropped() {
        let light = Light::point(Vec3::zeros(), 1.0, Vec3::new(1.0, 1.0, 1.0), 1.0);
        let lights = vec![light; MAX_LIGHTS + 3];
        let uniforms = SceneUniforms::new(&Camera::default(), 1.0, &lights, 0);
        assert_eq!(uniforms.light_count as usize, MAX_LIGHTS);
    }

    #[test]
    fn test_inverse_view_recovers_camera_position() {
        let camera = Camera::default();
        let uniforms = SceneUniforms::new(&camera, 1.0, [], 0);
        let translation = uniforms.view_inverse[3];
        assert_relative_eq!(translation[0], camera.position.x, epsilon = 1e-5);
        assert_relative_eq!(translation[1], camera.position.y, epsilon = 1e-5);
        assert_relative_eq!(translation[2], camera.position.z, epsilon = 1e-5);
    }

    #[test]
    fn test_material_mask_tracks_present_textures() {
        let mut material = MaterialData::default();
        material.textures[TextureSlot::Normal.index()] = Some(ImageData::solid([0, 0, 255, 255]));
        let uniform = MaterialUniform::from(&material);
        assert_eq!(uniform.texture_mask, 1 << TextureSlot::Normal.index());
        assert_relative_eq!(uniform.roughness, 0.5);
    }
}
