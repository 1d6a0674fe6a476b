//! Math utilities and types

pub use nalgebra::{Matrix3, Matrix4, Point3, Quaternion, UnitQuaternion, Vector2, Vector3, Vector4};

/// 2D vector type
pub type Vec2 = Vector2<f32>;
/// 3D vector type
pub type Vec3 = Vector3<f32>;
/// 4D vector type
pub type Vec4 = Vector4<f32>;
/// 3x3 matrix type
pub type Mat3 = Matrix3<f32>;
/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;
/// Quaternion type
pub type Quat = UnitQuaternion<f32>;

/// Transform component for positioning scene nodes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    /// Position in world space
    pub position: Vec3,
    /// Rotation as quaternion
    pub rotation: Quat,
    /// Scale factors
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::zeros(),
            rotation: Quat::identity(),
            scale: Vec3::new(1.0, 1.0, 1.0),
        }
    }
}

impl Transform {
    /// Create a transform from a position only
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    /// Convert to a model matrix (translation * rotation * scale)
    pub fn to_matrix(&self) -> Mat4 {
        let translation = Mat4::new_translation(&self.position);
        let rotation = self.rotation.to_homogeneous();
        let scale = Mat4::new_nonuniform_scaling(&self.scale);
        translation * rotation * scale
    }
}

/// Pack the upper 3x4 part of an affine matrix in row-major order
///
/// This is the layout acceleration structure instances expect.
pub fn pack_affine_3x4(matrix: &Mat4) -> [f32; 12] {
    let mut packed = [0.0; 12];
    for row in 0..3 {
        for col in 0..4 {
            packed[row * 4 + col] = matrix[(row, col)];
        }
    }
    packed
}

/// Column-major array form of a matrix, matching GLSL `mat4` in uniform blocks
pub fn to_cols_array(matrix: &Mat4) -> [[f32; 4]; 4] {
    let mut out = [[0.0; 4]; 4];
    for (col, column) in out.iter_mut().enumerate() {
        for (row, value) in column.iter_mut().enumerate() {
            *value = matrix[(row, col)];
        }
    }
    out
}

/// Degrees to radians conversion
pub fn deg_to_rad(degrees: f32) -> f32 {
    degrees.to_radians()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_identity_packs_as_identity_rows() {
        let packed = pack_affine_3x4(&Mat4::identity());
        assert_eq!(packed, [1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_translation_lands_in_fourth_column() {
        let matrix = Mat4::new_translation(&Vec3::new(1.0, 2.0, 3.0));
        let packed = pack_affine_3x4(&matrix);
        assert_relative_eq!(packed[3], 1.0);
        assert_relative_eq!(packed[7], 2.0);
        assert_relative_eq!(packed[11], 3.0);
    }

    #[test]
    fn test_transform_matrix_applies_scale_before_translation() {
        let transform = Transform {
            position: Vec3::new(10.0, 0.0, 0.0),
            scale: Vec3::new(2.0, 2.0, 2.0),
            ..Transform::default()
        };
        let point = transform.to_matrix() * Vec4::new(1.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(point.x, 12.0);
    }

    #[test]
    fn test_cols_array_is_column_major() {
        let matrix = Mat4::new_translation(&Vec3::new(4.0, 5.0, 6.0));
        let cols = to_cols_array(&matrix);
        assert_eq!(cols[3], [4.0, 5.0, 6.0, 1.0]);
    }
}
