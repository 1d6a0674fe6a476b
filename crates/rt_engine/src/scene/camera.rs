//! First-person perspective camera
//!
//! View space is right-handed with Y up and the camera looking down -Z.
//! The projection targets Vulkan clip space: Y points down and depth maps
//! to `[0, 1]`.

use crate::foundation::math::{Mat4, Point3, Vec3};

const MAX_PITCH: f32 = 89.0;

/// Perspective camera driven by yaw/pitch angles
#[derive(Debug, Clone)]
pub struct Camera {
    /// Camera position in world space
    pub position: Vec3,
    /// Rotation around the world Y axis in degrees
    pub yaw: f32,
    /// Rotation above the horizon in degrees
    pub pitch: f32,
    /// Vertical field of view in degrees
    pub fov_y: f32,
    /// Distance to near clipping plane
    pub near: f32,
    /// Distance to far clipping plane
    pub far: f32,
    home: (Vec3, f32, f32),
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(Vec3::new(0.0, 1.0, 5.0), -90.0, 0.0)
    }
}

impl Camera {
    /// Create a camera; the given pose also becomes its recenter target
    pub fn new(position: Vec3, yaw: f32, pitch: f32) -> Self {
        let pitch = pitch.clamp(-MAX_PITCH, MAX_PITCH);
        Self {
            position,
            yaw,
            pitch,
            fov_y: 60.0,
            near: 0.1,
            far: 1000.0,
            home: (position, yaw, pitch),
        }
    }

    /// Unit vector the camera looks along
    pub fn forward(&self) -> Vec3 {
        let (yaw, pitch) = (self.yaw.to_radians(), self.pitch.to_radians());
        Vec3::new(yaw.cos() * pitch.cos(), pitch.sin(), yaw.sin() * pitch.cos()).normalize()
    }

    /// Unit vector to the camera's right
    pub fn right(&self) -> Vec3 {
        self.forward().cross(&Vec3::y()).normalize()
    }

    /// Turn the camera by mouse deltas in degrees
    pub fn rotate(&mut self, delta_yaw: f32, delta_pitch: f32) {
        self.yaw += delta_yaw;
        self.pitch = (self.pitch + delta_pitch).clamp(-MAX_PITCH, MAX_PITCH);
    }

    /// Move relative to the camera orientation
    pub fn translate_local(&mut self, forward: f32, right: f32, up: f32) {
        self.position += self.forward() * forward + self.right() * right + Vec3::y() * up;
    }

    /// Return to the pose the camera was created with
    pub fn recenter(&mut self) {
        let (position, yaw, pitch) = self.home;
        self.position = position;
        self.yaw = yaw;
        self.pitch = pitch;
    }

    /// World-to-view matrix
    pub fn view_matrix(&self) -> Mat4 {
        let eye = Point3::from(self.position);
        let target = Point3::from(self.position + self.forward());
        Mat4::look_at_rh(&eye, &target, &Vec3::y())
    }

    /// View-to-clip matrix for the given width/height ratio
    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        let f = 1.0 / (self.fov_y.to_radians() * 0.5).tan();
        let (near, far) = (self.near, self.far);
        let depth_scale = far / (near - far);
        #[rustfmt::skip]
        let projection = Mat4::new(
            f / aspect, 0.0, 0.0, 0.0,
            0.0, -f, 0.0, 0.0,
            0.0, 0.0, depth_scale, depth_scale * near,
            0.0, 0.0, -1.0, 0.0,
        );
        projection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec4;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_looks_down_negative_z() {
        let camera = Camera::default();
        let forward = camera.forward();
        assert_relative_eq!(forward.z, -1.0, epsilon = 1e-5);
        assert_relative_eq!(forward.x, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_projection_maps_near_and_far_to_unit_depth() {
        let camera = Camera::default();
        let projection = camera.projection_matrix(16.0 / 9.0);

        let near = projection * Vec4::new(0.0, 0.0, -camera.near, 1.0);
        let far = projection * Vec4::new(0.0, 0.0, -camera.far, 1.0);
        assert_relative_eq!(near.z / near.w, 0.0, epsilon = 1e-5);
        assert_relative_eq!(far.z / far.w, 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_projection_flips_y_for_vulkan() {
        let camera = Camera::default();
        let projection = camera.projection_matrix(1.0);
        let above = projection * Vec4::new(0.0, 1.0, -2.0, 1.0);
        assert!(above.y / above.w < 0.0);
    }

    #[test]
    fn test_view_moves_eye_to_origin() {
        let camera = Camera::new(Vec3::new(3.0, 2.0, 1.0), 45.0, 10.0);
        let eye = camera.view_matrix() * Vec4::new(3.0, 2.0, 1.0, 1.0);
        assert_relative_eq!(eye.xyz().norm(), 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_pitch_is_clamped() {
        let mut camera = Camera::default();
        camera.rotate(0.0, 500.0);
        assert_relative_eq!(camera.pitch, MAX_PITCH);
    }

    #[test]
    fn test_recenter_restores_initial_pose() {
        let mut camera = Camera::new(Vec3::new(1.0, 2.0, 3.0), 10.0, 5.0);
        camera.rotate(30.0, -20.0);
        camera.translate_local(4.0, 1.0, 0.0);
        camera.recenter();
        assert_relative_eq!(camera.position, Vec3::new(1.0, 2.0, 3.0));
        assert_relative_eq!(camera.yaw, 10.0);
        assert_relative_eq!(camera.pitch, 5.0);
    }
}
