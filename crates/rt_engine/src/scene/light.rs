//! Scene lights

use crate::foundation::math::Vec3;

/// Upper bound on lights packed into the scene uniform block
pub const MAX_LIGHTS: usize = 8;

/// Light shape
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightKind {
    /// Parallel rays travelling along `direction`
    Directional {
        /// Direction the light travels
        direction: Vec3,
    },
    /// Omnidirectional light at a position
    Point {
        /// World-space position
        position: Vec3,
        /// Distance at which the contribution falls to zero
        range: f32,
    },
}

/// A light component
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    /// Shape and placement
    pub kind: LightKind,
    /// Linear RGB color
    pub color: Vec3,
    /// Scalar intensity multiplier
    pub intensity: f32,
}

impl Light {
    /// Directional light
    pub fn directional(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            kind: LightKind::Directional {
                direction: direction.normalize(),
            },
            color,
            intensity,
        }
    }

    /// Point light
    pub fn point(position: Vec3, range: f32, color: Vec3, intensity: f32) -> Self {
        Self {
            kind: LightKind::Point { position, range },
            color,
            intensity,
        }
    }
}
