//! Scene state consumed by the renderer
//!
//! The scene owns loaded models and the environment map. The camera and
//! lights are components in the [`Registry`](crate::ecs::Registry).

mod camera;
mod light;
mod model;
mod container;

pub use camera::Camera;
pub use light::{Light, LightKind, MAX_LIGHTS};
pub use model::{MaterialData, MeshData, ModelData, NodeData, PrimitiveData, TextureSlot, Vertex};
pub use container::{PrimitiveRef, Scene};
