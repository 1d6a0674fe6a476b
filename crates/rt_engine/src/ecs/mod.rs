//! Flat entity/component store
//!
//! Renderer-relevant state such as the active camera and the scene lights
//! lives here as components attached to entities.

mod registry;

pub use registry::{Entity, Registry};

/// Marker trait for components
pub trait Component: 'static + Send + Sync {}

impl Component for crate::foundation::math::Transform {}
impl Component for crate::scene::Camera {}
impl Component for crate::scene::Light {}
