//! Hardware ray tracing path
//!
//! Bottom-level structures per primitive and one top-level structure over
//! them, descriptor sets indexed by instance, a three-group pipeline with
//! its binding table, and the strategy that ties them into a frame.

pub mod acceleration;
pub mod capability;
pub mod descriptors;
pub mod pipeline;
pub mod sbt;
mod strategy;

pub use acceleration::{AccelerationBuildError, AccelerationStructureBuilder, GeometryInstance};
pub use capability::{BuiltStructure, RayTracingDevice, VulkanRayTracing};
pub use strategy::RayTracingStrategy;
