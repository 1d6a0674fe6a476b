//! # RT Engine
//!
//! A Vulkan renderer built around hardware ray tracing, with a forward
//! rasterization strategy as a fallback.
//!
//! ## Features
//!
//! - **Ray Tracing**: bottom/top-level acceleration structures, a
//!   raygen/miss/closest-hit pipeline and its shader binding table
//! - **Frame Orchestration**: fences, semaphores, swapchain recreation and a
//!   pluggable [`RenderStrategy`](render::RenderStrategy)
//! - **Scene Data**: flattened model nodes, materials and textures uploaded
//!   once per scene change
//! - **Entity Registry**: camera and light components on a flat store
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rt_engine::prelude::*;
//!
//! struct Viewer;
//!
//! impl Application for Viewer {
//!     fn initialize(&mut self, engine: &mut Engine) -> Result<(), AppError> {
//!         let _ = engine.load_model("models/cornell_box.obj");
//!         Ok(())
//!     }
//!
//!     fn update(&mut self, _engine: &mut Engine, _delta_time: f32) -> Result<(), AppError> {
//!         Ok(())
//!     }
//!
//!     fn cleanup(&mut self, _engine: &mut Engine) {}
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::default();
//!     Engine::run(config, Box::new(LogErrorReporter), &mut Viewer)?;
//!     Ok(())
//! }
//! ```

pub mod assets;
pub mod config;
pub mod ecs;
pub mod foundation;
pub mod input;
pub mod render;
pub mod scene;

mod application;
mod engine;

pub use application::{AppError, Application};
pub use engine::{stage_model, stage_skybox, Engine, EngineError};

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        assets::{AssetError, AssetLoader, AssetPaths, FileAssetLoader},
        config::{Config, EngineConfig, RenderMode},
        ecs::{Component, Entity, Registry},
        foundation::{
            math::{Mat4, Transform, Vec3},
            report::{ErrorReporter, LogErrorReporter, Severity},
            time::Timer,
        },
        input::{InputEvent, Key},
        scene::{Camera, Light, Scene},
        AppError, Application, Engine, EngineError,
    };
}
