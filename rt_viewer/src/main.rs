//! Scene viewer
//!
//! Usage: `rt_viewer [config.toml|config.ron] [model.obj]`
//!
//! Renders the model with the configured strategy. Space reloads the model,
//! R recenters the camera, right-drag looks around and WASD/QE moves.

use std::path::PathBuf;

use rt_engine::foundation::logging;
use rt_engine::prelude::*;
use thiserror::Error;

#[derive(Error, Debug)]
enum ViewerError {
    #[error("{0}")]
    Usage(String),

    #[error(transparent)]
    Config(#[from] rt_engine::config::ConfigError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Positional arguments, told apart by extension
#[derive(Debug, Default, PartialEq, Eq)]
struct ViewerArgs {
    config: Option<PathBuf>,
    model: Option<String>,
}

impl ViewerArgs {
    fn parse(args: impl IntoIterator<Item = String>) -> Result<Self, ViewerError> {
        let mut parsed = Self::default();
        for arg in args {
            let is_config = matches!(
                std::path::Path::new(&arg).extension().and_then(|ext| ext.to_str()),
                Some("toml" | "ron")
            );
            let slot_taken = if is_config {
                parsed.config.replace(PathBuf::from(&arg)).is_some()
            } else {
                parsed.model.replace(arg.clone()).is_some()
            };
            if slot_taken {
                return Err(ViewerError::Usage(format!(
                    "unexpected argument '{arg}'\nusage: rt_viewer [config.toml|config.ron] [model.obj]"
                )));
            }
        }
        Ok(parsed)
    }
}

struct Viewer {
    model: Option<String>,
}

/// Keep the previous scene up after a reload that failed recoverably
///
/// The engine has already reported the failure either way.
fn continue_after_reload(result: Result<(), EngineError>) -> Result<(), AppError> {
    match result {
        Err(e) if !e.is_recoverable() => Err(AppError::Engine(e)),
        _ => Ok(()),
    }
}

fn camera_position(registry: &Registry, camera: Entity) -> Option<Vec3> {
    registry.get::<Camera>(camera).map(|camera| camera.position)
}

impl Application for Viewer {
    fn initialize(&mut self, engine: &mut Engine) -> Result<(), AppError> {
        let scene = engine.scene();
        log::info!(
            "Viewer ready: {} models, {} primitives, environment {}",
            scene.models().len(),
            scene.primitive_count(),
            if scene.environment().is_some() { "loaded" } else { "none" }
        );
        Ok(())
    }

    fn update(&mut self, _engine: &mut Engine, _delta_time: f32) -> Result<(), AppError> {
        Ok(())
    }

    fn handle_event(&mut self, engine: &mut Engine, event: &InputEvent) -> Result<(), AppError> {
        if let (InputEvent::KeyDown(Key::Space), Some(model)) = (event, &self.model) {
            log::info!("Reloading {model}");
            continue_after_reload(engine.load_model(model))?;
        }
        Ok(())
    }

    fn cleanup(&mut self, engine: &mut Engine) {
        log::info!("Viewer rendered {} frames", engine.renderer().frame_count());
        if let Some(position) = camera_position(engine.registry(), engine.camera_entity()) {
            log::info!("Camera left at ({:.2}, {:.2}, {:.2})", position.x, position.y, position.z);
        }
    }
}

fn main() -> Result<(), ViewerError> {
    let args = ViewerArgs::parse(std::env::args().skip(1))?;
    let mut config = match &args.config {
        Some(path) => EngineConfig::load_from_file(path)?,
        None => EngineConfig::default(),
    };
    logging::init(&config.log_level);

    if let Some(model) = args.model {
        config.assets.model = Some(model);
    }
    let mut viewer = Viewer {
        model: config.assets.model.clone(),
    };

    log::info!("Starting rt_viewer in {:?} mode", config.renderer.mode);
    Engine::run(config, Box::new(LogErrorReporter), &mut viewer)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_engine::render::{RenderError, VulkanError};

    fn args(list: &[&str]) -> Result<ViewerArgs, ViewerError> {
        ViewerArgs::parse(list.iter().map(|s| (*s).to_string()))
    }

    #[test]
    fn test_no_arguments_uses_defaults() {
        assert_eq!(args(&[]).unwrap(), ViewerArgs::default());
    }

    #[test]
    fn test_config_and_model_in_any_order() {
        let parsed = args(&["box.obj", "viewer.ron"]).unwrap();
        assert_eq!(parsed.config, Some(PathBuf::from("viewer.ron")));
        assert_eq!(parsed.model.as_deref(), Some("box.obj"));
    }

    #[test]
    fn test_two_models_is_a_usage_error() {
        assert!(matches!(args(&["a.obj", "b.obj"]), Err(ViewerError::Usage(_))));
    }

    #[test]
    fn test_missing_model_keeps_viewer_running() {
        let missing = EngineError::Asset(AssetError::NotFound("gone.obj".into()));
        assert!(continue_after_reload(Err(missing)).is_ok());
        assert!(continue_after_reload(Ok(())).is_ok());
    }

    #[test]
    fn test_gpu_failure_stops_viewer() {
        let stalled = EngineError::Render(RenderError::Vulkan(VulkanError::FenceTimeout));
        assert!(matches!(
            continue_after_reload(Err(stalled)),
            Err(AppError::Engine(EngineError::Render(_)))
        ));
    }

    #[test]
    fn test_camera_is_found_through_registry() {
        let mut registry = Registry::new();
        let camera = registry.spawn();
        registry.insert(camera, Camera::default());
        let empty = registry.spawn();

        assert_eq!(camera_position(&registry, camera), Some(Vec3::new(0.0, 1.0, 5.0)));
        assert_eq!(camera_position(&registry, empty), None);
    }
}
