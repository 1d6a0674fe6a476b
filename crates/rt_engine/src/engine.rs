//! Engine run loop
//!
//! [`Engine`] brings the renderer up in order (window, instance, surface,
//! device, frame backend, strategy), drives the frame loop and owns the
//! scene. Model and skybox loads are staged into a copy of the scene and
//! only committed once the renderer has rebuilt its resources from it.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use thiserror::Error;

use crate::application::Application;
use crate::assets::{AssetError, AssetLoader, AssetPaths, AssetResult, FileAssetLoader};
use crate::config::{ConfigError, EngineConfig, RenderMode};
use crate::ecs::{Entity, Registry};
use crate::foundation::math::Vec3;
use crate::foundation::report::{ErrorReporter, Severity};
use crate::foundation::time::Timer;
use crate::input::{InputEvent, Key, MouseLook};
use crate::render::frame::{GpuContext, SwapchainFrameBackend};
use crate::render::vulkan::{Device, DeviceRequirements, PhysicalDeviceInfo, VulkanInstance, Window, WindowError};
use crate::render::{
    FrameOrchestrator, FrameOutcome, LifecycleState, NullOverlay, RasterStrategy, RayTracingStrategy, RenderError,
    RenderStrategy, UiOverlay, VulkanError,
};
use crate::scene::{Camera, Light, Scene};

/// Degrees of camera rotation per pixel of mouse drag
const LOOK_SENSITIVITY: f32 = 0.2;
/// Distance moved per movement key press
const MOVE_STEP: f32 = 0.25;
/// Interval between FPS log lines
const FPS_REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Top-level engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Window or surface creation failed
    #[error("Window error: {0}")]
    Window(#[from] WindowError),

    /// Device bring-up failed
    #[error("Graphics error: {0}")]
    Vulkan(#[from] VulkanError),

    /// The frame loop or a strategy failed
    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    /// A model or skybox could not be loaded
    #[error("Asset error: {0}")]
    Asset(#[from] AssetError),

    /// The application callback failed
    #[error("Application error: {0}")]
    Application(String),
}

impl EngineError {
    /// Whether the engine can keep rendering the previous scene after this error
    ///
    /// Asset failures and acceleration structure builds that ran out of
    /// memory leave the device usable. Everything else, a lost device in
    /// particular, has to reach the top-level handler.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Asset(_) => true,
            Self::Render(RenderError::Acceleration(error)) => !error.device_error().is_device_lost(),
            _ => false,
        }
    }

    /// How loudly the error reporter should announce this error
    pub fn severity(&self) -> Severity {
        if self.is_recoverable() {
            Severity::Error
        } else {
            Severity::Fatal
        }
    }
}

/// Load a model and return the scene that would replace `scene`
///
/// `scene` itself is never touched.
pub fn stage_model(scene: &Scene, loader: &dyn AssetLoader, path: &Path) -> AssetResult<Scene> {
    let model = loader.load_model(path)?;
    let mut staged = scene.clone();
    staged.replace_models(model);
    Ok(staged)
}

/// Load an environment map and return the scene that would replace `scene`
pub fn stage_skybox(scene: &Scene, loader: &dyn AssetLoader, path: &Path) -> AssetResult<Scene> {
    let image = loader.load_skybox(path)?;
    let mut staged = scene.clone();
    staged.set_environment(image);
    Ok(staged)
}

/// Pass a staged result through, reporting a failure to the user
fn report_failure<T, E: std::fmt::Display>(
    result: Result<T, E>,
    reporter: &dyn ErrorReporter,
    title: &str,
) -> Result<T, E> {
    if let Err(e) = &result {
        reporter.report(Severity::Error, title, &e.to_string());
    }
    result
}

/// Report a failed scene rebuild at the severity its error calls for
fn report_rebuild_failure(result: Result<(), EngineError>, reporter: &dyn ErrorReporter) -> Result<(), EngineError> {
    if let Err(e) = &result {
        reporter.report(e.severity(), "Failed to rebuild scene", &e.to_string());
    }
    result
}

/// Apply the built-in camera controls for one event
///
/// Returns true when the camera moved.
fn steer_camera(camera: &mut Camera, look: &mut MouseLook, event: &InputEvent) -> bool {
    if let Some((dx, dy)) = look.handle(event) {
        camera.rotate(dx * LOOK_SENSITIVITY, -dy * LOOK_SENSITIVITY);
        return true;
    }
    let InputEvent::KeyDown(key) = *event else {
        return false;
    };
    match key {
        Key::R => camera.recenter(),
        Key::W => camera.translate_local(MOVE_STEP, 0.0, 0.0),
        Key::S => camera.translate_local(-MOVE_STEP, 0.0, 0.0),
        Key::D => camera.translate_local(0.0, MOVE_STEP, 0.0),
        Key::A => camera.translate_local(0.0, -MOVE_STEP, 0.0),
        Key::E => camera.translate_local(0.0, 0.0, MOVE_STEP),
        Key::Q => camera.translate_local(0.0, 0.0, -MOVE_STEP),
        _ => return false,
    }
    true
}

/// Main engine struct
///
/// Fields drop in declaration order: the renderer releases its GPU
/// resources before the device, and the window outlives the surface.
pub struct Engine {
    renderer: FrameOrchestrator<SwapchainFrameBackend>,
    device: Arc<Device>,
    window: Window,
    registry: Registry,
    camera: Entity,
    scene: Scene,
    loader: Box<dyn AssetLoader>,
    paths: AssetPaths,
    reporter: Box<dyn ErrorReporter>,
    mouse_look: MouseLook,
    timer: Timer,
    config: EngineConfig,
    running: bool,
}

impl Engine {
    /// Bring up the window, device and renderer
    ///
    /// Failures here are fatal; they are reported before being returned.
    pub fn new(config: EngineConfig, reporter: Box<dyn ErrorReporter>) -> Result<Self, EngineError> {
        match Self::bring_up(config, reporter.as_ref()) {
            Ok(parts) => Ok(Self::assemble(parts, reporter)),
            Err(e) => {
                reporter.report(Severity::Fatal, "Startup failed", &e.to_string());
                Err(e)
            }
        }
    }

    fn bring_up(config: EngineConfig, reporter: &dyn ErrorReporter) -> Result<BringUp, EngineError> {
        config.validate()?;
        let mut state = LifecycleState::Uninitialized;
        log::info!("Initializing engine ({state:?})");

        let mut window = Window::new(&config.window)?;
        state = LifecycleState::WindowReady;
        log::info!("Window created ({state:?})");

        let extensions = window.required_instance_extensions()?;
        let instance = Arc::new(VulkanInstance::new(
            &config.renderer.application_name,
            &extensions,
            config.renderer.validation_enabled(),
        )?);
        let surface = window.create_surface(&instance)?;

        let requirements = DeviceRequirements {
            ray_tracing: config.renderer.mode == RenderMode::RayTracing,
        };
        let physical = PhysicalDeviceInfo::select(&instance, &surface, requirements)?;
        log::info!("Selected GPU: {}", physical.name());
        let device = Device::new(instance, physical, requirements, config.renderer.fence_timeout_ns)?;

        let (width, height) = window.framebuffer_size();
        let backend = SwapchainFrameBackend::new(
            Arc::clone(&device),
            surface,
            vk::Extent2D { width, height },
            &config.renderer,
        )?;

        let paths = AssetPaths::new(&config.assets.asset_root, &config.assets.shader_dir);
        let strategy: Box<dyn RenderStrategy<GpuContext>> = match config.renderer.mode {
            RenderMode::RayTracing => Box::new(RayTracingStrategy::new(paths.shader_dir(), &config.renderer)),
            RenderMode::Raster => Box::new(RasterStrategy::new(paths.shader_dir(), &config.renderer)),
        };
        let overlay: Box<dyn UiOverlay> = Box::new(NullOverlay);
        let renderer = FrameOrchestrator::new(backend, strategy, overlay);
        log::info!("Graphics ready with the {:?} strategy ({:?})", config.renderer.mode, renderer.state());

        let mut scene = Scene::new();
        let loader = FileAssetLoader::new(paths.clone());
        if let Some(model) = &config.assets.model {
            if let Ok(staged) = report_failure(stage_model(&scene, &loader, Path::new(model)), reporter, "Failed to load model") {
                scene = staged;
            }
        }
        if let Some(skybox) = &config.assets.skybox {
            if let Ok(staged) = report_failure(stage_skybox(&scene, &loader, Path::new(skybox)), reporter, "Failed to load skybox") {
                scene = staged;
            }
        }

        Ok(BringUp {
            renderer,
            device,
            window,
            scene,
            loader: Box::new(loader),
            paths,
            config,
        })
    }

    fn assemble(parts: BringUp, reporter: Box<dyn ErrorReporter>) -> Self {
        let mut registry = Registry::new();
        let camera = registry.spawn();
        registry.insert(camera, Camera::default());
        let sun = registry.spawn();
        registry.insert(
            sun,
            Light::directional(Vec3::new(-0.4, -1.0, -0.3), Vec3::new(1.0, 1.0, 1.0), 1.0),
        );

        Self {
            renderer: parts.renderer,
            device: parts.device,
            window: parts.window,
            registry,
            camera,
            scene: parts.scene,
            loader: parts.loader,
            paths: parts.paths,
            reporter,
            mouse_look: MouseLook::default(),
            timer: Timer::new(),
            config: parts.config,
            running: true,
        }
    }

    /// Run the engine main loop with the given application
    pub fn run<T: Application>(
        config: EngineConfig,
        reporter: Box<dyn ErrorReporter>,
        app: &mut T,
    ) -> Result<(), EngineError> {
        let mut engine = Self::new(config, reporter)?;
        let result = engine.main_loop(app);
        app.cleanup(&mut engine);
        let shutdown = engine.shutdown();

        if let Err(e) = &result {
            engine.reporter.report(Severity::Fatal, "Renderer stopped", &e.to_string());
        }
        result.and(shutdown)
    }

    fn main_loop<T: Application>(&mut self, app: &mut T) -> Result<(), EngineError> {
        app.initialize(self)
            .map_err(|e| EngineError::Application(format!("App initialization: {e}")))?;
        self.renderer.prepare(&self.scene)?;

        log::info!("Starting main loop...");
        while self.running && !self.window.should_close() {
            self.timer.update();
            let delta_time = self.timer.delta_time();

            for event in self.window.poll_events() {
                self.handle_event(&event);
                app.handle_event(self, &event)
                    .map_err(|e| EngineError::Application(format!("App event: {e}")))?;
            }

            app.update(self, delta_time)
                .map_err(|e| EngineError::Application(format!("App update: {e}")))?;

            self.render_frame(delta_time)?;

            if let Some(fps) = self.timer.take_report(FPS_REPORT_INTERVAL) {
                log::debug!("{fps:.1} fps after {} frames", self.timer.frame_count());
            }
        }
        Ok(())
    }

    fn render_frame(&mut self, delta_time: f32) -> Result<FrameOutcome, EngineError> {
        let camera = self
            .registry
            .get::<Camera>(self.camera)
            .or_else(|| self.registry.first::<Camera>().map(|(_, camera)| camera))
            .cloned()
            .unwrap_or_default();
        let lights: Vec<Light> = self.registry.iter::<Light>().map(|(_, light)| *light).collect();

        let outcome = self.renderer.render_frame(&camera, &lights, delta_time)?;
        if matches!(outcome, FrameOutcome::Skipped) {
            // Minimized; block until something happens instead of spinning
            self.window.wait_events();
        }
        Ok(outcome)
    }

    /// Built-in reaction to window and input events
    pub fn handle_event(&mut self, event: &InputEvent) {
        match *event {
            InputEvent::Quit | InputEvent::KeyDown(Key::Escape) => self.quit(),
            InputEvent::Resized { width, height } => self.renderer.notify_resized(width, height),
            _ => {
                let camera = self.camera;
                if let Some(camera) = self.registry.get_mut::<Camera>(camera) {
                    steer_camera(camera, &mut self.mouse_look, event);
                }
            }
        }
    }

    /// Replace the scene's models with the model at `path`
    ///
    /// On failure the message goes to the error reporter and the current
    /// scene stays as it was.
    pub fn load_model(&mut self, path: impl AsRef<Path>) -> Result<(), EngineError> {
        let staged = report_failure(
            stage_model(&self.scene, self.loader.as_ref(), path.as_ref()),
            self.reporter.as_ref(),
            "Failed to load model",
        )?;
        self.commit_scene(staged)
    }

    /// Replace the environment map with the image at `path`
    pub fn load_skybox(&mut self, path: impl AsRef<Path>) -> Result<(), EngineError> {
        let staged = report_failure(
            stage_skybox(&self.scene, self.loader.as_ref(), path.as_ref()),
            self.reporter.as_ref(),
            "Failed to load skybox",
        )?;
        self.commit_scene(staged)
    }

    fn commit_scene(&mut self, staged: Scene) -> Result<(), EngineError> {
        if self.renderer.state() == LifecycleState::Prepared {
            report_rebuild_failure(
                self.renderer.scene_changed(&staged).map_err(EngineError::from),
                self.reporter.as_ref(),
            )?;
        }
        self.scene = staged;
        Ok(())
    }

    /// Request engine shutdown
    pub fn quit(&mut self) {
        log::info!("Engine shutdown requested");
        self.running = false;
    }

    fn shutdown(&mut self) -> Result<(), EngineError> {
        self.renderer.cleanup()?;
        log::info!("Engine shutdown complete ({:?})", self.renderer.state());
        Ok(())
    }

    /// Asset root directory
    pub fn get_asset_path(&self) -> &Path {
        self.paths.root()
    }

    /// Logical device
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Entity/component store holding the camera and lights
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Entity carrying the active camera
    pub const fn camera_entity(&self) -> Entity {
        self.camera
    }

    /// Currently committed scene
    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    /// Frame orchestrator
    pub fn renderer(&self) -> &FrameOrchestrator<SwapchainFrameBackend> {
        &self.renderer
    }

    /// Configuration the engine was started with
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Frame timing
    pub fn timer(&self) -> &Timer {
        &self.timer
    }
}

/// Everything created during bring-up before the registry is populated
struct BringUp {
    renderer: FrameOrchestrator<SwapchainFrameBackend>,
    device: Arc<Device>,
    window: Window,
    scene: Scene,
    loader: Box<dyn AssetLoader>,
    paths: AssetPaths,
    config: EngineConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{ImageData, PixelFormat};
    use crate::input::MouseButton;
    use crate::render::AccelerationBuildError;
    use crate::scene::ModelData;
    use approx::assert_relative_eq;
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingReporter {
        reports: RefCell<Vec<(Severity, String, String)>>,
    }

    impl ErrorReporter for RecordingReporter {
        fn report(&self, severity: Severity, title: &str, message: &str) {
            self.reports
                .borrow_mut()
                .push((severity, title.to_string(), message.to_string()));
        }
    }

    struct FixedLoader;

    impl AssetLoader for FixedLoader {
        fn load_model(&self, path: &Path) -> AssetResult<ModelData> {
            match path.to_str() {
                Some("good.obj") => Ok(ModelData {
                    source: "good.obj".into(),
                    nodes: Vec::new(),
                }),
                Some("broken.obj") => Err(AssetError::LoadFailed("broken.obj: line 3: bad face".into())),
                _ => Err(AssetError::NotFound(path.display().to_string())),
            }
        }

        fn load_skybox(&self, _path: &Path) -> AssetResult<ImageData> {
            Ok(ImageData::solid_float([0.2, 0.3, 0.4, 1.0]))
        }
    }

    fn loaded_scene() -> Scene {
        let mut scene = Scene::new();
        scene.add_model(ModelData {
            source: "first.obj".into(),
            nodes: Vec::new(),
        });
        scene
    }

    #[test]
    fn test_missing_model_is_reported_and_scene_kept() {
        let scene = loaded_scene();
        let generation = scene.generation();
        let reporter = RecordingReporter::default();

        let result = report_failure(
            stage_model(&scene, &FixedLoader, Path::new("missing.obj")),
            &reporter,
            "Failed to load model",
        );

        assert!(matches!(result, Err(AssetError::NotFound(_))));
        assert_eq!(scene.generation(), generation);
        assert_eq!(scene.models()[0].source, "first.obj");

        let reports = reporter.reports.borrow();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].0, Severity::Error);
        assert!(reports[0].2.contains("missing.obj"));
    }

    #[test]
    fn test_malformed_model_message_reaches_reporter() {
        let reporter = RecordingReporter::default();
        let result = report_failure(
            stage_model(&loaded_scene(), &FixedLoader, Path::new("broken.obj")),
            &reporter,
            "Failed to load model",
        );
        assert!(result.is_err());
        assert!(reporter.reports.borrow()[0].2.contains("bad face"));
    }

    #[test]
    fn test_file_loader_missing_path_is_not_found() {
        let loader = FileAssetLoader::new(AssetPaths::new(std::env::temp_dir(), "shaders"));
        let result = stage_model(&Scene::new(), &loader, Path::new("rt_engine_no_such_model.obj"));
        assert!(matches!(result, Err(AssetError::NotFound(_))));
    }

    #[test]
    fn test_staged_model_replaces_models() {
        let scene = loaded_scene();
        let staged = stage_model(&scene, &FixedLoader, Path::new("good.obj")).unwrap();
        assert_eq!(staged.models().len(), 1);
        assert_eq!(staged.models()[0].source, "good.obj");
        assert!(staged.generation() > scene.generation());
        assert_eq!(scene.models()[0].source, "first.obj");
    }

    #[test]
    fn test_staged_skybox_keeps_models() {
        let scene = loaded_scene();
        let staged = stage_skybox(&scene, &FixedLoader, Path::new("sky.hdr")).unwrap();
        assert_eq!(staged.models().len(), 1);
        assert_eq!(staged.environment().map(|image| image.format), Some(PixelFormat::Rgba32Float));
        assert!(scene.environment().is_none());
    }

    #[test]
    fn test_recenter_key_restores_home_pose() {
        let mut camera = Camera::default();
        let mut look = MouseLook::default();
        let home = camera.position;

        assert!(steer_camera(&mut camera, &mut look, &InputEvent::KeyDown(Key::W)));
        assert!((camera.position - home).norm() > 0.0);

        assert!(steer_camera(&mut camera, &mut look, &InputEvent::KeyDown(Key::R)));
        assert_relative_eq!(camera.position, home);
    }

    #[test]
    fn test_mouse_drag_turns_camera() {
        let mut camera = Camera::default();
        let mut look = MouseLook::default();
        let yaw = camera.yaw;

        let press = InputEvent::MouseButton {
            button: MouseButton::Right,
            pressed: true,
        };
        assert!(!steer_camera(&mut camera, &mut look, &press));
        assert!(!steer_camera(&mut camera, &mut look, &InputEvent::MouseMotion { x: 10.0, y: 10.0 }));
        assert!(steer_camera(&mut camera, &mut look, &InputEvent::MouseMotion { x: 20.0, y: 10.0 }));
        assert_relative_eq!(camera.yaw, yaw + 10.0 * LOOK_SENSITIVITY);
    }

    #[test]
    fn test_unbound_keys_leave_camera_alone() {
        let mut camera = Camera::default();
        let mut look = MouseLook::default();
        assert!(!steer_camera(&mut camera, &mut look, &InputEvent::KeyDown(Key::Space)));
        assert!(!steer_camera(&mut camera, &mut look, &InputEvent::KeyUp(Key::W)));
    }

    #[test]
    fn test_lost_device_is_never_recoverable() {
        let lost = VulkanError::Api(vk::Result::ERROR_DEVICE_LOST);
        let from_wait_idle = EngineError::Render(RenderError::Vulkan(lost.clone()));
        let from_build = EngineError::Render(RenderError::Acceleration(AccelerationBuildError::TopLevel {
            instance_count: 4,
            source: lost,
        }));
        assert!(!from_wait_idle.is_recoverable());
        assert!(!from_build.is_recoverable());
        assert_eq!(from_wait_idle.severity(), Severity::Fatal);
    }

    #[test]
    fn test_asset_and_out_of_memory_builds_are_recoverable() {
        let asset = EngineError::Asset(AssetError::NotFound("gone.obj".into()));
        let build = EngineError::Render(RenderError::Acceleration(AccelerationBuildError::BottomLevel {
            primitive: 2,
            source: VulkanError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY),
        }));
        assert!(asset.is_recoverable());
        assert!(build.is_recoverable());
        assert_eq!(build.severity(), Severity::Error);
    }

    #[test]
    fn test_rebuild_failure_on_lost_device_is_reported_fatal() {
        let reporter = RecordingReporter::default();
        let lost = EngineError::Render(RenderError::Vulkan(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST)));

        let result = report_rebuild_failure(Err(lost), &reporter);

        assert!(matches!(result, Err(EngineError::Render(_))));
        let reports = reporter.reports.borrow();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].0, Severity::Fatal);
        assert_eq!(reports[0].1, "Failed to rebuild scene");
    }
}
