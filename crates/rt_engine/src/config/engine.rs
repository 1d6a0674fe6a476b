//! Engine, window, renderer and asset settings

use serde::{Deserialize, Serialize};

use super::{Config, ConfigError};

/// Which rendering strategy drives the frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RenderMode {
    /// Hardware ray tracing with a copy to the swapchain image
    #[default]
    RayTracing,
    /// Forward rasterization inside the frame render pass
    Raster,
}

/// Window settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Window title
    pub title: String,
    /// Initial width in screen coordinates
    pub width: u32,
    /// Initial height in screen coordinates
    pub height: u32,
    /// Whether the user may resize the window
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "RT Viewer".to_string(),
            width: 1280,
            height: 720,
            resizable: true,
        }
    }
}

/// Vulkan renderer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Whether to enable Vulkan validation layers (`None` follows the build type)
    pub enable_validation: Option<bool>,
    /// Number of frames the CPU may record ahead of the GPU
    pub frames_in_flight: usize,
    /// Rendering strategy
    pub mode: RenderMode,
    /// Descriptors reserved per descriptor type in each pool
    pub descriptor_quota_per_type: u32,
    /// Upper bound for blocking fence waits, in nanoseconds
    pub fence_timeout_ns: u64,
    /// Prefer mailbox presentation over FIFO when the surface supports it
    pub prefer_low_latency_present: bool,
    /// Maximum ray recursion depth requested from the ray tracing pipeline
    pub max_ray_recursion_depth: u32,
}

impl RendererConfig {
    /// Create a new renderer configuration
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            enable_validation: None,
            frames_in_flight: 2,
            mode: RenderMode::RayTracing,
            descriptor_quota_per_type: 64,
            fence_timeout_ns: 100_000_000_000,
            prefer_low_latency_present: true,
            max_ray_recursion_depth: 1,
        }
    }

    /// Set the rendering strategy
    #[must_use]
    pub const fn with_mode(mut self, mode: RenderMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set frames in flight
    #[must_use]
    pub const fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    /// Enable or disable validation layers
    #[must_use]
    pub const fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = Some(enabled);
        self
    }

    /// Resolved validation setting
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.application_name.is_empty() {
            return Err(ConfigError::Invalid("application name cannot be empty".to_string()));
        }
        if !(1..=8).contains(&self.frames_in_flight) {
            return Err(ConfigError::Invalid(format!(
                "frames in flight must be between 1 and 8, got {}",
                self.frames_in_flight
            )));
        }
        if self.descriptor_quota_per_type == 0 {
            return Err(ConfigError::Invalid("descriptor quota must be at least 1".to_string()));
        }
        if self.fence_timeout_ns == 0 {
            return Err(ConfigError::Invalid("fence timeout must be non-zero".to_string()));
        }
        if self.max_ray_recursion_depth == 0 {
            return Err(ConfigError::Invalid("ray recursion depth must be at least 1".to_string()));
        }
        Ok(())
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self::new("RT Viewer")
    }
}

/// Asset locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    /// Directory every relative asset path resolves against
    pub asset_root: String,
    /// Directory holding compiled SPIR-V shaders, relative to the asset root
    pub shader_dir: String,
    /// Equirectangular environment map loaded at startup
    pub skybox: Option<String>,
    /// Model loaded at startup
    pub model: Option<String>,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            asset_root: "resources".to_string(),
            shader_dir: "shaders".to_string(),
            skybox: None,
            model: None,
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fallback log filter when `RUST_LOG` is unset
    pub log_level: String,
    /// Window settings
    pub window: WindowConfig,
    /// Renderer settings
    pub renderer: RendererConfig,
    /// Asset settings
    pub assets: AssetConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            window: WindowConfig::default(),
            renderer: RendererConfig::default(),
            assets: AssetConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Validate every section
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "window size must be non-zero, got {}x{}",
                self.window.width, self.window.height
            )));
        }
        self.renderer.validate()
    }
}

impl Config for EngineConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.window.height, 720);
        assert_eq!(config.renderer.frames_in_flight, 2);
        assert_eq!(config.renderer.descriptor_quota_per_type, 64);
        assert_eq!(config.renderer.mode, RenderMode::RayTracing);
    }

    #[test]
    fn test_frames_in_flight_bounds() {
        assert!(RendererConfig::default().with_frames_in_flight(0).validate().is_err());
        assert!(RendererConfig::default().with_frames_in_flight(9).validate().is_err());
        assert!(RendererConfig::default().with_frames_in_flight(3).validate().is_ok());
    }

    #[test]
    fn test_zero_window_is_invalid() {
        let mut config = EngineConfig::default();
        config.window.height = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: EngineConfig = toml::from_str("[window]\nwidth = 800\n").unwrap();
        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 720);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_explicit_validation_overrides_build_type() {
        assert!(RendererConfig::default().with_validation(true).validation_enabled());
        assert!(!RendererConfig::default().with_validation(false).validation_enabled());
    }
}
