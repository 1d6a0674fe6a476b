//! Asset loading
//!
//! The renderer consumes models and environment maps through the
//! [`AssetLoader`] trait. [`FileAssetLoader`] reads Wavefront OBJ models
//! (with MTL materials) and any image format the `image` crate decodes.

mod image_loader;
mod obj_loader;

pub use image_loader::{ImageData, PixelFormat};
pub use obj_loader::{parse_mtl, parse_obj, referenced_libraries};

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::scene::{MaterialData, ModelData, NodeData};
use crate::foundation::math::Mat4;

/// Asset loading errors
#[derive(Error, Debug)]
pub enum AssetError {
    /// Asset not found
    #[error("Asset not found: {0}")]
    NotFound(String),

    /// Failed to load asset
    #[error("Failed to load asset: {0}")]
    LoadFailed(String),

    /// Unsupported asset format
    #[error("Unsupported format: {0}")]
    Unsupported(String),
}

/// Result type for asset operations
pub type AssetResult<T> = Result<T, AssetError>;

/// Synchronous source of scene assets
pub trait AssetLoader {
    /// Load a model as a flattened node list
    fn load_model(&self, path: &Path) -> AssetResult<ModelData>;

    /// Load an equirectangular environment map as RGBA32F
    fn load_skybox(&self, path: &Path) -> AssetResult<ImageData>;
}

/// Resolves asset and shader paths against a root directory
#[derive(Debug, Clone)]
pub struct AssetPaths {
    root: PathBuf,
    shader_dir: PathBuf,
}

impl AssetPaths {
    /// Create a resolver rooted at `root`; `shader_dir` is relative to it
    pub fn new(root: impl Into<PathBuf>, shader_dir: impl AsRef<Path>) -> Self {
        let root = root.into();
        let shader_dir = root.join(shader_dir);
        Self { root, shader_dir }
    }

    /// Asset root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve an asset path; absolute paths are returned unchanged
    pub fn asset(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Directory holding compiled shaders
    pub fn shader_dir(&self) -> &Path {
        &self.shader_dir
    }

    /// Path of a compiled shader by file name
    pub fn shader(&self, name: &str) -> PathBuf {
        self.shader_dir.join(name)
    }
}

/// Loader reading assets from the filesystem
#[derive(Debug, Clone)]
pub struct FileAssetLoader {
    paths: AssetPaths,
}

impl FileAssetLoader {
    /// Create a loader resolving relative paths through `paths`
    pub const fn new(paths: AssetPaths) -> Self {
        Self { paths }
    }

    fn existing(&self, path: &Path) -> AssetResult<PathBuf> {
        let resolved = self.paths.asset(path);
        if resolved.is_file() {
            Ok(resolved)
        } else {
            Err(AssetError::NotFound(resolved.display().to_string()))
        }
    }

    fn load_obj(path: &Path) -> AssetResult<ModelData> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| AssetError::LoadFailed(format!("{}: {e}", path.display())))?;
        let directory = path.parent().unwrap_or_else(|| Path::new("."));

        let mut materials: HashMap<String, MaterialData> = HashMap::new();
        for library in referenced_libraries(&source) {
            let library_path = directory.join(&library);
            let library_source = std::fs::read_to_string(&library_path).map_err(|e| {
                AssetError::LoadFailed(format!("material library {}: {e}", library_path.display()))
            })?;
            let parsed = parse_mtl(&library_source, |texture, format| {
                ImageData::from_file(directory.join(texture), format)
            })?;
            materials.extend(parsed);
        }

        let name = path
            .file_stem()
            .map_or_else(|| "model".to_string(), |stem| stem.to_string_lossy().into_owned());
        let mesh = parse_obj(&source, &name, &materials)?;

        Ok(ModelData {
            source: path.display().to_string(),
            nodes: vec![NodeData {
                name,
                transform: Mat4::identity(),
                mesh: Some(mesh),
            }],
        })
    }
}

impl AssetLoader for FileAssetLoader {
    fn load_model(&self, path: &Path) -> AssetResult<ModelData> {
        let resolved = self.existing(path)?;
        let extension = resolved
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);

        match extension.as_deref() {
            Some("obj") => {
                let model = Self::load_obj(&resolved)?;
                log::info!(
                    "Loaded model {} ({} primitives)",
                    resolved.display(),
                    model.primitive_count()
                );
                Ok(model)
            }
            _ => Err(AssetError::Unsupported(resolved.display().to_string())),
        }
    }

    fn load_skybox(&self, path: &Path) -> AssetResult<ImageData> {
        let resolved = self.existing(path)?;
        ImageData::from_file(&resolved, PixelFormat::Rgba32Float)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("rt_engine_assets_{}_{name}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_missing_model_is_not_found() {
        let loader = FileAssetLoader::new(AssetPaths::new(temp_dir("missing"), "shaders"));
        let error = loader.load_model(Path::new("nope/does_not_exist.obj")).unwrap_err();
        assert!(matches!(error, AssetError::NotFound(_)));
        assert!(error.to_string().contains("does_not_exist.obj"));
    }

    #[test]
    fn test_unknown_extension_is_unsupported() {
        let dir = temp_dir("unsupported");
        std::fs::write(dir.join("scene.fbx"), b"binary").unwrap();
        let loader = FileAssetLoader::new(AssetPaths::new(&dir, "shaders"));
        let result = loader.load_model(Path::new("scene.fbx"));
        assert!(matches!(result, Err(AssetError::Unsupported(_))));
    }

    #[test]
    fn test_obj_with_material_library() {
        let dir = temp_dir("obj");
        std::fs::write(
            dir.join("quad.mtl"),
            "newmtl red\nKd 1 0 0\nPr 0.25\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("quad.obj"),
            "mtllib quad.mtl\nv 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\ng quad\nusemtl red\nf 1 2 3 4\n",
        )
        .unwrap();

        let loader = FileAssetLoader::new(AssetPaths::new(&dir, "shaders"));
        let model = loader.load_model(Path::new("quad.obj")).unwrap();
        assert_eq!(model.primitive_count(), 1);

        let mesh = model.nodes[0].mesh.as_ref().unwrap();
        assert_eq!(mesh.primitives[0].material.name, "red");
        assert_eq!(mesh.primitives[0].material.base_color, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(mesh.primitives[0].indices.len(), 6);
    }

    #[test]
    fn test_asset_paths_keep_absolute_paths() {
        let paths = AssetPaths::new("resources", "shaders");
        let absolute = std::env::temp_dir().join("skybox.hdr");
        assert_eq!(paths.asset(&absolute), absolute);
        assert_eq!(paths.asset("models/box.obj"), Path::new("resources/models/box.obj"));
        assert_eq!(paths.shader("raygen.rgen.spv"), Path::new("resources/shaders/raygen.rgen.spv"));
    }
}
