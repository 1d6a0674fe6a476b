//! Scene container and the canonical primitive traversal

use crate::assets::ImageData;
use crate::foundation::math::Mat4;

use super::model::{ModelData, PrimitiveData};

/// A mesh primitive located in the scene
///
/// `index` is the primitive's position in [`Scene::primitives`]. Acceleration
/// structures, instances, hit-group data and descriptor arrays all use it.
#[derive(Debug, Clone, Copy)]
pub struct PrimitiveRef<'a> {
    /// Position in the flattened traversal
    pub index: usize,
    /// Index of the owning model
    pub model: usize,
    /// Index of the owning node within its model
    pub node: usize,
    /// Model-to-world transform of the owning node
    pub transform: &'a Mat4,
    /// Geometry and material
    pub primitive: &'a PrimitiveData,
}

/// Loaded models plus the environment map
#[derive(Debug, Default, Clone)]
pub struct Scene {
    models: Vec<ModelData>,
    environment: Option<ImageData>,
    generation: u64,
}

impl Scene {
    /// Create an empty scene
    pub fn new() -> Self {
        Self::default()
    }

    /// Loaded models in load order
    pub fn models(&self) -> &[ModelData] {
        &self.models
    }

    /// Append a model
    pub fn add_model(&mut self, model: ModelData) {
        log::info!(
            "Adding model '{}' with {} primitives",
            model.source,
            model.primitive_count()
        );
        self.models.push(model);
        self.generation += 1;
    }

    /// Replace every loaded model with a single one
    pub fn replace_models(&mut self, model: ModelData) {
        self.models.clear();
        self.add_model(model);
    }

    /// Equirectangular environment image
    pub fn environment(&self) -> Option<&ImageData> {
        self.environment.as_ref()
    }

    /// Replace the environment image
    pub fn set_environment(&mut self, image: ImageData) {
        self.environment = Some(image);
        self.generation += 1;
    }

    /// Counter bumped by every mutation, used to detect stale GPU state
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Canonical traversal: models in load order, then nodes, then mesh primitives
    pub fn primitives(&self) -> impl Iterator<Item = PrimitiveRef<'_>> {
        self.models
            .iter()
            .enumerate()
            .flat_map(|(model_index, model)| {
                model.nodes.iter().enumerate().flat_map(move |(node_index, node)| {
                    node.mesh.iter().flat_map(move |mesh| {
                        mesh.primitives.iter().map(move |primitive| (model_index, node_index, &node.transform, primitive))
                    })
                })
            })
            .enumerate()
            .map(|(index, (model, node, transform, primitive))| PrimitiveRef {
                index,
                model,
                node,
                transform,
                primitive,
            })
    }

    /// Total number of primitives
    pub fn primitive_count(&self) -> usize {
        self.models.iter().map(ModelData::primitive_count).sum()
    }

    /// Whether no primitive is loaded
    pub fn is_empty(&self) -> bool {
        self.primitive_count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec3;
    use crate::scene::{MaterialData, MeshData, NodeData};

    fn primitive(name: &str) -> PrimitiveData {
        PrimitiveData {
            material: MaterialData {
                name: name.to_string(),
                ..MaterialData::default()
            },
            ..PrimitiveData::default()
        }
    }

    fn node(x: f32, names: &[&str]) -> NodeData {
        NodeData {
            name: format!("node_{x}"),
            transform: Mat4::new_translation(&Vec3::new(x, 0.0, 0.0)),
            mesh: Some(MeshData {
                name: String::new(),
                primitives: names.iter().map(|name| primitive(name)).collect(),
            }),
        }
    }

    #[test]
    fn test_traversal_order_is_model_node_primitive() {
        let mut scene = Scene::new();
        scene.add_model(ModelData {
            source: "a".into(),
            nodes: vec![
                node(1.0, &["a0", "a1"]),
                NodeData {
                    name: "empty".into(),
                    transform: Mat4::identity(),
                    mesh: None,
                },
                node(2.0, &["a2"]),
            ],
        });
        scene.add_model(ModelData {
            source: "b".into(),
            nodes: vec![node(3.0, &["b0"])],
        });

        let names: Vec<_> = scene.primitives().map(|p| p.primitive.material.name.clone()).collect();
        assert_eq!(names, ["a0", "a1", "a2", "b0"]);

        let indices: Vec<_> = scene.primitives().map(|p| p.index).collect();
        assert_eq!(indices, [0, 1, 2, 3]);

        let last = scene.primitives().last().unwrap();
        assert_eq!((last.model, last.node), (1, 0));
        assert_eq!(last.transform[(0, 3)], 3.0);
        assert_eq!(scene.primitive_count(), 4);
    }

    #[test]
    fn test_mutations_bump_generation() {
        let mut scene = Scene::new();
        assert!(scene.is_empty());
        let start = scene.generation();
        scene.add_model(ModelData::default());
        scene.replace_models(ModelData::default());
        assert_eq!(scene.models().len(), 1);
        assert!(scene.generation() > start + 1);
    }
}
