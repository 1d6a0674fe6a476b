//! Model data produced by asset loading

use bytemuck::{Pod, Zeroable};

use crate::assets::ImageData;
use crate::foundation::math::Mat4;

/// Interleaved vertex shared by the raster and ray tracing paths
///
/// Two `vec4`s per vertex keep the layout identical under std140, std430
/// and the vertex input bindings.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    /// Object-space position
    pub position: [f32; 3],
    /// Texture coordinate U
    pub u: f32,
    /// Object-space normal
    pub normal: [f32; 3],
    /// Texture coordinate V
    pub v: f32,
}

impl Vertex {
    /// Build a vertex from its parts
    pub const fn new(position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Self {
            position,
            u: uv[0],
            normal,
            v: uv[1],
        }
    }
}

/// Optional texture slots of a material, in descriptor array order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureSlot {
    /// Albedo
    BaseColor,
    /// Metallic in B, roughness in G
    MetallicRoughness,
    /// Tangent-space normal map
    Normal,
    /// Ambient occlusion and emissive
    OcclusionEmissive,
}

impl TextureSlot {
    /// Every slot in binding order
    pub const ALL: [Self; 4] = [
        Self::BaseColor,
        Self::MetallicRoughness,
        Self::Normal,
        Self::OcclusionEmissive,
    ];

    /// Position of the slot in [`MaterialData::textures`]
    pub const fn index(self) -> usize {
        match self {
            Self::BaseColor => 0,
            Self::MetallicRoughness => 1,
            Self::Normal => 2,
            Self::OcclusionEmissive => 3,
        }
    }
}

/// Surface description of one primitive
#[derive(Debug, Clone)]
pub struct MaterialData {
    /// Material name from the source file
    pub name: String,
    /// Linear RGBA base color factor
    pub base_color: [f32; 4],
    /// Metallic factor
    pub metallic: f32,
    /// Roughness factor
    pub roughness: f32,
    /// Emissive color
    pub emissive: [f32; 3],
    /// Decoded texture images, indexed by [`TextureSlot::index`]
    pub textures: [Option<ImageData>; 4],
}

impl Default for MaterialData {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            base_color: [0.8, 0.8, 0.8, 1.0],
            metallic: 0.0,
            roughness: 0.5,
            emissive: [0.0; 3],
            textures: [None, None, None, None],
        }
    }
}

impl MaterialData {
    /// Texture bound to a slot, if any
    pub fn texture(&self, slot: TextureSlot) -> Option<&ImageData> {
        self.textures[slot.index()].as_ref()
    }
}

/// Indexed triangle list with a material
#[derive(Debug, Clone, Default)]
pub struct PrimitiveData {
    /// Vertex data
    pub vertices: Vec<Vertex>,
    /// Triangle list indices into `vertices`
    pub indices: Vec<u32>,
    /// Surface material
    pub material: MaterialData,
}

impl PrimitiveData {
    /// Number of triangles
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// A mesh made of one or more primitives
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    /// Mesh name
    pub name: String,
    /// Primitives in source order
    pub primitives: Vec<PrimitiveData>,
}

/// One entry of a model's flattened node list
#[derive(Debug, Clone)]
pub struct NodeData {
    /// Node name
    pub name: String,
    /// Model-to-world transform with parents already applied
    pub transform: Mat4,
    /// Mesh attached to this node
    pub mesh: Option<MeshData>,
}

/// A loaded model as a flat node list
#[derive(Debug, Clone, Default)]
pub struct ModelData {
    /// Where the model came from
    pub source: String,
    /// Nodes in load order
    pub nodes: Vec<NodeData>,
}

impl ModelData {
    /// Number of mesh primitives across every node
    pub fn primitive_count(&self) -> usize {
        self.nodes
            .iter()
            .filter_map(|node| node.mesh.as_ref())
            .map(|mesh| mesh.primitives.len())
            .sum()
    }
}
