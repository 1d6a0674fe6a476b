//! Wavefront OBJ and MTL parsing
//!
//! Each `o`/`g` group, and each `usemtl` switch inside a group, becomes its
//! own primitive. Polygons are fan-triangulated. Vertices without an explicit
//! normal get a smoothed normal from the faces that use them.

use std::collections::HashMap;

use super::{AssetError, AssetResult, ImageData, PixelFormat};
use crate::scene::{MaterialData, MeshData, PrimitiveData, TextureSlot, Vertex};

type VertexKey = (usize, Option<usize>, Option<usize>);

#[derive(Default)]
struct PrimitiveBuilder {
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
    lookup: HashMap<VertexKey, u32>,
    generated_normals: Vec<bool>,
    material: MaterialData,
}

impl PrimitiveBuilder {
    fn with_material(material: MaterialData) -> Self {
        Self {
            material,
            ..Self::default()
        }
    }

    fn vertex(&mut self, key: VertexKey, positions: &[[f32; 3]], normals: &[[f32; 3]], uvs: &[[f32; 2]]) -> u32 {
        if let Some(&index) = self.lookup.get(&key) {
            return index;
        }
        let (position, uv, normal) = key;
        let index = self.vertices.len() as u32;
        self.vertices.push(Vertex::new(
            positions[position],
            normal.map_or([0.0; 3], |n| normals[n]),
            uv.map_or([0.0; 2], |t| uvs[t]),
        ));
        self.generated_normals.push(normal.is_none());
        self.lookup.insert(key, index);
        index
    }

    fn finish(mut self) -> PrimitiveData {
        if self.generated_normals.iter().any(|&generated| generated) {
            self.smooth_missing_normals();
        }
        PrimitiveData {
            vertices: self.vertices,
            indices: self.indices,
            material: self.material,
        }
    }

    fn smooth_missing_normals(&mut self) {
        let mut accumulated = vec![[0.0f32; 3]; self.vertices.len()];
        for triangle in self.indices.chunks_exact(3) {
            let [a, b, c] = [triangle[0] as usize, triangle[1] as usize, triangle[2] as usize];
            let (pa, pb, pc) = (
                self.vertices[a].position,
                self.vertices[b].position,
                self.vertices[c].position,
            );
            let e1 = [pb[0] - pa[0], pb[1] - pa[1], pb[2] - pa[2]];
            let e2 = [pc[0] - pa[0], pc[1] - pa[1], pc[2] - pa[2]];
            let face = [
                e1[1] * e2[2] - e1[2] * e2[1],
                e1[2] * e2[0] - e1[0] * e2[2],
                e1[0] * e2[1] - e1[1] * e2[0],
            ];
            for &vertex in &[a, b, c] {
                for axis in 0..3 {
                    accumulated[vertex][axis] += face[axis];
                }
            }
        }

        for (index, vertex) in self.vertices.iter_mut().enumerate() {
            if !self.generated_normals[index] {
                continue;
            }
            let n = accumulated[index];
            let length = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
            vertex.normal = if length > f32::EPSILON {
                [n[0] / length, n[1] / length, n[2] / length]
            } else {
                [0.0, 1.0, 0.0]
            };
        }
    }
}

/// Material libraries named by `mtllib` statements, in file order
pub fn referenced_libraries(source: &str) -> Vec<String> {
    source
        .lines()
        .filter_map(|line| line.trim().strip_prefix("mtllib "))
        .flat_map(str::split_whitespace)
        .map(str::to_string)
        .collect()
}

/// Parse OBJ text into a mesh, resolving `usemtl` against `materials`
pub fn parse_obj(source: &str, name: &str, materials: &HashMap<String, MaterialData>) -> AssetResult<MeshData> {
    let mut positions: Vec<[f32; 3]> = Vec::new();
    let mut normals: Vec<[f32; 3]> = Vec::new();
    let mut uvs: Vec<[f32; 2]> = Vec::new();

    let mut primitives = Vec::new();
    let mut current = PrimitiveBuilder::default();

    for (line_index, raw_line) in source.lines().enumerate() {
        let line_number = line_index + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut parts = line.split_whitespace();
        let Some(keyword) = parts.next() else {
            continue;
        };

        match keyword {
            "v" => positions.push(parse_floats::<3>(parts, line_number)?),
            "vn" => normals.push(parse_floats::<3>(parts, line_number)?),
            "vt" => {
                let [u, v] = parse_floats::<2>(parts, line_number)?;
                uvs.push([u, 1.0 - v]);
            }
            "o" | "g" => {
                if !current.indices.is_empty() {
                    let material = current.material.clone();
                    primitives.push(std::mem::replace(&mut current, PrimitiveBuilder::with_material(material)).finish());
                }
            }
            "usemtl" => {
                let material_name = parts.next().unwrap_or_default();
                let material = materials.get(material_name).cloned().unwrap_or_else(|| {
                    log::warn!("OBJ line {line_number}: unknown material '{material_name}', using default");
                    MaterialData::default()
                });
                if current.indices.is_empty() {
                    current.material = material;
                } else {
                    primitives.push(std::mem::replace(&mut current, PrimitiveBuilder::with_material(material)).finish());
                }
            }
            "f" => {
                let mut corners = Vec::with_capacity(4);
                for token in parts {
                    let key = parse_face_vertex(token, positions.len(), uvs.len(), normals.len(), line_number)?;
                    corners.push(current.vertex(key, &positions, &normals, &uvs));
                }
                if corners.len() < 3 {
                    return Err(AssetError::LoadFailed(format!(
                        "OBJ line {line_number}: face needs at least 3 vertices"
                    )));
                }
                for i in 1..corners.len() - 1 {
                    current.indices.extend_from_slice(&[corners[0], corners[i], corners[i + 1]]);
                }
            }
            _ => {}
        }
    }

    if !current.indices.is_empty() {
        primitives.push(current.finish());
    }
    if primitives.is_empty() {
        return Err(AssetError::LoadFailed(format!("OBJ '{name}' contains no faces")));
    }

    Ok(MeshData {
        name: name.to_string(),
        primitives,
    })
}

/// Parse MTL text into named materials
///
/// `load_texture` receives each texture path as written in the file along
/// with the pixel format the slot expects.
pub fn parse_mtl<F>(source: &str, mut load_texture: F) -> AssetResult<HashMap<String, MaterialData>>
where
    F: FnMut(&str, PixelFormat) -> AssetResult<ImageData>,
{
    let mut materials = HashMap::new();
    let mut current: Option<MaterialData> = None;
    let mut explicit_roughness = false;

    for (line_index, raw_line) in source.lines().enumerate() {
        let line_number = line_index + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut parts = line.split_whitespace();
        let Some(keyword) = parts.next() else {
            continue;
        };

        if keyword == "newmtl" {
            if let Some(done) = current.take() {
                materials.insert(done.name.clone(), done);
            }
            current = Some(MaterialData {
                name: parts.next().unwrap_or_default().to_string(),
                ..MaterialData::default()
            });
            explicit_roughness = false;
            continue;
        }

        let Some(material) = current.as_mut() else {
            return Err(AssetError::LoadFailed(format!(
                "MTL line {line_number}: '{keyword}' before any newmtl"
            )));
        };

        match keyword {
            "Kd" => {
                let [r, g, b] = parse_floats::<3>(parts, line_number)?;
                material.base_color = [r, g, b, material.base_color[3]];
            }
            "d" => material.base_color[3] = parse_floats::<1>(parts, line_number)?[0],
            "Ke" => material.emissive = parse_floats::<3>(parts, line_number)?,
            "Pm" => material.metallic = parse_floats::<1>(parts, line_number)?[0],
            "Pr" => {
                material.roughness = parse_floats::<1>(parts, line_number)?[0];
                explicit_roughness = true;
            }
            "Ns" if !explicit_roughness => {
                let shininess = parse_floats::<1>(parts, line_number)?[0].max(0.0);
                material.roughness = (2.0 / (shininess + 2.0)).sqrt();
            }
            _ => {
                if let Some((slot, format)) = texture_slot(keyword) {
                    // Texture options precede the file name
                    let path = parts.last().ok_or_else(|| {
                        AssetError::LoadFailed(format!("MTL line {line_number}: '{keyword}' without a file"))
                    })?;
                    material.textures[slot.index()] = Some(load_texture(path, format)?);
                }
            }
        }
    }

    if let Some(done) = current {
        materials.insert(done.name.clone(), done);
    }
    Ok(materials)
}

fn texture_slot(keyword: &str) -> Option<(TextureSlot, PixelFormat)> {
    match keyword {
        "map_Kd" => Some((TextureSlot::BaseColor, PixelFormat::Rgba8Srgb)),
        "map_Pm" | "map_Pr" => Some((TextureSlot::MetallicRoughness, PixelFormat::Rgba8Unorm)),
        "map_Bump" | "map_bump" | "bump" | "norm" => Some((TextureSlot::Normal, PixelFormat::Rgba8Unorm)),
        "map_Ke" | "map_ao" => Some((TextureSlot::OcclusionEmissive, PixelFormat::Rgba8Unorm)),
        _ => None,
    }
}

fn parse_floats<'a, const N: usize>(
    mut parts: impl Iterator<Item = &'a str>,
    line_number: usize,
) -> AssetResult<[f32; N]> {
    let mut values = [0.0; N];
    for value in &mut values {
        let token = parts
            .next()
            .ok_or_else(|| AssetError::LoadFailed(format!("line {line_number}: expected {N} numbers")))?;
        *value = token
            .parse()
            .map_err(|_| AssetError::LoadFailed(format!("line {line_number}: invalid number '{token}'")))?;
    }
    Ok(values)
}

fn resolve_index(token: &str, count: usize, line_number: usize) -> AssetResult<usize> {
    let raw: i64 = token
        .parse()
        .map_err(|_| AssetError::LoadFailed(format!("line {line_number}: invalid index '{token}'")))?;
    let resolved = match raw {
        0 => None,
        positive if positive > 0 => Some(positive - 1),
        negative => Some(count as i64 + negative),
    };
    match resolved {
        Some(index) if (0..count as i64).contains(&index) => Ok(index as usize),
        _ => Err(AssetError::LoadFailed(format!(
            "line {line_number}: index {raw} out of range (have {count})"
        ))),
    }
}

fn parse_face_vertex(
    token: &str,
    position_count: usize,
    uv_count: usize,
    normal_count: usize,
    line_number: usize,
) -> AssetResult<VertexKey> {
    let mut fields = token.split('/');
    let position = resolve_index(fields.next().unwrap_or_default(), position_count, line_number)?;
    let uv = match fields.next() {
        Some(field) if !field.is_empty() => Some(resolve_index(field, uv_count, line_number)?),
        _ => None,
    };
    let normal = match fields.next() {
        Some(field) if !field.is_empty() => Some(resolve_index(field, normal_count, line_number)?),
        _ => None,
    };
    Ok((position, uv, normal))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const TWO_GROUPS: &str = "\
# two triangles in separate groups
v 0 0 0
v 1 0 0
v 0 1 0
v 0 0 1
vn 0 0 1
g first
f 1//1 2//1 3//1
g second
f 1 2 4
";

    #[test]
    fn test_groups_become_primitives() {
        let mesh = parse_obj(TWO_GROUPS, "pair", &HashMap::new()).unwrap();
        assert_eq!(mesh.primitives.len(), 2);
        assert_eq!(mesh.primitives[0].triangle_count(), 1);
        assert_eq!(mesh.primitives[1].triangle_count(), 1);
    }

    #[test]
    fn test_missing_normals_are_generated() {
        let mesh = parse_obj(TWO_GROUPS, "pair", &HashMap::new()).unwrap();
        let normal = mesh.primitives[1].vertices[0].normal;
        // Triangle (0,0,0) (1,0,0) (0,0,1) faces -Y
        assert_relative_eq!(normal[1], -1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_quad_is_fan_triangulated_with_shared_vertices() {
        let source = "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nf 1 2 3 4\n";
        let mesh = parse_obj(source, "quad", &HashMap::new()).unwrap();
        let primitive = &mesh.primitives[0];
        assert_eq!(primitive.vertices.len(), 4);
        assert_eq!(primitive.indices, vec![0, 1, 2, 0, 2, 3]);
    }

    #[test]
    fn test_negative_indices_are_relative() {
        let source = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf -3 -2 -1\n";
        let mesh = parse_obj(source, "relative", &HashMap::new()).unwrap();
        assert_eq!(mesh.primitives[0].vertices[2].position, [0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_out_of_range_index_is_an_error() {
        let source = "v 0 0 0\nv 1 0 0\nf 1 2 3\n";
        let error = parse_obj(source, "broken", &HashMap::new()).unwrap_err();
        assert!(error.to_string().contains("line 3"));
    }

    #[test]
    fn test_file_without_faces_is_an_error() {
        let result = parse_obj("v 0 0 0\n", "empty", &HashMap::new());
        assert!(matches!(result, Err(AssetError::LoadFailed(_))));
    }

    #[test]
    fn test_usemtl_splits_primitives_and_applies_material() {
        let mut materials = HashMap::new();
        materials.insert(
            "blue".to_string(),
            MaterialData {
                name: "blue".into(),
                base_color: [0.0, 0.0, 1.0, 1.0],
                ..MaterialData::default()
            },
        );
        let source = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\nusemtl blue\nf 3 2 1\n";
        let mesh = parse_obj(source, "mixed", &materials).unwrap();
        assert_eq!(mesh.primitives.len(), 2);
        assert_eq!(mesh.primitives[0].material.name, "default");
        assert_eq!(mesh.primitives[1].material.base_color, [0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_mtl_textures_use_last_token_and_slot_format() {
        let source = "newmtl brick\nKd 0.5 0.5 0.5\nNs 98\nmap_Kd -s 2 2 1 brick.png\nnorm brick_n.png\n";
        let mut requested = Vec::new();
        let materials = parse_mtl(source, |path, format| {
            requested.push((path.to_string(), format));
            Ok(ImageData::solid([255; 4]))
        })
        .unwrap();

        let brick = &materials["brick"];
        assert!(brick.texture(TextureSlot::BaseColor).is_some());
        assert!(brick.texture(TextureSlot::Normal).is_some());
        assert!(brick.texture(TextureSlot::MetallicRoughness).is_none());
        assert_relative_eq!(brick.roughness, 0.1414, epsilon = 1e-3);
        assert_eq!(
            requested,
            vec![
                ("brick.png".to_string(), PixelFormat::Rgba8Srgb),
                ("brick_n.png".to_string(), PixelFormat::Rgba8Unorm),
            ]
        );
    }

    #[test]
    fn test_mtl_texture_failure_propagates() {
        let source = "newmtl broken\nmap_Kd missing.png\n";
        let result = parse_mtl(source, |path, _| Err(AssetError::NotFound(path.to_string())));
        assert!(matches!(result, Err(AssetError::NotFound(_))));
    }

    #[test]
    fn test_libraries_are_listed() {
        let source = "mtllib a.mtl b.mtl\nv 0 0 0\nmtllib c.mtl\n";
        assert_eq!(referenced_libraries(source), ["a.mtl", "b.mtl", "c.mtl"]);
    }
}
