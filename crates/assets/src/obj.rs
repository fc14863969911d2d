//! Wavefront OBJ import.
//!
//! Faces are triangulated and every model in the file is merged into one
//! mesh. Vertices sharing position, normal and texture coordinate are
//! stored once.

use crate::AssetError;
use glam::{Vec2, Vec3};
use lumen_common::{MeshData, Vertex};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

const DEFAULT_NORMAL: Vec3 = Vec3::Z;
const DEFAULT_TEX_COORD: Vec2 = Vec2::ZERO;

/// Load an OBJ file. Material libraries are ignored.
pub fn load_obj(path: impl AsRef<Path>) -> Result<MeshData, AssetError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|source| AssetError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_obj(&path.display().to_string(), &bytes)
}

/// Parse OBJ text. `name` only labels errors and logs.
pub fn parse_obj(name: &str, bytes: &[u8]) -> Result<MeshData, AssetError> {
    let (models, _materials) = tobj::load_obj_buf(
        &mut std::io::Cursor::new(bytes),
        &tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        },
        |_| Err(tobj::LoadError::OpenFileFailed),
    )
    .map_err(|source| AssetError::Obj {
        name: name.to_string(),
        source,
    })?;

    let mut vertices = Vec::new();
    let mut indices = Vec::new();
    let mut unique: BTreeMap<[u32; 8], u32> = BTreeMap::new();

    for model in &models {
        let mesh = &model.mesh;
        for &index in &mesh.indices {
            let i = index as usize;
            let vertex = Vertex::new(
                vec3_at(&mesh.positions, i).unwrap_or(Vec3::ZERO),
                vec3_at(&mesh.normals, i).unwrap_or(DEFAULT_NORMAL),
                vec2_at(&mesh.texcoords, i).unwrap_or(DEFAULT_TEX_COORD),
            );
            let key = vertex_key(&vertex);
            let slot = *unique.entry(key).or_insert_with(|| {
                vertices.push(vertex);
                vertices.len() as u32 - 1
            });
            indices.push(slot);
        }
    }

    let mesh = MeshData::new(vertices, indices);
    if mesh.is_empty() {
        return Err(AssetError::EmptyMesh(name.to_string()));
    }
    debug!(
        name,
        models = models.len(),
        vertices = mesh.vertex_count(),
        triangles = mesh.triangle_count(),
        "OBJ loaded"
    );
    Ok(mesh)
}

fn vec3_at(data: &[f32], i: usize) -> Option<Vec3> {
    data.get(i * 3..i * 3 + 3).map(Vec3::from_slice)
}

fn vec2_at(data: &[f32], i: usize) -> Option<Vec2> {
    data.get(i * 2..i * 2 + 2).map(Vec2::from_slice)
}

fn vertex_key(vertex: &Vertex) -> [u32; 8] {
    let p = vertex.position();
    let n = vertex.normal();
    let t = vertex.tex_coord();
    [p.x, p.y, p.z, n.x, n.y, n.z, t.x, t.y].map(f32::to_bits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TWO_QUADS: &str = "\
o first
v -1 -1 0
v 1 -1 0
v 1 1 0
v -1 1 0
vn 0 0 1
vt 0 0
vt 1 0
vt 1 1
vt 0 1
f 1/1/1 2/2/1 3/3/1 4/4/1
o second
v -1 -1 0
v 1 -1 0
v 1 1 0
v -1 1 0
vn 0 0 1
vt 0 0
vt 1 0
vt 1 1
vt 0 1
f 5/5/2 6/6/2 7/7/2 8/8/2
";

    #[test]
    fn quads_are_triangulated_and_merged() {
        let mesh = parse_obj("two_quads", TWO_QUADS.as_bytes()).unwrap();
        assert_eq!(mesh.triangle_count(), 4);
        // the second quad repeats the first exactly
        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.dangling_indices(), 0);
        assert!(mesh.vertices.iter().all(|v| v.normal() == Vec3::Z));
    }

    #[test]
    fn missing_attributes_get_defaults() {
        let mesh = parse_obj("bare", b"v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n").unwrap();
        assert_eq!(mesh.vertex_count(), 3);
        for v in &mesh.vertices {
            assert_eq!(v.normal(), DEFAULT_NORMAL);
            assert_eq!(v.tex_coord(), DEFAULT_TEX_COORD);
        }
        assert_eq!(mesh.indices, vec![0, 1, 2]);
    }

    #[test]
    fn obj_without_faces_is_empty() {
        let err = parse_obj("points", b"v 0 0 0\nv 1 0 0\n").unwrap_err();
        assert!(matches!(err, AssetError::EmptyMesh(name) if name == "points"));
    }

    #[test]
    fn malformed_obj_is_a_parse_error() {
        let err = parse_obj("broken", b"v 0 0 zz\nf 1 1 1\n").unwrap_err();
        assert!(matches!(err, AssetError::Obj { name, .. } if name == "broken"));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TWO_QUADS.as_bytes()).unwrap();
        let mesh = load_obj(file.path()).unwrap();
        assert_eq!(mesh.triangle_count(), 4);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_obj(dir.path().join("nope.obj")).unwrap_err();
        assert!(matches!(err, AssetError::Io { .. }));
    }
}
