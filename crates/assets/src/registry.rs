//! Named mesh sources.
//!
//! The registry is built once at startup and passed by reference to whatever
//! assembles the world. It stores recipes, not meshes: geometry is produced
//! when a source is loaded.

use crate::AssetError;
use crate::obj::load_obj;
use crate::shapes::Shape;
use lumen_common::{MeshData, MeshSource};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Where a named mesh comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ShapeSource {
    Procedural(Shape),
    File(PathBuf),
}

impl MeshSource for ShapeSource {
    type Error = AssetError;

    fn load_mesh(&self) -> Result<MeshData, AssetError> {
        match self {
            ShapeSource::Procedural(shape) => {
                let mesh = shape.generate();
                if mesh.is_empty() {
                    return Err(AssetError::EmptyMesh(format!("{shape:?}")));
                }
                Ok(mesh)
            }
            ShapeSource::File(path) => load_obj(path),
        }
    }
}

/// Built-in procedural shapes and their registry names.
pub const BUILTIN_SHAPES: [(&str, Shape); 12] = [
    ("Quad", Shape::Quad),
    ("Box", Shape::Box),
    ("Wedge", Shape::Wedge),
    ("CornerWedgeInner", Shape::CornerWedgeInner),
    ("CornerWedgeOuter", Shape::CornerWedgeOuter),
    ("CylinderLQ", Shape::Cylinder { quality: 10 }),
    ("Cylinder", Shape::Cylinder { quality: 24 }),
    ("CylinderHQ", Shape::Cylinder { quality: 64 }),
    ("IcosphereULQ", Shape::Icosphere { level: 0 }),
    ("IcosphereLQ", Shape::Icosphere { level: 1 }),
    ("Icosphere", Shape::Icosphere { level: 3 }),
    ("IcosphereHQ", Shape::Icosphere { level: 5 }),
];

#[derive(Debug, Clone, Default)]
pub struct ShapeRegistry {
    sources: BTreeMap<String, ShapeSource>,
}

impl ShapeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in procedural shape.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for (name, shape) in BUILTIN_SHAPES {
            registry.register(name, ShapeSource::Procedural(shape));
        }
        registry
    }

    /// Add or replace a named source.
    pub fn register(&mut self, name: impl Into<String>, source: ShapeSource) {
        let name = name.into();
        debug!(%name, ?source, "shape registered");
        self.sources.insert(name, source);
    }

    pub fn register_file(&mut self, name: impl Into<String>, path: impl Into<PathBuf>) {
        self.register(name, ShapeSource::File(path.into()));
    }

    /// Register `root/<name>/<name>.obj` under `name`.
    pub fn register_obj_dir(&mut self, root: impl AsRef<Path>, name: &str) {
        let path = root.as_ref().join(name).join(format!("{name}.obj"));
        self.register_file(name, path);
    }

    pub fn source(&self, name: &str) -> Result<&ShapeSource, AssetError> {
        self.sources
            .get(name)
            .ok_or_else(|| AssetError::UnknownShape(name.to_string()))
    }

    pub fn load(&self, name: &str) -> Result<MeshData, AssetError> {
        self.source(name)?.load_mesh()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ShapeSource)> {
        self.sources.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn builtin_names() {
        let registry = ShapeRegistry::builtin();
        assert_eq!(registry.len(), 12);
        for name in ["Quad", "Box", "CylinderHQ", "IcosphereULQ", "CornerWedgeOuter"] {
            assert!(registry.contains(name), "{name}");
        }
        assert_eq!(
            registry.source("Cylinder").unwrap(),
            &ShapeSource::Procedural(Shape::Cylinder { quality: 24 })
        );
    }

    #[test]
    fn every_builtin_loads() {
        let registry = ShapeRegistry::builtin();
        for (name, _) in registry.iter().filter(|(n, _)| *n != "IcosphereHQ") {
            let mesh = registry.load(name).unwrap();
            assert!(!mesh.is_empty(), "{name}");
        }
    }

    #[test]
    fn unknown_name_is_an_error() {
        let registry = ShapeRegistry::builtin();
        let err = registry.load("Dodecahedron").unwrap_err();
        assert!(matches!(err, AssetError::UnknownShape(n) if n == "Dodecahedron"));
    }

    #[test]
    fn obj_dir_convention() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("tri");
        std::fs::create_dir(&dir).unwrap();
        let mut file = std::fs::File::create(dir.join("tri.obj")).unwrap();
        file.write_all(b"v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n").unwrap();

        let mut registry = ShapeRegistry::new();
        registry.register_obj_dir(root.path(), "tri");
        assert_eq!(
            registry.source("tri").unwrap(),
            &ShapeSource::File(dir.join("tri.obj"))
        );
        assert_eq!(registry.load("tri").unwrap().triangle_count(), 1);
    }

    #[test]
    fn missing_file_fails_on_load_not_on_register() {
        let root = tempfile::tempdir().unwrap();
        let mut registry = ShapeRegistry::new();
        registry.register_obj_dir(root.path(), "heart");
        assert!(registry.contains("heart"));
        assert!(matches!(registry.load("heart"), Err(AssetError::Io { .. })));
    }
}
