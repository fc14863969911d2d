use crate::types::Vertex;
use std::convert::Infallible;

/// Static geometry for one mesh shape: vertices plus triangle-list indices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        Self { vertices, indices }
    }

    /// True when there is nothing to draw: no vertices or no indices.
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() || self.indices.is_empty()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Indices that point past the end of the vertex array.
    pub fn dangling_indices(&self) -> usize {
        let len = self.vertices.len() as u32;
        self.indices.iter().filter(|&&i| i >= len).count()
    }
}

/// Something that can produce mesh geometry: a procedural generator or a
/// file-backed loader.
pub trait MeshSource {
    type Error: std::error::Error + Send + Sync + 'static;

    fn load_mesh(&self) -> Result<MeshData, Self::Error>;
}

impl<F> MeshSource for F
where
    F: Fn() -> MeshData,
{
    type Error = Infallible;

    fn load_mesh(&self) -> Result<MeshData, Infallible> {
        Ok(self())
    }
}
