use crate::backend::{BufferId, BufferUsage, RenderBackend};
use crate::error::RenderError;
use lumen_common::{MeshData, MeshSource};
use tracing::debug;

/// Static geometry resident on the GPU: one vertex buffer, one index buffer.
#[derive(Debug)]
pub struct GpuMesh {
    vertex_buffer: BufferId,
    index_buffer: BufferId,
    index_count: u32,
}

impl GpuMesh {
    /// Build the mesh from `source` and upload it.
    ///
    /// A source that errors, produces no vertices or indices, or references
    /// vertices it does not have, is a configuration error.
    pub fn load<B, S>(backend: &mut B, name: &str, source: &S) -> Result<Self, RenderError>
    where
        B: RenderBackend + ?Sized,
        S: MeshSource + ?Sized,
    {
        let data = source.load_mesh().map_err(|e| RenderError::MeshSource {
            name: name.to_string(),
            source: Box::new(e),
        })?;
        Self::upload(backend, name, &data)
    }

    pub fn upload<B>(backend: &mut B, name: &str, data: &MeshData) -> Result<Self, RenderError>
    where
        B: RenderBackend + ?Sized,
    {
        if data.is_empty() {
            return Err(RenderError::EmptyMesh {
                name: name.to_string(),
                vertices: data.vertex_count(),
                indices: data.index_count(),
            });
        }
        let dangling = data.dangling_indices();
        if dangling > 0 {
            return Err(RenderError::DanglingIndices {
                name: name.to_string(),
                count: dangling,
            });
        }

        let vertex_buffer =
            backend.create_buffer(BufferUsage::Vertex, bytemuck::cast_slice(&data.vertices));
        let index_buffer =
            backend.create_buffer(BufferUsage::Index, bytemuck::cast_slice(&data.indices));
        debug!(
            mesh = name,
            vertices = data.vertex_count(),
            triangles = data.triangle_count(),
            "uploaded mesh"
        );

        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: data.index_count() as u32,
        })
    }

    pub fn vertex_buffer(&self) -> BufferId {
        self.vertex_buffer
    }

    pub fn index_buffer(&self) -> BufferId {
        self.index_buffer
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn destroy<B: RenderBackend + ?Sized>(self, backend: &mut B) {
        backend.destroy_buffer(self.vertex_buffer);
        backend.destroy_buffer(self.index_buffer);
    }
}
