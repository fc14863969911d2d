use crate::backend::BackendError;

/// Errors from the render core.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("mesh source for {name:?} failed: {source}")]
    MeshSource {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("mesh {name:?} has no geometry ({vertices} vertices, {indices} indices)")]
    EmptyMesh {
        name: String,
        vertices: usize,
        indices: usize,
    },
    #[error("mesh {name:?} has {count} indices past the end of its vertex array")]
    DanglingIndices { name: String, count: usize },
    #[error(transparent)]
    Backend(#[from] BackendError),
}
