use std::path::PathBuf;

/// Errors from loading mesh sources.
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("OBJ parse error in {name}: {source}")]
    Obj {
        name: String,
        #[source]
        source: tobj::LoadError,
    },
    #[error("mesh {0:?} has no geometry")]
    EmptyMesh(String),
    #[error("unknown shape {0:?}")]
    UnknownShape(String),
}
