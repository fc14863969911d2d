use lumen_assets::AssetError;
use lumen_render::RenderError;
use std::path::PathBuf;

/// Errors from loading or assembling a scene.
#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("instance {index} uses unknown mesh {mesh:?}")]
    UnknownMesh { index: usize, mesh: String },
    #[error(transparent)]
    Asset(#[from] AssetError),
    #[error(transparent)]
    Render(#[from] RenderError),
}
