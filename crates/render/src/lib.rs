//! Render core: instanced meshes and the shadow-casting light pipeline.
//!
//! Everything here talks to the GPU through the [`RenderBackend`] trait, so the
//! same pool and light code drives the wgpu backend and the headless
//! [`RecordingBackend`].
//!
//! # Invariants
//! - Every live [`Instance`] owns exactly one pool slot; dropping it is the only
//!   way a slot is released.
//! - A pool's GPU instance buffer is reconciled before every draw, never during.
//! - Light slot `i` is live iff `i < LightManager::len()`.

pub mod backend;
mod error;
pub mod instance;
pub mod light;
pub mod light_manager;
mod mesh;
pub mod recording;

pub use backend::{
    BackendError, BufferId, BufferUsage, CubeFace, InstancedDraw, ProgramId, ProgramKind,
    RenderBackend, ShadowKind, ShadowTargetId, TargetStatus, UniformLocation, UniformValue,
};
pub use error::RenderError;
pub use instance::{Instance, InstancePool, SyncOutcome};
pub use light::{Light, LightKind};
pub use light_manager::{LightId, LightManager, LightManagerConfig, MAX_SHADER_LIGHTS};
pub use mesh::GpuMesh;
pub use recording::{Command, RecordingBackend};

pub fn crate_info() -> &'static str {
    "lumen-render v0.1.0"
}
