//! wgpu render backend for lumen.
//!
//! Implements [`lumen_render::RenderBackend`] with WGSL programs, depth-only
//! shadow targets and a fly camera for the desktop viewer.
//!
//! # Invariants
//! - Recorded passes execute in the order they were ended.
//! - Every draw sees the uniform values current when it was issued.
//! - The lit program samples shadow maps from fixed units: flat maps on
//!   `0..10`, cube maps on `10..20`.

mod backend;
mod camera;
pub mod shaders;

pub use backend::{SHADOW_BINDINGS, WgpuBackend};
pub use camera::FlyCamera;
