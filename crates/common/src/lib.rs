//! Shared types: vertex layout, mesh data, and the per-instance GPU record.
//!
//! # Invariants
//! - Every type that reaches a GPU buffer is `Pod` and `#[repr(C)]`.
//! - `MeshData` is immutable once handed to an instance pool.

pub mod mesh;
pub mod types;

pub use mesh::{MeshData, MeshSource};
pub use types::{InstanceData, Vertex};
