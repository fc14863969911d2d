//! The contract between the render core and a GPU API.
//!
//! Handles are plain ids owned by the backend; the core never touches API
//! objects directly. Uniforms are addressed GL-style: look a location up by
//! name once, then upload typed values to it.

use glam::{Mat4, Vec3};

/// Handle to a GPU buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u32);

/// Handle to a compiled shader program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub u32);

/// Handle to a depth render target usable later as a shadow texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShadowTargetId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Static per-vertex geometry.
    Vertex,
    /// Static triangle indices (`u32`).
    Index,
    /// Per-instance records, rewritten as instances change.
    Instance,
}

/// The three programs the renderer knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgramKind {
    /// Final shaded pass sampling every light's shadow map.
    Lit,
    /// Depth-only pass into a 2D shadow map.
    ShadowDepth,
    /// Depth pass into one face of a cube shadow map, storing light distance.
    CubeDepth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShadowKind {
    /// Single 2D depth texture (directional and spot lights).
    Flat,
    /// Six-face depth cube (positional lights).
    Cube,
}

/// Cube map faces in attachment order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CubeFace {
    PositiveX,
    NegativeX,
    PositiveY,
    NegativeY,
    PositiveZ,
    NegativeZ,
}

impl CubeFace {
    pub const ALL: [CubeFace; 6] = [
        CubeFace::PositiveX,
        CubeFace::NegativeX,
        CubeFace::PositiveY,
        CubeFace::NegativeY,
        CubeFace::PositiveZ,
        CubeFace::NegativeZ,
    ];

    /// Array layer of this face inside a cube texture.
    pub fn layer(self) -> u32 {
        self as u32
    }
}

/// A resolved uniform slot inside one program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformLocation {
    pub program: ProgramId,
    pub slot: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Int(i32),
    Float(f32),
    Vec3(Vec3),
    Mat4(Mat4),
}

impl From<i32> for UniformValue {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<Vec3> for UniformValue {
    fn from(v: Vec3) -> Self {
        Self::Vec3(v)
    }
}

impl From<Mat4> for UniformValue {
    fn from(v: Mat4) -> Self {
        Self::Mat4(v)
    }
}

/// Outcome of creating a shadow target. An incomplete target is still usable;
/// whatever it renders may simply be wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetStatus {
    Complete,
    Incomplete(String),
}

/// One indexed, instanced draw of a static mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstancedDraw {
    pub vertex_buffer: BufferId,
    pub index_buffer: BufferId,
    pub instance_buffer: BufferId,
    pub index_count: u32,
    pub instance_count: u32,
}

/// Errors reported by a backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("program {kind:?} could not be created: {reason}")]
    ProgramCreation { kind: ProgramKind, reason: String },
    #[error("no GPU adapter available")]
    NoAdapter,
    #[error("device request failed: {0}")]
    Device(String),
}

/// A GPU API as seen by the render core.
///
/// All calls are made from the single render thread, in frame order.
pub trait RenderBackend {
    fn create_buffer(&mut self, usage: BufferUsage, contents: &[u8]) -> BufferId;

    /// Overwrite `data.len()` bytes of `buffer` starting at `offset`.
    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]);

    fn destroy_buffer(&mut self, buffer: BufferId);

    fn create_program(&mut self, kind: ProgramKind) -> Result<ProgramId, BackendError>;

    fn use_program(&mut self, program: ProgramId);

    /// `None` when the program has no uniform of that name.
    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation>;

    fn set_uniform(&mut self, location: UniformLocation, value: UniformValue);

    fn create_shadow_target(
        &mut self,
        kind: ShadowKind,
        resolution: u32,
    ) -> (ShadowTargetId, TargetStatus);

    /// Bind `target` (or one face of it) as the depth attachment and clear it.
    fn begin_depth_pass(&mut self, target: ShadowTargetId, face: Option<CubeFace>);

    /// Bind the screen, set the viewport and clear color and depth.
    fn begin_main_pass(&mut self, width: u32, height: u32, clear_color: [f32; 4]);

    fn end_pass(&mut self);

    /// Bind a shadow texture to a texture unit for the lit program.
    fn bind_shadow_map(&mut self, unit: u32, target: ShadowTargetId);

    /// Draw with the current program and its current uniform values.
    fn draw_instanced(&mut self, draw: &InstancedDraw);
}

/// Upload `value` if the location resolved; unresolved uniforms are ignored.
pub fn upload<B, V>(backend: &mut B, location: Option<UniformLocation>, value: V)
where
    B: RenderBackend + ?Sized,
    V: Into<UniformValue>,
{
    if let Some(location) = location {
        backend.set_uniform(location, value.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_faces_map_to_layers_in_order() {
        let layers: Vec<u32> = CubeFace::ALL.iter().map(|f| f.layer()).collect();
        assert_eq!(layers, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn uniform_values_convert() {
        assert_eq!(UniformValue::from(3), UniformValue::Int(3));
        assert_eq!(UniformValue::from(0.5), UniformValue::Float(0.5));
        assert_eq!(UniformValue::from(Vec3::X), UniformValue::Vec3(Vec3::X));
    }
}
