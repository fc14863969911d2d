use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3, Vec4};

/// A single mesh vertex: position, normal, texture coordinate.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub tex_coord: [f32; 2],
}

impl Vertex {
    pub fn new(position: Vec3, normal: Vec3, tex_coord: Vec2) -> Self {
        Self {
            position: position.to_array(),
            normal: normal.to_array(),
            tex_coord: tex_coord.to_array(),
        }
    }

    pub fn position(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }

    pub fn normal(&self) -> Vec3 {
        Vec3::from_array(self.normal)
    }

    pub fn tex_coord(&self) -> Vec2 {
        Vec2::from_array(self.tex_coord)
    }
}

/// Per-instance record as laid out in the GPU instance buffer.
///
/// The model matrix is stored column-major, one `vec4` attribute per column,
/// followed by the RGBA color. Alpha doubles as the transparency channel.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct InstanceData {
    pub model: [[f32; 4]; 4],
    pub color: [f32; 4],
}

impl Default for InstanceData {
    /// Identity transform, opaque white.
    fn default() -> Self {
        Self {
            model: Mat4::IDENTITY.to_cols_array_2d(),
            color: [1.0, 1.0, 1.0, 1.0],
        }
    }
}

impl InstanceData {
    /// Size of one record in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new(model: Mat4, color: Vec4) -> Self {
        Self {
            model: model.to_cols_array_2d(),
            color: color.to_array(),
        }
    }

    pub fn model_matrix(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.model)
    }

    pub fn color(&self) -> Vec4 {
        Vec4::from_array(self.color)
    }

    /// Collapse the record to zero scale and zero alpha so it rasterizes nothing.
    pub fn hide(&mut self) {
        self.model = Mat4::from_scale(Vec3::ZERO).to_cols_array_2d();
        self.color[3] = 0.0;
    }

    pub fn is_hidden(&self) -> bool {
        self.color[3] == 0.0 && self.model_matrix().transform_vector3(Vec3::ONE) == Vec3::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_default_is_identity_white() {
        let data = InstanceData::default();
        assert_eq!(data.model_matrix(), Mat4::IDENTITY);
        assert_eq!(data.color(), Vec4::ONE);
        assert!(!data.is_hidden());
    }

    #[test]
    fn hide_zeroes_scale_and_alpha() {
        let mut data = InstanceData::new(
            Mat4::from_scale_rotation_translation(
                Vec3::splat(4.0),
                glam::Quat::from_rotation_y(1.0),
                Vec3::new(10.0, 2.0, -3.0),
            ),
            Vec4::new(0.2, 0.4, 0.6, 1.0),
        );
        data.hide();
        assert!(data.is_hidden());
        assert_eq!(data.color[3], 0.0);
        // rgb survives, only alpha is cleared
        assert_eq!(data.color[0], 0.2);
    }

    #[test]
    fn gpu_layouts_are_tightly_packed() {
        assert_eq!(std::mem::size_of::<Vertex>(), 32);
        assert_eq!(InstanceData::SIZE, 80);
    }
}
