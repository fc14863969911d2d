//! Shadow-casting lights and their light-space transforms.

use glam::{Mat4, Vec3};

/// Half extent of a directional light's orthographic shadow volume.
pub const ORTHO_SIZE: f32 = 400.0;
pub const NEAR_PLANE: f32 = 3.0;
pub const FAR_PLANE: f32 = 400.0;

/// Widest spot cone the shadow projection accepts.
pub const SPOT_MAX_FOV: f32 = 179.999 * std::f32::consts::PI / 180.0;
/// Narrowest spot cone; a zero field of view has no projection.
pub const SPOT_MIN_FOV: f32 = 0.001 * std::f32::consts::PI / 180.0;

// Lighting-unit convention for quadratic falloff. Keep as is.
const INTENSITY_THRESHOLD: f32 = 255.0;
const MIN_RANGE: f32 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum LightKind {
    Directional = 0,
    Positional = 1,
    Spot = 2,
}

impl LightKind {
    /// Value the lit shader switches on.
    pub fn shader_id(self) -> i32 {
        self as i32
    }
}

/// One light. Angles are given in degrees and stored in radians.
///
/// The light-space matrix is recomputed whenever a parameter it depends on
/// changes, so [`Light::projlmat`] is always current.
#[derive(Debug, Clone, PartialEq)]
pub struct Light {
    kind: LightKind,
    dir: Vec3,
    pos: Vec3,
    col: Vec3,
    range: f32,
    attl: f32,
    attq: f32,
    spinn: f32,
    spout: f32,
    projlmat: Mat4,
}

impl Light {
    pub fn new(
        kind: LightKind,
        dir: Vec3,
        pos: Vec3,
        col: Vec3,
        range: f32,
        spinn_deg: f32,
        spout_deg: f32,
    ) -> Self {
        let (attl, attq) = attenuation(range);
        let mut light = Self {
            kind,
            dir: norm(dir),
            pos,
            col,
            range,
            attl,
            attq,
            spinn: spinn_deg.to_radians(),
            spout: spout_deg.to_radians(),
            projlmat: Mat4::IDENTITY,
        };
        light.recompute();
        light
    }

    pub fn directional(dir: Vec3, pos: Vec3, col: Vec3) -> Self {
        Self::new(LightKind::Directional, dir, pos, col, 100.0, 0.0, 0.0)
    }

    pub fn positional(pos: Vec3, col: Vec3, range: f32) -> Self {
        Self::new(LightKind::Positional, Vec3::NEG_Y, pos, col, range, 0.0, 0.0)
    }

    pub fn spot(
        pos: Vec3,
        dir: Vec3,
        col: Vec3,
        range: f32,
        inner_deg: f32,
        outer_deg: f32,
    ) -> Self {
        Self::new(LightKind::Spot, dir, pos, col, range, inner_deg, outer_deg)
    }

    pub fn kind(&self) -> LightKind {
        self.kind
    }

    pub fn set_kind(&mut self, kind: LightKind) {
        self.kind = kind;
        self.recompute();
    }

    pub fn dir(&self) -> Vec3 {
        self.dir
    }

    /// Set the direction; zero-length directions point straight down.
    pub fn set_dir(&mut self, dir: Vec3) {
        self.dir = norm(dir);
        self.recompute();
    }

    pub fn pos(&self) -> Vec3 {
        self.pos
    }

    pub fn set_pos(&mut self, pos: Vec3) {
        self.pos = pos;
        self.recompute();
    }

    /// Move and re-aim with a single recompute.
    pub fn set_pos_dir(&mut self, pos: Vec3, dir: Vec3) {
        self.pos = pos;
        self.dir = norm(dir);
        self.recompute();
    }

    pub fn col(&self) -> Vec3 {
        self.col
    }

    pub fn set_col(&mut self, col: Vec3) {
        self.col = col;
    }

    pub fn range(&self) -> f32 {
        self.range
    }

    pub fn set_range(&mut self, range: f32) {
        self.range = range;
        (self.attl, self.attq) = attenuation(range);
        self.recompute();
    }

    /// Linear attenuation term; always zero.
    pub fn attl(&self) -> f32 {
        self.attl
    }

    /// Quadratic attenuation term.
    pub fn attq(&self) -> f32 {
        self.attq
    }

    /// Inner cone half-angle, radians.
    pub fn spinn(&self) -> f32 {
        self.spinn
    }

    pub fn set_spinn(&mut self, spinn_deg: f32) {
        self.spinn = spinn_deg.to_radians();
    }

    /// Outer cone half-angle, radians.
    pub fn spout(&self) -> f32 {
        self.spout
    }

    pub fn set_spout(&mut self, spout_deg: f32) {
        self.spout = spout_deg.to_radians();
        self.recompute();
    }

    /// Cached light-space (projection * view) matrix.
    ///
    /// Identity for positional lights, which use [`Light::cube_face_matrices`].
    /// Directional and spot lights view with world up, except when the
    /// direction is within about 2.6° of vertical: then up is `-Z` for lights
    /// pointing up and `+Z` for lights pointing down.
    pub fn projlmat(&self) -> Mat4 {
        self.projlmat
    }

    /// Field of view of the spot shadow projection.
    pub fn spot_fov(&self) -> f32 {
        (self.spout * 2.0).clamp(SPOT_MIN_FOV, SPOT_MAX_FOV)
    }

    /// One light-space matrix per cube face, in `CubeFace::ALL` order.
    pub fn cube_face_matrices(&self) -> [Mat4; 6] {
        let proj = Mat4::perspective_rh(90f32.to_radians(), 1.0, NEAR_PLANE, FAR_PLANE);
        let faces = [
            (Vec3::X, Vec3::NEG_Y),
            (Vec3::NEG_X, Vec3::NEG_Y),
            (Vec3::Y, Vec3::Z),
            (Vec3::NEG_Y, Vec3::NEG_Z),
            (Vec3::Z, Vec3::NEG_Y),
            (Vec3::NEG_Z, Vec3::NEG_Y),
        ];
        faces.map(|(look, up)| proj * Mat4::look_to_rh(self.pos, look, up))
    }

    fn recompute(&mut self) {
        self.projlmat = match self.kind {
            LightKind::Directional => {
                let proj = Mat4::orthographic_rh(
                    -ORTHO_SIZE,
                    ORTHO_SIZE,
                    -ORTHO_SIZE,
                    ORTHO_SIZE,
                    NEAR_PLANE,
                    FAR_PLANE,
                );
                let eye = self.pos - self.dir * (FAR_PLANE / 2.0);
                proj * Mat4::look_to_rh(eye, self.dir, up_for(self.dir))
            }
            LightKind::Positional => Mat4::IDENTITY,
            LightKind::Spot => {
                let proj = Mat4::perspective_rh(self.spot_fov(), 1.0, NEAR_PLANE, FAR_PLANE);
                proj * Mat4::look_to_rh(self.pos, self.dir, up_for(self.dir))
            }
        };
    }
}

/// `(linear, quadratic)` attenuation for a light reaching `range` units.
fn attenuation(range: f32) -> (f32, f32) {
    if range <= MIN_RANGE {
        return (0.0, f32::MAX);
    }
    (0.0, (INTENSITY_THRESHOLD / (range * range)).max(0.0))
}

fn norm(dir: Vec3) -> Vec3 {
    if dir.length() > 1e-6 {
        dir.normalize()
    } else {
        Vec3::NEG_Y
    }
}

// World up, unless that would make the view basis degenerate.
fn up_for(dir: Vec3) -> Vec3 {
    if dir.dot(Vec3::Y).abs() > 0.999 {
        Vec3::new(0.0, 0.0, if dir.y > 0.0 { -1.0 } else { 1.0 })
    } else {
        Vec3::Y
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_near(a: f32, b: f32) {
        assert!((a - b).abs() < 1e-4, "{a} != {b}");
    }

    #[test]
    fn zero_range_gives_max_attenuation() {
        let light = Light::new(
            LightKind::Directional,
            Vec3::NEG_Y,
            Vec3::ZERO,
            Vec3::ONE,
            0.0,
            0.0,
            0.0,
        );
        assert_eq!(light.attq(), f32::MAX);
        assert!(light.attq().is_finite());
        assert_eq!(light.attl(), 0.0);
    }

    #[test]
    fn range_sets_quadratic_attenuation() {
        let mut light = Light::positional(Vec3::ZERO, Vec3::ONE, 100.0);
        assert_eq!(light.attq(), 255.0 / 10_000.0);
        light.set_range(50.0);
        assert_eq!(light.attq(), 255.0 / 2_500.0);
        light.set_range(-1.0);
        assert_eq!(light.attq(), f32::MAX);
    }

    #[test]
    fn angles_are_stored_in_radians() {
        let light = Light::spot(Vec3::ZERO, Vec3::X, Vec3::ONE, 10.0, 15.0, 30.0);
        assert_near(light.spinn(), 15f32.to_radians());
        assert_near(light.spout(), 30f32.to_radians());
        assert_near(light.spot_fov(), 60f32.to_radians());
    }

    #[test]
    fn spot_fov_is_clamped() {
        let mut light = Light::spot(Vec3::ZERO, Vec3::X, Vec3::ONE, 10.0, 0.0, 1000.0);
        assert_eq!(light.spot_fov(), SPOT_MAX_FOV);
        assert!(light.projlmat().is_finite());

        for outer in [0.0, -45.0] {
            light.set_spout(outer);
            assert_eq!(light.spot_fov(), SPOT_MIN_FOV);
            assert!(light.projlmat().is_finite());
        }
    }

    #[test]
    fn zero_direction_falls_back_to_down() {
        let mut light = Light::directional(Vec3::ZERO, Vec3::ZERO, Vec3::ONE);
        assert_eq!(light.dir(), Vec3::NEG_Y);
        light.set_dir(Vec3::new(0.0, 0.0, 2.0));
        assert_eq!(light.dir(), Vec3::Z);
    }

    #[test]
    fn directional_matrix_centers_its_axis() {
        let dir = Vec3::new(1.0, -1.0, 0.5).normalize();
        let pos = Vec3::new(10.0, 50.0, -5.0);
        let light = Light::directional(dir, pos, Vec3::ONE);
        // the nominal position sits halfway down the depth range
        let ndc = light.projlmat().project_point3(pos);
        assert_near(ndc.x, 0.0);
        assert_near(ndc.y, 0.0);
        assert_near(ndc.z, (FAR_PLANE / 2.0 - NEAR_PLANE) / (FAR_PLANE - NEAR_PLANE));
    }

    #[test]
    fn vertical_spot_avoids_degenerate_view() {
        let pos = Vec3::new(0.0, 20.0, 0.0);
        let light = Light::spot(pos, Vec3::NEG_Y, Vec3::ONE, 30.0, 10.0, 20.0);
        assert!(light.projlmat().is_finite());
        let ndc = light.projlmat().project_point3(Vec3::new(0.0, 10.0, 0.0));
        assert_near(ndc.x, 0.0);
        assert_near(ndc.y, 0.0);
    }

    #[test]
    fn vertical_sun_uses_the_z_up_fallback() {
        let light = Light::directional(Vec3::NEG_Y, Vec3::ZERO, Vec3::ONE);
        assert!(light.projlmat().is_finite());
        let expected = Mat4::orthographic_rh(
            -ORTHO_SIZE,
            ORTHO_SIZE,
            -ORTHO_SIZE,
            ORTHO_SIZE,
            NEAR_PLANE,
            FAR_PLANE,
        ) * Mat4::look_to_rh(Vec3::Y * (FAR_PLANE / 2.0), Vec3::NEG_Y, Vec3::Z);
        assert_eq!(light.projlmat(), expected);
    }

    #[test]
    fn geometric_setters_recompute_the_matrix() {
        let mut light = Light::spot(Vec3::ZERO, Vec3::X, Vec3::ONE, 10.0, 5.0, 20.0);
        let before = light.projlmat();
        light.set_pos(Vec3::new(0.0, 1.0, 0.0));
        assert_ne!(light.projlmat(), before);

        let before = light.projlmat();
        light.set_col(Vec3::X);
        light.set_spinn(1.0);
        assert_eq!(light.projlmat(), before);

        light.set_pos_dir(Vec3::ZERO, Vec3::Z);
        let expected = Light::spot(Vec3::ZERO, Vec3::Z, Vec3::X, 10.0, 1.0, 20.0);
        assert_eq!(light.projlmat(), expected.projlmat());
    }

    #[test]
    fn positional_uses_identity_and_cube_faces() {
        let pos = Vec3::new(2.0, 3.0, 4.0);
        let mut light = Light::positional(pos, Vec3::ONE, 25.0);
        assert_eq!(light.projlmat(), Mat4::IDENTITY);

        let dirs = [Vec3::X, Vec3::NEG_X, Vec3::Y, Vec3::NEG_Y, Vec3::Z, Vec3::NEG_Z];
        for (matrix, dir) in light.cube_face_matrices().iter().zip(dirs) {
            let ndc = matrix.project_point3(pos + dir * 10.0);
            assert_near(ndc.x, 0.0);
            assert_near(ndc.y, 0.0);
        }

        light.set_kind(LightKind::Spot);
        assert_ne!(light.projlmat(), Mat4::IDENTITY);
    }
}
