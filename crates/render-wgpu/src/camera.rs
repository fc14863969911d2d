use glam::{Mat4, Vec2, Vec3};

const MAX_PITCH: f32 = 89.9 * std::f32::consts::PI / 180.0;
const STOP_SPEED: f32 = 1e-6;

/// Fly camera: yaw/pitch orientation and a damped velocity.
///
/// Input sets a target velocity; [`FlyCamera::update`] eases toward it, so
/// releasing a key glides to a stop instead of halting.
#[derive(Debug, Clone)]
pub struct FlyCamera {
    pub position: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
    pub speed: f32,
    pub sensitivity: f32,
    pub damping: f32,
    velocity: Vec3,
    move_input: Vec2,
    vertical_input: f32,
}

impl Default for FlyCamera {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            yaw: -90.0_f32.to_radians(),
            pitch: 0.0,
            fov: 90.0_f32.to_radians(),
            aspect: 16.0 / 9.0,
            near: 0.01,
            far: 5000.0,
            speed: 50.0,
            sensitivity: 0.0008,
            damping: 10.0,
            velocity: Vec3::ZERO,
            move_input: Vec2::ZERO,
            vertical_input: 0.0,
        }
    }
}

impl FlyCamera {
    pub fn forward(&self) -> Vec3 {
        Vec3::new(
            self.yaw.cos() * self.pitch.cos(),
            self.pitch.sin(),
            self.yaw.sin() * self.pitch.cos(),
        )
        .normalize()
    }

    pub fn right(&self) -> Vec3 {
        self.forward().cross(Vec3::Y).normalize()
    }

    pub fn velocity(&self) -> Vec3 {
        self.velocity
    }

    /// Planar input: `x` strafes right, `y` moves forward. Each in `[-1, 1]`.
    pub fn set_move_input(&mut self, input: Vec2) {
        self.move_input = input;
    }

    /// Positive rises along world up.
    pub fn set_vertical_input(&mut self, input: f32) {
        self.vertical_input = input;
    }

    pub fn rotate(&mut self, dx: f32, dy: f32) {
        self.yaw = (self.yaw + dx * self.sensitivity).rem_euclid(std::f32::consts::TAU);
        self.pitch = (self.pitch - dy * self.sensitivity).clamp(-MAX_PITCH, MAX_PITCH);
    }

    pub fn look_at(&mut self, target: Vec3) {
        let dir = (target - self.position).normalize_or_zero();
        if dir == Vec3::ZERO {
            return;
        }
        self.pitch = dir.y.asin().clamp(-MAX_PITCH, MAX_PITCH);
        self.yaw = dir.z.atan2(dir.x);
    }

    /// Ease the velocity toward the input and integrate the position.
    pub fn update(&mut self, dt: f32) {
        let mut target = Vec3::ZERO;
        if self.move_input.length() > 1e-6 {
            target += self.forward() * self.move_input.y * self.speed;
            target += self.right() * self.move_input.x * self.speed;
        }
        if self.vertical_input.abs() > 1e-6 {
            target += Vec3::Y * self.vertical_input * self.speed;
        }

        let blend = 1.0 - (-self.damping * dt).exp();
        self.velocity = self.velocity.lerp(target, blend);
        self.position += self.velocity * dt;

        if self.velocity.length() < STOP_SPEED {
            self.velocity = Vec3::ZERO;
        }
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.forward(), Vec3::Y)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov, self.aspect, self.near, self.far)
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }
}
