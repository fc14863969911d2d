//! World assembly: pools, instances and lights built from a [`SceneConfig`].

use crate::Action;
use crate::SceneError;
use crate::config::{Animation, CameraConfig, InstanceConfig, LightConfig, SceneConfig};
use glam::{Mat4, Quat, Vec3};
use lumen_assets::ShapeRegistry;
use lumen_render::{Instance, InstancePool, Light, LightId, LightManager, RenderBackend};
use std::collections::BTreeMap;
use std::f32::consts::TAU;
use tracing::{debug, info, warn};

struct Placed {
    handle: Instance,
    position: Vec3,
    rotation: Quat,
    size: Vec3,
    animations: Vec<Animation>,
}

impl Placed {
    fn frame_at(&self, time: f32) -> Mat4 {
        let offset: Vec3 = self
            .animations
            .iter()
            .map(|animation| match *animation {
                Animation::Sway {
                    direction,
                    amplitude,
                    frequency,
                    phase_degrees,
                } => {
                    let phase = phase_degrees.to_radians();
                    direction * amplitude * (time * frequency - phase).sin()
                }
                Animation::Pulse { .. } => Vec3::ZERO,
            })
            .sum();
        Mat4::from_rotation_translation(self.rotation, self.position + offset)
    }

    fn size_at(&self, time: f32) -> Vec3 {
        self.animations
            .iter()
            .rev()
            .find_map(|animation| match *animation {
                Animation::Pulse {
                    base,
                    amplitude,
                    frequency,
                } => Some(Vec3::splat(base + amplitude * (time * frequency).cos())),
                Animation::Sway { .. } => None,
            })
            .unwrap_or(self.size)
    }

    fn refresh(&mut self, time: f32) {
        let frame = self.frame_at(time);
        let size = self.size_at(time);
        self.handle.set_frame(frame);
        self.handle.set_size(size);
    }
}

#[derive(Debug, Clone, Copy)]
struct SunOrbit {
    tilt: f32,
    speed: f32,
    angle: f32,
}

impl SunOrbit {
    fn direction(&self) -> Vec3 {
        let flat = self.tilt.cos();
        Vec3::new(flat * self.angle.cos(), -self.tilt.sin(), flat * self.angle.sin())
    }
}

/// A built scene: one pool per mesh, the instances placed in them, and the
/// lights it added to the light manager.
pub struct GameMap {
    pools: BTreeMap<String, InstancePool>,
    instances: Vec<Placed>,
    // lights the user can move, in scene order
    movable: Vec<LightId>,
    suns: Vec<(LightId, SunOrbit)>,
    selected: Option<usize>,
    time: f32,
    camera: CameraConfig,
    clear_color: [f32; 4],
}

impl GameMap {
    /// Upload every referenced mesh, place every instance and add every light.
    ///
    /// A mesh that is not registered, or whose source fails, is an error.
    /// Lights beyond the manager's capacity are skipped with a warning.
    pub fn build<B: RenderBackend + ?Sized>(
        config: &SceneConfig,
        registry: &ShapeRegistry,
        lights: &mut LightManager,
        backend: &mut B,
    ) -> Result<Self, SceneError> {
        if let Some((index, instance)) = config
            .instances
            .iter()
            .enumerate()
            .find(|(_, i)| !registry.contains(&i.mesh))
        {
            return Err(SceneError::UnknownMesh {
                index,
                mesh: instance.mesh.clone(),
            });
        }

        let mut pools = BTreeMap::new();
        for name in config.referenced_meshes() {
            let pool = InstancePool::new(backend, name, registry.source(name)?)?;
            pools.insert(name.to_string(), pool);
        }

        let mut map = Self {
            pools,
            instances: Vec::with_capacity(config.instances.len()),
            movable: Vec::new(),
            suns: Vec::new(),
            selected: None,
            time: 0.0,
            camera: config.camera,
            clear_color: config.clear_color,
        };

        for instance in &config.instances {
            map.place(instance);
        }
        for light in &config.lights {
            map.add_light(light, lights);
        }

        info!(
            pools = map.pools.len(),
            instances = map.instances.len(),
            lights = map.movable.len() + map.suns.len(),
            "scene built"
        );
        Ok(map)
    }

    fn place(&mut self, config: &InstanceConfig) {
        let Some(pool) = self.pools.get(&config.mesh) else {
            return;
        };
        let mut handle = pool.create_instance();
        handle.set_name(config.mesh.clone());
        handle.set_color(config.color.extend(1.0));

        let rotation = config.rotation.map_or(Quat::IDENTITY, |r| {
            let axis = r.axis.try_normalize().unwrap_or(Vec3::Y);
            Quat::from_axis_angle(axis, r.degrees.to_radians())
        });
        let mut placed = Placed {
            handle,
            position: config.position,
            rotation,
            size: config.size,
            animations: config.animations.clone(),
        };
        placed.refresh(0.0);
        self.instances.push(placed);
    }

    fn add_light(&mut self, config: &LightConfig, lights: &mut LightManager) {
        let light = Light::new(
            config.kind.into(),
            config.direction,
            config.position,
            config.color,
            config.range,
            config.inner_degrees,
            config.outer_degrees,
        );
        let Some(id) = lights.add_light(light) else {
            warn!(kind = ?config.kind, "light manager is full; light skipped");
            return;
        };
        match config.orbit {
            Some(orbit) => {
                let sun = SunOrbit {
                    tilt: orbit.tilt_degrees.to_radians(),
                    speed: orbit.speed_degrees.to_radians(),
                    angle: 0.0,
                };
                if let Some(light) = lights.light_mut(id) {
                    light.set_dir(sun.direction());
                }
                self.suns.push((id, sun));
            }
            None => self.movable.push(id),
        }
    }

    /// Advance animations and orbiting lights by `dt` seconds.
    pub fn update(&mut self, dt: f32, lights: &mut LightManager) {
        self.time += dt;

        for (id, sun) in &mut self.suns {
            sun.angle = (sun.angle + sun.speed * dt).rem_euclid(TAU);
            if let Some(light) = lights.light_mut(*id) {
                light.set_dir(sun.direction());
            }
        }

        let time = self.time;
        for placed in self.instances.iter_mut().filter(|p| !p.animations.is_empty()) {
            placed.refresh(time);
        }
    }

    /// Apply a user edit. Selection out of range clears it.
    pub fn apply(&mut self, action: Action, lights: &mut LightManager) {
        match action {
            Action::Select(index) => {
                self.selected = (index < self.instances.len() || index < self.movable.len())
                    .then_some(index);
                debug!(selected = ?self.selected, "selection changed");
            }
            Action::Deselect => self.selected = None,
            Action::Nudge(delta) => {
                let time = self.time;
                if let Some(placed) = self.selected.and_then(|i| self.instances.get_mut(i)) {
                    placed.position += Vec3::new(delta.x, 0.0, delta.y);
                    placed.refresh(time);
                }
            }
            Action::SnapLight {
                position,
                direction,
            } => {
                let id = self.selected.and_then(|i| self.movable.get(i));
                if let Some(light) = id.and_then(|id| lights.light_mut(*id)) {
                    light.set_pos_dir(position, direction);
                }
            }
        }
    }

    /// Draw every pool with the current program. Returns instances drawn.
    pub fn draw<B: RenderBackend + ?Sized>(&mut self, backend: &mut B) -> u32 {
        self.pools.values_mut().map(|pool| pool.draw(backend)).sum()
    }

    pub fn pools(&self) -> impl Iterator<Item = &InstancePool> {
        self.pools.values()
    }

    pub fn pool(&self, mesh: &str) -> Option<&InstancePool> {
        self.pools.get(mesh)
    }

    pub fn instance(&self, index: usize) -> Option<&Instance> {
        self.instances.get(index).map(|p| &p.handle)
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Lights that [`Action::SnapLight`] can move, by selection index.
    pub fn movable_lights(&self) -> &[LightId] {
        &self.movable
    }

    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn camera(&self) -> CameraConfig {
        self.camera
    }

    pub fn clear_color(&self) -> [f32; 4] {
        self.clear_color
    }

    /// Remove the scene's lights and free its GPU buffers.
    pub fn destroy<B: RenderBackend + ?Sized>(self, lights: &mut LightManager, backend: &mut B) {
        for id in self.movable.iter().chain(self.suns.iter().map(|(id, _)| id)) {
            lights.remove_light(*id);
        }
        drop(self.instances);
        for pool in self.pools.into_values() {
            pool.destroy(backend);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec2;
    use lumen_render::{LightManagerConfig, MAX_SHADER_LIGHTS, RecordingBackend};

    struct Fixture {
        backend: RecordingBackend,
        lights: LightManager,
        registry: ShapeRegistry,
    }

    fn fixture() -> Fixture {
        let mut backend = RecordingBackend::new();
        let lights = LightManager::new(&mut backend, LightManagerConfig::default()).unwrap();
        Fixture {
            backend,
            lights,
            registry: ShapeRegistry::builtin(),
        }
    }

    fn build(f: &mut Fixture, config: &SceneConfig) -> GameMap {
        GameMap::build(config, &f.registry, &mut f.lights, &mut f.backend).unwrap()
    }

    fn small_scene() -> SceneConfig {
        SceneConfig::from_yaml(
            "\
instances:
  - mesh: Box
    position: [0, 1, 0]
    size: [2, 2, 2]
  - mesh: Box
    position: [5, 0, 0]
  - mesh: Wedge
    animations:
      - { type: pulse, base: 2.0, amplitude: 0.5, frequency: 1.0 }
      - { type: sway, direction: [1, 0, 0], amplitude: 10.0, frequency: 1.0 }
lights:
  - { kind: directional, direction: [0, -1, 0], orbit: { tilt_degrees: 45, speed_degrees: 90 } }
  - { kind: spot, position: [0, 10, 0], direction: [0, -1, 0], inner_degrees: 10, outer_degrees: 20 }
  - { kind: positional, position: [3, 3, 3], range: 50 }
",
        )
        .unwrap()
    }

    #[test]
    fn one_pool_per_referenced_mesh() {
        let mut f = fixture();
        let map = build(&mut f, &small_scene());
        assert_eq!(map.pools().count(), 2);
        assert_eq!(map.pool("Box").unwrap().live_count(), 2);
        assert_eq!(map.pool("Wedge").unwrap().live_count(), 1);
        assert_eq!(map.instance_count(), 3);
        assert_eq!(f.lights.len(), 3);
        assert_eq!(map.movable_lights().len(), 2);
    }

    #[test]
    fn demo_map_builds_and_draws() {
        let mut f = fixture();
        let config = SceneConfig::default();
        let mut map = build(&mut f, &config);
        assert_eq!(map.pools().count(), config.referenced_meshes().len());
        assert_eq!(f.lights.len(), 6);
        assert_eq!(map.draw(&mut f.backend) as usize, config.instances.len());
        // second frame has nothing dirty
        assert_eq!(map.draw(&mut f.backend) as usize, config.instances.len());
    }

    #[test]
    fn unknown_mesh_is_reported_before_uploading() {
        let mut f = fixture();
        let config = SceneConfig::from_yaml("instances: [{mesh: Box}, {mesh: Teapot}]").unwrap();
        let err = GameMap::build(&config, &f.registry, &mut f.lights, &mut f.backend)
            .err()
            .unwrap();
        assert!(matches!(err, SceneError::UnknownMesh { index: 1, ref mesh } if mesh == "Teapot"));
        assert_eq!(f.backend.live_buffers(), 0);
    }

    #[test]
    fn missing_model_file_is_fatal() {
        let mut f = fixture();
        let root = tempfile::tempdir().unwrap();
        let config = SceneConfig::from_yaml("models: [heart]\ninstances: [{mesh: heart}]").unwrap();
        config.register_models(&mut f.registry, root.path());
        let err = GameMap::build(&config, &f.registry, &mut f.lights, &mut f.backend)
            .err()
            .unwrap();
        assert!(matches!(err, SceneError::Render(_)));
    }

    #[test]
    fn sun_orbits_at_configured_tilt() {
        let mut f = fixture();
        let mut map = build(&mut f, &small_scene());
        let sun = f.lights.get_light(0).unwrap().dir();
        let tilt = 45f32.to_radians();
        assert!((sun - Vec3::new(tilt.cos(), -tilt.sin(), 0.0)).length() < 1e-5);

        // 90°/s for one second: a quarter turn
        map.update(1.0, &mut f.lights);
        let sun = f.lights.get_light(0).unwrap().dir();
        assert!((sun - Vec3::new(0.0, -tilt.sin(), tilt.cos())).length() < 1e-4);

        // angle wraps instead of growing
        map.update(4.0, &mut f.lights);
        let sun = f.lights.get_light(0).unwrap().dir();
        assert!((sun - Vec3::new(0.0, -tilt.sin(), tilt.cos())).length() < 1e-3);
        assert!(map.suns[0].1.angle < TAU);
    }

    #[test]
    fn animations_follow_time() {
        let mut f = fixture();
        let mut map = build(&mut f, &small_scene());
        let wedge = map.instance(2).unwrap();
        assert!((wedge.size() - Vec3::splat(2.5)).length() < 1e-5);
        assert!(wedge.frame().w_axis.x.abs() < 1e-5);

        let t = std::f32::consts::FRAC_PI_2;
        map.update(t, &mut f.lights);
        let wedge = map.instance(2).unwrap();
        assert!((wedge.size() - Vec3::splat(2.0)).length() < 1e-4);
        assert!((wedge.frame().w_axis.x - 10.0).abs() < 1e-3);

        // static instances keep their placement
        let first = map.instance(0).unwrap();
        assert_eq!(first.frame().w_axis.truncate(), Vec3::new(0.0, 1.0, 0.0));
        assert_eq!(first.size(), Vec3::splat(2.0));
    }

    #[test]
    fn nudge_moves_selected_instance() {
        let mut f = fixture();
        let mut map = build(&mut f, &small_scene());

        map.apply(Action::Nudge(Vec2::new(1.0, 1.0)), &mut f.lights);
        assert_eq!(map.instance(1).unwrap().frame().w_axis.x, 5.0);

        map.apply(Action::Select(1), &mut f.lights);
        map.apply(Action::Nudge(Vec2::new(1.0, -2.0)), &mut f.lights);
        let moved = map.instance(1).unwrap().frame().w_axis.truncate();
        assert_eq!(moved, Vec3::new(6.0, 0.0, -2.0));
        assert_eq!(map.pool("Box").unwrap().dirty_count(), 2);

        map.apply(Action::Select(99), &mut f.lights);
        assert_eq!(map.selected(), None);
    }

    #[test]
    fn snap_moves_selected_movable_light() {
        let mut f = fixture();
        let mut map = build(&mut f, &small_scene());
        let spot = map.movable_lights()[0];

        map.apply(Action::Select(0), &mut f.lights);
        map.apply(
            Action::SnapLight {
                position: Vec3::new(1.0, 2.0, 3.0),
                direction: Vec3::X,
            },
            &mut f.lights,
        );
        let light = f.lights.light(spot).unwrap();
        assert_eq!(light.pos(), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(light.dir(), Vec3::X);
    }

    #[test]
    fn lights_beyond_capacity_are_skipped() {
        let mut f = fixture();
        let mut yaml = String::from("instances: []\nlights:\n");
        for _ in 0..MAX_SHADER_LIGHTS + 2 {
            yaml.push_str("  - { kind: positional }\n");
        }
        let config = SceneConfig::from_yaml(&yaml).unwrap();
        let map = build(&mut f, &config);
        assert_eq!(f.lights.len(), MAX_SHADER_LIGHTS);
        assert_eq!(map.movable_lights().len(), MAX_SHADER_LIGHTS);
    }

    #[test]
    fn destroy_releases_lights_and_buffers() {
        let mut f = fixture();
        let map = build(&mut f, &small_scene());
        map.destroy(&mut f.lights, &mut f.backend);
        assert!(f.lights.is_empty());
        assert_eq!(f.backend.live_buffers(), 0);
    }
}
