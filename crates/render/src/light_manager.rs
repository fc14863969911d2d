//! Light collection and the two-pass shadow protocol.
//!
//! Each frame runs [`LightManager::generate_depth_maps`] to fill one shadow
//! target per live light, then [`LightManager::render_with_shadows`] for the
//! shaded pass that samples them. Both passes draw the scene through the same
//! caller-supplied callback.

use crate::backend::{
    upload, CubeFace, ProgramId, ProgramKind, RenderBackend, ShadowKind, ShadowTargetId,
    TargetStatus, UniformLocation,
};
use crate::error::RenderError;
use crate::light::{Light, LightKind, FAR_PLANE};
use glam::{Mat4, Vec3};
use tracing::{debug, error, info_span, trace, warn};

/// Lights the lit program has uniform slots for.
pub const MAX_SHADER_LIGHTS: usize = 10;

/// Stable identity of a light added to a [`LightManager`].
///
/// Slot indices move when lights are removed; ids do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LightId(u64);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightManagerConfig {
    /// Edge length of each 2D shadow map.
    pub flat_resolution: u32,
    /// Edge length of each cube shadow map face.
    pub cube_resolution: u32,
}

impl Default for LightManagerConfig {
    fn default() -> Self {
        Self {
            flat_resolution: 2048,
            cube_resolution: 1024,
        }
    }
}

#[derive(Debug, Default)]
struct LightLocations {
    kind: Option<UniformLocation>,
    dir: Option<UniformLocation>,
    pos: Option<UniformLocation>,
    col: Option<UniformLocation>,
    range: Option<UniformLocation>,
    attl: Option<UniformLocation>,
    attq: Option<UniformLocation>,
    spinn: Option<UniformLocation>,
    spout: Option<UniformLocation>,
    projlmat: Option<UniformLocation>,
}

impl LightLocations {
    fn lookup<B: RenderBackend + ?Sized>(backend: &B, program: ProgramId, slot: usize) -> Self {
        let loc =
            |field: &str| backend.uniform_location(program, &format!("lights[{slot}].{field}"));
        Self {
            kind: loc("type"),
            dir: loc("dir"),
            pos: loc("pos"),
            col: loc("col"),
            range: loc("range"),
            attl: loc("attl"),
            attq: loc("attq"),
            spinn: loc("spinn"),
            spout: loc("spout"),
            projlmat: loc("projlmat"),
        }
    }

    fn push<B: RenderBackend + ?Sized>(&self, backend: &mut B, light: &Light) {
        upload(backend, self.kind, light.kind().shader_id());
        upload(backend, self.dir, light.dir());
        upload(backend, self.pos, light.pos());
        upload(backend, self.col, light.col());
        upload(backend, self.range, light.range());
        upload(backend, self.attl, light.attl());
        upload(backend, self.attq, light.attq());
        upload(backend, self.spinn, light.spinn());
        upload(backend, self.spout, light.spout());
        upload(backend, self.projlmat, light.projlmat());
    }
}

#[derive(Debug)]
struct ShadowSlot {
    flat: ShadowTargetId,
    cube: ShadowTargetId,
}

#[derive(Debug)]
struct Programs {
    lit: ProgramId,
    shadow: ProgramId,
    cube: ProgramId,
}

/// Up to [`MAX_SHADER_LIGHTS`] lights plus the shadow targets they render into.
///
/// Slot `i` always owns the same pair of targets; a light uses whichever
/// matches its kind.
#[derive(Debug)]
pub struct LightManager {
    config: LightManagerConfig,
    programs: Programs,
    lights: Vec<(LightId, Light)>,
    next_id: u64,
    slots: Vec<ShadowSlot>,
    num_lights: Option<UniformLocation>,
    light_locations: Vec<LightLocations>,
    view: Option<UniformLocation>,
    projection: Option<UniformLocation>,
    cam_pos: Option<UniformLocation>,
    shadow_projlmat: Option<UniformLocation>,
    cube_matrix: Option<UniformLocation>,
    cube_light_pos: Option<UniformLocation>,
    cube_far_plane: Option<UniformLocation>,
}

impl LightManager {
    /// Create the three programs and every shadow target.
    ///
    /// Program failures are returned. Incomplete shadow targets are logged
    /// and kept: shadows from that slot may be wrong but rendering goes on.
    pub fn new<B: RenderBackend + ?Sized>(
        backend: &mut B,
        config: LightManagerConfig,
    ) -> Result<Self, RenderError> {
        let programs = Programs {
            lit: backend.create_program(ProgramKind::Lit)?,
            shadow: backend.create_program(ProgramKind::ShadowDepth)?,
            cube: backend.create_program(ProgramKind::CubeDepth)?,
        };

        let light_locations = (0..MAX_SHADER_LIGHTS)
            .map(|slot| LightLocations::lookup(backend, programs.lit, slot))
            .collect();

        let mut slots = Vec::with_capacity(MAX_SHADER_LIGHTS);
        for slot in 0..MAX_SHADER_LIGHTS {
            let (flat, flat_status) =
                backend.create_shadow_target(ShadowKind::Flat, config.flat_resolution);
            let (cube, cube_status) =
                backend.create_shadow_target(ShadowKind::Cube, config.cube_resolution);
            for (kind, status) in [("flat", flat_status), ("cube", cube_status)] {
                if let TargetStatus::Incomplete(reason) = status {
                    error!(slot, kind, %reason, "shadow target is not complete");
                }
            }
            slots.push(ShadowSlot { flat, cube });
        }

        // sampler units never change, so bind them once
        backend.use_program(programs.lit);
        for slot in 0..MAX_SHADER_LIGHTS {
            let flat = backend.uniform_location(programs.lit, &format!("shadow_maps_2d[{slot}]"));
            let cube = backend.uniform_location(programs.lit, &format!("shadow_maps_cube[{slot}]"));
            upload(backend, flat, flat_unit(slot) as i32);
            upload(backend, cube, cube_unit(slot) as i32);
        }

        debug!(
            flat = config.flat_resolution,
            cube = config.cube_resolution,
            "light manager ready"
        );

        Ok(Self {
            config,
            num_lights: backend.uniform_location(programs.lit, "num_lights"),
            view: backend.uniform_location(programs.lit, "view"),
            projection: backend.uniform_location(programs.lit, "projection"),
            cam_pos: backend.uniform_location(programs.lit, "cam_pos"),
            shadow_projlmat: backend.uniform_location(programs.shadow, "projlmat"),
            cube_matrix: backend.uniform_location(programs.cube, "light_space_matrix"),
            cube_light_pos: backend.uniform_location(programs.cube, "light_pos_world"),
            cube_far_plane: backend.uniform_location(programs.cube, "light_far_plane"),
            programs,
            lights: Vec::with_capacity(MAX_SHADER_LIGHTS),
            next_id: 0,
            slots,
            light_locations,
        })
    }

    pub fn config(&self) -> &LightManagerConfig {
        &self.config
    }

    pub fn lit_program(&self) -> ProgramId {
        self.programs.lit
    }

    /// Add a light. Returns `None` when all slots are taken.
    pub fn add_light(&mut self, light: Light) -> Option<LightId> {
        if self.lights.len() >= MAX_SHADER_LIGHTS {
            warn!(max = MAX_SHADER_LIGHTS, "maximum lights exceeded");
            return None;
        }
        let id = LightId(self.next_id);
        self.next_id += 1;
        debug!(?id, kind = ?light.kind(), slot = self.lights.len(), "light added");
        self.lights.push((id, light));
        Some(id)
    }

    /// Remove a light, moving the last light into its slot.
    pub fn remove_light(&mut self, id: LightId) -> bool {
        match self.index_of(id) {
            Some(index) => {
                self.lights.swap_remove(index);
                debug!(?id, slot = index, "light removed");
                true
            }
            None => {
                warn!(?id, "cannot remove unknown light");
                false
            }
        }
    }

    /// Light in slot `index`.
    pub fn get_light(&self, index: usize) -> Option<&Light> {
        self.lights.get(index).map(|(_, light)| light)
    }

    pub fn get_light_mut(&mut self, index: usize) -> Option<&mut Light> {
        self.lights.get_mut(index).map(|(_, light)| light)
    }

    pub fn light(&self, id: LightId) -> Option<&Light> {
        self.index_of(id).and_then(|index| self.get_light(index))
    }

    pub fn light_mut(&mut self, id: LightId) -> Option<&mut Light> {
        self.index_of(id).and_then(|index| self.get_light_mut(index))
    }

    /// Current slot of `id`.
    pub fn index_of(&self, id: LightId) -> Option<usize> {
        self.lights.iter().position(|(light_id, _)| *light_id == id)
    }

    pub fn len(&self) -> usize {
        self.lights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lights.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (LightId, &Light)> {
        self.lights.iter().map(|(id, light)| (*id, light))
    }

    /// Camera uniforms of the lit program.
    pub fn set_camera<B: RenderBackend + ?Sized>(
        &self,
        backend: &mut B,
        view: Mat4,
        projection: Mat4,
        eye: Vec3,
    ) {
        upload(backend, self.view, view);
        upload(backend, self.projection, projection);
        upload(backend, self.cam_pos, eye);
    }

    /// Render every live light's shadow map.
    ///
    /// `render` runs once per 2D map and once per cube face.
    pub fn generate_depth_maps<B, F>(&self, backend: &mut B, mut render: F)
    where
        B: RenderBackend + ?Sized,
        F: FnMut(&mut B),
    {
        let _span = info_span!("depth_pass", lights = self.lights.len()).entered();

        for (index, (_, light)) in self.lights.iter().enumerate() {
            let slot = &self.slots[index];
            if light.kind() == LightKind::Positional {
                backend.use_program(self.programs.cube);
                // positional distances are stored over the same far plane the lit
                // shader and the cube face projections use
                upload(backend, self.cube_far_plane, FAR_PLANE);
                upload(backend, self.cube_light_pos, light.pos());
                let matrices = light.cube_face_matrices();
                for (face, matrix) in CubeFace::ALL.into_iter().zip(matrices) {
                    backend.begin_depth_pass(slot.cube, Some(face));
                    upload(backend, self.cube_matrix, matrix);
                    render(backend);
                    backend.end_pass();
                }
            } else {
                backend.use_program(self.programs.shadow);
                backend.begin_depth_pass(slot.flat, None);
                upload(backend, self.shadow_projlmat, light.projlmat());
                render(backend);
                backend.end_pass();
            }
            trace!(slot = index, kind = ?light.kind(), "shadow map rendered");
        }
    }

    /// Shaded pass: clear the screen, push light state, bind shadow maps, draw.
    pub fn render_with_shadows<B, F>(
        &self,
        backend: &mut B,
        render: F,
        width: u32,
        height: u32,
        clear_color: [f32; 4],
    ) where
        B: RenderBackend + ?Sized,
        F: FnOnce(&mut B),
    {
        let _span = info_span!("lit_pass", width, height).entered();

        backend.begin_main_pass(width, height, clear_color);
        backend.use_program(self.programs.lit);
        self.update_uniforms(backend);

        for (index, (_, light)) in self.lights.iter().enumerate() {
            let slot = &self.slots[index];
            if light.kind() == LightKind::Positional {
                backend.bind_shadow_map(cube_unit(index), slot.cube);
            } else {
                backend.bind_shadow_map(flat_unit(index), slot.flat);
            }
        }

        render(backend);
        backend.end_pass();
    }

    fn update_uniforms<B: RenderBackend + ?Sized>(&self, backend: &mut B) {
        upload(backend, self.num_lights, self.lights.len() as i32);
        for ((_, light), locations) in self.lights.iter().zip(&self.light_locations) {
            locations.push(backend, light);
        }
    }
}

fn flat_unit(slot: usize) -> u32 {
    slot as u32
}

fn cube_unit(slot: usize) -> u32 {
    (MAX_SHADER_LIGHTS + slot) as u32
}
