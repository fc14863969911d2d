//! Instanced meshes.
//!
//! An [`InstancePool`] owns one static mesh and an arena of per-instance
//! records mirrored into a GPU instance buffer. Callers place copies of the
//! mesh in the world through [`Instance`] handles; the pool reconciles the
//! records it has seen change into the GPU buffer right before drawing.
//!
//! Released slots are not removed from the arena. They are collapsed to zero
//! scale and zero alpha and parked in a free set, so other handles keep their
//! indices and the draw call can cover the whole arena.

use crate::backend::{BufferId, BufferUsage, InstancedDraw, RenderBackend};
use crate::error::RenderError;
use crate::mesh::GpuMesh;
use glam::{Mat4, Vec3, Vec4};
use lumen_common::{InstanceData, MeshData, MeshSource};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::{Rc, Weak};
use tracing::{debug, trace};

/// Which path a GPU sync took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Nothing changed since the last sync.
    Skipped,
    /// The arena is empty; the GPU buffer was released.
    Freed,
    /// The whole arena was uploaded into a buffer sized to fit it.
    FullUpload,
    /// This many dirty records were written in place.
    Partial(usize),
}

#[derive(Debug, Default)]
struct InstanceArena {
    records: Vec<InstanceData>,
    free: BTreeSet<usize>,
    dirty: BTreeSet<usize>,
}

impl InstanceArena {
    fn allocate(&mut self) -> usize {
        let index = match self.free.pop_first() {
            Some(index) => {
                self.records[index] = InstanceData::default();
                index
            }
            None => {
                self.records.push(InstanceData::default());
                self.records.len() - 1
            }
        };
        self.dirty.insert(index);
        index
    }

    fn update(&mut self, index: usize, frame: Mat4, size: Vec3, color: Vec4) -> bool {
        let Some(record) = self.records.get_mut(index) else {
            return false;
        };
        let model = frame * Mat4::from_scale(size.max(Vec3::ZERO));
        *record = InstanceData::new(model, color.clamp(Vec4::ZERO, Vec4::ONE));
        self.dirty.insert(index);
        true
    }

    fn release(&mut self, index: usize) -> bool {
        if index >= self.records.len() || self.free.contains(&index) {
            return false;
        }
        self.records[index].hide();
        self.free.insert(index);
        self.dirty.insert(index);
        true
    }

    fn live(&self) -> usize {
        self.records.len() - self.free.len()
    }
}

/// One static mesh plus the instances placed in the world.
#[derive(Debug)]
pub struct InstancePool {
    name: String,
    mesh: GpuMesh,
    arena: Rc<RefCell<InstanceArena>>,
    instance_buffer: Option<BufferId>,
    // records the GPU buffer can hold
    capacity: usize,
}

impl InstancePool {
    /// Build the pool's mesh from `source` and upload it.
    pub fn new<B, S>(backend: &mut B, name: &str, source: &S) -> Result<Self, RenderError>
    where
        B: RenderBackend + ?Sized,
        S: MeshSource + ?Sized,
    {
        let mesh = GpuMesh::load(backend, name, source)?;
        Ok(Self::with_mesh(name, mesh))
    }

    pub fn from_mesh_data<B>(
        backend: &mut B,
        name: &str,
        data: &MeshData,
    ) -> Result<Self, RenderError>
    where
        B: RenderBackend + ?Sized,
    {
        let mesh = GpuMesh::upload(backend, name, data)?;
        Ok(Self::with_mesh(name, mesh))
    }

    fn with_mesh(name: &str, mesh: GpuMesh) -> Self {
        Self {
            name: name.to_string(),
            mesh,
            arena: Rc::default(),
            instance_buffer: None,
            capacity: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mesh(&self) -> &GpuMesh {
        &self.mesh
    }

    /// Place a new identity-transformed, opaque white copy of the mesh.
    ///
    /// Reuses the lowest released slot before growing the arena.
    pub fn create_instance(&self) -> Instance {
        let index = self.arena.borrow_mut().allocate();
        trace!(pool = %self.name, index, "create instance");
        Instance {
            pool: Rc::downgrade(&self.arena),
            index,
            name: String::new(),
            frame: Mat4::IDENTITY,
            size: Vec3::ONE,
            color: Vec4::ONE,
        }
    }

    /// Store `frame * scale(size)` and `color` in slot `index`.
    ///
    /// Negative size components are floored at zero and color channels are
    /// clamped to `[0, 1]`. Out of range indices are ignored.
    pub fn update_instance(&self, index: usize, frame: Mat4, size: Vec3, color: Vec4) {
        if !self.arena.borrow_mut().update(index, frame, size, color) {
            debug!(pool = %self.name, index, "update of unknown instance slot ignored");
        }
    }

    pub(crate) fn release_instance(&self, index: usize) {
        if !self.arena.borrow_mut().release(index) {
            debug!(pool = %self.name, index, "release of unknown instance slot ignored");
        }
    }

    /// Slots in the arena, live or released.
    pub fn slot_count(&self) -> usize {
        self.arena.borrow().records.len()
    }

    pub fn live_count(&self) -> usize {
        self.arena.borrow().live()
    }

    pub fn free_count(&self) -> usize {
        self.arena.borrow().free.len()
    }

    pub fn dirty_count(&self) -> usize {
        self.arena.borrow().dirty.len()
    }

    /// Records the GPU instance buffer currently holds room for.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn instance_buffer(&self) -> Option<BufferId> {
        self.instance_buffer
    }

    /// CPU-side copy of slot `index`.
    pub fn record(&self, index: usize) -> Option<InstanceData> {
        self.arena.borrow().records.get(index).copied()
    }

    /// Bring the GPU instance buffer up to date with the arena.
    pub fn sync<B: RenderBackend + ?Sized>(&mut self, backend: &mut B) -> SyncOutcome {
        let mut arena = self.arena.borrow_mut();
        let len = arena.records.len();

        let outcome = if len == 0 {
            if let Some(buffer) = self.instance_buffer.take() {
                backend.destroy_buffer(buffer);
            }
            self.capacity = 0;
            SyncOutcome::Freed
        } else if arena.dirty.is_empty() && len == self.capacity {
            SyncOutcome::Skipped
        } else if len > self.capacity || self.capacity == 0 || len < self.capacity / 2 {
            if let Some(buffer) = self.instance_buffer.take() {
                backend.destroy_buffer(buffer);
            }
            let buffer =
                backend.create_buffer(BufferUsage::Instance, bytemuck::cast_slice(&arena.records));
            debug!(
                pool = %self.name,
                from = self.capacity,
                to = len,
                "instance buffer reallocated"
            );
            self.instance_buffer = Some(buffer);
            self.capacity = len;
            SyncOutcome::FullUpload
        } else {
            let mut written = 0;
            if let Some(buffer) = self.instance_buffer {
                for &index in arena.dirty.iter().filter(|&&i| i < len) {
                    let offset = (index * InstanceData::SIZE) as u64;
                    backend.write_buffer(buffer, offset, bytemuck::bytes_of(&arena.records[index]));
                    written += 1;
                }
            }
            trace!(pool = %self.name, written, "instance buffer patched");
            SyncOutcome::Partial(written)
        };

        arena.dirty.clear();
        outcome
    }

    /// Sync, then draw every slot in one instanced call.
    ///
    /// Released slots are drawn too; they are invisible by construction.
    /// Returns the number of instances submitted.
    pub fn draw<B: RenderBackend + ?Sized>(&mut self, backend: &mut B) -> u32 {
        self.sync(backend);
        let Some(instance_buffer) = self.instance_buffer else {
            return 0;
        };
        let instance_count = self.slot_count() as u32;
        backend.draw_instanced(&InstancedDraw {
            vertex_buffer: self.mesh.vertex_buffer(),
            index_buffer: self.mesh.index_buffer(),
            instance_buffer,
            index_count: self.mesh.index_count(),
            instance_count,
        });
        instance_count
    }

    /// Release the pool's GPU buffers. Outstanding handles become inert.
    pub fn destroy<B: RenderBackend + ?Sized>(mut self, backend: &mut B) {
        if let Some(buffer) = self.instance_buffer.take() {
            backend.destroy_buffer(buffer);
        }
        self.mesh.destroy(backend);
    }
}

/// Exclusive handle to one slot of an [`InstancePool`].
///
/// Every setter pushes the full state to the pool immediately. Dropping the
/// handle releases the slot; if the pool is already gone, nothing happens.
#[derive(Debug)]
pub struct Instance {
    pool: Weak<RefCell<InstanceArena>>,
    index: usize,
    name: String,
    frame: Mat4,
    size: Vec3,
    color: Vec4,
}

impl Instance {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn frame(&self) -> Mat4 {
        self.frame
    }

    pub fn set_frame(&mut self, frame: Mat4) {
        self.frame = frame;
        self.push();
    }

    pub fn size(&self) -> Vec3 {
        self.size
    }

    pub fn set_size(&mut self, size: Vec3) {
        self.size = size.max(Vec3::ZERO);
        self.push();
    }

    pub fn color(&self) -> Vec4 {
        self.color
    }

    pub fn set_color(&mut self, color: Vec4) {
        self.color = color.clamp(Vec4::ZERO, Vec4::ONE);
        self.push();
    }

    /// Alpha below one.
    pub fn is_transparent(&self) -> bool {
        self.color.w < 1.0
    }

    fn push(&self) {
        if let Some(arena) = self.pool.upgrade() {
            arena
                .borrow_mut()
                .update(self.index, self.frame, self.size, self.color);
        }
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        if let Some(arena) = self.pool.upgrade() {
            arena.borrow_mut().release(self.index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::{Command, RecordingBackend};
    use glam::Vec2;
    use lumen_common::Vertex;

    fn quad() -> MeshData {
        MeshData::new(
            vec![
                Vertex::new(Vec3::new(-0.5, -0.5, 0.0), Vec3::Z, Vec2::ZERO),
                Vertex::new(Vec3::new(0.5, -0.5, 0.0), Vec3::Z, Vec2::X),
                Vertex::new(Vec3::new(0.5, 0.5, 0.0), Vec3::Z, Vec2::ONE),
                Vertex::new(Vec3::new(-0.5, 0.5, 0.0), Vec3::Z, Vec2::Y),
            ],
            vec![0, 1, 2, 0, 2, 3],
        )
    }

    fn pool(backend: &mut RecordingBackend) -> InstancePool {
        InstancePool::new(backend, "Quad", &quad).unwrap()
    }

    fn writes(commands: &[Command]) -> Vec<(u64, usize)> {
        commands
            .iter()
            .filter_map(|c| match c {
                Command::WriteBuffer { offset, len, .. } => Some((*offset, *len)),
                _ => None,
            })
            .collect()
    }

    fn gpu_record(backend: &RecordingBackend, pool: &InstancePool, index: usize) -> InstanceData {
        let bytes = backend.buffer_contents(pool.instance_buffer().unwrap()).unwrap();
        let start = index * InstanceData::SIZE;
        *bytemuck::from_bytes(&bytes[start..start + InstanceData::SIZE])
    }

    #[test]
    fn new_instances_are_identity_white_and_dirty() {
        let mut backend = RecordingBackend::new();
        let pool = pool(&mut backend);
        let a = pool.create_instance();
        let b = pool.create_instance();
        assert_eq!((a.index(), b.index()), (0, 1));
        assert_eq!(pool.record(1), Some(InstanceData::default()));
        assert_eq!(pool.dirty_count(), 2);
    }

    #[test]
    fn live_handles_match_allocated_minus_free() {
        let mut backend = RecordingBackend::new();
        let pool = pool(&mut backend);
        let mut handles: Vec<Instance> = (0..8).map(|_| pool.create_instance()).collect();
        for remove in [5, 1, 3] {
            handles.remove(remove);
            assert_eq!(handles.len(), pool.slot_count() - pool.free_count());
        }
        handles.push(pool.create_instance());
        handles.push(pool.create_instance());
        assert_eq!(handles.len(), pool.live_count());

        let mut indices: Vec<usize> = handles.iter().map(Instance::index).collect();
        indices.sort_unstable();
        indices.dedup();
        assert_eq!(indices.len(), handles.len());
    }

    #[test]
    fn lowest_released_slot_is_reused_first() {
        let mut backend = RecordingBackend::new();
        let pool = pool(&mut backend);
        let handles: Vec<Instance> = (0..5).map(|_| pool.create_instance()).collect();
        let mut handles = handles.into_iter();
        let _h0 = handles.next();
        let h1 = handles.next();
        let _h2 = handles.next();
        let h3 = handles.next();
        let _h4 = handles.next();

        drop(h3);
        drop(h1);
        assert_eq!(pool.create_instance().index(), 1);
    }

    #[test]
    fn released_slot_is_invisible() {
        let mut backend = RecordingBackend::new();
        let pool = pool(&mut backend);
        let mut a = pool.create_instance();
        let _b = pool.create_instance();
        a.set_frame(Mat4::from_translation(Vec3::new(3.0, 1.0, -2.0)));
        a.set_size(Vec3::splat(5.0));
        a.set_color(Vec4::new(1.0, 0.0, 0.0, 1.0));
        drop(a);

        let record = pool.record(0).unwrap();
        assert!(record.is_hidden());
        assert_eq!(record.model_matrix().transform_vector3(Vec3::ONE), Vec3::ZERO);
    }

    #[test]
    fn setters_clamp_size_and_color() {
        let mut backend = RecordingBackend::new();
        let pool = pool(&mut backend);
        let mut a = pool.create_instance();
        a.set_size(Vec3::new(-1.0, 2.0, 3.0));
        a.set_color(Vec4::new(2.0, -0.5, 0.5, 1.5));
        assert_eq!(a.size(), Vec3::new(0.0, 2.0, 3.0));

        let record = pool.record(a.index()).unwrap();
        assert_eq!(record.color(), Vec4::new(1.0, 0.0, 0.5, 1.0));
        assert_eq!(record.model_matrix(), Mat4::from_scale(Vec3::new(0.0, 2.0, 3.0)));
    }

    #[test]
    fn transparency_follows_alpha() {
        let mut backend = RecordingBackend::new();
        let pool = pool(&mut backend);
        let mut a = pool.create_instance();
        assert!(!a.is_transparent());
        a.set_color(Vec4::new(1.0, 1.0, 1.0, 0.5));
        assert!(a.is_transparent());
        a.set_color(Vec4::new(0.2, 0.2, 0.2, 3.0));
        assert!(!a.is_transparent());
    }

    #[test]
    fn out_of_range_updates_are_ignored() {
        let mut backend = RecordingBackend::new();
        let pool = pool(&mut backend);
        let _a = pool.create_instance();
        pool.update_instance(42, Mat4::IDENTITY, Vec3::ONE, Vec4::ONE);
        pool.release_instance(42);
        assert_eq!(pool.slot_count(), 1);
        assert_eq!(pool.free_count(), 0);
    }

    #[test]
    fn repeated_updates_coalesce_into_one_write() {
        let mut backend = RecordingBackend::new();
        let mut pool = pool(&mut backend);
        let handles: Vec<Instance> = (0..4).map(|_| pool.create_instance()).collect();
        assert_eq!(pool.sync(&mut backend), SyncOutcome::FullUpload);
        backend.take_commands();

        let last = Mat4::from_translation(Vec3::new(9.0, 0.0, 0.0));
        for x in [1.0, 2.0, 3.0] {
            pool.update_instance(2, Mat4::from_translation(Vec3::X * x), Vec3::ONE, Vec4::ONE);
        }
        pool.update_instance(2, last, Vec3::ONE, Vec4::ONE);
        assert_eq!(pool.dirty_count(), 1);

        assert_eq!(pool.sync(&mut backend), SyncOutcome::Partial(1));
        assert_eq!(writes(backend.commands()), vec![(160, 80)]);
        assert_eq!(gpu_record(&backend, &pool, 2).model_matrix(), last);
        assert_eq!(pool.capacity(), 4);
        drop(handles);
    }

    #[test]
    fn clean_pool_skips_sync() {
        let mut backend = RecordingBackend::new();
        let mut pool = pool(&mut backend);
        let _a = pool.create_instance();
        pool.sync(&mut backend);
        backend.take_commands();
        assert_eq!(pool.sync(&mut backend), SyncOutcome::Skipped);
        assert!(backend.commands().is_empty());
    }

    #[test]
    fn releasing_the_tail_keeps_the_high_water_mark() {
        let mut backend = RecordingBackend::new();
        let mut pool = pool(&mut backend);
        let mut handles: Vec<Instance> = (0..3).map(|_| pool.create_instance()).collect();
        pool.sync(&mut backend);

        handles.pop();
        assert_eq!(pool.slot_count(), 3);
        assert_eq!(pool.free_count(), 1);
        assert!(pool.record(2).unwrap().is_hidden());
        assert_eq!(pool.draw(&mut backend), 3);

        handles.clear();
        assert_eq!(pool.slot_count(), 3);
        assert_eq!(pool.live_count(), 0);
        assert_eq!(pool.create_instance().index(), 0);
    }

    #[test]
    fn released_slots_are_patched_then_skipped() {
        let mut backend = RecordingBackend::new();
        let mut pool = pool(&mut backend);
        let mut handles: Vec<Instance> = (0..10).map(|_| pool.create_instance()).collect();
        assert_eq!(pool.sync(&mut backend), SyncOutcome::FullUpload);

        handles.truncate(4);
        let buffer = pool.instance_buffer();
        assert_eq!(pool.sync(&mut backend), SyncOutcome::Partial(6));
        assert_eq!(pool.capacity(), 10);
        assert_eq!(pool.instance_buffer(), buffer);
        assert!(gpu_record(&backend, &pool, 9).is_hidden());

        // arena length still equals capacity, so the clean fast path applies
        assert_eq!(pool.sync(&mut backend), SyncOutcome::Skipped);
    }

    #[test]
    fn sync_shrinks_to_fit_below_half_capacity() {
        let mut backend = RecordingBackend::new();
        let mut pool = pool(&mut backend);
        pool.arena.borrow_mut().records = vec![InstanceData::default(); 10];
        assert_eq!(pool.sync(&mut backend), SyncOutcome::FullUpload);

        // exactly half: patched in place
        pool.arena.borrow_mut().records.truncate(5);
        pool.arena.borrow_mut().dirty.insert(0);
        assert_eq!(pool.sync(&mut backend), SyncOutcome::Partial(1));
        assert_eq!(pool.capacity(), 10);

        pool.arena.borrow_mut().records.truncate(4);
        let old = pool.instance_buffer();
        assert_eq!(pool.sync(&mut backend), SyncOutcome::FullUpload);
        assert_eq!(pool.capacity(), 4);
        assert_ne!(pool.instance_buffer(), old);
        assert_eq!(
            backend.buffer_contents(pool.instance_buffer().unwrap()).unwrap().len(),
            4 * InstanceData::SIZE
        );

        pool.arena.borrow_mut().records.clear();
        assert_eq!(pool.sync(&mut backend), SyncOutcome::Freed);
        assert_eq!(pool.instance_buffer(), None);
    }

    #[test]
    fn releasing_inner_slots_keeps_capacity() {
        let mut backend = RecordingBackend::new();
        let mut pool = pool(&mut backend);
        let mut handles: Vec<Instance> = (0..6).map(|_| pool.create_instance()).collect();
        pool.sync(&mut backend);
        backend.take_commands();

        handles.remove(1);
        handles.remove(1);
        assert_eq!(pool.sync(&mut backend), SyncOutcome::Partial(2));
        assert_eq!(writes(backend.commands()), vec![(80, 80), (160, 80)]);
        assert_eq!(pool.capacity(), 6);
        assert!(gpu_record(&backend, &pool, 1).is_hidden());
    }

    #[test]
    fn growth_reallocates() {
        let mut backend = RecordingBackend::new();
        let mut pool = pool(&mut backend);
        let _a = pool.create_instance();
        pool.sync(&mut backend);
        let _b = pool.create_instance();
        assert_eq!(pool.sync(&mut backend), SyncOutcome::FullUpload);
        assert_eq!(pool.capacity(), 2);
        // the old buffer was released, not leaked
        assert_eq!(backend.live_buffers(), 3);
    }

    #[test]
    fn empty_pool_skips_draw() {
        let mut backend = RecordingBackend::new();
        let mut pool = pool(&mut backend);
        backend.take_commands();

        assert_eq!(pool.draw(&mut backend), 0);
        assert_eq!(pool.capacity(), 0);
        assert_eq!(pool.instance_buffer(), None);
        assert!(backend.commands().is_empty());
    }

    #[test]
    fn fully_released_pool_still_draws_hidden_slots() {
        let mut backend = RecordingBackend::new();
        let mut pool = pool(&mut backend);
        let a = pool.create_instance();
        assert_eq!(pool.draw(&mut backend), 1);
        drop(a);

        assert_eq!(pool.draw(&mut backend), 1);
        assert_eq!(pool.capacity(), 1);
        assert!(gpu_record(&backend, &pool, 0).is_hidden());
    }

    #[test]
    fn release_middle_then_reuse_draws_three() {
        let mut backend = RecordingBackend::new();
        let mut pool = pool(&mut backend);
        let a = pool.create_instance();
        let b = pool.create_instance();
        let c = pool.create_instance();
        let middle = b.index();
        drop(b);
        assert_eq!(pool.slot_count(), 3);

        let d = pool.create_instance();
        assert_eq!(d.index(), middle);
        assert_eq!(pool.draw(&mut backend), 3);
        match backend.commands().last() {
            Some(Command::Draw(draw)) => {
                assert_eq!(draw.instance_count, 3);
                assert_eq!(draw.index_count, 6);
            }
            other => panic!("expected a draw, got {other:?}"),
        }
        drop((a, c, d));
    }

    #[test]
    fn draw_reports_hidden_slots_too() {
        let mut backend = RecordingBackend::new();
        let mut pool = pool(&mut backend);
        let a = pool.create_instance();
        let _b = pool.create_instance();
        drop(a);
        assert_eq!(pool.draw(&mut backend), 2);
        assert!(gpu_record(&backend, &pool, 0).is_hidden());
    }

    #[test]
    fn handles_outliving_the_pool_are_inert() {
        let mut backend = RecordingBackend::new();
        let pool = pool(&mut backend);
        let mut a = pool.create_instance();
        pool.destroy(&mut backend);
        a.set_size(Vec3::splat(2.0));
        drop(a);
        assert_eq!(backend.live_buffers(), 0);
    }

    #[test]
    fn moved_handle_releases_once() {
        let mut backend = RecordingBackend::new();
        let pool = pool(&mut backend);
        let a = pool.create_instance();
        let _keep = pool.create_instance();
        let moved = a;
        assert_eq!(pool.free_count(), 0);
        drop(moved);
        assert_eq!(pool.free_count(), 1);
    }
}
