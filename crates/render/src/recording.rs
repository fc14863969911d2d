//! Headless backend that records every call.
//!
//! Keeps a CPU copy of each live buffer so callers can check what the GPU
//! would hold. Programs and shadow targets can be made to fail on demand.

use crate::backend::{
    BackendError, BufferId, BufferUsage, CubeFace, InstancedDraw, ProgramId, ProgramKind,
    RenderBackend, ShadowKind, ShadowTargetId, TargetStatus, UniformLocation, UniformValue,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::trace;

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    CreateBuffer {
        id: BufferId,
        usage: BufferUsage,
        len: usize,
    },
    WriteBuffer {
        id: BufferId,
        offset: u64,
        len: usize,
    },
    DestroyBuffer(BufferId),
    CreateProgram(ProgramKind),
    UseProgram(ProgramId),
    SetUniform {
        program: ProgramId,
        name: String,
        value: UniformValue,
    },
    CreateShadowTarget {
        id: ShadowTargetId,
        kind: ShadowKind,
        resolution: u32,
    },
    BeginDepthPass {
        target: ShadowTargetId,
        face: Option<CubeFace>,
    },
    BeginMainPass {
        width: u32,
        height: u32,
        clear_color: [f32; 4],
    },
    EndPass,
    BindShadowMap {
        unit: u32,
        target: ShadowTargetId,
    },
    Draw(InstancedDraw),
}

#[derive(Debug)]
struct RecordedBuffer {
    usage: BufferUsage,
    data: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct RecordingBackend {
    commands: Vec<Command>,
    buffers: BTreeMap<u32, RecordedBuffer>,
    next_buffer: u32,
    programs: Vec<ProgramKind>,
    // (program, name) -> slot, assigned on first lookup
    uniform_slots: std::cell::RefCell<HashMap<(ProgramId, String), u32>>,
    shadow_targets: Vec<(ShadowKind, u32)>,
    failing_programs: HashSet<ProgramKind>,
    incomplete_targets: bool,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `create_program` fail for `kind`.
    pub fn fail_program(&mut self, kind: ProgramKind) {
        self.failing_programs.insert(kind);
    }

    /// Report every shadow target created from now on as incomplete.
    pub fn report_incomplete_targets(&mut self, incomplete: bool) {
        self.incomplete_targets = incomplete;
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Take the recorded commands, leaving the log empty.
    pub fn take_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    pub fn buffer_contents(&self, id: BufferId) -> Option<&[u8]> {
        self.buffers.get(&id.0).map(|b| b.data.as_slice())
    }

    pub fn buffer_usage(&self, id: BufferId) -> Option<BufferUsage> {
        self.buffers.get(&id.0).map(|b| b.usage)
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn shadow_target(&self, id: ShadowTargetId) -> Option<(ShadowKind, u32)> {
        self.shadow_targets.get(id.0 as usize).copied()
    }

    /// Number of draw calls recorded so far.
    pub fn draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, Command::Draw(_)))
            .count()
    }

    /// The most recent value uploaded to uniform `name` of `program`.
    pub fn last_uniform(&self, program: ProgramId, name: &str) -> Option<UniformValue> {
        self.commands.iter().rev().find_map(|c| match c {
            Command::SetUniform {
                program: p,
                name: n,
                value,
            } if *p == program && n == name => Some(*value),
            _ => None,
        })
    }

    fn uniform_name(&self, location: UniformLocation) -> String {
        self.uniform_slots
            .borrow()
            .iter()
            .find(|((program, _), slot)| *program == location.program && **slot == location.slot)
            .map(|((_, name), _)| name.clone())
            .unwrap_or_default()
    }
}

impl RenderBackend for RecordingBackend {
    fn create_buffer(&mut self, usage: BufferUsage, contents: &[u8]) -> BufferId {
        let id = BufferId(self.next_buffer);
        self.next_buffer += 1;
        self.buffers.insert(
            id.0,
            RecordedBuffer {
                usage,
                data: contents.to_vec(),
            },
        );
        trace!(?id, ?usage, len = contents.len(), "create buffer");
        self.commands.push(Command::CreateBuffer {
            id,
            usage,
            len: contents.len(),
        });
        id
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) {
        if let Some(recorded) = self.buffers.get_mut(&buffer.0) {
            let start = offset as usize;
            let end = start + data.len();
            if end > recorded.data.len() {
                recorded.data.resize(end, 0);
            }
            recorded.data[start..end].copy_from_slice(data);
        }
        self.commands.push(Command::WriteBuffer {
            id: buffer,
            offset,
            len: data.len(),
        });
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        self.buffers.remove(&buffer.0);
        self.commands.push(Command::DestroyBuffer(buffer));
    }

    fn create_program(&mut self, kind: ProgramKind) -> Result<ProgramId, BackendError> {
        self.commands.push(Command::CreateProgram(kind));
        if self.failing_programs.contains(&kind) {
            return Err(BackendError::ProgramCreation {
                kind,
                reason: "rejected by recording backend".into(),
            });
        }
        self.programs.push(kind);
        Ok(ProgramId(self.programs.len() as u32 - 1))
    }

    fn use_program(&mut self, program: ProgramId) {
        self.commands.push(Command::UseProgram(program));
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        if program.0 as usize >= self.programs.len() {
            return None;
        }
        let mut slots = self.uniform_slots.borrow_mut();
        let next = slots.len() as u32;
        let slot = *slots.entry((program, name.to_string())).or_insert(next);
        Some(UniformLocation { program, slot })
    }

    fn set_uniform(&mut self, location: UniformLocation, value: UniformValue) {
        let name = self.uniform_name(location);
        self.commands.push(Command::SetUniform {
            program: location.program,
            name,
            value,
        });
    }

    fn create_shadow_target(
        &mut self,
        kind: ShadowKind,
        resolution: u32,
    ) -> (ShadowTargetId, TargetStatus) {
        let id = ShadowTargetId(self.shadow_targets.len() as u32);
        self.shadow_targets.push((kind, resolution));
        self.commands.push(Command::CreateShadowTarget {
            id,
            kind,
            resolution,
        });
        let status = if self.incomplete_targets {
            TargetStatus::Incomplete("missing depth attachment".into())
        } else {
            TargetStatus::Complete
        };
        (id, status)
    }

    fn begin_depth_pass(&mut self, target: ShadowTargetId, face: Option<CubeFace>) {
        self.commands.push(Command::BeginDepthPass { target, face });
    }

    fn begin_main_pass(&mut self, width: u32, height: u32, clear_color: [f32; 4]) {
        self.commands.push(Command::BeginMainPass {
            width,
            height,
            clear_color,
        });
    }

    fn end_pass(&mut self) {
        self.commands.push(Command::EndPass);
    }

    fn bind_shadow_map(&mut self, unit: u32, target: ShadowTargetId) {
        self.commands.push(Command::BindShadowMap { unit, target });
    }

    fn draw_instanced(&mut self, draw: &InstancedDraw) {
        trace!(instances = draw.instance_count, "draw");
        self.commands.push(Command::Draw(*draw));
    }
}
