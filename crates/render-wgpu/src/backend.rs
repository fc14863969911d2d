//! [`RenderBackend`] on top of wgpu.
//!
//! The render core drives a GL-style immediate protocol: bind a program, set
//! uniforms, draw, change uniforms, draw again. wgpu wants whole passes
//! recorded up front, so every call is recorded here and encoded at
//! [`WgpuBackend::submit`]. Each draw snapshots the current program's
//! uniform block into a per-frame ring and binds it with a dynamic offset.
//!
//! Buffer writes are queued and land before any pass of the frame runs, so
//! instance pools must be synced before the first pass that draws them.

use crate::shaders::{self, FieldType, UniformLayout};
use lumen_common::{InstanceData, Vertex};
use lumen_render::{
    BackendError, BufferId, BufferUsage, CubeFace, InstancedDraw, MAX_SHADER_LIGHTS, ProgramId,
    ProgramKind, RenderBackend, ShadowKind, ShadowTargetId, TargetStatus, UniformLocation,
    UniformValue,
};
use lumen_render::light::FAR_PLANE;
use std::collections::BTreeMap;
use std::num::NonZeroU64;
use std::rc::Rc;
use tracing::{debug, error, warn};
use wgpu::util::DeviceExt;

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Texture bindings the lit program needs in one shader stage.
pub const SHADOW_BINDINGS: u32 = 2 * MAX_SHADER_LIGHTS as u32;

/// Draws per uniform ring chunk before another chunk is allocated.
const RING_SLOTS: u64 = 64;

const VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 3] =
    wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3, 2 => Float32x2];

const INSTANCE_ATTRIBUTES: [wgpu::VertexAttribute; 5] = wgpu::vertex_attr_array![
    3 => Float32x4,
    4 => Float32x4,
    5 => Float32x4,
    6 => Float32x4,
    7 => Float32x4,
];

fn vertex_layouts() -> [wgpu::VertexBufferLayout<'static>; 2] {
    [
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &VERTEX_ATTRIBUTES,
        },
        wgpu::VertexBufferLayout {
            array_stride: InstanceData::SIZE as u64,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &INSTANCE_ATTRIBUTES,
        },
    ]
}

struct UniformChunk {
    buffer: wgpu::Buffer,
    bind_group: Rc<wgpu::BindGroup>,
}

/// Per-program ring of uniform block snapshots, reset every frame.
struct UniformRing {
    chunks: Vec<UniformChunk>,
    chunk: usize,
    slot: u64,
    stride: u64,
    block_size: u64,
}

impl UniformRing {
    fn new(block_size: u32, alignment: u32) -> Self {
        let alignment = u64::from(alignment.max(1));
        let block_size = u64::from(block_size);
        Self {
            chunks: Vec::new(),
            chunk: 0,
            slot: 0,
            stride: block_size.div_ceil(alignment) * alignment,
            block_size,
        }
    }

    fn push(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        layout: &wgpu::BindGroupLayout,
        data: &[u8],
    ) -> (Rc<wgpu::BindGroup>, u32) {
        if self.slot == RING_SLOTS {
            self.chunk += 1;
            self.slot = 0;
        }
        if self.chunk == self.chunks.len() {
            let buffer = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("uniform_ring"),
                size: self.stride * RING_SLOTS,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("uniform_ring_bind_group"),
                layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &buffer,
                        offset: 0,
                        size: NonZeroU64::new(self.block_size),
                    }),
                }],
            });
            self.chunks.push(UniformChunk {
                buffer,
                bind_group: Rc::new(bind_group),
            });
        }

        let chunk = &self.chunks[self.chunk];
        let offset = self.slot * self.stride;
        queue.write_buffer(&chunk.buffer, offset, data);
        self.slot += 1;
        (Rc::clone(&chunk.bind_group), offset as u32)
    }

    fn reset(&mut self) {
        self.chunk = 0;
        self.slot = 0;
    }
}

struct Program {
    kind: ProgramKind,
    pipeline: Rc<wgpu::RenderPipeline>,
    bind_group_layout: wgpu::BindGroupLayout,
    layout: UniformLayout,
    // current uniform values, laid out as the WGSL block
    block: Vec<u8>,
    ring: UniformRing,
}

struct ShadowTarget {
    kind: ShadowKind,
    usable: bool,
    // one view per layer: 1 for flat, 6 for cube
    attachments: Vec<wgpu::TextureView>,
    sample_view: wgpu::TextureView,
}

#[derive(Debug, Clone, Copy)]
enum PassTarget {
    Depth {
        target: ShadowTargetId,
        layer: usize,
        kind: ShadowKind,
    },
    Main {
        width: u32,
        height: u32,
        clear_color: [f32; 4],
    },
}

struct RecordedDraw {
    pipeline: Rc<wgpu::RenderPipeline>,
    uniforms: Rc<wgpu::BindGroup>,
    uniform_offset: u32,
    shadows: Option<Rc<wgpu::BindGroup>>,
    vertex: Rc<wgpu::Buffer>,
    index: Rc<wgpu::Buffer>,
    instance: Rc<wgpu::Buffer>,
    index_count: u32,
    instance_count: u32,
}

struct RecordedPass {
    target: PassTarget,
    draws: Vec<RecordedDraw>,
}

/// wgpu implementation of the render backend.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface_format: wgpu::TextureFormat,
    width: u32,
    height: u32,
    depth_view: wgpu::TextureView,
    buffers: BTreeMap<u32, Rc<wgpu::Buffer>>,
    next_buffer: u32,
    programs: Vec<Program>,
    current_program: Option<ProgramId>,
    targets: Vec<ShadowTarget>,
    shadow_layout: wgpu::BindGroupLayout,
    shadow_sampler: wgpu::Sampler,
    dummy_flat: wgpu::TextureView,
    dummy_cube: wgpu::TextureView,
    bound_maps: [Option<ShadowTargetId>; SHADOW_BINDINGS as usize],
    shadow_bind_group: Option<Rc<wgpu::BindGroup>>,
    passes: Vec<RecordedPass>,
    current_pass: Option<RecordedPass>,
    last_frame_draws: usize,
}

impl WgpuBackend {
    /// Take ownership of a device created with at least [`SHADOW_BINDINGS`]
    /// sampled textures per shader stage (request the adapter's limits).
    pub fn new(
        device: wgpu::Device,
        queue: wgpu::Queue,
        surface_format: wgpu::TextureFormat,
        width: u32,
        height: u32,
    ) -> Result<Self, BackendError> {
        let available = device.limits().max_sampled_textures_per_shader_stage;
        if available < SHADOW_BINDINGS {
            return Err(BackendError::Device(format!(
                "lit program needs {SHADOW_BINDINGS} sampled textures per stage, device allows {available}"
            )));
        }

        device.on_uncaptured_error(Box::new(|e| {
            error!("uncaptured wgpu error: {e}");
        }));

        let mut layout_entries: Vec<wgpu::BindGroupLayoutEntry> = (0..SHADOW_BINDINGS)
            .map(|binding| wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Depth,
                    view_dimension: if binding < MAX_SHADER_LIGHTS as u32 {
                        wgpu::TextureViewDimension::D2
                    } else {
                        wgpu::TextureViewDimension::Cube
                    },
                    multisampled: false,
                },
                count: None,
            })
            .collect();
        layout_entries.push(wgpu::BindGroupLayoutEntry {
            binding: SHADOW_BINDINGS,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Comparison),
            count: None,
        });
        let shadow_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("shadow_maps_layout"),
            entries: &layout_entries,
        });

        let shadow_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("shadow_sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            compare: Some(wgpu::CompareFunction::LessEqual),
            ..Default::default()
        });

        let (dummy_flat_texture, dummy_flat) = Self::depth_texture(&device, "dummy_flat", 1, 1);
        let (dummy_cube_texture, dummy_cube) = Self::depth_texture(&device, "dummy_cube", 1, 6);
        Self::clear_layers(&device, &queue, &dummy_flat_texture, 1);
        Self::clear_layers(&device, &queue, &dummy_cube_texture, 6);

        let depth_view = Self::create_depth_texture(&device, width, height);

        debug!(?surface_format, width, height, "wgpu backend ready");

        Ok(Self {
            device,
            queue,
            surface_format,
            width: width.max(1),
            height: height.max(1),
            depth_view,
            buffers: BTreeMap::new(),
            next_buffer: 0,
            programs: Vec::new(),
            current_program: None,
            targets: Vec::new(),
            shadow_layout,
            shadow_sampler,
            dummy_flat,
            dummy_cube,
            bound_maps: [None; SHADOW_BINDINGS as usize],
            shadow_bind_group: None,
            passes: Vec::new(),
            current_pass: None,
            last_frame_draws: 0,
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn surface_format(&self) -> wgpu::TextureFormat {
        self.surface_format
    }

    /// Draw calls encoded by the last [`WgpuBackend::submit`].
    pub fn last_frame_draws(&self) -> usize {
        self.last_frame_draws
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width.max(1);
        self.height = height.max(1);
        self.depth_view = Self::create_depth_texture(&self.device, width, height);
    }

    /// Encode every pass recorded since the last submit and queue them.
    /// Main passes render into `view`.
    pub fn submit(&mut self, view: &wgpu::TextureView) {
        if let Some(open) = self.current_pass.take() {
            warn!("pass left open at submit; closing it");
            self.passes.push(open);
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame_encoder"),
            });

        let mut draws = 0;
        for pass in self.passes.drain(..) {
            draws += pass.draws.len();
            match pass.target {
                PassTarget::Depth { target, layer, .. } => {
                    let Some(attachment) = self
                        .targets
                        .get(target.0 as usize)
                        .and_then(|t| t.attachments.get(layer))
                    else {
                        continue;
                    };
                    let mut rp = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                        label: Some("shadow_pass"),
                        color_attachments: &[],
                        depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                            view: attachment,
                            depth_ops: Some(wgpu::Operations {
                                load: wgpu::LoadOp::Clear(1.0),
                                store: wgpu::StoreOp::Store,
                            }),
                            stencil_ops: None,
                        }),
                        ..Default::default()
                    });
                    encode_draws(&mut rp, &pass.draws);
                }
                PassTarget::Main {
                    width,
                    height,
                    clear_color: [r, g, b, a],
                } => {
                    let mut rp = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                        label: Some("main_pass"),
                        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                            view,
                            resolve_target: None,
                            ops: wgpu::Operations {
                                load: wgpu::LoadOp::Clear(wgpu::Color {
                                    r: f64::from(r),
                                    g: f64::from(g),
                                    b: f64::from(b),
                                    a: f64::from(a),
                                }),
                                store: wgpu::StoreOp::Store,
                            },
                        })],
                        depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                            view: &self.depth_view,
                            depth_ops: Some(wgpu::Operations {
                                load: wgpu::LoadOp::Clear(1.0),
                                store: wgpu::StoreOp::Store,
                            }),
                            stencil_ops: None,
                        }),
                        ..Default::default()
                    });
                    let w = width.clamp(1, self.width);
                    let h = height.clamp(1, self.height);
                    rp.set_viewport(0.0, 0.0, w as f32, h as f32, 0.0, 1.0);
                    encode_draws(&mut rp, &pass.draws);
                }
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        for program in &mut self.programs {
            program.ring.reset();
        }
        self.last_frame_draws = draws;
    }

    fn depth_texture(
        device: &wgpu::Device,
        label: &str,
        size: u32,
        layers: u32,
    ) -> (wgpu::Texture, wgpu::TextureView) {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: size,
                height: size,
                depth_or_array_layers: layers,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(label),
            dimension: Some(if layers == 6 {
                wgpu::TextureViewDimension::Cube
            } else {
                wgpu::TextureViewDimension::D2
            }),
            array_layer_count: Some(layers),
            ..Default::default()
        });
        (texture, view)
    }

    fn layer_view(texture: &wgpu::Texture, layer: u32) -> wgpu::TextureView {
        texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("shadow_attachment"),
            dimension: Some(wgpu::TextureViewDimension::D2),
            base_array_layer: layer,
            array_layer_count: Some(1),
            ..Default::default()
        })
    }

    // Depth textures cannot be written directly, so clear them to the far plane.
    fn clear_layers(device: &wgpu::Device, queue: &wgpu::Queue, texture: &wgpu::Texture, layers: u32) {
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("clear_encoder"),
        });
        for layer in 0..layers {
            let view = Self::layer_view(texture, layer);
            encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("clear_pass"),
                color_attachments: &[],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                ..Default::default()
            });
        }
        queue.submit(std::iter::once(encoder.finish()));
    }

    fn create_depth_texture(device: &wgpu::Device, width: u32, height: u32) -> wgpu::TextureView {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("depth_texture"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        texture.create_view(&Default::default())
    }

    fn build_pipeline(
        &self,
        kind: ProgramKind,
        bind_group_layout: &wgpu::BindGroupLayout,
    ) -> wgpu::RenderPipeline {
        let (label, source) = match kind {
            ProgramKind::Lit => ("lit", shaders::lit_shader(FAR_PLANE)),
            ProgramKind::ShadowDepth => ("shadow_depth", shaders::shadow_shader()),
            ProgramKind::CubeDepth => ("cube_depth", shaders::cube_depth_shader()),
        };
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });

        let mut layouts = vec![bind_group_layout];
        if kind == ProgramKind::Lit {
            layouts.push(&self.shadow_layout);
        }
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &layouts,
                push_constant_ranges: &[],
            });

        let color_targets = [Some(wgpu::ColorTargetState {
            format: self.surface_format,
            blend: Some(wgpu::BlendState::ALPHA_BLENDING),
            write_mask: wgpu::ColorWrites::ALL,
        })];
        let (fragment_targets, cull_mode, bias): (&[Option<wgpu::ColorTargetState>], _, _) =
            match kind {
                ProgramKind::Lit => (&color_targets, Some(wgpu::Face::Back), Default::default()),
                ProgramKind::ShadowDepth => (
                    &[],
                    None,
                    wgpu::DepthBiasState {
                        constant: 2,
                        slope_scale: 2.0,
                        clamp: 0.0,
                    },
                ),
                ProgramKind::CubeDepth => (&[], None, Default::default()),
            };
        let fragment = match kind {
            ProgramKind::ShadowDepth => None,
            _ => Some(wgpu::FragmentState {
                module: &module,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: fragment_targets,
            }),
        };

        self.device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: Some("vs_main"),
                    compilation_options: Default::default(),
                    buffers: &vertex_layouts(),
                },
                fragment,
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    cull_mode,
                    ..Default::default()
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: true,
                    depth_compare: wgpu::CompareFunction::Less,
                    stencil: Default::default(),
                    bias,
                }),
                multisample: Default::default(),
                multiview: None,
                cache: None,
            })
    }

    fn shadow_bind_group(&mut self) -> Rc<wgpu::BindGroup> {
        if let Some(group) = &self.shadow_bind_group {
            return Rc::clone(group);
        }
        let mut entries: Vec<wgpu::BindGroupEntry> = Vec::with_capacity(SHADOW_BINDINGS as usize + 1);
        for (unit, bound) in self.bound_maps.iter().enumerate() {
            let dummy = if unit < MAX_SHADER_LIGHTS {
                &self.dummy_flat
            } else {
                &self.dummy_cube
            };
            let view = bound
                .and_then(|id| self.targets.get(id.0 as usize))
                .filter(|t| t.usable)
                .map_or(dummy, |t| &t.sample_view);
            entries.push(wgpu::BindGroupEntry {
                binding: unit as u32,
                resource: wgpu::BindingResource::TextureView(view),
            });
        }
        entries.push(wgpu::BindGroupEntry {
            binding: SHADOW_BINDINGS,
            resource: wgpu::BindingResource::Sampler(&self.shadow_sampler),
        });
        let group = Rc::new(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("shadow_maps"),
            layout: &self.shadow_layout,
            entries: &entries,
        }));
        self.shadow_bind_group = Some(Rc::clone(&group));
        group
    }
}

fn encode_draws(pass: &mut wgpu::RenderPass<'_>, draws: &[RecordedDraw]) {
    for draw in draws {
        pass.set_pipeline(&draw.pipeline);
        pass.set_bind_group(0, &*draw.uniforms, &[draw.uniform_offset]);
        if let Some(shadows) = &draw.shadows {
            pass.set_bind_group(1, &**shadows, &[]);
        }
        pass.set_vertex_buffer(0, draw.vertex.slice(..));
        pass.set_vertex_buffer(1, draw.instance.slice(..));
        pass.set_index_buffer(draw.index.slice(..), wgpu::IndexFormat::Uint32);
        pass.draw_indexed(0..draw.index_count, 0, 0..draw.instance_count);
    }
}

fn encode_uniform(ty: FieldType, value: UniformValue, out: &mut [u8]) -> bool {
    match (ty, value) {
        (FieldType::Int, UniformValue::Int(v)) => out.copy_from_slice(bytemuck::bytes_of(&v)),
        (FieldType::Float, UniformValue::Float(v)) => out.copy_from_slice(bytemuck::bytes_of(&v)),
        (FieldType::Vec3, UniformValue::Vec3(v)) => {
            out.copy_from_slice(bytemuck::cast_slice(&v.to_array()))
        }
        (FieldType::Mat4, UniformValue::Mat4(m)) => {
            out.copy_from_slice(bytemuck::cast_slice(&m.to_cols_array()))
        }
        _ => return false,
    }
    true
}

impl RenderBackend for WgpuBackend {
    fn create_buffer(&mut self, usage: BufferUsage, contents: &[u8]) -> BufferId {
        let (label, usages) = match usage {
            BufferUsage::Vertex => ("vertex_buffer", wgpu::BufferUsages::VERTEX),
            BufferUsage::Index => ("index_buffer", wgpu::BufferUsages::INDEX),
            BufferUsage::Instance => ("instance_buffer", wgpu::BufferUsages::VERTEX),
        };
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage: usages | wgpu::BufferUsages::COPY_DST,
            });
        let id = BufferId(self.next_buffer);
        self.next_buffer += 1;
        self.buffers.insert(id.0, Rc::new(buffer));
        id
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) {
        match self.buffers.get(&buffer.0) {
            Some(target) => self.queue.write_buffer(target, offset, data),
            None => warn!(?buffer, "write to unknown buffer ignored"),
        }
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        // draws recorded this frame keep their own reference until submit
        self.buffers.remove(&buffer.0);
    }

    fn create_program(&mut self, kind: ProgramKind) -> Result<ProgramId, BackendError> {
        let layout = shaders::uniform_layout(kind);
        let bind_group_layout =
            self.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("uniform_block_layout"),
                    entries: &[wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: true,
                            min_binding_size: NonZeroU64::new(u64::from(layout.size)),
                        },
                        count: None,
                    }],
                });

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = self.build_pipeline(kind, &bind_group_layout);
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(BackendError::ProgramCreation {
                kind,
                reason: err.to_string(),
            });
        }

        let alignment = self.device.limits().min_uniform_buffer_offset_alignment;
        let id = ProgramId(self.programs.len() as u32);
        debug!(?kind, ?id, block = layout.size, "program created");
        self.programs.push(Program {
            kind,
            pipeline: Rc::new(pipeline),
            bind_group_layout,
            block: vec![0; layout.size as usize],
            ring: UniformRing::new(layout.size, alignment),
            layout,
        });
        Ok(id)
    }

    fn use_program(&mut self, program: ProgramId) {
        if (program.0 as usize) < self.programs.len() {
            self.current_program = Some(program);
        } else {
            warn!(?program, "use of unknown program ignored");
        }
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        let slot = self.programs.get(program.0 as usize)?.layout.field(name)?;
        Some(UniformLocation {
            program,
            slot: slot as u32,
        })
    }

    fn set_uniform(&mut self, location: UniformLocation, value: UniformValue) {
        let Some(program) = self.programs.get_mut(location.program.0 as usize) else {
            return;
        };
        let Some(field) = program.layout.fields.get(location.slot as usize) else {
            return;
        };
        let start = field.offset as usize;
        let end = start + field.ty.size() as usize;
        if !encode_uniform(field.ty, value, &mut program.block[start..end]) {
            warn!(field = %field.name, ?value, "uniform type mismatch");
        }
    }

    fn create_shadow_target(
        &mut self,
        kind: ShadowKind,
        resolution: u32,
    ) -> (ShadowTargetId, TargetStatus) {
        let max = self.device.limits().max_texture_dimension_2d;
        let size = resolution.clamp(1, max);
        let layers = match kind {
            ShadowKind::Flat => 1,
            ShadowKind::Cube => 6,
        };

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let (texture, sample_view) = Self::depth_texture(&self.device, "shadow_map", size, layers);
        let attachments = (0..layers).map(|l| Self::layer_view(&texture, l)).collect();
        let oom = pollster::block_on(self.device.pop_error_scope());
        let invalid = pollster::block_on(self.device.pop_error_scope());

        let failure = oom.or(invalid);
        let usable = failure.is_none();
        let status = match failure {
            Some(err) => TargetStatus::Incomplete(err.to_string()),
            None if size != resolution => {
                TargetStatus::Incomplete(format!("resolution {resolution} clamped to {size}"))
            }
            None => TargetStatus::Complete,
        };
        let id = ShadowTargetId(self.targets.len() as u32);
        self.targets.push(ShadowTarget {
            kind,
            // a clamped target still renders; a failed one is never touched
            usable,
            attachments,
            sample_view,
        });
        (id, status)
    }

    fn begin_depth_pass(&mut self, target: ShadowTargetId, face: Option<CubeFace>) {
        if let Some(open) = self.current_pass.take() {
            warn!("depth pass started inside an open pass");
            self.passes.push(open);
        }
        let Some(shadow) = self.targets.get(target.0 as usize) else {
            warn!(?target, "depth pass into unknown target ignored");
            return;
        };
        if !shadow.usable {
            return;
        }
        let layer = match (shadow.kind, face) {
            (ShadowKind::Cube, Some(face)) => face.layer() as usize,
            (ShadowKind::Cube, None) => {
                warn!(?target, "cube target bound without a face; using +X");
                0
            }
            (ShadowKind::Flat, _) => 0,
        };
        self.current_pass = Some(RecordedPass {
            target: PassTarget::Depth {
                target,
                layer,
                kind: shadow.kind,
            },
            draws: Vec::new(),
        });
    }

    fn begin_main_pass(&mut self, width: u32, height: u32, clear_color: [f32; 4]) {
        if let Some(open) = self.current_pass.take() {
            warn!("main pass started inside an open pass");
            self.passes.push(open);
        }
        self.current_pass = Some(RecordedPass {
            target: PassTarget::Main {
                width,
                height,
                clear_color,
            },
            draws: Vec::new(),
        });
    }

    fn end_pass(&mut self) {
        if let Some(pass) = self.current_pass.take() {
            self.passes.push(pass);
        }
    }

    fn bind_shadow_map(&mut self, unit: u32, target: ShadowTargetId) {
        let Some(shadow) = self.targets.get(target.0 as usize) else {
            warn!(?target, "bind of unknown shadow target ignored");
            return;
        };
        let expected = if unit < MAX_SHADER_LIGHTS as u32 {
            ShadowKind::Flat
        } else {
            ShadowKind::Cube
        };
        if unit >= SHADOW_BINDINGS || shadow.kind != expected {
            warn!(unit, ?target, kind = ?shadow.kind, "shadow map does not fit texture unit");
            return;
        }
        let slot = &mut self.bound_maps[unit as usize];
        if *slot != Some(target) {
            *slot = Some(target);
            self.shadow_bind_group = None;
        }
    }

    fn draw_instanced(&mut self, draw: &InstancedDraw) {
        let Some(program_id) = self.current_program else {
            warn!("draw without a program ignored");
            return;
        };
        let Some(pass_target) = self.current_pass.as_ref().map(|p| p.target) else {
            // depth passes into unusable targets are dropped, and so are their draws
            return;
        };
        let kind = self.programs[program_id.0 as usize].kind;
        let fits = matches!(
            (kind, pass_target),
            (ProgramKind::Lit, PassTarget::Main { .. })
                | (ProgramKind::ShadowDepth, PassTarget::Depth { kind: ShadowKind::Flat, .. })
                | (ProgramKind::CubeDepth, PassTarget::Depth { kind: ShadowKind::Cube, .. })
        );
        if !fits {
            warn!(?kind, "program does not match the current pass; draw ignored");
            return;
        }
        let buffers = (
            self.buffers.get(&draw.vertex_buffer.0).cloned(),
            self.buffers.get(&draw.index_buffer.0).cloned(),
            self.buffers.get(&draw.instance_buffer.0).cloned(),
        );
        let (Some(vertex), Some(index), Some(instance)) = buffers else {
            warn!(?draw, "draw references a destroyed buffer");
            return;
        };

        let shadows = (kind == ProgramKind::Lit).then(|| self.shadow_bind_group());
        let program = &mut self.programs[program_id.0 as usize];
        let (uniforms, uniform_offset) = program.ring.push(
            &self.device,
            &self.queue,
            &program.bind_group_layout,
            &program.block,
        );
        let recorded = RecordedDraw {
            pipeline: Rc::clone(&program.pipeline),
            uniforms,
            uniform_offset,
            shadows,
            vertex,
            index,
            instance,
            index_count: draw.index_count,
            instance_count: draw.instance_count,
        };
        if let Some(pass) = self.current_pass.as_mut() {
            pass.draws.push(recorded);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Mat4, Vec3};

    #[test]
    fn ring_stride_respects_alignment() {
        let ring = UniformRing::new(1424, 256);
        assert_eq!(ring.stride, 1536);
        assert_eq!(ring.block_size, 1424);

        let ring = UniformRing::new(64, 256);
        assert_eq!(ring.stride, 256);

        let ring = UniformRing::new(80, 0);
        assert_eq!(ring.stride, 80);
    }

    #[test]
    fn uniforms_encode_into_their_field() {
        let mut out = [0u8; 12];
        assert!(encode_uniform(
            FieldType::Vec3,
            UniformValue::Vec3(Vec3::new(1.0, 2.0, 3.0)),
            &mut out
        ));
        let floats: &[f32] = bytemuck::cast_slice(&out);
        assert_eq!(floats, &[1.0, 2.0, 3.0]);

        let mut out = [0u8; 64];
        assert!(encode_uniform(
            FieldType::Mat4,
            UniformValue::Mat4(Mat4::IDENTITY),
            &mut out
        ));
        let floats: &[f32] = bytemuck::cast_slice(&out);
        assert_eq!(floats[0], 1.0);
        assert_eq!(floats[5], 1.0);
        assert_eq!(floats[1], 0.0);
    }

    #[test]
    fn mismatched_uniform_leaves_block_untouched() {
        let mut out = [7u8; 4];
        assert!(!encode_uniform(FieldType::Int, UniformValue::Float(1.0), &mut out));
        assert_eq!(out, [7u8; 4]);

        assert!(encode_uniform(FieldType::Int, UniformValue::Int(-1), &mut out));
        assert_eq!(out, [0xff; 4]);
    }

    #[test]
    fn vertex_layouts_match_gpu_records() {
        let [vertex, instance] = vertex_layouts();
        assert_eq!(vertex.array_stride, 32);
        assert_eq!(instance.array_stride, 80);
        assert_eq!(instance.step_mode, wgpu::VertexStepMode::Instance);
        assert_eq!(instance.attributes.last().map(|a| a.shader_location), Some(7));
    }
}
