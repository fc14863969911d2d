use anyhow::{Context, Result, anyhow};
use clap::Parser;
use egui::Context as EguiContext;
use glam::Vec2;
use lumen_assets::ShapeRegistry;
use lumen_render::{LightManager, LightManagerConfig, MAX_SHADER_LIGHTS};
use lumen_render_wgpu::{FlyCamera, WgpuBackend};
use lumen_scene::{Action, GameMap, SceneConfig};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{DeviceEvent, ElementState, KeyEvent, MouseButton, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

/// World units per second for arrow-key nudging.
const NUDGE_SPEED: f32 = 20.0;

#[derive(Parser)]
#[command(name = "lumen-desktop", about = "Lumen scene viewer")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Scene description (YAML). The built-in demo scene is used if omitted.
    #[arg(long)]
    scene: Option<PathBuf>,

    /// Root of the `<name>/<name>.obj` model directories
    #[arg(long, default_value = "./assets")]
    assets: PathBuf,

    /// Edge length of 2D shadow maps; cube faces use half of it
    #[arg(long)]
    shadow_resolution: Option<u32>,
}

/// Everything that exists before a window does.
struct AppState {
    scene: SceneConfig,
    registry: ShapeRegistry,
    light_config: LightManagerConfig,
    camera: FlyCamera,
    show_overlay: bool,
    keys_held: HashSet<KeyCode>,
    mouse_captured: bool,
    last_frame: Instant,
    pending: Vec<Action>,
}

impl AppState {
    fn new(cli: &Cli) -> Result<Self> {
        let scene = match &cli.scene {
            Some(path) => SceneConfig::load(path)
                .with_context(|| format!("loading scene {}", path.display()))?,
            None => SceneConfig::default(),
        };

        let mut registry = ShapeRegistry::builtin();
        scene.register_models(&mut registry, &cli.assets);

        let mut light_config = LightManagerConfig::default();
        if let Some(resolution) = cli.shadow_resolution {
            light_config.flat_resolution = resolution.max(1);
            light_config.cube_resolution = (resolution / 2).max(1);
        }

        let mut camera = FlyCamera::default();
        camera.position = scene.camera.position;
        camera.look_at(scene.camera.target);

        Ok(Self {
            scene,
            registry,
            light_config,
            camera,
            show_overlay: true,
            keys_held: HashSet::new(),
            mouse_captured: false,
            last_frame: Instant::now(),
            pending: Vec::new(),
        })
    }

    fn axis(&self, positive: KeyCode, negative: KeyCode) -> f32 {
        let held = |key| if self.keys_held.contains(&key) { 1.0 } else { 0.0 };
        held(positive) - held(negative)
    }

    fn update(&mut self, dt: f32) {
        self.camera.set_move_input(Vec2::new(
            self.axis(KeyCode::KeyD, KeyCode::KeyA),
            self.axis(KeyCode::KeyW, KeyCode::KeyS),
        ));
        self.camera
            .set_vertical_input(self.axis(KeyCode::Space, KeyCode::ControlLeft));
        self.camera.update(dt);

        let nudge = Vec2::new(
            self.axis(KeyCode::ArrowRight, KeyCode::ArrowLeft),
            self.axis(KeyCode::ArrowDown, KeyCode::ArrowUp),
        );
        if nudge != Vec2::ZERO {
            self.pending.push(Action::Nudge(nudge * NUDGE_SPEED * dt));
        }
    }

    fn handle_key(&mut self, key: KeyCode, pressed: bool) {
        if pressed {
            self.keys_held.insert(key);
        } else {
            self.keys_held.remove(&key);
            return;
        }

        let action = match key {
            KeyCode::F1 => {
                self.show_overlay = !self.show_overlay;
                None
            }
            KeyCode::Escape | KeyCode::Digit0 => Some(Action::Deselect),
            KeyCode::KeyL => Some(Action::SnapLight {
                position: self.camera.position,
                direction: self.camera.forward(),
            }),
            key => digit(key).map(|n| Action::Select(n - 1)),
        };
        self.pending.extend(action);
    }
}

fn digit(key: KeyCode) -> Option<usize> {
    let n = match key {
        KeyCode::Digit1 => 1,
        KeyCode::Digit2 => 2,
        KeyCode::Digit3 => 3,
        KeyCode::Digit4 => 4,
        KeyCode::Digit5 => 5,
        KeyCode::Digit6 => 6,
        KeyCode::Digit7 => 7,
        KeyCode::Digit8 => 8,
        KeyCode::Digit9 => 9,
        _ => return None,
    };
    Some(n)
}

/// Window, surface and everything built on the device.
struct Gpu {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    backend: WgpuBackend,
    lights: LightManager,
    map: GameMap,
    egui_winit: egui_winit::State,
    egui_renderer: egui_wgpu::Renderer,
}

impl Gpu {
    fn new(
        event_loop: &ActiveEventLoop,
        state: &mut AppState,
        egui_ctx: &EguiContext,
    ) -> Result<Self> {
        let attrs = Window::default_attributes()
            .with_title("Lumen")
            .with_inner_size(PhysicalSize::new(1280u32, 720));
        let window = Arc::new(event_loop.create_window(attrs).context("creating window")?);

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = instance
            .create_surface(window.clone())
            .context("creating surface")?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| anyhow!("no suitable GPU adapter"))?;

        // Twenty shadow textures in one stage is above the default limit.
        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("lumen_device"),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
                memory_hints: Default::default(),
            },
            None,
        ))
        .context("creating device")?;

        let size = window.inner_size();
        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first())
            .copied()
            .ok_or_else(|| anyhow!("surface reports no formats"))?;

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);
        state.camera.aspect = config.width as f32 / config.height as f32;

        tracing::info!(
            backend = adapter.get_info().backend.to_str(),
            adapter = %adapter.get_info().name,
            "GPU initialized"
        );

        let mut backend =
            WgpuBackend::new(device, queue, surface_format, config.width, config.height)?;
        let mut lights = LightManager::new(&mut backend, state.light_config)?;
        let map = GameMap::build(&state.scene, &state.registry, &mut lights, &mut backend)?;

        let egui_winit = egui_winit::State::new(
            egui_ctx.clone(),
            egui::ViewportId::ROOT,
            &window,
            Some(window.scale_factor() as f32),
            None,
            None,
        );
        let egui_renderer =
            egui_wgpu::Renderer::new(backend.device(), surface_format, None, 1, false);

        Ok(Self {
            window,
            surface,
            config,
            backend,
            lights,
            map,
            egui_winit,
            egui_renderer,
        })
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.config.width = width.max(1);
        self.config.height = height.max(1);
        self.surface.configure(self.backend.device(), &self.config);
        self.backend.resize(self.config.width, self.config.height);
    }

    /// Depth pass per light, then the lit pass, then submit.
    fn render_scene(&mut self, camera: &FlyCamera, view: &wgpu::TextureView) {
        let Self {
            backend,
            lights,
            map,
            config,
            ..
        } = self;

        lights.set_camera(
            backend,
            camera.view_matrix(),
            camera.projection_matrix(),
            camera.position,
        );
        let clear_color = map.clear_color();
        lights.generate_depth_maps(backend, |b| {
            map.draw(b);
        });
        lights.render_with_shadows(
            backend,
            |b| {
                map.draw(b);
            },
            config.width,
            config.height,
            clear_color,
        );
        backend.submit(view);
    }

    fn render_overlay(
        &mut self,
        egui_ctx: &EguiContext,
        state: &AppState,
        view: &wgpu::TextureView,
    ) -> Option<Action> {
        let raw_input = self.egui_winit.take_egui_input(&self.window);
        let mut clicked = None;
        let gpu: &Gpu = self;
        let full_output = egui_ctx.run(raw_input, |ctx| {
            clicked = draw_overlay(ctx, state, gpu);
        });
        self.egui_winit
            .handle_platform_output(&self.window, full_output.platform_output);

        let paint_jobs = egui_ctx.tessellate(full_output.shapes, full_output.pixels_per_point);
        let screen_descriptor = egui_wgpu::ScreenDescriptor {
            size_in_pixels: [self.config.width, self.config.height],
            pixels_per_point: full_output.pixels_per_point,
        };

        let device = self.backend.device();
        let queue = self.backend.queue();
        for (id, image_delta) in &full_output.textures_delta.set {
            self.egui_renderer
                .update_texture(device, queue, *id, image_delta);
        }
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("egui_encoder"),
        });
        self.egui_renderer.update_buffers(
            device,
            queue,
            &mut encoder,
            &paint_jobs,
            &screen_descriptor,
        );
        {
            let mut pass = encoder
                .begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("egui_pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    ..Default::default()
                })
                .forget_lifetime();
            self.egui_renderer
                .render(&mut pass, &paint_jobs, &screen_descriptor);
        }
        queue.submit(std::iter::once(encoder.finish()));
        for id in &full_output.textures_delta.free {
            self.egui_renderer.free_texture(id);
        }
        clicked
    }
}

/// Side panel with pools, lights and the current selection. Returns the
/// action of a clicked entry.
fn draw_overlay(ctx: &EguiContext, state: &AppState, gpu: &Gpu) -> Option<Action> {
    if !state.show_overlay {
        return None;
    }
    let map = &gpu.map;
    let mut clicked = None;

    egui::SidePanel::left("overlay")
        .default_width(300.0)
        .show(ctx, |ui| {
            ui.heading("Lumen");
            ui.separator();
            ui.label(format!(
                "t = {:.1}s  draws: {}",
                map.time(),
                gpu.backend.last_frame_draws()
            ));
            let eye = state.camera.position;
            ui.label(format!("Camera: ({:.1}, {:.1}, {:.1})", eye.x, eye.y, eye.z));
            ui.label(match map.selected() {
                Some(index) => format!("Selected: {}", index + 1),
                None => "Selected: none".to_string(),
            });
            ui.separator();

            ui.heading("Pools");
            egui::Grid::new("pools").striped(true).show(ui, |ui| {
                ui.label("mesh");
                ui.label("slots");
                ui.label("live");
                ui.label("capacity");
                ui.end_row();
                for pool in map.pools() {
                    ui.label(pool.name());
                    ui.label(pool.slot_count().to_string());
                    ui.label(pool.live_count().to_string());
                    ui.label(pool.capacity().to_string());
                    ui.end_row();
                }
            });
            ui.separator();

            ui.heading("Lights");
            for (index, id) in map.movable_lights().iter().enumerate() {
                let Some(light) = gpu.lights.light(*id) else {
                    continue;
                };
                let pos = light.pos();
                let label = format!(
                    "{} {:?} ({:.0}, {:.0}, {:.0})",
                    index + 1,
                    light.kind(),
                    pos.x,
                    pos.y,
                    pos.z
                );
                let selected = map.selected() == Some(index);
                if ui.selectable_label(selected, label).clicked() {
                    clicked = Some(Action::Select(index));
                }
            }
            ui.label(format!(
                "{} of {} light slots used",
                gpu.lights.len(),
                MAX_SHADER_LIGHTS
            ));

            ui.separator();
            ui.small("F1: Overlay | RMB: Look | WASD/Space/Ctrl: Move");
            ui.small("1-9: Select | Arrows: Nudge | L: Snap light | Esc: Deselect");
        });
    clicked
}

struct GpuApp {
    state: AppState,
    gpu: Option<Gpu>,
    egui_ctx: EguiContext,
    fatal: Option<anyhow::Error>,
}

impl GpuApp {
    fn new(state: AppState) -> Self {
        Self {
            state,
            gpu: None,
            egui_ctx: EguiContext::default(),
            fatal: None,
        }
    }

    fn redraw(&mut self) {
        let now = Instant::now();
        let dt = (now - self.state.last_frame).as_secs_f32().min(0.1);
        self.state.last_frame = now;
        self.state.update(dt);

        let Some(gpu) = &mut self.gpu else {
            return;
        };
        for action in self.state.pending.drain(..) {
            gpu.map.apply(action, &mut gpu.lights);
        }
        gpu.map.update(dt, &mut gpu.lights);

        let output = match gpu.surface.get_current_texture() {
            Ok(t) => t,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                gpu.surface.configure(gpu.backend.device(), &gpu.config);
                return;
            }
            Err(e) => {
                tracing::error!("surface error: {e}");
                return;
            }
        };
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        gpu.render_scene(&self.state.camera, &view);
        if let Some(action) = gpu.render_overlay(&self.egui_ctx, &self.state, &view) {
            gpu.map.apply(action, &mut gpu.lights);
        }

        output.present();
        gpu.window.request_redraw();
    }
}

impl ApplicationHandler for GpuApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.gpu.is_some() {
            return;
        }
        match Gpu::new(event_loop, &mut self.state, &self.egui_ctx) {
            Ok(gpu) => self.gpu = Some(gpu),
            Err(e) => {
                self.fatal = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(gpu) = &mut self.gpu {
            let response = gpu.egui_winit.on_window_event(&gpu.window, &event);
            if response.consumed {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }
            WindowEvent::Resized(new_size) => {
                if let Some(gpu) = &mut self.gpu {
                    gpu.resize(new_size.width, new_size.height);
                    self.state.camera.aspect =
                        gpu.config.width as f32 / gpu.config.height as f32;
                }
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key),
                        state: key_state,
                        repeat: false,
                        ..
                    },
                ..
            } => {
                self.state
                    .handle_key(key, key_state == ElementState::Pressed);
            }
            WindowEvent::MouseInput {
                button: MouseButton::Right,
                state: btn_state,
                ..
            } => {
                self.state.mouse_captured = btn_state == ElementState::Pressed;
                if let Some(gpu) = &self.gpu {
                    gpu.window.set_cursor_visible(!self.state.mouse_captured);
                }
            }
            WindowEvent::RedrawRequested => self.redraw(),
            _ => {}
        }
    }

    fn device_event(
        &mut self,
        _event_loop: &ActiveEventLoop,
        _device_id: winit::event::DeviceId,
        event: DeviceEvent,
    ) {
        if let DeviceEvent::MouseMotion { delta } = event {
            if self.state.mouse_captured {
                self.state.camera.rotate(delta.0 as f32, delta.1 as f32);
            }
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(gpu) = &self.gpu {
            gpu.window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(Gpu {
            map,
            mut lights,
            mut backend,
            ..
        }) = self.gpu.take()
        {
            map.destroy(&mut lights, &mut backend);
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    tracing::info!("lumen-desktop starting");

    let state = AppState::new(&cli)?;
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = GpuApp::new(state);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
