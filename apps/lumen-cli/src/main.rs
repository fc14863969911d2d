use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use glam::{Mat4, Vec3};
use lumen_assets::{ShapeRegistry, ShapeSource};
use lumen_common::{InstanceData, Vertex};
use lumen_render::{Command, LightManager, LightManagerConfig, RecordingBackend};
use lumen_scene::{GameMap, SceneConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lumen-cli", about = "Headless tools for lumen scenes")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SceneArgs {
    /// Scene description (YAML). The built-in demo scene is used if omitted.
    #[arg(long)]
    scene: Option<PathBuf>,

    /// Root of the `<name>/<name>.obj` model directories
    #[arg(long, default_value = "./assets")]
    assets: PathBuf,
}

impl SceneArgs {
    fn load(&self) -> anyhow::Result<(SceneConfig, ShapeRegistry)> {
        let scene = match &self.scene {
            Some(path) => SceneConfig::load(path)
                .with_context(|| format!("loading scene {}", path.display()))?,
            None => SceneConfig::default(),
        };
        let mut registry = ShapeRegistry::builtin();
        scene.register_models(&mut registry, &self.assets);
        Ok((scene, registry))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and crate info
    Info,
    /// List registered shapes with their vertex and triangle counts
    Shapes {
        #[command(flatten)]
        scene: SceneArgs,
    },
    /// Run frames of a scene against the recording backend and report what
    /// the GPU would have been asked to do
    Simulate {
        #[command(flatten)]
        scene: SceneArgs,
        /// Number of frames to run
        #[arg(short, long, default_value = "120")]
        frames: u32,
        /// Seconds per frame
        #[arg(long, default_value = "0.016666668")]
        dt: f32,
        /// Edge length of 2D shadow maps; cube faces use half of it
        #[arg(long)]
        shadow_resolution: Option<u32>,
    },
}

/// Per-frame tally of recorded backend commands.
#[derive(Debug, Default)]
struct FrameStats {
    depth_passes: usize,
    main_passes: usize,
    draws: usize,
    instances: u64,
    buffer_writes: usize,
    bytes_written: usize,
    uniforms: usize,
}

impl FrameStats {
    fn tally(commands: &[Command]) -> Self {
        let mut stats = Self::default();
        for command in commands {
            match command {
                Command::BeginDepthPass { .. } => stats.depth_passes += 1,
                Command::BeginMainPass { .. } => stats.main_passes += 1,
                Command::Draw(draw) => {
                    stats.draws += 1;
                    stats.instances += u64::from(draw.instance_count);
                }
                Command::CreateBuffer { len, .. } | Command::WriteBuffer { len, .. } => {
                    stats.buffer_writes += 1;
                    stats.bytes_written += len;
                }
                Command::SetUniform { .. } => stats.uniforms += 1,
                _ => {}
            }
        }
        stats
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info => {
            println!("lumen-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("render: {}", lumen_render::crate_info());
            println!("assets: {}", lumen_assets::crate_info());
            println!("scene: {}", lumen_scene::crate_info());
            println!(
                "layout: vertex={} bytes, instance={} bytes, max lights={}",
                std::mem::size_of::<Vertex>(),
                InstanceData::SIZE,
                lumen_render::MAX_SHADER_LIGHTS
            );
        }
        Commands::Shapes { scene } => {
            let (_, registry) = scene.load()?;
            for (name, source) in registry.iter() {
                let origin = match source {
                    ShapeSource::Procedural(shape) => format!("{shape:?}"),
                    ShapeSource::File(path) => path.display().to_string(),
                };
                match registry.load(name) {
                    Ok(mesh) => println!(
                        "{name:<18} vertices={:<6} triangles={:<6} {origin}",
                        mesh.vertex_count(),
                        mesh.triangle_count()
                    ),
                    Err(e) => println!("{name:<18} error: {e}"),
                }
            }
        }
        Commands::Simulate {
            scene,
            frames,
            dt,
            shadow_resolution,
        } => {
            let (config, registry) = scene.load()?;
            let mut light_config = LightManagerConfig::default();
            if let Some(resolution) = shadow_resolution {
                light_config.flat_resolution = resolution.max(1);
                light_config.cube_resolution = (resolution / 2).max(1);
            }

            let mut backend = RecordingBackend::new();
            let mut lights = LightManager::new(&mut backend, light_config)?;
            let mut map = GameMap::build(&config, &registry, &mut lights, &mut backend)?;
            let setup = FrameStats::tally(&backend.take_commands());
            println!(
                "Setup: pools={}, instances={}, lights={}, uploads={} ({} bytes)",
                map.pools().count(),
                map.instance_count(),
                lights.len(),
                setup.buffer_writes,
                setup.bytes_written
            );

            let (width, height) = (1280, 720);
            let camera = map.camera();
            let view = Mat4::look_at_rh(camera.position, camera.target, Vec3::Y);
            let projection = Mat4::perspective_rh(
                90.0_f32.to_radians(),
                width as f32 / height as f32,
                0.01,
                5000.0,
            );

            let mut total = FrameStats::default();
            for _ in 0..frames {
                map.update(dt, &mut lights);
                lights.set_camera(&mut backend, view, projection, camera.position);
                let clear_color = map.clear_color();
                lights.generate_depth_maps(&mut backend, |b| {
                    map.draw(b);
                });
                lights.render_with_shadows(
                    &mut backend,
                    |b| {
                        map.draw(b);
                    },
                    width,
                    height,
                    clear_color,
                );

                let frame = FrameStats::tally(&backend.take_commands());
                tracing::debug!(t = map.time(), ?frame, "frame recorded");
                total.depth_passes += frame.depth_passes;
                total.main_passes += frame.main_passes;
                total.draws += frame.draws;
                total.instances += frame.instances;
                total.buffer_writes += frame.buffer_writes;
                total.bytes_written += frame.bytes_written;
                total.uniforms += frame.uniforms;
            }

            let per_frame = |n: usize| n as f64 / f64::from(frames.max(1));
            println!("Frames: {frames} at dt={dt}s (t={:.2}s)", map.time());
            println!(
                "Passes/frame: depth={:.1}, main={:.1}",
                per_frame(total.depth_passes),
                per_frame(total.main_passes)
            );
            println!(
                "Draws/frame: {:.1} ({:.1} instances)",
                per_frame(total.draws),
                total.instances as f64 / f64::from(frames.max(1))
            );
            println!(
                "Uploads/frame: {:.1} ({:.0} bytes), uniforms/frame: {:.1}",
                per_frame(total.buffer_writes),
                per_frame(total.bytes_written),
                per_frame(total.uniforms)
            );
            for (index, (_, light)) in lights.iter().enumerate() {
                let dir = light.dir();
                println!(
                    "Light {index}: {:?} pos={} dir=({:.2}, {:.2}, {:.2})",
                    light.kind(),
                    light.pos(),
                    dir.x,
                    dir.y,
                    dir.z
                );
            }

            map.destroy(&mut lights, &mut backend);
            println!("Live buffers after teardown: {}", backend.live_buffers());
        }
    }

    Ok(())
}
