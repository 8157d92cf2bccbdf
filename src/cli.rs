use std::{
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
};

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use index_vec::IndexVec;
use indicatif::{ProgressBar, ProgressStyle};
use itertools::Itertools as _;
use wavepath::{
    BackendConfig, CameraParams, Effect, OverflowPolicy, RenderSettings, Rgb, Scene, SceneBuffers,
    TriangleBvh, WavefrontRenderer,
    backend::{self, WorkerCount},
    camera::check_view,
    geometry::{FloatType, ScreenSize, WorldBox, WorldPoint, WorldVector},
    scene::lights::AreaLightRow,
};

/// Progressive wavefront renderer for OBJ scenes.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// OBJ file to render, materials are read from its MTL library.
    #[arg(required_unless_present = "list_devices")]
    scene: Option<PathBuf>,

    /// Output image, format chosen by extension (.exr keeps floats).
    #[arg(short, long, value_name = "FILE", default_value = "out.png")]
    output: PathBuf,

    #[command(subcommand)]
    effect: Option<EffectCommand>,

    /// Number of accumulated frames.
    #[arg(short, long, default_value = "16")]
    frames: NonZeroU32,

    #[arg(long, default_value_t = 800)]
    width: u32,

    #[arg(long, default_value_t = 600)]
    height: u32,

    /// Camera position as "x,y,z"; placed in front of the scene by default.
    #[arg(long, value_parser = parse_point)]
    eye: Option<WorldPoint>,

    /// Point the camera looks at as "x,y,z"; center of the scene by default.
    #[arg(long, value_parser = parse_point)]
    target: Option<WorldPoint>,

    /// Background color as "r,g,b".
    #[arg(long, value_parser = parse_color, default_value = "0,0,0")]
    background: Rgb,

    #[arg(long, default_value_t = 0)]
    platform: usize,

    #[arg(long, default_value_t = 0)]
    device: usize,

    /// Worker threads, one per core by default.
    #[arg(short = 't', long)]
    workers: Option<NonZeroUsize>,

    #[arg(long)]
    pin_workers: bool,

    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Secondary ray queue size, overrides the size derived from the effect.
    #[arg(long)]
    capacity: Option<usize>,

    /// What to do when shading emits more rays than the queue holds.
    #[arg(long, value_enum, default_value_t = Overflow::Fail)]
    overflow: Overflow,

    #[arg(long)]
    no_antialiasing: bool,

    /// Print available platforms and devices and exit.
    #[arg(long)]
    list_devices: bool,
}

#[derive(Subcommand, Debug, Clone)]
enum EffectCommand {
    /// Flat vertex colors
    Primary,
    /// Ambient occlusion
    Ao {
        #[arg(long, default_value = "4")]
        rays_per_hit: NonZeroU32,
        /// Occlusion distance, a tenth of the scene size by default.
        #[arg(long)]
        radius: Option<FloatType>,
    },
    /// Soft shadows from a row of area lights above the scene
    Shadows {
        #[arg(long, default_value = "3")]
        lights: NonZeroU32,
        #[arg(long, default_value = "2")]
        rays_per_light: NonZeroU32,
    },
    /// Single glossy reflection bounce
    Reflection {
        #[arg(long, default_value_t = 50.0)]
        exponent: FloatType,
    },
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Overflow {
    Fail,
    Drop,
}

impl From<Overflow> for OverflowPolicy {
    fn from(value: Overflow) -> Self {
        match value {
            Overflow::Fail => OverflowPolicy::Fail,
            Overflow::Drop => OverflowPolicy::Drop,
        }
    }
}

fn parse_triple(s: &str) -> Result<(f32, f32, f32), String> {
    s.split(',')
        .map(|part| part.trim().parse::<f32>().map_err(|e| format!("{part:?}: {e}")))
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .collect_tuple()
        .ok_or_else(|| format!("expected three comma separated numbers, got {s:?}"))
}

fn parse_point(s: &str) -> Result<WorldPoint, String> {
    let (x, y, z) = parse_triple(s)?;
    Ok(WorldPoint::new(x, y, z))
}

fn parse_color(s: &str) -> Result<Rgb, String> {
    let (r, g, b) = parse_triple(s)?;
    Ok(Rgb::new(r, g, b))
}

fn list_devices() {
    for (i, platform) in backend::enumerate_devices().iter().enumerate() {
        println!(
            "Platform {i}: {} [{}]",
            platform.name,
            platform
                .devices
                .iter()
                .enumerate()
                .map(|(j, device)| format!(
                    "{j}: {} ({:?}, {} compute units)",
                    device.name, device.kind, device.compute_units
                ))
                .join(", ")
        );
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    if args.list_devices {
        list_devices();
        return Ok(());
    }

    let scene_path = args.scene.context("No scene given")?;
    let mut scene = Scene::load_obj(&scene_path)
        .with_context(|| format!("Loading scene {}", scene_path.display()))?;
    let bounds = scene.bounds().context("Scene has no geometry")?;
    let scene_size = bounds.size().norm();

    let effect = match args.effect.clone().unwrap_or(EffectCommand::Primary) {
        EffectCommand::Primary => Effect::Primary,
        EffectCommand::Ao {
            rays_per_hit,
            radius,
        } => Effect::AmbientOcclusion {
            rays_per_hit,
            radius: radius.unwrap_or(scene_size * 0.1),
        },
        EffectCommand::Shadows { rays_per_light, .. } => Effect::AreaShadows { rays_per_light },
        EffectCommand::Reflection { exponent } => Effect::GlossyReflection { exponent },
    };

    let lights = match args.effect {
        Some(EffectCommand::Shadows { lights, .. }) => light_row(&bounds, lights)
            .add_to(&mut scene)
            .context("Adding area lights")?,
        _ => IndexVec::new(),
    };

    let resolution = ScreenSize::new(args.width, args.height);
    let target = args.target.unwrap_or_else(|| bounds.center());
    let eye = args
        .eye
        .unwrap_or_else(|| target + WorldVector::new(0.0, 0.3, -1.0) * scene_size);
    let up = WorldVector::y();
    let near = scene_size * 1e-3;
    let far = scene_size * 10.0;
    check_view(&eye, &target, &up, near, far, &resolution).context("Invalid camera")?;
    let camera = CameraParams::builder()
        .eye(eye)
        .target(target)
        .up(up)
        .near(near)
        .far(far)
        .resolution(resolution)
        .build();

    let buffers = SceneBuffers::aggregate(&scene)?;
    let pool = backend::init(
        &BackendConfig::builder()
            .platform(args.platform)
            .device(args.device)
            .worker_count(args.workers.map_or(WorkerCount::Auto, WorkerCount::Manual))
            .pin_workers(args.pin_workers)
            .build(),
    )?;
    let bvh = TriangleBvh::build(&buffers, pool.clone());

    let settings = RenderSettings::builder()
        .effect(effect)
        .frame_count(args.frames)
        .seed(args.seed)
        .antialiasing(!args.no_antialiasing)
        .background(args.background)
        .ray_epsilon(scene_size * 1e-5)
        .maybe_secondary_capacity(args.capacity)
        .overflow_policy(args.overflow.into())
        .build();

    let bar = ProgressBar::new(u64::from(args.frames.get()));
    bar.set_style(ProgressStyle::with_template(
        "{bar:40} {pos}/{len} frames, {msg} [{elapsed_precise}]",
    )?);
    let renderer = WavefrontRenderer::new(camera, &buffers, &lights, settings, &pool, &bvh);
    let output = renderer.render(|stats| {
        bar.set_message(format!("{} secondary rays", stats.secondary_rays));
        bar.inc(1);
    })?;
    bar.finish();

    println!("{}", output.report);

    output
        .image
        .save(&args.output)
        .with_context(|| format!("Saving {}", args.output.display()))?;

    Ok(())
}

/// Lights spread over the width of the scene, slightly above it.
fn light_row(bounds: &WorldBox, count: NonZeroU32) -> AreaLightRow {
    let size = bounds.size();
    let center = bounds.center();
    let spacing = size.x / count.get() as FloatType;

    AreaLightRow::builder()
        .count(count)
        .center(WorldPoint::new(center.x, bounds.max.y + size.y * 0.5, center.z))
        .spacing(spacing)
        .size((spacing * 0.5).max(size.norm() * 0.02))
        .build()
}
