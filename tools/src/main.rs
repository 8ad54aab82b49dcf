mod config;
mod headless;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use engine_core::logging;
use engine_core::{DirTextureSource, TextureManager};
use map_cook::{
    build_map_model, build_map_physics, draw_model, extract_collision_data, upload_model,
};
use map_format::{load_map_file, Map};
use physics_rapier::PhysicsWorld;
use player_controller::{PlayerController, RawInput};
use rapier3d::math::{Isometry, Vector};

use crate::config::EngineConfig;
use crate::headless::HeadlessBackend;

const EXIT_SUCCESS: i32 = 0;
const EXIT_USAGE: i32 = 2;
const EXIT_MAP_OPEN: i32 = 10;
const EXIT_MAP_EMPTY: i32 = 11;
const EXIT_COOK: i32 = 12;

const TICK_RATE: f32 = 60.0;
/// Map units per Rapier length unit.
const LENGTH_UNIT: f32 = 32.0;

#[derive(Parser)]
#[command(name = "tools", version, about = "Brush map tools CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a map and print what it contains.
    Inspect(MapArgs),
    /// Build render batches and collision bodies headless.
    Cook(MapArgs),
    /// Cook, spawn the player, and run the movement loop headless.
    Simulate(SimulateArgs),
}

#[derive(Parser)]
struct MapArgs {
    #[arg(long, value_name = "PATH")]
    map: Option<PathBuf>,

    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[derive(Parser)]
struct SimulateArgs {
    #[command(flatten)]
    map: MapArgs,

    #[arg(long, default_value_t = 120)]
    ticks: u32,

    #[arg(long)]
    forward: bool,

    #[arg(long)]
    jump: bool,
}

fn main() {
    let cli = Cli::parse();
    let exit_code = match cli.command {
        Commands::Inspect(args) => run_inspect(args),
        Commands::Cook(args) => run_cook(args),
        Commands::Simulate(args) => run_simulate(args),
    };
    std::process::exit(exit_code);
}

fn load_config(args: &MapArgs) -> Result<EngineConfig, i32> {
    let config = match &args.config {
        Some(path) => EngineConfig::load(path).map_err(|err| {
            eprintln!("config load failed: {}", err);
            EXIT_USAGE
        })?,
        None => EngineConfig::default(),
    };
    let validation = config.validate();
    for warning in &validation.warnings {
        logging::warn(format!("config: {}", warning));
    }
    if !validation.is_ok() {
        for error in &validation.errors {
            eprintln!("config error: {}", error);
        }
        return Err(EXIT_USAGE);
    }
    if let Some(level) = config.log_level() {
        logging::set_max_level(level);
    }
    Ok(config)
}

fn load_map(args: &MapArgs, config: &EngineConfig) -> Result<Map, i32> {
    let path = match args.map.as_ref().or(config.map.path.as_ref()) {
        Some(path) => path,
        None => {
            eprintln!("--map is required (or set map.path in the config)");
            return Err(EXIT_USAGE);
        }
    };
    let parsed = load_map_file(path).map_err(|err| {
        eprintln!("{}", err);
        EXIT_MAP_OPEN
    })?;
    for warning in &parsed.report.warnings {
        logging::warn(format!("{}: {}", path.display(), warning));
    }
    if parsed.map.is_empty() {
        eprintln!("map has no entities: {}", path.display());
        return Err(EXIT_MAP_EMPTY);
    }
    logging::info(format!(
        "loaded {}: {} entities, {} brushes, {} faces ({} skipped)",
        path.display(),
        parsed.report.entities,
        parsed.report.brushes,
        parsed.report.faces,
        parsed.report.skipped_faces
    ));
    Ok(parsed.map)
}

fn run_inspect(args: MapArgs) -> i32 {
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(code) => return code,
    };
    let map = match load_map(&args, &config) {
        Ok(map) => map,
        Err(code) => return code,
    };

    println!(
        "entities: {}  brushes: {}  faces: {}",
        map.entities.len(),
        map.brush_count(),
        map.face_count()
    );
    for (index, entity) in map.entities.iter().enumerate() {
        println!(
            "{:>4} {:<24} {:>4} brushes  {}",
            index,
            entity.classname(),
            entity.brushes.len(),
            map_cook::entity_collision_type(entity)
        );
    }
    for start in map.player_starts() {
        println!(
            "player start: {:.1} {:.1} {:.1} angle {}",
            start.position[0],
            start.position[1],
            start.position[2],
            start.angle.unwrap_or(0.0)
        );
    }
    EXIT_SUCCESS
}

fn run_cook(args: MapArgs) -> i32 {
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(code) => return code,
    };
    let map = match load_map(&args, &config) {
        Ok(map) => map,
        Err(code) => return code,
    };
    let mut world = new_world(config.player_config().motor.gravity);
    match cook(&map, &config, &mut world) {
        Ok(()) => EXIT_SUCCESS,
        Err(err) => {
            eprintln!("cook failed: {}", err);
            EXIT_COOK
        }
    }
}

fn new_world(gravity: f32) -> PhysicsWorld {
    let mut world = PhysicsWorld::new(Vector::new(0.0, -gravity, 0.0));
    world.set_length_unit(LENGTH_UNIT);
    world
}

fn cook(map: &Map, config: &EngineConfig, world: &mut PhysicsWorld) -> Result<(), String> {
    let mut textures = TextureManager::new(DirTextureSource::new(
        config.map.textures_dir.clone(),
        config.map.texture_extension.clone(),
    ));
    let model = build_map_model(map, &mut textures, &config.mesh_config());
    if model.stats.brushes == 0 {
        return Err("no brush produced geometry".to_string());
    }
    let stats = model.stats;

    let mut backend = HeadlessBackend::default();
    let uploaded = upload_model(&mut backend, model)?;
    draw_model(&mut backend, &uploaded, &Isometry::identity());
    for mesh in &backend.meshes {
        println!(
            "batch {:<24} {:>6} vertices {:>6} triangles",
            mesh.texture, mesh.vertices, mesh.triangles
        );
    }
    println!(
        "model: {} brushes, {} skipped, {} hidden, {} dropped faces, {} triangles",
        stats.brushes,
        stats.skipped_brushes,
        stats.hidden_brushes,
        stats.dropped_faces,
        stats.triangles
    );

    let data = extract_collision_data(map, &config.brush_config());
    let report = build_map_physics(world, &data);
    println!(
        "physics: {} bodies, {} skipped, {} failed",
        report.created, report.skipped, report.failed
    );

    let released = textures.release_all();
    logging::debug(format!("released {} textures", released));
    Ok(())
}

fn run_simulate(args: SimulateArgs) -> i32 {
    let config = match load_config(&args.map) {
        Ok(config) => config,
        Err(code) => return code,
    };
    let map = match load_map(&args.map, &config) {
        Ok(map) => map,
        Err(code) => return code,
    };
    let player_config = config.player_config();
    let mut world = new_world(player_config.motor.gravity);
    if let Err(err) = cook(&map, &config, &mut world) {
        eprintln!("cook failed: {}", err);
        return EXIT_COOK;
    }

    let (spawn, yaw) = match map.player_starts().first() {
        Some(start) => (Vector::from(start.position), start.angle.unwrap_or(0.0)),
        None => {
            logging::warn("no info_player_start, spawning at the origin");
            (Vector::new(0.0, player_config.character.foot_offset(), 0.0), 0.0)
        }
    };
    let mut player = PlayerController::spawn(player_config, spawn, yaw);
    let raw = RawInput {
        move_y: if args.forward { 1.0 } else { 0.0 },
        jump: args.jump,
        ..RawInput::default()
    };
    let dt = 1.0 / TICK_RATE;
    let mut jumps = 0;
    let mut triggers = 0;
    for _ in 0..args.ticks {
        world.step(dt);
        let frame = player.tick(&mut world, raw, dt);
        if frame.jumped {
            jumps += 1;
        }
        triggers += frame.triggers_entered.len();
    }

    let state = player.state();
    let camera = player.camera_pose();
    println!(
        "after {} ticks: position {:.2} {:.2} {:.2}  velocity {:.2} {:.2} {:.2}",
        args.ticks,
        state.position.x,
        state.position.y,
        state.position.z,
        state.velocity.x,
        state.velocity.y,
        state.velocity.z
    );
    println!(
        "ground: {:?}  jumps: {}  triggers entered: {}",
        state.ground, jumps, triggers
    );
    println!(
        "eye: {:.2} {:.2} {:.2}  yaw {:.1} pitch {:.1}",
        camera.eye.x, camera.eye.y, camera.eye.z, camera.yaw, camera.pitch
    );
    EXIT_SUCCESS
}
