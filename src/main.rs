//! CLI Entry Point for hemoscope
//!
//! Runs one processing pipeline per invocation against a TOML configuration:
//! - `map`: stitch the tiles of the map input folder and save the layers
//! - `detect`: stitch, detect capillary apexes and save the marked layers
//! - `describe`: stitch, detect and describe capillaries, then pick the best layer
//! - `depth`: estimate Z from the wide frames of the lock input folder
//! - `sequence`: export and analyse the wide/line frame pairs
//! - `value-at`: print the map gray level at a stage position
//!
//! # Usage
//!
//! ```bash
//! hemoscope --config config/hemoscope.toml describe --input data/17 --output out/17
//! hemoscope --set HemoScope.General.PixelsInMm=2600 depth --method Spectrum
//! ```
//!
//! Ctrl-C cancels the running operation at its next tile, layer or frame.

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use hemoscope::config::{keys, Configuration, OverrideValue};
use hemoscope::depth::FocusingMethod;
use hemoscope::{logging, Engine};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "hemoscope")]
#[command(about = "Capillary map stitching, detection and depth estimation", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = "config/hemoscope.toml")]
    config: PathBuf,

    /// Override a setting for this run, e.g. HemoScope.Procedures.Detection.GradientThreshold=70
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_override)]
    overrides: Vec<(String, OverrideValue)>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct Folders {
    /// Input folder (overrides the configured one)
    #[arg(long)]
    input: Option<PathBuf>,

    /// Output folder (overrides the configured one)
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Subcommand, Clone)]
enum Commands {
    /// Stitch the map and save its layers
    Map {
        #[command(flatten)]
        folders: Folders,
    },

    /// Stitch the map and detect capillary apexes
    Detect {
        #[command(flatten)]
        folders: Folders,
    },

    /// Stitch, detect and describe capillaries
    Describe {
        #[command(flatten)]
        folders: Folders,
    },

    /// Estimate Z positions from the wide frames
    Depth {
        #[command(flatten)]
        folders: Folders,

        /// Focusing method: Mode, Variance or Spectrum
        #[arg(long)]
        method: Option<FocusingMethod>,

        /// Also fit on even frames and evaluate on odd ones
        #[arg(long)]
        half_split: bool,
    },

    /// Export and analyse wide/line frame pairs
    Sequence {
        #[command(flatten)]
        folders: Folders,
    },

    /// Print the map gray level at a stage position (mm)
    ValueAt {
        #[command(flatten)]
        folders: Folders,

        x: f32,
        y: f32,
        z: f32,

        /// Interpolate between pixels and layers
        #[arg(long)]
        interpolate: bool,
    },
}

fn parse_override(raw: &str) -> Result<(String, OverrideValue), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    if key.trim().is_empty() {
        return Err("override key is empty".to_string());
    }
    Ok((key.trim().to_string(), OverrideValue::parse(value.trim())))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let configuration = Configuration::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    let mut engine = Engine::new();
    for (key, value) in cli.overrides {
        engine.override_value(&key, value);
    }

    // Install the subscriber before the engine logs anything
    let settings = configuration
        .resolve(engine.overrides())?
        .reading(&["logging"])?;
    logging::init_from_settings(&settings.logging).map_err(|e| anyhow!(e))?;
    info!(config = %cli.config.display(), "hemoscope starting");
    engine.use_configuration(configuration);

    let cancel = engine.cancel_flag();
    let command = cli.command;
    let mut task = tokio::task::spawn_blocking(move || run(&mut engine, command));

    let outcome = tokio::select! {
        joined = &mut task => joined,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupt received, cancelling");
            cancel.trigger("interrupted by user");
            task.await
        }
    };
    outcome.context("Processing task failed")?
}

fn run(engine: &mut Engine, command: Commands) -> Result<()> {
    match command {
        Commands::Map { folders } => {
            apply_folders(engine, &folders, keys::INPUT_MAP_FOLDER, keys::OUTPUT_MAP_FOLDER);
            build(engine)?;
            let saved = engine.save_stitched()?;
            println!("Stitched layers saved to {}", saved.display());
        }
        Commands::Detect { folders } => {
            apply_folders(engine, &folders, keys::INPUT_MAP_FOLDER, keys::OUTPUT_MAP_FOLDER);
            build(engine)?;
            detect(engine)?;
            engine.save_stitched()?;
        }
        Commands::Describe { folders } => {
            apply_folders(engine, &folders, keys::INPUT_MAP_FOLDER, keys::OUTPUT_MAP_FOLDER);
            build(engine)?;
            detect(engine)?;
            engine.save_stitched()?;
            let outcome = engine.describe_capillaries()?;
            for layer in outcome.layers.iter().filter(|l| !l.capillaries.is_empty()) {
                println!(
                    "Layer {:>3}: {} capillaries, sum score {:.1}",
                    layer.layer_index + 1,
                    layer.capillaries.len(),
                    layer.sum_score
                );
            }
            match outcome.best_layer {
                Some(index) => println!("Best layer: {}", index + 1),
                None => println!("Best layer: none"),
            }
        }
        Commands::Depth {
            folders,
            method,
            half_split,
        } => {
            apply_folders(engine, &folders, keys::INPUT_LOCK_FOLDER, keys::OUTPUT_LOCK_FOLDER);
            if let Some(method) = method {
                engine.override_string(keys::FOCUSING_METHOD, &method.to_string());
            }
            if half_split {
                engine.override_value(keys::FOCUSING_HALF_SPLIT, OverrideValue::Bool(true));
            }
            let stack = engine.load_positions_z()?;
            println!("Loaded {} frames", stack.len());
            let report = engine.calculate_depth()?;
            println!(
                "{}: z = {:.6} * marker + {:.6}",
                report.method, report.regression.slope, report.regression.offset
            );
            println!("Index,Marker,Z given,Z calculated");
            for frame in &report.frames {
                println!(
                    "{},{},{},{}",
                    frame.index, frame.marker, frame.given, frame.calculated
                );
            }
            if let Some(z) = report.peak_z() {
                println!("Peak marker at frame {} (z = {})", report.peak_frame, z);
            }
        }
        Commands::Sequence { folders } => {
            apply_folders(engine, &folders, keys::INPUT_LOCK_FOLDER, keys::OUTPUT_LOCK_FOLDER);
            let sequence = engine.build_sequence()?;
            println!("Loaded {} projections", sequence.len());
            engine.save_projections()?;
            let profiles = engine.analyze_lines()?;
            println!("Analysed {} line frames", profiles.len());
        }
        Commands::ValueAt {
            folders,
            x,
            y,
            z,
            interpolate,
        } => {
            apply_folders(engine, &folders, keys::INPUT_MAP_FOLDER, keys::OUTPUT_MAP_FOLDER);
            build(engine)?;
            if interpolate {
                match engine.interpolated_value_at(x, y, z)? {
                    Some(value) => println!("{value:.2}"),
                    None => println!("outside the map"),
                }
            } else {
                match engine.value_at(x, y, z)? {
                    Some(value) => println!("{value}"),
                    None => println!("outside the map"),
                }
            }
        }
    }
    Ok(())
}

fn apply_folders(engine: &mut Engine, folders: &Folders, input_key: &str, output_key: &str) {
    if let Some(input) = &folders.input {
        engine.override_string(input_key, &input.to_string_lossy());
    }
    if let Some(output) = &folders.output {
        engine.override_string(output_key, &output.to_string_lossy());
    }
}

fn build(engine: &mut Engine) -> Result<()> {
    engine.init_general_data()?;
    let map = engine.build_map()?;
    println!(
        "Map: {} layers of {}x{} pixels",
        map.layers().len(),
        map.cols(),
        map.rows()
    );
    Ok(())
}

fn detect(engine: &mut Engine) -> Result<()> {
    let layers = engine.detect_capillaries()?;
    let apexes: usize = layers.iter().map(|l| l.apexes.len()).sum();
    println!("Detected {} apexes in {} layers", apexes, layers.len());
    match engine.best_detected_layer()? {
        Some(index) => println!("Best detected layer: {}", index + 1),
        None => println!("No layer has enough apexes"),
    }
    Ok(())
}
