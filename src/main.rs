//! Stereo Rig Console
//!
//! Entry point for the stereo-console application.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use stereo_console::calibration::{BoardSpec, CalibrationSample, StereoCalibration};
use stereo_console::camera::{probe_backend, BackendPreference, FrameSource};
use stereo_console::config::AppConfig;
use stereo_console::export;
use stereo_console::markers::{MarkerDictionary, MarkerEngine};
use stereo_console::telemetry::{init_logging, LogConfig};
use stereo_console::{ConsoleApp, SessionController};

#[derive(Parser)]
#[command(name = "stereo-console", version, about = "Stereo camera rig console")]
struct Cli {
    /// Settings file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the console window (default)
    Run {
        /// Use animated synthetic cameras instead of real devices
        #[arg(long)]
        demo: bool,
        /// Read frames on the render thread instead of a capture thread
        #[arg(long)]
        sync: bool,
    },
    /// Write printable ArUco marker images
    Markers {
        /// First marker id
        #[arg(long, default_value_t = 0)]
        start: i32,
        /// Number of consecutive markers
        #[arg(long, default_value_t = 10)]
        count: u32,
        /// Image side length in pixels
        #[arg(long)]
        size: Option<u32>,
        /// Output directory
        #[arg(long)]
        out: Option<PathBuf>,
        /// Dictionary, e.g. 4x4_50
        #[arg(long)]
        dictionary: Option<MarkerDictionary>,
    },
    /// Calibrate offline from saved left/right chessboard images
    Calibrate {
        #[arg(long)]
        left_dir: PathBuf,
        #[arg(long)]
        right_dir: PathBuf,
        /// Calibration file to write
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Write a settings file with every default filled in
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };
    init_logging(&log_config);

    let config_path = cli.config.clone().unwrap_or_else(AppConfig::default_path);

    let command = cli.command.unwrap_or(Commands::Run {
        demo: false,
        sync: false,
    });
    match command {
        Commands::Run { demo, sync } => run(load_config(&config_path)?, demo, sync),
        Commands::Markers {
            start,
            count,
            size,
            out,
            dictionary,
        } => write_markers(&load_config(&config_path)?, start, count, size, out, dictionary),
        Commands::Calibrate {
            left_dir,
            right_dir,
            output,
        } => calibrate_offline(&load_config(&config_path)?, &left_dir, &right_dir, output),
        Commands::InitConfig { force } => init_config(&config_path, force),
    }
}

fn load_config(path: &Path) -> Result<AppConfig> {
    AppConfig::load_or_default(path).with_context(|| format!("reading {}", path.display()))
}

fn run(mut config: AppConfig, demo: bool, sync: bool) -> Result<()> {
    if demo {
        config.camera.backend = BackendPreference::Synthetic;
    }
    if sync {
        config.camera.synchronous = true;
    }

    log::info!("Stereo console starting...");
    config
        .ensure_directories()
        .context("creating output directories")?;

    let backend = probe_backend(&config.camera);
    let source = FrameSource::from_config(&config.camera, backend);
    let mut session = SessionController::new(&config, source)?;
    session.start()?;

    ConsoleApp::new(config.display.clone(), session).run()?;
    log::info!("Stereo console exiting");
    Ok(())
}

fn write_markers(
    config: &AppConfig,
    start: i32,
    count: u32,
    size: Option<u32>,
    out: Option<PathBuf>,
    dictionary: Option<MarkerDictionary>,
) -> Result<()> {
    let engine = MarkerEngine::new(dictionary.unwrap_or(config.markers.dictionary))?;
    let dir = out.unwrap_or_else(|| config.paths.markers_dir.clone());
    let paths = engine.export_marker_set(
        start,
        count,
        size.unwrap_or(config.markers.marker_size_px),
        &dir,
    )?;
    println!("Wrote {} markers to {}", paths.len(), dir.display());
    Ok(())
}

fn calibrate_offline(
    config: &AppConfig,
    left_dir: &Path,
    right_dir: &Path,
    output: Option<PathBuf>,
) -> Result<()> {
    let left = export::list_images(left_dir)
        .with_context(|| format!("listing {}", left_dir.display()))?;
    let right = export::list_images(right_dir)
        .with_context(|| format!("listing {}", right_dir.display()))?;
    if left.len() != right.len() {
        log::warn!(
            "Image counts differ (left {}, right {}), pairing by sorted name",
            left.len(),
            right.len()
        );
    }

    let mut samples = Vec::new();
    for (left_path, right_path) in left.iter().zip(right.iter()) {
        let left = export::load_image(left_path)
            .with_context(|| format!("loading {}", left_path.display()))?;
        let right = export::load_image(right_path)
            .with_context(|| format!("loading {}", right_path.display()))?;
        samples.push(CalibrationSample::new(left, right));
    }
    if samples.is_empty() {
        bail!("no image pairs found");
    }

    let board = BoardSpec::from_config(&config.calibration);
    let mut engine = StereoCalibration::new(config.calibration.rectify_alpha);
    engine.calibrate(&samples, &board)?;

    let output = output.unwrap_or_else(|| config.paths.calibration_file.clone());
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    engine.save(&output)?;

    if let Some(state) = engine.state() {
        println!(
            "Calibrated from {} pairs: RMS {:.4} px, baseline {:.1} mm",
            samples.len(),
            state.rms_error,
            state.baseline()?
        );
    }
    println!("Saved {}", output.display());
    Ok(())
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    AppConfig::default().save(path)?;
    println!("Wrote {}", path.display());
    Ok(())
}
