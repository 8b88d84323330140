use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{LevelFilter, info, warn};
use std::path::{Path, PathBuf};

use pdr::PdrConfig;
use pdr::align::SensorAligner;
use pdr::dataset::write_trajectory_csv;
use pdr::evaluate::evaluate;
use pdr::logging::init_logger;
use pdr::pdr::{PdrOrchestrator, to_geodetic};
use pdr::{TrajectoryPoint, earth::LocalFrame};

const LONG_ABOUT: &str = "PDR: pedestrian dead reckoning from phone inertial and magnetic sensors.

The program reads a recording directory with one CSV file per sensor (Accelerometer.csv, Gyroscope.csv, Magnetometer.csv, and optionally Linear Accelerometer.csv and Location.csv), detects footfalls, predicts each step's length, and walks it along the magnetic heading.

* train: fits the step-length model on a recording with ground truth (Location.csv) and writes it to the model_path of the configuration.
* predict: loads the step-length model and reconstructs the trajectory of a recording. When ground truth is present the heading and distance errors are reported.

The configuration file may be JSON, YAML, or TOML; missing fields take their defaults.";

/// Command line arguments
#[derive(Parser)]
#[command(author, version, about, long_about = LONG_ABOUT)]
struct Cli {
    #[command(subcommand)]
    command: Command,
    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: LevelFilter,
    /// Append log output to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Train the step-length model on a recording with ground truth
    Train(RunArgs),
    /// Reconstruct the trajectory of a recording with a trained model
    Predict(RunArgs),
}

#[derive(Args, Clone, Debug)]
struct RunArgs {
    /// Recording directory
    #[arg(short, long)]
    data: PathBuf,
    /// Configuration file (json|yaml|yml|toml)
    #[arg(short, long)]
    config: PathBuf,
    /// Output CSV file for the trajectory
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn load_inputs(args: &RunArgs) -> Result<(PdrConfig, SensorAligner)> {
    if !args.data.is_dir() {
        anyhow::bail!("recording directory {} does not exist", args.data.display());
    }
    let config = PdrConfig::from_file(&args.config)
        .with_context(|| format!("reading configuration {}", args.config.display()))?;
    let aligner = SensorAligner::from_directory(&args.data, &config)
        .with_context(|| format!("loading recording {}", args.data.display()))?;
    Ok((config, aligner))
}

fn report(
    aligner: &SensorAligner,
    trajectory: &[TrajectoryPoint],
    config: &PdrConfig,
    output: Option<&Path>,
) -> Result<()> {
    // without ground truth the walk is anchored at an arbitrary origin
    let frame = aligner.frame().unwrap_or(LocalFrame::new(0.0, 0.0));
    if let Some(path) = output {
        write_trajectory_csv(trajectory, &frame, path)
            .with_context(|| format!("writing trajectory {}", path.display()))?;
        info!("Trajectory written to {}", path.display());
    }
    let geodetic = to_geodetic(trajectory, &frame);
    let evaluation = evaluate(
        &geodetic,
        aligner.ground_truth().ok(),
        config.heading_ratio_threshold,
    );
    if evaluation.samples > 0 {
        println!("{evaluation}");
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logger(cli.log_level, cli.log_file.as_deref()).context("setting up logging")?;

    match cli.command {
        Command::Train(args) => {
            let (config, aligner) = load_inputs(&args)?;
            if config.model_path.is_none() {
                warn!("No model_path configured; the trained model will not be saved");
            }
            let (orchestrator, trajectory) = PdrOrchestrator::train(config, &aligner)
                .context("training the step model")?;
            if let Some(model) = orchestrator.model() {
                println!("Trained {} model: {:?}", model.kind(), model.length);
            }
            report(&aligner, &trajectory, orchestrator.config(), args.output.as_deref())?;
        }
        Command::Predict(args) => {
            let (config, aligner) = load_inputs(&args)?;
            let mut orchestrator =
                PdrOrchestrator::load(config).context("loading the step model")?;
            let reference = aligner
                .ground_truth()
                .ok()
                .and_then(|fixes| fixes.first())
                .map(|fix| fix.direction);
            let trajectory = orchestrator
                .predict_all(&aligner, (0.0, 0.0), reference)
                .context("predicting the trajectory")?;
            info!("Predicted {} trajectory points", trajectory.len());
            report(&aligner, &trajectory, orchestrator.config(), args.output.as_deref())?;
        }
    }
    Ok(())
}
