//! PF SIM: A closed-loop simulation tool for the landmark particle filter.
//!
//! A vehicle drives a constant turn rate and velocity trajectory through a randomly generated
//! landmark field. At each step the filter is driven with the (optionally noisy) control input and
//! the landmark detections within sensor range, and its estimate is compared to ground truth.
//!
//! You can run simulations either by:
//!   1. Loading all parameters from a configuration file (TOML/JSON/YAML)
//!   2. Specifying parameters via command-line flags (these override a loaded configuration)

mod common;

use clap::{Args, Parser, Subcommand};
use common::{ensure_parent_dir, init_logger, validate_config_path};
use landmark_pf::particle::{ParticleAveragingStrategy, ParticleResamplingStrategy};
use landmark_pf::sim::{NavigationResult, SimulationConfig, run_simulation, summarize};
use log::{error, info};
use std::error::Error;
use std::path::PathBuf;

const LONG_ABOUT: &str = "PF SIM: A closed-loop simulation tool for the landmark particle filter.

A vehicle drives a constant turn rate and velocity trajectory through a randomly generated
landmark field. The filter is initialized from a noisy GPS fix and then cycled with the control
input and landmark detections at every step.

You can run simulations either by:
  1. Loading all parameters from a configuration file (TOML/JSON/YAML)
  2. Specifying parameters via command-line flags (these override a loaded configuration)";

/// Command line arguments
#[derive(Parser)]
#[command(author, version, about = "A closed-loop simulation tool for the landmark particle filter.", long_about = LONG_ABOUT)]
struct Cli {
    /// Load simulation parameters from a configuration file (TOML/JSON/YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log file path (if not specified, logs to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

/// Top-level commands
#[derive(Subcommand, Clone)]
enum Command {
    #[command(
        name = "run",
        about = "Run a closed-loop particle filter simulation",
        long_about = "Run a closed-loop particle filter simulation. Parameters come from --config when given, otherwise from the built-in defaults, and any flag passed here overrides them."
    )]
    Run(RunArgs),

    #[command(name = "config", about = "Generate a template configuration file")]
    CreateConfig(CreateConfigArgs),
}

#[derive(Args, Clone, Debug, Default)]
struct RunArgs {
    /// Output CSV file for per-step results
    #[arg(short, long, value_parser)]
    output: Option<PathBuf>,

    /// Number of particles
    #[arg(long)]
    particles: Option<usize>,

    /// Random seed for the filter
    #[arg(long)]
    seed: Option<u64>,

    /// Number of filter steps
    #[arg(long)]
    steps: Option<usize>,

    /// Time step (s)
    #[arg(long)]
    dt: Option<f64>,

    /// Commanded velocity (m/s)
    #[arg(long)]
    velocity: Option<f64>,

    /// Commanded yaw rate (rad/s)
    #[arg(long, allow_hyphen_values = true)]
    yaw_rate: Option<f64>,

    /// Sensor range (m)
    #[arg(long)]
    sensor_range: Option<f64>,

    /// Number of landmarks in the generated map
    #[arg(long)]
    landmarks: Option<usize>,

    /// Resampling strategy
    #[arg(long, value_enum)]
    resampling: Option<ParticleResamplingStrategy>,

    /// Strategy used to compute the reported estimate
    #[arg(long, value_enum)]
    averaging: Option<ParticleAveragingStrategy>,
}

impl RunArgs {
    fn apply(&self, config: &mut SimulationConfig) {
        if let Some(n) = self.particles {
            config.num_particles = n;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(steps) = self.steps {
            config.steps = steps;
        }
        if let Some(dt) = self.dt {
            config.dt = dt;
        }
        if let Some(v) = self.velocity {
            config.velocity = v;
        }
        if let Some(w) = self.yaw_rate {
            config.yaw_rate = w;
        }
        if let Some(range) = self.sensor_range {
            config.sensor_range = range;
        }
        if let Some(n) = self.landmarks {
            config.num_landmarks = n;
        }
        if let Some(strategy) = self.resampling {
            config.resampling_strategy = strategy;
        }
        if let Some(strategy) = self.averaging {
            config.averaging_strategy = strategy;
        }
    }
}

#[derive(Args, Clone, Debug)]
struct CreateConfigArgs {
    /// Output path for the template (.toml, .json, .yaml or .yml)
    #[arg(value_parser)]
    output: PathBuf,
}

fn load_config(path: Option<&PathBuf>) -> Result<SimulationConfig, Box<dyn Error>> {
    match path {
        Some(path) => {
            validate_config_path(path)?;
            info!("Loading configuration from {}", path.display());
            Ok(SimulationConfig::from_file(path)?)
        }
        None => Ok(SimulationConfig::default()),
    }
}

fn run(config_path: Option<&PathBuf>, args: &RunArgs) -> Result<(), Box<dyn Error>> {
    let mut config = load_config(config_path)?;
    args.apply(&mut config);
    config.validate()?;

    let results = run_simulation(&config);
    let summary = summarize(&results);
    println!(
        "Mean error: x {:.3} m, y {:.3} m, yaw {:.4} rad",
        summary.mean_error.x, summary.mean_error.y, summary.mean_error.yaw
    );
    println!(
        "Max error:  x {:.3} m, y {:.3} m, yaw {:.4} rad",
        summary.max_error.x, summary.max_error.y, summary.max_error.yaw
    );

    if let Some(output) = &args.output {
        ensure_parent_dir(output)?;
        NavigationResult::to_csv(&results, output)?;
        info!("Results written to {}", output.display());
    }
    Ok(())
}

fn create_config_file(args: &CreateConfigArgs) -> Result<(), Box<dyn Error>> {
    ensure_parent_dir(&args.output)?;
    SimulationConfig::default().to_file(&args.output)?;
    println!("Configuration template written to {}", args.output.display());
    println!("\nYou can now run the simulation with:");
    println!("  pf-sim --config {} run", args.output.display());
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logger(&cli.log_level, cli.log_file.as_ref())?;

    let result = match &cli.command {
        Some(Command::Run(args)) => run(cli.config.as_ref(), args),
        Some(Command::CreateConfig(args)) => create_config_file(args),
        None if cli.config.is_some() => run(cli.config.as_ref(), &RunArgs::default()),
        None => {
            eprintln!("Error: No command provided. Use -h or --help for usage information.");
            std::process::exit(1);
        }
    };
    if let Err(e) = &result {
        error!("{}", e);
    }
    result
}
