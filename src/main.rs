//! CLI Entry Point for sweep-daq
//!
//! Provides command-line interface for:
//! - Running an interactive measurement session against the simulated stack
//! - Printing the effective configuration
//! - Inspecting a saved run
//!
//! # Usage
//!
//! Interactive session (Enter repeats, `s` saves, `q` quits):
//! ```bash
//! sweep-daq run --config config/measurement.toml
//! ```
//!
//! Unattended: save three cycles, then quit:
//! ```bash
//! sweep-daq run --experiment odmr --steps 51 --averages 10 --cycles 3
//! ```
//!
//! Show the configuration a run would use:
//! ```bash
//! SWEEP_DAQ_RUN__AVERAGES=50 sweep-daq config --config config/measurement.toml
//! ```
//!
//! Inspect a saved run:
//! ```bash
//! sweep-daq inspect data/odmr_2024-03-09-12-05-07.yaml
//! ```

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use sweep_daq::config::{RunParameters, Settings};
use sweep_daq::hardware::mock::{
    MockDynamicDevices, MockSensor, MockStaticDevices, MockSynchroniser,
};
use sweep_daq::hardware::{
    DynamicDeviceSet, DynamicDevices, Instruments, NoStaticDevices, StaticDevices,
};
use sweep_daq::logging;
use sweep_daq::presentation::{ChannelTraces, DerivedQuantities, StepMeans};
use sweep_daq::session::{
    ChannelOperator, MeasurementSession, OperatorInput, OperatorIntent, SessionStatus,
    StdinOperator,
};
use sweep_daq::storage::FileStore;

/// Upper bound for `--cycles`.
const MAX_CYCLES: u64 = 10_000;

/// Used when no `--config` is given.
const DEFAULT_CONFIG: &str = r#"
[run]
experiment_type = "demo"
dynamic_steps = 21
averages = 5
sleep = "1ms"

[run.sensor]
channels = 2
samples = 32

[run.dynamic_devices.mw_source]
start = 2.80e9
stop = 2.95e9
"#;

#[derive(Parser)]
#[command(name = "sweep-daq")]
#[command(about = "Swept measurement acquisition with operator repeat/save/quit", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a measurement session on the simulated instrument stack
    Run {
        /// Configuration file (TOML); `SWEEP_DAQ_*` variables override it
        #[arg(long)]
        config: Option<PathBuf>,

        /// Experiment identifier
        #[arg(long)]
        experiment: Option<String>,

        /// Acquisitions per sweep step
        #[arg(long)]
        averages: Option<usize>,

        /// Number of sweep steps
        #[arg(long)]
        steps: Option<usize>,

        /// Directory for saved runs
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Run unattended: save this many cycles, then quit
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..=MAX_CYCLES))]
        cycles: Option<u64>,

        /// What to summarise after every sweep
        #[arg(long, value_enum, default_value_t = Plot::Traces)]
        plot: Plot,
    },

    /// Print the effective configuration (file plus environment overrides)
    Config {
        /// Configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print the record and buffer summary of a saved run
    Inspect {
        /// Metadata file (`.yaml`) of the run
        metadata: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Plot {
    /// One trace per channel
    Traces,
    /// Mean per sweep step
    Means,
}

struct RunArgs {
    config: Option<PathBuf>,
    experiment: Option<String>,
    averages: Option<usize>,
    steps: Option<usize>,
    output_dir: Option<PathBuf>,
    cycles: Option<u64>,
    plot: Plot,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            experiment,
            averages,
            steps,
            output_dir,
            cycles,
            plot,
        } => {
            let args = RunArgs {
                config,
                experiment,
                averages,
                steps,
                output_dir,
                cycles,
                plot,
            };
            let status = run_session(args).await?;
            Ok(if status == SessionStatus::Failed {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
        Commands::Config { config } => {
            let settings = match config {
                Some(path) => Settings::load_from(path)?,
                None => Settings::from_toml_str(DEFAULT_CONFIG)?,
            };
            print!("{}", settings.to_toml_string()?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Inspect { metadata } => {
            inspect(&metadata)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_settings(args: &RunArgs) -> Result<Settings> {
    let mut settings = match &args.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::from_toml_str(DEFAULT_CONFIG)?,
    };
    if let Some(experiment) = &args.experiment {
        settings.run.experiment_type = experiment.clone();
    }
    if let Some(averages) = args.averages {
        settings.run.averages = averages;
    }
    if let Some(steps) = args.steps {
        settings.run.dynamic_steps = steps;
    }
    if let Some(dir) = &args.output_dir {
        settings.storage.output_dir = dir.clone();
    }
    settings.validate()?;
    Ok(settings)
}

fn simulated_instruments(run: &RunParameters) -> Result<Instruments> {
    let dynamic_devices: Arc<dyn DynamicDevices> = if run.dynamic_devices.is_empty() {
        let last = run.dynamic_steps.saturating_sub(1) as f64;
        Arc::new(MockDynamicDevices::linear("step", 0.0, last, run.dynamic_steps))
    } else {
        Arc::new(DynamicDeviceSet::new(
            run.dynamic_devices
                .iter()
                .map(|(name, block)| {
                    Arc::new(MockDynamicDevices::from_config(name, block, run.dynamic_steps))
                        as Arc<dyn DynamicDevices>
                })
                .collect(),
        ))
    };

    let static_devices: Arc<dyn StaticDevices> = if run.static_devices.is_empty() {
        Arc::new(NoStaticDevices)
    } else {
        Arc::new(MockStaticDevices::new(run.static_devices.keys().cloned()))
    };

    Ok(Instruments {
        static_devices,
        dynamic_devices,
        sensor: Arc::new(MockSensor::from_config(&run.sensor)?),
        synchroniser: Arc::new(MockSynchroniser::new()),
    })
}

async fn run_session(args: RunArgs) -> Result<SessionStatus> {
    let settings = load_settings(&args)?;
    logging::init_from_config(&settings.logging).map_err(|e| anyhow!(e))?;

    let instruments = simulated_instruments(&settings.run)?;
    let operator: Arc<dyn OperatorInput> = match args.cycles {
        Some(cycles) => {
            let mut script = vec![OperatorIntent::SaveAndContinue; (cycles - 1) as usize];
            script.push(OperatorIntent::SaveAndQuit);
            Arc::new(ChannelOperator::scripted(script))
        }
        None => Arc::new(StdinOperator::new()),
    };
    let strategy: Arc<dyn DerivedQuantities> = match args.plot {
        Plot::Traces => Arc::new(ChannelTraces),
        Plot::Means => Arc::new(StepMeans),
    };

    let session = MeasurementSession::builder(settings.run.clone(), instruments)
        .store(Arc::new(FileStore::from_config(&settings.storage)))
        .operator(operator)
        .strategy(strategy)
        .build()?;
    let report = session.run().await;

    println!();
    println!("Session {}: {}", report.session_id, report.status);
    println!("  cycles completed: {}", report.cycles_completed);
    for path in &report.saved_runs {
        println!("  saved: {}", path.display());
    }
    if let Some(error) = &report.error {
        println!("  error: {error}");
    }
    Ok(report.status)
}

fn inspect(metadata_path: &Path) -> Result<()> {
    let metadata = FileStore::load_metadata(metadata_path)?;
    let record = &metadata.record;

    println!("Run:          {}", record.run_name);
    println!("Experiment:   {}", metadata.params.experiment_type);
    println!("Cycle:        {}", record.cycle);
    println!("Timestamp:    {}", record.timestamp.to_rfc3339());
    println!("Status:       {}", record.status);
    if let Some(version) = &record.tool_version {
        println!("Tool version: {version}");
    }
    println!(
        "Sweep:        {} steps x {} averages",
        metadata.params.dynamic_steps, metadata.params.averages
    );

    let Some(buffer_path) = FileStore::buffer_path_for(metadata_path) else {
        println!("Buffer:       not found next to metadata");
        return Ok(());
    };
    let snapshot = FileStore::load_buffer(&buffer_path)?;
    println!("Buffer:       {}", buffer_path.display());
    println!("  axes:  {}", snapshot.axes.join(", "));
    println!("  shape: {:?}", snapshot.shape);
    if !snapshot.values.is_empty() {
        let min = snapshot.values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = snapshot
            .values
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        let mean = snapshot.values.iter().sum::<f64>() / snapshot.values.len() as f64;
        println!("  min {min:.6}  max {max:.6}  mean {mean:.6}");
    }
    Ok(())
}
