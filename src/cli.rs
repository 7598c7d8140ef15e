use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use probesim::autotune::{self, Target, TuneParams, TuneSettings};
use probesim::config::{DatasetType, SimConfig};
use probesim::device::RotationMode;
use probesim::engine;
use probesim::metrics;
use probesim::oui::OuiRegistry;
use probesim::store::{ParameterStore, Phase};

/// Fallback calibration target used when no target JSON is supplied.
const DEFAULT_TARGET: Target = Target {
    mcr: 0.4641,
    numr: 0.0326,
    mciv: 1_322_905.0,
};

#[derive(Parser)]
#[command(name = "probesim")]
#[command(author, version, about = "802.11 probe request traffic simulator")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one simulation and emit the capture and companion logs
    Run {
        /// Dataset type (multi, single_switch, single_static)
        #[arg(long)]
        dataset_type: Option<String>,

        /// Simulation duration in minutes
        #[arg(long)]
        duration_min: Option<f64>,

        /// Initial device count (multi-device runs)
        #[arg(long)]
        devices: Option<u32>,

        /// Output base path
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// RNG seed
        #[arg(long)]
        seed: Option<u64>,

        /// Single-device vendor selection
        #[arg(long)]
        vendor: Option<String>,

        /// Single-device model selection
        #[arg(long)]
        model: Option<String>,

        /// Single-device phase (0 locked, 1 awake, 2 active)
        #[arg(long)]
        phase: Option<u8>,

        /// MAC rotation mode (per_burst, per_phase, interval)
        #[arg(long)]
        rotation: Option<String>,

        /// Sleep real time between events
        #[arg(long)]
        realtime: bool,
    },

    /// Search scenario tunables against a target metric record
    Autotune {
        /// Target metrics JSON with MCR/NUMR/MCIV
        #[arg(long)]
        target_json: Option<PathBuf>,

        /// Dataset type (multi, single_switch, single_locked, single_awake,
        /// single_active)
        #[arg(long, default_value = "single_locked")]
        dataset_type: String,

        /// Per-iteration simulation duration in minutes
        #[arg(long, default_value_t = 3)]
        duration_min: u32,

        /// Device brand to pin
        #[arg(long)]
        brand: Option<String>,

        /// Device model to pin
        #[arg(long)]
        model: Option<String>,

        /// Maximum iterations
        #[arg(long, default_value_t = 12)]
        max_iters: u32,

        /// Consecutive non-improvements before early stop
        #[arg(long, default_value_t = 4)]
        patience: u32,

        /// Wall-clock budget in seconds
        #[arg(long, default_value_t = 900)]
        walltime_sec: u64,

        /// Initial scale_between
        #[arg(long, default_value_t = 1.0)]
        init_scale: f64,

        /// Initial spread_between
        #[arg(long, default_value_t = 0.2)]
        init_spread: f64,

        /// Initial burst_gamma
        #[arg(long, default_value_t = 0.10)]
        init_gamma: f64,

        /// RNG seed for the search
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Output prefix for iteration artifacts
        #[arg(long, default_value = "calib")]
        prefix: String,

        /// Directory for iteration artifacts
        #[arg(long, default_value = "calib_runs")]
        out_dir: PathBuf,
    },

    /// Compute MCR/NUMR/MCIV/MAE over an existing capture
    Metrics {
        /// Capture file to analyze
        capture: PathBuf,

        /// Segment length in seconds
        #[arg(short, long, default_value_t = 600.0)]
        segment: f64,
    },
}

fn load_config(cli_config: &Option<PathBuf>) -> Result<SimConfig> {
    match cli_config {
        Some(path) => SimConfig::load(path),
        None => Ok(SimConfig::default()),
    }
}

fn load_resources(config: &SimConfig) -> Result<(ParameterStore, OuiRegistry)> {
    let store = ParameterStore::load(&config.hardware_path, &config.behavior_path)
        .context("loading device parameter store")?;
    let oui = OuiRegistry::load(&config.oui_path).context("loading OUI database")?;
    Ok((store, oui))
}

fn parse_dataset_type(name: &str) -> Result<DatasetType> {
    match name {
        "multi" => Ok(DatasetType::Multi),
        "single_switch" => Ok(DatasetType::SingleSwitch),
        "single_static" => Ok(DatasetType::SingleStatic),
        other => bail!("unknown dataset type '{other}' (multi, single_switch, single_static)"),
    }
}

fn parse_rotation(name: &str) -> Result<RotationMode> {
    match name {
        "per_burst" => Ok(RotationMode::PerBurst),
        "per_phase" => Ok(RotationMode::PerPhase),
        "interval" => Ok(RotationMode::Interval),
        other => bail!("unknown rotation mode '{other}' (per_burst, per_phase, interval)"),
    }
}

pub fn run_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run {
            dataset_type,
            duration_min,
            devices,
            out,
            seed,
            vendor,
            model,
            phase,
            rotation,
            realtime,
        } => {
            let mut config = load_config(&cli.config)?;
            if let Some(name) = dataset_type {
                config.dataset_type = parse_dataset_type(&name)?;
            }
            if let Some(minutes) = duration_min {
                config.duration_secs = minutes * 60.0;
            }
            if let Some(devices) = devices {
                config.device_count = devices;
            }
            if let Some(out) = out {
                config.out_base = out;
            }
            if let Some(seed) = seed {
                config.seed = seed;
            }
            if vendor.is_some() {
                config.scenario.single_vendor = vendor;
            }
            if model.is_some() {
                config.scenario.single_model = model;
            }
            if let Some(phase) = phase {
                config.scenario.single_phase =
                    Some(Phase::from_index(phase).map_err(|e| anyhow::anyhow!("{e}"))?);
            }
            if let Some(rotation) = rotation {
                config.scenario.mac_rotation_mode = parse_rotation(&rotation)?;
            }
            config.realtime = realtime;

            let (store, oui) = load_resources(&config)?;
            let summary = engine::run(&config, &store, &oui).context("simulation failed")?;
            println!("{}", serde_json::to_string_pretty(&summary.stats)?);
            Ok(())
        }

        Commands::Autotune {
            target_json,
            dataset_type,
            duration_min,
            brand,
            model,
            max_iters,
            patience,
            walltime_sec,
            init_scale,
            init_spread,
            init_gamma,
            seed,
            prefix,
            out_dir,
        } => {
            let base_config = load_config(&cli.config)?;
            let (store, oui) = load_resources(&base_config)?;
            let target = autotune::load_target(target_json.as_deref(), DEFAULT_TARGET);
            let settings = TuneSettings {
                target,
                dataset_type,
                duration_secs: duration_min as f64 * 60.0,
                brand,
                model,
                max_iters,
                patience,
                walltime_secs: walltime_sec as f64,
                out_dir,
                prefix,
                initial: TuneParams {
                    scale_between: init_scale,
                    spread_between: init_spread,
                    burst_gamma: init_gamma,
                }
                .clamped(),
                seed,
            };
            let outcome = autotune::autotune(&settings, &base_config, &store, &oui)
                .context("autotune failed")?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }

        Commands::Metrics { capture, segment } => {
            let result =
                metrics::from_capture(&capture, segment).context("reading capture")?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
    }
}
