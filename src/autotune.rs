//! Auto-tuning calibration loop.
//!
//! Treats the simulator as a black box: runs short simulations, extracts
//! MCR/NUMR/MCIV from the outputs, scores weighted relative error against a
//! target, and searches a small bounded parameter space by jittering around
//! the current best point. Metric acquisition is a chain of typed attempts
//! that never raises: stats JSON, then log regex, then the raw probe-id
//! mapping, then zeros.

use std::path::{Path, PathBuf};
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{DatasetType, SimConfig};
use crate::engine;
use crate::error::{Result, SimError};
use crate::metrics::Metrics;
use crate::output::{RunPaths, RunStats};
use crate::oui::OuiRegistry;
use crate::store::{ParameterStore, Phase};

pub const SCALE_BETWEEN_RANGE: (f64, f64) = (0.30, 2.50);
pub const SPREAD_BETWEEN_RANGE: (f64, f64) = (0.05, 1.50);
pub const BURST_GAMMA_RANGE: (f64, f64) = (0.01, 0.60);

/// Candidate jitter window as a fraction of each parameter's range.
const STEP_SCALE: f64 = 0.25;

const W_MCR: f64 = 0.5;
const W_NUMR: f64 = 0.3;
const W_MCIV: f64 = 0.2;

const THRESH_MCR: f64 = 0.10;
const THRESH_NUMR: f64 = 0.20;
const THRESH_MCIV: f64 = 0.35;

/// Target metric record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Target {
    #[serde(rename = "MCR", alias = "mcr", alias = "mac_change_rate")]
    pub mcr: f64,
    #[serde(rename = "NUMR", alias = "numr", alias = "unique_mac_ratio")]
    pub numr: f64,
    #[serde(rename = "MCIV", alias = "mciv", alias = "mac_change_interval_var")]
    pub mciv: f64,
}

/// Parameter point under search.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TuneParams {
    pub scale_between: f64,
    pub spread_between: f64,
    pub burst_gamma: f64,
}

impl Default for TuneParams {
    fn default() -> Self {
        Self {
            scale_between: 1.0,
            spread_between: 0.2,
            burst_gamma: 0.10,
        }
    }
}

fn clamp(value: f64, range: (f64, f64)) -> f64 {
    value.clamp(range.0, range.1)
}

impl TuneParams {
    pub fn clamped(self) -> Self {
        Self {
            scale_between: clamp(self.scale_between, SCALE_BETWEEN_RANGE),
            spread_between: clamp(self.spread_between, SPREAD_BETWEEN_RANGE),
            burst_gamma: clamp(self.burst_gamma, BURST_GAMMA_RANGE),
        }
    }

    /// Uniform jitter inside a window of `STEP_SCALE` times each range,
    /// clamped to bounds.
    pub fn jittered<R: Rng>(self, rng: &mut R) -> Self {
        let jitter = |value: f64, range: (f64, f64), rng: &mut R| {
            let span = (range.1 - range.0) * STEP_SCALE;
            clamp(value + rng.gen_range(-span..span), range)
        };
        Self {
            scale_between: jitter(self.scale_between, SCALE_BETWEEN_RANGE, rng),
            spread_between: jitter(self.spread_between, SPREAD_BETWEEN_RANGE, rng),
            burst_gamma: jitter(self.burst_gamma, BURST_GAMMA_RANGE, rng),
        }
    }
}

/// Per-metric relative errors of one evaluation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TuneErrors {
    pub e_mcr: f64,
    pub e_numr: f64,
    pub e_mciv: f64,
}

impl TuneErrors {
    pub fn acceptable(&self) -> bool {
        self.e_mcr <= THRESH_MCR && self.e_numr <= THRESH_NUMR && self.e_mciv <= THRESH_MCIV
    }
}

fn relative_error(sim: f64, target: f64) -> f64 {
    (sim - target).abs() / (target.abs() + 1e-12)
}

/// Weighted relative-error score, lower is better.
pub fn score(sim: &Metrics, target: &Target) -> (f64, TuneErrors) {
    let errors = TuneErrors {
        e_mcr: relative_error(sim.mcr, target.mcr),
        e_numr: relative_error(sim.numr, target.numr),
        e_mciv: relative_error(sim.mciv, target.mciv),
    };
    let total = W_MCR * errors.e_mcr + W_NUMR * errors.e_numr + W_MCIV * errors.e_mciv;
    (total, errors)
}

/// One iteration's record in the returned history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuneIteration {
    pub iter: u32,
    pub params: TuneParams,
    pub metrics: Option<Metrics>,
    pub errors: Option<TuneErrors>,
    pub score: Option<f64>,
    pub failed: bool,
}

/// Search outcome: best point, its metrics, and the full history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuneOutcome {
    pub best_params: TuneParams,
    pub best_metrics: Option<Metrics>,
    pub best_errors: Option<TuneErrors>,
    pub best_score: f64,
    pub iters_done: u32,
    pub used_seconds: f64,
    pub history: Vec<TuneIteration>,
}

/// Auto-tune session settings.
#[derive(Debug, Clone)]
pub struct TuneSettings {
    pub target: Target,
    pub dataset_type: String,
    pub duration_secs: f64,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub max_iters: u32,
    pub patience: u32,
    pub walltime_secs: f64,
    pub out_dir: PathBuf,
    pub prefix: String,
    pub initial: TuneParams,
    pub seed: u64,
}

/// Map the CLI dataset-type vocabulary onto an engine dataset and fixed
/// phase.
pub fn resolve_dataset(name: &str) -> Result<(DatasetType, Option<Phase>)> {
    match name {
        "multi" => Ok((DatasetType::Multi, None)),
        "single_switch" => Ok((DatasetType::SingleSwitch, None)),
        "single_locked" => Ok((DatasetType::SingleStatic, Some(Phase::Locked))),
        "single_awake" => Ok((DatasetType::SingleStatic, Some(Phase::Awake))),
        "single_active" => Ok((DatasetType::SingleStatic, Some(Phase::Active))),
        other => Err(SimError::InvalidConfig(format!(
            "unknown dataset type '{other}'"
        ))),
    }
}

/// Read metrics for a finished run: stats JSON first, then the log via
/// regex, then the probe-id mapping, defaulting to zeros. Never raises.
pub fn read_run_metrics(paths: &RunPaths, duration_secs: f64) -> Metrics {
    if let Ok(text) = std::fs::read_to_string(paths.stats_json()) {
        if let Ok(stats) = serde_json::from_str::<RunStats>(&text) {
            return Metrics {
                mcr: stats.mcr,
                numr: stats.numr,
                mciv: stats.mciv,
                mae: stats.mae,
                mean_gap: stats.mean_gap,
            };
        }
    }
    if let Ok(text) = std::fs::read_to_string(paths.log()) {
        if let Some(metrics) = parse_metrics_from_log(&text) {
            return metrics;
        }
    }
    if let Ok(metrics) = crate::metrics::from_mapping(paths.probe_ids(), duration_secs) {
        return metrics;
    }
    Metrics::default()
}

/// Regex fallback over the engine's end-of-run summary line.
pub fn parse_metrics_from_log(text: &str) -> Option<Metrics> {
    let re = Regex::new(
        r"MCR=([0-9.eE+-]+)\s+NUMR=([0-9.eE+-]+)\s+MCIV=([0-9.eE+-]+)",
    )
    .expect("valid regex");
    let caps = re.captures(text)?;
    let parse = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<f64>().ok());
    Some(Metrics {
        mcr: parse(1)?,
        numr: parse(2)?,
        mciv: parse(3)?,
        mae: 0.0,
        mean_gap: 0.0,
    })
}

fn build_config(
    settings: &TuneSettings,
    base_config: &SimConfig,
    params: TuneParams,
    iter: u32,
) -> Result<SimConfig> {
    let (dataset_type, phase) = resolve_dataset(&settings.dataset_type)?;
    let mut config = base_config.clone();
    config.dataset_type = dataset_type;
    config.duration_secs = settings.duration_secs;
    config.realtime = false;
    config.out_base = settings
        .out_dir
        .join(format!("{}_iter{iter}", settings.prefix));
    config.seed = settings.seed.wrapping_add(iter as u64);
    config.device_count = if dataset_type == DatasetType::Multi {
        base_config.device_count
    } else {
        1
    };
    let scenario = &mut config.scenario;
    scenario.single_vendor = settings.brand.clone();
    scenario.single_model = settings.model.clone();
    scenario.single_phase = phase;
    scenario.allow_state_switch = dataset_type == DatasetType::SingleSwitch;
    scenario.scale_between = params.scale_between;
    scenario.spread_between = params.spread_between;
    scenario.burst_gamma = params.burst_gamma;
    Ok(config)
}

/// Run the search loop. Engine failures count toward the patience counter;
/// an `InvalidConfig` failure aborts the search since no later iteration
/// can recover from it.
pub fn autotune(
    settings: &TuneSettings,
    base_config: &SimConfig,
    store: &ParameterStore,
    oui: &OuiRegistry,
) -> Result<TuneOutcome> {
    std::fs::create_dir_all(&settings.out_dir)?;
    let mut rng = StdRng::seed_from_u64(settings.seed);
    let started = Instant::now();

    let mut best_params = settings.initial.clamped();
    let mut best_metrics: Option<Metrics> = None;
    let mut best_errors: Option<TuneErrors> = None;
    let mut best_score = f64::INFINITY;
    let mut no_improve = 0u32;
    let mut history = Vec::new();

    info!(
        target = ?settings.target,
        dataset = %settings.dataset_type,
        max_iters = settings.max_iters,
        "autotune start"
    );

    for iter in 1..=settings.max_iters {
        if started.elapsed().as_secs_f64() > settings.walltime_secs {
            info!(iter, "walltime budget exhausted, stopping");
            break;
        }

        let params = if best_metrics.is_none() {
            best_params
        } else {
            best_params.jittered(&mut rng)
        };
        let config = build_config(settings, base_config, params, iter)?;

        let run = engine::run(&config, store, oui);
        let paths = RunPaths::new(&config.out_base);
        let metrics = match run {
            Ok(_) => read_run_metrics(&paths, settings.duration_secs),
            Err(err @ SimError::InvalidConfig(_)) => return Err(err),
            Err(err) => {
                warn!(iter, error = %err, "iteration failed");
                history.push(TuneIteration {
                    iter,
                    params,
                    metrics: None,
                    errors: None,
                    score: None,
                    failed: true,
                });
                no_improve += 1;
                if no_improve >= settings.patience {
                    info!(iter, "patience exhausted after failures, stopping");
                    break;
                }
                continue;
            }
        };

        let (total, errors) = score(&metrics, &settings.target);
        info!(
            iter,
            scale = params.scale_between,
            spread = params.spread_between,
            gamma = params.burst_gamma,
            score = total,
            "iteration evaluated"
        );
        history.push(TuneIteration {
            iter,
            params,
            metrics: Some(metrics),
            errors: Some(errors),
            score: Some(total),
            failed: false,
        });

        if total < best_score - 1e-9 {
            best_params = params;
            best_metrics = Some(metrics);
            best_errors = Some(errors);
            best_score = total;
            no_improve = 0;
        } else {
            no_improve += 1;
        }

        if errors.acceptable() {
            info!(iter, "acceptance thresholds met, stopping");
            break;
        }
        if no_improve >= settings.patience {
            info!(iter, "patience exhausted, stopping");
            break;
        }
    }

    let outcome = TuneOutcome {
        best_params,
        best_metrics,
        best_errors,
        best_score,
        iters_done: history.len() as u32,
        used_seconds: started.elapsed().as_secs_f64(),
        history,
    };
    write_outcome(
        &settings.out_dir.join(format!("{}_result.json", settings.prefix)),
        &outcome,
    )?;
    Ok(outcome)
}

fn write_outcome(path: &Path, outcome: &TuneOutcome) -> Result<()> {
    let json = serde_json::to_string_pretty(outcome)
        .map_err(|e| SimError::InvalidConfig(format!("outcome serialization: {e}")))?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Load a target JSON file, falling back to `default` when the path is
/// unset or unreadable.
pub fn load_target(path: Option<&Path>, default: Target) -> Target {
    let Some(path) = path else {
        return default;
    };
    match std::fs::read_to_string(path) {
        Ok(text) => match serde_json::from_str(&text) {
            Ok(target) => target,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "bad target JSON, using default");
                default
            }
        },
        Err(err) => {
            warn!(path = %path.display(), error = %err, "unreadable target JSON, using default");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_zero_at_target() {
        let target = Target {
            mcr: 0.5,
            numr: 0.1,
            mciv: 100.0,
        };
        let sim = Metrics {
            mcr: 0.5,
            numr: 0.1,
            mciv: 100.0,
            mae: 0.0,
            mean_gap: 0.0,
        };
        let (total, errors) = score(&sim, &target);
        assert!(total < 1e-9);
        assert!(errors.acceptable());
    }

    #[test]
    fn test_score_weights() {
        let target = Target {
            mcr: 1.0,
            numr: 1.0,
            mciv: 1.0,
        };
        let sim = Metrics {
            mcr: 2.0, // 100% error
            numr: 1.0,
            mciv: 1.0,
            mae: 0.0,
            mean_gap: 0.0,
        };
        let (total, errors) = score(&sim, &target);
        assert!((total - 0.5).abs() < 1e-9);
        assert!(!errors.acceptable());
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut params = TuneParams::default();
        for _ in 0..1000 {
            params = params.jittered(&mut rng);
            assert!(params.scale_between >= SCALE_BETWEEN_RANGE.0);
            assert!(params.scale_between <= SCALE_BETWEEN_RANGE.1);
            assert!(params.spread_between >= SPREAD_BETWEEN_RANGE.0);
            assert!(params.spread_between <= SPREAD_BETWEEN_RANGE.1);
            assert!(params.burst_gamma >= BURST_GAMMA_RANGE.0);
            assert!(params.burst_gamma <= BURST_GAMMA_RANGE.1);
        }
    }

    #[test]
    fn test_parse_metrics_from_log() {
        let text = "noise\nMCR=0.464100 NUMR=0.032600 MCIV=1322905.000000 MAE=0.5 T=1.0\n";
        let m = parse_metrics_from_log(text).unwrap();
        assert!((m.mcr - 0.4641).abs() < 1e-9);
        assert!((m.numr - 0.0326).abs() < 1e-9);
        assert!((m.mciv - 1322905.0).abs() < 1e-6);
        assert!(parse_metrics_from_log("nothing here").is_none());
    }

    #[test]
    fn test_resolve_dataset() {
        assert_eq!(
            resolve_dataset("single_locked").unwrap(),
            (DatasetType::SingleStatic, Some(Phase::Locked))
        );
        assert_eq!(
            resolve_dataset("multi").unwrap(),
            (DatasetType::Multi, None)
        );
        assert!(resolve_dataset("bogus").is_err());
    }

    #[test]
    fn test_target_aliases() {
        let json = r#"{"mcr": 0.1, "numr": 0.2, "mciv": 3.0}"#;
        let target: Target = serde_json::from_str(json).unwrap();
        assert_eq!(target.mcr, 0.1);
        let json = r#"{"MCR": 0.1, "NUMR": 0.2, "MCIV": 3.0}"#;
        let target: Target = serde_json::from_str(json).unwrap();
        assert_eq!(target.numr, 0.2);
    }
}
