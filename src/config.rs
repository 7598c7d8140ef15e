//! Simulation configuration.
//!
//! A run is described by a [`SimConfig`]: resource paths, duration,
//! scenario kind, and the scenario parameter record the engine consumes.
//! Configs load from TOML files with per-field defaults; the CLI overlays
//! its flags on top.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::channel::Environment;
use crate::device::RotationMode;
use crate::store::Phase;

/// Which population the engine bootstraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetType {
    /// Many devices with arrivals, departures, and phase switching.
    Multi,
    /// One device cycling through phases.
    SingleSwitch,
    /// One device pinned to a configured phase.
    SingleStatic,
}

impl Default for DatasetType {
    fn default() -> Self {
        DatasetType::Multi
    }
}

/// Scenario parameter record consumed by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioParams {
    #[serde(default = "default_multiplier")]
    pub creation_interval_multiplier: f64,
    #[serde(default = "default_multiplier")]
    pub burst_interval_multiplier: f64,
    #[serde(default = "default_multiplier")]
    pub dwell_multiplier: f64,
    #[serde(default = "default_multiplier")]
    pub env_factor: f64,
    #[serde(default)]
    pub interference_prob: f64,
    #[serde(default)]
    pub qa_sample_rate: f64,
    #[serde(default)]
    pub mac_rotation_mode: RotationMode,
    /// Fixed rotation period in seconds for interval mode; devices draw
    /// their own 20-60 s period when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_rotation_interval: Option<f64>,
    #[serde(default = "default_multiplier")]
    pub mobility_speed_multiplier: f64,

    /// Single-device runs: vendor/model selection and phase pinning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub single_vendor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub single_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub single_phase: Option<Phase>,
    #[serde(default)]
    pub allow_state_switch: bool,

    /// Auto-tune search knobs; identity values leave the distributions
    /// untouched.
    #[serde(default = "default_multiplier")]
    pub scale_between: f64,
    #[serde(default = "default_multiplier")]
    pub spread_between: f64,
    #[serde(default = "default_multiplier")]
    pub burst_gamma: f64,
}

impl Default for ScenarioParams {
    fn default() -> Self {
        Self {
            creation_interval_multiplier: 1.0,
            burst_interval_multiplier: 1.0,
            dwell_multiplier: 1.0,
            env_factor: 1.0,
            interference_prob: 0.0,
            qa_sample_rate: 0.0,
            mac_rotation_mode: RotationMode::default(),
            mac_rotation_interval: None,
            mobility_speed_multiplier: 1.0,
            single_vendor: None,
            single_model: None,
            single_phase: None,
            allow_state_switch: false,
            scale_between: 1.0,
            spread_between: 1.0,
            burst_gamma: 1.0,
        }
    }
}

/// Full run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    /// Hardware parameter file.
    #[serde(default = "default_hardware_path")]
    pub hardware_path: PathBuf,
    /// Behavior parameter file.
    #[serde(default = "default_behavior_path")]
    pub behavior_path: PathBuf,
    /// IEEE OUI database.
    #[serde(default = "default_oui_path")]
    pub oui_path: PathBuf,
    /// Output base path; extensions are appended per output.
    #[serde(default = "default_out_base")]
    pub out_base: PathBuf,

    #[serde(default)]
    pub dataset_type: DatasetType,
    #[serde(default = "default_duration_secs")]
    pub duration_secs: f64,
    /// Initial device count for multi-device runs.
    #[serde(default = "default_device_count")]
    pub device_count: u32,
    /// Mean device permanence in seconds for multi-device runs.
    #[serde(default = "default_permanence_secs")]
    pub permanence_mean_secs: f64,
    /// Mean CreateDevice inter-arrival in seconds.
    #[serde(default = "default_creation_interval_secs")]
    pub creation_interval_mean_secs: f64,

    /// 2.4 GHz channel all probes are emitted on.
    #[serde(default = "default_channel")]
    pub channel: u8,
    #[serde(default = "default_tx_power")]
    pub tx_power_dbm: f64,
    #[serde(default = "default_frequency")]
    pub frequency_mhz: f64,
    #[serde(default)]
    pub environment: Environment,
    /// Notional sniffer position in the arena.
    #[serde(default)]
    pub sniffer_position: (f64, f64),

    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Unix epoch (microseconds) of simulation time zero; wall clock when
    /// unset. Fixing it makes runs byte-identical for a fixed seed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epoch_us: Option<u64>,
    /// Sleep real time between events.
    #[serde(default)]
    pub realtime: bool,

    #[serde(default)]
    pub scenario: ScenarioParams,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            hardware_path: default_hardware_path(),
            behavior_path: default_behavior_path(),
            oui_path: default_oui_path(),
            out_base: default_out_base(),
            dataset_type: DatasetType::default(),
            duration_secs: default_duration_secs(),
            device_count: default_device_count(),
            permanence_mean_secs: default_permanence_secs(),
            creation_interval_mean_secs: default_creation_interval_secs(),
            channel: default_channel(),
            tx_power_dbm: default_tx_power(),
            frequency_mhz: default_frequency(),
            environment: Environment::default(),
            sniffer_position: (0.0, 0.0),
            seed: default_seed(),
            epoch_us: None,
            realtime: false,
            scenario: ScenarioParams::default(),
        }
    }
}

impl SimConfig {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let config: SimConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }
}

// Default value functions

fn default_multiplier() -> f64 {
    1.0
}

fn default_hardware_path() -> PathBuf {
    PathBuf::from("data/hardware.txt")
}

fn default_behavior_path() -> PathBuf {
    PathBuf::from("data/behavior.txt")
}

fn default_oui_path() -> PathBuf {
    PathBuf::from("data/oui.txt")
}

fn default_out_base() -> PathBuf {
    PathBuf::from("out/run")
}

fn default_duration_secs() -> f64 {
    600.0
}

fn default_device_count() -> u32 {
    20
}

fn default_permanence_secs() -> f64 {
    900.0
}

fn default_creation_interval_secs() -> f64 {
    450.0
}

fn default_channel() -> u8 {
    6
}

fn default_tx_power() -> f64 {
    20.0
}

fn default_frequency() -> f64 {
    2400.0
}

fn default_seed() -> u64 {
    42
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SimConfig::default();
        assert_eq!(config.channel, 6);
        assert_eq!(config.scenario.env_factor, 1.0);
        assert_eq!(config.dataset_type, DatasetType::Multi);
    }

    #[test]
    fn test_config_serialization() {
        let config = SimConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: SimConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.channel, config.channel);
        assert_eq!(parsed.seed, config.seed);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let parsed: SimConfig = toml::from_str(
            "duration_secs = 120.0\n\n[scenario]\nmac_rotation_mode = \"interval\"\n",
        )
        .unwrap();
        assert_eq!(parsed.duration_secs, 120.0);
        assert_eq!(parsed.scenario.mac_rotation_mode, RotationMode::Interval);
        assert_eq!(parsed.scenario.burst_gamma, 1.0);
        assert_eq!(parsed.device_count, 20);
    }
}
