//! Device parameter store.
//!
//! Loads the two tabular configuration files: per-model hardware parameters
//! (burst-length distribution, MAC policy, capability blobs, rate strings)
//! and per-(model, phase) behavioral parameters (intra-burst interval,
//! inter-burst interval, state dwell, jitter). All distributions are
//! normalized on load; malformed records abort with a message naming the
//! offending line.

use std::collections::BTreeMap;
use std::path::Path;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dist::DiscreteDistribution;
use crate::error::{Result, SimError};

/// MAC randomization policy, encoded 0..3 in the hardware file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MacPolicy {
    /// One universal MAC held for the device's whole lifetime.
    Permanent,
    /// Fully randomized locally-administered addresses.
    FullyRandom,
    /// Random tail bytes atop the vendor OUI.
    PreserveOui,
    /// Addresses drawn from a pre-generated private pool.
    Dedicated,
}

impl MacPolicy {
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(MacPolicy::Permanent),
            1 => Ok(MacPolicy::FullyRandom),
            2 => Ok(MacPolicy::PreserveOui),
            3 => Ok(MacPolicy::Dedicated),
            other => Err(SimError::InvalidConfig(format!(
                "mac policy {other} outside 0..3"
            ))),
        }
    }
}

/// Coarse device behavioral state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Locked,
    Awake,
    Active,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Locked, Phase::Awake, Phase::Active];

    pub fn from_index(idx: u8) -> Result<Self> {
        match idx {
            0 => Ok(Phase::Locked),
            1 => Ok(Phase::Awake),
            2 => Ok(Phase::Active),
            other => Err(SimError::InvalidConfig(format!(
                "phase {other} outside 0..2"
            ))),
        }
    }

    pub fn index(self) -> usize {
        match self {
            Phase::Locked => 0,
            Phase::Awake => 1,
            Phase::Active => 2,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.index())
    }
}

/// Per-model hardware parameters.
#[derive(Debug, Clone)]
pub struct HardwareProfile {
    pub vendor: String,
    pub model: String,
    pub burst_lengths: DiscreteDistribution,
    pub mac_policy: MacPolicy,
    /// Absent when the model declines to advertise VHT (`?` in the file).
    pub vht_capabilities: Option<Vec<u8>>,
    pub extended_capabilities: Vec<u8>,
    pub ht_capabilities: Vec<u8>,
    /// Raw `rate:prob/...` string, values in 500 kbps units.
    pub supported_rates: String,
    pub ext_supported_rates: String,
}

/// Per-(model, phase) behavioral parameters. Intra/inter are absent for a
/// silent phase (`-` in the file): the row exists but the device emits no
/// probes while in that phase.
#[derive(Debug, Clone)]
pub struct BehaviorProfile {
    pub intra_burst: Option<DiscreteDistribution>,
    pub inter_burst: Option<DiscreteDistribution>,
    pub state_dwell: DiscreteDistribution,
    pub jitter: DiscreteDistribution,
}

/// Tuning knobs applied as pure transformations over the stored
/// distributions; the originals are immutable after load.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Tunables {
    pub scale_between: f64,
    pub spread_between: f64,
    pub burst_gamma: f64,
    pub dwell_multiplier: f64,
    pub burst_interval_multiplier: f64,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            scale_between: 1.0,
            spread_between: 1.0,
            burst_gamma: 1.0,
            dwell_multiplier: 1.0,
            burst_interval_multiplier: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
struct ModelEntry {
    hardware: HardwareProfile,
    behavior: [Option<BehaviorProfile>; 3],
}

/// Read-only store of hardware and behavior profiles keyed by normalized
/// model name.
#[derive(Debug, Clone)]
pub struct ParameterStore {
    models: BTreeMap<String, ModelEntry>,
}

/// Model names are matched with whitespace removed, case-insensitive.
pub fn model_key(model: &str) -> String {
    model
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
}

fn decode_hex_field(field: &str, what: &str, line_no: usize) -> Result<Vec<u8>> {
    // The original capability notation allows an `x` separator between
    // byte pairs; strip it before decoding.
    let cleaned: String = field.chars().filter(|&c| c != 'x').collect();
    if cleaned.is_empty() {
        return Ok(Vec::new());
    }
    if cleaned.len() % 2 != 0 {
        return Err(SimError::InvalidConfig(format!(
            "{what} on line {line_no}: odd-length hex string '{field}'"
        )));
    }
    cleaned
        .as_bytes()
        .chunks(2)
        .map(|chunk| {
            let s = std::str::from_utf8(chunk).expect("ascii");
            u8::from_str_radix(s, 16).map_err(|_| {
                SimError::InvalidConfig(format!(
                    "{what} on line {line_no}: bad hex string '{field}'"
                ))
            })
        })
        .collect()
}

fn parse_dist_field(
    field: &str,
    what: &str,
    line_no: usize,
) -> Result<DiscreteDistribution> {
    DiscreteDistribution::parse(field).map_err(|e| {
        SimError::InvalidConfig(format!("{what} on line {line_no}: {e}"))
    })
}

/// `-` marks an absent distribution (silent phase).
fn parse_optional_dist_field(
    field: &str,
    what: &str,
    line_no: usize,
) -> Result<Option<DiscreteDistribution>> {
    if field.trim() == "-" {
        return Ok(None);
    }
    parse_dist_field(field, what, line_no).map(Some)
}

impl ParameterStore {
    /// Load both parameter files and cross-validate them.
    pub fn load<P: AsRef<Path>, Q: AsRef<Path>>(
        hardware_path: P,
        behavior_path: Q,
    ) -> Result<Self> {
        let hardware_path = hardware_path.as_ref();
        let behavior_path = behavior_path.as_ref();
        let hw_text = std::fs::read_to_string(hardware_path).map_err(|_| {
            SimError::MissingResource(format!(
                "hardware parameter file {}",
                hardware_path.display()
            ))
        })?;
        let behavior_text = std::fs::read_to_string(behavior_path).map_err(|_| {
            SimError::MissingResource(format!(
                "behavior parameter file {}",
                behavior_path.display()
            ))
        })?;
        let store = Self::parse(&hw_text, &behavior_text)?;
        debug!(models = store.models.len(), "loaded device parameter store");
        Ok(store)
    }

    /// Parse both files from text (used directly by tests).
    pub fn parse(hardware_text: &str, behavior_text: &str) -> Result<Self> {
        let mut models: BTreeMap<String, ModelEntry> = BTreeMap::new();

        for (idx, line) in hardware_text.lines().enumerate() {
            let line_no = idx + 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields: Vec<&str> = line.split(',').map(str::trim).collect();
            if fields.len() < 7 {
                return Err(SimError::InvalidConfig(format!(
                    "hardware record on line {line_no} has {} fields, expected at least 7",
                    fields.len()
                )));
            }
            // Missing trailing rate fields default to empty.
            while fields.len() < 9 {
                fields.push("");
            }
            let vendor = fields[0].to_string();
            let model = fields[1].to_string();
            let burst_lengths =
                parse_dist_field(fields[2], "burst length distribution", line_no)?;
            if burst_lengths
                .entries()
                .iter()
                .any(|&(v, _)| v < 1.0 || v.fract() != 0.0 || v >= 4096.0)
            {
                return Err(SimError::InvalidConfig(format!(
                    "burst length distribution on line {line_no} has non positive-integer values"
                )));
            }
            let policy_code: u8 = fields[3].parse().map_err(|_| {
                SimError::InvalidConfig(format!(
                    "mac policy '{}' on line {line_no} is not an integer",
                    fields[3]
                ))
            })?;
            let mac_policy = MacPolicy::from_code(policy_code).map_err(|e| {
                SimError::InvalidConfig(format!("line {line_no}: {e}"))
            })?;
            let vht_capabilities = if fields[4] == "?" {
                None
            } else {
                Some(decode_hex_field(fields[4], "VHT capabilities", line_no)?)
            };
            let extended_capabilities =
                decode_hex_field(fields[5], "extended capabilities", line_no)?;
            let ht_capabilities = decode_hex_field(fields[6], "HT capabilities", line_no)?;

            let key = model_key(&model);
            models.insert(
                key,
                ModelEntry {
                    hardware: HardwareProfile {
                        vendor,
                        model,
                        burst_lengths,
                        mac_policy,
                        vht_capabilities,
                        extended_capabilities,
                        ht_capabilities,
                        supported_rates: fields[7].to_string(),
                        ext_supported_rates: fields[8].to_string(),
                    },
                    behavior: [None, None, None],
                },
            );
        }

        if models.is_empty() {
            return Err(SimError::InvalidConfig(
                "hardware parameter file contains no records".to_string(),
            ));
        }

        for (idx, line) in behavior_text.lines().enumerate() {
            let line_no = idx + 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            if fields.len() != 6 {
                return Err(SimError::InvalidConfig(format!(
                    "behavior record on line {line_no} has {} fields, expected 6",
                    fields.len()
                )));
            }
            let key = model_key(fields[0]);
            let phase_idx: u8 = fields[1].parse().map_err(|_| {
                SimError::InvalidConfig(format!(
                    "phase '{}' on line {line_no} is not an integer",
                    fields[1]
                ))
            })?;
            let phase = Phase::from_index(phase_idx)
                .map_err(|e| SimError::InvalidConfig(format!("line {line_no}: {e}")))?;
            let entry = models.get_mut(&key).ok_or_else(|| {
                SimError::InvalidConfig(format!(
                    "behavior record on line {line_no} references unknown model '{}'",
                    fields[0]
                ))
            })?;
            let intra_burst =
                parse_optional_dist_field(fields[2], "intra-burst interval", line_no)?;
            let inter_burst =
                parse_optional_dist_field(fields[3], "inter-burst interval", line_no)?;
            let state_dwell = parse_dist_field(fields[4], "state dwell", line_no)?;
            let jitter = parse_dist_field(fields[5], "jitter", line_no)?;
            entry.behavior[phase.index()] = Some(BehaviorProfile {
                intra_burst,
                inter_burst,
                state_dwell,
                jitter,
            });
        }

        for entry in models.values() {
            for phase in Phase::ALL {
                if entry.behavior[phase.index()].is_none() {
                    return Err(SimError::InvalidConfig(format!(
                        "model '{}' has no behavior row for phase {phase}",
                        entry.hardware.model
                    )));
                }
            }
        }

        Ok(Self { models })
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    fn entry(&self, model: &str) -> Result<&ModelEntry> {
        let key = model_key(model);
        self.models.get(&key).ok_or_else(|| {
            SimError::InvalidConfig(format!("unknown model '{model}'"))
        })
    }

    pub fn hardware(&self, model: &str) -> Result<&HardwareProfile> {
        Ok(&self.entry(model)?.hardware)
    }

    pub fn behavior(&self, model: &str, phase: Phase) -> Result<&BehaviorProfile> {
        self.entry(model)?.behavior[phase.index()]
            .as_ref()
            .ok_or_else(|| {
                SimError::InvalidConfig(format!(
                    "model '{model}' has no behavior row for phase {phase}"
                ))
            })
    }

    /// A device is silent in a phase whose inter-burst distribution is
    /// absent.
    pub fn is_sending_probe(&self, model: &str, phase: Phase) -> bool {
        self.behavior(model, phase)
            .map(|b| b.inter_burst.is_some())
            .unwrap_or(false)
    }

    /// Pick a uniformly random (vendor, model) from the store.
    pub fn random_device<R: Rng>(&self, rng: &mut R) -> (&str, &str) {
        let idx = rng.gen_range(0..self.models.len());
        let entry = self.models.values().nth(idx).expect("non-empty store");
        (&entry.hardware.vendor, &entry.hardware.model)
    }

    /// Pick a model by vendor prefix, optionally narrowed to a model name
    /// prefix. Falls back to a random device when nothing matches.
    pub fn pick_by_vendor<R: Rng>(
        &self,
        vendor: &str,
        model: Option<&str>,
        rng: &mut R,
    ) -> (&str, &str) {
        let vendor_needle = vendor.to_lowercase();
        let candidates: Vec<&ModelEntry> = self
            .models
            .values()
            .filter(|e| e.hardware.vendor.to_lowercase().starts_with(&vendor_needle))
            .collect();
        if candidates.is_empty() {
            return self.random_device(rng);
        }
        if let Some(model) = model {
            let needle = model_key(model);
            if let Some(entry) = candidates
                .iter()
                .find(|e| model_key(&e.hardware.model) == needle)
                .or_else(|| {
                    candidates
                        .iter()
                        .find(|e| model_key(&e.hardware.model).starts_with(&needle))
                })
            {
                return (&entry.hardware.vendor, &entry.hardware.model);
            }
        }
        let entry = candidates[rng.gen_range(0..candidates.len())];
        (&entry.hardware.vendor, &entry.hardware.model)
    }

    /// Inter-burst distribution with the scenario tuning applied, `None` for
    /// a silent phase.
    pub fn inter_burst_tuned(
        &self,
        model: &str,
        phase: Phase,
        tunables: &Tunables,
    ) -> Result<Option<DiscreteDistribution>> {
        Ok(self.behavior(model, phase)?.inter_burst.as_ref().map(|d| {
            d.scale(tunables.scale_between * tunables.burst_interval_multiplier)
                .spread(tunables.spread_between)
        }))
    }

    /// Burst-length distribution reshaped by `burst_gamma`.
    pub fn burst_lengths_tuned(
        &self,
        model: &str,
        tunables: &Tunables,
    ) -> Result<DiscreteDistribution> {
        Ok(self.hardware(model)?.burst_lengths.gamma(tunables.burst_gamma))
    }

    /// Dwell distribution scaled by `dwell_multiplier`.
    pub fn dwell_tuned(
        &self,
        model: &str,
        phase: Phase,
        tunables: &Tunables,
    ) -> Result<DiscreteDistribution> {
        Ok(self
            .behavior(model, phase)?
            .state_dwell
            .scale(tunables.dwell_multiplier))
    }
}
