//! probesim: synthesize IEEE 802.11 Probe Request traffic that
//! statistically reproduces the behavior of real mobile devices.
//!
//! A discrete-event engine schedules device lifecycles, phase transitions,
//! and bursts; a per-model behavior store drives MAC rotation and timing
//! distributions; a frame composer emits bit-exact RadioTap + 802.11
//! Probe Requests; a stochastic channel filter decides which frames reach
//! the capture. Companion tooling extracts quality metrics from captures
//! and auto-tunes scenario parameters against a target record.

pub mod autotune;
pub mod channel;
pub mod config;
pub mod device;
pub mod dist;
pub mod engine;
pub mod error;
pub mod frame;
pub mod metrics;
pub mod oui;
pub mod output;
pub mod store;

pub use channel::{ChannelFilter, Environment};
pub use config::{DatasetType, ScenarioParams, SimConfig};
pub use device::{Device, DeviceId, RotationMode};
pub use dist::DiscreteDistribution;
pub use engine::{run, RunSummary};
pub use error::{Result, SimError};
pub use frame::{MacAddr, ParsedProbeRequest};
pub use metrics::Metrics;
pub use oui::OuiRegistry;
pub use output::{RunPaths, RunStats};
pub use store::{BehaviorProfile, HardwareProfile, MacPolicy, ParameterStore, Phase};
