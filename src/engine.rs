//! Discrete-event simulation engine.
//!
//! A priority queue of scheduled events keyed by `(time, insertion-seq)`
//! drives device lifecycles, phase transitions, burst creation, and
//! per-frame transmissions. Dispatch order is strictly deterministic for a
//! fixed RNG seed; with a fixed epoch two identical runs produce
//! byte-identical captures.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};
use std::time::Duration;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp};
use tracing::{debug, info, warn};

use crate::channel::ChannelFilter;
use crate::config::{DatasetType, SimConfig};
use crate::device::{Device, DeviceId};
use crate::error::{Result, SimError};
use crate::frame::composer::{compose_burst, BurstSpec};
use crate::frame::ieee80211::MacAddr;
use crate::frame::{parse_probe_request, parse_radiotap};
use crate::metrics;
use crate::output::{self, RunPaths, RunStats, RunWriters};
use crate::oui::OuiRegistry;
use crate::store::{MacPolicy, ParameterStore, Phase, Tunables};

/// Kind-specific event payload.
#[derive(Debug, Clone)]
enum EventKind {
    CreateDevice {
        vendor: String,
        model: String,
    },
    DeleteDevice {
        device: DeviceId,
    },
    ChangePhase {
        device: DeviceId,
        phase: Phase,
    },
    CreateBurst {
        device: DeviceId,
        epoch: u32,
    },
    SendPacket {
        device: DeviceId,
        epoch: u32,
        mac: MacAddr,
        frame: Vec<u8>,
        burst_end: bool,
    },
}

/// An event with its absolute time and tie-breaking insertion sequence.
#[derive(Debug)]
struct ScheduledEvent {
    time_us: u64,
    seq: u64,
    kind: EventKind,
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time_us == other.time_us && self.seq == other.seq
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.time_us, self.seq).cmp(&(other.time_us, other.seq))
    }
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub stats: RunStats,
    pub paths: RunPaths,
}

struct RetiredDevice {
    id: DeviceId,
    name: String,
    macs: Vec<MacAddr>,
}

/// Run one simulation to completion.
pub fn run(
    config: &SimConfig,
    store: &ParameterStore,
    oui: &OuiRegistry,
) -> Result<RunSummary> {
    Engine::new(config, store, oui)?.run()
}

struct Engine<'a> {
    config: &'a SimConfig,
    store: &'a ParameterStore,
    oui: &'a OuiRegistry,
    rng: StdRng,
    queue: BinaryHeap<Reverse<ScheduledEvent>>,
    next_seq: u64,
    devices: BTreeMap<DeviceId, Device>,
    next_device_id: DeviceId,
    retired: Vec<RetiredDevice>,
    now_us: u64,
    last_mobility_us: u64,
    emitted: Vec<(f64, MacAddr)>,
    writers: RunWriters,
    filter: ChannelFilter,
    tunables: Tunables,
    paths: RunPaths,
}

impl<'a> Engine<'a> {
    fn new(
        config: &'a SimConfig,
        store: &'a ParameterStore,
        oui: &'a OuiRegistry,
    ) -> Result<Self> {
        let paths = RunPaths::new(&config.out_base);
        if let Some(parent) = config.out_base.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let epoch_us = config
            .epoch_us
            .unwrap_or_else(|| Utc::now().timestamp_micros().max(0) as u64);
        let writers = RunWriters::create(&paths, epoch_us)?;
        let scenario = &config.scenario;
        let tunables = Tunables {
            scale_between: scenario.scale_between,
            spread_between: scenario.spread_between,
            burst_gamma: scenario.burst_gamma,
            dwell_multiplier: scenario.dwell_multiplier,
            burst_interval_multiplier: scenario.burst_interval_multiplier,
        };
        Ok(Self {
            config,
            store,
            oui,
            rng: StdRng::seed_from_u64(config.seed),
            queue: BinaryHeap::new(),
            next_seq: 0,
            devices: BTreeMap::new(),
            next_device_id: 0,
            retired: Vec::new(),
            now_us: 0,
            last_mobility_us: 0,
            emitted: Vec::new(),
            writers,
            filter: ChannelFilter::new(
                config.tx_power_dbm,
                config.frequency_mhz,
                config.environment,
            ),
            tunables,
            paths,
        })
    }

    fn schedule(&mut self, time_us: u64, kind: EventKind) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Reverse(ScheduledEvent { time_us, seq, kind }));
    }

    fn secs(time_us: u64) -> f64 {
        time_us as f64 / 1e6
    }

    fn us(secs: f64) -> u64 {
        (secs.max(0.0) * 1e6) as u64
    }

    /// Initial phase distribution for multi-device runs.
    fn initial_phase(&mut self) -> Phase {
        let draw: f64 = self.rng.gen();
        if draw < 0.35 {
            Phase::Locked
        } else if draw < 0.50 {
            Phase::Awake
        } else {
            Phase::Active
        }
    }

    /// Phase transition matrix.
    fn next_phase(&mut self, phase: Phase) -> Phase {
        match phase {
            Phase::Locked => {
                if self.rng.gen_bool(0.2) {
                    Phase::Awake
                } else {
                    Phase::Active
                }
            }
            Phase::Awake => {
                if self.rng.gen_bool(0.9) {
                    Phase::Locked
                } else {
                    Phase::Active
                }
            }
            Phase::Active => Phase::Locked,
        }
    }

    fn bootstrap(&mut self) -> Result<()> {
        match self.config.dataset_type {
            DatasetType::Multi => {
                let mean = (self.config.creation_interval_mean_secs
                    * self.config.scenario.creation_interval_multiplier)
                    .max(1e-3);
                let arrivals = Exp::new(1.0 / mean).map_err(|e| {
                    SimError::InvalidConfig(format!("bad creation interval: {e}"))
                })?;
                let mut t = 0.0;
                for i in 0..self.config.device_count {
                    let (vendor, model) = {
                        let (v, m) = self.store.random_device(&mut self.rng);
                        (v.to_string(), m.to_string())
                    };
                    let time_us = Self::us(t);
                    self.schedule(time_us, EventKind::CreateDevice { vendor, model });
                    if i + 1 < self.config.device_count {
                        t += arrivals.sample(&mut self.rng);
                    }
                }
            }
            DatasetType::SingleSwitch | DatasetType::SingleStatic => {
                let scenario = &self.config.scenario;
                let (vendor, model) = match scenario.single_vendor.as_deref() {
                    Some(vendor) if !vendor.trim().is_empty() => {
                        let (v, m) = self.store.pick_by_vendor(
                            vendor,
                            scenario.single_model.as_deref(),
                            &mut self.rng,
                        );
                        (v.to_string(), m.to_string())
                    }
                    _ => {
                        let (v, m) = self.store.random_device(&mut self.rng);
                        (v.to_string(), m.to_string())
                    }
                };
                info!(vendor = %vendor, model = %model, "single-device run");
                self.schedule(0, EventKind::CreateDevice { vendor, model });
            }
        }
        Ok(())
    }

    /// Resolve the OUI carried in generated addresses and the vendor
    /// element. Fully-random devices advertise a generic chipset vendor
    /// instead of their own.
    fn resolve_oui(&mut self, vendor: &str, policy: MacPolicy) -> [u8; 3] {
        let name = if policy == MacPolicy::FullyRandom {
            "Broadcom"
        } else {
            vendor
        };
        match self.oui.lookup(name) {
            Some((oui, _)) => oui,
            None => {
                warn!(vendor = name, "vendor not in OUI database, using 00:00:00");
                [0, 0, 0]
            }
        }
    }

    fn handle_create_device(&mut self, vendor: &str, model: &str) -> Result<()> {
        let scenario = &self.config.scenario;
        let dataset = self.config.dataset_type;
        let phase = match dataset {
            DatasetType::Multi => self.initial_phase(),
            DatasetType::SingleSwitch => {
                self.config.scenario.single_phase.unwrap_or(Phase::Active)
            }
            DatasetType::SingleStatic => {
                self.config.scenario.single_phase.unwrap_or(Phase::Locked)
            }
        };
        let policy = self.store.hardware(model)?.mac_policy;
        let oui = self.resolve_oui(vendor, policy);
        let rotation_mode = self.config.scenario.mac_rotation_mode;
        let rotation_interval = self.config.scenario.mac_rotation_interval;

        let id = self.next_device_id;
        self.next_device_id += 1;
        let mut device = Device::new(
            id,
            self.now_us,
            phase,
            vendor,
            model,
            policy,
            Some(oui),
            rotation_mode,
            rotation_interval,
            &mut self.rng,
        )?;
        if dataset == DatasetType::Multi {
            device.speed_mps *= scenario.mobility_speed_multiplier;
        }
        info!(
            device = id,
            vendor,
            model,
            phase = %phase,
            speed_mps = device.speed_mps,
            "device created"
        );
        let now = Self::secs(self.now_us);
        self.writers.log_line(&format!(
            "{now:.6} device {id} ({vendor} {model}) created phase={phase}"
        ))?;
        self.devices.insert(id, device);

        if dataset == DatasetType::Multi {
            let permanence_mean = (self.config.permanence_mean_secs
                * scenario.creation_interval_multiplier)
                .max(1e-3);
            let permanence = Exp::new(1.0 / permanence_mean)
                .map_err(|e| SimError::InvalidConfig(format!("bad permanence mean: {e}")))?
                .sample(&mut self.rng);
            self.schedule(
                self.now_us + Self::us(permanence),
                EventKind::DeleteDevice { device: id },
            );
        }

        let switching = dataset != DatasetType::SingleStatic
            || self.config.scenario.allow_state_switch;
        if switching {
            self.schedule_phase_change(id, phase)?;
        }

        self.schedule_next_burst(id, phase, self.now_us)?;
        Ok(())
    }

    /// Draw a dwell for the current phase and schedule the transition out
    /// of it.
    fn schedule_phase_change(&mut self, id: DeviceId, current: Phase) -> Result<()> {
        let Some(device) = self.devices.get(&id) else {
            return Ok(());
        };
        let model = device.model.clone();
        let dwell = self
            .store
            .dwell_tuned(&model, current, &self.tunables)?
            .sample(&mut self.rng);
        let target = self.next_phase(current);
        self.schedule(
            self.now_us + Self::us(dwell),
            EventKind::ChangePhase {
                device: id,
                phase: target,
            },
        );
        Ok(())
    }

    /// Schedule the next CreateBurst after an inter-burst draw, unless the
    /// device is silent in this phase.
    fn schedule_next_burst(&mut self, id: DeviceId, phase: Phase, from_us: u64) -> Result<()> {
        let Some(device) = self.devices.get(&id) else {
            return Ok(());
        };
        let model = device.model.clone();
        let epoch = device.schedule_epoch;
        let Some(inter) = self
            .store
            .inter_burst_tuned(&model, phase, &self.tunables)?
        else {
            debug!(device = id, phase = %phase, "silent phase, no bursts");
            return Ok(());
        };
        let delay = inter.sample(&mut self.rng);
        self.schedule(
            from_us + Self::us(delay),
            EventKind::CreateBurst { device: id, epoch },
        );
        Ok(())
    }

    fn handle_change_phase(&mut self, id: DeviceId, phase: Phase) -> Result<()> {
        if self.config.dataset_type == DatasetType::SingleStatic
            && !self.config.scenario.allow_state_switch
        {
            return Ok(());
        }
        let Some(device) = self.devices.get_mut(&id) else {
            return Ok(());
        };
        device.change_phase(phase, self.now_us);
        let vendor = device.vendor.clone();
        let model = device.model.clone();
        let now = Self::secs(self.now_us);
        info!(device = id, phase = %phase, "phase change");
        self.writers.log_line(&format!(
            "{now:.6} device {id} ({vendor} {model}) changed phase to {phase}"
        ))?;
        self.schedule_phase_change(id, phase)?;
        self.schedule_next_burst(id, phase, self.now_us)?;
        Ok(())
    }

    fn handle_create_burst(&mut self, id: DeviceId, epoch: u32) -> Result<()> {
        // Stale events from before a phase change or deletion are dropped.
        let Some(device) = self.devices.get(&id) else {
            return Ok(());
        };
        if device.schedule_epoch != epoch {
            return Ok(());
        }
        let phase = device.phase;
        let model = device.model.clone();
        if !self.store.is_sending_probe(&model, phase) {
            return Ok(());
        }

        let behavior = self.store.behavior(&model, phase)?;
        let Some(intra_dist) = behavior.intra_burst.clone() else {
            return Ok(());
        };
        let jitter = behavior.jitter.clone();
        let intra = intra_dist.sample(&mut self.rng);
        let burst_len = self
            .store
            .burst_lengths_tuned(&model, &self.tunables)?
            .sample(&mut self.rng) as u16;
        let hardware = self.store.hardware(&model)?.clone();

        let os_jitter = self.rng.gen_range(0.005..0.020);
        let (frames, mac, start_us) = {
            let device = self.devices.get_mut(&id).expect("checked above");
            device.rotate_for_burst(self.now_us, &mut self.rng)?;
            let start_us = self.now_us
                + Self::us(device.processing_delay_secs + device.queue_delay_secs() + os_jitter);
            let spec = BurstSpec {
                start_us,
                burst_len,
                intra_burst_secs: intra,
                jitter: &jitter,
                channel: self.config.channel,
            };
            let (mac, frames) = compose_burst(device, &hardware, &spec, &mut self.rng)?;
            device.bursts_sent += 1;
            (frames, mac, start_us)
        };

        let last = frames.len().saturating_sub(1);
        for (i, frame) in frames.into_iter().enumerate() {
            self.schedule(
                frame.timestamp_us,
                EventKind::SendPacket {
                    device: id,
                    epoch,
                    mac,
                    frame: frame.bytes,
                    burst_end: i == last,
                },
            );
        }

        let burst_span = Self::us((burst_len.saturating_sub(1)) as f64 * intra);
        self.schedule_next_burst(id, phase, start_us + burst_span)?;
        Ok(())
    }

    fn handle_send_packet(
        &mut self,
        id: DeviceId,
        epoch: u32,
        mac: MacAddr,
        frame: Vec<u8>,
        burst_end: bool,
    ) -> Result<()> {
        let scenario = &self.config.scenario;
        let Some(device) = self.devices.get(&id) else {
            return Ok(());
        };
        if device.schedule_epoch != epoch {
            return Ok(());
        }

        let distance = device.distance_to(self.config.sniffer_position);
        let env = scenario.env_factor * device.power_dbm / 20.0;
        let interfered = scenario.interference_prob > 0.0
            && self.rng.gen::<f64>() < scenario.interference_prob;
        let survived = !interfered && self.filter.simulate(distance, env, &mut self.rng);

        let now = Self::secs(self.now_us);
        if survived {
            let rssi = self.filter.capture_rssi(&mut self.rng);
            self.writers.capture.write(self.now_us, &frame);
            self.writers.log_line(&format!(
                "{now:.6} device {id} mac {mac} channel {} rssi {rssi}",
                self.config.channel
            ))?;
            self.writers.probe_id_line(now, id, mac)?;
            self.emitted.push((now, mac));
            if scenario.qa_sample_rate > 0.0
                && self.rng.gen::<f64>() < scenario.qa_sample_rate
            {
                self.qa_dump(&frame, rssi);
            }
            let device = self.devices.get_mut(&id).expect("checked above");
            device.packets_sent += 1;
            if burst_end {
                debug!(device = id, "burst complete");
            }
        } else {
            debug!(device = id, distance, "frame lost");
        }
        Ok(())
    }

    /// Self-consistency check: re-parse an emitted frame and dump it.
    fn qa_dump(&self, frame: &[u8], rssi: i8) {
        let Some((radiotap, offset)) = parse_radiotap(frame) else {
            warn!("qa: emitted frame has unparseable radiotap header");
            return;
        };
        let Some(parsed) = parse_probe_request(&frame[offset..]) else {
            warn!("qa: emitted frame is not a parseable probe request");
            return;
        };
        debug!(
            source = %parsed.source,
            seq = parsed.sequence,
            ssid = %parsed.ssid,
            channel = parsed.channel,
            tsft = radiotap.tsft,
            ies = parsed.ies.len(),
            rssi,
            "qa frame dump"
        );
    }

    fn handle_delete_device(&mut self, id: DeviceId) -> Result<()> {
        let Some(device) = self.devices.remove(&id) else {
            return Ok(());
        };
        let now = Self::secs(self.now_us);
        info!(device = id, "device deleted");
        self.writers.log_line(&format!(
            "{now:.6} device {id} ({} {}) deleted",
            device.vendor, device.model
        ))?;
        self.retired.push(RetiredDevice {
            id,
            name: format!("{} {}", device.vendor, device.model),
            macs: device.mac_history,
        });
        Ok(())
    }

    fn update_mobility(&mut self, to_us: u64) {
        let dt = Self::secs(to_us.saturating_sub(self.last_mobility_us));
        if dt > 0.0 {
            for device in self.devices.values_mut() {
                device.update_position(dt, &mut self.rng);
            }
        }
        self.last_mobility_us = to_us;
    }

    fn dispatch(&mut self, kind: EventKind) -> Result<()> {
        match kind {
            EventKind::CreateDevice { vendor, model } => {
                self.handle_create_device(&vendor, &model)
            }
            EventKind::DeleteDevice { device } => self.handle_delete_device(device),
            EventKind::ChangePhase { device, phase } => {
                self.handle_change_phase(device, phase)
            }
            EventKind::CreateBurst { device, epoch } => {
                self.handle_create_burst(device, epoch)
            }
            EventKind::SendPacket {
                device,
                epoch,
                mac,
                frame,
                burst_end,
            } => self.handle_send_packet(device, epoch, mac, frame, burst_end),
        }
    }

    fn run(mut self) -> Result<RunSummary> {
        info!(
            dataset = ?self.config.dataset_type,
            duration_secs = self.config.duration_secs,
            seed = self.config.seed,
            "simulation start"
        );
        self.writers
            .log_line("+++++++++++ simulation start +++++++++++")?;
        self.bootstrap()?;

        let end_us = Self::us(self.config.duration_secs);
        while let Some(Reverse(event)) = self.queue.pop() {
            if event.time_us >= end_us {
                break;
            }
            if event.time_us < self.now_us {
                return Err(SimError::RuntimeInvariant(format!(
                    "event time regressed: {} < {}",
                    event.time_us, self.now_us
                )));
            }
            if self.config.realtime {
                let delta = event.time_us - self.now_us;
                if delta > 0 {
                    std::thread::sleep(Duration::from_micros(delta));
                }
            }
            self.now_us = event.time_us;
            self.update_mobility(event.time_us);
            if let Err(err) = self.dispatch(event.kind) {
                // Capture IO failures abort after flushing the log stream.
                self.writers.flush_logs().ok();
                return Err(err);
            }
        }

        self.finalize()
    }

    fn finalize(mut self) -> Result<RunSummary> {
        self.writers.capture.flush()?;
        self.writers
            .log_line("+++++++++++ simulation end +++++++++++")?;

        let stats = self.compute_stats();
        self.writers.log_line(&format!(
            "MCR={:.6} NUMR={:.6} MCIV={:.6} MAE={:.6} T={:.6}",
            stats.mcr, stats.numr, stats.mciv, stats.mae, stats.mean_gap
        ))?;
        self.writers.log_line(&format!(
            "total_frames={} distinct_macs={} devices={}",
            stats.total_frames, stats.distinct_macs, stats.device_count
        ))?;
        self.writers.flush_logs()?;

        let mut rows: Vec<(MacAddr, String, u32)> = Vec::new();
        let mut device_rows: Vec<(DeviceId, String, Vec<MacAddr>)> = self
            .retired
            .iter()
            .map(|r| (r.id, r.name.clone(), r.macs.clone()))
            .chain(self.devices.values().map(|d| {
                (
                    d.id,
                    format!("{} {}", d.vendor, d.model),
                    d.mac_history.clone(),
                )
            }))
            .collect();
        device_rows.sort_by_key(|(id, _, _)| *id);
        for (id, name, macs) in device_rows {
            for mac in macs {
                rows.push((mac, name.clone(), id));
            }
        }
        output::write_devices_csv(self.paths.devices_csv(), &rows)?;
        output::write_stats_json(self.paths.stats_json(), &stats)?;

        info!(
            frames = stats.total_frames,
            distinct_macs = stats.distinct_macs,
            devices = stats.device_count,
            "simulation finished"
        );
        Ok(RunSummary {
            stats,
            paths: self.paths,
        })
    }

    /// Internal metrics over the emitted sequence, one segment spanning the
    /// whole run so a read-back with the same segment length reproduces
    /// them.
    fn compute_stats(&self) -> RunStats {
        let m = metrics::compute(&self.emitted, self.config.duration_secs);
        let distinct: std::collections::HashSet<MacAddr> =
            self.emitted.iter().map(|&(_, mac)| mac).collect();
        RunStats {
            mcr: m.mcr,
            numr: m.numr,
            mciv: m.mciv,
            mae: m.mae,
            mean_gap: m.mean_gap,
            total_frames: self.emitted.len() as u64,
            distinct_macs: distinct.len() as u64,
            device_count: self.next_device_id as u64,
            duration_secs: self.config.duration_secs,
        }
    }
}
