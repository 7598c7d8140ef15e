//! Per-device simulation state.
//!
//! A device owns its identity, MAC rotation state, behavioral phase,
//! mobility state, and radio/queue parameters. MAC addresses are generated
//! according to the model's randomization policy and validated against the
//! policy invariants; a violation is a [`SimError::RuntimeInvariant`].

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::frame::ieee80211::MacAddr;
use crate::store::{MacPolicy, Phase};

pub type DeviceId = u32;

/// Square arena side length in meters.
pub const ARENA_SIZE: f64 = 100.0;

/// Size of the pre-generated address pool for the Dedicated policy.
const DEDICATED_POOL_SIZE: usize = 4;

/// When a burst's MAC is rotated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationMode {
    /// Rotate before every burst.
    PerBurst,
    /// Rotate on the first burst after a phase change.
    PerPhase,
    /// Rotate when the rotation interval has elapsed.
    Interval,
}

impl Default for RotationMode {
    fn default() -> Self {
        RotationMode::PerBurst
    }
}

#[derive(Debug, Clone)]
pub struct Device {
    pub id: DeviceId,
    pub vendor: String,
    pub model: String,
    pub policy: MacPolicy,

    pub phase: Phase,
    pub time_phase_changed_us: u64,

    current_mac: MacAddr,
    /// Every address this device has used, in first-use order.
    pub mac_history: Vec<MacAddr>,
    pub rotation_mode: RotationMode,
    pub force_mac_change: bool,
    pub last_mac_change_us: u64,
    /// Rotation period in seconds for [`RotationMode::Interval`].
    pub rotation_interval_secs: f64,
    dedicated_pool: Vec<MacAddr>,
    pool_index: usize,

    /// Vendor OUI resolved at creation, used by PreserveOui and the
    /// vendor-specific element.
    pub oui: Option<[u8; 3]>,

    pub position: (f64, f64),
    pub speed_mps: f64,
    pub heading_deg: f64,

    pub queue_length: u32,
    pub processing_delay_secs: f64,
    pub power_dbm: f64,

    pub ssids: Vec<String>,
    pub wps: Option<[u8; 4]>,
    pub uuide: Option<[u8; 4]>,

    sequence: Option<u16>,
    /// Bumped on phase change and deletion; stale scheduled events are
    /// dropped by the engine when their epoch no longer matches.
    pub schedule_epoch: u32,

    pub packets_sent: u64,
    pub bursts_sent: u64,
}

fn random_locally_administered<R: Rng>(rng: &mut R) -> MacAddr {
    let mut bytes = [0u8; 6];
    rng.fill(&mut bytes[..]);
    // Low two bits of the first octet: locally administered, unicast.
    bytes[0] = (bytes[0] & 0xfc) | 0x02;
    MacAddr::new(bytes)
}

fn random_universal<R: Rng>(rng: &mut R) -> MacAddr {
    let mut bytes = [0u8; 6];
    rng.fill(&mut bytes[..]);
    bytes[0] &= 0xfc; // universal, unicast
    MacAddr::new(bytes)
}

fn random_with_oui<R: Rng>(oui: [u8; 3], rng: &mut R) -> MacAddr {
    let mut bytes = [0u8; 6];
    bytes[..3].copy_from_slice(&oui);
    rng.fill(&mut bytes[3..]);
    MacAddr::new(bytes)
}

fn random_ssid<R: Rng>(rng: &mut R) -> String {
    const ALPHABET: &[u8] =
        b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    (0..32)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

impl Device {
    #[allow(clippy::too_many_arguments)]
    pub fn new<R: Rng>(
        id: DeviceId,
        now_us: u64,
        phase: Phase,
        vendor: &str,
        model: &str,
        policy: MacPolicy,
        oui: Option<[u8; 3]>,
        rotation_mode: RotationMode,
        rotation_interval_secs: Option<f64>,
        rng: &mut R,
    ) -> Result<Self> {
        let dedicated_pool = if policy == MacPolicy::Dedicated {
            (0..DEDICATED_POOL_SIZE)
                .map(|_| random_locally_administered(rng))
                .collect()
        } else {
            Vec::new()
        };

        let mut device = Self {
            id,
            vendor: vendor.to_string(),
            model: model.to_string(),
            policy,
            phase,
            time_phase_changed_us: now_us,
            current_mac: MacAddr::BROADCAST, // replaced below
            mac_history: Vec::new(),
            rotation_mode,
            force_mac_change: false,
            last_mac_change_us: now_us,
            rotation_interval_secs: rotation_interval_secs
                .unwrap_or_else(|| rng.gen_range(20.0..60.0)),
            dedicated_pool,
            pool_index: 0,
            oui,
            position: (
                rng.gen_range(0.0..ARENA_SIZE),
                rng.gen_range(0.0..ARENA_SIZE),
            ),
            speed_mps: rng.gen_range(0.5..2.0),
            heading_deg: rng.gen_range(0.0..360.0),
            queue_length: rng.gen_range(1..10),
            processing_delay_secs: rng.gen_range(0.001..0.005),
            power_dbm: rng.gen_range(10.0..20.0),
            ssids: Vec::new(),
            wps: None,
            uuide: None,
            sequence: None,
            schedule_epoch: 0,
            packets_sent: 0,
            bursts_sent: 0,
        };

        if rng.gen_bool(0.11) {
            let mut wps = [0u8; 4];
            let mut uuide = [0u8; 4];
            rng.fill(&mut wps[..]);
            rng.fill(&mut uuide[..]);
            device.wps = Some(wps);
            device.uuide = Some(uuide);
        }
        if rng.gen_bool(0.2) {
            let n = rng.gen_range(1..=10);
            device.ssids = (0..n).map(|_| random_ssid(rng)).collect();
        }

        let mac = device.generate_mac(rng)?;
        device.set_current_mac(mac, now_us)?;
        Ok(device)
    }

    pub fn current_mac(&self) -> MacAddr {
        self.current_mac
    }

    fn generate_mac<R: Rng>(&mut self, rng: &mut R) -> Result<MacAddr> {
        let mac = match self.policy {
            MacPolicy::Permanent => random_universal(rng),
            MacPolicy::FullyRandom => random_locally_administered(rng),
            MacPolicy::PreserveOui => {
                let oui = self.oui.ok_or_else(|| {
                    SimError::RuntimeInvariant(format!(
                        "device {} uses PreserveOui but no OUI was resolved for vendor '{}'",
                        self.id, self.vendor
                    ))
                })?;
                random_with_oui(oui, rng)
            }
            MacPolicy::Dedicated => {
                let mac = self.dedicated_pool[self.pool_index];
                self.pool_index = (self.pool_index + 1) % self.dedicated_pool.len();
                mac
            }
        };
        self.validate_mac(mac)?;
        Ok(mac)
    }

    fn validate_mac(&self, mac: MacAddr) -> Result<()> {
        if mac.is_multicast() {
            return Err(SimError::RuntimeInvariant(format!(
                "policy {:?} produced multicast address {mac}",
                self.policy
            )));
        }
        match self.policy {
            MacPolicy::Permanent => {}
            MacPolicy::PreserveOui => {
                if let Some(oui) = self.oui {
                    if mac.oui() != oui {
                        return Err(SimError::RuntimeInvariant(format!(
                            "PreserveOui address {mac} does not carry the vendor OUI"
                        )));
                    }
                }
            }
            MacPolicy::FullyRandom | MacPolicy::Dedicated => {
                if !mac.is_locally_administered() {
                    return Err(SimError::RuntimeInvariant(format!(
                        "policy {:?} produced universal address {mac}",
                        self.policy
                    )));
                }
            }
        }
        Ok(())
    }

    fn set_current_mac(&mut self, mac: MacAddr, now_us: u64) -> Result<()> {
        self.current_mac = mac;
        self.last_mac_change_us = now_us;
        if !self.mac_history.contains(&mac) {
            self.mac_history.push(mac);
        }
        Ok(())
    }

    /// Decide whether this burst rotates the MAC and return the address to
    /// use. Permanent devices never rotate regardless of mode.
    pub fn rotate_for_burst<R: Rng>(&mut self, now_us: u64, rng: &mut R) -> Result<MacAddr> {
        if self.policy == MacPolicy::Permanent {
            self.force_mac_change = false;
            return Ok(self.current_mac);
        }
        let due = match self.rotation_mode {
            RotationMode::PerBurst => true,
            RotationMode::PerPhase => std::mem::take(&mut self.force_mac_change),
            RotationMode::Interval => {
                let elapsed = (now_us.saturating_sub(self.last_mac_change_us)) as f64 / 1e6;
                elapsed >= self.rotation_interval_secs
            }
        };
        if due {
            let mac = self.generate_mac(rng)?;
            self.set_current_mac(mac, now_us)?;
        }
        Ok(self.current_mac)
    }

    /// Enter a new phase, arming a rotation when the mode is per-phase.
    pub fn change_phase(&mut self, phase: Phase, now_us: u64) {
        self.phase = phase;
        self.time_phase_changed_us = now_us;
        self.schedule_epoch = self.schedule_epoch.wrapping_add(1);
        if self.rotation_mode == RotationMode::PerPhase {
            self.force_mac_change = true;
        }
    }

    /// Integrate the position linearly over `dt` seconds, perturb the
    /// heading, and reflect at the arena bounds.
    pub fn update_position<R: Rng>(&mut self, dt_secs: f64, rng: &mut R) {
        if dt_secs <= 0.0 {
            return;
        }
        let heading_rad = self.heading_deg.to_radians();
        let mut x = self.position.0 + self.speed_mps * dt_secs * heading_rad.cos();
        let mut y = self.position.1 + self.speed_mps * dt_secs * heading_rad.sin();
        if x < 0.0 {
            x = -x;
            self.heading_deg = 180.0 - self.heading_deg;
        } else if x > ARENA_SIZE {
            x = 2.0 * ARENA_SIZE - x;
            self.heading_deg = 180.0 - self.heading_deg;
        }
        if y < 0.0 {
            y = -y;
            self.heading_deg = -self.heading_deg;
        } else if y > ARENA_SIZE {
            y = 2.0 * ARENA_SIZE - y;
            self.heading_deg = -self.heading_deg;
        }
        self.position = (x.clamp(0.0, ARENA_SIZE), y.clamp(0.0, ARENA_SIZE));
        self.heading_deg =
            (self.heading_deg + rng.gen_range(-10.0..10.0)).rem_euclid(360.0);
    }

    /// Distance to a fixed point in meters.
    pub fn distance_to(&self, point: (f64, f64)) -> f64 {
        let dx = self.position.0 - point.0;
        let dy = self.position.1 - point.1;
        (dx * dx + dy * dy).sqrt()
    }

    /// Starting sequence number for the next burst. The first burst of a
    /// device picks a random start leaving room for the whole burst before
    /// wrapping; later bursts continue where the previous one ended.
    pub fn next_sequence<R: Rng>(&mut self, burst_len: u16, rng: &mut R) -> u16 {
        let start = match self.sequence {
            Some(seq) => seq,
            None => rng.gen_range(0..4096u16.saturating_sub(burst_len).max(1)),
        };
        self.sequence = Some((start + burst_len) % 4096);
        start
    }

    /// Expected M/M/1 queueing delay in seconds: the queue length stands in
    /// for the arrival rate, the inverse processing delay for the service
    /// rate. An unstable queue falls back to a small constant.
    pub fn queue_delay_secs(&self) -> f64 {
        let service_rate = 1.0 / self.processing_delay_secs.max(1e-4);
        let arrival_rate = self.queue_length as f64;
        if service_rate > arrival_rate {
            1.0 / (service_rate - arrival_rate)
        } else {
            0.1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn device(policy: MacPolicy, mode: RotationMode, rng: &mut StdRng) -> Device {
        Device::new(
            0,
            0,
            Phase::Active,
            "Apple",
            "iphone11",
            policy,
            Some([0x00, 0x17, 0xf2]),
            mode,
            Some(5.0),
            rng,
        )
        .unwrap()
    }

    #[test]
    fn test_permanent_never_rotates() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut dev = device(MacPolicy::Permanent, RotationMode::PerBurst, &mut rng);
        let first = dev.current_mac();
        assert!(!first.is_locally_administered());
        for i in 0..20 {
            let mac = dev.rotate_for_burst(i * 1_000_000, &mut rng).unwrap();
            assert_eq!(mac, first);
        }
        assert_eq!(dev.mac_history.len(), 1);
    }

    #[test]
    fn test_per_burst_rotates_every_burst() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut dev = device(MacPolicy::FullyRandom, RotationMode::PerBurst, &mut rng);
        for i in 1..=10 {
            let mac = dev.rotate_for_burst(i * 1_000_000, &mut rng).unwrap();
            assert!(mac.is_locally_administered());
            assert!(!mac.is_multicast());
        }
        assert_eq!(dev.mac_history.len(), 11);
    }

    #[test]
    fn test_per_phase_rotates_on_flag() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut dev = device(MacPolicy::FullyRandom, RotationMode::PerPhase, &mut rng);
        let first = dev.current_mac();
        assert_eq!(dev.rotate_for_burst(1_000_000, &mut rng).unwrap(), first);
        dev.change_phase(Phase::Awake, 2_000_000);
        let rotated = dev.rotate_for_burst(3_000_000, &mut rng).unwrap();
        assert_ne!(rotated, first);
        // Flag cleared: next burst keeps the address.
        assert_eq!(dev.rotate_for_burst(4_000_000, &mut rng).unwrap(), rotated);
    }

    #[test]
    fn test_interval_rotation() {
        let mut rng = StdRng::seed_from_u64(6);
        let mut dev = device(MacPolicy::FullyRandom, RotationMode::Interval, &mut rng);
        let first = dev.current_mac();
        // 5 s interval configured in the fixture.
        assert_eq!(dev.rotate_for_burst(2_000_000, &mut rng).unwrap(), first);
        assert_eq!(dev.rotate_for_burst(4_900_000, &mut rng).unwrap(), first);
        let rotated = dev.rotate_for_burst(5_000_000, &mut rng).unwrap();
        assert_ne!(rotated, first);
    }

    #[test]
    fn test_preserve_oui_prefix() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut dev = device(MacPolicy::PreserveOui, RotationMode::PerBurst, &mut rng);
        for i in 0..10 {
            let mac = dev.rotate_for_burst(i * 1_000_000, &mut rng).unwrap();
            assert_eq!(mac.oui(), [0x00, 0x17, 0xf2]);
            assert!(!mac.is_locally_administered());
        }
    }

    #[test]
    fn test_dedicated_cycles_pool() {
        let mut rng = StdRng::seed_from_u64(8);
        let mut dev = device(MacPolicy::Dedicated, RotationMode::PerBurst, &mut rng);
        for i in 0..20 {
            let mac = dev.rotate_for_burst(i * 1_000_000, &mut rng).unwrap();
            assert!(mac.is_locally_administered());
        }
        assert!(dev.mac_history.len() <= DEDICATED_POOL_SIZE);
    }

    #[test]
    fn test_preserve_oui_requires_registry_hit() {
        let mut rng = StdRng::seed_from_u64(9);
        let result = Device::new(
            0,
            0,
            Phase::Active,
            "NoSuchVendor",
            "m",
            MacPolicy::PreserveOui,
            None,
            RotationMode::PerBurst,
            None,
            &mut rng,
        );
        assert!(matches!(result, Err(SimError::RuntimeInvariant(_))));
    }

    #[test]
    fn test_position_stays_in_arena() {
        let mut rng = StdRng::seed_from_u64(10);
        let mut dev = device(MacPolicy::FullyRandom, RotationMode::PerBurst, &mut rng);
        dev.speed_mps = 50.0;
        for _ in 0..1000 {
            dev.update_position(1.0, &mut rng);
            assert!(dev.position.0 >= 0.0 && dev.position.0 <= ARENA_SIZE);
            assert!(dev.position.1 >= 0.0 && dev.position.1 <= ARENA_SIZE);
        }
    }

    #[test]
    fn test_sequence_continues_across_bursts() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut dev = device(MacPolicy::FullyRandom, RotationMode::PerBurst, &mut rng);
        let first = dev.next_sequence(3, &mut rng);
        assert!(first < 4093);
        let second = dev.next_sequence(3, &mut rng);
        assert_eq!(second, (first + 3) % 4096);
    }

    #[test]
    fn test_queue_delay_bounds() {
        let mut rng = StdRng::seed_from_u64(12);
        let dev = device(MacPolicy::FullyRandom, RotationMode::PerBurst, &mut rng);
        let delay = dev.queue_delay_secs();
        assert!(delay > 0.0 && delay < 0.1);
    }
}
