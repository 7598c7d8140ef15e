//! Stochastic physical channel filter.
//!
//! Decides per-frame survival from free-space path loss, Rayleigh fast
//! fading, and log-normal shadowing, and assigns capture RSSI to the
//! frames that make it through.

use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// Environment class selecting shadowing depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Indoor,
    Urban,
    Rural,
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Urban
    }
}

impl Environment {
    /// Log-normal shadowing standard deviation in dB.
    pub fn shadowing_sigma_db(self) -> f64 {
        match self {
            Environment::Indoor => 4.0,
            Environment::Urban => 3.0,
            Environment::Rural => 2.0,
        }
    }

    pub fn noise_floor_dbm(self) -> f64 {
        -90.0
    }
}

/// Rayleigh fast-fade scale in dB.
const RAYLEIGH_SCALE_DB: f64 = 2.0;

/// Required SNR margin above the noise floor in dB.
const SNR_MARGIN_DB: f64 = 10.0;

/// Free-space path loss in dB for a distance in meters and frequency in
/// MHz. Distances below one meter are clamped so the logarithm stays
/// finite.
pub fn free_space_path_loss_db(distance_m: f64, frequency_mhz: f64) -> f64 {
    let d = distance_m.max(1.0);
    20.0 * d.log10() + 20.0 * frequency_mhz.log10() - 27.55
}

/// Channel filter parameters. One instance is shared across the run; all
/// randomness comes from the caller's RNG stream.
#[derive(Debug, Clone)]
pub struct ChannelFilter {
    pub tx_power_dbm: f64,
    pub frequency_mhz: f64,
    pub environment: Environment,
}

impl Default for ChannelFilter {
    fn default() -> Self {
        Self {
            tx_power_dbm: 20.0,
            frequency_mhz: 2400.0,
            environment: Environment::default(),
        }
    }
}

impl ChannelFilter {
    pub fn new(tx_power_dbm: f64, frequency_mhz: f64, environment: Environment) -> Self {
        Self {
            tx_power_dbm,
            frequency_mhz,
            environment,
        }
    }

    /// Rayleigh sample as additional loss in dB: magnitude of two
    /// independent zero-mean Gaussians.
    fn rayleigh_fading_db<R: Rng>(&self, rng: &mut R) -> f64 {
        let normal = Normal::new(0.0, RAYLEIGH_SCALE_DB).expect("valid sigma");
        let x = normal.sample(rng);
        let y = normal.sample(rng);
        (x * x + y * y).sqrt()
    }

    /// Received power before the environment factor is applied.
    pub fn received_power_dbm<R: Rng>(&self, distance_m: f64, rng: &mut R) -> f64 {
        let path_loss = free_space_path_loss_db(distance_m, self.frequency_mhz);
        let fading = self.rayleigh_fading_db(rng);
        let shadow = Normal::new(0.0, self.environment.shadowing_sigma_db())
            .expect("valid sigma")
            .sample(rng);
        self.tx_power_dbm - path_loss - fading + shadow
    }

    /// Whether a frame at `distance_m` survives the channel. The external
    /// environment factor scales the received power before the threshold
    /// comparison.
    pub fn simulate<R: Rng>(&self, distance_m: f64, env_factor: f64, rng: &mut R) -> bool {
        let received = self.received_power_dbm(distance_m, rng) * env_factor;
        received > self.environment.noise_floor_dbm() + SNR_MARGIN_DB
    }

    /// Capture RSSI assigned to surviving frames: uniform in -90..-40 dBm.
    pub fn capture_rssi<R: Rng>(&self, rng: &mut R) -> i8 {
        -(rng.gen_range(40..=90) as i8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_fspl_reference_values() {
        // 1 m at 2400 MHz: 20*log10(2400) - 27.55 ≈ 40.05 dB
        let loss = free_space_path_loss_db(1.0, 2400.0);
        assert!((loss - 40.05).abs() < 0.1, "got {loss}");
        // Doubling distance adds ~6 dB.
        let far = free_space_path_loss_db(2.0, 2400.0);
        assert!((far - loss - 6.02).abs() < 0.1);
    }

    #[test]
    fn test_zero_distance_clamped() {
        let loss = free_space_path_loss_db(0.0, 2400.0);
        assert!(loss.is_finite());
        assert_eq!(loss, free_space_path_loss_db(1.0, 2400.0));
    }

    #[test]
    fn test_close_range_mostly_survives() {
        let filter = ChannelFilter::default();
        let mut rng = StdRng::seed_from_u64(1);
        let survived = (0..1000)
            .filter(|_| filter.simulate(5.0, 1.0, &mut rng))
            .count();
        assert!(survived > 950, "survived {survived}/1000");
    }

    #[test]
    fn test_extreme_range_mostly_drops() {
        let filter = ChannelFilter::default();
        let mut rng = StdRng::seed_from_u64(2);
        let survived = (0..1000)
            .filter(|_| filter.simulate(100_000.0, 1.0, &mut rng))
            .count();
        assert!(survived < 50, "survived {survived}/1000");
    }

    #[test]
    fn test_capture_rssi_range() {
        let filter = ChannelFilter::default();
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..1000 {
            let rssi = filter.capture_rssi(&mut rng);
            assert!((-90..=-40).contains(&(rssi as i32)));
        }
    }
}
