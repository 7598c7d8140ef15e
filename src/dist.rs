//! Discrete probability distributions over non-negative values.
//!
//! Behavioral parameters (burst lengths, inter-burst intervals, dwell times,
//! jitter) are all expressed as finite `{value: probability}` maps in the
//! configuration files. Sampling draws one value by cumulative weight from a
//! shared seeded RNG stream.

use rand::Rng;

use crate::error::{Result, SimError};

/// Probabilities must sum to 1 within this tolerance before normalization.
pub const PROB_SUM_TOLERANCE: f64 = 1e-3;

/// A finite `{value: probability}` distribution, normalized on construction
/// and kept sorted by value for deterministic iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscreteDistribution {
    entries: Vec<(f64, f64)>,
}

impl DiscreteDistribution {
    /// Build from `(value, probability)` pairs. Values must be non-negative
    /// and finite; probabilities non-negative with a positive finite sum.
    /// The result is exactly normalized.
    pub fn from_pairs(pairs: &[(f64, f64)]) -> Result<Self> {
        if pairs.is_empty() {
            return Err(SimError::InvalidConfig(
                "empty distribution".to_string(),
            ));
        }
        let mut entries = Vec::with_capacity(pairs.len());
        for &(value, prob) in pairs {
            if !value.is_finite() || value < 0.0 {
                return Err(SimError::InvalidConfig(format!(
                    "distribution value {value} is not a non-negative real"
                )));
            }
            if !prob.is_finite() || prob < 0.0 {
                return Err(SimError::InvalidConfig(format!(
                    "distribution probability {prob} for value {value} is negative"
                )));
            }
            if prob > 0.0 {
                entries.push((value, prob));
            }
        }
        if entries.is_empty() {
            return Err(SimError::InvalidConfig(
                "distribution has no mass".to_string(),
            ));
        }
        let sum: f64 = entries.iter().map(|(_, p)| p).sum();
        if sum <= 0.0 || !sum.is_finite() {
            return Err(SimError::InvalidConfig(format!(
                "distribution probabilities sum to {sum}, cannot normalize"
            )));
        }
        for entry in entries.iter_mut() {
            entry.1 /= sum;
        }
        entries.sort_by(|a, b| a.0.partial_cmp(&b.0).expect("finite values"));
        Ok(Self { entries })
    }

    /// Parse the configuration syntax `value:prob/value:prob/...`.
    pub fn parse(text: &str) -> Result<Self> {
        let mut pairs = Vec::new();
        for part in text.split('/') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (value, prob) = part.split_once(':').ok_or_else(|| {
                SimError::InvalidConfig(format!(
                    "malformed distribution entry '{part}' (expected value:prob)"
                ))
            })?;
            let value: f64 = value.trim().parse().map_err(|_| {
                SimError::InvalidConfig(format!("bad distribution value '{value}'"))
            })?;
            let prob: f64 = prob.trim().parse().map_err(|_| {
                SimError::InvalidConfig(format!("bad distribution probability '{prob}'"))
            })?;
            pairs.push((value, prob));
        }
        Self::from_pairs(&pairs)
    }

    /// A distribution with all mass on a single value.
    pub fn single(value: f64) -> Self {
        Self {
            entries: vec![(value, 1.0)],
        }
    }

    /// Draw one value by cumulative weight.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> f64 {
        let draw: f64 = rng.gen();
        let mut acc = 0.0;
        for &(value, prob) in &self.entries {
            acc += prob;
            if draw < acc {
                return value;
            }
        }
        // Floating-point residue: fall through to the last entry.
        self.entries[self.entries.len() - 1].0
    }

    /// Probability-weighted mean value.
    pub fn mean(&self) -> f64 {
        self.entries.iter().map(|&(v, p)| v * p).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(f64, f64)] {
        &self.entries
    }

    /// Multiply every value by `k`. Probabilities are untouched.
    pub fn scale(&self, k: f64) -> Self {
        let entries = self.entries.iter().map(|&(v, p)| (v * k, p)).collect();
        Self { entries }
    }

    /// Mean-preserving widening (`factor > 1`) or narrowing (`factor < 1`):
    /// every value moves away from or toward the mean. Values are clamped to
    /// zero so time distributions stay non-negative.
    pub fn spread(&self, factor: f64) -> Self {
        let mean = self.mean();
        let entries = self
            .entries
            .iter()
            .map(|&(v, p)| ((mean + (v - mean) * factor).max(0.0), p))
            .collect();
        Self { entries }
    }

    /// Reshape probabilities by exponentiation (`p' = p^g`) and renormalize.
    /// `g < 1` flattens the distribution, `g > 1` sharpens it. If the mass
    /// numerically concentrates on a single value the single-entry result is
    /// kept as-is.
    pub fn gamma(&self, g: f64) -> Self {
        let mut entries: Vec<(f64, f64)> = self
            .entries
            .iter()
            .map(|&(v, p)| (v, p.powf(g)))
            .filter(|&(_, p)| p.is_finite() && p > 0.0)
            .collect();
        if entries.is_empty() {
            return self.clone();
        }
        let sum: f64 = entries.iter().map(|(_, p)| p).sum();
        if sum <= 0.0 || !sum.is_finite() {
            return self.clone();
        }
        for entry in entries.iter_mut() {
            entry.1 /= sum;
        }
        Self { entries }
    }

    /// Check the runtime invariant: probabilities in [0,1] summing to 1
    /// within [`PROB_SUM_TOLERANCE`].
    pub fn is_normalized(&self) -> bool {
        let sum: f64 = self.entries.iter().map(|(_, p)| p).sum();
        (sum - 1.0).abs() <= PROB_SUM_TOLERANCE
            && self.entries.iter().all(|&(_, p)| (0.0..=1.0).contains(&p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_parse_and_normalize() {
        let d = DiscreteDistribution::parse("2.0:0.5/3.0:0.5").unwrap();
        assert_eq!(d.len(), 2);
        assert!(d.is_normalized());
        assert!((d.mean() - 2.5).abs() < 1e-12);

        // Unnormalized input is rescaled.
        let d = DiscreteDistribution::parse("1:2/2:2").unwrap();
        assert!(d.is_normalized());
        assert!((d.mean() - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(DiscreteDistribution::parse("").is_err());
        assert!(DiscreteDistribution::parse("1.0").is_err());
        assert!(DiscreteDistribution::parse("a:b").is_err());
        assert!(DiscreteDistribution::parse("1:-0.5/2:1.5").is_err());
        assert!(DiscreteDistribution::from_pairs(&[]).is_err());
        assert!(DiscreteDistribution::from_pairs(&[(1.0, 0.0)]).is_err());
    }

    #[test]
    fn test_sample_single_value() {
        let d = DiscreteDistribution::single(2.0);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            assert_eq!(d.sample(&mut rng), 2.0);
        }
    }

    #[test]
    fn test_sample_respects_weights() {
        let d = DiscreteDistribution::parse("1:0.9/100:0.1").unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        let n = 10_000;
        let ones = (0..n).filter(|_| d.sample(&mut rng) == 1.0).count();
        let frac = ones as f64 / n as f64;
        assert!((frac - 0.9).abs() < 0.02, "got {frac}");
    }

    #[test]
    fn test_scale_roundtrip() {
        let d = DiscreteDistribution::parse("0.5:0.3/2.0:0.7").unwrap();
        for &k in &[0.1, 1.0, 3.7, 1000.0] {
            let back = d.scale(k).scale(1.0 / k);
            for (a, b) in d.entries().iter().zip(back.entries()) {
                assert!((a.0 - b.0).abs() < 1e-9);
                assert!((a.1 - b.1).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_spread_preserves_mean() {
        let d = DiscreteDistribution::parse("1:0.25/2:0.25/3:0.25/4:0.25").unwrap();
        let wide = d.spread(1.5);
        assert!((wide.mean() - d.mean()).abs() < 1e-9);
        let narrow = d.spread(0.2);
        assert!((narrow.mean() - d.mean()).abs() < 1e-9);
    }

    #[test]
    fn test_spread_clamps_at_zero() {
        let d = DiscreteDistribution::parse("0.1:0.5/10:0.5").unwrap();
        let wide = d.spread(5.0);
        assert!(wide.entries().iter().all(|&(v, _)| v >= 0.0));
    }

    #[test]
    fn test_gamma_flattens() {
        let d = DiscreteDistribution::parse("1:0.9/2:0.1").unwrap();
        let flat = d.gamma(0.01);
        assert!(flat.is_normalized());
        // Near-zero gamma pushes probabilities toward uniform.
        let probs: Vec<f64> = flat.entries().iter().map(|&(_, p)| p).collect();
        assert!((probs[0] - probs[1]).abs() < 0.05);
    }

    #[test]
    fn test_gamma_single_entry() {
        let d = DiscreteDistribution::single(3.0);
        let g = d.gamma(0.2);
        assert_eq!(g.len(), 1);
        assert!(g.is_normalized());
    }
}
