//! Quality metrics over a `(timestamp, source MAC)` probe sequence.
//!
//! The sequence is split into fixed-length segments; MCR, NUMR, MCIV, MAE
//! and the mean inter-frame gap are computed per segment and aggregated by
//! median for robustness against outlier windows.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::frame::ieee80211::MacAddr;
use crate::output;

/// Aggregated metrics for one capture or sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// MAC change rate: adjacent-pair source changes per second.
    #[serde(rename = "MCR")]
    pub mcr: f64,
    /// Distinct MACs over total frames.
    #[serde(rename = "NUMR")]
    pub numr: f64,
    /// Variance of the gaps between consecutive MAC-change events.
    #[serde(rename = "MCIV")]
    pub mciv: f64,
    /// Normalized Shannon entropy of the MAC frequency distribution; zero
    /// when only one distinct address appears.
    #[serde(rename = "MAE")]
    pub mae: f64,
    /// Mean inter-frame gap in seconds.
    #[serde(rename = "T")]
    pub mean_gap: f64,
}

fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).expect("finite metric values"));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        values[mid]
    } else {
        (values[mid - 1] + values[mid]) / 2.0
    }
}

/// Metrics of a single segment. `segment_secs` is the normalization window
/// for the change rate.
pub fn segment_metrics(samples: &[(f64, MacAddr)], segment_secs: f64) -> Metrics {
    if samples.is_empty() {
        return Metrics::default();
    }

    let mut changes = 0u64;
    let mut change_times = Vec::new();
    for pair in samples.windows(2) {
        if pair[0].1 != pair[1].1 {
            changes += 1;
            change_times.push(pair[1].0);
        }
    }
    let mcr = changes as f64 / segment_secs.max(f64::MIN_POSITIVE);

    let mut counts: HashMap<MacAddr, u64> = HashMap::new();
    for &(_, mac) in samples {
        *counts.entry(mac).or_insert(0) += 1;
    }
    let numr = counts.len() as f64 / samples.len() as f64;

    let mciv = if change_times.len() >= 2 {
        let gaps: Vec<f64> = change_times.windows(2).map(|w| w[1] - w[0]).collect();
        let mean = gaps.iter().sum::<f64>() / gaps.len() as f64;
        gaps.iter().map(|g| (g - mean).powi(2)).sum::<f64>() / gaps.len() as f64
    } else {
        0.0
    };

    // A single distinct address carries no entropy.
    let mae = if counts.len() > 1 {
        let total = samples.len() as f64;
        let entropy: f64 = counts
            .values()
            .map(|&c| {
                let p = c as f64 / total;
                -p * p.ln()
            })
            .sum();
        entropy / (counts.len() as f64).ln()
    } else {
        0.0
    };

    let mean_gap = if samples.len() >= 2 {
        let span = samples[samples.len() - 1].0 - samples[0].0;
        span / (samples.len() - 1) as f64
    } else {
        0.0
    };

    Metrics {
        mcr,
        numr,
        mciv,
        mae,
        mean_gap,
    }
}

/// Partition the sequence into `floor(T/S)` segments of `segment_secs` and
/// aggregate per-segment metrics by median. A sequence shorter than one
/// full segment is evaluated as a single segment.
pub fn compute(samples: &[(f64, MacAddr)], segment_secs: f64) -> Metrics {
    if samples.is_empty() || segment_secs <= 0.0 {
        return Metrics::default();
    }
    let t0 = samples[0].0;
    let span = samples[samples.len() - 1].0 - t0;
    let segment_count = ((span / segment_secs).floor() as usize).max(1);

    let mut segments: Vec<Vec<(f64, MacAddr)>> = vec![Vec::new(); segment_count];
    for &(ts, mac) in samples {
        let idx = (((ts - t0) / segment_secs) as usize).min(segment_count - 1);
        segments[idx].push((ts, mac));
    }

    let per_segment: Vec<Metrics> = segments
        .iter()
        .filter(|s| !s.is_empty())
        .map(|s| segment_metrics(s, segment_secs))
        .collect();
    if per_segment.is_empty() {
        return Metrics::default();
    }

    let mut pick = |f: fn(&Metrics) -> f64| {
        let mut values: Vec<f64> = per_segment.iter().map(f).collect();
        median(&mut values)
    };
    Metrics {
        mcr: pick(|m| m.mcr),
        numr: pick(|m| m.numr),
        mciv: pick(|m| m.mciv),
        mae: pick(|m| m.mae),
        mean_gap: pick(|m| m.mean_gap),
    }
}

/// Extract metrics from an emitted capture file.
pub fn from_capture<P: AsRef<Path>>(path: P, segment_secs: f64) -> Result<Metrics> {
    let sequence = output::read_probe_sequence(path)?;
    Ok(compute(&sequence, segment_secs))
}

/// Extract metrics from a probe-id mapping file.
pub fn from_mapping<P: AsRef<Path>>(path: P, segment_secs: f64) -> Result<Metrics> {
    let sequence = output::read_mapping_sequence(path)?;
    Ok(compute(&sequence, segment_secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(tail: u8) -> MacAddr {
        MacAddr::new([0x02, 0, 0, 0, 0, tail])
    }

    #[test]
    fn test_empty_sequence() {
        assert_eq!(compute(&[], 60.0), Metrics::default());
    }

    #[test]
    fn test_single_mac_metrics() {
        let samples: Vec<(f64, MacAddr)> =
            (0..10).map(|i| (i as f64, mac(1))).collect();
        let m = segment_metrics(&samples, 10.0);
        assert_eq!(m.mcr, 0.0);
        assert!((m.numr - 0.1).abs() < 1e-12);
        assert_eq!(m.mciv, 0.0);
        assert_eq!(m.mae, 0.0);
        assert!((m.mean_gap - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_alternating_macs() {
        // Change on every adjacent pair.
        let samples: Vec<(f64, MacAddr)> =
            (0..10).map(|i| (i as f64, mac(i as u8 % 2))).collect();
        let m = segment_metrics(&samples, 10.0);
        assert!((m.mcr - 0.9).abs() < 1e-12); // 9 changes / 10 s
        assert!((m.numr - 0.2).abs() < 1e-12);
        // Change gaps are all exactly 1 s.
        assert!(m.mciv.abs() < 1e-12);
        // Two equally likely MACs: maximal entropy.
        assert!((m.mae - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_mciv_nonzero_for_irregular_changes() {
        let samples = vec![
            (0.0, mac(1)),
            (1.0, mac(2)),  // change at t=1
            (2.0, mac(2)),
            (3.0, mac(3)),  // change at t=3, gap 2
            (3.5, mac(4)),  // change at t=3.5, gap 0.5
        ];
        let m = segment_metrics(&samples, 10.0);
        assert!(m.mciv > 0.0);
    }

    #[test]
    fn test_fewer_than_two_changes_gives_zero_mciv() {
        let samples = vec![(0.0, mac(1)), (1.0, mac(2)), (2.0, mac(2))];
        let m = segment_metrics(&samples, 10.0);
        assert_eq!(m.mciv, 0.0);
    }

    #[test]
    fn test_segmented_median() {
        // Two 10 s segments: one with changes, one without.
        let mut samples = Vec::new();
        for i in 0..10 {
            samples.push((i as f64, mac(i as u8)));
        }
        for i in 0..=10 {
            samples.push((10.0 + i as f64, mac(100)));
        }
        let m = compute(&samples, 10.0);
        // Median over {0.9, 0.0} changes/s.
        assert!((m.mcr - 0.45).abs() < 1e-9);
    }

    #[test]
    fn test_short_sequence_single_segment() {
        let samples = vec![(0.0, mac(1)), (1.0, mac(2))];
        let m = compute(&samples, 3600.0);
        assert!((m.mcr - 1.0 / 3600.0).abs() < 1e-12);
    }
}
