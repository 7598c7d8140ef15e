//! Run output writers: pcap capture, text log, probe-id mapping, device
//! CSV, and the stats JSON summary.
//!
//! The capture uses standard PCAP with link-layer type IEEE 802.11 plus
//! RadioTap (DLT 127) and microsecond timestamps. All writers are owned by
//! the engine and written in event-dispatch order.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use pcap::{Capture, Linktype, Packet, PacketHeader, Savefile};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::frame::ieee80211::MacAddr;
use crate::frame::parse_probe_request;
use crate::frame::radiotap::parse_radiotap;

/// DLT for 802.11 frames with a RadioTap header.
pub const LINKTYPE_IEEE802_11_RADIOTAP: i32 = 127;

/// Output file paths derived from a common base.
#[derive(Debug, Clone)]
pub struct RunPaths {
    base: PathBuf,
}

impl RunPaths {
    pub fn new<P: AsRef<Path>>(base: P) -> Self {
        Self {
            base: base.as_ref().to_path_buf(),
        }
    }

    fn with_suffix(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .base
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "out".to_string());
        name.push_str(suffix);
        self.base.with_file_name(name)
    }

    pub fn capture(&self) -> PathBuf {
        self.with_suffix(".pcap")
    }

    pub fn log(&self) -> PathBuf {
        self.with_suffix(".log")
    }

    pub fn probe_ids(&self) -> PathBuf {
        self.with_suffix("_probe_ids.txt")
    }

    pub fn devices_csv(&self) -> PathBuf {
        self.with_suffix("_devices.csv")
    }

    pub fn stats_json(&self) -> PathBuf {
        self.with_suffix("_stats.json")
    }
}

/// Appends frames to a pcap savefile opened on a dead capture handle.
pub struct CaptureWriter {
    savefile: Savefile,
    /// Unix epoch of simulation time zero, in microseconds.
    epoch_us: u64,
}

impl CaptureWriter {
    pub fn create<P: AsRef<Path>>(path: P, epoch_us: u64) -> Result<Self> {
        let cap = Capture::dead(Linktype(LINKTYPE_IEEE802_11_RADIOTAP))?;
        let savefile = cap.savefile(path.as_ref())?;
        Ok(Self { savefile, epoch_us })
    }

    /// Write one frame at the given simulation time.
    pub fn write(&mut self, time_us: u64, frame: &[u8]) {
        let abs_us = self.epoch_us + time_us;
        let header = PacketHeader {
            ts: libc::timeval {
                tv_sec: (abs_us / 1_000_000) as libc::time_t,
                tv_usec: (abs_us % 1_000_000) as libc::suseconds_t,
            },
            caplen: frame.len() as u32,
            len: frame.len() as u32,
        };
        self.savefile.write(&Packet::new(&header, frame));
    }

    pub fn flush(&mut self) -> Result<()> {
        self.savefile.flush()?;
        Ok(())
    }
}

/// Read the `(timestamp, source MAC)` sequence of Probe Requests back out
/// of a capture, timestamps aligned so the earliest frame is at zero.
pub fn read_probe_sequence<P: AsRef<Path>>(path: P) -> Result<Vec<(f64, MacAddr)>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(SimError::MissingResource(format!(
            "capture file {}",
            path.display()
        )));
    }
    let mut cap = Capture::from_file(path)?;
    // Microsecond integers until after alignment, so read-back timestamps
    // match the engine's internal ones bit-for-bit.
    let mut raw: Vec<(i64, MacAddr)> = Vec::new();
    while let Ok(packet) = cap.next_packet() {
        let Some((_, offset)) = parse_radiotap(packet.data) else {
            continue;
        };
        let Some(parsed) = parse_probe_request(&packet.data[offset..]) else {
            continue;
        };
        let ts_us =
            packet.header.ts.tv_sec as i64 * 1_000_000 + packet.header.ts.tv_usec as i64;
        raw.push((ts_us, parsed.source));
    }
    raw.sort_by_key(|&(ts, _)| ts);
    let t0 = raw.first().map(|&(ts, _)| ts).unwrap_or(0);
    Ok(raw
        .into_iter()
        .map(|(ts, mac)| ((ts - t0) as f64 / 1e6, mac))
        .collect())
}

/// Parse a probe-id mapping file (`timestamp\tdevice_id\tmac` per line)
/// into the same sequence shape.
pub fn read_mapping_sequence<P: AsRef<Path>>(path: P) -> Result<Vec<(f64, MacAddr)>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|_| {
        SimError::MissingResource(format!("probe-id mapping {}", path.display()))
    })?;
    let mut sequence = Vec::new();
    for line in text.lines() {
        let mut fields = line.split('\t');
        let (Some(ts), Some(_id), Some(mac)) =
            (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        let (Ok(ts), Ok(mac)) = (ts.parse::<f64>(), mac.parse::<MacAddr>()) else {
            continue;
        };
        sequence.push((ts, mac));
    }
    Ok(sequence)
}

/// Per-frame and lifecycle writers for one run.
pub struct RunWriters {
    pub capture: CaptureWriter,
    log: BufWriter<File>,
    probe_ids: BufWriter<File>,
}

impl RunWriters {
    pub fn create(paths: &RunPaths, epoch_us: u64) -> Result<Self> {
        Ok(Self {
            capture: CaptureWriter::create(paths.capture(), epoch_us)?,
            log: BufWriter::new(File::create(paths.log())?),
            probe_ids: BufWriter::new(File::create(paths.probe_ids())?),
        })
    }

    pub fn log_line(&mut self, line: &str) -> Result<()> {
        writeln!(self.log, "{line}")?;
        Ok(())
    }

    pub fn probe_id_line(&mut self, time_secs: f64, device_id: u32, mac: MacAddr) -> Result<()> {
        writeln!(self.probe_ids, "{time_secs:.6}\t{device_id}\t{mac}")?;
        Ok(())
    }

    /// Flush the text streams; used before aborting on a capture IO error
    /// and at the end of a run.
    pub fn flush_logs(&mut self) -> Result<()> {
        self.log.flush()?;
        self.probe_ids.flush()?;
        Ok(())
    }
}

/// One row of the device CSV: a (device, MAC) pair in first-use order.
pub fn write_devices_csv<P: AsRef<Path>>(
    path: P,
    rows: &[(MacAddr, String, u32)],
) -> Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    writeln!(file, "mac_address,device_name,device_id")?;
    for (mac, name, id) in rows {
        writeln!(file, "{mac},{name},{id}")?;
    }
    file.flush()?;
    Ok(())
}

/// JSON summary written on clean completion of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    #[serde(rename = "MCR")]
    pub mcr: f64,
    #[serde(rename = "NUMR")]
    pub numr: f64,
    #[serde(rename = "MCIV")]
    pub mciv: f64,
    #[serde(rename = "MAE")]
    pub mae: f64,
    #[serde(rename = "T")]
    pub mean_gap: f64,
    pub total_frames: u64,
    pub distinct_macs: u64,
    pub device_count: u64,
    pub duration_secs: f64,
}

pub fn write_stats_json<P: AsRef<Path>>(path: P, stats: &RunStats) -> Result<()> {
    let json = serde_json::to_string_pretty(stats)
        .map_err(|e| SimError::InvalidConfig(format!("stats serialization: {e}")))?;
    std::fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::composer::{compose_burst, BurstSpec};
    use crate::device::{Device, RotationMode};
    use crate::dist::DiscreteDistribution;
    use crate::store::{MacPolicy, ParameterStore, Phase};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::TempDir;

    #[test]
    fn test_paths() {
        let paths = RunPaths::new("/tmp/run_1");
        assert_eq!(paths.capture(), PathBuf::from("/tmp/run_1.pcap"));
        assert_eq!(paths.probe_ids(), PathBuf::from("/tmp/run_1_probe_ids.txt"));
        assert_eq!(paths.stats_json(), PathBuf::from("/tmp/run_1_stats.json"));
    }

    #[test]
    fn test_capture_write_read_roundtrip() {
        let dir = TempDir::new().unwrap();
        let pcap_path = dir.path().join("t.pcap");
        let mut rng = StdRng::seed_from_u64(33);

        let store = ParameterStore::parse(
            "Apple,iphone11,2:1.0,1,?,0000088001400040,6f0017ffffff0000,2:1.0,\n",
            "iphone11,0,0.02:1.0,2.0:1.0,30:1.0,0.0:1.0\n\
             iphone11,1,0.02:1.0,2.0:1.0,30:1.0,0.0:1.0\n\
             iphone11,2,0.02:1.0,2.0:1.0,30:1.0,0.0:1.0\n",
        )
        .unwrap();
        let mut device = Device::new(
            0,
            0,
            Phase::Active,
            "Apple",
            "iphone11",
            MacPolicy::FullyRandom,
            None,
            RotationMode::PerBurst,
            None,
            &mut rng,
        )
        .unwrap();
        let hw = store.hardware("iphone11").unwrap();
        let jitter = DiscreteDistribution::single(0.0);
        let spec = BurstSpec {
            start_us: 500_000,
            burst_len: 2,
            intra_burst_secs: 0.02,
            jitter: &jitter,
            channel: 6,
        };
        let (mac, frames) = compose_burst(&mut device, hw, &spec, &mut rng).unwrap();

        let epoch_us = 1_700_000_000_000_000;
        let mut writer = CaptureWriter::create(&pcap_path, epoch_us).unwrap();
        for frame in &frames {
            writer.write(frame.timestamp_us, &frame.bytes);
        }
        writer.flush().unwrap();
        drop(writer);

        let sequence = read_probe_sequence(&pcap_path).unwrap();
        assert_eq!(sequence.len(), 2);
        assert_eq!(sequence[0].1, mac);
        // Aligned to zero, 20 ms apart.
        assert!(sequence[0].0.abs() < 1e-9);
        assert!((sequence[1].0 - 0.02).abs() < 1e-6);
    }

    #[test]
    fn test_mapping_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("map.txt");
        std::fs::write(
            &path,
            "0.000000\t0\t02:aa:bb:cc:dd:ee\n1.500000\t0\t02:aa:bb:cc:dd:ff\nnot a line\n",
        )
        .unwrap();
        let seq = read_mapping_sequence(&path).unwrap();
        assert_eq!(seq.len(), 2);
        assert_eq!(seq[1].0, 1.5);
        assert_eq!(seq[1].1.to_string(), "02:aa:bb:cc:dd:ff");
    }

    #[test]
    fn test_stats_json_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stats.json");
        let stats = RunStats {
            mcr: 0.5,
            numr: 0.25,
            mciv: 1.25,
            mae: 0.9,
            mean_gap: 2.0,
            total_frames: 100,
            distinct_macs: 25,
            device_count: 3,
            duration_secs: 60.0,
        };
        write_stats_json(&path, &stats).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: RunStats = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.mcr, 0.5);
        assert!(text.contains("\"MCR\""));
    }
}
