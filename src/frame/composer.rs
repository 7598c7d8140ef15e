//! Probe Request burst composition.
//!
//! Assembles RadioTap + 802.11 management header + information elements
//! into byte-exact frames. A burst shares one source MAC and one SSID
//! choice; sequence numbers increment across the burst modulo 4096 and
//! per-frame timestamps are spaced by the intra-burst interval plus
//! accumulated jitter.

use rand::Rng;

use crate::device::Device;
use crate::dist::DiscreteDistribution;
use crate::error::{Result, SimError};
use crate::frame::ieee80211::{build_probe_request_header, MacAddr};
use crate::frame::ies;
use crate::frame::radiotap::build_radiotap;
use crate::store::HardwareProfile;

/// One composed frame with its intended wire timestamp.
#[derive(Debug, Clone)]
pub struct ComposedFrame {
    pub timestamp_us: u64,
    pub bytes: Vec<u8>,
}

/// Burst-level composition parameters.
#[derive(Debug, Clone)]
pub struct BurstSpec<'a> {
    /// Absolute timestamp of the first frame in microseconds.
    pub start_us: u64,
    pub burst_len: u16,
    pub intra_burst_secs: f64,
    pub jitter: &'a DiscreteDistribution,
    pub channel: u8,
}

/// Compose a burst of Probe Requests for `device`. The only device state
/// mutated here is the sequence counter; MAC rotation is decided by the
/// caller beforehand.
pub fn compose_burst<R: Rng>(
    device: &mut Device,
    hardware: &HardwareProfile,
    spec: &BurstSpec<'_>,
    rng: &mut R,
) -> Result<(MacAddr, Vec<ComposedFrame>)> {
    if spec.burst_len == 0 || spec.burst_len as u32 >= 4096 {
        return Err(SimError::RuntimeInvariant(format!(
            "burst length {} outside 1..4096",
            spec.burst_len
        )));
    }

    let mac = device.current_mac();
    let seq_start = device.next_sequence(spec.burst_len, rng);

    // One SSID choice per burst, wildcard when the device has none.
    let ssid = if device.ssids.is_empty() {
        String::new()
    } else {
        device.ssids[rng.gen_range(0..device.ssids.len())].clone()
    };

    let rates = ies::parse_rate_values(&hardware.supported_rates);
    let ext_rates = ies::parse_rate_values(&hardware.ext_supported_rates);
    let vendor_oui = device.oui.unwrap_or([0, 0, 0]);

    let mut body = Vec::with_capacity(128);
    ies::push_ssid(&mut body, &ssid);
    ies::push_supported_rates(&mut body, &rates);
    if !ext_rates.is_empty() {
        ies::push_ext_supported_rates(&mut body, &ext_rates);
    }
    ies::push_dsss_parameter(&mut body, spec.channel);
    ies::push_ht_capabilities(&mut body, &hardware.ht_capabilities);
    if let Some(vht) = &hardware.vht_capabilities {
        ies::push_vht_capabilities(&mut body, vht);
    }
    ies::push_ext_capabilities(&mut body, &hardware.extended_capabilities);
    ies::push_vendor_specific(&mut body, vendor_oui);
    if let (Some(wps), Some(uuide)) = (device.wps, device.uuide) {
        ies::push_wps_element(&mut body, &wps);
        ies::push_wps_element(&mut body, &uuide);
    }

    let mut frames = Vec::with_capacity(spec.burst_len as usize);
    let mut jitter_acc_us: u64 = 0;
    for i in 0..spec.burst_len {
        jitter_acc_us += (spec.jitter.sample(rng) * 1e6) as u64;
        let timestamp_us = spec.start_us
            + (i as f64 * spec.intra_burst_secs * 1e6) as u64
            + jitter_acc_us;
        let seq = (seq_start + i) % 4096;
        let signal_dbm = -(rng.gen_range(30..=70) as i8);

        let radiotap = build_radiotap(timestamp_us, spec.channel, signal_dbm)?;
        let mut bytes = Vec::with_capacity(radiotap.len() + 24 + body.len());
        bytes.extend_from_slice(&radiotap);
        bytes.extend_from_slice(&build_probe_request_header(mac, seq));
        bytes.extend_from_slice(&body);
        frames.push(ComposedFrame {
            timestamp_us,
            bytes,
        });
    }

    Ok((mac, frames))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ieee80211::parse_probe_request;
    use crate::frame::ies::ElementId;
    use crate::frame::radiotap::parse_radiotap;
    use crate::store::{MacPolicy, ParameterStore, Phase};
    use crate::device::RotationMode;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const HW: &str = "\
Apple,iphone11,3:1.0,2,b071820f,0000088001400040,6f0017ffffff0000,2:0.5/4:0.5,48:0.6/96:0.4
";
    const BEHAVIOR: &str = "\
iphone11,0,0.02:1.0,2.0:1.0,30:1.0,0.0:1.0
iphone11,1,0.02:1.0,2.0:1.0,30:1.0,0.0:1.0
iphone11,2,0.02:1.0,2.0:1.0,30:1.0,0.0:1.0
";

    fn fixture() -> (Device, ParameterStore, StdRng) {
        let mut rng = StdRng::seed_from_u64(21);
        let store = ParameterStore::parse(HW, BEHAVIOR).unwrap();
        let device = Device::new(
            0,
            0,
            Phase::Active,
            "Apple",
            "iphone11",
            MacPolicy::PreserveOui,
            Some([0x00, 0x17, 0xf2]),
            RotationMode::PerBurst,
            None,
            &mut rng,
        )
        .unwrap();
        (device, store, rng)
    }

    #[test]
    fn test_burst_shape_and_sequence() {
        let (mut device, store, mut rng) = fixture();
        let hw = store.hardware("iphone11").unwrap();
        let jitter = DiscreteDistribution::single(0.0);
        let spec = BurstSpec {
            start_us: 1_000_000,
            burst_len: 3,
            intra_burst_secs: 0.02,
            jitter: &jitter,
            channel: 6,
        };
        let (mac, frames) = compose_burst(&mut device, hw, &spec, &mut rng).unwrap();
        assert_eq!(frames.len(), 3);

        let mut prev_seq = None;
        let mut prev_ts = 0;
        for frame in &frames {
            let (info, offset) = parse_radiotap(&frame.bytes).unwrap();
            assert_eq!(info.tsft, Some(frame.timestamp_us));
            assert_eq!(info.channel(), Some(6));

            let parsed = parse_probe_request(&frame.bytes[offset..]).unwrap();
            assert_eq!(parsed.source, mac);
            assert!(parsed.addr1.is_broadcast());
            assert!(parsed.addr3.is_broadcast());
            assert_eq!(parsed.fragment, 0);
            assert_eq!(parsed.channel, Some(6));
            if let Some(prev) = prev_seq {
                assert_eq!(parsed.sequence, (prev + 1) % 4096);
            }
            prev_seq = Some(parsed.sequence);
            assert!(frame.timestamp_us >= prev_ts);
            prev_ts = frame.timestamp_us;
        }
        // 20 ms spacing with zero jitter.
        assert_eq!(frames[1].timestamp_us - frames[0].timestamp_us, 20_000);
    }

    #[test]
    fn test_ie_sequence() {
        let (mut device, store, mut rng) = fixture();
        device.wps = Some([1, 2, 3, 4]);
        device.uuide = Some([5, 6, 7, 8]);
        let hw = store.hardware("iphone11").unwrap();
        let jitter = DiscreteDistribution::single(0.0);
        let spec = BurstSpec {
            start_us: 0,
            burst_len: 1,
            intra_burst_secs: 0.02,
            jitter: &jitter,
            channel: 1,
        };
        let (_, frames) = compose_burst(&mut device, hw, &spec, &mut rng).unwrap();
        let (_, offset) = parse_radiotap(&frames[0].bytes).unwrap();
        let parsed = parse_probe_request(&frames[0].bytes[offset..]).unwrap();

        let ids: Vec<u8> = parsed.ies.iter().map(|ie| ie.raw_id).collect();
        // SSID, rates, ext rates, DSSS, HT, VHT, ext caps, vendor, WPS, UUID-E.
        assert_eq!(ids, vec![0, 1, 50, 3, 45, 191, 127, 221, 221, 221]);
        assert_eq!(parsed.rates, vec![2, 4, 48, 96]);

        let vht = parsed
            .ies
            .iter()
            .find(|ie| ie.id == ElementId::VhtCapabilities)
            .unwrap();
        assert_eq!(vht.data, vec![0xb0, 0x71, 0x82, 0x0f]);
    }

    #[test]
    fn test_vht_omitted_when_not_declared() {
        let (mut device, store, mut rng) = fixture();
        let mut hw = store.hardware("iphone11").unwrap().clone();
        hw.vht_capabilities = None;
        let jitter = DiscreteDistribution::single(0.0);
        let spec = BurstSpec {
            start_us: 0,
            burst_len: 1,
            intra_burst_secs: 0.02,
            jitter: &jitter,
            channel: 11,
        };
        let (_, frames) = compose_burst(&mut device, &hw, &spec, &mut rng).unwrap();
        let (_, offset) = parse_radiotap(&frames[0].bytes).unwrap();
        let parsed = parse_probe_request(&frames[0].bytes[offset..]).unwrap();
        assert!(parsed
            .ies
            .iter()
            .all(|ie| ie.id != ElementId::VhtCapabilities));
    }

    #[test]
    fn test_invalid_channel_rejected() {
        let (mut device, store, mut rng) = fixture();
        let hw = store.hardware("iphone11").unwrap();
        let jitter = DiscreteDistribution::single(0.0);
        let spec = BurstSpec {
            start_us: 0,
            burst_len: 1,
            intra_burst_secs: 0.02,
            jitter: &jitter,
            channel: 15,
        };
        assert!(compose_burst(&mut device, hw, &spec, &mut rng).is_err());
    }
}
