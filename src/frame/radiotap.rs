//! RadioTap header construction and parsing.
//!
//! Radiotap is the de facto metadata header for 802.11 injection and
//! monitor-mode capture. The composer emits a fixed field set
//! (TSFT, Flags, Rate, Channel, dBm antenna signal, Antenna); the parser
//! handles the same set with the standard alignment rules and backs the
//! QA re-parse path and the metrics read-back.
//!
//! Reference: https://www.radiotap.org/

use crate::error::{Result, SimError};

/// Radiotap present flags
pub mod flags {
    pub const TSFT: u32 = 1 << 0;
    pub const FLAGS: u32 = 1 << 1;
    pub const RATE: u32 = 1 << 2;
    pub const CHANNEL: u32 = 1 << 3;
    pub const DBM_ANTSIGNAL: u32 = 1 << 5;
    pub const ANTENNA: u32 = 1 << 11;
}

/// Channel flags
pub mod channel_flags {
    pub const CCK: u16 = 0x0020;
    pub const OFDM: u16 = 0x0040;
    pub const SPECTRUM_2GHZ: u16 = 0x0080;
    pub const SPECTRUM_5GHZ: u16 = 0x0100;
}

/// Data rate of 1.0 Mbps in 500 kbps units.
pub const RATE_1MBPS: u8 = 2;

/// Emitted header: 8-byte fixed part, 8-byte TSFT (8-aligned), flags, rate,
/// channel (2-aligned), antenna signal, antenna.
pub const EMITTED_HEADER_LEN: usize = 24;

/// Map a 2.4 GHz channel number to its center frequency in MHz.
/// Channels outside 1..=14 are rejected.
pub fn channel_to_frequency(channel: u8) -> Result<u16> {
    match channel {
        14 => Ok(2484),
        1..=13 => Ok(2407 + 5 * channel as u16),
        other => Err(SimError::InvalidConfig(format!(
            "channel {other} outside 1..14"
        ))),
    }
}

/// Map a frequency in MHz back to a 2.4 GHz channel number.
pub fn frequency_to_channel(freq: u16) -> Option<u8> {
    match freq {
        2484 => Some(14),
        2412..=2472 => Some(((freq - 2407) / 5) as u8),
        _ => None,
    }
}

/// Build the emitted radiotap header.
pub fn build_radiotap(tsft_us: u64, channel: u8, signal_dbm: i8) -> Result<Vec<u8>> {
    let freq = channel_to_frequency(channel)?;
    let present =
        flags::TSFT | flags::FLAGS | flags::RATE | flags::CHANNEL | flags::DBM_ANTSIGNAL
            | flags::ANTENNA;

    let mut buf = Vec::with_capacity(EMITTED_HEADER_LEN);
    buf.push(0); // version
    buf.push(0); // pad
    buf.extend_from_slice(&(EMITTED_HEADER_LEN as u16).to_le_bytes());
    buf.extend_from_slice(&present.to_le_bytes());
    buf.extend_from_slice(&tsft_us.to_le_bytes());
    buf.push(0); // frame flags
    buf.push(RATE_1MBPS);
    buf.extend_from_slice(&freq.to_le_bytes());
    buf.extend_from_slice(
        &(channel_flags::CCK | channel_flags::SPECTRUM_2GHZ).to_le_bytes(),
    );
    buf.push(signal_dbm as u8);
    buf.push(0); // antenna index
    debug_assert_eq!(buf.len(), EMITTED_HEADER_LEN);
    Ok(buf)
}

/// Fields extracted from a radiotap header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RadiotapInfo {
    /// MAC timestamp in microseconds
    pub tsft: Option<u64>,
    /// Frame flags
    pub flags: Option<u8>,
    /// Data rate in 500 kbps units
    pub rate: Option<u8>,
    /// Channel frequency in MHz
    pub channel_freq: Option<u16>,
    /// Channel flags
    pub channel_flags: Option<u16>,
    /// Signal strength in dBm
    pub signal_dbm: Option<i8>,
    /// Antenna index
    pub antenna: Option<u8>,
}

impl RadiotapInfo {
    /// Channel number derived from the frequency field.
    pub fn channel(&self) -> Option<u8> {
        self.channel_freq.and_then(frequency_to_channel)
    }
}

/// Parse a radiotap header. Returns the extracted fields and the total
/// header length (the 802.11 frame starts at that offset).
pub fn parse_radiotap(data: &[u8]) -> Option<(RadiotapInfo, usize)> {
    if data.len() < 8 {
        return None;
    }
    if data[0] != 0 {
        return None; // only version 0
    }
    let length = u16::from_le_bytes([data[2], data[3]]) as usize;
    let present = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if length < 8 || data.len() < length {
        return None;
    }

    let fields = &data[8..length];
    let mut info = RadiotapInfo::default();
    let mut pos = 0usize;

    let align = |pos: usize, to: usize| -> usize {
        if pos % to != 0 {
            pos + to - (pos % to)
        } else {
            pos
        }
    };

    if present & flags::TSFT != 0 {
        pos = align(pos, 8);
        if pos + 8 <= fields.len() {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&fields[pos..pos + 8]);
            info.tsft = Some(u64::from_le_bytes(buf));
        }
        pos += 8;
    }
    if present & flags::FLAGS != 0 {
        if pos < fields.len() {
            info.flags = Some(fields[pos]);
        }
        pos += 1;
    }
    if present & flags::RATE != 0 {
        if pos < fields.len() {
            info.rate = Some(fields[pos]);
        }
        pos += 1;
    }
    if present & flags::CHANNEL != 0 {
        pos = align(pos, 2);
        if pos + 4 <= fields.len() {
            info.channel_freq = Some(u16::from_le_bytes([fields[pos], fields[pos + 1]]));
            info.channel_flags =
                Some(u16::from_le_bytes([fields[pos + 2], fields[pos + 3]]));
        }
        pos += 4;
    }
    if present & flags::DBM_ANTSIGNAL != 0 {
        if pos < fields.len() {
            info.signal_dbm = Some(fields[pos] as i8);
        }
        pos += 1;
    }
    if present & flags::ANTENNA != 0 {
        if pos < fields.len() {
            info.antenna = Some(fields[pos]);
        }
    }

    Some((info, length))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_frequency_mapping() {
        assert_eq!(channel_to_frequency(1).unwrap(), 2412);
        assert_eq!(channel_to_frequency(6).unwrap(), 2437);
        assert_eq!(channel_to_frequency(13).unwrap(), 2472);
        assert_eq!(channel_to_frequency(14).unwrap(), 2484);
        assert!(channel_to_frequency(0).is_err());
        assert!(channel_to_frequency(15).is_err());

        assert_eq!(frequency_to_channel(2412), Some(1));
        assert_eq!(frequency_to_channel(2484), Some(14));
        assert_eq!(frequency_to_channel(5180), None);
    }

    #[test]
    fn test_build_parse_roundtrip() {
        let header = build_radiotap(1_234_567, 6, -55).unwrap();
        assert_eq!(header.len(), EMITTED_HEADER_LEN);

        let (info, len) = parse_radiotap(&header).unwrap();
        assert_eq!(len, EMITTED_HEADER_LEN);
        assert_eq!(info.tsft, Some(1_234_567));
        assert_eq!(info.rate, Some(RATE_1MBPS));
        assert_eq!(info.channel_freq, Some(2437));
        assert_eq!(
            info.channel_flags,
            Some(channel_flags::CCK | channel_flags::SPECTRUM_2GHZ)
        );
        assert_eq!(info.signal_dbm, Some(-55));
        assert_eq!(info.antenna, Some(0));
        assert_eq!(info.channel(), Some(6));
    }

    #[test]
    fn test_parse_minimal_header() {
        // version, pad, length=8, present=0
        let data = [0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00];
        let (info, len) = parse_radiotap(&data).unwrap();
        assert_eq!(len, 8);
        assert!(info.tsft.is_none());
    }

    #[test]
    fn test_parse_rejects_truncated() {
        assert!(parse_radiotap(&[0x00, 0x00]).is_none());
        // Declared length longer than the buffer.
        let data = [0x00, 0x00, 0xff, 0x00, 0x00, 0x00, 0x00, 0x00];
        assert!(parse_radiotap(&data).is_none());
    }
}
