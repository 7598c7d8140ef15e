//! 802.11 management header construction and parsing for Probe Requests.

use super::ies::{parse_ies, ElementId, InformationElement};

/// MAC address (6 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xff, 0xff, 0xff, 0xff, 0xff, 0xff]);

    pub fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(data: &[u8]) -> Option<Self> {
        if data.len() >= 6 {
            let mut bytes = [0u8; 6];
            bytes.copy_from_slice(&data[..6]);
            Some(Self(bytes))
        } else {
            None
        }
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// First three octets.
    pub fn oui(&self) -> [u8; 3] {
        [self.0[0], self.0[1], self.0[2]]
    }

    pub fn is_broadcast(&self) -> bool {
        self.0 == [0xff; 6]
    }

    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    pub fn is_locally_administered(&self) -> bool {
        self.0[0] & 0x02 != 0
    }
}

impl std::fmt::Display for MacAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl std::str::FromStr for MacAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut count = 0;
        for part in s.split(':') {
            if count >= 6 {
                return Err(format!("mac address '{s}' has too many octets"));
            }
            bytes[count] = u8::from_str_radix(part, 16)
                .map_err(|_| format!("bad octet '{part}' in mac address '{s}'"))?;
            count += 1;
        }
        if count != 6 {
            return Err(format!("mac address '{s}' has {count} octets"));
        }
        Ok(Self(bytes))
    }
}

pub const FRAME_TYPE_MANAGEMENT: u8 = 0;
pub const SUBTYPE_PROBE_REQUEST: u8 = 4;

/// Management header length: frame control, duration, three addresses,
/// sequence control.
pub const MGMT_HEADER_LEN: usize = 24;

/// Pack the sequence-control field.
pub fn sequence_control(seq: u16, frag: u8) -> u16 {
    (seq << 4) | (frag as u16 & 0x0f)
}

/// Build the 24-byte Probe Request management header: addr1 and addr3 are
/// the broadcast address, addr2 the current source MAC, fragment 0.
pub fn build_probe_request_header(source: MacAddr, seq: u16) -> [u8; MGMT_HEADER_LEN] {
    let mut buf = [0u8; MGMT_HEADER_LEN];
    buf[0] = (SUBTYPE_PROBE_REQUEST << 4) | (FRAME_TYPE_MANAGEMENT << 2);
    // buf[1] (flags) and buf[2..4] (duration) stay zero.
    buf[4..10].copy_from_slice(MacAddr::BROADCAST.as_bytes());
    buf[10..16].copy_from_slice(source.as_bytes());
    buf[16..22].copy_from_slice(MacAddr::BROADCAST.as_bytes());
    buf[22..24].copy_from_slice(&sequence_control(seq % 4096, 0).to_le_bytes());
    buf
}

/// A Probe Request parsed back from raw 802.11 bytes (without radiotap).
#[derive(Debug, Clone)]
pub struct ParsedProbeRequest {
    pub addr1: MacAddr,
    pub source: MacAddr,
    pub addr3: MacAddr,
    pub sequence: u16,
    pub fragment: u8,
    pub ssid: String,
    pub rates: Vec<u8>,
    pub channel: Option<u8>,
    pub ies: Vec<InformationElement>,
}

/// Parse an 802.11 frame, returning `Some` only for Probe Requests.
pub fn parse_probe_request(data: &[u8]) -> Option<ParsedProbeRequest> {
    if data.len() < MGMT_HEADER_LEN {
        return None;
    }
    let fc0 = data[0];
    let frame_type = (fc0 >> 2) & 0x03;
    let subtype = (fc0 >> 4) & 0x0f;
    if frame_type != FRAME_TYPE_MANAGEMENT || subtype != SUBTYPE_PROBE_REQUEST {
        return None;
    }

    let addr1 = MacAddr::from_slice(&data[4..])?;
    let source = MacAddr::from_slice(&data[10..])?;
    let addr3 = MacAddr::from_slice(&data[16..])?;
    let seq_control = u16::from_le_bytes([data[22], data[23]]);

    let ies = parse_ies(&data[MGMT_HEADER_LEN..]);
    let mut ssid = String::new();
    let mut rates = Vec::new();
    let mut channel = None;
    for ie in &ies {
        match ie.id {
            ElementId::Ssid => {
                ssid = String::from_utf8_lossy(&ie.data).to_string();
            }
            ElementId::SupportedRates | ElementId::ExtendedSupportedRates => {
                rates.extend(&ie.data);
            }
            ElementId::DsParameter if !ie.data.is_empty() => {
                channel = Some(ie.data[0]);
            }
            _ => {}
        }
    }

    Some(ParsedProbeRequest {
        addr1,
        source,
        addr3,
        sequence: seq_control >> 4,
        fragment: (seq_control & 0x0f) as u8,
        ssid,
        rates,
        channel,
        ies,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_addr_display_parse() {
        let mac: MacAddr = "02:1a:2b:3c:4d:5e".parse().unwrap();
        assert_eq!(mac.to_string(), "02:1a:2b:3c:4d:5e");
        assert!(mac.is_locally_administered());
        assert!(!mac.is_multicast());
        assert_eq!(mac.oui(), [0x02, 0x1a, 0x2b]);
        assert!("02:1a:2b".parse::<MacAddr>().is_err());
        assert!("zz:1a:2b:3c:4d:5e".parse::<MacAddr>().is_err());
    }

    #[test]
    fn test_sequence_control_packing() {
        assert_eq!(sequence_control(0, 0), 0);
        assert_eq!(sequence_control(1, 0), 0x10);
        assert_eq!(sequence_control(4095, 0), 0xfff0);
        assert_eq!(sequence_control(10, 3), 0xa3);
    }

    #[test]
    fn test_header_build_parse() {
        let src: MacAddr = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        let header = build_probe_request_header(src, 1234);
        let parsed = parse_probe_request(&header).unwrap();
        assert_eq!(parsed.source, src);
        assert!(parsed.addr1.is_broadcast());
        assert!(parsed.addr3.is_broadcast());
        assert_eq!(parsed.sequence, 1234);
        assert_eq!(parsed.fragment, 0);
        assert!(parsed.ies.is_empty());
    }

    #[test]
    fn test_non_probe_frames_rejected() {
        let src: MacAddr = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        let mut header = build_probe_request_header(src, 1);
        header[0] = 0x80; // beacon
        assert!(parse_probe_request(&header).is_none());
        assert!(parse_probe_request(&[0u8; 10]).is_none());
    }
}
