//! Information element construction and parsing.
//!
//! A Probe Request body is a standardized sequence of type-length-value
//! information elements. Builders here produce the exact byte layout the
//! composer appends after the management header; the parser backs the QA
//! re-parse path and round-trip tests.

/// Element identifiers used in the emitted Probe Request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementId {
    Ssid,
    SupportedRates,
    DsParameter,
    HtCapabilities,
    ExtendedSupportedRates,
    ExtendedCapabilities,
    VhtCapabilities,
    VendorSpecific,
    Unknown,
}

impl From<u8> for ElementId {
    fn from(val: u8) -> Self {
        match val {
            0 => ElementId::Ssid,
            1 => ElementId::SupportedRates,
            3 => ElementId::DsParameter,
            45 => ElementId::HtCapabilities,
            50 => ElementId::ExtendedSupportedRates,
            127 => ElementId::ExtendedCapabilities,
            191 => ElementId::VhtCapabilities,
            221 => ElementId::VendorSpecific,
            _ => ElementId::Unknown,
        }
    }
}

pub const IE_SSID: u8 = 0;
pub const IE_SUPPORTED_RATES: u8 = 1;
pub const IE_DS_PARAMETER: u8 = 3;
pub const IE_HT_CAPABILITIES: u8 = 45;
pub const IE_EXT_SUPPORTED_RATES: u8 = 50;
pub const IE_EXT_CAPABILITIES: u8 = 127;
pub const IE_VHT_CAPABILITIES: u8 = 191;
pub const IE_VENDOR_SPECIFIC: u8 = 221;

/// Microsoft/WPS OUI used for the WPS and UUID-E vendor elements.
pub const WPS_OUI: [u8; 3] = [0x00, 0x50, 0xf2];
pub const WPS_OUI_TYPE: u8 = 0x04;

/// A parsed information element.
#[derive(Debug, Clone)]
pub struct InformationElement {
    pub id: ElementId,
    pub raw_id: u8,
    pub data: Vec<u8>,
}

/// Parse information elements from a management frame body.
pub fn parse_ies(data: &[u8]) -> Vec<InformationElement> {
    let mut ies = Vec::new();
    let mut pos = 0;

    while pos + 2 <= data.len() {
        let id = data[pos];
        let len = data[pos + 1] as usize;
        pos += 2;
        if pos + len > data.len() {
            break;
        }
        ies.push(InformationElement {
            id: ElementId::from(id),
            raw_id: id,
            data: data[pos..pos + len].to_vec(),
        });
        pos += len;
    }

    ies
}

/// Append one type-length-value element. Data longer than 255 bytes is
/// truncated to the field limit.
pub fn push_ie(buf: &mut Vec<u8>, id: u8, data: &[u8]) {
    let len = data.len().min(255);
    buf.push(id);
    buf.push(len as u8);
    buf.extend_from_slice(&data[..len]);
}

/// SSID element: empty body for a wildcard probe.
pub fn push_ssid(buf: &mut Vec<u8>, ssid: &str) {
    push_ie(buf, IE_SSID, ssid.as_bytes());
}

pub fn push_supported_rates(buf: &mut Vec<u8>, rates: &[u8]) {
    push_ie(buf, IE_SUPPORTED_RATES, rates);
}

pub fn push_ext_supported_rates(buf: &mut Vec<u8>, rates: &[u8]) {
    push_ie(buf, IE_EXT_SUPPORTED_RATES, rates);
}

pub fn push_dsss_parameter(buf: &mut Vec<u8>, channel: u8) {
    push_ie(buf, IE_DS_PARAMETER, &[channel]);
}

pub fn push_ht_capabilities(buf: &mut Vec<u8>, caps: &[u8]) {
    push_ie(buf, IE_HT_CAPABILITIES, caps);
}

pub fn push_vht_capabilities(buf: &mut Vec<u8>, caps: &[u8]) {
    push_ie(buf, IE_VHT_CAPABILITIES, caps);
}

pub fn push_ext_capabilities(buf: &mut Vec<u8>, caps: &[u8]) {
    push_ie(buf, IE_EXT_CAPABILITIES, caps);
}

/// Vendor-specific element identifying the vendor OUI, with four zero
/// payload bytes.
pub fn push_vendor_specific(buf: &mut Vec<u8>, oui: [u8; 3]) {
    let mut data = Vec::with_capacity(7);
    data.extend_from_slice(&oui);
    data.extend_from_slice(&[0, 0, 0, 0]);
    push_ie(buf, IE_VENDOR_SPECIFIC, &data);
}

/// WPS-style vendor element: WPS OUI, type byte, opaque payload. Used for
/// both the WPS and the UUID-E blobs.
pub fn push_wps_element(buf: &mut Vec<u8>, payload: &[u8]) {
    let mut data = Vec::with_capacity(4 + payload.len());
    data.extend_from_slice(&WPS_OUI);
    data.push(WPS_OUI_TYPE);
    data.extend_from_slice(payload);
    push_ie(buf, IE_VENDOR_SPECIFIC, &data);
}

/// Parse a configuration rate string `"r1:p1/r2:p2/..."` into the rate
/// byte sequence (500 kbps units). Probabilities are analysis metadata and
/// are ignored here; every value is emitted verbatim, with no basic-rate
/// marking applied. Malformed entries are skipped.
pub fn parse_rate_values(rates_str: &str) -> Vec<u8> {
    let mut rates = Vec::new();
    for pair in rates_str.split('/') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let value = match pair.split_once(':') {
            Some((rate, _)) => rate.trim(),
            None => pair,
        };
        if let Ok(rate) = value.parse::<u8>() {
            rates.push(rate);
        }
    }
    rates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_parse_roundtrip() {
        let mut buf = Vec::new();
        push_ssid(&mut buf, "HomeNet");
        push_supported_rates(&mut buf, &[2, 4, 11, 22]);
        push_dsss_parameter(&mut buf, 6);
        push_vendor_specific(&mut buf, [0x00, 0x17, 0xf2]);

        let ies = parse_ies(&buf);
        assert_eq!(ies.len(), 4);
        assert_eq!(ies[0].id, ElementId::Ssid);
        assert_eq!(ies[0].data, b"HomeNet");
        assert_eq!(ies[1].data, vec![2, 4, 11, 22]);
        assert_eq!(ies[2].data, vec![6]);
        assert_eq!(ies[3].raw_id, IE_VENDOR_SPECIFIC);
        assert_eq!(&ies[3].data[..3], &[0x00, 0x17, 0xf2]);
    }

    #[test]
    fn test_wildcard_ssid() {
        let mut buf = Vec::new();
        push_ssid(&mut buf, "");
        assert_eq!(buf, vec![IE_SSID, 0]);
        let ies = parse_ies(&buf);
        assert_eq!(ies.len(), 1);
        assert!(ies[0].data.is_empty());
    }

    #[test]
    fn test_parse_rate_values() {
        assert_eq!(parse_rate_values("6:0.25/9:0.25/12:0.25/18:0.25"), vec![6, 9, 12, 18]);
        assert_eq!(parse_rate_values(""), Vec::<u8>::new());
        assert_eq!(parse_rate_values("24:1.0"), vec![24]);
        // Values above 127 pass through; junk entries are skipped.
        assert_eq!(parse_rate_values("200:0.5/abc:0.5/12:0.5"), vec![200, 12]);
    }

    #[test]
    fn test_parse_truncated_ie_stream() {
        // Declared length runs past the buffer; parsing stops cleanly.
        let buf = vec![0, 10, b'a', b'b'];
        assert!(parse_ies(&buf).is_empty());
    }

    #[test]
    fn test_wps_element_layout() {
        let mut buf = Vec::new();
        push_wps_element(&mut buf, &[0xde, 0xad, 0xbe, 0xef]);
        let ies = parse_ies(&buf);
        assert_eq!(ies[0].raw_id, IE_VENDOR_SPECIFIC);
        assert_eq!(&ies[0].data[..4], &[0x00, 0x50, 0xf2, 0x04]);
        assert_eq!(&ies[0].data[4..], &[0xde, 0xad, 0xbe, 0xef]);
    }
}
