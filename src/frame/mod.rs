//! 802.11 Probe Request frame composition and parsing.
//!
//! Layer order is fixed: RadioTap, management header, information
//! elements. The parsers mirror the builders so emitted frames can be
//! re-read for QA sampling, metrics extraction, and round-trip tests.

pub mod composer;
pub mod ieee80211;
pub mod ies;
pub mod radiotap;

pub use composer::{compose_burst, BurstSpec, ComposedFrame};
pub use ieee80211::{parse_probe_request, MacAddr, ParsedProbeRequest};
pub use ies::{parse_ies, ElementId, InformationElement};
pub use radiotap::{build_radiotap, parse_radiotap, RadiotapInfo};
