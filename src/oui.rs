//! IEEE OUI vendor registry.
//!
//! Parses the published IEEE text database and maps normalized vendor names
//! to 24-bit OUI prefixes, used when a MAC policy preserves vendor identity
//! and when composing the vendor-specific information element.

use std::path::Path;

use tracing::debug;

use crate::error::{Result, SimError};

/// Vendor name to OUI mapping loaded from the IEEE database.
#[derive(Debug, Clone)]
pub struct OuiRegistry {
    /// `(normalized name, oui, canonical name)`, first-encountered wins.
    entries: Vec<(String, [u8; 3], String)>,
}

/// Case-fold and collapse internal whitespace.
fn normalize(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn parse_oui_token(token: &str) -> Option<[u8; 3]> {
    let cleaned: String = token
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .collect();
    if cleaned.len() != 6 {
        return None;
    }
    let mut oui = [0u8; 3];
    for (i, chunk) in cleaned.as_bytes().chunks(2).enumerate() {
        let s = std::str::from_utf8(chunk).ok()?;
        oui[i] = u8::from_str_radix(s, 16).ok()?;
    }
    Some(oui)
}

impl OuiRegistry {
    /// Load the registry from the IEEE database file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|_| {
            SimError::MissingResource(format!("OUI database {}", path.display()))
        })?;
        let registry = Self::parse(&text);
        debug!(entries = registry.len(), "loaded OUI database");
        Ok(registry)
    }

    /// Parse database text. Accepts the published `HH-HH-HH   (hex)   Vendor`
    /// form as well as preprocessed two-column `HH-HH-HH\tVendor` lines.
    pub fn parse(text: &str) -> Self {
        let mut entries: Vec<(String, [u8; 3], String)> = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (oui_token, vendor) = if let Some(idx) = line.find("(hex)") {
                (&line[..idx], line[idx + "(hex)".len()..].trim())
            } else if let Some((token, rest)) = line.split_once('\t') {
                (token, rest.trim())
            } else {
                continue;
            };
            let Some(oui) = parse_oui_token(oui_token.trim()) else {
                continue;
            };
            if vendor.is_empty() {
                continue;
            }
            let key = normalize(vendor);
            if entries.iter().any(|(k, _, _)| *k == key) {
                continue;
            }
            entries.push((key, oui, vendor.to_string()));
        }
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a vendor by prefix-tolerant match, falling back to substring
    /// containment. Returns the OUI bytes and the canonical vendor name.
    pub fn lookup(&self, vendor: &str) -> Option<([u8; 3], &str)> {
        let needle = normalize(vendor);
        if needle.is_empty() {
            return None;
        }
        self.entries
            .iter()
            .find(|(key, _, _)| key.starts_with(&needle))
            .or_else(|| {
                self.entries
                    .iter()
                    .find(|(key, _, _)| key.contains(&needle))
            })
            .map(|(_, oui, canonical)| (*oui, canonical.as_str()))
    }
}
