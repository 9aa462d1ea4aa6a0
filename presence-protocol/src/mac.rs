//! MAC address parsing and canonicalization.
//!
//! Canonical form is upper-case colon-separated octets (`XX:XX:XX:XX:XX:XX`),
//! matching the form the remote registry stores and the form `bluetoothctl`
//! prints. Validation mirrors the original scanner's `_is_valid_mac`.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

fn mac_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^([0-9A-Fa-f]{2}:){5}[0-9A-Fa-f]{2}$").unwrap())
}

/// A validated, canonicalized Bluetooth device address.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress(String);

impl MacAddress {
    /// Parses and upper-cases a MAC address, rejecting anything that isn't
    /// six colon-separated hex octets.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if !mac_pattern().is_match(trimmed) {
            return None;
        }
        Some(Self(trimmed.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for MacAddress {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        MacAddress::parse(&value).ok_or_else(|| format!("invalid MAC address: {value}"))
    }
}

impl From<MacAddress> for String {
    fn from(value: MacAddress) -> Self {
        value.0
    }
}

impl AsRef<str> for MacAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
