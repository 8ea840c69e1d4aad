//! 64-bit extended unique identifiers.
//!
//! Gateways and devices are addressed by an EUI-64. The textual forms accepted by
//! [`Eui64::parse`] are the ones people actually paste from network server
//! consoles:
//!
//! - `00-11-22-33-44-55-66-77`
//! - `00:11:22:33:44:55:66:77`
//! - `00 11 22 33 44 55 66 77`
//! - `0011223344556677`
//!
//! Equality is byte-for-byte; the textual form is not retained.

use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors from parsing an EUI-64.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EuiParseError {
    /// The input is not one of the accepted textual layouts.
    #[error("'{0}' is not an EUI64")]
    InvalidFormat(String),

    /// A binary identifier had the wrong length.
    #[error("EUI64 must be 8 bytes, got {0}")]
    InvalidLength(usize),
}

/// An 8-byte identifier, stored most significant byte first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Eui64([u8; 8]);

impl Eui64 {
    /// The all zero identifier.
    pub const ZERO: Eui64 = Eui64([0u8; 8]);

    /// Wrap raw bytes.
    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        Eui64(bytes)
    }

    /// Build from a slice that must be exactly 8 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, EuiParseError> {
        let array: [u8; 8] = bytes
            .try_into()
            .map_err(|_| EuiParseError::InvalidLength(bytes.len()))?;
        Ok(Eui64(array))
    }

    /// Parse any of the accepted textual layouts.
    pub fn parse(input: &str) -> Result<Self, EuiParseError> {
        let trimmed = input.trim();
        let invalid = || EuiParseError::InvalidFormat(input.to_string());

        let digits: String = match trimmed.len() {
            16 => trimmed.to_string(),
            23 => {
                let delimiter = trimmed.as_bytes()[2] as char;
                if !matches!(delimiter, '-' | ':' | ' ') {
                    return Err(invalid());
                }
                let octets: Vec<&str> = trimmed.split(delimiter).collect();
                if octets.len() != 8 || octets.iter().any(|o| o.len() != 2) {
                    return Err(invalid());
                }
                octets.concat()
            }
            _ => return Err(invalid()),
        };

        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }

        let bytes = hex::decode(&digits).map_err(|_| invalid())?;
        Eui64::from_slice(&bytes).map_err(|_| invalid())
    }

    /// A random, locally administered, unicast identifier.
    pub fn random_local() -> Self {
        let mut bytes = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes[0] = (bytes[0] | 0x02) & !0x01;
        Eui64(bytes)
    }

    /// Raw bytes, most significant first.
    pub const fn bytes(&self) -> [u8; 8] {
        self.0
    }

    /// The identifier read as a big-endian integer.
    pub fn to_u64(&self) -> u64 {
        u64::from_be_bytes(self.0)
    }

    /// Group (multicast) bit of the first octet.
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 == 0x01
    }

    /// Locally administered bit of the first octet.
    pub fn is_local(&self) -> bool {
        self.0[0] & 0x02 == 0x02
    }

    /// Format with a custom octet delimiter.
    pub fn to_string_with(&self, delimiter: &str) -> String {
        self.0
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(delimiter)
    }
}

impl fmt::Display for Eui64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_with("-"))
    }
}

impl FromStr for Eui64 {
    type Err = EuiParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Eui64::parse(s)
    }
}

impl From<[u8; 8]> for Eui64 {
    fn from(bytes: [u8; 8]) -> Self {
        Eui64(bytes)
    }
}

impl Serialize for Eui64 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Eui64 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Eui64::parse(&s).map_err(serde::de::Error::custom)
    }
}
