//! 128-bit symmetric keys.
//!
//! Keys are opaque here; only the MAC collaborator interprets them.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Errors from building a [`Key`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// Wrong number of bytes.
    #[error("key must be 16 bytes, got {0}")]
    InvalidLength(usize),

    /// Not a hex string.
    #[error("invalid key hex: {0}")]
    InvalidHex(String),
}

/// A 16-byte key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Key([u8; 16]);

impl Key {
    /// Wrap raw bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Key(bytes)
    }

    /// Build from a slice that must be 16 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyError> {
        let array: [u8; 16] = bytes
            .try_into()
            .map_err(|_| KeyError::InvalidLength(bytes.len()))?;
        Ok(Key(array))
    }

    /// Parse 32 hex characters.
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s.trim()).map_err(|e| KeyError::InvalidHex(e.to_string()))?;
        Key::from_slice(&bytes)
    }

    /// Raw bytes.
    pub const fn bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

// Keys never show up in logs.
impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Key(..)")
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Key::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
