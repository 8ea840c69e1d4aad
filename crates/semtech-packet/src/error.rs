//! Error types for semtech-packet.

use thiserror::Error;

/// Errors that can occur while decoding a datagram.
#[derive(Debug, Error)]
pub enum PacketError {
    /// Protocol version byte other than 2.
    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Type tag outside 0..=5.
    #[error("Unknown message type: {0:#04x}")]
    UnknownType(u8),

    /// Datagram shorter than its fixed fields.
    #[error("Truncated datagram: need {needed} bytes, got {actual}")]
    Truncated {
        /// Bytes the fixed part requires.
        needed: usize,
        /// Bytes available.
        actual: usize,
    },

    /// JSON body could not be parsed.
    #[error("Malformed JSON body: {0}")]
    Json(#[from] serde_json::Error),

    /// A field parsed but holds an impossible value.
    #[error("Invalid field {field}: {message}")]
    InvalidField {
        /// JSON field name.
        field: &'static str,
        /// Description of the problem.
        message: String,
    },
}

impl PacketError {
    /// Create an invalid field error.
    pub fn invalid_field(field: &'static str, message: impl Into<String>) -> Self {
        PacketError::InvalidField {
            field,
            message: message.into(),
        }
    }
}

/// Result type alias for codec operations.
pub type PacketResult<T> = Result<T, PacketError>;
