//! Error types for the radio medium.

use thiserror::Error;

/// Errors reported by a [`Radio`](crate::Radio) or an IO event sink.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RadioError {
    /// A transmission (or, for `receive`, any operation) is still in progress.
    #[error("radio busy: {0}")]
    Busy(&'static str),

    /// Modulation parameters outside what the modem supports.
    #[error("invalid radio parameters: {0}")]
    InvalidParams(String),

    /// The radio has been shut down.
    #[error("radio is shut down")]
    ShutDown,

    /// No matching IO event arrived in time.
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// The event source went away.
    #[error("event channel disconnected")]
    Disconnected,
}

/// Result type alias for radio operations.
pub type RadioResult<T> = Result<T, RadioError>;
