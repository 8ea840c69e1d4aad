//! Error types for the gateway engine.

use crate::Lifecycle;
use thiserror::Error;

/// Errors reported by [`Gateway`](crate::Gateway).
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Socket setup, send or receive failed.
    #[error("gateway socket error: {0}")]
    Io(#[from] std::io::Error),

    /// The operation is not allowed in the current lifecycle state.
    #[error("gateway is {0}")]
    InvalidState(Lifecycle),

    /// The server address did not resolve to anything.
    #[error("could not resolve {0}")]
    Resolve(String),

    /// Invalid gateway configuration.
    #[error("invalid gateway configuration: {0}")]
    InvalidConfig(String),

    /// The consumer did not answer in time.
    #[error("gateway did not respond")]
    Unresponsive,

    /// A worker thread panicked.
    #[error("{0} thread panicked")]
    WorkerPanicked(&'static str),
}

/// Result type alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;
