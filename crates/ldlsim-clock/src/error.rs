//! Error types for the virtual clock.

use crate::TimerHandle;
use thiserror::Error;

/// Errors reported by [`VirtualClock`](crate::VirtualClock).
#[derive(Debug, Error)]
pub enum ClockError {
    /// Interval was negative, NaN or infinite.
    #[error("invalid timer interval: {0}")]
    InvalidInterval(String),

    /// The handle has already fired, was cancelled, or never existed.
    #[error("{0} is not pending")]
    NotPending(TimerHandle),

    /// The clock was stopped before the awaited deadline.
    #[error("clock stopped")]
    Stopped,

    /// `wait` was called from a timer callback; the callback would wait on itself.
    #[error("wait called on the clock thread")]
    WaitOnClockThread,

    /// `advance` is only available on a stepped clock.
    #[error("advance requires a stepped clock")]
    NotStepped,

    /// Invalid clock configuration.
    #[error("invalid clock configuration: {0}")]
    InvalidConfig(String),

    /// The background thread could not be spawned.
    #[error("failed to spawn clock thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Result type alias for clock operations.
pub type ClockResult<T> = Result<T, ClockError>;
