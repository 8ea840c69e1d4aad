//! Clock configuration.

use crate::ClockError;
use serde::{Deserialize, Serialize};

/// How fast virtual time runs against the wall clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Virtual seconds per real second (1.0 = real-time, 10.0 = ten times faster).
    /// Must be positive and finite.
    pub speed_multiplier: f64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        ClockConfig {
            speed_multiplier: 1.0,
        }
    }
}

impl ClockConfig {
    /// Config running at the given speed.
    pub fn with_speed(speed_multiplier: f64) -> Self {
        ClockConfig { speed_multiplier }
    }

    /// Reject non-positive or non-finite speeds.
    pub fn validate(&self) -> Result<(), ClockError> {
        if !self.speed_multiplier.is_finite() || self.speed_multiplier <= 0.0 {
            return Err(ClockError::InvalidConfig(format!(
                "speed multiplier must be positive, got {}",
                self.speed_multiplier
            )));
        }
        Ok(())
    }
}
