//! Scenario files.
//!
//! ```yaml
//! clock:
//!   speed_multiplier: 10.0
//! duration_secs: 120
//! frame_log: frames.csv
//! gateways:
//!   - eui: "B8-27-EB-FF-FE-00-00-01"
//!     host: 127.0.0.1
//!     port: 1700
//! devices:
//!   - eui: "70-B3-D5-7E-00-00-00-01"
//!     frame: "40112233440001000148656c6c6f"
//!     period_secs: 30
//!     params:
//!       frequency_hz: 868300000
//!       spreading_factor: 9
//! ```

use crate::ConfigError;
use ldlsim_clock::ClockConfig;
use ldlsim_common::Eui64;
use ldlsim_gateway::GatewayConfig;
use ldlsim_lora::{RadioParams, MAX_PAYLOAD_LEN};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// A device that sends the same frame on a fixed period.
///
/// The MAC layer is not simulated, so the frame is sent as given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub eui: Eui64,
    /// Raw PHY payload, hex encoded in the file.
    #[serde(with = "hex_frame")]
    pub frame: Vec<u8>,
    /// Seconds between transmissions.
    pub period_secs: f64,
    /// Seconds before the first transmission.
    #[serde(default)]
    pub offset_secs: f64,
    #[serde(default)]
    pub params: RadioParams,
}

/// Everything one simulation run needs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub clock: ClockConfig,
    /// Virtual seconds to run for. Runs until interrupted when unset.
    pub duration_secs: Option<f64>,
    /// CSV log of every transmission.
    pub frame_log: Option<PathBuf>,
    pub gateways: Vec<GatewayConfig>,
    pub devices: Vec<DeviceConfig>,
}

impl ScenarioConfig {
    /// Read and validate a scenario file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let scenario: ScenarioConfig = serde_yaml::from_str(text)?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.clock
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if let Some(duration) = self.duration_secs {
            if !duration.is_finite() || duration <= 0.0 {
                return Err(ConfigError::Invalid(format!("duration must be positive, got {}", duration)));
            }
        }
        if self.gateways.is_empty() && self.devices.is_empty() {
            return Err(ConfigError::Invalid("scenario has no gateways and no devices".to_string()));
        }

        let mut seen = HashSet::new();
        for eui in self.gateways.iter().map(|g| g.eui).chain(self.devices.iter().map(|d| d.eui)) {
            if !seen.insert(eui) {
                return Err(ConfigError::Invalid(format!("{} appears more than once", eui)));
            }
        }

        for gateway in &self.gateways {
            gateway
                .validate()
                .map_err(|e| ConfigError::Invalid(format!("gateway {}: {}", gateway.eui, e)))?;
        }
        for device in &self.devices {
            device.validate()?;
        }
        Ok(())
    }
}

impl DeviceConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::Invalid(format!("device {}: {}", self.eui, message));
        if self.frame.is_empty() || self.frame.len() > MAX_PAYLOAD_LEN {
            return Err(invalid(format!("frame must be 1 to {} bytes, got {}", MAX_PAYLOAD_LEN, self.frame.len())));
        }
        if !self.period_secs.is_finite() || self.period_secs <= 0.0 {
            return Err(invalid(format!("period must be positive, got {}", self.period_secs)));
        }
        if !self.offset_secs.is_finite() || self.offset_secs < 0.0 {
            return Err(invalid(format!("offset must not be negative, got {}", self.offset_secs)));
        }
        self.params.validate().map_err(|e| invalid(e.to_string()))
    }
}

mod hex_frame {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(frame: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(frame))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        hex::decode(compact).map_err(serde::de::Error::custom)
    }
}
