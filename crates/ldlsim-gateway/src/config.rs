//! Gateway configuration.

use crate::GatewayError;
use ldlsim_common::{secs_to_ticks, Eui64, TICKS_PER_SECOND};
use serde::{Deserialize, Serialize};

/// Default upstream server.
pub const DEFAULT_HOST: &str = "router.eu.thethings.network";
pub const DEFAULT_PORT: u16 = 1700;

/// Where the gateway reports itself to be.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Location {
    /// Degrees, north positive.
    pub latitude: f64,
    /// Degrees, east positive.
    pub longitude: f64,
    /// Metres.
    pub altitude: i32,
}

impl Default for Location {
    fn default() -> Self {
        Location {
            latitude: 51.4576,
            longitude: 0.9705,
            altitude: 61,
        }
    }
}

/// A channel the gateway demodulates on, at every spreading factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RxChannel {
    pub frequency_hz: u32,
    #[serde(default = "default_bandwidth")]
    pub bandwidth_hz: u32,
}

fn default_bandwidth() -> u32 {
    125_000
}

impl RxChannel {
    pub const fn new(frequency_hz: u32, bandwidth_hz: u32) -> Self {
        RxChannel {
            frequency_hz,
            bandwidth_hz,
        }
    }
}

/// The eight EU868 uplink channels of a typical gateway.
pub fn eu868_channels() -> Vec<RxChannel> {
    [868_100_000, 868_300_000, 868_500_000, 867_100_000, 867_300_000, 867_500_000, 867_700_000, 867_900_000]
        .into_iter()
        .map(|f| RxChannel::new(f, 125_000))
        .collect()
}

/// Inclusive frequency range, in Hz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrequencyRange {
    pub min_hz: u32,
    pub max_hz: u32,
}

impl FrequencyRange {
    pub fn contains(&self, frequency_hz: u32) -> bool {
        (self.min_hz..=self.max_hz).contains(&frequency_hz)
    }
}

impl Default for FrequencyRange {
    /// The EU 863-870 MHz band.
    fn default() -> Self {
        FrequencyRange {
            min_hz: 863_000_000,
            max_hz: 870_000_000,
        }
    }
}

/// Configuration for one [`Gateway`](crate::Gateway).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Gateway identifier sent in every upstream datagram.
    pub eui: Eui64,
    /// Network server host name or address.
    pub host: String,
    pub port: u16,
    /// Seconds between PULL_DATA keepalives.
    pub keepalive_interval: u64,
    /// Seconds between status reports.
    pub status_interval: u64,
    pub location: Location,
    /// Uplink channels the gateway listens on.
    pub rx_channels: Vec<RxChannel>,
    /// Downlinks outside this range are refused with `TX_FREQ`.
    pub tx_frequency_range: FrequencyRange,
    /// Downlinks above this power are refused with `TX_POWER`.
    pub max_tx_power_dbm: i8,
    /// Furthest ahead, in milliseconds, a timestamped downlink may be scheduled.
    pub max_advance_ms: u64,
    /// First upstream token. Random when unset.
    pub initial_token: Option<u16>,
    /// Number of upstream tokens remembered for the ack ratio.
    pub ack_window: usize,
    /// Signal quality reported for every forwarded uplink.
    pub reported_rssi: i16,
    pub reported_snr: f64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            eui: Eui64::random_local(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            keepalive_interval: 10,
            status_interval: 10,
            location: Location::default(),
            rx_channels: eu868_channels(),
            tx_frequency_range: FrequencyRange::default(),
            max_tx_power_dbm: 27,
            max_advance_ms: 10_000,
            initial_token: None,
            ack_window: 32,
            reported_rssi: -25,
            reported_snr: 8.0,
        }
    }
}

impl GatewayConfig {
    pub fn new(eui: Eui64) -> Self {
        GatewayConfig {
            eui,
            ..Default::default()
        }
    }

    pub fn with_server(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    pub fn with_keepalive_interval(mut self, secs: u64) -> Self {
        self.keepalive_interval = secs;
        self
    }

    pub fn with_status_interval(mut self, secs: u64) -> Self {
        self.status_interval = secs;
        self
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = location;
        self
    }

    pub fn with_rx_channels(mut self, channels: Vec<RxChannel>) -> Self {
        self.rx_channels = channels;
        self
    }

    pub fn with_initial_token(mut self, token: u16) -> Self {
        self.initial_token = Some(token);
        self
    }

    pub fn with_max_advance_ms(mut self, millis: u64) -> Self {
        self.max_advance_ms = millis;
        self
    }

    pub(crate) fn keepalive_ticks(&self) -> u64 {
        secs_to_ticks(self.keepalive_interval)
    }

    pub(crate) fn status_ticks(&self) -> u64 {
        secs_to_ticks(self.status_interval)
    }

    pub(crate) fn max_advance_ticks(&self) -> u64 {
        self.max_advance_ms.saturating_mul(1_000)
    }

    /// Index of the receive channel a transmission lands on, if any.
    pub fn channel_index(&self, frequency_hz: u32, bandwidth_hz: u32) -> Option<usize> {
        self.rx_channels
            .iter()
            .position(|c| c.frequency_hz == frequency_hz && c.bandwidth_hz == bandwidth_hz)
    }

    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.host.is_empty() {
            return Err(GatewayError::InvalidConfig("host must not be empty".to_string()));
        }
        if self.keepalive_interval == 0 || self.status_interval == 0 {
            return Err(GatewayError::InvalidConfig(
                "keepalive and status intervals must be at least one second".to_string(),
            ));
        }
        for (name, secs) in [("keepalive", self.keepalive_interval), ("status", self.status_interval)] {
            if secs.checked_mul(TICKS_PER_SECOND).is_none() {
                return Err(GatewayError::InvalidConfig(format!("{} interval of {} s is too large", name, secs)));
            }
        }
        if self.max_advance_ms.checked_mul(1_000).is_none() {
            return Err(GatewayError::InvalidConfig(format!(
                "max advance of {} ms is too large",
                self.max_advance_ms
            )));
        }
        if self.ack_window == 0 {
            return Err(GatewayError::InvalidConfig("ack window must hold at least one token".to_string()));
        }
        if self.tx_frequency_range.min_hz > self.tx_frequency_range.max_hz {
            return Err(GatewayError::InvalidConfig(format!(
                "empty tx frequency range {}..{}",
                self.tx_frequency_range.min_hz, self.tx_frequency_range.max_hz
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.host, "router.eu.thethings.network");
        assert_eq!(config.port, 1700);
        assert_eq!(config.keepalive_interval, 10);
        assert_eq!(config.status_interval, 10);
        assert_eq!(config.location.altitude, 61);
        assert_eq!(config.ack_window, 32);
        assert_eq!(config.rx_channels.len(), 8);
        assert!(config.eui.is_local());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml() {
        let yaml = r#"
eui: "00-80-00-00-A0-00-1A-2B"
host: "127.0.0.1"
port: 1701
keepalive_interval: 1
rx_channels:
  - frequency_hz: 868100000
  - frequency_hz: 869525000
    bandwidth_hz: 250000
location:
  altitude: 12
"#;
        let config: GatewayConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.eui.to_string(), "00-80-00-00-A0-00-1A-2B");
        assert_eq!(config.port, 1701);
        assert_eq!(config.keepalive_interval, 1);
        assert_eq!(config.status_interval, 10);
        assert_eq!(config.rx_channels[1], RxChannel::new(869_525_000, 250_000));
        assert_eq!(config.location.altitude, 12);
        assert_eq!(config.location.latitude, 51.4576);
    }

    #[test]
    fn test_channel_index() {
        let config = GatewayConfig::default();
        assert_eq!(config.channel_index(868_300_000, 125_000), Some(1));
        assert_eq!(config.channel_index(868_300_000, 250_000), None);
        assert_eq!(config.channel_index(869_525_000, 125_000), None);
    }

    #[test]
    fn test_validate() {
        assert!(GatewayConfig::default().with_keepalive_interval(0).validate().is_err());
        assert!(GatewayConfig::default().with_server("", 1700).validate().is_err());
        let config = GatewayConfig {
            ack_window: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_overflowing_durations() {
        let config = GatewayConfig::default().with_max_advance_ms(u64::MAX);
        assert!(matches!(config.validate(), Err(GatewayError::InvalidConfig(_))));
        let config = GatewayConfig::default().with_keepalive_interval(u64::MAX / 1_000);
        assert!(matches!(config.validate(), Err(GatewayError::InvalidConfig(_))));
        let config = GatewayConfig::default().with_status_interval(u64::MAX);
        assert!(matches!(config.validate(), Err(GatewayError::InvalidConfig(_))));
        assert!(GatewayConfig::default().with_max_advance_ms(60_000).validate().is_ok());
    }
}
