//! Modulation parameters and the LoRa time-on-air model.
//!
//! Airtime follows the Semtech modem formula:
//!
//! ```text
//! T_sym     = 2^SF / BW
//! preamble  = n_preamble + 4.25 symbols
//! payload   = 8 + max(ceil((8PL - 4SF + 28 + 16CRC - 20H) / (4(SF - 2DE))) * (CR + 4), 0)
//! ```
//!
//! It is evaluated in quarter symbols with integer arithmetic, then rounded up
//! to a whole tick, so the same inputs always give the same airtime.

use crate::{RadioError, RadioResult};
use ldlsim_common::TICKS_PER_SECOND;
use serde::{Deserialize, Serialize};

/// Largest payload a LoRa modem will send, in bytes.
pub const MAX_PAYLOAD_LEN: usize = 255;

/// Bandwidths the modem accepts, in Hz.
pub const SUPPORTED_BANDWIDTHS: [u32; 3] = [125_000, 250_000, 500_000];

/// Parameters of one transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioParams {
    /// Centre frequency in Hz.
    pub frequency_hz: u32,
    /// Bandwidth in Hz (125000, 250000 or 500000).
    pub bandwidth_hz: u32,
    /// Spreading factor, 7 to 12.
    pub spreading_factor: u8,
    /// Coding rate denominator: 5 means 4/5, up to 8 for 4/8.
    pub coding_rate: u8,
    /// Transmit power in dBm.
    pub tx_power_dbm: i8,
}

impl Default for RadioParams {
    /// EU868 channel 0 at SF7BW125.
    fn default() -> Self {
        RadioParams {
            frequency_hz: 868_100_000,
            bandwidth_hz: 125_000,
            spreading_factor: 7,
            coding_rate: 5,
            tx_power_dbm: 14,
        }
    }
}

impl RadioParams {
    pub fn with_frequency(mut self, frequency_hz: u32) -> Self {
        self.frequency_hz = frequency_hz;
        self
    }

    pub fn with_spreading_factor(mut self, spreading_factor: u8) -> Self {
        self.spreading_factor = spreading_factor;
        self
    }

    pub fn with_bandwidth(mut self, bandwidth_hz: u32) -> Self {
        self.bandwidth_hz = bandwidth_hz;
        self
    }

    pub fn with_power(mut self, tx_power_dbm: i8) -> Self {
        self.tx_power_dbm = tx_power_dbm;
        self
    }

    /// Check the parameters against what the modem supports.
    pub fn validate(&self) -> RadioResult<()> {
        validate_modulation(self.frequency_hz, self.bandwidth_hz, self.spreading_factor)?;
        if !(5..=8).contains(&self.coding_rate) {
            return Err(RadioError::InvalidParams(format!(
                "coding rate 4/{} not in 4/5..4/8",
                self.coding_rate
            )));
        }
        Ok(())
    }

    /// True if a receiver tuned to this frequency, bandwidth and SF can demodulate it.
    pub fn same_channel(&self, frequency_hz: u32, bandwidth_hz: u32, spreading_factor: u8) -> bool {
        self.frequency_hz == frequency_hz
            && self.bandwidth_hz == bandwidth_hz
            && self.spreading_factor == spreading_factor
    }
}

pub(crate) fn validate_modulation(frequency_hz: u32, bandwidth_hz: u32, spreading_factor: u8) -> RadioResult<()> {
    if frequency_hz == 0 {
        return Err(RadioError::InvalidParams("frequency must be non-zero".to_string()));
    }
    if !SUPPORTED_BANDWIDTHS.contains(&bandwidth_hz) {
        return Err(RadioError::InvalidParams(format!("unsupported bandwidth {} Hz", bandwidth_hz)));
    }
    if !(7..=12).contains(&spreading_factor) {
        return Err(RadioError::InvalidParams(format!("spreading factor {} not in 7..12", spreading_factor)));
    }
    Ok(())
}

/// Framing options that affect airtime but not the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhyConfig {
    /// Programmed preamble length in symbols.
    pub preamble_symbols: u16,
    /// Explicit (variable length) header.
    pub explicit_header: bool,
    /// Payload CRC present.
    pub crc: bool,
}

impl Default for PhyConfig {
    /// LoRaWAN framing: 8 symbol preamble, explicit header, CRC on.
    fn default() -> Self {
        PhyConfig {
            preamble_symbols: 8,
            explicit_header: true,
            crc: true,
        }
    }
}

/// Whether low data rate optimisation applies (symbol time of 16 ms or more).
pub fn low_data_rate_optimize(spreading_factor: u8, bandwidth_hz: u32) -> bool {
    (1u64 << spreading_factor) * 1_000 >= 16 * bandwidth_hz as u64
}

/// Duration of one symbol in ticks, rounded up.
pub fn symbol_ticks(spreading_factor: u8, bandwidth_hz: u32) -> u64 {
    let numerator = (1u64 << spreading_factor) * TICKS_PER_SECOND;
    numerator.div_ceil(bandwidth_hz as u64)
}

/// Airtime in ticks of a `payload_len` byte frame with LoRaWAN framing.
pub fn calculate_time_on_air(params: &RadioParams, payload_len: usize) -> u64 {
    time_on_air(params, &PhyConfig::default(), payload_len)
}

/// Airtime in ticks for explicit framing options.
pub fn time_on_air(params: &RadioParams, phy: &PhyConfig, payload_len: usize) -> u64 {
    let sf = params.spreading_factor as i64;
    let de = low_data_rate_optimize(params.spreading_factor, params.bandwidth_hz) as i64;
    let crc = phy.crc as i64;
    let implicit = (!phy.explicit_header) as i64;

    let numerator = 8 * payload_len as i64 - 4 * sf + 28 + 16 * crc - 20 * implicit;
    let denominator = 4 * (sf - 2 * de);
    let coded_blocks = if numerator > 0 {
        (numerator + denominator - 1) / denominator
    } else {
        0
    };
    let payload_symbols = 8 + coded_blocks * params.coding_rate as i64;

    // (n_preamble + 4.25) + payload, counted in quarter symbols.
    let quarter_symbols = (4 * phy.preamble_symbols as u64 + 17) + 4 * payload_symbols as u64;
    let numerator = quarter_symbols * (1u64 << params.spreading_factor) * TICKS_PER_SECOND;
    numerator.div_ceil(4 * params.bandwidth_hz as u64)
}
