//! JSON records carried in PUSH_DATA, PULL_RESP and TX_ACK bodies.
//!
//! Field names follow the packet forwarder's own short names (`tmst`, `datr`,
//! `lsnr`, ...). Payloads travel as base64; the decoder accepts unpadded input
//! and non-zero trailing bits, as deployed network servers produce both.

use crate::{PacketError, PacketResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Data Rate and Coding Rate
// ============================================================================

/// A LoRa data rate identifier such as `SF7BW125`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataRate {
    pub spreading_factor: u8,
    pub bandwidth_khz: u16,
}

impl DataRate {
    pub const fn new(spreading_factor: u8, bandwidth_khz: u16) -> Self {
        DataRate {
            spreading_factor,
            bandwidth_khz,
        }
    }

    pub fn bandwidth_hz(&self) -> u32 {
        self.bandwidth_khz as u32 * 1_000
    }
}

impl fmt::Display for DataRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SF{}BW{}", self.spreading_factor, self.bandwidth_khz)
    }
}

impl FromStr for DataRate {
    type Err = PacketError;

    fn from_str(s: &str) -> PacketResult<Self> {
        let invalid = || PacketError::invalid_field("datr", format!("expected SF<n>BW<khz>, got {:?}", s));
        let rest = s.strip_prefix("SF").ok_or_else(invalid)?;
        let (sf, bw) = rest.split_once("BW").ok_or_else(invalid)?;
        let spreading_factor: u8 = sf.parse().map_err(|_| invalid())?;
        let bandwidth_khz: u16 = bw.parse().map_err(|_| invalid())?;
        if !(5..=12).contains(&spreading_factor) || bandwidth_khz == 0 {
            return Err(invalid());
        }
        Ok(DataRate::new(spreading_factor, bandwidth_khz))
    }
}

/// A LoRa coding rate such as `4/5`, stored as its denominator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodingRate(pub u8);

impl CodingRate {
    pub const CR_4_5: CodingRate = CodingRate(5);

    pub fn denominator(&self) -> u8 {
        self.0
    }
}

impl Default for CodingRate {
    fn default() -> Self {
        CodingRate::CR_4_5
    }
}

impl fmt::Display for CodingRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "4/{}", self.0)
    }
}

impl FromStr for CodingRate {
    type Err = PacketError;

    fn from_str(s: &str) -> PacketResult<Self> {
        let invalid = || PacketError::invalid_field("codr", format!("expected 4/<n>, got {:?}", s));
        let denominator = s.strip_prefix("4/").ok_or_else(invalid)?;
        match denominator.parse::<u8>() {
            Ok(d) if (5..=8).contains(&d) => Ok(CodingRate(d)),
            _ => Err(invalid()),
        }
    }
}

macro_rules! string_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

string_serde!(DataRate);
string_serde!(CodingRate);

/// Modulation identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Modulation {
    #[default]
    #[serde(rename = "LORA")]
    Lora,
    #[serde(rename = "FSK")]
    Fsk,
}

// ============================================================================
// Field Encodings
// ============================================================================

mod base64_bytes {
    use base64::alphabet;
    use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
    use base64::engine::DecodePaddingMode;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    const LENIENT: GeneralPurpose = GeneralPurpose::new(
        &alphabet::STANDARD,
        GeneralPurposeConfig::new()
            .with_decode_padding_mode(DecodePaddingMode::Indifferent)
            .with_decode_allow_trailing_bits(true),
    );

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        LENIENT.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}

/// `stat.time` uses the expanded form `2014-01-12 08:59:28 GMT`.
mod expanded_time {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d %H:%M:%S GMT";

    pub fn serialize<S: Serializer>(time: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error> {
        match time {
            Some(t) => serializer.collect_str(&t.format(FORMAT)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(s) => NaiveDateTime::parse_from_str(&s, FORMAT)
                .map(|t| Some(t.and_utc()))
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

fn check_size(size: u16, data: &[u8]) -> PacketResult<()> {
    if size as usize != data.len() {
        return Err(PacketError::invalid_field(
            "size",
            format!("declared {} bytes but data holds {}", size, data.len()),
        ));
    }
    Ok(())
}

/// Convert a frequency in Hz to the protocol's MHz float.
pub fn hz_to_mhz(frequency_hz: u32) -> f64 {
    frequency_hz as f64 / 1_000_000.0
}

/// Convert the protocol's MHz float to Hz, rounded to the nearest Hz.
pub fn mhz_to_hz(frequency_mhz: f64) -> u32 {
    (frequency_mhz * 1_000_000.0).round() as u32
}

// ============================================================================
// Records
// ============================================================================

/// One received radio packet (`rxpk`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RxPacket {
    /// UTC time of reception.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    /// Gateway counter at the end of reception, in microseconds.
    pub tmst: u32,
    /// Centre frequency in MHz.
    pub freq: f64,
    #[serde(default)]
    pub chan: u8,
    #[serde(default)]
    pub rfch: u8,
    /// CRC status: 1 ok, -1 fail, 0 no CRC.
    pub stat: i8,
    #[serde(default)]
    pub modu: Modulation,
    pub datr: DataRate,
    pub codr: CodingRate,
    pub rssi: i16,
    pub lsnr: f64,
    pub size: u16,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl RxPacket {
    pub(crate) fn validate(&self) -> PacketResult<()> {
        check_size(self.size, &self.data)
    }
}

/// Gateway statistics (`stat`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    #[serde(default, skip_serializing_if = "Option::is_none", with = "expanded_time")]
    pub time: Option<DateTime<Utc>>,
    /// Latitude in degrees, north positive.
    pub lati: f64,
    /// Longitude in degrees, east positive.
    pub long: f64,
    /// Altitude in metres.
    pub alti: i32,
    /// Packets received.
    pub rxnb: u32,
    /// Packets received with a valid CRC.
    pub rxok: u32,
    /// Packets forwarded.
    pub rxfw: u32,
    /// Percentage of upstream datagrams acknowledged.
    pub ackr: f64,
    /// Downlink datagrams received.
    pub dwnb: u32,
    /// Packets emitted.
    pub txnb: u32,
}

/// A downlink request (`txpk`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxPacket {
    /// Send immediately, ignoring `tmst` and `tmms`.
    #[serde(default)]
    pub imme: bool,
    /// Send when the gateway counter reaches this value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmst: Option<u32>,
    /// Send at this GPS time, in milliseconds since 1980-01-06.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmms: Option<u64>,
    /// Centre frequency in MHz.
    pub freq: f64,
    #[serde(default)]
    pub rfch: u8,
    /// Output power in dBm.
    pub powe: i8,
    #[serde(default)]
    pub modu: Modulation,
    pub datr: DataRate,
    pub codr: CodingRate,
    /// Invert polarity (true for downlinks to end devices).
    #[serde(default)]
    pub ipol: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prea: Option<u16>,
    pub size: u16,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    /// Disable the physical layer CRC.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ncrc: Option<bool>,
}

impl TxPacket {
    /// An immediate downlink of `data` with LoRaWAN defaults.
    pub fn immediate(freq: f64, datr: DataRate, powe: i8, data: Vec<u8>) -> Self {
        TxPacket {
            imme: true,
            tmst: None,
            tmms: None,
            freq,
            rfch: 0,
            powe,
            modu: Modulation::Lora,
            datr,
            codr: CodingRate::default(),
            ipol: true,
            prea: None,
            size: data.len() as u16,
            data,
            ncrc: None,
        }
    }

    /// A downlink to be sent at gateway counter value `tmst`.
    pub fn at_tmst(tmst: u32, freq: f64, datr: DataRate, powe: i8, data: Vec<u8>) -> Self {
        TxPacket {
            imme: false,
            tmst: Some(tmst),
            ..Self::immediate(freq, datr, powe, data)
        }
    }

    pub(crate) fn validate(&self) -> PacketResult<()> {
        check_size(self.size, &self.data)
    }
}

/// Result of a downlink request, reported in TX_ACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxAckError {
    /// Accepted for transmission.
    #[default]
    None,
    /// Too late to program the transmission.
    TooLate,
    /// Too far ahead to program the transmission.
    TooEarly,
    /// Overlaps an already scheduled downlink.
    CollisionPacket,
    /// Overlaps a beacon slot.
    CollisionBeacon,
    /// Frequency not supported by the TX chain.
    TxFreq,
    /// Power not supported by the TX chain.
    TxPower,
    /// GPS time requested but not locked.
    GpsUnlocked,
}

impl TxAckError {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxAckError::None => "NONE",
            TxAckError::TooLate => "TOO_LATE",
            TxAckError::TooEarly => "TOO_EARLY",
            TxAckError::CollisionPacket => "COLLISION_PACKET",
            TxAckError::CollisionBeacon => "COLLISION_BEACON",
            TxAckError::TxFreq => "TX_FREQ",
            TxAckError::TxPower => "TX_POWER",
            TxAckError::GpsUnlocked => "GPS_UNLOCKED",
        }
    }
}

impl fmt::Display for TxAckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
