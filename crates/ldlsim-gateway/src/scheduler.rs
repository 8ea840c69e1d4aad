//! Downlink admission: turns a `txpk` into a transmission slot or a refusal.

use crate::config::{FrequencyRange, GatewayConfig};
use ldlsim_common::VirtualTime;
use ldlsim_lora::RadioParams;
use semtech_packet::{mhz_to_hz, TxAckError, TxPacket};

/// An accepted downlink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub start: VirtualTime,
    pub airtime: u64,
    pub params: RadioParams,
    /// Requested with `imme`.
    pub immediate: bool,
}

impl Slot {
    pub fn end(&self) -> VirtualTime {
        self.start + self.airtime
    }
}

/// Admits downlinks against the gateway's limits and its own transmit schedule.
#[derive(Debug, Clone)]
pub struct DownlinkScheduler {
    frequency_range: FrequencyRange,
    max_power_dbm: i8,
    max_advance: u64,
    booked: Vec<(VirtualTime, VirtualTime)>,
}

impl DownlinkScheduler {
    pub fn new(config: &GatewayConfig) -> Self {
        DownlinkScheduler {
            frequency_range: config.tx_frequency_range,
            max_power_dbm: config.max_tx_power_dbm,
            max_advance: config.max_advance_ticks(),
            booked: Vec::new(),
        }
    }

    /// Radio parameters for `txpk`, or the refusal code.
    pub fn radio_params(&self, txpk: &TxPacket) -> Result<RadioParams, TxAckError> {
        let params = RadioParams {
            frequency_hz: mhz_to_hz(txpk.freq),
            bandwidth_hz: txpk.datr.bandwidth_hz(),
            spreading_factor: txpk.datr.spreading_factor,
            coding_rate: txpk.codr.denominator(),
            tx_power_dbm: txpk.powe,
        };
        if !self.frequency_range.contains(params.frequency_hz) || params.validate().is_err() {
            return Err(TxAckError::TxFreq);
        }
        if params.tx_power_dbm > self.max_power_dbm {
            return Err(TxAckError::TxPower);
        }
        Ok(params)
    }

    /// Decide when `txpk` goes out, given the gateway counter reads `now`.
    ///
    /// On success the slot is booked, so a later request overlapping it is
    /// refused with `COLLISION_PACKET`.
    pub fn admit<F>(&mut self, txpk: &TxPacket, now: VirtualTime, airtime: F) -> Result<Slot, TxAckError>
    where
        F: FnOnce(&RadioParams) -> u64,
    {
        let params = self.radio_params(txpk)?;
        let start = if txpk.imme {
            now
        } else if let Some(tmst) = txpk.tmst {
            let delta = tmst.wrapping_sub(now.tmst()) as i32;
            if delta < 0 {
                return Err(TxAckError::TooLate);
            }
            if delta as u64 > self.max_advance {
                return Err(TxAckError::TooEarly);
            }
            now + delta as u64
        } else if txpk.tmms.is_some() {
            return Err(TxAckError::GpsUnlocked);
        } else {
            return Err(TxAckError::TooLate);
        };

        let slot = Slot {
            start,
            airtime: airtime(&params),
            params,
            immediate: txpk.imme,
        };
        self.booked.retain(|(_, end)| *end > now);
        if self.booked.iter().any(|(s, e)| slot.start < *e && *s < slot.end()) {
            return Err(TxAckError::CollisionPacket);
        }
        self.booked.push((slot.start, slot.end()));
        Ok(slot)
    }

    /// Downlinks booked and not yet finished as of the last admission.
    pub fn booked(&self) -> usize {
        self.booked.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semtech_packet::DataRate;

    const AIRTIME: u64 = 30_976;

    fn scheduler() -> DownlinkScheduler {
        DownlinkScheduler::new(&GatewayConfig::default().with_max_advance_ms(5_000))
    }

    fn at(tmst: u32) -> TxPacket {
        TxPacket::at_tmst(tmst, 869.525, DataRate::new(9, 125), 14, b"hello".to_vec())
    }

    fn imme() -> TxPacket {
        TxPacket::immediate(869.525, DataRate::new(9, 125), 14, b"hello".to_vec())
    }

    #[test]
    fn test_immediate() {
        let now = VirtualTime::from_secs(3);
        let slot = scheduler().admit(&imme(), now, |_| AIRTIME).unwrap();
        assert_eq!(slot.start, now);
        assert!(slot.immediate);
        assert_eq!(slot.params.frequency_hz, 869_525_000);
        assert_eq!(slot.params.spreading_factor, 9);
        assert_eq!(slot.params.coding_rate, 5);
        assert_eq!(slot.end(), now + AIRTIME);
    }

    #[test]
    fn test_timestamped() {
        let now = VirtualTime::from_secs(10);
        let slot = scheduler().admit(&at(11_000_000), now, |_| AIRTIME).unwrap();
        assert_eq!(slot.start, VirtualTime::from_secs(11));
        assert!(!slot.immediate);
    }

    #[test]
    fn test_timestamp_wraps() {
        // Counter just below the u32 wrap, target just after it.
        let now = VirtualTime::from_ticks(u32::MAX as u64 - 499_999);
        let slot = scheduler().admit(&at(500_000), now, |_| AIRTIME).unwrap();
        assert_eq!(slot.start, now + 1_000_000);
    }

    #[test]
    fn test_too_late_and_too_early() {
        let now = VirtualTime::from_secs(10);
        let mut scheduler = scheduler();
        assert_eq!(scheduler.admit(&at(9_000_000), now, |_| AIRTIME), Err(TxAckError::TooLate));
        assert_eq!(scheduler.admit(&at(16_000_000), now, |_| AIRTIME), Err(TxAckError::TooEarly));
        assert_eq!(scheduler.booked(), 0);
    }

    #[test]
    fn test_gps_time_and_no_time() {
        let now = VirtualTime::from_secs(1);
        let mut gps = at(0);
        gps.tmst = None;
        gps.tmms = Some(1_234_567_890_000);
        assert_eq!(scheduler().admit(&gps, now, |_| AIRTIME), Err(TxAckError::GpsUnlocked));
        gps.tmms = None;
        assert_eq!(scheduler().admit(&gps, now, |_| AIRTIME), Err(TxAckError::TooLate));
    }

    #[test]
    fn test_frequency_and_power_limits() {
        let now = VirtualTime::ZERO;
        let mut wrong_band = imme();
        wrong_band.freq = 915.0;
        assert_eq!(scheduler().admit(&wrong_band, now, |_| AIRTIME), Err(TxAckError::TxFreq));
        let mut bad_sf = imme();
        bad_sf.datr = DataRate::new(6, 125);
        assert_eq!(scheduler().admit(&bad_sf, now, |_| AIRTIME), Err(TxAckError::TxFreq));
        let mut loud = imme();
        loud.powe = 30;
        assert_eq!(scheduler().admit(&loud, now, |_| AIRTIME), Err(TxAckError::TxPower));
    }

    #[test]
    fn test_overlapping_downlinks_collide() {
        let now = VirtualTime::from_secs(1);
        let mut scheduler = scheduler();
        scheduler.admit(&at(2_000_000), now, |_| AIRTIME).unwrap();
        assert_eq!(
            scheduler.admit(&at(2_000_000 + 10_000), now, |_| AIRTIME),
            Err(TxAckError::CollisionPacket)
        );
        // Back to back is fine.
        scheduler.admit(&at(2_000_000 + AIRTIME as u32), now, |_| AIRTIME).unwrap();
        assert_eq!(scheduler.booked(), 2);

        // Finished bookings are forgotten.
        let later = VirtualTime::from_secs(3);
        scheduler.admit(&imme(), later, |_| AIRTIME).unwrap();
        assert_eq!(scheduler.booked(), 1);
    }
}
