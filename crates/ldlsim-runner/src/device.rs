//! Periodic transmitters standing in for end devices.

use crate::scenario::DeviceConfig;
use ldlsim_clock::{TimerHandle, VirtualClock};
use ldlsim_common::{secs_to_ticks, Eui64, VirtualTime, TICKS_PER_SECOND};
use ldlsim_lora::{IoEvent, Medium, Radio, RadioDriver, RadioError, RadioParams};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

/// Sends one frame every period until stopped.
pub struct PeriodicDevice {
    eui: Eui64,
    radio: Radio,
    clock: VirtualClock,
    frame: Vec<u8>,
    params: RadioParams,
    period: u64,
    schedule: Mutex<Schedule>,
    sent: AtomicU64,
}

#[derive(Default)]
struct Schedule {
    next: Option<(VirtualTime, TimerHandle)>,
    /// Set once by `stop`; nothing is armed afterwards.
    stopped: bool,
}

impl PeriodicDevice {
    pub fn new(config: &DeviceConfig, clock: VirtualClock, medium: Medium) -> Arc<Self> {
        let eui = config.eui;
        let sink = Arc::new(move |event: IoEvent, time: VirtualTime| {
            trace!("device {}: {} at {}", eui, event, time);
        });
        Arc::new(PeriodicDevice {
            eui,
            radio: Radio::new(eui, clock.clone(), medium, sink),
            clock,
            frame: config.frame.clone(),
            params: config.params,
            period: seconds_to_ticks(config.period_secs).max(1),
            schedule: Mutex::new(Schedule::default()),
            sent: AtomicU64::new(0),
        })
    }

    pub fn eui(&self) -> Eui64 {
        self.eui
    }

    /// Frames put on the air so far.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Arm the first transmission `offset_secs` from now.
    pub fn start(self: &Arc<Self>, offset_secs: f64) {
        let first = self.clock.time() + seconds_to_ticks(offset_secs);
        self.arm(first);
    }

    /// Cancel the next transmission and detach the radio.
    pub fn stop(&self) {
        let next = {
            let mut schedule = self.schedule.lock();
            schedule.stopped = true;
            schedule.next.take()
        };
        if let Some((_, timer)) = next {
            let _ = self.clock.cancel(timer);
        }
        self.radio.shutdown();
    }

    fn arm(self: &Arc<Self>, at: VirtualTime) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let mut schedule = self.schedule.lock();
        if schedule.stopped {
            return;
        }
        let timer = self.clock.on_timeout_at(at, move || {
            if let Some(device) = weak.upgrade() {
                device.fire(at);
            }
        });
        schedule.next = Some((at, timer));
    }

    fn fire(self: &Arc<Self>, at: VirtualTime) {
        if self.schedule.lock().next.take().is_none() {
            return;
        }
        match self.radio.transmit(&self.frame, &self.params) {
            Ok(report) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "device {}: sent {} bytes, on air until {}",
                    self.eui,
                    self.frame.len(),
                    report.end()
                );
            }
            Err(RadioError::ShutDown) => return,
            Err(e) => warn!("device {}: transmit failed: {}", self.eui, e),
        }
        self.arm(at + self.period);
    }
}

fn seconds_to_ticks(seconds: f64) -> u64 {
    if seconds <= 0.0 {
        return 0;
    }
    let whole = seconds.trunc() as u64;
    secs_to_ticks(whole).saturating_add((seconds.fract() * TICKS_PER_SECOND as f64).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(period_secs: f64) -> DeviceConfig {
        DeviceConfig {
            eui: Eui64::from_bytes([0x70, 0xb3, 0xd5, 0x7e, 0, 0, 0, 1]),
            frame: vec![0x40, 1, 2, 3],
            period_secs,
            offset_secs: 0.0,
            params: RadioParams::default(),
        }
    }

    #[test]
    fn test_seconds_to_ticks() {
        assert_eq!(seconds_to_ticks(0.0), 0);
        assert_eq!(seconds_to_ticks(-1.0), 0);
        assert_eq!(seconds_to_ticks(1.5), 1_500_000);
        assert_eq!(seconds_to_ticks(30.0), 30_000_000);
    }

    #[test]
    fn test_sends_on_period() {
        let clock = VirtualClock::stepped();
        let medium = Medium::new();
        let starts = Arc::new(Mutex::new(Vec::new()));
        let s = starts.clone();
        medium.subscribe(ldlsim_lora::TOPIC_TX_BEGIN, move |m: &ldlsim_lora::MediumMessage| {
            if let Some(event) = m.transmission() {
                s.lock().push(event.start);
            }
        });

        let device = PeriodicDevice::new(&config(2.0), clock.clone(), medium);
        device.start(0.5);
        clock.advance(5_000_000).unwrap();

        assert_eq!(device.sent(), 3);
        assert_eq!(
            *starts.lock(),
            vec![
                VirtualTime::from_millis(500),
                VirtualTime::from_millis(2_500),
                VirtualTime::from_millis(4_500)
            ]
        );

        device.stop();
        clock.advance(5_000_000).unwrap();
        assert_eq!(device.sent(), 3);
        assert_eq!(clock.pending(), 0);
    }

    #[test]
    fn test_stop_during_transmit_does_not_rearm() {
        let clock = VirtualClock::stepped();
        let medium = Medium::new();
        let device = PeriodicDevice::new(&config(1.0), clock.clone(), medium.clone());

        // Stop the device from inside its own transmission, after the timer
        // has been consumed but before the next one is armed.
        let weak = Arc::downgrade(&device);
        medium.subscribe(ldlsim_lora::TOPIC_TX_BEGIN, move |_: &ldlsim_lora::MediumMessage| {
            if let Some(device) = weak.upgrade() {
                device.stop();
            }
        });

        device.start(0.0);
        clock.advance(10_000_000).unwrap();
        assert_eq!(device.sent(), 1);
        assert_eq!(clock.pending(), 0);
    }

    #[test]
    fn test_start_after_stop_is_ignored() {
        let clock = VirtualClock::stepped();
        let device = PeriodicDevice::new(&config(1.0), clock.clone(), Medium::new());
        device.stop();
        device.start(0.0);
        assert_eq!(clock.pending(), 0);
        clock.advance(3_000_000).unwrap();
        assert_eq!(device.sent(), 0);
    }
}
