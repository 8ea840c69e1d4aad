//! Radio medium scenarios driven by a running clock.

use ldlsim_clock::{ClockConfig, VirtualClock};
use ldlsim_common::{Eui64, VirtualTime};
use ldlsim_lora::{
    ChannelSink, IoEvent, IoEventSink, Medium, MediumMessage, Radio, RadioDriver, RadioParams, RxParams,
    TOPIC_TX_BEGIN, TOPIC_TX_END,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn eui(n: u8) -> Eui64 {
    Eui64::from_bytes([0x70, 0xb3, 0xd5, 0x7e, 0, 0, 0, n])
}

fn radio(clock: &VirtualClock, medium: &Medium, n: u8) -> (Radio, Arc<ChannelSink>) {
    let sink = Arc::new(ChannelSink::new());
    (Radio::new(eui(n), clock.clone(), medium.clone(), sink.clone()), sink)
}

// ============================================================================
// Collisions
// ============================================================================

#[test]
fn test_overlapping_transmissions_resolve_as_timeout() {
    let clock = VirtualClock::new(ClockConfig::with_speed(20.0)).unwrap();
    let medium = Medium::new();
    let (a, a_sink) = radio(&clock, &medium, 1);
    let (b, _) = radio(&clock, &medium, 2);
    let (c, c_sink) = radio(&clock, &medium, 3);
    clock.start().unwrap();

    let params = RadioParams::default();
    c.receive(&RxParams::matching(&params, 2_000_000)).unwrap();
    a.transmit(&[0x40; 20], &params).unwrap();
    b.transmit(&[0x40; 20], &params).unwrap();

    a_sink.wait_for(IoEvent::TxComplete, WAIT).unwrap();
    assert_eq!(c_sink.next(WAIT).unwrap().0, IoEvent::RxTimeout);
    assert_eq!(c.collect(), None);
    clock.stop();
}

#[test]
fn test_single_transmission_is_received() {
    let clock = VirtualClock::new(ClockConfig::with_speed(20.0)).unwrap();
    let medium = Medium::new();
    let (a, _) = radio(&clock, &medium, 1);
    let (c, c_sink) = radio(&clock, &medium, 3);
    clock.start().unwrap();

    let params = RadioParams::default().with_frequency(868_300_000);
    c.receive(&RxParams::matching(&params, 2_000_000)).unwrap();
    let report = a.transmit(b"uplink", &params).unwrap();

    let ready_at = c_sink.wait_for(IoEvent::RxReady, WAIT).unwrap();
    assert_eq!(ready_at, report.end());
    assert_eq!(c.collect(), Some(b"uplink".to_vec()));
    clock.stop();
}

// ============================================================================
// Timing
// ============================================================================

/// Answers every received frame with a reply exactly one second after it ended.
struct Echo {
    clock: VirtualClock,
    radio: Mutex<Option<Arc<Radio>>>,
}

impl IoEventSink for Echo {
    fn io_event(&self, event: IoEvent, time: VirtualTime) {
        if event != IoEvent::RxReady {
            return;
        }
        let Some(radio) = self.radio.lock().clone() else {
            return;
        };
        let Some(frame) = radio.collect() else {
            return;
        };
        self.clock.on_timeout_at(time + 1_000_000, move || {
            let _ = radio.transmit(&frame, &RadioParams::default());
        });
    }
}

#[test]
fn test_reply_begins_exactly_on_schedule() {
    let clock = VirtualClock::stepped();
    let medium = Medium::new();
    let echo = Arc::new(Echo {
        clock: clock.clone(),
        radio: Mutex::new(None),
    });
    let responder = Arc::new(Radio::new(eui(9), clock.clone(), medium.clone(), echo.clone()));
    *echo.radio.lock() = Some(responder.clone());
    let (device, device_sink) = radio(&clock, &medium, 1);

    let begins = Arc::new(Mutex::new(Vec::new()));
    let b = begins.clone();
    medium.subscribe(TOPIC_TX_BEGIN, move |m: &MediumMessage| {
        if let Some(event) = m.transmission() {
            b.lock().push((event.endpoint, event.start));
        }
    });
    let ends = Arc::new(Mutex::new(0));
    let e = ends.clone();
    medium.subscribe(TOPIC_TX_END, move |_| *e.lock() += 1);

    let params = RadioParams::default();
    responder.receive(&RxParams::matching(&params, 5_000_000)).unwrap();
    let uplink = device.transmit(b"ping", &params).unwrap();
    clock.advance(uplink.airtime).unwrap();
    device.receive(&RxParams::matching(&params, 2_000_000)).unwrap();
    clock.advance(2_000_000).unwrap();

    let reply_start = uplink.end() + 1_000_000;
    assert_eq!(*begins.lock(), vec![(eui(1), uplink.start), (eui(9), reply_start)]);
    assert_eq!(*ends.lock(), 2);
    let events: Vec<IoEvent> = device_sink.drain().into_iter().map(|(e, _)| e).collect();
    assert_eq!(events, vec![IoEvent::TxComplete, IoEvent::RxReady]);
    assert_eq!(device.collect(), Some(b"ping".to_vec()));

    // Break the responder <-> sink cycle.
    echo.radio.lock().take();
}
