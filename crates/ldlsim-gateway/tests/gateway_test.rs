//! Gateway scenarios against a network server on a local UDP socket.

use crossbeam_channel::Receiver;
use ldlsim_clock::{ClockConfig, VirtualClock};
use ldlsim_common::Eui64;
use ldlsim_gateway::{Gateway, GatewayConfig, GatewayStats, Lifecycle};
use ldlsim_lora::{
    ChannelSink, Medium, MediumEvent, MediumMessage, Radio, RadioDriver, RadioParams, TOPIC_DOWN, TOPIC_TX_BEGIN,
    TOPIC_TX_END, TOPIC_UP,
};
use semtech_packet::{DataRate, Message, TxAckError, TxPacket};
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);

/// Airtime of a 5 byte frame at SF7BW125.
const HELLO_AIRTIME: u64 = 30_976;

fn gateway_eui() -> Eui64 {
    Eui64::from_bytes([0xb8, 0x27, 0xeb, 0xff, 0xfe, 0, 0, 1])
}

fn device_eui(n: u8) -> Eui64 {
    Eui64::from_bytes([0x70, 0xb3, 0xd5, 0x7e, 0, 0, 0, n])
}

/// A network server that records what it hears.
struct Server {
    socket: UdpSocket,
}

impl Server {
    fn new() -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        Server { socket }
    }

    fn config(&self) -> GatewayConfig {
        let port = self.socket.local_addr().unwrap().port();
        GatewayConfig::new(gateway_eui())
            .with_server("127.0.0.1", port)
            .with_initial_token(100)
    }

    /// Next decodable datagram, or `None` once `timeout` has passed.
    fn recv(&self, timeout: Duration) -> Option<(Message, SocketAddr)> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 4096];
        loop {
            let left = deadline.checked_duration_since(Instant::now())?;
            self.socket
                .set_read_timeout(Some(left.max(Duration::from_millis(1))))
                .unwrap();
            match self.socket.recv_from(&mut buf) {
                Ok((len, from)) => {
                    if let Ok(message) = Message::decode(&buf[..len]) {
                        return Some((message, from));
                    }
                }
                Err(_) => return None,
            }
        }
    }

    /// Wait for the first datagram matching `pred`.
    fn expect<F>(&self, mut pred: F) -> (Message, SocketAddr)
    where
        F: FnMut(&Message) -> bool,
    {
        let deadline = Instant::now() + WAIT;
        while let Some(left) = deadline.checked_duration_since(Instant::now()) {
            if let Some((message, from)) = self.recv(left) {
                if pred(&message) {
                    return (message, from);
                }
            }
        }
        panic!("no matching datagram within {:?}", WAIT);
    }

    fn send(&self, to: SocketAddr, message: &Message) {
        self.socket.send_to(&message.encode(), to).unwrap();
    }
}

fn wait_for_stats<F>(gateway: &Gateway, pred: F) -> GatewayStats
where
    F: Fn(&GatewayStats) -> bool,
{
    let deadline = Instant::now() + WAIT;
    loop {
        let stats = gateway.stats().unwrap();
        if pred(&stats) {
            return stats;
        }
        assert!(Instant::now() < deadline, "stats never matched: {:?}", stats);
        std::thread::sleep(Duration::from_millis(10));
    }
}

fn wait_until<F: Fn() -> bool>(pred: F) {
    let deadline = Instant::now() + WAIT;
    while !pred() {
        assert!(Instant::now() < deadline, "condition never held");
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn record(medium: &Medium, topic: &str) -> Receiver<Arc<MediumEvent>> {
    let (tx, rx) = crossbeam_channel::unbounded();
    medium.subscribe(topic, move |message: &MediumMessage| {
        if let Some(event) = message.transmission() {
            let _ = tx.send(event.clone());
        }
    });
    rx
}

/// Collect keepalive tokens and count status reports until the server goes quiet.
fn drain(server: &Server, pulls: &mut Vec<u16>, statuses: &mut usize) {
    while let Some((message, _)) = server.recv(Duration::from_millis(200)) {
        match message {
            Message::PullData { token, gateway } => {
                assert_eq!(gateway, gateway_eui());
                pulls.push(token);
            }
            Message::PushData { payload, .. } if payload.stat.is_some() => *statuses += 1,
            _ => {}
        }
    }
}

fn is_pull_data(message: &Message) -> bool {
    matches!(message, Message::PullData { .. })
}

fn is_tx_ack(message: &Message) -> bool {
    matches!(message, Message::TxAck { .. })
}

// ============================================================================
// Keepalive and status
// ============================================================================

#[test]
fn test_keepalive_on_interval_with_stepped_clock() {
    let clock = VirtualClock::stepped();
    let medium = Medium::new();
    let server = Server::new();
    let gateway = Gateway::new(server.config().with_keepalive_interval(1), clock.clone(), medium);
    gateway.start().unwrap();

    let mut pulls = Vec::new();
    let mut statuses = 0;
    drain(&server, &mut pulls, &mut statuses);
    assert_eq!(pulls, vec![100]);
    assert_eq!(statuses, 1);

    // Both rescheduled timers are armed before time moves.
    wait_until(|| clock.pending() == 2);
    clock.advance(1_500_000).unwrap();
    drain(&server, &mut pulls, &mut statuses);
    assert_eq!(pulls, vec![100, 102]);
    assert_eq!(statuses, 1);

    gateway.stop().unwrap();
    assert_eq!(clock.pending(), 0);
}

#[test]
fn test_keepalive_and_ack_ratio_in_real_time() {
    let clock = VirtualClock::new(ClockConfig::with_speed(4.0)).unwrap();
    let medium = Medium::new();
    let server = Server::new();
    let gateway = Gateway::new(
        server.config().with_keepalive_interval(1),
        clock.clone(),
        medium.clone(),
    );
    clock.start().unwrap();
    gateway.start().unwrap();
    let t0 = clock.time();

    let mut pulls = Vec::new();
    while clock.time() < t0 + 1_500_000 {
        let Some((Message::PullData { token, .. }, from)) = server.recv(Duration::from_millis(10)) else {
            continue;
        };
        if pulls.is_empty() {
            assert_eq!(gateway.stats().unwrap().ack_ratio, 0.0);
            server.send(
                from,
                &Message::PullAck {
                    token,
                    gateway: Some(gateway_eui()),
                },
            );
        }
        pulls.push(token);
    }
    assert_eq!(pulls.len(), 2);
    assert!(pulls[1] > pulls[0]);

    let stats = wait_for_stats(&gateway, |s| s.acks_received == 1);
    assert!(stats.ack_ratio > 0.0 && stats.ack_ratio < 100.0);

    gateway.stop().unwrap();
    clock.stop();
}

#[test]
fn test_status_reports_location_and_counters() {
    let clock = VirtualClock::stepped();
    let server = Server::new();
    let gateway = Gateway::new(server.config(), clock, Medium::new());
    gateway.start().unwrap();

    let (message, _) = server.expect(|m| matches!(m, Message::PushData { payload, .. } if payload.stat.is_some()));
    let Message::PushData { token, payload, .. } = message else {
        unreachable!();
    };
    assert_eq!(token, 101);
    let stat = payload.stat.unwrap();
    assert_eq!(stat.lati, 51.4576);
    assert_eq!(stat.long, 0.9705);
    assert_eq!(stat.alti, 61);
    assert_eq!(stat.rxnb, 0);
    assert_eq!(stat.txnb, 1);
    assert_eq!(stat.ackr, 0.0);
    assert!(stat.time.is_some());
    gateway.stop().unwrap();
}

// ============================================================================
// Uplinks
// ============================================================================

#[test]
fn test_uplink_forwarded() {
    let clock = VirtualClock::new(ClockConfig::with_speed(4.0)).unwrap();
    let medium = Medium::new();
    let server = Server::new();
    let gateway = Gateway::new(server.config(), clock.clone(), medium.clone());
    let device = Radio::new(device_eui(1), clock.clone(), medium.clone(), Arc::new(ChannelSink::new()));
    clock.start().unwrap();
    gateway.start().unwrap();
    server.expect(is_pull_data);

    let params = RadioParams::default().with_frequency(868_300_000);
    let report = device.transmit(b"uplink", &params).unwrap();

    let (message, _) = server.expect(|m| matches!(m, Message::PushData { payload, .. } if !payload.rxpk.is_empty()));
    let Message::PushData { payload, .. } = message else {
        unreachable!();
    };
    let rxpk = &payload.rxpk[0];
    assert_eq!(rxpk.data, b"uplink");
    assert_eq!(rxpk.size, 6);
    assert_eq!(rxpk.tmst, report.end().tmst());
    assert_eq!(rxpk.freq, 868.3);
    assert_eq!(rxpk.chan, 1);
    assert_eq!(rxpk.datr, DataRate::new(7, 125));
    assert_eq!(rxpk.stat, 1);

    let stats = wait_for_stats(&gateway, |s| s.rxfw == 1);
    assert_eq!((stats.rxnb, stats.rxok, stats.collided), (1, 1, 0));

    gateway.stop().unwrap();
    clock.stop();
}

#[test]
fn test_colliding_uplinks_are_lost() {
    let clock = VirtualClock::new(ClockConfig::with_speed(4.0)).unwrap();
    let medium = Medium::new();
    let server = Server::new();
    let gateway = Gateway::new(server.config(), clock.clone(), medium.clone());
    let a = Radio::new(device_eui(1), clock.clone(), medium.clone(), Arc::new(ChannelSink::new()));
    let b = Radio::new(device_eui(2), clock.clone(), medium.clone(), Arc::new(ChannelSink::new()));
    clock.start().unwrap();
    gateway.start().unwrap();

    let params = RadioParams::default();
    a.transmit(&[0x40; 20], &params).unwrap();
    b.transmit(&[0x40; 20], &params).unwrap();

    let stats = wait_for_stats(&gateway, |s| s.rxnb == 2);
    assert_eq!((stats.rxok, stats.rxfw, stats.collided), (0, 0, 2));

    gateway.stop().unwrap();
    clock.stop();
}

#[test]
fn test_uplink_on_unknown_channel_ignored() {
    let clock = VirtualClock::stepped();
    let medium = Medium::new();
    let server = Server::new();
    let gateway = Gateway::new(server.config(), clock.clone(), medium.clone());
    let device = Radio::new(device_eui(1), clock.clone(), medium.clone(), Arc::new(ChannelSink::new()));
    gateway.start().unwrap();

    let report = device
        .transmit(b"x", &RadioParams::default().with_frequency(869_525_000))
        .unwrap();
    clock.advance(report.airtime).unwrap();

    let stats = gateway.stats().unwrap();
    assert_eq!(stats.rxnb, 0);
    gateway.stop().unwrap();
}

// ============================================================================
// Downlinks
// ============================================================================

#[test]
fn test_immediate_downlink() {
    let clock = VirtualClock::new(ClockConfig::with_speed(2.0)).unwrap();
    let medium = Medium::new();
    let begins = record(&medium, TOPIC_TX_BEGIN);
    let (end_tx, ends) = crossbeam_channel::unbounded();
    let end_clock = clock.clone();
    medium.subscribe(TOPIC_TX_END, move |message: &MediumMessage| {
        if let Some(event) = message.transmission() {
            let _ = end_tx.send((event.clone(), end_clock.time()));
        }
    });

    let server = Server::new();
    let gateway = Gateway::new(server.config(), clock.clone(), medium.clone());
    clock.start().unwrap();
    gateway.start().unwrap();
    let (_, from) = server.expect(is_pull_data);

    let txpk = TxPacket::immediate(869.525, DataRate::new(7, 125), 14, b"hello".to_vec());
    server.send(from, &Message::PullResp { token: 0x4242, txpk });

    let (ack, _) = server.expect(is_tx_ack);
    assert_eq!(
        ack,
        Message::TxAck {
            token: 0x4242,
            gateway: gateway_eui(),
            error: TxAckError::None,
        }
    );

    let begin = begins.recv_timeout(WAIT).unwrap();
    assert_eq!(begin.endpoint, gateway_eui());
    assert_eq!(begin.data, b"hello");
    assert_eq!(begin.params.frequency_hz, 869_525_000);
    assert_eq!(begin.airtime, HELLO_AIRTIME);

    let (end, ended_at) = ends.recv_timeout(WAIT).unwrap();
    assert!(Arc::ptr_eq(&begin, &end));
    assert_eq!(ended_at, begin.start + HELLO_AIRTIME);

    let stats = wait_for_stats(&gateway, |s| s.emitted == 1);
    assert_eq!(stats.dwnb, 1);

    gateway.stop().unwrap();
    clock.stop();
}

#[test]
fn test_timestamped_downlink_starts_on_time() {
    let clock = VirtualClock::new(ClockConfig::with_speed(4.0)).unwrap();
    let medium = Medium::new();
    let begins = record(&medium, TOPIC_TX_BEGIN);
    let server = Server::new();
    let gateway = Gateway::new(server.config(), clock.clone(), medium.clone());
    clock.start().unwrap();
    gateway.start().unwrap();
    let (_, from) = server.expect(is_pull_data);

    let target = clock.time() + 1_000_000;
    let txpk = TxPacket::at_tmst(target.tmst(), 869.525, DataRate::new(7, 125), 14, b"hello".to_vec());
    server.send(from, &Message::PullResp { token: 1, txpk });

    let (ack, _) = server.expect(is_tx_ack);
    assert!(matches!(ack, Message::TxAck { error: TxAckError::None, .. }));
    let begin = begins.recv_timeout(WAIT).unwrap();
    assert_eq!(begin.start, target);

    gateway.stop().unwrap();
    clock.stop();
}

#[test]
fn test_late_downlink_refused() {
    let clock = VirtualClock::new(ClockConfig::with_speed(2.0)).unwrap();
    let medium = Medium::new();
    let begins = record(&medium, TOPIC_TX_BEGIN);
    let server = Server::new();
    let gateway = Gateway::new(server.config(), clock.clone(), medium.clone());
    clock.start().unwrap();
    gateway.start().unwrap();
    let (_, from) = server.expect(is_pull_data);

    let past = clock.time().tmst().wrapping_sub(2_000_000);
    let txpk = TxPacket::at_tmst(past, 869.525, DataRate::new(7, 125), 14, b"hello".to_vec());
    server.send(from, &Message::PullResp { token: 7, txpk });

    let (ack, _) = server.expect(is_tx_ack);
    assert!(matches!(ack, Message::TxAck { token: 7, error: TxAckError::TooLate, .. }));
    assert!(begins.recv_timeout(Duration::from_millis(200)).is_err());
    let stats = gateway.stats().unwrap();
    assert_eq!((stats.dwnb, stats.emitted), (1, 0));

    gateway.stop().unwrap();
    clock.stop();
}

#[test]
fn test_gps_time_and_limits_refused() {
    let clock = VirtualClock::new(ClockConfig::with_speed(2.0)).unwrap();
    let medium = Medium::new();
    let begins = record(&medium, TOPIC_TX_BEGIN);
    let server = Server::new();
    let gateway = Gateway::new(server.config(), clock.clone(), medium.clone());
    clock.start().unwrap();
    gateway.start().unwrap();
    let (_, from) = server.expect(is_pull_data);

    let base = TxPacket::immediate(869.525, DataRate::new(7, 125), 14, b"hello".to_vec());
    let gps = TxPacket {
        imme: false,
        tmms: Some(1_300_000_000_000),
        ..base.clone()
    };
    let early = TxPacket {
        imme: false,
        tmst: Some(clock.time().tmst().wrapping_add(60_000_000)),
        ..base.clone()
    };
    let loud = TxPacket { powe: 40, ..base.clone() };
    let off_band = TxPacket { freq: 433.175, ..base };

    for (token, txpk, expected) in [
        (1, gps, TxAckError::GpsUnlocked),
        (2, early, TxAckError::TooEarly),
        (3, loud, TxAckError::TxPower),
        (4, off_band, TxAckError::TxFreq),
    ] {
        server.send(from, &Message::PullResp { token, txpk });
        let (ack, _) = server.expect(is_tx_ack);
        assert_eq!(
            ack,
            Message::TxAck {
                token,
                gateway: gateway_eui(),
                error: expected,
            }
        );
    }
    assert!(begins.try_recv().is_err());

    gateway.stop().unwrap();
    clock.stop();
}

// ============================================================================
// Robustness and lifecycle
// ============================================================================

#[test]
fn test_garbage_datagrams_discarded() {
    let clock = VirtualClock::stepped();
    let server = Server::new();
    let gateway = Gateway::new(server.config(), clock, Medium::new());
    gateway.start().unwrap();
    let (_, from) = server.expect(is_pull_data);

    server.socket.send_to(&[1, 0, 0, 4], from).unwrap();
    server.socket.send_to(&[2, 0, 0, 9], from).unwrap();
    server.socket.send_to(b"\x02\x00\x01\x03{not json", from).unwrap();

    let stats = wait_for_stats(&gateway, |s| s.decode_errors == 3);
    assert_eq!(stats.dwnb, 0);
    assert!(gateway.is_running());
    gateway.stop().unwrap();
}

#[test]
fn test_lifecycle_and_bus_announcements() {
    let clock = VirtualClock::stepped();
    let medium = Medium::new();
    let ups = Arc::new(AtomicUsize::new(0));
    let downs = Arc::new(AtomicUsize::new(0));
    let u = ups.clone();
    medium.subscribe(TOPIC_UP, move |_| {
        u.fetch_add(1, Ordering::SeqCst);
    });
    let d = downs.clone();
    medium.subscribe(TOPIC_DOWN, move |_| {
        d.fetch_add(1, Ordering::SeqCst);
    });

    let server = Server::new();
    let gateway = Gateway::new(server.config(), clock.clone(), medium.clone());
    assert_eq!(gateway.lifecycle(), Lifecycle::Idle);
    let subscriptions = medium.total_subscriptions();

    gateway.start().unwrap();
    assert_eq!(gateway.lifecycle(), Lifecycle::Running);
    assert_eq!(ups.load(Ordering::SeqCst), 1);
    assert!(gateway.start().is_err());
    server.expect(is_pull_data);

    gateway.stop().unwrap();
    assert_eq!(gateway.lifecycle(), Lifecycle::Stopped);
    assert_eq!(downs.load(Ordering::SeqCst), 1);
    assert_eq!(medium.total_subscriptions(), subscriptions);
    assert_eq!(clock.pending(), 0);

    // Final counters survive the stop; the gateway cannot come back.
    assert_eq!(gateway.stats().unwrap().txnb, 2);
    assert!(gateway.start().is_err());
    gateway.stop().unwrap();
}
