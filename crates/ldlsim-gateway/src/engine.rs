//! The gateway engine.
//!
//! ## Threads
//!
//! ```text
//!   medium tx_begin/tx_end ──┐
//!   clock timers ────────────┤
//!   radio tx_complete ───────┼──► task queue ──► consumer (owns all state) ──► UDP
//!   UDP reader ──────────────┘
//! ```
//!
//! Everything except the consumer only enqueues [`Task`]s. Counters, the ack
//! window, the downlink schedule and the socket's send side belong to the
//! consumer, so none of them are locked.

use crate::ack::AckWindow;
use crate::scheduler::{DownlinkScheduler, Slot};
use crate::{GatewayConfig, GatewayError, GatewayResult};
use chrono::{DateTime, Duration as UtcDuration, SubsecRound, Utc};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use ldlsim_clock::{TimerHandle, VirtualClock};
use ldlsim_common::{Eui64, SubscriptionId, VirtualTime};
use ldlsim_lora::medium;
use ldlsim_lora::{
    IoEvent, IoEventSink, Medium, MediumEvent, MediumMessage, Radio, RadioDriver, RadioOptions, TOPIC_TX_BEGIN,
    TOPIC_TX_END,
};
use ldlsim_metrics::{metric_defs, EndpointLabels};
use parking_lot::Mutex;
use semtech_packet::{
    hz_to_mhz, CodingRate, DataRate, Message, Modulation, PushPayload, RxPacket, Status, TxAckError,
};
use serde::Serialize;
use std::fmt;
use std::io::{self, ErrorKind};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// How often the reader checks whether it should exit.
const READ_TIMEOUT: Duration = Duration::from_millis(50);

/// How long [`Gateway::stats`] waits for the consumer.
const STATS_TIMEOUT: Duration = Duration::from_secs(2);

const MAX_DATAGRAM: usize = 8192;

// ============================================================================
// Lifecycle and statistics
// ============================================================================

/// Where a gateway is in its life. Stopped is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Idle,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Lifecycle::Idle => "idle",
            Lifecycle::Running => "running",
            Lifecycle::Stopping => "stopping",
            Lifecycle::Stopped => "stopped",
        })
    }
}

/// Counters reported by a gateway.
///
/// The first six mirror the fields of the status record.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GatewayStats {
    /// Radio packets received.
    pub rxnb: u32,
    /// Radio packets received intact.
    pub rxok: u32,
    /// Radio packets forwarded upstream.
    pub rxfw: u32,
    /// Downlink requests received.
    pub dwnb: u32,
    /// Upstream datagrams sent.
    pub txnb: u32,
    /// Acknowledged share of the ack window, in percent.
    pub ack_ratio: f64,
    /// Downlinks that finished transmitting.
    pub emitted: u32,
    /// Uplinks lost to a collision.
    pub collided: u32,
    pub acks_received: u32,
    pub decode_errors: u32,
}

// ============================================================================
// Tasks
// ============================================================================

/// Work items for the consumer.
enum Task {
    Keepalive,
    Status,
    /// Another endpoint started transmitting.
    Begin(Arc<MediumEvent>),
    /// Another endpoint finished transmitting.
    End(Arc<MediumEvent>),
    /// A datagram from the server.
    Datagram(Vec<u8>),
    /// One of our downlinks left the antenna.
    TxComplete(VirtualTime),
    SocketFailed(io::Error),
    Stats(Sender<GatewayStats>),
    Stop,
}

/// Forwards the gateway radio's completions to the consumer.
struct TaskSink(Sender<Task>);

impl IoEventSink for TaskSink {
    fn io_event(&self, event: IoEvent, time: VirtualTime) {
        if event == IoEvent::TxComplete {
            let _ = self.0.send(Task::TxComplete(time));
        }
    }
}

// ============================================================================
// Gateway
// ============================================================================

struct Workers {
    tasks: Sender<Task>,
    stop_reader: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    consumer: JoinHandle<GatewayResult<()>>,
}

/// A LoRa gateway bridging a [`Medium`] to a network server over UDP.
///
/// ```text
/// Idle ──start──► Running ──stop / socket error──► Stopping ──► Stopped
/// ```
pub struct Gateway {
    config: GatewayConfig,
    clock: VirtualClock,
    medium: Medium,
    lifecycle: Arc<Mutex<Lifecycle>>,
    final_stats: Arc<Mutex<Option<GatewayStats>>>,
    workers: Mutex<Option<Workers>>,
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway")
            .field("eui", &self.config.eui)
            .field("server", &format_args!("{}:{}", self.config.host, self.config.port))
            .field("lifecycle", &self.lifecycle())
            .finish()
    }
}

impl Gateway {
    pub fn new(config: GatewayConfig, clock: VirtualClock, medium: Medium) -> Self {
        Gateway {
            config,
            clock,
            medium,
            lifecycle: Arc::new(Mutex::new(Lifecycle::Idle)),
            final_stats: Arc::new(Mutex::new(None)),
            workers: Mutex::new(None),
        }
    }

    pub fn eui(&self) -> Eui64 {
        self.config.eui
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.lock()
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle() == Lifecycle::Running
    }

    /// Connect to the server and start forwarding.
    ///
    /// A keepalive and a status report go out straight away.
    pub fn start(&self) -> GatewayResult<()> {
        let mut workers = self.workers.lock();
        let lifecycle = self.lifecycle();
        if lifecycle != Lifecycle::Idle {
            return Err(GatewayError::InvalidState(lifecycle));
        }
        self.config.validate()?;

        let eui = self.config.eui;
        let socket = connect(&self.config.host, self.config.port)?;
        socket.set_read_timeout(Some(READ_TIMEOUT))?;
        let reader_socket = socket.try_clone()?;

        let (tasks, queue) = crossbeam_channel::unbounded();
        let radio = Arc::new(Radio::with_options(
            eui,
            self.clock.clone(),
            self.medium.clone(),
            Arc::new(TaskSink(tasks.clone())),
            RadioOptions::default().with_role("gateway"),
        ));
        let subscriptions = self.listen(&tasks);
        let listeners = subscriptions.clone();

        let now = self.clock.time();
        let _ = tasks.send(Task::Keepalive);
        let _ = tasks.send(Task::Status);

        let stop_reader = Arc::new(AtomicBool::new(false));
        let consumer = Consumer {
            token: self.config.initial_token.unwrap_or_else(rand::random),
            acks: AckWindow::new(self.config.ack_window),
            scheduler: DownlinkScheduler::new(&self.config),
            labels: EndpointLabels::new(eui.to_string(), "gateway"),
            utc_origin: Utc::now() - UtcDuration::microseconds(now.ticks() as i64),
            config: self.config.clone(),
            clock: self.clock.clone(),
            medium: self.medium.clone(),
            socket,
            radio,
            tasks: tasks.clone(),
            queue,
            subscriptions,
            keepalive: Recurring::new(now),
            status: Recurring::new(now),
            downlinks: Vec::new(),
            captures: Vec::new(),
            stats: GatewayStats::default(),
            lifecycle: self.lifecycle.clone(),
            final_stats: self.final_stats.clone(),
            stop_reader: stop_reader.clone(),
        };

        *self.lifecycle.lock() = Lifecycle::Running;
        let consumer = match thread::Builder::new()
            .name(format!("gw-{}", eui))
            .spawn(move || consumer.run())
        {
            Ok(handle) => handle,
            Err(e) => {
                // The consumer was dropped unstarted, so clean up after it here.
                for id in listeners {
                    self.medium.unsubscribe(id);
                }
                *self.lifecycle.lock() = Lifecycle::Idle;
                return Err(e.into());
            }
        };

        let reader_tasks = tasks.clone();
        let reader_stop = stop_reader.clone();
        let reader = match thread::Builder::new()
            .name(format!("gw-{}-rx", eui))
            .spawn(move || read_loop(eui, reader_socket, reader_tasks, reader_stop))
        {
            Ok(handle) => handle,
            Err(e) => {
                let _ = tasks.send(Task::Stop);
                let _ = consumer.join();
                return Err(e.into());
            }
        };

        medium::publish(&self.medium, &MediumMessage::Up { eui });
        info!(
            "gateway {}: started, server {}:{}",
            eui, self.config.host, self.config.port
        );
        *workers = Some(Workers {
            tasks,
            stop_reader,
            reader,
            consumer,
        });
        Ok(())
    }

    /// Subscribe the medium listeners. They only enqueue.
    fn listen(&self, tasks: &Sender<Task>) -> Vec<SubscriptionId> {
        let eui = self.config.eui;
        let begin_tasks = tasks.clone();
        let begin = self.medium.subscribe(TOPIC_TX_BEGIN, move |message: &MediumMessage| {
            if let Some(event) = message.transmission().filter(|e| e.endpoint != eui) {
                let _ = begin_tasks.send(Task::Begin(event.clone()));
            }
        });
        let end_tasks = tasks.clone();
        let end = self.medium.subscribe(TOPIC_TX_END, move |message: &MediumMessage| {
            if let Some(event) = message.transmission().filter(|e| e.endpoint != eui) {
                let _ = end_tasks.send(Task::End(event.clone()));
            }
        });
        vec![begin, end]
    }

    /// Stop the gateway and wait for its threads.
    ///
    /// Returns the socket error that ended the gateway early, if one did.
    /// Stopping an idle or stopped gateway does nothing.
    pub fn stop(&self) -> GatewayResult<()> {
        let Some(workers) = self.workers.lock().take() else {
            return Ok(());
        };
        {
            let mut lifecycle = self.lifecycle.lock();
            if *lifecycle == Lifecycle::Running {
                *lifecycle = Lifecycle::Stopping;
            }
        }
        let _ = workers.tasks.send(Task::Stop);
        let result = workers
            .consumer
            .join()
            .map_err(|_| GatewayError::WorkerPanicked("consumer"))
            .and_then(|result| result);

        workers.stop_reader.store(true, Ordering::Release);
        if workers.reader.join().is_err() {
            warn!("gateway {}: reader thread panicked", self.config.eui);
        }
        *self.lifecycle.lock() = Lifecycle::Stopped;
        result
    }

    /// Current counters.
    ///
    /// Once the gateway has stopped this is the final snapshot.
    pub fn stats(&self) -> GatewayResult<GatewayStats> {
        let tasks = self.workers.lock().as_ref().map(|w| w.tasks.clone());
        if let Some(tasks) = tasks {
            let (reply, answer) = crossbeam_channel::bounded(1);
            if tasks.send(Task::Stats(reply)).is_ok() {
                match answer.recv_timeout(STATS_TIMEOUT) {
                    Ok(stats) => return Ok(stats),
                    Err(RecvTimeoutError::Timeout) => return Err(GatewayError::Unresponsive),
                    // The consumer exited with the request still queued.
                    Err(RecvTimeoutError::Disconnected) => {}
                }
            }
        }
        self.final_stats
            .lock()
            .clone()
            .ok_or_else(|| GatewayError::InvalidState(self.lifecycle()))
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("gateway {}: {}", self.config.eui, e);
        }
    }
}

fn connect(host: &str, port: u16) -> GatewayResult<UdpSocket> {
    let server = (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| GatewayError::Resolve(format!("{}:{}", host, port)))?;
    let local: SocketAddr = if server.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(local)?;
    socket.connect(server)?;
    Ok(socket)
}

fn read_loop(eui: Eui64, socket: UdpSocket, tasks: Sender<Task>, stop: Arc<AtomicBool>) {
    let mut buf = [0u8; MAX_DATAGRAM];
    while !stop.load(Ordering::Acquire) {
        match socket.recv(&mut buf) {
            Ok(len) => {
                if tasks.send(Task::Datagram(buf[..len].to_vec())).is_err() {
                    break;
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted) => {}
            // ICMP port unreachable from an earlier send.
            Err(e) if e.kind() == ErrorKind::ConnectionRefused => {
                debug!("gateway {}: server unreachable", eui);
            }
            Err(e) => {
                let _ = tasks.send(Task::SocketFailed(e));
                break;
            }
        }
    }
    trace!("gateway {}: reader exited", eui);
}

// ============================================================================
// Consumer
// ============================================================================

/// A self-rescheduling timer that never drifts.
struct Recurring {
    next: VirtualTime,
    timer: Option<TimerHandle>,
}

impl Recurring {
    fn new(first: VirtualTime) -> Self {
        Recurring { next: first, timer: None }
    }
}

/// An uplink being heard.
struct Capture {
    event: Arc<MediumEvent>,
    channel: usize,
    collided: bool,
}

struct Consumer {
    config: GatewayConfig,
    clock: VirtualClock,
    medium: Medium,
    socket: UdpSocket,
    radio: Arc<Radio>,
    tasks: Sender<Task>,
    queue: Receiver<Task>,
    subscriptions: Vec<SubscriptionId>,
    keepalive: Recurring,
    status: Recurring,
    /// Timers of accepted timestamped downlinks, by start time.
    downlinks: Vec<(VirtualTime, TimerHandle)>,
    captures: Vec<Capture>,
    token: u16,
    acks: AckWindow,
    scheduler: DownlinkScheduler,
    stats: GatewayStats,
    /// Wall time corresponding to virtual time zero.
    utc_origin: DateTime<Utc>,
    labels: EndpointLabels,
    lifecycle: Arc<Mutex<Lifecycle>>,
    final_stats: Arc<Mutex<Option<GatewayStats>>>,
    stop_reader: Arc<AtomicBool>,
}

impl Consumer {
    fn run(mut self) -> GatewayResult<()> {
        let result = loop {
            let Ok(task) = self.queue.recv() else {
                break Ok(());
            };
            match self.handle(task) {
                Ok(true) => {}
                Ok(false) => break Ok(()),
                Err(e) => {
                    error!("gateway {}: {}, stopping", self.config.eui, e);
                    break Err(e);
                }
            }
        };
        self.shutdown();
        result
    }

    /// Process one task. `Ok(false)` ends the loop.
    fn handle(&mut self, task: Task) -> GatewayResult<bool> {
        match task {
            Task::Keepalive => self.keepalive()?,
            Task::Status => self.status()?,
            Task::Begin(event) => self.capture_begin(event),
            Task::End(event) => self.capture_end(&event)?,
            Task::Datagram(bytes) => self.downstream(&bytes)?,
            Task::TxComplete(time) => {
                self.stats.emitted += 1;
                debug!("gateway {}: downlink complete at {}", self.config.eui, time);
            }
            Task::SocketFailed(e) => return Err(e.into()),
            Task::Stats(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Task::Stop => return Ok(false),
        }
        Ok(true)
    }

    fn keepalive(&mut self) -> GatewayResult<()> {
        let token = self.next_token();
        self.send(
            &Message::PullData {
                token,
                gateway: self.config.eui,
            },
            "pull_data",
        )?;
        self.keepalive.next = self.keepalive.next + self.config.keepalive_ticks();
        self.keepalive.timer = Some(self.enqueue_at(self.keepalive.next, Task::Keepalive));
        Ok(())
    }

    fn status(&mut self) -> GatewayResult<()> {
        let now = self.clock.time();
        let location = self.config.location;
        let stat = Status {
            time: Some(status_time(self.utc_origin, now)),
            lati: location.latitude,
            long: location.longitude,
            alti: location.altitude,
            rxnb: self.stats.rxnb,
            rxok: self.stats.rxok,
            rxfw: self.stats.rxfw,
            ackr: self.acks.ratio(),
            dwnb: self.stats.dwnb,
            txnb: self.stats.txnb,
        };
        let token = self.next_token();
        let message = Message::PushData {
            token,
            gateway: self.config.eui,
            payload: PushPayload {
                rxpk: Vec::new(),
                stat: Some(stat),
            },
        };
        self.send(&message, "status")?;
        self.status.next = self.status.next + self.config.status_ticks();
        self.status.timer = Some(self.enqueue_at(self.status.next, Task::Status));
        Ok(())
    }

    fn capture_begin(&mut self, event: Arc<MediumEvent>) {
        let params = event.params;
        let Some(channel) = self.config.channel_index(params.frequency_hz, params.bandwidth_hz) else {
            trace!(
                "gateway {}: not listening on {} Hz, ignoring {}",
                self.config.eui,
                params.frequency_hz,
                event.endpoint
            );
            return;
        };
        let mut collided = false;
        for capture in self.captures.iter_mut().filter(|c| c.event.collides_with(&event)) {
            capture.collided = true;
            collided = true;
        }
        if collided {
            debug!(
                "gateway {}: uplink from {} at {} overlaps another on channel {}",
                self.config.eui, event.endpoint, event.start, channel
            );
        }
        self.captures.push(Capture {
            event,
            channel,
            collided,
        });
    }

    fn capture_end(&mut self, event: &Arc<MediumEvent>) -> GatewayResult<()> {
        let Some(index) = self
            .captures
            .iter()
            .position(|c| Arc::ptr_eq(&c.event, event) || *c.event == **event)
        else {
            return Ok(());
        };
        let capture = self.captures.swap_remove(index);
        self.stats.rxnb += 1;
        if capture.collided {
            self.stats.collided += 1;
            ldlsim_metrics::metrics::counter!(metric_defs::GATEWAY_UPLINKS_COLLIDED.name, &self.labels.to_labels())
                .increment(1);
            debug!(
                "gateway {}: lost uplink from {} to a collision",
                self.config.eui, event.endpoint
            );
            return Ok(());
        }
        self.stats.rxok += 1;
        self.stats.rxfw += 1;

        let params = event.params;
        let end = event.end();
        let rxpk = RxPacket {
            time: Some(self.utc(end)),
            tmst: end.tmst(),
            freq: hz_to_mhz(params.frequency_hz),
            chan: capture.channel as u8,
            rfch: 0,
            stat: 1,
            modu: Modulation::Lora,
            datr: DataRate::new(params.spreading_factor, (params.bandwidth_hz / 1_000) as u16),
            codr: CodingRate(params.coding_rate),
            rssi: self.config.reported_rssi,
            lsnr: self.config.reported_snr,
            size: event.data.len() as u16,
            data: event.data.clone(),
        };
        let token = self.next_token();
        let message = Message::PushData {
            token,
            gateway: self.config.eui,
            payload: PushPayload {
                rxpk: vec![rxpk],
                stat: None,
            },
        };
        self.send(&message, "rxpk")?;
        ldlsim_metrics::metrics::counter!(metric_defs::GATEWAY_UPLINKS_FORWARDED.name, &self.labels.to_labels())
            .increment(1);
        debug!(
            "gateway {}: forwarded {} bytes from {} (token {:#06x})",
            self.config.eui,
            event.data.len(),
            event.endpoint,
            token
        );
        Ok(())
    }

    fn downstream(&mut self, bytes: &[u8]) -> GatewayResult<()> {
        let message = match Message::decode(bytes) {
            Ok(message) => message,
            Err(e) => {
                self.stats.decode_errors += 1;
                ldlsim_metrics::metrics::counter!(metric_defs::GATEWAY_DECODE_ERRORS.name, &self.labels.to_labels())
                    .increment(1);
                warn!(
                    "gateway {}: discarding {} byte datagram: {}",
                    self.config.eui,
                    bytes.len(),
                    e
                );
                return Ok(());
            }
        };
        trace!("gateway {}: received {}", self.config.eui, message);

        match message {
            Message::PushAck { token, .. } => self.acknowledge(token, "push_ack"),
            Message::PullAck { token, .. } => self.acknowledge(token, "pull_ack"),
            Message::PullResp { token, txpk } => {
                self.stats.dwnb += 1;
                let now = self.clock.time();
                let radio = self.radio.clone();
                let len = txpk.data.len();
                let admitted = self.scheduler.admit(&txpk, now, |params| radio.airtime(params, len));
                let error = admitted.as_ref().err().copied().unwrap_or(TxAckError::None);
                ldlsim_metrics::metrics::counter!(
                    metric_defs::GATEWAY_DOWNLINKS_RECEIVED.name,
                    &self.labels.with("result", error.as_str())
                )
                .increment(1);

                self.send(
                    &Message::TxAck {
                        token,
                        gateway: self.config.eui,
                        error,
                    },
                    "tx_ack",
                )?;
                match admitted {
                    Ok(slot) => self.launch(slot, txpk.data, now),
                    Err(error) => info!("gateway {}: refused downlink: {}", self.config.eui, error),
                }
            }
            other => warn!("gateway {}: unexpected {} from server", self.config.eui, other),
        }
        Ok(())
    }

    fn acknowledge(&mut self, token: u16, kind: &str) {
        if self.acks.acknowledge(token) {
            self.stats.acks_received += 1;
            ldlsim_metrics::metrics::counter!(metric_defs::GATEWAY_ACKS_RECEIVED.name, &self.labels.with_kind(kind))
                .increment(1);
            ldlsim_metrics::metrics::gauge!(metric_defs::GATEWAY_ACK_RATIO.name, &self.labels.to_labels())
                .set(self.acks.ratio());
        } else {
            debug!(
                "gateway {}: {} for unknown token {:#06x}",
                self.config.eui, kind, token
            );
        }
    }

    /// Put an accepted downlink on the air, now or at its slot.
    fn launch(&mut self, slot: Slot, data: Vec<u8>, now: VirtualTime) {
        if slot.immediate {
            if let Err(e) = self.radio.transmit(&data, &slot.params) {
                warn!("gateway {}: immediate downlink failed: {}", self.config.eui, e);
            }
            return;
        }
        debug!(
            "gateway {}: downlink of {} bytes scheduled for {}",
            self.config.eui,
            data.len(),
            slot.start
        );
        let radio = self.radio.clone();
        let eui = self.config.eui;
        let timer = self.clock.on_timeout_at(slot.start, move || {
            if let Err(e) = radio.transmit(&data, &slot.params) {
                warn!("gateway {}: scheduled downlink failed: {}", eui, e);
            }
        });
        self.downlinks.retain(|(start, _)| *start > now);
        self.downlinks.push((slot.start, timer));
    }

    fn next_token(&mut self) -> u16 {
        let token = self.token;
        self.token = self.token.wrapping_add(1);
        token
    }

    /// Send an upstream datagram and track its token.
    fn send(&mut self, message: &Message, kind: &str) -> GatewayResult<()> {
        match self.socket.send(&message.encode()) {
            Ok(_) => {}
            // A previous datagram bounced. Real forwarders keep going.
            Err(e) if e.kind() == ErrorKind::ConnectionRefused => {
                warn!("gateway {}: server refused {}", self.config.eui, message);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
        trace!("gateway {}: sent {}", self.config.eui, message);
        if !matches!(message, Message::TxAck { .. }) {
            self.acks.record(message.token());
        }
        self.stats.txnb += 1;
        ldlsim_metrics::metrics::counter!(metric_defs::GATEWAY_DATAGRAMS_SENT.name, &self.labels.with_kind(kind))
            .increment(1);
        Ok(())
    }

    fn enqueue_at(&self, at: VirtualTime, task: Task) -> TimerHandle {
        let tasks = self.tasks.clone();
        self.clock.on_timeout_at(at, move || {
            let _ = tasks.send(task);
        })
    }

    fn utc(&self, time: VirtualTime) -> DateTime<Utc> {
        utc_at(self.utc_origin, time)
    }

    fn snapshot(&self) -> GatewayStats {
        GatewayStats {
            ack_ratio: self.acks.ratio(),
            ..self.stats.clone()
        }
    }

    fn shutdown(&mut self) {
        {
            let mut lifecycle = self.lifecycle.lock();
            if *lifecycle == Lifecycle::Running {
                *lifecycle = Lifecycle::Stopping;
            }
        }
        let timers = [self.keepalive.timer.take(), self.status.timer.take()];
        for timer in timers.into_iter().flatten().chain(self.downlinks.drain(..).map(|(_, t)| t)) {
            let _ = self.clock.cancel(timer);
        }
        for id in self.subscriptions.drain(..) {
            self.medium.unsubscribe(id);
        }
        self.radio.shutdown();
        self.stop_reader.store(true, Ordering::Release);

        medium::publish(&self.medium, &MediumMessage::Down { eui: self.config.eui });
        *self.final_stats.lock() = Some(self.snapshot());
        *self.lifecycle.lock() = Lifecycle::Stopped;
        info!(
            "gateway {}: stopped after {} datagrams, {} uplinks forwarded",
            self.config.eui, self.stats.txnb, self.stats.rxfw
        );
    }
}

fn utc_at(origin: DateTime<Utc>, time: VirtualTime) -> DateTime<Utc> {
    origin + UtcDuration::microseconds(time.ticks() as i64)
}

/// `stat.time` only carries whole seconds.
fn status_time(origin: DateTime<Utc>, time: VirtualTime) -> DateTime<Utc> {
    utc_at(origin, time).trunc_subsecs(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ldlsim_common::secs_to_ticks;
    use std::time::Instant;

    const WAIT: Duration = Duration::from_secs(5);

    fn server() -> (UdpSocket, GatewayConfig) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
        let port = socket.local_addr().unwrap().port();
        let config = GatewayConfig::new(Eui64::from_bytes([0xb8, 0x27, 0xeb, 0xff, 0xfe, 0, 0, 2]))
            .with_server("127.0.0.1", port)
            .with_initial_token(1);
        (socket, config)
    }

    /// Datagrams waiting at the server.
    fn drain(socket: &UdpSocket) -> usize {
        let mut buf = [0u8; MAX_DATAGRAM];
        let mut count = 0;
        while socket.recv_from(&mut buf).is_ok() {
            count += 1;
        }
        count
    }

    fn wait_until<F: Fn() -> bool>(pred: F) {
        let deadline = Instant::now() + WAIT;
        while !pred() {
            assert!(Instant::now() < deadline, "condition never held");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_socket_failure_stops_gateway() {
        let (server, config) = server();
        let clock = VirtualClock::stepped();
        let medium = Medium::new();
        let gateway = Gateway::new(config, clock.clone(), medium.clone());
        gateway.start().unwrap();

        // Keepalive and status went out and both rescheduled themselves.
        wait_until(|| clock.pending() == 2);
        assert_eq!(drain(&server), 2);

        let tasks = gateway.workers.lock().as_ref().map(|w| w.tasks.clone()).unwrap();
        let failure = io::Error::new(ErrorKind::Other, "network down");
        assert!(tasks.send(Task::SocketFailed(failure)).is_ok());

        wait_until(|| gateway.lifecycle() == Lifecycle::Stopped);
        assert_eq!(clock.pending(), 0);
        assert_eq!(medium.total_subscriptions(), 0);

        clock.advance(secs_to_ticks(60)).unwrap();
        assert_eq!(drain(&server), 0);

        assert!(matches!(gateway.stop(), Err(GatewayError::Io(_))));
        assert_eq!(gateway.lifecycle(), Lifecycle::Stopped);
        assert_eq!(gateway.stats().unwrap().txnb, 2);
        assert!(gateway.stop().is_ok());
    }

    #[test]
    fn test_status_time_survives_the_wire() {
        let origin = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + UtcDuration::microseconds(250_000);
        let time = status_time(origin, VirtualTime::from_micros(1_600_000));
        assert_eq!(time, Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 1).unwrap());

        let message = Message::PushData {
            token: 7,
            gateway: Eui64::from_bytes([1, 2, 3, 4, 5, 6, 7, 8]),
            payload: PushPayload {
                rxpk: Vec::new(),
                stat: Some(Status {
                    time: Some(time),
                    lati: 51.4576,
                    long: 0.9705,
                    alti: 61,
                    rxnb: 3,
                    rxok: 2,
                    rxfw: 2,
                    ackr: 50.0,
                    dwnb: 1,
                    txnb: 4,
                }),
            },
        };
        assert_eq!(Message::decode(&message.encode()).unwrap(), message);
    }
}
