//! One endpoint's radio on the shared medium.
//!
//! A [`Radio`] turns the MAC's transmit and receive calls into timed medium
//! events:
//!
//! - `transmit` publishes `tx_begin` now and `tx_end` after the airtime, then
//!   signals [`IoEvent::TxComplete`].
//! - `receive` opens a window of `timeout_ticks`. The first matching `tx_begin`
//!   from another endpoint closes the window and the radio locks on to it. When
//!   that transmission ends the payload is buffered and [`IoEvent::RxReady`]
//!   signalled. If nothing matched, [`IoEvent::RxTimeout`] is signalled when the
//!   window closes.
//!
//! Collision is loss: a locked reception is corrupted if another matching
//! transmission was already on air when it began, or begins before it ends. A
//! corrupted reception ends in `RxTimeout` at the locked transmission's end.
//!
//! Lock order is radio state, then clock or bus registry. The radio never
//! publishes on the medium or signals its sink while holding its state lock.

use crate::medium::{self, Medium, MediumEvent, MediumMessage, TOPIC_TX_BEGIN, TOPIC_TX_END};
use crate::params::validate_modulation;
use crate::{time_on_air, IoEvent, IoEventSink, PhyConfig, RadioError, RadioParams, RadioResult, MAX_PAYLOAD_LEN};
use ldlsim_clock::{TimerHandle, VirtualClock};
use ldlsim_common::{Eui64, SubscriptionId, VirtualTime};
use ldlsim_metrics::{metric_defs, EndpointLabels};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// The contract a MAC layer drives its radio through.
pub trait RadioDriver: Send + Sync {
    /// Start transmitting `data`. Completion is signalled as `TxComplete`.
    fn transmit(&self, data: &[u8], params: &RadioParams) -> RadioResult<TxReport>;

    /// Open a receive window. Resolution is signalled as `RxReady` or `RxTimeout`.
    fn receive(&self, params: &RxParams) -> RadioResult<()>;

    /// Pop the oldest received frame.
    fn collect(&self) -> Option<Vec<u8>>;

    /// Abort any receive window and drop buffered frames.
    fn reset_hardware(&self);
}

/// Receiver tuning and window length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RxParams {
    pub frequency_hz: u32,
    pub bandwidth_hz: u32,
    pub spreading_factor: u8,
    /// How long the window stays open waiting for a preamble, in ticks.
    pub timeout_ticks: u64,
}

impl RxParams {
    /// Tune to the channel a transmission with `params` would use.
    pub fn matching(params: &RadioParams, timeout_ticks: u64) -> Self {
        RxParams {
            frequency_hz: params.frequency_hz,
            bandwidth_hz: params.bandwidth_hz,
            spreading_factor: params.spreading_factor,
            timeout_ticks,
        }
    }

    fn hears(&self, event: &MediumEvent) -> bool {
        event
            .params
            .same_channel(self.frequency_hz, self.bandwidth_hz, self.spreading_factor)
    }
}

/// What `transmit` scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReport {
    pub start: VirtualTime,
    pub airtime: u64,
}

impl TxReport {
    pub fn end(&self) -> VirtualTime {
        self.start + self.airtime
    }
}

/// Construction options for a [`Radio`].
#[derive(Debug, Clone, Copy)]
pub struct RadioOptions {
    pub phy: PhyConfig,
    /// Role label attached to metrics (`device` or `gateway`).
    pub role: &'static str,
}

impl Default for RadioOptions {
    fn default() -> Self {
        RadioOptions {
            phy: PhyConfig::default(),
            role: "device",
        }
    }
}

impl RadioOptions {
    pub fn with_phy(mut self, phy: PhyConfig) -> Self {
        self.phy = phy;
        self
    }

    pub fn with_role(mut self, role: &'static str) -> Self {
        self.role = role;
        self
    }
}

struct TxInFlight {
    event: Arc<MediumEvent>,
    end_timer: Option<TimerHandle>,
}

struct RxAttempt {
    id: u64,
    params: RxParams,
    window: Option<TimerHandle>,
    locked: Option<Arc<MediumEvent>>,
    collided: bool,
    subscriptions: Vec<SubscriptionId>,
}

enum Outcome {
    Ready,
    Collided,
    TimedOut,
}

#[derive(Default)]
struct RadioState {
    /// Other endpoints' transmissions currently on air.
    on_air: Vec<Arc<MediumEvent>>,
    tx: Option<TxInFlight>,
    rx: Option<RxAttempt>,
    next_attempt: u64,
    buffer: VecDeque<Vec<u8>>,
    subscriptions: Vec<SubscriptionId>,
    shut_down: bool,
}

struct RadioInner {
    eui: Eui64,
    clock: VirtualClock,
    medium: Medium,
    sink: Arc<dyn IoEventSink>,
    phy: PhyConfig,
    labels: EndpointLabels,
    state: Mutex<RadioState>,
}

/// A simulated LoRa transceiver attached to a [`Medium`].
///
/// Dropping the radio shuts it down.
pub struct Radio {
    inner: Arc<RadioInner>,
}

impl std::fmt::Debug for Radio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Radio")
            .field("eui", &self.inner.eui)
            .field("transmitting", &state.tx.is_some())
            .field("receiving", &state.rx.is_some())
            .field("buffered", &state.buffer.len())
            .finish()
    }
}

impl Radio {
    pub fn new(eui: Eui64, clock: VirtualClock, medium: Medium, sink: Arc<dyn IoEventSink>) -> Self {
        Self::with_options(eui, clock, medium, sink, RadioOptions::default())
    }

    pub fn with_options(
        eui: Eui64,
        clock: VirtualClock,
        medium: Medium,
        sink: Arc<dyn IoEventSink>,
        options: RadioOptions,
    ) -> Self {
        let inner = Arc::new(RadioInner {
            eui,
            clock,
            medium: medium.clone(),
            sink,
            phy: options.phy,
            labels: EndpointLabels::new(eui.to_string(), options.role),
            state: Mutex::new(RadioState::default()),
        });

        let weak = Arc::downgrade(&inner);
        let begin = medium.subscribe(TOPIC_TX_BEGIN, move |message: &MediumMessage| {
            if let (Some(inner), Some(event)) = (weak.upgrade(), message.transmission()) {
                inner.track_begin(event);
            }
        });
        let weak = Arc::downgrade(&inner);
        let end = medium.subscribe(TOPIC_TX_END, move |message: &MediumMessage| {
            if let (Some(inner), Some(event)) = (weak.upgrade(), message.transmission()) {
                inner.track_end(event);
            }
        });
        inner.state.lock().subscriptions = vec![begin, end];

        Radio { inner }
    }

    pub fn eui(&self) -> Eui64 {
        self.inner.eui
    }

    pub fn is_transmitting(&self) -> bool {
        self.inner.state.lock().tx.is_some()
    }

    pub fn is_receiving(&self) -> bool {
        self.inner.state.lock().rx.is_some()
    }

    /// Airtime this radio would need for a `payload_len` byte frame.
    pub fn airtime(&self, params: &RadioParams, payload_len: usize) -> u64 {
        time_on_air(params, &self.inner.phy, payload_len)
    }

    /// Abort any pending activity and detach from the medium.
    ///
    /// A transmission still on air is ended early so other endpoints stop
    /// counting it. No IO events are signalled.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

impl Drop for Radio {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

impl RadioDriver for Radio {
    fn transmit(&self, data: &[u8], params: &RadioParams) -> RadioResult<TxReport> {
        self.inner.transmit(data, params)
    }

    fn receive(&self, params: &RxParams) -> RadioResult<()> {
        RadioInner::receive(&self.inner, params)
    }

    fn collect(&self) -> Option<Vec<u8>> {
        self.inner.state.lock().buffer.pop_front()
    }

    fn reset_hardware(&self) {
        let mut state = self.inner.state.lock();
        if let Some(attempt) = state.rx.take() {
            self.inner.teardown(attempt);
        }
        state.buffer.clear();
    }
}

impl RadioInner {
    fn transmit(self: &Arc<Self>, data: &[u8], params: &RadioParams) -> RadioResult<TxReport> {
        params.validate()?;
        if data.len() > MAX_PAYLOAD_LEN {
            return Err(RadioError::InvalidParams(format!(
                "payload of {} bytes exceeds {}",
                data.len(),
                MAX_PAYLOAD_LEN
            )));
        }
        let airtime = time_on_air(params, &self.phy, data.len());

        let event = {
            let mut state = self.state.lock();
            if state.shut_down {
                return Err(RadioError::ShutDown);
            }
            if state.tx.is_some() {
                return Err(RadioError::Busy("transmission in progress"));
            }
            // Half duplex: switching to transmit abandons the receive window.
            if let Some(attempt) = state.rx.take() {
                debug!("radio {}: receive window abandoned for transmit", self.eui);
                self.teardown(attempt);
            }
            let event = Arc::new(MediumEvent {
                endpoint: self.eui,
                start: self.clock.time(),
                data: data.to_vec(),
                params: *params,
                airtime,
            });
            state.tx = Some(TxInFlight {
                event: event.clone(),
                end_timer: None,
            });
            event
        };

        debug!(
            "radio {}: tx {} bytes at {} on {} Hz SF{} for {} ticks",
            self.eui,
            data.len(),
            event.start,
            params.frequency_hz,
            params.spreading_factor,
            airtime
        );
        ldlsim_metrics::metrics::counter!(metric_defs::RADIO_TRANSMISSIONS.name, &self.labels.to_labels()).increment(1);
        ldlsim_metrics::metrics::histogram!(metric_defs::RADIO_AIRTIME.name, &self.labels.to_labels()).record(airtime as f64);

        medium::publish(&self.medium, &MediumMessage::TxBegin(event.clone()));

        let mut state = self.state.lock();
        if let Some(tx) = state.tx.as_mut().filter(|tx| Arc::ptr_eq(&tx.event, &event)) {
            let weak = Arc::downgrade(self);
            tx.end_timer = Some(self.clock.on_timeout_at(event.end(), move || {
                if let Some(inner) = weak.upgrade() {
                    inner.finish_transmit();
                }
            }));
        }

        Ok(TxReport {
            start: event.start,
            airtime,
        })
    }

    fn finish_transmit(&self) {
        let Some(tx) = self.state.lock().tx.take() else {
            return;
        };
        trace!("radio {}: tx end at {}", self.eui, tx.event.end());
        medium::publish(&self.medium, &MediumMessage::TxEnd(tx.event.clone()));
        self.sink.io_event(IoEvent::TxComplete, tx.event.end());
    }

    fn receive(self: &Arc<Self>, params: &RxParams) -> RadioResult<()> {
        validate_modulation(params.frequency_hz, params.bandwidth_hz, params.spreading_factor)?;

        let mut state = self.state.lock();
        if state.shut_down {
            return Err(RadioError::ShutDown);
        }
        if state.tx.is_some() {
            return Err(RadioError::Busy("transmission in progress"));
        }
        if state.rx.is_some() {
            return Err(RadioError::Busy("receive window already open"));
        }

        let id = state.next_attempt;
        state.next_attempt += 1;

        let weak = Arc::downgrade(self);
        let begin = self.medium.subscribe(TOPIC_TX_BEGIN, move |message: &MediumMessage| {
            if let (Some(inner), Some(event)) = (weak.upgrade(), message.transmission()) {
                inner.on_begin(id, event);
            }
        });
        let weak = Arc::downgrade(self);
        let end = self.medium.subscribe(TOPIC_TX_END, move |message: &MediumMessage| {
            if let (Some(inner), Some(event)) = (weak.upgrade(), message.transmission()) {
                inner.on_end(id, event);
            }
        });
        let weak: Weak<RadioInner> = Arc::downgrade(self);
        let window = self.clock.on_timeout(params.timeout_ticks, move || {
            if let Some(inner) = weak.upgrade() {
                inner.on_window_closed(id);
            }
        });

        trace!(
            "radio {}: rx window #{} on {} Hz SF{} for {} ticks",
            self.eui,
            id,
            params.frequency_hz,
            params.spreading_factor,
            params.timeout_ticks
        );
        state.rx = Some(RxAttempt {
            id,
            params: *params,
            window: Some(window),
            locked: None,
            collided: false,
            subscriptions: vec![begin, end],
        });
        Ok(())
    }

    fn on_begin(&self, id: u64, event: &Arc<MediumEvent>) {
        if event.endpoint == self.eui {
            return;
        }
        let mut state = self.state.lock();
        let RadioState { rx, on_air, .. } = &mut *state;
        let Some(attempt) = rx.as_mut().filter(|a| a.id == id) else {
            return;
        };
        if !attempt.params.hears(event) {
            return;
        }
        match &attempt.locked {
            None => {
                if let Some(window) = attempt.window.take() {
                    let _ = self.clock.cancel(window);
                }
                attempt.collided = on_air
                    .iter()
                    .any(|other| other.endpoint != event.endpoint && attempt.params.hears(other));
                debug!(
                    "radio {}: locked on to {} at {}{}",
                    self.eui,
                    event.endpoint,
                    event.start,
                    if attempt.collided { " (already corrupted)" } else { "" }
                );
                attempt.locked = Some(event.clone());
            }
            Some(locked) if locked.endpoint != event.endpoint => {
                debug!("radio {}: {} collided with {}", self.eui, event.endpoint, locked.endpoint);
                attempt.collided = true;
            }
            Some(_) => {}
        }
    }

    fn on_end(&self, id: u64, event: &Arc<MediumEvent>) {
        let resolved = {
            let mut state = self.state.lock();
            let matches = state
                .rx
                .as_ref()
                .filter(|a| a.id == id)
                .and_then(|a| a.locked.as_ref())
                .is_some_and(|locked| locked.endpoint == event.endpoint);
            if !matches {
                return;
            }
            let Some(attempt) = state.rx.take() else {
                return;
            };
            let outcome = if attempt.collided {
                Outcome::Collided
            } else {
                state.buffer.push_back(event.data.clone());
                Outcome::Ready
            };
            self.teardown(attempt);
            outcome
        };
        self.signal_rx(resolved, event.end());
    }

    fn on_window_closed(&self, id: u64) {
        {
            let mut state = self.state.lock();
            let open = state
                .rx
                .as_ref()
                .is_some_and(|a| a.id == id && a.locked.is_none());
            if !open {
                return;
            }
            if let Some(mut attempt) = state.rx.take() {
                // Already fired; nothing to cancel.
                attempt.window = None;
                self.teardown(attempt);
            }
        }
        self.signal_rx(Outcome::TimedOut, self.clock.time());
    }

    fn signal_rx(&self, outcome: Outcome, time: VirtualTime) {
        let (event, label) = match outcome {
            Outcome::Ready => (IoEvent::RxReady, "ready"),
            Outcome::Collided => (IoEvent::RxTimeout, "collided"),
            Outcome::TimedOut => (IoEvent::RxTimeout, "timeout"),
        };
        debug!("radio {}: rx {} at {}", self.eui, label, time);
        ldlsim_metrics::metrics::counter!(metric_defs::RADIO_RECEPTIONS.name, &self.labels.with("outcome", label)).increment(1);
        self.sink.io_event(event, time);
    }

    /// Remove an attempt's subscriptions and window timer.
    fn teardown(&self, attempt: RxAttempt) {
        if let Some(window) = attempt.window {
            let _ = self.clock.cancel(window);
        }
        for id in attempt.subscriptions {
            self.medium.unsubscribe(id);
        }
    }

    fn track_begin(&self, event: &Arc<MediumEvent>) {
        if event.endpoint != self.eui {
            self.state.lock().on_air.push(event.clone());
        }
    }

    fn track_end(&self, event: &Arc<MediumEvent>) {
        self.state.lock().on_air.retain(|e| e.endpoint != event.endpoint);
    }

    fn shutdown(&self) {
        let truncated = {
            let mut state = self.state.lock();
            if state.shut_down {
                return;
            }
            state.shut_down = true;
            if let Some(attempt) = state.rx.take() {
                self.teardown(attempt);
            }
            for id in state.subscriptions.drain(..) {
                self.medium.unsubscribe(id);
            }
            state.on_air.clear();
            state.tx.take().map(|tx| {
                if let Some(timer) = tx.end_timer {
                    let _ = self.clock.cancel(timer);
                }
                tx.event
            })
        };
        if let Some(event) = truncated {
            medium::publish(&self.medium, &MediumMessage::TxEnd(event));
        }
        debug!("radio {}: shut down", self.eui);
    }
}
