//! IO events a radio signals to its MAC layer.

use crate::{RadioError, RadioResult};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use ldlsim_common::VirtualTime;
use std::fmt;
use std::time::{Duration, Instant};

/// Radio interrupt lines, as the MAC sees them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoEvent {
    /// The last symbol of a transmission left the antenna.
    TxComplete,
    /// A frame was received and can be fetched with `collect`.
    RxReady,
    /// The receive window closed without a clean frame.
    RxTimeout,
}

impl fmt::Display for IoEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IoEvent::TxComplete => "tx_complete",
            IoEvent::RxReady => "rx_ready",
            IoEvent::RxTimeout => "rx_timeout",
        })
    }
}

/// Receiver of a radio's IO events.
///
/// Called on whichever thread drives the clock or the medium, never with radio
/// state locked, so implementations may call back into the radio.
pub trait IoEventSink: Send + Sync {
    fn io_event(&self, event: IoEvent, time: VirtualTime);
}

impl<F> IoEventSink for F
where
    F: Fn(IoEvent, VirtualTime) + Send + Sync,
{
    fn io_event(&self, event: IoEvent, time: VirtualTime) {
        self(event, time)
    }
}

/// Queues IO events so a blocking caller can wait for them.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<(IoEvent, VirtualTime)>,
    rx: Receiver<(IoEvent, VirtualTime)>,
}

impl Default for ChannelSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelSink {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        ChannelSink { tx, rx }
    }

    /// Next event of any kind.
    pub fn next(&self, timeout: Duration) -> RadioResult<(IoEvent, VirtualTime)> {
        self.rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => RadioError::Timeout("io event".to_string()),
            RecvTimeoutError::Disconnected => RadioError::Disconnected,
        })
    }

    /// Wait for an event of `kind`, discarding others. Returns its virtual time.
    pub fn wait_for(&self, kind: IoEvent, timeout: Duration) -> RadioResult<VirtualTime> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.rx.recv_deadline(deadline) {
                Ok((event, time)) if event == kind => return Ok(time),
                Ok(_) => continue,
                Err(RecvTimeoutError::Timeout) => return Err(RadioError::Timeout(kind.to_string())),
                Err(RecvTimeoutError::Disconnected) => return Err(RadioError::Disconnected),
            }
        }
    }

    /// Everything queued so far, oldest first.
    pub fn drain(&self) -> Vec<(IoEvent, VirtualTime)> {
        self.rx.try_iter().collect()
    }
}

impl IoEventSink for ChannelSink {
    fn io_event(&self, event: IoEvent, time: VirtualTime) {
        // Both ends live in self, so the channel cannot be disconnected.
        let _ = self.tx.send((event, time));
    }
}
