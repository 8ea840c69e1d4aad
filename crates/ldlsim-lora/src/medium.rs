//! Messages exchanged over the shared radio medium.
//!
//! The medium is an [`EventBus`] carrying [`MediumMessage`]s. A transmission is
//! two messages sharing one [`MediumEvent`]: [`TOPIC_TX_BEGIN`] when the first
//! symbol leaves the antenna and [`TOPIC_TX_END`] exactly `airtime` ticks later.
//! Gateways additionally announce themselves on [`TOPIC_UP`] and [`TOPIC_DOWN`].

use crate::RadioParams;
use ldlsim_common::{Eui64, EventBus, VirtualTime};
use std::sync::Arc;

pub const TOPIC_TX_BEGIN: &str = "tx_begin";
pub const TOPIC_TX_END: &str = "tx_end";
pub const TOPIC_UP: &str = "up";
pub const TOPIC_DOWN: &str = "down";

/// The shared medium every endpoint of one simulation publishes on.
pub type Medium = EventBus<MediumMessage>;

/// One transmission on the medium.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediumEvent {
    /// Transmitting endpoint.
    pub endpoint: Eui64,
    /// Virtual time of the first symbol.
    pub start: VirtualTime,
    pub data: Vec<u8>,
    pub params: RadioParams,
    /// Time on air in ticks.
    pub airtime: u64,
}

impl MediumEvent {
    /// Virtual time of the last symbol.
    pub fn end(&self) -> VirtualTime {
        self.start + self.airtime
    }

    /// Whether the two transmissions share channel parameters and overlap in time.
    pub fn collides_with(&self, other: &MediumEvent) -> bool {
        self.params.same_channel(
            other.params.frequency_hz,
            other.params.bandwidth_hz,
            other.params.spreading_factor,
        ) && self.start < other.end()
            && other.start < self.end()
    }
}

/// Payload of every message published on a [`Medium`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediumMessage {
    TxBegin(Arc<MediumEvent>),
    TxEnd(Arc<MediumEvent>),
    /// A gateway came up.
    Up { eui: Eui64 },
    /// A gateway went down.
    Down { eui: Eui64 },
}

impl MediumMessage {
    /// The topic this message is published on.
    pub fn topic(&self) -> &'static str {
        match self {
            MediumMessage::TxBegin(_) => TOPIC_TX_BEGIN,
            MediumMessage::TxEnd(_) => TOPIC_TX_END,
            MediumMessage::Up { .. } => TOPIC_UP,
            MediumMessage::Down { .. } => TOPIC_DOWN,
        }
    }

    /// The transmission carried by a `TxBegin` or `TxEnd`.
    pub fn transmission(&self) -> Option<&Arc<MediumEvent>> {
        match self {
            MediumMessage::TxBegin(event) | MediumMessage::TxEnd(event) => Some(event),
            _ => None,
        }
    }
}

/// Publish `message` on its own topic.
pub fn publish(medium: &Medium, message: &MediumMessage) -> usize {
    medium.publish(message.topic(), message)
}
