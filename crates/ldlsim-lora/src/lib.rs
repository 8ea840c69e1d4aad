//! # ldlsim-lora
//!
//! The shared radio medium.
//!
//! Endpoints never talk to each other directly. Each owns a [`Radio`] that
//! publishes its transmissions on a [`Medium`] and watches the medium for
//! everyone else's, with timing taken from a shared
//! [`VirtualClock`](ldlsim_clock::VirtualClock).
//!
//! | Module | Contents |
//! |---|---|
//! | [`params`] | [`RadioParams`], [`PhyConfig`], time-on-air model |
//! | [`medium`] | [`MediumEvent`], [`MediumMessage`], topic names |
//! | [`radio`] | [`Radio`], the [`RadioDriver`] contract |
//! | [`events`] | [`IoEvent`], [`IoEventSink`], [`ChannelSink`] |
//! | [`logger`] | [`PacketLogger`] CSV trace |

pub mod error;
pub mod events;
pub mod logger;
pub mod medium;
pub mod params;
pub mod radio;

pub use error::{RadioError, RadioResult};
pub use events::{ChannelSink, IoEvent, IoEventSink};
pub use logger::PacketLogger;
pub use medium::{Medium, MediumEvent, MediumMessage, TOPIC_DOWN, TOPIC_TX_BEGIN, TOPIC_TX_END, TOPIC_UP};
pub use params::{calculate_time_on_air, symbol_ticks, time_on_air, PhyConfig, RadioParams, MAX_PAYLOAD_LEN};
pub use radio::{Radio, RadioDriver, RadioOptions, RxParams, TxReport};
