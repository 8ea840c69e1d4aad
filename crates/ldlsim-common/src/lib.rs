//! # ldlsim-common
//!
//! Common types shared by every ldlsim crate.
//!
//! - [`VirtualTime`]: the simulation's tick counter and its conversion to seconds
//! - [`Eui64`] and [`Key`]: identifier and key value types
//! - [`EventBus`]: the topic keyed publish/subscribe channel that endpoints use
//!   to observe each other
//!
//! Nothing in here is global. Every bus and every time axis is an explicit
//! value created by the caller, so independent simulations can share a process.

pub mod bus;
pub mod eui;
pub mod key;
pub mod time;

pub use bus::{EventBus, SubscriptionId};
pub use eui::{Eui64, EuiParseError};
pub use key::{Key, KeyError};
pub use time::{secs_to_ticks, VirtualTime, TICKS_PER_SECOND};
