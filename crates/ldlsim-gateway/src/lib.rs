//! # ldlsim-gateway
//!
//! A simulated LoRa gateway. It listens to a shared
//! [`Medium`](ldlsim_lora::Medium) for uplinks, forwards them to a network
//! server with the Semtech UDP packet forwarder protocol, and puts the server's
//! downlinks back on the medium at the requested virtual time.
//!
//! ```no_run
//! use ldlsim_clock::{ClockConfig, VirtualClock};
//! use ldlsim_gateway::{Gateway, GatewayConfig};
//! use ldlsim_lora::Medium;
//!
//! let clock = VirtualClock::new(ClockConfig::default()).unwrap();
//! let medium = Medium::new();
//! let config = GatewayConfig::default().with_server("127.0.0.1", 1700);
//! let gateway = Gateway::new(config, clock.clone(), medium);
//! clock.start().unwrap();
//! gateway.start().unwrap();
//! ```

pub mod ack;
pub mod config;
pub mod engine;
pub mod error;
pub mod scheduler;

pub use ack::AckWindow;
pub use config::{FrequencyRange, GatewayConfig, Location, RxChannel};
pub use engine::{Gateway, GatewayStats, Lifecycle};
pub use error::{GatewayError, GatewayResult};
pub use scheduler::{DownlinkScheduler, Slot};
