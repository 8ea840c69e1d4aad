//! # ldlsim-runner
//!
//! Loads a YAML scenario, wires gateways and periodic devices to one clock and
//! one medium, and runs them for a while. The `ldlsim` binary is a thin CLI over
//! [`Simulation`].

pub mod device;
pub mod error;
pub mod scenario;
pub mod sim;

pub use device::PeriodicDevice;
pub use error::{ConfigError, RunError, RunResult};
pub use scenario::{DeviceConfig, ScenarioConfig};
pub use sim::{DeviceReport, GatewayReport, RunReport, Simulation};
