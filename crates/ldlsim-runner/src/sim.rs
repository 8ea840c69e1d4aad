//! One simulation run built from a [`ScenarioConfig`].

use crate::device::PeriodicDevice;
use crate::{RunResult, ScenarioConfig};
use ldlsim_clock::VirtualClock;
use ldlsim_common::{Eui64, VirtualTime, TICKS_PER_SECOND};
use ldlsim_gateway::{Gateway, GatewayStats};
use ldlsim_lora::{Medium, PacketLogger};
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

/// How often [`Simulation::run`] checks for the end of the run.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Counters collected at the end of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Virtual seconds simulated.
    pub elapsed_secs: f64,
    pub gateways: Vec<GatewayReport>,
    pub devices: Vec<DeviceReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewayReport {
    pub eui: Eui64,
    pub stats: Option<GatewayStats>,
    /// Why the gateway stopped early, if it did.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceReport {
    pub eui: Eui64,
    pub sent: u64,
}

/// A clock, a medium, and everything attached to them.
pub struct Simulation {
    scenario: ScenarioConfig,
    clock: VirtualClock,
    medium: Medium,
    gateways: Vec<Gateway>,
    devices: Vec<Arc<PeriodicDevice>>,
    frame_log: Option<PacketLogger>,
    started_at: Option<VirtualTime>,
}

impl Simulation {
    pub fn new(scenario: ScenarioConfig) -> RunResult<Self> {
        scenario.validate()?;
        let clock = VirtualClock::new(scenario.clock.clone())?;
        let medium = Medium::new();

        let frame_log = match &scenario.frame_log {
            Some(path) => Some(open_frame_log(&medium, path)?),
            None => None,
        };
        let gateways = scenario
            .gateways
            .iter()
            .map(|config| Gateway::new(config.clone(), clock.clone(), medium.clone()))
            .collect();
        let devices = scenario
            .devices
            .iter()
            .map(|config| PeriodicDevice::new(config, clock.clone(), medium.clone()))
            .collect();

        Ok(Simulation {
            scenario,
            clock,
            medium,
            gateways,
            devices,
            frame_log,
            started_at: None,
        })
    }

    pub fn clock(&self) -> &VirtualClock {
        &self.clock
    }

    pub fn medium(&self) -> &Medium {
        &self.medium
    }

    pub fn gateways(&self) -> &[Gateway] {
        &self.gateways
    }

    /// Start the clock, then the gateways, then the devices.
    pub fn start(&mut self) -> RunResult<()> {
        self.clock.start()?;
        self.started_at = Some(self.clock.time());
        for gateway in &self.gateways {
            if let Err(e) = gateway.start() {
                self.clock.stop();
                return Err(e.into());
            }
        }
        for (device, config) in self.devices.iter().zip(&self.scenario.devices) {
            device.start(config.offset_secs);
        }
        info!(
            "simulation started: {} gateways, {} devices, speed x{}",
            self.gateways.len(),
            self.devices.len(),
            self.scenario.clock.speed_multiplier
        );
        Ok(())
    }

    /// Block until the scenario's duration has elapsed in virtual time or
    /// `interrupted` is set.
    pub fn run(&self, interrupted: &AtomicBool) {
        let end = self.scenario.duration_secs.map(|secs| {
            self.started_at.unwrap_or(VirtualTime::ZERO) + (secs * TICKS_PER_SECOND as f64).round() as u64
        });
        loop {
            if interrupted.load(Ordering::SeqCst) {
                info!("interrupted at {}", self.clock.time());
                return;
            }
            if end.is_some_and(|end| self.clock.time() >= end) {
                return;
            }
            if !self.gateways.is_empty() && self.gateways.iter().all(|g| !g.is_running()) {
                warn!("every gateway has stopped, ending the run");
                return;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Stop everything and collect the final counters.
    pub fn stop(&mut self) -> RunReport {
        for device in &self.devices {
            device.stop();
        }
        let gateways = self
            .gateways
            .iter()
            .map(|gateway| {
                let error = gateway.stop().err().map(|e| e.to_string());
                GatewayReport {
                    eui: gateway.eui(),
                    stats: gateway.stats().ok(),
                    error,
                }
            })
            .collect();
        let elapsed = self.clock.time().saturating_since(self.started_at.unwrap_or(VirtualTime::ZERO));
        self.clock.stop();
        self.frame_log.take();

        RunReport {
            elapsed_secs: elapsed as f64 / TICKS_PER_SECOND as f64,
            gateways,
            devices: self
                .devices
                .iter()
                .map(|device| DeviceReport {
                    eui: device.eui(),
                    sent: device.sent(),
                })
                .collect(),
        }
    }
}

fn open_frame_log(medium: &Medium, path: &Path) -> RunResult<PacketLogger> {
    let file = File::create(path)?;
    Ok(PacketLogger::new(medium, BufWriter::new(file))?)
}
