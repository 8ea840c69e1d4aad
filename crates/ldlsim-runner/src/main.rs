//! ldlsim CLI
//!
//! ```bash
//! # Run a scenario for two virtual minutes at ten times real speed
//! ldlsim run scenarios/one_gateway.yaml --duration 120 --speed 10
//!
//! # Check a scenario and print it with every default filled in
//! ldlsim check scenarios/one_gateway.yaml
//! ```

use clap::{Parser, Subcommand};
use ldlsim_runner::{RunResult, ScenarioConfig, Simulation};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Virtual-time LoRaWAN network simulator.
#[derive(Parser, Debug)]
#[command(name = "ldlsim")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a scenario
    Run {
        /// Scenario YAML file
        scenario: PathBuf,

        /// Virtual seconds to run for, overriding the scenario
        #[arg(short = 'd', long)]
        duration: Option<f64>,

        /// Virtual seconds per real second, overriding the scenario
        #[arg(short = 's', long)]
        speed: Option<f64>,

        /// Write a CSV line per transmission to this file
        #[arg(long)]
        frame_log: Option<PathBuf>,

        /// Print the final report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a scenario and print it with defaults filled in
    Check {
        /// Scenario YAML file
        scenario: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Run {
            scenario,
            duration,
            speed,
            frame_log,
            json,
        } => run(scenario, duration, speed, frame_log, json),
        Command::Check { scenario } => check(scenario),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(
    path: PathBuf,
    duration: Option<f64>,
    speed: Option<f64>,
    frame_log: Option<PathBuf>,
    json: bool,
) -> RunResult<()> {
    let mut scenario = ScenarioConfig::load(&path)?;
    if duration.is_some() {
        scenario.duration_secs = duration;
    }
    if let Some(speed) = speed {
        scenario.clock.speed_multiplier = speed;
    }
    if frame_log.is_some() {
        scenario.frame_log = frame_log;
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))?;

    ldlsim_metrics::describe_metrics();
    let mut simulation = Simulation::new(scenario)?;
    simulation.start()?;
    simulation.run(&interrupted);
    let report = simulation.stop();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    info!("simulated {:.3} s", report.elapsed_secs);
    for gateway in &report.gateways {
        match &gateway.stats {
            Some(stats) => info!(
                "gateway {}: rx {} ok {} fwd {} down {} sent {} ack {:.1}%",
                gateway.eui, stats.rxnb, stats.rxok, stats.rxfw, stats.dwnb, stats.txnb, stats.ack_ratio
            ),
            None => info!("gateway {}: no statistics", gateway.eui),
        }
        if let Some(error) = &gateway.error {
            error!("gateway {}: {}", gateway.eui, error);
        }
    }
    for device in &report.devices {
        info!("device {}: {} frames sent", device.eui, device.sent);
    }
    Ok(())
}

fn check(path: PathBuf) -> RunResult<()> {
    let scenario = ScenarioConfig::load(&path)?;
    print!("{}", serde_yaml::to_string(&scenario).map_err(ldlsim_runner::ConfigError::from)?);
    Ok(())
}
