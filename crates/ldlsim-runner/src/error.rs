//! Error types for the runner.

use std::path::PathBuf;
use thiserror::Error;

/// A scenario file that could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid scenario YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid scenario: {0}")]
    Invalid(String),
}

/// Anything that stops a simulation from running.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Clock(#[from] ldlsim_clock::ClockError),

    #[error(transparent)]
    Gateway(#[from] ldlsim_gateway::GatewayError),

    #[error(transparent)]
    Radio(#[from] ldlsim_lora::RadioError),

    #[error("frame log: {0}")]
    FrameLog(#[from] std::io::Error),

    #[error("cannot install Ctrl-C handler: {0}")]
    Signal(#[from] ctrlc::Error),

    #[error("cannot encode report: {0}")]
    Report(#[from] serde_json::Error),
}

pub type RunResult<T> = Result<T, RunError>;
