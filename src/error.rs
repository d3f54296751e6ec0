//! Error taxonomy for the feedback pipeline.
//!
//! - **ConfigError:** rejected synchronously at the call that introduced the bad value.
//! - **SetupError:** coordinator assembly failures (missing collaborator, spawn failure).
//! - **ActuatorError:** hardware faults; logged by the control loop, never fatal.
//! - **AcquisitionError:** frame source faults; logged and retried by the analysis loop.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("setpoint must be a non-negative number, got {0}")]
    InvalidSetpoint(f64),

    #[error("invalid controller parameter `{name}`: {value}")]
    InvalidParameter { name: &'static str, value: f64 },

    #[error("invalid power bounds: min={min}, max={max}")]
    InvalidPowerBounds { min: f64, max: f64 },

    #[error("unknown {kind} `{name}`")]
    UnknownComponent { kind: &'static str, name: String },

    #[error("{0} does not support recalibration")]
    Unsupported(String),

    #[error("failed to read config file: {0}")]
    Io(String),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid configuration: {0}")]
    Validation(String),
}

#[derive(Error, Debug)]
pub enum SetupError {
    #[error("no {0} was supplied to the coordinator")]
    MissingCollaborator(&'static str),

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActuatorError {
    #[error("hardware fault on {device}: {reason}")]
    Hardware { device: String, reason: String },

    #[error("{0} is disconnected")]
    Disconnected(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AcquisitionError {
    #[error("frame read failed: {0}")]
    Read(String),

    #[error("frame source was closed")]
    Closed,
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
