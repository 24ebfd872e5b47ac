use thiserror::Error;

use crate::types::Phase;

#[derive(Error, Debug)]
pub enum Error {
    // Phase errors
    #[error("Phase {phase} cannot be triggered directly")]
    UntriggerablePhase { phase: Phase },

    #[error("Phase {phase} is not a required verification factor")]
    NotARequiredPhase { phase: Phase },

    #[error("Lock state invariant violated: {0}")]
    InvariantViolation(String),

    // Registry errors
    #[error("Unknown hardware key: {0}")]
    UnknownKey(String),

    #[error("Unknown registered device: {0}")]
    UnknownDevice(String),

    #[error("Duplicate identifier: {0}")]
    DuplicateId(String),

    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    #[error("Battery level must be 0-100, got {0}")]
    InvalidBatteryLevel(u8),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
