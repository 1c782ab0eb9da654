use thiserror::Error;

use crate::parser::header::HeaderError;
use crate::parser::steim::SteimError;

#[derive(Error, Debug)]
pub enum ImpactError {
    /// Malformed stream configuration or an invalid threshold table.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Sensitivity level outside the configured threshold rows.
    #[error("Invalid sensitivity level {level} for {source_key}: must be in 0..{rows}")]
    InvalidLevel {
        source_key: String,
        level: i32,
        rows: usize,
    },

    #[error("Unable to find stream config for {0}")]
    UnknownStream(String),

    #[error("Sample error on {source_key}: {message}")]
    Sample { source_key: String, message: String },

    #[error("Calibration error on {source_key}: {message}")]
    Calibration { source_key: String, message: String },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Delivery error: {0}")]
    Delivery(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ImpactError {
    /// Startup errors abort the run; everything else is handled per block.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ImpactError::Config(_) | ImpactError::InvalidLevel { .. } | ImpactError::Io(_)
        )
    }
}

impl From<HeaderError> for ImpactError {
    fn from(e: HeaderError) -> Self {
        ImpactError::Decode(e.to_string())
    }
}

impl From<SteimError> for ImpactError {
    fn from(e: SteimError) -> Self {
        ImpactError::Decode(e.to_string())
    }
}

impl From<config::ConfigError> for ImpactError {
    fn from(e: config::ConfigError) -> Self {
        ImpactError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ImpactError>;
