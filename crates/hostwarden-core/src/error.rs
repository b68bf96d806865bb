use thiserror::Error;

/// Top-level error type for hostwarden.
#[derive(Error, Debug)]
pub enum WardenError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid device: {0}")]
    InvalidDevice(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<config::ConfigError> for WardenError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
