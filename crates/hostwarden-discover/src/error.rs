//! Error types for the hostwarden-discover crate.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiscoverError {
    #[error("No usable IPv4 address on any local interface")]
    NoPrimaryAddress,

    #[error("Network interface error: {0}")]
    Interface(String),

    #[error("Scan cancelled")]
    Cancelled,

    #[error("Advertisement source error: {0}")]
    Advertisement(String),

    #[error("Discovery task is no longer running")]
    TaskGone,

    #[error("Registry error: {0}")]
    Registry(#[from] hostwarden_registry::RegistryError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DiscoverError>;
