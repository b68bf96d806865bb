//! hostwarden-core: Shared types, probing, configuration, and error handling.
//!
//! This crate provides the foundations used by every hostwarden component:
//! - Device records and their reachability status
//! - Ephemeral discovery, host-key, command and escalation types
//! - The TCP reachability prober
//! - Outward event types emitted by the status poller
//! - Layered configuration loading
//! - Common error types

pub mod config;
pub mod error;
pub mod events;
pub mod probe;
pub mod types;

pub use error::WardenError;
pub use probe::{probe, Reachability};
pub use types::{
    CandidateKey, CommandResult, Credential, Device, DeviceAction, DeviceId, DeviceStatus,
    DiscoveredCandidate, DiscoverySource, EscalationRequest, HostKey,
};
