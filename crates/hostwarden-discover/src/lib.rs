//! hostwarden-discover: SSH host discovery and status polling.
//!
//! Sweeps the local /24 for open SSH ports, merges the results with
//! advertised services into one deduplicated live set, and keeps the
//! device registry's reachability status fresh with a single-flight
//! polling scheduler.

pub mod advert;
pub mod aggregator;
pub mod config;
pub mod error;
pub mod scanner;
pub mod scheduler;

pub use aggregator::{CandidateSet, DiscoveryHandle, DiscoveryPhase};
pub use config::DiscoverConfig;
pub use error::{DiscoverError, Result};
pub use scanner::{CandidateScan, SubnetScanner};
pub use scheduler::{PollerHandle, RefreshOutcome, ReachabilityProbe, StatusPoller, TcpProbe};
