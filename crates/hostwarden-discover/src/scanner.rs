//! Local /24 subnet scanner.
//!
//! Finds the machine's primary IPv4 address, enumerates the other hosts in
//! its /24 and probes each one concurrently (one task per address). Only
//! reachable hosts are returned, sorted by host string.

use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ipnet::Ipv4Net;
use network_interface::{NetworkInterface, NetworkInterfaceConfig};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use hostwarden_core::probe::probe;
use hostwarden_core::types::{DiscoveredCandidate, DiscoverySource};

use crate::config::DiscoverConfig;
use crate::error::{DiscoverError, Result};

/// Interface name prefixes treated as the primary wired/wireless uplink.
const PRIMARY_PREFIXES: &[&str] = &["en", "eth", "wl"];

/// Anything that produces a batch of discovery candidates on demand.
#[async_trait]
pub trait CandidateScan: Send + Sync {
    /// Run one pass. Must return `Err(Cancelled)` promptly once `cancel` fires.
    async fn scan(&self, cancel: CancellationToken) -> Result<Vec<DiscoveredCandidate>>;
}

/// Scanner for SSH hosts on the local /24.
#[derive(Debug, Clone)]
pub struct SubnetScanner {
    port: u16,
    timeout: Duration,
    max_hosts: Option<usize>,
    local_address: Option<Ipv4Addr>,
}

impl SubnetScanner {
    pub fn new(config: &DiscoverConfig) -> Self {
        Self {
            port: config.scan_port,
            timeout: config.scan_timeout(),
            max_hosts: config.max_hosts,
            local_address: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_hosts(mut self, max_hosts: Option<usize>) -> Self {
        self.max_hosts = max_hosts;
        self
    }

    /// Scan around this address instead of detecting the primary one.
    pub fn with_local_address(mut self, addr: Ipv4Addr) -> Self {
        self.local_address = Some(addr);
        self
    }

    /// The candidate addresses a scan would probe.
    pub fn candidates(&self) -> Result<Vec<Ipv4Addr>> {
        let local = match self.local_address {
            Some(addr) => addr,
            None => primary_ipv4()?,
        };
        let mut hosts = hosts_in_24(local);
        if let Some(limit) = self.max_hosts {
            hosts.truncate(limit);
        }
        Ok(hosts)
    }

    /// Probe the given addresses concurrently and return the reachable ones.
    pub async fn scan_addresses(
        &self,
        addresses: Vec<Ipv4Addr>,
        cancel: &CancellationToken,
    ) -> Result<Vec<DiscoveredCandidate>> {
        let total = addresses.len();
        let start = Instant::now();
        let mut tasks = JoinSet::new();

        for addr in addresses {
            let port = self.port;
            let timeout = self.timeout;
            tasks.spawn(async move {
                let started = Instant::now();
                let result = probe(&addr.to_string(), port, timeout).await;
                let latency_ms = started.elapsed().as_millis() as u64;
                result.is_reachable().then(|| DiscoveredCandidate {
                    name: addr.to_string(),
                    host: addr.to_string(),
                    port,
                    ip: Some(IpAddr::V4(addr)),
                    source: DiscoverySource::SubnetScan,
                    latency_ms: Some(latency_ms),
                })
            });
        }

        let mut found = Vec::new();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    tracing::debug!(probed = total, "Subnet scan cancelled");
                    return Err(DiscoverError::Cancelled);
                }
                next = tasks.join_next() => match next {
                    None => break,
                    Some(Ok(Some(candidate))) => found.push(candidate),
                    Some(Ok(None)) => {}
                    Some(Err(e)) => tracing::warn!(error = %e, "Probe task failed"),
                },
            }
        }

        found.sort_by(|a, b| a.host.cmp(&b.host));

        tracing::info!(
            probed = total,
            reachable = found.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Subnet scan complete"
        );

        Ok(found)
    }
}

#[async_trait]
impl CandidateScan for SubnetScanner {
    async fn scan(&self, cancel: CancellationToken) -> Result<Vec<DiscoveredCandidate>> {
        let addresses = self.candidates()?;
        tracing::info!(
            candidates = addresses.len(),
            port = self.port,
            timeout_ms = self.timeout.as_millis() as u64,
            "Starting subnet scan"
        );
        self.scan_addresses(addresses, &cancel).await
    }
}

/// The machine's primary non-loopback, non-link-local IPv4 address.
pub fn primary_ipv4() -> Result<Ipv4Addr> {
    let interfaces =
        NetworkInterface::show().map_err(|e| DiscoverError::Interface(e.to_string()))?;

    let mut addresses = Vec::new();
    for interface in interfaces {
        for addr in &interface.addr {
            if let IpAddr::V4(ipv4) = addr.ip() {
                addresses.push((interface.name.clone(), ipv4));
            }
        }
    }

    select_primary_ipv4(&addresses).ok_or(DiscoverError::NoPrimaryAddress)
}

/// Pick the primary address from `(interface name, address)` pairs.
///
/// An address on a primary-named interface wins; otherwise the first
/// usable address in enumeration order.
pub fn select_primary_ipv4(addresses: &[(String, Ipv4Addr)]) -> Option<Ipv4Addr> {
    let usable = |ip: &Ipv4Addr| !ip.is_loopback() && !ip.is_link_local() && !ip.is_unspecified();

    addresses
        .iter()
        .find(|(name, ip)| PRIMARY_PREFIXES.iter().any(|p| name.starts_with(p)) && usable(ip))
        .or_else(|| addresses.iter().find(|(_, ip)| usable(ip)))
        .map(|(_, ip)| *ip)
}

/// Every host address of the /24 containing `addr`, except `addr` itself.
pub fn hosts_in_24(addr: Ipv4Addr) -> Vec<Ipv4Addr> {
    let net = match Ipv4Net::new(addr, 24) {
        Ok(net) => net.trunc(),
        Err(_) => return Vec::new(),
    };
    net.hosts().filter(|h| *h != addr).collect()
}
