//! TCP reachability prober.
//!
//! A host is reachable when a TCP connection to `host:port` completes
//! before the timeout. Name resolution counts against the same timeout.
//! The prober never fails: every error is folded into `Unreachable`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;

use crate::types::DeviceStatus;

/// Outcome of a single probe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Reachability {
    Reachable,
    Unreachable,
}

impl Reachability {
    pub fn is_reachable(&self) -> bool {
        matches!(self, Self::Reachable)
    }
}

impl From<Reachability> for DeviceStatus {
    fn from(r: Reachability) -> Self {
        match r {
            Reachability::Reachable => DeviceStatus::Reachable,
            Reachability::Unreachable => DeviceStatus::Unreachable,
        }
    }
}

/// Probe `host:port` with a bounded TCP connect.
///
/// On the timeout path the pending connect future is dropped, which closes
/// the socket. On success the stream is dropped before returning.
pub async fn probe(host: &str, port: u16, timeout: Duration) -> Reachability {
    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => {
            drop(stream);
            Reachability::Reachable
        }
        Ok(Err(e)) => {
            tracing::debug!(host = %host, port, error = %e, "Probe connect failed");
            Reachability::Unreachable
        }
        Err(_) => {
            tracing::debug!(
                host = %host,
                port,
                timeout_ms = timeout.as_millis() as u64,
                "Probe timed out"
            );
            Reachability::Unreachable
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn listening_port_is_reachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let result = probe("127.0.0.1", port, Duration::from_secs(2)).await;
        assert_eq!(result, Reachability::Reachable);
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = probe("127.0.0.1", port, Duration::from_secs(2)).await;
        assert_eq!(result, Reachability::Unreachable);
    }

    #[tokio::test]
    async fn unresolvable_host_is_unreachable() {
        let result = probe("host.invalid", 22, Duration::from_millis(500)).await;
        assert_eq!(result, Reachability::Unreachable);
    }

    #[tokio::test]
    async fn returns_within_timeout() {
        // Whatever this address does on the local network, the probe
        // resolves within the timeout window.
        let timeout = Duration::from_millis(200);
        let start = Instant::now();
        let _ = probe("10.255.255.1", 22, timeout).await;
        assert!(start.elapsed() < timeout + Duration::from_millis(500));
    }

    #[tokio::test]
    async fn connection_is_closed_after_probe() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let result = probe("127.0.0.1", port, Duration::from_secs(2)).await;
        assert!(result.is_reachable());

        // The accepted side observes EOF because the prober dropped its end.
        let (mut accepted, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 1];
        let n = tokio::io::AsyncReadExt::read(&mut accepted, &mut buf)
            .await
            .unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn reachability_maps_to_status() {
        assert_eq!(DeviceStatus::from(Reachability::Reachable), DeviceStatus::Reachable);
        assert_eq!(
            DeviceStatus::from(Reachability::Unreachable),
            DeviceStatus::Unreachable
        );
    }
}
