//! Service-advertisement input stream.
//!
//! An advertisement source yields `found` / `resolved` / `removed` events
//! for SSH services on the local segment over a channel. The aggregator is
//! the only consumer; sources hold no shared state.

use std::net::IpAddr;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{DiscoverError, Result};

/// Channel capacity between a source and the aggregator.
pub const EVENT_BUFFER: usize = 64;

/// An event from the advertisement source.
///
/// `handle` is the source's stable identifier for one advertised service
/// (the full service instance name for mDNS).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvertEvent {
    Found {
        handle: String,
        name: String,
    },
    Resolved {
        handle: String,
        name: String,
        host_name: String,
        port: u16,
        addresses: Vec<IpAddr>,
    },
    Removed {
        handle: String,
    },
}

/// A long-lived advertisement subscription.
pub trait AdvertisementSource: Send + Sync {
    /// Start listening. Events flow until `cancel` fires or the receiver
    /// is dropped.
    fn subscribe(&self, cancel: CancellationToken) -> Result<mpsc::Receiver<AdvertEvent>>;
}

/// A source that never advertises anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAdvertisements;

impl AdvertisementSource for NoAdvertisements {
    fn subscribe(&self, _cancel: CancellationToken) -> Result<mpsc::Receiver<AdvertEvent>> {
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }
}

/// A source fed by an in-process sender. Only the first subscription
/// receives events; later ones see a closed stream.
pub struct ChannelSource {
    receiver: Mutex<Option<mpsc::Receiver<AdvertEvent>>>,
}

impl ChannelSource {
    pub fn new() -> (mpsc::Sender<AdvertEvent>, Self) {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        (
            tx,
            Self {
                receiver: Mutex::new(Some(rx)),
            },
        )
    }
}

impl AdvertisementSource for ChannelSource {
    fn subscribe(&self, _cancel: CancellationToken) -> Result<mpsc::Receiver<AdvertEvent>> {
        let taken = self
            .receiver
            .lock()
            .map_err(|_| DiscoverError::Advertisement("source lock poisoned".to_string()))?
            .take();
        match taken {
            Some(rx) => Ok(rx),
            None => NoAdvertisements.subscribe(CancellationToken::new()),
        }
    }
}

/// Instance name of an advertised service, e.g. `garage-pi` from
/// `garage-pi._ssh._tcp.local.`.
pub fn instance_name<'a>(fullname: &'a str, service_type: &str) -> &'a str {
    fullname
        .strip_suffix(service_type)
        .map(|s| s.trim_end_matches('.'))
        .filter(|s| !s.is_empty())
        .unwrap_or(fullname)
}

#[cfg(feature = "mdns")]
pub use mdns::MdnsSource;

#[cfg(feature = "mdns")]
mod mdns {
    use std::net::IpAddr;
    use std::time::Duration;

    use mdns_sd::{ServiceDaemon, ServiceEvent};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use super::{instance_name, needs_lookup, AdvertEvent, AdvertisementSource, EVENT_BUFFER};
    use crate::config::DiscoverConfig;
    use crate::error::{DiscoverError, Result};

    /// mDNS/Bonjour browser for the configured SSH service type.
    #[derive(Debug, Clone)]
    pub struct MdnsSource {
        service_type: String,
        resolve_timeout: Duration,
    }

    impl MdnsSource {
        pub fn new(config: &DiscoverConfig) -> Self {
            Self {
                service_type: config.service_type.clone(),
                resolve_timeout: config.resolve_timeout(),
            }
        }
    }

    impl AdvertisementSource for MdnsSource {
        fn subscribe(&self, cancel: CancellationToken) -> Result<mpsc::Receiver<AdvertEvent>> {
            let daemon =
                ServiceDaemon::new().map_err(|e| DiscoverError::Advertisement(e.to_string()))?;
            let browse = daemon
                .browse(&self.service_type)
                .map_err(|e| DiscoverError::Advertisement(e.to_string()))?;

            let (tx, rx) = mpsc::channel(EVENT_BUFFER);
            let service_type = self.service_type.clone();
            let resolve_timeout = self.resolve_timeout;

            tokio::spawn(async move {
                tracing::info!(service_type = %service_type, "mDNS browse started");
                loop {
                    let event = tokio::select! {
                        _ = cancel.cancelled() => break,
                        event = browse.recv_async() => match event {
                            Ok(event) => event,
                            Err(_) => break,
                        },
                    };

                    let mapped = match event {
                        ServiceEvent::ServiceFound(_, fullname) => Some(AdvertEvent::Found {
                            name: instance_name(&fullname, &service_type).to_string(),
                            handle: fullname,
                        }),
                        ServiceEvent::ServiceResolved(info) => {
                            let fullname = info.get_fullname().to_string();
                            let mut addresses: Vec<IpAddr> = info
                                .get_addresses_v4()
                                .into_iter()
                                .map(|a| IpAddr::V4(a.to_owned()))
                                .collect();
                            addresses.sort();
                            let event = AdvertEvent::Resolved {
                                name: instance_name(&fullname, &service_type).to_string(),
                                handle: fullname,
                                host_name: info.get_hostname().to_string(),
                                port: info.get_port(),
                                addresses,
                            };
                            if needs_lookup(&event) {
                                // Off the browse loop so other events keep flowing.
                                tokio::spawn(resolve_and_send(event, resolve_timeout, tx.clone()));
                                None
                            } else {
                                Some(event)
                            }
                        }
                        ServiceEvent::ServiceRemoved(_, fullname) => {
                            Some(AdvertEvent::Removed { handle: fullname })
                        }
                        _ => None,
                    };

                    if let Some(event) = mapped {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                }

                if let Err(e) = daemon.shutdown() {
                    tracing::debug!(error = %e, "mDNS daemon shutdown failed");
                }
                tracing::info!(service_type = %service_type, "mDNS browse stopped");
            });

            Ok(rx)
        }
    }

    /// Fill in addresses for a resolved advertisement that arrived without
    /// any, then forward it.
    async fn resolve_and_send(
        mut event: AdvertEvent,
        timeout: Duration,
        tx: mpsc::Sender<AdvertEvent>,
    ) {
        if let AdvertEvent::Resolved {
            host_name,
            port,
            addresses,
            ..
        } = &mut event
        {
            *addresses = resolve(host_name, *port, timeout).await;
        }
        let _ = tx.send(event).await;
    }

    /// Best-effort address lookup for an advertised host name.
    async fn resolve(host_name: &str, port: u16, timeout: Duration) -> Vec<IpAddr> {
        let host = host_name.trim_end_matches('.');
        match tokio::time::timeout(timeout, tokio::net::lookup_host((host, port))).await {
            Ok(Ok(addrs)) => {
                let mut ips: Vec<IpAddr> = addrs.map(|a| a.ip()).collect();
                ips.sort();
                ips.dedup();
                ips
            }
            Ok(Err(e)) => {
                tracing::debug!(host = %host, error = %e, "Advertised host did not resolve");
                Vec::new()
            }
            Err(_) => Vec::new(),
        }
    }
}

/// Whether a resolved advertisement carries no addresses and needs a
/// host name lookup before it is useful.
pub fn needs_lookup(event: &AdvertEvent) -> bool {
    matches!(event, AdvertEvent::Resolved { addresses, .. } if addresses.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_name_strips_service_type() {
        assert_eq!(
            instance_name("garage-pi._ssh._tcp.local.", "_ssh._tcp.local."),
            "garage-pi"
        );
        assert_eq!(instance_name("odd-name", "_ssh._tcp.local."), "odd-name");
    }

    #[test]
    fn lookup_only_when_advertisement_has_no_addresses() {
        let resolved = |addresses: Vec<IpAddr>| AdvertEvent::Resolved {
            handle: "garage-pi._ssh._tcp.local.".to_string(),
            name: "garage-pi".to_string(),
            host_name: "garage-pi.local.".to_string(),
            port: 22,
            addresses,
        };
        assert!(!needs_lookup(&resolved(vec!["192.168.1.40".parse().unwrap()])));
        assert!(needs_lookup(&resolved(Vec::new())));
        assert!(!needs_lookup(&AdvertEvent::Removed {
            handle: "garage-pi._ssh._tcp.local.".to_string()
        }));
    }

    #[tokio::test]
    async fn no_advertisements_stream_is_closed() {
        let mut rx = NoAdvertisements.subscribe(CancellationToken::new()).unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn channel_source_delivers_once() {
        let (tx, source) = ChannelSource::new();
        let mut rx = source.subscribe(CancellationToken::new()).unwrap();
        tx.send(AdvertEvent::Removed {
            handle: "x".to_string(),
        })
        .await
        .unwrap();
        assert_eq!(
            rx.recv().await,
            Some(AdvertEvent::Removed {
                handle: "x".to_string()
            })
        );

        let mut second = source.subscribe(CancellationToken::new()).unwrap();
        assert!(second.recv().await.is_none());
    }
}
