//! CLI entry point for hostwarden-discover.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use hostwarden_core::config as warden_config;
use hostwarden_core::events::PollerEvent;
use hostwarden_registry::{DeviceRegistry, JsonDeviceRegistry, RegistryConfig};

use hostwarden_discover::advert::AdvertisementSource;
use hostwarden_discover::config::DiscoverConfig;
use hostwarden_discover::scanner::{CandidateScan, SubnetScanner};
use hostwarden_discover::scheduler::StatusPoller;
use hostwarden_discover::{aggregator, DiscoveryPhase};

#[derive(Parser)]
#[command(name = "hostwarden-discover")]
#[command(about = "Discover SSH hosts and track device reachability")]
struct Cli {
    /// Config file prefix (default: hostwarden).
    #[arg(short, long, default_value = warden_config::DEFAULT_FILE_PREFIX)]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sweep the local /24 once and print reachable SSH hosts.
    Scan {
        /// Per-host connect timeout, in milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Cap on the number of addresses probed.
        #[arg(long)]
        max_hosts: Option<usize>,

        /// Print JSON instead of one line per host.
        #[arg(long)]
        json: bool,
    },
    /// Scan and listen for advertised SSH services, then print the live set.
    Watch {
        /// How long to listen before printing.
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },
    /// Poll registered devices for reachability.
    Poll {
        /// Run a single pass and exit.
        #[arg(long)]
        once: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    let cli = Cli::parse();
    let cfg = warden_config::load(&cli.config)?;
    let discover_config: DiscoverConfig = warden_config::section(&cfg, "discover")?;

    match cli.command {
        Command::Scan {
            timeout_ms,
            max_hosts,
            json,
        } => {
            let mut scanner = SubnetScanner::new(&discover_config)
                .with_max_hosts(max_hosts.or(discover_config.max_hosts));
            if let Some(ms) = timeout_ms {
                scanner = scanner.with_timeout(Duration::from_millis(ms));
            }
            let found = scanner.scan(CancellationToken::new()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&found)?);
            } else {
                for candidate in &found {
                    println!(
                        "{}:{}\t{} ms",
                        candidate.host,
                        candidate.port,
                        candidate.latency_ms.unwrap_or_default()
                    );
                }
            }
        }
        Command::Watch { seconds } => {
            let scanner: Arc<dyn CandidateScan> = Arc::new(SubnetScanner::new(&discover_config));
            let handle = aggregator::spawn(scanner, advertisement_source(&discover_config));
            handle.start().await?;

            let mut phase = handle.phase_watch();
            let deadline = tokio::time::sleep(Duration::from_secs(seconds));
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    _ = &mut deadline => break,
                    _ = tokio::signal::ctrl_c() => break,
                    changed = phase.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let current: DiscoveryPhase = *phase.borrow();
                        tracing::info!(phase = ?current, live = handle.snapshot().len(), "Discovery phase");
                    }
                }
            }

            let snapshot = handle.snapshot();
            handle.stop().await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Command::Poll { once } => {
            let registry_config: RegistryConfig = warden_config::section(&cfg, "registry")?;
            let registry: Arc<dyn DeviceRegistry> =
                Arc::new(JsonDeviceRegistry::open(&registry_config.path)?);
            tracing::info!(path = %registry_config.path.display(), "Registry opened");

            let poller = StatusPoller::new(&discover_config, registry);

            if once {
                let (events, mut rx) = broadcast::channel(256);
                let printer = tokio::spawn(async move {
                    while let Ok(event) = rx.recv().await {
                        print_event(&event);
                    }
                });
                poller.poll_once(&events).await?;
                drop(events);
                let _ = printer.await;
            } else {
                let handle = poller.spawn();
                let mut rx = handle.subscribe();
                loop {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => break,
                        event = rx.recv() => match event {
                            Ok(event) => print_event(&event),
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                tracing::warn!(skipped = n, "Event output lagged");
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        },
                    }
                }
                handle.shutdown().await;
            }
        }
    }

    Ok(())
}

fn print_event(event: &PollerEvent) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{line}"),
        Err(e) => tracing::warn!(error = %e, "Event not serializable"),
    }
}

#[cfg(feature = "mdns")]
fn advertisement_source(config: &DiscoverConfig) -> Arc<dyn AdvertisementSource> {
    Arc::new(hostwarden_discover::advert::MdnsSource::new(config))
}

#[cfg(not(feature = "mdns"))]
fn advertisement_source(_config: &DiscoverConfig) -> Arc<dyn AdvertisementSource> {
    Arc::new(hostwarden_discover::advert::NoAdvertisements)
}
