//! Status polling scheduler.
//!
//! One task owns the "refreshing" flag. Interval ticks and manual refresh
//! requests both arrive at that task, so check-and-set of the flag is
//! serialized: while a pass is in flight, further triggers are coalesced
//! into it instead of starting a second pass. Each pass probes every
//! registered device (bounded concurrency), writes the status back to the
//! registry and broadcasts `PollerEvent`s.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use hostwarden_core::events::{PassTrigger, PollerEvent, StatusUpdate};
use hostwarden_core::probe::{probe, Reachability};
use hostwarden_core::types::DeviceStatus;
use hostwarden_registry::DeviceRegistry;

use crate::config::DiscoverConfig;
use crate::error::{DiscoverError, Result};

/// Capacity of the poller event broadcast.
const EVENT_CAPACITY: usize = 256;

/// Reachability check used by the poller.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self, host: &str, port: u16) -> Reachability;
}

/// TCP-connect probe with a fixed timeout.
#[derive(Debug, Clone, Copy)]
pub struct TcpProbe {
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ReachabilityProbe for TcpProbe {
    async fn probe(&self, host: &str, port: u16) -> Reachability {
        probe(host, port, self.timeout).await
    }
}

/// Answer to a manual refresh request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Started,
    AlreadyRunning,
}

struct RefreshRequest {
    reply: oneshot::Sender<RefreshOutcome>,
}

/// Polls device reachability on a fixed interval.
pub struct StatusPoller {
    registry: Arc<dyn DeviceRegistry>,
    prober: Arc<dyn ReachabilityProbe>,
    period: Duration,
    max_concurrent: usize,
}

impl StatusPoller {
    pub fn new(config: &DiscoverConfig, registry: Arc<dyn DeviceRegistry>) -> Self {
        Self {
            registry,
            prober: Arc::new(TcpProbe::new(config.probe_timeout())),
            period: config.poll_interval(),
            max_concurrent: config.max_concurrent_probes,
        }
    }

    pub fn with_prober(mut self, prober: Arc<dyn ReachabilityProbe>) -> Self {
        self.prober = prober;
        self
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Start the scheduler task. The first timer pass runs immediately.
    pub fn spawn(self) -> PollerHandle {
        let (req_tx, req_rx) = mpsc::channel(8);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(self.run(req_rx, events.clone(), cancel.clone()));

        PollerHandle {
            requests: req_tx,
            events,
            cancel,
            task,
        }
    }

    /// Run a single pass to completion, without the scheduler.
    pub async fn poll_once(&self, events: &broadcast::Sender<PollerEvent>) -> Result<()> {
        run_pass(
            self.registry.clone(),
            self.prober.clone(),
            self.max_concurrent,
            events.clone(),
            PassTrigger::Manual,
        )
        .await
    }

    async fn run(
        self,
        mut requests: mpsc::Receiver<RefreshRequest>,
        events: broadcast::Sender<PollerEvent>,
        cancel: CancellationToken,
    ) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut current: Option<JoinHandle<()>> = None;

        tracing::info!(interval_secs = self.period.as_secs(), "Status poller started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                joined = async {
                    match current.as_mut() {
                        Some(task) => task.await,
                        None => Ok(()),
                    }
                }, if current.is_some() => {
                    current = None;
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Status pass panicked");
                    }
                }
                _ = ticker.tick() => {
                    self.try_start(PassTrigger::Timer, &mut current, &events);
                }
                request = requests.recv() => match request {
                    Some(request) => {
                        let outcome =
                            self.try_start(PassTrigger::Manual, &mut current, &events);
                        let _ = request.reply.send(outcome);
                    }
                    None => break,
                },
            }
        }

        if let Some(task) = current.take() {
            task.abort();
        }
        tracing::info!("Status poller stopped");
    }

    /// Single-flight check-and-set; only called from the scheduler task.
    fn try_start(
        &self,
        trigger: PassTrigger,
        current: &mut Option<JoinHandle<()>>,
        events: &broadcast::Sender<PollerEvent>,
    ) -> RefreshOutcome {
        if current.is_some() {
            tracing::debug!(trigger = ?trigger, "Refresh already in progress, coalescing");
            return RefreshOutcome::AlreadyRunning;
        }

        let registry = self.registry.clone();
        let prober = self.prober.clone();
        let max_concurrent = self.max_concurrent;
        let events = events.clone();

        *current = Some(tokio::spawn(async move {
            if let Err(e) = run_pass(registry, prober, max_concurrent, events, trigger).await {
                tracing::warn!(error = %e, "Status pass failed");
            }
        }));
        RefreshOutcome::Started
    }
}

/// Client side of a running poller.
pub struct PollerHandle {
    requests: mpsc::Sender<RefreshRequest>,
    events: broadcast::Sender<PollerEvent>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Request an immediate pass. Coalesced if one is already running.
    pub async fn refresh_now(&self) -> Result<RefreshOutcome> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(RefreshRequest { reply })
            .await
            .map_err(|_| DiscoverError::TaskGone)?;
        rx.await.map_err(|_| DiscoverError::TaskGone)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PollerEvent> {
        self.events.subscribe()
    }

    /// Stop the scheduler and wait for it to exit. An in-flight pass is
    /// aborted.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Status poller task panicked");
        }
    }
}

/// Probe every registered device once.
async fn run_pass(
    registry: Arc<dyn DeviceRegistry>,
    prober: Arc<dyn ReachabilityProbe>,
    max_concurrent: usize,
    events: broadcast::Sender<PollerEvent>,
    trigger: PassTrigger,
) -> Result<()> {
    let pass_id = Uuid::new_v4();
    let start = Instant::now();
    let devices = registry.list_all()?;

    let _ = events.send(PollerEvent::PassStarted {
        pass_id,
        trigger,
        device_count: devices.len() as u32,
    });

    let mut results = stream::iter(devices)
        .map(|device| {
            let prober = prober.clone();
            async move {
                let reachability = prober.probe(&device.host, device.port).await;
                (device, reachability)
            }
        })
        .buffer_unordered(max_concurrent.max(1));

    let mut reachable = 0u32;
    let mut unreachable = 0u32;

    while let Some((device, reachability)) = results.next().await {
        let status = DeviceStatus::from(reachability);
        match status {
            DeviceStatus::Reachable => reachable += 1,
            _ => unreachable += 1,
        }

        // The device may have been deleted while its probe was in flight.
        if let Err(e) = registry.update_status(device.id, status) {
            tracing::debug!(device_id = %device.id, error = %e, "Status not recorded");
            continue;
        }
        if device.status != status {
            tracing::info!(
                device = %device.name,
                host = %device.host,
                from = %device.status,
                to = %status,
                "Device status changed"
            );
        }
        let _ = events.send(PollerEvent::Status(StatusUpdate::new(device.id, status)));
    }

    let duration_ms = start.elapsed().as_millis() as u64;
    let _ = events.send(PollerEvent::PassCompleted {
        pass_id,
        reachable,
        unreachable,
        duration_ms,
    });

    tracing::debug!(
        pass_id = %pass_id,
        trigger = ?trigger,
        reachable,
        unreachable,
        duration_ms,
        "Status pass complete"
    );

    Ok(())
}
