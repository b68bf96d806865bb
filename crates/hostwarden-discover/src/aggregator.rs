//! Discovery aggregator.
//!
//! A single task owns the live candidate set. Subnet scan results and
//! advertisement events are merged into it; everything else talks to the
//! task through a `DiscoveryHandle`. Snapshots and the current phase are
//! published over `watch` channels.
//!
//! Merging is additive and keyed by normalized `(host, port)`: an entry
//! already present is refined (missing fields filled) but never replaced.
//! Every scan carries a generation number; completions from a generation
//! that has since been cancelled or superseded are dropped.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use hostwarden_core::types::{CandidateKey, DiscoveredCandidate, DiscoverySource};

use crate::advert::{AdvertEvent, AdvertisementSource};
use crate::error::{DiscoverError, Result};
use crate::scanner::CandidateScan;

// ── Candidate set ─────────────────────────────────────────────────

/// Candidates keyed by normalized host and port.
#[derive(Debug, Default, Clone)]
pub struct CandidateSet {
    entries: BTreeMap<CandidateKey, DiscoveredCandidate>,
}

impl CandidateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new candidate or refine the existing one. Returns true if
    /// the set changed.
    pub fn merge(&mut self, candidate: DiscoveredCandidate) -> bool {
        match self.entries.get_mut(&candidate.key()) {
            Some(existing) => existing.refine(&candidate),
            None => {
                self.entries.insert(candidate.key(), candidate);
                true
            }
        }
    }

    pub fn merge_all(&mut self, candidates: impl IntoIterator<Item = DiscoveredCandidate>) -> bool {
        candidates
            .into_iter()
            .fold(false, |changed, c| self.merge(c) | changed)
    }

    pub fn remove(&mut self, key: &CandidateKey) -> Option<DiscoveredCandidate> {
        self.entries.remove(key)
    }

    pub fn get(&self, key: &CandidateKey) -> Option<&DiscoveredCandidate> {
        self.entries.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &CandidateKey> {
        self.entries.keys()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All candidates ordered by key.
    pub fn snapshot(&self) -> Vec<DiscoveredCandidate> {
        self.entries.values().cloned().collect()
    }
}

// ── Actor ─────────────────────────────────────────────────────────

/// Lifecycle phase of the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryPhase {
    /// Not listening and no scan running.
    Idle,
    /// A subnet scan is in flight.
    Scanning,
    /// Listening for advertisements, no scan running.
    Listening,
}

enum Command {
    Start(oneshot::Sender<()>),
    Stop(oneshot::Sender<()>),
    Rescan(oneshot::Sender<()>),
}

struct ScanOutcome {
    generation: u64,
    result: Result<Vec<DiscoveredCandidate>>,
}

/// Client side of a running aggregator. Cheap to clone; the task stops
/// once every handle is dropped.
#[derive(Clone)]
pub struct DiscoveryHandle {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<Vec<DiscoveredCandidate>>,
    phase: watch::Receiver<DiscoveryPhase>,
}

impl DiscoveryHandle {
    /// Begin listening for advertisements and launch a subnet scan.
    pub async fn start(&self) -> Result<()> {
        self.request(Command::Start).await
    }

    /// Cancel the listener and any in-flight scan, and clear the live set.
    pub async fn stop(&self) -> Result<()> {
        self.request(Command::Stop).await
    }

    /// Force a new subnet scan, interrupting one in flight. Existing
    /// entries are kept.
    pub async fn rescan(&self) -> Result<()> {
        self.request(Command::Rescan).await
    }

    /// Current live set, ordered by key.
    pub fn snapshot(&self) -> Vec<DiscoveredCandidate> {
        self.snapshot.borrow().clone()
    }

    pub fn phase(&self) -> DiscoveryPhase {
        *self.phase.borrow()
    }

    /// Receiver notified on every change to the live set.
    pub fn subscribe(&self) -> watch::Receiver<Vec<DiscoveredCandidate>> {
        self.snapshot.clone()
    }

    /// Receiver notified on every phase transition.
    pub fn phase_watch(&self) -> watch::Receiver<DiscoveryPhase> {
        self.phase.clone()
    }

    async fn request(&self, make: fn(oneshot::Sender<()>) -> Command) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| DiscoverError::TaskGone)?;
        rx.await.map_err(|_| DiscoverError::TaskGone)
    }
}

/// Spawn the aggregator task. Must be called inside a tokio runtime.
pub fn spawn(
    scanner: Arc<dyn CandidateScan>,
    source: Arc<dyn AdvertisementSource>,
) -> DiscoveryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    let (snapshot_tx, snapshot_rx) = watch::channel(Vec::new());
    let (phase_tx, phase_rx) = watch::channel(DiscoveryPhase::Idle);
    let (done_tx, done_rx) = mpsc::unbounded_channel();

    let aggregator = Aggregator {
        scanner,
        source,
        set: CandidateSet::new(),
        handles: HashMap::new(),
        phase: DiscoveryPhase::Idle,
        generation: 0,
        scan_cancel: None,
        listener_cancel: None,
        adverts: None,
        done_tx,
        snapshot_tx,
        phase_tx,
    };
    tokio::spawn(aggregator.run(cmd_rx, done_rx));

    DiscoveryHandle {
        commands: cmd_tx,
        snapshot: snapshot_rx,
        phase: phase_rx,
    }
}

struct Aggregator {
    scanner: Arc<dyn CandidateScan>,
    source: Arc<dyn AdvertisementSource>,
    set: CandidateSet,
    /// Advertisement handle → key of the entry it produced.
    handles: HashMap<String, CandidateKey>,
    phase: DiscoveryPhase,
    generation: u64,
    scan_cancel: Option<CancellationToken>,
    listener_cancel: Option<CancellationToken>,
    adverts: Option<mpsc::Receiver<AdvertEvent>>,
    done_tx: mpsc::UnboundedSender<ScanOutcome>,
    snapshot_tx: watch::Sender<Vec<DiscoveredCandidate>>,
    phase_tx: watch::Sender<DiscoveryPhase>,
}

impl Aggregator {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut done: mpsc::UnboundedReceiver<ScanOutcome>,
    ) {
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Start(ack)) => {
                        self.start();
                        let _ = ack.send(());
                    }
                    Some(Command::Stop(ack)) => {
                        self.stop();
                        let _ = ack.send(());
                    }
                    Some(Command::Rescan(ack)) => {
                        self.launch_scan(true);
                        let _ = ack.send(());
                    }
                    None => {
                        self.stop();
                        break;
                    }
                },
                Some(outcome) = done.recv() => self.finish_scan(outcome),
                event = next_advert(self.adverts.as_mut()) => match event {
                    Some(event) => self.apply_advert(event),
                    None => {
                        tracing::debug!("Advertisement stream closed");
                        self.adverts = None;
                    }
                },
            }
        }
        tracing::debug!("Discovery aggregator stopped");
    }

    fn start(&mut self) {
        if self.listener_cancel.is_none() {
            let token = CancellationToken::new();
            match self.source.subscribe(token.clone()) {
                Ok(rx) => {
                    self.adverts = Some(rx);
                    self.listener_cancel = Some(token);
                }
                Err(e) => tracing::warn!(error = %e, "Advertisement listener failed to start"),
            }
        }
        self.launch_scan(false);
    }

    fn stop(&mut self) {
        if let Some(token) = self.scan_cancel.take() {
            token.cancel();
        }
        if let Some(token) = self.listener_cancel.take() {
            token.cancel();
        }
        // Outstanding completions now belong to a stale generation.
        self.generation += 1;
        self.adverts = None;
        self.handles.clear();
        self.set.clear();
        self.publish();
        self.set_phase(DiscoveryPhase::Idle);
    }

    fn launch_scan(&mut self, force: bool) {
        if self.phase == DiscoveryPhase::Scanning && !force {
            tracing::debug!("Scan already in progress");
            return;
        }
        if let Some(token) = self.scan_cancel.take() {
            token.cancel();
        }

        self.generation += 1;
        let generation = self.generation;
        let token = CancellationToken::new();
        self.scan_cancel = Some(token.clone());

        let scanner = self.scanner.clone();
        let done = self.done_tx.clone();
        tokio::spawn(async move {
            let result = scanner.scan(token).await;
            let _ = done.send(ScanOutcome { generation, result });
        });

        tracing::info!(generation, force, "Subnet scan launched");
        self.set_phase(DiscoveryPhase::Scanning);
    }

    fn finish_scan(&mut self, outcome: ScanOutcome) {
        if outcome.generation != self.generation {
            tracing::debug!(
                generation = outcome.generation,
                current = self.generation,
                "Ignoring stale scan completion"
            );
            return;
        }
        self.scan_cancel = None;

        match outcome.result {
            Ok(candidates) => {
                let found = candidates.len();
                if self.set.merge_all(candidates) {
                    self.publish();
                }
                tracing::info!(
                    generation = outcome.generation,
                    found,
                    live = self.set.len(),
                    "Scan results merged"
                );
            }
            Err(DiscoverError::Cancelled) => {}
            Err(e) => tracing::warn!(error = %e, "Subnet scan failed"),
        }

        let next = if self.listener_cancel.is_some() {
            DiscoveryPhase::Listening
        } else {
            DiscoveryPhase::Idle
        };
        self.set_phase(next);
    }

    fn apply_advert(&mut self, event: AdvertEvent) {
        match event {
            AdvertEvent::Found { handle, name } => {
                tracing::debug!(handle = %handle, name = %name, "Service found");
            }
            AdvertEvent::Resolved {
                handle,
                name,
                host_name,
                port,
                addresses,
            } => {
                let host = host_name.strip_suffix('.').unwrap_or(&host_name).to_string();
                let candidate = DiscoveredCandidate {
                    name,
                    host,
                    port,
                    ip: addresses.first().copied(),
                    source: DiscoverySource::Advertisement,
                    latency_ms: None,
                };
                let key = candidate.key();

                let mut changed = false;
                if let Some(previous) = self.handles.insert(handle, key.clone()) {
                    if previous != key {
                        changed |= self.set.remove(&previous).is_some();
                    }
                }
                changed |= self.set.merge(candidate);
                if changed {
                    tracing::debug!(key = %key, "Advertised service merged");
                    self.publish();
                }
            }
            AdvertEvent::Removed { handle } => {
                if let Some(key) = self.handles.remove(&handle) {
                    if self.set.remove(&key).is_some() {
                        tracing::debug!(key = %key, "Advertised service removed");
                        self.publish();
                    }
                }
            }
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.set.snapshot());
    }

    fn set_phase(&mut self, phase: DiscoveryPhase) {
        self.phase = phase;
        self.phase_tx.send_replace(phase);
    }
}

async fn next_advert(rx: Option<&mut mpsc::Receiver<AdvertEvent>>) -> Option<AdvertEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
