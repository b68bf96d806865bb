//! Behavior of the discovery aggregator against scripted scan and
//! advertisement inputs.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Notify};
use tokio_util::sync::CancellationToken;

use hostwarden_core::types::{DiscoveredCandidate, DiscoverySource};
use hostwarden_discover::advert::{AdvertEvent, ChannelSource, NoAdvertisements};
use hostwarden_discover::aggregator::{self, DiscoveryHandle, DiscoveryPhase};
use hostwarden_discover::error::{DiscoverError, Result};
use hostwarden_discover::scanner::CandidateScan;

/// Scan that returns queued batches once released through `gate`.
struct ScriptedScan {
    batches: Mutex<VecDeque<Vec<DiscoveredCandidate>>>,
    gate: Notify,
    calls: AtomicUsize,
    exits: AtomicUsize,
    honor_cancel: bool,
}

impl ScriptedScan {
    fn new(batches: Vec<Vec<DiscoveredCandidate>>, honor_cancel: bool) -> Arc<Self> {
        Arc::new(Self {
            batches: Mutex::new(batches.into()),
            gate: Notify::new(),
            calls: AtomicUsize::new(0),
            exits: AtomicUsize::new(0),
            honor_cancel,
        })
    }

    fn release(&self) {
        self.gate.notify_one();
    }

    async fn wait_exits(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.exits.load(Ordering::SeqCst) < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("scan did not exit in time");
    }
}

#[async_trait]
impl CandidateScan for ScriptedScan {
    async fn scan(&self, cancel: CancellationToken) -> Result<Vec<DiscoveredCandidate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let released = if self.honor_cancel {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => false,
                _ = self.gate.notified() => true,
            }
        } else {
            self.gate.notified().await;
            true
        };
        self.exits.fetch_add(1, Ordering::SeqCst);
        if !released {
            return Err(DiscoverError::Cancelled);
        }
        Ok(self.batches.lock().unwrap().pop_front().unwrap_or_default())
    }
}

fn scanned(host: &str, latency: u64) -> DiscoveredCandidate {
    DiscoveredCandidate {
        name: host.to_string(),
        host: host.to_string(),
        port: 22,
        ip: host.parse().ok(),
        source: DiscoverySource::SubnetScan,
        latency_ms: Some(latency),
    }
}

fn resolved(handle: &str, host_name: &str, addr: &str) -> AdvertEvent {
    AdvertEvent::Resolved {
        handle: handle.to_string(),
        name: handle.split('.').next().unwrap_or(handle).to_string(),
        host_name: host_name.to_string(),
        port: 22,
        addresses: vec![addr.parse::<IpAddr>().unwrap()],
    }
}

async fn wait_for<T: Clone>(rx: &mut watch::Receiver<T>, pred: impl Fn(&T) -> bool) -> T {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            {
                let value = rx.borrow_and_update();
                if pred(&value) {
                    return value.clone();
                }
            }
            rx.changed().await.expect("aggregator stopped");
        }
    })
    .await
    .expect("condition not reached in time")
}

async fn wait_phase(handle: &DiscoveryHandle, phase: DiscoveryPhase) {
    let mut rx = handle.phase_watch();
    wait_for(&mut rx, |p| *p == phase).await;
}

fn channel_source() -> (mpsc::Sender<AdvertEvent>, Arc<ChannelSource>) {
    let (tx, source) = ChannelSource::new();
    (tx, Arc::new(source))
}

#[tokio::test]
async fn start_merges_scan_results_then_listens() {
    let scan = ScriptedScan::new(
        vec![vec![scanned("192.168.1.20", 4), scanned("192.168.1.7", 9)]],
        true,
    );
    let (_tx, source) = channel_source();
    let handle = aggregator::spawn(scan.clone(), source);

    handle.start().await.unwrap();
    assert_eq!(handle.phase(), DiscoveryPhase::Scanning);

    let mut live = handle.subscribe();
    scan.release();
    let set = wait_for(&mut live, |s| s.len() == 2).await;
    wait_phase(&handle, DiscoveryPhase::Listening).await;

    // Ordered by normalized key.
    assert_eq!(set[0].host, "192.168.1.20");
    assert_eq!(set[1].host, "192.168.1.7");
}

#[tokio::test]
async fn start_while_scanning_does_not_launch_a_second_scan() {
    let scan = ScriptedScan::new(vec![vec![]], true);
    let handle = aggregator::spawn(scan.clone(), Arc::new(NoAdvertisements));

    handle.start().await.unwrap();
    handle.start().await.unwrap();
    assert_eq!(scan.calls.load(Ordering::SeqCst), 1);

    scan.release();
    wait_phase(&handle, DiscoveryPhase::Listening).await;
}

#[tokio::test]
async fn advertisement_resolved_then_removed() {
    let scan = ScriptedScan::new(vec![vec![]], true);
    let (tx, source) = channel_source();
    let handle = aggregator::spawn(scan.clone(), source);
    handle.start().await.unwrap();
    scan.release();

    let mut live = handle.subscribe();
    tx.send(resolved(
        "garage-pi._ssh._tcp.local.",
        "garage-pi.local.",
        "192.168.1.40",
    ))
    .await
    .unwrap();

    let set = wait_for(&mut live, |s| s.len() == 1).await;
    assert_eq!(set[0].host, "garage-pi.local");
    assert_eq!(set[0].name, "garage-pi");
    assert_eq!(set[0].source, DiscoverySource::Advertisement);
    assert_eq!(set[0].ip, Some("192.168.1.40".parse().unwrap()));

    tx.send(AdvertEvent::Removed {
        handle: "garage-pi._ssh._tcp.local.".to_string(),
    })
    .await
    .unwrap();
    wait_for(&mut live, |s| s.is_empty()).await;
}

#[tokio::test]
async fn advertisement_and_scan_of_same_host_dedupe() {
    let mut from_scan = scanned("Garage-Pi.local", 12);
    from_scan.ip = None;
    let scan = ScriptedScan::new(vec![vec![from_scan]], true);
    let (tx, source) = channel_source();
    let handle = aggregator::spawn(scan.clone(), source);
    handle.start().await.unwrap();

    let mut live = handle.subscribe();
    tx.send(resolved(
        "garage-pi._ssh._tcp.local.",
        "garage-pi.local.",
        "192.168.1.40",
    ))
    .await
    .unwrap();
    wait_for(&mut live, |s| s.len() == 1).await;

    scan.release();
    let set = wait_for(&mut live, |s| s.len() == 1 && s[0].latency_ms.is_some()).await;
    wait_phase(&handle, DiscoveryPhase::Listening).await;

    let entry = &set[0];
    assert_eq!(entry.source, DiscoverySource::Advertisement);
    assert_eq!(entry.ip, Some("192.168.1.40".parse().unwrap()));
    assert_eq!(entry.latency_ms, Some(12));
}

#[tokio::test]
async fn stop_clears_and_ignores_late_scan_completion() {
    let scan = ScriptedScan::new(vec![vec![scanned("10.0.0.9", 3)]], false);
    let (tx, source) = channel_source();
    let handle = aggregator::spawn(scan.clone(), source);
    handle.start().await.unwrap();

    let mut live = handle.subscribe();
    tx.send(resolved("nas._ssh._tcp.local.", "nas.local.", "10.0.0.2"))
        .await
        .unwrap();
    wait_for(&mut live, |s| s.len() == 1).await;

    handle.stop().await.unwrap();
    assert!(handle.snapshot().is_empty());
    assert_eq!(handle.phase(), DiscoveryPhase::Idle);

    // The scan ignores cancellation and completes after the stop.
    scan.release();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(handle.snapshot().is_empty());
    assert_eq!(handle.phase(), DiscoveryPhase::Idle);
}

#[tokio::test]
async fn rescan_keeps_existing_entries() {
    let scan = ScriptedScan::new(
        vec![vec![scanned("10.0.0.1", 1)], vec![scanned("10.0.0.2", 2)]],
        true,
    );
    let handle = aggregator::spawn(scan.clone(), Arc::new(NoAdvertisements));
    handle.start().await.unwrap();

    let mut live = handle.subscribe();
    scan.release();
    wait_for(&mut live, |s| s.len() == 1).await;
    wait_phase(&handle, DiscoveryPhase::Listening).await;

    handle.rescan().await.unwrap();
    assert_eq!(handle.phase(), DiscoveryPhase::Scanning);
    scan.release();

    let set = wait_for(&mut live, |s| s.len() == 2).await;
    assert_eq!(set[0].host, "10.0.0.1");
    assert_eq!(set[1].host, "10.0.0.2");
    assert_eq!(scan.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn rescan_interrupts_in_flight_scan() {
    // Batches are handed out only to scans that get released, so the
    // single batch belongs to whichever scan completes.
    let scan = ScriptedScan::new(vec![vec![scanned("10.0.0.2", 2)]], true);
    let handle = aggregator::spawn(scan.clone(), Arc::new(NoAdvertisements));
    handle.start().await.unwrap();
    handle.rescan().await.unwrap();
    scan.wait_exits(1).await;

    let mut live = handle.subscribe();
    scan.release();
    let set = wait_for(&mut live, |s| !s.is_empty()).await;
    wait_phase(&handle, DiscoveryPhase::Listening).await;

    assert_eq!(scan.calls.load(Ordering::SeqCst), 2);
    assert_eq!(set.len(), 1);
    assert_eq!(set[0].host, "10.0.0.2");
    assert_eq!(scan.batches.lock().unwrap().len(), 0);
}
