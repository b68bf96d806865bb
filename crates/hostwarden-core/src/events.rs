//! Event types surfaced by the status poller.
//!
//! Events are broadcast to any number of subscribers (CLI output, a UI,
//! a log sink). Dropped subscribers never stall a polling pass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{DeviceId, DeviceStatus};

/// A freshly probed status for one device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusUpdate {
    pub device_id: DeviceId,
    pub status: DeviceStatus,
    pub checked_at: DateTime<Utc>,
}

impl StatusUpdate {
    pub fn new(device_id: DeviceId, status: DeviceStatus) -> Self {
        Self {
            device_id,
            status,
            checked_at: Utc::now(),
        }
    }
}

/// What triggered a polling pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PassTrigger {
    Timer,
    Manual,
}

/// Lifecycle of a polling pass, tagged by type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event_type")]
pub enum PollerEvent {
    PassStarted {
        pass_id: Uuid,
        trigger: PassTrigger,
        device_count: u32,
    },
    Status(StatusUpdate),
    PassCompleted {
        pass_id: Uuid,
        reachable: u32,
        unreachable: u32,
        duration_ms: u64,
    },
}
