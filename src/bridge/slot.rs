//! Per-slot bookkeeping owned by the supervisor's control loop

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::status::{SlotFault, SlotState, SlotSummary};
use crate::camera::SessionCounters;
use crate::protocol::{DeviceInfo, TelemetrySnapshot};

/// Result of feeding the health tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthChange {
    Degraded,
    Recovered,
}

/// Counts sub-fatal faults against streaks of healthy frames
///
/// `fault_threshold` faults without an intervening streak of
/// `recovery_frames` healthy frames degrade the slot; a streak of
/// `recovery_frames` healthy frames recovers it.
#[derive(Debug, Clone)]
pub struct HealthTracker {
    fault_threshold: u32,
    recovery_frames: u32,
    faults: u32,
    healthy_streak: u32,
    degraded: bool,
}

impl HealthTracker {
    pub fn new(fault_threshold: u32, recovery_frames: u32) -> Self {
        Self {
            fault_threshold: fault_threshold.max(1),
            recovery_frames: recovery_frames.max(1),
            faults: 0,
            healthy_streak: 0,
            degraded: false,
        }
    }

    pub fn record_fault(&mut self) -> Option<HealthChange> {
        self.healthy_streak = 0;
        self.faults = self.faults.saturating_add(1);
        if !self.degraded && self.faults >= self.fault_threshold {
            self.degraded = true;
            return Some(HealthChange::Degraded);
        }
        None
    }

    pub fn record_healthy(&mut self) -> Option<HealthChange> {
        self.healthy_streak = self.healthy_streak.saturating_add(1);
        if self.healthy_streak < self.recovery_frames {
            return None;
        }
        self.faults = 0;
        if self.degraded {
            self.degraded = false;
            return Some(HealthChange::Recovered);
        }
        None
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }
}

/// A session running in a slot
pub(crate) struct ActiveSession {
    pub id: Uuid,
    pub peer: SocketAddr,
    pub started: Instant,
    pub connected_at: DateTime<Utc>,
    pub cancel: CancellationToken,
    pub abort: AbortHandle,
    pub counters: Arc<SessionCounters>,
    pub device: Option<DeviceInfo>,
    pub telemetry: Option<watch::Receiver<TelemetrySnapshot>>,
    /// Set when the slot starts closing; the task is aborted past it
    pub closing_deadline: Option<Instant>,
}

pub(crate) struct SlotEntry {
    pub index: usize,
    pub name: String,
    pub state: SlotState,
    pub session: Option<ActiveSession>,
    pub last_fault: Option<SlotFault>,
}

impl SlotEntry {
    pub fn new(index: usize, name: String) -> Self {
        Self {
            index,
            name,
            state: SlotState::Empty,
            session: None,
            last_fault: None,
        }
    }

    /// Apply a transition if the state machine allows it
    pub fn transition(&mut self, next: SlotState) -> bool {
        if !self.state.can_transition_to(next) {
            if self.state != next {
                warn!(
                    slot = self.index,
                    "Ignoring slot transition {} -> {}", self.state, next
                );
            }
            return false;
        }
        debug!(slot = self.index, "Slot {} -> {}", self.state, next);
        self.state = next;
        true
    }

    /// Whether `id` is the session currently owning the slot
    pub fn owns(&self, id: Uuid) -> bool {
        self.session.as_ref().is_some_and(|session| session.id == id)
    }

    pub fn summary(&self, sender_open: bool) -> SlotSummary {
        let mut summary = SlotSummary::empty(self.index, self.name.clone());
        summary.state = self.state;
        summary.sender_open = sender_open;
        summary.last_fault = self.last_fault.clone();
        if let Some(session) = &self.session {
            summary.device = session.device.clone();
            summary.peer = Some(session.peer.to_string());
            summary.connected_at = Some(session.connected_at);
            summary.telemetry = session.telemetry.as_ref().map(|rx| rx.borrow().clone());
            summary.counters = session.counters.snapshot();
        }
        summary
    }
}
