//! Slot states and the published status snapshot

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::camera::SlotCounters;
use crate::error::{BridgeError, ProtocolError};
use crate::protocol::{DeviceInfo, TelemetrySnapshot};

/// Lifecycle of one camera slot
///
/// ```text
/// Empty -> Connecting -> Streaming <-> Degraded
///              \             |            /
///               `------> Closing <-------'
///                           |
///                         Empty
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    #[default]
    Empty,
    Connecting,
    Streaming,
    Degraded,
    Closing,
}

impl SlotState {
    pub fn can_transition_to(self, next: SlotState) -> bool {
        use SlotState::*;
        matches!(
            (self, next),
            (Empty, Connecting)
                | (Connecting, Streaming)
                | (Streaming, Degraded)
                | (Degraded, Streaming)
                | (Connecting | Streaming | Degraded, Closing)
                | (Closing, Empty)
        )
    }

    /// A session owns the slot (anything but `Empty`)
    pub fn is_occupied(self) -> bool {
        self != SlotState::Empty
    }

    /// A session is running and not on its way out
    pub fn is_live(self) -> bool {
        matches!(
            self,
            SlotState::Connecting | SlotState::Streaming | SlotState::Degraded
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SlotState::Empty => "empty",
            SlotState::Connecting => "connecting",
            SlotState::Streaming => "streaming",
            SlotState::Degraded => "degraded",
            SlotState::Closing => "closing",
        }
    }
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified reason a slot closed or lost its sender
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SlotFault {
    /// The camera closed the connection
    Disconnected,
    /// Stopped through `stop_slot` or shutdown
    Stopped,
    Protocol { reason: String },
    DecodeFatal { reason: String },
    SyncTimeout { after_ms: u64 },
    SenderUnavailable { reason: String },
    IdleTimeout { idle_ms: u64 },
    SessionCrashed,
    Internal { reason: String },
}

impl SlotFault {
    pub fn from_error(error: &BridgeError) -> Self {
        match error {
            BridgeError::Protocol(ProtocolError::ClosedBeforeHandshake) => SlotFault::Disconnected,
            BridgeError::Protocol(e) => SlotFault::Protocol {
                reason: e.to_string(),
            },
            BridgeError::Io(e) => SlotFault::Protocol {
                reason: e.to_string(),
            },
            BridgeError::DecodeFatal(reason) => SlotFault::DecodeFatal {
                reason: reason.clone(),
            },
            BridgeError::SyncTimeout(after) => SlotFault::SyncTimeout {
                after_ms: after.as_millis() as u64,
            },
            BridgeError::SenderUnavailable(reason) => SlotFault::SenderUnavailable {
                reason: reason.clone(),
            },
            other => SlotFault::Internal {
                reason: other.to_string(),
            },
        }
    }

    /// Whether the fault is a normal end of a session rather than a failure
    pub fn is_clean(&self) -> bool {
        matches!(self, SlotFault::Disconnected | SlotFault::Stopped)
    }
}

impl fmt::Display for SlotFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotFault::Disconnected => write!(f, "camera disconnected"),
            SlotFault::Stopped => write!(f, "stopped"),
            SlotFault::Protocol { reason } => write!(f, "protocol error: {}", reason),
            SlotFault::DecodeFatal { reason } => write!(f, "decode failed: {}", reason),
            SlotFault::SyncTimeout { after_ms } => {
                write!(f, "no sync anchors within {} ms", after_ms)
            }
            SlotFault::SenderUnavailable { reason } => write!(f, "sender unavailable: {}", reason),
            SlotFault::IdleTimeout { idle_ms } => write!(f, "idle for {} ms", idle_ms),
            SlotFault::SessionCrashed => write!(f, "session crashed"),
            SlotFault::Internal { reason } => write!(f, "internal error: {}", reason),
        }
    }
}

/// Read-only view of one slot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotSummary {
    pub index: usize,
    pub name: String,
    pub state: SlotState,
    pub device: Option<DeviceInfo>,
    pub peer: Option<String>,
    pub connected_at: Option<DateTime<Utc>>,
    pub telemetry: Option<TelemetrySnapshot>,
    pub counters: SlotCounters,
    pub sender_open: bool,
    pub last_fault: Option<SlotFault>,
}

impl SlotSummary {
    pub fn empty(index: usize, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
            state: SlotState::Empty,
            device: None,
            peer: None,
            connected_at: None,
            telemetry: None,
            counters: SlotCounters::default(),
            sender_open: false,
            last_fault: None,
        }
    }
}

/// Process-wide status, replaced atomically by the supervisor
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BridgeStatus {
    pub listening: Option<String>,
    pub fallback_mode: bool,
    pub fallback_reason: Option<String>,
    pub slots: Vec<SlotSummary>,
}

impl BridgeStatus {
    pub fn slot(&self, index: usize) -> Option<&SlotSummary> {
        self.slots.get(index)
    }

    /// Number of slots in `state`
    pub fn count(&self, state: SlotState) -> usize {
        self.slots.iter().filter(|slot| slot.state == state).count()
    }
}
