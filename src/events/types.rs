//! Bridge event types
//!
//! Events published by the supervisor for the presentation layer.

use serde::{Deserialize, Serialize};

use crate::bridge::{SlotFault, SlotState};
use crate::protocol::DeviceInfo;

/// Bridge event
///
/// Serialized with `serde(tag = "event", content = "data")`:
/// ```json
/// {
///   "event": "slot.state_changed",
///   "data": { "slot": 0, "state": "streaming", "fault": null }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum BridgeEvent {
    /// Listener bound
    #[serde(rename = "bridge.listening")]
    Listening { address: String },

    /// A slot moved to a new state
    #[serde(rename = "slot.state_changed")]
    SlotStateChanged {
        slot: usize,
        state: SlotState,
        /// Why the slot is closing, when it is
        #[serde(skip_serializing_if = "Option::is_none")]
        fault: Option<SlotFault>,
    },

    /// A camera introduced itself
    #[serde(rename = "slot.device_identified")]
    DeviceIdentified {
        slot: usize,
        device: DeviceInfo,
        peer: String,
        /// False when the camera skipped the hello and defaults are in use
        hello_received: bool,
    },

    /// A connection was turned away
    #[serde(rename = "bridge.connection_rejected")]
    ConnectionRejected { peer: String, reason: String },

    /// Fallback mode entered or left
    #[serde(rename = "bridge.fallback_changed")]
    FallbackModeChanged {
        active: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl BridgeEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Listening { .. } => "bridge.listening",
            Self::SlotStateChanged { .. } => "slot.state_changed",
            Self::DeviceIdentified { .. } => "slot.device_identified",
            Self::ConnectionRejected { .. } => "bridge.connection_rejected",
            Self::FallbackModeChanged { .. } => "bridge.fallback_changed",
        }
    }

    /// Check if the event name matches a topic pattern
    ///
    /// `*` matches everything, `slot.*` matches a prefix, anything else must
    /// match exactly.
    pub fn matches_topic(&self, topic: &str) -> bool {
        if topic == "*" {
            return true;
        }

        let event_name = self.event_name();
        match topic.strip_suffix(".*") {
            Some(prefix) => event_name
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('.')),
            None => event_name == topic,
        }
    }

    /// Slot the event is about, if any
    pub fn slot(&self) -> Option<usize> {
        match self {
            Self::SlotStateChanged { slot, .. } | Self::DeviceIdentified { slot, .. } => {
                Some(*slot)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_topic() {
        let event = BridgeEvent::SlotStateChanged {
            slot: 1,
            state: SlotState::Streaming,
            fault: None,
        };

        assert!(event.matches_topic("*"));
        assert!(event.matches_topic("slot.*"));
        assert!(event.matches_topic("slot.state_changed"));
        assert!(!event.matches_topic("bridge.*"));
        assert!(!event.matches_topic("sl.*"));
        assert_eq!(event.slot(), Some(1));
    }

    #[test]
    fn test_serialization() {
        let event = BridgeEvent::SlotStateChanged {
            slot: 2,
            state: SlotState::Closing,
            fault: Some(SlotFault::SyncTimeout { after_ms: 5000 }),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("slot.state_changed"));
        assert!(json.contains("\"closing\""));
        assert!(json.contains("sync_timeout"));

        let back: BridgeEvent = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            back,
            BridgeEvent::SlotStateChanged {
                slot: 2,
                state: SlotState::Closing,
                fault: Some(SlotFault::SyncTimeout { after_ms: 5000 }),
            }
        ));
    }

    #[test]
    fn test_fallback_omits_empty_reason() {
        let event = BridgeEvent::FallbackModeChanged {
            active: false,
            reason: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"event":"bridge.fallback_changed","data":{"active":false}}"#
        );
    }
}
