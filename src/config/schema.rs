use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};
use crate::output::OmtQuality;
use crate::protocol::{ClientHello, DEFAULT_MAX_PAYLOAD};

/// Hard upper bound on camera slots
pub const MAX_SLOTS: usize = 4;

/// Main bridge configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Listening socket settings
    pub listener: ListenerConfig,
    /// One entry per camera slot; the entry's index is the slot index
    pub cameras: Vec<CameraSlotConfig>,
    /// Camera connection settings
    pub connection: ConnectionConfig,
    /// Decoder pipeline settings
    pub decoder: DecoderConfig,
    /// Audio/video synchronizer settings
    pub sync: SyncConfig,
    /// Supervisor health checks
    pub health: HealthConfig,
    /// Fallback mode recovery
    pub fallback: FallbackConfig,
    /// OMT sender settings
    pub sender: SenderConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            cameras: (0..MAX_SLOTS).map(CameraSlotConfig::for_slot).collect(),
            connection: ConnectionConfig::default(),
            decoder: DecoderConfig::default(),
            sync: SyncConfig::default(),
            health: HealthConfig::default(),
            fallback: FallbackConfig::default(),
            sender: SenderConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Number of camera slots served by this configuration
    pub fn slot_count(&self) -> usize {
        self.cameras.len().min(MAX_SLOTS)
    }

    /// Source name announced for a slot
    pub fn camera_name(&self, slot: usize) -> String {
        self.cameras
            .get(slot)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| CameraSlotConfig::for_slot(slot).name)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cameras.is_empty() || self.cameras.len() > MAX_SLOTS {
            return Err(BridgeError::Config(format!(
                "between 1 and {} cameras must be configured, got {}",
                MAX_SLOTS,
                self.cameras.len()
            )));
        }
        if let Some(slot) = self
            .cameras
            .iter()
            .position(|c| c.name.trim().is_empty() || c.name.contains('\0'))
        {
            return Err(BridgeError::Config(format!(
                "camera {} has an empty or invalid name",
                slot
            )));
        }
        if self.connection.max_payload_bytes == 0 {
            return Err(BridgeError::Config(
                "connection.max_payload_bytes must be positive".to_string(),
            ));
        }
        if self.decoder.queue_depth == 0 || self.decoder.max_consecutive_errors == 0 {
            return Err(BridgeError::Config(
                "decoder.queue_depth and decoder.max_consecutive_errors must be positive"
                    .to_string(),
            ));
        }
        if self.sync.jitter_capacity == 0 {
            return Err(BridgeError::Config(
                "sync.jitter_capacity must be positive".to_string(),
            ));
        }
        if self.sync.max_clock_jump_ms <= self.sync.drift_window_ms {
            return Err(BridgeError::Config(
                "sync.max_clock_jump_ms must exceed sync.drift_window_ms".to_string(),
            ));
        }
        if self.health.check_interval_ms == 0 {
            return Err(BridgeError::Config(
                "health.check_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Listening socket configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (IPv4 or IPv6)
    pub bind_address: String,
    /// TCP port cameras connect to
    pub port: u16,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

/// Per-slot camera settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSlotConfig {
    /// OMT source name
    pub name: String,
}

impl CameraSlotConfig {
    pub fn for_slot(slot: usize) -> Self {
        Self {
            name: format!("Camera {}", slot + 1),
        }
    }
}

impl Default for CameraSlotConfig {
    fn default() -> Self {
        Self::for_slot(0)
    }
}

/// Camera connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// How long to wait for the hello message
    pub handshake_timeout_ms: u64,
    /// Connection ends if no complete message arrives within this time
    pub read_timeout_ms: u64,
    /// Supervisor stops slots without any traffic for this long
    pub idle_timeout_secs: u64,
    /// Largest accepted payload
    pub max_payload_bytes: u32,
    /// Session parameters used when the camera sends no hello
    pub default_hello: ClientHello,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: 5000,
            read_timeout_ms: 10_000,
            idle_timeout_secs: 30,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD,
            default_hello: ClientHello::default(),
        }
    }
}

impl ConnectionConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Decoder pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Consecutive backend failures tolerated before the session fails
    pub max_consecutive_errors: u32,
    /// Packets buffered between the socket reader and the decode worker
    pub queue_depth: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_consecutive_errors: 30,
            queue_depth: 64,
        }
    }
}

/// Synchronizer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Audio may lead or trail the video clock by this much
    pub drift_window_ms: u64,
    /// Both anchors must exist within this time
    pub anchor_deadline_ms: u64,
    /// Frames buffered per media kind
    pub jitter_capacity: usize,
    /// Capture timestamps further than this from the anchor mapping are a
    /// clock discontinuity
    pub max_clock_jump_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            drift_window_ms: 40,
            anchor_deadline_ms: 5000,
            jitter_capacity: 256,
            max_clock_jump_ms: 5000,
        }
    }
}

impl SyncConfig {
    pub fn drift_window(&self) -> Duration {
        Duration::from_millis(self.drift_window_ms)
    }

    pub fn anchor_deadline(&self) -> Duration {
        Duration::from_millis(self.anchor_deadline_ms)
    }

    pub fn max_clock_jump(&self) -> Duration {
        Duration::from_millis(self.max_clock_jump_ms)
    }
}

/// Supervisor health check configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Interval between health checks
    pub check_interval_ms: u64,
    /// Sub-fatal faults that move a streaming slot to degraded
    pub degrade_fault_threshold: u32,
    /// Consecutive healthy frames that restore a degraded slot
    pub recovery_healthy_frames: u32,
    /// Grace period for a stopping session before it is aborted
    pub stop_timeout_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 1000,
            degrade_fault_threshold: 3,
            recovery_healthy_frames: 30,
            stop_timeout_ms: 3000,
        }
    }
}

impl HealthConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

/// Fallback mode configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Interval between sender recovery attempts
    pub retry_interval_secs: u64,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            retry_interval_secs: 10,
        }
    }
}

impl FallbackConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }
}

/// OMT sender configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Path or soname of the OMT library
    pub library_path: String,
    /// Encoding quality requested from the sender
    pub quality: OmtQuality,
    /// Consecutive rejected frames treated as a sender failure
    pub max_consecutive_rejections: u32,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            library_path: default_library_path().to_string(),
            quality: OmtQuality::default(),
            max_consecutive_rejections: 30,
        }
    }
}

fn default_library_path() -> &'static str {
    if cfg!(target_os = "windows") {
        "libomt.dll"
    } else if cfg!(target_os = "macos") {
        "libomt.dylib"
    } else {
        "libomt.so"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.slot_count(), 4);
        assert_eq!(config.camera_name(2), "Camera 3");
        assert_eq!(config.listener.port, 5000);
        assert_eq!(config.sync.drift_window(), Duration::from_millis(40));
        assert_eq!(config.connection.default_hello.video.width, 1280);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: BridgeConfig = serde_json::from_str(
            r#"{"listener": {"port": 6000}, "cameras": [{"name": "Stage"}, {"name": "Crowd"}]}"#,
        )
        .unwrap();
        assert_eq!(config.listener.port, 6000);
        assert_eq!(config.listener.bind_address, "0.0.0.0");
        assert_eq!(config.slot_count(), 2);
        assert_eq!(config.camera_name(1), "Crowd");
        assert_eq!(config.health.degrade_fault_threshold, 3);
    }

    #[test]
    fn test_validate_rejects_bad_slot_lists() {
        let mut config = BridgeConfig::default();
        config.cameras.push(CameraSlotConfig::for_slot(4));
        assert!(matches!(config.validate(), Err(BridgeError::Config(_))));

        config.cameras.clear();
        assert!(config.validate().is_err());

        config.cameras.push(CameraSlotConfig {
            name: "  ".to_string(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_clock_jump_inside_drift_window() {
        let mut config = BridgeConfig::default();
        assert_eq!(config.sync.max_clock_jump(), Duration::from_secs(5));
        config.sync.max_clock_jump_ms = config.sync.drift_window_ms;
        assert!(matches!(config.validate(), Err(BridgeError::Config(_))));
    }
}
