//! JSON payloads carried by hello, telemetry and reject messages

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Video parameters announced by the camera
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VideoParams {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate: u32,
}

impl Default for VideoParams {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30,
            bitrate: 4_000_000,
        }
    }
}

/// Audio parameters announced by the camera
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AudioParams {
    pub enabled: bool,
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate: u32,
}

impl Default for AudioParams {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_rate: 48_000,
            channels: 2,
            bitrate: 128_000,
        }
    }
}

/// Device identity and the first telemetry sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeviceInfo {
    pub model: String,
    pub id: Option<String>,
    pub battery_percent: Option<i32>,
    pub cpu_temperature_celsius: Option<f32>,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            model: "Unknown".to_string(),
            id: None,
            battery_percent: None,
            cpu_temperature_celsius: None,
        }
    }
}

/// Session parameters sent by the camera as its first message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientHello {
    pub video: VideoParams,
    pub audio: AudioParams,
    pub device: DeviceInfo,
}

impl ClientHello {
    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(payload).map_err(|e| ProtocolError::Malformed {
            what: "hello",
            reason: e.to_string(),
        })
    }

    pub fn to_json(&self) -> Vec<u8> {
        // Plain data structs; serialization cannot fail
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// One telemetry record; only `"misc"` records are understood
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TelemetryRecord {
    #[serde(rename = "type")]
    pub record_type: String,
    pub battery_percent: Option<i32>,
    #[serde(alias = "temperatureCelsius")]
    pub cpu_temperature_celsius: Option<f32>,
}

impl TelemetryRecord {
    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(payload).map_err(|e| ProtocolError::Malformed {
            what: "telemetry",
            reason: e.to_string(),
        })
    }

    pub fn is_misc(&self) -> bool {
        self.record_type == "misc"
    }
}

/// Coarse device temperature band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThermalState {
    Cool,
    Normal,
    Hot,
    Critical,
}

impl ThermalState {
    pub fn from_celsius(celsius: f32) -> Self {
        if celsius < 50.0 {
            ThermalState::Cool
        } else if celsius < 70.0 {
            ThermalState::Normal
        } else if celsius < 85.0 {
            ThermalState::Hot
        } else {
            ThermalState::Critical
        }
    }
}

/// Battery level at or below which the device is reported as low
pub const LOW_BATTERY_PERCENT: i32 = 20;

/// Latest telemetry known for a session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub battery_percent: Option<i32>,
    pub cpu_temperature_celsius: Option<f32>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl TelemetrySnapshot {
    pub fn from_device(device: &DeviceInfo) -> Self {
        let mut snapshot = Self::default();
        snapshot.apply(device.battery_percent, device.cpu_temperature_celsius);
        snapshot
    }

    /// Merge a record; returns whether anything changed
    pub fn merge(&mut self, record: &TelemetryRecord) -> bool {
        if !record.is_misc() {
            return false;
        }
        self.apply(record.battery_percent, record.cpu_temperature_celsius)
    }

    fn apply(&mut self, battery: Option<i32>, temperature: Option<f32>) -> bool {
        // Cameras report -1 for "unknown"
        let battery = battery.filter(|b| *b >= 0);
        let temperature = temperature.filter(|t| *t > 0.0);

        let mut changed = false;
        if battery.is_some() && battery != self.battery_percent {
            self.battery_percent = battery;
            changed = true;
        }
        if temperature.is_some() && temperature != self.cpu_temperature_celsius {
            self.cpu_temperature_celsius = temperature;
            changed = true;
        }
        if battery.is_some() || temperature.is_some() {
            self.updated_at = Some(Utc::now());
        }
        changed
    }

    pub fn thermal_state(&self) -> Option<ThermalState> {
        self.cpu_temperature_celsius.map(ThermalState::from_celsius)
    }

    pub fn is_battery_low(&self) -> bool {
        self.battery_percent
            .is_some_and(|b| b <= LOW_BATTERY_PERCENT)
    }
}

/// Payload of a `Reject` message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectNotice {
    pub reason: String,
}

impl RejectNotice {
    pub fn resource_exhausted() -> Self {
        Self {
            reason: "resource_exhausted".to_string(),
        }
    }

    pub fn to_json(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_full() {
        let json = br#"{
            "video": {"width": 1920, "height": 1080, "fps": 60, "bitrate": 8000000},
            "audio": {"enabled": false, "sampleRate": 44100, "channels": 1, "bitrate": 64000},
            "device": {"model": "Pixel 8", "id": "abc", "batteryPercent": 80, "cpuTemperatureCelsius": 41.5}
        }"#;
        let hello = ClientHello::parse(json).unwrap();
        assert_eq!(hello.video.width, 1920);
        assert_eq!(hello.video.fps, 60);
        assert!(!hello.audio.enabled);
        assert_eq!(hello.audio.sample_rate, 44_100);
        assert_eq!(hello.device.model, "Pixel 8");
        assert_eq!(hello.device.battery_percent, Some(80));
    }

    #[test]
    fn test_hello_partial_uses_defaults() {
        let hello = ClientHello::parse(br#"{"video": {"fps": 25}}"#).unwrap();
        assert_eq!(hello.video.fps, 25);
        assert_eq!(hello.video.width, 1280);
        assert!(hello.audio.enabled);
        assert_eq!(hello.audio.channels, 2);
        assert_eq!(hello.device.model, "Unknown");
    }

    #[test]
    fn test_hello_malformed() {
        let err = ClientHello::parse(b"not json").unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed { what: "hello", .. }));
    }

    #[test]
    fn test_telemetry_merge() {
        let mut snapshot = TelemetrySnapshot::default();
        let record =
            TelemetryRecord::parse(br#"{"type":"misc","batteryPercent":15,"temperatureCelsius":72.0}"#)
                .unwrap();
        assert!(snapshot.merge(&record));
        assert_eq!(snapshot.battery_percent, Some(15));
        assert!(snapshot.is_battery_low());
        assert_eq!(snapshot.thermal_state(), Some(ThermalState::Hot));
        assert!(!snapshot.merge(&record));
    }

    #[test]
    fn test_telemetry_ignores_unknown_records_and_sentinels() {
        let mut snapshot = TelemetrySnapshot::default();
        let other = TelemetryRecord::parse(br#"{"type":"gps","batteryPercent":50}"#).unwrap();
        assert!(!snapshot.merge(&other));

        let unknown =
            TelemetryRecord::parse(br#"{"type":"misc","batteryPercent":-1,"cpuTemperatureCelsius":-1.0}"#)
                .unwrap();
        assert!(!snapshot.merge(&unknown));
        assert_eq!(snapshot.battery_percent, None);
        assert!(snapshot.updated_at.is_none());
    }

    #[test]
    fn test_reject_notice_json() {
        let json = RejectNotice::resource_exhausted().to_json();
        assert_eq!(json, br#"{"reason":"resource_exhausted"}"#);
    }
}
