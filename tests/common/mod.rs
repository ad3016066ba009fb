//! Shared fixtures for the bridge scenarios: codecs that never touch real
//! media, a sender backend with failure switches and a scripted camera.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;

use omt_bridge::bridge::{BridgeStatus, SlotState, Supervisor};
use omt_bridge::config::BridgeConfig;
use omt_bridge::decoder::{
    AudioBlock, AudioCodec, AudioSpecificConfig, CodecError, CodecFactory, VideoCodec,
    VideoPicture,
};
use omt_bridge::error::{BridgeError, Result};
use omt_bridge::output::{OmtMediaFrame, OmtQuality, SendFailure, SenderBackend, SenderOutlet};
use omt_bridge::protocol::{
    encode_message, MessageKind, PacketFlags, RejectNotice, VideoParams, WireCodec, WireMessage,
    DEFAULT_MAX_PAYLOAD,
};

/// Bridge configuration tuned for fast tests
pub fn test_config() -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.listener.bind_address = "127.0.0.1".to_string();
    config.connection.handshake_timeout_ms = 1000;
    config.health.check_interval_ms = 50;
    config.health.stop_timeout_ms = 1000;
    config.sync.anchor_deadline_ms = 2000;
    config.fallback.retry_interval_secs = 60;
    config
}

/// Poll the status snapshot until `check` holds
pub async fn wait_for(supervisor: &Supervisor, check: impl Fn(&BridgeStatus) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if check(&supervisor.status()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached: {:#?}", supervisor.status());
}

pub fn all_in(status: &BridgeStatus, slots: &[usize], state: SlotState) -> bool {
    slots.iter().all(|&index| status.slots[index].state == state)
}

// ---------------------------------------------------------------------------
// Codecs

/// Last byte of an access unit that makes the stub decoder panic
pub const PANIC_MARKER: u8 = 0xDE;
/// Last byte of an access unit the stub decoder spends [`STALL`] on; the
/// picture it then returns is 4 pixels wide instead of 2
pub const STALL_MARKER: u8 = 0x5A;
pub const STALL: Duration = Duration::from_millis(1500);

struct StubVideo;

impl VideoCodec for StubVideo {
    fn configure(&mut self, _parameter_sets: &[u8]) -> std::result::Result<(), CodecError> {
        Ok(())
    }

    fn decode(&mut self, access_unit: &[u8]) -> std::result::Result<Option<VideoPicture>, CodecError> {
        let width = match access_unit.last() {
            Some(&PANIC_MARKER) => panic!("stub decoder hit a poisoned access unit"),
            Some(&STALL_MARKER) => {
                std::thread::sleep(STALL);
                4
            }
            _ => 2,
        };
        Ok(Some(VideoPicture {
            width,
            height: 2,
            stride: width,
            fps: 0,
            data: Bytes::from(vec![16u8; width as usize * 3]),
        }))
    }
}

struct StubAudio {
    sample_rate: u32,
    channels: u16,
}

impl AudioCodec for StubAudio {
    fn decode(&mut self, _frame: &[u8]) -> std::result::Result<Option<AudioBlock>, CodecError> {
        let samples_per_channel = 1024;
        Ok(Some(AudioBlock {
            sample_rate: self.sample_rate,
            channels: self.channels,
            samples_per_channel,
            samples: vec![0.0; samples_per_channel * self.channels as usize],
        }))
    }
}

/// Codec factory producing silent audio and tiny gray pictures
pub struct StubCodecs;

impl CodecFactory for StubCodecs {
    fn video(&self, _params: &VideoParams) -> std::result::Result<Box<dyn VideoCodec>, CodecError> {
        Ok(Box::new(StubVideo))
    }

    fn audio(
        &self,
        config: &AudioSpecificConfig,
    ) -> std::result::Result<Box<dyn AudioCodec>, CodecError> {
        Ok(Box::new(StubAudio {
            sample_rate: config.sample_rate(),
            channels: config.channels(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Sender

#[derive(Default)]
struct SenderSwitches {
    unavailable: AtomicBool,
    failing: Mutex<Option<String>>,
    opened: AtomicU64,
    frames: AtomicU64,
}

/// Sender backend whose availability and per-source failures are scripted
#[derive(Default)]
pub struct StubSender {
    switches: Arc<SenderSwitches>,
}

impl StubSender {
    pub fn unavailable() -> Self {
        let sender = Self::default();
        sender.set_available(false);
        sender
    }

    pub fn set_available(&self, available: bool) {
        self.switches.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Make every send on the named source fail fatally
    pub fn fail_source(&self, name: &str) {
        *self.switches.failing.lock() = Some(name.to_string());
    }

    pub fn opened(&self) -> u64 {
        self.switches.opened.load(Ordering::SeqCst)
    }

    pub fn frames(&self) -> u64 {
        self.switches.frames.load(Ordering::SeqCst)
    }
}

impl SenderBackend for StubSender {
    fn open(&self, name: &str, _quality: OmtQuality) -> Result<Box<dyn SenderOutlet>> {
        self.check_available()?;
        self.switches.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StubOutlet {
            name: name.to_string(),
            switches: self.switches.clone(),
        }))
    }

    fn check_available(&self) -> Result<()> {
        if self.switches.unavailable.load(Ordering::SeqCst) {
            return Err(BridgeError::SenderUnavailable("stub offline".to_string()));
        }
        Ok(())
    }
}

struct StubOutlet {
    name: String,
    switches: Arc<SenderSwitches>,
}

impl SenderOutlet for StubOutlet {
    fn send(&mut self, _frame: &OmtMediaFrame<'_>) -> std::result::Result<(), SendFailure> {
        if self.switches.failing.lock().as_deref() == Some(self.name.as_str()) {
            return Err(SendFailure::Fatal("stub source failed".to_string()));
        }
        self.switches.frames.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Camera

const KEYFRAME_AU: &[u8] = &[0, 0, 0, 1, 0x65, 0x88, 0x84, 0x00];
const DELTA_AU: &[u8] = &[0, 0, 0, 1, 0x41, 0x9a, 0x02, 0x00];
pub const PANIC_AU: &[u8] = &[0, 0, 0, 1, 0x41, 0x9a, 0x02, PANIC_MARKER];
pub const STALL_AU: &[u8] = &[0, 0, 0, 1, 0x41, 0x9a, 0x02, STALL_MARKER];
const AAC_FRAME: &[u8] = &[0x21, 0x10, 0x04, 0x60, 0x8c, 0x1c];

/// Scripted phone camera
pub struct TestCamera {
    stream: TcpStream,
    video_seq: u32,
    audio_seq: u32,
    started: Instant,
}

impl TestCamera {
    pub async fn connect(address: SocketAddr) -> std::io::Result<Self> {
        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            video_seq: 0,
            audio_seq: 0,
            started: Instant::now(),
        })
    }

    pub async fn hello(&mut self, model: &str, audio: bool) -> std::io::Result<()> {
        let hello = serde_json::json!({
            "video": {"width": 1280, "height": 720, "fps": 30, "bitrate": 4000000},
            "audio": {"enabled": audio, "sampleRate": 48000, "channels": 2, "bitrate": 128000},
            "device": {"model": model, "batteryPercent": 87}
        });
        let payload = serde_json::to_vec(&hello)?;
        self.write(WireMessage::new(MessageKind::Hello, payload)).await
    }

    pub async fn send_video(&mut self, keyframe: bool) -> std::io::Result<()> {
        let payload = if keyframe { KEYFRAME_AU } else { DELTA_AU };
        self.send_video_payload(payload, keyframe).await
    }

    pub async fn send_video_payload(
        &mut self,
        payload: &'static [u8],
        keyframe: bool,
    ) -> std::io::Result<()> {
        self.video_seq += 1;
        let flags = if keyframe {
            PacketFlags::keyframe()
        } else {
            PacketFlags::default()
        };
        let message = WireMessage::new(MessageKind::Video, Bytes::from_static(payload))
            .with_flags(flags)
            .with_seq(self.video_seq)
            .with_timestamp(self.capture_ts());
        self.write(message).await
    }

    /// Pretend `count` video packets were lost on the way
    pub fn skip_video_seq(&mut self, count: u32) {
        self.video_seq += count;
    }

    pub async fn send_audio(&mut self) -> std::io::Result<()> {
        self.audio_seq += 1;
        let message = WireMessage::new(MessageKind::Audio, Bytes::from_static(AAC_FRAME))
            .with_seq(self.audio_seq)
            .with_timestamp(self.capture_ts());
        self.write(message).await
    }

    /// Stream until the bridge hangs up or `limit` passes
    ///
    /// Audio goes out every 10 ms, video every 30 ms with a keyframe every
    /// 30 pictures.
    pub async fn stream(mut self, audio: bool, limit: Duration) -> std::io::Result<()> {
        let mut tick = tokio::time::interval(Duration::from_millis(10));
        let mut ticks = 0u64;
        let deadline = Instant::now() + limit;
        while Instant::now() < deadline {
            tick.tick().await;
            if ticks % 3 == 0 {
                self.send_video(ticks % 90 == 0).await?;
            }
            if audio {
                self.send_audio().await?;
            }
            ticks += 1;
        }
        Ok(())
    }

    /// Read the reject notice the bridge sends to a camera it cannot serve
    pub async fn read_reject(self) -> Option<RejectNotice> {
        let mut framed = FramedRead::new(self.stream, WireCodec::new(DEFAULT_MAX_PAYLOAD));
        let message = tokio::time::timeout(Duration::from_secs(5), framed.next())
            .await
            .ok()??
            .ok()?;
        assert_eq!(message.kind, MessageKind::Reject);
        serde_json::from_slice(&message.payload).ok()
    }

    fn capture_ts(&self) -> u64 {
        // Phone clocks do not start at zero
        1_000_000_000 + self.started.elapsed().as_micros() as u64
    }

    async fn write(&mut self, message: WireMessage) -> std::io::Result<()> {
        let mut buf = BytesMut::new();
        encode_message(&message, DEFAULT_MAX_PAYLOAD, &mut buf)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        self.stream.write_all(&buf).await
    }
}

/// Connect `count` streaming cameras one after another so camera `i` lands
/// in slot `i`
pub async fn connect_cameras(
    supervisor: &Supervisor,
    address: SocketAddr,
    count: usize,
) -> Vec<JoinHandle<std::io::Result<()>>> {
    let mut cameras = Vec::with_capacity(count);
    for index in 0..count {
        let mut camera = TestCamera::connect(address).await.unwrap();
        camera
            .hello(&format!("Phone {}", index + 1), true)
            .await
            .unwrap();
        cameras.push(tokio::spawn(camera.stream(true, Duration::from_secs(30))));
        wait_for(supervisor, |status| {
            status.slots[index].state != SlotState::Empty
        })
        .await;
    }
    cameras
}
