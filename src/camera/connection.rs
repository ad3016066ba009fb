//! One camera client connection
//!
//! Owns the socket, performs the hello handshake and turns wire messages into
//! [`EncodedPacket`]s. Telemetry is folded into a watch channel so readers
//! never hold up media delivery.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use super::counters::SessionCounters;
use crate::config::ConnectionConfig;
use crate::error::{ProtocolError, Result};
use crate::protocol::{
    encode_message, ClientHello, EncodedPacket, MessageKind, RejectNotice, TelemetryRecord,
    TelemetrySnapshot, WireCodec, WireMessage, HEADER_LEN,
};

pub struct CameraConnection<S> {
    framed: Framed<S, WireCodec>,
    hello: ClientHello,
    hello_received: bool,
    /// Media message that arrived in place of the hello
    pending: Option<EncodedPacket>,
    telemetry: watch::Sender<TelemetrySnapshot>,
    counters: Arc<SessionCounters>,
    read_timeout: Duration,
}

impl<S> CameraConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Perform the handshake on a freshly accepted stream
    ///
    /// Waits up to `handshake_timeout` for a hello. A media message arriving
    /// first, or no message at all, selects the configured default hello; the
    /// media message is then returned by the first `next_packet` call.
    pub async fn accept(
        stream: S,
        config: &ConnectionConfig,
        counters: Arc<SessionCounters>,
    ) -> Result<Self> {
        let mut framed = Framed::new(stream, WireCodec::new(config.max_payload_bytes));
        let deadline = tokio::time::Instant::now() + config.handshake_timeout();
        let mut early_telemetry = Vec::new();

        let (hello, pending, hello_received) = loop {
            let message = match tokio::time::timeout_at(deadline, framed.next()).await {
                Err(_) => {
                    debug!(
                        "No hello within {:?}, using default session parameters",
                        config.handshake_timeout()
                    );
                    break (config.default_hello.clone(), None, false);
                }
                Ok(None) => return Err(ProtocolError::ClosedBeforeHandshake.into()),
                Ok(Some(result)) => result?,
            };
            counters.record_message(HEADER_LEN + message.payload.len());

            match message.kind {
                MessageKind::Hello => break (ClientHello::parse(&message.payload)?, None, true),
                MessageKind::Video | MessageKind::Audio => {
                    debug!(kind = message.kind.name(), "Media before hello, using defaults");
                    let packet = EncodedPacket::from_message(message, Instant::now());
                    break (config.default_hello.clone(), packet, false);
                }
                MessageKind::Telemetry => early_telemetry.push(message.payload),
                MessageKind::Reject => return Err(ProtocolError::UnexpectedKind("reject").into()),
            }
        };

        let mut snapshot = TelemetrySnapshot::from_device(&hello.device);
        for payload in &early_telemetry {
            if let Ok(record) = TelemetryRecord::parse(payload) {
                snapshot.merge(&record);
            }
        }
        let (telemetry, _) = watch::channel(snapshot);

        if let Some(packet) = &pending {
            counters.record_packet(packet.kind);
        }

        Ok(Self {
            framed,
            hello,
            hello_received,
            pending,
            telemetry,
            counters,
            read_timeout: config.read_timeout(),
        })
    }

    /// Session parameters in effect
    pub fn hello(&self) -> &ClientHello {
        &self.hello
    }

    /// Whether the camera actually sent a hello
    pub fn hello_received(&self) -> bool {
        self.hello_received
    }

    /// Receiver for telemetry updates
    pub fn telemetry(&self) -> watch::Receiver<TelemetrySnapshot> {
        self.telemetry.subscribe()
    }

    /// Next media packet, or `None` at end of stream
    ///
    /// Telemetry messages are merged on the way; a repeated hello is ignored.
    /// Cancel-safe: partially read messages stay buffered in the codec.
    pub async fn next_packet(&mut self) -> Result<Option<EncodedPacket>> {
        if let Some(packet) = self.pending.take() {
            return Ok(Some(packet));
        }

        loop {
            let message = match tokio::time::timeout(self.read_timeout, self.framed.next()).await {
                Err(_) => return Err(ProtocolError::Timeout(self.read_timeout).into()),
                Ok(None) => return Ok(None),
                Ok(Some(result)) => result?,
            };
            self.counters
                .record_message(HEADER_LEN + message.payload.len());

            match message.kind {
                MessageKind::Video | MessageKind::Audio => {
                    if let Some(packet) = EncodedPacket::from_message(message, Instant::now()) {
                        self.counters.record_packet(packet.kind);
                        return Ok(Some(packet));
                    }
                }
                MessageKind::Telemetry => self.merge_telemetry(&message.payload),
                MessageKind::Hello => debug!("Ignoring repeated hello"),
                MessageKind::Reject => {
                    return Err(ProtocolError::UnexpectedKind("reject").into());
                }
            }
        }
    }

    fn merge_telemetry(&self, payload: &[u8]) {
        let record = match TelemetryRecord::parse(payload) {
            Ok(record) => record,
            Err(e) => {
                warn!("Ignoring telemetry record: {}", e);
                return;
            }
        };

        self.telemetry.send_if_modified(|snapshot| {
            let changed = snapshot.merge(&record);
            if changed {
                if snapshot.is_battery_low() {
                    warn!(
                        model = %self.hello.device.model,
                        "Camera battery low: {}%",
                        snapshot.battery_percent.unwrap_or_default()
                    );
                } else {
                    debug!(model = %self.hello.device.model, "Telemetry updated: {:?}", snapshot);
                }
            }
            changed
        });
    }
}

/// Tell a camera it cannot be served, then close the stream
pub async fn reject<S>(mut stream: S, notice: &RejectNotice) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::new();
    let message = WireMessage::new(MessageKind::Reject, notice.to_json());
    encode_message(&message, u32::MAX, &mut buf)?;
    stream.write_all(&buf).await?;
    stream.flush().await?;
    stream.shutdown().await?;
    info!("Rejected camera connection: {}", notice.reason);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use crate::protocol::{MediaKind, PacketFlags, DEFAULT_MAX_PAYLOAD};

    fn frame(message: WireMessage) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_message(&message, DEFAULT_MAX_PAYLOAD, &mut buf).unwrap();
        buf.to_vec()
    }

    fn hello_bytes() -> Vec<u8> {
        frame(WireMessage::new(
            MessageKind::Hello,
            &br#"{"video":{"width":1920,"height":1080,"fps":30},"device":{"model":"Pixel","batteryPercent":90}}"#[..],
        ))
    }

    fn config() -> ConnectionConfig {
        ConnectionConfig {
            handshake_timeout_ms: 200,
            read_timeout_ms: 200,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_hello_then_media() {
        let video = frame(
            WireMessage::new(MessageKind::Video, vec![0, 0, 0, 1, 0x65, 0x88])
                .with_flags(PacketFlags::keyframe())
                .with_seq(1)
                .with_timestamp(33_000),
        );
        let mock = tokio_test::io::Builder::new()
            .read(&hello_bytes())
            .read(&video)
            .build();

        let counters = Arc::new(SessionCounters::new());
        let mut conn = CameraConnection::accept(mock, &config(), counters.clone())
            .await
            .unwrap();
        assert!(conn.hello_received());
        assert_eq!(conn.hello().video.width, 1920);
        assert_eq!(conn.telemetry().borrow().battery_percent, Some(90));

        let packet = conn.next_packet().await.unwrap().unwrap();
        assert_eq!(packet.kind, MediaKind::Video);
        assert_eq!(packet.capture_ts_us, 33_000);
        assert!(packet.is_keyframe());

        assert!(conn.next_packet().await.unwrap().is_none());
        assert_eq!(counters.snapshot().messages_received, 2);
        assert_eq!(counters.snapshot().video_packets, 1);
    }

    #[tokio::test]
    async fn test_media_first_uses_defaults_and_keeps_packet() {
        let audio = frame(
            WireMessage::new(MessageKind::Audio, vec![0x21, 0x10])
                .with_seq(4)
                .with_timestamp(10),
        );
        let mock = tokio_test::io::Builder::new().read(&audio).build();

        let mut conn = CameraConnection::accept(mock, &config(), Arc::new(SessionCounters::new()))
            .await
            .unwrap();
        assert!(!conn.hello_received());
        assert_eq!(conn.hello().video.width, 1280);

        let packet = conn.next_packet().await.unwrap().unwrap();
        assert_eq!(packet.kind, MediaKind::Audio);
        assert_eq!(packet.seq, 4);
    }

    #[tokio::test]
    async fn test_telemetry_is_merged_between_packets() {
        let telemetry = frame(WireMessage::new(
            MessageKind::Telemetry,
            &br#"{"type":"misc","batteryPercent":12,"cpuTemperatureCelsius":55.0}"#[..],
        ));
        let audio = frame(WireMessage::new(MessageKind::Audio, vec![1, 2, 3]).with_seq(1));
        let mock = tokio_test::io::Builder::new()
            .read(&hello_bytes())
            .read(&telemetry)
            .read(&audio)
            .build();

        let mut conn = CameraConnection::accept(mock, &config(), Arc::new(SessionCounters::new()))
            .await
            .unwrap();
        let rx = conn.telemetry();

        let packet = conn.next_packet().await.unwrap().unwrap();
        assert_eq!(packet.kind, MediaKind::Audio);
        let snapshot = rx.borrow().clone();
        assert_eq!(snapshot.battery_percent, Some(12));
        assert_eq!(snapshot.cpu_temperature_celsius, Some(55.0));
    }

    #[tokio::test]
    async fn test_bad_magic_ends_connection() {
        let mut bytes = hello_bytes();
        bytes[0] = b'X';
        let mock = tokio_test::io::Builder::new().read(&bytes).build();

        let result =
            CameraConnection::accept(mock, &config(), Arc::new(SessionCounters::new())).await;
        assert!(matches!(
            result,
            Err(BridgeError::Protocol(ProtocolError::BadMagic(_)))
        ));
    }

    #[tokio::test]
    async fn test_handshake_timeout_falls_back_then_read_timeout() {
        let (client, server) = tokio::io::duplex(1024);

        let mut conn = CameraConnection::accept(server, &config(), Arc::new(SessionCounters::new()))
            .await
            .unwrap();
        assert!(!conn.hello_received());

        let result = conn.next_packet().await;
        assert!(matches!(
            result,
            Err(BridgeError::Protocol(ProtocolError::Timeout(_)))
        ));
        drop(client);
    }

    #[tokio::test]
    async fn test_closed_before_handshake() {
        let mock = tokio_test::io::Builder::new().build();
        let result =
            CameraConnection::accept(mock, &config(), Arc::new(SessionCounters::new())).await;
        assert!(matches!(
            result,
            Err(BridgeError::Protocol(ProtocolError::ClosedBeforeHandshake))
        ));
    }

    #[tokio::test]
    async fn test_reject_writes_reason() {
        let expected = frame(WireMessage::new(
            MessageKind::Reject,
            &br#"{"reason":"resource_exhausted"}"#[..],
        ));
        let mock = tokio_test::io::Builder::new().write(&expected).build();
        reject(mock, &RejectNotice::resource_exhausted()).await.unwrap();
    }
}
