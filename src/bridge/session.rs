//! One camera session
//!
//! An async reader owns the socket and feeds packets through a bounded
//! channel to a blocking worker that decodes, synchronizes and routes. The
//! session reports to the supervisor only through [`SessionEvent`]s and the
//! shared counters.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::slot::{HealthChange, HealthTracker};
use super::status::SlotFault;
use crate::camera::{CameraConnection, SessionCounters};
use crate::config::BridgeConfig;
use crate::decoder::{AudioPipeline, AudioSpecificConfig, CodecFactory, VideoPipeline};
use crate::error::{BridgeError, Result};
use crate::output::{OutputRouter, RouteOutcome};
use crate::protocol::{ClientHello, DeviceInfo, EncodedPacket, MediaKind, TelemetrySnapshot};
use crate::sync::{SyncPoll, SyncedFrame, Synchronizer};
use crate::utils::LogThrottler;
use crate::warn_throttled;

/// Message from a session to the supervisor
#[derive(Debug)]
pub struct SessionEvent {
    pub slot: usize,
    pub session: Uuid,
    pub kind: SessionEventKind,
}

#[derive(Debug)]
pub enum SessionEventKind {
    /// Handshake finished
    Hello {
        device: DeviceInfo,
        hello_received: bool,
        telemetry: watch::Receiver<TelemetrySnapshot>,
    },
    /// Every required decode anchor exists
    Anchored,
    Health(HealthChange),
    /// The slot's sender failed; the session keeps decoding
    SenderFailed(String),
    /// The session is shutting down
    Closing(SlotFault),
    /// The session task is gone
    Exited { panicked: bool },
}

/// Sends events tagged with the session's slot and generation
#[derive(Debug, Clone)]
pub(crate) struct SessionNotifier {
    slot: usize,
    session: Uuid,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionNotifier {
    pub fn new(slot: usize, session: Uuid, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { slot, session, tx }
    }

    pub fn notify(&self, kind: SessionEventKind) {
        let _ = self.tx.send(SessionEvent {
            slot: self.slot,
            session: self.session,
            kind,
        });
    }
}

/// Everything a session needs, handed over by the supervisor
pub(crate) struct SessionContext {
    pub slot: usize,
    pub peer: SocketAddr,
    pub config: Arc<BridgeConfig>,
    pub codecs: Arc<dyn CodecFactory>,
    pub router: Arc<OutputRouter>,
    pub counters: Arc<SessionCounters>,
    pub notifier: SessionNotifier,
    pub cancel: CancellationToken,
    /// Presentation clock origin
    pub epoch: Instant,
}

enum SessionEnd {
    Disconnected,
    Stopped,
}

impl SessionContext {
    fn closing(&self, outcome: &Result<SessionEnd>) {
        let fault = match outcome {
            Ok(SessionEnd::Disconnected) => SlotFault::Disconnected,
            Ok(SessionEnd::Stopped) => SlotFault::Stopped,
            Err(e) => SlotFault::from_error(e),
        };
        if fault.is_clean() {
            info!(slot = self.slot, peer = %self.peer, "Session closing: {}", fault);
        } else {
            warn!(slot = self.slot, peer = %self.peer, "Session closing: {}", fault);
        }
        self.notifier.notify(SessionEventKind::Closing(fault));
    }
}

/// Run a session to completion
///
/// Panics in the decode worker are re-raised here so the supervisor sees
/// the whole session as crashed. `worker_done` is dropped once no decode
/// worker runs for this session any more, even if this task is aborted
/// first.
pub(crate) async fn run_session<S>(
    ctx: SessionContext,
    stream: S,
    worker_done: oneshot::Sender<()>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let accepted = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => Err(Ok(SessionEnd::Stopped)),
        result = CameraConnection::accept(stream, &ctx.config.connection, ctx.counters.clone()) => {
            result.map_err(Err)
        }
    };

    match accepted {
        Ok(conn) => stream_media(&ctx, conn, worker_done).await,
        Err(outcome) => ctx.closing(&outcome),
    }
}

async fn stream_media<S>(
    ctx: &SessionContext,
    mut conn: CameraConnection<S>,
    worker_done: oneshot::Sender<()>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let hello = conn.hello().clone();
    info!(
        slot = ctx.slot,
        peer = %ctx.peer,
        model = %hello.device.model,
        "Camera session: video {}x{}@{} {} bps, audio {}",
        hello.video.width,
        hello.video.height,
        hello.video.fps,
        hello.video.bitrate,
        if hello.audio.enabled {
            format!("{} Hz x{}", hello.audio.sample_rate, hello.audio.channels)
        } else {
            "off".to_string()
        }
    );
    ctx.notifier.notify(SessionEventKind::Hello {
        device: hello.device.clone(),
        hello_received: conn.hello_received(),
        telemetry: conn.telemetry(),
    });

    let (packet_tx, packet_rx) = mpsc::channel(ctx.config.decoder.queue_depth.max(1));
    // Stops the worker even when this task is aborted mid-await
    let worker_cancel = ctx.cancel.child_token();
    let _stop_worker = worker_cancel.clone().drop_guard();
    let worker = DecodeWorker {
        slot: ctx.slot,
        hello,
        config: ctx.config.clone(),
        codecs: ctx.codecs.clone(),
        router: ctx.router.clone(),
        counters: ctx.counters.clone(),
        notifier: ctx.notifier.clone(),
        epoch: ctx.epoch,
        cancel: worker_cancel,
        _done: worker_done,
    };
    let mut worker_task = tokio::task::spawn_blocking(move || worker.run(packet_rx));
    let mut worker_joined = false;

    let outcome = loop {
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break Ok(SessionEnd::Stopped),
            joined = &mut worker_task => {
                worker_joined = true;
                break worker_exit(joined);
            }
            packet = conn.next_packet() => match packet {
                Ok(Some(packet)) => {
                    tokio::select! {
                        biased;
                        _ = ctx.cancel.cancelled() => break Ok(SessionEnd::Stopped),
                        sent = packet_tx.send(packet) => {
                            if sent.is_err() {
                                debug!(slot = ctx.slot, "Decode worker no longer accepts packets");
                            }
                        }
                    }
                }
                Ok(None) => break Ok(SessionEnd::Disconnected),
                Err(e) => break Err(e),
            }
        }
    };

    ctx.closing(&outcome);

    drop(packet_tx);
    if !worker_joined {
        match worker_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(slot = ctx.slot, "Decode worker stopped: {}", e),
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => debug!(slot = ctx.slot, "Decode worker cancelled: {}", e),
        }
    }
}

/// The worker only returns early with an error
fn worker_exit(joined: std::result::Result<Result<()>, JoinError>) -> Result<SessionEnd> {
    match joined {
        Ok(Ok(())) => Err(BridgeError::Internal(
            "decode worker exited while the camera was connected".to_string(),
        )),
        Ok(Err(e)) => Err(e),
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => Err(BridgeError::Internal(format!("decode worker: {}", e))),
    }
}

/// Decode → synchronize → route, on a blocking thread
///
/// Codecs are built here so they never cross threads.
struct DecodeWorker {
    slot: usize,
    hello: ClientHello,
    config: Arc<BridgeConfig>,
    codecs: Arc<dyn CodecFactory>,
    router: Arc<OutputRouter>,
    counters: Arc<SessionCounters>,
    notifier: SessionNotifier,
    epoch: Instant,
    /// Checked between packets and before routing; a stale worker must never
    /// deliver into a slot that has moved on
    cancel: CancellationToken,
    /// Dropped when the worker ends, however it ends
    _done: oneshot::Sender<()>,
}

impl DecodeWorker {
    fn run(self, mut packets: mpsc::Receiver<EncodedPacket>) -> Result<()> {
        let max_errors = self.config.decoder.max_consecutive_errors;
        let video_codec = self
            .codecs
            .video(&self.hello.video)
            .map_err(|e| BridgeError::DecodeFatal(format!("video decoder: {}", e)))?;
        let mut video = VideoPipeline::new(video_codec, self.hello.video.fps, max_errors);
        let mut audio = self.hello.audio.enabled.then(|| {
            AudioPipeline::new(
                self.codecs.clone(),
                AudioSpecificConfig::from_params(&self.hello.audio),
                max_errors,
            )
        });
        // The handshake is over by the time the worker starts
        let mut sync = Synchronizer::new(&self.config.sync, audio.is_some(), self.epoch)
            .with_deadline_from(Instant::now());
        let mut health = HealthTracker::new(
            self.config.health.degrade_fault_threshold,
            self.config.health.recovery_healthy_frames,
        );
        let throttler = LogThrottler::with_secs(5);
        let mut anchored = false;
        let mut faults_seen = 0u64;

        while let Some(packet) = packets.blocking_recv() {
            if self.cancel.is_cancelled() {
                break;
            }
            // Pictures through the keyframe gate; audio says nothing about
            // picture health
            let mut healthy = 0u32;
            match packet.kind {
                MediaKind::Video => {
                    video.submit(&packet)?;
                    for frame in video.drain() {
                        sync.push(frame);
                        healthy += 1;
                    }
                }
                MediaKind::Audio => match audio.as_mut() {
                    Some(pipeline) => {
                        pipeline.submit(&packet)?;
                        for frame in pipeline.drain() {
                            sync.push(frame);
                        }
                    }
                    None => warn_throttled!(
                        throttler,
                        "audio_disabled",
                        slot = self.slot,
                        "Ignoring audio from a camera that announced none"
                    ),
                },
            }

            let video_stats = video.stats();
            let audio_stats = audio.as_ref().map(|a| a.stats()).unwrap_or_default();
            let faults = video_stats.degraded + audio_stats.degraded;
            let mut changes = Vec::new();
            for _ in faults_seen..faults {
                changes.extend(health.record_fault());
            }
            faults_seen = faults;
            for _ in 0..healthy {
                changes.extend(health.record_healthy());
            }
            self.counters.store_decode(
                video_stats.decoded,
                audio_stats.decoded,
                video_stats.dropped + audio_stats.dropped,
                faults,
            );

            if self.cancel.is_cancelled() {
                debug!(slot = self.slot, "Decode worker cancelled, dropping undelivered frames");
                break;
            }
            while let SyncPoll::Ready(frame) = sync.pull(Instant::now())? {
                self.route(frame)?;
            }
            self.counters.store_sync_dropped(sync.stats().audio_dropped);

            if !anchored && sync.is_anchored() {
                anchored = true;
                self.notifier.notify(SessionEventKind::Anchored);
                // The slot only starts tracking health once streaming
                changes.clear();
                if health.is_degraded() {
                    changes.push(HealthChange::Degraded);
                }
            }
            if anchored {
                for change in changes {
                    self.notifier.notify(SessionEventKind::Health(change));
                }
            }
        }

        let stats = sync.stats();
        debug!(
            slot = self.slot,
            "Decode worker done: {} video, {} audio released, {} audio dropped",
            stats.video_released,
            stats.audio_released,
            stats.audio_dropped
        );
        Ok(())
    }

    fn route(&self, frame: SyncedFrame) -> Result<()> {
        let arrival = frame.arrival;
        match self.router.route(self.slot, frame) {
            Ok(RouteOutcome::Sent) => {
                self.counters.record_sent();
                self.counters.record_latency(arrival.elapsed());
            }
            Ok(RouteOutcome::PreviewOnly) => {
                self.counters.record_previewed();
                self.counters.record_latency(arrival.elapsed());
            }
            Err(BridgeError::SenderUnavailable(reason)) => {
                warn!(slot = self.slot, "Sender failed, continuing decode-only: {}", reason);
                self.notifier
                    .notify(SessionEventKind::SenderFailed(reason));
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }
}
