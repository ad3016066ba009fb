//! Bridge supervisor
//!
//! Owns the listening socket and the camera slots. A single control loop is
//! the only writer of slot state: the accept loop, the public API and every
//! session talk to it through channels, and readers get an atomically
//! swapped [`BridgeStatus`] snapshot.

mod fallback;
mod session;
mod slot;
mod status;

pub use fallback::FallbackPolicy;
pub use session::{SessionEvent, SessionEventKind};
pub use slot::{HealthChange, HealthTracker};
pub use status::{BridgeStatus, SlotFault, SlotState, SlotSummary};

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use self::session::{run_session, SessionContext, SessionNotifier};
use self::slot::{ActiveSession, SlotEntry};
use crate::camera::{reject, SessionCounters};
use crate::config::BridgeConfig;
use crate::decoder::CodecFactory;
use crate::error::{BridgeError, Result};
use crate::events::{BridgeEvent, EventBus};
use crate::output::{OutputRouter, RoutedFrame, SenderAdapter, SenderBackend};
use crate::protocol::RejectNotice;
use crate::utils::{bind_tcp_listener, LogThrottler};
use crate::warn_throttled;

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

enum Command {
    Accepted {
        stream: TcpStream,
        peer: SocketAddr,
    },
    Listening(SocketAddr),
    Stop {
        slot: usize,
        reply: oneshot::Sender<Result<bool>>,
    },
}

/// State shared between the handle and the control loop
struct Shared {
    config: Arc<BridgeConfig>,
    events: EventBus,
    router: Arc<OutputRouter>,
    status: ArcSwap<BridgeStatus>,
}

struct AcceptLoop {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct Inner {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
    shutdown: CancellationToken,
    accept: Mutex<Option<AcceptLoop>>,
    control: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Handle to the running bridge
///
/// Cheap to clone; dropping the last clone stops the bridge.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    /// Start the supervisor's control loop
    ///
    /// Must be called from within a Tokio runtime. The sender backend is
    /// checked immediately; if it is unusable the bridge starts in fallback
    /// mode.
    pub fn new(
        config: BridgeConfig,
        codecs: Arc<dyn CodecFactory>,
        sender: Arc<dyn SenderBackend>,
    ) -> Result<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| BridgeError::Internal(format!("no Tokio runtime: {}", e)))?;

        let config = Arc::new(config);
        let slot_count = config.slot_count();
        let slots: Vec<SlotEntry> = (0..slot_count)
            .map(|index| SlotEntry::new(index, config.camera_name(index)))
            .collect();
        let status = BridgeStatus {
            slots: slots.iter().map(|entry| entry.summary(false)).collect(),
            ..Default::default()
        };

        let shared = Arc::new(Shared {
            config: config.clone(),
            events: EventBus::new(),
            router: Arc::new(OutputRouter::new(slot_count)),
            status: ArcSwap::from_pointee(status),
        });

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let control = ControlLoop {
            shared: shared.clone(),
            codecs,
            sender,
            slots,
            fallback: FallbackPolicy::new(config.fallback.retry_interval()),
            listening: None,
            session_tx,
            shutdown: shutdown.clone(),
        };
        let task = runtime.spawn(control.run(command_rx, session_rx));

        Ok(Self {
            inner: Arc::new(Inner {
                shared,
                commands: command_tx,
                shutdown,
                accept: Mutex::new(None),
                control: Mutex::new(Some(task)),
            }),
        })
    }

    /// Bind the camera listener on `port` (0 picks a free port)
    ///
    /// Replaces any previous listener. Returns the bound address.
    pub async fn start_listening(&self, port: u16) -> Result<SocketAddr> {
        let bind_address = &self.inner.shared.config.listener.bind_address;
        let ip: IpAddr = bind_address.parse().map_err(|e| {
            BridgeError::Config(format!("invalid bind address '{}': {}", bind_address, e))
        })?;

        let listener = TcpListener::from_std(bind_tcp_listener(SocketAddr::new(ip, port))?)?;
        let local = listener.local_addr()?;

        let cancel = self.inner.shutdown.child_token();
        let task = tokio::spawn(accept_loop(
            listener,
            self.inner.commands.clone(),
            cancel.clone(),
        ));
        let previous = self.inner.accept.lock().replace(AcceptLoop { cancel, task });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }

        self.send(Command::Listening(local))?;
        info!("Listening for cameras on {}", local);
        Ok(local)
    }

    /// Per-slot summaries
    pub fn list_slots(&self) -> Vec<SlotSummary> {
        self.status().slots.clone()
    }

    /// Stop the session in `index`
    ///
    /// Returns `false` if the slot had nothing to stop.
    pub async fn stop_slot(&self, index: usize) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stop { slot: index, reply })?;
        rx.await
            .map_err(|_| BridgeError::Internal("supervisor stopped".to_string()))?
    }

    pub fn fallback_mode(&self) -> bool {
        self.inner.shared.status.load().fallback_mode
    }

    /// Latest status snapshot
    pub fn status(&self) -> Arc<BridgeStatus> {
        self.inner.shared.status.load_full()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.inner.shared.events.subscribe()
    }

    /// Every routed frame, for local preview
    pub fn preview(&self) -> broadcast::Receiver<RoutedFrame> {
        self.inner.shared.router.tap()
    }

    pub fn config(&self) -> Arc<BridgeConfig> {
        self.inner.shared.config.clone()
    }

    /// Stop listening, close every session and wait for the control loop
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();

        let accept = self.inner.accept.lock().take();
        if let Some(accept) = accept {
            accept.cancel.cancel();
            let _ = accept.task.await;
        }

        let control = self.inner.control.lock().take();
        if let Some(control) = control {
            if let Err(e) = control.await {
                error!("Supervisor control loop failed: {}", e);
            }
        }
    }

    fn send(&self, command: Command) -> Result<()> {
        self.inner
            .commands
            .send(command)
            .map_err(|_| BridgeError::Internal("supervisor stopped".to_string()))
    }
}

async fn accept_loop(
    listener: TcpListener,
    commands: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
) {
    let throttler = LogThrottler::with_secs(5);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "Accepted camera connection");
                    if commands.send(Command::Accepted { stream, peer }).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn_throttled!(throttler, "accept", "Accept failed: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }
    debug!("Accept loop stopped");
}

/// Single writer of slot state
struct ControlLoop {
    shared: Arc<Shared>,
    codecs: Arc<dyn CodecFactory>,
    sender: Arc<dyn SenderBackend>,
    slots: Vec<SlotEntry>,
    fallback: FallbackPolicy,
    listening: Option<SocketAddr>,
    session_tx: mpsc::UnboundedSender<SessionEvent>,
    shutdown: CancellationToken,
}

impl ControlLoop {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut sessions: mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        if let Err(e) = self.sender.check_available() {
            self.enter_fallback(e.to_string());
        }
        self.publish_status();

        let shutdown = self.shutdown.clone();
        let mut health = tokio::time::interval(self.shared.config.health.check_interval());
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(command) = commands.recv() => self.handle_command(command),
                Some(event) = sessions.recv() => self.handle_session_event(event),
                _ = health.tick() => self.health_check(),
            }
        }

        self.drain(&mut sessions).await;
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Accepted { stream, peer } => self.accept(stream, peer),
            Command::Listening(address) => {
                self.listening = Some(address);
                self.shared.events.publish(BridgeEvent::Listening {
                    address: address.to_string(),
                });
            }
            Command::Stop { slot, reply } => {
                let _ = reply.send(self.stop_slot(slot, SlotFault::Stopped));
            }
        }
        self.publish_status();
    }

    fn accept(&mut self, stream: TcpStream, peer: SocketAddr) {
        let Some(index) = self
            .slots
            .iter()
            .position(|entry| entry.state == SlotState::Empty)
        else {
            let error = BridgeError::ResourceExhausted {
                slots: self.slots.len(),
            };
            warn!(peer = %peer, "Rejecting camera: {}", error);
            self.shared.events.publish(BridgeEvent::ConnectionRejected {
                peer: peer.to_string(),
                reason: error.to_string(),
            });
            tokio::spawn(async move {
                if let Err(e) = reject(stream, &RejectNotice::resource_exhausted()).await {
                    debug!(peer = %peer, "Failed to deliver reject notice: {}", e);
                }
            });
            return;
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %peer, "Failed to set TCP_NODELAY: {}", e);
        }

        let id = Uuid::new_v4();
        let cancel = self.shutdown.child_token();
        let counters = Arc::new(SessionCounters::new());
        let ctx = SessionContext {
            slot: index,
            peer,
            config: self.shared.config.clone(),
            codecs: self.codecs.clone(),
            router: self.shared.router.clone(),
            counters: counters.clone(),
            notifier: SessionNotifier::new(index, id, self.session_tx.clone()),
            cancel: cancel.clone(),
            epoch: Instant::now(),
        };

        let (worker_done_tx, worker_done_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(run_session(ctx, stream, worker_done_tx));
        let abort = task.abort_handle();
        let exit = SessionNotifier::new(index, id, self.session_tx.clone());
        let worker_grace = self.shared.config.health.stop_timeout();
        tokio::spawn(async move {
            let panicked = match task.await {
                Ok(()) => false,
                Err(e) => e.is_panic(),
            };
            // An aborted session may leave its blocking decode worker behind
            if tokio::time::timeout(worker_grace, worker_done_rx).await.is_err() {
                warn!(
                    slot = index,
                    "Decode worker still busy {:?} after its session ended",
                    worker_grace
                );
            }
            exit.notify(SessionEventKind::Exited { panicked });
        });

        let entry = &mut self.slots[index];
        info!(slot = index, peer = %peer, "Camera assigned to '{}'", entry.name);
        entry.last_fault = None;
        entry.session = Some(ActiveSession {
            id,
            peer,
            started: Instant::now(),
            connected_at: Utc::now(),
            cancel,
            abort,
            counters,
            device: None,
            telemetry: None,
            closing_deadline: None,
        });
        self.set_state(index, SlotState::Connecting, None);

        if !self.fallback.is_active() {
            match self.open_sender(index) {
                Ok(adapter) => {
                    if let Err(e) = self.shared.router.bind(index, adapter) {
                        error!(slot = index, "Failed to bind sender: {}", e);
                    }
                }
                Err(e) => self.enter_fallback(e.to_string()),
            }
        }
    }

    fn handle_session_event(&mut self, event: SessionEvent) {
        let slot = event.slot;
        let Some(entry) = self.slots.get_mut(slot) else {
            return;
        };
        if !entry.owns(event.session) {
            debug!(slot, session = %event.session, "Ignoring event from a previous session");
            return;
        }

        match event.kind {
            SessionEventKind::Hello {
                device,
                hello_received,
                telemetry,
            } => {
                let Some(session) = entry.session.as_mut() else {
                    return;
                };
                info!(
                    slot,
                    model = %device.model,
                    device_id = device.id.as_deref().unwrap_or("-"),
                    "Camera identified"
                );
                session.device = Some(device.clone());
                session.telemetry = Some(telemetry);
                let peer = session.peer.to_string();
                self.shared.events.publish(BridgeEvent::DeviceIdentified {
                    slot,
                    device,
                    peer,
                    hello_received,
                });
            }
            SessionEventKind::Anchored => {
                self.set_state(slot, SlotState::Streaming, None);
            }
            SessionEventKind::Health(HealthChange::Degraded) => {
                warn!(slot, "Slot degraded");
                self.set_state(slot, SlotState::Degraded, None);
            }
            SessionEventKind::Health(HealthChange::Recovered) => {
                info!(slot, "Slot recovered");
                self.set_state(slot, SlotState::Streaming, None);
            }
            SessionEventKind::SenderFailed(reason) => {
                entry.last_fault = Some(SlotFault::SenderUnavailable {
                    reason: reason.clone(),
                });
                self.enter_fallback(reason);
            }
            SessionEventKind::Closing(fault) => self.begin_closing(slot, fault),
            SessionEventKind::Exited { panicked } => self.finish_session(slot, panicked),
        }
        self.publish_status();
    }

    fn health_check(&mut self) {
        let now = Instant::now();
        let config = self.shared.config.clone();
        let idle_timeout = config.connection.idle_timeout();
        let anchor_deadline = config.sync.anchor_deadline();
        // The anchor deadline only starts once the handshake is done
        let connect_limit = config.connection.handshake_timeout()
            + anchor_deadline
            + config.health.check_interval();

        let mut expired = Vec::new();
        for entry in &mut self.slots {
            let Some(session) = entry.session.as_mut() else {
                continue;
            };
            match entry.state {
                SlotState::Connecting | SlotState::Streaming | SlotState::Degraded => {
                    let idle = session.counters.idle_for(now);
                    if idle > idle_timeout {
                        expired.push((
                            entry.index,
                            SlotFault::IdleTimeout {
                                idle_ms: idle.as_millis() as u64,
                            },
                        ));
                    } else if entry.state == SlotState::Connecting
                        && now.saturating_duration_since(session.started) > connect_limit
                    {
                        expired.push((
                            entry.index,
                            SlotFault::SyncTimeout {
                                after_ms: anchor_deadline.as_millis() as u64,
                            },
                        ));
                    }
                }
                SlotState::Closing => {
                    if session.closing_deadline.is_some_and(|deadline| now >= deadline) {
                        warn!(
                            slot = entry.index,
                            "Session did not stop within {:?}, aborting",
                            config.health.stop_timeout()
                        );
                        session.abort.abort();
                        session.closing_deadline = None;
                    }
                }
                SlotState::Empty => {}
            }
        }

        for (slot, fault) in expired {
            warn!(slot, "Stopping slot: {}", fault);
            if let Err(e) = self.stop_slot(slot, fault) {
                error!(slot, "Failed to stop slot: {}", e);
            }
        }

        if self.fallback.retry_due(now) {
            self.retry_sender(now);
        }

        self.publish_status();
    }

    fn stop_slot(&mut self, index: usize, fault: SlotFault) -> Result<bool> {
        let entry = self.slots.get(index).ok_or(BridgeError::InvalidSlot(index))?;
        if !entry.state.is_live() {
            return Ok(false);
        }
        self.begin_closing(index, fault);
        Ok(true)
    }

    /// Move a live slot to `Closing` and release its sender
    ///
    /// The first fault wins; later reports for a closing slot are ignored.
    fn begin_closing(&mut self, index: usize, fault: SlotFault) {
        let stop_timeout = self.shared.config.health.stop_timeout();
        let Some(entry) = self.slots.get_mut(index) else {
            return;
        };
        if !entry.state.is_live() {
            return;
        }
        if let Some(session) = entry.session.as_mut() {
            session.cancel.cancel();
            session.closing_deadline = Some(Instant::now() + stop_timeout);
        }
        entry.last_fault = Some(fault.clone());
        self.set_state(index, SlotState::Closing, Some(fault));
        if let Some(stats) = self.shared.router.unbind(index) {
            debug!(
                slot = index,
                "Sender released after {} video / {} audio frames",
                stats.video_sent,
                stats.audio_sent
            );
        }
    }

    fn finish_session(&mut self, index: usize, panicked: bool) {
        if panicked {
            error!(slot = index, "Session task panicked");
            self.begin_closing(index, SlotFault::SessionCrashed);
            if let Some(entry) = self.slots.get_mut(index) {
                entry.last_fault = Some(SlotFault::SessionCrashed);
            }
        } else {
            self.begin_closing(
                index,
                SlotFault::Internal {
                    reason: "session exited unexpectedly".to_string(),
                },
            );
        }

        self.shared.router.unbind(index);
        if let Some(entry) = self.slots.get_mut(index) {
            entry.session = None;
        }
        self.set_state(index, SlotState::Empty, None);
    }

    fn open_sender(&self, index: usize) -> Result<SenderAdapter> {
        let config = &self.shared.config.sender;
        let name = self.shared.config.camera_name(index);
        SenderAdapter::open(
            self.sender.as_ref(),
            &name,
            config.quality,
            config.max_consecutive_rejections,
        )
    }

    fn enter_fallback(&mut self, reason: String) {
        if self.fallback.enter(reason.clone(), Instant::now()) {
            let closed = self.shared.router.unbind_all();
            debug!("Closed {} sender(s) for fallback mode", closed);
            self.shared
                .events
                .publish(BridgeEvent::FallbackModeChanged {
                    active: true,
                    reason: Some(reason),
                });
        }
    }

    /// Try to leave fallback mode, reopening senders for every live slot
    fn retry_sender(&mut self, now: Instant) {
        if let Err(e) = self.sender.check_available() {
            info!("Sender still unavailable: {}", e);
            self.fallback.retry_failed(e.to_string(), now);
            return;
        }

        let live: Vec<usize> = self
            .slots
            .iter()
            .filter(|entry| entry.state.is_live())
            .map(|entry| entry.index)
            .collect();
        for index in live {
            let bound = self
                .open_sender(index)
                .and_then(|adapter| self.shared.router.bind(index, adapter));
            if let Err(e) = bound {
                info!(slot = index, "Sender recovery failed: {}", e);
                self.shared.router.unbind_all();
                self.fallback.retry_failed(e.to_string(), now);
                return;
            }
        }

        if self.fallback.leave() {
            self.shared
                .events
                .publish(BridgeEvent::FallbackModeChanged {
                    active: false,
                    reason: None,
                });
        }
    }

    fn set_state(&mut self, index: usize, state: SlotState, fault: Option<SlotFault>) -> bool {
        let Some(entry) = self.slots.get_mut(index) else {
            return false;
        };
        if !entry.transition(state) {
            return false;
        }
        self.shared.events.publish(BridgeEvent::SlotStateChanged {
            slot: index,
            state,
            fault,
        });
        true
    }

    fn publish_status(&self) {
        let router = &self.shared.router;
        let status = BridgeStatus {
            listening: self.listening.map(|address| address.to_string()),
            fallback_mode: self.fallback.is_active(),
            fallback_reason: self.fallback.reason().map(str::to_string),
            slots: self
                .slots
                .iter()
                .map(|entry| entry.summary(router.is_bound(entry.index)))
                .collect(),
        };
        self.shared.status.store(Arc::new(status));
    }

    /// Close every session, waiting up to the stop timeout before aborting
    async fn drain(&mut self, sessions: &mut mpsc::UnboundedReceiver<SessionEvent>) {
        for index in 0..self.slots.len() {
            let _ = self.stop_slot(index, SlotFault::Stopped);
        }
        self.publish_status();

        let deadline = tokio::time::Instant::now() + self.shared.config.health.stop_timeout();
        while self.slots.iter().any(|entry| entry.state.is_occupied()) {
            match tokio::time::timeout_at(deadline, sessions.recv()).await {
                Ok(Some(event)) => self.handle_session_event(event),
                _ => break,
            }
        }

        for index in 0..self.slots.len() {
            let Some(session) = self.slots[index].session.take() else {
                continue;
            };
            warn!(slot = index, "Aborting session that did not stop in time");
            session.abort.abort();
            self.set_state(index, SlotState::Empty, None);
        }

        self.shared.router.unbind_all();
        self.listening = None;
        self.publish_status();
        info!("Supervisor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{AudioCodec, AudioSpecificConfig, CodecError, VideoCodec};
    use crate::output::{OmtQuality, SenderOutlet};
    use crate::protocol::VideoParams;

    struct NoCodecs;

    impl CodecFactory for NoCodecs {
        fn video(&self, _params: &VideoParams) -> std::result::Result<Box<dyn VideoCodec>, CodecError> {
            Err(CodecError::Unavailable("test".to_string()))
        }

        fn audio(
            &self,
            _config: &AudioSpecificConfig,
        ) -> std::result::Result<Box<dyn AudioCodec>, CodecError> {
            Err(CodecError::Unavailable("test".to_string()))
        }
    }

    struct MissingSender;

    impl SenderBackend for MissingSender {
        fn open(&self, _name: &str, _quality: OmtQuality) -> Result<Box<dyn SenderOutlet>> {
            Err(BridgeError::SenderUnavailable("not installed".to_string()))
        }

        fn check_available(&self) -> Result<()> {
            Err(BridgeError::SenderUnavailable("not installed".to_string()))
        }
    }

    fn supervisor() -> Supervisor {
        let mut config = BridgeConfig::default();
        config.listener.bind_address = "127.0.0.1".to_string();
        Supervisor::new(config, Arc::new(NoCodecs), Arc::new(MissingSender)).unwrap()
    }

    async fn wait_for(supervisor: &Supervisor, check: impl Fn(&BridgeStatus) -> bool) {
        for _ in 0..200 {
            if check(&supervisor.status()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached: {:?}", supervisor.status());
    }

    #[test]
    fn test_requires_runtime() {
        let result = Supervisor::new(
            BridgeConfig::default(),
            Arc::new(NoCodecs),
            Arc::new(MissingSender),
        );
        assert!(matches!(result, Err(BridgeError::Internal(_))));
    }

    #[tokio::test]
    async fn test_missing_sender_starts_in_fallback() {
        let supervisor = supervisor();
        wait_for(&supervisor, |status| status.fallback_mode).await;
        assert!(supervisor.fallback_mode());
        assert_eq!(supervisor.list_slots().len(), 4);
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_empty_slot_is_noop() {
        let supervisor = supervisor();
        assert!(!supervisor.stop_slot(0).await.unwrap());
        assert!(!supervisor.stop_slot(0).await.unwrap());
        assert!(matches!(
            supervisor.stop_slot(9).await,
            Err(BridgeError::InvalidSlot(9))
        ));
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_listening_is_published() {
        let supervisor = supervisor();
        let mut events = supervisor.subscribe();
        let address = supervisor.start_listening(0).await.unwrap();
        assert_ne!(address.port(), 0);

        let event = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Ok(BridgeEvent::Listening { address }) = events.recv().await {
                    return address;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(event, address.to_string());
        wait_for(&supervisor, |status| status.listening.is_some()).await;
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = BridgeConfig::default();
        config.cameras.clear();
        assert!(matches!(
            Supervisor::new(config, Arc::new(NoCodecs), Arc::new(MissingSender)),
            Err(BridgeError::Config(_))
        ));
    }
}
