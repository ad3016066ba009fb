//! Per-slot fan-out of synchronized frames

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

use super::sender::{SenderAdapter, SenderStats};
use crate::error::{BridgeError, Result};
use crate::sync::SyncedFrame;

const PREVIEW_CAPACITY: usize = 64;

/// A frame observed on the preview tap
#[derive(Debug, Clone)]
pub struct RoutedFrame {
    pub slot: usize,
    pub frame: Arc<SyncedFrame>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Delivered to the slot's sender
    Sent,
    /// No sender bound; preview taps only
    PreviewOnly,
}

/// Routes each slot's frames to the sender bound to that slot
///
/// Each slot has its own lock, so slots never contend with each other and a
/// single slot's frames keep their submission order.
pub struct OutputRouter {
    senders: Vec<Mutex<Option<SenderAdapter>>>,
    preview_tx: broadcast::Sender<RoutedFrame>,
}

impl OutputRouter {
    pub fn new(slots: usize) -> Self {
        let (preview_tx, _) = broadcast::channel(PREVIEW_CAPACITY);
        Self {
            senders: (0..slots).map(|_| Mutex::new(None)).collect(),
            preview_tx,
        }
    }

    pub fn slot_count(&self) -> usize {
        self.senders.len()
    }

    fn slot(&self, slot: usize) -> Result<&Mutex<Option<SenderAdapter>>> {
        self.senders.get(slot).ok_or(BridgeError::InvalidSlot(slot))
    }

    /// Bind a sender to a slot, closing any previous one
    pub fn bind(&self, slot: usize, sender: SenderAdapter) -> Result<()> {
        let previous = self.slot(slot)?.lock().replace(sender);
        if let Some(mut previous) = previous {
            previous.close();
        }
        Ok(())
    }

    /// Release the slot's sender; returns its final stats if one was bound
    pub fn unbind(&self, slot: usize) -> Option<SenderStats> {
        let mut sender = self.senders.get(slot)?.lock().take()?;
        sender.close();
        Some(sender.stats())
    }

    /// Release every bound sender
    pub fn unbind_all(&self) -> usize {
        (0..self.senders.len())
            .filter(|slot| self.unbind(*slot).is_some())
            .count()
    }

    pub fn is_bound(&self, slot: usize) -> bool {
        self.senders
            .get(slot)
            .is_some_and(|sender| sender.lock().is_some())
    }

    /// Deliver one frame from `slot`
    ///
    /// Preview taps see the frame whatever the sender does with it. A send
    /// failure unbinds and closes the slot's sender before the error is
    /// returned; later frames fall through to preview only.
    pub fn route(&self, slot: usize, frame: SyncedFrame) -> Result<RouteOutcome> {
        let frame = Arc::new(frame);
        let outcome = {
            let mut guard = self.slot(slot)?.lock();
            match guard.as_mut() {
                Some(sender) => match sender.send(&frame) {
                    Ok(()) => Ok(RouteOutcome::Sent),
                    Err(e) => {
                        if let Some(mut sender) = guard.take() {
                            sender.close();
                        }
                        debug!(slot, "Sender unbound after failure: {}", e);
                        Err(e)
                    }
                },
                None => Ok(RouteOutcome::PreviewOnly),
            }
        };

        if self.preview_tx.receiver_count() > 0 {
            let _ = self.preview_tx.send(RoutedFrame { slot, frame });
        }
        outcome
    }

    /// Subscribe to every routed frame, for local preview
    pub fn tap(&self) -> broadcast::Receiver<RoutedFrame> {
        self.preview_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{AudioBlock, MediaData};
    use crate::output::sender::{
        OmtMediaFrame, OmtQuality, SendFailure, SenderBackend, SenderOutlet,
    };
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Instant;

    #[derive(Default)]
    struct Shared {
        sent: AtomicUsize,
        fail: AtomicBool,
    }

    struct TestOutlet(Arc<Shared>);

    impl SenderOutlet for TestOutlet {
        fn send(&mut self, _frame: &OmtMediaFrame<'_>) -> std::result::Result<(), SendFailure> {
            if self.0.fail.load(Ordering::SeqCst) {
                return Err(SendFailure::Fatal("boom".to_string()));
            }
            self.0.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct TestBackend(Arc<Shared>);

    impl SenderBackend for TestBackend {
        fn open(&self, _name: &str, _quality: OmtQuality) -> Result<Box<dyn SenderOutlet>> {
            Ok(Box::new(TestOutlet(self.0.clone())))
        }

        fn check_available(&self) -> Result<()> {
            Ok(())
        }
    }

    fn frame(pts_us: u64) -> SyncedFrame {
        SyncedFrame {
            pts_us,
            capture_ts_us: pts_us,
            seq: 0,
            keyframe: false,
            arrival: Instant::now(),
            data: MediaData::Audio(AudioBlock {
                sample_rate: 48_000,
                channels: 1,
                samples_per_channel: 1,
                samples: vec![0.0],
            }),
        }
    }

    fn adapter(shared: &Arc<Shared>) -> SenderAdapter {
        SenderAdapter::open(&TestBackend(shared.clone()), "Camera", OmtQuality::Medium, 3).unwrap()
    }

    #[test]
    fn test_unbound_slot_is_preview_only() {
        let router = OutputRouter::new(4);
        let mut tap = router.tap();
        assert_eq!(router.route(1, frame(5)).unwrap(), RouteOutcome::PreviewOnly);
        let routed = tap.try_recv().unwrap();
        assert_eq!(routed.slot, 1);
        assert_eq!(routed.frame.pts_us, 5);
    }

    #[test]
    fn test_invalid_slot() {
        let router = OutputRouter::new(2);
        assert!(matches!(
            router.route(2, frame(0)),
            Err(BridgeError::InvalidSlot(2))
        ));
        assert!(router.unbind(7).is_none());
    }

    #[test]
    fn test_routes_to_bound_sender_only() {
        let shared = Arc::new(Shared::default());
        let router = OutputRouter::new(4);
        router.bind(0, adapter(&shared)).unwrap();

        assert_eq!(router.route(0, frame(1)).unwrap(), RouteOutcome::Sent);
        assert_eq!(router.route(3, frame(1)).unwrap(), RouteOutcome::PreviewOnly);
        assert_eq!(shared.sent.load(Ordering::SeqCst), 1);
        assert!(router.is_bound(0));
        assert!(!router.is_bound(3));
    }

    #[test]
    fn test_failure_unbinds() {
        let shared = Arc::new(Shared::default());
        let router = OutputRouter::new(4);
        router.bind(2, adapter(&shared)).unwrap();

        shared.fail.store(true, Ordering::SeqCst);
        assert!(matches!(
            router.route(2, frame(1)),
            Err(BridgeError::SenderUnavailable(_))
        ));
        assert!(!router.is_bound(2));
        assert_eq!(router.route(2, frame(2)).unwrap(), RouteOutcome::PreviewOnly);
    }

    #[test]
    fn test_failed_send_still_reaches_preview() {
        let shared = Arc::new(Shared::default());
        let router = OutputRouter::new(4);
        let mut tap = router.tap();
        router.bind(1, adapter(&shared)).unwrap();

        shared.fail.store(true, Ordering::SeqCst);
        assert!(router.route(1, frame(42)).is_err());
        let routed = tap.try_recv().unwrap();
        assert_eq!(routed.slot, 1);
        assert_eq!(routed.frame.pts_us, 42);
    }

    #[test]
    fn test_unbind_all() {
        let shared = Arc::new(Shared::default());
        let router = OutputRouter::new(4);
        router.bind(0, adapter(&shared)).unwrap();
        router.bind(3, adapter(&shared)).unwrap();
        assert_eq!(router.unbind_all(), 2);
        assert_eq!(router.unbind_all(), 0);
    }
}
