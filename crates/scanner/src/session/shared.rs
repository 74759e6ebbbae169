//! Shared session state and event admission
//!
//! A session's state changes in exactly two ways: a request from the
//! consumer, or the consumer taking the next event off the session queue.
//! Admission runs under the session lock, one event at a time, and decides
//! whether the event is still meaningful (its capture cycle is current) and
//! what state change it implies. Engine, registry and provider calls are
//! never made while the session lock is held.

use crate::dispatch::{Envelope, Router};
use crate::engine::NativeEngine;
use crate::registry::DeviceRegistry;
use crate::session::SessionState;
use crate::usb::TransportHandle;
use common::EventSender;
use protocol::{
    CaptureOptions, CaptureOutcome, DeviceId, Failure, FailureCode, ImageFrame, ImageResolution,
    ImageType, NativeHandle, PlatenState, PropertyId, QualitySnapshot, SessionEvent,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, trace};

/// Parameters of one capture request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConfig {
    pub image_type: ImageType,
    pub resolution: ImageResolution,
    pub options: CaptureOptions,
}

pub(crate) struct ActiveCapture {
    pub(crate) cycle: u64,
    pub(crate) config: CaptureConfig,
    pub(crate) warnings: Vec<Failure>,
}

pub(crate) struct SessionInner {
    pub(crate) device: DeviceId,
    pub(crate) state: SessionState,
    pub(crate) capture: Option<ActiveCapture>,
    pub(crate) properties: HashMap<PropertyId, String>,
    pub(crate) quality: QualitySnapshot,
    pub(crate) platen: PlatenState,
    pub(crate) last_preview: Option<ImageFrame>,
    /// Core-generated events, delivered ahead of the queue
    pub(crate) pending: VecDeque<Envelope>,
    pub(crate) sender: Option<EventSender<Envelope>>,
    pub(crate) transport: Option<TransportHandle>,
    pub(crate) broken_delivered: bool,
    pub(crate) torn_down: bool,
}

impl SessionInner {
    pub(crate) fn set_state(&mut self, next: SessionState) {
        if self.state != next {
            debug!(device = %self.device, from = ?self.state, to = ?next, "Session state change");
            self.state = next;
        }
    }

    /// Terminal outcome for a capture ended on request
    pub(crate) fn stop_outcome(&self) -> CaptureOutcome {
        match &self.last_preview {
            Some(frame) => CaptureOutcome::Cancelled(frame.clone()),
            None => CaptureOutcome::Failed(Failure::new(FailureCode::CaptureStop)),
        }
    }

    fn capture_cycle(&self) -> Option<u64> {
        self.capture.as_ref().map(|c| c.cycle)
    }

    /// Decide whether an event reaches the consumer and apply its effect
    ///
    /// Returns the event to deliver, if any, and whether the session must
    /// be torn down once the lock is released.
    fn admit(&mut self, envelope: Envelope) -> (Option<SessionEvent>, bool) {
        let (cycle, event) = match envelope {
            Envelope::Wake => return (None, false),
            Envelope::Event { cycle, event } => (cycle, event),
        };

        match event {
            SessionEvent::CaptureFinished(outcome) => {
                let Some(capture) = self.capture.take_if(|c| c.cycle == cycle) else {
                    debug!(
                        device = %self.device,
                        cycle,
                        "Dropping terminal event outside its capture cycle"
                    );
                    return (None, false);
                };
                if self.state == SessionState::Capturing {
                    self.set_state(SessionState::Open);
                }
                let outcome = outcome.with_context(self.quality.clone(), capture.warnings);
                info!(
                    device = %self.device,
                    success = outcome.is_success(),
                    image_type = ?capture.config.image_type,
                    "Capture finished"
                );
                (Some(SessionEvent::CaptureFinished(outcome)), false)
            }

            SessionEvent::CommunicationBroken => {
                if self.broken_delivered {
                    return (None, false);
                }
                self.broken_delivered = true;
                if let Some(active) = self.capture_cycle() {
                    self.pending.push_front(Envelope::Event {
                        cycle: active,
                        event: SessionEvent::CaptureFinished(CaptureOutcome::Failed(
                            Failure::new(FailureCode::CommunicationBroken),
                        )),
                    });
                }
                self.set_state(SessionState::Closed);
                (Some(SessionEvent::CommunicationBroken), !self.torn_down)
            }

            event if event.is_capture_progress() => {
                if self.state != SessionState::Capturing || self.capture_cycle() != Some(cycle) {
                    trace!(device = %self.device, event = event.name(), "Dropping stale capture event");
                    return (None, false);
                }
                let event = match event {
                    SessionEvent::FingerQualityChanged(snapshot) => {
                        let merged =
                            QualitySnapshot::new(snapshot.fingers().to_vec(), self.quality.count());
                        self.quality = merged.clone();
                        SessionEvent::FingerQualityChanged(merged)
                    }
                    SessionEvent::FingerCountChanged(count) => {
                        self.quality = self.quality.with_count(count);
                        SessionEvent::FingerCountChanged(count)
                    }
                    SessionEvent::PreviewAvailable(frame) => {
                        self.last_preview = Some(frame.clone());
                        SessionEvent::PreviewAvailable(frame)
                    }
                    other => other,
                };
                (Some(event), false)
            }

            event => {
                if self.state == SessionState::Closed {
                    trace!(device = %self.device, event = event.name(), "Dropping event for closed session");
                    return (None, false);
                }
                match &event {
                    SessionEvent::PlatenStateChanged(state) => self.platen = *state,
                    SessionEvent::WarningReceived(failure) => {
                        if let Some(capture) = self.capture.as_mut().filter(|c| c.cycle == cycle) {
                            capture.warnings.push(failure.clone());
                        }
                    }
                    _ => {}
                }
                (Some(event), false)
            }
        }
    }
}

/// State shared between a session, its event stream and the registry
pub(crate) struct SessionCore {
    pub(crate) handle: NativeHandle,
    pub(crate) device: DeviceId,
    pub(crate) index: usize,
    pub(crate) engine: Arc<dyn NativeEngine>,
    pub(crate) router: Arc<Router>,
    pub(crate) registry: DeviceRegistry,
    /// Current capture cycle; read by the dispatcher to tag events
    pub(crate) cycle: Arc<AtomicU64>,
    inner: Mutex<SessionInner>,
}

pub(crate) struct SessionParts {
    pub(crate) handle: NativeHandle,
    pub(crate) device: DeviceId,
    pub(crate) index: usize,
    pub(crate) engine: Arc<dyn NativeEngine>,
    pub(crate) router: Arc<Router>,
    pub(crate) registry: DeviceRegistry,
    pub(crate) sender: EventSender<Envelope>,
    pub(crate) transport: TransportHandle,
}

impl SessionCore {
    pub(crate) fn new(parts: SessionParts) -> Self {
        let cycle = Arc::new(AtomicU64::new(0));
        parts
            .router
            .register(parts.handle, parts.sender.clone(), cycle.clone());

        Self {
            handle: parts.handle,
            device: parts.device,
            index: parts.index,
            engine: parts.engine,
            router: parts.router,
            registry: parts.registry,
            cycle,
            inner: Mutex::new(SessionInner {
                device: parts.device,
                state: SessionState::Open,
                capture: None,
                properties: HashMap::new(),
                quality: QualitySnapshot::default(),
                platen: PlatenState::default(),
                last_preview: None,
                pending: VecDeque::new(),
                sender: Some(parts.sender),
                transport: Some(parts.transport),
                broken_delivered: false,
                torn_down: false,
            }),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a new capture cycle; events tagged with older cycles go stale
    pub(crate) fn next_cycle(&self) -> u64 {
        self.cycle.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn pop_pending(&self) -> Option<Envelope> {
        self.lock().pending.pop_front()
    }

    /// Nudge a consumer waiting on the queue to look at pending events
    pub(crate) fn wake(&self) {
        let sender = self.lock().sender.clone();
        // A full queue already guarantees the consumer will look again
        if let Some(sender) = sender {
            let _ = sender.try_send(Envelope::Wake);
        }
    }

    pub(crate) fn admit(&self, envelope: Envelope) -> Option<SessionEvent> {
        let (event, teardown) = self.lock().admit(envelope);
        if teardown {
            self.teardown();
        }
        event
    }

    /// Release everything the session holds; runs at most once
    pub(crate) fn teardown(&self) {
        let (sender, transport) = {
            let mut inner = self.lock();
            if inner.torn_down {
                return;
            }
            inner.torn_down = true;
            inner.set_state(SessionState::Closed);
            (inner.sender.take(), inner.transport.take())
        };

        self.next_cycle();
        self.router.unregister(self.handle);
        if let Some(sender) = sender {
            sender.close();
        }
        if let Err(code) = self.engine.close_device(self.handle) {
            debug!(device = %self.device, code, "Native close reported failure");
        }
        if let Some(transport) = transport {
            self.registry.release_transport(transport);
        }
        self.registry.session_closed(self.device);
        info!(device = %self.device, index = self.index, "Session closed");
    }

    /// Explicit close; a closed session is left alone
    pub(crate) fn close(&self) {
        let capturing = {
            let mut inner = self.lock();
            if inner.torn_down {
                return;
            }
            match inner.capture_cycle() {
                Some(cycle) if inner.state == SessionState::Capturing => {
                    let outcome = inner.stop_outcome();
                    inner.pending.push_back(Envelope::Event {
                        cycle,
                        event: SessionEvent::CaptureFinished(outcome),
                    });
                    true
                }
                _ => false,
            }
        };

        if capturing && let Err(code) = self.engine.cancel_capture(self.handle) {
            debug!(device = %self.device, code, "Cancel during close reported failure");
        }
        self.teardown();
    }

    /// Device vanished: close at once and report the broken link
    pub(crate) fn force_detach(&self) {
        {
            let mut inner = self.lock();
            if inner.torn_down {
                return;
            }
            let cycle = self.cycle.load(Ordering::SeqCst);
            inner.pending.push_back(Envelope::Event {
                cycle,
                event: SessionEvent::CommunicationBroken,
            });
        }
        info!(device = %self.device, "Device detached while open");
        self.teardown();
    }

    pub(crate) fn state(&self) -> SessionState {
        self.lock().state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{create_mock_frame, create_quality};
    use protocol::{CaptureResult, FingerCountState, FingerQuality};

    fn inner(state: SessionState) -> SessionInner {
        SessionInner {
            device: DeviceId(1),
            state,
            capture: None,
            properties: HashMap::new(),
            quality: QualitySnapshot::default(),
            platen: PlatenState::default(),
            last_preview: None,
            pending: VecDeque::new(),
            sender: None,
            transport: None,
            broken_delivered: false,
            torn_down: false,
        }
    }

    fn capturing(cycle: u64) -> SessionInner {
        let mut inner = inner(SessionState::Capturing);
        inner.capture = Some(ActiveCapture {
            cycle,
            config: CaptureConfig {
                image_type: ImageType::FlatSingleFinger,
                resolution: ImageResolution::Ppi500,
                options: CaptureOptions::AUTO_CAPTURE,
            },
            warnings: vec![],
        });
        inner
    }

    fn event(cycle: u64, event: SessionEvent) -> Envelope {
        Envelope::Event { cycle, event }
    }

    fn completed() -> SessionEvent {
        SessionEvent::CaptureFinished(CaptureOutcome::Completed(CaptureResult::Plain {
            image: create_mock_frame(4, 4, true),
            image_type: ImageType::FlatSingleFinger,
            split_images: vec![],
            quality: QualitySnapshot::default(),
            warnings: vec![],
        }))
    }

    #[test]
    fn test_terminal_ends_cycle_once() {
        let mut inner = capturing(3);
        let (first, _) = inner.admit(event(3, completed()));
        assert!(first.is_some());
        assert_eq!(inner.state, SessionState::Open);

        let (second, _) = inner.admit(event(3, completed()));
        assert!(second.is_none());
    }

    #[test]
    fn test_stale_cycle_dropped() {
        let mut inner = capturing(3);
        let (stale, _) = inner.admit(event(2, completed()));
        assert!(stale.is_none());
        let (preview, _) = inner.admit(event(
            2,
            SessionEvent::PreviewAvailable(create_mock_frame(4, 4, false)),
        ));
        assert!(preview.is_none());
        assert_eq!(inner.state, SessionState::Capturing);
    }

    #[test]
    fn test_quality_merges_count() {
        let mut inner = capturing(1);
        inner.admit(event(1, SessionEvent::FingerCountChanged(FingerCountState::TooFew)));
        let (delivered, _) = inner.admit(event(
            1,
            SessionEvent::FingerQualityChanged(create_quality(&[FingerQuality::Poor])),
        ));

        let Some(SessionEvent::FingerQualityChanged(snapshot)) = delivered else {
            panic!("quality event expected");
        };
        assert_eq!(snapshot.count(), FingerCountState::TooFew);
        assert_eq!(inner.quality, snapshot);
    }

    #[test]
    fn test_result_carries_final_quality_and_warnings() {
        let mut inner = capturing(1);
        inner.admit(event(
            1,
            SessionEvent::WarningReceived(Failure::new(FailureCode::WetFingers)),
        ));
        inner.admit(event(
            1,
            SessionEvent::FingerQualityChanged(create_quality(&[FingerQuality::Good])),
        ));

        let (delivered, _) = inner.admit(event(1, completed()));
        let Some(SessionEvent::CaptureFinished(CaptureOutcome::Completed(result))) = delivered
        else {
            panic!("completed result expected");
        };
        assert_eq!(result.quality().primary(), FingerQuality::Good);
        assert_eq!(result.warnings()[0].code, FailureCode::WetFingers);
    }

    #[test]
    fn test_broken_link_synthesizes_failure_terminal() {
        let mut inner = capturing(5);
        let (delivered, teardown) = inner.admit(event(5, SessionEvent::CommunicationBroken));
        assert_eq!(delivered, Some(SessionEvent::CommunicationBroken));
        assert!(teardown);
        assert_eq!(inner.state, SessionState::Closed);

        let pending = inner.pending.pop_front().unwrap();
        let (terminal, _) = inner.admit(pending);
        assert_eq!(
            terminal,
            Some(SessionEvent::CaptureFinished(CaptureOutcome::Failed(
                Failure::new(FailureCode::CommunicationBroken)
            )))
        );

        let (again, _) = inner.admit(event(5, SessionEvent::CommunicationBroken));
        assert!(again.is_none());
    }

    #[test]
    fn test_platen_dropped_after_close() {
        let mut inner = inner(SessionState::Closed);
        let (delivered, _) =
            inner.admit(event(0, SessionEvent::PlatenStateChanged(PlatenState::HasFingers)));
        assert!(delivered.is_none());
    }

    #[test]
    fn test_stop_outcome_prefers_last_preview() {
        let mut inner = capturing(1);
        assert_eq!(
            inner.stop_outcome(),
            CaptureOutcome::Failed(Failure::new(FailureCode::CaptureStop))
        );
        let frame = create_mock_frame(4, 4, false);
        inner.last_preview = Some(frame.clone());
        assert_eq!(inner.stop_outcome(), CaptureOutcome::Cancelled(frame));
    }
}
