//! Event dispatcher
//!
//! The native engine calls back from its own threads. [`CallbackSink`] is
//! the single handler set the engine receives: it decodes raw codes and
//! images into typed values, drops anything it cannot decode, looks up the
//! session a handle belongs to and hands the event to that session's
//! ordered queue. Nothing here touches session state; sessions admit
//! events on the consumer side, one at a time, in queue order.

use crate::engine::{NativeResult, RawCaptureResult, RawExtendedResult};
use crate::registry::DeviceRegistry;
use crate::scanner::ScannerInner;
use common::EventSender;
use protocol::{
    CaptureOutcome, CaptureResult, Failure, FailureCode, FingerCountState, FingerQuality,
    ImageFrame, ImageType, NativeHandle, PlatenState, QualitySnapshot, RawImage, SessionEvent,
    translate,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tracing::{debug, trace, warn};

/// Which result callback ends a capture cycle
///
/// Engines may fire both the plain and the extended result for one
/// capture; only the selected one is forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultVariant {
    Plain,
    #[default]
    Extended,
}

/// Item carried by a session queue
#[derive(Debug)]
pub(crate) enum Envelope {
    /// Event tagged with the session's capture cycle at the time it fired
    Event { cycle: u64, event: SessionEvent },
    /// Nudges a waiting consumer to look at the session's pending events
    Wake,
}

struct Route {
    sender: EventSender<Envelope>,
    cycle: Arc<AtomicU64>,
}

/// Handle to session queue routing, shared by the sink and the sessions
pub(crate) struct Router {
    routes: Mutex<HashMap<NativeHandle, Route>>,
    registry: DeviceRegistry,
    scanner: Weak<ScannerInner>,
    variant: ResultVariant,
}

impl Router {
    pub(crate) fn new(
        registry: DeviceRegistry,
        scanner: Weak<ScannerInner>,
        variant: ResultVariant,
    ) -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            registry,
            scanner,
            variant,
        }
    }

    pub(crate) fn register(
        &self,
        handle: NativeHandle,
        sender: EventSender<Envelope>,
        cycle: Arc<AtomicU64>,
    ) {
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        if routes.insert(handle, Route { sender, cycle }).is_some() {
            warn!(handle = handle.0, "Replaced existing route for native handle");
        }
    }

    pub(crate) fn unregister(&self, handle: NativeHandle) {
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        routes.remove(&handle);
    }

    fn deliver(&self, handle: NativeHandle, event: SessionEvent) {
        let route = {
            let routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
            routes
                .get(&handle)
                .map(|r| (r.sender.clone(), r.cycle.load(Ordering::SeqCst)))
        };

        let Some((sender, cycle)) = route else {
            debug!(
                handle = handle.0,
                event = event.name(),
                "Callback for closed or unknown session dropped"
            );
            return;
        };

        trace!(handle = handle.0, cycle, event = event.name(), "Queueing session event");
        // Blocks while the consumer is behind; events are never dropped here
        if let Err(e) = sender.send_blocking(Envelope::Event { cycle, event }) {
            debug!(handle = handle.0, "Session queue closed: {}", e);
        }
    }
}

/// Callback entry points handed to the native engine
///
/// Cheap to clone; every method may be called from any thread.
#[derive(Clone)]
pub struct CallbackSink {
    router: Arc<Router>,
}

impl std::fmt::Debug for CallbackSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackSink")
            .field("variant", &self.router.variant)
            .finish()
    }
}

impl CallbackSink {
    pub(crate) fn new(router: Arc<Router>) -> Self {
        Self { router }
    }

    pub fn communication_broken(&self, handle: NativeHandle) {
        warn!(handle = handle.0, "Engine reported communication broken");
        self.router.deliver(handle, SessionEvent::CommunicationBroken);
    }

    pub fn preview_available(&self, handle: NativeHandle, image: RawImage) {
        match ImageFrame::try_from(image) {
            Ok(frame) => self
                .router
                .deliver(handle, SessionEvent::PreviewAvailable(frame)),
            Err(e) => warn!(handle = handle.0, "Dropping undecodable preview image: {}", e),
        }
    }

    pub fn finger_count_changed(&self, handle: NativeHandle, code: i32) {
        match FingerCountState::from_code(code) {
            Some(state) => self
                .router
                .deliver(handle, SessionEvent::FingerCountChanged(state)),
            None => warn!(handle = handle.0, code, "Dropping unrecognized finger count state"),
        }
    }

    /// Per-slot quality codes; one unrecognized code drops the whole event
    pub fn finger_quality_changed(&self, handle: NativeHandle, codes: &[i32]) {
        let fingers: Option<Vec<FingerQuality>> =
            codes.iter().map(|c| FingerQuality::from_code(*c)).collect();
        match fingers {
            Some(fingers) => {
                // Finger count is merged in by the session when admitted
                let snapshot = QualitySnapshot::new(fingers, FingerCountState::default());
                self.router
                    .deliver(handle, SessionEvent::FingerQualityChanged(snapshot));
            }
            None => warn!(
                handle = handle.0,
                ?codes,
                "Dropping finger quality event with unrecognized code"
            ),
        }
    }

    pub fn acquisition_begun(&self, handle: NativeHandle, image_type: i32) {
        match ImageType::from_code(image_type) {
            Some(t) => self.router.deliver(handle, SessionEvent::AcquisitionBegun(t)),
            None => warn!(handle = handle.0, image_type, "Dropping acquisition begun with unknown type"),
        }
    }

    pub fn acquisition_completed(&self, handle: NativeHandle, image_type: i32) {
        match ImageType::from_code(image_type) {
            Some(t) => self
                .router
                .deliver(handle, SessionEvent::AcquisitionCompleted(t)),
            None => warn!(
                handle = handle.0,
                image_type,
                "Dropping acquisition completed with unknown type"
            ),
        }
    }

    pub fn result_available(&self, handle: NativeHandle, result: RawCaptureResult) {
        if self.router.variant != ResultVariant::Plain {
            trace!(handle = handle.0, "Plain result ignored, extended variant selected");
            return;
        }
        let outcome = match decode_plain(result) {
            Ok(result) => CaptureOutcome::Completed(result),
            Err(failure) => CaptureOutcome::Failed(failure),
        };
        self.router
            .deliver(handle, SessionEvent::CaptureFinished(outcome));
    }

    pub fn result_extended(&self, handle: NativeHandle, result: RawExtendedResult) {
        if self.router.variant != ResultVariant::Extended {
            trace!(handle = handle.0, "Extended result ignored, plain variant selected");
            return;
        }
        self.router
            .deliver(handle, SessionEvent::CaptureFinished(decode_extended(result)));
    }

    pub fn platen_state_changed(&self, handle: NativeHandle, code: i32) {
        match PlatenState::from_code(code) {
            Some(state) => self
                .router
                .deliver(handle, SessionEvent::PlatenStateChanged(state)),
            None => warn!(handle = handle.0, code, "Dropping unrecognized platen state"),
        }
    }

    pub fn warning(&self, handle: NativeHandle, code: i32) {
        match translate(code) {
            Some(failure) => self
                .router
                .deliver(handle, SessionEvent::WarningReceived(failure)),
            None => debug!(handle = handle.0, "Ignoring warning callback with status 0"),
        }
    }

    pub fn key_button(&self, handle: NativeHandle, button: i32) {
        match u32::try_from(button) {
            Ok(button) => self
                .router
                .deliver(handle, SessionEvent::KeyButtonPressed(button)),
            Err(_) => warn!(handle = handle.0, button, "Dropping invalid key button code"),
        }
    }

    /// Open progress for a device index, 0 to 100
    pub fn init_progress(&self, index: usize, progress: i32) {
        self.router.registry.report_progress(index, progress);
    }

    pub fn device_count_changed(&self, count: i32) {
        match usize::try_from(count) {
            Ok(count) => self.router.registry.report_device_count(count),
            Err(_) => warn!(count, "Dropping negative device count"),
        }
    }

    /// Completion of an asynchronous open
    pub fn open_complete(&self, index: usize, result: NativeResult<NativeHandle>) {
        match self.router.scanner.upgrade() {
            Some(scanner) => scanner.finish_async_open(index, result),
            None => debug!(index, "Open completed after scanner shutdown"),
        }
    }
}

fn decode_frame(raw: RawImage, what: &str) -> Result<ImageFrame, Failure> {
    ImageFrame::try_from(raw).map_err(|e| {
        warn!("Undecodable {} from engine: {}", what, e);
        Failure::new(FailureCode::CaptureCommandFailed).with_detail(format!("{}: {}", what, e))
    })
}

fn decode_image_type(code: i32) -> Result<ImageType, Failure> {
    ImageType::from_code(code).ok_or_else(|| {
        warn!(code, "Result with unrecognized image type");
        Failure::new(FailureCode::CaptureCommandFailed)
            .with_detail(format!("unrecognized image type {}", code))
    })
}

fn decode_plain(raw: RawCaptureResult) -> Result<CaptureResult, Failure> {
    Ok(CaptureResult::Plain {
        image: decode_frame(raw.image, "result image")?,
        image_type: decode_image_type(raw.image_type)?,
        split_images: raw
            .split_images
            .into_iter()
            .map(|img| decode_frame(img, "split image"))
            .collect::<Result<_, _>>()?,
        quality: QualitySnapshot::default(),
        warnings: Vec::new(),
    })
}

fn decode_extended(raw: RawExtendedResult) -> CaptureOutcome {
    // Negative status fails the capture; positive is a warning on a usable image
    let status = translate(raw.status);
    let warning = match status {
        Some(failure) if failure.is_warning() => Some(failure),
        Some(failure) => return CaptureOutcome::Failed(failure),
        None => None,
    };

    match build_extended(raw, warning) {
        Ok(result) => CaptureOutcome::Completed(result),
        Err(failure) => CaptureOutcome::Failed(failure),
    }
}

fn build_extended(
    raw: RawExtendedResult,
    warning: Option<Failure>,
) -> Result<CaptureResult, Failure> {
    Ok(CaptureResult::Extended {
        image: decode_frame(raw.image, "result image")?,
        image_type: decode_image_type(raw.image_type)?,
        detected_finger_count: u32::try_from(raw.detected_finger_count).unwrap_or(0),
        segments: raw
            .segments
            .into_iter()
            .map(|img| decode_frame(img, "segment image"))
            .collect::<Result<_, _>>()?,
        positions: raw.positions,
        quality: QualitySnapshot::default(),
        warnings: warning.into_iter().collect(),
    })
}
