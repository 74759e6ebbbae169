//! Capture session
//!
//! One open device. The session owns the native handle and runs the
//! capture state machine:
//!
//! ```text
//!   Open ──begin_capture──▶ Capturing ──terminal event──▶ Open
//!    │                          │
//!    └────close / detach────────┴──────────────────────▶ Closed
//! ```
//!
//! Requests return immediately; their outcomes arrive on the session's
//! [`SessionEvents`] stream. Every accepted `begin_capture` yields exactly
//! one [`SessionEvent::CaptureFinished`], whether the capture completes,
//! is cancelled, or the device goes away.

mod events;
pub(crate) mod shared;

pub use events::SessionEvents;
pub use shared::CaptureConfig;

use crate::dispatch::Envelope;
use shared::{ActiveCapture, SessionCore};
use bytes::Bytes;
use protocol::{
    CaptureOptions, DeviceDescriptor, DeviceId, EventType, Failure, FailureCode, Hand, ImageFrame,
    ImageResolution, ImageType, LedState, PlatenState, PropertyAccess, PropertyId,
    QualitySnapshot, RollingData, RollingState, SessionEvent,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lifecycle state of a session
///
/// Opening is tracked by the registry's descriptor; a session object only
/// exists once the device is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Open,
    Capturing,
    Closed,
}

/// An open scanner
///
/// Dropping the session closes it.
pub struct CaptureSession {
    core: Arc<SessionCore>,
    events: Option<SessionEvents>,
}

impl CaptureSession {
    pub(crate) fn new(core: Arc<SessionCore>, events: SessionEvents) -> Self {
        Self {
            core,
            events: Some(events),
        }
    }

    /// Take the event stream; available once per session
    pub fn take_events(&mut self) -> Option<SessionEvents> {
        self.events.take()
    }

    pub fn device_id(&self) -> DeviceId {
        self.core.device
    }

    /// Registry index the session was opened from
    pub fn index(&self) -> usize {
        self.core.index
    }

    pub fn state(&self) -> SessionState {
        self.core.state()
    }

    /// Quality snapshot as of the last delivered event
    pub fn quality(&self) -> QualitySnapshot {
        self.core.lock().quality.clone()
    }

    pub fn platen_state(&self) -> PlatenState {
        self.core.lock().platen
    }

    /// Parameters of the capture in progress
    pub fn active_capture(&self) -> Option<CaptureConfig> {
        self.core.lock().capture.as_ref().map(|c| c.config)
    }

    /// Descriptor as currently held by the registry
    pub fn descriptor(&self) -> Result<DeviceDescriptor, Failure> {
        self.core
            .registry
            .device(self.core.device)
            .ok_or_else(|| Failure::new(FailureCode::DeviceNotFound))
    }

    /// Close the session; closing twice is a no-op
    ///
    /// A capture in progress is cancelled and still reports its terminal
    /// event.
    pub fn close(&self) {
        self.core.close();
    }

    fn require_open(&self) -> Result<(), Failure> {
        match self.core.state() {
            SessionState::Closed => Err(wrong_state("session is closed")),
            _ => Ok(()),
        }
    }

    fn native<T>(&self, result: Result<T, i32>) -> Result<T, Failure> {
        result.map_err(Failure::from_status)
    }

    // ========================================================================
    // Capture
    // ========================================================================

    pub fn is_capture_available(
        &self,
        image_type: ImageType,
        resolution: ImageResolution,
    ) -> Result<bool, Failure> {
        self.require_open()?;
        if image_type == ImageType::None {
            return Ok(false);
        }
        self.native(
            self.core
                .engine
                .is_capture_available(self.core.handle, image_type, resolution),
        )
    }

    /// Whether the engine considers a capture to be running
    pub fn is_capture_active(&self) -> Result<bool, Failure> {
        self.require_open()?;
        self.native(self.core.engine.is_capture_active(self.core.handle))
    }

    /// Start a capture; the outcome arrives as a terminal event
    pub fn begin_capture(
        &self,
        image_type: ImageType,
        resolution: ImageResolution,
        options: CaptureOptions,
    ) -> Result<(), Failure> {
        check_begin(self.core.state())?;

        if !self.is_capture_available(image_type, resolution)? {
            return Err(Failure::new(FailureCode::CaptureInvalidMode).with_detail(format!(
                "{:?} at {} ppi",
                image_type,
                resolution.ppi()
            )));
        }

        let config = CaptureConfig {
            image_type,
            resolution,
            options,
        };
        let cycle = {
            let mut inner = self.core.lock();
            check_begin(inner.state)?;
            let cycle = self.core.next_cycle();
            inner.capture = Some(ActiveCapture {
                cycle,
                config,
                warnings: Vec::new(),
            });
            inner.quality = QualitySnapshot::default();
            inner.last_preview = None;
            inner.set_state(SessionState::Capturing);
            cycle
        };

        if let Err(code) =
            self.core
                .engine
                .begin_capture(self.core.handle, image_type, resolution, options)
        {
            let mut inner = self.core.lock();
            if inner.capture.take_if(|c| c.cycle == cycle).is_some()
                && inner.state == SessionState::Capturing
            {
                inner.set_state(SessionState::Open);
            }
            return Err(Failure::from_status(code));
        }

        info!(
            device = %self.core.device,
            cycle,
            ?image_type,
            ppi = resolution.ppi(),
            options = ?options.names(),
            "Capture started"
        );
        Ok(())
    }

    /// Request early termination of the running capture
    ///
    /// The capture still ends with one terminal event: the last preview
    /// frame as a cancelled outcome, or a stop failure when no frame has
    /// arrived yet.
    pub fn cancel_capture(&self) -> Result<(), Failure> {
        {
            let mut inner = self.core.lock();
            check_running(inner.state)?;
            let cycle = inner
                .capture
                .as_ref()
                .map(|c| c.cycle)
                .ok_or_else(|| Failure::new(FailureCode::CaptureNotRunning))?;
            let outcome = inner.stop_outcome();
            inner.pending.push_back(Envelope::Event {
                cycle,
                event: SessionEvent::CaptureFinished(outcome),
            });
        }
        // Engine callbacks for the cancelled capture are now stale
        self.core.next_cycle();
        self.core.wake();

        debug!(device = %self.core.device, "Capture cancel requested");
        match self.core.engine.cancel_capture(self.core.handle) {
            Ok(()) => Ok(()),
            Err(code) => {
                let failure = Failure::from_status(code);
                if failure.code == FailureCode::CaptureNotRunning {
                    Ok(())
                } else {
                    warn!(device = %self.core.device, %failure, "Native cancel failed");
                    Err(failure)
                }
            }
        }
    }

    /// Take the current frame as final regardless of quality
    pub fn capture_manually(&self) -> Result<(), Failure> {
        check_running(self.core.state())?;
        self.native(self.core.engine.capture_manually(self.core.handle))
    }

    /// Roll progress of the running capture
    pub fn rolling_info(&self) -> Result<RollingData, Failure> {
        check_running(self.core.state())?;
        let raw = self.native(self.core.engine.rolling_info(self.core.handle))?;
        let state = RollingState::from_code(raw.state).ok_or_else(|| {
            warn!(device = %self.core.device, code = raw.state, "Unrecognized rolling state");
            Failure::new(FailureCode::CommandFailed)
                .with_detail(format!("unrecognized rolling state {}", raw.state))
        })?;
        Ok(RollingData {
            state,
            line_x: raw.line_x,
        })
    }

    // ========================================================================
    // Properties
    // ========================================================================

    /// Write a property through the regular request
    ///
    /// The value is validated against the property table first; on any
    /// failure the previous value stays in effect.
    pub fn set_property(&self, id: PropertyId, value: &str) -> Result<(), Failure> {
        self.require_open()?;
        let spec = id.spec();
        match spec.access {
            PropertyAccess::GetSet => {}
            PropertyAccess::Get => {
                return Err(Failure::new(FailureCode::NotSupported)
                    .with_detail(format!("{} is read-only", spec.key)));
            }
            PropertyAccess::Reserved => {
                return Err(Failure::new(FailureCode::NotSupported)
                    .with_detail(format!("{} requires set_property_reserved", spec.key)));
            }
        }

        let value = spec.normalize(value)?;
        match spec.code {
            Some(code) => {
                self.native(self.core.engine.set_property(self.core.handle, code, &value))?;
                self.core.lock().properties.insert(id, value.clone());
            }
            None => {
                let contrast = parse_contrast(&value)?;
                self.native(self.core.engine.set_contrast(self.core.handle, contrast))?;
            }
        }

        debug!(device = %self.core.device, property = spec.key, %value, "Property set");
        Ok(())
    }

    /// Write a reserved property, authorised by the reserved key
    pub fn set_property_reserved(
        &self,
        reserved_key: &str,
        id: PropertyId,
        value: &str,
    ) -> Result<(), Failure> {
        self.require_open()?;
        let spec = id.spec();
        let code = match (spec.access, spec.code) {
            (PropertyAccess::Reserved, Some(code)) => code,
            _ => {
                return Err(Failure::new(FailureCode::NotSupported)
                    .with_detail(format!("{} is not a reserved property", spec.key)));
            }
        };

        let value = spec.normalize(value)?;
        self.native(self.core.engine.set_property_reserved(
            self.core.handle,
            reserved_key,
            code,
            &value,
        ))?;
        self.core.lock().properties.insert(id, value);
        Ok(())
    }

    /// Read a property, from cache when it has been read or written before
    pub fn property(&self, id: PropertyId) -> Result<String, Failure> {
        self.require_open()?;
        let spec = id.spec();

        let Some(code) = spec.code else {
            return self.contrast().map(|n| n.to_string());
        };
        if let Some(value) = self.core.lock().properties.get(&id) {
            return Ok(value.clone());
        }

        let value = self.native(self.core.engine.get_property(self.core.handle, code))?;
        self.core.lock().properties.insert(id, value.clone());
        Ok(value)
    }

    /// Read a property by its table key
    pub fn property_by_key(&self, key: &str) -> Result<String, Failure> {
        self.property(lookup_key(key)?)
    }

    /// Write a property by its table key
    pub fn set_property_by_key(&self, key: &str, value: &str) -> Result<(), Failure> {
        self.set_property(lookup_key(key)?, value)
    }

    pub fn contrast(&self) -> Result<i32, Failure> {
        self.require_open()?;
        self.native(self.core.engine.contrast(self.core.handle))
    }

    pub fn set_contrast(&self, value: i32) -> Result<(), Failure> {
        self.set_property(PropertyId::Contrast, &value.to_string())
    }

    /// Re-read identity properties and store them in the registry
    pub fn refresh_descriptor(&self) -> Result<DeviceDescriptor, Failure> {
        let read = |id: PropertyId| match self.property(id) {
            Ok(value) if !value.is_empty() => Some(value),
            Ok(_) => None,
            Err(failure) => {
                debug!(device = %self.core.device, property = id.key(), %failure, "Property unavailable");
                None
            }
        };
        let firmware = read(PropertyId::Firmware);
        let revision = read(PropertyId::Revision);
        let serial = read(PropertyId::SerialNumber);
        let product = read(PropertyId::ProductId);

        self.core.registry.update_descriptor(self.core.device, |d| {
            if firmware.is_some() {
                d.firmware = firmware;
            }
            if revision.is_some() {
                d.revision = revision;
            }
            if serial.is_some() {
                d.serial_number = serial;
            }
            if product.is_some() {
                d.product_name = product;
            }
        });
        self.descriptor()
    }

    // ========================================================================
    // Device features
    // ========================================================================

    pub fn enable_event(&self, event: EventType, enable: bool) -> Result<(), Failure> {
        self.require_open()?;
        self.native(self.core.engine.enable_event(self.core.handle, event, enable))
    }

    /// NFIQ score, 1 (best) to 5
    pub fn calculate_nfiq(&self, image: &ImageFrame) -> Result<u8, Failure> {
        self.require_open()?;
        self.native(self.core.engine.calculate_nfiq(self.core.handle, image))
    }

    pub fn wsq_encode(&self, image: &ImageFrame, bitrate: f64) -> Result<Bytes, Failure> {
        self.native(self.core.engine.wsq_encode(image, bitrate))
    }

    pub fn wsq_decode(&self, data: &[u8]) -> Result<ImageFrame, Failure> {
        let raw = self.native(self.core.engine.wsq_decode(data))?;
        ImageFrame::try_from(raw).map_err(|e| {
            Failure::new(FailureCode::WsqDecodeFailed).with_detail(e.to_string())
        })
    }

    /// Merge two half-hand images into one
    pub fn combine_images(
        &self,
        first: &ImageFrame,
        second: &ImageFrame,
        hand: Hand,
    ) -> Result<ImageFrame, Failure> {
        self.require_open()?;
        let raw = self.native(self.core.engine.combine_images(
            self.core.handle,
            first,
            second,
            hand,
        ))?;
        ImageFrame::try_from(raw).map_err(|e| {
            Failure::new(FailureCode::CommandFailed).with_detail(e.to_string())
        })
    }

    pub fn operable_leds(&self) -> Result<LedState, Failure> {
        self.require_open()?;
        self.native(self.core.engine.operable_leds(self.core.handle))
    }

    pub fn leds(&self) -> Result<u32, Failure> {
        self.require_open()?;
        self.native(self.core.engine.leds(self.core.handle))
    }

    pub fn set_leds(&self, mask: u32) -> Result<(), Failure> {
        self.require_open()?;
        let operable = self.operable_leds()?;
        if mask & !operable.operable_mask != 0 {
            return Err(Failure::new(FailureCode::InvalidParamValue).with_detail(format!(
                "LED mask {:#x} outside operable {:#x}",
                mask, operable.operable_mask
            )));
        }
        self.native(self.core.engine.set_leds(self.core.handle, mask))
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.core.close();
    }
}

impl std::fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("device", &self.core.device)
            .field("handle", &self.core.handle)
            .field("state", &self.core.state())
            .finish()
    }
}

fn wrong_state(detail: &str) -> Failure {
    Failure::new(FailureCode::WrongState).with_detail(detail)
}

fn check_begin(state: SessionState) -> Result<(), Failure> {
    match state {
        SessionState::Open => Ok(()),
        SessionState::Capturing => Err(Failure::new(FailureCode::CaptureStillRunning)),
        SessionState::Closed => Err(wrong_state("session is closed")),
    }
}

fn check_running(state: SessionState) -> Result<(), Failure> {
    match state {
        SessionState::Capturing => Ok(()),
        SessionState::Open => Err(Failure::new(FailureCode::CaptureNotRunning)),
        SessionState::Closed => Err(wrong_state("session is closed")),
    }
}

fn lookup_key(key: &str) -> Result<PropertyId, Failure> {
    PropertyId::from_key(key).ok_or_else(|| {
        Failure::new(FailureCode::InvalidParamValue)
            .with_detail(format!("unknown property '{}'", key))
    })
}

fn parse_contrast(value: &str) -> Result<i32, Failure> {
    value.parse().map_err(|_| {
        Failure::new(FailureCode::InvalidParamValue)
            .with_detail(format!("contrast '{}' is not an integer", value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::FailureCategory;

    #[test]
    fn test_begin_state_rules() {
        assert!(check_begin(SessionState::Open).is_ok());
        assert_eq!(
            check_begin(SessionState::Capturing).unwrap_err().code,
            FailureCode::CaptureStillRunning
        );
        let closed = check_begin(SessionState::Closed).unwrap_err();
        assert_eq!(closed.code, FailureCode::WrongState);
        assert_eq!(closed.category(), FailureCategory::ParameterUsage);
    }

    #[test]
    fn test_running_state_rules() {
        assert!(check_running(SessionState::Capturing).is_ok());
        assert_eq!(
            check_running(SessionState::Open).unwrap_err().code,
            FailureCode::CaptureNotRunning
        );
        assert_eq!(
            check_running(SessionState::Closed).unwrap_err().code,
            FailureCode::WrongState
        );
    }

    #[test]
    fn test_lookup_key() {
        assert_eq!(lookup_key("contrast").unwrap(), PropertyId::Contrast);
        assert_eq!(
            lookup_key("NOPE").unwrap_err().code,
            FailureCode::InvalidParamValue
        );
    }
}
