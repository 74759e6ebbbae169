//! Session events
//!
//! Typed notifications delivered to the session consumer, in the order the
//! native engine produced them. Every capture cycle ends with exactly one
//! [`SessionEvent::CaptureFinished`].

use crate::status::Failure;
use crate::types::{
    FingerCountState, ImageFrame, ImageType, PlatenState, QualitySnapshot, SegmentPosition,
};

/// Result images of a successful capture
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureResult {
    Plain {
        image: ImageFrame,
        image_type: ImageType,
        split_images: Vec<ImageFrame>,
        quality: QualitySnapshot,
        warnings: Vec<Failure>,
    },
    Extended {
        image: ImageFrame,
        image_type: ImageType,
        detected_finger_count: u32,
        segments: Vec<ImageFrame>,
        positions: Vec<SegmentPosition>,
        quality: QualitySnapshot,
        warnings: Vec<Failure>,
    },
}

impl CaptureResult {
    pub fn image(&self) -> &ImageFrame {
        match self {
            CaptureResult::Plain { image, .. } | CaptureResult::Extended { image, .. } => image,
        }
    }

    pub fn image_type(&self) -> ImageType {
        match self {
            CaptureResult::Plain { image_type, .. }
            | CaptureResult::Extended { image_type, .. } => *image_type,
        }
    }

    /// Quality snapshot in effect when the result was delivered
    pub fn quality(&self) -> &QualitySnapshot {
        match self {
            CaptureResult::Plain { quality, .. } | CaptureResult::Extended { quality, .. } => {
                quality
            }
        }
    }

    /// Warnings received during the capture cycle
    pub fn warnings(&self) -> &[Failure] {
        match self {
            CaptureResult::Plain { warnings, .. } | CaptureResult::Extended { warnings, .. } => {
                warnings
            }
        }
    }

    /// Per-finger images: split images or segments depending on the variant
    pub fn finger_images(&self) -> &[ImageFrame] {
        match self {
            CaptureResult::Plain { split_images, .. } => split_images,
            CaptureResult::Extended { segments, .. } => segments,
        }
    }

    pub(crate) fn set_context(&mut self, snapshot: QualitySnapshot, extra: Vec<Failure>) {
        match self {
            CaptureResult::Plain {
                quality, warnings, ..
            }
            | CaptureResult::Extended {
                quality, warnings, ..
            } => {
                *quality = snapshot;
                // cycle warnings first, then any carried by the result itself
                let own = std::mem::take(warnings);
                *warnings = extra;
                warnings.extend(own);
            }
        }
    }
}

/// How a capture cycle ended
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    Completed(CaptureResult),
    /// Cancelled on request; carries the frame current at cancellation
    Cancelled(ImageFrame),
    Failed(Failure),
}

impl CaptureOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CaptureOutcome::Completed(_))
    }

    /// Attach the cycle's final quality and warnings to a completed result
    pub fn with_context(mut self, quality: QualitySnapshot, warnings: Vec<Failure>) -> Self {
        if let CaptureOutcome::Completed(result) = &mut self {
            result.set_context(quality, warnings);
        }
        self
    }
}

/// Notification delivered to the session consumer
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    CommunicationBroken,
    PreviewAvailable(ImageFrame),
    FingerCountChanged(FingerCountState),
    FingerQualityChanged(QualitySnapshot),
    AcquisitionBegun(ImageType),
    AcquisitionCompleted(ImageType),
    PlatenStateChanged(PlatenState),
    WarningReceived(Failure),
    KeyButtonPressed(u32),
    CaptureFinished(CaptureOutcome),
}

impl SessionEvent {
    /// Terminal events end a capture cycle
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionEvent::CaptureFinished(_))
    }

    /// Progress events only make sense inside an active capture cycle
    pub fn is_capture_progress(&self) -> bool {
        matches!(
            self,
            SessionEvent::PreviewAvailable(_)
                | SessionEvent::FingerCountChanged(_)
                | SessionEvent::FingerQualityChanged(_)
                | SessionEvent::AcquisitionBegun(_)
                | SessionEvent::AcquisitionCompleted(_)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::CommunicationBroken => "communication_broken",
            SessionEvent::PreviewAvailable(_) => "preview_available",
            SessionEvent::FingerCountChanged(_) => "finger_count_changed",
            SessionEvent::FingerQualityChanged(_) => "finger_quality_changed",
            SessionEvent::AcquisitionBegun(_) => "acquisition_begun",
            SessionEvent::AcquisitionCompleted(_) => "acquisition_completed",
            SessionEvent::PlatenStateChanged(_) => "platen_state_changed",
            SessionEvent::WarningReceived(_) => "warning_received",
            SessionEvent::KeyButtonPressed(_) => "key_button_pressed",
            SessionEvent::CaptureFinished(_) => "capture_finished",
        }
    }
}
