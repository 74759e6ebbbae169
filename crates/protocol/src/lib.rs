//! Protocol library for fpscan
//!
//! This crate defines the data contract shared by every layer of the
//! scanner stack: device identifiers and descriptors, image frames, quality
//! snapshots, the native status code taxonomy, the device property table
//! and the typed session events. It performs no I/O.
//!
//! # Example
//!
//! ```
//! use protocol::{FailureCategory, FailureCode, translate};
//!
//! // Native status integers become typed failures
//! let failure = translate(-206).unwrap();
//! assert_eq!(failure.code, FailureCode::DeviceBusy);
//! assert_eq!(failure.category(), FailureCategory::Device);
//!
//! // Unrecognized codes degrade to a generic command failure
//! let unknown = translate(-9999).unwrap();
//! assert_eq!(unknown.code, FailureCode::CommandFailed);
//! assert_eq!(unknown.native, Some(-9999));
//! ```
//!
//! # Properties
//!
//! ```
//! use protocol::PropertyId;
//!
//! let spec = PropertyId::CaptureTimeout.spec();
//! assert_eq!(spec.normalize("60").unwrap(), "60");
//! assert!(spec.normalize("5").is_err());
//! ```

pub mod error;
pub mod events;
pub mod properties;
pub mod status;
pub mod types;

pub use error::{ProtocolError, Result};
pub use events::{CaptureOutcome, CaptureResult, SessionEvent};
pub use properties::{
    MAX_CONTRAST_VALUE, MIN_CONTRAST_VALUE, PROPERTY_TABLE, PROPERTY_TABLE_VERSION, PropertyAccess,
    PropertyId, PropertyKind, PropertySpec,
};
pub use status::{Failure, FailureCategory, FailureCode, translate};
pub use types::{
    CaptureOptions, DeviceDescriptor, DeviceId, EventType, FingerCountState, FingerQuality, Hand,
    ImageFrame, ImageResolution, ImageType, LedKind, LedState, NativeHandle, OpenState, Permission,
    PixelFormat, PlatenState, QualitySnapshot, RawImage, RollingData, RollingState,
    SegmentPosition, UsbDeviceEntry,
};
