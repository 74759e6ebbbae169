//! Native engine boundary
//!
//! The image-processing engine is an opaque collaborator: it owns the
//! device protocol, segmentation, quality scoring and compression. The core
//! drives it through [`NativeEngine`] requests, each of which either
//! succeeds or reports a native status integer, and receives its
//! asynchronous notifications through the [`CallbackSink`] registered once
//! at startup.
//!
//! Implementations must be callable from any thread. Callbacks may be
//! issued from engine-owned threads at any time, including while a request
//! is still in progress.

use crate::dispatch::CallbackSink;
use crate::usb::TransportHandle;
use bytes::Bytes;
use protocol::{
    CaptureOptions, EventType, Hand, ImageFrame, ImageResolution, ImageType, LedState,
    NativeHandle, RawImage, SegmentPosition,
};
use std::path::PathBuf;

/// Request outcome: the value, or the native status the engine reported
pub type NativeResult<T> = Result<T, i32>;

/// Engine and firmware version strings
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct SdkVersion {
    pub product: String,
    pub file: String,
}

/// Device description as reported by the engine for an index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NativeDeviceDescription {
    pub serial_number: String,
    pub product_name: String,
    pub interface_type: String,
    pub firmware: String,
    pub revision: String,
    pub is_open: bool,
    pub is_locked: bool,
    pub customer_string: String,
    pub device_id: u32,
}

/// Parameters handed to the engine when opening a device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenOptions {
    /// Uniformity mask file the engine loads for the device, if any
    pub uniformity_mask_path: Option<PathBuf>,
}

impl OpenOptions {
    pub fn with_uniformity_mask(path: impl Into<PathBuf>) -> Self {
        Self {
            uniformity_mask_path: Some(path.into()),
        }
    }
}

/// Roll progress as reported by the engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawRollingInfo {
    pub state: i32,
    /// X coordinate of the roll line, negative when there is none
    pub line_x: i32,
}

/// Plain result payload as delivered by the engine
#[derive(Debug, Clone, Default)]
pub struct RawCaptureResult {
    pub image: RawImage,
    pub image_type: i32,
    pub split_images: Vec<RawImage>,
}

/// Extended result payload as delivered by the engine
#[derive(Debug, Clone, Default)]
pub struct RawExtendedResult {
    /// Per-capture status: zero, a warning (positive) or an error (negative)
    pub status: i32,
    pub image: RawImage,
    pub image_type: i32,
    pub detected_finger_count: i32,
    pub segments: Vec<RawImage>,
    pub positions: Vec<SegmentPosition>,
}

/// Request surface of the native engine
pub trait NativeEngine: Send + Sync {
    /// Install the callback handler set; called exactly once per process
    fn register_callbacks(&self, sink: CallbackSink);

    fn sdk_version(&self) -> NativeResult<SdkVersion>;

    fn device_count(&self) -> NativeResult<usize>;

    fn device_description(&self, index: usize) -> NativeResult<NativeDeviceDescription>;

    /// Human-readable text for a status code
    fn error_string(&self, status: i32) -> NativeResult<String>;

    /// Open a device, blocking until done
    ///
    /// Progress is reported through [`CallbackSink::init_progress`] before
    /// this returns.
    fn open_device(
        &self,
        index: usize,
        transport: &TransportHandle,
        options: &OpenOptions,
    ) -> NativeResult<NativeHandle>;

    /// Start opening a device and return immediately
    ///
    /// Completion is reported through [`CallbackSink::open_complete`].
    fn open_device_async(
        &self,
        index: usize,
        transport: &TransportHandle,
        options: &OpenOptions,
    ) -> NativeResult<()>;

    fn close_device(&self, handle: NativeHandle) -> NativeResult<()>;

    fn set_property(&self, handle: NativeHandle, code: i32, value: &str) -> NativeResult<()>;

    fn get_property(&self, handle: NativeHandle, code: i32) -> NativeResult<String>;

    fn set_property_reserved(
        &self,
        handle: NativeHandle,
        reserved_key: &str,
        code: i32,
        value: &str,
    ) -> NativeResult<()>;

    fn is_capture_available(
        &self,
        handle: NativeHandle,
        image_type: ImageType,
        resolution: ImageResolution,
    ) -> NativeResult<bool>;

    fn begin_capture(
        &self,
        handle: NativeHandle,
        image_type: ImageType,
        resolution: ImageResolution,
        options: CaptureOptions,
    ) -> NativeResult<()>;

    fn cancel_capture(&self, handle: NativeHandle) -> NativeResult<()>;

    fn capture_manually(&self, handle: NativeHandle) -> NativeResult<()>;

    fn is_capture_active(&self, handle: NativeHandle) -> NativeResult<bool>;

    /// Roll state and line position of the running capture
    fn rolling_info(&self, handle: NativeHandle) -> NativeResult<RawRollingInfo>;

    fn contrast(&self, handle: NativeHandle) -> NativeResult<i32>;

    fn set_contrast(&self, handle: NativeHandle, value: i32) -> NativeResult<()>;

    fn enable_event(&self, handle: NativeHandle, event: EventType, enable: bool)
    -> NativeResult<()>;

    fn calculate_nfiq(&self, handle: NativeHandle, image: &ImageFrame) -> NativeResult<u8>;

    fn wsq_encode(&self, image: &ImageFrame, bitrate: f64) -> NativeResult<Bytes>;

    fn wsq_decode(&self, data: &[u8]) -> NativeResult<RawImage>;

    fn combine_images(
        &self,
        handle: NativeHandle,
        first: &ImageFrame,
        second: &ImageFrame,
        hand: Hand,
    ) -> NativeResult<RawImage>;

    fn operable_leds(&self, handle: NativeHandle) -> NativeResult<LedState>;

    fn leds(&self, handle: NativeHandle) -> NativeResult<u32>;

    fn set_leds(&self, handle: NativeHandle, mask: u32) -> NativeResult<()>;
}
