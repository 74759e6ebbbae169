//! Scanner data model
//!
//! Identifiers, device descriptors, image frames, quality snapshots and the
//! capture enumerations shared by the registry, the capture session and the
//! session consumer. Every enumeration that arrives from the native engine
//! as an integer has a fallible `from_code` so that unrecognized values can
//! be dropped at the boundary instead of travelling through the system.

use crate::error::ProtocolError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Stable platform device identifier
///
/// Assigned by the USB access provider and stable for as long as the
/// device stays attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev-{:04x}", self.0)
    }
}

/// Handle the native engine returns for an opened device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NativeHandle(pub u32);

/// Raw enumeration record produced by the USB access provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbDeviceEntry {
    pub id: DeviceId,
    pub vendor_id: u16,
    pub product_id: u16,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
}

/// Access permission state for a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    #[default]
    Unknown,
    Granted,
    Denied,
}

/// Open state for a device, owned by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenState {
    #[default]
    Closed,
    Opening,
    Open,
}

/// One physical scanner as tracked by the device registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: DeviceId,
    pub vendor_id: u16,
    pub product_id: u16,
    pub serial_number: Option<String>,
    pub product_name: Option<String>,
    pub interface_type: String,
    pub firmware: Option<String>,
    pub revision: Option<String>,
    pub permission: Permission,
    pub open_state: OpenState,
}

impl DeviceDescriptor {
    /// Build a closed descriptor from an enumeration record
    pub fn from_entry(entry: &UsbDeviceEntry) -> Self {
        Self {
            id: entry.id,
            vendor_id: entry.vendor_id,
            product_id: entry.product_id,
            serial_number: entry.serial_number.clone(),
            product_name: entry.product.clone(),
            interface_type: "USB".to_string(),
            firmware: None,
            revision: None,
            permission: Permission::Unknown,
            open_state: OpenState::Closed,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open_state != OpenState::Closed
    }
}

/// Capture image type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageType {
    #[default]
    None,
    RollSingleFinger,
    FlatSingleFinger,
    FlatTwoFingers,
    FlatFourFingers,
    FlatThreeFingers,
}

impl ImageType {
    pub const ALL: [ImageType; 6] = [
        ImageType::None,
        ImageType::RollSingleFinger,
        ImageType::FlatSingleFinger,
        ImageType::FlatTwoFingers,
        ImageType::FlatFourFingers,
        ImageType::FlatThreeFingers,
    ];

    pub fn code(self) -> i32 {
        match self {
            ImageType::None => 0,
            ImageType::RollSingleFinger => 1,
            ImageType::FlatSingleFinger => 2,
            ImageType::FlatTwoFingers => 3,
            ImageType::FlatFourFingers => 4,
            ImageType::FlatThreeFingers => 5,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }

    /// Number of finger slots a capture of this type reports on
    pub fn finger_slots(self) -> usize {
        match self {
            ImageType::None => 0,
            ImageType::RollSingleFinger | ImageType::FlatSingleFinger => 1,
            ImageType::FlatTwoFingers => 2,
            ImageType::FlatThreeFingers => 3,
            ImageType::FlatFourFingers => 4,
        }
    }

    pub fn is_roll(self) -> bool {
        self == ImageType::RollSingleFinger
    }
}

impl std::str::FromStr for ImageType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "none" => Ok(ImageType::None),
            "roll_single_finger" | "roll" => Ok(ImageType::RollSingleFinger),
            "flat_single_finger" | "flat" => Ok(ImageType::FlatSingleFinger),
            "flat_two_fingers" => Ok(ImageType::FlatTwoFingers),
            "flat_three_fingers" => Ok(ImageType::FlatThreeFingers),
            "flat_four_fingers" => Ok(ImageType::FlatFourFingers),
            other => Err(ProtocolError::UnknownName {
                kind: "image type",
                name: other.to_string(),
            }),
        }
    }
}

/// Capture resolution in pixels per inch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum ImageResolution {
    #[default]
    Ppi500,
    Ppi1000,
}

impl ImageResolution {
    pub fn ppi(self) -> u32 {
        match self {
            ImageResolution::Ppi500 => 500,
            ImageResolution::Ppi1000 => 1000,
        }
    }

    pub fn from_ppi(ppi: u32) -> Option<Self> {
        match ppi {
            500 => Some(ImageResolution::Ppi500),
            1000 => Some(ImageResolution::Ppi1000),
            _ => None,
        }
    }
}

impl TryFrom<u32> for ImageResolution {
    type Error = ProtocolError;

    fn try_from(ppi: u32) -> Result<Self, Self::Error> {
        Self::from_ppi(ppi).ok_or(ProtocolError::UnknownCode {
            kind: "resolution",
            code: ppi as i64,
        })
    }
}

impl From<ImageResolution> for u32 {
    fn from(res: ImageResolution) -> Self {
        res.ppi()
    }
}

/// Capture option bitmask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CaptureOptions(pub u32);

impl CaptureOptions {
    pub const NONE: CaptureOptions = CaptureOptions(0);
    pub const AUTO_CONTRAST: CaptureOptions = CaptureOptions(1);
    pub const AUTO_CAPTURE: CaptureOptions = CaptureOptions(2);
    pub const IGNORE_FINGER_COUNT: CaptureOptions = CaptureOptions(4);

    const NAMES: [(&'static str, CaptureOptions); 3] = [
        ("auto_contrast", CaptureOptions::AUTO_CONTRAST),
        ("auto_capture", CaptureOptions::AUTO_CAPTURE),
        ("ignore_finger_count", CaptureOptions::IGNORE_FINGER_COUNT),
    ];

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: CaptureOptions) -> bool {
        self.0 & other.0 == other.0
    }

    /// Parse a list of option names such as `["auto_capture", "auto_contrast"]`
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, ProtocolError> {
        names.iter().try_fold(CaptureOptions::NONE, |acc, name| {
            let name = name.as_ref().trim().to_ascii_lowercase();
            Self::NAMES
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, flag)| acc | *flag)
                .ok_or(ProtocolError::UnknownName {
                    kind: "capture option",
                    name,
                })
        })
    }

    pub fn names(self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(_, flag)| self.contains(*flag))
            .map(|(n, _)| *n)
            .collect()
    }
}

impl std::ops::BitOr for CaptureOptions {
    type Output = CaptureOptions;

    fn bitor(self, rhs: Self) -> Self::Output {
        CaptureOptions(self.0 | rhs.0)
    }
}

/// Pixel layout of an image buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PixelFormat {
    #[default]
    Gray,
    Rgb24,
    Rgb32,
}

impl PixelFormat {
    pub fn code(self) -> i32 {
        match self {
            PixelFormat::Gray => 0,
            PixelFormat::Rgb24 => 1,
            PixelFormat::Rgb32 => 2,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(PixelFormat::Gray),
            1 => Some(PixelFormat::Rgb24),
            2 => Some(PixelFormat::Rgb32),
            _ => None,
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Gray => 1,
            PixelFormat::Rgb24 => 3,
            PixelFormat::Rgb32 => 4,
        }
    }
}

/// Image data exactly as delivered across the native boundary
///
/// Unvalidated; convert with `ImageFrame::try_from` before handing it to
/// anything typed.
#[derive(Debug, Clone, Default)]
pub struct RawImage {
    pub buffer: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub resolution_x: f64,
    pub resolution_y: f64,
    pub frame_time: f64,
    pub pitch: i32,
    pub bits_per_pixel: u8,
    pub format: i32,
    pub is_final: bool,
}

/// Immutable image produced by the native engine
///
/// The pixel buffer is reference counted, so cloning a frame never copies
/// pixel data.
#[derive(Clone, PartialEq)]
pub struct ImageFrame {
    buffer: Bytes,
    width: u32,
    height: u32,
    resolution_x: f64,
    resolution_y: f64,
    frame_time: Duration,
    pitch: i32,
    bits_per_pixel: u8,
    format: PixelFormat,
    is_final: bool,
}

impl ImageFrame {
    pub fn buffer(&self) -> &Bytes {
        &self.buffer
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn resolution(&self) -> (f64, f64) {
        (self.resolution_x, self.resolution_y)
    }

    /// Time the engine spent acquiring this frame
    pub fn frame_time(&self) -> Duration {
        self.frame_time
    }

    /// Line pitch in bytes; a negative pitch means rows are stored bottom-up
    pub fn pitch(&self) -> i32 {
        self.pitch
    }

    pub fn is_bottom_up(&self) -> bool {
        self.pitch < 0
    }

    pub fn bits_per_pixel(&self) -> u8 {
        self.bits_per_pixel
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// `false` for interim preview frames, `true` for terminal result frames
    pub fn is_final(&self) -> bool {
        self.is_final
    }

    /// Row `y` counted from the top of the image
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        if y >= self.height {
            return None;
        }
        let stride = self.pitch.unsigned_abs() as usize;
        let line = if self.is_bottom_up() {
            (self.height - 1 - y) as usize
        } else {
            y as usize
        };
        let start = line * stride;
        let len = self.width as usize * self.format.bytes_per_pixel();
        self.buffer.get(start..start + len)
    }
}

impl fmt::Debug for ImageFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("resolution", &(self.resolution_x, self.resolution_y))
            .field("format", &self.format)
            .field("pitch", &self.pitch)
            .field("bytes", &self.buffer.len())
            .field("is_final", &self.is_final)
            .finish()
    }
}

impl TryFrom<RawImage> for ImageFrame {
    type Error = ProtocolError;

    fn try_from(raw: RawImage) -> Result<Self, Self::Error> {
        let format = PixelFormat::from_code(raw.format).ok_or(ProtocolError::UnknownCode {
            kind: "pixel format",
            code: raw.format as i64,
        })?;

        let min_stride = raw.width as usize * format.bytes_per_pixel();
        let stride = raw.pitch.unsigned_abs() as usize;
        if stride < min_stride {
            return Err(ProtocolError::InvalidImage(format!(
                "pitch {} shorter than row of {} bytes",
                raw.pitch, min_stride
            )));
        }

        let needed = stride.checked_mul(raw.height as usize).ok_or_else(|| {
            ProtocolError::InvalidImage(format!("{}x{} with pitch {} overflows", raw.width, raw.height, raw.pitch))
        })?;
        if raw.buffer.len() < needed {
            return Err(ProtocolError::InvalidImage(format!(
                "buffer holds {} bytes, {}x{} with pitch {} needs {}",
                raw.buffer.len(),
                raw.width,
                raw.height,
                raw.pitch,
                needed
            )));
        }

        // Negative, non-finite or out-of-range measurements read as zero
        let frame_time = Duration::try_from_secs_f64(raw.frame_time).unwrap_or(Duration::ZERO);

        Ok(Self {
            buffer: Bytes::from(raw.buffer),
            width: raw.width,
            height: raw.height,
            resolution_x: raw.resolution_x,
            resolution_y: raw.resolution_y,
            frame_time,
            pitch: raw.pitch,
            bits_per_pixel: raw.bits_per_pixel,
            format,
            is_final: raw.is_final,
        })
    }
}

impl From<&ImageFrame> for RawImage {
    fn from(frame: &ImageFrame) -> Self {
        RawImage {
            buffer: frame.buffer.to_vec(),
            width: frame.width,
            height: frame.height,
            resolution_x: frame.resolution_x,
            resolution_y: frame.resolution_y,
            frame_time: frame.frame_time.as_secs_f64(),
            pitch: frame.pitch,
            bits_per_pixel: frame.bits_per_pixel,
            format: frame.format.code(),
            is_final: frame.is_final,
        }
    }
}

/// Quality classification of one finger slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerQuality {
    #[default]
    NotPresent,
    Good,
    Fair,
    Poor,
    InvalidAreaTop,
    InvalidAreaLeft,
    InvalidAreaRight,
    InvalidAreaBottom,
}

impl FingerQuality {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(FingerQuality::NotPresent),
            1 => Some(FingerQuality::Good),
            2 => Some(FingerQuality::Fair),
            3 => Some(FingerQuality::Poor),
            4 => Some(FingerQuality::InvalidAreaTop),
            5 => Some(FingerQuality::InvalidAreaLeft),
            6 => Some(FingerQuality::InvalidAreaRight),
            7 => Some(FingerQuality::InvalidAreaBottom),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            FingerQuality::NotPresent => 0,
            FingerQuality::Good => 1,
            FingerQuality::Fair => 2,
            FingerQuality::Poor => 3,
            FingerQuality::InvalidAreaTop => 4,
            FingerQuality::InvalidAreaLeft => 5,
            FingerQuality::InvalidAreaRight => 6,
            FingerQuality::InvalidAreaBottom => 7,
        }
    }

    pub fn is_invalid_area(self) -> bool {
        matches!(
            self,
            FingerQuality::InvalidAreaTop
                | FingerQuality::InvalidAreaLeft
                | FingerQuality::InvalidAreaRight
                | FingerQuality::InvalidAreaBottom
        )
    }
}

impl std::str::FromStr for FingerQuality {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "not_present" => Ok(FingerQuality::NotPresent),
            "good" => Ok(FingerQuality::Good),
            "fair" => Ok(FingerQuality::Fair),
            "poor" => Ok(FingerQuality::Poor),
            "invalid_area_top" => Ok(FingerQuality::InvalidAreaTop),
            "invalid_area_left" => Ok(FingerQuality::InvalidAreaLeft),
            "invalid_area_right" => Ok(FingerQuality::InvalidAreaRight),
            "invalid_area_bottom" => Ok(FingerQuality::InvalidAreaBottom),
            other => Err(ProtocolError::UnknownName {
                kind: "finger quality",
                name: other.to_string(),
            }),
        }
    }
}

/// Finger count classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerCountState {
    #[default]
    Ok,
    TooMany,
    TooFew,
    NonFinger,
}

impl FingerCountState {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(FingerCountState::Ok),
            1 => Some(FingerCountState::TooMany),
            2 => Some(FingerCountState::TooFew),
            3 => Some(FingerCountState::NonFinger),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            FingerCountState::Ok => 0,
            FingerCountState::TooMany => 1,
            FingerCountState::TooFew => 2,
            FingerCountState::NonFinger => 3,
        }
    }
}

/// Per-finger quality plus the finger count classification
///
/// Always replaced as a whole value; a session never edits one slot of a
/// snapshot in place.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QualitySnapshot {
    fingers: Vec<FingerQuality>,
    count: FingerCountState,
}

impl QualitySnapshot {
    pub fn new(fingers: Vec<FingerQuality>, count: FingerCountState) -> Self {
        Self { fingers, count }
    }

    pub fn fingers(&self) -> &[FingerQuality] {
        &self.fingers
    }

    pub fn count(&self) -> FingerCountState {
        self.count
    }

    /// Copy of this snapshot with a new finger count classification
    pub fn with_count(&self, count: FingerCountState) -> Self {
        Self {
            fingers: self.fingers.clone(),
            count,
        }
    }

    /// Quality of the first finger actually on the platen
    pub fn primary(&self) -> FingerQuality {
        self.fingers
            .iter()
            .copied()
            .find(|q| *q != FingerQuality::NotPresent)
            .unwrap_or(FingerQuality::NotPresent)
    }

    /// Worst quality among present fingers
    pub fn worst(&self) -> FingerQuality {
        let rank = |q: &FingerQuality| match q {
            FingerQuality::Good => 0,
            FingerQuality::Fair => 1,
            FingerQuality::Poor => 2,
            _ => 3,
        };
        self.fingers
            .iter()
            .filter(|q| **q != FingerQuality::NotPresent)
            .max_by_key(|q| rank(q))
            .copied()
            .unwrap_or(FingerQuality::NotPresent)
    }

    pub fn is_empty(&self) -> bool {
        self.fingers.iter().all(|q| *q == FingerQuality::NotPresent)
    }
}

/// Whether anything is touching the platen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatenState {
    #[default]
    Cleared,
    HasFingers,
}

impl PlatenState {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(PlatenState::Cleared),
            1 => Some(PlatenState::HasFingers),
            _ => None,
        }
    }
}

/// Progress of a rolled capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollingState {
    #[default]
    NotPresent,
    TakeAcquisition,
    CompleteAcquisition,
    ResultImage,
}

impl RollingState {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(RollingState::NotPresent),
            1 => Some(RollingState::TakeAcquisition),
            2 => Some(RollingState::CompleteAcquisition),
            3 => Some(RollingState::ResultImage),
            _ => None,
        }
    }
}

/// Rolling state plus the x coordinate of the roll line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RollingData {
    pub state: RollingState,
    pub line_x: i32,
}

/// Four vertices of one finger segment in result image coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SegmentPosition {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    pub x3: i32,
    pub y3: i32,
    pub x4: i32,
    pub y4: i32,
}

/// Native event kinds, used for per-device event masking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    CommunicationBroken,
    PreviewImage,
    AcquisitionBegun,
    AcquisitionCompleted,
    ResultImage,
    FingerQuality,
    FingerCount,
    PlatenState,
    Warning,
    ResultImageExtended,
    KeyButton,
}

impl EventType {
    pub fn code(self) -> i32 {
        match self {
            EventType::CommunicationBroken => 1,
            EventType::PreviewImage => 2,
            EventType::AcquisitionBegun => 3,
            EventType::AcquisitionCompleted => 4,
            EventType::ResultImage => 5,
            EventType::FingerQuality => 6,
            EventType::FingerCount => 7,
            EventType::PlatenState => 9,
            EventType::Warning => 11,
            EventType::ResultImageExtended => 12,
            EventType::KeyButton => 13,
        }
    }
}

/// Which hand a pair of combined images belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Hand {
    Left,
    Right,
}

impl Hand {
    pub fn code(self) -> i32 {
        match self {
            Hand::Left => 0,
            Hand::Right => 1,
        }
    }
}

/// LED hardware a scanner exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LedKind {
    #[default]
    None,
    /// Two-finger scanner LED layout
    Tscan,
    /// Four-finger scanner LED layout
    Fscan,
}

/// Operable LED description: hardware kind, LED count and the usable bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LedState {
    pub kind: LedKind,
    pub count: u32,
    pub operable_mask: u32,
}
