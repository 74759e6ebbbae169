//! Device property registry
//!
//! The native engine configures devices through string-valued properties
//! addressed by integer id. The table below is the complete, versioned list
//! of recognized properties together with their direction, value kind,
//! valid range and default. Sessions validate every write against it, and
//! consumers can enumerate it through [`PROPERTY_TABLE`] instead of relying
//! on magic numbers.

use crate::error::ProtocolError;
use crate::status::{Failure, FailureCode};
use serde::Serialize;
use std::fmt;

/// Version of the property table layout
pub const PROPERTY_TABLE_VERSION: u32 = 1;

/// Contrast bounds used by the virtual `CONTRAST` property
pub const MIN_CONTRAST_VALUE: i64 = 0;
pub const MAX_CONTRAST_VALUE: i64 = 34;

/// Which requests a property accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyAccess {
    /// Read-only
    Get,
    /// Read and write through the regular property request
    GetSet,
    /// Write only through the reserved-key property request
    Reserved,
}

/// Value shape and range of a property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum PropertyKind {
    Text,
    /// Integer with no documented range
    Integer,
    /// Integer within `min..=max`
    Range { min: i64, max: i64 },
    /// `-1` (infinite) or seconds within `min..=max`
    Timeout { min: i64, max: i64 },
    /// `TRUE` or `FALSE`
    Bool,
    /// `count` space-separated integers, each within `min..=max`
    List { count: usize, min: i64, max: i64 },
}

const fn range(min: i64, max: i64) -> PropertyKind {
    PropertyKind::Range { min, max }
}

const fn list(count: usize, min: i64, max: i64) -> PropertyKind {
    PropertyKind::List { count, min, max }
}

const TEXT: PropertyKind = PropertyKind::Text;
const INT: PropertyKind = PropertyKind::Integer;
const BOOL: PropertyKind = PropertyKind::Bool;

/// One row of the property table
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PropertySpec {
    pub id: PropertyId,
    /// Key as used in configuration files and by consumers
    pub key: &'static str,
    /// Native property id; `None` for virtual properties routed elsewhere
    pub code: Option<i32>,
    pub access: PropertyAccess,
    pub kind: PropertyKind,
    pub default: Option<&'static str>,
    pub description: &'static str,
}

macro_rules! property_table {
    ($( $variant:ident = $key:literal, $code:expr, $access:ident, $kind:expr, $default:expr, $text:literal; )*) => {
        /// Recognized property identifiers
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        pub enum PropertyId {
            $( $variant, )*
        }

        /// The full property table, in `PropertyId` order
        pub static PROPERTY_TABLE: &[PropertySpec] = &[
            $(
                PropertySpec {
                    id: PropertyId::$variant,
                    key: $key,
                    code: $code,
                    access: PropertyAccess::$access,
                    kind: $kind,
                    default: $default,
                    description: $text,
                },
            )*
        ];
    };
}

property_table! {
    ProductId = "PRODUCT_ID", Some(0), Get, TEXT, None, "Product name";
    SerialNumber = "SERIAL_NUMBER", Some(1), Get, TEXT, None, "Serial number";
    VendorId = "VENDOR_ID", Some(2), Get, TEXT, None, "Vendor name";
    IbiaVendorId = "IBIA_VENDOR_ID", Some(3), Get, TEXT, None, "IBIA vendor id";
    IbiaVersion = "IBIA_VERSION", Some(4), Get, TEXT, None, "IBIA version";
    IbiaDeviceId = "IBIA_DEVICE_ID", Some(5), Get, TEXT, None, "IBIA device id";
    Firmware = "FIRMWARE", Some(6), Get, TEXT, None, "Firmware version";
    Revision = "REVISION", Some(7), Get, TEXT, None, "Device revision";
    ProductionDate = "PRODUCTION_DATE", Some(8), Get, TEXT, None, "Production date";
    ServiceDate = "SERVICE_DATE", Some(9), Get, TEXT, None, "Last service date";
    ImageWidth = "IMAGE_WIDTH", Some(10), Get, INT, None, "Image width in pixels";
    ImageHeight = "IMAGE_HEIGHT", Some(11), Get, INT, None, "Image height in pixels";
    IgnoreFingerTime = "IGNORE_FINGER_TIME", Some(12), GetSet, range(2000, 10000), Some("4000"),
        "Milliseconds before a resting finger is ignored";
    RecommendedLevel = "RECOMMENDED_LEVEL", Some(13), GetSet, INT, None, "Recommended contrast level";
    PollingTimeToBGetImage = "POLLINGTIME_TO_BGETIMAGE", Some(14), Get, INT, None,
        "Polling interval for image retrieval";
    EnablePowerSaveMode = "ENABLE_POWER_SAVE_MODE", Some(15), GetSet, BOOL, Some("FALSE"),
        "Power save mode";
    RetryWrongCommunication = "RETRY_WRONG_COMMUNICATION", Some(16), GetSet, range(1, 120), Some("6"),
        "Retry count for failed communication";
    CaptureTimeout = "CAPTURE_TIMEOUT", Some(17), GetSet, PropertyKind::Timeout { min: 10, max: 3600 },
        Some("-1"), "Capture timeout in seconds, -1 for none";
    RollMinWidth = "ROLL_MIN_WIDTH", Some(18), GetSet, range(10, 30), Some("15"),
        "Minimum rolled width in millimetres";
    RollMode = "ROLL_MODE", Some(19), GetSet, range(0, 1), Some("1"), "Roll mode";
    RollLevel = "ROLL_LEVEL", Some(20), GetSet, range(0, 2), Some("1"), "Roll level";
    CaptureAreaThreshold = "CAPTURE_AREA_THRESHOLD", Some(21), GetSet, range(0, 12), Some("6"),
        "Capture area threshold";
    EnableDecimation = "ENABLE_DECIMATION", Some(22), GetSet, BOOL, Some("FALSE"),
        "Preview decimation";
    EnableCaptureOnRelease = "ENABLE_CAPTURE_ON_RELEASE", Some(23), GetSet, BOOL, Some("FALSE"),
        "Capture when fingers are released";
    DeviceIndex = "DEVICE_INDEX", Some(24), Get, INT, None, "Device index";
    DeviceIdent = "DEVICE_ID", Some(25), Get, INT, None, "Platform device id";
    SuperDryMode = "SUPER_DRY_MODE", Some(26), GetSet, BOOL, Some("FALSE"), "Super dry finger mode";
    MinCaptureTimeInSuperDryMode = "MIN_CAPTURE_TIME_IN_SUPER_DRY_MODE", Some(27), GetSet,
        range(600, 3000), Some("2000"), "Minimum capture time in super dry mode, milliseconds";
    RolledImageWidth = "ROLLED_IMAGE_WIDTH", Some(28), Get, INT, None, "Rolled image width";
    RolledImageHeight = "ROLLED_IMAGE_HEIGHT", Some(29), Get, INT, None, "Rolled image height";
    NoPreviewImage = "NO_PREVIEW_IMAGE", Some(30), GetSet, BOOL, Some("TRUE"),
        "Suppress preview images";
    RollImageOverride = "ROLL_IMAGE_OVERRIDE", Some(31), GetSet, BOOL, Some("FALSE"),
        "Overlay rolled image";
    WarningMessageInvalidArea = "WARNING_MESSAGE_INVALID_AREA", Some(32), GetSet, BOOL,
        Some("FALSE"), "Warn when fingers leave the capture area";
    EnableWetFingerDetect = "ENABLE_WET_FINGER_DETECT", Some(33), GetSet, BOOL, Some("FALSE"),
        "Wet finger detection";
    WetFingerDetectLevel = "WET_FINGER_DETECT_LEVEL", Some(34), GetSet, range(1, 5), Some("3"),
        "Wet finger detection level";
    WetFingerDetectLevelThreshold = "WET_FINGER_DETECT_LEVEL_THRESHOLD", Some(35), GetSet,
        list(5, 10, 1000), Some("50 100 150 200 250"), "Wet finger thresholds per level";
    StartPositionOfRollingArea = "START_POSITION_OF_ROLLING_AREA", Some(36), GetSet, range(0, 9),
        Some("0"), "Start position of rolling area";
    StartRollWithoutLock = "START_ROLL_WITHOUT_LOCK", Some(37), GetSet, BOOL, Some("FALSE"),
        "Start roll without lock";
    EnableTof = "ENABLE_TOF", Some(38), GetSet, BOOL, None, "TOF sensor";
    EnableEncryption = "ENABLE_ENCRYPTION", Some(39), GetSet, BOOL, Some("FALSE"),
        "Image encryption";
    IsSpoofSupported = "IS_SPOOF_SUPPORTED", Some(40), Get, BOOL, None,
        "Spoof detection available";
    EnableSpoof = "ENABLE_SPOOF", Some(41), GetSet, BOOL, Some("FALSE"), "Spoof detection";
    SpoofLevel = "SPOOF_LEVEL", Some(42), GetSet, range(0, 10), Some("5"), "Spoof detection level";
    ViewEncryptionImageMode = "VIEW_ENCRYPTION_IMAGE_MODE", Some(43), GetSet, BOOL, Some("FALSE"),
        "Show encrypted images";
    FingerprintSegmentationMode = "FINGERPRINT_SEGMENTATION_MODE", Some(44), GetSet, INT, Some("0"),
        "Segmentation mode";
    RollMethod = "ROLL_METHOD", Some(45), GetSet, INT, Some("0"), "Roll method";
    RenewalOppositeImageLevel = "RENEWAL_OPPOSITE_IMGAE_LEVEL", Some(46), GetSet, range(0, 3),
        Some("0"), "Opposite image renewal level";
    PreviewImageQualityForKojak = "PREVIEW_IMAGE_QUALITY_FOR_KOJAK", Some(47), GetSet, range(0, 1),
        Some("0"), "Preview image quality on Kojak";
    AdaptiveCaptureMode = "ADAPTIVE_CAPTURE_MODE", Some(48), GetSet, BOOL, Some("FALSE"),
        "Adaptive capture";
    EnableKojakBehavior26 = "ENABLE_KOJAK_BEHAVIOR_2_6", Some(49), GetSet, BOOL, Some("FALSE"),
        "Kojak 2.6 behaviour";
    VerticalDirectionSegment = "VERTICAL_DIRECTION_SEGMENT", Some(50), GetSet, BOOL, Some("FALSE"),
        "Vertical segmentation";
    Reserved1 = "RESERVED_1", Some(200), Get, TEXT, None, "Reserved";
    Reserved2 = "RESERVED_2", Some(201), Get, TEXT, None, "Reserved";
    Reserved100 = "RESERVED_100", Some(202), Get, TEXT, None, "Reserved";
    ReservedImageProcessThreshold = "RESERVED_IMAGE_PROCESS_THRESHOLD", Some(400), Reserved,
        range(0, 2), Some("0"), "Image processing threshold";
    ReservedEnableTofForRoll = "RESERVED_ENABLE_TOF_FOR_ROLL", Some(401), Reserved, BOOL,
        Some("FALSE"), "TOF for rolled captures";
    ReservedCaptureBrightnessThresholdForFlat = "RESERVED_CAPTURE_BRIGHTNESS_THRESHOLD_FOR_FLAT",
        Some(402), Reserved, INT, None, "Brightness threshold for flat captures";
    ReservedCaptureBrightnessThresholdForRoll = "RESERVED_CAPTURE_BRIGHTNESS_THRESHOLD_FOR_ROLL",
        Some(403), Reserved, INT, None, "Brightness threshold for rolled captures";
    ReservedEnhancedResultImage = "RESERVED_ENHANCED_RESULT_IMAGE", Some(404), Reserved, BOOL,
        Some("FALSE"), "Enhanced result image";
    ReservedEnhancedResultImageLevel = "RESERVED_ENHANCED_RESULT_IMAGE_LEVEL", Some(405), Reserved,
        range(0, 5), Some("0"), "Enhanced result image level";
    ReservedEnableSlipDetection = "RESERVED_ENABLE_SLIP_DETECTION", Some(406), Reserved, BOOL,
        Some("FALSE"), "Slip detection";
    ReservedSlipDetectionLevel = "RESERVED_SLIP_DETECTION_LEVEL", Some(407), Reserved,
        range(1, 10), Some("3"), "Slip detection level";
    ReservedEnableTrickCapture = "RESERVED_ENABLE_TRICK_CAPTURE", Some(408), Reserved, BOOL,
        Some("TRUE"), "Trick capture";
    ReservedSpoofLevelThreshold = "RESERVED_SPOOF_LEVEL_THRESHOLD", Some(409), Reserved,
        list(5, 0, 1000), Some("457 619 782 857 933"), "Spoof thresholds per level";
    Contrast = "CONTRAST", None, GetSet, range(MIN_CONTRAST_VALUE, MAX_CONTRAST_VALUE), None,
        "Contrast, routed to the contrast request";
}

impl PropertyId {
    pub fn spec(self) -> &'static PropertySpec {
        &PROPERTY_TABLE[self as usize]
    }

    pub fn key(self) -> &'static str {
        self.spec().key
    }

    /// Look up a property by key, case-insensitively
    pub fn from_key(key: &str) -> Option<Self> {
        let key = key.trim();
        PROPERTY_TABLE
            .iter()
            .find(|spec| spec.key.eq_ignore_ascii_case(key))
            .map(|spec| spec.id)
    }

    pub fn from_code(code: i32) -> Option<Self> {
        PROPERTY_TABLE
            .iter()
            .find(|spec| spec.code == Some(code))
            .map(|spec| spec.id)
    }

    pub fn is_writable(self) -> bool {
        self.spec().access != PropertyAccess::Get
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl std::str::FromStr for PropertyId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_key(s).ok_or_else(|| ProtocolError::UnknownProperty(s.to_string()))
    }
}

impl PropertySpec {
    /// Validate a value against this property's kind and range
    ///
    /// Returns the canonical rendering of the value: integers without
    /// padding, booleans as `TRUE`/`FALSE`, lists single-space separated.
    pub fn normalize(&self, value: &str) -> Result<String, Failure> {
        let value = value.trim();
        let invalid = |why: String| {
            Failure::new(FailureCode::InvalidParamValue)
                .with_detail(format!("{}: {}", self.key, why))
        };

        match self.kind {
            PropertyKind::Text => Ok(value.to_string()),
            PropertyKind::Integer => parse_int(value)
                .map(|n| n.to_string())
                .ok_or_else(|| invalid(format!("'{}' is not an integer", value))),
            PropertyKind::Range { min, max } => {
                let n = parse_int(value)
                    .ok_or_else(|| invalid(format!("'{}' is not an integer", value)))?;
                if (min..=max).contains(&n) {
                    Ok(n.to_string())
                } else {
                    Err(invalid(format!("{} outside {}..={}", n, min, max)))
                }
            }
            PropertyKind::Timeout { min, max } => {
                let n = parse_int(value)
                    .ok_or_else(|| invalid(format!("'{}' is not an integer", value)))?;
                if n == -1 || (min..=max).contains(&n) {
                    Ok(n.to_string())
                } else {
                    Err(invalid(format!("{} is neither -1 nor within {}..={}", n, min, max)))
                }
            }
            PropertyKind::Bool => parse_bool(value)
                .map(|b| if b { "TRUE" } else { "FALSE" }.to_string())
                .ok_or_else(|| invalid(format!("'{}' is not TRUE or FALSE", value))),
            PropertyKind::List { count, min, max } => {
                let items: Vec<i64> = value
                    .split_whitespace()
                    .map(|item| {
                        parse_int(item)
                            .filter(|n| (min..=max).contains(n))
                            .ok_or_else(|| invalid(format!("'{}' not within {}..={}", item, min, max)))
                    })
                    .collect::<Result<_, _>>()?;
                if items.len() != count {
                    return Err(invalid(format!(
                        "expected {} values, got {}",
                        count,
                        items.len()
                    )));
                }
                Ok(items
                    .iter()
                    .map(|n| n.to_string())
                    .collect::<Vec<_>>()
                    .join(" "))
            }
        }
    }
}

fn parse_int(value: &str) -> Option<i64> {
    value.parse::<i64>().ok()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_uppercase().as_str() {
        "TRUE" | "1" | "ON" | "YES" => Some(true),
        "FALSE" | "0" | "OFF" | "NO" => Some(false),
        _ => None,
    }
}

/// Iterate the properties a session may write through the regular request
pub fn writable_properties() -> impl Iterator<Item = &'static PropertySpec> {
    PROPERTY_TABLE
        .iter()
        .filter(|spec| spec.access == PropertyAccess::GetSet)
}
