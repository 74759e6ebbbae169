//! Native status codes and the failure taxonomy
//!
//! The native engine reports every outcome as a signed integer: zero is
//! success, negative values are errors and positive values are warnings.
//! [`translate`] folds that integer space into the closed [`FailureCode`]
//! enumeration. Codes missing from the table are never passed through raw;
//! they become [`FailureCode::CommandFailed`] with the original integer kept
//! for diagnosis.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Broad class of a failure, used to decide how to react to it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// Invalid argument or call made from the wrong state
    ParameterUsage,
    /// Memory, file, lock or thread resource problem
    Resource,
    /// Channel read/write failure, timeout or stale handle
    TransportIo,
    /// Device missing, busy, locked or otherwise unusable
    Device,
    /// Capture command failure or invalid capture request
    Capture,
    /// Finger placement and biometric warnings
    QualityBiometric,
    /// Generic command failure, including every unrecognized code
    CommandFailed,
}

impl FailureCategory {
    /// Whether callers should expect this during normal operation
    pub fn is_recoverable(self) -> bool {
        !matches!(
            self,
            FailureCategory::ParameterUsage | FailureCategory::Resource
        )
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureCategory::ParameterUsage => "parameter/usage",
            FailureCategory::Resource => "resource",
            FailureCategory::TransportIo => "transport/io",
            FailureCategory::Device => "device",
            FailureCategory::Capture => "capture",
            FailureCategory::QualityBiometric => "quality/biometric",
            FailureCategory::CommandFailed => "command failed",
        };
        f.write_str(name)
    }
}

macro_rules! failure_codes {
    ($( $variant:ident = $native:expr, $category:ident, $text:literal; )*) => {
        /// Closed set of failure conditions
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum FailureCode {
            $( $variant, )*
        }

        impl FailureCode {
            pub const ALL: &'static [FailureCode] = &[$( FailureCode::$variant, )*];

            /// Native integer for this code; `None` for conditions only the core raises
            pub fn native_code(self) -> Option<i32> {
                match self {
                    $( FailureCode::$variant => $native, )*
                }
            }

            pub fn category(self) -> FailureCategory {
                match self {
                    $( FailureCode::$variant => FailureCategory::$category, )*
                }
            }

            pub fn description(self) -> &'static str {
                match self {
                    $( FailureCode::$variant => $text, )*
                }
            }
        }
    };
}

failure_codes! {
    InvalidParamValue = Some(-1), ParameterUsage, "invalid parameter value";
    NotSupported = Some(-3), ParameterUsage, "not supported";
    InvalidAccessPointer = Some(-8), ParameterUsage, "invalid access pointer";
    ClientWindow = Some(-400), ParameterUsage, "client window operation failed";
    InvalidOverlayHandle = Some(-402), ParameterUsage, "invalid overlay handle";
    PadPropertyDisabled = Some(-700), ParameterUsage, "property disabled on this device";
    ApiDeprecated = Some(202), ParameterUsage, "deprecated API";
    AlreadyEnhancedImage = Some(203), ParameterUsage, "image already enhanced";
    WrongState = None, ParameterUsage, "request not valid in current session state";

    MemAlloc = Some(-2), Resource, "memory allocation failed";
    FileOpen = Some(-4), Resource, "file open failed";
    FileRead = Some(-5), Resource, "file read failed";
    ResourceLocked = Some(-6), Resource, "resource locked";
    MissingResource = Some(-7), Resource, "missing resource";
    ThreadCreate = Some(-9), Resource, "thread creation failed";
    LibraryUnloadFailed = Some(-11), Resource, "library unload failed";

    CommandFailed = Some(-10), CommandFailed, "command failed";

    ChannelIoCommandFailed = Some(-100), TransportIo, "channel command failed";
    ChannelIoReadFailed = Some(-101), TransportIo, "channel read failed";
    ChannelIoWriteFailed = Some(-102), TransportIo, "channel write failed";
    ChannelIoReadTimeout = Some(-103), TransportIo, "channel read timed out";
    ChannelIoWriteTimeout = Some(-104), TransportIo, "channel write timed out";
    ChannelIoUnexpectedFailed = Some(-105), TransportIo, "unexpected channel failure";
    ChannelIoInvalidHandle = Some(-106), TransportIo, "invalid channel handle";
    ChannelIoWrongPipeIndex = Some(-107), TransportIo, "wrong pipe index";
    DeviceIo = Some(-200), TransportIo, "device I/O failed";
    ChannelIoFrameMissing = Some(100), TransportIo, "frame missing";
    ChannelIoCameraWrong = Some(101), TransportIo, "camera communication problem";
    ChannelIoSleepStatus = Some(102), TransportIo, "device in sleep state";
    CommunicationBroken = None, TransportIo, "communication with device broken";

    DeviceNotFound = Some(-201), Device, "device not found";
    DeviceNotMatched = Some(-202), Device, "device not matched";
    DeviceActive = Some(-203), Device, "device active elsewhere";
    DeviceNotInitialized = Some(-204), Device, "device not initialized";
    DeviceInvalidState = Some(-205), Device, "device in invalid state, reopen required";
    DeviceBusy = Some(-206), Device, "device busy";
    DeviceNotSupportedFeature = Some(-207), Device, "feature not supported by device";
    InvalidLicense = Some(-208), Device, "invalid license";
    Usb20Required = Some(-209), Device, "USB 2.0 high speed required";
    DevicePowerSaveEnabled = Some(-210), Device, "device in power save mode";
    DeviceNeedUpdateFirmware = Some(-211), Device, "firmware update required";
    DeviceNeedCalibrateTof = Some(-212), Device, "TOF calibration required";
    DeviceInvalidCalibrationData = Some(-213), Device, "invalid calibration data";
    DeviceHigherSdkRequired = Some(-214), Device, "newer SDK required";
    DeviceLockInvalidBuffer = Some(-215), Device, "lock info buffer invalid";
    DeviceLockInfoEmpty = Some(-216), Device, "lock info empty";
    DeviceLockInfoNotMatched = Some(-217), Device, "lock info does not match";
    DeviceLockInvalidChecksum = Some(-218), Device, "lock checksum invalid";
    DeviceLockInvalidKey = Some(-219), Device, "customer key invalid";
    DeviceLockLocked = Some(-220), Device, "device locked";
    DeviceLockIllegalDevice = Some(-221), Device, "illegal device";
    DeviceNotAccessible = Some(-299), Device, "device not accessible";
    OutdatedFirmware = Some(200), Device, "firmware outdated";
    AlreadyInitialized = Some(201), Device, "device already initialized";

    CaptureCommandFailed = Some(-300), Capture, "capture command failed";
    CaptureStop = Some(-301), Capture, "capture stopped";
    CaptureTimeout = Some(-302), Capture, "capture timed out";
    CaptureStillRunning = Some(-303), Capture, "capture still running";
    CaptureNotRunning = Some(-304), Capture, "capture not running";
    CaptureInvalidMode = Some(-305), Capture, "capture mode not available";
    CaptureAlgorithm = Some(-306), Capture, "capture algorithm failed";
    CaptureRolling = Some(-307), Capture, "rolled capture failed";
    CaptureRollingTimeout = Some(-308), Capture, "rolled capture timed out";
    NfiqFailed = Some(-500), Capture, "NFIQ calculation failed";
    WsqEncodeFailed = Some(-501), Capture, "WSQ encoding failed";
    WsqDecodeFailed = Some(-502), Capture, "WSQ decoding failed";
    PngDecodeFailed = Some(-503), Capture, "PNG decoding failed";
    Jp2DecodeFailed = Some(-504), Capture, "JPEG 2000 decoding failed";
    DuplicateExtractionFailed = Some(-600), Capture, "duplicate check extraction failed";
    DuplicateAlreadyUsed = Some(-601), Capture, "duplicate check image already used";
    DuplicateSegmentationFailed = Some(-602), Capture, "duplicate check segmentation failed";
    DuplicateMatchingFailed = Some(-603), Capture, "duplicate check matching failed";
    BGetImage = Some(300), Capture, "image retrieval in progress";
    RollingNotRunning = Some(301), Capture, "rolling not running";

    NoFinger = Some(302), QualityBiometric, "no finger detected";
    IncorrectFingers = Some(303), QualityBiometric, "incorrect finger count";
    RollingSmear = Some(304), QualityBiometric, "rolling smear";
    RollingShiftedHorizontally = Some(305), QualityBiometric, "roll shifted horizontally";
    RollingShiftedVertically = Some(306), QualityBiometric, "roll shifted vertically";
    RollingShiftedHorizontallyVertically = Some(307), QualityBiometric, "roll shifted horizontally and vertically";
    EmptyResultImage = Some(400), QualityBiometric, "empty result image";
    QualityInvalidArea = Some(512), QualityBiometric, "finger outside capture area";
    QualityInvalidAreaHorizontally = Some(513), QualityBiometric, "finger outside capture area horizontally";
    QualityInvalidAreaVertically = Some(514), QualityBiometric, "finger outside capture area vertically";
    QualityInvalidAreaHorizontallyVertically = Some(515), QualityBiometric, "finger outside capture area horizontally and vertically";
    InvalidBrightnessFingers = Some(600), QualityBiometric, "invalid finger brightness";
    WetFingers = Some(601), QualityBiometric, "wet fingers detected";
    MultipleFingersDuringRoll = Some(602), QualityBiometric, "multiple fingers during roll";
    SpoofDetected = Some(603), QualityBiometric, "spoof detected";
    SlipDetected = Some(604), QualityBiometric, "slip detected";
    SpoofInitFailed = Some(605), QualityBiometric, "spoof detector initialization failed";
}

impl FailureCode {
    /// Look up a native integer; `None` for zero and unrecognized codes
    pub fn from_native(code: i32) -> Option<Self> {
        if code == 0 {
            return None;
        }
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.native_code() == Some(code))
    }
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Typed failure returned by every registry and session operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub code: FailureCode,
    /// Native integer as reported, kept even when the code was unrecognized
    pub native: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Failure {
    pub fn new(code: FailureCode) -> Self {
        Self {
            code,
            native: code.native_code(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Failure for a status the engine returned as an error
    ///
    /// Zero is not a failure status; it is reported as a generic command
    /// failure because the caller already decided the request failed.
    pub fn from_status(status: i32) -> Self {
        translate(status).unwrap_or_else(|| {
            Failure::new(FailureCode::CommandFailed)
                .with_detail("engine reported failure with status 0")
        })
    }

    pub fn category(&self) -> FailureCategory {
        self.code.category()
    }

    /// Positive native codes are warnings attached to an otherwise usable result
    pub fn is_warning(&self) -> bool {
        self.native.is_some_and(|n| n > 0) && self.code != FailureCode::CommandFailed
    }

    pub fn is_recoverable(&self) -> bool {
        self.category().is_recoverable()
    }
}

impl From<FailureCode> for Failure {
    fn from(code: FailureCode) -> Self {
        Failure::new(code)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}", self.code.description(), self.category())?;
        if let Some(native) = self.native {
            write!(f, ", code {}", native)?;
        }
        f.write_str("]")?;
        if let Some(detail) = &self.detail {
            write!(f, ": {}", detail)?;
        }
        Ok(())
    }
}

impl std::error::Error for Failure {}

/// Translate a native status integer
///
/// Returns `None` for success (zero). Every other value yields a failure;
/// unrecognized values map to [`FailureCode::CommandFailed`] and are logged
/// with the raw code.
pub fn translate(status: i32) -> Option<Failure> {
    if status == 0 {
        return None;
    }

    match FailureCode::from_native(status) {
        Some(code) => Some(Failure {
            code,
            native: Some(status),
            detail: None,
        }),
        None => {
            warn!(code = status, "Unrecognized native status code");
            Some(Failure {
                code: FailureCode::CommandFailed,
                native: Some(status),
                detail: Some(format!("unrecognized native status {}", status)),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_success_is_not_a_failure() {
        assert!(translate(0).is_none());
    }

    #[test]
    fn test_known_codes_round_trip() {
        for code in FailureCode::ALL {
            if let Some(native) = code.native_code() {
                let failure = translate(native).unwrap();
                assert_eq!(failure.code, *code);
                assert_eq!(failure.native, Some(native));
            }
        }
    }

    #[test]
    fn test_native_codes_unique() {
        let natives: Vec<i32> = FailureCode::ALL
            .iter()
            .filter_map(|c| c.native_code())
            .collect();
        let unique: HashSet<_> = natives.iter().collect();
        assert_eq!(natives.len(), unique.len());
    }

    #[test]
    fn test_unknown_code_maps_to_command_failed() {
        let failure = translate(-12345).unwrap();
        assert_eq!(failure.code, FailureCode::CommandFailed);
        assert_eq!(failure.category(), FailureCategory::CommandFailed);
        assert_eq!(failure.native, Some(-12345));
        assert!(!failure.is_warning());
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            translate(-1).unwrap().category(),
            FailureCategory::ParameterUsage
        );
        assert_eq!(translate(-2).unwrap().category(), FailureCategory::Resource);
        assert_eq!(
            translate(-103).unwrap().category(),
            FailureCategory::TransportIo
        );
        assert_eq!(translate(-206).unwrap().category(), FailureCategory::Device);
        assert_eq!(translate(-305).unwrap().category(), FailureCategory::Capture);
        assert_eq!(
            translate(601).unwrap().category(),
            FailureCategory::QualityBiometric
        );
    }

    #[test]
    fn test_warnings_and_recoverability() {
        let wet = translate(601).unwrap();
        assert!(wet.is_warning());
        assert!(wet.is_recoverable());

        let busy = translate(-206).unwrap();
        assert!(!busy.is_warning());
        assert!(busy.is_recoverable());

        let bad_param = translate(-1).unwrap();
        assert!(!bad_param.is_recoverable());
    }

    #[test]
    fn test_core_only_codes() {
        assert_eq!(FailureCode::WrongState.native_code(), None);
        assert_eq!(FailureCode::CommunicationBroken.native_code(), None);
        assert_eq!(
            Failure::new(FailureCode::WrongState).category(),
            FailureCategory::ParameterUsage
        );
    }

    #[test]
    fn test_from_status_zero() {
        let failure = Failure::from_status(0);
        assert_eq!(failure.code, FailureCode::CommandFailed);
        assert!(failure.detail.is_some());
    }

    #[test]
    fn test_display() {
        let msg = translate(-206).unwrap().to_string();
        assert!(msg.contains("device busy"));
        assert!(msg.contains("-206"));
    }
}
