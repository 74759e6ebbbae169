//! Fingerprint scanner capture core
//!
//! Sits between a native image-processing engine and its consumers. The
//! [`DeviceRegistry`] tracks attached scanners and USB permission, a
//! [`CaptureSession`] owns one open device and runs its capture state
//! machine, and the callback dispatcher turns engine notifications into
//! ordered [`SessionEvent`](protocol::SessionEvent)s on the owning
//! session's queue.
//!
//! # Example
//!
//! ```
//! use scanner::sim::{SimulatedEngine, SimulatedProvider};
//! use scanner::{Scanner, ScannerSettings};
//! use std::sync::Arc;
//!
//! let scanner = Scanner::new(
//!     Arc::new(SimulatedEngine::with_devices(1)),
//!     Arc::new(SimulatedProvider::with_scanners(1)),
//!     ScannerSettings::default(),
//! );
//! let devices = scanner.registry().enumerate();
//! assert_eq!(devices.len(), 1);
//!
//! let session = scanner.open(0).unwrap();
//! session.set_contrast(20).unwrap();
//! assert_eq!(session.contrast().unwrap(), 20);
//! session.close();
//! ```

pub mod capture_loop;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod registry;
pub mod scanner;
pub mod session;
pub mod sim;
pub mod usb;

pub use crate::scanner::{Scanner, ScannerSettings};
pub use capture_loop::{CapturePolicy, CaptureReport, run_capture, run_capture_with};
pub use config::ScannerConfig;
pub use dispatch::{CallbackSink, ResultVariant};
pub use engine::{
    NativeDeviceDescription, NativeEngine, NativeResult, OpenOptions, RawCaptureResult,
    RawExtendedResult, RawRollingInfo, SdkVersion,
};
pub use registry::{DeviceRegistry, DiscoveryEvent, DiscoveryStream, HotplugSink};
pub use session::{CaptureConfig, CaptureSession, SessionEvents, SessionState};
pub use usb::{RusbProvider, TransportHandle, UsbAccessProvider, WatchGuard};
