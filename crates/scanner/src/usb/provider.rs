//! USB access boundary
//!
//! The core never touches USB directly. It asks a [`UsbAccessProvider`] for
//! the allow-listed devices, their permission state and a transport handle
//! to pass to the native engine, and receives attach, detach and permission
//! notifications through the [`HotplugSink`] it hands out.

use crate::registry::HotplugSink;
use common::Result;
use protocol::{DeviceId, Failure, FailureCode, UsbDeviceEntry};
use std::fmt;

/// Transport handed to the native engine for one open device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportHandle {
    pub device: DeviceId,
    /// Platform file descriptor, where the platform has one
    pub raw_fd: Option<i32>,
}

impl TransportHandle {
    pub fn new(device: DeviceId) -> Self {
        Self {
            device,
            raw_fd: None,
        }
    }
}

/// Keeps a hotplug watch alive; dropping it stops the watch
pub struct WatchGuard {
    stop: Option<Box<dyn FnOnce() + Send>>,
}

impl WatchGuard {
    pub fn new(stop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            stop: Some(Box::new(stop)),
        }
    }

    /// Guard for providers without a background watcher
    pub fn noop() -> Self {
        Self { stop: None }
    }
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

impl fmt::Debug for WatchGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchGuard")
            .field("active", &self.stop.is_some())
            .finish()
    }
}

/// Platform USB access consumed by the device registry and the scanner
pub trait UsbAccessProvider: Send + Sync {
    /// Allow-listed devices currently attached, in attachment order
    fn enumerate(&self) -> Result<Vec<UsbDeviceEntry>>;

    /// Whether access is currently granted, without prompting
    fn has_permission(&self, device: DeviceId) -> bool;

    /// Ask for access; the answer arrives through `sink.permission_result`
    fn request_permission(&self, device: DeviceId, sink: HotplugSink);

    fn open_transport(&self, device: DeviceId) -> Result<TransportHandle>;

    fn release_transport(&self, transport: TransportHandle);

    /// Start delivering attach and detach notifications to `sink`
    fn watch(&self, sink: HotplugSink) -> Result<WatchGuard>;
}

/// Map an infrastructure error from the provider to a typed failure
pub fn provider_failure(err: &common::Error) -> Failure {
    let code = match err {
        common::Error::NotFound(_) => FailureCode::DeviceNotFound,
        common::Error::PermissionDenied(_) => FailureCode::DeviceNotAccessible,
        _ => FailureCode::DeviceIo,
    };
    Failure::new(code).with_detail(err.to_string())
}
