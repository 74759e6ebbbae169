//! Scanner entry point
//!
//! Ties the native engine, the USB access provider and the device registry
//! together. Registry indices double as engine device indices: the engine
//! enumerates the same allow-listed devices in the same order.

use crate::dispatch::{CallbackSink, ResultVariant, Router};
use crate::engine::{NativeDeviceDescription, NativeEngine, NativeResult, OpenOptions, SdkVersion};
use crate::registry::DeviceRegistry;
use crate::session::shared::{SessionCore, SessionParts};
use crate::session::{CaptureSession, SessionEvents};
use crate::usb::{TransportHandle, UsbAccessProvider, provider_failure};
use common::{DEFAULT_QUEUE_CAPACITY, event_queue};
use protocol::{DeviceDescriptor, DeviceId, Failure, FailureCode, NativeHandle};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Runtime settings for a [`Scanner`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScannerSettings {
    /// Capacity of each session's event queue
    pub queue_capacity: usize,
    pub result_variant: ResultVariant,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            result_variant: ResultVariant::default(),
        }
    }
}

struct PendingOpen {
    device: DeviceId,
    transport: TransportHandle,
}

pub(crate) struct ScannerInner {
    engine: Arc<dyn NativeEngine>,
    registry: DeviceRegistry,
    router: Arc<Router>,
    settings: ScannerSettings,
    pending_opens: Mutex<HashMap<usize, PendingOpen>>,
}

impl ScannerInner {
    fn pending(&self) -> MutexGuard<'_, HashMap<usize, PendingOpen>> {
        self.pending_opens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the USB transport for a reserved device
    fn acquire_transport(&self, descriptor: &DeviceDescriptor) -> Result<TransportHandle, Failure> {
        self.registry.open_transport(descriptor.id).map_err(|e| {
            warn!(device = %descriptor.id, "Transport unavailable: {}", e);
            self.registry.abort_open(descriptor.id);
            provider_failure(&e)
        })
    }

    fn fail_open(&self, device: DeviceId, transport: TransportHandle, code: i32) -> Failure {
        self.registry.release_transport(transport);
        self.registry.abort_open(device);
        let failure = Failure::from_status(code);
        warn!(device = %device, %failure, "Native open failed");
        failure
    }

    /// Wrap a freshly opened native handle in a session
    fn attach_session(
        &self,
        index: usize,
        device: DeviceId,
        handle: NativeHandle,
        transport: TransportHandle,
    ) -> Result<CaptureSession, Failure> {
        let (sender, rx) = event_queue(self.settings.queue_capacity);
        let core = Arc::new(SessionCore::new(SessionParts {
            handle,
            device,
            index,
            engine: self.engine.clone(),
            router: self.router.clone(),
            registry: self.registry.clone(),
            sender,
            transport,
        }));

        if !self.registry.complete_open(device, Arc::downgrade(&core)) {
            warn!(device = %device, "Device detached while opening");
            core.teardown();
            return Err(Failure::new(FailureCode::DeviceNotFound)
                .with_detail(format!("{} detached while opening", device)));
        }

        let session = CaptureSession::new(core.clone(), SessionEvents::new(core, rx));
        if let Err(failure) = session.refresh_descriptor() {
            debug!(device = %device, %failure, "Descriptor refresh after open failed");
        }
        info!(device = %device, index, handle = handle.0, "Session opened");
        Ok(session)
    }

    /// Completion of an [`Scanner::open_async`] request, from an engine thread
    pub(crate) fn finish_async_open(&self, index: usize, result: NativeResult<NativeHandle>) {
        let pending = self.pending().remove(&index);
        let Some(pending) = pending else {
            warn!(index, "Open completion without a pending request");
            if let Ok(handle) = result
                && let Err(code) = self.engine.close_device(handle)
            {
                debug!(index, code, "Closing orphaned native handle failed");
            }
            return;
        };

        let outcome = match result {
            Ok(handle) => self.attach_session(index, pending.device, handle, pending.transport),
            Err(code) => Err(self.fail_open(pending.device, pending.transport, code)),
        };
        self.registry.report_open_complete(index, outcome);
    }
}

/// Capture core for one native engine and one USB access provider
#[derive(Clone)]
pub struct Scanner {
    inner: Arc<ScannerInner>,
}

impl Scanner {
    /// Create the core and register its callback sink with the engine
    pub fn new(
        engine: Arc<dyn NativeEngine>,
        provider: Arc<dyn UsbAccessProvider>,
        settings: ScannerSettings,
    ) -> Self {
        let registry = DeviceRegistry::new(provider);
        let inner = Arc::new_cyclic(|scanner| ScannerInner {
            engine: engine.clone(),
            registry: registry.clone(),
            router: Arc::new(Router::new(
                registry.clone(),
                scanner.clone(),
                settings.result_variant,
            )),
            settings,
            pending_opens: Mutex::new(HashMap::new()),
        });

        engine.register_callbacks(CallbackSink::new(inner.router.clone()));
        info!(
            queue_capacity = settings.queue_capacity,
            result_variant = ?settings.result_variant,
            "Scanner core started"
        );
        Self { inner }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.inner.registry
    }

    pub fn settings(&self) -> ScannerSettings {
        self.inner.settings
    }

    pub fn sdk_version(&self) -> Result<SdkVersion, Failure> {
        self.inner.engine.sdk_version().map_err(Failure::from_status)
    }

    /// Devices the engine itself reports
    pub fn engine_device_count(&self) -> Result<usize, Failure> {
        self.inner.engine.device_count().map_err(Failure::from_status)
    }

    pub fn engine_device_description(&self, index: usize) -> Result<NativeDeviceDescription, Failure> {
        self.inner
            .engine
            .device_description(index)
            .map_err(Failure::from_status)
    }

    /// Engine text for a status code
    pub fn error_string(&self, status: i32) -> Result<String, Failure> {
        self.inner
            .engine
            .error_string(status)
            .map_err(Failure::from_status)
    }

    /// Open the device at a registry index with default options
    pub fn open(&self, index: usize) -> Result<CaptureSession, Failure> {
        self.open_with(index, &OpenOptions::default())
    }

    /// Open the device at a registry index, blocking until it is ready
    ///
    /// Fails with `DeviceNotFound` for an unknown index, `DeviceBusy` when
    /// the device is already open or opening, and `DeviceNotAccessible`
    /// without permission.
    pub fn open_with(&self, index: usize, options: &OpenOptions) -> Result<CaptureSession, Failure> {
        let descriptor = self.inner.registry.reserve(index)?;
        let transport = self.inner.acquire_transport(&descriptor)?;

        debug!(device = %descriptor.id, index, mask = ?options.uniformity_mask_path, "Opening device");
        match self.inner.engine.open_device(index, &transport, options) {
            Ok(handle) => self
                .inner
                .attach_session(index, descriptor.id, handle, transport),
            Err(code) => Err(self.inner.fail_open(descriptor.id, transport, code)),
        }
    }

    pub fn open_async(&self, index: usize) -> Result<(), Failure> {
        self.open_async_with(index, &OpenOptions::default())
    }

    /// Start opening a device and return at once
    ///
    /// Progress and the resulting session arrive on the registry's
    /// discovery stream as `InitProgress` and `OpenComplete`.
    pub fn open_async_with(&self, index: usize, options: &OpenOptions) -> Result<(), Failure> {
        let descriptor = self.inner.registry.reserve(index)?;
        let transport = self.inner.acquire_transport(&descriptor)?;

        self.inner.pending().insert(
            index,
            PendingOpen {
                device: descriptor.id,
                transport,
            },
        );

        debug!(device = %descriptor.id, index, "Opening device asynchronously");
        if let Err(code) = self.inner.engine.open_device_async(index, &transport, options) {
            let pending = self.inner.pending().remove(&index);
            return Err(match pending {
                Some(pending) => self.inner.fail_open(pending.device, pending.transport, code),
                None => Failure::from_status(code),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for Scanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner")
            .field("registry", &self.inner.registry)
            .field("settings", &self.inner.settings)
            .field("pending_opens", &self.inner.pending().len())
            .finish()
    }
}
