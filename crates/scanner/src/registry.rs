//! Device registry
//!
//! The live set of allow-listed scanners, in attachment order, with their
//! permission and open state. The registry is an ordinary value: the
//! application constructs one per USB access provider and shares it by
//! cloning. Attach, detach, permission answers, open progress and async
//! open completions reach the consumer through a single [`DiscoveryStream`].
//!
//! Locking: the registry lock is never held while calling into a session,
//! while sending discovery events, or while starting or stopping a
//! provider watch.

use crate::session::CaptureSession;
use crate::session::shared::SessionCore;
use crate::usb::{TransportHandle, UsbAccessProvider, WatchGuard};
use common::{EventReceiver, EventSender, Polled, unbounded_event_queue};
use protocol::{
    DeviceDescriptor, DeviceId, Failure, FailureCode, OpenState, Permission, UsbDeviceEntry,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, info, trace, warn};

/// Discovery notification
#[derive(Debug)]
pub enum DiscoveryEvent {
    DeviceAttached(DeviceDescriptor),
    DeviceDetached(DeviceId),
    PermissionResult { device: DeviceId, granted: bool },
    DeviceCountChanged(usize),
    /// Open progress for a registry index, 0 to 100, never decreasing
    InitProgress { index: usize, progress: u8 },
    /// Outcome of [`Scanner::open_async`](crate::Scanner::open_async)
    OpenComplete {
        index: usize,
        result: Result<CaptureSession, Failure>,
    },
}

struct Subscription {
    id: u64,
    sender: EventSender<DiscoveryEvent>,
    watch: Option<WatchGuard>,
}

struct RegistryState {
    devices: Vec<DeviceDescriptor>,
    sessions: HashMap<DeviceId, Weak<SessionCore>>,
    subscription: Option<Subscription>,
    progress: HashMap<usize, u8>,
    next_subscription: u64,
}

struct RegistryInner {
    provider: Arc<dyn UsbAccessProvider>,
    state: Mutex<RegistryState>,
}

/// Process-wide view of attached scanners
#[derive(Clone)]
pub struct DeviceRegistry {
    inner: Arc<RegistryInner>,
}

impl DeviceRegistry {
    pub fn new(provider: Arc<dyn UsbAccessProvider>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                provider,
                state: Mutex::new(RegistryState {
                    devices: Vec::new(),
                    sessions: HashMap::new(),
                    subscription: None,
                    progress: HashMap::new(),
                    next_subscription: 1,
                }),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Refresh from the provider and return the devices in index order
    ///
    /// Never fails: an unavailable provider yields an empty list and leaves
    /// the registry untouched.
    pub fn enumerate(&self) -> Vec<DeviceDescriptor> {
        let entries = match self.inner.provider.enumerate() {
            Ok(entries) => entries,
            Err(e) => {
                warn!("USB access provider unavailable: {}", e);
                return Vec::new();
            }
        };
        let permitted: HashMap<DeviceId, bool> = entries
            .iter()
            .map(|e| (e.id, self.inner.provider.has_permission(e.id)))
            .collect();

        let mut removed = Vec::new();
        let mut added = Vec::new();
        let (devices, detached_sessions, previous_len) = {
            let mut state = self.lock();
            let previous_len = state.devices.len();

            state.devices.retain(|d| {
                let present = entries.iter().any(|e| e.id == d.id);
                if !present {
                    removed.push(d.id);
                }
                present
            });

            for entry in &entries {
                if !state.devices.iter().any(|d| d.id == entry.id) {
                    let descriptor = DeviceDescriptor::from_entry(entry);
                    added.push(descriptor.clone());
                    state.devices.push(descriptor);
                }
            }

            for device in state.devices.iter_mut() {
                device.permission = match (permitted.get(&device.id), device.permission) {
                    (Some(true), _) => Permission::Granted,
                    (_, Permission::Denied) => Permission::Denied,
                    _ => Permission::Unknown,
                };
            }

            let sessions: Vec<_> = removed
                .iter()
                .filter_map(|id| state.sessions.remove(id))
                .collect();
            (state.devices.clone(), sessions, previous_len)
        };

        for session in detached_sessions.iter().filter_map(Weak::upgrade) {
            session.force_detach();
        }
        for id in removed {
            info!(device = %id, "Device no longer present");
            self.emit(DiscoveryEvent::DeviceDetached(id));
        }
        for descriptor in added {
            self.emit(DiscoveryEvent::DeviceAttached(descriptor));
        }
        if devices.len() != previous_len {
            self.emit(DiscoveryEvent::DeviceCountChanged(devices.len()));
        }
        debug!(count = devices.len(), "Enumerated scanners");
        devices
    }

    /// Snapshot of the known devices without asking the provider
    pub fn devices(&self) -> Vec<DeviceDescriptor> {
        self.lock().devices.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().devices.is_empty()
    }

    /// Descriptor at a registry index
    pub fn describe(&self, index: usize) -> Result<DeviceDescriptor, Failure> {
        self.lock().devices.get(index).cloned().ok_or_else(|| {
            Failure::new(FailureCode::DeviceNotFound).with_detail(format!("no device at index {}", index))
        })
    }

    /// Descriptor by device id
    pub fn device(&self, id: DeviceId) -> Option<DeviceDescriptor> {
        self.lock().devices.iter().find(|d| d.id == id).cloned()
    }

    pub fn index_of(&self, id: DeviceId) -> Option<usize> {
        self.lock().devices.iter().position(|d| d.id == id)
    }

    /// Ask for access to a device
    ///
    /// The answer arrives as [`DiscoveryEvent::PermissionResult`]; a device
    /// that already has access is answered immediately.
    pub fn request_permission(&self, id: DeviceId) {
        if self.inner.provider.has_permission(id) {
            self.sink().permission_result(id, true);
            return;
        }
        debug!(device = %id, "Requesting device permission");
        self.inner.provider.request_permission(id, self.sink());
    }

    /// Start receiving discovery events
    ///
    /// One subscription may be active at a time. Dropping or unsubscribing
    /// the stream releases it and stops the provider watch.
    pub fn subscribe(&self) -> common::Result<DiscoveryStream> {
        let (sender, rx) = unbounded_event_queue();
        let id = {
            let mut state = self.lock();
            if state.subscription.is_some() {
                return Err(common::Error::Subscription(
                    "a discovery subscription is already active".to_string(),
                ));
            }
            let id = state.next_subscription;
            state.next_subscription += 1;
            state.subscription = Some(Subscription {
                id,
                sender,
                watch: None,
            });
            id
        };

        match self.inner.provider.watch(self.sink()) {
            Ok(guard) => {
                let stale = {
                    let mut state = self.lock();
                    match state.subscription.as_mut().filter(|s| s.id == id) {
                        Some(subscription) => {
                            subscription.watch = Some(guard);
                            None
                        }
                        None => Some(guard),
                    }
                };
                drop(stale);
            }
            Err(e) => {
                let _released = self.release_subscription(id);
                return Err(e);
            }
        }

        debug!(subscription = id, "Discovery subscription started");
        Ok(DiscoveryStream {
            registry: self.clone(),
            id,
            rx,
            active: true,
        })
    }

    pub fn has_subscription(&self) -> bool {
        self.lock().subscription.is_some()
    }

    fn release_subscription(&self, id: u64) -> Option<Subscription> {
        let mut state = self.lock();
        if state.subscription.as_ref().is_some_and(|s| s.id == id) {
            state.subscription.take()
        } else {
            None
        }
    }

    fn emit(&self, event: DiscoveryEvent) {
        let sender = self.lock().subscription.as_ref().map(|s| s.sender.clone());
        match sender {
            Some(sender) => {
                if let Err(e) = sender.send_blocking(event) {
                    debug!("Discovery event undeliverable: {}", e);
                }
            }
            None => trace!(?event, "No discovery subscriber"),
        }
    }

    pub(crate) fn sink(&self) -> HotplugSink {
        HotplugSink {
            registry: Arc::downgrade(&self.inner),
        }
    }

    // ========================================================================
    // Open bookkeeping, driven by the scanner and sessions
    // ========================================================================

    /// Claim a device for opening
    pub(crate) fn reserve(&self, index: usize) -> Result<DeviceDescriptor, Failure> {
        let not_found = || {
            Failure::new(FailureCode::DeviceNotFound).with_detail(format!("no device at index {}", index))
        };

        // Access checks may do USB I/O, so they run without the lock
        let (id, permission) = {
            let state = self.lock();
            let device = state.devices.get(index).ok_or_else(not_found)?;
            (device.id, device.permission)
        };
        let permitted = permission == Permission::Unknown && self.inner.provider.has_permission(id);

        let mut state = self.lock();
        let device = state
            .devices
            .get_mut(index)
            .filter(|d| d.id == id)
            .ok_or_else(not_found)?;

        if device.open_state != OpenState::Closed {
            return Err(Failure::new(FailureCode::DeviceBusy)
                .with_detail(format!("{} is already {:?}", device.id, device.open_state)));
        }
        match device.permission {
            Permission::Granted => {}
            Permission::Denied => {
                return Err(Failure::new(FailureCode::DeviceNotAccessible)
                    .with_detail(format!("access to {} was denied", device.id)));
            }
            Permission::Unknown => {
                if !permitted {
                    return Err(Failure::new(FailureCode::DeviceNotAccessible)
                        .with_detail(format!("no access to {}, request permission first", device.id)));
                }
                device.permission = Permission::Granted;
            }
        }

        device.open_state = OpenState::Opening;
        let descriptor = device.clone();
        state.progress.remove(&index);
        debug!(device = %descriptor.id, index, "Device reserved for open");
        Ok(descriptor)
    }

    pub(crate) fn abort_open(&self, id: DeviceId) {
        let mut state = self.lock();
        if let Some(device) = state.devices.iter_mut().find(|d| d.id == id)
            && device.open_state == OpenState::Opening
        {
            device.open_state = OpenState::Closed;
        }
    }

    /// Record the session for an opened device; false if it vanished meanwhile
    pub(crate) fn complete_open(&self, id: DeviceId, session: Weak<SessionCore>) -> bool {
        let mut state = self.lock();
        let Some(device) = state.devices.iter_mut().find(|d| d.id == id) else {
            return false;
        };
        device.open_state = OpenState::Open;
        state.sessions.insert(id, session);
        true
    }

    pub(crate) fn session_closed(&self, id: DeviceId) {
        let mut state = self.lock();
        state.sessions.remove(&id);
        if let Some(device) = state.devices.iter_mut().find(|d| d.id == id) {
            device.open_state = OpenState::Closed;
        }
    }

    pub(crate) fn update_descriptor(&self, id: DeviceId, update: impl FnOnce(&mut DeviceDescriptor)) {
        let mut state = self.lock();
        if let Some(device) = state.devices.iter_mut().find(|d| d.id == id) {
            update(device);
        }
    }

    pub(crate) fn open_transport(&self, id: DeviceId) -> common::Result<TransportHandle> {
        self.inner.provider.open_transport(id)
    }

    pub(crate) fn release_transport(&self, transport: TransportHandle) {
        self.inner.provider.release_transport(transport);
    }

    /// Forward open progress, keeping it monotonic per index
    pub(crate) fn report_progress(&self, index: usize, progress: i32) {
        let progress = progress.clamp(0, 100) as u8;
        {
            let mut state = self.lock();
            let last = state.progress.get(&index).copied();
            if last.is_some_and(|last| progress < last) {
                trace!(index, progress, "Dropping regressing open progress");
                return;
            }
            if progress == 100 {
                state.progress.remove(&index);
            } else {
                state.progress.insert(index, progress);
            }
        }
        self.emit(DiscoveryEvent::InitProgress { index, progress });
    }

    pub(crate) fn report_device_count(&self, count: usize) {
        self.emit(DiscoveryEvent::DeviceCountChanged(count));
    }

    pub(crate) fn report_open_complete(&self, index: usize, result: Result<CaptureSession, Failure>) {
        if !self.has_subscription() {
            warn!(index, "Async open completed with no discovery subscriber");
        }
        self.emit(DiscoveryEvent::OpenComplete { index, result });
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("DeviceRegistry")
            .field("devices", &state.devices.len())
            .field("sessions", &state.sessions.len())
            .field("subscribed", &state.subscription.is_some())
            .finish()
    }
}

/// Entry points for USB access providers
///
/// Holds the registry weakly, so a provider keeping a sink does not keep
/// the registry alive.
#[derive(Clone)]
pub struct HotplugSink {
    registry: Weak<RegistryInner>,
}

impl HotplugSink {
    fn registry(&self) -> Option<DeviceRegistry> {
        self.registry.upgrade().map(|inner| DeviceRegistry { inner })
    }

    pub fn attached(&self, entry: UsbDeviceEntry) {
        let Some(registry) = self.registry() else {
            return;
        };
        let permitted = registry.inner.provider.has_permission(entry.id);

        let (descriptor, count) = {
            let mut state = registry.lock();
            if state.devices.iter().any(|d| d.id == entry.id) {
                trace!(device = %entry.id, "Attach for known device ignored");
                return;
            }
            let mut descriptor = DeviceDescriptor::from_entry(&entry);
            if permitted {
                descriptor.permission = Permission::Granted;
            }
            state.devices.push(descriptor.clone());
            (descriptor, state.devices.len())
        };

        info!(
            device = %descriptor.id,
            vid = format_args!("{:#06x}", descriptor.vendor_id),
            pid = format_args!("{:#06x}", descriptor.product_id),
            "Scanner attached"
        );
        registry.emit(DiscoveryEvent::DeviceAttached(descriptor));
        registry.emit(DiscoveryEvent::DeviceCountChanged(count));
    }

    pub fn detached(&self, id: DeviceId) {
        let Some(registry) = self.registry() else {
            return;
        };

        let (session, count) = {
            let mut state = registry.lock();
            let Some(position) = state.devices.iter().position(|d| d.id == id) else {
                trace!(device = %id, "Detach for unknown device ignored");
                return;
            };
            state.devices.remove(position);
            (state.sessions.remove(&id), state.devices.len())
        };

        info!(device = %id, "Scanner detached");
        if let Some(session) = session.and_then(|s| s.upgrade()) {
            session.force_detach();
        }
        registry.emit(DiscoveryEvent::DeviceDetached(id));
        registry.emit(DiscoveryEvent::DeviceCountChanged(count));
    }

    pub fn permission_result(&self, id: DeviceId, granted: bool) {
        let Some(registry) = self.registry() else {
            return;
        };
        registry.update_descriptor(id, |d| {
            d.permission = if granted {
                Permission::Granted
            } else {
                Permission::Denied
            };
        });
        debug!(device = %id, granted, "Permission result");
        registry.emit(DiscoveryEvent::PermissionResult { device: id, granted });
    }
}

impl std::fmt::Debug for HotplugSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotplugSink")
            .field("live", &(self.registry.strong_count() > 0))
            .finish()
    }
}

/// The active discovery subscription
pub struct DiscoveryStream {
    registry: DeviceRegistry,
    id: u64,
    rx: EventReceiver<DiscoveryEvent>,
    active: bool,
}

impl DiscoveryStream {
    /// Wait for the next event; `None` once unsubscribed and drained
    pub async fn next(&mut self) -> Option<DiscoveryEvent> {
        self.rx.recv().await
    }

    pub fn next_blocking(&mut self) -> Option<DiscoveryEvent> {
        self.rx.recv_blocking()
    }

    pub fn try_next(&mut self) -> Option<DiscoveryEvent> {
        match self.rx.try_recv() {
            Polled::Ready(event) => Some(event),
            Polled::Empty | Polled::Closed => None,
        }
    }

    /// Release the subscription; safe to call more than once
    pub fn unsubscribe(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        // Dropped outside the registry lock: stopping a watch may join a
        // thread that is itself waiting on the registry
        let released = self.registry.release_subscription(self.id);
        if released.is_some() {
            debug!(subscription = self.id, "Discovery subscription released");
        }
        drop(released);
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl Drop for DiscoveryStream {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for DiscoveryStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryStream")
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}
