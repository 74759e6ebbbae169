//! Simulated USB access provider
//!
//! Devices are attached, detached and granted access under test control.
//! Attach and detach notify every active watch, from the calling thread;
//! permission requests are answered from a `sim-permission` thread.

use crate::registry::HotplugSink;
use crate::usb::{TransportHandle, UsbAccessProvider, WatchGuard};
use common::{Error, Result};
use protocol::{DeviceId, UsbDeviceEntry};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use tracing::{debug, error};

struct SimUsbDevice {
    entry: UsbDeviceEntry,
    permitted: bool,
}

#[derive(Default)]
struct ProviderState {
    devices: Vec<SimUsbDevice>,
    open: HashSet<DeviceId>,
    watchers: Vec<(u64, HotplugSink)>,
    next_watch: u64,
    unavailable: bool,
    auto_grant: bool,
}

fn lock_state(state: &Mutex<ProviderState>) -> MutexGuard<'_, ProviderState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Vendor and product id reported by simulated scanners
pub const SIM_VENDOR_ID: u16 = 0x113F;
pub const SIM_PRODUCT_ID: u16 = 0x1100;

/// Enumeration record for simulated scanner `id`
pub fn simulated_entry(id: u32) -> UsbDeviceEntry {
    UsbDeviceEntry {
        id: DeviceId(id),
        vendor_id: SIM_VENDOR_ID,
        product_id: SIM_PRODUCT_ID,
        manufacturer: Some("Integrated Biometrics".to_string()),
        product: Some(format!("Simulated Scanner {}", id)),
        serial_number: Some(format!("SIM{:06}", id)),
    }
}

/// In-process provider with scripted devices
#[derive(Clone, Default)]
pub struct SimulatedProvider {
    state: Arc<Mutex<ProviderState>>,
}

impl SimulatedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider with `count` accessible simulated scanners, ids from 1
    pub fn with_scanners(count: u32) -> Self {
        Self::with_devices((1..=count).map(simulated_entry))
    }

    /// Provider with the given devices attached and accessible
    pub fn with_devices(entries: impl IntoIterator<Item = UsbDeviceEntry>) -> Self {
        let provider = Self::new();
        {
            let mut state = provider.lock();
            state.devices = entries
                .into_iter()
                .map(|entry| SimUsbDevice {
                    entry,
                    permitted: true,
                })
                .collect();
        }
        provider
    }

    fn lock(&self) -> MutexGuard<'_, ProviderState> {
        lock_state(&self.state)
    }

    fn watchers(&self) -> Vec<HotplugSink> {
        self.lock().watchers.iter().map(|(_, s)| s.clone()).collect()
    }

    /// Attach an accessible device
    pub fn attach(&self, entry: UsbDeviceEntry) {
        self.attach_with(entry, true);
    }

    /// Attach a device that needs a permission grant before opening
    pub fn attach_without_permission(&self, entry: UsbDeviceEntry) {
        self.attach_with(entry, false);
    }

    fn attach_with(&self, entry: UsbDeviceEntry, permitted: bool) {
        {
            let mut state = self.lock();
            if state.devices.iter().any(|d| d.entry.id == entry.id) {
                return;
            }
            state.devices.push(SimUsbDevice {
                entry: entry.clone(),
                permitted,
            });
        }
        debug!(device = %entry.id, permitted, "Simulated attach");
        for sink in self.watchers() {
            sink.attached(entry.clone());
        }
    }

    pub fn detach(&self, id: DeviceId) {
        {
            let mut state = self.lock();
            let before = state.devices.len();
            state.devices.retain(|d| d.entry.id != id);
            if state.devices.len() == before {
                return;
            }
            state.open.remove(&id);
        }
        debug!(device = %id, "Simulated detach");
        for sink in self.watchers() {
            sink.detached(id);
        }
    }

    pub fn set_permission(&self, id: DeviceId, granted: bool) {
        let mut state = self.lock();
        if let Some(device) = state.devices.iter_mut().find(|d| d.entry.id == id) {
            device.permitted = granted;
        }
    }

    /// Make every provider call fail as if the platform service were down
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Grant access when a permission request arrives
    pub fn set_auto_grant(&self, grant: bool) {
        self.lock().auto_grant = grant;
    }

    pub fn is_transport_open(&self, id: DeviceId) -> bool {
        self.lock().open.contains(&id)
    }

    pub fn watcher_count(&self) -> usize {
        self.lock().watchers.len()
    }
}

impl UsbAccessProvider for SimulatedProvider {
    fn enumerate(&self) -> Result<Vec<UsbDeviceEntry>> {
        let state = self.lock();
        if state.unavailable {
            return Err(Error::Usb("simulated USB service unavailable".to_string()));
        }
        Ok(state.devices.iter().map(|d| d.entry.clone()).collect())
    }

    fn has_permission(&self, device: DeviceId) -> bool {
        self.lock()
            .devices
            .iter()
            .any(|d| d.entry.id == device && d.permitted)
    }

    fn request_permission(&self, device: DeviceId, sink: HotplugSink) {
        let state = self.state.clone();
        let spawned = thread::Builder::new()
            .name("sim-permission".to_string())
            .spawn(move || {
                let granted = {
                    let mut state = lock_state(&state);
                    let auto_grant = state.auto_grant;
                    match state.devices.iter_mut().find(|d| d.entry.id == device) {
                        Some(d) => {
                            d.permitted |= auto_grant;
                            d.permitted
                        }
                        None => false,
                    }
                };
                sink.permission_result(device, granted);
            });
        if let Err(e) = spawned {
            error!("Failed to spawn simulated permission thread: {}", e);
        }
    }

    fn open_transport(&self, device: DeviceId) -> Result<TransportHandle> {
        let mut state = self.lock();
        if state.unavailable {
            return Err(Error::Usb("simulated USB service unavailable".to_string()));
        }
        let known = state
            .devices
            .iter()
            .find(|d| d.entry.id == device)
            .ok_or_else(|| Error::NotFound(device.to_string()))?;
        if !known.permitted {
            return Err(Error::PermissionDenied(device.to_string()));
        }
        if !state.open.insert(device) {
            return Err(Error::Usb(format!("{} already has an open transport", device)));
        }
        Ok(TransportHandle::new(device))
    }

    fn release_transport(&self, transport: TransportHandle) {
        self.lock().open.remove(&transport.device);
    }

    fn watch(&self, sink: HotplugSink) -> Result<WatchGuard> {
        let id = {
            let mut state = self.lock();
            if state.unavailable {
                return Err(Error::Usb("simulated USB service unavailable".to_string()));
            }
            state.next_watch += 1;
            let id = state.next_watch;
            state.watchers.push((id, sink));
            id
        };

        let state = self.state.clone();
        Ok(WatchGuard::new(move || {
            lock_state(&state).watchers.retain(|(w, _)| *w != id);
        }))
    }
}

impl std::fmt::Debug for SimulatedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("SimulatedProvider")
            .field("devices", &state.devices.len())
            .field("open", &state.open.len())
            .field("watchers", &state.watchers.len())
            .finish()
    }
}
