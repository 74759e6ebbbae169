//! libusb-backed USB access provider
//!
//! Enumerates allow-listed scanners, checks access by trial open, claims
//! the device's interfaces for the native engine, and watches hotplug on a
//! dedicated `usb-hotplug` thread that drives libusb event handling.
//!
//! libusb forbids I/O inside hotplug callbacks, so the callback only
//! forwards the device to the watch thread, which reads string
//! descriptors and notifies the registry between `handle_events` calls.

use crate::registry::HotplugSink;
use crate::usb::filter::check_filter;
use crate::usb::provider::{TransportHandle, UsbAccessProvider, WatchGuard};
use common::{Error, EventSender, Polled, Result, unbounded_event_queue};
use protocol::{DeviceId, UsbDeviceEntry};
use rusb::{Context, Device, DeviceHandle, Hotplug, HotplugBuilder, UsbContext};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Root hubs (Linux Foundation, hub class) are never scanners
const ROOT_HUB_VENDOR_ID: u16 = 0x1d6b;
const HUB_CLASS: u8 = 9;

const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(100);

struct OpenTransport {
    handle: DeviceHandle<Context>,
    claimed: Vec<u8>,
}

/// USB access through libusb
pub struct RusbProvider {
    context: Context,
    filters: Vec<String>,
    open: Mutex<HashMap<DeviceId, OpenTransport>>,
}

impl RusbProvider {
    /// Create a provider limited to the given VID:PID filters
    pub fn new(filters: Vec<String>) -> Result<Self> {
        let context = Context::new().map_err(map_rusb_error)?;
        Ok(Self {
            context,
            filters,
            open: Mutex::new(HashMap::new()),
        })
    }

    fn find_device(&self, id: DeviceId) -> Result<Device<Context>> {
        find_device(&self.context, id)
    }
}

/// Stable id for a device: bus number and address
pub fn device_id(bus: u8, address: u8) -> DeviceId {
    DeviceId((u32::from(bus) << 8) | u32::from(address))
}

fn device_id_of<T: UsbContext>(device: &Device<T>) -> DeviceId {
    device_id(device.bus_number(), device.address())
}

fn find_device(context: &Context, id: DeviceId) -> Result<Device<Context>> {
    context
        .devices()
        .map_err(map_rusb_error)?
        .iter()
        .find(|d| device_id_of(d) == id)
        .ok_or_else(|| Error::NotFound(id.to_string()))
}

/// Map a libusb error to the infrastructure error type
pub fn map_rusb_error(e: rusb::Error) -> Error {
    match e {
        rusb::Error::NotFound | rusb::Error::NoDevice => Error::NotFound(e.to_string()),
        rusb::Error::Access => Error::PermissionDenied(e.to_string()),
        _ => Error::Usb(e.to_string()),
    }
}

/// Enumeration record for an allow-listed device, reading its strings
fn describe_device(device: &Device<Context>, filters: &[String]) -> Option<UsbDeviceEntry> {
    let id = device_id_of(device);
    let descriptor = device.device_descriptor().ok()?;

    if descriptor.vendor_id() == ROOT_HUB_VENDOR_ID && descriptor.class_code() == HUB_CLASS {
        return None;
    }
    if !check_filter(descriptor.vendor_id(), descriptor.product_id(), filters) {
        debug!(
            device = %id,
            vid = format_args!("{:#06x}", descriptor.vendor_id()),
            pid = format_args!("{:#06x}", descriptor.product_id()),
            "Device ignored by filter"
        );
        return None;
    }

    // Strings need an open handle; without access they stay unknown
    let handle = device.open().ok();
    let read = |index: Option<u8>| {
        let handle = handle.as_ref()?;
        handle.read_string_descriptor_ascii(index?).ok()
    };

    Some(UsbDeviceEntry {
        id,
        vendor_id: descriptor.vendor_id(),
        product_id: descriptor.product_id(),
        manufacturer: read(descriptor.manufacturer_string_index()),
        product: read(descriptor.product_string_index()),
        serial_number: read(descriptor.serial_number_string_index()),
    })
}

fn check_access(context: &Context, id: DeviceId) -> bool {
    find_device(context, id).is_ok_and(|device| device.open().is_ok())
}

impl UsbAccessProvider for RusbProvider {
    fn enumerate(&self) -> Result<Vec<UsbDeviceEntry>> {
        let devices = self.context.devices().map_err(map_rusb_error)?;
        let entries: Vec<_> = devices
            .iter()
            .filter_map(|device| describe_device(&device, &self.filters))
            .collect();
        debug!(count = entries.len(), "Enumerated allow-listed USB devices");
        Ok(entries)
    }

    fn has_permission(&self, device: DeviceId) -> bool {
        let open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        open.contains_key(&device) || check_access(&self.context, device)
    }

    fn request_permission(&self, device: DeviceId, sink: HotplugSink) {
        // libusb has no prompt: access is whatever the device node allows
        let context = self.context.clone();
        let spawned = thread::Builder::new()
            .name("usb-permission".to_string())
            .spawn(move || {
                let granted = check_access(&context, device);
                if !granted {
                    warn!(device = %device, "No access to device node; check udev rules");
                }
                sink.permission_result(device, granted);
            });
        if let Err(e) = spawned {
            error!("Failed to spawn permission check thread: {}", e);
        }
    }

    fn open_transport(&self, device: DeviceId) -> Result<TransportHandle> {
        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        if open.contains_key(&device) {
            return Err(Error::Usb(format!("{} already has an open transport", device)));
        }

        let usb_device = self.find_device(device)?;
        let mut handle = usb_device.open().map_err(|e| {
            warn!(device = %device, "Failed to open device: {}", e);
            map_rusb_error(e)
        })?;
        let config = usb_device
            .active_config_descriptor()
            .map_err(map_rusb_error)?;

        let mut claimed = Vec::new();
        for interface in config.interfaces() {
            let number = interface.number();

            match handle.kernel_driver_active(number) {
                Ok(true) => {
                    if let Err(e) = handle.detach_kernel_driver(number) {
                        warn!("Failed to detach kernel driver from interface {}: {}", number, e);
                    }
                }
                Ok(false) => {}
                Err(e) => debug!("Kernel driver state unknown for interface {}: {}", number, e),
            }

            if let Err(e) = handle.claim_interface(number) {
                warn!(device = %device, "Failed to claim interface {}: {}", number, e);
                release_interfaces(&mut handle, &claimed);
                return Err(map_rusb_error(e));
            }
            claimed.push(number);
        }

        debug!(device = %device, interfaces = ?claimed, "Transport opened");
        open.insert(device, OpenTransport { handle, claimed });
        Ok(TransportHandle::new(device))
    }

    fn release_transport(&self, transport: TransportHandle) {
        let removed = {
            let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
            open.remove(&transport.device)
        };
        match removed {
            Some(mut open) => {
                release_interfaces(&mut open.handle, &open.claimed);
                debug!(device = %transport.device, "Transport released");
            }
            None => debug!(device = %transport.device, "Release for unknown transport"),
        }
    }

    fn watch(&self, sink: HotplugSink) -> Result<WatchGuard> {
        if !rusb::has_hotplug() {
            warn!("libusb hotplug unsupported; attach and detach require enumerate()");
            return Ok(WatchGuard::noop());
        }

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let context = self.context.clone();
        let filters = self.filters.clone();

        let worker = thread::Builder::new()
            .name("usb-hotplug".to_string())
            .spawn(move || run_hotplug(context, filters, sink, thread_stop))?;

        Ok(WatchGuard::new(move || {
            stop.store(true, Ordering::SeqCst);
            if worker.join().is_err() {
                error!("USB hotplug thread panicked");
            }
        }))
    }
}

fn release_interfaces(handle: &mut DeviceHandle<Context>, interfaces: &[u8]) {
    for &interface in interfaces {
        if let Err(e) = handle.release_interface(interface) {
            warn!("Failed to release interface {}: {}", interface, e);
        }
        // Restores kernel control; fails harmlessly if nothing was detached
        if let Err(e) = handle.attach_kernel_driver(interface) {
            debug!("Could not reattach kernel driver to interface {}: {}", interface, e);
        }
    }
}

enum HotplugNotice {
    Arrived(Device<Context>),
    Left(DeviceId),
}

struct HotplugCallback {
    notices: EventSender<HotplugNotice>,
}

impl Hotplug<Context> for HotplugCallback {
    fn device_arrived(&mut self, device: Device<Context>) {
        let _ = self.notices.try_send(HotplugNotice::Arrived(device));
    }

    fn device_left(&mut self, device: Device<Context>) {
        let _ = self.notices.try_send(HotplugNotice::Left(device_id_of(&device)));
    }
}

fn run_hotplug(context: Context, filters: Vec<String>, sink: HotplugSink, stop: Arc<AtomicBool>) {
    let (notices, rx) = unbounded_event_queue();
    let registration = match HotplugBuilder::new()
        .enumerate(false)
        .register(&context, Box::new(HotplugCallback { notices }))
    {
        Ok(registration) => registration,
        Err(e) => {
            error!("Failed to register hotplug callback: {}", e);
            return;
        }
    };
    info!("USB hotplug watch started");

    while !stop.load(Ordering::SeqCst) {
        match context.handle_events(Some(EVENT_POLL_INTERVAL)) {
            Ok(()) => {}
            Err(rusb::Error::Interrupted) => debug!("USB event handling interrupted"),
            Err(e) => {
                warn!("Error handling USB events: {}", e);
                thread::sleep(EVENT_POLL_INTERVAL);
            }
        }

        while let Polled::Ready(notice) = rx.try_recv() {
            match notice {
                HotplugNotice::Arrived(device) => {
                    if let Some(entry) = describe_device(&device, &filters) {
                        sink.attached(entry);
                    }
                }
                HotplugNotice::Left(id) => sink.detached(id),
            }
        }
    }

    drop(registration);
    info!("USB hotplug watch stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_from_bus_and_address() {
        assert_eq!(device_id(1, 4), DeviceId(0x0104));
        assert_eq!(device_id(3, 0xff), DeviceId(0x03ff));
        assert_ne!(device_id(1, 2), device_id(2, 1));
    }

    #[test]
    fn test_map_rusb_error() {
        assert!(matches!(map_rusb_error(rusb::Error::NoDevice), Error::NotFound(_)));
        assert!(matches!(map_rusb_error(rusb::Error::Access), Error::PermissionDenied(_)));
        assert!(matches!(map_rusb_error(rusb::Error::Pipe), Error::Usb(_)));
    }
}
