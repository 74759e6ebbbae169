//! USB access
//!
//! The boundary the core consumes ([`UsbAccessProvider`]), the allow-list
//! of scanner vendor/product ids, and the libusb-backed provider.
//!
//! libusb work that can block (hotplug event handling, permission checks)
//! runs on dedicated threads, never on the Tokio runtime.

pub mod filter;
pub mod provider;
pub mod rusb_provider;

pub use filter::{check_filter, default_filters, model_name, validate_filter};
pub use provider::{TransportHandle, UsbAccessProvider, WatchGuard, provider_failure};
pub use rusb_provider::RusbProvider;
