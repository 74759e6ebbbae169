//! In-process engine and USB provider
//!
//! Used by the test suites and by `fpscan --simulate`, where no native
//! engine is linked.

mod engine;
mod provider;

pub use engine::{SIM_RESERVED_KEY, SimOp, SimulatedEngine};
pub use provider::{SIM_PRODUCT_ID, SIM_VENDOR_ID, SimulatedProvider, simulated_entry};
