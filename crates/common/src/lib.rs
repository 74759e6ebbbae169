//! Common utilities for fpscan
//!
//! This crate provides infrastructure shared by the scanner core and its
//! binaries: the infrastructure error type, tracing setup, the ordered
//! event queues that carry native notifications to the consumer. Test
//! utilities are available behind the `test-utils` feature.

pub mod channel;
pub mod error;
pub mod logging;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use channel::{
    DEFAULT_QUEUE_CAPACITY, EventReceiver, EventSender, Polled, TrySend, event_queue,
    unbounded_event_queue,
};
pub use error::{Error, Result};
pub use logging::{LogStyle, setup_logging, setup_logging_with};
