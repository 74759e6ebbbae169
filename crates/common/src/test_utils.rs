//! Test utilities for fpscan
//!
//! Provides mock values and helper functions for testing across crates.
//! Built for this crate's own tests and, through the `test-utils` feature,
//! for the dev-dependencies of downstream crates.

use protocol::{
    DeviceId, FingerCountState, FingerQuality, ImageFrame, QualitySnapshot, RawImage,
    UsbDeviceEntry,
};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Vendor id used by mock scanners
pub const MOCK_VENDOR_ID: u16 = 0x113F;

/// Create a mock enumeration record
///
/// # Arguments
/// * `id` - Device ID number
/// * `vendor_id` - USB Vendor ID
/// * `product_id` - USB Product ID
pub fn create_mock_entry(id: u32, vendor_id: u16, product_id: u16) -> UsbDeviceEntry {
    UsbDeviceEntry {
        id: DeviceId(id),
        vendor_id,
        product_id,
        manufacturer: Some("Integrated Biometrics".to_string()),
        product: Some(format!("Test Scanner {}", id)),
        serial_number: Some(format!("SN{:06}", id)),
    }
}

/// Create a list of mock scanner entries with consecutive ids
pub fn create_mock_entry_list(count: u32) -> Vec<UsbDeviceEntry> {
    (1..=count)
        .map(|i| create_mock_entry(i, MOCK_VENDOR_ID, 0x1100))
        .collect()
}

/// Raw grayscale image with a deterministic gradient
pub fn create_mock_raw_image(width: u32, height: u32, is_final: bool) -> RawImage {
    let len = width as usize * height as usize;
    RawImage {
        buffer: (0..len).map(|i| (i % 256) as u8).collect(),
        width,
        height,
        resolution_x: 500.0,
        resolution_y: 500.0,
        frame_time: 0.05,
        pitch: width as i32,
        bits_per_pixel: 8,
        format: 0,
        is_final,
    }
}

/// Raw grayscale image filled with random noise
pub fn create_noise_raw_image(width: u32, height: u32) -> RawImage {
    let mut raw = create_mock_raw_image(width, height, false);
    rand::rng().fill(&mut raw.buffer[..]);
    raw
}

/// Typed grayscale frame
pub fn create_mock_frame(width: u32, height: u32, is_final: bool) -> ImageFrame {
    match ImageFrame::try_from(create_mock_raw_image(width, height, is_final)) {
        Ok(frame) => frame,
        Err(e) => panic!("mock image rejected: {}", e),
    }
}

/// Snapshot with the given per-finger qualities and an OK finger count
pub fn create_quality(fingers: &[FingerQuality]) -> QualitySnapshot {
    QualitySnapshot::new(fingers.to_vec(), FingerCountState::Ok)
}

/// Native codes for a sequence of qualities
pub fn quality_codes(fingers: &[FingerQuality]) -> Vec<i32> {
    fingers.iter().map(|q| q.code()).collect()
}

/// Timeout wrapper for async tests
///
/// Wraps an async operation with a timeout to prevent tests from hanging.
///
/// # Example
/// ```ignore
/// use common::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// #[tokio::test]
/// async fn test_with_timeout() {
///     let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await.unwrap();
///     assert_eq!(result, 42);
/// }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_mock_entry() {
        let entry = create_mock_entry(42, 0x1FBA, 0x0036);

        assert_eq!(entry.id.0, 42);
        assert_eq!(entry.vendor_id, 0x1FBA);
        assert_eq!(entry.product_id, 0x0036);
        assert!(entry.serial_number.is_some());
    }

    #[test]
    fn test_create_mock_entry_list_unique_ids() {
        let entries = create_mock_entry_list(10);
        let ids: std::collections::HashSet<_> = entries.iter().map(|e| e.id).collect();
        assert_eq!(ids.len(), 10);
    }

    #[test]
    fn test_mock_frame_is_valid() {
        let frame = create_mock_frame(16, 8, true);
        assert_eq!(frame.width(), 16);
        assert_eq!(frame.buffer().len(), 128);
        assert!(frame.is_final());
    }

    #[test]
    fn test_noise_image_has_geometry() {
        let raw = create_noise_raw_image(8, 8);
        assert_eq!(raw.buffer.len(), 64);
        assert!(ImageFrame::try_from(raw).is_ok());
    }

    #[test]
    fn test_quality_helpers() {
        let fingers = [FingerQuality::NotPresent, FingerQuality::Good];
        assert_eq!(create_quality(&fingers).primary(), FingerQuality::Good);
        assert_eq!(quality_codes(&fingers), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_with_timeout_success() {
        let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_timeout_failure() {
        let result = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
        })
        .await;

        assert!(result.is_err());
    }
}
