//! Simulated native engine
//!
//! Behaves like a scanner engine with a configurable number of devices.
//! With the auto script enabled, every accepted capture plays a short
//! acquisition on an `sim-capture` thread: acquisition begun, then one
//! preview and quality update per scripted quality, then both result
//! callbacks. Tests can instead drive the [`CallbackSink`] directly from
//! any thread.

use crate::dispatch::CallbackSink;
use crate::engine::{
    NativeDeviceDescription, NativeEngine, NativeResult, OpenOptions, RawCaptureResult,
    RawExtendedResult, RawRollingInfo, SdkVersion,
};
use crate::usb::TransportHandle;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use protocol::{
    CaptureOptions, EventType, FailureCode, FingerCountState, FingerQuality, Hand, ImageFrame,
    ImageResolution, ImageType, LedKind, LedState, NativeHandle, PropertyId, RawImage,
    SegmentPosition, translate,
};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Key accepted by [`NativeEngine::set_property_reserved`]
pub const SIM_RESERVED_KEY: &str = "sim-reserved-key";

const FRAME_WIDTH: u32 = 64;
const FRAME_HEIGHT: u32 = 64;
const WSQ_MAGIC: &[u8; 4] = b"SWSQ";

/// Engine requests that can be made to fail once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimOp {
    Open,
    Close,
    BeginCapture,
    CancelCapture,
    CaptureManually,
    SetProperty,
    GetProperty,
    SetContrast,
}

fn status(code: FailureCode) -> i32 {
    code.native_code().unwrap_or(-10)
}

struct RunningCapture {
    token: u64,
    image_type: ImageType,
}

struct SimDevice {
    index: usize,
    contrast: i32,
    properties: HashMap<i32, String>,
    leds: u32,
    capture: Option<RunningCapture>,
    disabled_events: HashSet<EventType>,
}

impl SimDevice {
    fn new(index: usize) -> Self {
        Self {
            index,
            contrast: 12,
            properties: HashMap::new(),
            leds: 0,
            capture: None,
            disabled_events: HashSet::new(),
        }
    }

    fn identity(&self, id: PropertyId) -> Option<String> {
        let value = match id {
            PropertyId::ProductId => "Columbo".to_string(),
            PropertyId::SerialNumber => format!("SIM{:06}", self.index + 1),
            PropertyId::VendorId => "Integrated Biometrics".to_string(),
            PropertyId::Firmware => "3.1.0".to_string(),
            PropertyId::Revision => "1".to_string(),
            PropertyId::ImageWidth => FRAME_WIDTH.to_string(),
            PropertyId::ImageHeight => FRAME_HEIGHT.to_string(),
            PropertyId::DeviceIndex => self.index.to_string(),
            _ => return None,
        };
        Some(value)
    }
}

struct EngineState {
    sink: Option<CallbackSink>,
    device_count: usize,
    next_handle: u32,
    next_token: u64,
    open: HashMap<NativeHandle, SimDevice>,
    failures: HashMap<SimOp, i32>,
    open_progress: Vec<i32>,
    auto_script: bool,
    quality_script: Vec<FingerQuality>,
    result_status: i32,
    step_delay: Duration,
    open_options: HashMap<usize, OpenOptions>,
    rolling_override: Option<RawRollingInfo>,
}

impl EngineState {
    fn take_failure(&mut self, op: SimOp) -> NativeResult<()> {
        match self.failures.remove(&op) {
            Some(code) => {
                debug!(?op, code, "Injected engine failure");
                Err(code)
            }
            None => Ok(()),
        }
    }

    fn device(&mut self, handle: NativeHandle) -> NativeResult<&mut SimDevice> {
        self.open
            .get_mut(&handle)
            .ok_or(status(FailureCode::ChannelIoInvalidHandle))
    }

    fn event_enabled(&self, handle: NativeHandle, event: EventType) -> bool {
        self.open
            .get(&handle)
            .is_some_and(|d| !d.disabled_events.contains(&event))
    }
}

/// Scriptable in-process native engine
#[derive(Clone)]
pub struct SimulatedEngine {
    state: Arc<Mutex<EngineState>>,
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::with_devices(1)
    }
}

impl SimulatedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_devices(count: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(EngineState {
                sink: None,
                device_count: count,
                next_handle: 1,
                next_token: 1,
                open: HashMap::new(),
                failures: HashMap::new(),
                open_progress: vec![0, 25, 50, 75, 100],
                auto_script: true,
                quality_script: vec![
                    FingerQuality::NotPresent,
                    FingerQuality::Poor,
                    FingerQuality::Good,
                ],
                result_status: 0,
                step_delay: Duration::from_millis(5),
                open_options: HashMap::new(),
                rolling_override: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        lock_state(&self.state)
    }

    /// The sink registered by the scanner, for driving callbacks by hand
    pub fn sink(&self) -> Option<CallbackSink> {
        self.lock().sink.clone()
    }

    /// Native handle of the open device at an index
    pub fn handle_for(&self, index: usize) -> Option<NativeHandle> {
        self.lock()
            .open
            .iter()
            .find(|(_, d)| d.index == index)
            .map(|(h, _)| *h)
    }

    pub fn is_open(&self, handle: NativeHandle) -> bool {
        self.lock().open.contains_key(&handle)
    }

    pub fn is_capturing(&self, handle: NativeHandle) -> bool {
        self.lock()
            .open
            .get(&handle)
            .is_some_and(|d| d.capture.is_some())
    }

    /// Change the device count and report it like the engine would
    pub fn set_device_count(&self, count: usize) {
        let sink = {
            let mut state = self.lock();
            state.device_count = count;
            state.sink.clone()
        };
        if let Some(sink) = sink {
            sink.device_count_changed(i32::try_from(count).unwrap_or(i32::MAX));
        }
    }

    /// Make the next call of `op` fail with a native status
    pub fn fail_next(&self, op: SimOp, code: i32) {
        self.lock().failures.insert(op, code);
    }

    /// Progress values reported while opening
    pub fn set_open_progress(&self, progress: Vec<i32>) {
        self.lock().open_progress = progress;
    }

    /// Whether captures play the acquisition script on their own
    pub fn set_auto_script(&self, enabled: bool) {
        self.lock().auto_script = enabled;
    }

    /// Qualities reported for every finger slot, one step each
    pub fn set_quality_script(&self, qualities: Vec<FingerQuality>) {
        self.lock().quality_script = qualities;
    }

    /// Status attached to extended results
    pub fn set_result_status(&self, status: i32) {
        self.lock().result_status = status;
    }

    pub fn set_step_delay(&self, delay: Duration) {
        self.lock().step_delay = delay;
    }

    /// Options passed with the most recent open of an index
    pub fn open_options(&self, index: usize) -> Option<OpenOptions> {
        self.lock().open_options.get(&index).cloned()
    }

    /// Report fixed roll info for every running capture instead of the
    /// value derived from its image type
    pub fn set_rolling_info(&self, info: Option<RawRollingInfo>) {
        self.lock().rolling_override = info;
    }

    /// End the running capture now and deliver its result
    pub fn finish_capture(&self, handle: NativeHandle) -> bool {
        finish_capture(&self.state, handle, None)
    }
}

fn lock_state(state: &Mutex<EngineState>) -> MutexGuard<'_, EngineState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Open `index`, reporting progress first; shared by sync and async open
fn open_index(
    state: &Mutex<EngineState>,
    index: usize,
    options: OpenOptions,
) -> NativeResult<NativeHandle> {
    let (sink, progress) = {
        let mut state = lock_state(state);
        state.open_options.insert(index, options);
        state.take_failure(SimOp::Open)?;
        if index >= state.device_count {
            return Err(status(FailureCode::DeviceNotFound));
        }
        if state.open.values().any(|d| d.index == index) {
            return Err(status(FailureCode::DeviceActive));
        }
        (state.sink.clone(), state.open_progress.clone())
    };

    if let Some(sink) = &sink {
        for value in progress {
            sink.init_progress(index, value);
        }
    }

    let mut state = lock_state(state);
    let handle = NativeHandle(state.next_handle);
    state.next_handle += 1;
    state.open.insert(handle, SimDevice::new(index));
    info!(index, handle = handle.0, "Simulated device opened");
    Ok(handle)
}

/// Take the running capture matching `token` (any capture if `None`)
/// and deliver its completion on a worker thread
fn finish_capture(state: &Arc<Mutex<EngineState>>, handle: NativeHandle, token: Option<u64>) -> bool {
    let (sink, image_type, result_status) = {
        let mut guard = lock_state(state);
        let result_status = guard.result_status;
        let sink = guard.sink.clone();
        let Some(device) = guard.open.get_mut(&handle) else {
            return false;
        };
        let Some(capture) = device
            .capture
            .take_if(|c| token.is_none_or(|t| t == c.token))
        else {
            return false;
        };
        (sink, capture.image_type, result_status)
    };

    let Some(sink) = sink else {
        return true;
    };
    let spawned = thread::Builder::new()
        .name("sim-capture".to_string())
        .spawn(move || deliver_result(&sink, handle, image_type, result_status));
    if let Err(e) = spawned {
        error!("Failed to spawn simulated capture thread: {}", e);
    }
    true
}

fn is_live(state: &Mutex<EngineState>, handle: NativeHandle, token: u64) -> bool {
    lock_state(state)
        .open
        .get(&handle)
        .and_then(|d| d.capture.as_ref())
        .is_some_and(|c| c.token == token)
}

struct Script {
    image_type: ImageType,
    qualities: Vec<FingerQuality>,
    delay: Duration,
}

fn run_script(state: Arc<Mutex<EngineState>>, sink: CallbackSink, handle: NativeHandle, token: u64, script: Script) {
    let slots = script.image_type.finger_slots().max(1);

    if !is_live(&state, handle, token) {
        return;
    }
    sink.acquisition_begun(handle, script.image_type.code());
    sink.platen_state_changed(handle, 1);

    let mut count = None;
    for quality in script.qualities {
        thread::sleep(script.delay);
        if !is_live(&state, handle, token) {
            debug!(handle = handle.0, "Simulated capture ended early");
            return;
        }

        let (previews, qualities, counts) = {
            let guard = lock_state(&state);
            (
                guard.event_enabled(handle, EventType::PreviewImage),
                guard.event_enabled(handle, EventType::FingerQuality),
                guard.event_enabled(handle, EventType::FingerCount),
            )
        };

        let next_count = if quality == FingerQuality::NotPresent {
            FingerCountState::TooFew
        } else {
            FingerCountState::Ok
        };
        if counts && count != Some(next_count) {
            sink.finger_count_changed(handle, next_count.code());
            count = Some(next_count);
        }
        if previews {
            sink.preview_available(handle, noise_image(FRAME_WIDTH * slots as u32, FRAME_HEIGHT));
        }
        if qualities {
            sink.finger_quality_changed(handle, &vec![quality.code(); slots]);
        }
    }

    thread::sleep(script.delay);
    if !is_live(&state, handle, token) {
        return;
    }
    finish_capture(&state, handle, Some(token));
}

fn deliver_result(sink: &CallbackSink, handle: NativeHandle, image_type: ImageType, result_status: i32) {
    let slots = image_type.finger_slots().max(1);
    let width = FRAME_WIDTH * slots as u32;

    sink.acquisition_completed(handle, image_type.code());

    let segments: Vec<RawImage> = (0..slots)
        .map(|_| gradient_image(FRAME_WIDTH, FRAME_HEIGHT))
        .collect();
    let positions = (0..slots as i32)
        .map(|i| {
            let x = i * FRAME_WIDTH as i32;
            let (w, h) = (FRAME_WIDTH as i32, FRAME_HEIGHT as i32);
            SegmentPosition {
                x1: x,
                y1: 0,
                x2: x + w,
                y2: 0,
                x3: x + w,
                y3: h,
                x4: x,
                y4: h,
            }
        })
        .collect();

    sink.result_available(
        handle,
        RawCaptureResult {
            image: gradient_image(width, FRAME_HEIGHT),
            image_type: image_type.code(),
            split_images: segments.clone(),
        },
    );
    sink.result_extended(
        handle,
        RawExtendedResult {
            status: result_status,
            image: gradient_image(width, FRAME_HEIGHT),
            image_type: image_type.code(),
            detected_finger_count: slots as i32,
            segments,
            positions,
        },
    );
    sink.platen_state_changed(handle, 0);
}

fn gray_image(width: u32, height: u32, buffer: Vec<u8>, is_final: bool) -> RawImage {
    RawImage {
        buffer,
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

fn noise_image(width: u32, height: u32) -> RawImage {
    let mut buffer = vec![0u8; width as usize * height as usize];
    rand::rng().fill(&mut buffer[..]);
    gray_image(width, height, buffer, false)
}

fn gradient_image(width: u32, height: u32) -> RawImage {
    let buffer = (0..width as usize * height as usize)
        .map(|i| (i % 256) as u8)
        .collect();
    gray_image(width, height, buffer, true)
}

/// Pixels of a frame without row padding
fn packed_pixels(image: &ImageFrame) -> Vec<u8> {
    let row_len = image.width() as usize * image.format().bytes_per_pixel();
    (0..image.height())
        .filter_map(|y| image.row(y))
        .flat_map(|row| row[..row_len.min(row.len())].iter().copied())
        .collect()
}

impl NativeEngine for SimulatedEngine {
    fn register_callbacks(&self, sink: CallbackSink) {
        let mut state = self.lock();
        if state.sink.is_some() {
            warn!("Callback sink registered twice; replacing");
        }
        state.sink = Some(sink);
    }

    fn sdk_version(&self) -> NativeResult<SdkVersion> {
        Ok(SdkVersion {
            product: "fpscan simulated engine".to_string(),
            file: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    fn device_count(&self) -> NativeResult<usize> {
        Ok(self.lock().device_count)
    }

    fn device_description(&self, index: usize) -> NativeResult<NativeDeviceDescription> {
        let state = self.lock();
        if index >= state.device_count {
            return Err(status(FailureCode::DeviceNotFound));
        }
        let sample = SimDevice::new(index);
        let text = |id| sample.identity(id).unwrap_or_default();
        Ok(NativeDeviceDescription {
            serial_number: text(PropertyId::SerialNumber),
            product_name: text(PropertyId::ProductId),
            interface_type: "USB".to_string(),
            firmware: text(PropertyId::Firmware),
            revision: text(PropertyId::Revision),
            is_open: state.open.values().any(|d| d.index == index),
            is_locked: false,
            customer_string: String::new(),
            device_id: index as u32,
        })
    }

    fn error_string(&self, status: i32) -> NativeResult<String> {
        Ok(translate(status)
            .map(|f| f.code.description().to_string())
            .unwrap_or_else(|| "success".to_string()))
    }

    fn open_device(
        &self,
        index: usize,
        transport: &TransportHandle,
        options: &OpenOptions,
    ) -> NativeResult<NativeHandle> {
        debug!(index, device = %transport.device, mask = ?options.uniformity_mask_path, "Simulated open");
        open_index(&self.state, index, options.clone())
    }

    fn open_device_async(
        &self,
        index: usize,
        transport: &TransportHandle,
        options: &OpenOptions,
    ) -> NativeResult<()> {
        if index >= self.lock().device_count {
            return Err(status(FailureCode::DeviceNotFound));
        }
        debug!(index, device = %transport.device, "Simulated async open");

        let state = self.state.clone();
        let options = options.clone();
        thread::Builder::new()
            .name("sim-open".to_string())
            .spawn(move || {
                let result = open_index(&state, index, options);
                let sink = lock_state(&state).sink.clone();
                match sink {
                    Some(sink) => sink.open_complete(index, result),
                    None => warn!(index, "Async open finished with no callback sink"),
                }
            })
            .map(|_| ())
            .map_err(|e| {
                error!("Failed to spawn simulated open thread: {}", e);
                status(FailureCode::ThreadCreate)
            })
    }

    fn close_device(&self, handle: NativeHandle) -> NativeResult<()> {
        let mut state = self.lock();
        let injected = state.take_failure(SimOp::Close);
        let removed = state.open.remove(&handle);
        injected?;
        match removed {
            Some(device) => {
                info!(index = device.index, handle = handle.0, "Simulated device closed");
                Ok(())
            }
            None => Err(status(FailureCode::ChannelIoInvalidHandle)),
        }
    }

    fn set_property(&self, handle: NativeHandle, code: i32, value: &str) -> NativeResult<()> {
        let mut state = self.lock();
        state.take_failure(SimOp::SetProperty)?;
        let device = state.device(handle)?;
        device.properties.insert(code, value.to_string());
        Ok(())
    }

    fn get_property(&self, handle: NativeHandle, code: i32) -> NativeResult<String> {
        let mut state = self.lock();
        state.take_failure(SimOp::GetProperty)?;
        let device = state.device(handle)?;
        if let Some(value) = device.properties.get(&code) {
            return Ok(value.clone());
        }
        let id = PropertyId::from_code(code).ok_or(status(FailureCode::NotSupported))?;
        Ok(device
            .identity(id)
            .or_else(|| id.spec().default.map(str::to_string))
            .unwrap_or_default())
    }

    fn set_property_reserved(
        &self,
        handle: NativeHandle,
        reserved_key: &str,
        code: i32,
        value: &str,
    ) -> NativeResult<()> {
        let mut state = self.lock();
        let device = state.device(handle)?;
        if reserved_key != SIM_RESERVED_KEY {
            return Err(status(FailureCode::NotSupported));
        }
        device.properties.insert(code, value.to_string());
        Ok(())
    }

    fn is_capture_available(
        &self,
        handle: NativeHandle,
        image_type: ImageType,
        _resolution: ImageResolution,
    ) -> NativeResult<bool> {
        let mut state = self.lock();
        state.device(handle)?;
        Ok(image_type != ImageType::None)
    }

    fn begin_capture(
        &self,
        handle: NativeHandle,
        image_type: ImageType,
        _resolution: ImageResolution,
        _options: CaptureOptions,
    ) -> NativeResult<()> {
        let (sink, token, script) = {
            let mut state = self.lock();
            state.take_failure(SimOp::BeginCapture)?;
            let token = state.next_token;
            let auto = state.auto_script;
            let script = Script {
                image_type,
                qualities: state.quality_script.clone(),
                delay: state.step_delay,
            };
            let sink = state.sink.clone();

            let device = state.device(handle)?;
            if device.capture.is_some() {
                return Err(status(FailureCode::CaptureStillRunning));
            }
            device.capture = Some(RunningCapture { token, image_type });
            state.next_token += 1;
            (sink.filter(|_| auto), token, script)
        };

        if let Some(sink) = sink {
            let state = self.state.clone();
            let spawned = thread::Builder::new()
                .name("sim-capture".to_string())
                .spawn(move || run_script(state, sink, handle, token, script));
            if let Err(e) = spawned {
                error!("Failed to spawn simulated capture thread: {}", e);
            }
        }
        Ok(())
    }

    fn cancel_capture(&self, handle: NativeHandle) -> NativeResult<()> {
        let mut state = self.lock();
        state.take_failure(SimOp::CancelCapture)?;
        let device = state.device(handle)?;
        match device.capture.take() {
            Some(_) => Ok(()),
            None => Err(status(FailureCode::CaptureNotRunning)),
        }
    }

    fn capture_manually(&self, handle: NativeHandle) -> NativeResult<()> {
        {
            let mut state = self.lock();
            state.take_failure(SimOp::CaptureManually)?;
            if state.device(handle)?.capture.is_none() {
                return Err(status(FailureCode::CaptureNotRunning));
            }
        }
        finish_capture(&self.state, handle, None);
        Ok(())
    }

    fn is_capture_active(&self, handle: NativeHandle) -> NativeResult<bool> {
        let mut state = self.lock();
        Ok(state.device(handle)?.capture.is_some())
    }

    fn rolling_info(&self, handle: NativeHandle) -> NativeResult<RawRollingInfo> {
        let mut state = self.lock();
        let rolling_override = state.rolling_override;
        let capture = state.device(handle)?.capture.as_ref();
        let Some(capture) = capture else {
            return Err(status(FailureCode::CaptureNotRunning));
        };
        if let Some(info) = rolling_override {
            return Ok(info);
        }
        Ok(if capture.image_type == ImageType::RollSingleFinger {
            RawRollingInfo {
                state: 1,
                line_x: FRAME_WIDTH as i32 / 2,
            }
        } else {
            RawRollingInfo {
                state: 0,
                line_x: -1,
            }
        })
    }

    fn contrast(&self, handle: NativeHandle) -> NativeResult<i32> {
        let mut state = self.lock();
        Ok(state.device(handle)?.contrast)
    }

    fn set_contrast(&self, handle: NativeHandle, value: i32) -> NativeResult<()> {
        let mut state = self.lock();
        state.take_failure(SimOp::SetContrast)?;
        let device = state.device(handle)?;
        if !(0..=34).contains(&value) {
            return Err(status(FailureCode::InvalidParamValue));
        }
        device.contrast = value;
        Ok(())
    }

    fn enable_event(&self, handle: NativeHandle, event: EventType, enable: bool) -> NativeResult<()> {
        let mut state = self.lock();
        let device = state.device(handle)?;
        if enable {
            device.disabled_events.remove(&event);
        } else {
            device.disabled_events.insert(event);
        }
        Ok(())
    }

    fn calculate_nfiq(&self, handle: NativeHandle, image: &ImageFrame) -> NativeResult<u8> {
        self.lock().device(handle)?;
        let pixels = packed_pixels(image);
        if pixels.is_empty() {
            return Err(status(FailureCode::NfiqFailed));
        }
        let mean = pixels.iter().map(|p| u64::from(*p)).sum::<u64>() / pixels.len() as u64;
        Ok((1 + mean * 5 / 256).clamp(1, 5) as u8)
    }

    fn wsq_encode(&self, image: &ImageFrame, bitrate: f64) -> NativeResult<Bytes> {
        if !(bitrate.is_finite() && bitrate > 0.0) {
            return Err(status(FailureCode::InvalidParamValue));
        }
        let pixels = packed_pixels(image);
        let mut out = BytesMut::with_capacity(12 + pixels.len());
        out.put_slice(WSQ_MAGIC);
        out.put_u32_le(image.width());
        out.put_u32_le(image.height());
        out.put_slice(&pixels);
        Ok(out.freeze())
    }

    fn wsq_decode(&self, data: &[u8]) -> NativeResult<RawImage> {
        let failed = status(FailureCode::WsqDecodeFailed);
        let mut buf = data;
        if buf.len() < 12 || &buf[..4] != WSQ_MAGIC {
            return Err(failed);
        }
        buf.advance(4);
        let width = buf.get_u32_le();
        let height = buf.get_u32_le();
        if buf.len() != width as usize * height as usize {
            return Err(failed);
        }
        Ok(gray_image(width, height, buf.to_vec(), true))
    }

    fn combine_images(
        &self,
        handle: NativeHandle,
        first: &ImageFrame,
        second: &ImageFrame,
        hand: Hand,
    ) -> NativeResult<RawImage> {
        self.lock().device(handle)?;
        let gray = |f: &ImageFrame| f.format().bytes_per_pixel() == 1;
        if first.height() != second.height() || !gray(first) || !gray(second) {
            return Err(status(FailureCode::InvalidParamValue));
        }
        let (left, right) = match hand {
            Hand::Left => (first, second),
            Hand::Right => (second, first),
        };
        let (left_px, right_px) = (packed_pixels(left), packed_pixels(right));
        let (lw, rw) = (left.width() as usize, right.width() as usize);
        let buffer = (0..left.height() as usize)
            .flat_map(|y| {
                left_px[y * lw..(y + 1) * lw]
                    .iter()
                    .chain(&right_px[y * rw..(y + 1) * rw])
                    .copied()
            })
            .collect();
        Ok(gray_image(left.width() + right.width(), left.height(), buffer, true))
    }

    fn operable_leds(&self, handle: NativeHandle) -> NativeResult<LedState> {
        self.lock().device(handle)?;
        Ok(LedState {
            kind: LedKind::Tscan,
            count: 4,
            operable_mask: 0x0F,
        })
    }

    fn leds(&self, handle: NativeHandle) -> NativeResult<u32> {
        Ok(self.lock().device(handle)?.leds)
    }

    fn set_leds(&self, handle: NativeHandle, mask: u32) -> NativeResult<()> {
        self.lock().device(handle)?.leds = mask;
        Ok(())
    }
}

impl std::fmt::Debug for SimulatedEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("SimulatedEngine")
            .field("devices", &state.device_count)
            .field("open", &state.open.len())
            .field("auto_script", &state.auto_script)
            .finish()
    }
}
