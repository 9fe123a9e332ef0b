//! Simulated camera for tests and hardware-less runs.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::capture::frame::{FrameMetadata, PixelFormat};
use crate::capture::hardware::{
    BufferQueue, CameraHardware, CameraInfo, CameraProvider, FrameCallback,
};
use crate::capture::negotiate::{Capabilities, FocusMode, FpsRange, PreviewConfiguration, Size};
use crate::display::{DisplaySurface, Facing};
use crate::error::{CameraError, Result};

/// Hardware operations recorded by the mock, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HardwareCall {
    SetDisplayOrientation(u32),
    SetParameters,
    SetDisplaySurface,
    AttachCallback,
    DetachCallback,
    StartPreview,
    StopPreview,
    AutoFocus,
    Release,
}

/// Test pattern written into delivered frames.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// Horizontal luma gradient from dark to light, neutral chroma.
    Gradient,
    /// Every luma sample equals the low byte of the frame sequence.
    Sequence,
    /// Solid color with specified Y, U, V values.
    Solid(u8, u8, u8),
}

/// Simulated camera. Cloning shares the same device.
#[derive(Clone)]
pub struct MockCamera {
    shared: Arc<Shared>,
}

struct Shared {
    present: bool,
    info: CameraInfo,
    capabilities: Capabilities,
    fail_surface: bool,
    fail_start: bool,
    frame_interval: Option<Duration>,
    pattern: TestPattern,

    opened: AtomicBool,
    opens: AtomicUsize,
    streaming: AtomicBool,
    queue: BufferQueue,
    callback: Mutex<Option<FrameCallback>>,
    calls: Mutex<Vec<HardwareCall>>,
    parameters: Mutex<Option<PreviewConfiguration>>,
    sequence: AtomicU64,
    epoch: Instant,
}

impl Default for MockCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCamera {
    /// Back camera mounted at 90 degrees with a typical phone feature set.
    pub fn new() -> Self {
        Self::build(Builder::default())
    }

    /// A device with no camera.
    pub fn absent() -> Self {
        Self::build(Builder {
            present: false,
            ..Builder::default()
        })
    }

    pub fn builder() -> Builder {
        Builder::default()
    }

    fn build(builder: Builder) -> Self {
        Self {
            shared: Arc::new(Shared {
                present: builder.present,
                info: builder.info,
                capabilities: builder.capabilities,
                fail_surface: builder.fail_surface,
                fail_start: builder.fail_start,
                frame_interval: builder.frame_interval,
                pattern: builder.pattern,
                opened: AtomicBool::new(false),
                opens: AtomicUsize::new(0),
                streaming: AtomicBool::new(false),
                queue: BufferQueue::new(),
                callback: Mutex::new(None),
                calls: Mutex::new(Vec::new()),
                parameters: Mutex::new(None),
                sequence: AtomicU64::new(0),
                epoch: Instant::now(),
            }),
        }
    }

    /// Handle for driving and inspecting the simulated hardware.
    pub fn controller(&self) -> MockController {
        MockController {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl CameraProvider for MockCamera {
    fn open(&self) -> Result<Box<dyn CameraHardware>> {
        if !self.shared.present {
            return Err(CameraError::DeviceUnavailable("no camera present".into()));
        }
        if self.shared.opened.swap(true, Ordering::AcqRel) {
            return Err(CameraError::DeviceUnavailable("camera in use".into()));
        }
        self.shared.opens.fetch_add(1, Ordering::Relaxed);
        debug!("Mock camera opened");
        Ok(Box::new(MockHardware {
            shared: Arc::clone(&self.shared),
            worker: None,
            released: false,
        }))
    }
}

/// Options for a [`MockCamera`].
pub struct Builder {
    present: bool,
    info: CameraInfo,
    capabilities: Capabilities,
    fail_surface: bool,
    fail_start: bool,
    frame_interval: Option<Duration>,
    pattern: TestPattern,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            present: true,
            info: CameraInfo {
                facing: Facing::Back,
                orientation: 90,
            },
            capabilities: Capabilities {
                preview_sizes: vec![
                    Size::new(640, 480),
                    Size::new(1280, 720),
                    Size::new(1920, 1080),
                ],
                fps_ranges: vec![FpsRange::new(15_000, 30_000), FpsRange::new(30_000, 30_000)],
                pixel_formats: vec![PixelFormat::Nv21, PixelFormat::Yv12],
                focus_modes: vec![
                    FocusMode::Auto,
                    FocusMode::ContinuousPicture,
                    FocusMode::ContinuousVideo,
                ],
            },
            fail_surface: false,
            fail_start: false,
            frame_interval: None,
            pattern: TestPattern::Sequence,
        }
    }
}

impl Builder {
    pub fn info(mut self, facing: Facing, orientation: u32) -> Self {
        self.info = CameraInfo { facing, orientation };
        self
    }

    pub fn capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Make `set_display_surface` fail.
    pub fn fail_surface(mut self) -> Self {
        self.fail_surface = true;
        self
    }

    /// Make `start_preview` fail.
    pub fn fail_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Produce frames on a background thread while streaming.
    pub fn frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = Some(interval);
        self
    }

    pub fn pattern(mut self, pattern: TestPattern) -> Self {
        self.pattern = pattern;
        self
    }

    pub fn build(self) -> MockCamera {
        MockCamera::build(self)
    }
}

/// Drives frame completions and exposes what the session did to the hardware.
#[derive(Clone)]
pub struct MockController {
    shared: Arc<Shared>,
}

impl MockController {
    /// Complete one frame into the next queued buffer.
    ///
    /// Returns false when not streaming, no callback is attached, or no
    /// buffer is queued (the frame is dropped, as real hardware does).
    pub fn complete_frame(&self) -> bool {
        self.shared.complete_frame()
    }

    /// Complete one frame that carries no data.
    ///
    /// The next queued buffer is consumed and lost. Same preconditions as
    /// [`complete_frame`](Self::complete_frame).
    pub fn complete_empty_frame(&self) -> bool {
        if !self.shared.streaming.load(Ordering::Acquire) {
            return false;
        }
        let mut callback = self.shared.callback.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(callback) = callback.as_mut() else {
            return false;
        };
        if self.shared.queue.take().is_none() {
            debug!("No buffer queued, empty frame dropped");
            return false;
        }

        callback(None, &self.shared.queue);
        true
    }

    pub fn queued_buffers(&self) -> usize {
        self.shared.queue.len()
    }

    /// Successful opens since the camera was built.
    pub fn open_count(&self) -> usize {
        self.shared.opens.load(Ordering::Relaxed)
    }

    pub fn is_open(&self) -> bool {
        self.shared.opened.load(Ordering::Acquire)
    }

    pub fn is_streaming(&self) -> bool {
        self.shared.streaming.load(Ordering::Acquire)
    }

    pub fn has_callback(&self) -> bool {
        self.shared
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn calls(&self) -> Vec<HardwareCall> {
        self.shared.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Last parameters applied with `set_parameters`.
    pub fn parameters(&self) -> Option<PreviewConfiguration> {
        self.shared
            .parameters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Shared {
    fn record(&self, call: HardwareCall) {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(call);
    }

    fn complete_frame(&self) -> bool {
        if !self.streaming.load(Ordering::Acquire) {
            return false;
        }
        let mut callback = self.callback.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(callback) = callback.as_mut() else {
            return false;
        };
        let Some(mut buffer) = self.queue.take() else {
            debug!("No buffer queued, frame dropped");
            return false;
        };

        let size = self
            .parameters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(Size::new(0, 0), |config| config.size);
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);

        fill_nv21(buffer.as_mut_slice(), size.width, self.pattern, sequence);
        let len = buffer.capacity();
        buffer.set_filled(len);
        buffer.set_metadata(FrameMetadata {
            sequence,
            width: size.width,
            height: size.height,
            format: PixelFormat::Nv21,
            device_timestamp: Some(self.epoch.elapsed()),
        });

        callback(Some(buffer), &self.queue);
        true
    }
}

/// Opened mock camera.
pub struct MockHardware {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
    released: bool,
}

impl MockHardware {
    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Mock frame thread panicked");
            }
        }
    }
}

impl CameraHardware for MockHardware {
    fn info(&self) -> CameraInfo {
        self.shared.info
    }

    fn capabilities(&self) -> Result<Capabilities> {
        Ok(self.shared.capabilities.clone())
    }

    fn set_parameters(&mut self, config: &PreviewConfiguration) -> Result<()> {
        self.shared.record(HardwareCall::SetParameters);
        *self
            .shared
            .parameters
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(config.clone());
        Ok(())
    }

    fn set_display_orientation(&mut self, degrees: u32) -> Result<()> {
        self.shared.record(HardwareCall::SetDisplayOrientation(degrees));
        Ok(())
    }

    fn set_display_surface(&mut self, surface: Arc<dyn DisplaySurface>) -> Result<()> {
        self.shared.record(HardwareCall::SetDisplaySurface);
        if self.shared.fail_surface {
            return Err(CameraError::Hardware(format!("cannot bind {}", surface.name())));
        }
        Ok(())
    }

    fn buffer_queue(&self) -> BufferQueue {
        self.shared.queue.clone()
    }

    fn set_frame_callback(&mut self, callback: Option<FrameCallback>) {
        self.shared.record(match callback {
            Some(_) => HardwareCall::AttachCallback,
            None => HardwareCall::DetachCallback,
        });
        *self.shared.callback.lock().unwrap_or_else(PoisonError::into_inner) = callback;
    }

    fn start_preview(&mut self) -> Result<()> {
        self.shared.record(HardwareCall::StartPreview);
        if self.shared.fail_start {
            return Err(CameraError::Hardware("preview refused to start".into()));
        }
        self.shared.streaming.store(true, Ordering::Release);

        if let Some(interval) = self.shared.frame_interval {
            let shared = Arc::clone(&self.shared);
            let worker = thread::Builder::new()
                .name("mock-capture".into())
                .spawn(move || {
                    while shared.streaming.load(Ordering::Acquire) {
                        shared.complete_frame();
                        thread::sleep(interval);
                    }
                })?;
            self.worker = Some(worker);
        }
        Ok(())
    }

    fn stop_preview(&mut self) -> Result<()> {
        self.shared.record(HardwareCall::StopPreview);
        self.shared.streaming.store(false, Ordering::Release);
        self.join_worker();
        Ok(())
    }

    fn auto_focus(&mut self) {
        self.shared.record(HardwareCall::AutoFocus);
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.shared.streaming.store(false, Ordering::Release);
        self.join_worker();
        *self.shared.callback.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.shared.record(HardwareCall::Release);
        self.shared.opened.store(false, Ordering::Release);
        debug!("Mock camera released");
    }
}

impl Drop for MockHardware {
    fn drop(&mut self) {
        self.release();
    }
}

/// Fill an NV21 frame: `width` luma columns, chroma after the luma plane.
fn fill_nv21(data: &mut [u8], width: u32, pattern: TestPattern, sequence: u64) {
    let luma_len = data.len() * 2 / 3;
    let (luma, chroma) = data.split_at_mut(luma_len);
    let width = width.max(1) as usize;

    match pattern {
        TestPattern::Gradient => {
            for (i, y) in luma.iter_mut().enumerate() {
                *y = ((i % width) * 255 / width) as u8;
            }
            chroma.fill(128);
        }
        TestPattern::Sequence => {
            luma.fill(sequence as u8);
            chroma.fill(128);
        }
        TestPattern::Solid(y, u, v) => {
            luma.fill(y);
            // NV21 interleaves V before U
            for pair in chroma.chunks_mut(2) {
                pair[0] = v;
                if let Some(second) = pair.get_mut(1) {
                    *second = u;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::FrameBuffer;

    #[test]
    fn absent_camera_cannot_open() {
        assert!(matches!(
            MockCamera::absent().open(),
            Err(CameraError::DeviceUnavailable(_))
        ));
    }

    #[test]
    fn busy_until_released() {
        let camera = MockCamera::new();
        let mut hardware = camera.open().expect("first open");
        assert!(camera.open().is_err());
        hardware.release();
        assert!(camera.open().is_ok());
    }

    #[test]
    fn frames_need_stream_callback_and_buffer() {
        let camera = MockCamera::new();
        let control = camera.controller();
        let mut hardware = camera.open().expect("open");
        assert!(!control.complete_frame());

        hardware.start_preview().expect("start");
        assert!(!control.complete_frame());

        let seen = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&seen);
        hardware.set_frame_callback(Some(Box::new(move |buffer: Option<FrameBuffer>, queue: &BufferQueue| {
            if let Some(buffer) = buffer {
                counter.fetch_add(1, Ordering::SeqCst);
                queue.add(buffer);
            }
        })));
        assert!(!control.complete_frame());

        hardware.buffer_queue().add(FrameBuffer::zeroed(Some(0), 6));
        assert!(control.complete_frame());
        assert!(control.complete_frame());
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn empty_frame_consumes_a_queued_buffer() {
        let camera = MockCamera::new();
        let control = camera.controller();
        let mut hardware = camera.open().expect("open");
        hardware.start_preview().expect("start");

        let empties = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&empties);
        hardware.set_frame_callback(Some(Box::new(move |buffer: Option<FrameBuffer>, _: &BufferQueue| {
            if buffer.is_none() {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })));
        assert!(!control.complete_empty_frame());

        hardware.buffer_queue().add(FrameBuffer::zeroed(Some(0), 6));
        assert!(control.complete_empty_frame());
        assert_eq!(control.queued_buffers(), 0);
        assert_eq!(empties.load(Ordering::SeqCst), 1);
        assert_eq!(control.open_count(), 1);
    }

    #[test]
    fn solid_pattern_layout() {
        let mut data = vec![0u8; 6];
        fill_nv21(&mut data, 2, TestPattern::Solid(200, 10, 20), 0);
        assert_eq!(data, vec![200, 200, 200, 200, 20, 10]);
    }

    #[test]
    fn gradient_pattern_rises() {
        let mut data = vec![0u8; 8 * 2 * 3 / 2];
        fill_nv21(&mut data, 8, TestPattern::Gradient, 0);
        assert_eq!(data[0], 0);
        assert!(data[7] > 200);
        assert_eq!(data[16], 128);
    }
}
