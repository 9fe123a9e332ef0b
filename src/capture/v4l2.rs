//! V4L2 camera backend

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::control::{Control, Value};
use v4l::frameinterval::FrameIntervalEnum;
use v4l::framesize::FrameSizeEnum;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::frame::{FrameMetadata, PixelFormat};
use crate::capture::hardware::{
    BufferQueue, CameraHardware, CameraInfo, CameraProvider, FrameCallback,
};
use crate::capture::negotiate::{Capabilities, FocusMode, FpsRange, PreviewConfiguration, Size};
use crate::display::{DisplaySurface, Facing};
use crate::error::{CameraError, Result};

const CID_ROTATE: u32 = 0x0098_0922;
const CID_FOCUS_AUTO: u32 = 0x009a_090c;
const CID_AUTO_FOCUS_START: u32 = 0x009a_091c;

/// Kernel-side buffers for the mmap stream.
const STREAM_BUFFERS: u32 = 4;

/// Opens a V4L2 capture node such as `/dev/video0`.
#[derive(Debug, Clone)]
pub struct V4l2Camera {
    path: String,
    info: CameraInfo,
}

impl V4l2Camera {
    /// USB and CSI cameras are mounted upright and face away from the user.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            info: CameraInfo {
                facing: Facing::Back,
                orientation: 0,
            },
        }
    }

    pub fn with_info(mut self, info: CameraInfo) -> Self {
        self.info = info;
        self
    }
}

impl CameraProvider for V4l2Camera {
    fn open(&self) -> Result<Box<dyn CameraHardware>> {
        Ok(Box::new(V4l2Hardware::open(&self.path, self.info)?))
    }
}

/// Opened V4L2 device.
///
/// While streaming, the device is owned by the capture thread and comes
/// back when the thread is joined.
pub struct V4l2Hardware {
    path: String,
    info: CameraInfo,
    device: Option<Device>,
    queue: BufferQueue,
    callback: Arc<Mutex<Option<FrameCallback>>>,
    config: Option<PreviewConfiguration>,
    streaming: Arc<AtomicBool>,
    worker: Option<JoinHandle<Device>>,
}

impl V4l2Hardware {
    #[instrument(skip(info))]
    pub fn open(path: &str, info: CameraInfo) -> Result<Self> {
        let device = Device::with_path(path)
            .map_err(|e| CameraError::DeviceUnavailable(format!("{}: {}", path, e)))?;

        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(CameraError::DeviceUnavailable(format!(
                "{} doesn't support video capture",
                path
            )));
        }

        let preview = FourCC::new(&PixelFormat::PREVIEW.fourcc());
        if !device.enum_formats()?.iter().any(|desc| desc.fourcc == preview) {
            return Err(CameraError::DeviceUnavailable(format!(
                "{} doesn't offer {}",
                path, preview
            )));
        }

        Ok(Self {
            path: path.to_string(),
            info,
            device: Some(device),
            queue: BufferQueue::new(),
            callback: Arc::new(Mutex::new(None)),
            config: None,
            streaming: Arc::new(AtomicBool::new(false)),
            worker: None,
        })
    }

    fn device(&self) -> Result<&Device> {
        self.device
            .as_ref()
            .ok_or_else(|| CameraError::Hardware(format!("{} is streaming", self.path)))
    }

    fn set_control(&self, id: u32, value: i64) -> Result<()> {
        self.device()?.set_control(Control {
            id,
            value: Value::Integer(value),
        })?;
        Ok(())
    }

    fn has_control(&self, id: u32) -> bool {
        self.device()
            .ok()
            .and_then(|device| device.query_controls().ok())
            .is_some_and(|controls| controls.iter().any(|c| c.id == id))
    }

    fn sizes_for(device: &Device, fourcc: FourCC) -> Vec<Size> {
        let Ok(sizes) = device.enum_framesizes(fourcc) else {
            return Vec::new();
        };
        sizes
            .into_iter()
            .map(|framesize| match framesize.size {
                FrameSizeEnum::Discrete(d) => Size::new(d.width, d.height),
                FrameSizeEnum::Stepwise(s) => Size::new(s.max_width, s.max_height),
            })
            .collect()
    }

    fn fps_ranges_for(device: &Device, fourcc: FourCC, sizes: &[Size]) -> Vec<FpsRange> {
        let mut ranges = Vec::new();
        for size in sizes {
            let Ok(intervals) = device.enum_frameintervals(fourcc, size.width, size.height) else {
                continue;
            };
            for interval in intervals {
                let range = match interval.interval {
                    FrameIntervalEnum::Discrete(f) => {
                        let fps = millifps(f.numerator, f.denominator);
                        FpsRange::new(fps, fps)
                    }
                    FrameIntervalEnum::Stepwise(s) => FpsRange::new(
                        millifps(s.max.numerator, s.max.denominator),
                        millifps(s.min.numerator, s.min.denominator),
                    ),
                };
                if range.max > 0 && !ranges.contains(&range) {
                    ranges.push(range);
                }
            }
        }
        ranges
    }
}

/// Frame interval `num/den` seconds as thousandths of a frame per second.
fn millifps(numerator: u32, denominator: u32) -> u32 {
    if numerator == 0 {
        return 0;
    }
    u32::try_from(u64::from(denominator) * 1000 / u64::from(numerator)).unwrap_or(u32::MAX)
}

/// Frames are handed on as `wanted`, so the driver must not substitute another layout.
fn ensure_format(actual: FourCC, wanted: PixelFormat) -> Result<()> {
    if actual == FourCC::new(&wanted.fourcc()) {
        Ok(())
    } else {
        Err(CameraError::Hardware(format!(
            "driver chose {} instead of {:?}",
            actual, wanted
        )))
    }
}

impl CameraHardware for V4l2Hardware {
    fn info(&self) -> CameraInfo {
        self.info
    }

    fn capabilities(&self) -> Result<Capabilities> {
        let device = self.device()?;
        let pixel_formats: Vec<PixelFormat> = device
            .enum_formats()?
            .into_iter()
            .filter_map(|desc| PixelFormat::from_fourcc(desc.fourcc.repr))
            .collect();

        let fourcc = FourCC::new(&PixelFormat::PREVIEW.fourcc());
        let preview_sizes = Self::sizes_for(device, fourcc);
        let fps_ranges = Self::fps_ranges_for(device, fourcc, &preview_sizes);

        let focus_modes = if self.has_control(CID_FOCUS_AUTO) {
            vec![FocusMode::ContinuousVideo, FocusMode::Auto]
        } else {
            vec![FocusMode::Fixed]
        };

        Ok(Capabilities {
            preview_sizes,
            fps_ranges,
            pixel_formats,
            focus_modes,
        })
    }

    fn set_parameters(&mut self, config: &PreviewConfiguration) -> Result<()> {
        let device = self.device()?;

        let mut fmt = device.format()?;
        fmt.width = config.size.width;
        fmt.height = config.size.height;
        fmt.fourcc = FourCC::new(&config.format.fourcc());
        let actual = device.set_format(&fmt)?;
        ensure_format(actual.fourcc, config.format)?;
        if actual.width != config.size.width || actual.height != config.size.height {
            warn!(
                "Driver adjusted format to {}x{} {}",
                actual.width, actual.height, actual.fourcc
            );
        }

        if let Some(range) = config.fps_range {
            device.set_params(&Parameters::with_fps(range.max_fps().max(1)))?;
        }

        if let Some(mode) = config.focus_mode {
            let continuous = matches!(mode, FocusMode::ContinuousVideo | FocusMode::ContinuousPicture);
            if let Err(e) = self.set_control(CID_FOCUS_AUTO, i64::from(continuous)) {
                debug!("Focus mode {:?} not applied: {}", mode, e);
            }
        }

        self.config = Some(config.clone());
        Ok(())
    }

    fn set_display_orientation(&mut self, degrees: u32) -> Result<()> {
        self.set_control(CID_ROTATE, i64::from(degrees))
    }

    fn set_display_surface(&mut self, surface: Arc<dyn DisplaySurface>) -> Result<()> {
        // Frames go to the consumer; rendering is the consumer's job here.
        debug!("Surface {} noted, V4L2 has no overlay", surface.name());
        Ok(())
    }

    fn buffer_queue(&self) -> BufferQueue {
        self.queue.clone()
    }

    fn set_frame_callback(&mut self, callback: Option<FrameCallback>) {
        *self.callback.lock().unwrap_or_else(PoisonError::into_inner) = callback;
    }

    fn start_preview(&mut self) -> Result<()> {
        let device = self
            .device
            .take()
            .ok_or_else(|| CameraError::Hardware("stream already running".into()))?;
        let config = self
            .config
            .clone()
            .ok_or_else(|| CameraError::Hardware("parameters not set".into()))?;

        self.streaming.store(true, Ordering::Release);
        let streaming = Arc::clone(&self.streaming);
        let callback = Arc::clone(&self.callback);
        let queue = self.queue.clone();

        let worker = thread::Builder::new()
            .name("v4l2-capture".into())
            .spawn(move || {
                run_stream(&device, &config, &streaming, &callback, &queue);
                device
            })?;

        self.worker = Some(worker);
        info!("Capture stream started with {} buffers", STREAM_BUFFERS);
        Ok(())
    }

    fn stop_preview(&mut self) -> Result<()> {
        self.streaming.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(device) => self.device = Some(device),
                Err(_) => {
                    return Err(CameraError::Hardware("capture thread panicked".into()));
                }
            }
        }
        Ok(())
    }

    fn auto_focus(&mut self) {
        if let Err(e) = self.set_control(CID_AUTO_FOCUS_START, 1) {
            debug!("Autofocus not triggered: {}", e);
        }
    }

    fn release(&mut self) {
        if self.worker.is_some() {
            if let Err(e) = self.stop_preview() {
                error!("{}", e);
            }
        }
        self.set_frame_callback(None);
        self.queue.drain();
        self.device = None;
        info!("Released {}", self.path);
    }
}

impl Drop for V4l2Hardware {
    fn drop(&mut self) {
        if self.device.is_some() || self.worker.is_some() {
            self.release();
        }
    }
}

/// Capture thread body: dequeue, copy into a queued buffer, call back.
fn run_stream(
    device: &Device,
    config: &PreviewConfiguration,
    streaming: &AtomicBool,
    callback: &Mutex<Option<FrameCallback>>,
    queue: &BufferQueue,
) {
    let mut stream = match MmapStream::with_buffers(device, Type::VideoCapture, STREAM_BUFFERS) {
        Ok(stream) => stream,
        Err(e) => {
            error!("Failed to start capture stream: {}", e);
            return;
        }
    };

    while streaming.load(Ordering::Acquire) {
        let (data, meta) = match stream.next() {
            Ok(frame) => frame,
            Err(e) => {
                error!("Capture error: {}", e);
                thread::sleep(Duration::from_millis(10));
                continue;
            }
        };

        let mut callback = callback.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(callback) = callback.as_mut() else {
            continue;
        };

        let Some(mut buffer) = queue.take() else {
            debug!("No preview buffer queued, dropping frame {}", meta.sequence);
            continue;
        };

        let used = (meta.bytesused as usize).min(data.len());
        if used == 0 {
            drop(buffer);
            callback(None, queue);
            continue;
        }

        buffer.fill_from(&data[..used]);
        buffer.set_metadata(FrameMetadata {
            sequence: u64::from(meta.sequence),
            width: config.size.width,
            height: config.size.height,
            format: config.format,
            device_timestamp: Some(
                Duration::from_secs(meta.timestamp.sec.max(0) as u64)
                    + Duration::from_micros(meta.timestamp.usec.max(0) as u64),
            ),
        });
        callback(Some(buffer), queue);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_interval_to_millifps() {
        assert_eq!(millifps(1, 30), 30_000);
        assert_eq!(millifps(1001, 30_000), 29_970);
        assert_eq!(millifps(0, 30), 0);
        assert_eq!(millifps(1, u32::MAX), u32::MAX);
    }

    #[test]
    fn substituted_format_is_rejected() {
        let nv21 = FourCC::new(&PixelFormat::Nv21.fourcc());
        let yuyv = FourCC::new(&PixelFormat::Yuyv4.fourcc());
        assert!(ensure_format(nv21, PixelFormat::Nv21).is_ok());
        assert!(matches!(
            ensure_format(yuyv, PixelFormat::Nv21),
            Err(CameraError::Hardware(_))
        ));
    }

    #[test]
    fn missing_device_is_unavailable() {
        let camera = V4l2Camera::new("/dev/does-not-exist");
        assert!(matches!(camera.open(), Err(CameraError::DeviceUnavailable(_))));
    }
}
