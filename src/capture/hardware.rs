//! Camera hardware seam
//!
//! The session drives the camera only through these traits, so the same
//! lifecycle runs against V4L2, a platform camera service, or the
//! in-process mock.

use std::sync::Arc;

use flume::{Receiver, Sender, TryRecvError};

use crate::capture::frame::FrameBuffer;
use crate::capture::negotiate::{Capabilities, PreviewConfiguration};
use crate::display::{DisplaySurface, Facing};
use crate::error::Result;

/// Static properties of a camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraInfo {
    pub facing: Facing,
    /// Sensor mount rotation in degrees relative to the device's natural orientation.
    pub orientation: u32,
}

/// Called on the capture thread once per completed frame.
///
/// The hardware takes a queued buffer for every completion. `None` means
/// that buffer came back without data and was dropped; the callback owes
/// the queue a replacement. Buffers handed over with data go back into
/// the queue for reuse.
pub type FrameCallback = Box<dyn FnMut(Option<FrameBuffer>, &BufferQueue) + Send>;

/// Buffers waiting for the hardware to fill them.
///
/// Both the control thread (priming) and the capture thread (recycling)
/// push into it, the hardware pops from it.
#[derive(Debug, Clone)]
pub struct BufferQueue {
    tx: Sender<FrameBuffer>,
    rx: Receiver<FrameBuffer>,
}

impl Default for BufferQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferQueue {
    pub fn new() -> Self {
        let (tx, rx) = flume::unbounded();
        Self { tx, rx }
    }

    /// Hand a buffer to the hardware.
    pub fn add(&self, buffer: FrameBuffer) {
        // Both ends live in `self`, the channel can't be disconnected.
        let _ = self.tx.send(buffer);
    }

    /// Next idle buffer, if any. Used by hardware implementations.
    pub fn take(&self) -> Option<FrameBuffer> {
        match self.rx.try_recv() {
            Ok(buffer) => Some(buffer),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Remove and return every queued buffer.
    pub fn drain(&self) -> Vec<FrameBuffer> {
        self.rx.drain().collect()
    }
}

/// An opened camera. Dropping or `release`-ing it gives the device back.
pub trait CameraHardware: Send {
    fn info(&self) -> CameraInfo;

    fn capabilities(&self) -> Result<Capabilities>;

    /// Apply negotiated size, format, frame rate and focus mode.
    fn set_parameters(&mut self, config: &PreviewConfiguration) -> Result<()>;

    /// Rotation, in degrees, applied to the rendered preview.
    fn set_display_orientation(&mut self, degrees: u32) -> Result<()>;

    fn set_display_surface(&mut self, surface: Arc<dyn DisplaySurface>) -> Result<()>;

    /// Queue shared with the hardware for preview buffers.
    fn buffer_queue(&self) -> BufferQueue;

    /// Install or, with `None`, detach the frame callback.
    ///
    /// Detaching must not return while the previous callback is running.
    fn set_frame_callback(&mut self, callback: Option<FrameCallback>);

    fn start_preview(&mut self) -> Result<()>;

    fn stop_preview(&mut self) -> Result<()>;

    /// One-shot focus. Fire and forget.
    fn auto_focus(&mut self);

    /// Give the device back. Further calls are undefined.
    fn release(&mut self);
}

/// Source of camera handles.
pub trait CameraProvider: Send + Sync {
    /// Open the default camera.
    ///
    /// Fails with `DeviceUnavailable` when no camera exists or it is busy.
    fn open(&self) -> Result<Box<dyn CameraHardware>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_is_fifo_and_drains() {
        let queue = BufferQueue::new();
        queue.add(FrameBuffer::zeroed(Some(0), 4));
        queue.add(FrameBuffer::zeroed(Some(1), 4));
        assert_eq!(queue.len(), 2);

        let first = queue.take().expect("queued");
        assert_eq!(first.slot(), Some(0));

        let rest = queue.drain();
        assert_eq!(rest.len(), 1);
        assert!(queue.is_empty());
        assert!(queue.take().is_none());
    }

    #[test]
    fn clones_share_the_queue() {
        let queue = BufferQueue::new();
        let hardware_side = queue.clone();
        queue.add(FrameBuffer::zeroed(None, 1));
        assert!(hardware_side.take().is_some());
    }
}
