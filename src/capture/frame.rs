use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Pixel formats a camera may report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Y plane followed by interleaved V/U, 4:2:0. The preview format.
    Nv21,
    Nv12,
    Yv12,
    Yuyv4,
    Mjpeg,
    Rgb24,
}

impl PixelFormat {
    /// Format every preview stream is configured with.
    pub const PREVIEW: PixelFormat = PixelFormat::Nv21;

    /// Bytes needed for one frame, when the format has a fixed size.
    pub fn frame_size(self, width: u32, height: u32) -> Option<usize> {
        let pixels = width as usize * height as usize;
        match self {
            PixelFormat::Nv21 | PixelFormat::Nv12 | PixelFormat::Yv12 => Some(pixels * 3 / 2),
            PixelFormat::Yuyv4 => Some(pixels * 2),
            PixelFormat::Rgb24 => Some(pixels * 3),
            PixelFormat::Mjpeg => None,
        }
    }

    pub fn fourcc(self) -> [u8; 4] {
        match self {
            PixelFormat::Nv21 => *b"NV21",
            PixelFormat::Nv12 => *b"NV12",
            PixelFormat::Yv12 => *b"YV12",
            PixelFormat::Yuyv4 => *b"YUYV",
            PixelFormat::Mjpeg => *b"MJPG",
            PixelFormat::Rgb24 => *b"RGB3",
        }
    }

    pub fn from_fourcc(repr: [u8; 4]) -> Option<Self> {
        match &repr {
            b"NV21" => Some(PixelFormat::Nv21),
            b"NV12" => Some(PixelFormat::Nv12),
            b"YV12" => Some(PixelFormat::Yv12),
            b"YUYV" => Some(PixelFormat::Yuyv4),
            b"MJPG" => Some(PixelFormat::Mjpeg),
            b"RGB3" => Some(PixelFormat::Rgb24),
            _ => None,
        }
    }
}

/// Raw frame storage handed back and forth between the pool and the hardware.
#[derive(Debug)]
pub struct FrameBuffer {
    /// Pool slot this buffer belongs to; `None` for fallback allocations.
    slot: Option<usize>,
    data: BytesMut,
    /// Bytes written by the hardware for the current frame.
    filled: usize,
    metadata: FrameMetadata,
}

impl FrameBuffer {
    /// Zero-filled buffer of `len` bytes.
    pub fn zeroed(slot: Option<usize>, len: usize) -> Self {
        Self {
            slot,
            data: BytesMut::zeroed(len),
            filled: len,
            metadata: FrameMetadata::default(),
        }
    }

    pub fn slot(&self) -> Option<usize> {
        self.slot
    }

    /// Allocated size in bytes.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Writable storage for the hardware to fill.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[..]
    }

    /// Copy `src` into the buffer, truncating to capacity. Returns bytes copied.
    pub fn fill_from(&mut self, src: &[u8]) -> usize {
        let len = src.len().min(self.data.len());
        self.data[..len].copy_from_slice(&src[..len]);
        self.filled = len;
        len
    }

    /// Mark how many bytes the hardware wrote.
    pub fn set_filled(&mut self, len: usize) {
        self.filled = len.min(self.data.len());
    }

    pub fn set_metadata(&mut self, metadata: FrameMetadata) {
        self.metadata = metadata;
    }

    pub fn metadata(&self) -> &FrameMetadata {
        &self.metadata
    }

    /// Read-only view of the filled region.
    pub fn view(&self) -> FrameView<'_> {
        FrameView {
            data: &self.data[..self.filled],
            meta: &self.metadata,
        }
    }

    /// Data pointer, used to tell recycled allocations apart.
    pub fn as_ptr(&self) -> *const u8 {
        self.data.as_ptr()
    }
}

/// Frame metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub device_timestamp: Option<Duration>, // Hardware timestamp if available
}

impl Default for FrameMetadata {
    fn default() -> Self {
        Self {
            sequence: 0,
            width: 0,
            height: 0,
            format: PixelFormat::PREVIEW,
            device_timestamp: None,
        }
    }
}

/// Borrowed frame handed to the consumer. Valid only for the duration of the call.
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    pub data: &'a [u8],
    pub meta: &'a FrameMetadata,
}

impl FrameView<'_> {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_frame_size_is_twelve_bits_per_pixel() {
        assert_eq!(PixelFormat::PREVIEW.frame_size(1280, 720), Some(1_382_400));
        assert_eq!(PixelFormat::Mjpeg.frame_size(1280, 720), None);
    }

    #[test]
    fn fourcc_round_trip() {
        assert_eq!(PixelFormat::from_fourcc(*b"NV21"), Some(PixelFormat::Nv21));
        assert_eq!(PixelFormat::from_fourcc(*b"ABCD"), None);
    }

    #[test]
    fn fill_truncates_to_capacity() {
        let mut buf = FrameBuffer::zeroed(Some(0), 4);
        assert_eq!(buf.fill_from(&[1, 2, 3, 4, 5, 6]), 4);
        assert_eq!(buf.view().data, &[1, 2, 3, 4]);

        assert_eq!(buf.fill_from(&[9]), 1);
        assert_eq!(buf.view().len(), 1);
        assert_eq!(buf.capacity(), 4);
    }
}
