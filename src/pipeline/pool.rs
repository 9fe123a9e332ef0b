//! Recycling pool of preview frame buffers

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crossbeam::utils::CachePadded;
use tracing::{debug, warn};

use crate::capture::frame::{FrameBuffer, FrameView};
use crate::capture::hardware::BufferQueue;
use crate::error::CameraError;

/// Fixed ring of preallocated frame buffers.
///
/// Every slot is handed to the hardware queue before streaming starts.
/// A completed buffer is shown to the consumer and goes straight back
/// into the queue, so the allocation count stays at `slots` however
/// long the stream runs.
pub struct FrameBufferPool {
    frame_size: usize,
    slots: usize,
    /// Buffers not yet handed to the hardware
    idle: Mutex<Vec<FrameBuffer>>,

    /// Statistics
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    allocations: AtomicUsize,
    frames_recycled: AtomicUsize,
    empty_frames: AtomicUsize,
}

/// Snapshot of pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers allocated, including empty-frame replacements.
    pub allocations: usize,
    pub frames_recycled: usize,
    pub empty_frames: usize,
}

impl FrameBufferPool {
    pub fn new(frame_size: usize, slots: usize) -> Self {
        let slots = slots.max(1);
        let idle = (0..slots)
            .map(|slot| FrameBuffer::zeroed(Some(slot), frame_size))
            .collect();

        let stats = Stats::default();
        stats.allocations.store(slots, Ordering::Relaxed);

        Self {
            frame_size,
            slots,
            idle: Mutex::new(idle),
            stats: CachePadded::new(stats),
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Hand every idle slot to the hardware. Returns how many were queued.
    pub fn prime(&self, queue: &BufferQueue) -> usize {
        let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
        let count = idle.len();
        for buffer in idle.drain(..) {
            queue.add(buffer);
        }
        debug!("Primed {} preview buffers of {} bytes", count, self.frame_size);
        count
    }

    /// Handle one completed frame from the hardware.
    ///
    /// With data: `deliver` sees the frame, then the same buffer is
    /// re-queued. Without data: the hardware has already dropped the
    /// buffer, a zero-filled replacement takes its place and nothing is
    /// delivered. Either way the queue ends up holding what it held
    /// before the hardware took the buffer.
    pub fn complete<F>(&self, buffer: Option<FrameBuffer>, queue: &BufferQueue, deliver: F)
    where
        F: FnOnce(FrameView<'_>),
    {
        match buffer {
            Some(buffer) => {
                deliver(buffer.view());
                queue.add(buffer);
                self.stats.frames_recycled.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                warn!("{}, queueing a fresh buffer", CameraError::EmptyFrame);
                self.stats.empty_frames.fetch_add(1, Ordering::Relaxed);
                self.stats.allocations.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("preview_empty_frames").increment(1);
                queue.add(FrameBuffer::zeroed(None, self.frame_size));
            }
        }
    }

    /// Drop every buffer still queued or idle.
    pub fn release(&self, queue: &BufferQueue) -> usize {
        let drained = queue.drain().len();
        let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
        let total = drained + idle.len();
        idle.clear();
        debug!("Released {} preview buffers", total);
        total
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocations: self.stats.allocations.load(Ordering::Relaxed),
            frames_recycled: self.stats.frames_recycled.load(Ordering::Relaxed),
            empty_frames: self.stats.empty_frames.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn prime_queues_every_slot() {
        let pool = FrameBufferPool::new(16, 3);
        let queue = BufferQueue::new();
        assert_eq!(pool.prime(&queue), 3);
        assert_eq!(queue.len(), 3);
        // Second prime finds nothing idle.
        assert_eq!(pool.prime(&queue), 0);
    }

    #[test]
    fn zero_slots_still_gets_one_buffer() {
        let pool = FrameBufferPool::new(6, 0);
        assert_eq!(pool.slots(), 1);
    }

    #[test]
    fn recycles_same_allocation() {
        let pool = FrameBufferPool::new(6, 1);
        let queue = BufferQueue::new();
        pool.prime(&queue);

        let mut seen = HashSet::new();
        for i in 0..100u8 {
            let mut buffer = queue.take().expect("buffer queued");
            buffer.fill_from(&[i; 6]);
            seen.insert(buffer.as_ptr() as usize);

            let mut delivered = None;
            pool.complete(Some(buffer), &queue, |frame| delivered = Some(frame.data[0]));
            assert_eq!(delivered, Some(i));
        }

        assert_eq!(seen.len(), 1);
        let stats = pool.stats();
        assert_eq!(stats.allocations, 1);
        assert_eq!(stats.frames_recycled, 100);
    }

    #[test]
    fn empty_frame_gets_zeroed_replacement() {
        let pool = FrameBufferPool::new(6, 1);
        let queue = BufferQueue::new();

        let mut called = false;
        pool.complete(None, &queue, |_| called = true);
        assert!(!called);

        let replacement = queue.take().expect("replacement queued");
        assert_eq!(replacement.capacity(), 6);
        assert_eq!(replacement.slot(), None);
        assert!(replacement.view().data.iter().all(|&b| b == 0));

        let stats = pool.stats();
        assert_eq!(stats.empty_frames, 1);
        assert_eq!(stats.allocations, 2);
    }

    #[test]
    fn release_drains_queue() {
        let pool = FrameBufferPool::new(6, 2);
        let queue = BufferQueue::new();
        pool.prime(&queue);
        assert_eq!(pool.release(&queue), 2);
        assert!(queue.is_empty());
    }
}
