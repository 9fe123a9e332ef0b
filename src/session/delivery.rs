//! Frame routing from the capture thread to the registered consumer

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Instant;

use arc_swap::ArcSwapOption;
use crossbeam::sync::ShardedLock;

use crate::capture::frame::FrameView;

/// Downstream receiver of raw preview frames, typically an encoder.
///
/// Called on the capture thread, never concurrently with itself. The
/// frame is only borrowed for the duration of the call; copy what you
/// need to keep.
pub trait FrameConsumer: Send + Sync {
    fn on_frame(&self, frame: FrameView<'_>);
}

impl<F> FrameConsumer for F
where
    F: Fn(FrameView<'_>) + Send + Sync,
{
    fn on_frame(&self, frame: FrameView<'_>) {
        self(frame)
    }
}

struct Registered {
    consumer: Arc<dyn FrameConsumer>,
}

/// Single consumer slot plus the gate that decides whether frames flow.
///
/// The slot is swapped atomically so registration never stalls the
/// capture thread. The gate is read-locked for the length of every
/// delivery; closing it takes the write side, so `close` returns only
/// once no delivery is in flight and none can start.
pub struct FrameRouter {
    consumer: ArcSwapOption<Registered>,
    gate: ShardedLock<bool>,
    delivered: AtomicU64,
}

impl Default for FrameRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameRouter {
    pub fn new() -> Self {
        Self {
            consumer: ArcSwapOption::empty(),
            gate: ShardedLock::new(false),
            delivered: AtomicU64::new(0),
        }
    }

    pub fn set_consumer(&self, consumer: Option<Arc<dyn FrameConsumer>>) {
        self.consumer
            .store(consumer.map(|consumer| Arc::new(Registered { consumer })));
    }

    pub fn has_consumer(&self) -> bool {
        self.consumer.load().is_some()
    }

    pub fn open(&self) {
        *self.gate.write().unwrap_or_else(PoisonError::into_inner) = true;
    }

    /// Stop all delivery. Blocks until an in-flight delivery returns.
    pub fn close(&self) {
        *self.gate.write().unwrap_or_else(PoisonError::into_inner) = false;
    }

    pub fn is_open(&self) -> bool {
        *self.gate.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forward a frame to the consumer. Returns whether anyone saw it.
    pub fn deliver(&self, frame: FrameView<'_>) -> bool {
        let gate = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        if !*gate {
            return false;
        }

        let Some(registered) = self.consumer.load_full() else {
            return false;
        };

        let started = Instant::now();
        registered.consumer.on_frame(frame);
        drop(gate);

        self.delivered.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("preview_frames_delivered").increment(1);
        metrics::histogram!("frame_delivery_us").record(started.elapsed().as_micros() as f64);
        true
    }

    pub fn frames_delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::capture::frame::FrameMetadata;

    fn with_frame<R>(data: &[u8], f: impl FnOnce(FrameView<'_>) -> R) -> R {
        let meta = FrameMetadata::default();
        f(FrameView { data, meta: &meta })
    }

    #[test]
    fn closed_gate_drops_frames() {
        let router = FrameRouter::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        router.set_consumer(Some(Arc::new(move |_: FrameView<'_>| {
            counter.fetch_add(1, Ordering::SeqCst);
        })));

        assert!(!with_frame(&[1], |f| router.deliver(f)));
        router.open();
        assert!(with_frame(&[1], |f| router.deliver(f)));
        router.close();
        assert!(!with_frame(&[1], |f| router.deliver(f)));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(router.frames_delivered(), 1);
    }

    #[test]
    fn replaced_consumer_gets_next_frame() {
        let router = FrameRouter::new();
        router.open();

        let (tx, rx) = mpsc::channel();
        let first = tx.clone();
        router.set_consumer(Some(Arc::new(move |f: FrameView<'_>| {
            first.send(("first", f.data[0])).ok();
        })));
        with_frame(&[1], |f| router.deliver(f));

        router.set_consumer(Some(Arc::new(move |f: FrameView<'_>| {
            tx.send(("second", f.data[0])).ok();
        })));
        with_frame(&[2], |f| router.deliver(f));

        let got: Vec<_> = rx.try_iter().collect();
        assert_eq!(got, vec![("first", 1), ("second", 2)]);

        router.set_consumer(None);
        assert!(!router.has_consumer());
        assert!(!with_frame(&[3], |f| router.deliver(f)));
    }

    #[test]
    fn close_waits_for_in_flight_delivery() {
        let router = Arc::new(FrameRouter::new());
        router.open();

        let (entered_tx, entered_rx) = mpsc::channel();
        let finished = Arc::new(AtomicUsize::new(0));
        let done = Arc::clone(&finished);
        router.set_consumer(Some(Arc::new(move |_: FrameView<'_>| {
            entered_tx.send(()).ok();
            thread::sleep(Duration::from_millis(50));
            done.fetch_add(1, Ordering::SeqCst);
        })));

        let capture = {
            let router = Arc::clone(&router);
            thread::spawn(move || with_frame(&[0], |f| router.deliver(f)))
        };

        entered_rx.recv().expect("delivery started");
        router.close();
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert!(capture.join().expect("capture thread"));
    }
}
