//! Camera session lifecycle
//!
//! A session walks `Closed -> Opened -> Previewing -> Stopped` and owns
//! everything that has to be given back when it ends: the process-wide
//! camera claim, the hardware handle and the preview buffers.

pub mod claim;
pub mod delivery;

use std::sync::{Arc, Weak};

use tracing::{debug, error, info, instrument, warn};

use crate::capture::frame::FrameBuffer;
use crate::capture::hardware::{BufferQueue, CameraHardware, CameraProvider, FrameCallback};
use crate::capture::negotiate::{self, Capabilities, PreviewConfiguration, Size};
use crate::display::{orientation, DisplayHint, DisplaySurface};
use crate::error::{CameraError, Result};
use crate::pipeline::{FrameBufferPool, PoolStats};
use crate::CaptureConfig;

pub use claim::CameraClaim;
pub use delivery::{FrameConsumer, FrameRouter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Opened,
    Previewing,
    Stopped,
}

/// Notified about lifecycle milestones. Held weakly by the session.
pub trait SessionObserver: Send + Sync {
    fn camera_opened(&self);

    /// Preview is running at `width`x`height`, `fps` whole frames per second.
    fn preview_started(&self, width: u32, height: u32, fps: u32);
}

/// Knobs the session reads at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub fallback_size: Size,
    pub buffer_slots: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            fallback_size: negotiate::FALLBACK_SIZE,
            buffer_slots: 1,
        }
    }
}

impl From<&CaptureConfig> for SessionSettings {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            fallback_size: Size::new(config.fallback_width, config.fallback_height),
            buffer_slots: config.buffer_slots,
        }
    }
}

/// Counters for a running or finished session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_delivered: u64,
    pub pool: PoolStats,
}

/// One camera preview session.
///
/// Control methods take `&mut self` and belong on a single control
/// thread. Frames arrive on the hardware's capture thread and are routed
/// through a [`FrameRouter`] shared with it.
pub struct CameraSession {
    provider: Arc<dyn CameraProvider>,
    settings: SessionSettings,
    state: SessionState,
    claim: Option<CameraClaim>,
    hardware: Option<Box<dyn CameraHardware>>,
    config: Option<PreviewConfiguration>,
    pool: Option<Arc<FrameBufferPool>>,
    queue: Option<BufferQueue>,
    router: Arc<FrameRouter>,
    observer: Option<Weak<dyn SessionObserver>>,
    last_stats: SessionStats,
}

impl CameraSession {
    /// New closed session, configured from the active global config.
    pub fn new(provider: Arc<dyn CameraProvider>) -> Self {
        let settings = SessionSettings::from(&crate::CONFIG.load().capture);
        Self::with_settings(provider, settings)
    }

    pub fn with_settings(provider: Arc<dyn CameraProvider>, settings: SessionSettings) -> Self {
        Self {
            provider,
            settings,
            state: SessionState::Closed,
            claim: None,
            hardware: None,
            config: None,
            pool: None,
            queue: None,
            router: Arc::new(FrameRouter::new()),
            observer: None,
            last_stats: SessionStats::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Negotiated configuration while previewing.
    pub fn configuration(&self) -> Option<&PreviewConfiguration> {
        self.config.as_ref()
    }

    pub fn stats(&self) -> SessionStats {
        match &self.pool {
            Some(pool) => SessionStats {
                frames_delivered: self.router.frames_delivered(),
                pool: pool.stats(),
            },
            None => self.last_stats,
        }
    }

    /// Claim and open the camera, then tell `observer`.
    ///
    /// When the camera is missing or busy the observer hears nothing; the
    /// error is returned for callers that want the reason.
    #[instrument(skip_all)]
    pub fn open(&mut self, observer: Weak<dyn SessionObserver>) -> Result<()> {
        if self.state == SessionState::Stopped {
            return Err(CameraError::InvalidState {
                operation: "open",
                state: self.state,
            });
        }

        self.observer = Some(observer);
        if self.state != SessionState::Closed {
            return Ok(());
        }

        let (claim, hardware) = match self.acquire() {
            Ok(acquired) => acquired,
            Err(e) => {
                warn!("Camera not opened: {}", e);
                return Err(e);
            }
        };

        let camera = hardware.info();
        info!(
            "Camera opened ({:?} facing, sensor at {} degrees)",
            camera.facing, camera.orientation
        );

        self.claim = Some(claim);
        self.hardware = Some(hardware);
        self.state = SessionState::Opened;

        if let Some(observer) = self.observer() {
            observer.camera_opened();
        }
        Ok(())
    }

    fn acquire(&self) -> Result<(CameraClaim, Box<dyn CameraHardware>)> {
        let claim = CameraClaim::acquire()?;
        let hardware = self.provider.open()?;
        Ok((claim, hardware))
    }

    /// Negotiate parameters, attach `surface` and start streaming.
    ///
    /// Does nothing if already previewing.
    #[instrument(skip(self, surface))]
    pub fn start_preview(&mut self, surface: Arc<dyn DisplaySurface>, hint: DisplayHint) -> Result<()> {
        match self.state {
            SessionState::Previewing => return Ok(()),
            SessionState::Opened => {}
            state => {
                warn!("start_preview ignored in state {:?}", state);
                return Err(CameraError::InvalidState {
                    operation: "start_preview",
                    state,
                });
            }
        }

        if let Err(e) = self.begin_streaming(surface, hint) {
            error!("Preview failed to start: {}", e);
            self.stop();
            return Err(e);
        }

        self.state = SessionState::Previewing;

        if let Some(hardware) = self.hardware.as_mut() {
            hardware.auto_focus();
        }

        if let Some(config) = &self.config {
            info!(
                "Preview started: {} {:?} @ {} fps, rotation {}",
                config.size,
                config.format,
                config.frame_rate(),
                config.rotation
            );
            if let Some(observer) = self.observer() {
                observer.preview_started(config.size.width, config.size.height, config.frame_rate());
            }
        }
        Ok(())
    }

    fn begin_streaming(&mut self, surface: Arc<dyn DisplaySurface>, hint: DisplayHint) -> Result<()> {
        let hardware = self.hardware.as_mut().ok_or(CameraError::InvalidState {
            operation: "start_preview",
            state: self.state,
        })?;

        let camera = hardware.info();
        let rotation = orientation::display_rotation(camera.orientation, hint.rotation, camera.facing);
        if let Err(e) = hardware.set_display_orientation(rotation) {
            warn!("Could not set display orientation {}: {}", rotation, e);
        }

        let caps = hardware.capabilities().unwrap_or_else(|e| {
            warn!("Could not query capabilities, using defaults: {}", e);
            Capabilities::default()
        });
        let config = negotiate::negotiate(&caps, &hint, rotation, self.settings.fallback_size);
        debug!("Negotiated {:?}", config);

        surface.set_fixed_size(config.size.width, config.size.height);

        let pool = Arc::new(FrameBufferPool::new(config.frame_size(), self.settings.buffer_slots));
        let queue = hardware.buffer_queue();
        pool.prime(&queue);
        hardware.set_frame_callback(Some(frame_callback(Arc::clone(&pool), Arc::clone(&self.router))));

        self.pool = Some(pool);
        self.queue = Some(queue);

        hardware.set_parameters(&config)?;
        self.config = Some(config);

        if let Err(e) = hardware.set_display_surface(Arc::clone(&surface)) {
            // Preview keeps running without a bound surface; frames still reach the consumer.
            warn!("{}", CameraError::SurfaceBinding(e.to_string()));
        }

        self.router.open();
        hardware.start_preview()
    }

    /// Release everything. Safe to call in any state, any number of times.
    ///
    /// Returns only after teardown is complete; no frame reaches a
    /// consumer after this returns.
    #[instrument(skip(self))]
    pub fn stop(&mut self) {
        let was = self.state;
        self.router.close();

        if let Some(mut hardware) = self.hardware.take() {
            hardware.set_frame_callback(None);
            if was == SessionState::Previewing {
                if let Err(e) = hardware.stop_preview() {
                    warn!("Stopping preview failed: {}", e);
                }
            }
            hardware.release();
        }
        self.claim = None;

        if let (Some(pool), Some(queue)) = (self.pool.take(), self.queue.take()) {
            self.last_stats = SessionStats {
                frames_delivered: self.router.frames_delivered(),
                pool: pool.stats(),
            };
            pool.release(&queue);
        }

        self.config = None;
        self.router.set_consumer(None);
        self.observer = None;
        self.state = SessionState::Stopped;

        if was != SessionState::Stopped {
            info!("Camera session stopped (was {:?})", was);
        }
    }

    /// Register the frame consumer, replacing any previous one.
    pub fn set_consumer(&self, consumer: Option<Arc<dyn FrameConsumer>>) {
        self.router.set_consumer(consumer);
    }

    fn observer(&self) -> Option<Arc<dyn SessionObserver>> {
        self.observer.as_ref().and_then(Weak::upgrade)
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        if self.state != SessionState::Stopped {
            self.stop();
        }
    }
}

/// Capture-thread side of the buffer protocol.
fn frame_callback(pool: Arc<FrameBufferPool>, router: Arc<FrameRouter>) -> FrameCallback {
    Box::new(move |buffer: Option<FrameBuffer>, queue: &BufferQueue| {
        pool.complete(buffer, queue, |frame| {
            router.deliver(frame);
        });
    })
}
