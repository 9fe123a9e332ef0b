//! Camera preview runner: opens the camera, previews, counts frames.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use campreview::capture::{CameraProvider, FrameView, MockCamera, V4l2Camera};
use campreview::display::NullSurface;
use campreview::{utils, CameraSession, Config, SessionObserver};
use color_eyre::{eyre::eyre, Result};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

enum Event {
    Opened,
    Previewing { width: u32, height: u32, fps: u32 },
}

/// Forwards session notifications to the async side.
struct Notifier {
    tx: mpsc::UnboundedSender<Event>,
}

impl SessionObserver for Notifier {
    fn camera_opened(&self) {
        let _ = self.tx.send(Event::Opened);
    }

    fn preview_started(&self, width: u32, height: u32, fps: u32) {
        let _ = self.tx.send(Event::Previewing { width, height, fps });
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;

    // Load configuration
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    campreview::CONFIG.store(Arc::new(config.clone()));

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.pipeline.log_filter))
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Camera preview launching...");

    let provider = select_provider(&config)?;

    let (tx, mut events) = mpsc::unbounded_channel();
    let notifier: Arc<dyn SessionObserver> = Arc::new(Notifier { tx });

    let mut session = CameraSession::new(provider);

    let frames = Arc::new(AtomicU64::new(0));
    let bytes = Arc::new(AtomicU64::new(0));
    {
        let frames = Arc::clone(&frames);
        let bytes = Arc::clone(&bytes);
        session.set_consumer(Some(Arc::new(move |frame: FrameView<'_>| {
            frames.fetch_add(1, Ordering::Relaxed);
            bytes.fetch_add(frame.len() as u64, Ordering::Relaxed);
        })));
    }

    if session.open(Arc::downgrade(&notifier) as Weak<dyn SessionObserver>).is_err() {
        return Err(eyre!("camera could not be opened"));
    }
    session.start_preview(Arc::new(NullSurface), config.display_hint())?;

    while let Ok(event) = events.try_recv() {
        match event {
            Event::Opened => info!("Camera opened"),
            Event::Previewing { width, height, fps } => {
                info!("Previewing {}x{} @ {} fps", width, height, fps)
            }
        }
    }

    let run = async {
        if config.pipeline.run_seconds == 0 {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(Duration::from_secs(config.pipeline.run_seconds)).await;
    };

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    tokio::pin!(run);
    loop {
        tokio::select! {
            _ = &mut run => break,
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted");
                break;
            }
            _ = ticker.tick() => {
                info!(
                    "{} frames, {} bytes received",
                    frames.load(Ordering::Relaxed),
                    bytes.load(Ordering::Relaxed)
                );
            }
        }
    }

    session.stop();
    let stats = session.stats();
    info!(
        "Stopped after {} frames ({} buffer allocations, {} empty frames)",
        stats.frames_delivered, stats.pool.allocations, stats.pool.empty_frames
    );
    Ok(())
}

fn select_provider(config: &Config) -> Result<Arc<dyn CameraProvider>> {
    if config.capture.use_mock {
        info!("Using simulated camera");
        let camera = MockCamera::builder()
            .frame_interval(Duration::from_millis(33))
            .build();
        return Ok(Arc::new(camera));
    }

    // Auto-detect capture device if needed
    let path = if config.capture.device.is_empty() {
        utils::auto_detect_device()?.path
    } else {
        config.capture.device.clone()
    };
    info!("Using capture device: {}", path);
    Ok(Arc::new(V4l2Camera::new(path)))
}
