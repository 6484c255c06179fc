//! Floating window presenter
//!
//! Plays the captured PipeWire stream into a GStreamer video sink window.
//! The window only counts as open once the pipeline has prerolled; a sink
//! that fails before that is reported as a refused presentation. Closing
//! the window through the compositor later ends the pipeline with an error
//! on the bus, which is reported as [`PresenterEvent::Left`].

use crate::pipeline::{self, BusEvent};

use async_trait::async_trait;
use cosmic_ext_pip_controller::{PresentError, Presenter, PresenterEvent, VideoSurface};
use gstreamer as gst;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

/// Capacity of the presenter event channel
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// How long the sink may take to show the first frame
const PREROLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Running floating window
struct Window {
    pipeline: gst::Pipeline,
    stop: Arc<AtomicBool>,
    presentation: u64,
}

impl Window {
    fn close(&self) {
        self.stop.store(true, Ordering::SeqCst);
        pipeline::shutdown(&self.pipeline);
    }
}

/// Presenter that opens a GStreamer video sink window
pub struct GstWindowPresenter {
    video_sink: String,
    events: broadcast::Sender<PresenterEvent>,
    presenting: Arc<AtomicBool>,
    window: Mutex<Option<Window>>,
}

impl GstWindowPresenter {
    /// Create a presenter rendering through `video_sink`
    pub fn new(video_sink: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            video_sink: video_sink.into(),
            events,
            presenting: Arc::new(AtomicBool::new(false)),
            window: Mutex::new(None),
        }
    }

    fn description(&self, surface: &VideoSurface) -> Option<String> {
        pipeline::pipewire_source(surface)
            .map(|source| format!("{source} ! videoconvert ! videoscale ! {}", self.video_sink))
    }

    fn take_window(&self) -> Option<Window> {
        self.window
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Wait for the first thing the window pipeline reports
///
/// Preroll means the sink is showing frames. Anything else (bus error, EOS,
/// watcher gone, no answer in time) means the window never opened.
async fn first_frame(
    first: oneshot::Receiver<BusEvent>,
    limit: Duration,
) -> Result<(), PresentError> {
    match tokio::time::timeout(limit, first).await {
        Ok(Ok(BusEvent::Prerolled)) => Ok(()),
        Ok(Ok(BusEvent::Finished(reason))) => Err(PresentError::PlatformDenied(reason)),
        Ok(Err(_)) => Err(PresentError::PlatformDenied(
            "window pipeline stopped before showing a frame".to_string(),
        )),
        Err(_) => Err(PresentError::PlatformDenied(format!(
            "no frame shown within {}s",
            limit.as_secs()
        ))),
    }
}

#[async_trait]
impl Presenter for GstWindowPresenter {
    fn is_supported(&self) -> bool {
        pipeline::elements_available(&[
            "pipewiresrc",
            "videoconvert",
            "videoscale",
            self.video_sink.as_str(),
        ])
    }

    async fn present(&self, surface: VideoSurface, presentation: u64) -> Result<(), PresentError> {
        if !self.is_supported() {
            return Err(PresentError::Unsupported);
        }
        let description = self
            .description(&surface)
            .ok_or(PresentError::NoActiveSurface)?;

        // Replace any window left over from an earlier stream
        if let Some(previous) = self.take_window() {
            previous.close();
        }

        let pipeline = pipeline::launch(&description).map_err(|e| {
            warn!("Failed to open floating window: {}", e);
            PresentError::PlatformDenied(e)
        })?;

        // Set before the watcher runs so a close right after preroll is seen
        self.presenting.store(true, Ordering::SeqCst);

        let stop = Arc::new(AtomicBool::new(false));
        let (first_tx, first_rx) = oneshot::channel();
        let mut first_tx = Some(first_tx);
        let presenting = self.presenting.clone();
        let events = self.events.clone();
        let watched = pipeline.clone();
        pipeline::watch_bus(pipeline.clone(), stop.clone(), move |event| {
            if let Some(tx) = first_tx.take() {
                let _ = tx.send(event);
                return;
            }
            if let BusEvent::Finished(reason) = event {
                info!("Floating window closed: {}", reason);
                pipeline::shutdown(&watched);
                if presenting.swap(false, Ordering::SeqCst) {
                    let _ = events.send(PresenterEvent::Left { presentation });
                }
            }
        });

        let window = Window {
            pipeline,
            stop,
            presentation,
        };
        if let Err(e) = first_frame(first_rx, PREROLL_TIMEOUT).await {
            warn!("Floating window failed to start: {}", e);
            window.close();
            self.presenting.store(false, Ordering::SeqCst);
            return Err(e);
        }

        *self.window.lock().unwrap_or_else(PoisonError::into_inner) = Some(window);
        let _ = self.events.send(PresenterEvent::Entered { presentation });

        info!(
            "Floating window opened for PipeWire node {} (presentation {})",
            surface.pipewire_node_id, presentation
        );
        Ok(())
    }

    async fn dismiss(&self) {
        let Some(window) = self.take_window() else {
            debug!("No floating window to dismiss");
            return;
        };

        window.close();
        if self.presenting.swap(false, Ordering::SeqCst) {
            let _ = self.events.send(PresenterEvent::Left {
                presentation: window.presentation,
            });
        }
        info!("Floating window dismissed");
    }

    fn is_presenting(&self) -> bool {
        self.presenting.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<PresenterEvent> {
        self.events.subscribe()
    }
}

impl Drop for GstWindowPresenter {
    fn drop(&mut self) {
        if let Some(window) = self.take_window() {
            window.close();
        }
    }
}
