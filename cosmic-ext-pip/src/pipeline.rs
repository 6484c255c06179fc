//! GStreamer helpers shared by the capture monitor and the floating window

use cosmic_ext_pip_controller::VideoSurface;
use gstreamer as gst;
use gstreamer::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// How often the bus watcher checks its stop flag
const BUS_POLL_MS: u64 = 200;

/// What a running pipeline reported on its bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// Pipeline prerolled, caps are negotiated
    Prerolled,
    /// Pipeline stopped on its own (EOS, error, window closed)
    Finished(String),
}

/// `pipewiresrc` element description for a portal surface
pub fn pipewire_source(surface: &VideoSurface) -> Option<String> {
    surface.remote_fd.map(|fd| {
        format!(
            "pipewiresrc fd={} path={} do-timestamp=true keepalive-time=1000",
            fd, surface.pipewire_node_id
        )
    })
}

/// Check that GStreamer initialises and the named elements are installed
pub fn elements_available(names: &[&str]) -> bool {
    if let Err(e) = gst::init() {
        warn!("GStreamer init failed: {}", e);
        return false;
    }
    names.iter().all(|name| {
        let found = gst::ElementFactory::find(name).is_some();
        if !found {
            debug!("GStreamer element '{}' not found", name);
        }
        found
    })
}

/// Parse a pipeline description and start it
pub fn launch(description: &str) -> Result<gst::Pipeline, String> {
    gst::init().map_err(|e| format!("GStreamer init failed: {e}"))?;

    debug!("Creating GStreamer pipeline: {}", description);

    let pipeline = gst::parse::launch(description)
        .map_err(|e| format!("Failed to parse pipeline: {e}"))?
        .downcast::<gst::Pipeline>()
        .map_err(|_| "Failed to downcast pipeline".to_string())?;

    if let Err(e) = pipeline.set_state(gst::State::Playing) {
        let _ = pipeline.set_state(gst::State::Null);
        return Err(format!("Failed to start pipeline: {e}"));
    }

    Ok(pipeline)
}

/// Stop a pipeline, logging failures
pub fn shutdown(pipeline: &gst::Pipeline) {
    if let Err(e) = pipeline.set_state(gst::State::Null) {
        warn!("Failed to stop pipeline: {}", e);
    }
}

/// Watch the pipeline bus on a blocking thread until `stop` is set or the
/// pipeline finishes
pub fn watch_bus<F>(pipeline: gst::Pipeline, stop: Arc<AtomicBool>, mut on_event: F)
where
    F: FnMut(BusEvent) + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let Some(bus) = pipeline.bus() else {
            warn!("Pipeline has no bus, cannot watch it");
            return;
        };

        while !stop.load(Ordering::SeqCst) {
            let Some(message) = bus.timed_pop_filtered(
                gst::ClockTime::from_mseconds(BUS_POLL_MS),
                &[
                    gst::MessageType::AsyncDone,
                    gst::MessageType::Eos,
                    gst::MessageType::Error,
                ],
            ) else {
                continue;
            };

            let event = match message.view() {
                gst::MessageView::AsyncDone(..) => BusEvent::Prerolled,
                gst::MessageView::Eos(..) => BusEvent::Finished("end of stream".to_string()),
                gst::MessageView::Error(err) => BusEvent::Finished(err.error().to_string()),
                _ => continue,
            };

            // A stop requested while the message was in flight wins
            if stop.load(Ordering::SeqCst) {
                break;
            }

            let finished = matches!(event, BusEvent::Finished(_));
            on_event(event);
            if finished {
                break;
            }
        }
    });
}
