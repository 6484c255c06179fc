//! XDG Desktop Portal source provider
//!
//! Uses the ScreenCast portal to let the user pick a monitor or window,
//! then keeps the granted PipeWire stream alive with a small monitor
//! pipeline that reports when the stream prerolls and when it ends. The
//! portal session stays open until the track is stopped.

use crate::config::{CaptureConfig, CursorModeConfig, SourceTypeConfig};
use crate::pipeline::{self, BusEvent};

use ashpd::desktop::screencast::{CursorMode, Screencast, SourceType};
use ashpd::desktop::{PersistMode, ResponseError, Session};
use async_trait::async_trait;
use cosmic_ext_pip_controller::{
    AcquireError, MediaTrack, SourceProvider, StreamHandle, SurfaceMetadata, VideoSurface,
};
use gstreamer as gst;
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// ScreenCast session that must be closed to end the capture
type ScreencastSession = Session<'static, Screencast<'static>>;

/// Open portal session, closed once when the stream is released
#[async_trait]
trait PortalSession: Send {
    async fn close(self: Box<Self>) -> Result<(), ashpd::Error>;
}

#[async_trait]
impl PortalSession for ScreencastSession {
    async fn close(self: Box<Self>) -> Result<(), ashpd::Error> {
        let session: &ScreencastSession = &self;
        session.close().await
    }
}

/// Stream granted by the portal
struct PortalStream {
    session: Box<dyn PortalSession>,
    pipewire_fd: OwnedFd,
    pipewire_node_id: u32,
    size: Option<(i32, i32)>,
}

/// Source provider backed by `org.freedesktop.portal.ScreenCast`
#[derive(Debug, Clone)]
pub struct PortalSourceProvider {
    config: CaptureConfig,
}

impl PortalSourceProvider {
    /// Create a provider with the given capture options
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }

    fn cursor_mode(&self) -> CursorMode {
        match self.config.cursor_mode {
            CursorModeConfig::Hidden => CursorMode::Hidden,
            CursorModeConfig::Embedded => CursorMode::Embedded,
            CursorModeConfig::Metadata => CursorMode::Metadata,
        }
    }

    async fn request_screencast(&self) -> Result<PortalStream, AcquireError> {
        info!("Requesting screen capture via Desktop Portal");

        let screencast: Screencast<'static> = Screencast::new().await.map_err(|e| {
            error!("Failed to connect to ScreenCast portal: {}", e);
            AcquireError::Unavailable(format!("Portal connection failed: {e}"))
        })?;

        let session: ScreencastSession = screencast.create_session().await.map_err(|e| {
            error!("Failed to create screencast session: {}", e);
            AcquireError::Unavailable(format!("Session creation failed: {e}"))
        })?;

        debug!("Created screencast session");

        match self.start_session(&screencast, &session).await {
            Ok((pipewire_fd, pipewire_node_id, size)) => Ok(PortalStream {
                session: Box::new(session),
                pipewire_fd,
                pipewire_node_id,
                size,
            }),
            Err(e) => {
                close_session("unselected stream".to_string(), Box::new(session));
                Err(e)
            }
        }
    }

    /// Run source selection on an open session and fetch its PipeWire remote
    async fn start_session(
        &self,
        screencast: &Screencast<'static>,
        session: &ScreencastSession,
    ) -> Result<(OwnedFd, u32, Option<(i32, i32)>), AcquireError> {
        let offers = (
            self.config.offers(SourceTypeConfig::Monitor),
            self.config.offers(SourceTypeConfig::Window),
            self.config.offers(SourceTypeConfig::Virtual),
        );
        let sources = match offers {
            (true, true, true) => SourceType::Monitor | SourceType::Window | SourceType::Virtual,
            (true, true, false) => SourceType::Monitor | SourceType::Window,
            (true, false, true) => SourceType::Monitor | SourceType::Virtual,
            (false, true, true) => SourceType::Window | SourceType::Virtual,
            (false, true, false) => SourceType::Window.into(),
            (false, false, true) => SourceType::Virtual.into(),
            (true, false, false) | (false, false, false) => SourceType::Monitor.into(),
        };

        screencast
            .select_sources(
                session,
                self.cursor_mode(),
                sources,
                false,              // single source
                None,               // no restore token
                PersistMode::DoNot, // nothing survives the session
            )
            .await
            .map_err(portal_error)?;

        debug!("Sources selected, starting session");

        // Shows the picker; dismissing it surfaces as a cancelled response
        let response = screencast
            .start(session, None)
            .await
            .map_err(portal_error)?
            .response()
            .map_err(portal_error)?;

        let Some(stream) = response.streams().first() else {
            error!("No streams available from screencast");
            return Err(AcquireError::Unavailable("No streams available".to_string()));
        };
        let pipewire_node_id = stream.pipe_wire_node_id();
        let size = stream.size();

        if pipewire_node_id == 0 {
            return Err(AcquireError::Unavailable(
                "Portal returned invalid PipeWire node ID (0)".to_string(),
            ));
        }

        let pipewire_fd = screencast
            .open_pipe_wire_remote(session)
            .await
            .map_err(|e| {
                error!("Failed to open PipeWire remote: {}", e);
                AcquireError::Unavailable(format!("PipeWire remote failed: {e}"))
            })?;

        info!(
            "Screen capture granted: node_id={}, size={:?}",
            pipewire_node_id, size
        );

        Ok((pipewire_fd, pipewire_node_id, size))
    }
}

/// Map a portal failure onto the acquisition taxonomy
fn portal_error(error: ashpd::Error) -> AcquireError {
    match error {
        ashpd::Error::Response(ResponseError::Cancelled) => AcquireError::UserCancelled,
        ashpd::Error::Response(e) => AcquireError::PermissionDenied(e.to_string()),
        ashpd::Error::Portal(e) => AcquireError::PermissionDenied(e.to_string()),
        other => AcquireError::Unavailable(other.to_string()),
    }
}

#[async_trait]
impl SourceProvider for PortalSourceProvider {
    async fn acquire(&self) -> Result<StreamHandle, AcquireError> {
        let stream = self.request_screencast().await?;
        PipeWireTrack::start(stream)
    }
}

/// Video track of a portal stream
///
/// Owns the portal session, the PipeWire remote fd and a
/// `pipewiresrc ! fakesink` pipeline that keeps the stream flowing while
/// nothing else is consuming it.
struct PipeWireTrack {
    label: String,
    pipeline: Option<gst::Pipeline>,
    stop: Arc<AtomicBool>,
    pipewire_fd: Option<OwnedFd>,
    session: Option<Box<dyn PortalSession>>,
}

impl PipeWireTrack {
    fn start(stream: PortalStream) -> Result<StreamHandle, AcquireError> {
        let mut surface = VideoSurface::new(stream.pipewire_node_id)
            .with_remote_fd(stream.pipewire_fd.as_raw_fd());
        if let Some((width, height)) = stream.size {
            surface = surface.with_size(width, height);
        }

        let stop = Arc::new(AtomicBool::new(false));
        let mut track = Self {
            label: format!("pipewire:{}", stream.pipewire_node_id),
            pipeline: None,
            stop: stop.clone(),
            pipewire_fd: Some(stream.pipewire_fd),
            session: Some(stream.session),
        };

        let launched = pipeline::pipewire_source(&surface)
            .ok_or_else(|| "PipeWire remote not available".to_string())
            .and_then(|source| pipeline::launch(&format!("{source} ! fakesink sync=false")));
        let pipeline = match launched {
            Ok(pipeline) => pipeline,
            Err(e) => {
                track.stop();
                return Err(AcquireError::Unavailable(e));
            }
        };

        let (ended_tx, ended_rx) = oneshot::channel();
        let (metadata_tx, metadata_rx) = oneshot::channel();
        let (width, height) = stream.size.unwrap_or((0, 0));
        let metadata = SurfaceMetadata {
            width: u32::try_from(width).unwrap_or(0),
            height: u32::try_from(height).unwrap_or(0),
        };

        let mut ended_tx = Some(ended_tx);
        let mut metadata_tx = Some(metadata_tx);
        pipeline::watch_bus(pipeline.clone(), stop.clone(), move |event| match event {
            BusEvent::Prerolled => {
                if let Some(tx) = metadata_tx.take() {
                    let _ = tx.send(metadata);
                }
            }
            BusEvent::Finished(reason) => {
                info!("Capture stream finished: {}", reason);
                if let Some(tx) = ended_tx.take() {
                    let _ = tx.send(());
                }
            }
        });

        track.pipeline = Some(pipeline);

        Ok(StreamHandle::new(surface)
            .with_track(Box::new(track))
            .with_ended(ended_rx)
            .with_metadata(metadata_rx))
    }
}

impl MediaTrack for PipeWireTrack {
    fn label(&self) -> &str {
        &self.label
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(pipeline) = self.pipeline.take() {
            pipeline::shutdown(&pipeline);
        }
        if self.pipewire_fd.take().is_some() {
            debug!("Closed PipeWire remote for {}", self.label);
        }
        if let Some(session) = self.session.take() {
            close_session(self.label.clone(), session);
        }
    }
}

/// Close the portal session in the background so the compositor stops
/// capturing
fn close_session(label: String, session: Box<dyn PortalSession>) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        warn!("No runtime to close screencast session for {}", label);
        return;
    };
    runtime.spawn(async move {
        match session.close().await {
            Ok(()) => debug!("Closed screencast session for {}", label),
            Err(e) => warn!("Failed to close screencast session for {}: {}", label, e),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct FakeSession {
        closes: Arc<AtomicUsize>,
        closed: Option<oneshot::Sender<()>>,
    }

    #[async_trait]
    impl PortalSession for FakeSession {
        async fn close(self: Box<Self>) -> Result<(), ashpd::Error> {
            let FakeSession { closes, closed } = *self;
            closes.fetch_add(1, Ordering::SeqCst);
            if let Some(tx) = closed {
                let _ = tx.send(());
            }
            Ok(())
        }
    }

    fn track_with_session(closes: Arc<AtomicUsize>) -> (PipeWireTrack, oneshot::Receiver<()>) {
        let (closed_tx, closed_rx) = oneshot::channel();
        let track = PipeWireTrack {
            label: "pipewire:42".to_string(),
            pipeline: None,
            stop: Arc::new(AtomicBool::new(false)),
            pipewire_fd: None,
            session: Some(Box::new(FakeSession {
                closes,
                closed: Some(closed_tx),
            })),
        };
        (track, closed_rx)
    }

    #[tokio::test]
    async fn test_stop_closes_portal_session_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let (mut track, closed) = track_with_session(closes.clone());

        track.stop();
        track.stop();

        tokio::time::timeout(Duration::from_secs(1), closed)
            .await
            .expect("session close timed out")
            .expect("session dropped without closing");
        tokio::task::yield_now().await;

        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(track.session.is_none());
        assert!(track.stop.load(Ordering::SeqCst));
    }

    #[test]
    fn test_stop_outside_runtime_drops_session() {
        let closes = Arc::new(AtomicUsize::new(0));
        let (mut track, _closed) = track_with_session(closes.clone());

        track.stop();

        assert!(track.session.is_none());
        assert_eq!(closes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cursor_mode_mapping() {
        let mut config = CaptureConfig::default();
        assert_eq!(
            PortalSourceProvider::new(config.clone()).cursor_mode(),
            CursorMode::Embedded
        );

        config.cursor_mode = CursorModeConfig::Metadata;
        assert_eq!(
            PortalSourceProvider::new(config.clone()).cursor_mode(),
            CursorMode::Metadata
        );

        config.cursor_mode = CursorModeConfig::Hidden;
        assert_eq!(
            PortalSourceProvider::new(config).cursor_mode(),
            CursorMode::Hidden
        );
    }

    #[test]
    fn test_cancelled_response_maps_to_user_cancelled() {
        assert_eq!(
            portal_error(ashpd::Error::Response(ResponseError::Cancelled)),
            AcquireError::UserCancelled
        );
        assert!(matches!(
            portal_error(ashpd::Error::Response(ResponseError::Other)),
            AcquireError::PermissionDenied(_)
        ));
    }
}
