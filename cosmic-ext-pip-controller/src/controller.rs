//! Capture/PiP controller
//!
//! The controller owns the [`SessionState`] and processes one event at a
//! time from its queue. Requests to the collaborators (source acquisition,
//! floating-window presentation) and the error revert timer run as spawned
//! tasks that post their outcome back to the queue, so every transition is
//! made in [`Controller::handle`].
//!
//! ```text
//! AwaitingSource --trigger/acquired--> ReadyToPresent --trigger/presented--> Presenting
//!       ^                                 ^      |                              |
//!       |                                 |      +--trigger/failed--> TransientError
//!       |                                 +------- revert (2s) -------------+   |
//!       +--------------- reset / stream ended ----------------------------------+
//! ```

use crate::config::ControllerConfig;
use crate::error::{AcquireError, PipError, PresentError, Result};
use crate::presenter::{Presenter, PresenterEvent};
use crate::source::{SourceProvider, StreamHandle, SurfaceMetadata};
use crate::state::{ControlSnapshot, PrimaryLabel, SessionState};

use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Controls the user can activate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction {
    /// Primary trigger ("SELECT SCREEN" / "START")
    Trigger,
    /// Stop the floating window
    Stop,
    /// Tear down the whole session
    Reset,
}

/// Everything that can change the session
#[derive(Debug)]
pub enum ControllerEvent {
    /// The user activated a control
    User(UserAction),

    /// The source provider answered an acquisition request
    AcquisitionSettled(std::result::Result<StreamHandle, AcquireError>),

    /// The presenter answered a presentation request
    PresentationSettled {
        /// Stream generation the request was made for
        generation: u64,
        /// Id the presentation was requested under
        presentation: u64,
        /// Presenter outcome
        result: std::result::Result<(), PresentError>,
    },

    /// Stream metadata arrived, playback can start
    MetadataLoaded {
        /// Stream generation the metadata belongs to
        generation: u64,
        /// Reported frame size
        metadata: SurfaceMetadata,
    },

    /// A track of the stream ended outside of our control
    StreamEnded {
        /// Stream generation that ended
        generation: u64,
    },

    /// The presenter entered or left the floating window
    Presenter(PresenterEvent),

    /// The error label delay elapsed
    ErrorRevertElapsed {
        /// Error occurrence the timer was scheduled for
        epoch: u64,
    },

    /// Stop the run loop
    Shutdown,
}

/// Host-facing side of a running controller
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    events: mpsc::UnboundedSender<ControllerEvent>,
    snapshot: watch::Receiver<ControlSnapshot>,
}

impl ControllerHandle {
    /// Activate the primary trigger
    ///
    /// # Errors
    ///
    /// Returns [`PipError::ControllerClosed`] if the controller is gone.
    pub fn activate_trigger(&self) -> Result<()> {
        self.send(ControllerEvent::User(UserAction::Trigger))
    }

    /// Activate the stop control
    ///
    /// # Errors
    ///
    /// Returns [`PipError::ControllerClosed`] if the controller is gone.
    pub fn stop(&self) -> Result<()> {
        self.send(ControllerEvent::User(UserAction::Stop))
    }

    /// Activate the reset control
    ///
    /// # Errors
    ///
    /// Returns [`PipError::ControllerClosed`] if the controller is gone.
    pub fn reset(&self) -> Result<()> {
        self.send(ControllerEvent::User(UserAction::Reset))
    }

    /// Ask the run loop to tear the session down and exit
    ///
    /// # Errors
    ///
    /// Returns [`PipError::ControllerClosed`] if the controller is gone.
    pub fn shutdown(&self) -> Result<()> {
        self.send(ControllerEvent::Shutdown)
    }

    fn send(&self, event: ControllerEvent) -> Result<()> {
        self.events
            .send(event)
            .map_err(|_| PipError::ControllerClosed)
    }

    /// Latest published control state
    #[must_use]
    pub fn snapshot(&self) -> ControlSnapshot {
        *self.snapshot.borrow()
    }

    /// Watch control state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ControlSnapshot> {
        self.snapshot.clone()
    }
}

/// Finite-state controller for one capture/PiP session
pub struct Controller {
    source: Arc<dyn SourceProvider>,
    presenter: Arc<dyn Presenter>,
    config: ControllerConfig,
    state: SessionState,

    /// Weak so the queue closes once the host and every pending task are gone
    events_tx: mpsc::WeakUnboundedSender<ControllerEvent>,
    events_rx: mpsc::UnboundedReceiver<ControllerEvent>,
    snapshot_tx: watch::Sender<ControlSnapshot>,

    /// Ended/metadata listeners of the owned stream
    stream_watchers: Vec<JoinHandle<()>>,
    presenter_forwarder: JoinHandle<()>,
    presentation_seq: u64,

    /// Bumped on every presentation failure and every reset
    error_epoch: u64,
}

impl Controller {
    /// Create a controller and its host handle
    ///
    /// Must be called from within a Tokio runtime: the presenter's
    /// entered/left notifications are forwarded to the queue by a spawned
    /// task.
    #[must_use]
    pub fn new(
        source: Arc<dyn SourceProvider>,
        presenter: Arc<dyn Presenter>,
        config: ControllerConfig,
    ) -> (Self, ControllerHandle) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let state = SessionState::new();
        let (snapshot_tx, snapshot_rx) = watch::channel(state.snapshot());

        let presenter_forwarder =
            spawn_presenter_forwarder(presenter.subscribe(), events_tx.downgrade());

        let controller = Self {
            source,
            presenter,
            config,
            state,
            events_tx: events_tx.downgrade(),
            events_rx,
            snapshot_tx,
            stream_watchers: Vec::new(),
            presenter_forwarder,
            presentation_seq: 0,
            error_epoch: 0,
        };

        let handle = ControllerHandle {
            events: events_tx,
            snapshot: snapshot_rx,
        };

        (controller, handle)
    }

    /// Current session state
    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Current control state
    #[must_use]
    pub fn snapshot(&self) -> ControlSnapshot {
        self.state.snapshot()
    }

    /// Controller configuration
    #[must_use]
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Process events until shutdown, then tear the session down
    pub async fn run(mut self) {
        info!("Capture/PiP controller started");
        while self.step().await {}
        self.handle(ControllerEvent::User(UserAction::Reset)).await;
        info!("Capture/PiP controller stopped");
    }

    /// Wait for the next queued event and process it
    ///
    /// Returns `false` on [`ControllerEvent::Shutdown`] or once every sender
    /// is gone.
    pub async fn step(&mut self) -> bool {
        match self.events_rx.recv().await {
            Some(ControllerEvent::Shutdown) | None => false,
            Some(event) => {
                self.handle(event).await;
                true
            }
        }
    }

    /// Shorthand for handling a user action
    pub async fn dispatch(&mut self, action: UserAction) {
        self.handle(ControllerEvent::User(action)).await;
    }

    /// Apply one event to the session
    ///
    /// This is the only place where the session changes. The control
    /// snapshot is republished afterwards.
    pub async fn handle(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::User(UserAction::Trigger) => self.on_trigger(),
            ControllerEvent::User(UserAction::Stop) => self.on_stop().await,
            ControllerEvent::User(UserAction::Reset) => self.on_reset().await,
            ControllerEvent::AcquisitionSettled(result) => self.on_acquisition_settled(result),
            ControllerEvent::PresentationSettled {
                generation,
                presentation,
                result,
            } => {
                self.on_presentation_settled(generation, presentation, result).await;
            }
            ControllerEvent::MetadataLoaded {
                generation,
                metadata,
            } => self.on_metadata_loaded(generation, metadata),
            ControllerEvent::StreamEnded { generation } => self.on_stream_ended(generation).await,
            ControllerEvent::Presenter(event) => self.on_presenter_event(event),
            ControllerEvent::ErrorRevertElapsed { epoch } => self.on_error_revert(epoch),
            ControllerEvent::Shutdown => debug!("Shutdown is handled by the run loop"),
        }

        debug_assert!(
            self.state.invariants_hold(),
            "session invariants violated: {:?}",
            self.state
        );
        self.publish();
    }

    fn on_trigger(&mut self) {
        if self.state.request_in_flight() {
            debug!("Trigger ignored: a request is already in flight");
            return;
        }

        match self.state.label() {
            PrimaryLabel::AwaitingSource => self.request_source(),
            PrimaryLabel::ReadyToPresent => self.request_presentation(),
            label @ (PrimaryLabel::Presenting | PrimaryLabel::TransientError) => {
                debug!("Trigger ignored in state {:?}", label);
            }
        }
    }

    fn request_source(&mut self) {
        info!("Requesting capture source");
        self.state.set_notice(None);
        let source = Arc::clone(&self.source);
        let spawned = self.spawn_request(async move {
            ControllerEvent::AcquisitionSettled(source.acquire().await)
        });
        self.state.set_request_in_flight(spawned);
    }

    fn request_presentation(&mut self) {
        self.state.set_notice(None);
        if !self.presenter.is_supported() {
            self.fail_presentation(&PipError::PresentationUnsupported);
            return;
        }

        let Some(surface) = self.state.surface() else {
            self.fail_presentation(&PipError::PresentationPreconditionFailed);
            return;
        };

        info!(
            "Requesting Picture-in-Picture for PipeWire node {}",
            surface.pipewire_node_id
        );
        self.presentation_seq += 1;
        let presentation = self.presentation_seq;
        let generation = self.state.stream_generation();
        let presenter = Arc::clone(&self.presenter);
        let spawned = self.spawn_request(async move {
            ControllerEvent::PresentationSettled {
                generation,
                presentation,
                result: presenter.present(surface, presentation).await,
            }
        });
        self.state.set_request_in_flight(spawned);
    }

    fn on_acquisition_settled(&mut self, result: std::result::Result<StreamHandle, AcquireError>) {
        self.state.set_request_in_flight(false);

        match result {
            Ok(mut handle) => {
                let ended = handle.take_ended();
                let metadata = handle.take_metadata();
                let surface = handle.surface();

                match self.state.attach_stream(handle) {
                    Ok(generation) => {
                        info!(
                            "Media stream selected: PipeWire node {} (generation {})",
                            surface.pipewire_node_id, generation
                        );
                        self.watch_stream(generation, ended, metadata);
                        self.state.set_label(PrimaryLabel::ReadyToPresent);
                    }
                    Err(e) => self.report(&e),
                }
            }
            Err(e) => {
                self.report(&PipError::from(e));
                if !self.state.has_stream() {
                    self.state.set_label(PrimaryLabel::AwaitingSource);
                }
            }
        }
    }

    async fn on_presentation_settled(
        &mut self,
        generation: u64,
        presentation: u64,
        result: std::result::Result<(), PresentError>,
    ) {
        self.state.set_request_in_flight(false);
        let current = self.is_current(generation);

        match result {
            Ok(()) if current => match self.state.activate_presentation(presentation) {
                Ok(()) => {
                    info!("Picture-in-Picture started (presentation {})", presentation);
                    self.state.set_label(PrimaryLabel::Presenting);
                }
                Err(e) => error!("Cannot mark presentation active: {}", e),
            },
            Ok(()) => {
                warn!(
                    "Floating window opened for released stream (generation {}), dismissing",
                    generation
                );
                self.presenter.dismiss().await;
            }
            Err(e) if current => self.fail_presentation(&PipError::from(e)),
            Err(e) => debug!(
                "Ignoring presentation failure for released stream (generation {}): {}",
                generation, e
            ),
        }
    }

    fn fail_presentation(&mut self, error: &PipError) {
        self.report(error);
        self.state.set_label(PrimaryLabel::TransientError);

        self.error_epoch += 1;
        let epoch = self.error_epoch;
        let delay = self.config.error_revert_delay();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = events.upgrade() {
                let _ = tx.send(ControllerEvent::ErrorRevertElapsed { epoch });
            }
        });
    }

    fn on_error_revert(&mut self, epoch: u64) {
        if epoch != self.error_epoch || self.state.label() != PrimaryLabel::TransientError {
            debug!("Stale error revert ignored (epoch {})", epoch);
            return;
        }

        if self.state.has_stream() {
            self.state.set_label(PrimaryLabel::ReadyToPresent);
        } else {
            self.state.set_label(PrimaryLabel::AwaitingSource);
        }
    }

    fn on_metadata_loaded(&mut self, generation: u64, metadata: SurfaceMetadata) {
        if !self.is_current(generation) {
            debug!("Ignoring metadata for released stream (generation {})", generation);
            return;
        }
        info!(
            "Stream metadata loaded ({}x{}), starting playback",
            metadata.width, metadata.height
        );
        self.state.set_playing();
    }

    async fn on_stream_ended(&mut self, generation: u64) {
        if !self.is_current(generation) {
            debug!("Ignoring end of released stream (generation {})", generation);
            return;
        }

        info!("Capture stream ended");
        if self.state.presentation_active() {
            self.presenter.dismiss().await;
        }
        self.release_stream();
        self.state.set_label(PrimaryLabel::AwaitingSource);
    }

    fn on_presenter_event(&mut self, event: PresenterEvent) {
        match event {
            PresenterEvent::Entered { presentation } => {
                debug!("Floating window entered (presentation {})", presentation);
            }
            PresenterEvent::Left { presentation } => {
                if self.state.presentation_id() != Some(presentation) {
                    debug!(
                        "Ignoring floating window left for inactive presentation {}",
                        presentation
                    );
                    return;
                }
                info!("Picture-in-Picture ended");
                self.state.clear_presentation();
                if self.state.label() == PrimaryLabel::Presenting {
                    self.state.set_label(PrimaryLabel::ReadyToPresent);
                }
            }
        }
    }

    async fn on_stop(&mut self) {
        if !self.state.presentation_active() {
            debug!("Stop ignored: no active presentation");
            return;
        }

        info!("Stopping Picture-in-Picture");
        self.presenter.dismiss().await;
        self.state.clear_presentation();
        self.state.set_label(PrimaryLabel::ReadyToPresent);
    }

    async fn on_reset(&mut self) {
        if self.state.presentation_active() {
            self.presenter.dismiss().await;
            self.state.clear_presentation();
        }
        self.release_stream();
        self.error_epoch += 1;
        self.state.set_notice(None);
        self.state.set_label(PrimaryLabel::AwaitingSource);
        info!("Session reset");
    }

    /// Log a failed request and surface its user message
    fn report(&mut self, error: &PipError) {
        if error.is_cancellation() {
            info!("{}", error);
        } else if error.is_recoverable() {
            warn!("{}", error);
        } else {
            error!("{}", error);
        }
        self.state.set_notice(Some(error.user_message()));
    }

    fn is_current(&self, generation: u64) -> bool {
        self.state.has_stream() && generation == self.state.stream_generation()
    }

    fn release_stream(&mut self) {
        for watcher in self.stream_watchers.drain(..) {
            watcher.abort();
        }
        if self.state.release_stream() {
            info!("Capture stream released");
        }
    }

    fn watch_stream(
        &mut self,
        generation: u64,
        ended: Option<oneshot::Receiver<()>>,
        metadata: Option<oneshot::Receiver<SurfaceMetadata>>,
    ) {
        if let Some(ended) = ended {
            let events = self.events_tx.clone();
            self.stream_watchers.push(tokio::spawn(async move {
                // A dropped sender means the track went away quietly
                if ended.await.is_ok() {
                    if let Some(tx) = events.upgrade() {
                        let _ = tx.send(ControllerEvent::StreamEnded { generation });
                    }
                }
            }));
        }

        if let Some(metadata) = metadata {
            let events = self.events_tx.clone();
            self.stream_watchers.push(tokio::spawn(async move {
                if let Ok(metadata) = metadata.await {
                    if let Some(tx) = events.upgrade() {
                        let _ = tx.send(ControllerEvent::MetadataLoaded {
                            generation,
                            metadata,
                        });
                    }
                }
            }));
        }
    }

    /// Run a collaborator request in the background
    ///
    /// Returns `false` if the queue is already closed and the request was
    /// not issued.
    fn spawn_request<F>(&self, request: F) -> bool
    where
        F: Future<Output = ControllerEvent> + Send + 'static,
    {
        let Some(tx) = self.events_tx.upgrade() else {
            error!("Controller queue closed, request not issued");
            return false;
        };
        tokio::spawn(async move {
            let event = request.await;
            let _ = tx.send(event);
        });
        true
    }

    fn publish(&self) {
        let snapshot = self.state.snapshot();
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.presenter_forwarder.abort();
        for watcher in self.stream_watchers.drain(..) {
            watcher.abort();
        }
    }
}

fn spawn_presenter_forwarder(
    mut events: broadcast::Receiver<PresenterEvent>,
    queue: mpsc::WeakUnboundedSender<ControllerEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let Some(tx) = queue.upgrade() else { break };
                    if tx.send(ControllerEvent::Presenter(event)).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Missed {} presenter notifications", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
