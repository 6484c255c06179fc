//! Session state and derived control state
//!
//! The session owns at most one capture stream and tracks whether it is
//! being presented. The primary label is an explicit state; its display
//! text is derived from it, never the other way around.

use crate::error::{PipError, Result};
use crate::source::{StreamHandle, VideoSurface};

use serde::Serialize;
use std::fmt;
use tracing::debug;

/// State of the primary trigger control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimaryLabel {
    /// No stream yet, the trigger opens the source picker
    AwaitingSource,
    /// A stream is owned, the trigger opens the floating window
    ReadyToPresent,
    /// The floating window is showing the stream
    Presenting,
    /// Presentation failed, reverts to `ReadyToPresent` after a delay
    TransientError,
}

impl PrimaryLabel {
    /// Text shown on the trigger control
    #[must_use]
    pub const fn text(self) -> &'static str {
        match self {
            Self::AwaitingSource => "SELECT SCREEN",
            Self::ReadyToPresent => "START",
            Self::Presenting => "STARTED",
            Self::TransientError => "ERROR - TRY AGAIN",
        }
    }
}

impl fmt::Display for PrimaryLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

/// What the UI host needs to render the controls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ControlSnapshot {
    /// Primary trigger state
    pub label: PrimaryLabel,
    /// Trigger is clickable (no request outstanding)
    pub trigger_enabled: bool,
    /// Stop control is clickable
    pub stop_enabled: bool,
    /// Reset control is clickable
    pub reset_enabled: bool,
    /// Stream playback started on the surface
    pub playing: bool,
    /// Message about the last failed request, cleared by the next request
    pub notice: Option<&'static str>,
}

impl ControlSnapshot {
    /// Text shown on the trigger control
    #[must_use]
    pub fn label_text(&self) -> &'static str {
        self.label.text()
    }
}

impl Default for ControlSnapshot {
    fn default() -> Self {
        SessionState::new().snapshot()
    }
}

/// State of one capture/PiP session
#[derive(Debug)]
pub struct SessionState {
    stream: Option<StreamHandle>,
    stream_generation: u64,
    presentation_active: bool,
    presentation_id: u64,
    label: PrimaryLabel,
    request_in_flight: bool,
    playing: bool,
    notice: Option<&'static str>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    /// Create an empty session awaiting a source
    #[must_use]
    pub fn new() -> Self {
        Self {
            stream: None,
            stream_generation: 0,
            presentation_active: false,
            presentation_id: 0,
            label: PrimaryLabel::AwaitingSource,
            request_in_flight: false,
            playing: false,
            notice: None,
        }
    }

    /// Current trigger state
    #[must_use]
    pub fn label(&self) -> PrimaryLabel {
        self.label
    }

    /// Whether a stream is owned
    #[must_use]
    pub fn has_stream(&self) -> bool {
        self.stream.is_some()
    }

    /// Surface of the owned stream
    #[must_use]
    pub fn surface(&self) -> Option<VideoSurface> {
        self.stream.as_ref().map(StreamHandle::surface)
    }

    /// Generation of the most recently attached stream
    #[must_use]
    pub fn stream_generation(&self) -> u64 {
        self.stream_generation
    }

    /// Whether the floating window is showing the stream
    #[must_use]
    pub fn presentation_active(&self) -> bool {
        self.presentation_active
    }

    /// Id of the presentation currently showing the stream
    #[must_use]
    pub fn presentation_id(&self) -> Option<u64> {
        self.presentation_active.then_some(self.presentation_id)
    }

    /// Whether an acquisition or presentation request is outstanding
    #[must_use]
    pub fn request_in_flight(&self) -> bool {
        self.request_in_flight
    }

    /// Whether playback started on the stream surface
    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Derive the control state
    ///
    /// Stop and reset enablement come from the presentation flag and stream
    /// ownership, not from the label.
    #[must_use]
    pub fn snapshot(&self) -> ControlSnapshot {
        ControlSnapshot {
            label: self.label,
            trigger_enabled: !self.request_in_flight,
            stop_enabled: self.presentation_active,
            reset_enabled: self.stream.is_some(),
            playing: self.playing,
            notice: self.notice,
        }
    }

    /// Check the session invariants
    #[must_use]
    pub fn invariants_hold(&self) -> bool {
        (!self.presentation_active || self.stream.is_some())
            && (self.label != PrimaryLabel::Presenting || self.presentation_active)
            && (!self.playing || self.stream.is_some())
    }

    pub(crate) fn set_label(&mut self, label: PrimaryLabel) {
        if self.label != label {
            debug!("Trigger label: {} -> {}", self.label, label);
        }
        self.label = label;
    }

    pub(crate) fn set_request_in_flight(&mut self, in_flight: bool) {
        self.request_in_flight = in_flight;
    }

    pub(crate) fn set_notice(&mut self, notice: Option<&'static str>) {
        self.notice = notice;
    }

    pub(crate) fn set_playing(&mut self) {
        self.playing = self.stream.is_some();
    }

    /// Take ownership of a freshly acquired stream
    ///
    /// Returns the new stream generation. A second stream is refused and
    /// released on the spot.
    pub(crate) fn attach_stream(&mut self, mut handle: StreamHandle) -> Result<u64> {
        if self.stream.is_some() {
            handle.release();
            return Err(PipError::StreamAlreadyOwned);
        }
        self.stream_generation += 1;
        self.stream = Some(handle);
        Ok(self.stream_generation)
    }

    /// Mark the owned stream as presented by `presentation`
    pub(crate) fn activate_presentation(&mut self, presentation: u64) -> Result<()> {
        if self.stream.is_none() {
            return Err(PipError::PresentationPreconditionFailed);
        }
        self.presentation_active = true;
        self.presentation_id = presentation;
        Ok(())
    }

    pub(crate) fn clear_presentation(&mut self) {
        self.presentation_active = false;
    }

    /// Stop all tracks of the owned stream and drop it
    ///
    /// Clears the presentation flag so no presentation outlives its stream.
    /// Returns `false` when there was nothing to release.
    pub(crate) fn release_stream(&mut self) -> bool {
        self.presentation_active = false;
        self.playing = false;
        match self.stream.take() {
            Some(mut handle) => {
                handle.release();
                true
            }
            None => false,
        }
    }
}
