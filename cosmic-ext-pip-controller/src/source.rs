//! Capture stream sources
//!
//! A [`SourceProvider`] asks the platform (usually the xdg-desktop-portal
//! `ScreenCast` interface) for a user-selected stream. The resulting
//! [`StreamHandle`] is owned exclusively by the controller until it is
//! released.

use crate::error::AcquireError;

use async_trait::async_trait;
use std::fmt;
use tokio::sync::oneshot;
use tracing::debug;

/// Playable surface reference for a capture stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoSurface {
    /// `PipeWire` node ID of the stream
    pub pipewire_node_id: u32,

    /// `PipeWire` remote file descriptor (raw fd number, owned by a track)
    pub remote_fd: Option<i32>,

    /// Stream size reported when the stream was granted
    pub size: Option<(i32, i32)>,
}

impl VideoSurface {
    /// Create a surface for a `PipeWire` node
    #[must_use]
    pub fn new(pipewire_node_id: u32) -> Self {
        Self {
            pipewire_node_id,
            remote_fd: None,
            size: None,
        }
    }

    /// Attach the `PipeWire` remote fd
    #[must_use]
    pub fn with_remote_fd(mut self, fd: i32) -> Self {
        self.remote_fd = Some(fd);
        self
    }

    /// Attach the reported stream size
    #[must_use]
    pub fn with_size(mut self, width: i32, height: i32) -> Self {
        self.size = Some((width, height));
        self
    }
}

/// Video metadata, available once the stream has prerolled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceMetadata {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
}

/// One constituent track of a capture stream
pub trait MediaTrack: Send {
    /// Human-readable track label
    fn label(&self) -> &str;

    /// Stop the track and free what it holds
    ///
    /// Must be safe to call more than once.
    fn stop(&mut self);
}

/// Live capture stream owned by the controller
///
/// Releasing the handle stops every track. Dropping an unreleased handle
/// releases it.
pub struct StreamHandle {
    surface: VideoSurface,
    tracks: Vec<Box<dyn MediaTrack>>,
    ended: Option<oneshot::Receiver<()>>,
    metadata: Option<oneshot::Receiver<SurfaceMetadata>>,
    released: bool,
}

impl StreamHandle {
    /// Create a handle for the given surface with no tracks yet
    #[must_use]
    pub fn new(surface: VideoSurface) -> Self {
        Self {
            surface,
            tracks: Vec::new(),
            ended: None,
            metadata: None,
            released: false,
        }
    }

    /// Add a constituent track
    #[must_use]
    pub fn with_track(mut self, track: Box<dyn MediaTrack>) -> Self {
        self.tracks.push(track);
        self
    }

    /// Attach the notification fired when a track ends externally
    #[must_use]
    pub fn with_ended(mut self, ended: oneshot::Receiver<()>) -> Self {
        self.ended = Some(ended);
        self
    }

    /// Attach the notification fired once stream metadata is known
    #[must_use]
    pub fn with_metadata(mut self, metadata: oneshot::Receiver<SurfaceMetadata>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Playable surface reference
    #[must_use]
    pub fn surface(&self) -> VideoSurface {
        self.surface
    }

    /// Number of constituent tracks
    #[must_use]
    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Take the "ended" notification (subscribers register once)
    pub fn take_ended(&mut self) -> Option<oneshot::Receiver<()>> {
        self.ended.take()
    }

    /// Take the metadata notification
    pub fn take_metadata(&mut self) -> Option<oneshot::Receiver<SurfaceMetadata>> {
        self.metadata.take()
    }

    /// Whether the tracks have been stopped
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Stop every track
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        for track in &mut self.tracks {
            debug!("Stopping track: {}", track.label());
            track.stop();
        }
        self.released = true;
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("surface", &self.surface)
            .field(
                "tracks",
                &self.tracks.iter().map(|t| t.label()).collect::<Vec<_>>(),
            )
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

/// Source of user-selected capture streams
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Ask the user to pick a screen or window and return its stream
    ///
    /// # Errors
    ///
    /// Returns [`AcquireError::UserCancelled`] when the picker is dismissed,
    /// [`AcquireError::PermissionDenied`] when capture is refused, and
    /// [`AcquireError::Unavailable`] when no capture backend responds.
    async fn acquire(&self) -> Result<StreamHandle, AcquireError>;
}
