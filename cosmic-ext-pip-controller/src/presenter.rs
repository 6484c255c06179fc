//! Floating-window presentation

use crate::error::PresentError;
use crate::source::VideoSurface;

use async_trait::async_trait;
use tokio::sync::broadcast;

/// Notifications emitted by a presenter
///
/// `presentation` echoes the id passed to [`Presenter::present`], so a late
/// notice about an earlier window cannot be mistaken for the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenterEvent {
    /// The floating window is showing
    Entered {
        /// Presentation the window belongs to
        presentation: u64,
    },
    /// The floating window closed, by request or through the platform UI
    Left {
        /// Presentation the window belonged to
        presentation: u64,
    },
}

/// Shows a stream surface in an always-on-top window
#[async_trait]
pub trait Presenter: Send + Sync {
    /// Whether floating-window presentation is available at all
    fn is_supported(&self) -> bool;

    /// Open the floating window for `surface`, tagging its notifications
    /// with `presentation`
    ///
    /// # Errors
    ///
    /// Returns [`PresentError::Unsupported`] when presentation is not
    /// available, [`PresentError::NoActiveSurface`] when the surface cannot be
    /// played, and [`PresentError::PlatformDenied`] when the window could not
    /// be opened.
    async fn present(
        &self,
        surface: VideoSurface,
        presentation: u64,
    ) -> Result<(), PresentError>;

    /// Close the floating window if one is open
    async fn dismiss(&self);

    /// Process-wide "currently presenting" flag
    fn is_presenting(&self) -> bool;

    /// Subscribe to entered/left notifications
    fn subscribe(&self) -> broadcast::Receiver<PresenterEvent>;
}
