//! Error types for capture and presentation requests
//!
//! None of these errors escape the controller. Each one is logged and mapped
//! to a state transition that leaves the user with an actionable control.

use thiserror::Error;

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, PipError>;

/// Failure reported by a [`crate::SourceProvider`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcquireError {
    /// The user dismissed the source picker
    #[error("Source selection cancelled by user")]
    UserCancelled,

    /// The platform refused screen capture
    #[error("Screen capture permission denied: {0}")]
    PermissionDenied(String),

    /// No capture backend could be reached
    #[error("Screen capture unavailable: {0}")]
    Unavailable(String),
}

/// Failure reported by a [`crate::Presenter`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PresentError {
    /// Floating-window presentation is not available in this runtime
    #[error("Picture-in-Picture not supported")]
    Unsupported,

    /// There is no surface to present
    #[error("No media stream available")]
    NoActiveSurface,

    /// The platform refused to open the floating window
    #[error("Presentation denied: {0}")]
    PlatformDenied(String),
}

/// Errors surfaced by the capture/PiP controller
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipError {
    /// Stream acquisition failed or was cancelled
    #[error("Error selecting media stream: {0}")]
    AcquisitionFailed(#[from] AcquireError),

    /// The runtime cannot present a floating window
    #[error("Picture-in-Picture not supported")]
    PresentationUnsupported,

    /// Presentation was requested without an active stream
    #[error("No media stream available")]
    PresentationPreconditionFailed,

    /// The presenter refused the request
    #[error("Presentation denied: {0}")]
    PresentationDenied(String),

    /// A stream was offered while another one is still owned
    #[error("A capture stream is already owned by this session")]
    StreamAlreadyOwned,

    /// The controller event loop is gone
    #[error("Controller closed")]
    ControllerClosed,
}

impl From<PresentError> for PipError {
    fn from(error: PresentError) -> Self {
        match error {
            PresentError::Unsupported => Self::PresentationUnsupported,
            PresentError::NoActiveSurface => Self::PresentationPreconditionFailed,
            PresentError::PlatformDenied(msg) => Self::PresentationDenied(msg),
        }
    }
}

impl PipError {
    /// Check if the user can simply try again
    ///
    /// Every failure of a user request is recoverable. Only internal
    /// conditions (double ownership, closed controller) are not.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::AcquisitionFailed(_)
                | Self::PresentationUnsupported
                | Self::PresentationPreconditionFailed
                | Self::PresentationDenied(_)
        )
    }

    /// Check if the failure was caused by the user dismissing the picker
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::AcquisitionFailed(AcquireError::UserCancelled))
    }

    /// Get a short message suitable for showing to the user
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::AcquisitionFailed(AcquireError::UserCancelled) => "No screen was selected.",
            Self::AcquisitionFailed(AcquireError::PermissionDenied(_)) => {
                "Screen capture was not allowed. Check your desktop portal settings."
            }
            Self::AcquisitionFailed(AcquireError::Unavailable(_)) => {
                "Screen capture is not available on this system."
            }
            Self::PresentationUnsupported => "Floating windows are not supported on this system.",
            Self::PresentationPreconditionFailed => "Select a screen first.",
            Self::PresentationDenied(_) => "The floating window could not be opened.",
            Self::StreamAlreadyOwned | Self::ControllerClosed => {
                "An internal error occurred. Reset and try again."
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_present_error_mapping() {
        assert_eq!(
            PipError::from(PresentError::Unsupported),
            PipError::PresentationUnsupported
        );
        assert_eq!(
            PipError::from(PresentError::NoActiveSurface),
            PipError::PresentationPreconditionFailed
        );
        assert_eq!(
            PipError::from(PresentError::PlatformDenied("busy".to_string())),
            PipError::PresentationDenied("busy".to_string())
        );
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(PipError::from(AcquireError::UserCancelled).is_recoverable());
        assert!(PipError::PresentationUnsupported.is_recoverable());
        assert!(PipError::PresentationDenied("x".to_string()).is_recoverable());
        assert!(!PipError::StreamAlreadyOwned.is_recoverable());
        assert!(!PipError::ControllerClosed.is_recoverable());
    }

    #[test]
    fn test_cancellation() {
        assert!(PipError::from(AcquireError::UserCancelled).is_cancellation());
        assert!(!PipError::from(AcquireError::Unavailable("no portal".to_string()))
            .is_cancellation());
    }

    #[test]
    fn test_display_messages() {
        let error = PipError::from(AcquireError::PermissionDenied("portal".to_string()));
        assert_eq!(
            error.to_string(),
            "Error selecting media stream: Screen capture permission denied: portal"
        );
        assert_eq!(
            PipError::PresentationPreconditionFailed.to_string(),
            "No media stream available"
        );
        assert!(!PipError::ControllerClosed.user_message().is_empty());
    }
}
