//! COSMIC PiP Controller - Screen Capture in a Floating Window
//!
//! This crate implements the session controller behind the COSMIC screen
//! picture-in-picture tool: the user picks a screen or window through the
//! desktop portal, and the captured stream is shown in a floating window
//! outside the normal desktop layout.
//!
//! ## Architecture
//!
//! The controller is a small finite-state machine driven by one event queue:
//!
//! ### Collaborators
//! - A [`SourceProvider`] yields a live capture stream ([`StreamHandle`])
//! - A [`Presenter`] shows the stream surface in a floating window
//!
//! ### Control surface
//! - One primary trigger whose label is derived from [`PrimaryLabel`]
//! - A stop control, enabled while a presentation is active
//! - A reset control, enabled while a stream is owned
//!
//! Every user action and every collaborator notification is delivered to
//! [`Controller::handle`], the single place where transitions happen. After
//! each transition a [`ControlSnapshot`] is published for the UI host.
//!
//! ## Usage Example
//!
//! ```no_run
//! use cosmic_ext_pip_controller::{Controller, ControllerConfig, Presenter, SourceProvider};
//! use std::sync::Arc;
//!
//! async fn example(source: Arc<dyn SourceProvider>, presenter: Arc<dyn Presenter>) {
//!     let (controller, handle) = Controller::new(source, presenter, ControllerConfig::default());
//!     tokio::spawn(controller.run());
//!
//!     // "SELECT SCREEN" opens the portal picker
//!     handle.activate_trigger().ok();
//!     println!("{}", handle.snapshot().label_text());
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod controller;
pub mod error;
pub mod presenter;
pub mod source;
pub mod state;

pub use config::ControllerConfig;
pub use controller::{Controller, ControllerEvent, ControllerHandle, UserAction};
pub use error::{AcquireError, PipError, PresentError, Result};
pub use presenter::{Presenter, PresenterEvent};
pub use source::{MediaTrack, SourceProvider, StreamHandle, SurfaceMetadata, VideoSurface};
pub use state::{ControlSnapshot, PrimaryLabel, SessionState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
