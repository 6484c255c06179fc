//! Command line, logging and environment checks

use crate::pipeline;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use tokio::process::Command as Process;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};

/// GStreamer elements the floating window needs besides the sink
const REQUIRED_ELEMENTS: &[&str] = &["pipewiresrc", "videoconvert", "videoscale", "fakesink"];

/// Picture-in-picture for screen and window captures
#[derive(Parser, Debug)]
#[command(name = "cosmic-ext-pip")]
#[command(about = "Pop a screen or window capture into a floating window", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Set log level (error, warn, info, debug, trace)
    #[arg(short, long, value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Enable JSON structured logging
    #[arg(long)]
    pub json_logs: bool,

    /// Show timestamps in logs
    #[arg(long, value_name = "BOOL", default_value_t = true, action = ArgAction::Set)]
    pub timestamps: bool,

    /// Configuration file (defaults to ~/.config/cosmic/cosmic-ext-pip/config.toml)
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Override how long the error label stays up, in milliseconds
    #[arg(long, value_name = "MS")]
    pub revert_delay_ms: Option<u64>,

    /// Diagnostic subcommand
    #[command(subcommand)]
    pub command: Option<DiagnosticCommand>,
}

/// Diagnostic commands for troubleshooting
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum DiagnosticCommand {
    /// Check that PipeWire, the desktop portal and GStreamer are usable
    Check {
        /// Video sink to check instead of the configured one
        #[arg(long, value_name = "ELEMENT")]
        video_sink: Option<String>,
    },
}

/// Initialize logging based on CLI configuration
pub fn init_logging(cli: &Cli) -> Result<()> {
    let log_level = cli.log_level.parse::<Level>().with_context(|| {
        format!(
            "Invalid log level '{}'. Valid levels: error, warn, info, debug, trace",
            cli.log_level
        )
    })?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level.as_str()))
        .context("Failed to create log filter")?;

    // stdout belongs to the console
    let subscriber = fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(true)
        .with_line_number(true);

    match (cli.json_logs, cli.timestamps) {
        (true, true) => subscriber.json().init(),
        (true, false) => subscriber.without_time().json().init(),
        (false, true) => subscriber.init(),
        (false, false) => subscriber.without_time().init(),
    }

    info!(
        "Logging initialized: level={}, json={}, timestamps={}",
        log_level, cli.json_logs, cli.timestamps
    );

    Ok(())
}

/// Outcome of the environment checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requirements {
    /// `pw-cli info` succeeded
    pub pipewire: bool,
    /// The desktop portal answers on the session bus
    pub portal: bool,
    /// GStreamer and every needed element are installed
    pub gstreamer: bool,
}

impl Requirements {
    /// Everything needed to capture and present is present
    pub fn all_met(&self) -> bool {
        self.pipewire && self.portal && self.gstreamer
    }

    /// Print a short report to stdout
    pub fn display(&self, video_sink: &str) {
        println!("PipeWire:             {}", status(self.pipewire));
        println!("xdg-desktop-portal:   {}", status(self.portal));
        println!(
            "GStreamer ({video_sink}): {}",
            status(self.gstreamer)
        );
    }
}

fn status(ok: bool) -> &'static str {
    if ok {
        "ok"
    } else {
        "missing"
    }
}

async fn command_succeeds(program: &str, args: &[&str]) -> bool {
    Process::new(program)
        .args(args)
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Check PipeWire, the portal and the GStreamer elements for `video_sink`
pub async fn check_requirements(video_sink: &str) -> Requirements {
    let pipewire = command_succeeds("pw-cli", &["info"]).await;
    if !pipewire {
        warn!("PipeWire not available (pw-cli failed)");
    }

    let portal = command_succeeds(
        "gdbus",
        &[
            "introspect",
            "--session",
            "--dest",
            "org.freedesktop.portal.Desktop",
            "--object-path",
            "/org/freedesktop/portal/desktop",
        ],
    )
    .await;
    if !portal {
        warn!("xdg-desktop-portal not available");
    }

    let mut elements = REQUIRED_ELEMENTS.to_vec();
    elements.push(video_sink);
    let gstreamer = pipeline::elements_available(&elements);
    if !gstreamer {
        warn!("GStreamer elements missing, need {:?}", elements);
    }

    Requirements {
        pipewire,
        portal,
        gstreamer,
    }
}
