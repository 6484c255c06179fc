mod config;
mod console;
mod diagnostics;
mod pipeline;
mod portal;
mod presenter;

use anyhow::{bail, Context, Result};
use clap::Parser;
use config::Config;
use cosmic_ext_pip_controller::{Controller, Presenter};
use diagnostics::{Cli, DiagnosticCommand};
use portal::PortalSourceProvider;
use presenter::GstWindowPresenter;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tracing::{info, warn};

/// Grace period for blocking tasks (stdin, bus watchers) at exit
const SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(500);

fn main() -> Result<()> {
    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let result = runtime.block_on(run(cli));

    // A pending stdin read would otherwise keep the process alive
    runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);

    result
}

async fn run(cli: Cli) -> Result<()> {
    diagnostics::init_logging(&cli).context("Failed to initialize logging")?;

    let (config, config_path) = load_config(&cli).context("Failed to load configuration")?;

    if let Some(command) = &cli.command {
        return handle_diagnostic_command(command, &config).await;
    }

    info!("Configuration loaded from {}", config_path.display());
    info!("Video sink: {}", config.presenter.video_sink);
    info!(
        "Error label revert delay: {:?}",
        config.controller.error_revert_delay()
    );

    let source = Arc::new(PortalSourceProvider::new(config.capture.clone()));
    let presenter = Arc::new(GstWindowPresenter::new(
        config.presenter.video_sink.clone(),
    ));
    if !presenter.is_supported() {
        warn!(
            "Floating window unavailable, '{}' or pipewiresrc missing",
            config.presenter.video_sink
        );
    }

    let (controller, handle) = Controller::new(source, presenter, config.controller.clone());
    let runner = tokio::spawn(controller.run());

    let stdin = BufReader::new(tokio::io::stdin());
    let result = tokio::select! {
        result = console::run(handle.clone(), stdin, tokio::io::stdout()) => result,
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl+C")?;
            info!("Interrupted, shutting down");
            Ok(())
        }
    };

    // The controller may already have stopped on its own
    let _ = handle.shutdown();
    runner.await.context("Controller task failed")?;

    info!("Session closed");
    result
}

/// Load the configuration file named on the command line, or the default
/// one, and apply command line overrides
fn load_config(cli: &Cli) -> Result<(Config, PathBuf)> {
    let (mut config, path) = match &cli.config {
        Some(path) => (Config::load_from(path)?, path.clone()),
        None => (Config::load()?, Config::default_path()),
    };
    if let Some(delay_ms) = cli.revert_delay_ms {
        config.controller.error_revert_delay_ms = delay_ms;
    }
    Ok((config, path))
}

async fn handle_diagnostic_command(command: &DiagnosticCommand, config: &Config) -> Result<()> {
    match command {
        DiagnosticCommand::Check { video_sink } => {
            let sink = video_sink
                .as_deref()
                .unwrap_or(config.presenter.video_sink.as_str());
            let requirements = diagnostics::check_requirements(sink).await;
            requirements.display(sink);

            if !requirements.all_met() {
                bail!("System requirements not met");
            }
            Ok(())
        }
    }
}
