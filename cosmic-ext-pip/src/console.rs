//! Terminal host for the session controller
//!
//! Reads one command per line and prints the control state every time the
//! controller publishes a new snapshot.

use anyhow::{Context, Result};
use cosmic_ext_pip_controller::{ControlSnapshot, ControllerHandle};
use std::str::FromStr;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

const HELP: &str = "\
commands:
  trigger, t   select a screen, or start the floating window
  stop, s      close the floating window
  reset, r     release the captured stream
  status       show the controls again
  help, h      show this help
  quit, q      exit";

/// One line of console input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Activate the primary trigger
    Trigger,
    /// Activate the stop control
    Stop,
    /// Activate the reset control
    Reset,
    /// Print the current controls
    Status,
    /// Print the command list
    Help,
    /// Leave the console
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trigger" | "t" => Ok(Self::Trigger),
            "stop" | "s" => Ok(Self::Stop),
            "reset" | "r" => Ok(Self::Reset),
            "status" => Ok(Self::Status),
            "help" | "h" | "?" => Ok(Self::Help),
            "quit" | "q" | "exit" => Ok(Self::Quit),
            other => Err(format!("unknown command '{other}', try 'help'")),
        }
    }
}

/// Render the controls on one line
pub fn render(snapshot: &ControlSnapshot) -> String {
    let on_off = |enabled: bool| if enabled { "on" } else { "off" };

    let mut line = format!(
        "[ {} ]  stop: {}  reset: {}",
        snapshot.label,
        on_off(snapshot.stop_enabled),
        on_off(snapshot.reset_enabled)
    );
    if !snapshot.trigger_enabled {
        line.push_str("  (waiting)");
    }
    if snapshot.playing {
        line.push_str("  playing");
    }
    if let Some(notice) = snapshot.notice {
        line.push_str("  ");
        line.push_str(notice);
    }
    line
}

async fn write_line<W>(output: &mut W, line: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    output.write_all(line.as_bytes()).await?;
    output.write_all(b"\n").await?;
    output.flush().await?;
    Ok(())
}

/// Drive the controller from `input` until `quit`, end of input, or the
/// controller going away
pub async fn run<R, W>(handle: ControllerHandle, input: R, mut output: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut updates = handle.subscribe();

    let initial = *updates.borrow_and_update();
    write_line(&mut output, &render(&initial)).await?;

    loop {
        tokio::select! {
            // Show state changes before acting on the next command
            biased;

            changed = updates.changed() => {
                if changed.is_err() {
                    debug!("Controller stopped publishing");
                    break;
                }
                let snapshot = *updates.borrow_and_update();
                write_line(&mut output, &render(&snapshot)).await?;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read console input")? else {
                    debug!("Console input closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }

                match line.parse::<Command>() {
                    Ok(Command::Trigger) => handle.activate_trigger()?,
                    Ok(Command::Stop) => handle.stop()?,
                    Ok(Command::Reset) => handle.reset()?,
                    Ok(Command::Status) => {
                        write_line(&mut output, &render(&handle.snapshot())).await?;
                    }
                    Ok(Command::Help) => write_line(&mut output, HELP).await?,
                    Ok(Command::Quit) => break,
                    Err(message) => write_line(&mut output, &message).await?,
                }
            }
        }
    }

    Ok(())
}
