//! Operator input on the supervisor's own stdin.
//!
//! Plain lines are forwarded to the server console. Lines starting with
//! `!` control the supervisor itself.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use super::HitchMonitor;
use crate::display;
use crate::supervisor::{Supervisor, SupervisorError};

/// Error type for operator input.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum OperatorError {
    #[error("Unknown supervisor command: !{0}")]
    UnknownCommand(String),
    #[error("!{0} needs an argument")]
    MissingArgument(&'static str),
}

/// One line of operator input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    /// Pass the line to the server unchanged.
    Forward(String),
    Start,
    Stop,
    Restart(Option<String>),
    Children,
    Capture(String),
    Status,
}

impl OperatorCommand {
    /// Parse a line, without its line terminator.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown `!` commands and `!capture` without a
    /// command.
    pub fn parse(line: &str) -> Result<Self, OperatorError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let Some(control) = line.strip_prefix('!') else {
            return Ok(Self::Forward(line.to_string()));
        };

        let (name, rest) = match control.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (control, ""),
        };
        let rest = (!rest.is_empty()).then(|| rest.to_string());

        match name.to_ascii_lowercase().as_str() {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "restart" => Ok(Self::Restart(rest)),
            "children" => Ok(Self::Children),
            "status" => Ok(Self::Status),
            "capture" => rest
                .map(Self::Capture)
                .ok_or(OperatorError::MissingArgument("capture")),
            other => Err(OperatorError::UnknownCommand(other.to_string())),
        }
    }
}

/// Read operator lines until EOF and act on them.
///
/// `hitches` is reported by `!status`.
///
/// # Errors
///
/// Returns the first fatal supervisor error, such as a failed spawn.
pub async fn run_operator<R>(
    reader: R,
    supervisor: Arc<Supervisor>,
    hitches: Arc<HitchMonitor>,
) -> Result<(), SupervisorError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::debug!("Operator input closed");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read operator input");
                break;
            }
        };

        match OperatorCommand::parse(&line) {
            Ok(command) => dispatch(&supervisor, &hitches, command).await?,
            Err(e) => display::print_error(&e.to_string()),
        }
    }
    Ok(())
}

async fn dispatch(
    supervisor: &Arc<Supervisor>,
    hitches: &HitchMonitor,
    command: OperatorCommand,
) -> Result<(), SupervisorError> {
    match command {
        OperatorCommand::Forward(line) => {
            if !supervisor.forward_input(&line).await {
                display::print_error("Server is not running");
            }
        }
        OperatorCommand::Start => match supervisor.spawn().await {
            Ok(()) => display::print_status(&supervisor.status()),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => display::print_error(&e.to_string()),
        },
        OperatorCommand::Stop => {
            supervisor.kill().await;
            display::print_status(&supervisor.status());
        }
        OperatorCommand::Restart(reason) => {
            match supervisor.restart(reason.as_deref()).await {
                Ok(()) => display::print_status(&supervisor.status()),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => display::print_error(&e.to_string()),
            }
        }
        OperatorCommand::Children => match supervisor.descendant_count().await {
            Some(count) => display::print_children(count),
            None => display::print_error("Couldn't list server processes"),
        },
        OperatorCommand::Capture(cmd) => {
            match supervisor.send_and_capture(&cmd, None).await {
                Ok(Some(output)) => display::print_capture(&cmd, &output),
                Ok(None) => display::print_error("Server is not running"),
                Err(e) => display::print_error(&e.to_string()),
            }
        }
        OperatorCommand::Status => {
            display::print_status(&supervisor.status());
            if let Some(uptime) = supervisor.uptime() {
                display::print_uptime(uptime);
            }
            display::print_hitches(hitches.total(), &hitches.recent());
        }
    }
    Ok(())
}
