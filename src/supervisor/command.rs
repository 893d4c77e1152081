//! Text commands written to the server console.
//!
//! The server has no reply channel. A "response" is whatever it prints
//! during a fixed window after the command, including any unrelated
//! output that happens to land in the same window.

use std::time::Duration;

use tokio::io::AsyncWriteExt;

use super::Supervisor;

/// Error type for command validation.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Commands are single lines of text.
    #[error("Command must be a single line of text: {0:?}")]
    InvalidCommand(String),
}

/// Check that `command` can be written as exactly one console line.
///
/// # Errors
///
/// Returns `CommandError::InvalidCommand` if the command contains a line
/// terminator or a NUL byte.
pub fn validate_command(command: &str) -> Result<(), CommandError> {
    if command.contains(['\n', '\r', '\0']) {
        return Err(CommandError::InvalidCommand(command.to_string()));
    }
    Ok(())
}

impl Supervisor {
    /// Write `command` to the server console.
    ///
    /// Returns `Ok(false)` if there is no live server or the write failed.
    ///
    /// # Errors
    ///
    /// Returns `CommandError::InvalidCommand` before any I/O if the command
    /// is not a single line.
    pub async fn send(&self, command: &str) -> Result<bool, CommandError> {
        validate_command(command)?;

        if !self.write_line(command).await {
            return Ok(false);
        }
        self.console.broadcast(command, true);
        Ok(true)
    }

    /// Send `command` and collect the server output for `window`.
    ///
    /// `window` defaults to the configured capture window. Returns
    /// `Ok(None)` without waiting if the command could not be sent. The
    /// window ends early if the server exits. Concurrent captures are
    /// serialized.
    ///
    /// # Errors
    ///
    /// Returns `CommandError::InvalidCommand` if the command is not a
    /// single line.
    pub async fn send_and_capture(
        &self,
        command: &str,
        window: Option<Duration>,
    ) -> Result<Option<String>, CommandError> {
        validate_command(command)?;
        let window = window.unwrap_or_else(|| self.config.timings.capture_window());

        let _token = self.capture_token.lock().await;
        self.capture.open();

        if !self.send(command).await? {
            self.capture.close();
            return Ok(None);
        }

        match self.exit_token() {
            Some(exited) => {
                tokio::select! {
                    () = tokio::time::sleep(window) => {}
                    () = exited.cancelled() => {
                        tracing::debug!(command, "Server exited during capture window");
                    }
                }
            }
            None => tokio::time::sleep(window).await,
        }

        Ok(Some(self.capture.close()))
    }

    /// Forward a line typed by the operator to the server as-is.
    ///
    /// Unlike [`Supervisor::send`], the line is not mirrored to the
    /// console broadcast.
    pub async fn forward_input(&self, line: &str) -> bool {
        self.write_line(line).await
    }

    async fn write_line(&self, line: &str) -> bool {
        let mut stdin = self.stdin.lock().await;
        let pipe = match stdin.as_mut() {
            Some(pipe) if self.is_running() => pipe,
            _ => {
                tracing::debug!(line, "No server process to write to");
                return false;
            }
        };

        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');

        let result = match pipe.write_all(&bytes).await {
            Ok(()) => pipe.flush().await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Error writing to server stdin");
                false
            }
        }
    }
}
