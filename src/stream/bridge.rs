//! Wiring of the server's standard streams.
//!
//! stdout goes to the console broadcast, the terminal (unless quiet),
//! the capture window and the hitch watcher. stderr is only logged.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::ChildStdin;
use tokio::task::JoinHandle;

use super::{HitchWatcher, SharedCapture};
use crate::console::{ConsoleSink, HitchSink};
use crate::process::ServerProcess;

/// Read size for the output pumps.
pub const CHUNK_SIZE: usize = 8192;

/// Where server stdout is delivered.
#[derive(Clone)]
pub struct StdoutTargets {
    pub console: Arc<dyn ConsoleSink>,
    pub monitor: Arc<dyn HitchSink>,
    pub capture: SharedCapture,
    /// Echo output to the supervisor's own stdout.
    pub echo: bool,
}

/// Pump tasks started for one server process.
#[derive(Debug)]
pub struct StdioBridge {
    pub stdin: Option<ChildStdin>,
    pub stdout_task: Option<JoinHandle<()>>,
    pub stderr_task: Option<JoinHandle<()>>,
}

impl StdioBridge {
    /// Take the process's pipes and start pumping its output.
    pub fn wire(process: &mut ServerProcess, targets: StdoutTargets) -> Self {
        let stdout_task = process
            .take_stdout()
            .map(|stdout| tokio::spawn(pump_stdout(stdout, targets)));
        let stderr_task = process
            .take_stderr()
            .map(|stderr| tokio::spawn(pump_stderr(stderr)));

        if stdout_task.is_none() {
            tracing::warn!("Server stdout not available");
        }

        Self {
            stdin: process.take_stdin(),
            stdout_task,
            stderr_task,
        }
    }
}

/// Forward server stdout chunk by chunk until EOF.
pub async fn pump_stdout<R>(mut reader: R, targets: StdoutTargets)
where
    R: AsyncRead + Unpin,
{
    let mut watcher = HitchWatcher::new();
    let mut echo = targets.echo.then(tokio::io::stdout);
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                tracing::debug!("Server stdout closed");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "Server stdout error");
                break;
            }
        };
        let chunk = &buf[..n];
        let text = String::from_utf8_lossy(chunk);

        targets.console.broadcast(&text, false);
        targets.capture.append(&text);

        if let Some(out) = echo.as_mut() {
            if out.write_all(chunk).await.is_err() || out.flush().await.is_err() {
                tracing::debug!("Terminal echo failed, disabling it");
                echo = None;
            }
        }

        for millis in watcher.feed(chunk) {
            targets.monitor.process_hitch(millis);
        }
    }
}

/// Log server stderr verbatim as warnings until EOF.
pub async fn pump_stderr<R>(mut reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let text = String::from_utf8_lossy(&buf[..n]);
                tracing::warn!("\n========\n{text}\n========");
            }
            Err(e) => {
                tracing::debug!(error = %e, "Server stderr error");
                break;
            }
        }
    }
}
