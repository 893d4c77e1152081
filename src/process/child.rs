//! Server process spawning and control.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use super::LaunchSpec;

/// How often lingering descendants are checked during termination.
const DESCENDANT_POLL: Duration = Duration::from_millis(50);

/// Error type for process spawning operations.
#[derive(thiserror::Error, Debug)]
pub enum SpawnError {
    /// The shell was not found.
    #[error("Shell not found: {0}")]
    NotFound(String),
    /// Permission denied when spawning.
    #[error("Permission denied")]
    PermissionDenied,
    /// Other I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpawnError {
    /// Create a `SpawnError` from an I/O error, classifying common cases.
    fn from_io(err: std::io::Error, spec: &LaunchSpec) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(spec.shell().display().to_string()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            _ => Self::Io(err),
        }
    }
}

/// A running server process with all three standard streams piped.
#[derive(Debug)]
pub struct ServerProcess {
    child: Child,
}

impl ServerProcess {
    /// Spawn the server described by `spec`.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` if the process fails to spawn.
    pub fn spawn(spec: &LaunchSpec) -> Result<Self, SpawnError> {
        let mut cmd = Command::new(spec.shell());
        cmd.args(spec.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if !spec.cwd().as_os_str().is_empty() {
            cmd.current_dir(spec.cwd());
        }

        let child = cmd.spawn().map_err(|e| SpawnError::from_io(e, spec))?;

        Ok(Self { child })
    }

    /// Take ownership of the stdin handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    /// Take ownership of the stdout handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Take ownership of the stderr handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Get the process ID, if still running.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the process to exit.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting fails.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Forcefully kill the process.
    ///
    /// # Errors
    ///
    /// Returns an error if the kill signal cannot be sent.
    pub async fn kill(&mut self) -> std::io::Result<()> {
        self.child.kill().await
    }

    /// Attempt graceful termination with a timeout.
    ///
    /// On Unix, sends SIGTERM to the process and to `descendants` first.
    /// Whatever is still alive when the timeout runs out gets SIGKILL,
    /// including descendants that outlive the process itself. On other
    /// platforms, falls back to immediate kill.
    ///
    /// # Errors
    ///
    /// Returns an error if termination fails.
    pub async fn graceful_terminate(
        &mut self,
        descendants: &[u32],
        timeout: Duration,
    ) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            self.graceful_terminate_unix(descendants, timeout).await
        }

        #[cfg(not(unix))]
        {
            let _ = (descendants, timeout);
            self.kill().await
        }
    }

    #[cfg(unix)]
    async fn graceful_terminate_unix(
        &mut self,
        descendants: &[u32],
        timeout: Duration,
    ) -> std::io::Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.id() else {
            // Process already exited
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "process already exited",
            ));
        };

        let to_nix = |pid: u32| Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX));
        let deadline = tokio::time::Instant::now() + timeout;

        kill(to_nix(pid), Signal::SIGTERM).map_err(std::io::Error::from)?;
        for child in descendants {
            let _ = kill(to_nix(*child), Signal::SIGTERM);
        }

        let result = match tokio::time::timeout_at(deadline, self.child.wait()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                tracing::debug!(pid, "SIGTERM timed out, sending SIGKILL");
                self.child.kill().await
            }
        };

        // The launcher shell usually dies first; its children may ignore SIGTERM.
        loop {
            let remaining = super::still_running(descendants);
            if remaining.is_empty() {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::debug!(
                    pids = ?remaining,
                    "Descendants outlived SIGTERM, sending SIGKILL"
                );
                for child in remaining {
                    let _ = kill(to_nix(child), Signal::SIGKILL);
                }
                break;
            }
            tokio::time::sleep(DESCENDANT_POLL).await;
        }

        result
    }
}
