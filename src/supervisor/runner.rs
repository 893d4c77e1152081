//! Server supervisor: owns the server process and drives its lifecycle.
//!
//! Lifecycle operations (`spawn`, `kill`, `restart`) are serialized by an
//! internal lock. Work scheduled after a spawn is tagged with the spawn
//! generation and dropped once a newer process exists.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::process::ChildStdin;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::RunnerConfig;
use crate::console::{ConsoleSink, HitchSink, NullSink};
use crate::process::{
    build_launch_spec, descendants_blocking, LaunchError, LaunchSpec, Platform, PriorityManager,
    ProcessTree, ServerProcess, SpawnError, SystemPriority, SystemTree,
};
use crate::stream::{SharedCapture, StdioBridge, StdoutTargets};
use crate::supervisor::{inject, Generation, ServerState, StateMachine, SupervisorStatus};

/// Error type for supervisor operations.
#[derive(thiserror::Error, Debug)]
pub enum SupervisorError {
    /// No launch spec exists for this platform.
    #[error(transparent)]
    Launch(#[from] LaunchError),
    /// The server could not be started.
    #[error("Failed to start server: {0}")]
    Spawn(#[from] SpawnError),
    /// A server process is already running.
    #[error("Server is already running")]
    AlreadyRunning,
}

impl SupervisorError {
    /// Errors the supervising process cannot continue after.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Launch(_) | Self::Spawn(_))
    }
}

/// Reply channel for a kill request sent to the exit watcher.
type KillReply = oneshot::Sender<io::Result<()>>;

/// The live server process, as seen by the supervisor.
#[derive(Debug)]
pub(super) struct ChildHandle {
    pub(super) pid: Option<u32>,
    pub(super) generation: u64,
    pub(super) started_at: DateTime<Utc>,
    /// Cancelled when the process exits or is killed.
    pub(super) exited: CancellationToken,
    kill_tx: Option<oneshot::Sender<KillReply>>,
}

impl ChildHandle {
    fn is_alive(&self) -> bool {
        !self.exited.is_cancelled()
    }
}

/// Builder for a [`Supervisor`].
pub struct SupervisorBuilder {
    config: RunnerConfig,
    platform: Platform,
    console: Arc<dyn ConsoleSink>,
    monitor: Arc<dyn HitchSink>,
    tree: Arc<dyn ProcessTree>,
    priority: Option<PriorityManager>,
}

impl SupervisorBuilder {
    /// Create a builder for the current platform with null sinks.
    #[must_use]
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            platform: Platform::current(),
            console: Arc::new(NullSink),
            monitor: Arc::new(NullSink),
            tree: Arc::new(SystemTree),
            priority: None,
        }
    }

    /// Override the platform used for launch composition.
    #[must_use]
    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Set the consumer of server output and sent commands.
    #[must_use]
    pub fn console(mut self, console: Arc<dyn ConsoleSink>) -> Self {
        self.console = console;
        self
    }

    /// Set the consumer of hitch reports.
    #[must_use]
    pub fn monitor(mut self, monitor: Arc<dyn HitchSink>) -> Self {
        self.monitor = monitor;
        self
    }

    /// Set the process tree source used for descendant counts and kills.
    #[must_use]
    pub fn tree(mut self, tree: Arc<dyn ProcessTree>) -> Self {
        self.tree = tree;
        self
    }

    /// Set the priority manager.
    #[must_use]
    pub fn priority(mut self, priority: PriorityManager) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Compute the launch spec and build the supervisor.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::Launch` if the platform is not supported.
    pub fn build(self) -> Result<Arc<Supervisor>, SupervisorError> {
        let launch = build_launch_spec(&self.platform, &self.config)?;
        tracing::debug!(command = %launch.display_command(), "Launch spec ready");

        let tree = Arc::clone(&self.tree);
        let priority = self
            .priority
            .unwrap_or_else(|| PriorityManager::new(tree, Arc::new(SystemPriority)));

        Ok(Arc::new(Supervisor {
            config: self.config,
            launch,
            console: self.console,
            monitor: self.monitor,
            tree: self.tree,
            priority,
            lifecycle: tokio::sync::Mutex::new(()),
            slot: Mutex::new(None),
            stdin: tokio::sync::Mutex::new(None),
            capture: SharedCapture::new(),
            capture_token: tokio::sync::Mutex::new(()),
            generation: Generation::default(),
            state: StateMachine::new(),
        }))
    }
}

/// Supervisor for a single long-running server process.
pub struct Supervisor {
    pub(super) config: RunnerConfig,
    launch: LaunchSpec,
    pub(super) console: Arc<dyn ConsoleSink>,
    monitor: Arc<dyn HitchSink>,
    tree: Arc<dyn ProcessTree>,
    priority: PriorityManager,
    /// Held for the whole of `spawn`, `kill` and `restart`.
    lifecycle: tokio::sync::Mutex<()>,
    slot: Mutex<Option<ChildHandle>>,
    pub(super) stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    pub(super) capture: SharedCapture,
    /// Held for the whole of a capture window.
    pub(super) capture_token: tokio::sync::Mutex<()>,
    generation: Generation,
    state: StateMachine,
}

impl Supervisor {
    /// Create a supervisor for the current platform.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::Launch` if the platform is not supported.
    pub fn new(
        config: RunnerConfig,
        console: Arc<dyn ConsoleSink>,
        monitor: Arc<dyn HitchSink>,
    ) -> Result<Arc<Self>, SupervisorError> {
        SupervisorBuilder::new(config)
            .console(console)
            .monitor(monitor)
            .build()
    }

    #[must_use]
    pub fn builder(config: RunnerConfig) -> SupervisorBuilder {
        SupervisorBuilder::new(config)
    }

    #[must_use]
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    #[must_use]
    pub fn launch_spec(&self) -> &LaunchSpec {
        &self.launch
    }

    #[must_use]
    pub fn state(&self) -> ServerState {
        self.state.state()
    }

    #[must_use]
    pub fn subscribe_state(&self) -> tokio::sync::watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.current()
    }

    /// True while a server process is believed to be alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.slot().as_ref().is_some_and(ChildHandle::is_alive)
    }

    /// Process id of the live server process.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.slot()
            .as_ref()
            .filter(|h| h.is_alive())
            .and_then(|h| h.pid)
    }

    /// Time since the live server process was started.
    #[must_use]
    pub fn uptime(&self) -> Option<Duration> {
        self.slot()
            .as_ref()
            .filter(|h| h.is_alive())
            .and_then(|h| (Utc::now() - h.started_at).to_std().ok())
    }

    #[must_use]
    pub fn status(&self) -> SupervisorStatus {
        let slot = self.slot();
        let live = slot.as_ref().filter(|h| h.is_alive());
        SupervisorStatus {
            state: self.state.state(),
            pid: live.and_then(|h| h.pid),
            generation: self.generation.current(),
            started_at: live.map(|h| h.started_at),
        }
    }

    /// Start the server.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::AlreadyRunning` (leaving the live process
    /// untouched) if a server is running, or `SupervisorError::Spawn` if
    /// the process could not be started. The latter is fatal.
    pub async fn spawn(self: &Arc<Self>) -> Result<(), SupervisorError> {
        let _lifecycle = self.lifecycle.lock().await;
        self.spawn_locked().await
    }

    /// Stop the server.
    ///
    /// The handle is cleared whether or not termination succeeded.
    /// Returns false if there was nothing to kill or the kill failed.
    pub async fn kill(&self) -> bool {
        let _lifecycle = self.lifecycle.lock().await;
        self.kill_locked().await
    }

    /// Restart the server, announcing `reason` to players first.
    ///
    /// # Errors
    ///
    /// Returns the error of the final spawn.
    pub async fn restart(self: &Arc<Self>, reason: Option<&str>) -> Result<(), SupervisorError> {
        let _lifecycle = self.lifecycle.lock().await;
        let timings = &self.config.timings;

        if let Some(reason) = reason {
            let reason = reason.replace(['\r', '\n', '\0'], " ");
            if let Ok(false) = self.send(&format!("say Restarting server ({reason}).")).await {
                tracing::debug!("Restart announcement not delivered");
            }
            tokio::time::sleep(timings.restart_announce()).await;
        }

        self.kill_locked().await;
        tokio::time::sleep(timings.restart_relaunch()).await;
        self.spawn_locked().await
    }

    /// Number of processes running under the server's launcher shell.
    ///
    /// `None` if there is no live server or the tree could not be listed.
    pub async fn descendant_count(&self) -> Option<usize> {
        let pid = self.pid()?;
        descendants_blocking(&self.tree, pid)
            .await
            .ok()
            .map(|pids| pids.len())
    }

    /// Start the server after the configured autostart delay.
    ///
    /// The returned task resolves to the spawn result so the caller can
    /// treat a failed start as fatal.
    pub fn schedule_autostart(self: &Arc<Self>) -> JoinHandle<Result<(), SupervisorError>> {
        let sup = Arc::clone(self);
        let delay = self.config.autostart_delay();
        tokio::spawn(async move {
            tracing::info!(delay_secs = delay.as_secs(), "Autostart scheduled");
            tokio::time::sleep(delay).await;
            sup.spawn().await
        })
    }

    /// Token cancelled when the live server process exits.
    pub(super) fn exit_token(&self) -> Option<CancellationToken> {
        self.slot()
            .as_ref()
            .filter(|h| h.is_alive())
            .map(|h| h.exited.clone())
    }

    /// Process id of the server if it belongs to `generation` and is alive.
    pub(super) fn pid_for(&self, generation: u64) -> Option<u32> {
        self.slot()
            .as_ref()
            .filter(|h| h.generation == generation && h.is_alive())
            .and_then(|h| h.pid)
    }

    pub(super) fn is_current(&self, generation: u64) -> bool {
        self.generation.is_current(generation)
    }

    fn slot(&self) -> MutexGuard<'_, Option<ChildHandle>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn spawn_locked(self: &Arc<Self>) -> Result<(), SupervisorError> {
        if let Some(handle) = self.slot().as_ref() {
            if handle.is_alive() {
                tracing::error!(pid = ?handle.pid, "Server is already running");
                return Err(SupervisorError::AlreadyRunning);
            }
        }

        self.state.transition(ServerState::Starting);
        let mut process = match ServerProcess::spawn(&self.launch) {
            Ok(process) => process,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    command = %self.launch.display_command(),
                    "Failed to start server"
                );
                self.state.transition(ServerState::Stopped);
                return Err(e.into());
            }
        };

        let pid = process.id();
        let generation = self.generation.advance();
        let exited = CancellationToken::new();
        let (kill_tx, kill_rx) = oneshot::channel();

        let bridge = StdioBridge::wire(
            &mut process,
            StdoutTargets {
                console: Arc::clone(&self.console),
                monitor: Arc::clone(&self.monitor),
                capture: self.capture.clone(),
                echo: !self.config.quiet,
            },
        );
        *self.stdin.lock().await = bridge.stdin;

        *self.slot() = Some(ChildHandle {
            pid,
            generation,
            started_at: Utc::now(),
            exited: exited.clone(),
            kill_tx: Some(kill_tx),
        });
        self.state.transition(ServerState::Running);
        tracing::info!(pid = ?pid, generation, "Server started");

        tokio::spawn(Arc::clone(self).watch_exit(process, generation, exited.clone(), kill_rx));
        self.schedule_priority(generation, exited.clone());
        self.schedule_metadata(generation, exited);

        Ok(())
    }

    async fn kill_locked(&self) -> bool {
        let handle = self.slot().take();
        self.stdin.lock().await.take();

        let Some(mut handle) = handle else {
            tracing::warn!("Couldn't kill the server: no server process");
            self.state.transition(ServerState::Stopped);
            return false;
        };

        self.state.transition(ServerState::Stopping);
        let result = match handle.kill_tx.take() {
            Some(kill_tx) => {
                let (reply_tx, reply_rx) = oneshot::channel();
                if kill_tx.send(reply_tx).is_ok() {
                    reply_rx
                        .await
                        .unwrap_or_else(|_| Err(io::Error::other("server process already exited")))
                } else {
                    Err(io::Error::other("server process already exited"))
                }
            }
            None => Err(io::Error::other("server process has no control channel")),
        };
        handle.exited.cancel();
        self.state.transition(ServerState::Stopped);

        match result {
            Ok(()) => {
                tracing::info!(pid = ?handle.pid, generation = handle.generation, "Server stopped");
                true
            }
            Err(e) => {
                tracing::warn!("Couldn't kill the server. Perhaps What Is Dead May Never Die.");
                tracing::debug!(error = %e, "Kill failed");
                false
            }
        }
    }

    /// Own the process until it exits or a kill is requested.
    async fn watch_exit(
        self: Arc<Self>,
        mut process: ServerProcess,
        generation: u64,
        exited: CancellationToken,
        kill_rx: oneshot::Receiver<KillReply>,
    ) {
        let pid = process.id();

        tokio::select! {
            status = process.wait() => {
                exited.cancel();
                match status {
                    Ok(status) => tracing::warn!(
                        pid = ?pid,
                        code = ?status.code(),
                        signal = ?exit_signal(&status),
                        ">> server process exited"
                    ),
                    Err(e) => tracing::warn!(pid = ?pid, error = %e, ">> server process error"),
                }
                if self.generation.is_current(generation) && self.state.crash() {
                    tracing::warn!(generation, "Server exited unexpectedly; not restarting");
                }
            }
            Ok(reply) = kill_rx => {
                let descendants = match pid {
                    Some(pid) => descendants_blocking(&self.tree, pid).await.unwrap_or_default(),
                    None => Vec::new(),
                };
                let result = process
                    .graceful_terminate(&descendants, self.config.timings.terminate_timeout())
                    .await;
                exited.cancel();
                let _ = reply.send(result);
            }
        }
    }

    fn schedule_priority(self: &Arc<Self>, generation: u64, exited: CancellationToken) {
        if self.config.set_priority.is_none() {
            return;
        }
        let sup = Arc::clone(self);
        let delay = self.config.timings.priority_delay();
        tokio::spawn(async move {
            tokio::select! {
                () = exited.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
            if !sup.is_current(generation) {
                return;
            }
            let pid = sup.pid_for(generation);
            sup.priority
                .apply(pid, sup.config.set_priority.as_deref())
                .await;
        });
    }

    fn schedule_metadata(self: &Arc<Self>, generation: u64, exited: CancellationToken) {
        let sup = Arc::clone(self);
        tokio::spawn(async move {
            inject::inject_metadata(&sup, generation, &exited).await;
        });
    }
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}
