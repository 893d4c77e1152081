//! Server lifecycle state.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Lifecycle state of the supervised server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    /// The server exited without being asked to.
    Crashed,
}

impl ServerState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Crashed => "crashed",
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable state machine for the server lifecycle.
#[derive(Debug)]
pub struct StateMachine {
    tx: watch::Sender<ServerState>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ServerState::Stopped);
        Self { tx }
    }

    #[must_use]
    pub fn state(&self) -> ServerState {
        *self.tx.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.tx.subscribe()
    }

    pub fn transition(&self, new_state: ServerState) {
        let old = self.tx.send_replace(new_state);
        tracing::debug!(from = %old, to = %new_state, "State transition");
    }

    /// Move `Running` to `Crashed`. Returns false in any other state.
    pub fn crash(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == ServerState::Running {
                *state = ServerState::Crashed;
                true
            } else {
                false
            }
        })
    }
}

/// Spawn counter used to invalidate work scheduled for an older process.
#[derive(Debug, Default)]
pub struct Generation(AtomicU64);

impl Generation {
    /// Start a new generation and return it.
    pub fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    #[must_use]
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_current(&self, generation: u64) -> bool {
        self.current() == generation
    }
}

/// Point-in-time view of the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorStatus {
    pub state: ServerState,
    pub pid: Option<u32>,
    pub generation: u64,
    pub started_at: Option<DateTime<Utc>>,
}
