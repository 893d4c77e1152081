//! Scheduling priority for the server process tree.
//!
//! The launcher shell is the direct child, so the priority has to be
//! pushed down to everything it started, not just the shell itself.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;

use super::{descendants_blocking, ProcessTree, SystemTree, TreeError};

/// Error type for priority changes.
#[derive(thiserror::Error, Debug)]
pub enum PriorityError {
    /// The name is not one of the known priority levels.
    #[error("Invalid priority value: {0} (use one of LOW, BELOW_NORMAL, NORMAL, ABOVE_NORMAL, HIGH, HIGHEST)")]
    InvalidLevel(String),
    /// The OS tool could not be started.
    #[error("Failed to run priority command: {0}")]
    Io(#[from] std::io::Error),
    /// The OS tool ran but refused the change.
    #[error("Priority command failed for pid {pid}: {message}")]
    Rejected { pid: u32, message: String },
}

/// Scheduling priority, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PriorityLevel {
    Low,
    BelowNormal,
    Normal,
    AboveNormal,
    High,
    Highest,
}

impl PriorityLevel {
    pub const ALL: [Self; 6] = [
        Self::Low,
        Self::BelowNormal,
        Self::Normal,
        Self::AboveNormal,
        Self::High,
        Self::Highest,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::BelowNormal => "BELOW_NORMAL",
            Self::Normal => "NORMAL",
            Self::AboveNormal => "ABOVE_NORMAL",
            Self::High => "HIGH",
            Self::Highest => "HIGHEST",
        }
    }

    /// Unix nice value for this level.
    #[must_use]
    pub fn nice_value(self) -> i32 {
        match self {
            Self::Low => 19,
            Self::BelowNormal => 10,
            Self::Normal => 0,
            Self::AboveNormal => -7,
            Self::High => -14,
            Self::Highest => -20,
        }
    }

    /// Windows priority class for this level.
    #[must_use]
    pub fn windows_class(self) -> u32 {
        match self {
            Self::Low => 64,
            Self::BelowNormal => 16384,
            Self::Normal => 32,
            Self::AboveNormal => 32768,
            Self::High => 128,
            Self::Highest => 256,
        }
    }
}

impl fmt::Display for PriorityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PriorityLevel {
    type Err = PriorityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|level| level.as_str() == upper)
            .ok_or_else(|| PriorityError::InvalidLevel(s.to_string()))
    }
}

/// Something that can change the scheduling priority of a single process.
#[async_trait]
pub trait PriorityBackend: Send + Sync {
    /// Apply `level` to `pid`.
    async fn set_priority(&self, pid: u32, level: PriorityLevel) -> Result<(), PriorityError>;
}

/// Backend using the platform's own tools (`renice` / `wmic`).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPriority;

#[async_trait]
impl PriorityBackend for SystemPriority {
    async fn set_priority(&self, pid: u32, level: PriorityLevel) -> Result<(), PriorityError> {
        let output = if cfg!(windows) {
            let filter = format!("ProcessId={pid}");
            let class = level.windows_class().to_string();
            Command::new("wmic")
                .args(["process", "where", filter.as_str(), "CALL", "setpriority"])
                .arg(class)
                .output()
                .await?
        } else {
            let nice = level.nice_value().to_string();
            let pid_arg = pid.to_string();
            Command::new("renice")
                .args(["-n", nice.as_str(), "-p", pid_arg.as_str()])
                .output()
                .await?
        };

        if output.status.success() {
            Ok(())
        } else {
            Err(PriorityError::Rejected {
                pid,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

/// Result of a priority pass.
#[derive(Debug)]
pub enum PriorityOutcome {
    /// Nothing configured, or the OS default was requested.
    Skipped,
    /// The configured name is not a priority level.
    Invalid(String),
    /// The server has no known process id.
    UnknownPid,
    /// The process tree could not be listed.
    EnumerationFailed(TreeError),
    /// The level was pushed to the tree; `failed` lists the pids that refused it.
    Applied {
        level: PriorityLevel,
        applied: Vec<u32>,
        failed: Vec<(u32, PriorityError)>,
    },
}

impl PriorityOutcome {
    /// True when every enumerated process took the new priority.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Applied { failed, .. } if failed.is_empty())
    }
}

/// Applies the configured priority to the server process tree.
#[derive(Clone)]
pub struct PriorityManager {
    tree: Arc<dyn ProcessTree>,
    backend: Arc<dyn PriorityBackend>,
}

impl Default for PriorityManager {
    fn default() -> Self {
        Self::new(Arc::new(SystemTree), Arc::new(SystemPriority))
    }
}

impl PriorityManager {
    #[must_use]
    pub fn new(tree: Arc<dyn ProcessTree>, backend: Arc<dyn PriorityBackend>) -> Self {
        Self { tree, backend }
    }

    /// Apply `setting` to every descendant of `pid`.
    ///
    /// Never fails: every problem is logged as a warning and reported in
    /// the returned outcome.
    pub async fn apply(&self, pid: Option<u32>, setting: Option<&str>) -> PriorityOutcome {
        let Some(setting) = setting else {
            return PriorityOutcome::Skipped;
        };

        let level = match setting.parse::<PriorityLevel>() {
            Ok(PriorityLevel::Normal) => return PriorityOutcome::Skipped,
            Ok(level) => level,
            Err(e) => {
                tracing::warn!("Couldn't set the processes priority: {e}");
                return PriorityOutcome::Invalid(setting.to_string());
            }
        };

        let Some(pid) = pid else {
            tracing::warn!("Couldn't set the processes priority: Unknown PID.");
            return PriorityOutcome::UnknownPid;
        };

        let pids = match descendants_blocking(&self.tree, pid).await {
            Ok(pids) => pids,
            Err(e) => {
                tracing::warn!(pid, error = %e, "Couldn't set the processes priority.");
                return PriorityOutcome::EnumerationFailed(e);
            }
        };

        let mut applied = Vec::new();
        let mut failed = Vec::new();
        for child in pids {
            match self.backend.set_priority(child, level).await {
                Ok(()) => applied.push(child),
                Err(e) => failed.push((child, e)),
            }
        }

        if failed.is_empty() {
            tracing::info!(priority = %level, pids = ?applied, "Priority set");
        } else {
            let failed_pids: Vec<u32> = failed.iter().map(|(pid, _)| *pid).collect();
            tracing::warn!(
                priority = %level,
                applied = ?applied,
                failed = ?failed_pids,
                "Couldn't set the priority of every server process"
            );
            for (pid, e) in &failed {
                tracing::debug!(pid, error = %e, "Priority change refused");
            }
        }

        PriorityOutcome::Applied {
            level,
            applied,
            failed,
        }
    }
}
