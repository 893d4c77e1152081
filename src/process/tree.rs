//! Descendant enumeration for the server process tree.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};

/// Error type for process tree enumeration.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// The root process is not in the process table.
    #[error("Process {0} not found")]
    NotFound(u32),
    /// The blocking enumeration task did not finish.
    #[error("Process enumeration was interrupted")]
    Interrupted,
}

/// Source of parent/child relationships between OS processes.
pub trait ProcessTree: Send + Sync {
    /// List every process transitively spawned under `root`, excluding `root`.
    ///
    /// # Errors
    ///
    /// Returns `TreeError::NotFound` if `root` is not running.
    fn descendants(&self, root: u32) -> Result<Vec<u32>, TreeError>;
}

/// Process tree backed by a fresh `sysinfo` snapshot on every call.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTree;

impl ProcessTree for SystemTree {
    fn descendants(&self, root: u32) -> Result<Vec<u32>, TreeError> {
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);

        let root_pid = Pid::from_u32(root);
        if system.process(root_pid).is_none() {
            return Err(TreeError::NotFound(root));
        }

        // Linux lists every thread as a child of its process.
        let edges = system
            .processes()
            .iter()
            .filter(|(_, process)| process.thread_kind().is_none())
            .filter_map(|(pid, process)| {
                process
                    .parent()
                    .map(|parent| (parent.as_u32(), pid.as_u32()))
            });

        Ok(collect_descendants(root, edges))
    }
}

/// The subset of `pids` that are still running. Zombies count as gone.
#[must_use]
pub fn still_running(pids: &[u32]) -> Vec<u32> {
    if pids.is_empty() {
        return Vec::new();
    }
    let wanted: Vec<Pid> = pids.iter().copied().map(Pid::from_u32).collect();
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&wanted), true);

    pids.iter()
        .copied()
        .filter(|pid| {
            system
                .process(Pid::from_u32(*pid))
                .is_some_and(|p| p.status() != ProcessStatus::Zombie)
        })
        .collect()
}

/// Run `tree.descendants(root)` on the blocking thread pool.
///
/// # Errors
///
/// Returns the enumeration error, or `TreeError::Interrupted` if the task
/// was cancelled or panicked.
pub async fn descendants_blocking(
    tree: &Arc<dyn ProcessTree>,
    root: u32,
) -> Result<Vec<u32>, TreeError> {
    let tree = Arc::clone(tree);
    tokio::task::spawn_blocking(move || tree.descendants(root))
        .await
        .unwrap_or(Err(TreeError::Interrupted))
}

/// Walk `(parent, child)` edges depth-first from `root`.
///
/// The result is sorted and never contains `root`.
pub fn collect_descendants(root: u32, edges: impl IntoIterator<Item = (u32, u32)>) -> Vec<u32> {
    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for (parent, child) in edges {
        children.entry(parent).or_default().push(child);
    }

    let mut stack = vec![root];
    let mut seen: HashSet<u32> = HashSet::new();
    while let Some(current) = stack.pop() {
        if !seen.insert(current) {
            continue;
        }
        if let Some(kids) = children.get(&current) {
            stack.extend(kids.iter().filter(|kid| !seen.contains(kid)));
        }
    }

    seen.remove(&root);
    let mut pids: Vec<u32> = seen.into_iter().collect();
    pids.sort_unstable();
    pids
}
