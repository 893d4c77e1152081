//! Consumers of server output and hitch telemetry.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Receives every chunk of server output and every command sent to it.
pub trait ConsoleSink: Send + Sync {
    /// `own_command` is true for commands issued by the supervisor.
    fn broadcast(&self, text: &str, own_command: bool);
}

/// Receives frame times reported by hitch warnings.
pub trait HitchSink: Send + Sync {
    fn process_hitch(&self, millis: u32);
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ConsoleSink for NullSink {
    fn broadcast(&self, _text: &str, _own_command: bool) {}
}

impl HitchSink for NullSink {
    fn process_hitch(&self, _millis: u32) {}
}

/// One entry of the live console.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleLine {
    pub text: String,
    pub own_command: bool,
    pub timestamp: DateTime<Utc>,
}

/// Default capacity for the console broadcast channel.
pub const DEFAULT_CONSOLE_CAPACITY: usize = 256;

/// Fans console output out to any number of subscribers.
///
/// Slow subscribers lag and lose lines rather than blocking the server.
#[derive(Debug, Clone)]
pub struct ConsoleBroadcaster {
    tx: broadcast::Sender<ConsoleLine>,
}

impl Default for ConsoleBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CONSOLE_CAPACITY)
    }
}

impl ConsoleBroadcaster {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConsoleLine> {
        self.tx.subscribe()
    }
}

impl ConsoleSink for ConsoleBroadcaster {
    fn broadcast(&self, text: &str, own_command: bool) {
        // No subscribers is fine.
        let _ = self.tx.send(ConsoleLine {
            text: text.to_string(),
            own_command,
            timestamp: Utc::now(),
        });
    }
}

/// A single hitch warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitchEvent {
    pub millis: u32,
    pub timestamp: DateTime<Utc>,
}

/// Default number of hitch events kept by [`HitchMonitor`].
pub const DEFAULT_HITCH_HISTORY: usize = 500;

#[derive(Debug, Default)]
struct HitchHistory {
    recent: VecDeque<HitchEvent>,
    total: u64,
}

/// Keeps a bounded history of recent hitches.
#[derive(Debug)]
pub struct HitchMonitor {
    capacity: usize,
    history: Mutex<HitchHistory>,
}

impl Default for HitchMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_HITCH_HISTORY)
    }
}

impl HitchMonitor {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            history: Mutex::new(HitchHistory::default()),
        }
    }

    /// Most recent hitches, oldest first.
    #[must_use]
    pub fn recent(&self) -> Vec<HitchEvent> {
        self.lock().recent.iter().copied().collect()
    }

    /// Number of hitches seen since creation.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.lock().total
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HitchHistory> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl HitchSink for HitchMonitor {
    fn process_hitch(&self, millis: u32) {
        tracing::debug!(millis, "Server hitch");
        let mut history = self.lock();
        history.total = history.total.saturating_add(1);
        if self.capacity == 0 {
            return;
        }
        if history.recent.len() == self.capacity {
            history.recent.pop_front();
        }
        history.recent.push_back(HitchEvent {
            millis,
            timestamp: Utc::now(),
        });
    }
}
