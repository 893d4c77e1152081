//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Metadata injected into the server's scripting environment after spawn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// Prefix for the injected convars (`<prefix>-version`, `<prefix>-port`).
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Version string reported to the server.
    #[serde(default = "default_version")]
    pub version: String,
    /// Port the web layer listens on.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_prefix() -> String {
    "FXAdmin".to_string()
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_port() -> u16 {
    40120
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            version: default_version(),
            port: default_port(),
        }
    }
}

/// Delays used by the supervisor, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    /// Delay between spawn and the priority pass.
    pub priority_delay: u64,
    /// Delay between spawn and metadata injection.
    pub metadata_delay: u64,
    /// Gap between consecutive metadata commands.
    pub metadata_step: u64,
    /// Grace period after announcing a restart.
    pub restart_announce: u64,
    /// Grace period between kill and relaunch.
    pub restart_relaunch: u64,
    /// Default capture window for `send_and_capture`.
    pub capture_window: u64,
    /// Time allowed for SIGTERM before the child is force-killed.
    pub terminate_timeout: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            priority_delay: 2500,
            metadata_delay: 5000,
            metadata_step: 150,
            restart_announce: 500,
            restart_relaunch: 750,
            capture_window: 1500,
            terminate_timeout: 5000,
        }
    }
}

impl Timings {
    #[must_use]
    pub fn priority_delay(&self) -> Duration {
        Duration::from_millis(self.priority_delay)
    }

    #[must_use]
    pub fn metadata_delay(&self) -> Duration {
        Duration::from_millis(self.metadata_delay)
    }

    #[must_use]
    pub fn metadata_step(&self) -> Duration {
        Duration::from_millis(self.metadata_step)
    }

    #[must_use]
    pub fn restart_announce(&self) -> Duration {
        Duration::from_millis(self.restart_announce)
    }

    #[must_use]
    pub fn restart_relaunch(&self) -> Duration {
        Duration::from_millis(self.restart_relaunch)
    }

    #[must_use]
    pub fn capture_window(&self) -> Duration {
        Duration::from_millis(self.capture_window)
    }

    #[must_use]
    pub fn terminate_timeout(&self) -> Duration {
        Duration::from_millis(self.terminate_timeout)
    }
}

/// Configuration for the server runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Directory containing the server build (`run.sh` / `run.cmd`).
    #[serde(default)]
    pub build_path: PathBuf,
    /// Server config file passed to `+exec`.
    #[serde(default = "default_cfg_path")]
    pub cfg_path: PathBuf,
    /// Working directory of the child process.
    #[serde(default)]
    pub base_path: PathBuf,
    /// Enable OneSync on the server.
    #[serde(default)]
    pub onesync: bool,
    /// Start the server automatically after `autostart_delay` seconds.
    #[serde(default)]
    pub autostart: bool,
    #[serde(default = "default_autostart_delay")]
    pub autostart_delay: u64,
    /// Don't echo server output to the terminal.
    #[serde(default)]
    pub quiet: bool,
    /// Scheduling priority applied to the server process tree.
    #[serde(default)]
    pub set_priority: Option<String>,
    /// Forward the supervisor's stdin to the server.
    #[serde(default = "default_true")]
    pub bridge_stdin: bool,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub timings: Timings,
}

fn default_cfg_path() -> PathBuf {
    PathBuf::from("server.cfg")
}

fn default_autostart_delay() -> u64 {
    2
}

fn default_true() -> bool {
    true
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            build_path: PathBuf::new(),
            cfg_path: default_cfg_path(),
            base_path: PathBuf::new(),
            onesync: false,
            autostart: false,
            autostart_delay: default_autostart_delay(),
            quiet: false,
            set_priority: None,
            bridge_stdin: true,
            metadata: MetadataConfig::default(),
            timings: Timings::default(),
        }
    }
}

impl RunnerConfig {
    /// Delay before an automatic start.
    #[must_use]
    pub fn autostart_delay(&self) -> Duration {
        Duration::from_secs(self.autostart_delay)
    }
}
