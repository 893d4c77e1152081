//! Supervisor module tests.
//!
//! These run a fake server: a `run.sh` launched through `/bin/bash`
//! exactly like the real one, usually ending in `exec cat` so every
//! command written to it is echoed back on stdout.

mod command_test;
mod lifecycle_test;
mod restart_test;

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use fx_supervisor::config::{RunnerConfig, Timings};
use fx_supervisor::console::{ConsoleSink, HitchSink};
use fx_supervisor::process::Platform;
use fx_supervisor::supervisor::Supervisor;

/// Script that echoes every console line back.
pub const ECHO_SERVER: &str = "exec cat\n";

/// Console sink that remembers everything broadcast to it.
#[derive(Default)]
pub struct RecordingConsole {
    lines: Mutex<Vec<(String, bool)>>,
}

impl RecordingConsole {
    pub fn own_commands(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, own)| *own)
            .map(|(text, _)| text.clone())
            .collect()
    }

    pub fn output(&self) -> String {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, own)| !*own)
            .map(|(text, _)| text.as_str())
            .collect()
    }
}

impl ConsoleSink for RecordingConsole {
    fn broadcast(&self, text: &str, own_command: bool) {
        self.lines
            .lock()
            .unwrap()
            .push((text.to_string(), own_command));
    }
}

/// Hitch sink that remembers every frame time.
#[derive(Default)]
pub struct RecordingMonitor {
    pub hitches: Mutex<Vec<u32>>,
}

impl HitchSink for RecordingMonitor {
    fn process_hitch(&self, millis: u32) {
        self.hitches.lock().unwrap().push(millis);
    }
}

/// A fake server build directory plus the recorders wired to it.
pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub console: Arc<RecordingConsole>,
    pub monitor: Arc<RecordingMonitor>,
}

impl Fixture {
    pub fn new(script: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("run.sh"), script).unwrap();
        Self {
            dir,
            console: Arc::new(RecordingConsole::default()),
            monitor: Arc::new(RecordingMonitor::default()),
        }
    }

    pub fn config(&self) -> RunnerConfig {
        config_for(self.dir.path())
    }

    pub fn supervisor(&self) -> Arc<Supervisor> {
        self.supervisor_with(self.config())
    }

    pub fn supervisor_with(&self, config: RunnerConfig) -> Arc<Supervisor> {
        Supervisor::builder(config)
            .platform(Platform::Linux)
            .console(self.console.clone())
            .monitor(self.monitor.clone())
            .build()
            .unwrap()
    }
}

/// Quiet config with short restart delays and no background injection.
pub fn config_for(dir: &Path) -> RunnerConfig {
    RunnerConfig {
        build_path: dir.to_path_buf(),
        base_path: dir.to_path_buf(),
        quiet: true,
        timings: Timings {
            priority_delay: 60_000,
            metadata_delay: 60_000,
            metadata_step: 10,
            restart_announce: 200,
            restart_relaunch: 300,
            capture_window: 300,
            terminate_timeout: 2_000,
        },
        ..Default::default()
    }
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

/// Verify all public supervisor types are exported from the library.
#[test]
fn test_all_supervisor_types_exported() {
    use fx_supervisor::supervisor::{
        metadata_commands, validate_command, CommandError, Generation, ServerState,
        StateMachine, SupervisorBuilder, SupervisorError, SupervisorStatus,
    };

    let _ = StateMachine::new();
    let _ = Generation::default();
    let _ = SupervisorBuilder::new(RunnerConfig::default());
    let _ = metadata_commands(&RunnerConfig::default().metadata);
    let _: Result<(), CommandError> = validate_command("status");
    let _: fn() -> SupervisorError = || SupervisorError::AlreadyRunning;
    let _ = ServerState::Crashed;
    let _: Option<SupervisorStatus> = None;
}
