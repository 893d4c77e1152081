//! Spawn, kill, crash detection and background work after a spawn.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fx_supervisor::process::{
    PriorityBackend, PriorityError, PriorityLevel, PriorityManager, ProcessTree, SystemTree,
    TreeError,
};
use fx_supervisor::supervisor::{metadata_commands, ServerState, Supervisor, SupervisorError};
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};

use super::{eventually, Fixture, ECHO_SERVER};

#[derive(Default)]
struct RecordingBackend {
    calls: Mutex<Vec<(u32, PriorityLevel)>>,
}

#[async_trait]
impl PriorityBackend for RecordingBackend {
    async fn set_priority(&self, pid: u32, level: PriorityLevel) -> Result<(), PriorityError> {
        self.calls.lock().unwrap().push((pid, level));
        Ok(())
    }
}

/// True if `pid` exists and is not a zombie waiting to be reaped.
fn is_alive(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    system
        .process(Pid::from_u32(pid))
        .is_some_and(|p| p.status() != ProcessStatus::Zombie)
}

fn with_priority(
    fixture: &Fixture,
    level: &str,
    delay_ms: u64,
) -> (Arc<Supervisor>, Arc<RecordingBackend>) {
    let backend = Arc::new(RecordingBackend::default());
    let mut config = fixture.config();
    config.set_priority = Some(level.to_string());
    config.timings.priority_delay = delay_ms;

    let sup = Supervisor::builder(config)
        .platform(fx_supervisor::process::Platform::Linux)
        .console(fixture.console.clone())
        .monitor(fixture.monitor.clone())
        .priority(PriorityManager::new(Arc::new(SystemTree), backend.clone()))
        .build()
        .unwrap();
    (sup, backend)
}

#[tokio::test]
async fn test_spawn_and_kill() {
    let fixture = Fixture::new(ECHO_SERVER);
    let sup = fixture.supervisor();

    sup.spawn().await.unwrap();
    let pid = sup.pid().expect("server should have a pid");
    assert!(sup.is_running());
    assert_eq!(sup.state(), ServerState::Running);
    assert_eq!(sup.generation(), 1);
    assert!(sup.uptime().is_some());

    assert!(sup.kill().await);
    assert!(!sup.is_running());
    assert!(sup.pid().is_none());
    assert_eq!(sup.state(), ServerState::Stopped);
    assert_eq!(SystemTree.descendants(pid), Err(TreeError::NotFound(pid)));

    assert!(!sup.kill().await);
}

#[tokio::test]
async fn test_second_spawn_keeps_live_server() {
    let fixture = Fixture::new(ECHO_SERVER);
    let sup = fixture.supervisor();

    sup.spawn().await.unwrap();
    let pid = sup.pid();

    let err = sup.spawn().await.unwrap_err();
    assert!(matches!(err, SupervisorError::AlreadyRunning));
    assert!(!err.is_fatal());
    assert_eq!(sup.pid(), pid);
    assert_eq!(sup.generation(), 1);

    sup.kill().await;
}

#[tokio::test]
async fn test_spawn_failure_is_fatal() {
    let fixture = Fixture::new(ECHO_SERVER);
    let mut config = fixture.config();
    config.base_path = fixture.dir.path().join("missing");
    let sup = fixture.supervisor_with(config);

    let err = sup.spawn().await.unwrap_err();
    assert!(matches!(err, SupervisorError::Spawn(_)));
    assert!(err.is_fatal());
    assert_eq!(sup.state(), ServerState::Stopped);
    assert!(!sup.is_running());
    assert_eq!(sup.generation(), 0);
}

#[tokio::test]
async fn test_unexpected_exit_is_a_crash() {
    let fixture = Fixture::new("sleep 0.2\nexit 3\n");
    let sup = fixture.supervisor();
    let mut states = sup.subscribe_state();

    sup.spawn().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), states.wait_for(|s| *s == ServerState::Crashed))
        .await
        .expect("crash not detected")
        .unwrap();

    assert!(!sup.is_running());
    assert!(sup.pid().is_none());
    assert_eq!(sup.send("status").await, Ok(false));

    // No automatic restart.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(sup.generation(), 1);

    // A crashed server can be started again.
    sup.spawn().await.unwrap();
    assert_eq!(sup.generation(), 2);
    sup.kill().await;
}

#[tokio::test]
async fn test_descendants_of_launcher_are_counted_and_killed() {
    let fixture = Fixture::new("sleep 30 &\nexec cat\n");
    let sup = fixture.supervisor();

    sup.spawn().await.unwrap();
    let pid = sup.pid().unwrap();
    assert!(
        eventually(Duration::from_secs(2), || {
            SystemTree.descendants(pid).is_ok_and(|pids| pids.len() == 1)
        })
        .await
    );
    assert_eq!(sup.descendant_count().await, Some(1));
    let sleeper = SystemTree.descendants(pid).unwrap()[0];

    assert!(sup.kill().await);
    assert!(
        eventually(Duration::from_secs(2), || !is_alive(sleeper)).await,
        "background child {sleeper} survived the kill"
    );
    assert!(sup.descendant_count().await.is_none());
}

#[tokio::test]
async fn test_hitch_warnings_reach_monitor() {
    let fixture = Fixture::new(
        "echo 'hitch warning: frame time of 512 milliseconds'\nexec cat\n",
    );
    let sup = fixture.supervisor();

    sup.spawn().await.unwrap();
    assert!(
        eventually(Duration::from_secs(2), || {
            *fixture.monitor.hitches.lock().unwrap() == vec![512]
        })
        .await
    );

    sup.kill().await;
}

#[tokio::test]
async fn test_metadata_is_injected_in_order() {
    let fixture = Fixture::new(ECHO_SERVER);
    let mut config = fixture.config();
    config.timings.metadata_delay = 100;
    config.metadata.version = "9.9.9".to_string();
    let expected = metadata_commands(&config.metadata);
    let sup = fixture.supervisor_with(config);

    sup.spawn().await.unwrap();
    assert!(
        eventually(Duration::from_secs(2), || {
            fixture.console.own_commands() == expected
        })
        .await,
        "got {:?}",
        fixture.console.own_commands()
    );
    assert!(
        eventually(Duration::from_secs(2), || {
            fixture.console.output().contains("set FXAdmin-port 40120")
        })
        .await
    );

    sup.kill().await;
}

#[tokio::test]
async fn test_metadata_for_killed_server_is_dropped() {
    let fixture = Fixture::new(ECHO_SERVER);
    let mut config = fixture.config();
    config.timings.metadata_delay = 200;
    let sup = fixture.supervisor_with(config);

    sup.spawn().await.unwrap();
    sup.kill().await;
    sup.spawn().await.unwrap();
    sup.kill().await;

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(fixture.console.own_commands().is_empty());
}

#[tokio::test]
async fn test_priority_applies_to_descendants() {
    let fixture = Fixture::new("sleep 30 &\nexec cat\n");
    let (sup, backend) = with_priority(&fixture, "high", 200);

    sup.spawn().await.unwrap();
    let pid = sup.pid().unwrap();
    assert!(
        eventually(Duration::from_secs(3), || {
            !backend.calls.lock().unwrap().is_empty()
        })
        .await
    );

    let calls = backend.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    assert_ne!(calls[0].0, pid);
    assert_eq!(calls[0].1, PriorityLevel::High);

    sup.kill().await;
}

#[tokio::test]
async fn test_priority_for_killed_server_is_dropped() {
    let fixture = Fixture::new("sleep 30 &\nexec cat\n");
    let (sup, backend) = with_priority(&fixture, "HIGH", 200);

    sup.spawn().await.unwrap();
    sup.kill().await;

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(backend.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_normal_priority_is_left_alone() {
    let fixture = Fixture::new("sleep 30 &\nexec cat\n");
    let (sup, backend) = with_priority(&fixture, "NORMAL", 50);

    sup.spawn().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(backend.calls.lock().unwrap().is_empty());

    sup.kill().await;
}

#[tokio::test]
async fn test_threads_of_server_are_not_counted() {
    let python = std::process::Command::new("python3")
        .args(["-c", "pass"])
        .status();
    if !python.is_ok_and(|status| status.success()) {
        eprintln!("python3 not available, skipping");
        return;
    }

    let fixture = Fixture::new(
        "python3 -c 'import threading, time; \
         [threading.Thread(target=time.sleep, args=(30,), daemon=True).start() for _ in range(4)]; \
         time.sleep(30)' &\nexec cat\n",
    );
    let sup = fixture.supervisor();
    sup.spawn().await.unwrap();
    let pid = sup.pid().unwrap();

    let threads = |child: u32| {
        std::fs::read_dir(format!("/proc/{child}/task")).map_or(0, Iterator::count)
    };
    assert!(
        eventually(Duration::from_secs(5), || {
            SystemTree
                .descendants(pid)
                .is_ok_and(|pids| pids.len() == 1 && threads(pids[0]) >= 5)
        })
        .await,
        "python3 never started its threads"
    );
    assert_eq!(sup.descendant_count().await, Some(1));

    sup.kill().await;
}

#[tokio::test]
async fn test_kill_escalates_on_descendants_ignoring_sigterm() {
    let fixture = Fixture::new(
        "bash -c \"trap '' TERM; while :; do sleep 0.2; done\" &\nexec cat\n",
    );
    let mut config = fixture.config();
    config.timings.terminate_timeout = 500;
    let sup = fixture.supervisor_with(config);

    sup.spawn().await.unwrap();
    let pid = sup.pid().unwrap();
    // The loop shell plus one of its sleeps means the trap is installed.
    assert!(
        eventually(Duration::from_secs(2), || {
            SystemTree.descendants(pid).is_ok_and(|pids| pids.len() >= 2)
        })
        .await
    );
    let lingering = SystemTree.descendants(pid).unwrap();

    assert!(sup.kill().await);
    assert!(
        eventually(Duration::from_secs(2), || {
            lingering.iter().all(|child| !is_alive(*child))
        })
        .await,
        "descendants {lingering:?} survived the kill"
    );
}
