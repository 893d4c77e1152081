//! Restart sequencing.

use std::time::{Duration, Instant};

use fx_supervisor::supervisor::{ServerState, SupervisorError};

use super::{eventually, Fixture, ECHO_SERVER};

#[tokio::test]
async fn test_restart_announces_reason_to_old_server() {
    let fixture = Fixture::new(ECHO_SERVER);
    let sup = fixture.supervisor();
    sup.spawn().await.unwrap();
    let old_pid = sup.pid();

    let start = Instant::now();
    sup.restart(Some("maintenance")).await.unwrap();

    // 200ms announce + 300ms relaunch from the test config.
    assert!(start.elapsed() >= Duration::from_millis(500));
    assert_eq!(sup.generation(), 2);
    assert_eq!(sup.state(), ServerState::Running);
    assert_ne!(sup.pid(), old_pid);
    assert_eq!(
        fixture.console.own_commands(),
        vec!["say Restarting server (maintenance)."]
    );
    // Echoed by the first process before it was killed.
    assert_eq!(fixture.console.output(), "say Restarting server (maintenance).\n");

    sup.kill().await;
}

#[tokio::test]
async fn test_restart_without_reason_is_silent() {
    let fixture = Fixture::new(ECHO_SERVER);
    let sup = fixture.supervisor();
    sup.spawn().await.unwrap();

    let start = Instant::now();
    sup.restart(None).await.unwrap();

    assert!(start.elapsed() >= Duration::from_millis(300));
    assert!(start.elapsed() < Duration::from_millis(500) + Duration::from_secs(1));
    assert!(fixture.console.own_commands().is_empty());
    assert_eq!(sup.generation(), 2);
    assert!(sup.is_running());

    sup.kill().await;
}

#[tokio::test]
async fn test_restart_from_stopped_starts_server() {
    let fixture = Fixture::new(ECHO_SERVER);
    let sup = fixture.supervisor();

    sup.restart(Some("boot")).await.unwrap();

    assert!(sup.is_running());
    assert_eq!(sup.generation(), 1);
    assert!(fixture.console.own_commands().is_empty());

    sup.kill().await;
}

#[tokio::test]
async fn test_restart_after_crash() {
    let fixture = Fixture::new("exit 1\n");
    let sup = fixture.supervisor();
    sup.spawn().await.unwrap();
    assert!(
        eventually(Duration::from_secs(2), || sup.state() == ServerState::Crashed).await
    );

    // The script exits again right away; only the restart itself matters here.
    sup.restart(None).await.unwrap();
    assert_eq!(sup.generation(), 2);
}

#[tokio::test]
async fn test_restart_reason_cannot_inject_commands() {
    let fixture = Fixture::new(ECHO_SERVER);
    let sup = fixture.supervisor();
    sup.spawn().await.unwrap();

    sup.restart(Some("update\nquit")).await.unwrap();
    assert_eq!(
        fixture.console.own_commands(),
        vec!["say Restarting server (update quit)."]
    );

    sup.kill().await;
}

#[tokio::test]
async fn test_failed_relaunch_reports_spawn_error() {
    let fixture = Fixture::new(ECHO_SERVER);
    let mut config = fixture.config();
    let base = fixture.dir.path().join("data");
    std::fs::create_dir(&base).unwrap();
    config.base_path = base.clone();
    let sup = fixture.supervisor_with(config);
    sup.spawn().await.unwrap();

    std::fs::remove_dir(&base).unwrap();
    let err = sup.restart(None).await.unwrap_err();

    assert!(matches!(err, SupervisorError::Spawn(_)));
    assert!(!sup.is_running());
    assert_eq!(sup.state(), ServerState::Stopped);
}
