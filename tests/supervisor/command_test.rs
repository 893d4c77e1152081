//! Console commands and output capture against a live server.

use std::time::{Duration, Instant};

use fx_supervisor::supervisor::CommandError;

use super::{eventually, Fixture, ECHO_SERVER};

#[tokio::test]
async fn test_send_mirrors_command_and_reaches_server() {
    let fixture = Fixture::new(ECHO_SERVER);
    let sup = fixture.supervisor();
    sup.spawn().await.unwrap();

    assert_eq!(sup.send("status").await, Ok(true));
    assert_eq!(fixture.console.own_commands(), vec!["status"]);
    assert!(
        eventually(Duration::from_secs(2), || {
            fixture.console.output() == "status\n"
        })
        .await
    );

    sup.kill().await;
}

#[tokio::test]
async fn test_forwarded_input_is_not_mirrored() {
    let fixture = Fixture::new(ECHO_SERVER);
    let sup = fixture.supervisor();
    sup.spawn().await.unwrap();

    assert!(sup.forward_input("players").await);
    assert!(
        eventually(Duration::from_secs(2), || {
            fixture.console.output() == "players\n"
        })
        .await
    );
    assert!(fixture.console.own_commands().is_empty());

    sup.kill().await;
}

#[tokio::test]
async fn test_multi_line_command_is_rejected() {
    let fixture = Fixture::new(ECHO_SERVER);
    let sup = fixture.supervisor();
    sup.spawn().await.unwrap();

    assert_eq!(
        sup.send("say hi\nquit").await,
        Err(CommandError::InvalidCommand("say hi\nquit".to_string()))
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(fixture.console.output().is_empty());
    assert!(sup.is_running());

    sup.kill().await;
}

#[tokio::test]
async fn test_capture_collects_server_reply() {
    let fixture = Fixture::new(ECHO_SERVER);
    let sup = fixture.supervisor();
    sup.spawn().await.unwrap();

    let output = sup.send_and_capture("status", None).await.unwrap();
    assert_eq!(output.as_deref(), Some("status\n"));

    sup.kill().await;
}

#[tokio::test]
async fn test_capture_after_kill_returns_none_immediately() {
    let fixture = Fixture::new(ECHO_SERVER);
    let sup = fixture.supervisor();
    sup.spawn().await.unwrap();
    sup.kill().await;

    assert_eq!(sup.send("status").await, Ok(false));

    let start = Instant::now();
    let output = sup
        .send_and_capture("status", Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert!(output.is_none());
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_concurrent_captures_do_not_overlap() {
    let fixture = Fixture::new(ECHO_SERVER);
    let sup = fixture.supervisor();
    sup.spawn().await.unwrap();

    let window = Some(Duration::from_millis(300));
    let start = Instant::now();
    let (first, second) = tokio::join!(
        sup.send_and_capture("first", window),
        sup.send_and_capture("second", window),
    );
    assert!(start.elapsed() >= Duration::from_millis(600));

    let mut outputs = vec![first.unwrap().unwrap(), second.unwrap().unwrap()];
    outputs.sort();
    assert_eq!(outputs, vec!["first\n", "second\n"]);

    sup.kill().await;
}

#[tokio::test]
async fn test_capture_ends_when_server_exits() {
    let fixture = Fixture::new("read line\necho \"got $line\"\nsleep 0.2\nexit 0\n");
    let sup = fixture.supervisor();
    sup.spawn().await.unwrap();

    let start = Instant::now();
    let output = sup
        .send_and_capture("hello", Some(Duration::from_secs(10)))
        .await
        .unwrap();

    assert_eq!(output.as_deref(), Some("got hello\n"));
    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(!sup.is_running());
}
