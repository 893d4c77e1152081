//! Process module tests against the real OS.

use std::path::PathBuf;
use std::sync::Arc;

use fx_supervisor::config::RunnerConfig;
use fx_supervisor::process::{
    build_launch_spec, descendants_blocking, LaunchError, Platform, ProcessTree, SystemTree,
    TreeError,
};

#[test]
fn test_windows_launch_runs_through_cmd() {
    let config = RunnerConfig {
        build_path: PathBuf::from("C:/fx/build"),
        base_path: PathBuf::from("C:/fx/data"),
        ..Default::default()
    };
    let spec = build_launch_spec(&Platform::Windows, &config).unwrap();

    assert_eq!(spec.shell(), PathBuf::from("cmd.exe"));
    assert_eq!(spec.args()[0], "/c");
    assert!(spec.args()[1].starts_with("C:/fx/build/run.cmd"));
    assert!(spec.args()[1].ends_with("+exec server.cfg"));
    assert_eq!(spec.cwd(), PathBuf::from("C:/fx/data"));
}

#[test]
fn test_unknown_os_has_no_launch_spec() {
    let err = build_launch_spec(&Platform::Unsupported("freebsd".into()), &RunnerConfig::default())
        .unwrap_err();
    assert_eq!(err, LaunchError::UnsupportedPlatform("freebsd".into()));
    assert!(err.to_string().contains("freebsd"));
}

#[test]
fn test_missing_root_is_not_found() {
    // Pids are never this large on any supported OS.
    let result = SystemTree.descendants(u32::MAX - 1);
    assert_eq!(result, Err(TreeError::NotFound(u32::MAX - 1)));
}

#[cfg(unix)]
#[tokio::test]
async fn test_system_tree_finds_spawned_child() {
    let mut child = tokio::process::Command::new("sleep")
        .arg("30")
        .kill_on_drop(true)
        .spawn()
        .unwrap();
    let child_pid = child.id().unwrap();

    let tree: Arc<dyn ProcessTree> = Arc::new(SystemTree);
    let pids = descendants_blocking(&tree, std::process::id())
        .await
        .unwrap();

    assert!(pids.contains(&child_pid), "{child_pid} not in {pids:?}");
    assert!(!pids.contains(&std::process::id()));

    child.kill().await.unwrap();
}
