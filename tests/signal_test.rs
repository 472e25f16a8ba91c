//! OS signals reach the supervisory loop as commands.
//!
//! Lives in its own test binary: signals are process-wide, and the daemon
//! here is the only one listening for them.
#![cfg(unix)]

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use codegraphd::{Daemon, DaemonState, RunOutcome, Settings};
use tempfile::TempDir;

fn send_signal(name: &str) {
    let status = Command::new("kill")
        .arg(format!("-{name}"))
        .arg(std::process::id().to_string())
        .status()
        .unwrap();
    assert!(status.success(), "kill -{name} failed");
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

fn settings_for(root: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.repo_root = Some(root.to_path_buf());
    settings.supervisor.poll_interval_ms = 20;
    settings.analyzers.refresh_command = vec![
        "sh".to_string(),
        "-c".to_string(),
        "echo rebuilt > refreshed.txt".to_string(),
    ];
    settings
}

#[tokio::test]
async fn test_usr1_refreshes_and_term_stops() {
    let dir = TempDir::new().unwrap();
    let daemon = Daemon::new(settings_for(dir.path()));
    let handle = daemon.handle();
    let lock_path = daemon.paths().lock.clone();
    let task = tokio::spawn(daemon.run());

    // Handlers are installed before the daemon reports Running
    wait_until("running", || handle.state() == DaemonState::Running).await;

    send_signal("USR1");
    let marker = dir.path().join("refreshed.txt");
    wait_until("refresh marker", || marker.exists()).await;
    assert_eq!(handle.state(), DaemonState::Running);

    send_signal("TERM");
    let outcome = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(outcome, RunOutcome::Stopped);
    assert_eq!(handle.state(), DaemonState::Stopped);
    assert!(!lock_path.exists());
}
