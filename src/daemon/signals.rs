//! Signal handling.
//!
//! Handlers only translate signals into [`DaemonCommand`]s on the daemon's
//! command queue; all work happens in the supervisory loop.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::DaemonCommand;

/// Listen for terminate/interrupt (shutdown) and USR1 (manual refresh).
#[cfg(unix)]
pub fn listen(commands: mpsc::Sender<DaemonCommand>) -> std::io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigusr1 = signal(SignalKind::user_defined1())?;

    Ok(tokio::spawn(async move {
        loop {
            let command = tokio::select! {
                _ = sigterm.recv() => DaemonCommand::Shutdown { reason: "SIGTERM" },
                _ = sigint.recv() => DaemonCommand::Shutdown { reason: "SIGINT" },
                _ = sigusr1.recv() => DaemonCommand::Refresh,
            };
            crate::log_event!("signal", "received", "{command:?}");
            if commands.send(command).await.is_err() {
                break;
            }
        }
    }))
}

/// Ctrl-C only; there is no refresh signal on this platform.
#[cfg(not(unix))]
pub fn listen(commands: mpsc::Sender<DaemonCommand>) -> std::io::Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if commands
                .send(DaemonCommand::Shutdown { reason: "ctrl-c" })
                .await
                .is_err()
            {
                break;
            }
        }
    }))
}
