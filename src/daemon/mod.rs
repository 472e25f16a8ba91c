//! Daemon lifecycle: single-instance lock, supervisory loop, shutdown.
//!
//! ```text
//! Init -> LockCheck -> Running -> ShuttingDown -> Stopped
//!             |
//!             +-> AlreadyRunning
//! ```
//!
//! Signals, the manual refresh trigger and programmatic shutdown all arrive
//! as [`DaemonCommand`]s on one queue consumed only by the supervisory loop.

mod health;
mod lock;
mod signals;

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::analyzer::{AnalyzerError, Dispatcher, ExternalCommand};
use crate::config::{Settings, StatePaths};
use crate::logging::LogGuard;
use crate::metrics::MetricsRecorder;
use crate::watcher::{Coalescer, PathFilter, WatchError, WatchSource};

pub use health::{HealthMonitor, MemorySnapshot};
pub use lock::{Acquisition, LockError, LockRecord, PidLock, process_alive};

const COMMAND_QUEUE: usize = 16;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Cannot create state directory {path}: {source}")]
    StateDir {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error("Failed to install signal handlers: {0}")]
    Signals(#[source] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    Init,
    LockCheck,
    Running,
    ShuttingDown,
    Stopped,
    /// Another live instance holds the lock; startup was refused.
    AlreadyRunning,
}

/// How a completed run ended. Both are clean exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Stopped,
    AlreadyRunning { pid: u32 },
}

/// Messages for the supervisory loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonCommand {
    Shutdown { reason: &'static str },
    /// Run the full rebuild command out of band.
    Refresh,
}

/// Cloneable control handle for a daemon.
#[derive(Clone)]
pub struct DaemonHandle {
    commands: mpsc::Sender<DaemonCommand>,
    state: Arc<Mutex<DaemonState>>,
}

impl DaemonHandle {
    pub fn state(&self) -> DaemonState {
        *self.state.lock()
    }

    /// Request a graceful stop. Returns false when the daemon is gone.
    pub async fn shutdown(&self) -> bool {
        self.commands
            .send(DaemonCommand::Shutdown { reason: "requested" })
            .await
            .is_ok()
    }

    /// Request a manual full refresh. Returns false when the daemon is gone.
    pub async fn refresh(&self) -> bool {
        self.commands.send(DaemonCommand::Refresh).await.is_ok()
    }
}

pub struct Daemon {
    settings: Settings,
    paths: StatePaths,
    state: Arc<Mutex<DaemonState>>,
    commands_tx: mpsc::Sender<DaemonCommand>,
    commands_rx: mpsc::Receiver<DaemonCommand>,
    metrics: Arc<MetricsRecorder>,
    log: LogGuard,
    install_signals: bool,
}

impl Daemon {
    pub fn new(settings: Settings) -> Self {
        let paths = settings.state_paths();
        let metrics = Arc::new(MetricsRecorder::new(
            paths.metrics.clone(),
            settings.metrics_key.clone(),
        ));
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE);

        Self {
            settings,
            paths,
            state: Arc::new(Mutex::new(DaemonState::Init)),
            commands_tx,
            commands_rx,
            metrics,
            log: LogGuard::default(),
            install_signals: true,
        }
    }

    /// Flush this log sink on shutdown.
    pub fn with_log_guard(mut self, log: LogGuard) -> Self {
        self.log = log;
        self
    }

    /// Skip OS signal handlers; control goes through [`DaemonHandle`] only.
    pub fn without_signals(mut self) -> Self {
        self.install_signals = false;
        self
    }

    pub fn handle(&self) -> DaemonHandle {
        DaemonHandle {
            commands: self.commands_tx.clone(),
            state: Arc::clone(&self.state),
        }
    }

    pub fn paths(&self) -> &StatePaths {
        &self.paths
    }

    fn transition(&self, next: DaemonState) {
        let mut state = self.state.lock();
        crate::debug_event!("daemon", "state", "{:?} -> {next:?}", *state);
        *state = next;
    }

    /// Run until shutdown is requested.
    ///
    /// A live competing instance is a refusal, not an error. Every error
    /// returned after the lock was taken has already released it.
    pub async fn run(mut self) -> Result<RunOutcome, DaemonError> {
        crate::log_event!("daemon", "starting", "pid {}", std::process::id());

        self.paths
            .ensure_state_dir()
            .map_err(|source| DaemonError::StateDir {
                path: self.paths.state_dir.clone(),
                source,
            })?;

        self.transition(DaemonState::LockCheck);
        let mut lock = match PidLock::acquire(&self.paths.lock)? {
            Acquisition::Acquired(lock) => lock,
            Acquisition::AlreadyRunning(pid) => {
                tracing::error!("[daemon] already running (pid {pid})");
                self.transition(DaemonState::AlreadyRunning);
                return Ok(RunOutcome::AlreadyRunning { pid });
            }
        };
        crate::debug_event!("daemon", "lock acquired", "pid {}", lock.pid());

        let served = self.serve().await;

        self.transition(DaemonState::ShuttingDown);
        crate::log_event!("daemon", "cleaning up");
        lock.release();
        crate::log_event!("daemon", "stopped");
        self.log.flush();
        self.transition(DaemonState::Stopped);

        served.map(|()| RunOutcome::Stopped)
    }

    /// Start the pipeline, supervise it, tear it down.
    async fn serve(&mut self) -> Result<(), DaemonError> {
        let dispatcher = Arc::new(Dispatcher::standard(
            &self.settings,
            &self.paths,
            Arc::clone(&self.metrics),
        ));
        let coalescer = Coalescer::new(
            self.settings.coalescer.debounce(),
            self.settings.coalescer.max_pending,
            dispatcher,
        );

        let signals = if self.install_signals {
            Some(signals::listen(self.commands_tx.clone()).map_err(DaemonError::Signals)?)
        } else {
            None
        };

        let filter = PathFilter::new(&self.paths.root).ignore_dir(&self.paths.state_dir);
        let mut watch = match WatchSource::start(&self.paths.root, filter, coalescer.clone()) {
            Ok(watch) => watch,
            Err(e) => {
                if let Some(signals) = signals {
                    signals.abort();
                }
                return Err(e.into());
            }
        };

        self.transition(DaemonState::Running);
        crate::log_event!("daemon", "started", "watching {}", self.paths.root.display());

        self.supervise().await;
        self.transition(DaemonState::ShuttingDown);

        if let Err(e) = watch.stop().await {
            tracing::warn!("[daemon] failed to stop watcher: {e}");
        }
        coalescer.shutdown().await;
        if let Some(signals) = signals {
            signals.abort();
        }

        Ok(())
    }

    /// Fixed-cadence loop: commands, health checks, refresh reaping.
    async fn supervise(&mut self) {
        let supervisor = &self.settings.supervisor;
        let mut ticker = tokio::time::interval(supervisor.poll_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut health = HealthMonitor::new(
            supervisor.health_interval(),
            supervisor.memory_warn_bytes(),
        );
        let mut refreshes: JoinSet<()> = JoinSet::new();
        let mut running = true;

        while running {
            tokio::select! {
                Some(command) = self.commands_rx.recv() => match command {
                    DaemonCommand::Shutdown { reason } => {
                        crate::log_event!("daemon", "shutting down", "{reason}");
                        running = false;
                    }
                    DaemonCommand::Refresh => {
                        crate::log_event!("daemon", "manual refresh requested");
                        refreshes.spawn(manual_refresh(
                            self.settings.analyzers.refresh_command.clone(),
                            self.paths.root.clone(),
                        ));
                    }
                },
                _ = ticker.tick() => {
                    let now = Instant::now();
                    if health.due(now) {
                        health.check(now, self.metrics.snapshot().updates);
                    }
                    while let Some(finished) = refreshes.try_join_next() {
                        if let Err(e) = finished {
                            tracing::error!("[refresh] task failed: {e}");
                        }
                    }
                }
            }
        }

        if !refreshes.is_empty() {
            tracing::warn!("[daemon] abandoning {} running refreshes", refreshes.len());
            refreshes.shutdown().await;
        }
    }
}

/// Run the full rebuild command. Failures are logged only.
async fn manual_refresh(argv: Vec<String>, root: std::path::PathBuf) {
    let Some(command) = ExternalCommand::from_argv(&argv) else {
        tracing::warn!("[refresh] no refresh command configured");
        return;
    };

    match command.run(&root).await {
        Ok(_) => crate::log_event!("refresh", "manual graph refresh completed"),
        Err(AnalyzerError::NonZeroExit { stderr, .. }) => {
            tracing::error!("[refresh] manual refresh failed: {stderr}");
        }
        Err(e) => tracing::error!("[refresh] manual refresh error: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn settings_for(root: &std::path::Path) -> Settings {
        let mut settings = Settings::default();
        settings.repo_root = Some(root.to_path_buf());
        settings.coalescer.debounce_ms = 30;
        settings.supervisor.poll_interval_ms = 20;
        settings
    }

    async fn wait_for(handle: &DaemonHandle, state: DaemonState) {
        for _ in 0..200 {
            if handle.state() == state {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("daemon never reached {state:?}, stuck in {:?}", handle.state());
    }

    #[tokio::test]
    async fn test_starts_in_init() {
        let dir = TempDir::new().unwrap();
        let daemon = Daemon::new(settings_for(dir.path()));
        assert_eq!(daemon.handle().state(), DaemonState::Init);
        assert_eq!(daemon.paths().lock, dir.path().join(".graph/daemon.lock"));
    }

    #[tokio::test]
    async fn test_run_and_shutdown_removes_lock() {
        let dir = TempDir::new().unwrap();
        let daemon = Daemon::new(settings_for(dir.path())).without_signals();
        let handle = daemon.handle();
        let lock_path = daemon.paths().lock.clone();

        let task = tokio::spawn(daemon.run());
        wait_for(&handle, DaemonState::Running).await;
        assert_eq!(
            LockRecord::read(&lock_path).unwrap(),
            LockRecord::Pid(std::process::id())
        );

        assert!(handle.shutdown().await);
        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome, RunOutcome::Stopped);
        assert_eq!(handle.state(), DaemonState::Stopped);
        assert!(!lock_path.exists());
    }

    #[tokio::test]
    async fn test_missing_root_fails_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        let mut settings = settings_for(&dir.path().join("gone"));
        // Keep the state directory somewhere writable
        settings.state_dir = dir.path().join("state");
        let daemon = Daemon::new(settings).without_signals();
        let lock_path = daemon.paths().lock.clone();

        let err = daemon.run().await.unwrap_err();
        assert!(matches!(err, DaemonError::Watch(_)));
        assert!(!lock_path.exists());
    }
}
