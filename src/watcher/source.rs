//! Recursive filesystem watch feeding the coalescer.

use std::path::Path;
use std::time::Duration;

use notify::{Event, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::coalescer::Coalescer;
use super::error::WatchError;
use super::event::{ChangeEvent, ChangeKind};
use super::filter::PathFilter;

const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Running watch over the repository root.
///
/// Owns the notify watcher and the task forwarding its events. Dropping the
/// notify watcher closes the channel, which ends the forwarding task.
pub struct WatchSource {
    watcher: Option<notify::RecommendedWatcher>,
    forwarder: Option<JoinHandle<()>>,
}

impl WatchSource {
    /// Attach a recursive watch to `root` and forward matching events.
    pub fn start(
        root: &Path,
        filter: PathFilter,
        coalescer: Coalescer,
    ) -> Result<Self, WatchError> {
        let (tx, rx) = mpsc::channel(256);

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.blocking_send(res);
        })?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| WatchError::PathWatchFailed {
                path: root.to_path_buf(),
                reason: e.to_string(),
            })?;

        let forwarder = tokio::spawn(forward_events(rx, filter, coalescer));

        crate::log_event!("watcher", "watching", "{}", root.display());

        Ok(Self {
            watcher: Some(watcher),
            forwarder: Some(forwarder),
        })
    }

    /// Detach the watch and wait for the forwarding task to drain.
    pub async fn stop(&mut self) -> Result<(), WatchError> {
        let watcher = self.watcher.take().ok_or(WatchError::Stopped)?;
        drop(watcher);

        if let Some(mut forwarder) = self.forwarder.take() {
            // The channel closes once notify's event thread drops its sender
            match tokio::time::timeout(STOP_TIMEOUT, &mut forwarder).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("[watcher] forwarding task ended abnormally: {e}"),
                Err(_) => {
                    tracing::warn!("[watcher] forwarding task did not drain, aborting");
                    forwarder.abort();
                }
            }
        }

        crate::log_event!("watcher", "stopped");
        Ok(())
    }
}

async fn forward_events(
    mut rx: mpsc::Receiver<notify::Result<Event>>,
    filter: PathFilter,
    coalescer: Coalescer,
) {
    while let Some(res) = rx.recv().await {
        let event = match res {
            Ok(event) => event,
            Err(e) => {
                tracing::error!("[watcher] file watch error: {e}");
                continue;
            }
        };

        let Some(kind) = ChangeKind::from_notify(&event.kind) else {
            continue;
        };

        for path in event.paths {
            if path.is_dir() || !filter.matches(&path) {
                continue;
            }
            let change = ChangeEvent::new(path, kind);
            crate::debug_event!(
                "watcher",
                "change",
                "{:?} {} at {}",
                change.kind,
                change.path.display(),
                change.timestamp.format("%H:%M:%S%.3f")
            );
            coalescer.accept(change.path);
        }
    }
}
