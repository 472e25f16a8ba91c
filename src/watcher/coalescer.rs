//! Debounced coalescing of change events into dispatch batches.
//!
//! Every accepted path lands in one pending set and re-arms a single delayed
//! flush. When the idle window elapses without new events, the set is taken
//! as one batch and handed to the [`BatchSink`]. Bursts of saves (auto-save,
//! formatters, branch switches) therefore cost one pass instead of one per
//! file.
//!
//! Only a flush that has not fired yet can be cancelled. Once it fires, the
//! pass it starts always runs to completion; paths accepted meanwhile go to
//! the next cycle.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexSet;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Receiver of flushed batches.
#[async_trait]
pub trait BatchSink: Send + Sync {
    /// Process one non-empty batch. Paths are unique; order carries no meaning.
    async fn dispatch(&self, batch: Vec<PathBuf>);
}

/// A scheduled flush that can be cancelled until its delay elapses.
#[derive(Debug)]
struct DelayedFlush {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl DelayedFlush {
    fn has_fired(&self) -> bool {
        self.handle.is_finished()
    }

    fn cancel(self) {
        self.token.cancel();
    }
}

#[derive(Debug, Default)]
struct PendingState {
    /// Insertion-ordered so truncation can keep the most recent paths.
    paths: IndexSet<PathBuf>,
    flush: Option<DelayedFlush>,
    /// Bumped on every accept; a fired flush whose generation is stale yields.
    generation: u64,
    closed: bool,
}

struct Inner {
    state: Mutex<PendingState>,
    delay: Duration,
    capacity: usize,
    sink: Arc<dyn BatchSink>,
    /// Serializes passes so two batches never write artifacts at once.
    pass_gate: tokio::sync::Mutex<()>,
}

/// Debouncing front end of the update pipeline.
///
/// Cheap to clone; all clones share the same pending set.
#[derive(Clone)]
pub struct Coalescer {
    inner: Arc<Inner>,
}

impl Coalescer {
    pub fn new(delay: Duration, capacity: usize, sink: Arc<dyn BatchSink>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(PendingState::default()),
                delay,
                capacity,
                sink,
                pass_gate: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Add a changed path and restart the idle window.
    ///
    /// Must be called from within a tokio runtime.
    pub fn accept(&self, path: PathBuf) {
        let mut state = self.inner.state.lock();
        if state.closed {
            crate::debug_event!("coalescer", "closed, dropping", "{}", path.display());
            return;
        }

        // Re-touching a path moves it to the most recent position
        state.paths.shift_remove(&path);
        state.paths.insert(path);

        if let Some(previous) = state.flush.take() {
            if !previous.has_fired() {
                previous.cancel();
            }
        }

        state.generation += 1;
        let generation = state.generation;
        state.flush = Some(Inner::schedule(&self.inner, generation));
    }

    /// Number of paths waiting for the next flush.
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().paths.len()
    }

    /// Stop accepting paths, cancel an unfired flush and wait for any pass
    /// already running.
    pub async fn shutdown(&self) {
        let dropped = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            if let Some(flush) = state.flush.take() {
                flush.cancel();
            }
            let dropped = state.paths.len();
            state.paths.clear();
            dropped
        };
        if dropped > 0 {
            tracing::info!("[coalescer] discarding {dropped} pending paths on shutdown");
        }
        let _pass = self.inner.pass_gate.lock().await;
    }
}

impl Inner {
    fn schedule(this: &Arc<Self>, generation: u64) -> DelayedFlush {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let inner = Arc::clone(this);

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => return,
                _ = tokio::time::sleep(inner.delay) => {}
            }
            inner.fire(generation).await;
        });

        DelayedFlush { token, handle }
    }

    async fn fire(&self, generation: u64) {
        // Held from the snapshot to the end of dispatch, so shutdown waits
        // for every pass that took paths.
        let _pass = self.pass_gate.lock().await;

        let batch = {
            let mut state = self.state.lock();
            if state.generation != generation || state.closed {
                // Re-armed by a newer accept, or closed while queued on the gate
                return;
            }
            state.flush = None;
            let pending = std::mem::take(&mut state.paths);
            let (batch, dropped) = truncate_to_recent(pending, self.capacity);
            if dropped > 0 {
                tracing::warn!(
                    "[coalescer] too many changes ({}), processing latest {}",
                    batch.len() + dropped,
                    self.capacity
                );
            }
            batch
        };

        if batch.is_empty() {
            return;
        }

        // Only the pass gate is held here; new events keep flowing while the
        // pass runs.
        crate::debug_event!("coalescer", "flushing", "{} paths", batch.len());
        self.sink.dispatch(batch).await;
    }
}

/// Keep the `capacity` most recently inserted paths.
///
/// Returns the surviving paths and how many were dropped.
pub fn truncate_to_recent(paths: IndexSet<PathBuf>, capacity: usize) -> (Vec<PathBuf>, usize) {
    let dropped = paths.len().saturating_sub(capacity);
    (paths.into_iter().skip(dropped).collect(), dropped)
}
