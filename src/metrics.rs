//! Rolling pass metrics and their persistence.
//!
//! The metrics document is a JSON object shared with other producers. This
//! daemon owns a single top-level key and rewrites only that key; every other
//! key found in the document is carried over. There is no cross-process lock:
//! two writers racing on the document resolve as last-writer-wins.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::utils::write_atomic;

/// Weight kept from the previous average on each new sample.
const HISTORY_WEIGHT: f64 = 0.8;

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Failed to write metrics document {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Counters for the daemon's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DaemonMetrics {
    pub updates: u64,
    pub errors: u64,
    /// Rolling average pass duration in seconds
    pub avg_time: f64,
    pub last_update: Option<DateTime<Local>>,
    pub daemon_start: DateTime<Local>,
}

impl DaemonMetrics {
    pub fn new() -> Self {
        Self {
            updates: 0,
            errors: 0,
            avg_time: 0.0,
            last_update: None,
            daemon_start: Local::now(),
        }
    }

    /// Fold one pass into the counters.
    ///
    /// The first sample seeds the average; later ones blend in at 20%.
    pub fn record(&mut self, duration: Duration, success: bool) {
        self.updates += 1;
        if !success {
            self.errors += 1;
        }

        let secs = duration.as_secs_f64();
        self.avg_time = if self.avg_time == 0.0 {
            secs
        } else {
            self.avg_time * HISTORY_WEIGHT + secs * (1.0 - HISTORY_WEIGHT)
        };

        self.last_update = Some(Local::now());
    }
}

impl Default for DaemonMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe owner of [`DaemonMetrics`] that persists after every update.
pub struct MetricsRecorder {
    path: PathBuf,
    key: String,
    metrics: Mutex<DaemonMetrics>,
    persist_gate: tokio::sync::Mutex<()>,
}

impl MetricsRecorder {
    pub fn new(path: impl Into<PathBuf>, key: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            key: key.into(),
            metrics: Mutex::new(DaemonMetrics::new()),
            persist_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn snapshot(&self) -> DaemonMetrics {
        self.metrics.lock().clone()
    }

    /// Record a finished pass and persist. Persistence failures are logged only.
    ///
    /// The document is rewritten on the blocking pool, one writer at a time.
    pub async fn update(&self, duration: Duration, success: bool) {
        self.metrics.lock().record(duration, success);

        // Snapshot under the gate so the last write carries every record
        let _writer = self.persist_gate.lock().await;
        let snapshot = self.snapshot();
        let path = self.path.clone();
        let key = self.key.clone();
        match tokio::task::spawn_blocking(move || write_entry(&path, &key, &snapshot)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("[metrics] failed to update metrics: {e}"),
            Err(e) => tracing::error!("[metrics] persist task failed: {e}"),
        }
    }
}

/// Merge `metrics` into the shared document under `key`.
fn write_entry(path: &Path, key: &str, metrics: &DaemonMetrics) -> Result<(), MetricsError> {
    let mut document = read_document(path);
    document.insert(key.to_string(), serde_json::to_value(metrics)?);

    let json = serde_json::to_string_pretty(&Value::Object(document))?;
    write_atomic(path, json.as_bytes()).map_err(|source| MetricsError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Read the shared document; missing, unreadable or non-object content is
/// treated as an empty mapping.
pub fn read_document(path: &Path) -> Map<String, Value> {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return Map::new();
    };
    match serde_json::from_str::<Value>(&contents) {
        Ok(Value::Object(map)) => map,
        Ok(_) | Err(_) => {
            crate::debug_event!("metrics", "discarding malformed document", "{}", path.display());
            Map::new()
        }
    }
}
