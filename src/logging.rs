//! Logging for the daemon.
//!
//! Compact timestamped output to stderr and to the daemon log file in the
//! state directory, with per-module level configuration.
//!
//! # Configuration
//!
//! ```toml
//! [logging]
//! default = "info"
//!
//! [logging.modules]
//! "codegraphd::watcher" = "debug"
//! ```
//!
//! # Environment Variable
//!
//! `RUST_LOG` takes precedence over config:
//! ```bash
//! RUST_LOG=debug codegraphd
//! RUST_LOG=codegraphd::analyzer=trace codegraphd
//! ```

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::{Arc, Once};

use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// Compact time format: HH:MM:SS.mmm
struct CompactTime;

impl FormatTime for CompactTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

/// Handle to the file sink, kept by the daemon until shutdown.
#[derive(Debug, Default, Clone)]
pub struct LogGuard {
    file: Option<Arc<File>>,
}

impl LogGuard {
    /// Flush the log file to disk. Errors are ignored.
    pub fn flush(&self) {
        if let Some(file) = &self.file {
            let _ = file.sync_all();
        }
    }
}

fn build_filter(config: &LoggingConfig) -> EnvFilter {
    // RUST_LOG env var takes precedence over config
    if std::env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }
    let mut filter_str = config.default.clone();
    for (module, level) in &config.modules {
        filter_str.push_str(&format!(",{module}={level}"));
    }
    EnvFilter::new(&filter_str)
}

/// Initialize logging with configuration.
///
/// Call once at startup. Only the first call installs a subscriber; later
/// calls return an empty guard.
///
/// When `log_file` is given, events are also appended to it. Failing to open
/// the file is reported on stderr and logging continues without it.
pub fn init_with_config(config: &LoggingConfig, log_file: Option<&Path>) -> LogGuard {
    let mut guard = LogGuard::default();

    INIT.call_once(|| {
        let file = log_file.and_then(|path| {
            match OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => Some(Arc::new(file)),
                Err(e) => {
                    eprintln!("cannot open log file {}: {e}", path.display());
                    None
                }
            }
        });

        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_timer(CompactTime)
            .with_level(true)
            .with_writer(std::io::stderr)
            .with_filter(build_filter(config));

        let file_layer = file.clone().map(|file| {
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_timer(CompactTime)
                .with_writer(file)
                .with_filter(build_filter(config))
        });

        tracing_subscriber::registry()
            .with(stderr_layer)
            .with(file_layer)
            .init();

        guard.file = file;
    });

    guard
}

/// Initialize stderr-only logging with default configuration.
pub fn init() -> LogGuard {
    init_with_config(&LoggingConfig::default(), None)
}

/// Log an event with component context.
///
/// # Examples
/// ```ignore
/// log_event!("coalescer", "flushing", "{} paths", batch.len());
/// log_event!("daemon", "stopped");
/// ```
#[macro_export]
macro_rules! log_event {
    ($component:expr, $event:expr) => {
        tracing::info!("[{}] {}", $component, $event)
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        tracing::info!("[{}] {}: {}", $component, $event, format!($($arg)*))
    };
}

/// Debug-only event logging.
///
/// # Examples
/// ```ignore
/// debug_event!("watcher", "ignored", "{}", path.display());
/// ```
#[macro_export]
macro_rules! debug_event {
    ($component:expr, $event:expr) => {
        tracing::debug!("[{}] {}", $component, $event)
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        tracing::debug!("[{}] {}: {}", $component, $event, format!($($arg)*))
    };
}
