pub mod analyzer;
pub mod config;
pub mod daemon;
pub mod logging;
pub mod metrics;
pub mod utils;
pub mod watcher;

pub use analyzer::{AnalyzerKind, Dispatcher};
pub use config::{Settings, StatePaths};
pub use daemon::{Daemon, DaemonHandle, DaemonState, RunOutcome};
pub use metrics::{DaemonMetrics, MetricsRecorder};
pub use watcher::{Coalescer, WatchSource};
