//! Configuration for the graph update daemon.
//!
//! Layered configuration, later layers win:
//! - Default values
//! - TOML configuration file (`.graph/settings.toml` under the repository root)
//! - Environment variable overrides
//! - CLI argument overrides (applied by the binary)
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `CODEGRAPHD_` and use double
//! underscores to separate nested levels:
//! - `CODEGRAPHD_COALESCER__DEBOUNCE_MS=250` sets `coalescer.debounce_ms`
//! - `CODEGRAPHD_SUPERVISOR__MEMORY_WARN_MB=1024` sets `supervisor.memory_warn_mb`
//! - `CODEGRAPHD_STATE_DIR=.cache/graph` sets `state_dir`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "CODEGRAPHD_";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Repository root to watch. Defaults to the current directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_root: Option<PathBuf>,

    /// State directory for the lock record, log, metrics and artifacts.
    /// Relative paths are resolved against the repository root.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Key this daemon owns inside the shared metrics document
    #[serde(default = "default_metrics_key")]
    pub metrics_key: String,

    #[serde(default)]
    pub coalescer: CoalescerConfig,

    #[serde(default)]
    pub supervisor: SupervisorConfig,

    #[serde(default)]
    pub analyzers: AnalyzerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CoalescerConfig {
    /// Idle window before a pending batch is flushed
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Maximum number of paths handed to a single dispatch pass
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SupervisorConfig {
    /// Cadence of the supervisory loop
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Minimum time between two health checks
    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,

    /// Resident memory above which the health check warns
    #[serde(default = "default_memory_warn_mb")]
    pub memory_warn_mb: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AnalyzerConfig {
    /// Interpreter used for the Python call-graph tool
    #[serde(default = "default_python")]
    pub python: String,

    /// Virtualenv interpreter, preferred when it exists under the root
    #[serde(default = "default_venv_python")]
    pub venv_python: PathBuf,

    /// JavaScript module-graph tool
    #[serde(default = "default_javascript_tool")]
    pub javascript_tool: String,

    /// Entry point candidates, probed in order
    #[serde(default = "default_javascript_entries")]
    pub javascript_entries: Vec<String>,

    /// Entry used when no candidate exists
    #[serde(default = "default_javascript_fallback")]
    pub javascript_fallback: String,

    /// Full rebuild command run on manual refresh (argv, no shell)
    #[serde(default = "default_refresh_command")]
    pub refresh_command: Vec<String>,
}

/// Logging configuration.
///
/// `RUST_LOG` takes precedence over everything configured here.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default level for all targets
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module level overrides, e.g. `codegraphd::watcher = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

// Default value functions
fn default_state_dir() -> PathBuf {
    PathBuf::from(".graph")
}
fn default_metrics_key() -> String {
    "daemon".to_string()
}
fn default_debounce_ms() -> u64 {
    500
}
fn default_max_pending() -> usize {
    100
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_health_interval_secs() -> u64 {
    60
}
fn default_memory_warn_mb() -> u64 {
    500
}
fn default_python() -> String {
    "python".to_string()
}
fn default_venv_python() -> PathBuf {
    PathBuf::from(".venv/bin/python")
}
fn default_javascript_tool() -> String {
    "madge".to_string()
}
fn default_javascript_entries() -> Vec<String> {
    [
        "src/index.js",
        "src/index.ts",
        "index.js",
        "index.ts",
        "src/main.js",
        "src/main.ts",
        "main.js",
        "main.ts",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_javascript_fallback() -> String {
    "src".to_string()
}
fn default_refresh_command() -> Vec<String> {
    vec!["./tools/codegraph.sh".to_string()]
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            repo_root: None,
            state_dir: default_state_dir(),
            metrics_key: default_metrics_key(),
            coalescer: CoalescerConfig::default(),
            supervisor: SupervisorConfig::default(),
            analyzers: AnalyzerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            max_pending: default_max_pending(),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            health_interval_secs: default_health_interval_secs(),
            memory_warn_mb: default_memory_warn_mb(),
        }
    }
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            python: default_python(),
            venv_python: default_venv_python(),
            javascript_tool: default_javascript_tool(),
            javascript_entries: default_javascript_entries(),
            javascript_fallback: default_javascript_fallback(),
            refresh_command: default_refresh_command(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl CoalescerConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl SupervisorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    pub fn memory_warn_bytes(&self) -> u64 {
        self.memory_warn_mb * 1024 * 1024
    }
}

/// Resolved locations of every file the daemon owns.
///
/// Computed once from [`Settings`] and handed to each component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    pub root: PathBuf,
    pub state_dir: PathBuf,
    pub lock: PathBuf,
    pub log: PathBuf,
    pub metrics: PathBuf,
    pub python_graph: PathBuf,
    pub javascript_graph: PathBuf,
    pub structural_graph: PathBuf,
}

impl StatePaths {
    pub fn new(root: &Path, state_dir: &Path) -> Self {
        let state_dir = if state_dir.is_absolute() {
            state_dir.to_path_buf()
        } else {
            root.join(state_dir)
        };
        Self {
            root: root.to_path_buf(),
            lock: state_dir.join("daemon.lock"),
            log: state_dir.join("daemon.log"),
            metrics: state_dir.join("metrics.json"),
            python_graph: state_dir.join("py.dot"),
            javascript_graph: state_dir.join("js.json"),
            structural_graph: state_dir.join("ts.json"),
            state_dir,
        }
    }

    /// Create the state directory if it does not exist yet.
    pub fn ensure_state_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.state_dir)
    }
}

impl Settings {
    /// Load configuration for the repository rooted at `root`.
    pub fn load(root: &Path) -> Result<Self, Box<figment::Error>> {
        let config_path = root.join(default_state_dir()).join("settings.toml");
        Self::load_from(config_path).map(|mut settings| {
            if settings.repo_root.is_none() {
                settings.repo_root = Some(root.to_path_buf());
            }
            settings
        })
    }

    /// Load configuration from a specific file.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            // Double underscore separates nesting levels, single underscore
            // stays inside field names.
            .merge(
                Env::prefixed(ENV_PREFIX)
                    .map(|key| key.as_str().to_lowercase().replace("__", ".").into()),
            )
            .extract()
            .map_err(Box::new)
    }

    /// Repository root, falling back to the current directory.
    pub fn root(&self) -> PathBuf {
        self.repo_root
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn state_paths(&self) -> StatePaths {
        StatePaths::new(&self.root(), &self.state_dir)
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }
}
