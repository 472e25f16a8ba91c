//! Periodic process health sampling.

use std::time::{Duration, Instant};

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Memory snapshot from sysinfo.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemorySnapshot {
    /// Resident set size in bytes
    pub rss: u64,
}

impl MemorySnapshot {
    /// Get current process memory usage. Zeroes when the probe fails.
    pub fn current() -> Self {
        let mut sys = System::new();
        let pid = Pid::from_u32(std::process::id());
        sys.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );

        sys.process(pid)
            .map(|process| Self {
                rss: process.memory(),
            })
            .unwrap_or_default()
    }

    /// Format RSS as human-readable string.
    pub fn rss_human(&self) -> String {
        format_bytes(self.rss)
    }
}

/// Format bytes as human-readable string.
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1}GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1}MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1}KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes}B")
    }
}

/// Rate-limited health check driven by the supervisory loop.
#[derive(Debug)]
pub struct HealthMonitor {
    interval: Duration,
    threshold: u64,
    last_check: Option<Instant>,
}

impl HealthMonitor {
    pub fn new(interval: Duration, threshold_bytes: u64) -> Self {
        Self {
            interval,
            threshold: threshold_bytes,
            last_check: None,
        }
    }

    /// True before the first check and once per interval afterwards.
    pub fn due(&self, now: Instant) -> bool {
        self.last_check
            .is_none_or(|last| now.duration_since(last) >= self.interval)
    }

    /// Sample memory and log. Returns whether usage is above the threshold.
    pub fn check(&mut self, now: Instant, updates: u64) -> bool {
        self.last_check = Some(now);
        self.evaluate(MemorySnapshot::current(), updates)
    }

    fn evaluate(&self, memory: MemorySnapshot, updates: u64) -> bool {
        let high = memory.rss > self.threshold;
        if high {
            tracing::warn!("[health] high memory usage: {}", memory.rss_human());
        }
        crate::debug_event!(
            "health",
            "check",
            "memory {}, updates {updates}",
            memory.rss_human()
        );
        high
    }
}
