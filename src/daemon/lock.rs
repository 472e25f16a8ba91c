//! Single-instance lock record.
//!
//! The record is a file holding one decimal PID. It is the only evidence of
//! a running instance: a record whose PID is not alive, or that cannot be
//! parsed, is stale and gets replaced.

use std::path::{Path, PathBuf};

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use thiserror::Error;

use crate::utils::write_atomic;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Failed to read lock record {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove stale lock record {path}: {source}")]
    RemoveStale {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write lock record {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What the lock record currently says.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockRecord {
    Missing,
    Corrupt,
    Pid(u32),
}

impl LockRecord {
    pub fn read(path: &Path) -> Result<Self, LockError> {
        match std::fs::read(path) {
            Ok(bytes) => Ok(Self::parse(&bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LockRecord::Missing),
            Err(source) => Err(LockError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Non-UTF-8 bytes are as corrupt as a non-numeric record.
    fn parse(bytes: &[u8]) -> Self {
        std::str::from_utf8(bytes)
            .ok()
            .and_then(|contents| contents.trim().parse::<u32>().ok())
            .map_or(LockRecord::Corrupt, LockRecord::Pid)
    }
}

/// Result of trying to take the lock.
#[derive(Debug)]
pub enum Acquisition {
    Acquired(PidLock),
    /// Another live instance holds the record; it was left untouched.
    AlreadyRunning(u32),
}

/// Held lock record. Removed on [`PidLock::release`] or drop.
#[derive(Debug)]
pub struct PidLock {
    path: PathBuf,
    pid: u32,
    released: bool,
}

impl PidLock {
    pub fn acquire(path: &Path) -> Result<Acquisition, LockError> {
        let own_pid = std::process::id();

        match LockRecord::read(path)? {
            LockRecord::Missing => {}
            LockRecord::Pid(pid) if pid != own_pid && process_alive(pid) => {
                return Ok(Acquisition::AlreadyRunning(pid));
            }
            record => {
                tracing::info!("[lock] removing stale lock record ({record:?})");
                match std::fs::remove_file(path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(source) => {
                        return Err(LockError::RemoveStale {
                            path: path.to_path_buf(),
                            source,
                        });
                    }
                }
            }
        }

        write_atomic(path, own_pid.to_string().as_bytes()).map_err(|source| LockError::Write {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(Acquisition::Acquired(PidLock {
            path: path.to_path_buf(),
            pid: own_pid,
            released: false,
        }))
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Delete the record. Idempotent; a missing record is not an error.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match std::fs::remove_file(&self.path) {
            Ok(()) => crate::debug_event!("lock", "released", "{}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("[lock] failed to remove {}: {e}", self.path.display()),
        }
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// OS-level liveness probe.
pub fn process_alive(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut sys = System::new();
    sys.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::nothing(),
    );
    sys.process(pid).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_record_parsing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("daemon.lock");
        assert_eq!(LockRecord::read(&path).unwrap(), LockRecord::Missing);

        std::fs::write(&path, "1234\n").unwrap();
        assert_eq!(LockRecord::read(&path).unwrap(), LockRecord::Pid(1234));

        std::fs::write(&path, "not-a-pid").unwrap();
        assert_eq!(LockRecord::read(&path).unwrap(), LockRecord::Corrupt);
    }

    #[test]
    fn test_acquire_fresh_and_release() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("daemon.lock");

        let Acquisition::Acquired(mut lock) = PidLock::acquire(&path).unwrap() else {
            panic!("expected to acquire a fresh lock");
        };
        assert_eq!(lock.pid(), std::process::id());
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            std::process::id().to_string()
        );

        lock.release();
        assert!(!path.exists());
        // Second release is a no-op
        lock.release();
    }

    #[test]
    fn test_corrupt_record_is_replaced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("daemon.lock");
        std::fs::write(&path, "garbage").unwrap();

        let acquired = PidLock::acquire(&path).unwrap();
        assert!(matches!(acquired, Acquisition::Acquired(_)));
        assert_eq!(LockRecord::read(&path).unwrap(), LockRecord::Pid(std::process::id()));
    }

    #[test]
    fn test_non_utf8_record_is_replaced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("daemon.lock");
        std::fs::write(&path, [0xff, 0xfe, 0x00, 0x12]).unwrap();
        assert_eq!(LockRecord::read(&path).unwrap(), LockRecord::Corrupt);

        let acquired = PidLock::acquire(&path).unwrap();
        assert!(matches!(acquired, Acquisition::Acquired(_)));
        assert_eq!(LockRecord::read(&path).unwrap(), LockRecord::Pid(std::process::id()));
    }

    #[test]
    fn test_own_pid_is_stale() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("daemon.lock");
        std::fs::write(&path, std::process::id().to_string()).unwrap();

        assert!(matches!(PidLock::acquire(&path).unwrap(), Acquisition::Acquired(_)));
    }

    #[test]
    fn test_drop_releases() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("daemon.lock");
        {
            let _held = PidLock::acquire(&path).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_current_process_is_alive() {
        assert!(process_alive(std::process::id()));
    }

    #[cfg(unix)]
    #[test]
    fn test_live_holder_refuses_without_touching_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("daemon.lock");
        let mut holder = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        std::fs::write(&path, holder.id().to_string()).unwrap();

        let result = PidLock::acquire(&path).unwrap();
        assert!(matches!(result, Acquisition::AlreadyRunning(pid) if pid == holder.id()));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), holder.id().to_string());

        holder.kill().unwrap();
        holder.wait().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_dead_holder_is_replaced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("daemon.lock");
        let mut exited = std::process::Command::new("true").spawn().unwrap();
        let dead_pid = exited.id();
        exited.wait().unwrap();
        std::fs::write(&path, dead_pid.to_string()).unwrap();

        assert!(matches!(PidLock::acquire(&path).unwrap(), Acquisition::Acquired(_)));
        assert_eq!(LockRecord::read(&path).unwrap(), LockRecord::Pid(std::process::id()));
    }
}
