//! Per-sensor single instance lock using a Unix socket.
//!
//! Two agents with the same sensor identity would publish conflicting
//! presence for the same adapter. The lock is a Unix socket named after the
//! identity; the OS releases it when the process dies, so a crashed agent
//! never blocks the next start.

use std::io;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error types for instance lock operations.
#[derive(Debug, Error)]
pub enum InstanceLockError {
    /// Another agent with this identity is already running.
    #[error("another sensor with id {0} is already running")]
    AlreadyRunning(String),

    /// I/O error during lock acquisition.
    #[error("failed to acquire instance lock: {0}")]
    Io(#[from] io::Error),
}

/// Lock held for as long as this value lives.
pub struct InstanceLock {
    _listener: UnixListener,
    path: PathBuf,
}

impl InstanceLock {
    /// Acquire the lock for `sensor_id` in the default runtime directory.
    pub fn acquire(sensor_id: &str) -> Result<Self, InstanceLockError> {
        Self::acquire_in(&runtime_dir(), sensor_id)
    }

    /// Acquire the lock for `sensor_id` inside `dir`.
    pub fn acquire_in(dir: &Path, sensor_id: &str) -> Result<Self, InstanceLockError> {
        let path = dir.join(socket_name(sensor_id));

        // A socket nobody answers on was left behind by a killed agent
        if path.exists() {
            if UnixStream::connect(&path).is_ok() {
                return Err(InstanceLockError::AlreadyRunning(sensor_id.to_string()));
            }
            let _ = std::fs::remove_file(&path);
        }

        match UnixListener::bind(&path) {
            Ok(listener) => Ok(Self {
                _listener: listener,
                path,
            }),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                Err(InstanceLockError::AlreadyRunning(sensor_id.to_string()))
            }
            Err(e) => Err(InstanceLockError::Io(e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// `$XDG_RUNTIME_DIR` when set, `/tmp` otherwise.
fn runtime_dir() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

/// Socket file name; anything outside `[A-Za-z0-9_-]` becomes `-`.
fn socket_name(sensor_id: &str) -> String {
    let sanitized: String = sensor_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    format!("presence-sensor-{}.sock", sanitized)
}
