//! User interrupt tracking
//!
//! Ctrl+C is the only cancellation signal in the system. The binary forwards
//! it here; the streaming fetcher polls the flag between chunks. A body read
//! that never returns cannot poll, so a repeated request while a transfer is
//! still running removes that transfer's temporary file directly and tells
//! the caller to stop the process.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, warn};

/// A transfer was interrupted by the user
///
/// This is the one condition the orchestrators never swallow: it ends the
/// whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Transfer interrupted by user")]
pub struct Interrupted;

/// How an interrupt request is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptResponse {
    /// Nothing is transferring; the caller should stop the process itself
    Idle,
    /// The running transfer stops at its next chunk and cleans up
    Deferred,
    /// The transfer ignored an earlier request; its temporary file has been
    /// removed and the caller should stop the process
    Abandoned,
}

#[derive(Debug, Default)]
struct State {
    requested: AtomicBool,
    transfer_active: AtomicBool,
    temp_path: Mutex<Option<PathBuf>>,
}

impl State {
    fn set_temp_path(&self, path: Option<PathBuf>) {
        *self.temp_path.lock().unwrap_or_else(PoisonError::into_inner) = path;
    }

    fn take_temp_path(&self) -> Option<PathBuf> {
        self.temp_path
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Shared interrupt state
///
/// Cloning is cheap; all clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag {
    state: Arc<State>,
}

impl InterruptFlag {
    /// Creates a flag with no pending interrupt
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an interrupt request
    ///
    /// The first request during a transfer is [`InterruptResponse::Deferred`].
    /// Any further request while the same transfer is still running deletes
    /// its temporary file and returns [`InterruptResponse::Abandoned`].
    pub fn request(&self) -> InterruptResponse {
        let already_requested = self.state.requested.swap(true, Ordering::SeqCst);

        if !self.state.transfer_active.load(Ordering::SeqCst) {
            return InterruptResponse::Idle;
        }
        if !already_requested {
            return InterruptResponse::Deferred;
        }

        if let Some(path) = self.state.take_temp_path() {
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), "Removed temporary file of stalled transfer")
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to remove temporary file")
                }
            }
        }
        InterruptResponse::Abandoned
    }

    /// Returns whether an interrupt has been requested
    pub fn is_requested(&self) -> bool {
        self.state.requested.load(Ordering::SeqCst)
    }

    /// Returns whether a transfer is currently running
    pub fn is_transfer_active(&self) -> bool {
        self.state.transfer_active.load(Ordering::SeqCst)
    }

    /// Marks a transfer writing to `temp_path` as running until the returned
    /// guard is dropped
    pub(crate) fn begin_transfer(&self, temp_path: &Path) -> ActiveTransfer {
        self.state.set_temp_path(Some(temp_path.to_path_buf()));
        self.state.transfer_active.store(true, Ordering::SeqCst);
        ActiveTransfer {
            state: Arc::clone(&self.state),
        }
    }
}

/// Keeps a transfer marked as active for its lifetime
#[derive(Debug)]
pub(crate) struct ActiveTransfer {
    state: Arc<State>,
}

impl Drop for ActiveTransfer {
    fn drop(&mut self) {
        self.state.transfer_active.store(false, Ordering::SeqCst);
        self.state.set_temp_path(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_request_without_active_transfer() {
        let flag = InterruptFlag::new();

        assert!(!flag.is_requested());
        assert_eq!(flag.request(), InterruptResponse::Idle);
        assert!(flag.is_requested());
    }

    #[test]
    fn test_request_during_transfer() {
        let dir = TempDir::new().unwrap();
        let flag = InterruptFlag::new();
        let observer = flag.clone();

        let guard = flag.begin_transfer(&dir.path().join("a.mkv.temp"));
        assert!(observer.is_transfer_active());
        assert_eq!(observer.request(), InterruptResponse::Deferred);
        assert!(flag.is_requested());

        drop(guard);
        assert!(!flag.is_transfer_active());
    }

    #[test]
    fn test_repeated_request_removes_temp_file() {
        let dir = TempDir::new().unwrap();
        let temp = dir.path().join("a.mkv.temp");
        fs::write(&temp, b"partial").unwrap();
        let flag = InterruptFlag::new();

        let _guard = flag.begin_transfer(&temp);
        assert_eq!(flag.request(), InterruptResponse::Deferred);
        assert!(temp.exists());

        assert_eq!(flag.request(), InterruptResponse::Abandoned);
        assert!(!temp.exists());
    }

    #[test]
    fn test_finished_transfer_forgets_temp_path() {
        let dir = TempDir::new().unwrap();
        let temp = dir.path().join("a.mkv.temp");
        let flag = InterruptFlag::new();

        drop(flag.begin_transfer(&temp));
        fs::write(&temp, b"unrelated").unwrap();

        assert_eq!(flag.request(), InterruptResponse::Idle);
        assert_eq!(flag.request(), InterruptResponse::Idle);
        assert!(temp.exists());
    }
}
