//! Mount readiness detection.
//!
//! A FUSE mount is live once the mountpoint reports a different device than
//! its parent directory. Stat calls go through a helper thread with a
//! timeout because a stat on a dead FUSE mount can block indefinitely.

use std::fs::Metadata;
use std::path::Path;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use thiserror::Error;

/// Default timeout for a single stat of the mountpoint or its parent.
pub const DEFAULT_ACCESS_TIMEOUT: Duration = Duration::from_millis(500);

/// Default interval between readiness checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Errors from waiting on a mount.
#[derive(Debug, Error)]
pub enum WaitError {
    /// The mount did not appear before the deadline.
    #[error("mount at {path} did not become ready within {timeout:?}")]
    TimedOut {
        /// Mountpoint that was polled.
        path: String,
        /// How long the caller waited.
        timeout: Duration,
    },

    /// The caller's abort condition fired first.
    #[error("mount at {0} was abandoned before it became ready")]
    Aborted(String),
}

fn metadata_with_timeout(path: &Path, timeout: Duration) -> Option<Metadata> {
    let path = path.to_path_buf();
    let (tx, rx) = mpsc::channel();

    std::thread::spawn(move || {
        let _ = tx.send(std::fs::metadata(&path));
    });

    rx.recv_timeout(timeout).ok()?.ok()
}

/// Returns `true` if a filesystem is mounted at `path`.
#[cfg(unix)]
pub fn is_mounted(path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    let parent = path.parent().unwrap_or(Path::new("/"));
    match (
        metadata_with_timeout(path, DEFAULT_ACCESS_TIMEOUT),
        metadata_with_timeout(parent, DEFAULT_ACCESS_TIMEOUT),
    ) {
        (Some(mount), Some(parent)) => mount.dev() != parent.dev(),
        _ => false,
    }
}

/// Returns `true` if `path` is reachable. WinFsp creates the mountpoint
/// itself, so existence is the only readiness signal there.
#[cfg(not(unix))]
pub fn is_mounted(path: &Path) -> bool {
    metadata_with_timeout(path, DEFAULT_ACCESS_TIMEOUT).is_some()
}

/// Polls until a filesystem is mounted at `path` or `timeout` elapses.
///
/// `abort` is checked between polls; returning `true` gives up early, which
/// lets callers stop waiting once the thread running the FUSE loop exits.
pub fn wait_for_mount(
    path: &Path,
    timeout: Duration,
    poll: Duration,
    mut abort: impl FnMut() -> bool,
) -> Result<(), WaitError> {
    let deadline = Instant::now() + timeout;

    loop {
        if is_mounted(path) {
            tracing::debug!(path = %path.display(), "mount is ready");
            return Ok(());
        }
        if abort() {
            return Err(WaitError::Aborted(path.display().to_string()));
        }
        if Instant::now() >= deadline {
            return Err(WaitError::TimedOut {
                path: path.display().to_string(),
                timeout,
            });
        }
        std::thread::sleep(poll);
    }
}
