//! Running a filesystem on the native event loop.
//!
//! A [`Session`] owns the dispatcher and the operation table for one mount.
//! [`Session::run`] blocks in `fuse_main_real` until the filesystem is
//! unmounted; [`Session::spawn`] does the same on a background thread and
//! hands back a [`BackgroundSession`] to wait on or unmount.

use std::ffi::{c_char, c_void};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, bounded};
use tracing::{debug, error, info, warn};

use crate::config::{MountOptions, short_type_name};
use crate::dispatch::{Dispatcher, SessionState};
use crate::error::MountError;
use crate::loader::{self, FuseLibrary};
use crate::operations::Operations;
use crate::trampoline::OperationTable;

/// How long dropping a [`BackgroundSession`] waits for the loop to exit.
pub const DROP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// One mount of an [`Operations`] implementation.
pub struct Session<O: Operations> {
    library: &'static FuseLibrary,
    dispatcher: Arc<Dispatcher<O>>,
    mountpoint: PathBuf,
    options: MountOptions,
}

impl<O: Operations> Session<O> {
    /// Loads the native library and validates the mountpoint.
    pub fn new(ops: O, mountpoint: impl AsRef<Path>, options: MountOptions) -> Result<Self, MountError> {
        let mountpoint = mountpoint.as_ref().to_path_buf();
        check_mountpoint(&mountpoint)?;

        let library = loader::load(&options.loader)?;
        let dispatcher = Arc::new(Dispatcher::new(
            ops,
            library.schema().clone(),
            options.dispatch_options(),
        ));

        Ok(Self {
            library,
            dispatcher,
            mountpoint,
            options,
        })
    }

    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    pub fn dispatcher(&self) -> &Dispatcher<O> {
        &self.dispatcher
    }

    /// Serves requests until the filesystem is unmounted.
    ///
    /// `SIGINT` is reset to its default disposition for the duration so
    /// libfuse can install its own handler.
    pub fn run(self) -> Result<(), MountError> {
        self.serve(true)
    }

    /// Serves requests on a background thread.
    ///
    /// Signal dispositions are left alone; stop the mount with
    /// [`BackgroundSession::unmount`].
    pub fn spawn(self) -> Result<BackgroundSession, MountError> {
        let mountpoint = self.mountpoint.clone();
        let (tx, rx) = bounded(1);
        let thread = std::thread::Builder::new()
            .name(format!("oxfuse:{}", mountpoint.display()))
            .spawn(move || {
                let result = self.serve(false);
                if let Err(e) = &result {
                    error!(error = %e, "background session failed");
                }
                // The receiver may already be gone.
                let _ = tx.send(result);
            })?;

        info!(mountpoint = %mountpoint.display(), "spawned background session");
        Ok(BackgroundSession {
            mountpoint,
            thread: Some(thread),
            done: rx,
        })
    }

    fn serve(self, reset_sigint: bool) -> Result<(), MountError> {
        let name = self
            .options
            .fsname
            .clone()
            .unwrap_or_else(|| short_type_name(std::any::type_name::<O>()).to_string());
        let args = self.options.args(&name, &self.mountpoint)?;
        let table = OperationTable::build(
            self.library.schema(),
            self.dispatcher.operations(),
            self.options.table_options(),
        );

        let mut argv: Vec<*mut c_char> = args.iter().map(|a| a.as_ptr().cast_mut()).collect();
        argv.push(std::ptr::null_mut());

        info!(
            mountpoint = %self.mountpoint.display(),
            library = %self.library.path().display(),
            target = %self.library.target(),
            "mounting"
        );
        debug!(args = ?args, "native arguments");

        let status = {
            let _sigint = reset_sigint.then(SigintGuard::install);
            let user_data = Arc::as_ptr(&self.dispatcher).cast::<c_void>().cast_mut();
            // SAFETY: `argv` is NULL-terminated and backed by `args`; the table
            // and the dispatcher outlive the call.
            unsafe { self.library.main(&mut argv, table.as_ptr(), table.size(), user_data) }
        };

        // Covers loops that exit without delivering destroy.
        if self.dispatcher.state() == SessionState::Serving {
            self.dispatcher.destroy();
        }

        if status != 0 {
            warn!(status, mountpoint = %self.mountpoint.display(), "FUSE loop exited with error");
            return Err(MountError::Loop(status));
        }
        info!(mountpoint = %self.mountpoint.display(), "unmounted");
        Ok(())
    }
}

impl<O: Operations> std::fmt::Debug for Session<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("mountpoint", &self.mountpoint)
            .field("library", &self.library)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

/// Mounts `ops` at `mountpoint`.
///
/// With [`MountOptions::foreground`] set this blocks until unmount and
/// returns `None`; otherwise the loop runs on a background thread.
pub fn mount<O: Operations>(
    ops: O,
    mountpoint: impl AsRef<Path>,
    options: MountOptions,
) -> Result<Option<BackgroundSession>, MountError> {
    let foreground = options.foreground;
    let session = Session::new(ops, mountpoint, options)?;
    if foreground {
        session.run()?;
        Ok(None)
    } else {
        session.spawn().map(Some)
    }
}

fn check_mountpoint(path: &Path) -> Result<(), MountError> {
    let invalid = |reason: String| MountError::InvalidMountpoint {
        path: path.to_path_buf(),
        reason,
    };
    let meta = std::fs::metadata(path).map_err(|e| invalid(e.to_string()))?;
    if !meta.is_dir() {
        return Err(invalid("not a directory".into()));
    }
    Ok(())
}

/// A session running on its own thread.
#[derive(Debug)]
pub struct BackgroundSession {
    mountpoint: PathBuf,
    thread: Option<JoinHandle<()>>,
    done: Receiver<Result<(), MountError>>,
}

impl BackgroundSession {
    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    /// Whether the native loop has returned.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Blocks until the filesystem is visible at the mountpoint.
    ///
    /// Fails early if the loop exits first.
    pub fn wait_mounted(&self, timeout: Duration) -> Result<(), MountError> {
        oxfuse_mount::wait_for_mount(
            &self.mountpoint,
            timeout,
            oxfuse_mount::DEFAULT_POLL_INTERVAL,
            || self.is_finished(),
        )?;
        Ok(())
    }

    /// Unmounts and waits for the loop to exit.
    pub fn unmount(mut self) -> Result<(), MountError> {
        if !self.is_finished() {
            oxfuse_mount::unmount(&self.mountpoint).map_err(MountError::Unmount)?;
        }
        self.finish()
    }

    /// Waits for the loop to exit on its own.
    pub fn join(mut self) -> Result<(), MountError> {
        self.finish()
    }

    fn finish(&mut self) -> Result<(), MountError> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        thread
            .join()
            .map_err(|_| MountError::Thread("session thread panicked".into()))?;
        self.done
            .try_recv()
            .unwrap_or_else(|_| Err(MountError::Thread("session thread sent no result".into())))
    }
}

impl Drop for BackgroundSession {
    fn drop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        if !thread.is_finished() {
            if let Err(e) = oxfuse_mount::unmount(&self.mountpoint) {
                warn!(mountpoint = %self.mountpoint.display(), error = %e, "unmount on drop failed");
            }
        }
        match self.done.recv_timeout(DROP_JOIN_TIMEOUT) {
            Ok(_) | Err(RecvTimeoutError::Disconnected) => {
                if thread.join().is_err() {
                    warn!("session thread panicked");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    mountpoint = %self.mountpoint.display(),
                    timeout = ?DROP_JOIN_TIMEOUT,
                    "session thread did not exit, detaching"
                );
            }
        }
    }
}

/// Resets `SIGINT` to `SIG_DFL` and restores the previous action on drop.
#[cfg(unix)]
struct SigintGuard {
    previous: Option<nix::sys::signal::SigAction>,
}

#[cfg(unix)]
impl SigintGuard {
    fn install() -> Self {
        use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};

        let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
        // SAFETY: installing SIG_DFL runs no Rust code in signal context.
        match unsafe { sigaction(Signal::SIGINT, &default) } {
            Ok(previous) => Self {
                previous: Some(previous),
            },
            Err(e) => {
                warn!(error = %e, "could not reset SIGINT");
                Self { previous: None }
            }
        }
    }
}

#[cfg(unix)]
impl Drop for SigintGuard {
    fn drop(&mut self) {
        use nix::sys::signal::{Signal, sigaction};

        if let Some(previous) = self.previous.take() {
            // SAFETY: restores the action that was installed before.
            if let Err(e) = unsafe { sigaction(Signal::SIGINT, &previous) } {
                warn!(error = %e, "could not restore SIGINT handler");
            }
        }
    }
}

#[cfg(not(unix))]
struct SigintGuard;

#[cfg(not(unix))]
impl SigintGuard {
    fn install() -> Self {
        SigintGuard
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_mountpoint_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = check_mountpoint(&dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, MountError::InvalidMountpoint { .. }));
    }

    #[test]
    fn test_file_mountpoint_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file");
        std::fs::write(&file, b"x").unwrap();
        let err = check_mountpoint(&file).unwrap_err();
        assert!(matches!(err, MountError::InvalidMountpoint { reason, .. } if reason == "not a directory"));
    }

    #[test]
    fn test_directory_mountpoint_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_mountpoint(dir.path()).is_ok());
    }

    #[test]
    fn test_session_new_validates_before_loading() {
        struct Empty;
        impl Operations for Empty {}

        let dir = tempfile::tempdir().unwrap();
        let err = Session::new(Empty, dir.path().join("nope"), MountOptions::default()).unwrap_err();
        assert!(matches!(err, MountError::InvalidMountpoint { .. }));
    }

    #[test]
    fn test_finished_session_joins_with_result() {
        let (tx, rx) = bounded(1);
        let thread = std::thread::spawn(move || {
            tx.send(Err(MountError::Loop(1))).unwrap();
        });
        let session = BackgroundSession {
            mountpoint: PathBuf::from("/nonexistent"),
            thread: Some(thread),
            done: rx,
        };
        assert!(matches!(session.join(), Err(MountError::Loop(1))));
    }

    #[cfg(unix)]
    #[test]
    fn test_sigint_guard_restores_previous_action() {
        use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};

        let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
        let original = unsafe { sigaction(Signal::SIGINT, &ignore) }.unwrap();

        {
            let _guard = SigintGuard::install();
            let current = unsafe { sigaction(Signal::SIGINT, &ignore) }.unwrap();
            assert_eq!(current.handler(), SigHandler::SigDfl);
            // Put SIG_DFL back so the guard's view stays accurate.
            let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
            unsafe { sigaction(Signal::SIGINT, &default) }.unwrap();
        }

        let restored = unsafe { sigaction(Signal::SIGINT, &original) }.unwrap();
        assert_eq!(restored.handler(), SigHandler::SigIgn);
    }
}
