//! Identity of the process behind the request being served.
//!
//! The trampoline snapshots libfuse's `fuse_context` before calling into
//! [`Operations`](crate::Operations) and installs it for the current thread.
//! [`current`] reads it back; outside a dispatch there is nothing to read.

use std::cell::Cell;
use std::ffi::c_void;

use crate::error::{FuseError, FuseResult};

/// Requesting uid, gid, pid and umask of one FUSE call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallContext {
    /// Effective user id of the caller.
    pub uid: u32,
    /// Effective group id of the caller.
    pub gid: u32,
    /// Thread id of the caller.
    pub pid: i32,
    /// `None` when the bound library predates libfuse 2.8.
    pub umask: Option<u32>,
}

/// How the active call can stop the native loop.
#[derive(Clone, Copy)]
pub(crate) enum ExitHook {
    /// `fuse_exit(fuse)`.
    Native {
        exit: unsafe extern "C" fn(*mut c_void),
        fuse: *mut c_void,
    },
    /// The library has no `fuse_exit`; its loop stops on `SIGTERM`.
    Signal,
    /// No native session behind this call.
    None,
}

#[derive(Clone, Copy)]
struct ActiveCall {
    context: CallContext,
    exit: ExitHook,
}

thread_local! {
    static ACTIVE: Cell<Option<ActiveCall>> = const { Cell::new(None) };
}

/// Restores the previous thread state when dropped, panics included.
pub(crate) struct Scope {
    previous: Option<ActiveCall>,
}

impl Scope {
    pub(crate) fn enter(context: CallContext, exit: ExitHook) -> Self {
        let previous = ACTIVE.with(|a| a.replace(Some(ActiveCall { context, exit })));
        Scope { previous }
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        ACTIVE.with(|a| a.set(self.previous));
    }
}

/// Returns the context of the call being served on this thread.
///
/// `None` outside of an [`Operations`](crate::Operations) method.
pub fn current() -> Option<CallContext> {
    ACTIVE.with(|a| a.get().map(|call| call.context))
}

/// Asks the native event loop serving the current call to terminate.
///
/// The loop returns once in-flight requests finish, `destroy` runs and the
/// session's `run` returns. Only valid inside an
/// [`Operations`](crate::Operations) method; elsewhere it fails with
/// `EINVAL`.
pub fn exit() -> FuseResult<()> {
    let Some(call) = ACTIVE.with(Cell::get) else {
        return Err(FuseError::Errno(libc::EINVAL));
    };

    match call.exit {
        ExitHook::Native { exit, fuse } => {
            tracing::info!("exit requested from filesystem operation");
            // SAFETY: `fuse` was read from the live fuse_context of this call.
            unsafe { exit(fuse) };
            Ok(())
        }
        ExitHook::Signal => {
            tracing::info!("exit requested from filesystem operation, sending SIGTERM");
            #[cfg(unix)]
            {
                nix::sys::signal::kill(nix::unistd::Pid::this(), nix::sys::signal::SIGTERM)?;
                Ok(())
            }
            #[cfg(not(unix))]
            {
                Err(FuseError::Errno(libc::ENOSYS))
            }
        }
        ExitHook::None => Err(FuseError::Errno(libc::ENOSYS)),
    }
}
