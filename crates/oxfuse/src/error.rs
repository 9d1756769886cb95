//! Error types and errno mapping.
//!
//! [`FuseError`] is what [`Operations`](crate::Operations) methods return.
//! The dispatcher turns it into the negative errno libfuse expects; nothing
//! else ever crosses back into native code. Failures that carry no errno are
//! answered with `EIO` and handed to the session's
//! [`FailureReporter`](crate::FailureReporter).
//!
//! [`LoadError`] and [`MountError`] are fatal startup errors surfaced from
//! [`load`](crate::load) and [`Session`](crate::Session).

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by filesystem operations.
#[derive(Debug, Error)]
pub enum FuseError {
    /// A specific system error number, returned to the kernel verbatim.
    #[error("errno {0}")]
    Errno(i32),

    /// A path or name could not be converted under the configured encoding.
    #[error("path cannot be represented: {0}")]
    InvalidPath(String),

    /// IO error. Mapped through its OS error code, or its kind when it has
    /// no code.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Any other failure. Answered with `EIO` and reported.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FuseError {
    /// Shorthand for `FuseError::Errno(errno)`.
    pub fn errno(errno: i32) -> Self {
        FuseError::Errno(errno)
    }

    /// Returns the positive errno this error maps to, or `None` when the
    /// failure is unmapped and should be answered with `EIO`.
    pub fn mapped_errno(&self) -> Option<i32> {
        match self {
            FuseError::Errno(e) if *e > 0 => Some(*e),
            FuseError::Errno(_) | FuseError::InvalidPath(_) => Some(libc::EINVAL),
            FuseError::Io(e) => io_errno(e),
            FuseError::Other(e) => e.downcast_ref::<io::Error>().and_then(io_errno),
        }
    }

    /// Returns `true` for failures that carry no usable errno.
    pub fn is_unmapped(&self) -> bool {
        match self {
            FuseError::Errno(e) => *e <= 0,
            _ => self.mapped_errno().is_none(),
        }
    }
}

impl ToErrno for FuseError {
    fn to_errno(&self) -> i32 {
        self.mapped_errno().unwrap_or(libc::EIO)
    }
}

#[cfg(unix)]
impl From<nix::errno::Errno> for FuseError {
    fn from(e: nix::errno::Errno) -> Self {
        FuseError::Errno(e as i32)
    }
}

/// Result type for filesystem operations.
pub type FuseResult<T> = Result<T, FuseError>;

/// Extension trait to convert errors to errno.
pub trait ToErrno {
    /// Converts this error to a positive libc error code.
    fn to_errno(&self) -> i32;
}

impl ToErrno for io::Error {
    fn to_errno(&self) -> i32 {
        io_errno(self).unwrap_or(libc::EIO)
    }
}

/// The errno behind an `io::Error`: its OS code, else one implied by its
/// kind.
fn io_errno(e: &io::Error) -> Option<i32> {
    if let Some(code) = e.raw_os_error().filter(|code| *code > 0) {
        return Some(code);
    }
    use io::ErrorKind as K;
    let code = match e.kind() {
        K::NotFound => libc::ENOENT,
        K::PermissionDenied => libc::EACCES,
        K::AlreadyExists => libc::EEXIST,
        K::Unsupported => libc::ENOSYS,
        K::InvalidInput => libc::EINVAL,
        K::WouldBlock => libc::EAGAIN,
        K::Interrupted => libc::EINTR,
        K::TimedOut => libc::ETIMEDOUT,
        K::NotADirectory => libc::ENOTDIR,
        K::IsADirectory => libc::EISDIR,
        K::DirectoryNotEmpty => libc::ENOTEMPTY,
        K::ReadOnlyFilesystem => libc::EROFS,
        K::StorageFull => libc::ENOSPC,
        K::FileTooLarge => libc::EFBIG,
        K::CrossesDevices => libc::EXDEV,
        K::TooManyLinks => libc::EMLINK,
        K::ResourceBusy => libc::EBUSY,
        K::BrokenPipe => libc::EPIPE,
        K::NotConnected => libc::ENOTCONN,
        _ => return None,
    };
    Some(code)
}

/// Fatal errors while locating or binding the native FUSE library.
#[derive(Debug, Error)]
pub enum LoadError {
    /// No candidate library could be opened.
    #[error("unable to find a FUSE library (tried: {})", tried.join(", "))]
    NotFound {
        /// Every name or path that was attempted.
        tried: Vec<String>,
    },

    /// The library was found but a required entry point is missing.
    #[error("{library} does not export {symbol}")]
    Symbol {
        /// Path of the opened library.
        library: PathBuf,
        /// Missing symbol name.
        symbol: &'static str,
    },

    /// `fuse_version()` returned a value outside the known encodings.
    #[error("version {raw} reported by {library} cannot be parsed")]
    UnparseableVersion {
        /// Path of the opened library.
        library: PathBuf,
        /// Raw `fuse_version()` result.
        raw: i32,
    },

    /// The library is older than 2.6, which broke ABI in every minor release.
    #[error("{library} is too old: {major}.{minor}; libfuse < 2.6 is not supported")]
    TooOld {
        /// Path of the opened library.
        library: PathBuf,
        /// Reported major version.
        major: u32,
        /// Reported minor version.
        minor: u32,
    },

    /// The library implements a major API version this crate cannot bind.
    #[error("{library} has unsupported major version {major}")]
    WrongMajor {
        /// Path of the opened library.
        library: PathBuf,
        /// Reported major version.
        major: u32,
    },

    /// No struct layout is known for this platform, architecture and version.
    #[error("no native struct layout for {0}")]
    UnsupportedTarget(String),

    /// The dynamic loader refused the library.
    #[error("failed to load {library}: {source}")]
    Open {
        /// Path of the library.
        library: PathBuf,
        /// Loader error.
        #[source]
        source: libloading::Error,
    },
}

/// Fatal errors from starting or running a mount.
#[derive(Debug, Error)]
pub enum MountError {
    /// The native library could not be loaded.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// The mountpoint is missing or not a directory.
    #[error("invalid mountpoint {path}: {reason}")]
    InvalidMountpoint {
        /// Offending path.
        path: PathBuf,
        /// Why it was rejected.
        reason: String,
    },

    /// An option or argument cannot be passed to the native library.
    #[error("invalid mount option: {0}")]
    InvalidOption(String),

    /// The native event loop exited with a non-zero status.
    #[error("FUSE loop exited with status {0}")]
    Loop(i32),

    /// The background session thread failed.
    #[error("session thread failed: {0}")]
    Thread(String),

    /// The mount did not become ready.
    #[error(transparent)]
    Wait(#[from] oxfuse_mount::WaitError),

    /// The platform unmount tools failed.
    #[error("unmount failed: {0:#}")]
    Unmount(anyhow::Error),

    /// IO error while preparing or tearing down the mount.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_passthrough() {
        for code in [
            libc::ENOENT,
            libc::EACCES,
            libc::EEXIST,
            libc::ENOTDIR,
            libc::EISDIR,
            libc::ENOSPC,
            libc::EROFS,
            libc::ENOTEMPTY,
        ] {
            let e = FuseError::Errno(code);
            assert_eq!(e.to_errno(), code, "errno {code} should pass through");
            assert!(!e.is_unmapped());
        }
    }

    #[test]
    fn test_non_positive_errno_is_einval() {
        assert_eq!(FuseError::Errno(0).to_errno(), libc::EINVAL);
        assert_eq!(FuseError::Errno(-2).to_errno(), libc::EINVAL);
        assert!(FuseError::Errno(-2).is_unmapped());
    }

    #[test]
    fn test_invalid_path_is_einval() {
        let e = FuseError::InvalidPath("bad".into());
        assert_eq!(e.to_errno(), libc::EINVAL);
        assert!(!e.is_unmapped());
    }

    #[test]
    fn test_io_error_mapping() {
        let e = FuseError::from(io::Error::from_raw_os_error(libc::EPERM));
        assert_eq!(e.to_errno(), libc::EPERM);

        let e = FuseError::from(io::Error::other("custom"));
        assert_eq!(e.to_errno(), libc::EIO);
        assert!(e.is_unmapped());
    }

    #[test]
    fn test_io_error_kind_without_code() {
        for (kind, code) in [
            (io::ErrorKind::NotFound, libc::ENOENT),
            (io::ErrorKind::PermissionDenied, libc::EACCES),
            (io::ErrorKind::AlreadyExists, libc::EEXIST),
            (io::ErrorKind::Unsupported, libc::ENOSYS),
            (io::ErrorKind::DirectoryNotEmpty, libc::ENOTEMPTY),
        ] {
            let e = FuseError::from(io::Error::from(kind));
            assert_eq!(e.to_errno(), code, "{kind:?}");
            assert!(!e.is_unmapped(), "{kind:?}");
            assert_eq!(io::Error::new(kind, "detail").to_errno(), code);
        }

        let e = FuseError::from(anyhow::Error::new(io::Error::from(io::ErrorKind::NotFound)));
        assert_eq!(e.to_errno(), libc::ENOENT);

        let e = FuseError::from(io::Error::from(io::ErrorKind::UnexpectedEof));
        assert!(e.is_unmapped());
    }

    #[test]
    fn test_anyhow_wrapping_io_error_keeps_errno() {
        let e = FuseError::from(anyhow::Error::new(io::Error::from_raw_os_error(
            libc::ENOSPC,
        )));
        assert_eq!(e.to_errno(), libc::ENOSPC);
    }

    #[test]
    fn test_anyhow_is_unmapped() {
        let e = FuseError::from(anyhow::anyhow!("backend exploded"));
        assert_eq!(e.to_errno(), libc::EIO);
        assert!(e.is_unmapped());
        assert_eq!(e.to_string(), "backend exploded");
    }

    #[cfg(unix)]
    #[test]
    fn test_nix_errno() {
        let e = FuseError::from(nix::errno::Errno::ENOTTY);
        assert_eq!(e.to_errno(), libc::ENOTTY);
    }

    #[test]
    fn test_io_to_errno_trait() {
        assert_eq!(
            io::Error::from_raw_os_error(libc::ENOENT).to_errno(),
            libc::ENOENT
        );
        assert_eq!(io::Error::other("x").to_errno(), libc::EIO);
    }

    #[test]
    fn test_load_error_display() {
        let e = LoadError::NotFound {
            tried: vec!["libfuse.so.2".into(), "libfuse3.so.3".into()],
        };
        assert!(e.to_string().contains("libfuse.so.2, libfuse3.so.3"));

        let e = LoadError::TooOld {
            library: "/usr/lib/libfuse.so.2".into(),
            major: 2,
            minor: 5,
        };
        assert!(e.to_string().contains("2.5"));
    }
}
