//! High-level FUSE bindings over a runtime-loaded native library.
//!
//! The FUSE library (libfuse 2.6+ or libfuse 3 on Linux and FreeBSD,
//! osxfuse/macFUSE/fuse-t on macOS, librefuse on OpenBSD, WinFsp on
//! Windows) is located and bound when the first session starts. Native
//! structs are described by per-platform layout tables rather than
//! compile-time `#[repr(C)]` definitions, so one build serves whichever
//! library version is installed.
//!
//! # Features
//!
//! - Path-based [`Operations`] trait with defaults for every primitive
//! - Native struct layouts for Linux, macOS, FreeBSD, OpenBSD and WinFsp
//! - Errno mapping with a side channel for unmapped failures and panics
//! - Foreground and background sessions
//!
//! # Usage
//!
//! ```ignore
//! use std::path::Path;
//! use oxfuse::{FuseResult, MountOptions, Operations, types::Stat};
//!
//! struct Hello;
//!
//! impl Operations for Hello {
//!     fn getattr(&self, path: Option<&Path>, _fh: Option<oxfuse::types::FileHandle>) -> FuseResult<Stat> {
//!         match path.and_then(Path::to_str) {
//!             Some("/") => Ok(Stat::directory(0o755)),
//!             _ => Err(oxfuse::FuseError::Errno(libc::ENOENT)),
//!         }
//!     }
//! }
//!
//! oxfuse::mount(Hello, "/mnt/hello", MountOptions::default())?;
//! ```

pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod loader;
pub mod native;
pub mod operations;
pub mod path;
pub mod report;
pub mod schema;
pub mod session;
pub mod trampoline;
pub mod types;

pub use config::{MountOption, MountOptions};
pub use context::CallContext;
pub use dispatch::{DispatchOptions, Dispatcher, SessionState};
pub use error::{FuseError, FuseResult, LoadError, MountError, ToErrno};
pub use loader::{ENV_API_VERSION, ENV_LIBRARY_PATH, FuseLibrary, LoaderConfig, load, loaded};
pub use operations::{Operations, Primitive};
pub use path::PathEncoding;
pub use report::{Failure, FailureKind, FailureReporter, LogReporter};
pub use schema::{ApiVersion, Arch, Platform, Schema, Target};
pub use session::{BackgroundSession, Session, mount};
pub use trampoline::{OperationTable, TableOptions};
pub use types::{
    ConnectionInfo, DirEntry, FileHandle, FileLock, PollHandle, RawFileInfo, Stat, StatFill,
    StatVfs, Timespec,
};
