//! Mount utilities shared by oxfuse sessions and filesystem implementations.
//!
//! # Components
//!
//! - [`HandleTable`] - allocates FUSE file handles and stores per-open state
//! - [`is_mounted`] / [`wait_for_mount`] - mount readiness detection
//! - [`unmount`] / [`lazy_unmount`] - unmounting through the platform tools
//!
//! # Example
//!
//! ```
//! use oxfuse_mount::HandleTable;
//!
//! struct OpenFile {
//!     offset: u64,
//! }
//!
//! let handles: HandleTable<OpenFile> = HandleTable::new();
//! let fh = handles.insert(OpenFile { offset: 0 });
//! handles.get_mut(fh).unwrap().offset = 512;
//! assert_eq!(handles.remove(fh).unwrap().offset, 512);
//! ```

#![warn(missing_docs)]

pub mod handle_table;
pub mod mount_utils;
pub mod unmount;

pub use handle_table::HandleTable;
pub use mount_utils::{
    DEFAULT_ACCESS_TIMEOUT, DEFAULT_POLL_INTERVAL, WaitError, is_mounted, wait_for_mount,
};
pub use unmount::{lazy_unmount, unmount};
