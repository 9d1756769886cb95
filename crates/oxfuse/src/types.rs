//! Values exchanged between the dispatcher and [`Operations`](crate::Operations).

use std::ffi::{OsString, c_void};
use std::ptr::NonNull;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{FuseError, FuseResult};
use crate::loader;
use crate::schema::FileInfoSlots;
use crate::schema::record::RecordMut;

/// Opaque per-open-file identifier.
///
/// Produced by `open`/`create`/`opendir` and passed back by the kernel on
/// every later call for that open file. The dispatcher never interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct FileHandle(pub u64);

impl From<u64> for FileHandle {
    fn from(fh: u64) -> Self {
        FileHandle(fh)
    }
}

impl From<FileHandle> for u64 {
    fn from(fh: FileHandle) -> Self {
        fh.0
    }
}

/// Seconds and nanoseconds, as in `struct timespec`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Timespec {
    pub sec: i64,
    pub nsec: i64,
}

impl Timespec {
    /// `utimens` marker: set this timestamp to the current time.
    pub const UTIME_NOW: i64 = (1 << 30) - 1;
    /// `utimens` marker: leave this timestamp unchanged.
    pub const UTIME_OMIT: i64 = (1 << 30) - 2;

    pub const fn new(sec: i64, nsec: i64) -> Self {
        Self { sec, nsec }
    }

    pub fn is_now(&self) -> bool {
        self.nsec == Self::UTIME_NOW
    }

    pub fn is_omit(&self) -> bool {
        self.nsec == Self::UTIME_OMIT
    }

    /// Resolves `UTIME_NOW` to the current time; `None` for `UTIME_OMIT`.
    pub fn resolve(&self) -> Option<SystemTime> {
        if self.is_omit() {
            None
        } else if self.is_now() {
            Some(SystemTime::now())
        } else {
            Some(SystemTime::from(*self))
        }
    }
}

impl From<SystemTime> for Timespec {
    fn from(t: SystemTime) -> Self {
        match t.duration_since(UNIX_EPOCH) {
            Ok(d) => Timespec::new(d.as_secs() as i64, i64::from(d.subsec_nanos())),
            Err(e) => {
                let d = e.duration();
                let (sec, nsec) = (d.as_secs() as i64, i64::from(d.subsec_nanos()));
                if nsec == 0 {
                    Timespec::new(-sec, 0)
                } else {
                    Timespec::new(-sec - 1, 1_000_000_000 - nsec)
                }
            }
        }
    }
}

impl From<Timespec> for SystemTime {
    fn from(ts: Timespec) -> Self {
        let nsec = ts.nsec.clamp(0, 999_999_999) as u32;
        if ts.sec >= 0 {
            UNIX_EPOCH + Duration::new(ts.sec as u64, nsec)
        } else {
            UNIX_EPOCH - Duration::from_secs(ts.sec.unsigned_abs()) + Duration::new(0, nsec)
        }
    }
}

/// File attributes, as in `struct stat`.
///
/// Fields that the bound platform's `stat` lacks (e.g. `birthtime` on
/// Linux) are ignored when the record is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stat {
    /// File type and permission bits (`S_IFDIR | 0o755`, ...).
    pub mode: u32,
    pub ino: u64,
    pub dev: u64,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub size: i64,
    /// Number of 512-byte blocks allocated.
    pub blocks: i64,
    pub blksize: i64,
    pub atime: Timespec,
    pub mtime: Timespec,
    pub ctime: Timespec,
    pub birthtime: Timespec,
    /// BSD file flags (`st_flags`).
    pub flags: u32,
    /// Inode generation (`st_gen`).
    pub generation: u64,
}

impl Stat {
    /// A directory with the given permission bits and `nlink` of 2.
    pub fn directory(perm: u32) -> Self {
        Self {
            mode: libc_mode::S_IFDIR | (perm & 0o7777),
            nlink: 2,
            ..Self::default()
        }
    }

    /// A regular file with the given permission bits and size.
    pub fn file(perm: u32, size: i64) -> Self {
        Self {
            mode: libc_mode::S_IFREG | (perm & 0o7777),
            nlink: 1,
            size,
            blocks: (size.max(0) as u64).div_ceil(512) as i64,
            ..Self::default()
        }
    }

    /// A symbolic link whose target is `target_len` bytes long.
    pub fn symlink(target_len: i64) -> Self {
        Self {
            mode: libc_mode::S_IFLNK | 0o777,
            nlink: 1,
            size: target_len,
            ..Self::default()
        }
    }

    /// Sets all three of atime, mtime and ctime.
    #[must_use]
    pub fn with_times(mut self, time: Timespec) -> Self {
        self.atime = time;
        self.mtime = time;
        self.ctime = time;
        self
    }

    pub fn is_dir(&self) -> bool {
        self.mode & libc_mode::S_IFMT == libc_mode::S_IFDIR
    }
}

/// File type bits with fixed POSIX values, independent of the host libc.
pub mod libc_mode {
    pub const S_IFMT: u32 = 0o170000;
    pub const S_IFDIR: u32 = 0o040000;
    pub const S_IFREG: u32 = 0o100000;
    pub const S_IFLNK: u32 = 0o120000;
}

/// How much of a `struct stat` the dispatcher writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatFill {
    /// Every field the platform layout has.
    #[default]
    Full,
    /// Only mode, nlink, uid, gid, size, blocks and the three timestamps.
    ///
    /// Saves marshalling work, but which fields the kernel consults varies
    /// between library versions; the rest are left zeroed.
    KernelSubset,
}

/// Filesystem statistics, as in `struct statvfs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatVfs {
    pub bsize: u64,
    pub frsize: u64,
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub favail: u64,
    pub fsid: u64,
    pub flag: u64,
    pub namemax: u64,
}

/// One entry produced by `readdir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: OsString,
    /// Attributes passed to the filler. Most libfuse versions only use the
    /// inode and type bits.
    pub attr: Option<Stat>,
    /// Offset of the next entry, or 0 to let libfuse buffer the listing.
    pub offset: i64,
}

impl DirEntry {
    pub fn new(name: impl Into<OsString>) -> Self {
        Self {
            name: name.into(),
            attr: None,
            offset: 0,
        }
    }

    #[must_use]
    pub fn with_attr(mut self, attr: Stat) -> Self {
        self.attr = Some(attr);
        self
    }

    #[must_use]
    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

impl From<&str> for DirEntry {
    fn from(name: &str) -> Self {
        DirEntry::new(name)
    }
}

impl From<String> for DirEntry {
    fn from(name: String) -> Self {
        DirEntry::new(name)
    }
}

impl From<OsString> for DirEntry {
    fn from(name: OsString) -> Self {
        DirEntry::new(name)
    }
}

/// POSIX record lock, as in `struct flock`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileLock {
    /// `F_RDLCK`, `F_WRLCK` or `F_UNLCK`.
    pub kind: i16,
    pub whence: i16,
    pub start: i64,
    pub len: i64,
    pub pid: i32,
}

/// Connection parameters negotiated in `init`.
///
/// Fields a library version lacks read as zero and are not written back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionInfo {
    pub proto_major: u32,
    pub proto_minor: u32,
    /// libfuse 2 only.
    pub async_read: u32,
    pub max_write: u32,
    /// libfuse 3 only.
    pub max_read: u32,
    pub max_readahead: u32,
    pub capable: u32,
    pub want: u32,
    pub max_background: u32,
    pub congestion_threshold: u32,
    /// libfuse 3 only.
    pub time_gran: u32,
}

/// The native `fuse_file_info` of the current call.
///
/// Handed to the `*_raw` methods of [`Operations`](crate::Operations)
/// (`open_raw`, `create_raw`, `read_raw`, `release_raw`, ...) when the
/// session runs with `raw_fi`. Changes are seen by libfuse after the call
/// returns. Flags the bound library lacks read as `false` and ignore
/// writes.
pub struct RawFileInfo<'a> {
    record: RecordMut<'a>,
    slots: &'a FileInfoSlots,
}

impl<'a> RawFileInfo<'a> {
    pub(crate) fn new(record: RecordMut<'a>, slots: &'a FileInfoSlots) -> Self {
        Self { record, slots }
    }

    /// `open(2)` flags.
    pub fn flags(&self) -> i32 {
        self.record.i64(self.slots.flags) as i32
    }

    pub fn fh(&self) -> FileHandle {
        FileHandle(self.record.u64(self.slots.fh))
    }

    pub fn set_fh(&mut self, fh: FileHandle) {
        self.record.set_u64(self.slots.fh, fh.0);
    }

    pub fn lock_owner(&self) -> u64 {
        self.record.u64(self.slots.lock_owner)
    }

    /// Requested `POLL*` events; 0 where the library has no such field.
    pub fn poll_events(&self) -> u32 {
        self.slots
            .poll_events
            .map_or(0, |slot| self.record.u64(slot) as u32)
    }

    fn get(&self, flag: Option<crate::schema::record::FlagSlot>) -> bool {
        flag.is_some_and(|slot| self.record.flag(slot))
    }

    fn set(&mut self, flag: Option<crate::schema::record::FlagSlot>, on: bool) {
        if let Some(slot) = flag {
            self.record.set_flag(slot, on);
        }
    }

    /// Bypass the page cache for this open file.
    pub fn direct_io(&self) -> bool {
        self.get(self.slots.direct_io)
    }

    pub fn set_direct_io(&mut self, on: bool) {
        self.set(self.slots.direct_io, on);
    }

    /// Keep previously cached data on open.
    pub fn keep_cache(&self) -> bool {
        self.get(self.slots.keep_cache)
    }

    pub fn set_keep_cache(&mut self, on: bool) {
        self.set(self.slots.keep_cache, on);
    }

    /// The file is not seekable.
    pub fn nonseekable(&self) -> bool {
        self.get(self.slots.nonseekable)
    }

    pub fn set_nonseekable(&mut self, on: bool) {
        self.set(self.slots.nonseekable, on);
    }
}

/// A pending `poll` wakeup (`struct fuse_pollhandle`).
///
/// [`Operations::poll`](crate::Operations::poll) receives ownership of it.
/// Dropping the handle releases it in libfuse.
pub struct PollHandle {
    ptr: NonNull<c_void>,
}

impl PollHandle {
    /// # Safety
    ///
    /// `ptr` must be NULL or a handle libfuse passed to `poll` that nothing
    /// else owns.
    pub(crate) unsafe fn from_raw(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self { ptr })
    }

    /// Wakes the caller waiting on this handle.
    ///
    /// Fails with `ENOSYS` when the bound library cannot notify.
    pub fn notify(&self) -> FuseResult<()> {
        let lib = loader::loaded().ok_or(FuseError::Errno(libc::ENOTCONN))?;
        // SAFETY: the handle stays live until `self` is dropped.
        match unsafe { lib.notify_poll(self.ptr.as_ptr()) } {
            None => Err(FuseError::Errno(libc::ENOSYS)),
            Some(0) => Ok(()),
            Some(rc) => Err(FuseError::Errno(-rc)),
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        if let Some(lib) = loader::loaded() {
            // SAFETY: the handle is owned by `self` and not used afterwards.
            unsafe { lib.destroy_pollhandle(self.ptr.as_ptr()) };
        }
    }
}

impl std::fmt::Debug for PollHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PollHandle").field(&self.ptr).finish()
    }
}

// SAFETY: libfuse allows notifying and destroying a poll handle from any
// thread.
unsafe impl Send for PollHandle {}
// SAFETY: `notify` only reads the pointer.
unsafe impl Sync for PollHandle {}

impl std::fmt::Debug for RawFileInfo<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawFileInfo")
            .field("flags", &self.flags())
            .field("fh", &self.fh())
            .field("direct_io", &self.direct_io())
            .field("keep_cache", &self.keep_cache())
            .field("nonseekable", &self.nonseekable())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timespec_from_system_time() {
        let t = UNIX_EPOCH + Duration::new(1_700_000_000, 250);
        assert_eq!(Timespec::from(t), Timespec::new(1_700_000_000, 250));
        assert_eq!(SystemTime::from(Timespec::new(1_700_000_000, 250)), t);
    }

    #[test]
    fn test_timespec_before_epoch() {
        let t = UNIX_EPOCH - Duration::new(1, 500_000_000);
        let ts = Timespec::from(t);
        assert_eq!(ts, Timespec::new(-2, 500_000_000));
        assert_eq!(SystemTime::from(ts), t);
    }

    #[test]
    fn test_utime_markers() {
        let now = Timespec::new(0, Timespec::UTIME_NOW);
        let omit = Timespec::new(0, Timespec::UTIME_OMIT);

        assert!(now.is_now());
        assert!(now.resolve().is_some());
        assert!(omit.is_omit());
        assert!(omit.resolve().is_none());
    }

    #[test]
    fn test_stat_constructors() {
        let dir = Stat::directory(0o755);
        assert!(dir.is_dir());
        assert_eq!(dir.mode, 0o040755);
        assert_eq!(dir.nlink, 2);

        let file = Stat::file(0o644, 1025);
        assert!(!file.is_dir());
        assert_eq!(file.blocks, 3);
    }

    #[test]
    fn test_dir_entry_from_name() {
        let entry = DirEntry::from("a");
        assert_eq!(entry.name, "a");
        assert_eq!(entry.attr, None);
        assert_eq!(entry.offset, 0);

        let entry = DirEntry::new("b").with_attr(Stat::file(0o600, 0)).with_offset(7);
        assert_eq!(entry.offset, 7);
        assert!(entry.attr.is_some());
    }
}
