//! The filesystem interface served by the dispatcher.
//!
//! Implement [`Operations`] and hand it to a [`Session`](crate::Session).
//! Every method has a default, so a read-only filesystem only needs
//! `getattr`, `readdir`, `open` and `read`. Methods return
//! [`FuseResult`]; an `Err(FuseError::Errno(e))` reaches the kernel as `-e`.
//!
//! Methods are called concurrently from libfuse worker threads unless the
//! session is single-threaded or serialized, hence `&self` and the
//! `Send + Sync` bound.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{FuseError, FuseResult};
use crate::types::{
    ConnectionInfo, DirEntry, FileHandle, FileLock, PollHandle, RawFileInfo, Stat, StatVfs,
    Timespec,
};

/// A registrable FUSE primitive.
///
/// Merged primitives cover more than one native slot: [`Primitive::Getattr`]
/// also fills `fgetattr`, [`Primitive::Truncate`] also fills `ftruncate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Getattr,
    Readlink,
    Mknod,
    Mkdir,
    Unlink,
    Rmdir,
    Symlink,
    Rename,
    Link,
    Chmod,
    Chown,
    Truncate,
    Open,
    Read,
    Write,
    Statfs,
    Flush,
    Release,
    Fsync,
    Setxattr,
    Getxattr,
    Listxattr,
    Removexattr,
    Opendir,
    Readdir,
    Releasedir,
    Fsyncdir,
    Init,
    Destroy,
    Access,
    Create,
    Lock,
    Utimens,
    Bmap,
    Flock,
    Fallocate,
    Ioctl,
    Poll,
}

impl Primitive {
    pub const ALL: [Primitive; 38] = [
        Primitive::Getattr,
        Primitive::Readlink,
        Primitive::Mknod,
        Primitive::Mkdir,
        Primitive::Unlink,
        Primitive::Rmdir,
        Primitive::Symlink,
        Primitive::Rename,
        Primitive::Link,
        Primitive::Chmod,
        Primitive::Chown,
        Primitive::Truncate,
        Primitive::Open,
        Primitive::Read,
        Primitive::Write,
        Primitive::Statfs,
        Primitive::Flush,
        Primitive::Release,
        Primitive::Fsync,
        Primitive::Setxattr,
        Primitive::Getxattr,
        Primitive::Listxattr,
        Primitive::Removexattr,
        Primitive::Opendir,
        Primitive::Readdir,
        Primitive::Releasedir,
        Primitive::Fsyncdir,
        Primitive::Init,
        Primitive::Destroy,
        Primitive::Access,
        Primitive::Create,
        Primitive::Lock,
        Primitive::Utimens,
        Primitive::Bmap,
        Primitive::Flock,
        Primitive::Fallocate,
        Primitive::Ioctl,
        Primitive::Poll,
    ];

    /// Name of the primary `fuse_operations` slot.
    pub fn name(self) -> &'static str {
        self.slots()[0]
    }

    /// Every `fuse_operations` slot this primitive fills.
    pub fn slots(self) -> &'static [&'static str] {
        match self {
            Primitive::Getattr => &["getattr", "fgetattr"],
            Primitive::Readlink => &["readlink"],
            Primitive::Mknod => &["mknod"],
            Primitive::Mkdir => &["mkdir"],
            Primitive::Unlink => &["unlink"],
            Primitive::Rmdir => &["rmdir"],
            Primitive::Symlink => &["symlink"],
            Primitive::Rename => &["rename"],
            Primitive::Link => &["link"],
            Primitive::Chmod => &["chmod"],
            Primitive::Chown => &["chown"],
            Primitive::Truncate => &["truncate", "ftruncate"],
            Primitive::Open => &["open"],
            Primitive::Read => &["read"],
            Primitive::Write => &["write"],
            Primitive::Statfs => &["statfs"],
            Primitive::Flush => &["flush"],
            Primitive::Release => &["release"],
            Primitive::Fsync => &["fsync"],
            Primitive::Setxattr => &["setxattr"],
            Primitive::Getxattr => &["getxattr"],
            Primitive::Listxattr => &["listxattr"],
            Primitive::Removexattr => &["removexattr"],
            Primitive::Opendir => &["opendir"],
            Primitive::Readdir => &["readdir"],
            Primitive::Releasedir => &["releasedir"],
            Primitive::Fsyncdir => &["fsyncdir"],
            Primitive::Init => &["init"],
            Primitive::Destroy => &["destroy"],
            Primitive::Access => &["access"],
            Primitive::Create => &["create"],
            Primitive::Lock => &["lock"],
            Primitive::Utimens => &["utimens"],
            Primitive::Bmap => &["bmap"],
            Primitive::Flock => &["flock"],
            Primitive::Fallocate => &["fallocate"],
            Primitive::Ioctl => &["ioctl"],
            Primitive::Poll => &["poll"],
        }
    }

    /// Looks up the primitive that fills a native slot.
    pub fn from_slot(slot: &str) -> Option<Primitive> {
        Self::ALL
            .into_iter()
            .find(|p| p.slots().contains(&slot))
    }

    /// Primitives registered whatever [`Operations::supports`] says.
    pub fn is_mandatory(self) -> bool {
        matches!(self, Primitive::Getattr | Primitive::Init | Primitive::Destroy)
    }

    /// Primitives left out of the table unless [`Operations::supports`]
    /// asks for them.
    ///
    /// A registered slot changes what libfuse negotiates: `lock` and `flock`
    /// switch the kernel from local to forwarded locking, and `create` stops
    /// the `mknod` + `open` emulation.
    pub fn is_opt_in(self) -> bool {
        matches!(
            self,
            Primitive::Create
                | Primitive::Lock
                | Primitive::Flock
                | Primitive::Fallocate
                | Primitive::Bmap
                | Primitive::Ioctl
                | Primitive::Poll
        )
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn errno<T>(e: i32) -> FuseResult<T> {
    Err(FuseError::Errno(e))
}

/// A user-space filesystem.
///
/// Paths are absolute within the mount (`/`, `/dir/file`). Methods that
/// act on an open file get `Option<&Path>`: the path is `None` when the
/// session enables `nullpath_ok` and libfuse no longer knows it.
#[allow(unused_variables)]
pub trait Operations: Send + Sync + 'static {
    /// Called once before any other method. Adjust `conn` to negotiate
    /// connection parameters; the fields are written back to libfuse.
    ///
    /// A failure is reported but does not abort the mount.
    fn init(&self, conn: &mut ConnectionInfo) -> FuseResult<()> {
        Ok(())
    }

    /// Called once at unmount, after every in-flight call has returned.
    fn destroy(&self) {}

    /// Attributes of `path`, or of the open file `fh` (`fgetattr`).
    ///
    /// The default reports `/` as an empty `0o755` directory and everything
    /// else as missing.
    fn getattr(&self, path: Option<&Path>, fh: Option<FileHandle>) -> FuseResult<Stat> {
        match path {
            Some(p) if p == Path::new("/") => Ok(Stat::directory(0o755)),
            _ => errno(libc::ENOENT),
        }
    }

    /// Target of a symbolic link.
    fn readlink(&self, path: &Path) -> FuseResult<PathBuf> {
        errno(libc::ENOENT)
    }

    fn mknod(&self, path: &Path, mode: u32, dev: u64) -> FuseResult<()> {
        errno(libc::EROFS)
    }

    fn mkdir(&self, path: &Path, mode: u32) -> FuseResult<()> {
        errno(libc::EROFS)
    }

    fn unlink(&self, path: &Path) -> FuseResult<()> {
        errno(libc::EROFS)
    }

    fn rmdir(&self, path: &Path) -> FuseResult<()> {
        errno(libc::EROFS)
    }

    /// Creates `link` pointing at `target`.
    fn symlink(&self, link: &Path, target: &Path) -> FuseResult<()> {
        errno(libc::EROFS)
    }

    /// `flags` carries `RENAME_NOREPLACE`/`RENAME_EXCHANGE` on libfuse 3 and
    /// is always 0 on libfuse 2.
    fn rename(&self, from: &Path, to: &Path, flags: u32) -> FuseResult<()> {
        errno(libc::EROFS)
    }

    /// Creates the hard link `link` to the existing `target`.
    fn link(&self, link: &Path, target: &Path) -> FuseResult<()> {
        errno(libc::EROFS)
    }

    fn chmod(&self, path: Option<&Path>, mode: u32, fh: Option<FileHandle>) -> FuseResult<()> {
        errno(libc::EROFS)
    }

    /// `None` for an id the caller left unchanged.
    fn chown(
        &self,
        path: Option<&Path>,
        uid: Option<u32>,
        gid: Option<u32>,
        fh: Option<FileHandle>,
    ) -> FuseResult<()> {
        errno(libc::EROFS)
    }

    /// Resizes `path`, or the open file `fh` (`ftruncate`).
    fn truncate(&self, path: Option<&Path>, size: i64, fh: Option<FileHandle>) -> FuseResult<()> {
        errno(libc::EROFS)
    }

    /// Sets access and modification time. `None` means "now" (a NULL
    /// `times` array); individual entries may carry
    /// [`Timespec::UTIME_NOW`] or [`Timespec::UTIME_OMIT`].
    fn utimens(
        &self,
        path: Option<&Path>,
        times: Option<(Timespec, Timespec)>,
        fh: Option<FileHandle>,
    ) -> FuseResult<()> {
        Ok(())
    }

    /// Opens a file and returns its handle. `flags` are the `open(2)`
    /// flags without `O_CREAT`, `O_EXCL` and `O_NOCTTY`.
    fn open(&self, path: &Path, flags: i32) -> FuseResult<FileHandle> {
        Ok(FileHandle(0))
    }

    /// `open` with direct access to the native `fuse_file_info`. Only
    /// called when the session runs with `raw_fi`.
    fn open_raw(&self, path: &Path, fi: &mut RawFileInfo<'_>) -> FuseResult<()> {
        let fh = self.open(path, fi.flags())?;
        fi.set_fh(fh);
        Ok(())
    }

    /// Fills `buf` from `offset` and returns the number of bytes read.
    fn read(
        &self,
        path: Option<&Path>,
        buf: &mut [u8],
        offset: i64,
        fh: FileHandle,
    ) -> FuseResult<usize> {
        errno(libc::EIO)
    }

    /// Writes `data` at `offset` and returns the number of bytes written.
    fn write(
        &self,
        path: Option<&Path>,
        data: &[u8],
        offset: i64,
        fh: FileHandle,
    ) -> FuseResult<usize> {
        errno(libc::EROFS)
    }

    fn statfs(&self, path: &Path) -> FuseResult<StatVfs> {
        Ok(StatVfs::default())
    }

    /// Called on every `close(2)` of a descriptor for the open file.
    fn flush(&self, path: Option<&Path>, fh: FileHandle) -> FuseResult<()> {
        Ok(())
    }

    /// Called once when the last descriptor is closed. The result is
    /// ignored by the kernel.
    fn release(&self, path: Option<&Path>, fh: FileHandle) -> FuseResult<()> {
        Ok(())
    }

    fn fsync(&self, path: Option<&Path>, datasync: bool, fh: FileHandle) -> FuseResult<()> {
        Ok(())
    }

    /// `position` is the resource fork offset on macOS and 0 elsewhere.
    fn setxattr(
        &self,
        path: &Path,
        name: &OsStr,
        value: &[u8],
        flags: i32,
        position: u32,
    ) -> FuseResult<()> {
        errno(libc::ENOTSUP)
    }

    /// Full value of the attribute. Size negotiation with the caller is
    /// handled by the dispatcher.
    fn getxattr(&self, path: &Path, name: &OsStr, position: u32) -> FuseResult<Vec<u8>> {
        errno(libc::ENOTSUP)
    }

    fn listxattr(&self, path: &Path) -> FuseResult<Vec<OsString>> {
        Ok(Vec::new())
    }

    fn removexattr(&self, path: &Path, name: &OsStr) -> FuseResult<()> {
        errno(libc::ENOTSUP)
    }

    fn opendir(&self, path: &Path) -> FuseResult<FileHandle> {
        Ok(FileHandle(0))
    }

    /// Entries of the directory, `.` and `..` included.
    fn readdir(&self, path: Option<&Path>, fh: FileHandle) -> FuseResult<Vec<DirEntry>> {
        Ok(vec![DirEntry::from("."), DirEntry::from("..")])
    }

    fn releasedir(&self, path: Option<&Path>, fh: FileHandle) -> FuseResult<()> {
        Ok(())
    }

    fn fsyncdir(&self, path: Option<&Path>, datasync: bool, fh: FileHandle) -> FuseResult<()> {
        Ok(())
    }

    /// Permission check for `access(2)`. Not called when mounted with
    /// `default_permissions`.
    fn access(&self, path: &Path, mask: i32) -> FuseResult<()> {
        Ok(())
    }

    /// Creates and opens a regular file.
    fn create(&self, path: &Path, mode: u32, flags: i32) -> FuseResult<FileHandle> {
        errno(libc::EROFS)
    }

    /// `create` with direct access to the native `fuse_file_info`. Only
    /// called when the session runs with `raw_fi`.
    fn create_raw(&self, path: &Path, mode: u32, fi: &mut RawFileInfo<'_>) -> FuseResult<()> {
        let fh = self.create(path, mode, fi.flags())?;
        fi.set_fh(fh);
        Ok(())
    }

    /// `getattr` of an open file, with its native `fuse_file_info`.
    ///
    /// This and the other `*_raw` methods below are only called when the
    /// session runs with `raw_fi` and libfuse passed a `fuse_file_info`.
    /// The defaults read the handle and delegate to the plain method.
    fn getattr_raw(&self, path: Option<&Path>, fi: &mut RawFileInfo<'_>) -> FuseResult<Stat> {
        self.getattr(path, Some(fi.fh()))
    }

    fn truncate_raw(
        &self,
        path: Option<&Path>,
        size: i64,
        fi: &mut RawFileInfo<'_>,
    ) -> FuseResult<()> {
        self.truncate(path, size, Some(fi.fh()))
    }

    fn read_raw(
        &self,
        path: Option<&Path>,
        buf: &mut [u8],
        offset: i64,
        fi: &mut RawFileInfo<'_>,
    ) -> FuseResult<usize> {
        self.read(path, buf, offset, fi.fh())
    }

    fn write_raw(
        &self,
        path: Option<&Path>,
        data: &[u8],
        offset: i64,
        fi: &mut RawFileInfo<'_>,
    ) -> FuseResult<usize> {
        self.write(path, data, offset, fi.fh())
    }

    /// `fi.lock_owner()` identifies the closing descriptor's owner.
    fn flush_raw(&self, path: Option<&Path>, fi: &mut RawFileInfo<'_>) -> FuseResult<()> {
        self.flush(path, fi.fh())
    }

    fn release_raw(&self, path: Option<&Path>, fi: &mut RawFileInfo<'_>) -> FuseResult<()> {
        self.release(path, fi.fh())
    }

    fn fsync_raw(
        &self,
        path: Option<&Path>,
        datasync: bool,
        fi: &mut RawFileInfo<'_>,
    ) -> FuseResult<()> {
        self.fsync(path, datasync, fi.fh())
    }

    fn lock_raw(
        &self,
        path: Option<&Path>,
        fi: &mut RawFileInfo<'_>,
        cmd: i32,
        lock: Option<&mut FileLock>,
    ) -> FuseResult<()> {
        self.lock(path, fi.fh(), cmd, lock)
    }

    /// POSIX record locking (`F_GETLK`, `F_SETLK`, `F_SETLKW`). `lock` is
    /// `None` where the platform's `struct flock` is not decoded; changes
    /// to it are written back for `F_GETLK`.
    fn lock(
        &self,
        path: Option<&Path>,
        fh: FileHandle,
        cmd: i32,
        lock: Option<&mut FileLock>,
    ) -> FuseResult<()> {
        errno(libc::ENOSYS)
    }

    /// Maps block `idx` of a block-device-backed file to a device block.
    fn bmap(&self, path: &Path, blocksize: u64, idx: u64) -> FuseResult<u64> {
        errno(libc::ENOSYS)
    }

    /// BSD `flock(2)`; `op` is `LOCK_SH`, `LOCK_EX` or `LOCK_UN`, possibly
    /// with `LOCK_NB`.
    fn flock(&self, path: Option<&Path>, fh: FileHandle, op: i32) -> FuseResult<()> {
        errno(libc::ENOSYS)
    }

    fn fallocate(
        &self,
        path: Option<&Path>,
        mode: i32,
        offset: i64,
        len: i64,
        fh: FileHandle,
    ) -> FuseResult<()> {
        errno(libc::ENOSYS)
    }

    /// Device-specific request on an open file.
    ///
    /// `data` is the in/out argument buffer libfuse copied from the caller,
    /// sized by the `_IOC_SIZE` bits of `cmd`; it is empty for commands that
    /// carry no data. `flags` holds `FUSE_IOCTL_*` bits. The returned value
    /// becomes the result of `ioctl(2)`.
    fn ioctl(
        &self,
        path: Option<&Path>,
        cmd: u32,
        arg: usize,
        fh: FileHandle,
        flags: u32,
        data: &mut [u8],
    ) -> FuseResult<u32> {
        errno(libc::ENOTTY)
    }

    /// Readiness of an open file. Returns the ready `POLL*` bits out of
    /// `events` (0 where the library does not report the requested set).
    ///
    /// `handle` is present when the caller wants a wakeup; keep it and call
    /// [`PollHandle::notify`] once the file becomes ready. Dropping it
    /// releases the native handle.
    fn poll(
        &self,
        path: Option<&Path>,
        fh: FileHandle,
        events: u32,
        handle: Option<PollHandle>,
    ) -> FuseResult<u32> {
        errno(libc::ENOSYS)
    }

    /// Whether `primitive` gets a slot in the operation table.
    ///
    /// Unsupported primitives are left NULL so libfuse applies its own
    /// fallback (e.g. kernel-local locking, or emulating `create` with
    /// `mknod` and `open`). The default supports everything except the
    /// [`Primitive::is_opt_in`] set; override it to register those.
    /// [`Primitive::is_mandatory`] primitives are always registered.
    fn supports(&self, primitive: Primitive) -> bool {
        !primitive.is_opt_in()
    }
}
