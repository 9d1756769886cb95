//! Argument decoding and reply encoding for each primitive.
//!
//! These functions sit between the `extern "C"` entry points and the
//! dispatcher. They take native pointers as libfuse passes them, with the
//! version-specific signatures already normalized, so they can be driven
//! directly from tests with plain buffers.
//!
//! All pointer access happens inside [`Dispatcher::call`], so a bad
//! argument turns into an errno rather than unwinding into C.

use std::ffi::{CStr, c_char, c_int, c_void};
use std::ptr;

use anyhow::anyhow;
use tracing::warn;

use crate::dispatch::Dispatcher;
use crate::error::{FuseError, FuseResult};
use crate::operations::{Operations, Primitive};
use crate::path;
use crate::schema::record::{RecordBuf, RecordMut, RecordRef, ScalarSlot, TimeSlot};
use crate::types::{FileHandle, FileLock, PollHandle, RawFileInfo};

/// Bytes of a C string, without the NUL. `None` for NULL.
///
/// # Safety
///
/// `p` must be NULL or point to a NUL-terminated string that outlives `'a`.
pub(crate) unsafe fn cbytes<'a>(p: *const c_char) -> Option<&'a [u8]> {
    // SAFETY: guaranteed by the caller.
    (!p.is_null()).then(|| unsafe { CStr::from_ptr(p) }.to_bytes())
}

fn len_reply(n: usize) -> FuseResult<c_int> {
    c_int::try_from(n).map_err(|_| FuseError::Errno(libc::E2BIG))
}

/// # Safety
///
/// `fi` must be NULL or point to a `fuse_file_info` of the schema's layout.
unsafe fn file_info<'a, O: Operations>(d: &Dispatcher<O>, fi: *mut c_void) -> Option<RecordMut<'a>> {
    if fi.is_null() {
        return None;
    }
    let schema = d.schema();
    // SAFETY: guaranteed by the caller.
    Some(unsafe {
        RecordMut::from_raw(fi.cast(), schema.file_info().size(), schema.big_endian())
    })
}

/// # Safety
///
/// As for [`file_info`].
unsafe fn handle<O: Operations>(d: &Dispatcher<O>, fi: *mut c_void) -> Option<FileHandle> {
    // SAFETY: guaranteed by the caller.
    unsafe { file_info(d, fi) }.map(|r| FileHandle(r.u64(d.schema().file_info_slots.fh)))
}

/// # Safety
///
/// As for [`file_info`].
unsafe fn handle_or_zero<O: Operations>(d: &Dispatcher<O>, fi: *mut c_void) -> FileHandle {
    // SAFETY: guaranteed by the caller.
    unsafe { handle(d, fi) }.unwrap_or_default()
}

/// The [`RawFileInfo`] view of `fi` when the session runs with `raw_fi`.
///
/// # Safety
///
/// As for [`file_info`].
unsafe fn raw_file_info<'a, O: Operations>(
    d: &'a Dispatcher<O>,
    fi: *mut c_void,
) -> Option<RawFileInfo<'a>> {
    if !d.options().raw_fi {
        return None;
    }
    // SAFETY: guaranteed by the caller.
    unsafe { file_info(d, fi) }.map(|record| RawFileInfo::new(record, &d.schema().file_info_slots))
}

fn decode_name<'a, O: Operations>(
    d: &Dispatcher<O>,
    name: Option<&'a [u8]>,
) -> FuseResult<&'a std::ffi::OsStr> {
    let name = name.ok_or_else(|| FuseError::InvalidPath("NULL attribute name".into()))?;
    path::decode_os(name, d.options().encoding)
}

/// Copies `data` into a caller buffer using the two-phase size protocol.
///
/// # Safety
///
/// `buf` must be NULL or valid for `size` bytes.
unsafe fn reply_sized(data: &[u8], buf: *mut c_char, size: usize) -> FuseResult<c_int> {
    let len = len_reply(data.len())?;
    if buf.is_null() || size == 0 {
        return Ok(len);
    }
    if data.len() > size {
        return Err(FuseError::Errno(libc::ERANGE));
    }
    // SAFETY: `buf` holds `size >= data.len()` bytes.
    unsafe { ptr::copy_nonoverlapping(data.as_ptr(), buf.cast::<u8>(), data.len()) };
    Ok(len)
}

/// # Safety
///
/// `path` is NULL or a C string; `st` points to a `struct stat`; `fi` is
/// NULL or a `fuse_file_info`.
pub(crate) unsafe fn getattr<O: Operations>(
    d: &Dispatcher<O>,
    path: *const c_char,
    st: *mut c_void,
    fi: *mut c_void,
) -> c_int {
    // SAFETY: guaranteed by the caller.
    let raw = unsafe { cbytes(path) };
    d.call(Primitive::Getattr, raw, || {
        let p = d.decode_opt(raw)?;
        // SAFETY: guaranteed by the caller.
        let attr = match unsafe { raw_file_info(d, fi) } {
            Some(mut raw_fi) => d.operations().getattr_raw(p, &mut raw_fi)?,
            // SAFETY: guaranteed by the caller.
            None => d.operations().getattr(p, unsafe { handle(d, fi) })?,
        };
        if st.is_null() {
            return Err(FuseError::Errno(libc::EFAULT));
        }
        let schema = d.schema();
        // SAFETY: `st` is a `struct stat` of the schema's layout.
        let mut record =
            unsafe { RecordMut::from_raw(st.cast(), schema.stat().size(), schema.big_endian()) };
        d.write_stat(&mut record, &attr);
        Ok(0)
    })
}

/// # Safety
///
/// `path` is NULL or a C string; `buf` is valid for `size` bytes.
pub(crate) unsafe fn readlink<O: Operations>(
    d: &Dispatcher<O>,
    path: *const c_char,
    buf: *mut c_char,
    size: usize,
) -> c_int {
    // SAFETY: guaranteed by the caller.
    let raw = unsafe { cbytes(path) };
    d.call(Primitive::Readlink, raw, || {
        let target = d.operations().readlink(d.decode(raw)?)?;
        let bytes = path::encode_bytes(target.as_os_str(), d.options().encoding)?;
        if buf.is_null() || size == 0 {
            return Ok(0);
        }
        let n = bytes.len().min(size - 1);
        // SAFETY: `buf` holds `size > n` bytes.
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), buf.cast::<u8>(), n);
            *buf.add(n) = 0;
        }
        Ok(0)
    })
}

/// # Safety
///
/// `path` is NULL or a C string.
pub(crate) unsafe fn mknod<O: Operations>(
    d: &Dispatcher<O>,
    path: *const c_char,
    mode: u32,
    dev: u64,
) -> c_int {
    // SAFETY: guaranteed by the caller.
    let raw = unsafe { cbytes(path) };
    d.call(Primitive::Mknod, raw, || {
        d.operations().mknod(d.decode(raw)?, mode, dev)?;
        Ok(0)
    })
}

/// # Safety
///
/// `path` is NULL or a C string.
pub(crate) unsafe fn mkdir<O: Operations>(d: &Dispatcher<O>, path: *const c_char, mode: u32) -> c_int {
    // SAFETY: guaranteed by the caller.
    let raw = unsafe { cbytes(path) };
    d.call(Primitive::Mkdir, raw, || {
        d.operations().mkdir(d.decode(raw)?, mode)?;
        Ok(0)
    })
}

/// # Safety
///
/// `path` is NULL or a C string.
pub(crate) unsafe fn unlink<O: Operations>(d: &Dispatcher<O>, path: *const c_char) -> c_int {
    // SAFETY: guaranteed by the caller.
    let raw = unsafe { cbytes(path) };
    d.call(Primitive::Unlink, raw, || {
        d.operations().unlink(d.decode(raw)?)?;
        Ok(0)
    })
}

/// # Safety
///
/// `path` is NULL or a C string.
pub(crate) unsafe fn rmdir<O: Operations>(d: &Dispatcher<O>, path: *const c_char) -> c_int {
    // SAFETY: guaranteed by the caller.
    let raw = unsafe { cbytes(path) };
    d.call(Primitive::Rmdir, raw, || {
        d.operations().rmdir(d.decode(raw)?)?;
        Ok(0)
    })
}

/// `symlink(target, linkpath)` in native argument order.
///
/// # Safety
///
/// Both pointers are NULL or C strings.
pub(crate) unsafe fn symlink<O: Operations>(
    d: &Dispatcher<O>,
    target: *const c_char,
    link: *const c_char,
) -> c_int {
    // SAFETY: guaranteed by the caller.
    let (raw_target, raw_link) = unsafe { (cbytes(target), cbytes(link)) };
    d.call(Primitive::Symlink, raw_link, || {
        // The target is free-form text, not a path inside the mount.
        let target = d.decode(raw_target)?;
        d.operations().symlink(d.decode(raw_link)?, target)?;
        Ok(0)
    })
}

/// # Safety
///
/// Both pointers are NULL or C strings.
pub(crate) unsafe fn rename<O: Operations>(
    d: &Dispatcher<O>,
    from: *const c_char,
    to: *const c_char,
    flags: u32,
) -> c_int {
    // SAFETY: guaranteed by the caller.
    let (raw_from, raw_to) = unsafe { (cbytes(from), cbytes(to)) };
    d.call(Primitive::Rename, raw_from, || {
        d.operations()
            .rename(d.decode(raw_from)?, d.decode(raw_to)?, flags)?;
        Ok(0)
    })
}

/// `link(oldpath, newpath)` in native argument order.
///
/// # Safety
///
/// Both pointers are NULL or C strings.
pub(crate) unsafe fn link<O: Operations>(
    d: &Dispatcher<O>,
    target: *const c_char,
    link: *const c_char,
) -> c_int {
    // SAFETY: guaranteed by the caller.
    let (raw_target, raw_link) = unsafe { (cbytes(target), cbytes(link)) };
    d.call(Primitive::Link, raw_link, || {
        d.operations()
            .link(d.decode(raw_link)?, d.decode(raw_target)?)?;
        Ok(0)
    })
}

/// # Safety
///
/// `path` is NULL or a C string; `fi` is NULL or a `fuse_file_info`.
pub(crate) unsafe fn chmod<O: Operations>(
    d: &Dispatcher<O>,
    path: *const c_char,
    mode: u32,
    fi: *mut c_void,
) -> c_int {
    // SAFETY: guaranteed by the caller.
    let raw = unsafe { cbytes(path) };
    d.call(Primitive::Chmod, raw, || {
        // SAFETY: guaranteed by the caller.
        let fh = unsafe { handle(d, fi) };
        d.operations().chmod(d.decode_opt(raw)?, mode, fh)?;
        Ok(0)
    })
}

/// `uid`/`gid` of `u32::MAX` (`(uid_t)-1`) mean "unchanged".
///
/// # Safety
///
/// `path` is NULL or a C string; `fi` is NULL or a `fuse_file_info`.
pub(crate) unsafe fn chown<O: Operations>(
    d: &Dispatcher<O>,
    path: *const c_char,
    uid: u32,
    gid: u32,
    fi: *mut c_void,
) -> c_int {
    // SAFETY: guaranteed by the caller.
    let raw = unsafe { cbytes(path) };
    d.call(Primitive::Chown, raw, || {
        let uid = (uid != u32::MAX).then_some(uid);
        let gid = (gid != u32::MAX).then_some(gid);
        // SAFETY: guaranteed by the caller.
        let fh = unsafe { handle(d, fi) };
        d.operations().chown(d.decode_opt(raw)?, uid, gid, fh)?;
        Ok(0)
    })
}

/// Serves both `truncate` and `ftruncate`.
///
/// # Safety
///
/// `path` is NULL or a C string; `fi` is NULL or a `fuse_file_info`.
pub(crate) unsafe fn truncate<O: Operations>(
    d: &Dispatcher<O>,
    path: *const c_char,
    size: i64,
    fi: *mut c_void,
) -> c_int {
    // SAFETY: guaranteed by the caller.
    let raw = unsafe { cbytes(path) };
    d.call(Primitive::Truncate, raw, || {
        let p = d.decode_opt(raw)?;
        // SAFETY: guaranteed by the caller.
        match unsafe { raw_file_info(d, fi) } {
            Some(mut raw_fi) => d.operations().truncate_raw(p, size, &mut raw_fi)?,
            // SAFETY: guaranteed by the caller.
            None => d.operations().truncate(p, size, unsafe { handle(d, fi) })?,
        }
        Ok(0)
    })
}

fn shifted(slot: TimeSlot, by: usize) -> TimeSlot {
    let shift = |s: ScalarSlot| ScalarSlot {
        offset: s.offset + by,
        ..s
    };
    TimeSlot {
        sec: shift(slot.sec),
        nsec: shift(slot.nsec),
    }
}

/// # Safety
///
/// `path` is NULL or a C string; `tv` is NULL or two `struct timespec`;
/// `fi` is NULL or a `fuse_file_info`.
pub(crate) unsafe fn utimens<O: Operations>(
    d: &Dispatcher<O>,
    path: *const c_char,
    tv: *const c_void,
    fi: *mut c_void,
) -> c_int {
    // SAFETY: guaranteed by the caller.
    let raw = unsafe { cbytes(path) };
    d.call(Primitive::Utimens, raw, || {
        let times = if tv.is_null() {
            None
        } else {
            let schema = d.schema();
            let size = schema.timespec().size();
            // SAFETY: `tv` is an array of two timespecs.
            let record =
                unsafe { RecordRef::from_raw(tv.cast(), 2 * size, schema.big_endian()) };
            let slot = schema.timespec_slot;
            Some((record.time(slot), record.time(shifted(slot, size))))
        };
        // SAFETY: guaranteed by the caller.
        let fh = unsafe { handle(d, fi) };
        d.operations().utimens(d.decode_opt(raw)?, times, fh)?;
        Ok(0)
    })
}

/// Serves `open`, storing the returned handle in `fi->fh`.
///
/// # Safety
///
/// `path` is NULL or a C string; `fi` is NULL or a `fuse_file_info`.
pub(crate) unsafe fn open<O: Operations>(
    d: &Dispatcher<O>,
    path: *const c_char,
    fi: *mut c_void,
) -> c_int {
    // SAFETY: guaranteed by the caller.
    let raw = unsafe { cbytes(path) };
    d.call(Primitive::Open, raw, || {
        let p = d.decode(raw)?;
        // SAFETY: guaranteed by the caller.
        let mut record =
            unsafe { file_info(d, fi) }.ok_or(FuseError::Errno(libc::EINVAL))?;
        let slots = &d.schema().file_info_slots;
        if d.options().raw_fi {
            d.operations()
                .open_raw(p, &mut RawFileInfo::new(record, slots))?;
        } else {
            let flags = record.i64(slots.flags) as i32;
            let fh = d.operations().open(p, flags)?;
            record.set_u64(slots.fh, fh.0);
        }
        Ok(0)
    })
}

/// # Safety
///
/// `path` is NULL or a C string; `buf` is valid for `size` bytes; `fi` is
/// NULL or a `fuse_file_info`.
pub(crate) unsafe fn read<O: Operations>(
    d: &Dispatcher<O>,
    path: *const c_char,
    buf: *mut c_char,
    size: usize,
    offset: i64,
    fi: *mut c_void,
) -> c_int {
    // SAFETY: guaranteed by the caller.
    let raw = unsafe { cbytes(path) };
    d.call(Primitive::Read, raw, || {
        let p = d.decode_opt(raw)?;
        // libfuse hands over uninitialized memory; a `&mut [u8]` must not
        // expose it.
        let out: &mut [u8] = if buf.is_null() || size == 0 {
            &mut []
        } else {
            // SAFETY: `buf` is valid for `size` bytes and zeroed before the
            // slice is formed.
            unsafe {
                ptr::write_bytes(buf, 0, size);
                std::slice::from_raw_parts_mut(buf.cast::<u8>(), size)
            }
        };
        // SAFETY: guaranteed by the caller.
        let n = match unsafe { raw_file_info(d, fi) } {
            Some(mut raw_fi) => d.operations().read_raw(p, out, offset, &mut raw_fi)?,
            // SAFETY: guaranteed by the caller.
            None => d.operations().read(p, out, offset, unsafe { handle_or_zero(d, fi) })?,
        };
        if n > size {
            return Err(anyhow!("read returned {n} bytes for a {size} byte buffer").into());
        }
        len_reply(n)
    })
}

/// # Safety
///
/// `path` is NULL or a C string; `buf` is valid for `size` bytes; `fi` is
/// NULL or a `fuse_file_info`.
pub(crate) unsafe fn write<O: Operations>(
    d: &Dispatcher<O>,
    path: *const c_char,
    buf: *const c_char,
    size: usize,
    offset: i64,
    fi: *mut c_void,
) -> c_int {
    // SAFETY: guaranteed by the caller.
    let raw = unsafe { cbytes(path) };
    d.call(Primitive::Write, raw, || {
        let p = d.decode_opt(raw)?;
        let data: &[u8] = if buf.is_null() || size == 0 {
            &[]
        } else {
            // SAFETY: `buf` is valid for `size` bytes.
            unsafe { std::slice::from_raw_parts(buf.cast::<u8>(), size) }
        };
        // SAFETY: guaranteed by the caller.
        let n = match unsafe { raw_file_info(d, fi) } {
            Some(mut raw_fi) => d.operations().write_raw(p, data, offset, &mut raw_fi)?,
            // SAFETY: guaranteed by the caller.
            None => d.operations().write(p, data, offset, unsafe { handle_or_zero(d, fi) })?,
        };
        if n > size {
            return Err(anyhow!("write reported {n} bytes for a {size} byte buffer").into());
        }
        len_reply(n)
    })
}

/// # Safety
///
/// `path` is NULL or a C string; `stv` points to a `struct statvfs`.
pub(crate) unsafe fn statfs<O: Operations>(
    d: &Dispatcher<O>,
    path: *const c_char,
    stv: *mut c_void,
) -> c_int {
    // SAFETY: guaranteed by the caller.
    let raw = unsafe { cbytes(path) };
    d.call(Primitive::Statfs, raw, || {
        let vfs = d.operations().statfs(d.decode(raw)?)?;
        if stv.is_null() {
            return Err(FuseError::Errno(libc::EFAULT));
        }
        let schema = d.schema();
        // SAFETY: `stv` is a `struct statvfs` of the schema's layout.
        let mut record = unsafe {
            RecordMut::from_raw(stv.cast(), schema.statvfs().size(), schema.big_endian())
        };
        d.write_statvfs(&mut record, &vfs);
        Ok(0)
    })
}

/// # Safety
///
/// `path` is NULL or a C string; `fi` is NULL or a `fuse_file_info`.
pub(crate) unsafe fn flush<O: Operations>(
    d: &Dispatcher<O>,
    path: *const c_char,
    fi: *mut c_void,
) -> c_int {
    // SAFETY: guaranteed by the caller.
    let raw = unsafe { cbytes(path) };
    d.call(Primitive::Flush, raw, || {
        let p = d.decode_opt(raw)?;
        // SAFETY: guaranteed by the caller.
        match unsafe { raw_file_info(d, fi) } {
            Some(mut raw_fi) => d.operations().flush_raw(p, &mut raw_fi)?,
            // SAFETY: guaranteed by the caller.
            None => d.operations().flush(p, unsafe { handle_or_zero(d, fi) })?,
        }
        Ok(0)
    })
}

/// # Safety
///
/// `path` is NULL or a C string; `fi` is NULL or a `fuse_file_info`.
pub(crate) unsafe fn release<O: Operations>(
    d: &Dispatcher<O>,
    path: *const c_char,
    fi: *mut c_void,
) -> c_int {
    // SAFETY: guaranteed by the caller.
    let raw = unsafe { cbytes(path) };
    d.call(Primitive::Release, raw, || {
        let p = d.decode_opt(raw)?;
        // SAFETY: guaranteed by the caller.
        match unsafe { raw_file_info(d, fi) } {
            Some(mut raw_fi) => d.operations().release_raw(p, &mut raw_fi)?,
            // SAFETY: guaranteed by the caller.
            None => d.operations().release(p, unsafe { handle_or_zero(d, fi) })?,
        }
        Ok(0)
    })
}

/// # Safety
///
/// `path` is NULL or a C string; `fi` is NULL or a `fuse_file_info`.
pub(crate) unsafe fn fsync<O: Operations>(
    d: &Dispatcher<O>,
    path: *const c_char,
    datasync: c_int,
    fi: *mut c_void,
) -> c_int {
    // SAFETY: guaranteed by the caller.
    let raw = unsafe { cbytes(path) };
    d.call(Primitive::Fsync, raw, || {
        let p = d.decode_opt(raw)?;
        let datasync = datasync != 0;
        // SAFETY: guaranteed by the caller.
        match unsafe { raw_file_info(d, fi) } {
            Some(mut raw_fi) => d.operations().fsync_raw(p, datasync, &mut raw_fi)?,
            // SAFETY: guaranteed by the caller.
            None => d.operations().fsync(p, datasync, unsafe { handle_or_zero(d, fi) })?,
        }
        Ok(0)
    })
}

/// # Safety
///
/// `path` and `name` are NULL or C strings; `value` is valid for `size`
/// bytes.
pub(crate) unsafe fn setxattr<O: Operations>(
    d: &Dispatcher<O>,
    path: *const c_char,
    name: *const c_char,
    value: *const c_char,
    size: usize,
    flags: c_int,
    position: u32,
) -> c_int {
    // SAFETY: guaranteed by the caller.
    let (raw, raw_name) = unsafe { (cbytes(path), cbytes(name)) };
    d.call(Primitive::Setxattr, raw, || {
        let name = decode_name(d, raw_name)?;
        let value: &[u8] = if value.is_null() || size == 0 {
            &[]
        } else {
            // SAFETY: `value` is valid for `size` bytes.
            unsafe { std::slice::from_raw_parts(value.cast::<u8>(), size) }
        };
        d.operations()
            .setxattr(d.decode(raw)?, name, value, flags, position)?;
        Ok(0)
    })
}

/// Returns the value length; copies the value when `size` is non-zero.
///
/// # Safety
///
/// `path` and `name` are NULL or C strings; `value` is NULL or valid for
/// `size` bytes.
pub(crate) unsafe fn getxattr<O: Operations>(
    d: &Dispatcher<O>,
    path: *const c_char,
    name: *const c_char,
    value: *mut c_char,
    size: usize,
    position: u32,
) -> c_int {
    // SAFETY: guaranteed by the caller.
    let (raw, raw_name) = unsafe { (cbytes(path), cbytes(name)) };
    d.call(Primitive::Getxattr, raw, || {
        let name = decode_name(d, raw_name)?;
        let data = d.operations().getxattr(d.decode(raw)?, name, position)?;
        // SAFETY: guaranteed by the caller.
        unsafe { reply_sized(&data, value, size) }
    })
}

/// Returns the length of the NUL-separated name list; copies it when
/// `size` is non-zero.
///
/// # Safety
///
/// `path` is NULL or a C string; `list` is NULL or valid for `size` bytes.
pub(crate) unsafe fn listxattr<O: Operations>(
    d: &Dispatcher<O>,
    path: *const c_char,
    list: *mut c_char,
    size: usize,
) -> c_int {
    // SAFETY: guaranteed by the caller.
    let raw = unsafe { cbytes(path) };
    d.call(Primitive::Listxattr, raw, || {
        let names = d.operations().listxattr(d.decode(raw)?)?;
        let mut data = Vec::new();
        for name in &names {
            data.extend_from_slice(path::encode(name, d.options().encoding)?.as_bytes_with_nul());
        }
        // SAFETY: guaranteed by the caller.
        unsafe { reply_sized(&data, list, size) }
    })
}

/// # Safety
///
/// `path` and `name` are NULL or C strings.
pub(crate) unsafe fn removexattr<O: Operations>(
    d: &Dispatcher<O>,
    path: *const c_char,
    name: *const c_char,
) -> c_int {
    // SAFETY: guaranteed by the caller.
    let (raw, raw_name) = unsafe { (cbytes(path), cbytes(name)) };
    d.call(Primitive::Removexattr, raw, || {
        let name = decode_name(d, raw_name)?;
        d.operations().removexattr(d.decode(raw)?, name)?;
        Ok(0)
    })
}

/// # Safety
///
/// `path` is NULL or a C string; `fi` is NULL or a `fuse_file_info`.
pub(crate) unsafe fn opendir<O: Operations>(
    d: &Dispatcher<O>,
    path: *const c_char,
    fi: *mut c_void,
) -> c_int {
    // SAFETY: guaranteed by the caller.
    let raw = unsafe { cbytes(path) };
    d.call(Primitive::Opendir, raw, || {
        let fh = d.operations().opendir(d.decode(raw)?)?;
        // SAFETY: guaranteed by the caller.
        if let Some(mut record) = unsafe { file_info(d, fi) } {
            record.set_u64(d.schema().file_info_slots.fh, fh.0);
        }
        Ok(0)
    })
}

/// Feeds every entry to `fill(name, stat, offset)` until it reports a
/// full buffer.
///
/// # Safety
///
/// `path` is NULL or a C string; `fi` is NULL or a `fuse_file_info`.
pub(crate) unsafe fn readdir<O, F>(
    d: &Dispatcher<O>,
    path: *const c_char,
    fi: *mut c_void,
    mut fill: F,
) -> c_int
where
    O: Operations,
    F: FnMut(*const c_char, *const c_void, i64) -> c_int,
{
    // SAFETY: guaranteed by the caller.
    let raw = unsafe { cbytes(path) };
    d.call(Primitive::Readdir, raw, || {
        // SAFETY: guaranteed by the caller.
        let fh = unsafe { handle_or_zero(d, fi) };
        let entries = d.operations().readdir(d.decode_opt(raw)?, fh)?;

        let schema = d.schema();
        let mut st = RecordBuf::zeroed(schema.stat().size(), schema.big_endian());
        for entry in &entries {
            let name = match path::encode(&entry.name, d.options().encoding) {
                Ok(name) => name,
                Err(e) => {
                    warn!(name = ?entry.name, error = %e, "skipping unencodable directory entry");
                    continue;
                }
            };
            let stat = match &entry.attr {
                Some(attr) => {
                    d.write_stat(&mut st.record_mut(), attr);
                    st.as_ptr().cast::<c_void>()
                }
                None => ptr::null(),
            };
            if fill(name.as_ptr(), stat, entry.offset) != 0 {
                break;
            }
        }
        Ok(0)
    })
}

/// # Safety
///
/// `path` is NULL or a C string; `fi` is NULL or a `fuse_file_info`.
pub(crate) unsafe fn releasedir<O: Operations>(
    d: &Dispatcher<O>,
    path: *const c_char,
    fi: *mut c_void,
) -> c_int {
    // SAFETY: guaranteed by the caller.
    let raw = unsafe { cbytes(path) };
    d.call(Primitive::Releasedir, raw, || {
        // SAFETY: guaranteed by the caller.
        let fh = unsafe { handle_or_zero(d, fi) };
        d.operations().releasedir(d.decode_opt(raw)?, fh)?;
        Ok(0)
    })
}

/// # Safety
///
/// `path` is NULL or a C string; `fi` is NULL or a `fuse_file_info`.
pub(crate) unsafe fn fsyncdir<O: Operations>(
    d: &Dispatcher<O>,
    path: *const c_char,
    datasync: c_int,
    fi: *mut c_void,
) -> c_int {
    // SAFETY: guaranteed by the caller.
    let raw = unsafe { cbytes(path) };
    d.call(Primitive::Fsyncdir, raw, || {
        // SAFETY: guaranteed by the caller.
        let fh = unsafe { handle_or_zero(d, fi) };
        d.operations()
            .fsyncdir(d.decode_opt(raw)?, datasync != 0, fh)?;
        Ok(0)
    })
}

/// Decodes `fuse_conn_info`, runs `init` and writes the negotiated fields
/// back.
///
/// # Safety
///
/// `conn` is NULL or a `fuse_conn_info` of the schema's layout.
pub(crate) unsafe fn init<O: Operations>(d: &Dispatcher<O>, conn: *mut c_void) {
    let schema = d.schema();
    if conn.is_null() {
        d.init(&mut Default::default());
        return;
    }
    // SAFETY: guaranteed by the caller.
    let mut record = unsafe {
        RecordMut::from_raw(conn.cast(), schema.conn_info().size(), schema.big_endian())
    };
    let mut info = d.read_conn(record.as_ref());
    d.init(&mut info);
    d.write_conn(&mut record, &info);
}

/// # Safety
///
/// `path` is NULL or a C string.
pub(crate) unsafe fn access<O: Operations>(d: &Dispatcher<O>, path: *const c_char, mask: c_int) -> c_int {
    // SAFETY: guaranteed by the caller.
    let raw = unsafe { cbytes(path) };
    d.call(Primitive::Access, raw, || {
        d.operations().access(d.decode(raw)?, mask)?;
        Ok(0)
    })
}

/// # Safety
///
/// `path` is NULL or a C string; `fi` is NULL or a `fuse_file_info`.
pub(crate) unsafe fn create<O: Operations>(
    d: &Dispatcher<O>,
    path: *const c_char,
    mode: u32,
    fi: *mut c_void,
) -> c_int {
    // SAFETY: guaranteed by the caller.
    let raw = unsafe { cbytes(path) };
    d.call(Primitive::Create, raw, || {
        let p = d.decode(raw)?;
        // SAFETY: guaranteed by the caller.
        let mut record =
            unsafe { file_info(d, fi) }.ok_or(FuseError::Errno(libc::EINVAL))?;
        let slots = &d.schema().file_info_slots;
        if d.options().raw_fi {
            d.operations()
                .create_raw(p, mode, &mut RawFileInfo::new(record, slots))?;
        } else {
            let flags = record.i64(slots.flags) as i32;
            let fh = d.operations().create(p, mode, flags)?;
            record.set_u64(slots.fh, fh.0);
        }
        Ok(0)
    })
}

/// # Safety
///
/// `path` is NULL or a C string; `fi` is NULL or a `fuse_file_info`;
/// `lock` is NULL or a `struct flock`.
pub(crate) unsafe fn lock<O: Operations>(
    d: &Dispatcher<O>,
    path: *const c_char,
    fi: *mut c_void,
    cmd: c_int,
    lock: *mut c_void,
) -> c_int {
    // SAFETY: guaranteed by the caller.
    let raw = unsafe { cbytes(path) };
    d.call(Primitive::Lock, raw, || {
        let p = d.decode_opt(raw)?;
        // SAFETY: guaranteed by the caller.
        let mut raw_fi = unsafe { raw_file_info(d, fi) };
        let mut run = |lock: Option<&mut FileLock>| match raw_fi.as_mut() {
            Some(raw_fi) => d.operations().lock_raw(p, raw_fi, cmd, lock),
            // SAFETY: guaranteed by the caller.
            None => d.operations().lock(p, unsafe { handle_or_zero(d, fi) }, cmd, lock),
        };

        let schema = d.schema();
        let layout = schema.flock().filter(|_| !lock.is_null());
        let Some(layout) = layout else {
            run(None)?;
            return Ok(0);
        };

        // SAFETY: `lock` is a `struct flock` of the schema's layout.
        let mut record =
            unsafe { RecordMut::from_raw(lock.cast(), layout.size(), schema.big_endian()) };
        let mut decoded = d.read_flock(record.as_ref());
        run(decoded.as_mut())?;
        if let Some(decoded) = decoded {
            d.write_flock(&mut record, &decoded);
        }
        Ok(0)
    })
}

/// # Safety
///
/// `path` is NULL or a C string; `idx` is NULL or a valid `u64`.
pub(crate) unsafe fn bmap<O: Operations>(
    d: &Dispatcher<O>,
    path: *const c_char,
    blocksize: usize,
    idx: *mut u64,
) -> c_int {
    // SAFETY: guaranteed by the caller.
    let raw = unsafe { cbytes(path) };
    d.call(Primitive::Bmap, raw, || {
        if idx.is_null() {
            return Err(FuseError::Errno(libc::EINVAL));
        }
        // SAFETY: `idx` is a valid in/out block index.
        let block = unsafe { idx.read_unaligned() };
        let mapped = d
            .operations()
            .bmap(d.decode(raw)?, blocksize as u64, block)?;
        // SAFETY: as above.
        unsafe { idx.write_unaligned(mapped) };
        Ok(0)
    })
}

/// # Safety
///
/// `path` is NULL or a C string; `fi` is NULL or a `fuse_file_info`.
pub(crate) unsafe fn flock<O: Operations>(
    d: &Dispatcher<O>,
    path: *const c_char,
    fi: *mut c_void,
    op: c_int,
) -> c_int {
    // SAFETY: guaranteed by the caller.
    let raw = unsafe { cbytes(path) };
    d.call(Primitive::Flock, raw, || {
        // SAFETY: guaranteed by the caller.
        let fh = unsafe { handle_or_zero(d, fi) };
        d.operations().flock(d.decode_opt(raw)?, fh, op)?;
        Ok(0)
    })
}

/// # Safety
///
/// `path` is NULL or a C string; `fi` is NULL or a `fuse_file_info`.
pub(crate) unsafe fn fallocate<O: Operations>(
    d: &Dispatcher<O>,
    path: *const c_char,
    mode: c_int,
    offset: i64,
    len: i64,
    fi: *mut c_void,
) -> c_int {
    // SAFETY: guaranteed by the caller.
    let raw = unsafe { cbytes(path) };
    d.call(Primitive::Fallocate, raw, || {
        // SAFETY: guaranteed by the caller.
        let fh = unsafe { handle_or_zero(d, fi) };
        d.operations()
            .fallocate(d.decode_opt(raw)?, mode, offset, len, fh)?;
        Ok(0)
    })
}

/// `_IOC_SIZE(cmd)` and whether the command carries input data.
fn ioctl_params(cmd: u32) -> (usize, bool) {
    #[cfg(target_os = "linux")]
    {
        (((cmd >> 16) & 0x3fff) as usize, (cmd >> 30) & 1 != 0)
    }
    #[cfg(not(target_os = "linux"))]
    {
        (((cmd >> 16) & 0x1fff) as usize, cmd & 0x8000_0000 != 0)
    }
}

/// # Safety
///
/// `path` is NULL or a C string; `fi` is NULL or a `fuse_file_info`;
/// `data` is NULL or valid for the `_IOC_SIZE` of `cmd`.
pub(crate) unsafe fn ioctl<O: Operations>(
    d: &Dispatcher<O>,
    path: *const c_char,
    cmd: u32,
    arg: *mut c_void,
    fi: *mut c_void,
    flags: u32,
    data: *mut c_void,
) -> c_int {
    // SAFETY: guaranteed by the caller.
    let raw = unsafe { cbytes(path) };
    d.call(Primitive::Ioctl, raw, || {
        let (size, input) = ioctl_params(cmd);
        let buf: &mut [u8] = if data.is_null() || size == 0 {
            &mut []
        } else {
            // SAFETY: `data` is valid for `size` bytes; output-only buffers
            // are zeroed before the slice is formed.
            unsafe {
                if !input {
                    ptr::write_bytes(data.cast::<u8>(), 0, size);
                }
                std::slice::from_raw_parts_mut(data.cast::<u8>(), size)
            }
        };
        // SAFETY: guaranteed by the caller.
        let fh = unsafe { handle_or_zero(d, fi) };
        let ret = d
            .operations()
            .ioctl(d.decode_opt(raw)?, cmd, arg as usize, fh, flags, buf)?;
        c_int::try_from(ret)
            .map_err(|_| anyhow!("ioctl result {ret} does not fit a C int").into())
    })
}

/// Takes ownership of `ph`, even when the call is refused.
///
/// # Safety
///
/// `path` is NULL or a C string; `fi` is NULL or a `fuse_file_info`; `ph`
/// is NULL or an unowned poll handle; `reventsp` is NULL or a valid
/// `unsigned`.
pub(crate) unsafe fn poll<O: Operations>(
    d: &Dispatcher<O>,
    path: *const c_char,
    fi: *mut c_void,
    ph: *mut c_void,
    reventsp: *mut u32,
) -> c_int {
    // SAFETY: guaranteed by the caller.
    let raw = unsafe { cbytes(path) };
    // SAFETY: guaranteed by the caller.
    let handle = unsafe { PollHandle::from_raw(ph) };
    d.call(Primitive::Poll, raw, || {
        let slots = &d.schema().file_info_slots;
        // SAFETY: guaranteed by the caller.
        let events = unsafe { file_info(d, fi) }
            .and_then(|record| slots.poll_events.map(|slot| record.u64(slot) as u32))
            .unwrap_or(0);
        // SAFETY: guaranteed by the caller.
        let fh = unsafe { handle_or_zero(d, fi) };
        let revents = d
            .operations()
            .poll(d.decode_opt(raw)?, fh, events, handle)?;
        if !reventsp.is_null() {
            // SAFETY: `reventsp` is a valid out-parameter.
            unsafe { reventsp.write_unaligned(revents) };
        }
        Ok(0)
    })
}
