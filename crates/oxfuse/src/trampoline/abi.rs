//! `extern "C"` entry points placed in `fuse_operations`.
//!
//! Each function is monomorphized per [`Operations`] type. The dispatcher
//! travels as libfuse's `private_data`: it is the `user_data` argument of
//! `fuse_main_real`, and `init` hands it back unchanged.

use std::ffi::{c_char, c_int, c_void};

use super::marshal;
use crate::context::Scope;
use crate::dispatch::Dispatcher;
use crate::loader;
use crate::native::{FillDir, FillDir3, dev_t, gid_t, mode_t, off_t, uid_t};
use crate::operations::Operations;

/// Resolves the dispatcher of the current callback and installs its call
/// context for the duration of `f`.
fn with_dispatcher<O: Operations>(f: impl FnOnce(&Dispatcher<O>) -> c_int) -> c_int {
    let Some(lib) = loader::loaded() else {
        return -libc::EIO;
    };
    let Some(ctx) = lib.context() else {
        return -libc::EIO;
    };
    if ctx.private_data.is_null() {
        return -libc::ENOTCONN;
    }
    // SAFETY: private_data is the dispatcher the session passed as
    // user_data; it outlives the native loop.
    let d = unsafe { &*ctx.private_data.cast::<Dispatcher<O>>() };
    let _scope = Scope::enter(ctx.call, lib.exit_hook(ctx.fuse));
    f(d)
}

// --- path-only and path+scalar primitives ----------------------------------

extern "C" fn getattr2<O: Operations>(path: *const c_char, st: *mut c_void) -> c_int {
    // SAFETY: arguments come straight from libfuse.
    with_dispatcher::<O>(|d| unsafe { marshal::getattr(d, path, st, std::ptr::null_mut()) })
}

extern "C" fn fgetattr<O: Operations>(
    path: *const c_char,
    st: *mut c_void,
    fi: *mut c_void,
) -> c_int {
    // SAFETY: arguments come straight from libfuse.
    with_dispatcher::<O>(|d| unsafe { marshal::getattr(d, path, st, fi) })
}

extern "C" fn readlink<O: Operations>(path: *const c_char, buf: *mut c_char, size: usize) -> c_int {
    // SAFETY: arguments come straight from libfuse.
    with_dispatcher::<O>(|d| unsafe { marshal::readlink(d, path, buf, size) })
}

extern "C" fn mknod<O: Operations>(path: *const c_char, mode: mode_t, dev: dev_t) -> c_int {
    // SAFETY: arguments come straight from libfuse.
    with_dispatcher::<O>(|d| unsafe { marshal::mknod(d, path, u32::from(mode), dev as u64) })
}

extern "C" fn mkdir<O: Operations>(path: *const c_char, mode: mode_t) -> c_int {
    // SAFETY: arguments come straight from libfuse.
    with_dispatcher::<O>(|d| unsafe { marshal::mkdir(d, path, u32::from(mode)) })
}

extern "C" fn unlink<O: Operations>(path: *const c_char) -> c_int {
    // SAFETY: arguments come straight from libfuse.
    with_dispatcher::<O>(|d| unsafe { marshal::unlink(d, path) })
}

extern "C" fn rmdir<O: Operations>(path: *const c_char) -> c_int {
    // SAFETY: arguments come straight from libfuse.
    with_dispatcher::<O>(|d| unsafe { marshal::rmdir(d, path) })
}

extern "C" fn symlink<O: Operations>(target: *const c_char, link: *const c_char) -> c_int {
    // SAFETY: arguments come straight from libfuse.
    with_dispatcher::<O>(|d| unsafe { marshal::symlink(d, target, link) })
}

extern "C" fn rename2<O: Operations>(from: *const c_char, to: *const c_char) -> c_int {
    // SAFETY: arguments come straight from libfuse.
    with_dispatcher::<O>(|d| unsafe { marshal::rename(d, from, to, 0) })
}

extern "C" fn rename3<O: Operations>(from: *const c_char, to: *const c_char, flags: u32) -> c_int {
    // SAFETY: arguments come straight from libfuse.
    with_dispatcher::<O>(|d| unsafe { marshal::rename(d, from, to, flags) })
}

extern "C" fn link<O: Operations>(target: *const c_char, link: *const c_char) -> c_int {
    // SAFETY: arguments come straight from libfuse.
    with_dispatcher::<O>(|d| unsafe { marshal::link(d, target, link) })
}

extern "C" fn chmod2<O: Operations>(path: *const c_char, mode: mode_t) -> c_int {
    // SAFETY: arguments come straight from libfuse.
    with_dispatcher::<O>(|d| unsafe {
        marshal::chmod(d, path, u32::from(mode), std::ptr::null_mut())
    })
}

extern "C" fn chmod3<O: Operations>(path: *const c_char, mode: mode_t, fi: *mut c_void) -> c_int {
    // SAFETY: arguments come straight from libfuse.
    with_dispatcher::<O>(|d| unsafe { marshal::chmod(d, path, u32::from(mode), fi) })
}

extern "C" fn chown2<O: Operations>(path: *const c_char, uid: uid_t, gid: gid_t) -> c_int {
    // SAFETY: arguments come straight from libfuse.
    with_dispatcher::<O>(|d| unsafe { marshal::chown(d, path, uid, gid, std::ptr::null_mut()) })
}

extern "C" fn chown3<O: Operations>(
    path: *const c_char,
    uid: uid_t,
    gid: gid_t,
    fi: *mut c_void,
) -> c_int {
    // SAFETY: arguments come straight from libfuse.
    with_dispatcher::<O>(|d| unsafe { marshal::chown(d, path, uid, gid, fi) })
}

extern "C" fn truncate2<O: Operations>(path: *const c_char, size: off_t) -> c_int {
    // SAFETY: arguments come straight from libfuse.
    with_dispatcher::<O>(|d| unsafe { marshal::truncate(d, path, size, std::ptr::null_mut()) })
}

/// Also the libfuse 2 `ftruncate`, which has the same signature.
extern "C" fn truncate3<O: Operations>(path: *const c_char, size: off_t, fi: *mut c_void) -> c_int {
    // SAFETY: arguments come straight from libfuse.
    with_dispatcher::<O>(|d| unsafe { marshal::truncate(d, path, size, fi) })
}

extern "C" fn utimens2<O: Operations>(path: *const c_char, tv: *const c_void) -> c_int {
    // SAFETY: arguments come straight from libfuse.
    with_dispatcher::<O>(|d| unsafe { marshal::utimens(d, path, tv, std::ptr::null_mut()) })
}

extern "C" fn utimens3<O: Operations>(
    path: *const c_char,
    tv: *const c_void,
    fi: *mut c_void,
) -> c_int {
    // SAFETY: arguments come straight from libfuse.
    with_dispatcher::<O>(|d| unsafe { marshal::utimens(d, path, tv, fi) })
}

extern "C" fn access<O: Operations>(path: *const c_char, mask: c_int) -> c_int {
    // SAFETY: arguments come straight from libfuse.
    with_dispatcher::<O>(|d| unsafe { marshal::access(d, path, mask) })
}

extern "C" fn statfs<O: Operations>(path: *const c_char, stv: *mut c_void) -> c_int {
    // SAFETY: arguments come straight from libfuse.
    with_dispatcher::<O>(|d| unsafe { marshal::statfs(d, path, stv) })
}

// --- open files ------------------------------------------------------------

extern "C" fn open<O: Operations>(path: *const c_char, fi: *mut c_void) -> c_int {
    // SAFETY: arguments come straight from libfuse.
    with_dispatcher::<O>(|d| unsafe { marshal::open(d, path, fi) })
}

extern "C" fn create<O: Operations>(path: *const c_char, mode: mode_t, fi: *mut c_void) -> c_int {
    // SAFETY: arguments come straight from libfuse.
    with_dispatcher::<O>(|d| unsafe { marshal::create(d, path, u32::from(mode), fi) })
}

extern "C" fn read<O: Operations>(
    path: *const c_char,
    buf: *mut c_char,
    size: usize,
    offset: off_t,
    fi: *mut c_void,
) -> c_int {
    // SAFETY: arguments come straight from libfuse.
    with_dispatcher::<O>(|d| unsafe { marshal::read(d, path, buf, size, offset, fi) })
}

extern "C" fn write<O: Operations>(
    path: *const c_char,
    buf: *const c_char,
    size: usize,
    offset: off_t,
    fi: *mut c_void,
) -> c_int {
    // SAFETY: arguments come straight from libfuse.
    with_dispatcher::<O>(|d| unsafe { marshal::write(d, path, buf, size, offset, fi) })
}

extern "C" fn flush<O: Operations>(path: *const c_char, fi: *mut c_void) -> c_int {
    // SAFETY: arguments come straight from libfuse.
    with_dispatcher::<O>(|d| unsafe { marshal::flush(d, path, fi) })
}

extern "C" fn release<O: Operations>(path: *const c_char, fi: *mut c_void) -> c_int {
    // SAFETY: arguments come straight from libfuse.
    with_dispatcher::<O>(|d| unsafe { marshal::release(d, path, fi) })
}

extern "C" fn fsync<O: Operations>(path: *const c_char, datasync: c_int, fi: *mut c_void) -> c_int {
    // SAFETY: arguments come straight from libfuse.
    with_dispatcher::<O>(|d| unsafe { marshal::fsync(d, path, datasync, fi) })
}

extern "C" fn lock<O: Operations>(
    path: *const c_char,
    fi: *mut c_void,
    cmd: c_int,
    lock: *mut c_void,
) -> c_int {
    // SAFETY: arguments come straight from libfuse.
    with_dispatcher::<O>(|d| unsafe { marshal::lock(d, path, fi, cmd, lock) })
}

extern "C" fn flock<O: Operations>(path: *const c_char, fi: *mut c_void, op: c_int) -> c_int {
    // SAFETY: arguments come straight from libfuse.
    with_dispatcher::<O>(|d| unsafe { marshal::flock(d, path, fi, op) })
}

extern "C" fn fallocate<O: Operations>(
    path: *const c_char,
    mode: c_int,
    offset: off_t,
    len: off_t,
    fi: *mut c_void,
) -> c_int {
    // SAFETY: arguments come straight from libfuse.
    with_dispatcher::<O>(|d| unsafe { marshal::fallocate(d, path, mode, offset, len, fi) })
}

/// `cmd` is `int` on libfuse 2 and `unsigned int` on libfuse 3; the bits
/// are the same.
extern "C" fn ioctl<O: Operations>(
    path: *const c_char,
    cmd: c_int,
    arg: *mut c_void,
    fi: *mut c_void,
    flags: u32,
    data: *mut c_void,
) -> c_int {
    // SAFETY: arguments come straight from libfuse.
    with_dispatcher::<O>(|d| unsafe { marshal::ioctl(d, path, cmd as u32, arg, fi, flags, data) })
}

extern "C" fn poll<O: Operations>(
    path: *const c_char,
    fi: *mut c_void,
    ph: *mut c_void,
    reventsp: *mut u32,
) -> c_int {
    // SAFETY: arguments come straight from libfuse.
    with_dispatcher::<O>(|d| unsafe { marshal::poll(d, path, fi, ph, reventsp) })
}

extern "C" fn bmap<O: Operations>(path: *const c_char, blocksize: usize, idx: *mut u64) -> c_int {
    // SAFETY: arguments come straight from libfuse.
    with_dispatcher::<O>(|d| unsafe { marshal::bmap(d, path, blocksize, idx) })
}

// --- extended attributes ---------------------------------------------------

#[cfg(not(target_os = "macos"))]
extern "C" fn setxattr<O: Operations>(
    path: *const c_char,
    name: *const c_char,
    value: *const c_char,
    size: usize,
    flags: c_int,
) -> c_int {
    // SAFETY: arguments come straight from libfuse.
    with_dispatcher::<O>(|d| unsafe { marshal::setxattr(d, path, name, value, size, flags, 0) })
}

#[cfg(target_os = "macos")]
extern "C" fn setxattr<O: Operations>(
    path: *const c_char,
    name: *const c_char,
    value: *const c_char,
    size: usize,
    flags: c_int,
    position: u32,
) -> c_int {
    // SAFETY: arguments come straight from libfuse.
    with_dispatcher::<O>(|d| unsafe {
        marshal::setxattr(d, path, name, value, size, flags, position)
    })
}

#[cfg(not(target_os = "macos"))]
extern "C" fn getxattr<O: Operations>(
    path: *const c_char,
    name: *const c_char,
    value: *mut c_char,
    size: usize,
) -> c_int {
    // SAFETY: arguments come straight from libfuse.
    with_dispatcher::<O>(|d| unsafe { marshal::getxattr(d, path, name, value, size, 0) })
}

#[cfg(target_os = "macos")]
extern "C" fn getxattr<O: Operations>(
    path: *const c_char,
    name: *const c_char,
    value: *mut c_char,
    size: usize,
    position: u32,
) -> c_int {
    // SAFETY: arguments come straight from libfuse.
    with_dispatcher::<O>(|d| unsafe { marshal::getxattr(d, path, name, value, size, position) })
}

extern "C" fn listxattr<O: Operations>(path: *const c_char, list: *mut c_char, size: usize) -> c_int {
    // SAFETY: arguments come straight from libfuse.
    with_dispatcher::<O>(|d| unsafe { marshal::listxattr(d, path, list, size) })
}

extern "C" fn removexattr<O: Operations>(path: *const c_char, name: *const c_char) -> c_int {
    // SAFETY: arguments come straight from libfuse.
    with_dispatcher::<O>(|d| unsafe { marshal::removexattr(d, path, name) })
}

// --- directories -----------------------------------------------------------

extern "C" fn opendir<O: Operations>(path: *const c_char, fi: *mut c_void) -> c_int {
    // SAFETY: arguments come straight from libfuse.
    with_dispatcher::<O>(|d| unsafe { marshal::opendir(d, path, fi) })
}

extern "C" fn readdir2<O: Operations>(
    path: *const c_char,
    buf: *mut c_void,
    filler: Option<FillDir>,
    _offset: off_t,
    fi: *mut c_void,
) -> c_int {
    let Some(filler) = filler else {
        return -libc::EINVAL;
    };
    // SAFETY: arguments come straight from libfuse; `buf` is only passed
    // back to its own filler.
    with_dispatcher::<O>(|d| unsafe {
        marshal::readdir(d, path, fi, |name, st, off| filler(buf, name, st, off))
    })
}

extern "C" fn readdir3<O: Operations>(
    path: *const c_char,
    buf: *mut c_void,
    filler: Option<FillDir3>,
    _offset: off_t,
    fi: *mut c_void,
    _flags: c_int,
) -> c_int {
    let Some(filler) = filler else {
        return -libc::EINVAL;
    };
    // SAFETY: as in `readdir2`.
    with_dispatcher::<O>(|d| unsafe {
        marshal::readdir(d, path, fi, |name, st, off| filler(buf, name, st, off, 0))
    })
}

extern "C" fn releasedir<O: Operations>(path: *const c_char, fi: *mut c_void) -> c_int {
    // SAFETY: arguments come straight from libfuse.
    with_dispatcher::<O>(|d| unsafe { marshal::releasedir(d, path, fi) })
}

extern "C" fn fsyncdir<O: Operations>(
    path: *const c_char,
    datasync: c_int,
    fi: *mut c_void,
) -> c_int {
    // SAFETY: arguments come straight from libfuse.
    with_dispatcher::<O>(|d| unsafe { marshal::fsyncdir(d, path, datasync, fi) })
}

// --- lifecycle -------------------------------------------------------------

/// Runs `init` and returns the dispatcher as the new `private_data`.
fn init<O: Operations>(conn: *mut c_void) -> *mut c_void {
    let Some(lib) = loader::loaded() else {
        return std::ptr::null_mut();
    };
    let Some(ctx) = lib.context() else {
        return std::ptr::null_mut();
    };
    if ctx.private_data.is_null() {
        return std::ptr::null_mut();
    }
    // SAFETY: see `with_dispatcher`.
    let d = unsafe { &*ctx.private_data.cast::<Dispatcher<O>>() };
    let _scope = Scope::enter(ctx.call, lib.exit_hook(ctx.fuse));
    // SAFETY: `conn` comes straight from libfuse.
    unsafe { marshal::init(d, conn) };
    ctx.private_data
}

extern "C" fn init2<O: Operations>(conn: *mut c_void) -> *mut c_void {
    init::<O>(conn)
}

extern "C" fn init3<O: Operations>(conn: *mut c_void, _cfg: *mut c_void) -> *mut c_void {
    init::<O>(conn)
}

extern "C" fn destroy<O: Operations>(private_data: *mut c_void) {
    if private_data.is_null() {
        return;
    }
    // SAFETY: `private_data` is what `init` returned.
    let d = unsafe { &*private_data.cast::<Dispatcher<O>>() };
    d.destroy();
}

/// Address of the entry point for `slot` under libfuse `major`.
///
/// `None` for slots that stay NULL.
pub(super) fn entry<O: Operations>(slot: &str, major: u32) -> Option<usize> {
    let v3 = major >= 3;
    let addr = match slot {
        "getattr" if v3 => fgetattr::<O> as usize,
        "getattr" => getattr2::<O> as usize,
        "fgetattr" if !v3 => fgetattr::<O> as usize,
        "readlink" => readlink::<O> as usize,
        "mknod" => mknod::<O> as usize,
        "mkdir" => mkdir::<O> as usize,
        "unlink" => unlink::<O> as usize,
        "rmdir" => rmdir::<O> as usize,
        "symlink" => symlink::<O> as usize,
        "rename" if v3 => rename3::<O> as usize,
        "rename" => rename2::<O> as usize,
        "link" => link::<O> as usize,
        "chmod" if v3 => chmod3::<O> as usize,
        "chmod" => chmod2::<O> as usize,
        "chown" if v3 => chown3::<O> as usize,
        "chown" => chown2::<O> as usize,
        "truncate" if v3 => truncate3::<O> as usize,
        "truncate" => truncate2::<O> as usize,
        "ftruncate" if !v3 => truncate3::<O> as usize,
        "open" => open::<O> as usize,
        "read" => read::<O> as usize,
        "write" => write::<O> as usize,
        "statfs" => statfs::<O> as usize,
        "flush" => flush::<O> as usize,
        "release" => release::<O> as usize,
        "fsync" => fsync::<O> as usize,
        "setxattr" => setxattr::<O> as usize,
        "getxattr" => getxattr::<O> as usize,
        "listxattr" => listxattr::<O> as usize,
        "removexattr" => removexattr::<O> as usize,
        "opendir" => opendir::<O> as usize,
        "readdir" if v3 => readdir3::<O> as usize,
        "readdir" => readdir2::<O> as usize,
        "releasedir" => releasedir::<O> as usize,
        "fsyncdir" => fsyncdir::<O> as usize,
        "init" if v3 => init3::<O> as usize,
        "init" => init2::<O> as usize,
        "destroy" => destroy::<O> as usize,
        "access" => access::<O> as usize,
        "create" => create::<O> as usize,
        "lock" => lock::<O> as usize,
        "utimens" if v3 => utimens3::<O> as usize,
        "utimens" => utimens2::<O> as usize,
        "bmap" => bmap::<O> as usize,
        "flock" => flock::<O> as usize,
        "fallocate" => fallocate::<O> as usize,
        "ioctl" => ioctl::<O> as usize,
        "poll" => poll::<O> as usize,
        _ => return None,
    };
    Some(addr)
}
