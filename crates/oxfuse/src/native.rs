//! Host C typedefs that appear in callback signatures.
//!
//! Struct contents go through [`schema`](crate::schema) layouts; these
//! aliases only cover scalars passed by value.

#![allow(non_camel_case_types)]

#[cfg(any(target_os = "macos", target_os = "freebsd"))]
pub type mode_t = u16;
#[cfg(not(any(target_os = "macos", target_os = "freebsd")))]
pub type mode_t = u32;

#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
pub type dev_t = u64;
#[cfg(any(target_os = "macos", target_os = "openbsd"))]
pub type dev_t = i32;
#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "macos",
    target_os = "openbsd"
)))]
pub type dev_t = u32;

pub type uid_t = u32;
pub type gid_t = u32;
pub type off_t = i64;

/// `fuse_fill_dir_t` of libfuse 2.
pub type FillDir = unsafe extern "C" fn(
    buf: *mut std::ffi::c_void,
    name: *const std::ffi::c_char,
    stbuf: *const std::ffi::c_void,
    off: off_t,
) -> std::ffi::c_int;

/// `fuse_fill_dir_t` of libfuse 3, with `enum fuse_fill_dir_flags`.
pub type FillDir3 = unsafe extern "C" fn(
    buf: *mut std::ffi::c_void,
    name: *const std::ffi::c_char,
    stbuf: *const std::ffi::c_void,
    off: off_t,
    flags: std::ffi::c_int,
) -> std::ffi::c_int;
