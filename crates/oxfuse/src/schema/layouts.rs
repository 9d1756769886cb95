//! Layout tables, transcribed from the C headers of each supported platform.
//!
//! Field names follow the headers. Timestamps use the POSIX `st_atim`
//! spelling everywhere, whatever the platform calls them.

use super::CType::{
    Dev, FsBlkCnt, FsFilCnt, Gid, I16, I32, I64, Long, Mode, Off, Pid, Ptr, Time, U16, U32, U64,
    ULong, Uid, WinLong, WinULong,
};
use super::{Arch, FieldSpec as F, Platform, StructSpec, Target};

/// The specs that make up one schema.
pub(super) struct Specs {
    pub timespec: &'static StructSpec,
    pub stat: &'static StructSpec,
    pub statvfs: &'static StructSpec,
    pub flock: Option<&'static StructSpec>,
    pub file_info: &'static StructSpec,
    pub context: &'static StructSpec,
    pub conn_info: &'static StructSpec,
    pub operations: &'static StructSpec,
}

pub(super) fn select(target: Target) -> Option<Specs> {
    use Arch::{Aarch64, Arm, LoongArch64, PowerPc, PowerPc64, PowerPc64Le, Riscv64, X86, X86_64};

    let api = target.api;

    let (stat, statvfs, flock) = match (target.platform, target.arch) {
        (Platform::Linux, X86_64 | PowerPc64 | PowerPc64Le) => {
            (&STAT_LINUX_X86_64, &STATVFS_LINUX_64, Some(&FLOCK_LINUX))
        }
        (Platform::Linux, Aarch64 | Riscv64 | LoongArch64) => {
            (&STAT_LINUX_GENERIC, &STATVFS_LINUX_64, Some(&FLOCK_LINUX))
        }
        (Platform::Linux, X86 | Arm) => (&STAT64_LINUX, &STATVFS_LINUX_32, Some(&FLOCK_LINUX)),
        (Platform::Linux, PowerPc) => (&STAT64_LINUX_PPC, &STATVFS_LINUX_32, Some(&FLOCK_LINUX)),
        (Platform::Darwin, X86_64 | Aarch64) => {
            (&STAT_DARWIN, &STATVFS_DARWIN, Some(&FLOCK_DARWIN))
        }
        (Platform::DarwinMacFuse, X86_64 | Aarch64) => {
            (&STAT_DARWIN_LEGACY, &STATVFS_DARWIN, Some(&FLOCK_DARWIN))
        }
        (Platform::FreeBsd, X86_64 | Aarch64 | Riscv64) => {
            (&STAT_FREEBSD, &STATVFS_FREEBSD, Some(&FLOCK_FREEBSD))
        }
        (Platform::OpenBsd, X86_64 | Aarch64 | Riscv64 | X86) => {
            (&STAT_OPENBSD, &STATVFS_OPENBSD, Some(&FLOCK_DARWIN))
        }
        (Platform::Windows | Platform::Cygwin, X86_64 | X86) => {
            (&STAT_WINFSP, &STATVFS_WINFSP, None)
        }
        _ => return None,
    };
    let timespec = if matches!(target.platform, Platform::Windows | Platform::Cygwin) {
        &TIMESPEC_WINFSP
    } else {
        &TIMESPEC
    };

    let (file_info, context, conn_info, operations) = match api.major {
        2 => {
            let context = if api.minor >= 8 {
                &CONTEXT
            } else {
                &CONTEXT_NO_UMASK
            };
            let operations = match api.minor {
                6 | 7 => &OPERATIONS_2_6,
                8 => &OPERATIONS_2_8,
                _ => &OPERATIONS_2_9,
            };
            (&FILE_INFO_2, context, &CONN_INFO_2, operations)
        }
        3 => {
            let file_info = match api.minor {
                0..14 => &FILE_INFO_3,
                14 => &FILE_INFO_3_14,
                _ => &FILE_INFO_3_15,
            };
            (file_info, &CONTEXT, &CONN_INFO_3, &OPERATIONS_3)
        }
        _ => return None,
    };

    Some(Specs {
        timespec,
        stat,
        statvfs,
        flock,
        file_info,
        context,
        conn_info,
        operations,
    })
}

static TIMESPEC: StructSpec = StructSpec {
    name: "timespec",
    fields: &[F::scalar("tv_sec", Time), F::scalar("tv_nsec", Long)],
};

static TIMESPEC_WINFSP: StructSpec = StructSpec {
    name: "fuse_timespec",
    fields: &[F::scalar("tv_sec", Time), F::scalar("tv_nsec", WinLong)],
};

// --- stat ---------------------------------------------------------------

/// x86_64, ppc64 and ppc64le glibc.
static STAT_LINUX_X86_64: StructSpec = StructSpec {
    name: "stat",
    fields: &[
        F::scalar("st_dev", Dev),
        F::scalar("st_ino", ULong),
        F::scalar("st_nlink", ULong),
        F::scalar("st_mode", Mode),
        F::scalar("st_uid", Uid),
        F::scalar("st_gid", Gid),
        F::scalar("__pad0", I32),
        F::scalar("st_rdev", Dev),
        F::scalar("st_size", Off),
        F::scalar("st_blksize", Long),
        F::scalar("st_blocks", Long),
        F::timespec("st_atim"),
        F::timespec("st_mtim"),
        F::timespec("st_ctim"),
        F::array("__glibc_reserved", Long, 3),
    ],
};

/// The asm-generic layout used by aarch64, riscv64 and loongarch64.
static STAT_LINUX_GENERIC: StructSpec = StructSpec {
    name: "stat",
    fields: &[
        F::scalar("st_dev", Dev),
        F::scalar("st_ino", U64),
        F::scalar("st_mode", Mode),
        F::scalar("st_nlink", U32),
        F::scalar("st_uid", Uid),
        F::scalar("st_gid", Gid),
        F::scalar("st_rdev", Dev),
        F::scalar("__pad1", U64),
        F::scalar("st_size", Off),
        F::scalar("st_blksize", I32),
        F::scalar("__pad2", I32),
        F::scalar("st_blocks", I64),
        F::timespec("st_atim"),
        F::timespec("st_mtim"),
        F::timespec("st_ctim"),
        F::array("__unused", U32, 2),
    ],
};

/// `stat64` on i386 and 32-bit arm.
static STAT64_LINUX: StructSpec = StructSpec {
    name: "stat64",
    fields: &[
        F::scalar("st_dev", Dev),
        F::scalar("__pad1", U16),
        F::scalar("__st_ino", ULong),
        F::scalar("st_mode", Mode),
        F::scalar("st_nlink", U32),
        F::scalar("st_uid", Uid),
        F::scalar("st_gid", Gid),
        F::scalar("st_rdev", Dev),
        F::scalar("__pad2", U16),
        F::scalar("st_size", Off),
        F::scalar("st_blksize", Long),
        F::scalar("st_blocks", I64),
        F::timespec("st_atim"),
        F::timespec("st_mtim"),
        F::timespec("st_ctim"),
        F::scalar("st_ino", U64),
    ],
};

/// `stat64` on 32-bit PowerPC.
static STAT64_LINUX_PPC: StructSpec = StructSpec {
    name: "stat64",
    fields: &[
        F::scalar("st_dev", Dev),
        F::scalar("st_ino", U64),
        F::scalar("st_mode", Mode),
        F::scalar("st_nlink", U32),
        F::scalar("st_uid", Uid),
        F::scalar("st_gid", Gid),
        F::scalar("st_rdev", Dev),
        F::scalar("__pad2", U16),
        F::scalar("st_size", Off),
        F::scalar("st_blksize", Long),
        F::scalar("st_blocks", I64),
        F::timespec("st_atim"),
        F::timespec("st_mtim"),
        F::timespec("st_ctim"),
        F::scalar("__glibc_reserved4", ULong),
        F::scalar("__glibc_reserved5", ULong),
    ],
};

/// macOS with 64-bit inodes.
static STAT_DARWIN: StructSpec = StructSpec {
    name: "stat",
    fields: &[
        F::scalar("st_dev", Dev),
        F::scalar("st_mode", Mode),
        F::scalar("st_nlink", U16),
        F::scalar("st_ino", U64),
        F::scalar("st_uid", Uid),
        F::scalar("st_gid", Gid),
        F::scalar("st_rdev", Dev),
        F::timespec("st_atim"),
        F::timespec("st_mtim"),
        F::timespec("st_ctim"),
        F::timespec("st_birthtim"),
        F::scalar("st_size", Off),
        F::scalar("st_blocks", I64),
        F::scalar("st_blksize", I32),
        F::scalar("st_flags", U32),
        F::scalar("st_gen", U32),
        F::scalar("st_lspare", I32),
        F::array("st_qspare", I64, 2),
    ],
};

/// macOS 32-bit-inode `stat`, as used by macFUSE.
static STAT_DARWIN_LEGACY: StructSpec = StructSpec {
    name: "stat",
    fields: &[
        F::scalar("st_dev", Dev),
        F::scalar("st_ino", U32),
        F::scalar("st_mode", Mode),
        F::scalar("st_nlink", U16),
        F::scalar("st_uid", Uid),
        F::scalar("st_gid", Gid),
        F::scalar("st_rdev", Dev),
        F::timespec("st_atim"),
        F::timespec("st_mtim"),
        F::timespec("st_ctim"),
        F::scalar("st_size", Off),
        F::scalar("st_blocks", I64),
        F::scalar("st_blksize", I32),
        F::scalar("st_flags", U32),
        F::scalar("st_gen", U32),
        F::scalar("st_lspare", I32),
        F::array("st_qspare", I64, 2),
    ],
};

/// FreeBSD 12 and later (64-bit inodes).
static STAT_FREEBSD: StructSpec = StructSpec {
    name: "stat",
    fields: &[
        F::scalar("st_dev", Dev),
        F::scalar("st_ino", U64),
        F::scalar("st_nlink", U64),
        F::scalar("st_mode", Mode),
        F::scalar("st_padding0", I16),
        F::scalar("st_uid", Uid),
        F::scalar("st_gid", Gid),
        F::scalar("st_padding1", I32),
        F::scalar("st_rdev", Dev),
        F::timespec("st_atim"),
        F::timespec("st_mtim"),
        F::timespec("st_ctim"),
        F::timespec("st_birthtim"),
        F::scalar("st_size", Off),
        F::scalar("st_blocks", I64),
        F::scalar("st_blksize", I32),
        F::scalar("st_flags", U32),
        F::scalar("st_gen", U64),
        F::array("st_spare", U64, 10),
    ],
};

static STAT_OPENBSD: StructSpec = StructSpec {
    name: "stat",
    fields: &[
        F::scalar("st_mode", Mode),
        F::scalar("st_dev", Dev),
        F::scalar("st_ino", U64),
        F::scalar("st_nlink", U32),
        F::scalar("st_uid", Uid),
        F::scalar("st_gid", Gid),
        F::scalar("st_rdev", Dev),
        F::timespec("st_atim"),
        F::timespec("st_mtim"),
        F::timespec("st_ctim"),
        F::scalar("st_size", Off),
        F::scalar("st_blocks", I64),
        F::scalar("st_blksize", I32),
        F::scalar("st_flags", U32),
        F::scalar("st_gen", U32),
        F::timespec("st_birthtim"),
    ],
};

/// WinFsp `fuse_stat` (Cygwin-compatible).
static STAT_WINFSP: StructSpec = StructSpec {
    name: "fuse_stat",
    fields: &[
        F::scalar("st_dev", Dev),
        F::scalar("st_ino", U64),
        F::scalar("st_mode", Mode),
        F::scalar("st_nlink", U16),
        F::scalar("st_uid", Uid),
        F::scalar("st_gid", Gid),
        F::scalar("st_rdev", Dev),
        F::scalar("st_size", Off),
        F::timespec("st_atim"),
        F::timespec("st_mtim"),
        F::timespec("st_ctim"),
        F::scalar("st_blksize", I32),
        F::scalar("st_blocks", I64),
        F::timespec("st_birthtim"),
    ],
};

// --- statvfs ------------------------------------------------------------

static STATVFS_LINUX_64: StructSpec = StructSpec {
    name: "statvfs",
    fields: &[
        F::scalar("f_bsize", ULong),
        F::scalar("f_frsize", ULong),
        F::scalar("f_blocks", FsBlkCnt),
        F::scalar("f_bfree", FsBlkCnt),
        F::scalar("f_bavail", FsBlkCnt),
        F::scalar("f_files", FsFilCnt),
        F::scalar("f_ffree", FsFilCnt),
        F::scalar("f_favail", FsFilCnt),
        F::scalar("f_fsid", ULong),
        F::scalar("f_flag", ULong),
        F::scalar("f_namemax", ULong),
        F::array("__f_spare", I32, 6),
    ],
};

/// `statvfs64` on 32-bit glibc.
static STATVFS_LINUX_32: StructSpec = StructSpec {
    name: "statvfs64",
    fields: &[
        F::scalar("f_bsize", ULong),
        F::scalar("f_frsize", ULong),
        F::scalar("f_blocks", FsBlkCnt),
        F::scalar("f_bfree", FsBlkCnt),
        F::scalar("f_bavail", FsBlkCnt),
        F::scalar("f_files", FsFilCnt),
        F::scalar("f_ffree", FsFilCnt),
        F::scalar("f_favail", FsFilCnt),
        F::scalar("f_fsid", ULong),
        F::scalar("__f_unused", I32),
        F::scalar("f_flag", ULong),
        F::scalar("f_namemax", ULong),
        F::array("__f_spare", I32, 6),
    ],
};

/// macOS, where block and file counts are 32-bit.
static STATVFS_DARWIN: StructSpec = StructSpec {
    name: "statvfs",
    fields: &[
        F::scalar("f_bsize", ULong),
        F::scalar("f_frsize", ULong),
        F::scalar("f_blocks", FsBlkCnt),
        F::scalar("f_bfree", FsBlkCnt),
        F::scalar("f_bavail", FsBlkCnt),
        F::scalar("f_files", FsFilCnt),
        F::scalar("f_ffree", FsFilCnt),
        F::scalar("f_favail", FsFilCnt),
        F::scalar("f_fsid", ULong),
        F::scalar("f_flag", ULong),
        F::scalar("f_namemax", ULong),
    ],
};

static STATVFS_FREEBSD: StructSpec = StructSpec {
    name: "statvfs",
    fields: &[
        F::scalar("f_bavail", FsBlkCnt),
        F::scalar("f_bfree", FsBlkCnt),
        F::scalar("f_blocks", FsBlkCnt),
        F::scalar("f_favail", FsFilCnt),
        F::scalar("f_ffree", FsFilCnt),
        F::scalar("f_files", FsFilCnt),
        F::scalar("f_bsize", ULong),
        F::scalar("f_flag", ULong),
        F::scalar("f_frsize", ULong),
        F::scalar("f_fsid", ULong),
        F::scalar("f_namemax", ULong),
    ],
};

static STATVFS_OPENBSD: StructSpec = StructSpec {
    name: "statvfs",
    fields: &[
        F::scalar("f_bsize", ULong),
        F::scalar("f_frsize", ULong),
        F::scalar("f_blocks", FsBlkCnt),
        F::scalar("f_bfree", FsBlkCnt),
        F::scalar("f_bavail", FsBlkCnt),
        F::scalar("f_files", FsFilCnt),
        F::scalar("f_ffree", FsFilCnt),
        F::scalar("f_favail", FsFilCnt),
        F::scalar("f_fsid", ULong),
        F::scalar("f_flag", ULong),
        F::scalar("f_namemax", ULong),
    ],
};

static STATVFS_WINFSP: StructSpec = StructSpec {
    name: "fuse_statvfs",
    fields: &[
        F::scalar("f_bsize", WinULong),
        F::scalar("f_frsize", WinULong),
        F::scalar("f_blocks", FsBlkCnt),
        F::scalar("f_bfree", FsBlkCnt),
        F::scalar("f_bavail", FsBlkCnt),
        F::scalar("f_files", FsFilCnt),
        F::scalar("f_ffree", FsFilCnt),
        F::scalar("f_favail", FsFilCnt),
        F::scalar("f_fsid", WinULong),
        F::scalar("f_flag", WinULong),
        F::scalar("f_namemax", WinULong),
    ],
};

// --- flock --------------------------------------------------------------

static FLOCK_LINUX: StructSpec = StructSpec {
    name: "flock",
    fields: &[
        F::scalar("l_type", I16),
        F::scalar("l_whence", I16),
        F::scalar("l_start", Off),
        F::scalar("l_len", Off),
        F::scalar("l_pid", Pid),
    ],
};

/// macOS and OpenBSD.
static FLOCK_DARWIN: StructSpec = StructSpec {
    name: "flock",
    fields: &[
        F::scalar("l_start", Off),
        F::scalar("l_len", Off),
        F::scalar("l_pid", Pid),
        F::scalar("l_type", I16),
        F::scalar("l_whence", I16),
    ],
};

static FLOCK_FREEBSD: StructSpec = StructSpec {
    name: "flock",
    fields: &[
        F::scalar("l_start", Off),
        F::scalar("l_len", Off),
        F::scalar("l_pid", Pid),
        F::scalar("l_type", I16),
        F::scalar("l_whence", I16),
        F::scalar("l_sysid", I32),
    ],
};

// --- fuse_file_info -----------------------------------------------------

static FILE_INFO_2: StructSpec = StructSpec {
    name: "fuse_file_info",
    fields: &[
        F::scalar("flags", I32),
        F::scalar("fh_old", ULong),
        F::scalar("writepage", I32),
        F::bits(
            "bits",
            U32,
            &["direct_io", "keep_cache", "flush", "nonseekable", "flock_release"],
        ),
        F::scalar("fh", U64),
        F::scalar("lock_owner", U64),
    ],
};

static FILE_INFO_3: StructSpec = StructSpec {
    name: "fuse_file_info",
    fields: &[
        F::scalar("flags", I32),
        F::bits(
            "bits",
            U32,
            &[
                "writepage",
                "direct_io",
                "keep_cache",
                "flush",
                "nonseekable",
                "flock_release",
                "cache_readdir",
                "noflush",
            ],
        ),
        F::scalar("padding2", U32),
        F::scalar("fh", U64),
        F::scalar("lock_owner", U64),
        F::scalar("poll_events", U32),
    ],
};

/// 3.14 inserted `parallel_direct_writes` after `keep_cache`.
static FILE_INFO_3_14: StructSpec = StructSpec {
    name: "fuse_file_info",
    fields: &[
        F::scalar("flags", I32),
        F::bits(
            "bits",
            U32,
            &[
                "writepage",
                "direct_io",
                "keep_cache",
                "parallel_direct_writes",
                "flush",
                "nonseekable",
                "flock_release",
                "cache_readdir",
                "noflush",
            ],
        ),
        F::scalar("padding2", U32),
        F::scalar("fh", U64),
        F::scalar("lock_owner", U64),
        F::scalar("poll_events", U32),
    ],
};

/// 3.15 moved `parallel_direct_writes` to the end to restore the 3.13 ABI.
static FILE_INFO_3_15: StructSpec = StructSpec {
    name: "fuse_file_info",
    fields: &[
        F::scalar("flags", I32),
        F::bits(
            "bits",
            U32,
            &[
                "writepage",
                "direct_io",
                "keep_cache",
                "flush",
                "nonseekable",
                "flock_release",
                "cache_readdir",
                "noflush",
                "parallel_direct_writes",
            ],
        ),
        F::scalar("padding2", U32),
        F::scalar("fh", U64),
        F::scalar("lock_owner", U64),
        F::scalar("poll_events", U32),
    ],
};

// --- fuse_context -------------------------------------------------------

static CONTEXT: StructSpec = StructSpec {
    name: "fuse_context",
    fields: &[
        F::scalar("fuse", Ptr),
        F::scalar("uid", Uid),
        F::scalar("gid", Gid),
        F::scalar("pid", Pid),
        F::scalar("private_data", Ptr),
        F::scalar("umask", Mode),
    ],
};

/// Before 2.8.
static CONTEXT_NO_UMASK: StructSpec = StructSpec {
    name: "fuse_context",
    fields: &[
        F::scalar("fuse", Ptr),
        F::scalar("uid", Uid),
        F::scalar("gid", Gid),
        F::scalar("pid", Pid),
        F::scalar("private_data", Ptr),
    ],
};

// --- fuse_conn_info -----------------------------------------------------

static CONN_INFO_2: StructSpec = StructSpec {
    name: "fuse_conn_info",
    fields: &[
        F::scalar("proto_major", U32),
        F::scalar("proto_minor", U32),
        F::scalar("async_read", U32),
        F::scalar("max_write", U32),
        F::scalar("max_readahead", U32),
        F::scalar("capable", U32),
        F::scalar("want", U32),
        F::scalar("max_background", U32),
        F::scalar("congestion_threshold", U32),
        F::array("reserved", U32, 23),
    ],
};

static CONN_INFO_3: StructSpec = StructSpec {
    name: "fuse_conn_info",
    fields: &[
        F::scalar("proto_major", U32),
        F::scalar("proto_minor", U32),
        F::scalar("max_write", U32),
        F::scalar("max_read", U32),
        F::scalar("max_readahead", U32),
        F::scalar("capable", U32),
        F::scalar("want", U32),
        F::scalar("max_background", U32),
        F::scalar("congestion_threshold", U32),
        F::scalar("time_gran", U32),
        F::array("reserved", U32, 22),
    ],
};

// --- fuse_operations ----------------------------------------------------

macro_rules! operations {
    ([$($head:literal),* $(,)?] $(, $flags:expr, [$($tail:literal),* $(,)?])?) => {
        StructSpec {
            name: "fuse_operations",
            fields: &[
                $(F::scalar($head, Ptr),)*
                $($flags, $(F::scalar($tail, Ptr),)*)?
            ],
        }
    };
}

/// 2.8 has only `flag_nullpath_ok`; the other 31 bits are reserved.
const FLAGS_2_8: F = F::bits("flags", U32, &["flag_nullpath_ok"]);

const FLAGS_2_9: F = F::bits(
    "flags",
    U32,
    &["flag_nullpath_ok", "flag_nopath", "flag_utime_omit_ok"],
);

static OPERATIONS_2_6: StructSpec = operations!([
    "getattr", "readlink", "getdir", "mknod", "mkdir", "unlink", "rmdir", "symlink", "rename",
    "link", "chmod", "chown", "truncate", "utime", "open", "read", "write", "statfs", "flush",
    "release", "fsync", "setxattr", "getxattr", "listxattr", "removexattr", "opendir", "readdir",
    "releasedir", "fsyncdir", "init", "destroy", "access", "create", "ftruncate", "fgetattr",
    "lock", "utimens", "bmap",
]);

static OPERATIONS_2_8: StructSpec = operations!(
    [
        "getattr", "readlink", "getdir", "mknod", "mkdir", "unlink", "rmdir", "symlink", "rename",
        "link", "chmod", "chown", "truncate", "utime", "open", "read", "write", "statfs", "flush",
        "release", "fsync", "setxattr", "getxattr", "listxattr", "removexattr", "opendir",
        "readdir", "releasedir", "fsyncdir", "init", "destroy", "access", "create", "ftruncate",
        "fgetattr", "lock", "utimens", "bmap",
    ],
    FLAGS_2_8,
    ["ioctl", "poll"]
);

static OPERATIONS_2_9: StructSpec = operations!(
    [
        "getattr", "readlink", "getdir", "mknod", "mkdir", "unlink", "rmdir", "symlink", "rename",
        "link", "chmod", "chown", "truncate", "utime", "open", "read", "write", "statfs", "flush",
        "release", "fsync", "setxattr", "getxattr", "listxattr", "removexattr", "opendir",
        "readdir", "releasedir", "fsyncdir", "init", "destroy", "access", "create", "ftruncate",
        "fgetattr", "lock", "utimens", "bmap",
    ],
    FLAGS_2_9,
    ["ioctl", "poll", "write_buf", "read_buf", "flock", "fallocate"]
);

static OPERATIONS_3: StructSpec = operations!([
    "getattr", "readlink", "mknod", "mkdir", "unlink", "rmdir", "symlink", "rename", "link",
    "chmod", "chown", "truncate", "open", "read", "write", "statfs", "flush", "release", "fsync",
    "setxattr", "getxattr", "listxattr", "removexattr", "opendir", "readdir", "releasedir",
    "fsyncdir", "init", "destroy", "access", "create", "lock", "utimens", "bmap", "ioctl", "poll",
    "write_buf", "read_buf", "flock", "fallocate",
]);

#[cfg(test)]
mod tests {
    use super::super::{ApiVersion, Layout, Schema};
    use super::*;

    const V2_9: ApiVersion = ApiVersion::new(2, 9);

    fn schema(platform: Platform, arch: Arch, api: ApiVersion) -> Schema {
        Schema::select(Target::new(platform, arch, api)).unwrap()
    }

    fn offset(layout: &Layout, name: &str) -> usize {
        layout
            .field(name)
            .unwrap_or_else(|| panic!("{} has no {name}", layout.name()))
            .offset
    }

    fn offsets(layout: &Layout, expected: &[(&str, usize)]) {
        for (name, off) in expected {
            assert_eq!(offset(layout, name), *off, "{}.{name}", layout.name());
        }
    }

    #[test]
    fn test_linux_x86_64() {
        let s = schema(Platform::Linux, Arch::X86_64, V2_9);
        assert_eq!(s.stat().size(), 144);
        offsets(
            s.stat(),
            &[
                ("st_nlink", 16),
                ("st_mode", 24),
                ("st_rdev", 40),
                ("st_size", 48),
                ("st_blocks", 64),
                ("st_atim", 72),
                ("st_mtim", 88),
                ("st_ctim", 104),
            ],
        );
        assert_eq!(s.statvfs().size(), 112);
        assert_eq!(s.flock().map(Layout::size), Some(32));
        assert_eq!(s.file_info().size(), 40);
        offsets(s.file_info(), &[("writepage", 16), ("bits", 20), ("fh", 24)]);
        assert_eq!(s.context().size(), 40);
        offsets(s.context(), &[("private_data", 24), ("umask", 32)]);
        assert_eq!(s.conn_info().size(), 128);
    }

    #[test]
    fn test_linux_generic_64() {
        for arch in [Arch::Aarch64, Arch::Riscv64, Arch::LoongArch64] {
            let s = schema(Platform::Linux, arch, V2_9);
            assert_eq!(s.stat().size(), 128, "{arch}");
            offsets(
                s.stat(),
                &[
                    ("st_mode", 16),
                    ("st_nlink", 20),
                    ("st_size", 48),
                    ("st_blksize", 56),
                    ("st_blocks", 64),
                    ("st_atim", 72),
                ],
            );
        }
    }

    #[test]
    fn test_linux_i386_stat64() {
        let s = schema(Platform::Linux, Arch::X86, V2_9);
        assert_eq!(s.stat().size(), 96);
        offsets(
            s.stat(),
            &[
                ("__st_ino", 12),
                ("st_mode", 16),
                ("st_rdev", 32),
                ("st_size", 44),
                ("st_blocks", 56),
                ("st_atim", 64),
                ("st_ino", 88),
            ],
        );
        assert_eq!(s.statvfs().size(), 96);
        assert_eq!(s.file_info().size(), 32);
        assert_eq!(offset(s.file_info(), "fh"), 16);
        assert!(s.stat_slots.ino_low.is_some());
    }

    #[test]
    fn test_linux_arm_stat64() {
        let s = schema(Platform::Linux, Arch::Arm, V2_9);
        assert_eq!(s.stat().size(), 104);
        offsets(
            s.stat(),
            &[("st_size", 48), ("st_blocks", 64), ("st_atim", 72), ("st_ino", 96)],
        );
        assert_eq!(s.statvfs().size(), 96);
    }

    #[test]
    fn test_linux_powerpc() {
        let s = schema(Platform::Linux, Arch::PowerPc, V2_9);
        assert!(s.big_endian());
        assert_eq!(s.stat().size(), 104);
        offsets(s.stat(), &[("st_size", 48), ("st_atim", 72)]);

        let s = schema(Platform::Linux, Arch::PowerPc64, V2_9);
        assert!(s.big_endian());
        assert_eq!(s.stat().size(), 144);

        let s = schema(Platform::Linux, Arch::PowerPc64Le, V2_9);
        assert!(!s.big_endian());
        assert_eq!(s.stat().size(), 144);
    }

    #[test]
    fn test_darwin() {
        let s = schema(Platform::Darwin, Arch::Aarch64, V2_9);
        assert_eq!(s.stat().size(), 144);
        offsets(
            s.stat(),
            &[
                ("st_mode", 4),
                ("st_nlink", 6),
                ("st_ino", 8),
                ("st_atim", 32),
                ("st_birthtim", 80),
                ("st_size", 96),
                ("st_flags", 116),
            ],
        );
        assert_eq!(s.statvfs().size(), 64);
        assert_eq!(s.flock().map(Layout::size), Some(24));
        assert!(s.stat_slots.birthtime.is_some());
    }

    #[test]
    fn test_darwin_macfuse() {
        let s = schema(Platform::DarwinMacFuse, Arch::X86_64, V2_9);
        assert_eq!(s.stat().size(), 120);
        offsets(
            s.stat(),
            &[("st_ino", 4), ("st_mode", 8), ("st_atim", 24), ("st_size", 72)],
        );
        assert!(s.stat_slots.birthtime.is_none());
    }

    #[test]
    fn test_freebsd() {
        let s = schema(Platform::FreeBsd, Arch::X86_64, V2_9);
        assert_eq!(s.stat().size(), 224);
        offsets(
            s.stat(),
            &[
                ("st_mode", 24),
                ("st_uid", 28),
                ("st_rdev", 40),
                ("st_atim", 48),
                ("st_birthtim", 96),
                ("st_size", 112),
                ("st_gen", 136),
            ],
        );
        assert_eq!(s.statvfs().size(), 88);
        offsets(s.statvfs(), &[("f_bavail", 0), ("f_bsize", 48)]);
        assert_eq!(s.flock().map(Layout::size), Some(32));
    }

    #[test]
    fn test_openbsd() {
        let s = schema(Platform::OpenBsd, Arch::X86_64, V2_9);
        assert_eq!(s.stat().size(), 128);
        offsets(
            s.stat(),
            &[("st_dev", 4), ("st_ino", 8), ("st_atim", 32), ("st_birthtim", 112)],
        );
        assert_eq!(s.statvfs().size(), 88);
    }

    #[test]
    fn test_winfsp() {
        let s = schema(Platform::Windows, Arch::X86_64, V2_9);
        assert_eq!(s.timespec().size(), 16);
        assert_eq!(s.stat().size(), 128);
        offsets(
            s.stat(),
            &[("st_ino", 8), ("st_size", 40), ("st_atim", 48), ("st_blocks", 104)],
        );
        assert_eq!(s.statvfs().size(), 88);
        assert!(s.flock().is_none());
        assert!(s.flock_slots.is_none());
    }

    #[test]
    fn test_operations_by_minor() {
        let v26 = schema(Platform::Linux, Arch::X86_64, ApiVersion::new(2, 6));
        assert_eq!(v26.operations().size(), 38 * 8);
        assert!(v26.operations().flag("flag_nullpath_ok").is_none());
        assert!(v26.context().field("umask").is_none());
        assert!(v26.context_slots.umask.is_none());

        let v28 = schema(Platform::Linux, Arch::X86_64, ApiVersion::new(2, 8));
        assert_eq!(offset(v28.operations(), "ioctl"), 39 * 8);
        assert_eq!(offset(v28.operations(), "poll"), 40 * 8);
        assert_eq!(v28.operations().size(), 41 * 8);
        assert!(v28.operations().field("write_buf").is_none());
        assert!(v28.operations().flag("flag_nullpath_ok").is_some());
        assert!(v28.operations().flag("flag_nopath").is_none());
        assert!(v28.operations().flag("flag_utime_omit_ok").is_none());

        let v29 = schema(Platform::Linux, Arch::X86_64, V2_9);
        assert_eq!(v29.operations().size(), 360);
        assert!(v29.operations().flag("flag_utime_omit_ok").is_some());
        assert_eq!(offset(v29.operations(), "fallocate"), 352);
    }

    #[test]
    fn test_api_3() {
        let s = schema(Platform::Linux, Arch::X86_64, ApiVersion::new(3, 16));
        assert_eq!(s.operations().size(), 40 * 8);
        assert!(s.operations().field("getdir").is_none());
        assert!(s.operations().field("fgetattr").is_none());
        assert_eq!(s.file_info().size(), 40);
        offsets(s.file_info(), &[("fh", 16), ("lock_owner", 24)]);
        assert!(s.conn_slots.time_gran.is_some());
        assert!(s.conn_slots.async_read.is_none());
    }

    #[test]
    fn test_api_3_nonseekable_bit_moves() {
        let bit = |minor| {
            schema(Platform::Linux, Arch::X86_64, ApiVersion::new(3, minor))
                .file_info_slots
                .nonseekable
                .map(|f| f.bit)
        };
        assert_eq!(bit(10), Some(4));
        assert_eq!(bit(14), Some(5));
        assert_eq!(bit(16), Some(4));
    }

    #[cfg(all(
        target_os = "linux",
        any(target_arch = "x86_64", target_arch = "aarch64")
    ))]
    #[test]
    fn test_host_layouts_match_libc() {
        use std::mem::{offset_of, size_of};

        let s = Schema::select(
            Target::host(ApiVersion::new(2, 9), Platform::Linux).unwrap(),
        )
        .unwrap();

        let stat = s.stat();
        assert_eq!(stat.size(), size_of::<libc::stat>());
        assert_eq!(offset(stat, "st_ino"), offset_of!(libc::stat, st_ino));
        assert_eq!(offset(stat, "st_mode"), offset_of!(libc::stat, st_mode));
        assert_eq!(offset(stat, "st_nlink"), offset_of!(libc::stat, st_nlink));
        assert_eq!(offset(stat, "st_uid"), offset_of!(libc::stat, st_uid));
        assert_eq!(offset(stat, "st_rdev"), offset_of!(libc::stat, st_rdev));
        assert_eq!(offset(stat, "st_size"), offset_of!(libc::stat, st_size));
        assert_eq!(offset(stat, "st_blksize"), offset_of!(libc::stat, st_blksize));
        assert_eq!(offset(stat, "st_blocks"), offset_of!(libc::stat, st_blocks));
        assert_eq!(offset(stat, "st_atim"), offset_of!(libc::stat, st_atime));
        assert_eq!(offset(stat, "st_mtim"), offset_of!(libc::stat, st_mtime));
        assert_eq!(offset(stat, "st_ctim"), offset_of!(libc::stat, st_ctime));

        let vfs = s.statvfs();
        assert_eq!(vfs.size(), size_of::<libc::statvfs>());
        assert_eq!(offset(vfs, "f_blocks"), offset_of!(libc::statvfs, f_blocks));
        assert_eq!(offset(vfs, "f_namemax"), offset_of!(libc::statvfs, f_namemax));

        let flock = s.flock().unwrap();
        assert_eq!(flock.size(), size_of::<libc::flock>());
        assert_eq!(offset(flock, "l_start"), offset_of!(libc::flock, l_start));
        assert_eq!(offset(flock, "l_pid"), offset_of!(libc::flock, l_pid));
    }
}
