//! Native struct layouts, selected per platform, architecture and library
//! version.
//!
//! The structs libfuse exchanges with us (`stat`, `statvfs`,
//! `fuse_file_info`, `fuse_operations`, ...) differ between platforms and
//! between library versions, so they are never taken from host `repr(C)`
//! definitions. Each one is described by a static [`StructSpec`] in terms of
//! C types, and resolved once at load time against the target's
//! [`DataModel`] into a [`Layout`] with concrete offsets. Records are then
//! read and written through [`record`] views.
//!
//! A [`Schema`] is the full set of layouts for one [`Target`]. Once selected
//! it is immutable for the lifetime of the process.

use std::fmt;

use crate::error::LoadError;

mod layouts;
pub mod record;

use record::{FlagSlot, ScalarSlot, TimeSlot};

/// Operating system flavour of the bound library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Linux,
    /// macOS with osxfuse, fuse4x or fuse-t.
    Darwin,
    /// macOS with macFUSE, which keeps the legacy 32-bit-inode `stat`.
    DarwinMacFuse,
    FreeBsd,
    OpenBsd,
    /// WinFsp's FUSE compatibility layer.
    Windows,
    /// WinFsp under Cygwin.
    Cygwin,
}

impl Platform {
    /// The platform this crate was compiled for.
    ///
    /// macOS reports [`Platform::Darwin`]; the loader upgrades it to
    /// [`Platform::DarwinMacFuse`] after inspecting the library.
    pub fn host() -> Option<Platform> {
        if cfg!(any(target_os = "linux", target_os = "android")) {
            Some(Platform::Linux)
        } else if cfg!(target_os = "macos") {
            Some(Platform::Darwin)
        } else if cfg!(target_os = "freebsd") {
            Some(Platform::FreeBsd)
        } else if cfg!(target_os = "openbsd") {
            Some(Platform::OpenBsd)
        } else if cfg!(target_os = "cygwin") {
            Some(Platform::Cygwin)
        } else if cfg!(windows) {
            Some(Platform::Windows)
        } else {
            None
        }
    }

    fn is_darwin(self) -> bool {
        matches!(self, Platform::Darwin | Platform::DarwinMacFuse)
    }

    fn is_winfsp(self) -> bool {
        matches!(self, Platform::Windows | Platform::Cygwin)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Platform::Linux => "linux",
            Platform::Darwin => "darwin",
            Platform::DarwinMacFuse => "darwin-macfuse",
            Platform::FreeBsd => "freebsd",
            Platform::OpenBsd => "openbsd",
            Platform::Windows => "windows",
            Platform::Cygwin => "cygwin",
        })
    }
}

/// CPU architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    X86_64,
    X86,
    Aarch64,
    Arm,
    Riscv64,
    LoongArch64,
    /// 32-bit big-endian PowerPC.
    PowerPc,
    /// 64-bit big-endian PowerPC.
    PowerPc64,
    PowerPc64Le,
}

impl Arch {
    /// The architecture this crate was compiled for.
    pub fn host() -> Option<Arch> {
        if cfg!(target_arch = "x86_64") {
            Some(Arch::X86_64)
        } else if cfg!(target_arch = "x86") {
            Some(Arch::X86)
        } else if cfg!(target_arch = "aarch64") {
            Some(Arch::Aarch64)
        } else if cfg!(target_arch = "arm") {
            Some(Arch::Arm)
        } else if cfg!(target_arch = "riscv64") {
            Some(Arch::Riscv64)
        } else if cfg!(target_arch = "loongarch64") {
            Some(Arch::LoongArch64)
        } else if cfg!(target_arch = "powerpc") {
            Some(Arch::PowerPc)
        } else if cfg!(all(target_arch = "powerpc64", target_endian = "big")) {
            Some(Arch::PowerPc64)
        } else if cfg!(all(target_arch = "powerpc64", target_endian = "little")) {
            Some(Arch::PowerPc64Le)
        } else {
            None
        }
    }

    fn is_64bit(self) -> bool {
        !matches!(self, Arch::X86 | Arch::Arm | Arch::PowerPc)
    }

    fn is_big_endian(self) -> bool {
        matches!(self, Arch::PowerPc | Arch::PowerPc64)
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Arch::X86_64 => "x86_64",
            Arch::X86 => "x86",
            Arch::Aarch64 => "aarch64",
            Arch::Arm => "arm",
            Arch::Riscv64 => "riscv64",
            Arch::LoongArch64 => "loongarch64",
            Arch::PowerPc => "powerpc",
            Arch::PowerPc64 => "powerpc64",
            Arch::PowerPc64Le => "powerpc64le",
        })
    }
}

/// FUSE API version reported by `fuse_version()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ApiVersion {
    pub major: u32,
    pub minor: u32,
}

impl ApiVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Parses the integer returned by `fuse_version()`.
    ///
    /// Two-digit values encode `major * 10 + minor` (`29` is 2.9), three-digit
    /// values `major * 100 + minor` (`316` is 3.16).
    pub fn from_raw(raw: i32) -> Option<Self> {
        let raw = u32::try_from(raw).ok()?;
        match raw {
            10..100 => Some(Self::new(raw / 10, raw % 10)),
            100..1000 => Some(Self::new(raw / 100, raw % 100)),
            _ => None,
        }
    }

    pub fn at_least(&self, major: u32, minor: u32) -> bool {
        (self.major, self.minor) >= (major, minor)
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Everything that decides which layouts apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Target {
    pub platform: Platform,
    pub arch: Arch,
    pub api: ApiVersion,
}

impl Target {
    pub const fn new(platform: Platform, arch: Arch, api: ApiVersion) -> Self {
        Self {
            platform,
            arch,
            api,
        }
    }

    /// A target on the host architecture.
    pub fn host(api: ApiVersion, platform: Platform) -> Result<Self, LoadError> {
        let arch = Arch::host().ok_or_else(|| {
            LoadError::UnsupportedTarget(format!("{platform}/{}", std::env::consts::ARCH))
        })?;
        Ok(Self::new(platform, arch, api))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} fuse {}", self.platform, self.arch, self.api)
    }
}

/// C scalar types used by the layout tables.
///
/// Typedefs resolve per platform; `WinLong`/`WinULong` are WinFsp's
/// pointer-sized `long`, which keeps Cygwin sizes on 64-bit Windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CType {
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    Long,
    ULong,
    WinLong,
    WinULong,
    Ptr,
    Mode,
    Dev,
    Uid,
    Gid,
    Pid,
    Off,
    FsBlkCnt,
    FsFilCnt,
    Time,
}

/// Sizes and alignment rules of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataModel {
    pub platform: Platform,
    /// `sizeof(long)`.
    pub long: usize,
    /// `sizeof(void *)`.
    pub pointer: usize,
    /// Alignment of 8-byte integers inside structs.
    pub int64_align: usize,
    pub big_endian: bool,
}

impl DataModel {
    pub fn for_target(platform: Platform, arch: Arch) -> Self {
        let pointer = if arch.is_64bit() { 8 } else { 4 };
        let long = match platform {
            Platform::Windows => 4,
            _ => pointer,
        };
        let int64_align = match (platform, arch) {
            // i386 System V aligns 8-byte integers to 4; MSVC does not.
            (Platform::Windows, _) => 8,
            (_, Arch::X86) => 4,
            _ => 8,
        };
        Self {
            platform,
            long,
            pointer,
            int64_align,
            big_endian: arch.is_big_endian(),
        }
    }

    /// Size in bytes and signedness of `ty`.
    pub fn scalar(&self, ty: CType) -> (usize, bool) {
        let p = self.platform;
        match ty {
            CType::I16 => (2, true),
            CType::U16 => (2, false),
            CType::I32 | CType::Pid => (4, true),
            CType::U32 | CType::Uid | CType::Gid => (4, false),
            CType::I64 | CType::Off => (8, true),
            CType::U64 => (8, false),
            CType::Long => (self.long, true),
            CType::ULong => (self.long, false),
            CType::WinLong => (self.pointer, true),
            CType::WinULong => (self.pointer, false),
            CType::Ptr => (self.pointer, false),
            CType::Mode if p.is_darwin() || p == Platform::FreeBsd => (2, false),
            CType::Mode => (4, false),
            CType::Dev => match p {
                Platform::Linux | Platform::FreeBsd => (8, false),
                Platform::Windows | Platform::Cygwin => (4, false),
                Platform::Darwin | Platform::DarwinMacFuse | Platform::OpenBsd => (4, true),
            },
            CType::FsBlkCnt | CType::FsFilCnt => match p {
                Platform::Darwin | Platform::DarwinMacFuse => (4, false),
                Platform::Windows | Platform::Cygwin => (self.pointer, false),
                _ => (8, false),
            },
            CType::Time => match p {
                Platform::OpenBsd => (8, true),
                Platform::Windows | Platform::Cygwin => (self.pointer, true),
                _ => (self.long, true),
            },
        }
    }

    fn align(&self, size: usize) -> usize {
        if size == 8 { self.int64_align } else { size }
    }

    /// Type of `tv_nsec`.
    fn nsec(&self) -> CType {
        if self.platform.is_winfsp() {
            CType::WinLong
        } else {
            CType::Long
        }
    }
}

/// Shape of one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Scalar(CType),
    /// Nested `struct timespec`.
    Timespec,
    Array(CType, usize),
    /// One storage word holding single-bit members, lowest declared first.
    Bits(CType, &'static [&'static str]),
}

/// Static description of one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub const fn scalar(name: &'static str, ty: CType) -> Self {
        Self {
            name,
            kind: FieldKind::Scalar(ty),
        }
    }

    pub const fn timespec(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Timespec,
        }
    }

    pub const fn array(name: &'static str, ty: CType, len: usize) -> Self {
        Self {
            name,
            kind: FieldKind::Array(ty, len),
        }
    }

    pub const fn bits(name: &'static str, ty: CType, members: &'static [&'static str]) -> Self {
        Self {
            name,
            kind: FieldKind::Bits(ty, members),
        }
    }
}

/// Static description of a C struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructSpec {
    pub name: &'static str,
    pub fields: &'static [FieldSpec],
}

/// A field with its resolved position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
    pub offset: usize,
    pub size: usize,
    pub signed: bool,
}

/// A struct resolved against a data model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    name: &'static str,
    fields: Vec<Field>,
    size: usize,
    align: usize,
    big_endian: bool,
    /// `tv_sec` and `tv_nsec` relative to a nested timespec.
    ts_sec: ScalarSlot,
    ts_nsec: ScalarSlot,
}

fn round_up(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}

impl Layout {
    /// Computes offsets with the C rules of `model`.
    pub fn resolve(spec: &StructSpec, model: &DataModel) -> Self {
        let (sec_size, sec_signed) = model.scalar(CType::Time);
        let (nsec_size, _) = model.scalar(model.nsec());
        let nsec_offset = round_up(sec_size, model.align(nsec_size));
        let ts_align = model.align(sec_size).max(model.align(nsec_size));
        let ts_size = round_up(nsec_offset + nsec_size, ts_align);

        let mut offset = 0;
        let mut align = 1;
        let mut fields = Vec::with_capacity(spec.fields.len());

        for field in spec.fields {
            let (size, field_align, signed) = match field.kind {
                FieldKind::Scalar(ty) | FieldKind::Bits(ty, _) => {
                    let (size, signed) = model.scalar(ty);
                    (size, model.align(size), signed)
                }
                FieldKind::Array(ty, len) => {
                    let (size, signed) = model.scalar(ty);
                    (size * len, model.align(size), signed)
                }
                FieldKind::Timespec => (ts_size, ts_align, sec_signed),
            };

            offset = round_up(offset, field_align);
            align = align.max(field_align);
            fields.push(Field {
                name: field.name,
                kind: field.kind,
                offset,
                size,
                signed,
            });
            offset += size;
        }

        Self {
            name: spec.name,
            fields,
            size: round_up(offset, align),
            align,
            big_endian: model.big_endian,
            ts_sec: ScalarSlot {
                offset: 0,
                size: sec_size,
                signed: sec_signed,
            },
            ts_nsec: ScalarSlot {
                offset: nsec_offset,
                size: nsec_size,
                signed: true,
            },
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// `sizeof` the struct, including tail padding.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn align(&self) -> usize {
        self.align
    }

    pub fn big_endian(&self) -> bool {
        self.big_endian
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.field(name).is_some() || self.flag(name).is_some()
    }

    /// Slot of a scalar (or pointer) field.
    pub fn scalar(&self, name: &str) -> Option<ScalarSlot> {
        let field = self.field(name)?;
        matches!(field.kind, FieldKind::Scalar(_)).then_some(ScalarSlot {
            offset: field.offset,
            size: field.size,
            signed: field.signed,
        })
    }

    /// Slot of a nested timespec field.
    pub fn time(&self, name: &str) -> Option<TimeSlot> {
        let field = self.field(name)?;
        if field.kind != FieldKind::Timespec {
            return None;
        }
        Some(TimeSlot {
            sec: ScalarSlot {
                offset: field.offset,
                ..self.ts_sec
            },
            nsec: ScalarSlot {
                offset: field.offset + self.ts_nsec.offset,
                ..self.ts_nsec
            },
        })
    }

    /// Slot of a one-bit member of any bitfield word.
    pub fn flag(&self, name: &str) -> Option<FlagSlot> {
        self.fields.iter().find_map(|field| {
            let FieldKind::Bits(_, members) = field.kind else {
                return None;
            };
            let index = members.iter().position(|m| *m == name)?;
            let width = (field.size * 8) as u32;
            let bit = if self.big_endian {
                width - 1 - index as u32
            } else {
                index as u32
            };
            Some(FlagSlot {
                offset: field.offset,
                size: field.size,
                bit,
            })
        })
    }
}

fn required<T>(value: Option<T>, layout: &Layout, field: &str) -> Result<T, LoadError> {
    value.ok_or_else(|| {
        LoadError::UnsupportedTarget(format!("{} has no field {field}", layout.name()))
    })
}

fn req_scalar(layout: &Layout, name: &str) -> Result<ScalarSlot, LoadError> {
    required(layout.scalar(name), layout, name)
}

fn req_time(layout: &Layout, name: &str) -> Result<TimeSlot, LoadError> {
    required(layout.time(name), layout, name)
}

/// `struct stat` fields the dispatcher writes.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StatSlots {
    pub dev: ScalarSlot,
    pub ino: ScalarSlot,
    /// Truncated `__st_ino` of 32-bit `stat64`.
    pub ino_low: Option<ScalarSlot>,
    pub mode: ScalarSlot,
    pub nlink: ScalarSlot,
    pub uid: ScalarSlot,
    pub gid: ScalarSlot,
    pub rdev: ScalarSlot,
    pub size: ScalarSlot,
    pub blocks: ScalarSlot,
    pub blksize: ScalarSlot,
    pub atime: TimeSlot,
    pub mtime: TimeSlot,
    pub ctime: TimeSlot,
    pub birthtime: Option<TimeSlot>,
    pub flags: Option<ScalarSlot>,
    pub generation: Option<ScalarSlot>,
}

impl StatSlots {
    fn resolve(l: &Layout) -> Result<Self, LoadError> {
        Ok(Self {
            dev: req_scalar(l, "st_dev")?,
            ino: req_scalar(l, "st_ino")?,
            ino_low: l.scalar("__st_ino"),
            mode: req_scalar(l, "st_mode")?,
            nlink: req_scalar(l, "st_nlink")?,
            uid: req_scalar(l, "st_uid")?,
            gid: req_scalar(l, "st_gid")?,
            rdev: req_scalar(l, "st_rdev")?,
            size: req_scalar(l, "st_size")?,
            blocks: req_scalar(l, "st_blocks")?,
            blksize: req_scalar(l, "st_blksize")?,
            atime: req_time(l, "st_atim")?,
            mtime: req_time(l, "st_mtim")?,
            ctime: req_time(l, "st_ctim")?,
            birthtime: l.time("st_birthtim"),
            flags: l.scalar("st_flags"),
            generation: l.scalar("st_gen"),
        })
    }
}

/// `struct statvfs` fields.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StatVfsSlots {
    pub bsize: ScalarSlot,
    pub frsize: ScalarSlot,
    pub blocks: ScalarSlot,
    pub bfree: ScalarSlot,
    pub bavail: ScalarSlot,
    pub files: ScalarSlot,
    pub ffree: ScalarSlot,
    pub favail: ScalarSlot,
    pub fsid: ScalarSlot,
    pub flag: ScalarSlot,
    pub namemax: ScalarSlot,
}

impl StatVfsSlots {
    fn resolve(l: &Layout) -> Result<Self, LoadError> {
        Ok(Self {
            bsize: req_scalar(l, "f_bsize")?,
            frsize: req_scalar(l, "f_frsize")?,
            blocks: req_scalar(l, "f_blocks")?,
            bfree: req_scalar(l, "f_bfree")?,
            bavail: req_scalar(l, "f_bavail")?,
            files: req_scalar(l, "f_files")?,
            ffree: req_scalar(l, "f_ffree")?,
            favail: req_scalar(l, "f_favail")?,
            fsid: req_scalar(l, "f_fsid")?,
            flag: req_scalar(l, "f_flag")?,
            namemax: req_scalar(l, "f_namemax")?,
        })
    }
}

/// `struct flock` fields.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FlockSlots {
    pub kind: ScalarSlot,
    pub whence: ScalarSlot,
    pub start: ScalarSlot,
    pub len: ScalarSlot,
    pub pid: ScalarSlot,
}

impl FlockSlots {
    fn resolve(l: &Layout) -> Result<Self, LoadError> {
        Ok(Self {
            kind: req_scalar(l, "l_type")?,
            whence: req_scalar(l, "l_whence")?,
            start: req_scalar(l, "l_start")?,
            len: req_scalar(l, "l_len")?,
            pid: req_scalar(l, "l_pid")?,
        })
    }
}

/// `struct fuse_file_info` fields.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FileInfoSlots {
    pub flags: ScalarSlot,
    pub fh: ScalarSlot,
    pub lock_owner: ScalarSlot,
    pub poll_events: Option<ScalarSlot>,
    pub direct_io: Option<FlagSlot>,
    pub keep_cache: Option<FlagSlot>,
    pub nonseekable: Option<FlagSlot>,
}

impl FileInfoSlots {
    fn resolve(l: &Layout) -> Result<Self, LoadError> {
        Ok(Self {
            flags: req_scalar(l, "flags")?,
            fh: req_scalar(l, "fh")?,
            lock_owner: req_scalar(l, "lock_owner")?,
            poll_events: l.scalar("poll_events"),
            direct_io: l.flag("direct_io"),
            keep_cache: l.flag("keep_cache"),
            nonseekable: l.flag("nonseekable"),
        })
    }
}

/// `struct fuse_context` fields.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ContextSlots {
    pub fuse: ScalarSlot,
    pub uid: ScalarSlot,
    pub gid: ScalarSlot,
    pub pid: ScalarSlot,
    pub private_data: ScalarSlot,
    pub umask: Option<ScalarSlot>,
}

impl ContextSlots {
    fn resolve(l: &Layout) -> Result<Self, LoadError> {
        Ok(Self {
            fuse: req_scalar(l, "fuse")?,
            uid: req_scalar(l, "uid")?,
            gid: req_scalar(l, "gid")?,
            pid: req_scalar(l, "pid")?,
            private_data: req_scalar(l, "private_data")?,
            umask: l.scalar("umask"),
        })
    }
}

/// `struct fuse_conn_info` fields.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ConnSlots {
    pub proto_major: ScalarSlot,
    pub proto_minor: ScalarSlot,
    pub async_read: Option<ScalarSlot>,
    pub max_write: ScalarSlot,
    pub max_read: Option<ScalarSlot>,
    pub max_readahead: ScalarSlot,
    pub capable: ScalarSlot,
    pub want: ScalarSlot,
    pub max_background: ScalarSlot,
    pub congestion_threshold: ScalarSlot,
    pub time_gran: Option<ScalarSlot>,
}

impl ConnSlots {
    fn resolve(l: &Layout) -> Result<Self, LoadError> {
        Ok(Self {
            proto_major: req_scalar(l, "proto_major")?,
            proto_minor: req_scalar(l, "proto_minor")?,
            async_read: l.scalar("async_read"),
            max_write: req_scalar(l, "max_write")?,
            max_read: l.scalar("max_read"),
            max_readahead: req_scalar(l, "max_readahead")?,
            capable: req_scalar(l, "capable")?,
            want: req_scalar(l, "want")?,
            max_background: req_scalar(l, "max_background")?,
            congestion_threshold: req_scalar(l, "congestion_threshold")?,
            time_gran: l.scalar("time_gran"),
        })
    }
}

/// The selected layouts for one target.
#[derive(Debug, Clone)]
pub struct Schema {
    target: Target,
    model: DataModel,
    timespec: Layout,
    stat: Layout,
    statvfs: Layout,
    flock: Option<Layout>,
    file_info: Layout,
    context: Layout,
    conn_info: Layout,
    operations: Layout,
    pub(crate) stat_slots: StatSlots,
    pub(crate) statvfs_slots: StatVfsSlots,
    pub(crate) flock_slots: Option<FlockSlots>,
    pub(crate) file_info_slots: FileInfoSlots,
    pub(crate) context_slots: ContextSlots,
    pub(crate) conn_slots: ConnSlots,
    /// `tv_sec`/`tv_nsec` of a bare `struct timespec`.
    pub(crate) timespec_slot: TimeSlot,
}

impl Schema {
    /// Picks the layouts for `target`.
    ///
    /// Fails with [`LoadError::UnsupportedTarget`] when no table exists for
    /// the combination.
    pub fn select(target: Target) -> Result<Self, LoadError> {
        let unsupported = || LoadError::UnsupportedTarget(target.to_string());
        let api = target.api;

        match api.major {
            2 if api.minor >= 6 => {}
            3 if matches!(target.platform, Platform::Linux | Platform::FreeBsd) => {}
            _ => return Err(unsupported()),
        }

        let specs = layouts::select(target).ok_or_else(unsupported)?;
        let model = DataModel::for_target(target.platform, target.arch);
        let resolve = |spec: &StructSpec| Layout::resolve(spec, &model);

        let stat = resolve(specs.stat);
        let statvfs = resolve(specs.statvfs);
        let flock = specs.flock.map(resolve);
        let file_info = resolve(specs.file_info);
        let context = resolve(specs.context);
        let conn_info = resolve(specs.conn_info);
        let timespec = resolve(specs.timespec);
        let timespec_slot = TimeSlot {
            sec: req_scalar(&timespec, "tv_sec")?,
            nsec: req_scalar(&timespec, "tv_nsec")?,
        };

        Ok(Self {
            target,
            model,
            timespec,
            timespec_slot,
            stat_slots: StatSlots::resolve(&stat)?,
            statvfs_slots: StatVfsSlots::resolve(&statvfs)?,
            flock_slots: flock.as_ref().map(FlockSlots::resolve).transpose()?,
            file_info_slots: FileInfoSlots::resolve(&file_info)?,
            context_slots: ContextSlots::resolve(&context)?,
            conn_slots: ConnSlots::resolve(&conn_info)?,
            operations: resolve(specs.operations),
            stat,
            statvfs,
            flock,
            file_info,
            context,
            conn_info,
        })
    }

    pub fn target(&self) -> Target {
        self.target
    }

    pub fn model(&self) -> &DataModel {
        &self.model
    }

    pub fn big_endian(&self) -> bool {
        self.model.big_endian
    }

    pub fn timespec(&self) -> &Layout {
        &self.timespec
    }

    pub fn stat(&self) -> &Layout {
        &self.stat
    }

    pub fn statvfs(&self) -> &Layout {
        &self.statvfs
    }

    /// `None` where `lock` receives no decodable record (WinFsp).
    pub fn flock(&self) -> Option<&Layout> {
        self.flock.as_ref()
    }

    pub fn file_info(&self) -> &Layout {
        &self.file_info
    }

    pub fn context(&self) -> &Layout {
        &self.context
    }

    pub fn conn_info(&self) -> &Layout {
        &self.conn_info
    }

    pub fn operations(&self) -> &Layout {
        &self.operations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parse() {
        assert_eq!(ApiVersion::from_raw(26), Some(ApiVersion::new(2, 6)));
        assert_eq!(ApiVersion::from_raw(29), Some(ApiVersion::new(2, 9)));
        assert_eq!(ApiVersion::from_raw(312), Some(ApiVersion::new(3, 12)));
        assert_eq!(ApiVersion::from_raw(317), Some(ApiVersion::new(3, 17)));
        assert_eq!(ApiVersion::from_raw(1000), None);
        assert_eq!(ApiVersion::from_raw(-1), None);
    }

    #[test]
    fn test_resolve_applies_c_alignment() {
        static SPEC: StructSpec = StructSpec {
            name: "t",
            fields: &[
                FieldSpec::scalar("a", CType::I16),
                FieldSpec::scalar("b", CType::I64),
                FieldSpec::scalar("c", CType::U32),
            ],
        };

        let lp64 = DataModel::for_target(Platform::Linux, Arch::X86_64);
        let l = Layout::resolve(&SPEC, &lp64);
        assert_eq!(l.field("b").map(|f| f.offset), Some(8));
        assert_eq!(l.size(), 24);

        let i386 = DataModel::for_target(Platform::Linux, Arch::X86);
        let l = Layout::resolve(&SPEC, &i386);
        assert_eq!(l.field("b").map(|f| f.offset), Some(4));
        assert_eq!(l.size(), 16);
    }

    #[test]
    fn test_bit_order_follows_endianness() {
        static SPEC: StructSpec = StructSpec {
            name: "t",
            fields: &[FieldSpec::bits("bits", CType::U32, &["x", "y"])],
        };

        let le = Layout::resolve(&SPEC, &DataModel::for_target(Platform::Linux, Arch::X86_64));
        assert_eq!(le.flag("y").map(|f| f.bit), Some(1));

        let be = Layout::resolve(&SPEC, &DataModel::for_target(Platform::Linux, Arch::PowerPc64));
        assert_eq!(be.flag("y").map(|f| f.bit), Some(30));
        assert!(be.flag("z").is_none());
    }

    #[test]
    fn test_select_rejects_unsupported() {
        let old = Target::new(Platform::Linux, Arch::X86_64, ApiVersion::new(2, 5));
        assert!(matches!(Schema::select(old), Err(LoadError::UnsupportedTarget(_))));

        let v3_mac = Target::new(Platform::Darwin, Arch::Aarch64, ApiVersion::new(3, 10));
        assert!(matches!(Schema::select(v3_mac), Err(LoadError::UnsupportedTarget(_))));

        let v4 = Target::new(Platform::Linux, Arch::X86_64, ApiVersion::new(4, 0));
        assert!(Schema::select(v4).is_err());
    }
}
