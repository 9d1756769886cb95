//! Locating and binding the native FUSE library.
//!
//! The library is opened once per process and never unloaded: libfuse keeps
//! global state, and trampolines registered with it must stay callable for
//! as long as it may run. [`load`] is the only entry point; later calls
//! return the library bound by the first successful one.

use std::ffi::{c_char, c_int, c_void};
use std::path::{Path, PathBuf};

use libloading::Library;
use once_cell::sync::OnceCell;

use crate::context::{CallContext, ExitHook};
use crate::error::LoadError;
use crate::schema::record::RecordRef;
use crate::schema::{ApiVersion, Platform, Schema, Target};

/// Environment variable naming the library file to load.
pub const ENV_LIBRARY_PATH: &str = "FUSE_LIBRARY_PATH";

/// Environment variable selecting the preferred API major version (`2` or `3`).
pub const ENV_API_VERSION: &str = "OXFUSE_API_VERSION";

type FuseVersionFn = unsafe extern "C" fn() -> c_int;
type FuseMainRealFn = unsafe extern "C" fn(
    argc: c_int,
    argv: *mut *mut c_char,
    op: *const c_void,
    op_size: usize,
    user_data: *mut c_void,
) -> c_int;
type FuseMainFn = unsafe extern "C" fn(
    argc: c_int,
    argv: *mut *mut c_char,
    op: *const c_void,
    user_data: *mut c_void,
) -> c_int;
type FuseGetContextFn = unsafe extern "C" fn() -> *mut c_void;
type FuseExitFn = unsafe extern "C" fn(fuse: *mut c_void);
type FuseNotifyPollFn = unsafe extern "C" fn(ph: *mut c_void) -> c_int;
type FusePollhandleDestroyFn = unsafe extern "C" fn(ph: *mut c_void);

/// Where to look for the library.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Load exactly this file instead of searching.
    pub library_path: Option<PathBuf>,
    /// Preferred API major version when both are installed.
    pub api_preference: Option<u32>,
}

impl LoaderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads [`ENV_LIBRARY_PATH`] and [`ENV_API_VERSION`].
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var_os(key).map(|v| v.to_string_lossy().into_owned()))
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let library_path = lookup(ENV_LIBRARY_PATH)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);
        let api_preference = lookup(ENV_API_VERSION).and_then(|raw| match raw.trim() {
            "2" => Some(2),
            "3" => Some(3),
            other => {
                tracing::warn!(value = other, "ignoring {ENV_API_VERSION}, expected 2 or 3");
                None
            }
        });
        Self {
            library_path,
            api_preference,
        }
    }

    #[must_use]
    pub fn library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.library_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn prefer_api(mut self, major: u32) -> Self {
        self.api_preference = Some(major);
        self
    }

    /// Fills unset fields from the environment.
    fn with_env(&self) -> Self {
        let env = Self::from_env();
        Self {
            library_path: self.library_path.clone().or(env.library_path),
            api_preference: self.api_preference.or(env.api_preference),
        }
    }

    /// Library names or paths to try, in order.
    fn candidates(&self, platform: Platform) -> Vec<PathBuf> {
        if let Some(path) = &self.library_path {
            return vec![path.clone()];
        }

        let prefer_3 = self.api_preference == Some(3);
        let ordered = |v2: &[&str], v3: &[&str]| -> Vec<PathBuf> {
            let (first, second) = if prefer_3 { (v3, v2) } else { (v2, v3) };
            first.iter().chain(second).map(PathBuf::from).collect()
        };

        match platform {
            Platform::Linux => ordered(&["libfuse.so.2", "libfuse.so"], &["libfuse3.so.3"]),
            Platform::FreeBsd => ordered(&["libfuse.so.2"], &["libfuse3.so.3"]),
            Platform::OpenBsd => vec![PathBuf::from("libfuse.so")],
            Platform::Darwin | Platform::DarwinMacFuse => [
                "libfuse.2.dylib",
                "libosxfuse.2.dylib",
                "libfuse4x.dylib",
                "libfuse-t.dylib",
            ]
            .into_iter()
            .map(PathBuf::from)
            .collect(),
            Platform::Windows | Platform::Cygwin => {
                let base = std::env::var_os("ProgramFiles(x86)")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(r"C:\Program Files (x86)"));
                let dll = if cfg!(target_pointer_width = "64") {
                    "winfsp-x64.dll"
                } else {
                    "winfsp-x86.dll"
                };
                vec![base.join("WinFsp").join("bin").join(dll)]
            }
        }
    }
}

enum MainEntry {
    Real(FuseMainRealFn),
    /// OpenBSD's `fuse_main`, which takes no `op_size`.
    Compat(FuseMainFn),
}

/// Snapshot of `fuse_get_context()` inside a callback.
#[derive(Clone, Copy)]
pub(crate) struct NativeContext {
    pub call: CallContext,
    pub fuse: *mut c_void,
    pub private_data: *mut c_void,
}

/// A bound FUSE library.
pub struct FuseLibrary {
    path: PathBuf,
    version: ApiVersion,
    schema: Schema,
    main: MainEntry,
    get_context: FuseGetContextFn,
    exit: Option<FuseExitFn>,
    notify_poll: Option<FuseNotifyPollFn>,
    pollhandle_destroy: Option<FusePollhandleDestroyFn>,
    // Keeps the entry points above valid.
    _lib: Library,
}

impl std::fmt::Debug for FuseLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FuseLibrary")
            .field("path", &self.path)
            .field("version", &self.version)
            .field("target", &self.schema.target())
            .finish_non_exhaustive()
    }
}

static LIBRARY: OnceCell<FuseLibrary> = OnceCell::new();

/// Loads the FUSE library, or returns the one already loaded.
///
/// Unset `config` fields fall back to [`ENV_LIBRARY_PATH`] and
/// [`ENV_API_VERSION`]. Only the first successful call has any effect.
pub fn load(config: &LoaderConfig) -> Result<&'static FuseLibrary, LoadError> {
    LIBRARY.get_or_try_init(|| FuseLibrary::open(&config.with_env()))
}

/// The library bound by [`load`], if any.
pub fn loaded() -> Option<&'static FuseLibrary> {
    LIBRARY.get()
}

impl FuseLibrary {
    fn open(config: &LoaderConfig) -> Result<Self, LoadError> {
        let platform = Platform::host()
            .ok_or_else(|| LoadError::UnsupportedTarget(std::env::consts::OS.to_string()))?;

        #[cfg(target_os = "macos")]
        preload_iconv();

        let mut tried = Vec::new();
        for candidate in config.candidates(platform) {
            // SAFETY: library initializers of libfuse and its ports have no
            // preconditions.
            match unsafe { Library::new(&candidate) } {
                Ok(lib) => return Self::bind(candidate, lib, platform, config),
                Err(source) if config.library_path.is_some() => {
                    return Err(LoadError::Open {
                        library: candidate,
                        source,
                    });
                }
                Err(e) => {
                    tracing::debug!(library = %candidate.display(), error = %e, "candidate not loadable");
                    tried.push(candidate.display().to_string());
                }
            }
        }
        Err(LoadError::NotFound { tried })
    }

    fn bind(
        path: PathBuf,
        lib: Library,
        host: Platform,
        config: &LoaderConfig,
    ) -> Result<Self, LoadError> {
        let missing = |symbol: &'static str| LoadError::Symbol {
            library: path.clone(),
            symbol,
        };

        // SAFETY: the symbol types match the libfuse prototypes.
        let fuse_version: FuseVersionFn = unsafe {
            *lib.get::<FuseVersionFn>(b"fuse_version\0")
                .map_err(|_| missing("fuse_version"))?
        };
        // SAFETY: fuse_version has no preconditions.
        let raw = unsafe { fuse_version() };
        let version = ApiVersion::from_raw(raw).ok_or_else(|| LoadError::UnparseableVersion {
            library: path.clone(),
            raw,
        })?;

        match version.major {
            2 if version.minor < 6 => {
                return Err(LoadError::TooOld {
                    library: path,
                    major: version.major,
                    minor: version.minor,
                });
            }
            2 | 3 => {}
            major => {
                return Err(LoadError::WrongMajor {
                    library: path,
                    major,
                });
            }
        }

        if let Some(preferred) = config.api_preference
            && preferred != version.major
        {
            tracing::warn!(
                library = %path.display(),
                preferred,
                found = version.major,
                "preferred FUSE API version not available"
            );
        }

        // SAFETY: only the symbol's presence is checked.
        let macfuse = host == Platform::Darwin
            && unsafe { lib.get::<*const c_void>(b"macfuse_version\0") }.is_ok();
        let platform = if macfuse {
            Platform::DarwinMacFuse
        } else {
            host
        };

        let target = Target::host(version, platform)?;
        let schema = Schema::select(target)?;

        // SAFETY: the symbol types match the libfuse prototypes.
        let (main, get_context, exit, notify_poll, pollhandle_destroy) = unsafe {
            let main = if platform == Platform::OpenBsd {
                MainEntry::Compat(
                    *lib.get::<FuseMainFn>(b"fuse_main\0")
                        .map_err(|_| missing("fuse_main"))?,
                )
            } else {
                MainEntry::Real(
                    *lib.get::<FuseMainRealFn>(b"fuse_main_real\0")
                        .map_err(|_| missing("fuse_main_real"))?,
                )
            };
            let get_context = *lib
                .get::<FuseGetContextFn>(b"fuse_get_context\0")
                .map_err(|_| missing("fuse_get_context"))?;
            let exit = lib.get::<FuseExitFn>(b"fuse_exit\0").ok().map(|s| *s);
            let notify_poll = lib
                .get::<FuseNotifyPollFn>(b"fuse_notify_poll\0")
                .ok()
                .map(|s| *s);
            let pollhandle_destroy = lib
                .get::<FusePollhandleDestroyFn>(b"fuse_pollhandle_destroy\0")
                .ok()
                .map(|s| *s);
            (main, get_context, exit, notify_poll, pollhandle_destroy)
        };

        tracing::info!(
            library = %path.display(),
            version = %version,
            target = %target,
            "loaded FUSE library"
        );

        Ok(Self {
            path,
            version,
            schema,
            main,
            get_context,
            exit,
            notify_poll,
            pollhandle_destroy,
            _lib: lib,
        })
    }

    /// File name or path the library was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn version(&self) -> ApiVersion {
        self.version
    }

    pub fn target(&self) -> Target {
        self.schema.target()
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Reads `fuse_get_context()`. `None` outside a libfuse callback.
    pub(crate) fn context(&self) -> Option<NativeContext> {
        // SAFETY: fuse_get_context has no preconditions.
        let ptr = unsafe { (self.get_context)() };
        if ptr.is_null() {
            return None;
        }

        let slots = &self.schema.context_slots;
        // SAFETY: libfuse returns a pointer to its thread-local fuse_context,
        // laid out as the selected schema describes.
        let record = unsafe {
            RecordRef::from_raw(
                ptr.cast::<u8>(),
                self.schema.context().size(),
                self.schema.big_endian(),
            )
        };

        Some(NativeContext {
            call: CallContext {
                uid: record.u64(slots.uid) as u32,
                gid: record.u64(slots.gid) as u32,
                pid: record.i64(slots.pid) as i32,
                umask: slots.umask.map(|s| record.u64(s) as u32),
            },
            fuse: record.u64(slots.fuse) as usize as *mut c_void,
            private_data: record.u64(slots.private_data) as usize as *mut c_void,
        })
    }

    /// How a callback running against `fuse` can stop the loop.
    pub(crate) fn exit_hook(&self, fuse: *mut c_void) -> ExitHook {
        match self.exit {
            Some(exit) if !fuse.is_null() => ExitHook::Native { exit, fuse },
            None if self.schema.target().platform == Platform::OpenBsd => ExitHook::Signal,
            _ => ExitHook::None,
        }
    }

    /// `fuse_notify_poll(ph)`, or `None` when the library lacks it.
    ///
    /// # Safety
    ///
    /// `ph` must be a live poll handle from this library.
    pub(crate) unsafe fn notify_poll(&self, ph: *mut c_void) -> Option<c_int> {
        // SAFETY: guaranteed by the caller.
        self.notify_poll.map(|notify| unsafe { notify(ph) })
    }

    /// `fuse_pollhandle_destroy(ph)`; leaks the handle when the library
    /// lacks it.
    ///
    /// # Safety
    ///
    /// `ph` must be a live poll handle from this library, unused afterwards.
    pub(crate) unsafe fn destroy_pollhandle(&self, ph: *mut c_void) {
        if let Some(destroy) = self.pollhandle_destroy {
            // SAFETY: guaranteed by the caller.
            unsafe { destroy(ph) };
        }
    }

    /// Runs the native main loop.
    ///
    /// # Safety
    ///
    /// `argv` must hold `argc` valid C strings followed by a NULL entry, and
    /// `ops` must point to an operation table of `op_size` bytes laid out as
    /// the schema describes, valid until this returns.
    pub(crate) unsafe fn main(
        &self,
        argv: &mut [*mut c_char],
        ops: *const c_void,
        op_size: usize,
        user_data: *mut c_void,
    ) -> c_int {
        let argc = (argv.len() - 1) as c_int;
        // SAFETY: guaranteed by the caller.
        unsafe {
            match self.main {
                MainEntry::Real(main) => main(argc, argv.as_mut_ptr(), ops, op_size, user_data),
                MainEntry::Compat(main) => main(argc, argv.as_mut_ptr(), ops, user_data),
            }
        }
    }
}

/// osxfuse and fuse-t reference iconv symbols without linking it.
#[cfg(target_os = "macos")]
fn preload_iconv() {
    use libloading::os::unix::{Library as UnixLibrary, RTLD_GLOBAL, RTLD_NOW};

    // SAFETY: libiconv has no initializer preconditions.
    match unsafe { UnixLibrary::open(Some("libiconv.2.dylib"), RTLD_NOW | RTLD_GLOBAL) } {
        Ok(lib) => {
            // Never unloaded.
            let _ = lib.into_raw();
        }
        Err(e) => tracing::debug!(error = %e, "libiconv not preloaded"),
    }
}
