//! Mount configuration.
//!
//! [`MountOptions`] collects everything that shapes a mount: how the
//! native loop is started, which `-o` options libfuse sees, and how the
//! dispatcher behaves.

use std::ffi::CString;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::dispatch::DispatchOptions;
use crate::error::MountError;
use crate::loader::LoaderConfig;
use crate::path::{self, PathEncoding};
use crate::report::{FailureReporter, LogReporter};
use crate::trampoline::TableOptions;
use crate::types::StatFill;

/// A `-o` option passed through to libfuse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountOption {
    /// A bare flag such as `allow_other` or `ro`.
    Flag(String),
    /// A `key=value` pair such as `max_read=131072`.
    Value(String, String),
}

/// Options for a [`Session`](crate::Session).
#[derive(Clone)]
pub struct MountOptions {
    /// Block the calling thread in [`mount`](crate::mount). When `false`,
    /// `mount` runs the loop on a background thread.
    ///
    /// Default: true.
    pub foreground: bool,

    /// Run the native loop single-threaded (`-s`).
    pub nothreads: bool,

    /// libfuse debug output (`-d`).
    pub debug: bool,

    /// Route `open`/`create` through `open_raw`/`create_raw`.
    pub raw_fi: bool,

    /// How path bytes from the kernel are decoded.
    pub encoding: PathEncoding,

    /// `uid=` option. Default: unset.
    pub uid: Option<u32>,

    /// `gid=` option. Default: unset.
    pub gid: Option<u32>,

    /// `umask=` option, written in octal. Default: unset.
    pub umask: Option<u32>,

    /// `fsname=` option. Defaults to the filesystem's type name.
    pub fsname: Option<String>,

    /// Any other `-o` options, in order.
    pub options: Vec<MountOption>,

    /// Which `struct stat` fields are written.
    pub stat_fill: StatFill,

    /// Run at most one primitive at a time, even on a multi-threaded loop.
    pub serialize: bool,

    /// Allow NULL paths for handle-based primitives (libfuse 2.8 and 2.9).
    pub nullpath_ok: bool,

    /// Receives failures that reach the kernel as `EIO`.
    pub reporter: Arc<dyn FailureReporter>,

    /// How the native library is located.
    pub loader: LoaderConfig,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            foreground: true,
            nothreads: false,
            debug: false,
            raw_fi: false,
            encoding: PathEncoding::default(),
            uid: None,
            gid: None,
            umask: None,
            fsname: None,
            options: Vec::new(),
            stat_fill: StatFill::default(),
            serialize: false,
            nullpath_ok: false,
            reporter: Arc::new(LogReporter),
            loader: LoaderConfig::default(),
        }
    }
}

impl fmt::Debug for MountOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountOptions")
            .field("foreground", &self.foreground)
            .field("nothreads", &self.nothreads)
            .field("debug", &self.debug)
            .field("raw_fi", &self.raw_fi)
            .field("encoding", &self.encoding)
            .field("uid", &self.uid)
            .field("gid", &self.gid)
            .field("umask", &self.umask)
            .field("fsname", &self.fsname)
            .field("options", &self.options)
            .field("stat_fill", &self.stat_fill)
            .field("serialize", &self.serialize)
            .field("nullpath_ok", &self.nullpath_ok)
            .field("loader", &self.loader)
            .finish_non_exhaustive()
    }
}

impl MountOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn foreground(mut self, on: bool) -> Self {
        self.foreground = on;
        self
    }

    #[must_use]
    pub fn nothreads(mut self, on: bool) -> Self {
        self.nothreads = on;
        self
    }

    #[must_use]
    pub fn debug(mut self, on: bool) -> Self {
        self.debug = on;
        self
    }

    #[must_use]
    pub fn raw_fi(mut self, on: bool) -> Self {
        self.raw_fi = on;
        self
    }

    #[must_use]
    pub fn encoding(mut self, encoding: PathEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    #[must_use]
    pub fn uid(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }

    #[must_use]
    pub fn gid(mut self, gid: u32) -> Self {
        self.gid = Some(gid);
        self
    }

    #[must_use]
    pub fn umask(mut self, umask: u32) -> Self {
        self.umask = Some(umask);
        self
    }

    #[must_use]
    pub fn fsname(mut self, name: impl Into<String>) -> Self {
        self.fsname = Some(name.into());
        self
    }

    /// Adds a bare `-o` flag.
    #[must_use]
    pub fn flag(mut self, name: impl Into<String>) -> Self {
        self.options.push(MountOption::Flag(name.into()));
        self
    }

    /// Adds a `key=value` `-o` option.
    #[must_use]
    pub fn option(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.options
            .push(MountOption::Value(key.into(), value.to_string()));
        self
    }

    #[must_use]
    pub fn stat_fill(mut self, fill: StatFill) -> Self {
        self.stat_fill = fill;
        self
    }

    #[must_use]
    pub fn serialize(mut self, on: bool) -> Self {
        self.serialize = on;
        self
    }

    #[must_use]
    pub fn nullpath_ok(mut self, on: bool) -> Self {
        self.nullpath_ok = on;
        self
    }

    #[must_use]
    pub fn reporter(mut self, reporter: impl FailureReporter + 'static) -> Self {
        self.reporter = Arc::new(reporter);
        self
    }

    #[must_use]
    pub fn loader(mut self, loader: LoaderConfig) -> Self {
        self.loader = loader;
        self
    }

    pub(crate) fn dispatch_options(&self) -> DispatchOptions {
        DispatchOptions {
            encoding: self.encoding,
            stat_fill: self.stat_fill,
            raw_fi: self.raw_fi,
            serialize: self.serialize,
            reporter: Arc::clone(&self.reporter),
        }
    }

    pub(crate) fn table_options(&self) -> TableOptions {
        TableOptions {
            nullpath_ok: self.nullpath_ok,
        }
    }

    /// The comma-separated `-o` value.
    pub(crate) fn option_string(&self, default_fsname: &str) -> Result<String, MountError> {
        let fsname = self.fsname.as_deref().unwrap_or(default_fsname);
        let mut parts = vec![format!("fsname={}", escape(fsname))];
        if let Some(uid) = self.uid {
            parts.push(format!("uid={uid}"));
        }
        if let Some(gid) = self.gid {
            parts.push(format!("gid={gid}"));
        }
        if let Some(umask) = self.umask {
            parts.push(format!("umask={umask:o}"));
        }
        for option in &self.options {
            match option {
                MountOption::Flag(name) => {
                    check_key(name)?;
                    parts.push(name.clone());
                }
                MountOption::Value(key, value) => {
                    check_key(key)?;
                    parts.push(format!("{key}={}", escape(value)));
                }
            }
        }
        Ok(parts.join(","))
    }

    /// Full argument vector for `fuse_main_real`, program name first.
    pub(crate) fn args(&self, default_fsname: &str, mountpoint: &Path) -> Result<Vec<CString>, MountError> {
        let mut args = vec![
            cstring(default_fsname)?,
            // Daemonizing would fork away from the Rust runtime.
            cstring("-f")?,
        ];
        if self.debug {
            args.push(cstring("-d")?);
        }
        if self.nothreads {
            args.push(cstring("-s")?);
        }
        args.push(cstring("-o")?);
        args.push(cstring(&self.option_string(default_fsname)?)?);
        args.push(
            path::encode(mountpoint.as_os_str(), PathEncoding::Raw).map_err(|_| {
                MountError::InvalidMountpoint {
                    path: mountpoint.to_path_buf(),
                    reason: "not representable as a C string".into(),
                }
            })?,
        );
        Ok(args)
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn check_key(key: &str) -> Result<(), MountError> {
    if key.is_empty() || key.contains([',', '=', '\\', '\0']) {
        return Err(MountError::InvalidOption(format!("invalid option name {key:?}")));
    }
    Ok(())
}

fn cstring(s: &str) -> Result<CString, MountError> {
    CString::new(s).map_err(|_| MountError::InvalidOption(format!("{s:?} contains NUL")))
}

/// Last path segment of a type name, without generics.
pub(crate) fn short_type_name(full: &str) -> &str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[CString]) -> Vec<&str> {
        args.iter().map(|a| a.to_str().unwrap()).collect()
    }

    #[test]
    fn test_default_option_string() {
        let opts = MountOptions::default();
        assert_eq!(opts.option_string("MemFs").unwrap(), "fsname=MemFs");
    }

    #[test]
    fn test_full_option_string() {
        let opts = MountOptions::new()
            .fsname("archive,one")
            .uid(1000)
            .gid(100)
            .umask(0o022)
            .flag("allow_other")
            .option("max_read", 131072)
            .option("subtype", r"a\b");
        assert_eq!(
            opts.option_string("MemFs").unwrap(),
            r"fsname=archive\,one,uid=1000,gid=100,umask=22,allow_other,max_read=131072,subtype=a\\b"
        );
    }

    #[test]
    fn test_bad_option_names_are_rejected() {
        for key in ["", "a,b", "a=b"] {
            let opts = MountOptions::new().flag(key);
            assert!(matches!(
                opts.option_string("x"),
                Err(MountError::InvalidOption(_))
            ));
        }
    }

    #[test]
    fn test_args_layout() {
        let opts = MountOptions::new().debug(true).nothreads(true);
        let args = opts.args("MemFs", Path::new("/mnt/x")).unwrap();
        assert_eq!(
            strings(&args),
            ["MemFs", "-f", "-d", "-s", "-o", "fsname=MemFs", "/mnt/x"]
        );
    }

    #[test]
    fn test_args_always_foreground() {
        let opts = MountOptions::new().foreground(false);
        let args = opts.args("Fs", Path::new("/m")).unwrap();
        assert_eq!(strings(&args), ["Fs", "-f", "-o", "fsname=Fs", "/m"]);
    }

    #[test]
    fn test_nul_in_value_is_rejected() {
        let opts = MountOptions::new().option("subtype", "a\0b");
        assert!(matches!(
            opts.args("Fs", Path::new("/m")),
            Err(MountError::InvalidOption(_))
        ));
    }

    #[test]
    fn test_short_type_name() {
        assert_eq!(short_type_name("my_crate::fs::MemFs"), "MemFs");
        assert_eq!(short_type_name("my_crate::Wrap<other::Inner>"), "Wrap");
        assert_eq!(short_type_name("Plain"), "Plain");
    }

    #[test]
    fn test_dispatch_options_follow_mount_options() {
        let opts = MountOptions::new()
            .raw_fi(true)
            .serialize(true)
            .encoding(PathEncoding::Utf8)
            .stat_fill(StatFill::KernelSubset);
        let d = opts.dispatch_options();
        assert!(d.raw_fi && d.serialize);
        assert_eq!(d.encoding, PathEncoding::Utf8);
        assert_eq!(d.stat_fill, StatFill::KernelSubset);
    }
}
