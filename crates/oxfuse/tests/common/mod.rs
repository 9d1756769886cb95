//! Common infrastructure for the mount tests.
//!
//! Provides [`TestMount`], which mounts a [`MemFs`] on a temporary
//! directory in a background session, and the `skip_if_no_fuse!` and
//! `require_mount!` macros.

// Not every test uses every helper.
#![allow(dead_code)]

pub mod memfs;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Once;
use std::time::Duration;

use oxfuse::{BackgroundSession, MountOptions, Session};
use tempfile::TempDir;

pub use memfs::MemFs;

/// How long to wait for a mount to become ready.
pub const MOUNT_READY_TIMEOUT: Duration = Duration::from_secs(5);

static TRACING: Once = Once::new();

/// Routes `tracing` output to the test writer, filtered by `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A mounted filesystem that unmounts on drop.
pub struct TestMount {
    session: Option<BackgroundSession>,
    pub mount_path: PathBuf,
    _temp: TempDir,
}

impl TestMount {
    /// Mounts a fresh [`MemFs`].
    pub fn memfs() -> Result<Self, String> {
        Self::with_options(MemFs::default(), MountOptions::new())
    }

    /// Mounts `fs` with `options`; `foreground` is forced off.
    pub fn with_options<O: oxfuse::Operations>(fs: O, options: MountOptions) -> Result<Self, String> {
        init_tracing();

        let temp = TempDir::new().map_err(|e| format!("Failed to create temp dir: {e}"))?;
        let mount_path = temp.path().join("mnt");
        fs::create_dir(&mount_path).map_err(|e| format!("Failed to create mount point: {e}"))?;

        let session = Session::new(fs, &mount_path, options.foreground(false))
            .map_err(|e| format!("Failed to create session: {e}"))?
            .spawn()
            .map_err(|e| format!("Failed to mount: {e}"))?;
        session
            .wait_mounted(MOUNT_READY_TIMEOUT)
            .map_err(|e| format!("Mount never became ready: {e}"))?;

        Ok(Self {
            session: Some(session),
            mount_path,
            _temp: temp,
        })
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.mount_path.join(rel)
    }

    pub fn write(&self, rel: &str, data: &[u8]) -> io::Result<()> {
        fs::write(self.path(rel), data)
    }

    pub fn read(&self, rel: &str) -> io::Result<Vec<u8>> {
        fs::read(self.path(rel))
    }

    /// Sorted entry names of a directory.
    pub fn list(&self, rel: &str) -> io::Result<Vec<String>> {
        let mut names = fs::read_dir(self.path(rel))?
            .map(|e| e.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<io::Result<Vec<_>>>()?;
        names.sort();
        Ok(names)
    }

    /// Unmounts and returns the session result.
    pub fn unmount(mut self) -> Result<(), oxfuse::MountError> {
        match self.session.take() {
            Some(session) => session.unmount(),
            None => Ok(()),
        }
    }

    pub fn mount_path(&self) -> &Path {
        &self.mount_path
    }
}

impl Drop for TestMount {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.unmount() {
                eprintln!("unmount of {} failed: {e}", self.mount_path.display());
            }
        }
    }
}

/// Checks whether FUSE is available on this system.
pub fn fuse_available() -> bool {
    #[cfg(target_os = "linux")]
    {
        Path::new("/dev/fuse").exists()
    }
    #[cfg(target_os = "macos")]
    {
        Path::new("/Library/Filesystems/macfuse.fs").exists()
            || Path::new("/Library/Filesystems/osxfuse.fs").exists()
            || Path::new("/usr/local/lib/libfuse-t.dylib").exists()
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        false
    }
}

/// Skip test if FUSE is not available.
#[macro_export]
macro_rules! skip_if_no_fuse {
    () => {
        if !$crate::common::fuse_available() {
            eprintln!("Skipping test: FUSE not available on this system");
            return;
        }
    };
}

/// Skip test if mounting fails (common in CI environments).
#[macro_export]
macro_rules! require_mount {
    ($mount_result:expr) => {
        match $mount_result {
            Ok(m) => m,
            Err(e) => {
                eprintln!("Skipping test: {}", e);
                return;
            }
        }
    };
}
