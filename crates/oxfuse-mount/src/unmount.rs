//! Unmounting through the platform's FUSE tooling.
//!
//! - **Linux/FreeBSD**: `fusermount -u`, `fusermount3 -u`, then `umount`
//! - **macOS**: `diskutil unmount`, then `umount`
//! - **Other**: unsupported
//!
//! Unmounting makes the native loop of the owning session return, which is
//! how a background session is stopped from another thread.

use std::path::Path;
use std::process::Command;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::Result;

/// How long a single unmount helper may run before the next one is tried.
const HELPER_TIMEOUT: Duration = Duration::from_secs(3);

/// Runs `program args.. mountpoint`, returning `Ok(true)` on success.
fn run_helper(program: &str, args: &[&str], mountpoint: &Path) -> Result<bool> {
    let (tx, rx) = mpsc::channel();
    let mut command = Command::new(program);
    command.args(args).arg(mountpoint);

    std::thread::spawn(move || {
        let _ = tx.send(command.output());
    });

    match rx.recv_timeout(HELPER_TIMEOUT) {
        Ok(Ok(output)) if output.status.success() => {
            tracing::debug!(
                program,
                mountpoint = %mountpoint.display(),
                "unmount succeeded"
            );
            Ok(true)
        }
        Ok(Ok(output)) => {
            tracing::debug!(
                program,
                mountpoint = %mountpoint.display(),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "unmount helper failed"
            );
            Ok(false)
        }
        Ok(Err(e)) => {
            tracing::debug!(program, error = %e, "unmount helper unavailable");
            Ok(false)
        }
        Err(_) => {
            tracing::warn!(
                program,
                mountpoint = %mountpoint.display(),
                "unmount helper timed out"
            );
            Ok(false)
        }
    }
}

fn try_helpers(mountpoint: &Path, helpers: &[(&str, &[&str])]) -> Result<()> {
    for (program, args) in helpers {
        if run_helper(program, args, mountpoint)? {
            return Ok(());
        }
    }
    anyhow::bail!("failed to unmount {}", mountpoint.display())
}

/// Unmounts the filesystem at `mountpoint`.
///
/// Fails if the mount is busy; see [`lazy_unmount`].
pub fn unmount(mountpoint: &Path) -> Result<()> {
    #[cfg(any(target_os = "linux", target_os = "freebsd"))]
    {
        try_helpers(
            mountpoint,
            &[("fusermount", &["-u"]), ("fusermount3", &["-u"]), ("umount", &[])],
        )
    }

    #[cfg(target_os = "macos")]
    {
        try_helpers(mountpoint, &[("diskutil", &["unmount"]), ("umount", &[])])
    }

    #[cfg(target_os = "openbsd")]
    {
        try_helpers(mountpoint, &[("umount", &[])])
    }

    #[cfg(not(any(
        target_os = "linux",
        target_os = "freebsd",
        target_os = "macos",
        target_os = "openbsd"
    )))]
    {
        anyhow::bail!(
            "unmount not supported on this platform for {}",
            mountpoint.display()
        )
    }
}

/// Detaches the mount immediately, letting open files drain afterwards.
///
/// macOS has no lazy unmount, so a forced unmount is used there.
pub fn lazy_unmount(mountpoint: &Path) -> Result<()> {
    #[cfg(target_os = "linux")]
    {
        try_helpers(
            mountpoint,
            &[
                ("fusermount", &["-uz"]),
                ("fusermount3", &["-uz"]),
                ("umount", &["-l"]),
            ],
        )
    }

    #[cfg(target_os = "macos")]
    {
        try_helpers(
            mountpoint,
            &[("diskutil", &["unmount", "force"]), ("umount", &["-f"])],
        )
    }

    #[cfg(any(target_os = "freebsd", target_os = "openbsd"))]
    {
        try_helpers(mountpoint, &[("umount", &["-f"])])
    }

    #[cfg(not(any(
        target_os = "linux",
        target_os = "freebsd",
        target_os = "macos",
        target_os = "openbsd"
    )))]
    {
        anyhow::bail!(
            "lazy unmount not supported on this platform for {}",
            mountpoint.display()
        )
    }
}
