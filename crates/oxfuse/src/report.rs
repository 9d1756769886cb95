//! Side channel for failures that the kernel only sees as an errno.
//!
//! Unmapped errors and panics are answered with `EIO`. The detail goes here
//! so the embedding application can still observe it.

use std::fmt;
use std::path::PathBuf;

use crate::operations::Primitive;

/// What went wrong inside a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The operation returned an error without a usable errno.
    Unmapped,
    /// The operation returned `Errno(e)` with `e <= 0`.
    InvalidErrno,
    /// The operation panicked.
    Panic,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureKind::Unmapped => "unmapped error",
            FailureKind::InvalidErrno => "invalid errno",
            FailureKind::Panic => "panic",
        })
    }
}

/// A failure that was hidden behind an errno.
#[derive(Debug, Clone)]
pub struct Failure {
    /// Primitive being served.
    pub primitive: Primitive,
    /// Path argument of the call, decoded lossily, when there was one.
    pub path: Option<PathBuf>,
    /// Failure class.
    pub kind: FailureKind,
    /// Error display or panic payload.
    pub message: String,
    /// Negative errno that was returned to libfuse.
    pub returned: i32,
}

/// Receives failures from the dispatcher.
///
/// Called on the FUSE worker thread that served the request, after the
/// reply value is decided. Implementations must not panic; a panicking
/// reporter is caught and logged.
pub trait FailureReporter: Send + Sync {
    /// Handles one failure.
    fn report(&self, failure: &Failure);
}

/// Default reporter: logs through `tracing` at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl FailureReporter for LogReporter {
    fn report(&self, failure: &Failure) {
        tracing::error!(
            op = failure.primitive.name(),
            path = ?failure.path,
            kind = %failure.kind,
            errno = failure.returned,
            "{}",
            failure.message
        );
    }
}

impl<F> FailureReporter for F
where
    F: Fn(&Failure) + Send + Sync,
{
    fn report(&self, failure: &Failure) {
        self(failure);
    }
}
