//! The high-level dispatcher between trampolines and [`Operations`].
//!
//! Every primitive goes through [`Dispatcher::call`], which enforces the
//! session state machine, optionally serializes calls, contains panics and
//! turns the result into the signed errno libfuse expects.
//!
//! State machine:
//!
//! ```text
//! Unmounted --init--> Initializing --> Serving --destroy--> Destroying --> Unmounted
//! ```
//!
//! Primitives are refused with `ENOTCONN` outside `Serving`. `destroy`
//! takes the dispatch gate exclusively, so it starts only after in-flight
//! calls have returned and no call starts after it.

use std::any::Any;
use std::ffi::c_int;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, trace, warn};

use crate::error::{FuseError, FuseResult};
use crate::operations::{Operations, Primitive};
use crate::path::{self, PathEncoding};
use crate::report::{Failure, FailureKind, FailureReporter, LogReporter};
use crate::schema::Schema;
use crate::schema::record::{RecordMut, RecordRef};
use crate::types::{ConnectionInfo, FileLock, Stat, StatFill, StatVfs};

/// Lifecycle of a mounted filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Unmounted = 0,
    Initializing = 1,
    Serving = 2,
    Destroying = 3,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => SessionState::Initializing,
            2 => SessionState::Serving,
            3 => SessionState::Destroying,
            _ => SessionState::Unmounted,
        }
    }
}

/// Per-session dispatch behaviour.
#[derive(Clone)]
pub struct DispatchOptions {
    pub encoding: PathEncoding,
    pub stat_fill: StatFill,
    /// Route `open`/`create` through `open_raw`/`create_raw`.
    pub raw_fi: bool,
    /// Run at most one primitive at a time.
    pub serialize: bool,
    pub reporter: Arc<dyn FailureReporter>,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            encoding: PathEncoding::default(),
            stat_fill: StatFill::default(),
            raw_fi: false,
            serialize: false,
            reporter: Arc::new(LogReporter),
        }
    }
}

impl fmt::Debug for DispatchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchOptions")
            .field("encoding", &self.encoding)
            .field("stat_fill", &self.stat_fill)
            .field("raw_fi", &self.raw_fi)
            .field("serialize", &self.serialize)
            .finish_non_exhaustive()
    }
}

/// Routes native callbacks to an [`Operations`] implementation.
pub struct Dispatcher<O: Operations> {
    ops: O,
    schema: Schema,
    options: DispatchOptions,
    state: AtomicU8,
    gate: RwLock<()>,
    serial: Option<Mutex<()>>,
}

impl<O: Operations> Dispatcher<O> {
    pub fn new(ops: O, schema: Schema, options: DispatchOptions) -> Self {
        let serial = options.serialize.then(|| Mutex::new(()));
        Self {
            ops,
            schema,
            options,
            state: AtomicU8::new(SessionState::Unmounted as u8),
            gate: RwLock::new(()),
            serial,
        }
    }

    pub fn operations(&self) -> &O {
        &self.ops
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn options(&self) -> &DispatchOptions {
        &self.options
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Runs one primitive.
    ///
    /// `path` is the raw path argument, used for logging and failure
    /// reports. `f` performs decoding, the user call and encoding, and
    /// returns the non-negative reply value.
    pub(crate) fn call<F>(&self, primitive: Primitive, path: Option<&[u8]>, f: F) -> c_int
    where
        F: FnOnce() -> FuseResult<c_int>,
    {
        let _gate = self.gate.read();
        if self.state() != SessionState::Serving {
            debug!(op = primitive.name(), state = ?self.state(), "call outside serving state");
            return -libc::ENOTCONN;
        }
        let _serial = self.serial.as_ref().map(|m| m.lock());

        trace!(op = primitive.name(), path = ?path.map(path::lossy), "dispatch");

        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(Ok(n)) => n,
            Ok(Err(err)) => self.fail(primitive, path, &err),
            Err(payload) => {
                self.panicked(primitive, path, payload.as_ref());
                -libc::EIO
            }
        }
    }

    /// Maps an error to a negative errno, reporting it when it carries no
    /// usable errno.
    fn fail(&self, primitive: Primitive, path: Option<&[u8]>, err: &FuseError) -> c_int {
        match err {
            FuseError::Errno(e) if *e > 0 => {
                debug!(op = primitive.name(), errno = *e, "operation returned errno");
                -*e
            }
            FuseError::Errno(e) => {
                self.report(
                    primitive,
                    path,
                    FailureKind::InvalidErrno,
                    format!("non-positive errno {e}"),
                    -libc::EINVAL,
                );
                -libc::EINVAL
            }
            FuseError::InvalidPath(msg) => {
                debug!(op = primitive.name(), error = %msg, "argument not representable");
                -libc::EINVAL
            }
            other => match other.mapped_errno() {
                Some(e) => {
                    debug!(op = primitive.name(), errno = e, error = %other, "operation failed");
                    -e
                }
                None => {
                    self.report(
                        primitive,
                        path,
                        FailureKind::Unmapped,
                        other.to_string(),
                        -libc::EIO,
                    );
                    -libc::EIO
                }
            },
        }
    }

    fn panicked(&self, primitive: Primitive, path: Option<&[u8]>, payload: &(dyn Any + Send)) {
        self.report(
            primitive,
            path,
            FailureKind::Panic,
            panic_message(payload),
            -libc::EIO,
        );
    }

    fn report(
        &self,
        primitive: Primitive,
        path: Option<&[u8]>,
        kind: FailureKind,
        message: String,
        returned: c_int,
    ) {
        let failure = Failure {
            primitive,
            path: path.map(|p| PathBuf::from(path::lossy(p))),
            kind,
            message,
            returned,
        };
        let reporter = &self.options.reporter;
        if panic::catch_unwind(AssertUnwindSafe(|| reporter.report(&failure))).is_err() {
            tracing::error!(op = primitive.name(), "failure reporter panicked");
        }
    }

    /// Runs `Operations::init`. Only the first delivery has any effect.
    pub(crate) fn init(&self, conn: &mut ConnectionInfo) {
        if !self.transition(SessionState::Unmounted, SessionState::Initializing) {
            warn!(state = ?self.state(), "init delivered outside unmounted state, ignoring");
            return;
        }
        info!(
            proto_major = conn.proto_major,
            proto_minor = conn.proto_minor,
            "initializing filesystem"
        );

        match panic::catch_unwind(AssertUnwindSafe(|| self.ops.init(conn))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                self.fail(Primitive::Init, None, &err);
            }
            Err(payload) => self.panicked(Primitive::Init, None, payload.as_ref()),
        }

        self.state
            .store(SessionState::Serving as u8, Ordering::Release);
        info!("filesystem serving");
    }

    /// Runs `Operations::destroy` once, after in-flight calls finish.
    ///
    /// A no-op unless the session is serving, so it is safe to call again
    /// after the native library already delivered `destroy`.
    pub fn destroy(&self) {
        if !self.transition(SessionState::Serving, SessionState::Destroying) {
            debug!(state = ?self.state(), "destroy skipped");
            return;
        }
        let _gate = self.gate.write();
        info!("destroying filesystem");

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| self.ops.destroy())) {
            self.panicked(Primitive::Destroy, None, payload.as_ref());
        }

        self.state
            .store(SessionState::Unmounted as u8, Ordering::Release);
        info!("filesystem unmounted");
    }

    // --- argument decoding ------------------------------------------------

    pub(crate) fn decode<'a>(&self, bytes: Option<&'a [u8]>) -> FuseResult<&'a Path> {
        let bytes = bytes.ok_or_else(|| FuseError::InvalidPath("NULL path".into()))?;
        path::decode(bytes, self.options.encoding)
    }

    pub(crate) fn decode_opt<'a>(&self, bytes: Option<&'a [u8]>) -> FuseResult<Option<&'a Path>> {
        bytes
            .map(|b| path::decode(b, self.options.encoding))
            .transpose()
    }

    // --- record marshalling -----------------------------------------------

    /// Writes `st` into a native `struct stat`, honouring the fill policy.
    pub(crate) fn write_stat(&self, record: &mut RecordMut<'_>, st: &Stat) {
        let s = &self.schema.stat_slots;
        record.zero();

        record.set_u64(s.mode, u64::from(st.mode));
        record.set_u64(s.nlink, st.nlink);
        record.set_u64(s.uid, u64::from(st.uid));
        record.set_u64(s.gid, u64::from(st.gid));
        record.set_i64(s.size, st.size);
        record.set_i64(s.blocks, st.blocks);
        record.set_time(s.atime, st.atime);
        record.set_time(s.mtime, st.mtime);
        record.set_time(s.ctime, st.ctime);

        if self.options.stat_fill == StatFill::KernelSubset {
            return;
        }

        record.set_u64(s.ino, st.ino);
        if let Some(low) = s.ino_low {
            record.set_u64(low, st.ino);
        }
        record.set_u64(s.dev, st.dev);
        record.set_u64(s.rdev, st.rdev);
        record.set_i64(s.blksize, st.blksize);
        if let Some(slot) = s.birthtime {
            record.set_time(slot, st.birthtime);
        }
        if let Some(slot) = s.flags {
            record.set_u64(slot, u64::from(st.flags));
        }
        if let Some(slot) = s.generation {
            record.set_u64(slot, st.generation);
        }
    }

    pub(crate) fn write_statvfs(&self, record: &mut RecordMut<'_>, vfs: &StatVfs) {
        let s = &self.schema.statvfs_slots;
        record.zero();
        record.set_u64(s.bsize, vfs.bsize);
        record.set_u64(s.frsize, vfs.frsize);
        record.set_u64(s.blocks, vfs.blocks);
        record.set_u64(s.bfree, vfs.bfree);
        record.set_u64(s.bavail, vfs.bavail);
        record.set_u64(s.files, vfs.files);
        record.set_u64(s.ffree, vfs.ffree);
        record.set_u64(s.favail, vfs.favail);
        record.set_u64(s.fsid, vfs.fsid);
        record.set_u64(s.flag, vfs.flag);
        record.set_u64(s.namemax, vfs.namemax);
    }

    pub(crate) fn read_flock(&self, record: RecordRef<'_>) -> Option<FileLock> {
        let s = self.schema.flock_slots.as_ref()?;
        Some(FileLock {
            kind: record.i64(s.kind) as i16,
            whence: record.i64(s.whence) as i16,
            start: record.i64(s.start),
            len: record.i64(s.len),
            pid: record.i64(s.pid) as i32,
        })
    }

    pub(crate) fn write_flock(&self, record: &mut RecordMut<'_>, lock: &FileLock) {
        let Some(s) = self.schema.flock_slots.as_ref() else {
            return;
        };
        record.set_i64(s.kind, i64::from(lock.kind));
        record.set_i64(s.whence, i64::from(lock.whence));
        record.set_i64(s.start, lock.start);
        record.set_i64(s.len, lock.len);
        record.set_i64(s.pid, i64::from(lock.pid));
    }

    pub(crate) fn read_conn(&self, record: RecordRef<'_>) -> ConnectionInfo {
        let s = &self.schema.conn_slots;
        let get = |slot| record.u64(slot) as u32;
        ConnectionInfo {
            proto_major: get(s.proto_major),
            proto_minor: get(s.proto_minor),
            async_read: s.async_read.map_or(0, get),
            max_write: get(s.max_write),
            max_read: s.max_read.map_or(0, get),
            max_readahead: get(s.max_readahead),
            capable: get(s.capable),
            want: get(s.want),
            max_background: get(s.max_background),
            congestion_threshold: get(s.congestion_threshold),
            time_gran: s.time_gran.map_or(0, get),
        }
    }

    /// Writes back the negotiable connection fields.
    pub(crate) fn write_conn(&self, record: &mut RecordMut<'_>, conn: &ConnectionInfo) {
        let s = &self.schema.conn_slots;
        if let Some(slot) = s.async_read {
            record.set_u64(slot, u64::from(conn.async_read));
        }
        if let Some(slot) = s.max_read {
            record.set_u64(slot, u64::from(conn.max_read));
        }
        if let Some(slot) = s.time_gran {
            record.set_u64(slot, u64::from(conn.time_gran));
        }
        record.set_u64(s.max_write, u64::from(conn.max_write));
        record.set_u64(s.max_readahead, u64::from(conn.max_readahead));
        record.set_u64(s.want, u64::from(conn.want));
        record.set_u64(s.max_background, u64::from(conn.max_background));
        record.set_u64(s.congestion_threshold, u64::from(conn.congestion_threshold));
    }
}

impl<O: Operations> fmt::Debug for Dispatcher<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("target", &self.schema.target())
            .field("state", &self.state())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::schema::record::RecordBuf;
    use crate::schema::{ApiVersion, Arch, Platform, Target};
    use crate::types::Timespec;
    use std::sync::atomic::AtomicUsize;

    pub(crate) fn linux_schema() -> Schema {
        Schema::select(Target::new(
            Platform::Linux,
            Arch::X86_64,
            ApiVersion::new(2, 9),
        ))
        .unwrap()
    }

    #[derive(Default)]
    struct Counting {
        inits: AtomicUsize,
        destroys: AtomicUsize,
    }

    impl Operations for Counting {
        fn init(&self, _conn: &mut ConnectionInfo) -> FuseResult<()> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn destroy(&self) {
            self.destroys.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn collecting() -> (Arc<Mutex<Vec<Failure>>>, DispatchOptions) {
        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&failures);
        let options = DispatchOptions {
            reporter: Arc::new(move |f: &Failure| sink.lock().push(f.clone())),
            ..DispatchOptions::default()
        };
        (failures, options)
    }

    fn serving() -> (Dispatcher<Counting>, Arc<Mutex<Vec<Failure>>>) {
        let (failures, options) = collecting();
        let d = Dispatcher::new(Counting::default(), linux_schema(), options);
        d.init(&mut ConnectionInfo::default());
        (d, failures)
    }

    #[test]
    fn test_refuses_calls_before_init() {
        let d = Dispatcher::new(Counting::default(), linux_schema(), DispatchOptions::default());
        assert_eq!(d.state(), SessionState::Unmounted);
        let ret = d.call(Primitive::Getattr, None, || Ok(0));
        assert_eq!(ret, -libc::ENOTCONN);
    }

    #[test]
    fn test_init_and_destroy_run_once() {
        let (d, _) = serving();
        assert_eq!(d.state(), SessionState::Serving);

        d.init(&mut ConnectionInfo::default());
        assert_eq!(d.operations().inits.load(Ordering::SeqCst), 1);

        d.destroy();
        d.destroy();
        assert_eq!(d.operations().destroys.load(Ordering::SeqCst), 1);
        assert_eq!(d.state(), SessionState::Unmounted);

        assert_eq!(d.call(Primitive::Read, None, || Ok(5)), -libc::ENOTCONN);
    }

    #[test]
    fn test_destroy_without_init_is_skipped() {
        let d = Dispatcher::new(Counting::default(), linux_schema(), DispatchOptions::default());
        d.destroy();
        assert_eq!(d.operations().destroys.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_errno_is_negated() {
        let (d, failures) = serving();
        for code in [libc::ENOENT, libc::EACCES, libc::ENOSPC] {
            let ret = d.call(Primitive::Getattr, Some(b"/x"), || Err(FuseError::Errno(code)));
            assert_eq!(ret, -code);
        }
        assert!(failures.lock().is_empty());
    }

    #[test]
    fn test_success_value_passes_through() {
        let (d, _) = serving();
        assert_eq!(d.call(Primitive::Read, None, || Ok(4096)), 4096);
    }

    #[test]
    fn test_non_positive_errno_is_einval_and_reported() {
        let (d, failures) = serving();
        let ret = d.call(Primitive::Mkdir, Some(b"/d"), || Err(FuseError::Errno(0)));
        assert_eq!(ret, -libc::EINVAL);

        let failures = failures.lock();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].kind, FailureKind::InvalidErrno);
        assert_eq!(failures[0].path.as_deref(), Some(Path::new("/d")));
    }

    #[test]
    fn test_unmapped_error_is_eio_and_reported() {
        let (d, failures) = serving();
        let ret = d.call(Primitive::Write, Some(b"/f"), || {
            Err(anyhow::anyhow!("backend unavailable").into())
        });
        assert_eq!(ret, -libc::EIO);

        let failures = failures.lock();
        assert_eq!(failures[0].kind, FailureKind::Unmapped);
        assert_eq!(failures[0].primitive, Primitive::Write);
        assert_eq!(failures[0].message, "backend unavailable");
        assert_eq!(failures[0].returned, -libc::EIO);
    }

    #[test]
    fn test_io_error_with_os_code_is_mapped() {
        let (d, failures) = serving();
        let ret = d.call(Primitive::Unlink, None, || {
            Err(std::io::Error::from_raw_os_error(libc::EPERM).into())
        });
        assert_eq!(ret, -libc::EPERM);
        assert!(failures.lock().is_empty());
    }

    #[test]
    fn test_panic_is_eio_and_reported() {
        let (d, failures) = serving();
        let ret = d.call(Primitive::Read, Some(b"/boom"), || panic!("exploded"));
        assert_eq!(ret, -libc::EIO);

        let failures = failures.lock();
        assert_eq!(failures[0].kind, FailureKind::Panic);
        assert_eq!(failures[0].message, "exploded");

        // The dispatcher keeps serving.
        drop(failures);
        assert_eq!(d.call(Primitive::Read, None, || Ok(1)), 1);
    }

    #[test]
    fn test_panicking_reporter_is_contained() {
        let options = DispatchOptions {
            reporter: Arc::new(|_: &Failure| panic!("reporter broke")),
            ..DispatchOptions::default()
        };
        let d = Dispatcher::new(Counting::default(), linux_schema(), options);
        d.init(&mut ConnectionInfo::default());
        let ret = d.call(Primitive::Read, None, || Err(anyhow::anyhow!("x").into()));
        assert_eq!(ret, -libc::EIO);
    }

    #[test]
    fn test_invalid_path_is_einval() {
        let options = DispatchOptions {
            encoding: PathEncoding::Utf8,
            ..DispatchOptions::default()
        };
        let d = Dispatcher::new(Counting::default(), linux_schema(), options);
        d.init(&mut ConnectionInfo::default());

        let bytes: &[u8] = b"/bad\xff";
        let ret = d.call(Primitive::Getattr, Some(bytes), || {
            d.decode(Some(bytes))?;
            Ok(0)
        });
        assert_eq!(ret, -libc::EINVAL);
    }

    #[test]
    fn test_serialized_calls_do_not_overlap() {
        let options = DispatchOptions {
            serialize: true,
            ..DispatchOptions::default()
        };
        let d = Arc::new(Dispatcher::new(Counting::default(), linux_schema(), options));
        d.init(&mut ConnectionInfo::default());

        let active = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let d = Arc::clone(&d);
                let active = Arc::clone(&active);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        d.call(Primitive::Read, None, || {
                            assert_eq!(active.fetch_add(1, Ordering::SeqCst), 0);
                            std::thread::yield_now();
                            active.fetch_sub(1, Ordering::SeqCst);
                            Ok(0)
                        });
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn test_full_stat_fill() {
        let (d, _) = serving();
        let s = &d.schema().stat_slots;
        let mut buf = RecordBuf::zeroed(d.schema().stat().size(), false);

        let st = Stat {
            ino: 42,
            dev: 7,
            blksize: 4096,
            ..Stat::file(0o644, 10).with_times(Timespec::new(100, 5))
        };
        d.write_stat(&mut buf.record_mut(), &st);

        let rec = buf.record();
        assert_eq!(rec.u64(s.mode), 0o100644);
        assert_eq!(rec.u64(s.ino), 42);
        assert_eq!(rec.u64(s.dev), 7);
        assert_eq!(rec.i64(s.size), 10);
        assert_eq!(rec.i64(s.blksize), 4096);
        assert_eq!(rec.time(s.mtime), Timespec::new(100, 5));
    }

    #[test]
    fn test_kernel_subset_stat_fill() {
        let options = DispatchOptions {
            stat_fill: StatFill::KernelSubset,
            ..DispatchOptions::default()
        };
        let d = Dispatcher::new(Counting::default(), linux_schema(), options);
        let s = &d.schema().stat_slots;
        let mut buf = RecordBuf::zeroed(d.schema().stat().size(), false);

        let st = Stat {
            ino: 42,
            blksize: 4096,
            ..Stat::file(0o600, 3)
        };
        d.write_stat(&mut buf.record_mut(), &st);

        let rec = buf.record();
        assert_eq!(rec.u64(s.mode), 0o100600);
        assert_eq!(rec.i64(s.size), 3);
        assert_eq!(rec.u64(s.ino), 0);
        assert_eq!(rec.i64(s.blksize), 0);
    }

    #[test]
    fn test_conn_round_trip_keeps_read_only_fields() {
        let (d, _) = serving();
        let s = &d.schema().conn_slots;
        let mut buf = RecordBuf::zeroed(d.schema().conn_info().size(), false);
        buf.record_mut().set_u64(s.proto_major, 7);
        buf.record_mut().set_u64(s.max_write, 4096);

        let mut conn = d.read_conn(buf.record());
        assert_eq!(conn.proto_major, 7);
        conn.max_write = 1 << 20;
        conn.proto_major = 99;
        d.write_conn(&mut buf.record_mut(), &conn);

        assert_eq!(buf.record().u64(s.max_write), 1 << 20);
        assert_eq!(buf.record().u64(s.proto_major), 7);
    }
}
