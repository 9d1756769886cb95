//! Native `fuse_operations` tables.
//!
//! [`OperationTable::build`] lays out the table the bound library expects
//! and fills each slot with an entry point specialized for the filesystem
//! type. Primitives the filesystem does not support stay NULL so libfuse
//! falls back to its own behaviour.

mod abi;
pub(crate) mod marshal;

use std::ffi::c_void;
use std::fmt;
use std::mem::size_of;

use tracing::{debug, warn};

use crate::operations::{Operations, Primitive};
use crate::schema::Schema;
use crate::schema::record::{RecordMut, RecordRef};

/// Table-level switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct TableOptions {
    /// Let libfuse 2.9 pass NULL paths to handle-based primitives.
    pub nullpath_ok: bool,
}

/// A `struct fuse_operations` in native layout.
pub struct OperationTable {
    // Word storage keeps the table pointer-aligned.
    words: Box<[usize]>,
    size: usize,
    big_endian: bool,
}

impl OperationTable {
    pub fn build<O: Operations>(schema: &Schema, ops: &O, options: TableOptions) -> Self {
        let layout = schema.operations();
        let size = layout.size();
        let major = schema.target().api.major;
        let mut words = vec![0usize; size.div_ceil(size_of::<usize>())].into_boxed_slice();

        // SAFETY: `words` spans at least `size` bytes and outlives `record`.
        let mut record =
            unsafe { RecordMut::from_raw(words.as_mut_ptr().cast(), size, schema.big_endian()) };

        let mut registered = 0usize;
        for primitive in Primitive::ALL {
            if !primitive.is_mandatory() && !ops.supports(primitive) {
                debug!(op = primitive.name(), "primitive not supported, slot left empty");
                continue;
            }
            for name in primitive.slots() {
                let (Some(slot), Some(addr)) = (layout.scalar(name), abi::entry::<O>(name, major))
                else {
                    continue;
                };
                record.set_u64(slot, addr as u64);
                registered += 1;
            }
        }

        if options.nullpath_ok {
            match layout.flag("flag_nullpath_ok") {
                Some(flag) => record.set_flag(flag, true),
                None => warn!(
                    api = %schema.target().api,
                    "nullpath_ok is not supported by this library, ignoring"
                ),
            }
        }
        if let Some(flag) = layout.flag("flag_utime_omit_ok") {
            record.set_flag(flag, true);
        }

        debug!(slots = registered, size, "built operation table");
        Self {
            words,
            size,
            big_endian: schema.big_endian(),
        }
    }

    /// Pointer handed to `fuse_main_real`.
    pub fn as_ptr(&self) -> *const c_void {
        self.words.as_ptr().cast()
    }

    /// `sizeof(struct fuse_operations)` for the bound library.
    pub fn size(&self) -> usize {
        self.size
    }

    fn record(&self) -> RecordRef<'_> {
        // SAFETY: `words` spans at least `size` bytes.
        unsafe { RecordRef::from_raw(self.as_ptr().cast(), self.size, self.big_endian) }
    }

    /// Address stored in slot `name`, `None` when empty or unknown.
    pub fn slot(&self, schema: &Schema, name: &str) -> Option<usize> {
        let slot = schema.operations().scalar(name)?;
        let addr = self.record().u64(slot) as usize;
        (addr != 0).then_some(addr)
    }

    /// Whether a flag bit such as `flag_utime_omit_ok` is set.
    pub fn flag(&self, schema: &Schema, name: &str) -> bool {
        schema
            .operations()
            .flag(name)
            .is_some_and(|flag| self.record().flag(flag))
    }
}

impl fmt::Debug for OperationTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationTable")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

// SAFETY: the table is plain data (function addresses and flag bits).
unsafe impl Send for OperationTable {}
// SAFETY: as above; it is never mutated after `build`.
unsafe impl Sync for OperationTable {}
