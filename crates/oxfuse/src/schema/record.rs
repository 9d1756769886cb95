//! Typed reads and writes of native records through resolved layouts.
//!
//! All access goes through byte slices with explicit endianness, so records
//! never need host alignment and the same code serves every target layout.

use crate::types::Timespec;

/// Location of an integer field inside a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalarSlot {
    /// Byte offset from the start of the record.
    pub offset: usize,
    /// Width in bytes (1, 2, 4 or 8).
    pub size: usize,
    /// Whether reads sign-extend.
    pub signed: bool,
}

/// Location of a `struct timespec` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSlot {
    pub sec: ScalarSlot,
    pub nsec: ScalarSlot,
}

/// Location of a one-bit bitfield member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagSlot {
    /// Byte offset of the storage word.
    pub offset: usize,
    /// Width of the storage word in bytes.
    pub size: usize,
    /// Bit position within the word value.
    pub bit: u32,
}

fn read(bytes: &[u8], slot: ScalarSlot, big_endian: bool) -> u64 {
    let src = &bytes[slot.offset..slot.offset + slot.size];
    let mut buf = [0u8; 8];
    let raw = if big_endian {
        buf[8 - slot.size..].copy_from_slice(src);
        u64::from_be_bytes(buf)
    } else {
        buf[..slot.size].copy_from_slice(src);
        u64::from_le_bytes(buf)
    };

    if slot.signed && slot.size < 8 {
        let shift = 64 - 8 * slot.size as u32;
        (((raw << shift) as i64) >> shift) as u64
    } else {
        raw
    }
}

fn write(bytes: &mut [u8], slot: ScalarSlot, value: u64, big_endian: bool) {
    let dst = &mut bytes[slot.offset..slot.offset + slot.size];
    if big_endian {
        dst.copy_from_slice(&value.to_be_bytes()[8 - slot.size..]);
    } else {
        dst.copy_from_slice(&value.to_le_bytes()[..slot.size]);
    }
}

fn word(slot: FlagSlot) -> ScalarSlot {
    ScalarSlot {
        offset: slot.offset,
        size: slot.size,
        signed: false,
    }
}

/// Read-only view of a native record.
#[derive(Debug, Clone, Copy)]
pub struct RecordRef<'a> {
    bytes: &'a [u8],
    big_endian: bool,
}

impl<'a> RecordRef<'a> {
    pub fn new(bytes: &'a [u8], big_endian: bool) -> Self {
        Self { bytes, big_endian }
    }

    /// Views `len` bytes of native memory.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads of `len` bytes for `'a`, with no
    /// concurrent writes.
    pub unsafe fn from_raw(ptr: *const u8, len: usize, big_endian: bool) -> Self {
        // SAFETY: guaranteed by the caller.
        let bytes = unsafe { std::slice::from_raw_parts(ptr, len) };
        Self { bytes, big_endian }
    }

    pub fn u64(&self, slot: ScalarSlot) -> u64 {
        read(self.bytes, slot, self.big_endian)
    }

    pub fn i64(&self, slot: ScalarSlot) -> i64 {
        read(self.bytes, slot, self.big_endian) as i64
    }

    pub fn flag(&self, slot: FlagSlot) -> bool {
        (read(self.bytes, word(slot), self.big_endian) >> slot.bit) & 1 == 1
    }

    pub fn time(&self, slot: TimeSlot) -> Timespec {
        Timespec::new(self.i64(slot.sec), self.i64(slot.nsec))
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }
}

/// Mutable view of a native record.
#[derive(Debug)]
pub struct RecordMut<'a> {
    bytes: &'a mut [u8],
    big_endian: bool,
}

impl<'a> RecordMut<'a> {
    pub fn new(bytes: &'a mut [u8], big_endian: bool) -> Self {
        Self { bytes, big_endian }
    }

    /// Views `len` bytes of native memory for writing.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes for `'a`,
    /// with no other access during that time.
    pub unsafe fn from_raw(ptr: *mut u8, len: usize, big_endian: bool) -> Self {
        // SAFETY: guaranteed by the caller.
        let bytes = unsafe { std::slice::from_raw_parts_mut(ptr, len) };
        Self { bytes, big_endian }
    }

    pub fn as_ref(&self) -> RecordRef<'_> {
        RecordRef::new(self.bytes, self.big_endian)
    }

    pub fn zero(&mut self) {
        self.bytes.fill(0);
    }

    pub fn set_u64(&mut self, slot: ScalarSlot, value: u64) {
        write(self.bytes, slot, value, self.big_endian);
    }

    pub fn set_i64(&mut self, slot: ScalarSlot, value: i64) {
        write(self.bytes, slot, value as u64, self.big_endian);
    }

    pub fn set_flag(&mut self, slot: FlagSlot, on: bool) {
        let current = read(self.bytes, word(slot), self.big_endian);
        let mask = 1u64 << slot.bit;
        let updated = if on { current | mask } else { current & !mask };
        write(self.bytes, word(slot), updated, self.big_endian);
    }

    pub fn set_time(&mut self, slot: TimeSlot, ts: Timespec) {
        self.set_i64(slot.sec, ts.sec);
        self.set_i64(slot.nsec, ts.nsec);
    }

    pub fn u64(&self, slot: ScalarSlot) -> u64 {
        self.as_ref().u64(slot)
    }

    pub fn i64(&self, slot: ScalarSlot) -> i64 {
        self.as_ref().i64(slot)
    }

    pub fn flag(&self, slot: FlagSlot) -> bool {
        self.as_ref().flag(slot)
    }
}

/// Owned, zeroed, 8-byte aligned storage for one native record.
///
/// Used where this side allocates the struct, e.g. the `stat` handed to a
/// readdir filler.
#[derive(Debug, Clone)]
pub struct RecordBuf {
    words: Vec<u64>,
    len: usize,
    big_endian: bool,
}

impl RecordBuf {
    pub fn zeroed(len: usize, big_endian: bool) -> Self {
        Self {
            words: vec![0; len.div_ceil(8)],
            len,
            big_endian,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.words.as_ptr().cast()
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.words.as_mut_ptr().cast()
    }

    pub fn bytes(&self) -> &[u8] {
        // SAFETY: `words` owns at least `len` initialized bytes.
        unsafe { std::slice::from_raw_parts(self.as_ptr(), self.len) }
    }

    pub fn record(&self) -> RecordRef<'_> {
        RecordRef::new(self.bytes(), self.big_endian)
    }

    pub fn record_mut(&mut self) -> RecordMut<'_> {
        let (len, big_endian) = (self.len, self.big_endian);
        // SAFETY: `words` owns at least `len` initialized bytes and is
        // borrowed mutably for the lifetime of the view.
        let bytes = unsafe { std::slice::from_raw_parts_mut(self.as_mut_ptr(), len) };
        RecordMut::new(bytes, big_endian)
    }
}
