//! Growable code buffer.
//!
//! All positions handed out by the buffer are byte offsets from the start of
//! the code, never addresses, so they stay valid when the storage is
//! reallocated during growth. The final absolute address is only known once
//! the caller copies the code into executable memory with
//! [`CodeBuffer::finalize_into`].
//!
//! The buffer keeps a trailing guard of [`MINIMUM_GAP`] bytes. Every
//! instruction entry acquires an [`EnsureCapacity`] guard which grows the
//! storage if the cursor has crossed into that gap; a single instruction may
//! then write up to `MINIMUM_GAP` bytes without any further checks.

use alloc::vec::Vec;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU32, Ordering};

use crate::error::AsmError;
use crate::options::EmitOptions;

/// Default starting capacity.
pub const INITIAL_CAPACITY: usize = 4 * 1024;

/// Largest single growth step. Below this, growth doubles.
pub const GROWTH_CAP: usize = 1024 * 1024;

/// Trailing guard: bytes one instruction may write after a capacity check.
pub const MINIMUM_GAP: usize = 32;

static NEXT_ID: AtomicU32 = AtomicU32::new(1);

/// Process-unique identity of a [`CodeBuffer`].
///
/// Labels remember which buffer first referenced them; using a label with a
/// second buffer is reported as [`AsmError::ForeignLabel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(u32);

impl BufferId {
    fn fresh() -> Self {
        BufferId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Byte buffer that machine code is appended to and patched in.
#[derive(Debug)]
pub struct CodeBuffer {
    id: BufferId,
    /// Backing storage; `contents.len()` is the capacity.
    contents: Vec<u8>,
    cursor: usize,
    trap: Option<[u8; 4]>,
    /// Labels whose chains are non-empty.
    unresolved: usize,
}

impl CodeBuffer {
    /// Create an empty buffer.
    ///
    /// `trap_pattern` is the architecture's breakpoint encoding, repeated
    /// over fresh memory when [`EmitOptions::trap_fill`] is set.
    pub fn new(options: &EmitOptions, trap_pattern: [u8; 4]) -> Result<Self, AsmError> {
        let trap = options.trap_fill.then_some(trap_pattern);
        let capacity = options.initial_capacity.max(2 * MINIMUM_GAP);
        Ok(Self {
            id: BufferId::fresh(),
            contents: allocate(capacity, trap)?,
            cursor: 0,
            trap,
            unresolved: 0,
        })
    }

    /// Identity stamp of this buffer.
    #[inline]
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Number of bytes emitted so far.
    #[inline]
    pub fn size(&self) -> usize {
        self.cursor
    }

    /// Whether nothing has been emitted.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cursor == 0
    }

    /// Allocated bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.contents.len()
    }

    /// Highest cursor position at which an instruction may start without
    /// growing.
    #[inline]
    fn limit(&self) -> usize {
        self.contents.len() - MINIMUM_GAP
    }

    /// The emitted bytes.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.contents[..self.cursor]
    }

    /// Bytes past the cursor, up to capacity. Exposed for inspecting the
    /// trap fill.
    pub fn unused(&self) -> &[u8] {
        &self.contents[self.cursor..]
    }

    /// Number of labels that still have pending references.
    #[inline]
    pub fn unresolved_labels(&self) -> usize {
        self.unresolved
    }

    // ── Capacity ─────────────────────────────────────────────────────────

    /// Make room for one instruction.
    ///
    /// The returned guard dereferences to the buffer. While it is held at
    /// most [`MINIMUM_GAP`] bytes may be written; debug builds check this
    /// when the guard is dropped.
    pub fn ensure_capacity(&mut self) -> Result<EnsureCapacity<'_>, AsmError> {
        if self.cursor >= self.limit() {
            self.extend_capacity()?;
        }
        Ok(EnsureCapacity {
            #[cfg(debug_assertions)]
            start: self.cursor,
            buffer: self,
        })
    }

    /// Guarantee room for `n` more bytes plus the trailing guard.
    pub fn reserve(&mut self, n: usize) -> Result<(), AsmError> {
        let needed = self
            .cursor
            .checked_add(n)
            .ok_or(AsmError::CapacityOverflow {
                capacity: self.capacity(),
            })?;
        while needed > self.limit() {
            self.extend_capacity()?;
        }
        Ok(())
    }

    fn extend_capacity(&mut self) -> Result<(), AsmError> {
        let old = self.capacity();
        let new = old.saturating_mul(2).min(old.saturating_add(GROWTH_CAP));
        if new <= old {
            return Err(AsmError::CapacityOverflow { capacity: old });
        }
        let mut fresh = allocate(new, self.trap)?;
        fresh[..self.cursor].copy_from_slice(&self.contents[..self.cursor]);
        self.contents = fresh;
        log::trace!("code buffer {:?}: grow {} -> {} bytes", self.id, old, new);
        Ok(())
    }

    // ── Append ───────────────────────────────────────────────────────────

    #[inline]
    fn put<const N: usize>(&mut self, bytes: [u8; N]) {
        let end = self.cursor + N;
        assert!(
            end <= self.contents.len(),
            "code buffer write past allocated memory"
        );
        self.contents[self.cursor..end].copy_from_slice(&bytes);
        self.cursor = end;
    }

    /// Append one byte.
    #[inline]
    pub fn emit_u8(&mut self, value: u8) {
        self.put([value]);
    }

    /// Append a little-endian 16-bit value.
    #[inline]
    pub fn emit_u16(&mut self, value: u16) {
        self.put(value.to_le_bytes());
    }

    /// Append a little-endian 32-bit value.
    #[inline]
    pub fn emit_u32(&mut self, value: u32) {
        self.put(value.to_le_bytes());
    }

    /// Append a little-endian signed 32-bit value.
    #[inline]
    pub fn emit_i32(&mut self, value: i32) {
        self.put(value.to_le_bytes());
    }

    /// Append a little-endian 64-bit value.
    #[inline]
    pub fn emit_u64(&mut self, value: u64) {
        self.put(value.to_le_bytes());
    }

    /// Append an arbitrary byte run, growing as needed.
    pub fn emit_bytes(&mut self, bytes: &[u8]) -> Result<(), AsmError> {
        self.reserve(bytes.len())?;
        let end = self.cursor + bytes.len();
        self.contents[self.cursor..end].copy_from_slice(bytes);
        self.cursor = end;
        Ok(())
    }

    // ── Patch ────────────────────────────────────────────────────────────

    #[inline]
    fn emitted(&self, offset: usize, len: usize) -> core::ops::Range<usize> {
        assert!(
            offset + len <= self.cursor,
            "patch at {:#x} outside emitted code",
            offset
        );
        offset..offset + len
    }

    /// Read an emitted byte.
    pub fn load_u8(&self, offset: usize) -> u8 {
        self.contents[self.emitted(offset, 1)][0]
    }

    /// Read an emitted little-endian 32-bit value.
    pub fn load_u32(&self, offset: usize) -> u32 {
        let mut word = [0; 4];
        word.copy_from_slice(&self.contents[self.emitted(offset, 4)]);
        u32::from_le_bytes(word)
    }

    /// Read an emitted little-endian signed 32-bit value.
    pub fn load_i32(&self, offset: usize) -> i32 {
        self.load_u32(offset) as i32
    }

    /// Overwrite an emitted byte.
    pub fn store_u8(&mut self, offset: usize, value: u8) {
        let range = self.emitted(offset, 1);
        self.contents[range][0] = value;
    }

    /// Overwrite an emitted 32-bit value.
    pub fn store_u32(&mut self, offset: usize, value: u32) {
        let range = self.emitted(offset, 4);
        self.contents[range].copy_from_slice(&value.to_le_bytes());
    }

    /// Overwrite an emitted signed 32-bit value.
    pub fn store_i32(&mut self, offset: usize, value: i32) {
        self.store_u32(offset, value as u32);
    }

    // ── Label bookkeeping ────────────────────────────────────────────────

    pub(crate) fn note_linked(&mut self) {
        self.unresolved += 1;
    }

    pub(crate) fn note_resolved(&mut self) {
        debug_assert!(self.unresolved > 0);
        self.unresolved -= 1;
    }

    // ── Finalize ─────────────────────────────────────────────────────────

    fn check_finalizable(&self) -> Result<(), AsmError> {
        if self.unresolved != 0 {
            return Err(AsmError::UnresolvedLabels {
                count: self.unresolved,
            });
        }
        Ok(())
    }

    /// Copy the finished code into caller-provided memory.
    ///
    /// Exactly [`size`](Self::size) bytes are written. Fails if any label
    /// still has pending references or `dest` is too small.
    pub fn finalize_into(&self, dest: &mut [u8]) -> Result<usize, AsmError> {
        self.check_finalizable()?;
        if dest.len() < self.cursor {
            return Err(AsmError::DestinationTooSmall {
                needed: self.cursor,
                available: dest.len(),
            });
        }
        dest[..self.cursor].copy_from_slice(self.bytes());
        log::debug!("code buffer {:?}: finalized {} bytes", self.id, self.cursor);
        Ok(self.cursor)
    }

    /// Consume the buffer, returning exactly the emitted bytes.
    pub fn into_bytes(mut self) -> Result<Vec<u8>, AsmError> {
        self.check_finalizable()?;
        self.contents.truncate(self.cursor);
        Ok(self.contents)
    }
}

fn allocate(capacity: usize, trap: Option<[u8; 4]>) -> Result<Vec<u8>, AsmError> {
    let mut contents = Vec::new();
    contents
        .try_reserve_exact(capacity)
        .map_err(|_| AsmError::OutOfMemory {
            requested: capacity,
        })?;
    match trap {
        Some(pattern) => contents.extend((0..capacity).map(|i| pattern[i % 4])),
        None => contents.resize(capacity, 0),
    }
    Ok(contents)
}

/// Scoped capacity guard for one instruction. See
/// [`CodeBuffer::ensure_capacity`].
#[derive(Debug)]
pub struct EnsureCapacity<'a> {
    buffer: &'a mut CodeBuffer,
    #[cfg(debug_assertions)]
    start: usize,
}

impl Deref for EnsureCapacity<'_> {
    type Target = CodeBuffer;

    fn deref(&self) -> &CodeBuffer {
        self.buffer
    }
}

impl DerefMut for EnsureCapacity<'_> {
    fn deref_mut(&mut self) -> &mut CodeBuffer {
        self.buffer
    }
}

impl Drop for EnsureCapacity<'_> {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        {
            let written = self.buffer.cursor.saturating_sub(self.start);
            debug_assert!(
                written <= MINIMUM_GAP,
                "instruction wrote {} bytes under one capacity check",
                written
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRAP: [u8; 4] = [0xCC; 4];

    fn buffer(capacity: usize) -> CodeBuffer {
        let opts = EmitOptions::default()
            .with_initial_capacity(capacity)
            .with_trap_fill(false);
        CodeBuffer::new(&opts, TRAP).unwrap()
    }

    #[test]
    fn starts_empty() {
        let buf = buffer(INITIAL_CAPACITY);
        assert!(buf.is_empty());
        assert_eq!(buf.size(), 0);
        assert_eq!(buf.capacity(), 4096);
        assert!(buf.bytes().is_empty());
    }

    #[test]
    fn tiny_capacity_is_raised_above_gap() {
        let buf = buffer(1);
        assert_eq!(buf.capacity(), 2 * MINIMUM_GAP);
    }

    #[test]
    fn emit_little_endian() {
        let mut buf = buffer(INITIAL_CAPACITY);
        buf.emit_u8(0x90);
        buf.emit_u16(0x1234);
        buf.emit_u32(0xDEADBEEF);
        buf.emit_i32(-2);
        buf.emit_u64(0x0102030405060708);
        assert_eq!(
            buf.bytes(),
            &[
                0x90, 0x34, 0x12, 0xEF, 0xBE, 0xAD, 0xDE, 0xFE, 0xFF, 0xFF, 0xFF, 0x08, 0x07,
                0x06, 0x05, 0x04, 0x03, 0x02, 0x01
            ]
        );
    }

    #[test]
    fn growth_doubles_then_caps() {
        let mut buf = buffer(INITIAL_CAPACITY);
        buf.extend_capacity().unwrap();
        assert_eq!(buf.capacity(), 8192);

        let mut big = buffer(2 * GROWTH_CAP);
        big.extend_capacity().unwrap();
        assert_eq!(big.capacity(), 3 * GROWTH_CAP);
    }

    #[test]
    fn growth_preserves_contents() {
        let mut buf = buffer(64);
        for i in 0..500u32 {
            let mut guard = buf.ensure_capacity().unwrap();
            guard.emit_u32(i);
        }
        assert_eq!(buf.size(), 2000);
        assert!(buf.capacity() >= 2000 + MINIMUM_GAP);
        for i in 0..500u32 {
            assert_eq!(buf.load_u32(i as usize * 4), i);
        }
    }

    #[test]
    fn gap_invariant_holds_after_ensure() {
        let mut buf = buffer(64);
        for _ in 0..100 {
            let mut guard = buf.ensure_capacity().unwrap();
            assert!(guard.size() < guard.capacity() - MINIMUM_GAP);
            for _ in 0..MINIMUM_GAP {
                guard.emit_u8(0);
            }
        }
    }

    #[test]
    fn reserve_grows_repeatedly() {
        let mut buf = buffer(64);
        buf.reserve(10_000).unwrap();
        assert!(buf.capacity() >= 10_000 + MINIMUM_GAP);
    }

    #[test]
    fn emit_bytes_grows() {
        let mut buf = buffer(64);
        buf.emit_bytes(&[0xAB; 1000]).unwrap();
        assert_eq!(buf.size(), 1000);
        assert!(buf.bytes().iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn patch_in_place() {
        let mut buf = buffer(INITIAL_CAPACITY);
        buf.emit_u32(0);
        buf.emit_u8(0);
        buf.store_u32(0, 0x11223344);
        buf.store_u8(4, 0x55);
        assert_eq!(buf.size(), 5);
        assert_eq!(buf.load_u32(0), 0x11223344);
        assert_eq!(buf.load_u8(4), 0x55);
        buf.store_i32(0, -1);
        assert_eq!(buf.load_i32(0), -1);
    }

    #[test]
    #[should_panic(expected = "outside emitted code")]
    fn patch_past_cursor_panics() {
        let mut buf = buffer(INITIAL_CAPACITY);
        buf.emit_u8(0);
        buf.store_u32(0, 1);
    }

    #[test]
    fn trap_fill_covers_unused_memory() {
        let opts = EmitOptions::default()
            .with_initial_capacity(64)
            .with_trap_fill(true);
        let mut buf = CodeBuffer::new(&opts, [0x00, 0x00, 0x20, 0xD4]).unwrap();
        buf.emit_u8(0x1F);
        assert_eq!(buf.unused().len(), 63);
        // Pattern is aligned to absolute offsets, not to the cursor.
        assert_eq!(&buf.unused()[3..7], &[0x00, 0x00, 0x20, 0xD4]);
        buf.reserve(1000).unwrap();
        assert!(buf.unused()[3..]
            .chunks(4)
            .all(|w| w == [0x00, 0x00, 0x20, 0xD4]));
    }

    #[test]
    fn finalize_copies_exactly_size() {
        let mut buf = buffer(INITIAL_CAPACITY);
        buf.emit_u32(0xC3C3C3C3);
        let mut dest = [0u8; 8];
        assert_eq!(buf.finalize_into(&mut dest).unwrap(), 4);
        assert_eq!(dest, [0xC3, 0xC3, 0xC3, 0xC3, 0, 0, 0, 0]);
    }

    #[test]
    fn finalize_rejects_small_destination() {
        let mut buf = buffer(INITIAL_CAPACITY);
        buf.emit_u32(0);
        let mut dest = [0u8; 2];
        assert_eq!(
            buf.finalize_into(&mut dest),
            Err(AsmError::DestinationTooSmall {
                needed: 4,
                available: 2
            })
        );
    }

    #[test]
    fn finalize_rejects_unresolved() {
        let mut buf = buffer(INITIAL_CAPACITY);
        buf.note_linked();
        assert_eq!(
            buf.into_bytes(),
            Err(AsmError::UnresolvedLabels { count: 1 })
        );
    }

    #[test]
    fn into_bytes_truncates() {
        let mut buf = buffer(INITIAL_CAPACITY);
        buf.emit_u16(0x0B0F);
        assert_eq!(buf.into_bytes().unwrap(), vec![0x0F, 0x0B]);
    }

    #[test]
    fn ids_are_unique() {
        let a = buffer(64);
        let b = buffer(64);
        assert_ne!(a.id(), b.id());
    }
}
