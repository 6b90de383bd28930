//! Argument block layout
//!
//! One align-then-add walk, shared by struct layout, outbound argument
//! blocks and callback return slots.

use crate::ffi::types::{TypeArena, TypeId};

/// Round `offset` up to a multiple of `align` (a power of two, or 0/1)
pub const fn align_up(offset: usize, align: usize) -> usize {
    if align <= 1 {
        offset
    } else {
        (offset + align - 1) & !(align - 1)
    }
}

/// Bump allocator over a not-yet-allocated byte range
#[derive(Debug, Clone, Copy, Default)]
pub struct BumpCursor {
    offset: usize,
    max_align: usize,
}

impl BumpCursor {
    pub fn new() -> Self {
        BumpCursor {
            offset: 0,
            max_align: 1,
        }
    }

    /// Reserve `size` bytes at the next `align` boundary, returning their offset
    pub fn place(&mut self, size: usize, align: usize) -> usize {
        let at = align_up(self.offset, align);
        self.offset = at + size;
        self.max_align = self.max_align.max(align);
        at
    }

    /// Bytes used so far, without trailing padding
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn max_align(&self) -> usize {
        self.max_align
    }

    /// Total size padded to the largest alignment seen
    pub fn finish(self) -> usize {
        align_up(self.offset, self.max_align)
    }
}

/// Byte offsets of each argument within a packed argument block
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ArgLayout {
    pub offsets: Vec<usize>,
    pub size: usize,
}

impl ArgLayout {
    pub fn compute(arena: &TypeArena, types: &[TypeId]) -> Self {
        let mut cursor = BumpCursor::new();
        let offsets = types
            .iter()
            .map(|&ty| cursor.place(arena.size_of(ty), arena.align_of(ty)))
            .collect();
        ArgLayout {
            offsets,
            size: cursor.offset(),
        }
    }
}

#[repr(C, align(16))]
#[derive(Clone, Copy)]
struct Chunk([u8; 16]);

/// Zero-filled, 16-byte aligned scratch memory for native values
pub struct ArgBlock {
    chunks: Vec<Chunk>,
    len: usize,
}

impl ArgBlock {
    pub fn zeroed(len: usize) -> Self {
        let count = len.div_ceil(16).max(1);
        ArgBlock {
            chunks: vec![Chunk([0; 16]); count],
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.chunks.as_mut_ptr() as *mut u8
    }

    /// Pointer to the byte at `offset`
    pub fn slot(&mut self, offset: usize) -> *mut u8 {
        debug_assert!(offset <= self.chunks.len() * 16);
        // SAFETY: offset stays within (or one past) the allocation.
        unsafe { self.as_mut_ptr().add(offset) }
    }
}
