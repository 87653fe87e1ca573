// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering::Relaxed};

/// Size of a pooled allocation block in bytes
pub const BLOCK_SIZE: usize = 4_096;

// Requests larger than this get their own block instead of
// abandoning the remainder of the open one.
const STANDALONE_THRESHOLD: usize = BLOCK_SIZE / 4;

const ALIGN: usize = if std::mem::size_of::<usize>() > 8 {
    std::mem::size_of::<usize>()
} else {
    8
};

/// Bump-pointer allocator backing the write buffer
///
/// Hands out byte ranges from pooled blocks. Nothing is ever freed
/// individually; all blocks are released together when the arena is
/// dropped. Returned pointers stay valid until then, which is what lets
/// readers traverse write buffer entries without reference counting.
///
/// A single writer allocates at a time. The memory usage counter is
/// atomic and may be read concurrently without further synchronization.
pub struct Arena {
    /// Cursor into the open block
    ptr: *mut u8,

    /// Unused bytes left in the open block
    remaining: usize,

    /// All blocks handed out so far.
    ///
    /// Blocks are `u64` slices so a fresh block is maximally aligned
    /// for primitive types.
    blocks: Vec<Box<[u64]>>,

    /// Conservative upper bound of reserved bytes.
    ///
    /// Monotonically non-decreasing.
    memory_usage: AtomicUsize,
}

// SAFETY: the cursor only ever points into blocks owned by this arena,
// so moving the arena to another thread moves the pointee along with it.
#[expect(unsafe_code, reason = "see safety")]
unsafe impl Send for Arena {}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

impl Arena {
    /// Creates an empty arena.
    ///
    /// The first allocation allocates the first block.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ptr: std::ptr::null_mut(),
            remaining: 0,
            blocks: Vec::new(),
            memory_usage: AtomicUsize::new(0),
        }
    }

    /// Allocates `n` bytes, with undefined content.
    ///
    /// The returned range stays valid until the arena is dropped.
    ///
    /// # Panics
    ///
    /// Panics if `n` is zero. Zero-sized ranges have no meaningful
    /// address in a bump allocator.
    pub fn allocate(&mut self, n: usize) -> NonNull<u8> {
        assert!(n > 0, "zero-byte arena allocation");

        if n <= self.remaining {
            let result = self.ptr;

            // SAFETY: `remaining >= n` guarantees the cursor points into
            // the open block with at least `n` bytes left.
            #[expect(unsafe_code, reason = "see safety")]
            unsafe {
                self.ptr = self.ptr.add(n);
            }
            self.remaining -= n;

            return non_null(result);
        }

        self.allocate_fallback(n)
    }

    /// Allocates `n` bytes aligned to `max(pointer size, 8)`.
    pub fn allocate_aligned(&mut self, n: usize) -> NonNull<u8> {
        assert!(n > 0, "zero-byte arena allocation");

        const { assert!(ALIGN & (ALIGN - 1) == 0, "alignment must be a power of two") };

        let current_mod = (self.ptr as usize) & (ALIGN - 1);
        let slop = if current_mod == 0 { 0 } else { ALIGN - current_mod };
        let needed = n + slop;

        let result = if needed <= self.remaining {
            // SAFETY: `remaining >= needed` guarantees both the slop skip
            // and the bump stay inside the open block.
            #[expect(unsafe_code, reason = "see safety")]
            let result = unsafe {
                let result = self.ptr.add(slop);
                self.ptr = self.ptr.add(needed);
                result
            };
            self.remaining -= needed;

            non_null(result)
        } else {
            // A fresh block starts maximally aligned, no slop needed
            self.allocate_fallback(n)
        };

        debug_assert_eq!(0, result.as_ptr() as usize & (ALIGN - 1));
        result
    }

    /// Returns a conservative upper bound of the bytes reserved so far.
    ///
    /// Monotonically non-decreasing; readable from any thread.
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        self.memory_usage.load(Relaxed)
    }

    fn allocate_fallback(&mut self, n: usize) -> NonNull<u8> {
        if n > STANDALONE_THRESHOLD {
            // More than a quarter of a block. Give it its own block so the
            // remainder of the open block is not wasted on it.
            return self.allocate_new_block(n);
        }

        // Abandon the remainder of the open block
        let block = self.allocate_new_block(BLOCK_SIZE);

        // SAFETY: the fresh block holds `BLOCK_SIZE >= n` bytes.
        #[expect(unsafe_code, reason = "see safety")]
        unsafe {
            self.ptr = block.as_ptr().add(n);
        }
        self.remaining = BLOCK_SIZE - n;

        block
    }

    fn allocate_new_block(&mut self, block_bytes: usize) -> NonNull<u8> {
        let words = block_bytes.div_ceil(std::mem::size_of::<u64>());
        let mut block = vec![0_u64; words].into_boxed_slice();
        let ptr = block.as_mut_ptr().cast::<u8>();

        self.blocks.push(block);

        self.memory_usage.fetch_add(
            words * std::mem::size_of::<u64>() + std::mem::size_of::<usize>(),
            Relaxed,
        );

        non_null(ptr)
    }
}

#[expect(clippy::expect_used, reason = "arena pointers come from live allocations")]
fn non_null(ptr: *mut u8) -> NonNull<u8> {
    NonNull::new(ptr).expect("arena pointer should not be null")
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("blocks", &self.blocks.len())
            .field("remaining", &self.remaining)
            .field("memory_usage", &self.memory_usage())
            .finish()
    }
}
