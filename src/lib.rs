//! A segregated-fit dynamic memory allocator.
//!
//! The allocator manages a single contiguous, monotonically-growable heap
//! region. Blocks carry boundary tags (an 8 byte header word duplicated in
//! a footer word), free blocks are kept on an array of size-segregated
//! doubly-linked lists, and freed blocks are coalesced with their
//! neighbors immediately. Placement is first fit within a size class, with
//! splitting unless the remainder would be a splinter. Small requests skip
//! the free lists entirely and are placed in a fresh heap extension.
//!
//! Heap memory comes from an [`Extender`], a minimal sbrk-style growth
//! interface. Default extenders are provided for Linux, macOS and
//! WebAssembly; any other source can be plugged in through
//! [`Segfit::with_extender`]. Memory is never returned to the source.
//!
//! The allocator is single-threaded by design: an instance can be moved
//! across threads but not shared between them.

#![no_std]
#![deny(missing_docs)]
#![allow(clippy::missing_safety_doc)]

use core::ptr;

mod common;
mod segfit;
mod sfverbose;

#[cfg(target_arch = "wasm32")]
#[path = "wasm.rs"]
mod sys;

#[cfg(target_os = "macos")]
#[path = "macos.rs"]
mod sys;

#[cfg(target_os = "linux")]
#[path = "linux.rs"]
mod sys;

#[cfg(windows)]
#[path = "windows.rs"]
mod sys;

pub use crate::segfit::Extender;
pub use crate::sys::SysHeap;

/// An allocator instance.
///
/// Instances of this type hand out blocks of memory carved from a single
/// growable heap region. Each instance owns its region exclusively; use
/// one instance per heap. Memory is never released back to the underlying
/// source.
pub struct Segfit<E: Extender = SysHeap>(segfit::Segfit<E>);

/// Constant initializer for a `Segfit` over the platform heap source.
pub const SEGFIT_INIT: Segfit = Segfit(segfit::Segfit::new(sys::SYS_HEAP_INIT));

#[allow(clippy::new_without_default)]
impl Segfit {
    /// Creates a new allocator over the platform heap source, same as
    /// `SEGFIT_INIT`.
    pub const fn new() -> Segfit {
        SEGFIT_INIT
    }
}

impl<E: Extender> Segfit<E> {
    /// Creates a new allocator over a custom heap extender.
    pub const fn with_extender(ext: E) -> Segfit<E> {
        Segfit(segfit::Segfit::new(ext))
    }

    /// Performs the initial heap growth and lays out the empty heap.
    ///
    /// Returns `false` if the extender refuses to grow. Calling `init` is
    /// optional; the first allocation initializes the heap on demand.
    pub unsafe fn init(&mut self) -> bool {
        self.0.init()
    }

    /// Allocates a block with at least `size` payload bytes, aligned to 8
    /// bytes.
    ///
    /// Returns a null pointer if `size` is 0 or the heap cannot grow.
    pub unsafe fn malloc(&mut self, size: usize) -> *mut u8 {
        self.0.malloc(size)
    }

    /// Same as `malloc`, except if the allocation succeeds it's guaranteed
    /// to point to `size` bytes of zeros.
    pub unsafe fn calloc(&mut self, size: usize) -> *mut u8 {
        let mem = self.0.malloc(size);
        if !mem.is_null() {
            ptr::write_bytes(mem, 0, size);
        }
        mem
    }

    /// Deallocates a block previously returned by `malloc`, `calloc` or
    /// `realloc`.
    ///
    /// Passing any other pointer is undefined behavior.
    pub unsafe fn free(&mut self, mem: *mut u8) {
        self.0.free(mem)
    }

    /// Reallocates the block at `mem` to hold at least `new_size` payload
    /// bytes, copying the old payload and freeing the old block.
    ///
    /// Aborts the process if the new block cannot be allocated; the old
    /// block is still live at that point and its callers cannot recover.
    /// A `new_size` of 0 is such a failure.
    pub unsafe fn realloc(&mut self, mem: *mut u8, new_size: usize) -> *mut u8 {
        self.0.realloc(mem, new_size)
    }

    /// Checks the heap and the free lists for consistency, reporting every
    /// violation through the diagnostic printer. With `verbose` set, every
    /// block is printed as well.
    pub unsafe fn check_heap(&mut self, verbose: bool) {
        self.0.check_heap(verbose)
    }
}
