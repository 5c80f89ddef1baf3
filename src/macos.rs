extern crate libc;

use core::ptr;

use crate::common::align_up;
use crate::segfit::Extender;

/// Address space reserved for the heap up front; pages are committed
/// inside this one reservation so growth stays contiguous.
const RESERVE: usize = 1 << 28;

/// The page size is fixed on Apple targets.
fn page_size() -> usize {
    0x4000
}

/// Heap source backed by an anonymous mapping, committed page by page as
/// the heap grows.
pub struct SysHeap {
    base: *mut u8,
    brk: usize,
    committed: usize,
}

/// Constant initializer for `SysHeap`.
pub const SYS_HEAP_INIT: SysHeap = SysHeap {
    base: ptr::null_mut(),
    brk: 0,
    committed: 0,
};

impl SysHeap {
    unsafe fn reserve(&mut self) -> bool {
        let addr = libc::mmap(
            ptr::null_mut(),
            RESERVE,
            libc::PROT_NONE,
            libc::MAP_ANON | libc::MAP_PRIVATE,
            -1,
            0,
        );
        if addr == libc::MAP_FAILED {
            return false;
        }
        self.base = addr as *mut u8;
        true
    }
}

unsafe impl Extender for SysHeap {
    unsafe fn extend(&mut self, nbytes: usize) -> *mut u8 {
        if self.base.is_null() && !self.reserve() {
            return ptr::null_mut();
        }
        if nbytes > RESERVE - self.brk {
            return ptr::null_mut();
        }
        let new_brk = self.brk + nbytes;
        if new_brk > self.committed {
            let commit_end = align_up(new_brk, page_size());
            let res = libc::mprotect(
                self.base.add(self.committed) as *mut _,
                commit_end - self.committed,
                libc::PROT_READ | libc::PROT_WRITE,
            );
            if res != 0 {
                return ptr::null_mut();
            }
            self.committed = commit_end;
        }
        let mem = self.base.add(self.brk);
        self.brk = new_brk;
        mem
    }

    fn base(&self) -> *mut u8 {
        self.base
    }

    fn end(&self) -> *mut u8 {
        self.base.wrapping_add(self.brk)
    }
}
