use core::arch::wasm32;
use core::ptr;

use crate::segfit::Extender;

const PAGE_SIZE: usize = 64 * 1024;

/// Heap source over the contiguous wasm linear memory. Whole pages are
/// granted by `memory_grow`; bytes are handed out from within them.
pub struct SysHeap {
    base: *mut u8,
    brk: usize,
    granted: usize,
}

/// Constant initializer for `SysHeap`.
pub const SYS_HEAP_INIT: SysHeap = SysHeap {
    base: ptr::null_mut(),
    brk: 0,
    granted: 0,
};

unsafe impl Extender for SysHeap {
    unsafe fn extend(&mut self, nbytes: usize) -> *mut u8 {
        if self.brk + nbytes > self.granted {
            let short = self.brk + nbytes - self.granted;
            let pages = (short + PAGE_SIZE - 1) / PAGE_SIZE;
            let prev = wasm32::memory_grow::<0>(pages);
            if prev == usize::MAX {
                return ptr::null_mut();
            }
            let region = (prev * PAGE_SIZE) as *mut u8;
            if self.base.is_null() {
                self.base = region;
            } else if region != self.base.wrapping_add(self.granted) {
                // Something else grew the linear memory in between; the
                // fresh pages are not contiguous with our region.
                return ptr::null_mut();
            }
            self.granted += pages * PAGE_SIZE;
        }
        let mem = self.base.add(self.brk);
        self.brk += nbytes;
        mem
    }

    fn base(&self) -> *mut u8 {
        self.base
    }

    fn end(&self) -> *mut u8 {
        self.base.wrapping_add(self.brk)
    }
}
