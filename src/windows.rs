//! Windows is unsupported currently.
//! It means, that you cannot use this allocator in native windows programs.

use crate::segfit::Extender;

/// Placeholder heap source.
pub struct SysHeap;

/// Constant initializer for `SysHeap`.
pub const SYS_HEAP_INIT: SysHeap = SysHeap;

unsafe impl Extender for SysHeap {
    unsafe fn extend(&mut self, _nbytes: usize) -> *mut u8 {
        unreachable!("Windows is unsupported");
    }

    fn base(&self) -> *mut u8 {
        unreachable!("Windows is unsupported");
    }

    fn end(&self) -> *mut u8 {
        unreachable!("Windows is unsupported");
    }
}
