use core::fmt::Arguments;

pub static SF_CHECKS: bool = cfg!(any(feature = "debug", debug_assertions));
pub static SF_VERBOSE: bool = cfg!(feature = "verbose");
pub static VERBOSE_DEL: &str = "====================================";

#[cfg(unix)]
mod ext {
    pub fn debug(s: &str, _size: usize) {
        libc_print::libc_println!("{}", s);
    }
}

#[cfg(target_arch = "wasm32")]
mod ext {
    mod sys {
        extern "C" {
            pub fn debug_log(msg_ptr: *const u8, msg_len: u32);
        }
    }
    pub fn debug(s: &str, size: usize) {
        unsafe { sys::debug_log(s.as_ptr(), size as _) }
    }
}

#[cfg(not(any(unix, target_arch = "wasm32")))]
mod ext {
    pub fn debug(_s: &str, _size: usize) {}
}

/// Static out buffer type
type StaticStr = str_buf::StrBuf<200>;
/// Static out buffer - we use it to avoid memory allocations,
/// when something is printed inside allocator code.
static mut OUT_BUFFER: StaticStr = StaticStr::new();

/// Prints string with args.
/// What is the out stream defines in @ext module.
#[inline(never)]
pub unsafe fn sfprint_fn(args: Arguments<'_>) {
    core::fmt::write(&mut OUT_BUFFER, args).unwrap();
    ext::debug(&OUT_BUFFER, OUT_BUFFER.len());
    OUT_BUFFER.set_len(0);
}

/// Prints string with args unconditionally.
#[macro_export]
macro_rules! sfprint {
    ($($arg:tt)*) => {
        $crate::sfverbose::sfprint_fn(format_args!($($arg)*))
    };
}

/// Prints string with args if @SF_VERBOSE is set.
#[macro_export]
macro_rules! sfverbose {
    ($($arg:tt)*) => {
        if $crate::sfverbose::SF_VERBOSE {
            $crate::sfverbose::sfprint_fn(format_args!($($arg)*))
        }
    };
}

extern crate alloc;
use self::alloc::alloc::handle_alloc_error;

/// Prints current line and throw error using @handle_alloc_error.
#[inline(never)]
pub unsafe fn sfassert_fn(line: u32) {
    sfprint_fn(format_args!("ALLOC ASSERT: {}", line));
    handle_alloc_error(core::alloc::Layout::new::<u32>());
}

/// Acts like assert using handle_alloc_error if @SF_CHECKS is set, else does nothing.
#[macro_export]
macro_rules! sfassert {
    ($check:expr) => {
        if $crate::sfverbose::SF_CHECKS && !($check) {
            unsafe {
                $crate::sfverbose::sfassert_fn(line!());
            };
        }
    };
}
