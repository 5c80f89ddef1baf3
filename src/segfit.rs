// The segregated-fit allocator core.
//
// Every byte of the managed region lies inside exactly one block. A block
// starts with an 8 byte header word and ends with an identical footer word;
// the payload between them is 8 byte aligned. The header word packs the
// block size and the allocated flag:
//
//      63        32  31         3  2   1   0
//      +------------+-------------+----------+
//      |  reserved  |    size     | 0  0  a  |
//      +------------+-------------+----------+
//
// Sizes are multiples of 8, so the low bits never carry size. The footer
// lets the coalescer find the previous block's header in O(1); allocated
// blocks keep truthful footers for the same reason.
//
// The managed region is fenced by two permanently-allocated sentinels, so
// neighbor inspection never needs bounds tests:
//
//   base                                                       end
//   +----------+---------+---------+-----+----------+
//   | prologue |  block  |  block  | ... | epilogue |
//   | 8B, used |                         | 0B, used |
//   +----------+---------+---------+-----+----------+
//
// Free blocks are threaded onto NBINS doubly-linked lists segregated by a
// power-of-two size class; the list links occupy the first two payload
// slots. A bitmap mirrors which bins are non-empty.

use core::cmp;
use core::mem;
use core::ptr;

extern crate alloc;
extern crate static_assertions;

use self::alloc::alloc::handle_alloc_error;
use core::alloc::Layout;

use crate::common::{align_up, is_aligned};
use crate::sfverbose::{SF_CHECKS, VERBOSE_DEL};
use crate::{sfassert, sfprint, sfverbose};

/// Header and footer words keep the on-heap format fixed at 8 bytes per
/// word on every target; the upper half of each word is reserved padding.
type Word = u64;

const WORD_SIZE: usize = mem::size_of::<Word>();
const ALIGNMENT: usize = 8;
/// Header plus footer of one block.
const OVERHEAD: usize = 2 * WORD_SIZE;
/// Header, footer and the two free-list links.
const MIN_BLOCK_SIZE: usize = 32;
/// Unit of heap growth when the free lists cannot serve a request.
const CHUNKSIZE: usize = 64 * 1024;
/// Adjusted sizes up to this bypass the free lists and are placed in a
/// fresh extension, keeping small short-lived allocations from carving up
/// large free blocks.
const SMALL_REQUEST_MAX: usize = 96;
/// Largest payload request the 31-bit size field can honor.
const MAX_REQUEST: usize = (1 << 31) - (OVERHEAD + ALIGNMENT);

/// Number of segregated bins.
const NBINS: usize = 11;
/// log2 of the smallest class boundary. Blocks of 32..64 bytes map to bin
/// 0, each following bin doubles the range, bin NBINS - 1 is unbounded.
const BIN_SHIFT: usize = 5;

const USIZE_BITS: u32 = mem::size_of::<usize>() as u32 * 8;

// Header flag bits
const ALLOC: Word = 1 << 0;
const FREE: Word = 0;
const FLAG_BITS: Word = 0b111;
const SIZE_MASK: Word = !FLAG_BITS;

static_assertions::const_assert_eq!(WORD_SIZE, ALIGNMENT);
static_assertions::const_assert_eq!(1 << BIN_SHIFT, MIN_BLOCK_SIZE);
static_assertions::const_assert_eq!(CHUNKSIZE % WORD_SIZE, 0);
static_assertions::const_assert!(MIN_BLOCK_SIZE <= SMALL_REQUEST_MAX);
static_assertions::const_assert!(mem::size_of::<Block>() + WORD_SIZE <= MIN_BLOCK_SIZE);

/// The low-level heap extender consumed by the allocator.
///
/// An implementation hands out one contiguous, monotonically-growable
/// region. The allocator never returns memory through this trait.
///
/// # Safety
///
/// `extend` must return either null or the base of a fresh `nbytes`-sized
/// sub-region that is writable and exactly adjacent to the previously
/// returned one, with the very first call defining `base()`. `base()` must
/// be 8 byte aligned.
pub unsafe trait Extender {
    /// Grows the region by exactly `nbytes` and returns the base of the
    /// new sub-region, or null on failure. Called with `nbytes > 0`.
    unsafe fn extend(&mut self, nbytes: usize) -> *mut u8;
    /// Lowest address of the managed region.
    fn base(&self) -> *mut u8;
    /// One past the highest managed address.
    fn end(&self) -> *mut u8;
}

#[repr(C)]
struct Block {
    head: Word,
    // Free-list links, live only while the block is free. They overlay the
    // first two payload slots of an allocated block.
    next: *mut Block,
    prev: *mut Block,
}

pub struct Segfit<E> {
    bins: [*mut Block; NBINS],
    binmap: u32,
    prologue: *mut Block,
    ext: E,
}

unsafe impl<E: Send> Send for Segfit<E> {}

/// Adjusted block size for a payload request: overhead added, aligned,
/// raised to the minimum.
fn request2size(req: usize) -> usize {
    cmp::max(align_up(req + OVERHEAD, ALIGNMENT), MIN_BLOCK_SIZE)
}

/// Bin index for a block of `size` bytes.
///
/// `size` must be at least `MIN_BLOCK_SIZE`, otherwise the subtraction
/// would underflow.
fn bin_index(size: usize) -> usize {
    sfassert!(size >= MIN_BLOCK_SIZE);
    let log2 = (USIZE_BITS - 1 - size.leading_zeros()) as usize;
    cmp::min(NBINS - 1, log2 - BIN_SHIFT)
}

impl<E> Segfit<E> {
    pub const fn new(ext: E) -> Segfit<E> {
        Segfit {
            bins: [ptr::null_mut(); NBINS],
            binmap: 0,
            prologue: ptr::null_mut(),
            ext,
        }
    }
}

impl<E: Extender> Segfit<E> {
    /// Creates the initial empty heap: prologue sentinel, one free block
    /// spanning the rest of the first chunk, epilogue sentinel.
    ///
    /// Returns `false` if the extender refuses the initial growth. Calling
    /// `init` on an already-initialized heap is a no-op.
    pub unsafe fn init(&mut self) -> bool {
        if !self.prologue.is_null() {
            return true;
        }
        let base = self.ext.extend(CHUNKSIZE);
        if base.is_null() {
            return false;
        }
        sfassert!(is_aligned(base as usize, ALIGNMENT));

        let prologue = base as *mut Block;
        Block::write(prologue, WORD_SIZE, ALLOC);
        self.prologue = prologue;

        let first = Block::next(prologue);
        Block::write(first, CHUNKSIZE - OVERHEAD, FREE);

        // Size 0 marks the heap tail; the epilogue is header-only.
        let epilogue = Block::next(first);
        (*epilogue).head = ALLOC;

        self.insert_block(first);
        self.check_state();
        true
    }

    pub unsafe fn malloc(&mut self, size: usize) -> *mut u8 {
        sfverbose!("{}", VERBOSE_DEL);
        sfverbose!("MALLOC: size = {:#x}", size);

        if self.prologue.is_null() && !self.init() {
            return ptr::null_mut();
        }
        self.check_state();

        if size == 0 || size > MAX_REQUEST {
            return ptr::null_mut();
        }
        let asize = request2size(size);

        let block = if asize <= SMALL_REQUEST_MAX {
            self.extend_heap(asize / WORD_SIZE)
        } else {
            let fit = self.find_fit(asize);
            if fit.is_null() {
                self.extend_heap(cmp::max(asize, CHUNKSIZE) / WORD_SIZE)
            } else {
                fit
            }
        };
        if block.is_null() {
            return ptr::null_mut();
        }

        let mem = self.place(block, asize);
        self.check_state();
        sfverbose!("MALLOC: result mem {:?}", mem);
        mem
    }

    pub unsafe fn free(&mut self, mem: *mut u8) {
        sfverbose!("{}", VERBOSE_DEL);
        sfverbose!("FREE: mem = {:?}", mem);

        let block = Block::from_mem(mem);
        sfassert!(Block::allocated(block));
        Block::write(block, Block::size(block), FREE);
        self.insert_block(block);
        self.coalesce(block);
        self.check_state();
    }

    /// Moves the allocation at `mem` to a block with at least `size`
    /// payload bytes and releases the old block.
    ///
    /// Allocation failure is fatal here: the old block is still live, so
    /// the caller has no way to recover, and the process is aborted with a
    /// diagnostic instead. A `size` of zero is such a failure.
    pub unsafe fn realloc(&mut self, mem: *mut u8, size: usize) -> *mut u8 {
        sfverbose!("{}", VERBOSE_DEL);
        sfverbose!("REALLOC: mem = {:?} size = {:#x}", mem, size);

        let new_mem = self.malloc(size);
        if new_mem.is_null() {
            sfprint!("REALLOC: cannot allocate {:#x} bytes", size);
            handle_alloc_error(Layout::from_size_align_unchecked(size, ALIGNMENT));
        }

        let block = Block::from_mem(mem);
        // The old block's capacity is its size minus both boundary tags;
        // copying more would read the next block's metadata.
        let old_payload = Block::size(block) - OVERHEAD;
        ptr::copy_nonoverlapping(mem, new_mem, cmp::min(size, old_payload));
        self.free(mem);
        new_mem
    }

    /// Grows the heap by `words * 8` bytes and returns the resulting free
    /// block, coalesced with a free tail if there is one. Null on extender
    /// failure.
    unsafe fn extend_heap(&mut self, words: usize) -> *mut Block {
        let size = words * WORD_SIZE;
        sfassert!(size > 0);

        let mem = self.ext.extend(size);
        if mem.is_null() {
            return ptr::null_mut();
        }
        sfverbose!("EXTEND: +{:#x} bytes at {:?}", size, mem);

        // The word right before the fresh region is the old epilogue; it
        // becomes the header of the new free block, and a new epilogue is
        // written at the tail.
        let block = (mem as *mut u8).sub(WORD_SIZE) as *mut Block;
        sfassert!((*block).head == ALLOC);
        Block::write(block, size, FREE);
        let epilogue = Block::next(block);
        (*epilogue).head = ALLOC;

        self.insert_block(block);
        self.coalesce(block)
    }

    /// Carves `asize` bytes out of the free block `block` and returns the
    /// payload. The remainder becomes a new free block unless it would be
    /// a splinter, in which case the whole block is handed out.
    unsafe fn place(&mut self, block: *mut Block, asize: usize) -> *mut u8 {
        sfassert!(!Block::allocated(block));
        let size = Block::size(block);
        sfassert!(asize <= size);

        self.unlink_block(block);
        let rest = size - asize;
        if rest >= MIN_BLOCK_SIZE {
            Block::write(block, asize, ALLOC);
            let split = Block::next(block);
            Block::write(split, rest, FREE);
            self.insert_block(split);
        } else {
            Block::write(block, size, ALLOC);
        }
        Block::to_mem(block)
    }

    /// First-fit search: starts at the request's own class and walks each
    /// non-empty bin in LIFO order, taking the first block that is large
    /// enough.
    unsafe fn find_fit(&mut self, asize: usize) -> *mut Block {
        for k in bin_index(asize)..NBINS {
            if self.binmap & (1 << k) == 0 {
                continue;
            }
            let mut block = self.bins[k];
            while !block.is_null() {
                if Block::size(block) >= asize {
                    return block;
                }
                block = (*block).next;
            }
        }
        ptr::null_mut()
    }

    /// Merges `block` with its free neighbors. `block` must already be
    /// free and on its bin. Returns the surviving block, which is the
    /// previous neighbor when that one absorbs `block`.
    unsafe fn coalesce(&mut self, block: *mut Block) -> *mut Block {
        let prev = Block::prev(block);
        let next = Block::next(block);
        let prev_free = !Block::allocated(prev);
        let next_free = !Block::allocated(next);

        if !prev_free && !next_free {
            return block;
        }

        let size = Block::size(block);
        if !prev_free && next_free {
            sfverbose!("COALESCE: eat next [{:?}, {:#x}]", next, Block::size(next));
            self.unlink_block(block);
            self.unlink_block(next);
            Block::write(block, size + Block::size(next), FREE);
            self.insert_block(block);
            block
        } else if prev_free && !next_free {
            sfverbose!("COALESCE: join prev [{:?}, {:#x}]", prev, Block::size(prev));
            self.unlink_block(block);
            self.unlink_block(prev);
            Block::write(prev, Block::size(prev) + size, FREE);
            self.insert_block(prev);
            prev
        } else {
            sfverbose!("COALESCE: join both neighbors of {:?}", block);
            self.unlink_block(prev);
            self.unlink_block(block);
            self.unlink_block(next);
            Block::write(prev, Block::size(prev) + size + Block::size(next), FREE);
            self.insert_block(prev);
            prev
        }
    }

    /// Pushes a free block onto the head of its class bin.
    unsafe fn insert_block(&mut self, block: *mut Block) {
        sfassert!(!Block::allocated(block));
        let k = bin_index(Block::size(block));
        let head = self.bins[k];
        (*block).next = head;
        (*block).prev = ptr::null_mut();
        if head.is_null() {
            self.mark_bin(k);
        } else {
            (*head).prev = block;
        }
        self.bins[k] = block;
    }

    /// Splices a block out of its class bin, using its in-band links.
    unsafe fn unlink_block(&mut self, block: *mut Block) {
        let k = bin_index(Block::size(block));
        let next = (*block).next;
        let prev = (*block).prev;
        if prev.is_null() {
            sfassert!(self.bins[k] == block);
            self.bins[k] = next;
            if next.is_null() {
                self.clear_bin(k);
            }
        } else {
            (*prev).next = next;
        }
        if !next.is_null() {
            (*next).prev = prev;
        }
        (*block).next = ptr::null_mut();
        (*block).prev = ptr::null_mut();
    }

    fn mark_bin(&mut self, k: usize) {
        self.binmap |= 1 << k;
    }

    fn clear_bin(&mut self, k: usize) {
        self.binmap &= !(1 << k);
    }

    /// Walks the heap and the bins and reports every inconsistency through
    /// the diagnostic printer. Never aborts. With `verbose` set, every
    /// block is printed as well.
    pub unsafe fn check_heap(&mut self, verbose: bool) {
        if self.prologue.is_null() {
            sfprint!("heap: not initialized");
            return;
        }
        if verbose {
            sfprint!("heap [{:?}, {:?}]:", self.ext.base(), self.ext.end());
        }

        if self.prologue as *mut u8 != self.ext.base() {
            sfprint!("error: prologue is not at the heap base");
        }
        if Block::size(self.prologue) != WORD_SIZE || !Block::allocated(self.prologue) {
            sfprint!("error: bad prologue header");
        }

        let mut heap_free = 0usize;
        let mut prev_free = false;
        let mut block = Block::next(self.prologue);
        while Block::size(block) > 0 {
            if verbose {
                self.print_block(block);
            }
            let size = Block::size(block);
            if size < MIN_BLOCK_SIZE || !is_aligned(size, ALIGNMENT) {
                sfprint!("error: block {:?} has bad size {:#x}", block, size);
                break;
            }
            if !is_aligned(Block::to_mem(block) as usize, ALIGNMENT) {
                sfprint!("error: payload of {:?} is misaligned", block);
            }
            if *Block::footer(block) != (*block).head {
                sfprint!("error: header of {:?} does not match its footer", block);
            }
            if Block::allocated(block) {
                prev_free = false;
            } else {
                if prev_free {
                    sfprint!("error: two adjacent free blocks at {:?}", block);
                }
                if !self.bin_holds(block) {
                    sfprint!("error: free block {:?} is missing from its bin", block);
                }
                heap_free += 1;
                prev_free = true;
            }
            block = Block::next(block);
        }

        if verbose {
            self.print_block(block);
        }
        if !Block::allocated(block) {
            sfprint!("error: bad epilogue header");
        }
        if (block as *mut u8).wrapping_add(WORD_SIZE) != self.ext.end() {
            sfprint!("error: blocks do not tile the managed region");
        }

        let mut bin_free = 0usize;
        for k in 0..NBINS {
            let head = self.bins[k];
            if (self.binmap & (1 << k) != 0) == head.is_null() {
                sfprint!("error: bin map disagrees with bin {}", k);
            }
            let mut prev: *mut Block = ptr::null_mut();
            let mut b = head;
            while !b.is_null() {
                if (*b).prev != prev {
                    sfprint!("error: broken prev link at {:?} in bin {}", b, k);
                }
                if Block::allocated(b) {
                    sfprint!("error: allocated block {:?} on bin {}", b, k);
                }
                if bin_index(Block::size(b)) != k {
                    sfprint!("error: block {:?} filed in wrong bin {}", b, k);
                }
                bin_free += 1;
                prev = b;
                b = (*b).next;
            }
        }
        if heap_free != bin_free {
            sfprint!(
                "error: {} free blocks on the heap, {} on the bins",
                heap_free,
                bin_free
            );
        }
    }

    unsafe fn print_block(&self, block: *mut Block) {
        let size = Block::size(block);
        if size == 0 {
            sfprint!("{:?}: epilogue", block);
            return;
        }
        let footer = *Block::footer(block);
        sfprint!(
            "{:?}: header [{:#x}:{}] footer [{:#x}:{}]",
            block,
            size,
            if Block::allocated(block) { 'a' } else { 'f' },
            (footer & SIZE_MASK) as usize,
            if footer & ALLOC != 0 { 'a' } else { 'f' }
        );
    }

    unsafe fn bin_holds(&self, block: *mut Block) -> bool {
        let mut b = self.bins[bin_index(Block::size(block))];
        while !b.is_null() {
            if b == block {
                return true;
            }
            b = (*b).next;
        }
        false
    }

    // Sanity checks

    /// Asserting twin of `check_heap`, compiled in with @SF_CHECKS and run
    /// at the quiescent points of every public operation.
    unsafe fn check_state(&mut self) {
        if !SF_CHECKS || self.prologue.is_null() {
            return;
        }

        sfassert!(self.prologue as *mut u8 == self.ext.base());
        sfassert!(Block::size(self.prologue) == WORD_SIZE);
        sfassert!(Block::allocated(self.prologue));

        let mut prev_free = false;
        let mut block = Block::next(self.prologue);
        while Block::size(block) > 0 {
            let size = Block::size(block);
            sfassert!(size >= MIN_BLOCK_SIZE);
            sfassert!(is_aligned(size, ALIGNMENT));
            sfassert!(is_aligned(Block::to_mem(block) as usize, ALIGNMENT));
            sfassert!(*Block::footer(block) == (*block).head);
            if Block::allocated(block) {
                prev_free = false;
            } else {
                sfassert!(!prev_free);
                sfassert!(self.bin_holds(block));
                prev_free = true;
            }
            block = Block::next(block);
        }

        sfassert!(Block::allocated(block));
        sfassert!((block as *mut u8).wrapping_add(WORD_SIZE) == self.ext.end());

        for k in 0..NBINS {
            sfassert!((self.binmap & (1 << k) != 0) == !self.bins[k].is_null());
            let mut prev: *mut Block = ptr::null_mut();
            let mut b = self.bins[k];
            while !b.is_null() {
                sfassert!((*b).prev == prev);
                sfassert!(!Block::allocated(b));
                sfassert!(bin_index(Block::size(b)) == k);
                prev = b;
                b = (*b).next;
            }
        }
    }
}

impl Block {
    unsafe fn size(me: *mut Block) -> usize {
        ((*me).head & SIZE_MASK) as usize
    }

    unsafe fn allocated(me: *mut Block) -> bool {
        (*me).head & ALLOC != 0
    }

    unsafe fn footer(me: *mut Block) -> *mut Word {
        (me as *mut u8).add(Block::size(me) - WORD_SIZE) as *mut Word
    }

    /// Writes header and footer together so the tags always agree.
    unsafe fn write(me: *mut Block, size: usize, tag: Word) {
        let word = size as Word | tag;
        (*me).head = word;
        *Block::footer(me) = word;
    }

    unsafe fn next(me: *mut Block) -> *mut Block {
        (me as *mut u8).add(Block::size(me)) as *mut Block
    }

    /// The block ending right before `me`, found through its footer. Valid
    /// for any non-prologue block because allocated blocks keep footers.
    unsafe fn prev(me: *mut Block) -> *mut Block {
        let footer = (me as *mut u8).sub(WORD_SIZE) as *mut Word;
        let prev_size = (*footer & SIZE_MASK) as usize;
        (me as *mut u8).sub(prev_size) as *mut Block
    }

    unsafe fn to_mem(me: *mut Block) -> *mut u8 {
        (me as *mut u8).add(WORD_SIZE)
    }

    unsafe fn from_mem(mem: *mut u8) -> *mut Block {
        mem.sub(WORD_SIZE) as *mut Block
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use quickcheck_macros::quickcheck;
    use std::prelude::v1::*;

    use super::*;

    const ARENA_SIZE: usize = 32 << 20;

    /// An sbrk emulation over a pre-reserved arena, with a configurable
    /// failure point.
    struct MockHeap {
        arena: Vec<Word>,
        brk: usize,
        limit: usize,
    }

    impl MockHeap {
        fn new() -> MockHeap {
            MockHeap::with_limit(ARENA_SIZE)
        }

        fn with_limit(limit: usize) -> MockHeap {
            assert!(limit <= ARENA_SIZE);
            MockHeap {
                // Never pushed to, so the base address stays put.
                arena: Vec::with_capacity(ARENA_SIZE / WORD_SIZE),
                brk: 0,
                limit,
            }
        }
    }

    unsafe impl Extender for MockHeap {
        unsafe fn extend(&mut self, nbytes: usize) -> *mut u8 {
            if nbytes > self.limit - self.brk {
                return ptr::null_mut();
            }
            let mem = (self.arena.as_mut_ptr() as *mut u8).add(self.brk);
            self.brk += nbytes;
            mem
        }

        fn base(&self) -> *mut u8 {
            self.arena.as_ptr() as *mut u8
        }

        fn end(&self) -> *mut u8 {
            self.base().wrapping_add(self.brk)
        }
    }

    fn new_heap() -> Segfit<MockHeap> {
        let mut a = Segfit::new(MockHeap::new());
        unsafe { assert!(a.init()) };
        a
    }

    /// All non-sentinel blocks as (offset from base, size, allocated).
    unsafe fn heap_blocks(a: &Segfit<MockHeap>) -> Vec<(usize, usize, bool)> {
        let base = a.ext.base() as usize;
        let mut out = Vec::new();
        let mut block = Block::next(a.prologue);
        while Block::size(block) > 0 {
            out.push((
                block as usize - base,
                Block::size(block),
                Block::allocated(block),
            ));
            block = Block::next(block);
        }
        out
    }

    unsafe fn bin_len(a: &Segfit<MockHeap>, k: usize) -> usize {
        let mut n = 0;
        let mut b = a.bins[k];
        while !b.is_null() {
            n += 1;
            b = (*b).next;
        }
        n
    }

    #[test]
    fn init_builds_canonical_heap() {
        let a = new_heap();
        unsafe {
            assert_eq!(a.ext.brk, CHUNKSIZE);
            assert_eq!(
                heap_blocks(&a),
                vec![(WORD_SIZE, CHUNKSIZE - OVERHEAD, false)]
            );
            // The sole free block sits alone in the largest class.
            for k in 0..NBINS - 1 {
                assert_eq!(bin_len(&a, k), 0);
            }
            assert_eq!(bin_len(&a, NBINS - 1), 1);
        }
    }

    #[test]
    fn init_reports_extender_failure() {
        let mut a = Segfit::new(MockHeap::with_limit(0));
        unsafe { assert!(!a.init()) };
    }

    #[test]
    fn init_twice_is_noop() {
        let mut a = new_heap();
        unsafe {
            assert!(a.init());
            assert_eq!(a.ext.brk, CHUNKSIZE);
        }
    }

    #[test]
    fn malloc_zero_returns_null() {
        let mut a = new_heap();
        unsafe {
            assert!(a.malloc(0).is_null());
            assert_eq!(a.ext.brk, CHUNKSIZE);
        }
    }

    #[test]
    fn oversize_request_returns_null() {
        let mut a = new_heap();
        unsafe { assert!(a.malloc(MAX_REQUEST + 1).is_null()) };
    }

    #[test]
    fn malloc_initializes_lazily() {
        let mut a = Segfit::new(MockHeap::new());
        unsafe {
            let mem = a.malloc(16);
            assert!(!mem.is_null());
            assert_eq!(a.ext.brk, CHUNKSIZE + 32);
        }
    }

    // A 16 byte request adjusts to a 32 byte block, goes through the
    // fast path and grows the heap by exactly that block, which then
    // merges with the free tail before placement.
    #[test]
    fn small_request_uses_fresh_extension() {
        let mut a = new_heap();
        unsafe {
            let mem = a.malloc(16);
            assert!(!mem.is_null());
            assert_eq!(mem as usize % ALIGNMENT, 0);
            assert_eq!(a.ext.brk, CHUNKSIZE + 32);
            // One 32 byte allocation, one large residual free block.
            assert_eq!(
                heap_blocks(&a),
                vec![
                    (WORD_SIZE, 32, true),
                    (WORD_SIZE + 32, CHUNKSIZE - OVERHEAD, false),
                ]
            );
            assert_eq!(bin_len(&a, NBINS - 1), 1);
        }
    }

    #[test]
    fn freed_block_is_reused_for_equal_request() {
        let mut a = new_heap();
        unsafe {
            let p1 = a.malloc(4000);
            assert!(!p1.is_null());
            a.free(p1);
            // Coalescing restored the single free block, so an equal
            // request is served from the same spot.
            assert_eq!(
                heap_blocks(&a),
                vec![(WORD_SIZE, CHUNKSIZE - OVERHEAD, false)]
            );
            let p2 = a.malloc(4000);
            assert_eq!(p2, p1);
        }
    }

    #[test]
    fn adjacent_free_blocks_merge() {
        let mut a = new_heap();
        unsafe {
            let p1 = a.malloc(200);
            let p2 = a.malloc(200);
            let p3 = a.malloc(200);
            a.free(p1);
            a.free(p3);
            // The middle free joins both neighbors and the tail.
            a.free(p2);
            assert_eq!(
                heap_blocks(&a),
                vec![(WORD_SIZE, CHUNKSIZE - OVERHEAD, false)]
            );
        }
    }

    // A residual smaller than MIN_BLOCK_SIZE is handed out with the block
    // instead of being split off.
    #[test]
    fn splinter_is_not_split() {
        let mut a = new_heap();
        unsafe {
            let p1 = a.malloc(100); // 120 byte block
            let _p2 = a.malloc(100); // pins p1 away from the free tail
            a.free(p1);
            let k = bin_index(120);
            assert_eq!(bin_len(&a, k), 1);

            // Adjusted to 104 bytes; the 16 byte residual is a splinter.
            let p3 = a.malloc(88);
            assert_eq!(p3, p1);
            assert_eq!(bin_len(&a, k), 0);
            assert_eq!(Block::size(Block::from_mem(p3)), 120);
        }
    }

    #[test]
    fn large_request_grows_by_request_size() {
        let mut a = new_heap();
        unsafe {
            let p = a.malloc(100_000);
            assert!(!p.is_null());
            // Growth is the adjusted request, not the chunk size, and the
            // fresh block merges with the free tail before placement.
            assert_eq!(a.ext.brk, CHUNKSIZE + 100_016);
            assert_eq!(
                heap_blocks(&a),
                vec![
                    (WORD_SIZE, 100_016, true),
                    (WORD_SIZE + 100_016, CHUNKSIZE - OVERHEAD, false),
                ]
            );
        }
    }

    #[test]
    fn bins_are_lifo() {
        let mut a = new_heap();
        unsafe {
            let p1 = a.malloc(200);
            let _s1 = a.malloc(200);
            let p2 = a.malloc(200);
            let _s2 = a.malloc(200);
            let _s3 = a.malloc(200);
            a.free(p1);
            a.free(p2);
            // Both freed blocks are isolated and share a class; the most
            // recently freed one is taken first.
            let q1 = a.malloc(200);
            assert_eq!(q1, p2);
            let q2 = a.malloc(200);
            assert_eq!(q2, p1);
        }
    }

    #[test]
    fn realloc_moves_payload() {
        let mut a = new_heap();
        unsafe {
            let p = a.malloc(100);
            for i in 0..100 {
                *p.add(i) = i as u8;
            }
            let q = a.realloc(p, 200);
            assert_ne!(q, p);
            for i in 0..100 {
                assert_eq!(*q.add(i), i as u8);
            }
            // The old block was freed and serves the next fitting request.
            let r = a.malloc(100);
            assert_eq!(r, p);
        }
    }

    #[test]
    fn realloc_copy_capped_at_old_payload() {
        let mut a = new_heap();
        unsafe {
            let p = a.malloc(20); // 40 byte block, 24 byte capacity
            for i in 0..24 {
                *p.add(i) = 0xa5;
            }
            let q = a.realloc(p, 10_000);
            for i in 0..24 {
                assert_eq!(*q.add(i), 0xa5);
            }
        }
    }

    #[test]
    fn malloc_returns_null_when_extender_fails() {
        let mut a = Segfit::new(MockHeap::with_limit(CHUNKSIZE));
        unsafe {
            assert!(a.init());
            // The fast path cannot extend and does not fall back.
            assert!(a.malloc(16).is_null());
            // Nothing on the heap fits and growth is refused.
            assert!(a.malloc(70_000).is_null());
            // A fitting request is still served from the free lists.
            assert!(!a.malloc(4000).is_null());
        }
    }

    #[quickcheck]
    fn payloads_aligned_and_disjoint(reqs: Vec<u16>) -> bool {
        let mut a = new_heap();
        let mut live: Vec<(*mut u8, usize, u8)> = Vec::new();
        unsafe {
            for (i, &req) in reqs.iter().enumerate() {
                let size = req as usize;
                let mem = a.malloc(size);
                if size == 0 {
                    if !mem.is_null() {
                        return false;
                    }
                    continue;
                }
                if mem.is_null() || mem as usize % ALIGNMENT != 0 {
                    return false;
                }
                let tag = (i & 0xff) as u8;
                ptr::write_bytes(mem, tag, size);
                live.push((mem, size, tag));
            }
            // Overlapping payloads would have clobbered an earlier tag.
            for &(mem, size, tag) in &live {
                for j in 0..size {
                    if *mem.add(j) != tag {
                        return false;
                    }
                }
            }
            for &(mem, _, _) in &live {
                a.free(mem);
            }
        }
        true
    }

    #[quickcheck]
    fn freeing_everything_leaves_one_block(reqs: Vec<u16>) -> bool {
        let mut a = new_heap();
        let mut live = Vec::new();
        unsafe {
            for &req in &reqs {
                if req == 0 {
                    continue;
                }
                let mem = a.malloc(req as usize);
                if mem.is_null() {
                    return false;
                }
                live.push(mem);
            }
            for &mem in &live {
                a.free(mem);
            }
            let blocks = heap_blocks(&a);
            blocks.len() == 1 && !blocks[0].2 && blocks[0].1 == a.ext.brk - OVERHEAD
        }
    }
}
