//! Pool implementation: block chain, large-object list, destruction.
//!
//! # Safety
//!
//! The pool is a single-threaded bump allocator over raw block memory:
//! - every block starts with an embedded `#[repr(C)]` header followed by
//!   bump space; `Cell` fields let the header be mutated through shared
//!   references,
//! - the block chain is acyclic, terminated by a null `next`, and only
//!   ever appended to,
//! - `start <= last <= end` holds for every block; alignment arithmetic
//!   is done on `usize` addresses so no out-of-bounds pointer is formed,
//! - large-allocation and cleanup nodes are plain-old-data written into
//!   pool memory; nothing stored in block memory is ever dropped,
//! - pool-wide state (current block, list heads, span, counters) lives
//!   in the `Pool` struct itself, so diagnostics stay usable until the
//!   moment block memory is freed.

use std::alloc::{alloc, dealloc, Layout};
use std::cell::Cell;
use std::fmt;
use std::mem;
use std::ptr::{self, NonNull};

use tracing::{error, trace, Span};

use crate::error::{FreeStatus, PoolError, PoolResult};
use crate::utils::align_up;

use super::{
    max_alloc_from_pool, CleanupNode, PoolStats, PoolStatsSnapshot, ALIGNMENT, MIN_POOL_SIZE,
    POOL_ALIGNMENT,
};

/// Per-block bookkeeping, embedded at the base of every block.
#[repr(C)]
pub(crate) struct BlockHeader {
    /// Bump pointer: next free byte in this block.
    last: Cell<*mut u8>,
    /// One past the last usable byte.
    end: *mut u8,
    /// Next block in the chain, null at the tail.
    next: Cell<*mut BlockHeader>,
    /// Allocation attempts this block could not satisfy.
    failed: Cell<u32>,
}

pub(crate) const BLOCK_HEADER_SIZE: usize = mem::size_of::<BlockHeader>();

/// Bookkeeping node for one large allocation. Lives in pool block
/// memory; the buffer it points to is owned by the system allocator.
/// A null `alloc` marks a slot that can be reused.
#[repr(C)]
struct LargeNode {
    alloc: Cell<*mut u8>,
    size: Cell<usize>,
    align: Cell<usize>,
    next: Cell<*mut LargeNode>,
}

/// How many leading large nodes the reuse scan examines before giving up
/// and linking a fresh node. Selective frees leave sparse holes; the
/// bounded scan amortizes their reuse at O(1) per allocation.
const LARGE_REUSE_SCAN: usize = 4;

/// Region-based memory pool.
///
/// See the [module documentation](crate::pool) for the allocation
/// strategy and invariants. Dropping the pool runs every registered
/// cleanup handler (LIFO), frees all large buffers, then frees the
/// block chain.
pub struct Pool {
    /// First block in the chain. Never null, never replaced.
    head: NonNull<BlockHeader>,
    /// Block at which allocation attempts begin.
    current: Cell<NonNull<BlockHeader>>,
    /// Head of the large-allocation list.
    large: Cell<*mut LargeNode>,
    /// Head of the cleanup-handler chain.
    pub(super) cleanup: Cell<*mut CleanupNode>,
    /// Largest request served from a block.
    max: usize,
    /// Size of every block in the chain, header included.
    size: usize,
    /// Span that diagnostic events are parented to.
    pub(super) log: Span,
    pub(super) stats: PoolStats,
}

impl Pool {
    /// Creates a pool with a single block of exactly `size` bytes,
    /// parented to the current span.
    ///
    /// # Errors
    ///
    /// [`PoolError::InvalidSize`] if `size` is below [`MIN_POOL_SIZE`];
    /// [`PoolError::OutOfMemory`] if the backing allocation fails.
    pub fn create(size: usize) -> PoolResult<Self> {
        Self::create_with_span(size, Span::current())
    }

    /// Creates a pool whose diagnostics are parented to `log`.
    pub fn create_with_span(size: usize, log: Span) -> PoolResult<Self> {
        if size < MIN_POOL_SIZE {
            return Err(PoolError::InvalidSize {
                size,
                reason: "pool must hold the block header and minimal bump space",
            });
        }
        let layout = block_layout(size)?;
        let base = sys_alloc(layout, &log)?;

        // SAFETY: `base` points to `size` bytes aligned to POOL_ALIGNMENT,
        // which satisfies BlockHeader's layout; the header is written
        // before any other use of the block.
        let head = unsafe { init_block(base, size) };

        let max = (size - BLOCK_HEADER_SIZE).min(max_alloc_from_pool());
        trace!(parent: &log, size, max, "create pool");

        Ok(Pool {
            head,
            current: Cell::new(head),
            large: Cell::new(ptr::null_mut()),
            cleanup: Cell::new(ptr::null_mut()),
            max,
            size,
            log,
            stats: PoolStats::new(),
        })
    }

    /// Largest request served from a block; anything bigger takes the
    /// large path.
    #[inline]
    pub fn max(&self) -> usize {
        self.max
    }

    /// Size of each block in the chain, header included.
    #[inline]
    pub fn block_size(&self) -> usize {
        self.size
    }

    /// Allocates `size` bytes aligned to [`ALIGNMENT`].
    ///
    /// The returned memory is uninitialized and remains valid until the
    /// pool is reset or dropped. It must not be freed through the system
    /// allocator.
    pub fn alloc_bytes(&self, size: usize) -> PoolResult<NonNull<u8>> {
        if size <= self.max {
            self.bump(size, true)
        } else {
            self.alloc_large(size)
        }
    }

    /// Allocates `size` bytes with no alignment guarantee.
    ///
    /// The unaligned path packs byte-granular buffers (strings) densely.
    pub fn alloc_bytes_unaligned(&self, size: usize) -> PoolResult<NonNull<u8>> {
        if size <= self.max {
            self.bump(size, false)
        } else {
            self.alloc_large(size)
        }
    }

    /// Allocates `size` zeroed bytes aligned to [`ALIGNMENT`].
    pub fn alloc_bytes_zeroed(&self, size: usize) -> PoolResult<NonNull<u8>> {
        let p = self.alloc_bytes(size)?;
        // SAFETY: `p` points to at least `size` writable bytes just
        // handed out by the allocator.
        unsafe { ptr::write_bytes(p.as_ptr(), 0, size) };
        Ok(p)
    }

    /// Allocates `size` bytes aligned to `align` through the large path,
    /// regardless of `size`.
    ///
    /// The buffer is recorded in the large list (no slot reuse: the
    /// alignment may differ from prior entries) and can be returned
    /// early with [`free`](Self::free).
    pub fn alloc_bytes_aligned(&self, size: usize, align: usize) -> PoolResult<NonNull<u8>> {
        if !align.is_power_of_two() {
            return Err(PoolError::InvalidAlignment { align });
        }
        // The recorded size must match the dealloc layout exactly.
        let size = size.max(1);
        let buf = sys_alloc(large_layout(size, align)?, &self.log)?;
        self.link_large(buf, size, align)
    }

    /// Allocates and initializes a value.
    ///
    /// The value is never dropped: the pool reclaims its bytes at reset
    /// or destruction without running destructors. Types needing `Drop`
    /// should be registered through the cleanup chain instead.
    pub fn alloc<T>(&self, value: T) -> PoolResult<&mut T> {
        let ptr = self.alloc_layout(Layout::new::<T>())?.cast::<T>();
        // SAFETY: `ptr` is properly aligned for T (alloc_layout honors
        // the layout) and points to at least size_of::<T>() fresh bytes;
        // the reference is bound to the pool borrow.
        unsafe {
            ptr.as_ptr().write(value);
            Ok(&mut *ptr.as_ptr())
        }
    }

    /// Allocates and copies a slice.
    pub fn alloc_slice<T: Copy>(&self, slice: &[T]) -> PoolResult<&mut [T]> {
        if slice.is_empty() {
            return Ok(&mut []);
        }
        let layout = Layout::for_value(slice);
        let ptr = if layout.align() == 1 {
            self.alloc_bytes_unaligned(layout.size())?
        } else {
            self.alloc_layout(layout)?
        }
        .cast::<T>();
        // SAFETY: destination was just allocated for `layout`, source and
        // destination cannot overlap, and T: Copy keeps the copied bytes
        // valid instances.
        unsafe {
            ptr::copy_nonoverlapping(slice.as_ptr(), ptr.as_ptr(), slice.len());
            Ok(std::slice::from_raw_parts_mut(ptr.as_ptr(), slice.len()))
        }
    }

    /// Allocates a copy of a string through the unaligned path.
    pub fn alloc_str(&self, s: &str) -> PoolResult<&str> {
        let bytes = self.alloc_slice(s.as_bytes())?;
        // SAFETY: the bytes were copied verbatim from valid UTF-8.
        unsafe { Ok(std::str::from_utf8_unchecked(bytes)) }
    }

    /// Returns a large allocation to the system allocator early.
    ///
    /// Returns [`FreeStatus::Freed`] iff `ptr` was produced by the large
    /// path of this pool and has not been freed yet; block-path pointers
    /// yield [`FreeStatus::Declined`]. The node stays linked with a null
    /// buffer so a later large allocation can reuse the slot.
    pub fn free(&self, ptr: NonNull<u8>) -> FreeStatus {
        let mut l = self.large.get();
        while !l.is_null() {
            // SAFETY: large nodes live in pool block memory, which stays
            // valid for the pool's lifetime; the list is acyclic.
            let node = unsafe { &*l };
            if node.alloc.get() == ptr.as_ptr() {
                trace!(parent: &self.log, ptr = ?ptr.as_ptr(), "free large");
                // SAFETY: the node records the layout the buffer was
                // allocated with, and the buffer has not been freed
                // (alloc is still non-null).
                unsafe { sys_free(ptr.as_ptr(), node.size.get(), node.align.get()) };
                node.alloc.set(ptr::null_mut());
                self.stats.record_large_freed();
                return FreeStatus::Freed;
            }
            l = node.next.get();
        }
        FreeStatus::Declined
    }

    /// Frees every large buffer and rewinds every block to empty.
    ///
    /// Cleanup handlers are *not* invoked; pending registrations are
    /// discarded (their nodes live in the block memory being rewound).
    /// Resetting is idempotent.
    pub fn reset(&mut self) {
        let mut l = self.large.get();
        while !l.is_null() {
            // SAFETY: as in `free`; nodes are read before any block
            // memory is rewound, and rewinding does not write to it.
            let node = unsafe { &*l };
            let buf = node.alloc.get();
            if !buf.is_null() {
                // SAFETY: node records the buffer's layout; not yet freed.
                unsafe { sys_free(buf, node.size.get(), node.align.get()) };
            }
            l = node.next.get();
        }
        self.large.set(ptr::null_mut());
        self.cleanup.set(ptr::null_mut());

        let mut b = self.head.as_ptr();
        while !b.is_null() {
            // SAFETY: `b` walks the block chain; headers stay valid and
            // in place for the pool's lifetime.
            let block = unsafe { &*b };
            block.last.set(unsafe { (b as *mut u8).add(BLOCK_HEADER_SIZE) });
            b = block.next.get();
        }
        self.stats.record_reset();
        trace!(parent: &self.log, "reset pool");
    }

    /// Current counter values.
    pub fn stats(&self) -> PoolStatsSnapshot {
        self.stats.snapshot(self.block_count())
    }

    /// Dispatches a typed layout to the right allocation path.
    fn alloc_layout(&self, layout: Layout) -> PoolResult<NonNull<u8>> {
        if layout.align() <= ALIGNMENT {
            self.alloc_bytes(layout.size())
        } else {
            self.alloc_bytes_aligned(layout.size(), layout.align())
        }
    }

    /// Bump path: walk the chain from `current` looking for room.
    fn bump(&self, size: usize, aligned: bool) -> PoolResult<NonNull<u8>> {
        let mut p = self.current.get();
        loop {
            // SAFETY: `p` is a live block header; the chain is acyclic.
            let block = unsafe { p.as_ref() };
            let last = block.last.get();
            let m = if aligned {
                align_up(last as usize, ALIGNMENT)
            } else {
                last as usize
            };
            // Aligning may push `m` past `end`; compare before subtracting.
            let end = block.end as usize;
            if m <= end && end - m >= size {
                let m = m as *mut u8;
                // SAFETY: m and m + size both lie within this block.
                block.last.set(unsafe { m.add(size) });
                self.stats.record_allocation();
                // SAFETY: m >= last > null.
                return Ok(unsafe { NonNull::new_unchecked(m) });
            }
            match NonNull::new(block.next.get()) {
                Some(next) => p = next,
                None => break,
            }
        }
        self.extend_block(size)
    }

    /// Chains in a fresh block of the pool's block size and satisfies
    /// the request from it atomically.
    ///
    /// Every block visited on the way to the tail gets its `failed`
    /// count incremented; once a block has failed more than four times,
    /// `current` advances past it so exhausted blocks stop being probed.
    fn extend_block(&self, size: usize) -> PoolResult<NonNull<u8>> {
        // Block layout was validated at creation; the size never changes.
        let layout = unsafe { Layout::from_size_align_unchecked(self.size, POOL_ALIGNMENT) };
        let base = sys_alloc(layout, &self.log)?;

        // SAFETY: fresh block of self.size bytes, POOL_ALIGNMENT aligned.
        let header = unsafe { init_block(base, self.size) };
        let data = base.as_ptr() as usize + BLOCK_HEADER_SIZE;
        let m = align_up(data, ALIGNMENT) as *mut u8;
        // SAFETY: MIN_POOL_SIZE guarantees room for the aligned header
        // end, and `size <= max <= self.size - BLOCK_HEADER_SIZE` keeps
        // m + size within the block.
        unsafe { header.as_ref().last.set(m.add(size)) };

        let mut current = self.current.get();
        let mut p = current;
        loop {
            // SAFETY: live header on the acyclic chain.
            let block = unsafe { p.as_ref() };
            let next = block.next.get();
            if next.is_null() {
                block.next.set(header.as_ptr());
                break;
            }
            let failed = block.failed.get() + 1;
            block.failed.set(failed);
            if failed > 4 {
                // SAFETY: `next` was just observed non-null.
                current = unsafe { NonNull::new_unchecked(next) };
            }
            // SAFETY: same observation.
            p = unsafe { NonNull::new_unchecked(next) };
        }
        self.current.set(current);

        self.stats.record_allocation();
        self.stats.record_block_allocation();
        trace!(parent: &self.log, block = ?base.as_ptr(), size, "new block");

        // SAFETY: m is non-null (derived from base + header offset).
        Ok(unsafe { NonNull::new_unchecked(m) })
    }

    /// Large path: system buffer plus a bookkeeping node.
    fn alloc_large(&self, size: usize) -> PoolResult<NonNull<u8>> {
        let buf = sys_alloc(large_layout(size, ALIGNMENT)?, &self.log)?;

        let mut n = 0;
        let mut l = self.large.get();
        while !l.is_null() && n < LARGE_REUSE_SCAN {
            // SAFETY: nodes live in pool block memory; list is acyclic.
            let node = unsafe { &*l };
            if node.alloc.get().is_null() {
                node.alloc.set(buf.as_ptr());
                node.size.set(size);
                node.align.set(ALIGNMENT);
                self.stats.record_allocation();
                self.stats.record_large_allocation();
                return Ok(buf);
            }
            n += 1;
            l = node.next.get();
        }

        self.link_large(buf, size, ALIGNMENT)
    }

    /// Head-inserts a new large node for `buf`. On node-allocation
    /// failure the buffer is freed before the error is returned.
    fn link_large(&self, buf: NonNull<u8>, size: usize, align: usize) -> PoolResult<NonNull<u8>> {
        let node = match self.alloc_bytes(mem::size_of::<LargeNode>()) {
            Ok(p) => p.as_ptr() as *mut LargeNode,
            Err(err) => {
                // SAFETY: `buf` was allocated with exactly this layout
                // and has not been handed out.
                unsafe { sys_free(buf.as_ptr(), size, align) };
                return Err(err);
            }
        };
        // SAFETY: `node` points to fresh, ALIGNMENT-aligned pool memory
        // big enough for LargeNode.
        unsafe {
            node.write(LargeNode {
                alloc: Cell::new(buf.as_ptr()),
                size: Cell::new(size),
                align: Cell::new(align),
                next: Cell::new(self.large.get()),
            });
        }
        self.large.set(node);
        self.stats.record_allocation();
        self.stats.record_large_allocation();
        trace!(parent: &self.log, ptr = ?buf.as_ptr(), size, align, "alloc large");
        Ok(buf)
    }

    /// Advances the current block's bump pointer by `bytes` iff `tail`
    /// is exactly that bump pointer and the block has room. The array
    /// growth hot path: extending in place instead of relocating.
    pub(crate) fn try_extend(&self, tail: *mut u8, bytes: usize) -> bool {
        // SAFETY: `current` always points at a live block header.
        let block = unsafe { self.current.get().as_ref() };
        if block.last.get() == tail && (block.end as usize - tail as usize) >= bytes {
            // SAFETY: tail + bytes <= end, checked above.
            block.last.set(unsafe { tail.add(bytes) });
            true
        } else {
            false
        }
    }

    /// Rewinds the current block's bump pointer to `start` iff the
    /// region `[start, start + len)` is the most recent allocation.
    /// Opportunistic: a no-op when anything was allocated since.
    pub(crate) fn try_rewind(&self, start: *mut u8, len: usize) -> bool {
        // SAFETY: `current` always points at a live block header.
        let block = unsafe { self.current.get().as_ref() };
        if block.last.get() as usize == start as usize + len {
            block.last.set(start);
            true
        } else {
            false
        }
    }

    fn block_count(&self) -> usize {
        let mut count = 0;
        let mut b = self.head.as_ptr();
        while !b.is_null() {
            count += 1;
            // SAFETY: live header on the acyclic chain.
            b = unsafe { (*b).next.get() };
        }
        count
    }
}

impl Drop for Pool {
    /// Destruction order: cleanup handlers (LIFO registration order),
    /// then large buffers, then the block chain. No diagnostics are
    /// emitted once block memory starts being freed.
    fn drop(&mut self) {
        let mut c = self.cleanup.get();
        while !c.is_null() {
            // SAFETY: cleanup nodes live in block memory, still intact.
            let node = unsafe { &*c };
            if let Some(handler) = node.handler.get() {
                trace!(parent: &self.log, node = ?c, "run cleanup");
                // SAFETY: the handler was registered with this node's
                // data pointer; exactly-once is ensured because this is
                // the only walk and run_file_cleanup clears the slot.
                unsafe { handler(node.data) };
            }
            c = node.next;
        }

        let mut l = self.large.get();
        while !l.is_null() {
            // SAFETY: large nodes live in block memory, still intact.
            let node = unsafe { &*l };
            let buf = node.alloc.get();
            if !buf.is_null() {
                trace!(parent: &self.log, ptr = ?buf, "free large");
                // SAFETY: node records the buffer's layout; not yet freed.
                unsafe { sys_free(buf, node.size.get(), node.align.get()) };
            }
            l = node.next.get();
        }

        let layout = unsafe { Layout::from_size_align_unchecked(self.size, POOL_ALIGNMENT) };
        let mut b = self.head.as_ptr();
        while !b.is_null() {
            // SAFETY: `next` is read before the header's memory is freed.
            let next = unsafe { (*b).next.get() };
            // SAFETY: every block was allocated with exactly `layout`.
            unsafe { dealloc(b as *mut u8, layout) };
            b = next;
        }
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("block_size", &self.size)
            .field("blocks", &self.block_count())
            .field("max", &self.max)
            .finish_non_exhaustive()
    }
}

/// Writes a block header at `base` and returns it. `last` starts right
/// after the header; the caller adjusts it when satisfying a request
/// atomically with block creation.
///
/// # Safety
///
/// `base` must point to `size` writable bytes aligned to at least
/// `align_of::<BlockHeader>()`, with `size >= BLOCK_HEADER_SIZE`.
unsafe fn init_block(base: NonNull<u8>, size: usize) -> NonNull<BlockHeader> {
    let header = base.cast::<BlockHeader>();
    // SAFETY: caller guarantees room and alignment for the header.
    unsafe {
        header.as_ptr().write(BlockHeader {
            last: Cell::new(base.as_ptr().add(BLOCK_HEADER_SIZE)),
            end: base.as_ptr().add(size),
            next: Cell::new(ptr::null_mut()),
            failed: Cell::new(0),
        });
    }
    header
}

fn block_layout(size: usize) -> PoolResult<Layout> {
    Layout::from_size_align(size, POOL_ALIGNMENT).map_err(|_| PoolError::InvalidSize {
        size,
        reason: "size overflows the maximum allocation layout",
    })
}

fn large_layout(size: usize, align: usize) -> PoolResult<Layout> {
    Layout::from_size_align(size, align).map_err(|_| PoolError::InvalidSize {
        size,
        reason: "size overflows the maximum allocation layout",
    })
}

/// Global-allocator wrapper that reports failures through the span.
fn sys_alloc(layout: Layout, log: &Span) -> PoolResult<NonNull<u8>> {
    // SAFETY: callers never pass a zero-sized layout.
    let ptr = unsafe { alloc(layout) };
    match NonNull::new(ptr) {
        Some(p) => Ok(p),
        None => {
            error!(parent: log, size = layout.size(), align = layout.align(), "allocation failed");
            Err(PoolError::OutOfMemory {
                requested: layout.size(),
            })
        }
    }
}

/// # Safety
///
/// `ptr` must have been allocated with `Layout::from_size_align(size,
/// align)` and not freed since.
unsafe fn sys_free(ptr: *mut u8, size: usize, align: usize) {
    // SAFETY: caller passes the allocation's layout.
    unsafe { dealloc(ptr, Layout::from_size_align_unchecked(size, align)) };
}

#[cfg(test)]
impl Pool {
    /// True if `ptr` lies inside one of the pool's blocks.
    pub(crate) fn contains(&self, ptr: *const u8) -> bool {
        let mut b = self.head.as_ptr();
        while !b.is_null() {
            let block = unsafe { &*b };
            let start = b as usize;
            if (ptr as usize) >= start && (ptr as usize) < block.end as usize {
                return true;
            }
            b = block.next.get();
        }
        false
    }

    /// Current bump position of the current block.
    pub(crate) fn bump_position(&self) -> *mut u8 {
        unsafe { self.current.get().as_ref() }.last.get()
    }

    /// Number of nodes in the large list, freed slots included.
    pub(crate) fn large_nodes(&self) -> usize {
        let mut count = 0;
        let mut l = self.large.get();
        while !l.is_null() {
            count += 1;
            l = unsafe { &*l }.next.get();
        }
        count
    }

    /// Number of live (unfreed) large allocations.
    pub(crate) fn large_live(&self) -> usize {
        let mut count = 0;
        let mut l = self.large.get();
        while !l.is_null() {
            let node = unsafe { &*l };
            if !node.alloc.get().is_null() {
                count += 1;
            }
            l = node.next.get();
        }
        count
    }

    /// Position of `current` in the chain, head = 0.
    pub(crate) fn current_index(&self) -> usize {
        let target = self.current.get().as_ptr();
        let mut index = 0;
        let mut b = self.head.as_ptr();
        while !b.is_null() && b != target {
            index += 1;
            b = unsafe { &*b }.next.get();
        }
        index
    }

    pub(crate) fn blocks(&self) -> usize {
        self.block_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returned_pointers_are_word_aligned() {
        let pool = Pool::create(4096).unwrap();
        let p1 = pool.alloc_bytes(1).unwrap();
        let p2 = pool.alloc_bytes(1).unwrap();
        assert_eq!(p1.as_ptr() as usize % ALIGNMENT, 0);
        assert_eq!(p2.as_ptr() as usize % ALIGNMENT, 0);
        assert_eq!(p2.as_ptr() as usize - p1.as_ptr() as usize, ALIGNMENT);
    }

    #[test]
    fn unaligned_allocations_pack_densely() {
        let pool = Pool::create(4096).unwrap();
        let p1 = pool.alloc_bytes_unaligned(3).unwrap();
        let p2 = pool.alloc_bytes_unaligned(3).unwrap();
        assert_eq!(p2.as_ptr() as usize - p1.as_ptr() as usize, 3);
    }

    #[test]
    fn allocations_do_not_overlap() {
        let pool = Pool::create(1024).unwrap();
        let mut ranges: Vec<(usize, usize)> = Vec::new();
        for size in [1usize, 24, 7, 64, 3, 129] {
            let p = pool.alloc_bytes(size).unwrap().as_ptr() as usize;
            for &(start, len) in &ranges {
                assert!(p + size <= start || p >= start + len, "overlap");
            }
            ranges.push((p, size));
        }
    }

    #[test]
    fn max_boundary_selects_the_path() {
        let pool = Pool::create(4096).unwrap();
        assert_eq!(pool.max(), 4096 - BLOCK_HEADER_SIZE);

        // Exactly max: block path, no large entry.
        let p = pool.alloc_bytes(pool.max()).unwrap();
        assert!(pool.contains(p.as_ptr()));
        assert_eq!(pool.large_nodes(), 0);

        // One byte over: large path, outside every block.
        let p = pool.alloc_bytes(pool.max() + 1).unwrap();
        assert!(!pool.contains(p.as_ptr()));
        assert_eq!(pool.large_nodes(), 1);
        assert_eq!(pool.large_live(), 1);
    }

    #[test]
    fn one_byte_overflow_chains_a_new_block() {
        // Exactly the remaining room: stays in the block.
        let pool = Pool::create(4096).unwrap();
        pool.alloc_bytes(pool.max() - 8).unwrap();
        pool.alloc_bytes_unaligned(8).unwrap();
        assert_eq!(pool.blocks(), 1);

        // One byte more than the remaining room: chains a new block.
        let pool = Pool::create(4096).unwrap();
        pool.alloc_bytes(pool.max() - 8).unwrap();
        let p = pool.alloc_bytes_unaligned(9).unwrap();
        assert_eq!(pool.blocks(), 2);
        assert!(pool.contains(p.as_ptr()));
    }

    #[test]
    fn zeroed_allocation_is_zeroed() {
        let pool = Pool::create(1024).unwrap();
        let p = pool.alloc_bytes_zeroed(128).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(p.as_ptr(), 128) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn aligned_large_allocation_honors_alignment() {
        let pool = Pool::create(1024).unwrap();
        let p = pool.alloc_bytes_aligned(100, 256).unwrap();
        assert_eq!(p.as_ptr() as usize % 256, 0);
        assert!(!pool.contains(p.as_ptr()));
        assert_eq!(pool.large_nodes(), 1);
        assert!(pool.free(p).is_freed());
    }

    #[test]
    fn rejects_non_power_of_two_alignment() {
        let pool = Pool::create(1024).unwrap();
        assert_eq!(
            pool.alloc_bytes_aligned(8, 24),
            Err(PoolError::InvalidAlignment { align: 24 })
        );
    }

    #[test]
    fn rejects_undersized_pool() {
        assert!(matches!(
            Pool::create(MIN_POOL_SIZE - 1),
            Err(PoolError::InvalidSize { .. })
        ));
    }

    #[test]
    fn free_declines_block_pointers_and_unknown_pointers() {
        let pool = Pool::create(1024).unwrap();
        let p = pool.alloc_bytes(64).unwrap();
        assert_eq!(pool.free(p), FreeStatus::Declined);

        let large = pool.alloc_bytes(pool.max() + 1).unwrap();
        assert_eq!(pool.free(large), FreeStatus::Freed);
        // Second free of the same pointer: the slot is already empty.
        assert_eq!(pool.free(large), FreeStatus::Declined);
    }

    #[test]
    fn freed_large_slot_is_reused_by_bounded_scan() {
        let pool = Pool::create(4096).unwrap();
        let big = pool.max() + 1;
        let _x = pool.alloc_bytes(big).unwrap();
        let y = pool.alloc_bytes(big).unwrap();
        let _z = pool.alloc_bytes(big).unwrap();
        assert_eq!(pool.large_nodes(), 3);

        assert!(pool.free(y).is_freed());
        assert_eq!(pool.large_nodes(), 3);
        assert_eq!(pool.large_live(), 2);

        // The hole left by `y` is found by the scan; no node appended.
        let _w = pool.alloc_bytes(big).unwrap();
        assert_eq!(pool.large_nodes(), 3);
        assert_eq!(pool.large_live(), 3);
    }

    #[test]
    fn freeing_every_large_leaves_no_live_entry() {
        let pool = Pool::create(4096).unwrap();
        let big = pool.max() + 1;
        let bufs: Vec<_> = (0..3).map(|_| pool.alloc_bytes(big).unwrap()).collect();
        for buf in bufs {
            assert!(pool.free(buf).is_freed());
        }
        assert_eq!(pool.large_live(), 0);
        assert_eq!(pool.large_nodes(), 3);
    }

    #[test]
    fn scan_gives_up_past_the_bound() {
        let pool = Pool::create(4096).unwrap();
        let big = pool.max() + 1;
        let mut bufs = Vec::new();
        for _ in 0..6 {
            bufs.push(pool.alloc_bytes(big).unwrap());
        }
        assert_eq!(pool.large_nodes(), 6);

        // Head-insertion reversed the order: bufs[0] sits at depth 5,
        // beyond the reuse scan.
        assert!(pool.free(bufs[0]).is_freed());
        let _w = pool.alloc_bytes(big).unwrap();
        assert_eq!(pool.large_nodes(), 7);
    }

    #[test]
    fn failing_blocks_are_lazily_skipped() {
        // 256-byte blocks: each 200-byte request exhausts a fresh block,
        // so every allocation after the first chains a new one and
        // increments `failed` on the blocks it walked past.
        let pool = Pool::create(256).unwrap();
        assert_eq!(pool.current_index(), 0);

        for _ in 0..6 {
            pool.alloc_bytes(200).unwrap();
        }
        // Visits so far leave the head at failed == 4: still current.
        assert_eq!(pool.current_index(), 0);

        pool.alloc_bytes(200).unwrap();
        // Sixth walk pushes the head past the threshold.
        assert_eq!(pool.current_index(), 1);
    }

    #[test]
    fn reset_rewinds_blocks_and_frees_large() {
        let mut pool = Pool::create(1024).unwrap();
        let before = pool.bump_position();
        pool.alloc_bytes(100).unwrap();
        pool.alloc_bytes(pool.max() + 1).unwrap();
        assert_eq!(pool.large_live(), 1);

        pool.reset();
        assert_eq!(pool.large_nodes(), 0);
        assert_eq!(pool.bump_position(), before);

        // Idempotent.
        pool.reset();
        assert_eq!(pool.large_nodes(), 0);
        assert_eq!(pool.bump_position(), before);
    }

    #[test]
    fn reset_keeps_extra_blocks_usable() {
        let mut pool = Pool::create(256).unwrap();
        for _ in 0..4 {
            pool.alloc_bytes(200).unwrap();
        }
        let blocks = pool.blocks();
        assert!(blocks > 1);

        pool.reset();
        assert_eq!(pool.blocks(), blocks);
        let p = pool.alloc_bytes(200).unwrap();
        assert!(pool.contains(p.as_ptr()));
    }

    #[test]
    fn typed_alloc_round_trips() {
        let pool = Pool::create(1024).unwrap();
        let v = pool.alloc(0xdead_beef_u64).unwrap();
        assert_eq!(*v, 0xdead_beef);
        *v = 7;
        assert_eq!(*v, 7);

        let s = pool.alloc_str("configuration").unwrap();
        assert_eq!(s, "configuration");

        let xs = pool.alloc_slice(&[1u32, 2, 3]).unwrap();
        assert_eq!(xs, &[1, 2, 3]);
    }

    #[test]
    fn over_aligned_type_takes_the_large_path() {
        #[repr(align(64))]
        #[derive(Debug, PartialEq)]
        struct Wide([u8; 64]);

        let pool = Pool::create(1024).unwrap();
        let w = pool.alloc(Wide([9; 64])).unwrap();
        assert_eq!(w.0[0], 9);
        assert_eq!((w as *const Wide as usize) % 64, 0);
        assert_eq!(pool.large_nodes(), 1);
    }

    #[test]
    fn stats_track_the_paths() {
        let mut pool = Pool::create(4096).unwrap();
        pool.alloc_bytes(32).unwrap();
        pool.alloc_bytes(pool.max() + 1).unwrap();
        let s = pool.stats();
        // The large node itself is a block-path allocation.
        assert_eq!(s.allocations, 3);
        assert_eq!(s.large_allocations, 1);
        assert_eq!(s.blocks, 1);

        pool.reset();
        assert_eq!(pool.stats().resets, 1);
    }
}
