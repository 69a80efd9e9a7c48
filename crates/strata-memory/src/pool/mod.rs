//! Region-based memory pool.
//!
//! A [`Pool`] owns a chain of fixed-size blocks served by a bump
//! allocator, a list of large allocations backed by the system allocator,
//! and a chain of cleanup handlers. All memory is reclaimed in one step
//! when the pool is dropped.
//!
//! # Allocation strategy
//!
//! - Requests up to [`Pool::max`] are bump-allocated from a block: round
//!   the block's bump pointer up to [`ALIGNMENT`], check the remaining
//!   room, advance. When no block fits, a fresh block of the same size is
//!   chained in and blocks that keep failing are lazily skipped.
//! - Larger requests go to the system allocator and are tracked in a
//!   side list so they can be bulk-freed at reset or destruction, or
//!   selectively freed with [`Pool::free`].
//! - [`Pool::alloc_bytes_aligned`] always takes the large path with a
//!   caller-chosen alignment.
//!
//! # Invariants
//!
//! - Every block satisfies `start <= last <= end`; the chain is acyclic.
//! - Pointers returned by the block path lie inside a block; pointers
//!   returned by the large path are recorded in the large list.
//! - Cleanup handlers run exactly once, in LIFO registration order,
//!   when the pool is dropped.
//!
//! # Not thread-safe
//!
//! A pool is owned by a single logical task; it is neither `Send` nor
//! `Sync`. External synchronization is the caller's obligation.

use std::mem;
use std::sync::LazyLock;

use crate::platform;

mod cleanup;
mod stats;
#[allow(clippy::module_inception)]
mod pool;

pub use self::cleanup::{Cleanup, CleanupHandler};
#[cfg(unix)]
pub use self::cleanup::{cleanup_delete_file, cleanup_file, FileCleanup};
pub use self::pool::Pool;
pub use self::stats::PoolStatsSnapshot;

pub(crate) use self::cleanup::CleanupNode;
pub(crate) use self::stats::PoolStats;

/// Block base-address alignment. Power of two, at least the platform
/// allocation alignment.
pub const POOL_ALIGNMENT: usize = 16;

/// Per-allocation alignment used by the aligned bump path.
pub const ALIGNMENT: usize = 16;

/// Convenience default block size for request-scoped pools.
pub const DEFAULT_POOL_SIZE: usize = 16 * 1024;

/// Smallest creatable pool: room for the block header plus enough bump
/// space that internal bookkeeping nodes always take the block path.
pub const MIN_POOL_SIZE: usize = pool::BLOCK_HEADER_SIZE + 64;

/// Upper bound on the size served from a block: one page minus one word.
/// Requests above `min(block size - header, this)` take the large path.
pub fn max_alloc_from_pool() -> usize {
    static MAX: LazyLock<usize> =
        LazyLock::new(|| platform::page_size() - mem::size_of::<usize>());
    *MAX
}
