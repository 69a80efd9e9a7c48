//! Allocation counters for a pool.

use std::cell::Cell;

/// Counters kept by a pool. Single-owner, so plain `Cell`s suffice.
#[derive(Debug, Default)]
pub(crate) struct PoolStats {
    allocations: Cell<u64>,
    block_allocations: Cell<u64>,
    large_allocations: Cell<u64>,
    large_freed: Cell<u64>,
    cleanups_registered: Cell<u64>,
    resets: Cell<u64>,
}

impl PoolStats {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn record_allocation(&self) {
        self.allocations.set(self.allocations.get() + 1);
    }

    #[inline]
    pub(crate) fn record_block_allocation(&self) {
        self.block_allocations.set(self.block_allocations.get() + 1);
    }

    #[inline]
    pub(crate) fn record_large_allocation(&self) {
        self.large_allocations.set(self.large_allocations.get() + 1);
    }

    #[inline]
    pub(crate) fn record_large_freed(&self) {
        self.large_freed.set(self.large_freed.get() + 1);
    }

    #[inline]
    pub(crate) fn record_cleanup_registered(&self) {
        self.cleanups_registered.set(self.cleanups_registered.get() + 1);
    }

    #[inline]
    pub(crate) fn record_reset(&self) {
        self.resets.set(self.resets.get() + 1);
    }

    pub(crate) fn snapshot(&self, blocks: usize) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            blocks,
            allocations: self.allocations.get(),
            block_allocations: self.block_allocations.get(),
            large_allocations: self.large_allocations.get(),
            large_freed: self.large_freed.get(),
            cleanups_registered: self.cleanups_registered.get(),
            resets: self.resets.get(),
        }
    }
}

/// Point-in-time view of a pool's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatsSnapshot {
    /// Blocks currently in the chain.
    pub blocks: usize,
    /// Allocations served (block and large paths combined).
    pub allocations: u64,
    /// Blocks chained in beyond the first.
    pub block_allocations: u64,
    /// Allocations served by the large path.
    pub large_allocations: u64,
    /// Large buffers returned early via `free`.
    pub large_freed: u64,
    /// Cleanup handlers registered.
    pub cleanups_registered: u64,
    /// Times the pool has been reset.
    pub resets: u64,
}
