//! Error types for pool operations.

use thiserror::Error;

/// Result type for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors returned by allocating operations.
///
/// A failed allocation leaves the pool (and any container built on it)
/// in its prior state; the pool remains usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The system allocator or pool expansion failed.
    #[error("out of memory: requested {requested} bytes")]
    OutOfMemory {
        /// Number of bytes the failed request asked for.
        requested: usize,
    },

    /// A size argument cannot be honored.
    #[error("invalid size {size}: {reason}")]
    InvalidSize {
        /// The offending size.
        size: usize,
        /// Why the size was rejected.
        reason: &'static str,
    },

    /// An alignment argument is not a power of two, or exceeds what the
    /// requested path can guarantee.
    #[error("invalid alignment {align}")]
    InvalidAlignment {
        /// The offending alignment.
        align: usize,
    },
}

/// Outcome of [`Pool::free`](crate::pool::Pool::free).
///
/// `Declined` is informational, not an error: block-path allocations are
/// not individually freeable and the request is simply ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeStatus {
    /// The pointer matched an outstanding large allocation, which has
    /// been returned to the system allocator.
    Freed,
    /// The pointer was not found in the large-allocation list.
    Declined,
}

impl FreeStatus {
    /// Returns `true` if the buffer was actually freed.
    #[inline]
    pub fn is_freed(self) -> bool {
        matches!(self, FreeStatus::Freed)
    }
}
