//! # strata-memory
//!
//! Region-based memory management for request-scoped workloads.
//!
//! The crate is built around a single abstraction, the [`Pool`]: a chain
//! of fixed-size blocks served by a bump allocator, with a fallback path
//! for large objects and a cleanup-handler chain for external resources.
//! The only reclamation primitive is bulk destruction: individual
//! allocations are never freed (large objects excepted), which keeps the
//! hot path to a pointer bump.
//!
//! On top of the pool sit two containers:
//!
//! - [`Array`]: a contiguous dynamic array that grows by doubling and
//!   cooperates with the pool to extend in place when its storage abuts
//!   the bump pointer.
//! - [`List`]: a segmented append-only list whose elements never move,
//!   so element addresses stay valid for the pool's lifetime.
//!
//! ## Quick start
//!
//! ```rust
//! use strata_memory::prelude::*;
//!
//! let pool = Pool::create(4096)?;
//! let greeting = pool.alloc_str("hello")?;
//! assert_eq!(greeting, "hello");
//!
//! let numbers: Array<'_, u32> = Array::init(&pool, 4)?;
//! numbers.push_value(1)?;
//! numbers.push_value(2)?;
//! assert_eq!(numbers.as_slice(), &[1, 2]);
//! # Ok::<(), strata_memory::PoolError>(())
//! ```
//!
//! ## Ownership model
//!
//! A pool and everything allocated from it form a single-owner resource
//! graph. Allocations are borrows bounded by the pool's lifetime;
//! containers hold the pool by shared reference and never outlive it.
//! There is no internal synchronization; a pool belongs to one logical
//! task at a time.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod array;
pub mod error;
pub mod list;
pub mod platform;
pub mod pool;
pub mod utils;

pub use crate::array::Array;
pub use crate::error::{FreeStatus, PoolError, PoolResult};
pub use crate::list::List;
pub use crate::pool::{Cleanup, CleanupHandler, Pool, PoolStatsSnapshot};

/// Convenient re-exports of the commonly used types.
pub mod prelude {
    pub use crate::array::Array;
    pub use crate::error::{FreeStatus, PoolError, PoolResult};
    pub use crate::list::List;
    pub use crate::pool::{Pool, ALIGNMENT, DEFAULT_POOL_SIZE, POOL_ALIGNMENT};
}
