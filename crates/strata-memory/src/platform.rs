//! Platform memory parameters discovered at startup.
//!
//! Page size and cache line size are probed once and cached for the
//! lifetime of the process; callers treat them as read-only globals.

use std::sync::LazyLock;

/// Returns the platform page size in bytes.
pub fn page_size() -> usize {
    static PAGE_SIZE: LazyLock<usize> = LazyLock::new(detect_page_size);
    *PAGE_SIZE
}

/// Returns `log2(page_size())`.
pub fn page_shift() -> usize {
    page_size().trailing_zeros() as usize
}

/// Returns the L1 data cache line size in bytes.
pub fn cache_line_size() -> usize {
    static CACHE_LINE: LazyLock<usize> = LazyLock::new(detect_cache_line_size);
    *CACHE_LINE
}

#[cfg(unix)]
fn detect_page_size() -> usize {
    // SAFETY: sysconf is thread-safe and has no preconditions.
    let n = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if n > 0 {
        n as usize
    } else {
        4096
    }
}

#[cfg(not(unix))]
fn detect_page_size() -> usize {
    4096
}

#[cfg(target_os = "linux")]
fn detect_cache_line_size() -> usize {
    // SAFETY: sysconf is thread-safe and has no preconditions.
    let n = unsafe { libc::sysconf(libc::_SC_LEVEL1_DCACHE_LINESIZE) };
    if n > 0 {
        n as usize
    } else {
        64
    }
}

#[cfg(not(target_os = "linux"))]
fn detect_cache_line_size() -> usize {
    64
}
