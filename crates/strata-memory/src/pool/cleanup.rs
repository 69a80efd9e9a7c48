//! Cleanup-handler chain: the pool's substitute for per-allocation
//! destructors.
//!
//! A registration pairs an erased callback with an optional pool-owned
//! data buffer. Handlers run exactly once, in LIFO registration order,
//! when the pool is dropped; [`Pool::run_file_cleanup`] can fire a file
//! handler early, clearing its slot so destruction does not re-invoke it.
//!
//! Handlers must not touch the pool that owns them: by the time they run
//! its memory is about to be freed. Other pools are fair game.

use std::cell::Cell;
use std::marker::PhantomData;
use std::mem;
use std::ptr::NonNull;

use tracing::trace;

use crate::error::PoolResult;

use super::Pool;

/// Erased cleanup callback. Receives the registration's data pointer
/// (null when the registration carried no data buffer).
///
/// # Safety
///
/// Invoked with the data pointer the registration was populated with;
/// implementations must tolerate exactly the payload type their
/// registration wrote there.
pub type CleanupHandler = unsafe fn(data: *mut u8);

/// One registration in the cleanup chain. Lives in pool block memory.
#[repr(C)]
pub(crate) struct CleanupNode {
    pub(super) handler: Cell<Option<CleanupHandler>>,
    pub(super) data: *mut u8,
    pub(super) next: *mut CleanupNode,
}

/// Handle to a fresh cleanup registration.
///
/// Returned by [`Pool::add_cleanup`] so the caller can populate the data
/// buffer and install the callback. A registration with no callback
/// installed is skipped at destruction.
pub struct Cleanup<'pool> {
    node: NonNull<CleanupNode>,
    _pool: PhantomData<&'pool Pool>,
}

impl<'pool> Cleanup<'pool> {
    fn new(node: NonNull<CleanupNode>) -> Self {
        Self {
            node,
            _pool: PhantomData,
        }
    }

    /// Installs the callback run at pool destruction.
    pub fn set_handler(&self, handler: CleanupHandler) {
        // SAFETY: the node lives in pool block memory for the pool's
        // lifetime, which `'pool` bounds.
        unsafe { self.node.as_ref() }.handler.set(Some(handler));
    }

    /// The registration's data buffer; null when registered with size 0.
    pub fn data(&self) -> *mut u8 {
        // SAFETY: as in set_handler.
        unsafe { self.node.as_ref() }.data
    }
}

impl Pool {
    /// Registers a cleanup handler slot with a `data_size`-byte payload
    /// buffer (none when `data_size` is 0).
    ///
    /// The returned handle is used to populate the payload and install
    /// the callback. Handlers run in LIFO registration order when the
    /// pool is dropped.
    pub fn add_cleanup(&self, data_size: usize) -> PoolResult<Cleanup<'_>> {
        let node = self
            .alloc_bytes(mem::size_of::<CleanupNode>())?
            .cast::<CleanupNode>();
        let data = if data_size > 0 {
            self.alloc_bytes(data_size)?.as_ptr()
        } else {
            std::ptr::null_mut()
        };
        // SAFETY: fresh, suitably aligned pool memory for a CleanupNode.
        unsafe {
            node.as_ptr().write(CleanupNode {
                handler: Cell::new(None),
                data,
                next: self.cleanup.get(),
            });
        }
        self.cleanup.set(node.as_ptr());
        self.stats.record_cleanup_registered();
        trace!(parent: &self.log, node = ?node.as_ptr(), data_size, "add cleanup");
        Ok(Cleanup::new(node))
    }
}

#[cfg(unix)]
pub use self::file::{cleanup_delete_file, cleanup_file, FileCleanup};

#[cfg(unix)]
mod file {
    use std::fs;
    use std::io;
    use std::mem;
    use std::os::fd::RawFd;
    use std::ptr;
    use std::slice;
    use std::str;

    use tracing::{error, trace};

    use crate::error::PoolResult;
    use crate::pool::Pool;

    use super::CleanupHandler;

    /// Payload for the file-cleanup callbacks: a descriptor plus an
    /// optional file name whose bytes live in the owning pool.
    #[repr(C)]
    pub struct FileCleanup {
        /// Descriptor closed by the callback.
        pub fd: RawFd,
        name: *const u8,
        name_len: usize,
    }

    impl FileCleanup {
        /// Payload that closes `fd` and nothing else.
        pub fn new(fd: RawFd) -> Self {
            Self {
                fd,
                name: ptr::null(),
                name_len: 0,
            }
        }

        fn name(&self) -> Option<&str> {
            if self.name.is_null() {
                return None;
            }
            // SAFETY: `name` was copied into pool memory from a valid
            // &str of exactly `name_len` bytes and outlives the payload.
            unsafe {
                let bytes = slice::from_raw_parts(self.name, self.name_len);
                Some(str::from_utf8_unchecked(bytes))
            }
        }
    }

    /// Closes the payload's descriptor.
    ///
    /// # Safety
    ///
    /// `data` must point to a live [`FileCleanup`].
    pub unsafe fn cleanup_file(data: *mut u8) {
        // SAFETY: caller contract.
        let c = unsafe { &*(data as *const FileCleanup) };
        trace!(fd = c.fd, "file cleanup");

        // SAFETY: close(2) has no memory preconditions.
        if unsafe { libc::close(c.fd) } == -1 {
            error!(fd = c.fd, err = %io::Error::last_os_error(), "close failed");
        }
    }

    /// Deletes the payload's file, then closes its descriptor. A file
    /// that is already gone is not an error.
    ///
    /// # Safety
    ///
    /// `data` must point to a live [`FileCleanup`].
    pub unsafe fn cleanup_delete_file(data: *mut u8) {
        // SAFETY: caller contract.
        let c = unsafe { &*(data as *const FileCleanup) };
        trace!(fd = c.fd, name = c.name(), "file cleanup");

        if let Some(name) = c.name() {
            if let Err(err) = fs::remove_file(name) {
                if err.kind() != io::ErrorKind::NotFound {
                    error!(fd = c.fd, name, %err, "delete failed");
                }
            }
        }

        // SAFETY: close(2) has no memory preconditions.
        if unsafe { libc::close(c.fd) } == -1 {
            error!(fd = c.fd, err = %io::Error::last_os_error(), "close failed");
        }
    }

    impl Pool {
        /// Registers a cleanup that closes `fd` at pool destruction.
        pub fn add_file_cleanup(&self, fd: RawFd) -> PoolResult<()> {
            let c = self.add_cleanup(mem::size_of::<FileCleanup>())?;
            // SAFETY: the data buffer is a fresh FileCleanup-sized,
            // word-aligned pool allocation.
            unsafe { (c.data() as *mut FileCleanup).write(FileCleanup::new(fd)) };
            c.set_handler(cleanup_file);
            Ok(())
        }

        /// Registers a cleanup that deletes `path` and closes `fd` at
        /// pool destruction. The path bytes are copied into the pool.
        pub fn add_delete_file_cleanup(&self, fd: RawFd, path: &str) -> PoolResult<()> {
            let c = self.add_cleanup(mem::size_of::<FileCleanup>())?;
            let name = self.alloc_str(path)?;
            // SAFETY: as in add_file_cleanup.
            unsafe {
                (c.data() as *mut FileCleanup).write(FileCleanup {
                    fd,
                    name: name.as_ptr(),
                    name_len: name.len(),
                });
            }
            c.set_handler(cleanup_delete_file);
            Ok(())
        }

        /// Closes a descriptor whose lifetime ended early.
        ///
        /// Walks the cleanup chain for a [`cleanup_file`] registration
        /// matching `fd`, invokes it now, and clears its slot so
        /// destruction will not run it again.
        pub fn run_file_cleanup(&self, fd: RawFd) {
            let mut c = self.cleanup.get();
            while !c.is_null() {
                // SAFETY: cleanup nodes live in pool block memory.
                let node = unsafe { &*c };
                if let Some(handler) = node.handler.get() {
                    if ptr::fn_addr_eq(handler, cleanup_file as CleanupHandler) {
                        // SAFETY: cleanup_file registrations always
                        // carry a FileCleanup payload.
                        let payload = unsafe { &*(node.data as *const FileCleanup) };
                        if payload.fd == fd {
                            trace!(parent: &self.log, fd, "run cleanup file");
                            // SAFETY: invoking the registered handler
                            // with its own payload.
                            unsafe { handler(node.data) };
                            node.handler.set(None);
                            return;
                        }
                    }
                }
                c = node.next;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use crate::pool::Pool;

    /// Payload for the ordering tests: a tag plus a pointer to the
    /// shared record of invocation order.
    struct Recorded {
        tag: char,
        order: *const RefCell<Vec<char>>,
    }

    unsafe fn record(data: *mut u8) {
        let r = unsafe { &*(data as *const Recorded) };
        unsafe { &*r.order }.borrow_mut().push(r.tag);
    }

    fn register(pool: &Pool, tag: char, order: &RefCell<Vec<char>>) {
        let c = pool.add_cleanup(std::mem::size_of::<Recorded>()).unwrap();
        let order = order as *const RefCell<Vec<char>>;
        unsafe { (c.data() as *mut Recorded).write(Recorded { tag, order }) };
        c.set_handler(record);
    }

    #[test]
    fn handlers_run_lifo_exactly_once() {
        let order = RefCell::new(Vec::new());
        let pool = Pool::create(1024).unwrap();
        register(&pool, 'a', &order);
        register(&pool, 'b', &order);
        register(&pool, 'c', &order);
        drop(pool);
        assert_eq!(*order.borrow(), vec!['c', 'b', 'a']);
    }

    #[test]
    fn handlerless_registration_is_skipped() {
        let order = RefCell::new(Vec::new());
        let pool = Pool::create(1024).unwrap();
        register(&pool, 'a', &order);
        let _slot = pool.add_cleanup(8).unwrap();
        drop(pool);
        assert_eq!(*order.borrow(), vec!['a']);
    }

    #[test]
    fn zero_sized_registration_has_null_data() {
        let pool = Pool::create(1024).unwrap();
        let c = pool.add_cleanup(0).unwrap();
        assert!(c.data().is_null());
    }

    #[test]
    fn reset_discards_pending_registrations() {
        let order = RefCell::new(Vec::new());
        let mut pool = Pool::create(1024).unwrap();
        register(&pool, 'a', &order);
        pool.reset();
        drop(pool);
        assert!(order.borrow().is_empty());
    }

    #[cfg(unix)]
    mod file {
        use std::fs;
        use std::io::Write;
        use std::os::fd::IntoRawFd;

        use crate::pool::Pool;

        #[test]
        fn delete_file_cleanup_removes_the_file() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("spill");
            let mut f = fs::File::create(&path).unwrap();
            f.write_all(b"scratch").unwrap();
            let fd = f.into_raw_fd();

            let pool = Pool::create(1024).unwrap();
            pool.add_delete_file_cleanup(fd, path.to_str().unwrap())
                .unwrap();
            assert!(path.exists());
            drop(pool);
            assert!(!path.exists());
        }

        #[test]
        fn run_file_cleanup_fires_early_and_only_once() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("conn");
            let fd = fs::File::create(&path).unwrap().into_raw_fd();

            let pool = Pool::create(1024).unwrap();
            pool.add_file_cleanup(fd).unwrap();

            pool.run_file_cleanup(fd);
            // The descriptor is closed now, not at destruction.
            assert_eq!(unsafe { libc::fcntl(fd, libc::F_GETFD) }, -1);
            // The handler slot was cleared, so dropping the pool must
            // not close again: a double close of a recycled descriptor
            // is the failure this guards against.
            drop(pool);
        }

        #[test]
        fn run_file_cleanup_ignores_other_descriptors() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("keep");
            let fd = fs::File::create(&path).unwrap().into_raw_fd();

            let pool = Pool::create(1024).unwrap();
            pool.add_file_cleanup(fd).unwrap();
            pool.run_file_cleanup(fd + 1000);
            drop(pool);
        }
    }
}
