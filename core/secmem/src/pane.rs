//! Freezable page-aligned allocations.

use std::io;
use std::ptr;
use std::slice;

use crate::{page_size, SecmemError};

/// A whole number of anonymous private pages, writable until frozen.
///
/// Freezing drops the mapping to read-only, so any later store into the
/// region faults the writing process. The frozen proxy endpoint and the
/// control token are both held in panes, and the kernel-call filter binds
/// the `connect` address argument to a pane's base address, so the address
/// must stay stable for the life of the process: a `Pane` never reallocates.
pub struct Pane {
    base: *mut u8,
    len: usize,
    frozen: bool,
}

// The pane exclusively owns its mapping, and a shared reference exposes
// only reads; the raw pointer is just a stable address.
unsafe impl Send for Pane {}
unsafe impl Sync for Pane {}

impl Pane {
    /// Allocate at least `len` bytes, rounded up to whole pages.
    ///
    /// The memory is zero-filled, readable and writable, and backed by no
    /// file.
    pub fn alloc(len: usize) -> Result<Self, SecmemError> {
        if len == 0 {
            return Err(SecmemError::ZeroLength);
        }

        let page = page_size();
        let rounded = len.div_ceil(page) * page;

        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                rounded,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(SecmemError::OutOfMemory(io::Error::last_os_error()));
        }

        Ok(Self {
            base: base.cast(),
            len: rounded,
            frozen: false,
        })
    }

    /// Make the whole region read-only. Any subsequent write faults.
    ///
    /// Freezing an already-frozen pane is a no-op.
    pub fn freeze(&mut self) -> Result<(), SecmemError> {
        if self.frozen {
            return Ok(());
        }
        if unsafe { libc::mprotect(self.base.cast(), self.len, libc::PROT_READ) } != 0 {
            return Err(SecmemError::Protect(io::Error::last_os_error()));
        }
        self.frozen = true;
        Ok(())
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Base address of the mapping, stable for the pane's lifetime.
    pub fn base_addr(&self) -> usize {
        self.base as usize
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.base
    }

    /// Rounded length of the mapping in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.base, self.len) }
    }

    /// Mutable view of the region. Writing through this after [`freeze`]
    /// faults the process; that fault is the protection working.
    ///
    /// [`freeze`]: Pane::freeze
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.base, self.len) }
    }
}

impl Drop for Pane {
    fn drop(&mut self) {
        // munmap works regardless of protection; nothing sensible to do on
        // failure during teardown.
        unsafe {
            libc::munmap(self.base.cast(), self.len);
        }
    }
}
