//! Guard-page allocations with scrubbed release.

use std::io;
use std::ptr;
use std::slice;
use std::sync::atomic::{compiler_fence, Ordering};

use crate::{page_size, SecmemError};

/// Overwrite `buf` with zeros in a way dead-store elimination cannot remove.
///
/// The volatile stores plus the compiler fence keep the fill observable even
/// when the buffer is unmapped immediately afterwards.
pub fn scrub(buf: &mut [u8]) {
    for byte in buf.iter_mut() {
        unsafe { ptr::write_volatile(byte, 0) };
    }
    compiler_fence(Ordering::SeqCst);
}

/// A scrubbed working buffer between two inaccessible guard pages.
///
/// Layout: `[guard][data pages][guard]`. Any access to a guard page faults,
/// which turns a linear overflow out of the data pages into an immediate
/// crash. On drop the data pages are scrubbed and the whole three-part
/// mapping is released.
pub struct GuardedBuf {
    region: *mut u8,
    region_len: usize,
    data: *mut u8,
    data_len: usize,
    requested: usize,
}

impl GuardedBuf {
    /// Allocate `len` zeroed bytes inside guard pages.
    ///
    /// The smallest allocation is three pages: one of data, two of guards.
    pub fn alloc(len: usize) -> Result<Self, SecmemError> {
        if len == 0 {
            return Err(SecmemError::ZeroLength);
        }

        let page = page_size();
        let data_pages = len.div_ceil(page);
        let total_pages = data_pages + 2;
        let region_len = total_pages * page;

        let region = unsafe {
            libc::mmap(
                ptr::null_mut(),
                region_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if region == libc::MAP_FAILED {
            return Err(SecmemError::OutOfMemory(io::Error::last_os_error()));
        }
        let region: *mut u8 = region.cast();

        let leading_guard = region;
        let trailing_guard = unsafe { region.add((total_pages - 1) * page) };
        let guards_ok = unsafe {
            libc::mprotect(leading_guard.cast(), page, libc::PROT_NONE) == 0
                && libc::mprotect(trailing_guard.cast(), page, libc::PROT_NONE) == 0
        };
        if !guards_ok {
            let err = io::Error::last_os_error();
            unsafe { libc::munmap(region.cast(), region_len) };
            return Err(SecmemError::Protect(err));
        }

        // Anonymous mappings arrive zero-filled; no explicit clear needed.
        Ok(Self {
            region,
            region_len,
            data: unsafe { region.add(page) },
            data_len: data_pages * page,
            requested: len,
        })
    }

    /// The number of bytes originally requested.
    pub fn len(&self) -> usize {
        self.requested
    }

    pub fn is_empty(&self) -> bool {
        self.requested == 0
    }

    /// Full usable size, rounded up to whole pages.
    pub fn capacity(&self) -> usize {
        self.data_len
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.data, self.requested) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.data, self.requested) }
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.data
    }

    /// One past the highest usable address. Clone stacks grow downward from
    /// here on every supported architecture.
    pub fn top(&self) -> *mut u8 {
        unsafe { self.data.add(self.data_len) }
    }
}

impl Drop for GuardedBuf {
    fn drop(&mut self) {
        let data = unsafe { slice::from_raw_parts_mut(self.data, self.data_len) };
        scrub(data);
        unsafe {
            libc::munmap(self.region.cast(), self.region_len);
        }
    }
}
