//! warren Hardened Memory Primitives
//!
//! Every secret the harness holds (the control token, the frozen proxy
//! endpoint, relay scratch space, clone stacks) lives in memory allocated
//! here rather than on the ordinary heap.
//!
//! # Design Principles
//!
//! - Secrets live in page-aligned mappings that can be frozen read-only
//! - Working buffers sit between inaccessible guard pages
//! - Freed secret memory is scrubbed in a way the optimizer cannot elide
//! - Secret comparison never branches on secret bytes

#![cfg(target_os = "linux")]

use std::io;

mod compare;
mod entropy;
mod guarded;
mod pane;

pub use compare::ct_equal;
pub use entropy::EntropySource;
pub use guarded::{scrub, GuardedBuf};
pub use pane::Pane;

/// Errors from the hardened memory layer.
#[derive(Debug, thiserror::Error)]
pub enum SecmemError {
    /// A zero-byte allocation or fill was requested.
    #[error("zero-length request is invalid")]
    ZeroLength,

    /// The kernel refused to hand out pages.
    #[error("allocation failed: {0}")]
    OutOfMemory(io::Error),

    /// Changing page protection failed.
    #[error("page protection change failed: {0}")]
    Protect(io::Error),

    /// Locking pages into RAM or disabling core dumps failed.
    #[error("process hardening failed: {0}")]
    Harden(io::Error),

    /// The kernel entropy source could not be opened or read.
    #[error("entropy source failure: {0}")]
    Entropy(io::Error),
}

/// Byte size of one memory page.
pub(crate) fn page_size() -> usize {
    // _SC_PAGESIZE cannot legitimately fail or be non-positive on Linux.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

/// Closes the two routes by which secret bytes could reach the disk:
/// core dumps are capped at zero size and every current and future page
/// is locked out of swap.
///
/// Must run before any secret is generated; it is the first bootstrap step.
pub fn harden_process() -> Result<(), SecmemError> {
    let limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    if unsafe { libc::setrlimit(libc::RLIMIT_CORE, &limit) } != 0 {
        return Err(SecmemError::Harden(io::Error::last_os_error()));
    }

    if unsafe { libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) } != 0 {
        return Err(SecmemError::Harden(io::Error::last_os_error()));
    }

    log::debug!("core dumps disabled, memory locked out of swap");
    Ok(())
}
