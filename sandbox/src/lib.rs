//! warren Process Isolation
//!
//! This crate turns an ordinary process into a contained one, one kernel
//! scope at a time.
//!
//! Process Model:
//! - Bootstrap process: holds elevated capabilities, runs first
//! - Contained process: all five namespace scopes private, filtered
//! - Redirector process: host network scope, its own filter
//! - Relay children: one per proxied connection, owned by the redirector
//!
//! Each primitive transitions exactly one scope from host-shared to private,
//! and the transition is one-way for the process that makes it. Ordering is
//! enforced by the bootstrap, not here; the one exception is the kernel-call
//! filter, which refuses to install twice.

#![cfg(target_os = "linux")]

use std::io;

pub mod caps;
pub mod filter;
pub mod fs;
pub mod ipc;
pub mod name;
pub mod net;
pub mod process;

pub use filter::{ConnectBinding, FilterPolicy, Role};
pub use net::isolate_network;
pub use process::{spawn_contained, spawn_process, OwnedStack, ReadinessPipe};

/// Errors raised while composing the sandbox. Every variant is fatal to
/// bootstrap; none is recoverable by the process that hits it.
#[derive(Debug, thiserror::Error)]
pub enum IsolationError {
    /// A step of the filesystem pivot failed.
    #[error("filesystem pivot failed at {step}: {source}")]
    Filesystem {
        step: &'static str,
        source: io::Error,
    },

    /// Entering the private UTS scope or renaming the host failed.
    #[error("name scope isolation failed: {0}")]
    NameScope(io::Error),

    /// Entering the private IPC scope failed.
    #[error("ipc scope isolation failed: {0}")]
    IpcScope(io::Error),

    /// Entering the private network scope failed.
    #[error("network scope isolation failed: {0}")]
    NetScope(io::Error),

    /// Cloning a new process failed.
    #[error("process spawn failed: {0}")]
    Spawn(io::Error),

    /// The readiness pipe could not be created or waited on.
    #[error("readiness pipe failed: {0}")]
    Readiness(io::Error),

    /// Clearing a bootstrap capability failed.
    #[error("capability drop failed: {0}")]
    CapabilityDrop(io::Error),

    /// Building or loading the kernel-call filter failed.
    #[error("kernel-call filter rejected: {0}")]
    Filter(String),

    /// Allocating a guarded stack or buffer failed.
    #[error(transparent)]
    Memory(#[from] warren_secmem::SecmemError),
}

pub(crate) fn errno_io(err: nix::Error) -> io::Error {
    io::Error::from_raw_os_error(err as i32)
}
