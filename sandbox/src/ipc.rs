//! IPC scope: private System V and POSIX message queue namespace.

use nix::sched::{unshare, CloneFlags};

use crate::{errno_io, IsolationError};

/// Enter a private IPC-object scope.
///
/// Entered before any application code runs in the contained path. The
/// bootstrap may defer it on paths that need shared memory for an isolating
/// display server, but the contained core never does.
pub fn isolate() -> Result<(), IsolationError> {
    unshare(CloneFlags::CLONE_NEWIPC).map_err(|e| IsolationError::IpcScope(errno_io(e)))?;
    log::info!("ipc scope isolated");
    Ok(())
}
