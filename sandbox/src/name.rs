//! Name scope: private UTS namespace with spoofed host and domain names.

use std::io;

use nix::sched::{unshare, CloneFlags};
use nix::unistd::sethostname;

use crate::{errno_io, IsolationError};

/// The fixed, non-identifying name every contained process reports.
pub const SCOPE_NAME: &str = "isolated";

/// Enter a private UTS scope and overwrite both names.
pub fn isolate() -> Result<(), IsolationError> {
    unshare(CloneFlags::CLONE_NEWUTS)
        .map_err(|e| IsolationError::NameScope(errno_io(e)))?;

    sethostname(SCOPE_NAME).map_err(|e| IsolationError::NameScope(errno_io(e)))?;

    // nix carries no setdomainname wrapper.
    let ret = unsafe { libc::setdomainname(SCOPE_NAME.as_ptr().cast(), SCOPE_NAME.len()) };
    if ret != 0 {
        return Err(IsolationError::NameScope(io::Error::last_os_error()));
    }

    log::info!("name scope isolated as {SCOPE_NAME:?}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_name_is_short_and_ascii() {
        // sethostname and setdomainname both take the raw bytes; the literal
        // must stay within the 64-byte kernel limit.
        assert!(SCOPE_NAME.len() < 64);
        assert!(SCOPE_NAME.is_ascii());
    }

    #[test]
    #[ignore = "requires CAP_SYS_ADMIN"]
    fn isolate_changes_reported_hostname() {
        isolate().unwrap();
        let hostname = nix::unistd::gethostname().unwrap();
        assert_eq!(hostname.to_str().unwrap(), SCOPE_NAME);
    }
}
