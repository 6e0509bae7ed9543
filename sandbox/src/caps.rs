//! Capability fencing: clear the bootstrap privileges before application
//! code runs.

use std::io;
use std::os::raw::c_int;

use crate::IsolationError;

const LINUX_CAPABILITY_VERSION_3: u32 = 0x2008_0522;

#[repr(C)]
struct CapUserHeader {
    version: u32,
    pid: c_int,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct CapUserData {
    effective: u32,
    permitted: u32,
    inheritable: u32,
}

// Capability numbers from linux/capability.h.
pub const CAP_NET_ADMIN: u32 = 12;
pub const CAP_SYS_ADMIN: u32 = 21;
pub const CAP_SETFCAP: u32 = 31;

/// The capabilities the binary must launch with and must shed before any
/// application code runs: administer namespaces, administer networking,
/// set file capabilities.
pub const BOOTSTRAP_CAPS: [u32; 3] = [CAP_SYS_ADMIN, CAP_NET_ADMIN, CAP_SETFCAP];

/// Clear every bootstrap capability from the effective set.
///
/// Failure is fatal: a process that cannot prove it shed its privileges
/// must not proceed to application code.
pub fn drop_bootstrap_caps() -> Result<(), IsolationError> {
    let mut header = CapUserHeader {
        version: LINUX_CAPABILITY_VERSION_3,
        pid: 0,
    };
    // Version 3 splits the 64 capability bits across two data words.
    let mut data = [CapUserData::default(); 2];

    let ret = unsafe { libc::syscall(libc::SYS_capget, &mut header, data.as_mut_ptr()) };
    if ret != 0 {
        return Err(IsolationError::CapabilityDrop(io::Error::last_os_error()));
    }

    for cap in BOOTSTRAP_CAPS {
        let word = (cap / 32) as usize;
        let bit = 1u32 << (cap % 32);
        data[word].effective &= !bit;
    }

    let ret = unsafe { libc::syscall(libc::SYS_capset, &header, data.as_ptr()) };
    if ret != 0 {
        return Err(IsolationError::CapabilityDrop(io::Error::last_os_error()));
    }

    log::info!("bootstrap capabilities cleared from effective set");
    Ok(())
}

/// Whether `cap` is currently in the effective set. Used by tests and by the
/// bootstrap's post-drop assertion.
pub fn effective_has(cap: u32) -> Result<bool, IsolationError> {
    let mut header = CapUserHeader {
        version: LINUX_CAPABILITY_VERSION_3,
        pid: 0,
    };
    let mut data = [CapUserData::default(); 2];

    let ret = unsafe { libc::syscall(libc::SYS_capget, &mut header, data.as_mut_ptr()) };
    if ret != 0 {
        return Err(IsolationError::CapabilityDrop(io::Error::last_os_error()));
    }

    let word = (cap / 32) as usize;
    let bit = 1u32 << (cap % 32);
    Ok(data[word].effective & bit != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_bits_are_in_range() {
        for cap in BOOTSTRAP_CAPS {
            assert!(cap < 64, "capability {cap} outside the two data words");
        }
    }

    #[test]
    fn drop_is_idempotent() {
        // Unprivileged processes have nothing in the effective set; the drop
        // must still succeed, and twice over.
        drop_bootstrap_caps().unwrap();
        drop_bootstrap_caps().unwrap();
        for cap in BOOTSTRAP_CAPS {
            assert!(!effective_has(cap).unwrap());
        }
    }
}
