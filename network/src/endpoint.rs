//! The frozen proxy endpoint: one address, written once, read-only forever.

use std::mem;
use std::net::{SocketAddr, SocketAddrV4, ToSocketAddrs};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use warren_sandbox::ConnectBinding;
use warren_secmem::Pane;

use crate::{last_os_error, NetError};

/// The proxy's socket name, resolved once and then frozen.
///
/// Three independent mechanisms hang off this struct: the pane's read-only
/// protection (writes trap), the filter's connect predicate built from
/// [`binding`](FrozenEndpoint::binding) (other argument values kill the
/// process), and the contained process's inability to create an inet socket
/// at all. [`connect`](FrozenEndpoint::connect) therefore passes the pane's
/// own base pointer to the kernel, never a copy.
pub struct FrozenEndpoint {
    pane: Pane,
    len: libc::socklen_t,
}

impl FrozenEndpoint {
    /// Resolve `host:port` and freeze the first (and expectedly only)
    /// inet-v4 record.
    pub fn resolve(host: &str, port: u16) -> Result<Self, NetError> {
        let records: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|e| NetError::Resolve(format!("{host}:{port}: {e}")))?
            .collect();

        let v4: Vec<SocketAddrV4> = records
            .iter()
            .filter_map(|addr| match addr {
                SocketAddr::V4(v4) => Some(*v4),
                SocketAddr::V6(_) => None,
            })
            .collect();

        let chosen = match v4.as_slice() {
            [] => {
                return Err(NetError::Resolve(format!(
                    "{host}:{port} has no inet-v4 record"
                )))
            }
            [only] => *only,
            [first, ..] => {
                log::warn!(
                    "{} records for {host}:{port}, using the first",
                    v4.len()
                );
                *first
            }
        };

        let sin = libc::sockaddr_in {
            sin_family: libc::AF_INET as libc::sa_family_t,
            sin_port: chosen.port().to_be(),
            sin_addr: libc::in_addr {
                s_addr: u32::from(*chosen.ip()).to_be(),
            },
            sin_zero: [0; 8],
        };

        let mut pane = Pane::alloc(mem::size_of::<libc::sockaddr_in>())?;
        unsafe {
            (pane.as_mut_slice().as_mut_ptr() as *mut libc::sockaddr_in).write(sin);
        }
        pane.freeze()?;

        log::info!("proxy endpoint frozen at {chosen}");
        Ok(Self {
            pane,
            len: mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        })
    }

    /// The literal argument pair the kernel-call filter binds `connect` to.
    pub fn binding(&self) -> ConnectBinding {
        ConnectBinding {
            addr: self.pane.base_addr() as u64,
            len: self.len,
        }
    }

    /// Open a fresh TCP stream to the frozen address.
    ///
    /// The address argument is the frozen region itself; under the
    /// redirector filter this is the only connect that can survive.
    pub fn connect(&self) -> Result<OwnedFd, NetError> {
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
        if fd < 0 {
            return Err(last_os_error());
        }
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };

        let ret = unsafe {
            libc::connect(
                fd.as_raw_fd(),
                self.pane.as_ptr() as *const libc::sockaddr,
                self.len,
            )
        };
        if ret != 0 {
            return Err(last_os_error());
        }
        Ok(fd)
    }
}
