//! Local-domain socket plumbing.
//!
//! Raw libc throughout: the kernel-call filters pin `socket` to the exact
//! three-argument form `(domain, SOCK_STREAM, 0)`, and the std wrappers add
//! SOCK_CLOEXEC, which those predicates reject.

use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::net::UnixStream;
use std::path::Path;

use crate::{last_os_error, NetError};

fn sockaddr_for(path: &Path) -> Result<(libc::sockaddr_un, libc::socklen_t), NetError> {
    let bytes = path.as_os_str().as_bytes();
    let mut addr = libc::sockaddr_un {
        sun_family: libc::AF_UNIX as libc::sa_family_t,
        sun_path: [0; 108],
    };

    if bytes.is_empty() {
        return Err(NetError::InvalidArgument("empty socket path"));
    }
    // Leave room for the terminating NUL.
    if bytes.len() >= addr.sun_path.len() {
        return Err(NetError::InvalidArgument(
            "socket path too long for sockaddr_un",
        ));
    }

    for (dst, &src) in addr.sun_path.iter_mut().zip(bytes) {
        *dst = src as libc::c_char;
    }

    let len = mem::size_of::<libc::sa_family_t>() + bytes.len() + 1;
    Ok((addr, len as libc::socklen_t))
}

fn stream_socket() -> Result<OwnedFd, NetError> {
    let fd = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Bind and listen on `path`, unlinking any stale node first.
pub fn listen(path: &Path, backlog: i32) -> Result<OwnedFd, NetError> {
    let (addr, len) = sockaddr_for(path)?;
    let fd = stream_socket()?;

    // A leftover node from a previous run would make bind fail; it may also
    // simply not exist, so the result is not checked.
    unsafe { libc::unlink(addr.sun_path.as_ptr()) };

    let ret = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &addr as *const libc::sockaddr_un as *const libc::sockaddr,
            len,
        )
    };
    if ret != 0 {
        return Err(last_os_error());
    }

    if unsafe { libc::listen(fd.as_raw_fd(), backlog) } != 0 {
        return Err(last_os_error());
    }

    log::info!("listening on {}", path.display());
    Ok(fd)
}

/// Connect to the local-domain socket at `path`.
pub fn connect(path: &Path) -> Result<OwnedFd, NetError> {
    let (addr, len) = sockaddr_for(path)?;
    let fd = stream_socket()?;

    let ret = unsafe {
        libc::connect(
            fd.as_raw_fd(),
            &addr as *const libc::sockaddr_un as *const libc::sockaddr,
            len,
        )
    };
    if ret != 0 {
        return Err(last_os_error());
    }
    Ok(fd)
}

/// Connect to the redirector socket and hand back a stream the application
/// layer can speak SOCKS5 over.
pub fn proxy_stream(path: &Path) -> Result<UnixStream, NetError> {
    Ok(UnixStream::from(connect(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    fn scratch_socket(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("warren-uds-{name}-{}", std::process::id()))
    }

    #[test]
    fn rejects_oversized_paths() {
        let long = std::path::PathBuf::from("/tmp/".to_string() + &"x".repeat(200));
        assert!(matches!(
            listen(&long, 1),
            Err(NetError::InvalidArgument(_))
        ));
    }

    #[test]
    fn listen_replaces_a_stale_node() {
        let path = scratch_socket("stale");
        let first = listen(&path, 4).unwrap();
        drop(first);
        // The node is still on disk; a second bind must displace it.
        let _second = listen(&path, 4).unwrap();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn bytes_round_trip_between_ends() {
        let path = scratch_socket("roundtrip");
        let listener = listen(&path, 4).unwrap();

        let mut client = proxy_stream(&path).unwrap();
        let accepted =
            unsafe { libc::accept(listener.as_raw_fd(), std::ptr::null_mut(), std::ptr::null_mut()) };
        assert!(accepted >= 0);
        let mut server = unsafe { UnixStream::from_raw_fd(accepted) };

        client.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        let _ = std::fs::remove_file(&path);
    }
}
