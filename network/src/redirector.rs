//! The redirector data plane: accept, fork, relay.

use std::convert::Infallible;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use warren_config::HarnessConfig;
use warren_sandbox::process::ReadinessPipe;
use warren_sandbox::FilterPolicy;
use warren_secmem::GuardedBuf;

use crate::endpoint::FrozenEndpoint;
use crate::{uds, NetError};

/// One page of scratch per relay; there is no other buffering.
const RELAY_BUF_BYTES: usize = 4096;

/// Clone entry point for the redirector process.
///
/// Runs in the host network scope for its whole life; the caller clones it
/// off before entering the private network scope. Never returns on the
/// happy path; the returned value is the process exit code after a fatal
/// initialization error.
pub fn run(config: &HarnessConfig, ready: ReadinessPipe) -> i32 {
    ready.close_read();

    match init_and_serve(config, ready) {
        Ok(never) => match never {},
        Err(err) => {
            log::error!("redirector failed: {err}");
            1
        }
    }
}

fn init_and_serve(
    config: &HarnessConfig,
    ready: ReadinessPipe,
) -> Result<Infallible, NetError> {
    // Order is load-bearing: the endpoint must exist before the filter can
    // bind connect to it, and the filter must be armed before any socket
    // from the sandbox side is accepted.
    let endpoint = FrozenEndpoint::resolve(&config.proxy_host, config.proxy_port)?;

    FilterPolicy::redirector(endpoint.binding())?.install()?;

    let listener = uds::listen(&config.redirector_socket_path(), config.listen_backlog)?;

    // The parent is blocked on this EOF; from here on it may enter its
    // private network scope.
    ready.signal_ready();

    accept_loop(listener, endpoint)
}

fn accept_loop(listener: OwnedFd, endpoint: FrozenEndpoint) -> Result<Infallible, NetError> {
    loop {
        // Proxy side first: accepting a sandbox stream with no proxy to
        // relay it to would strand the client.
        let outside = match endpoint.connect() {
            Ok(fd) => fd,
            Err(err) => {
                log::warn!("proxy connection failed, retrying: {err}");
                continue;
            }
        };

        let inside = unsafe {
            libc::accept(
                listener.as_raw_fd(),
                std::ptr::null_mut(),
                std::ptr::null_mut(),
            )
        };
        if inside < 0 {
            log::warn!(
                "accept from sandbox failed: {}",
                io::Error::last_os_error()
            );
            continue;
        }

        match unsafe { libc::fork() } {
            -1 => {
                log::warn!("relay fork failed: {}", io::Error::last_os_error());
                unsafe { libc::close(inside) };
            }
            0 => {
                // The relay child owns the pair; it exits on the first
                // read-shutdown and never retries.
                let code = match relay(inside, outside.as_raw_fd()) {
                    Ok(()) => 0,
                    Err(err) => {
                        log::warn!("relay ended with error: {err}");
                        1
                    }
                };
                unsafe { libc::_exit(code) };
            }
            _ => {
                unsafe { libc::close(inside) };
                drop(outside);
            }
        }
    }
}

/// Shuttle bytes both ways until either side shuts down its read half.
///
/// Blocks in poll; reads are non-blocking and short reads are forwarded
/// as-is with a blocking write. Public so the transparency tests can drive
/// it over plain socket pairs.
pub fn relay(inside: RawFd, outside: RawFd) -> Result<(), NetError> {
    let mut scratch = GuardedBuf::alloc(RELAY_BUF_BYTES)?;

    let mut fds = [
        libc::pollfd {
            fd: inside,
            events: libc::POLLIN | libc::POLLRDHUP,
            revents: 0,
        },
        libc::pollfd {
            fd: outside,
            events: libc::POLLIN | libc::POLLRDHUP,
            revents: 0,
        },
    ];

    loop {
        fds[0].revents = 0;
        fds[1].revents = 0;

        let ret = unsafe { libc::poll(fds.as_mut_ptr(), 2, -1) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(NetError::Io(err));
        }

        // Drain readable data before honoring a hangup: a peer can close
        // with bytes still queued, and both conditions arrive in one poll
        // round.
        let mut moved = false;
        if fds[0].revents & libc::POLLIN != 0 {
            match forward(inside, outside, &mut scratch)? {
                Forward::Eof => return Ok(()),
                Forward::Moved => moved = true,
                Forward::WouldBlock => {}
            }
        }
        if fds[1].revents & libc::POLLIN != 0 {
            match forward(outside, inside, &mut scratch)? {
                Forward::Eof => return Ok(()),
                Forward::Moved => moved = true,
                Forward::WouldBlock => {}
            }
        }

        let closed = libc::POLLRDHUP | libc::POLLHUP | libc::POLLERR;
        if !moved && (fds[0].revents & closed != 0 || fds[1].revents & closed != 0) {
            return Ok(());
        }
    }
}

enum Forward {
    Moved,
    WouldBlock,
    Eof,
}

/// Move at most one buffer of bytes from `from` to `to`.
fn forward(from: RawFd, to: RawFd, scratch: &mut GuardedBuf) -> Result<Forward, NetError> {
    let buf = scratch.as_mut_slice();

    let received = unsafe {
        libc::recv(
            from,
            buf.as_mut_ptr().cast(),
            buf.len(),
            libc::MSG_DONTWAIT,
        )
    };
    if received < 0 {
        let err = io::Error::last_os_error();
        // Readiness can evaporate between poll and recv.
        if err.kind() == io::ErrorKind::WouldBlock {
            return Ok(Forward::WouldBlock);
        }
        return Err(NetError::Io(err));
    }
    if received == 0 {
        return Ok(Forward::Eof);
    }

    let mut sent = 0usize;
    while sent < received as usize {
        let ret = unsafe {
            libc::send(
                to,
                buf[sent..].as_ptr().cast(),
                received as usize - sent,
                0,
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(NetError::Io(err));
        }
        sent += ret as usize;
    }

    Ok(Forward::Moved)
}
