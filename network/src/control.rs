//! The control channel: token mint, listen, authenticate, command loop.

use std::io::{Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::net::UnixStream;
use std::path::Path;

use warren_secmem::{ct_equal, scrub, EntropySource, Pane};

use crate::{uds, NetError};

/// Token length on the wire and in memory.
pub const TOKEN_LEN: usize = 32;

/// 32 symbols, so one CSPRNG byte modulo the alphabet size carries no
/// modulo skew. 32 symbols over 32 positions is 160 bits of entropy.
const TOKEN_ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz012345";

/// The secret a front end must present to obtain a control session.
///
/// Minted once at bootstrap into a frozen pane, handed to the front end as
/// a process argument, and compared in constant time ever after.
pub struct ControlToken {
    pane: Pane,
}

impl ControlToken {
    pub fn mint(entropy: &mut EntropySource) -> Result<Self, NetError> {
        let mut draw = [0u8; TOKEN_LEN];
        entropy.fill(&mut draw)?;

        let mut pane = Pane::alloc(TOKEN_LEN)?;
        for (dst, src) in pane.as_mut_slice()[..TOKEN_LEN].iter_mut().zip(draw) {
            *dst = TOKEN_ALPHABET[(src % 32) as usize];
        }
        scrub(&mut draw);
        pane.freeze()?;

        Ok(Self { pane })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.pane.as_slice()[..TOKEN_LEN]
    }

    /// Constant-time comparison against an authentication attempt.
    pub fn matches(&self, attempt: &[u8]) -> bool {
        ct_equal(self.as_bytes(), attempt)
    }

    #[cfg(test)]
    fn from_bytes(bytes: &[u8; TOKEN_LEN]) -> Self {
        let mut pane = Pane::alloc(TOKEN_LEN).unwrap();
        pane.as_mut_slice()[..TOKEN_LEN].copy_from_slice(bytes);
        pane.freeze().unwrap();
        Self { pane }
    }
}

/// How a control session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The peer failed authentication: wrong token, short read, or an I/O
    /// error before the token arrived.
    Denied,
    /// The peer sent the close-session command.
    Closed,
    /// The peer vanished after authenticating.
    Disconnected,
}

/// Drive one control session over any byte stream.
///
/// First message in: exactly [`TOKEN_LEN`] raw bytes. First reply out: a
/// network-order `u32`, 1 on success, 0 on failure. Authenticated messages
/// are network-order `u32` command codes; 0 closes the session, unknown
/// codes are logged and ignored. Exposed at this level so the state machine
/// runs under test over an in-process socket pair.
pub fn run_session<S: Read + Write>(stream: &mut S, token: &ControlToken) -> SessionOutcome {
    let mut attempt = [0u8; TOKEN_LEN];
    let authenticated =
        stream.read_exact(&mut attempt).is_ok() && token.matches(&attempt);
    scrub(&mut attempt);

    let verdict: u32 = if authenticated { 1 } else { 0 };
    let reply_sent = stream.write_all(&verdict.to_be_bytes()).is_ok();

    if !authenticated || !reply_sent {
        log::warn!("control session failed authentication");
        return SessionOutcome::Denied;
    }

    loop {
        let mut code = [0u8; 4];
        if stream.read_exact(&mut code).is_err() {
            log::info!("control peer disconnected");
            return SessionOutcome::Disconnected;
        }

        match u32::from_be_bytes(code) {
            0 => {
                log::info!("control peer requested session close");
                return SessionOutcome::Closed;
            }
            unknown => {
                // Command vocabulary beyond close belongs to the
                // application layer; the session stays open.
                log::warn!("unknown control command {unknown}, ignoring");
            }
        }
    }
}

/// The listening side of the control channel, owned by the contained
/// process.
pub struct ControlChannel {
    listener: OwnedFd,
    token: ControlToken,
}

impl ControlChannel {
    /// Bind the listener inside the sandbox directory. Runs during
    /// bootstrap, before isolation; the descriptor survives the pivot.
    pub fn bind(path: &Path, backlog: i32, token: ControlToken) -> Result<Self, NetError> {
        let listener = uds::listen(path, backlog)?;
        Ok(Self { listener, token })
    }

    pub fn token(&self) -> &ControlToken {
        &self.token
    }

    /// Accept control sessions forever, one forked child per session.
    ///
    /// The parent never runs session logic; a failed accept or fork is
    /// logged and the loop continues.
    pub fn serve(&self) -> ! {
        loop {
            let fd = unsafe {
                libc::accept(
                    self.listener.as_raw_fd(),
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                )
            };
            if fd < 0 {
                log::warn!(
                    "control accept failed: {}",
                    std::io::Error::last_os_error()
                );
                continue;
            }

            match unsafe { libc::fork() } {
                -1 => {
                    log::warn!(
                        "control session fork failed: {}",
                        std::io::Error::last_os_error()
                    );
                    unsafe { libc::close(fd) };
                }
                0 => {
                    let mut stream = unsafe { UnixStream::from_raw_fd(fd) };
                    let outcome = run_session(&mut stream, &self.token);
                    drop(stream);
                    let code = match outcome {
                        SessionOutcome::Closed => 0,
                        SessionOutcome::Denied | SessionOutcome::Disconnected => 1,
                    };
                    unsafe { libc::_exit(code) };
                }
                _ => {
                    // The session child owns the descriptor now.
                    unsafe { libc::close(fd) };
                }
            }
        }
    }
}
