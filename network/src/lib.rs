//! warren Network Plane
//!
//! Everything that moves bytes in the harness lives here: the redirector
//! that relays sandbox streams to the proxy, the token-authenticated
//! control channel, and the byte-level SOCKS5 client the application layer
//! speaks through the redirector.
//!
//! # Design Principles
//!
//! - The contained process can reach exactly two endpoints, both
//!   local-domain sockets in the sandbox directory
//! - The redirector can connect to exactly one address, frozen in
//!   read-only memory and pinned by its kernel-call filter
//! - One process per connection; a relay fault never corrupts the
//!   redirector
//! - No framing, no inspection, no buffering beyond one page

#![cfg(target_os = "linux")]

use std::io;

pub mod control;
pub mod endpoint;
pub mod redirector;
pub mod socks5;
pub mod uds;

pub use control::{ControlChannel, ControlToken, SessionOutcome, TOKEN_LEN};
pub use endpoint::FrozenEndpoint;

/// Errors from the network plane.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// Proxy host resolution produced nothing usable.
    #[error("proxy address resolution failed: {0}")]
    Resolve(String),

    /// A socket or descriptor operation failed.
    #[error("i/o failure: {0}")]
    Io(#[from] io::Error),

    /// The peer sent bytes that violate the protocol.
    #[error("protocol violation: {0}")]
    Protocol(&'static str),

    /// A hostname too long for a SOCKS5 request, an oversized socket path,
    /// or a similar caller mistake.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Hardened memory was unavailable.
    #[error(transparent)]
    Memory(#[from] warren_secmem::SecmemError),

    /// Installing the redirector's kernel-call filter failed.
    #[error(transparent)]
    Isolation(#[from] warren_sandbox::IsolationError),
}

pub(crate) fn last_os_error() -> NetError {
    NetError::Io(io::Error::last_os_error())
}
