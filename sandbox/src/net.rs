//! Network scope: private network namespace, optionally behind a redirector.

use nix::sched::{unshare, CloneFlags};

use warren_config::NetworkMode;

use crate::process::{spawn_process, ReadinessPipe};
use crate::{errno_io, IsolationError};

/// Take this process off the network.
///
/// In [`NetworkMode::Simple`] the private network scope is entered
/// immediately and the process is left with loopback only, with no
/// outbound path at all.
///
/// In [`NetworkMode::WithRedirector`] the redirector entry is cloned off
/// first, while this process still shares the host network scope, so the
/// redirector keeps real network access for the rest of its life. This
/// process then blocks on the readiness pipe until the redirector's
/// listening socket exists, and only then enters its own private scope.
/// The redirector child receives the pipe and must call
/// [`ReadinessPipe::close_read`] early and [`ReadinessPipe::signal_ready`]
/// once it is accepting connections.
///
/// Either way, afterwards this process cannot enumerate physical devices or
/// their hardware addresses.
pub fn isolate_network<F>(mode: NetworkMode, redirector: F) -> Result<(), IsolationError>
where
    F: FnMut(ReadinessPipe) -> i32 + 'static,
{
    if let NetworkMode::WithRedirector = mode {
        let pipe = ReadinessPipe::new()?;

        let mut redirector = redirector;
        spawn_process(move || redirector(pipe), CloneFlags::empty())?;

        pipe.wait_ready()?;
        log::info!("redirector signaled ready");
    }

    unshare(CloneFlags::CLONE_NEWNET).map_err(|e| IsolationError::NetScope(errno_io(e)))?;
    log::info!("network scope isolated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore = "requires CAP_SYS_ADMIN"]
    fn simple_mode_removes_interfaces() {
        isolate_network(NetworkMode::Simple, |_| 0).unwrap();

        // Only loopback may remain visible.
        let interfaces = nix::net::if_::if_nameindex().unwrap();
        for iface in interfaces.iter() {
            assert_eq!(iface.name().to_str().unwrap(), "lo");
        }
    }
}
