//! Filesystem scope: pivot the process into the sandbox directory.

use std::fs;
use std::io;
use std::path::Path;

use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::sched::{unshare, CloneFlags};
use nix::sys::stat::Mode;
use nix::unistd::{chdir, mkdir, pivot_root};

use crate::{errno_io, IsolationError};

const OLDROOT: &str = "oldroot";

fn step(name: &'static str) -> impl Fn(nix::Error) -> IsolationError {
    move |err| IsolationError::Filesystem {
        step: name,
        source: errno_io(err),
    }
}

fn io_step(name: &'static str, source: io::Error) -> IsolationError {
    IsolationError::Filesystem { step: name, source }
}

/// Create the sandbox directory if it does not already exist.
///
/// Runs during bootstrap, long before the pivot; it is the only place the
/// harness creates a filesystem object outside the sandbox directory's own
/// subtree.
pub fn prepare_sandbox_dir(path: &Path) -> Result<(), IsolationError> {
    match fs::create_dir(path) {
        Ok(()) => {
            log::info!("created sandbox directory {}", path.display());
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            log::info!("sandbox directory {} already exists", path.display());
            Ok(())
        }
        Err(err) => Err(io_step("create sandbox directory", err)),
    }
}

/// Make `sandbox` the root of this process's filesystem view.
///
/// After this returns, `/` is the former sandbox directory and nothing
/// outside it can be named. Descendants forked later inherit the pivoted
/// view, which is how the redirector and the contained process end up
/// sharing one socket directory.
pub fn pivot_into(sandbox: &Path, new_mount_scope: bool) -> Result<(), IsolationError> {
    if new_mount_scope {
        unshare(CloneFlags::CLONE_NEWNS).map_err(step("unshare mount scope"))?;
    }

    // Re-mark everything below / as private. Shared propagation (the systemd
    // default) would otherwise push the detach-unmount below back out to the
    // host's mount table.
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None::<&str>,
    )
    .map_err(step("remount root private"))?;

    // Bind the sandbox directory onto itself so it is a mount object in its
    // own right, which pivot_root requires, and strip exec while at it.
    mount(
        Some(sandbox),
        sandbox,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_NOEXEC,
        None::<&str>,
    )
    .map_err(step("self bind-mount"))?;

    chdir(sandbox).map_err(step("enter sandbox directory"))?;

    // The put-old directory must be empty; clear out any leftover object
    // with that name. Failure to remove is fine, failure to create is not.
    let _ = fs::remove_dir(OLDROOT);
    let _ = fs::remove_file(OLDROOT);
    mkdir(OLDROOT, Mode::S_IRWXU).map_err(step("create oldroot"))?;

    pivot_root(sandbox, OLDROOT).map_err(step("pivot root"))?;

    chdir("/").map_err(step("enter new root"))?;

    umount2("/oldroot", MntFlags::MNT_DETACH).map_err(step("detach old root"))?;

    fs::remove_dir("/oldroot").map_err(|err| io_step("remove oldroot", err))?;

    log::info!("filesystem pivot complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn prepare_is_idempotent() {
        let dir = std::env::temp_dir().join(format!("warren-fs-test-{}", std::process::id()));
        prepare_sandbox_dir(&dir).unwrap();
        prepare_sandbox_dir(&dir).unwrap();
        fs::remove_dir(&dir).unwrap();
    }

    #[test]
    fn prepare_fails_on_unwritable_parent() {
        let path = PathBuf::from("/proc/warren-cannot-exist");
        assert!(matches!(
            prepare_sandbox_dir(&path),
            Err(IsolationError::Filesystem { .. })
        ));
    }

    /// Full pivot needs CAP_SYS_ADMIN; exercised in a privileged environment
    /// only. After the pivot, a path readable beforehand must not resolve.
    #[test]
    #[ignore = "requires CAP_SYS_ADMIN and a disposable mount scope"]
    fn pivot_unreaches_the_old_root() {
        let dir = std::env::temp_dir().join("warren-pivot-test");
        prepare_sandbox_dir(&dir).unwrap();
        assert!(fs::metadata("/etc").is_ok());

        pivot_into(&dir, true).unwrap();

        // The old /etc must now be absent or empty inside the sandbox.
        assert!(fs::metadata("/etc").is_err());
    }
}
