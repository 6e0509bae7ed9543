//! Process spawn and fencing: owned-stack clone, readiness pipes, PID scope.

use std::io;
use std::os::raw::{c_int, c_void};

use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;

use warren_secmem::GuardedBuf;

use crate::{errno_io, IsolationError};

/// Stack size handed to every cloned process. 8 MiB matches the usual main
/// thread allotment and is far more than any entry point here consumes.
const STACK_BYTES: usize = 8 * 1024 * 1024;

/// A clone stack the caller owns: guard pages on both ends, scrubbed on
/// release.
pub struct OwnedStack {
    buf: GuardedBuf,
}

impl OwnedStack {
    pub fn alloc() -> Result<Self, IsolationError> {
        Ok(Self {
            buf: GuardedBuf::alloc(STACK_BYTES)?,
        })
    }

    /// Highest usable address; clone stacks grow downward from here on
    /// every supported architecture.
    pub fn top(&self) -> *mut u8 {
        self.buf.top()
    }
}

type EntryFn = Box<dyn FnMut() -> i32>;

// The closure is double-boxed so a thin pointer survives the trip through
// clone's untyped data argument. The child re-boxes it and runs it; its
// return value becomes the child's exit status.
extern "C" fn clone_trampoline(data: *mut c_void) -> c_int {
    let mut entry = unsafe { Box::from_raw(data as *mut EntryFn) };
    entry()
}

/// Clone into `entry` on a freshly allocated owned stack.
///
/// `flags` carries namespace flags only; SIGCHLD is always added so the
/// parent can wait. There is no CLONE_VM here: the child gets a one-time
/// copy of the address space, so the parent's copy of the stack and the
/// closure are freed as soon as clone returns.
pub fn spawn_process<F>(entry: F, flags: nix::sched::CloneFlags) -> Result<Pid, IsolationError>
where
    F: FnMut() -> i32 + 'static,
{
    let stack = OwnedStack::alloc()?;
    let data = Box::into_raw(Box::new(Box::new(entry) as EntryFn));

    let ret = unsafe {
        libc::clone(
            clone_trampoline,
            stack.top().cast(),
            flags.bits() | libc::SIGCHLD,
            data.cast(),
        )
    };

    // Reclaim the parent's copy of the closure; the child runs its own.
    unsafe { drop(Box::from_raw(data)) };

    if ret == -1 {
        return Err(IsolationError::Spawn(io::Error::last_os_error()));
    }
    Ok(Pid::from_raw(ret))
}

/// Clone `entry` into a new PID scope and wait for it.
///
/// The parent process does nothing further: it blocks until the contained
/// child is gone and then reports the child's exit status (or 128 plus the
/// signal number if it was killed), which the caller turns into its own
/// process exit.
pub fn spawn_contained<F>(entry: F) -> Result<i32, IsolationError>
where
    F: FnMut() -> i32 + 'static,
{
    let child = spawn_process(entry, nix::sched::CloneFlags::CLONE_NEWPID)?;
    log::info!("contained process spawned as {child}");

    loop {
        match waitpid(child, None).map_err(|e| IsolationError::Spawn(errno_io(e)))? {
            WaitStatus::Exited(_, code) => return Ok(code),
            WaitStatus::Signaled(_, signal, _) => return Ok(128 + signal as i32),
            _ => continue,
        }
    }
}

/// A byte pipe used purely for ordering: the initializing side closes the
/// write end when it is ready, which the waiting side observes as EOF.
///
/// Both ends are plain descriptors on purpose. The struct crosses a clone
/// boundary, after which parent and child each close one end; owning
/// wrappers would double-close on whichever side drops second.
#[derive(Clone, Copy)]
pub struct ReadinessPipe {
    read_fd: c_int,
    write_fd: c_int,
}

impl ReadinessPipe {
    pub fn new() -> Result<Self, IsolationError> {
        let mut fds = [0 as c_int; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(IsolationError::Readiness(io::Error::last_os_error()));
        }
        Ok(Self {
            read_fd: fds[0],
            write_fd: fds[1],
        })
    }

    /// Child side, step one: give up the end this process will never use.
    pub fn close_read(&self) {
        unsafe { libc::close(self.read_fd) };
    }

    /// Child side, step two: initialization is done; deliver EOF to the
    /// waiting parent.
    pub fn signal_ready(&self) {
        unsafe { libc::close(self.write_fd) };
    }

    /// Parent side: close the local write end, then block until the child
    /// closes its own, which arrives here as end-of-stream.
    pub fn wait_ready(&self) -> Result<(), IsolationError> {
        unsafe { libc::close(self.write_fd) };

        let mut byte = [0u8; 1];
        loop {
            let n = unsafe { libc::read(self.read_fd, byte.as_mut_ptr().cast(), 1) };
            if n >= 0 {
                unsafe { libc::close(self.read_fd) };
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                unsafe { libc::close(self.read_fd) };
                return Err(IsolationError::Readiness(err));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owned_stack_top_is_aligned() {
        let stack = OwnedStack::alloc().unwrap();
        assert_eq!(stack.top() as usize % 16, 0);
    }

    #[test]
    fn spawn_propagates_exit_code() {
        // No namespace flags: this only needs fork rights.
        let child = spawn_process(|| 7, nix::sched::CloneFlags::empty()).unwrap();
        match waitpid(child, None).unwrap() {
            WaitStatus::Exited(_, code) => assert_eq!(code, 7),
            status => panic!("unexpected status {status:?}"),
        }
    }

    #[test]
    fn readiness_pipe_delivers_eof() {
        let pipe = ReadinessPipe::new().unwrap();
        let child = spawn_process(
            move || {
                pipe.close_read();
                pipe.signal_ready();
                0
            },
            nix::sched::CloneFlags::empty(),
        )
        .unwrap();

        pipe.wait_ready().unwrap();
        waitpid(child, None).unwrap();
    }

    #[test]
    #[ignore = "requires CAP_SYS_ADMIN"]
    fn contained_child_sees_itself_as_pid_one() {
        let status = spawn_contained(|| {
            if std::process::id() == 1 {
                0
            } else {
                1
            }
        })
        .unwrap();
        assert_eq!(status, 0);
    }
}
