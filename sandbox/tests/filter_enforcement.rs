//! Live filter enforcement, observed from a parent process.
//!
//! Loading a filter needs no privileges (seccompiler sets no_new_privs), so
//! each test forks, arms the filter in the child, performs one probe call
//! with raw libc, and checks from the parent whether the child survived.
//! Children must not touch the heap between arming and probing: the
//! default-deny verdict arrives as an uncatchable kill.

#![cfg(target_os = "linux")]

use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult};
use warren_sandbox::{ConnectBinding, FilterPolicy};

enum Expect {
    CleanExit,
    KilledBySyscallFilter,
}

fn run_filtered(expect: Expect, arm_and_probe: impl FnOnce() -> i32) {
    match unsafe { fork() }.expect("fork") {
        ForkResult::Child => {
            let code = arm_and_probe();
            unsafe { libc::_exit(code) };
        }
        ForkResult::Parent { child } => {
            let status = waitpid(child, None).expect("waitpid");
            match (expect, status) {
                (Expect::CleanExit, WaitStatus::Exited(_, 0)) => {}
                (Expect::KilledBySyscallFilter, WaitStatus::Signaled(_, Signal::SIGSYS, _)) => {}
                (_, status) => panic!("unexpected child status {status:?}"),
            }
        }
    }
}

#[test]
fn contained_role_kills_inet_socket_creation() {
    run_filtered(Expect::KilledBySyscallFilter, || {
        FilterPolicy::contained().unwrap().install().unwrap();
        // Must never return.
        unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
        0
    });
}

#[test]
fn contained_role_admits_local_domain_sockets() {
    run_filtered(Expect::CleanExit, || {
        FilterPolicy::contained().unwrap().install().unwrap();
        let fd = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0) };
        if fd < 0 {
            return 1;
        }
        unsafe { libc::close(fd) };
        0
    });
}

#[test]
fn contained_role_kills_listen() {
    run_filtered(Expect::KilledBySyscallFilter, || {
        FilterPolicy::contained().unwrap().install().unwrap();
        let fd = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0) };
        unsafe { libc::listen(fd, 1) };
        0
    });
}

#[test]
fn redirector_role_kills_connect_with_unblessed_address() {
    // A synthetic binding: no real endpoint exists at this address, and the
    // connect below must die on its arguments alone.
    let binding = ConnectBinding {
        addr: 0x1000,
        len: 16,
    };

    run_filtered(Expect::KilledBySyscallFilter, move || {
        let addr = libc::sockaddr_in {
            sin_family: libc::AF_INET as libc::sa_family_t,
            sin_port: 9050u16.to_be(),
            sin_addr: libc::in_addr {
                s_addr: u32::from_be_bytes([127, 0, 0, 1]).to_be(),
            },
            sin_zero: [0; 8],
        };

        FilterPolicy::redirector(binding).unwrap().install().unwrap();

        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
        // The address pointer differs from the frozen binding: fatal.
        unsafe {
            libc::connect(
                fd,
                &addr as *const libc::sockaddr_in as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        };
        0
    });
}

#[test]
fn filters_kill_udp_style_sendto() {
    run_filtered(Expect::KilledBySyscallFilter, || {
        FilterPolicy::contained().unwrap().install().unwrap();

        let fd = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0) };
        let addr = libc::sockaddr_un {
            sun_family: libc::AF_UNIX as libc::sa_family_t,
            sun_path: [0; 108],
        };
        let payload = [0u8; 4];
        // Destination supplied directly: the null/zero predicate fails.
        unsafe {
            libc::sendto(
                fd,
                payload.as_ptr().cast(),
                payload.len(),
                0,
                &addr as *const libc::sockaddr_un as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_un>() as libc::socklen_t,
            )
        };
        0
    });
}

#[test]
fn reinstall_is_a_noop() {
    run_filtered(Expect::CleanExit, || {
        FilterPolicy::contained().unwrap().install().unwrap();
        // A second install must neither fail nor weaken anything.
        let reinstall = FilterPolicy::contained().and_then(|p| p.install());
        if reinstall.is_err() {
            return 1;
        }
        let fd = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0) };
        if fd < 0 {
            return 2;
        }
        unsafe { libc::close(fd) };
        0
    });
}

#[test]
fn unlisted_calls_are_fatal() {
    run_filtered(Expect::KilledBySyscallFilter, || {
        FilterPolicy::contained().unwrap().install().unwrap();
        unsafe { libc::syscall(libc::SYS_chdir, b"/\0".as_ptr()) };
        0
    });
}
