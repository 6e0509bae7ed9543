//! Kernel-call filtering: declarative per-role allow-lists with argument
//! predicates, compiled to BPF.
//!
//! Two roles exist. The redirector keeps the host network scope, so its
//! table carries the strictest rule in the harness: `connect` is accepted
//! only with the frozen endpoint's exact base address and recorded length.
//! The contained process cannot create an inet socket at all; its only
//! reachable peer is the redirector's local-domain socket.
//!
//! Anything not listed terminates the process. Once loaded, a filter can
//! only be tightened, never relaxed; reinstalling is a no-op.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use seccompiler::{
    BpfProgram, SeccompAction, SeccompCmpArgLen, SeccompCmpOp, SeccompCondition, SeccompFilter,
    SeccompRule, TargetArch,
};

use crate::IsolationError;

/// The two filtered roles in the harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Host network scope, relays sandbox streams to the proxy.
    Redirector,
    /// Fully contained, local-domain sockets only.
    Contained,
}

/// The literal `connect` arguments the redirector is permitted: the frozen
/// endpoint's base address and its recorded length. Any other pair kills
/// the process.
#[derive(Debug, Clone, Copy)]
pub struct ConnectBinding {
    pub addr: u64,
    pub len: u32,
}

/// A built, not-yet-loaded allow-list for one role.
///
/// The table is inspectable before loading, which is what the unprivileged
/// tests exercise; loading it is a one-way door.
pub struct FilterPolicy {
    role: Role,
    rules: BTreeMap<i64, Vec<SeccompRule>>,
}

static INSTALLED: AtomicBool = AtomicBool::new(false);

fn filter_err<E: std::fmt::Display>(err: E) -> IsolationError {
    IsolationError::Filter(err.to_string())
}

fn cond(
    arg: u8,
    len: SeccompCmpArgLen,
    op: SeccompCmpOp,
    value: u64,
) -> Result<SeccompCondition, IsolationError> {
    SeccompCondition::new(arg, len, op, value).map_err(filter_err)
}

fn rule(conditions: Vec<SeccompCondition>) -> Result<SeccompRule, IsolationError> {
    SeccompRule::new(conditions).map_err(filter_err)
}

/// socket(domain, SOCK_STREAM, 0) with exactly the given domain. The type
/// argument must be bare SOCK_STREAM: flag bits like SOCK_CLOEXEC are
/// rejected, so every socket in the data plane is created with the plain
/// three-argument form.
fn stream_socket_rule(domain: libc::c_int) -> Result<SeccompRule, IsolationError> {
    rule(vec![
        cond(0, SeccompCmpArgLen::Dword, SeccompCmpOp::Eq, domain as u64)?,
        cond(
            1,
            SeccompCmpArgLen::Dword,
            SeccompCmpOp::Eq,
            libc::SOCK_STREAM as u64,
        )?,
        cond(2, SeccompCmpArgLen::Dword, SeccompCmpOp::Eq, 0)?,
    ])
}

/// sendto with a null destination address and zero address length. This is
/// what glibc's send lowers to, and it forbids supplying a destination
/// directly, so there is no UDP-style egress.
fn sendto_no_address_rule() -> Result<SeccompRule, IsolationError> {
    rule(vec![
        cond(4, SeccompCmpArgLen::Qword, SeccompCmpOp::Eq, 0)?,
        cond(5, SeccompCmpArgLen::Dword, SeccompCmpOp::Eq, 0)?,
    ])
}

/// recvfrom with null source-address and address-length pointers, the shape
/// glibc's recv lowers to.
fn recvfrom_no_address_rule() -> Result<SeccompRule, IsolationError> {
    rule(vec![
        cond(4, SeccompCmpArgLen::Qword, SeccompCmpOp::Eq, 0)?,
        cond(5, SeccompCmpArgLen::Qword, SeccompCmpOp::Eq, 0)?,
    ])
}

/// mprotect may change protection freely as long as PROT_EXEC stays clear.
fn non_exec_mprotect_rule() -> Result<SeccompRule, IsolationError> {
    rule(vec![cond(
        2,
        SeccompCmpArgLen::Dword,
        SeccompCmpOp::MaskedEq(libc::PROT_EXEC as u64),
        0,
    )?])
}

impl FilterPolicy {
    /// Calls both roles need: the hardened allocator, the logger, plain
    /// descriptor I/O, polling, and exit.
    fn base_rules() -> Result<BTreeMap<i64, Vec<SeccompRule>>, IsolationError> {
        let mut rules: BTreeMap<i64, Vec<SeccompRule>> = BTreeMap::new();
        let allow_always = Vec::new;

        rules.insert(libc::SYS_sendto, vec![sendto_no_address_rule()?]);
        rules.insert(libc::SYS_recvfrom, vec![recvfrom_no_address_rule()?]);
        rules.insert(libc::SYS_mprotect, vec![non_exec_mprotect_rule()?]);

        let unconditional: &[i64] = &[
            // Hardened allocator
            libc::SYS_mmap,
            libc::SYS_munmap,
            // Descriptor I/O and the logger back end
            libc::SYS_read,
            libc::SYS_write,
            libc::SYS_close,
            libc::SYS_openat,
            libc::SYS_fstat,
            libc::SYS_newfstatat,
            libc::SYS_flock,
            // Socket readiness
            libc::SYS_ppoll,
            // Termination
            libc::SYS_exit,
            libc::SYS_exit_group,
            // Runtime support: the C allocator behind small heap
            // allocations, lock contention in the logger, signal return
            libc::SYS_brk,
            libc::SYS_futex,
            libc::SYS_rt_sigreturn,
        ];
        for &call in unconditional {
            rules.insert(call, allow_always());
        }

        // Legacy entry points glibc still uses on this architecture.
        #[cfg(target_arch = "x86_64")]
        for call in [libc::SYS_open, libc::SYS_poll] {
            rules.insert(call, allow_always());
        }

        Ok(rules)
    }

    /// The redirector-role table.
    pub fn redirector(binding: ConnectBinding) -> Result<Self, IsolationError> {
        let mut rules = Self::base_rules()?;
        let allow_always = Vec::new;

        // Inet for the proxy side, local-domain for the sandbox side.
        rules.insert(
            libc::SYS_socket,
            vec![
                stream_socket_rule(libc::AF_INET)?,
                stream_socket_rule(libc::AF_UNIX)?,
            ],
        );

        // The proxy-bypass barrier: connect only with the frozen endpoint's
        // exact base pointer and recorded length.
        rules.insert(
            libc::SYS_connect,
            vec![rule(vec![
                cond(1, SeccompCmpArgLen::Qword, SeccompCmpOp::Eq, binding.addr)?,
                cond(
                    2,
                    SeccompCmpArgLen::Dword,
                    SeccompCmpOp::Eq,
                    binding.len as u64,
                )?,
            ])?],
        );

        for call in [
            libc::SYS_bind,
            libc::SYS_listen,
            libc::SYS_accept,
            libc::SYS_accept4,
            // Per-connection relay fork
            libc::SYS_clone,
            // Stale socket node removal
            libc::SYS_unlinkat,
        ] {
            rules.insert(call, allow_always());
        }
        #[cfg(target_arch = "x86_64")]
        rules.insert(libc::SYS_unlink, allow_always());

        Ok(Self {
            role: Role::Redirector,
            rules,
        })
    }

    /// The contained-role table.
    pub fn contained() -> Result<Self, IsolationError> {
        let mut rules = Self::base_rules()?;
        let allow_always = Vec::new;

        // Local-domain only: no inet socket can ever be created here.
        rules.insert(
            libc::SYS_socket,
            vec![stream_socket_rule(libc::AF_UNIX)?],
        );

        // Address-unrestricted connect: filesystem visibility already limits
        // the reachable peers to the redirector socket.
        rules.insert(libc::SYS_connect, allow_always());

        // The control listener accepts sessions and forks one child each.
        for call in [libc::SYS_accept, libc::SYS_accept4, libc::SYS_clone] {
            rules.insert(call, allow_always());
        }

        Ok(Self {
            role: Role::Contained,
            rules,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Whether the table has any entry for `call`. Listed calls may still
    /// carry argument predicates.
    pub fn allows(&self, call: i64) -> bool {
        self.rules.contains_key(&call)
    }

    /// Number of alternative rules recorded for `call`; zero means the call
    /// is allowed unconditionally.
    pub fn rule_count(&self, call: i64) -> Option<usize> {
        self.rules.get(&call).map(Vec::len)
    }

    /// Compile and load the table. Unlisted calls terminate the process
    /// from here on.
    ///
    /// Loading is a one-way door and a second invocation is a deliberate
    /// no-op: stacking an identical filter could never relax the first one,
    /// so there is nothing useful for it to do.
    pub fn install(self) -> Result<(), IsolationError> {
        if INSTALLED.swap(true, Ordering::SeqCst) {
            log::warn!("kernel-call filter already installed; ignoring reinstall");
            return Ok(());
        }

        let filter = SeccompFilter::new(
            self.rules,
            // Unlisted call, or listed call with failing predicates
            SeccompAction::KillProcess,
            // Listed call with passing predicates
            SeccompAction::Allow,
            target_arch()?,
        )
        .map_err(filter_err)?;

        let program: BpfProgram = filter.try_into().map_err(filter_err)?;
        seccompiler::apply_filter(&program).map_err(filter_err)?;

        log::info!("kernel-call filter installed for {:?} role", self.role);
        Ok(())
    }
}

fn target_arch() -> Result<TargetArch, IsolationError> {
    #[cfg(target_arch = "x86_64")]
    return Ok(TargetArch::x86_64);

    #[cfg(target_arch = "aarch64")]
    return Ok(TargetArch::aarch64);

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    Err(IsolationError::Filter(
        "no seccomp target for this architecture".to_string(),
    ))
}
