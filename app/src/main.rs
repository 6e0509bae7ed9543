//! warren: a sandbox harness that leaves one way out.
//!
//! A single executable builds two cooperating processes: the contained
//! process, stripped of every scope and capability it does not need, and
//! the redirector, which relays the contained process's local-domain
//! streams to a preconfigured SOCKS5 proxy and nowhere else.
//!
//! The bootstrap sequence below is load-bearing; reordering it breaks at
//! least one containment invariant. Everything up to the filesystem pivot
//! may log to stderr; afterwards only the log file inside the sandbox is
//! reachable.

use std::convert::Infallible;
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::process::Command;

use anyhow::Context;

use warren_config::HarnessConfig;
use warren_network::control::{ControlChannel, ControlToken};
use warren_network::redirector;
use warren_sandbox::{caps, fs, ipc, name};
use warren_sandbox::{isolate_network, spawn_contained, FilterPolicy};
use warren_secmem::{harden_process, EntropySource};

mod logger;

fn main() {
    // No flags, no environment: configuration is compiled in.
    let config = HarnessConfig::default();

    match bootstrap(config) {
        Ok(status) => std::process::exit(status),
        Err(err) => {
            // The single human-readable failure line the interface promises.
            eprintln!("warren: bootstrap failed: {err:#}");
            std::process::exit(1);
        }
    }
}

/// Pre-isolation side effects, in the fixed order, then the hand-off to the
/// contained entry point. Returns the contained process's exit status.
fn bootstrap(config: HarnessConfig) -> anyhow::Result<i32> {
    config.verify_secure();

    harden_process().context("disabling core dumps and swap")?;

    fs::prepare_sandbox_dir(&config.sandbox_dir).context("preparing sandbox directory")?;

    logger::init(&config.log_path()).context("initializing logger")?;
    log::info!("bootstrap started");

    // The entropy handle must exist before the pivot removes /dev/urandom.
    let mut entropy = EntropySource::open().context("opening entropy source")?;

    let token = ControlToken::mint(&mut entropy).context("minting control token")?;
    let control = ControlChannel::bind(
        &config.control_socket_path(),
        config.listen_backlog,
        token,
    )
    .context("binding control channel")?;

    spawn_frontend(&config, control.token()).context("spawning front end")?;

    let status = spawn_contained(move || contained_main(&config, &control))
        .context("spawning contained process")?;

    log::info!("contained process exited with status {status}");
    Ok(status)
}

/// Hand the front end the token as its only argument. The token is the
/// front end's sole credential for the control channel; nothing else about
/// the harness is shared with it.
fn spawn_frontend(config: &HarnessConfig, token: &ControlToken) -> anyhow::Result<()> {
    let Some(frontend) = &config.frontend else {
        log::info!("no front end configured, running headless");
        return Ok(());
    };

    Command::new(frontend)
        .arg(OsStr::from_bytes(token.as_bytes()))
        .spawn()
        .with_context(|| format!("launching {}", frontend.display()))?;

    log::info!("front end {} launched", frontend.display());
    Ok(())
}

/// First function of the contained process. By the time `serve` takes over,
/// all five scopes are private, the bootstrap capabilities are gone, and
/// the contained-role filter is armed.
fn contained_main(config: &HarnessConfig, control: &ControlChannel) -> i32 {
    match isolate_and_serve(config, control) {
        Ok(never) => match never {},
        Err(err) => {
            log::error!("containment failed: {err:#}");
            1
        }
    }
}

fn isolate_and_serve(
    config: &HarnessConfig,
    control: &ControlChannel,
) -> anyhow::Result<Infallible> {
    fs::pivot_into(&config.sandbox_dir, true).context("filesystem scope")?;

    name::isolate().context("name scope")?;

    ipc::isolate().context("ipc scope")?;

    // Neither the session listener here nor the redirector ever waits on
    // the children it forks; let the kernel reap them. Must happen before
    // the filters arm, which close off rt_sigaction. The redirector
    // inherits the disposition through the clone below.
    unsafe { libc::signal(libc::SIGCHLD, libc::SIG_IGN) };

    // The redirector is cloned inside: it inherits the pivoted root and the
    // private name and IPC scopes, but keeps the host network scope.
    let redirector_config = config.clone();
    isolate_network(config.network_mode, move |ready| {
        redirector::run(&redirector_config, ready)
    })
    .context("network scope")?;

    // Capabilities go before the filter: capset is not on the allow-list.
    caps::drop_bootstrap_caps().context("capability drop")?;

    FilterPolicy::contained()
        .context("building contained filter")?
        .install()
        .context("installing contained filter")?;

    log::info!("containment complete, serving control sessions");
    control.serve()
}
