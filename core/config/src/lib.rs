//! warren Configuration
//!
//! Every operational knob of the harness lives here as a compiled-in
//! default. There is no command-line surface and no environment-variable
//! surface: an attacker who controls the environment of the launching shell
//! must not be able to repoint the proxy endpoint or relax the sandbox.

use std::path::PathBuf;

/// How the contained process reaches the network, if at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkMode {
    /// Enter a private network scope with no redirector. The contained
    /// process ends up with loopback only and no outbound path at all.
    Simple,
    /// Spawn the redirector first, wait for its readiness signal, then
    /// enter the private network scope. The redirector's listening socket
    /// in the sandbox directory is the sole outbound path.
    WithRedirector,
}

/// Harness configuration. All values are compile-time defaults passed to the
/// bootstrap by value; nothing rereads them at runtime.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Proxy host, resolved once during redirector initialization.
    /// Must resolve to exactly one IPv4 address.
    pub proxy_host: String,
    /// Proxy TCP port.
    pub proxy_port: u16,
    /// Network containment mode.
    pub network_mode: NetworkMode,
    /// Sandbox directory, relative to the working directory at launch.
    /// Becomes `/` for the contained process.
    pub sandbox_dir: PathBuf,
    /// Log file name inside the sandbox directory.
    pub log_file: String,
    /// Control socket name inside the sandbox directory.
    pub control_socket: String,
    /// Redirector socket name inside the sandbox directory.
    pub redirector_socket: String,
    /// Front-end executable to spawn with the control token as its only
    /// argument, or `None` to run headless.
    pub frontend: Option<PathBuf>,
    /// Listen backlog for both local-domain listeners.
    pub listen_backlog: i32,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            proxy_host: "127.0.0.1".to_string(),
            proxy_port: 9050,
            network_mode: NetworkMode::WithRedirector,
            sandbox_dir: PathBuf::from("sandbox"),
            log_file: "log".to_string(),
            control_socket: "control.sock".to_string(),
            redirector_socket: "redirector.sock".to_string(),
            frontend: None,
            listen_backlog: 20,
        }
    }
}

impl HarnessConfig {
    /// Log file path as seen before the filesystem pivot.
    pub fn log_path(&self) -> PathBuf {
        self.sandbox_dir.join(&self.log_file)
    }

    /// Control socket path as seen before the pivot (and by the front end,
    /// which never pivots).
    pub fn control_socket_path(&self) -> PathBuf {
        self.sandbox_dir.join(&self.control_socket)
    }

    /// Redirector socket path as seen after the pivot, when the sandbox
    /// directory has become `/`. Both the redirector and the contained
    /// process run post-pivot, so this is the only form either uses.
    pub fn redirector_socket_path(&self) -> PathBuf {
        PathBuf::from("/").join(&self.redirector_socket)
    }

    /// Panic if any value would weaken the containment guarantees.
    /// Called once at the top of bootstrap.
    pub fn verify_secure(&self) {
        assert!(self.proxy_port != 0, "proxy port must be set");
        assert!(!self.proxy_host.is_empty(), "proxy host must be set");
        assert!(
            self.sandbox_dir.is_relative(),
            "sandbox directory must be relative to the launch directory"
        );
        assert!(!self.log_file.is_empty(), "log file name must be set");
        assert!(
            !self.control_socket.is_empty() && !self.redirector_socket.is_empty(),
            "socket names must be set"
        );
        assert!(
            self.control_socket != self.redirector_socket,
            "control and redirector sockets must not collide"
        );
        assert!(self.listen_backlog > 0, "listen backlog must be positive");
    }
}
