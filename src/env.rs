// ABOUTME: Snapshot of the ambient process environment.
// ABOUTME: Captured once so connections and tests see a fixed set of values.

use std::env;
use std::path::PathBuf;

/// The ambient environment values this crate reads, captured as a plain value.
///
/// Entry points take a snapshot instead of reading the process environment
/// directly, so tests can supply deterministic values without mutating global
/// state.
#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    /// Local username, used when an address carries no `user@` prefix.
    pub user: Option<String>,
    /// Path to the ssh-agent socket, if an agent is advertised.
    pub agent_socket: Option<PathBuf>,
    /// Terminal type for pty requests.
    pub term: Option<String>,
    /// Home directory, used to locate keys and the known_hosts file.
    pub home: Option<PathBuf>,
}

impl EnvSnapshot {
    /// Capture the current process environment.
    pub fn capture() -> Self {
        Self {
            user: env::var("USER").ok().or_else(|| env::var("LOGNAME").ok()),
            agent_socket: env::var("SSH_AUTH_SOCK")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            term: env::var("TERM").ok().filter(|t| !t.is_empty()),
            home: env::var("HOME").ok().filter(|h| !h.is_empty()).map(PathBuf::from),
        }
    }

    /// Terminal type to request, defaulting to `xterm-256color`.
    pub fn term_or_default(&self) -> &str {
        self.term.as_deref().unwrap_or("xterm-256color")
    }

    /// Conventional location of the known_hosts file.
    pub fn known_hosts_path(&self) -> Option<PathBuf> {
        self.home.as_ref().map(|h| h.join(".ssh").join("known_hosts"))
    }
}
