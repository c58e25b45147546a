// ABOUTME: Error types for connection establishment and remote sessions.
// ABOUTME: Covers address parsing, authentication, host keys, and session failures.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid user@host[:port] address: {0:?}")]
    InvalidAddress(String),

    #[error("could not determine local username")]
    UnknownIdentity,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("authentication failed: all credentials rejected")]
    AuthenticationFailed,

    #[error("no credential was accepted by the remote host")]
    NoValidCredential,

    #[error("host key mismatch for {host}: remote identity changed")]
    HostKeyMismatch { host: String },

    #[error("failed to load key from {path}: {reason}")]
    KeyLoadFailed { path: PathBuf, reason: String },

    #[error("invalid directory: {0:?}")]
    InvalidDirectory(String),

    #[error("could not request pty: {0}")]
    PtyRequestFailed(String),

    #[error("remote command exited with status {0}")]
    RemoteExit(u32),

    #[error("session ended unexpectedly without exit status")]
    SessionEnded,

    #[error("SSH protocol error: {0}")]
    Protocol(#[from] russh::Error),

    #[error("SSH key error: {0}")]
    Key(#[from] russh::keys::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
