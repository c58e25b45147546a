// ABOUTME: Library root for tether - client-side SSH connection and session management.
// ABOUTME: Turns user@host[:port] plus credentials into authenticated sessions.

pub mod auth;
pub mod command;
pub mod connect;
pub mod endpoint;
pub mod env;
pub mod error;
pub mod shell;
pub mod transport;
pub mod trust;

pub use auth::{Credential, CredentialSource};
pub use command::{exec, run};
pub use connect::{ConnectConfig, Connection};
pub use endpoint::Endpoint;
pub use env::EnvSnapshot;
pub use error::{Error, Result};
pub use shell::Shell;
pub use transport::{InputSource, OutputSink, RemoteSession, SessionIo, Transport};
pub use trust::{HostTrustStore, TrustMode};
