// ABOUTME: Parsing of user@host[:port] addresses into endpoints.
// ABOUTME: Defaults missing users to the local identity and missing ports to 22.

use crate::env::EnvSnapshot;
use crate::error::{Error, Result};
use std::fmt;

/// Default SSH port used when an address carries no explicit port.
pub const DEFAULT_PORT: u16 = 22;

/// A parsed remote endpoint. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    user: String,
    host: String,
    port: u16,
}

impl Endpoint {
    /// Parse a `[user@]host[:port]` address.
    ///
    /// A missing user resolves to the local identity from the snapshot; a
    /// missing port defaults to 22. More than one `@` is rejected.
    pub fn parse(input: &str, env: &EnvSnapshot) -> Result<Self> {
        let (user, host) = match input.split_once('@') {
            None => {
                let user = env
                    .user
                    .as_deref()
                    .filter(|u| !u.is_empty())
                    .ok_or(Error::UnknownIdentity)?;
                (user.to_string(), input)
            }
            Some((user, host)) => {
                if host.contains('@') {
                    return Err(Error::InvalidAddress(input.to_string()));
                }
                (user.to_string(), host)
            }
        };
        Self::from_parts(&user, host)
    }

    /// Build an endpoint from a pre-split user and `host[:port]` pair.
    ///
    /// Normalizes to the same value as [`Endpoint::parse`] on the equivalent
    /// `user@host[:port]` input.
    pub fn from_parts(user: &str, host: &str) -> Result<Self> {
        let (host, port) = match host.rsplit_once(':') {
            None => (host, DEFAULT_PORT),
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| Error::InvalidAddress(format!("{host}:{port}")))?;
                (host, port)
            }
        };
        if host.is_empty() {
            return Err(Error::InvalidAddress(host.to_string()));
        }
        Ok(Self {
            user: user.to_string(),
            host: host.to_string(),
            port,
        })
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The `host:port` string used to dial the remote side.
    pub fn dial_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}
