// ABOUTME: Connection establishment over russh.
// ABOUTME: Dials, verifies the host key, and negotiates credentials in order.

use crate::auth::{Credential, CredentialSource, gather};
use crate::endpoint::Endpoint;
use crate::env::EnvSnapshot;
use crate::error::{Error, Result};
use crate::transport::{RemoteSession, SessionIo, Transport};
use crate::trust::HostTrustStore;
use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::keys::agent::client::AgentClient;
use russh::keys::{PrivateKeyWithHashAlg, ssh_key};
use russh::{Channel, ChannelMsg, Disconnect};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::UnixStream;

/// Configuration for one connection attempt. Built fresh per attempt.
#[derive(Debug)]
pub struct ConnectConfig {
    endpoint: Endpoint,
    env: EnvSnapshot,
    sources: Vec<CredentialSource>,
    trust: Arc<HostTrustStore>,
    /// Timeout applied to the dial only; open sessions are never timed out.
    dial_timeout: Duration,
}

impl ConnectConfig {
    pub fn new(endpoint: Endpoint, env: EnvSnapshot) -> Self {
        let trust = Arc::new(HostTrustStore::from_env(&env));
        Self {
            endpoint,
            env,
            sources: Vec::new(),
            trust,
            dial_timeout: Duration::from_secs(30),
        }
    }

    /// Append a credential source. Order is significant: candidates are
    /// offered in source order, with the agent appended last unless it
    /// appears explicitly.
    pub fn credential(mut self, source: CredentialSource) -> Self {
        self.sources.push(source);
        self
    }

    pub fn trust_store(mut self, store: Arc<HostTrustStore>) -> Self {
        self.trust = store;
        self
    }

    pub fn dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

/// russh client handler delegating host key checks to the trust store.
pub(crate) struct HostCheck {
    host: String,
    port: u16,
    trust: Arc<HostTrustStore>,
}

impl client::Handler for HostCheck {
    type Error = Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        self.trust.verify(&self.host, self.port, server_public_key)?;
        Ok(true)
    }
}

/// An established, authenticated connection.
///
/// Owned by the caller for its lifetime; closing it terminates all derived
/// sessions.
pub struct Connection {
    handle: Handle<HostCheck>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("handle", &"<russh::Handle>")
            .finish()
    }
}

impl Connection {
    /// Connect cooperatively: one dial, offering every candidate credential
    /// in order until the remote side accepts one.
    pub async fn connect(config: ConnectConfig) -> Result<Self> {
        let mut set = gather(&config.sources, &config.env).await?;
        let mut handle = dial(&config).await?;
        for credential in &set.candidates {
            tracing::debug!("offering credential {}", credential.fingerprint());
            if try_credential(&mut handle, config.endpoint.user(), credential, &mut set.agent)
                .await?
            {
                return Ok(Self { handle });
            }
        }
        Err(Error::AuthenticationFailed)
    }

    /// Connect exploratorily: one separate dial per candidate, in order,
    /// stopping at the first that authenticates. Returns the winning
    /// credential alongside the open connection.
    ///
    /// Host key verification and credential rejection both surface as
    /// connection errors from the transport, so finding out which credential
    /// works requires isolating one per attempt.
    pub async fn connect_with_first(config: ConnectConfig) -> Result<(Self, Credential)> {
        let mut set = gather(&config.sources, &config.env).await?;
        let mut attempt = DialAttempt {
            config: &config,
            agent: &mut set.agent,
        };
        first_accepted(&set.candidates, &mut attempt).await
    }

    /// Test connectivity, returning the first credential the remote host
    /// accepts. The connection itself is closed before returning.
    pub async fn probe(config: ConnectConfig) -> Result<Credential> {
        let (connection, credential) = Self::connect_with_first(config).await?;
        if let Err(e) = connection.close().await {
            tracing::debug!("probe disconnect failed: {}", e);
        }
        Ok(credential)
    }

    /// Close the connection.
    pub async fn close(&self) -> Result<()> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(Error::from)
    }
}

/// Dial the endpoint with the configured timeout.
///
/// A [`Error::HostKeyMismatch`] raised during key exchange propagates
/// unchanged; every other failure is a connection error.
async fn dial(config: &ConnectConfig) -> Result<Handle<HostCheck>> {
    // No inactivity timeout: open sessions run until either side ends them.
    let russh_config = Arc::new(client::Config {
        keepalive_interval: Some(Duration::from_secs(30)),
        ..Default::default()
    });
    let handler = HostCheck {
        host: config.endpoint.host().to_string(),
        port: config.endpoint.port(),
        trust: Arc::clone(&config.trust),
    };

    let attempt = client::connect(
        russh_config,
        (config.endpoint.host(), config.endpoint.port()),
        handler,
    );
    match tokio::time::timeout(config.dial_timeout, attempt).await {
        Ok(Ok(handle)) => Ok(handle),
        Ok(Err(e @ Error::HostKeyMismatch { .. })) => Err(e),
        Ok(Err(e)) => Err(Error::Connection(format!(
            "connection to {} failed: {}",
            config.endpoint.dial_addr(),
            e
        ))),
        Err(_) => Err(Error::Connection(format!(
            "connection to {} timed out",
            config.endpoint.dial_addr()
        ))),
    }
}

/// Offer a single credential on an open handle.
async fn try_credential(
    handle: &mut Handle<HostCheck>,
    user: &str,
    credential: &Credential,
    agent: &mut Option<AgentClient<UnixStream>>,
) -> Result<bool> {
    match credential {
        Credential::Key(key) => {
            let hash_alg = handle.best_supported_rsa_hash().await?.flatten();
            let auth = handle
                .authenticate_publickey(user, PrivateKeyWithHashAlg::new(key.clone(), hash_alg))
                .await?;
            Ok(auth.success())
        }
        Credential::AgentKey(key) => {
            let Some(agent) = agent.as_mut() else {
                return Ok(false);
            };
            match handle
                .authenticate_publickey_with(user, key.clone(), None, agent)
                .await
            {
                Ok(auth) if auth.success() => Ok(true),
                Ok(_) => Ok(false),
                Err(e) => {
                    tracing::debug!("agent signing failed: {}", e);
                    Ok(false)
                }
            }
        }
    }
}

/// One isolated connect-plus-authenticate attempt for a single credential.
pub(crate) trait Attempt {
    type Output;

    async fn offer(&mut self, credential: &Credential) -> Result<Self::Output>;
}

/// Try candidates strictly in order, returning the first success with its
/// credential. Per-candidate failures are consumed; a host key mismatch
/// aborts immediately. All candidates failing is [`Error::NoValidCredential`].
pub(crate) async fn first_accepted<A: Attempt>(
    candidates: &[Credential],
    attempt: &mut A,
) -> Result<(A::Output, Credential)> {
    for credential in candidates {
        match attempt.offer(credential).await {
            Ok(output) => return Ok((output, credential.clone())),
            Err(e @ Error::HostKeyMismatch { .. }) => return Err(e),
            Err(e) => {
                tracing::debug!("candidate {} rejected: {}", credential.fingerprint(), e);
            }
        }
    }
    Err(Error::NoValidCredential)
}

struct DialAttempt<'a> {
    config: &'a ConnectConfig,
    agent: &'a mut Option<AgentClient<UnixStream>>,
}

impl Attempt for DialAttempt<'_> {
    type Output = Connection;

    async fn offer(&mut self, credential: &Credential) -> Result<Connection> {
        let mut handle = dial(self.config).await?;
        if try_credential(&mut handle, self.config.endpoint.user(), credential, self.agent).await? {
            Ok(Connection { handle })
        } else {
            Err(Error::AuthenticationFailed)
        }
    }
}

/// A single channel opened from a [`Connection`].
pub struct ChannelSession {
    channel: Channel<client::Msg>,
}

#[async_trait]
impl RemoteSession for ChannelSession {
    async fn request_pty(&mut self, term: &str, cols: u16, rows: u16) -> Result<()> {
        self.channel
            .request_pty(true, term, u32::from(cols), u32::from(rows), 0, 0, &[])
            .await
            .map_err(|e| Error::PtyRequestFailed(e.to_string()))
    }

    async fn run(&mut self, command: &str, io: SessionIo<'_>) -> Result<u32> {
        self.channel.exec(true, command).await?;
        pump(&mut self.channel, io).await
    }

    async fn close(&mut self) -> Result<()> {
        self.channel.close().await.map_err(Error::from)
    }
}

#[async_trait]
impl Transport for Connection {
    type Session = ChannelSession;

    async fn open_session(&self) -> Result<ChannelSession> {
        let channel = self.handle.channel_open_session().await?;
        Ok(ChannelSession { channel })
    }

    async fn close(&self) -> Result<()> {
        Connection::close(self).await
    }
}

/// Relay channel traffic until the remote side reports an exit status.
async fn pump(channel: &mut Channel<client::Msg>, io: SessionIo<'_>) -> Result<u32> {
    let SessionIo {
        stdin,
        mut stdout,
        mut stderr,
    } = io;
    let mut local_stdin = match stdin {
        crate::transport::InputSource::Inherit => Some(tokio::io::stdin()),
        crate::transport::InputSource::Null => None,
    };
    let mut stdin_open = local_stdin.is_some();
    let mut buf = vec![0u8; 8192];
    let mut exit_status = None;
    let mut got_eof = false;

    loop {
        tokio::select! {
            read = read_local(&mut local_stdin, &mut buf), if stdin_open => match read {
                Ok(0) | Err(_) => {
                    stdin_open = false;
                    let _ = channel.eof().await;
                }
                Ok(n) => {
                    if let Err(e) = channel.data(&buf[..n]).await {
                        tracing::debug!("channel write error: {}", e);
                        stdin_open = false;
                    }
                }
            },
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { data }) => stdout.write(&data).await?,
                Some(ChannelMsg::ExtendedData { data, ext }) if ext == 1 => {
                    stderr.write(&data).await?;
                }
                Some(ChannelMsg::ExitStatus { exit_status: status }) => {
                    exit_status = Some(status);
                    if got_eof {
                        break;
                    }
                }
                Some(ChannelMsg::Eof) => {
                    got_eof = true;
                    if exit_status.is_some() {
                        break;
                    }
                }
                Some(ChannelMsg::Close) => break,
                Some(_) => {}
                None => break,
            },
        }
    }

    exit_status.ok_or(Error::SessionEnded)
}

async fn read_local(stdin: &mut Option<tokio::io::Stdin>, buf: &mut [u8]) -> std::io::Result<usize> {
    match stdin {
        Some(stdin) => stdin.read(buf).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use russh::keys::ssh_key::PublicKey;

    const KEY_A: &str =
        "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAII7T9q1oW5WerXAiUY4a92zYFvjo7HzN2h7UAY6PIiP4 a";
    const KEY_B: &str =
        "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIPFEppB9xChNH5/mp9m5/1PALB0HumjyTUE9f/f3V6eC b";
    const KEY_C: &str =
        "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAILndlgwXU0WaeBFdPLhFpX2SS2h36AWwi9AQhszfNEM8 c";

    fn candidates() -> Vec<Credential> {
        [KEY_A, KEY_B, KEY_C]
            .iter()
            .map(|text| Credential::AgentKey(PublicKey::from_openssh(text).unwrap()))
            .collect()
    }

    /// Accepts the candidate at `accept_index`, counting every attempt.
    struct ScriptedAttempt {
        accept_index: Option<usize>,
        attempts: usize,
        mismatch_at: Option<usize>,
    }

    impl Attempt for ScriptedAttempt {
        type Output = usize;

        async fn offer(&mut self, _credential: &Credential) -> Result<usize> {
            let index = self.attempts;
            self.attempts += 1;
            if self.mismatch_at == Some(index) {
                return Err(Error::HostKeyMismatch {
                    host: "example.com".to_string(),
                });
            }
            if self.accept_index == Some(index) {
                Ok(index)
            } else {
                Err(Error::AuthenticationFailed)
            }
        }
    }

    #[tokio::test]
    async fn stops_at_first_accepted_candidate_in_order() {
        let candidates = candidates();
        let mut attempt = ScriptedAttempt {
            accept_index: Some(1),
            attempts: 0,
            mismatch_at: None,
        };

        let (index, credential) = first_accepted(&candidates, &mut attempt).await.unwrap();

        assert_eq!(index, 1);
        assert_eq!(attempt.attempts, 2, "must stop after the accepted candidate");
        assert_eq!(credential.fingerprint(), candidates[1].fingerprint());
    }

    #[tokio::test]
    async fn all_rejected_yields_no_valid_credential() {
        let candidates = candidates();
        let mut attempt = ScriptedAttempt {
            accept_index: None,
            attempts: 0,
            mismatch_at: None,
        };

        let err = first_accepted(&candidates, &mut attempt).await.unwrap_err();

        assert!(matches!(err, Error::NoValidCredential));
        assert_eq!(attempt.attempts, 3);
    }

    #[tokio::test]
    async fn empty_candidate_list_yields_no_valid_credential() {
        let mut attempt = ScriptedAttempt {
            accept_index: None,
            attempts: 0,
            mismatch_at: None,
        };

        let err = first_accepted(&[], &mut attempt).await.unwrap_err();
        assert!(matches!(err, Error::NoValidCredential));
    }

    #[tokio::test]
    async fn host_key_mismatch_aborts_the_trial_loop() {
        let candidates = candidates();
        let mut attempt = ScriptedAttempt {
            accept_index: Some(2),
            attempts: 0,
            mismatch_at: Some(0),
        };

        let err = first_accepted(&candidates, &mut attempt).await.unwrap_err();

        assert!(matches!(err, Error::HostKeyMismatch { .. }));
        assert_eq!(attempt.attempts, 1, "mismatch must not be retried");
    }
}
