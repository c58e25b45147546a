// ABOUTME: Credential sources and discovery for authentication.
// ABOUTME: Composes agent-held keys, in-memory keys, and key files in caller order.

use crate::env::EnvSnapshot;
use crate::error::{Error, Result};
use russh::keys::agent::client::AgentClient;
use russh::keys::load_secret_key;
use russh::keys::ssh_key::{HashAlg, PrivateKey, PublicKey};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::UnixStream;

/// Filenames probed under `~/.ssh` when no explicit key is given.
const DEFAULT_KEY_NAMES: [&str; 3] = ["id_ed25519", "id_rsa", "id_ecdsa"];

/// One provider of signing credentials. Ordering among sources is
/// caller-controlled and significant: candidates are offered in the order
/// their sources appear.
#[derive(Debug, Clone)]
pub enum CredentialSource {
    /// Keys held by the ssh-agent advertised in the environment. An
    /// unreachable agent contributes nothing rather than failing.
    Agent,
    /// A caller-supplied in-memory private key.
    Static(Arc<PrivateKey>),
    /// A private key loaded from an explicit path. Load failure is an error.
    KeyFile(PathBuf),
    /// The conventional `~/.ssh/id_*` key files; unloadable ones are skipped.
    DefaultKeys,
}

/// A single candidate credential.
#[derive(Clone)]
pub enum Credential {
    /// An in-memory private key.
    Key(Arc<PrivateKey>),
    /// An agent-held identity; signing is delegated to the agent.
    AgentKey(PublicKey),
}

impl Credential {
    /// SHA-256 fingerprint of the credential's public key.
    pub fn fingerprint(&self) -> String {
        match self {
            Self::Key(key) => key.fingerprint(HashAlg::Sha256).to_string(),
            Self::AgentKey(key) => key.fingerprint(HashAlg::Sha256).to_string(),
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Key(_) => write!(f, "Credential::Key({})", self.fingerprint()),
            Self::AgentKey(_) => write!(f, "Credential::AgentKey({})", self.fingerprint()),
        }
    }
}

/// Credentials expanded from an ordered source list, plus the agent client
/// needed to sign for any agent-held identities.
pub(crate) struct CredentialSet {
    pub candidates: Vec<Credential>,
    pub agent: Option<AgentClient<UnixStream>>,
}

impl std::fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialSet")
            .field("candidates", &self.candidates)
            .field("agent", &self.agent.is_some())
            .finish()
    }
}

/// Expand sources into candidates, preserving source order.
///
/// If no [`CredentialSource::Agent`] appears in the list, the agent
/// contribution is appended after all caller-supplied sources.
pub(crate) async fn gather(sources: &[CredentialSource], env: &EnvSnapshot) -> Result<CredentialSet> {
    let mut set = CredentialSet {
        candidates: Vec::new(),
        agent: None,
    };

    for source in sources {
        match source {
            CredentialSource::Static(key) => set.candidates.push(Credential::Key(key.clone())),
            CredentialSource::KeyFile(path) => {
                let key = load_secret_key(path, None).map_err(|e| Error::KeyLoadFailed {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
                set.candidates.push(Credential::Key(Arc::new(key)));
            }
            CredentialSource::DefaultKeys => gather_default_keys(env, &mut set.candidates),
            CredentialSource::Agent => gather_agent(env, &mut set).await,
        }
    }

    if !sources.iter().any(|s| matches!(s, CredentialSource::Agent)) {
        gather_agent(env, &mut set).await;
    }

    Ok(set)
}

fn gather_default_keys(env: &EnvSnapshot, candidates: &mut Vec<Credential>) {
    let Some(home) = &env.home else {
        tracing::debug!("no home directory; skipping default key locations");
        return;
    };
    for name in DEFAULT_KEY_NAMES {
        let path = home.join(".ssh").join(name);
        match load_secret_key(&path, None) {
            Ok(key) => candidates.push(Credential::Key(Arc::new(key))),
            Err(e) => tracing::debug!("skipping {}: {}", path.display(), e),
        }
    }
}

/// Query the agent for its identities. Any failure along the way yields an
/// empty contribution; a missing or dead agent is not an error.
async fn gather_agent(env: &EnvSnapshot, set: &mut CredentialSet) {
    if set.agent.is_some() {
        return;
    }
    let Some(socket) = &env.agent_socket else {
        tracing::debug!("no agent socket in environment");
        return;
    };
    let mut agent = match AgentClient::connect_uds(socket).await {
        Ok(agent) => agent,
        Err(e) => {
            tracing::debug!("could not reach ssh-agent at {}: {}", socket.display(), e);
            return;
        }
    };
    match agent.request_identities().await {
        Ok(keys) => {
            tracing::debug!("agent offered {} key(s)", keys.len());
            set.candidates
                .extend(keys.into_iter().map(Credential::AgentKey));
            set.agent = Some(agent);
        }
        Err(e) => tracing::debug!("could not list agent keys: {}", e),
    }
}
