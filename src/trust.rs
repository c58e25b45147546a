// ABOUTME: Trust-on-first-use host key verification backed by a known_hosts file.
// ABOUTME: Unknown hosts are learned, changed keys are a hard failure.

use crate::env::EnvSnapshot;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use russh::keys::ssh_key::{HashAlg, PublicKey};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// One trusted host identity loaded from the store.
#[derive(Debug, Clone)]
struct TrustRecord {
    /// Comma-separated host patterns from the entry, pre-split.
    patterns: Vec<String>,
    key: PublicKey,
}

/// Whether the store could be loaded, or verification is degraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustMode {
    /// Records were loaded; unknown hosts are learned, changed keys rejected.
    TrustOnFirstUse,
    /// The store was absent or unreadable; every key is accepted.
    ///
    /// This is an explicit degraded mode. Callers that care should check
    /// [`HostTrustStore::is_insecure`] before connecting.
    InsecureAcceptAll,
}

/// Host key verifier with trust-on-first-use semantics.
///
/// Records are loaded once at construction. Newly accepted hosts are
/// remembered in memory and appended to the backing file best-effort; an
/// append failure never fails the connection. A changed key for a known host
/// always fails verification, and the store never rewrites existing entries.
pub struct HostTrustStore {
    path: PathBuf,
    mode: TrustMode,
    records: Mutex<Vec<TrustRecord>>,
}

impl std::fmt::Debug for HostTrustStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostTrustStore")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("records", &self.records.lock().len())
            .finish()
    }
}

impl HostTrustStore {
    /// Load the store from the given known_hosts file.
    ///
    /// An absent or unreadable file degrades to [`TrustMode::InsecureAcceptAll`]
    /// rather than failing, matching the historical behavior of accepting any
    /// host when no store is available. The degradation is logged and
    /// observable via [`HostTrustStore::is_insecure`].
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                let records = parse_known_hosts(&contents);
                tracing::debug!(
                    "loaded {} known host record(s) from {}",
                    records.len(),
                    path.display()
                );
                Self {
                    path,
                    mode: TrustMode::TrustOnFirstUse,
                    records: Mutex::new(records),
                }
            }
            Err(e) => {
                tracing::warn!(
                    "could not read known hosts file {}: {}; host key verification disabled",
                    path.display(),
                    e
                );
                Self {
                    path,
                    mode: TrustMode::InsecureAcceptAll,
                    records: Mutex::new(Vec::new()),
                }
            }
        }
    }

    /// Load the store from the conventional `~/.ssh/known_hosts` location.
    pub fn from_env(env: &EnvSnapshot) -> Self {
        match env.known_hosts_path() {
            Some(path) => Self::load(path),
            None => {
                tracing::warn!(
                    "no home directory in environment; host key verification disabled"
                );
                Self {
                    path: PathBuf::new(),
                    mode: TrustMode::InsecureAcceptAll,
                    records: Mutex::new(Vec::new()),
                }
            }
        }
    }

    pub fn mode(&self) -> TrustMode {
        self.mode
    }

    /// True when the store is running without a readable backing file and
    /// accepts any host key.
    pub fn is_insecure(&self) -> bool {
        self.mode == TrustMode::InsecureAcceptAll
    }

    /// Verify a host key, learning unknown hosts.
    ///
    /// Returns `Ok(())` for a known matching key or a newly learned host, and
    /// [`Error::HostKeyMismatch`] when a record exists with a different key.
    pub fn verify(&self, host: &str, port: u16, key: &PublicKey) -> Result<()> {
        let name = entry_name(host, port);

        if self.is_insecure() {
            tracing::warn!(
                "accepting key {} for {} without verification",
                key.fingerprint(HashAlg::Sha256),
                name
            );
            return Ok(());
        }

        let mut records = self.records.lock();
        let mut known_host = false;
        for record in records.iter() {
            if !record.patterns.iter().any(|p| p == &name) {
                continue;
            }
            known_host = true;
            if record.key.key_data() == key.key_data() {
                return Ok(());
            }
        }

        if known_host {
            tracing::warn!(
                "host key for {} changed to {}; refusing connection",
                name,
                key.fingerprint(HashAlg::Sha256)
            );
            return Err(Error::HostKeyMismatch { host: name });
        }

        tracing::warn!(
            "trusting new host {} with key {}",
            name,
            key.fingerprint(HashAlg::Sha256)
        );
        records.push(TrustRecord {
            patterns: vec![name.clone()],
            key: key.clone(),
        });
        if let Err(e) = append_record(&self.path, &name, key) {
            tracing::warn!(
                "could not record host key for {} in {}: {}",
                name,
                self.path.display(),
                e
            );
        }
        Ok(())
    }
}

/// known_hosts entry name: plain hostname on the default port, bracketed
/// `[host]:port` otherwise, matching OpenSSH.
fn entry_name(host: &str, port: u16) -> String {
    if port == crate::endpoint::DEFAULT_PORT {
        host.to_string()
    } else {
        format!("[{host}]:{port}")
    }
}

fn parse_known_hosts(contents: &str) -> Vec<TrustRecord> {
    let mut records = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        // Skip comments, markers (@cert-authority, @revoked) and hashed
        // entries; they stay in the file untouched but are never matched.
        if line.is_empty() || line.starts_with('#') || line.starts_with('@') || line.starts_with('|')
        {
            continue;
        }
        let Some((hosts, key_text)) = line.split_once(char::is_whitespace) else {
            continue;
        };
        match PublicKey::from_openssh(key_text.trim()) {
            Ok(key) => records.push(TrustRecord {
                patterns: hosts.split(',').map(str::to_string).collect(),
                key,
            }),
            Err(e) => tracing::debug!("skipping unparseable known hosts entry: {}", e),
        }
    }
    records
}

/// Append one entry with a single write so a concurrent reader never sees a
/// half-written record.
fn append_record(path: &Path, name: &str, key: &PublicKey) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let key_text = key.to_openssh().map_err(russh::keys::Error::from)?;
    let line = format!("{name} {key_text}\n");
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_A: &str =
        "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAII7T9q1oW5WerXAiUY4a92zYFvjo7HzN2h7UAY6PIiP4";
    const KEY_B: &str =
        "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIPFEppB9xChNH5/mp9m5/1PALB0HumjyTUE9f/f3V6eC";

    fn key(text: &str) -> PublicKey {
        PublicKey::from_openssh(text).unwrap()
    }

    fn store_with(contents: &str) -> (tempfile::TempDir, HostTrustStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_hosts");
        std::fs::write(&path, contents).unwrap();
        let store = HostTrustStore::load(&path);
        (dir, store)
    }

    #[test]
    fn unknown_host_is_learned_and_persisted_once() {
        let (dir, store) = store_with("");
        assert!(!store.is_insecure());

        store.verify("example.com", 22, &key(KEY_A)).unwrap();
        let written = std::fs::read_to_string(dir.path().join("known_hosts")).unwrap();
        assert_eq!(written, format!("example.com {KEY_A}\n"));

        // Second verification matches the learned record without mutation.
        store.verify("example.com", 22, &key(KEY_A)).unwrap();
        let written = std::fs::read_to_string(dir.path().join("known_hosts")).unwrap();
        assert_eq!(written.lines().count(), 1);
    }

    #[test]
    fn matching_key_is_accepted_without_mutation() {
        let (dir, store) = store_with(&format!("example.com {KEY_A}\n"));

        store.verify("example.com", 22, &key(KEY_A)).unwrap();
        let written = std::fs::read_to_string(dir.path().join("known_hosts")).unwrap();
        assert_eq!(written.lines().count(), 1);
    }

    #[test]
    fn changed_key_is_a_hard_failure_without_mutation() {
        let (dir, store) = store_with(&format!("example.com {KEY_A}\n"));

        let err = store.verify("example.com", 22, &key(KEY_B)).unwrap_err();
        assert!(matches!(err, Error::HostKeyMismatch { .. }));
        let written = std::fs::read_to_string(dir.path().join("known_hosts")).unwrap();
        assert_eq!(written, format!("example.com {KEY_A}\n"));
    }

    #[test]
    fn nonstandard_port_uses_bracketed_entry() {
        let (dir, store) = store_with("");

        store.verify("example.com", 2222, &key(KEY_A)).unwrap();
        let written = std::fs::read_to_string(dir.path().join("known_hosts")).unwrap();
        assert_eq!(written, format!("[example.com]:2222 {KEY_A}\n"));

        // The bracketed entry round-trips through a reload.
        let reloaded = HostTrustStore::load(dir.path().join("known_hosts"));
        reloaded.verify("example.com", 2222, &key(KEY_A)).unwrap();
        let err = reloaded.verify("example.com", 2222, &key(KEY_B)).unwrap_err();
        assert!(matches!(err, Error::HostKeyMismatch { .. }));
    }

    #[test]
    fn absent_file_degrades_to_insecure_accept_all() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing");
        let store = HostTrustStore::load(&path);

        assert!(store.is_insecure());
        assert_eq!(store.mode(), TrustMode::InsecureAcceptAll);
        store.verify("anything", 22, &key(KEY_A)).unwrap();
        store.verify("anything", 22, &key(KEY_B)).unwrap();
        // Degraded mode never writes to the store.
        assert!(!path.exists());
    }

    #[test]
    fn external_entries_with_comments_and_markers_are_tolerated() {
        let contents = format!(
            "# managed externally\n\
             @revoked example.org {KEY_B}\n\
             |1|hashedhash= {KEY_B}\n\
             example.com,alias.example.com {KEY_A} ops@bastion\n"
        );
        let (_dir, store) = store_with(&contents);

        store.verify("alias.example.com", 22, &key(KEY_A)).unwrap();
        let err = store.verify("example.com", 22, &key(KEY_B)).unwrap_err();
        assert!(matches!(err, Error::HostKeyMismatch { .. }));
    }

    #[test]
    fn append_failure_does_not_fail_verification() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_hosts");
        std::fs::write(&path, "").unwrap();
        let store = HostTrustStore::load(&path);

        // Make the file unwritable; the learned host is still accepted.
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_readonly(true);
        std::fs::set_permissions(&path, perms).unwrap();

        store.verify("example.com", 22, &key(KEY_A)).unwrap();
    }
}
