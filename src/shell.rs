// ABOUTME: Interactive login shells and one-shot shell commands.
// ABOUTME: Owns local raw mode for the session and restores it on every exit path.

use crate::env::EnvSnapshot;
use crate::error::{Error, Result};
use crate::transport::{RemoteSession, SessionIo, Transport};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::path::{Component, Path};
use std::sync::atomic::{AtomicBool, Ordering};

/// Conventional exit status of a process terminated by SIGINT. The user
/// interrupting their own shell is a normal way to leave it, not a failure.
const SIGINT_EXIT_STATUS: u32 = 130;

/// Raw mode is process-wide; only one shell holds it at a time.
static RAW_MODE_ACTIVE: AtomicBool = AtomicBool::new(false);

/// A remote shell in a working directory, optionally running a one-shot
/// command instead of an interactive terminal.
#[derive(Debug, Clone)]
pub struct Shell {
    dir: String,
    args: Vec<String>,
    env: EnvSnapshot,
}

impl Shell {
    pub fn new(dir: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            args: Vec::new(),
            env: EnvSnapshot::capture(),
        }
    }

    /// One-shot command to run instead of an interactive shell. When any
    /// arguments are given, no pseudo-terminal is allocated.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn env(mut self, env: EnvSnapshot) -> Self {
        self.env = env;
        self
    }

    /// Run the shell over the given connection.
    pub async fn run<T: Transport>(&self, connection: &T) -> Result<()> {
        validate_dir(&self.dir)?;
        let mut session = connection.open_session().await?;
        let result = self.drive(&mut session).await;
        if let Err(e) = session.close().await {
            tracing::debug!("session close failed: {}", e);
        }
        result
    }

    async fn drive<S: RemoteSession>(&self, session: &mut S) -> Result<()> {
        if !self.args.is_empty() {
            let status = session
                .run(&command_line(&self.dir, &self.args), SessionIo::interactive())
                .await?;
            return translate_exit(status);
        }

        // Raw mode is restored by the guard on success, error, and panic.
        let _raw = RawModeGuard::enter()?;
        let (cols, rows) = crossterm::terminal::size()?;
        session
            .request_pty(self.env.term_or_default(), cols, rows)
            .await?;
        let status = session
            .run(&command_line(&self.dir, &[]), SessionIo::interactive())
            .await?;
        translate_exit(status)
    }
}

fn translate_exit(status: u32) -> Result<()> {
    match status {
        0 | SIGINT_EXIT_STATUS => Ok(()),
        status => Err(Error::RemoteExit(status)),
    }
}

/// The remote invocation string. The directory and arguments are
/// shell-interpolated; callers escape values needing quoting.
fn command_line(dir: &str, args: &[String]) -> String {
    if args.is_empty() {
        format!("cd {dir} && exec $SHELL")
    } else {
        format!("cd {dir} && exec $SHELL -c {:?}", args.join(" "))
    }
}

/// Structural validation only: the directory must be a non-empty relative or
/// absolute path without parent-directory components.
fn validate_dir(dir: &str) -> Result<()> {
    let well_formed = !dir.is_empty()
        && !dir.contains('\0')
        && Path::new(dir)
            .components()
            .all(|c| !matches!(c, Component::ParentDir));
    if !well_formed {
        return Err(Error::InvalidDirectory(dir.to_string()));
    }
    Ok(())
}

/// Puts the local terminal into raw mode if no other shell holds it, and
/// restores it on drop.
struct RawModeGuard {
    owned: bool,
}

impl RawModeGuard {
    fn enter() -> Result<Self> {
        if RAW_MODE_ACTIVE
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(Self { owned: false });
        }
        if let Err(e) = enable_raw_mode() {
            RAW_MODE_ACTIVE.store(false, Ordering::SeqCst);
            return Err(e.into());
        }
        Ok(Self { owned: true })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.owned {
            if let Err(e) = disable_raw_mode() {
                tracing::warn!("could not restore terminal state: {}", e);
            }
            RAW_MODE_ACTIVE.store(false, Ordering::SeqCst);
        }
    }
}
