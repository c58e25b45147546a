// ABOUTME: Non-interactive remote command execution.
// ABOUTME: One session per command, closed on every path.

use crate::error::{Error, Result};
use crate::transport::{RemoteSession, SessionIo, Transport};

/// Run a command and capture its standard output.
///
/// The remote standard-error stream goes to the local standard error so
/// diagnostics stay visible. Trailing newlines are stripped from the captured
/// output. A non-zero exit status is an error.
pub async fn run<T: Transport>(connection: &T, command: &str) -> Result<String> {
    let mut captured = Vec::new();
    let status = with_session(connection, command, SessionIo::capture(&mut captured)).await?;
    if status != 0 {
        return Err(Error::RemoteExit(status));
    }
    let stdout = String::from_utf8_lossy(&captured);
    Ok(stdout.trim_end_matches('\n').to_string())
}

/// Run a command, streaming both remote streams to their local equivalents.
pub async fn exec<T: Transport>(connection: &T, command: &str) -> Result<()> {
    let status = with_session(connection, command, SessionIo::inherit()).await?;
    if status != 0 {
        return Err(Error::RemoteExit(status));
    }
    Ok(())
}

/// Open a session, run the command, and close the session on every path.
async fn with_session<T: Transport>(
    connection: &T,
    command: &str,
    io: SessionIo<'_>,
) -> Result<u32> {
    let mut session = connection.open_session().await?;
    let result = session.run(command, io).await;
    if let Err(e) = session.close().await {
        tracing::debug!("session close failed: {}", e);
    }
    result
}
