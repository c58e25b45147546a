// ABOUTME: Capability traits this crate needs from the transport library.
// ABOUTME: Lets command and shell code run against fakes in tests.

use crate::error::Result;
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

/// Where a session's remote input comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSource {
    /// No input; the remote side sees EOF.
    Null,
    /// Local standard input is streamed to the remote side.
    Inherit,
}

/// Where a remote output stream goes.
pub enum OutputSink<'a> {
    /// Collected into the given buffer.
    Capture(&'a mut Vec<u8>),
    /// Streamed to local standard output.
    Stdout,
    /// Streamed to local standard error.
    Stderr,
    /// Dropped.
    Discard,
}

impl OutputSink<'_> {
    /// Deliver one chunk of remote output.
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Self::Capture(buf) => buf.extend_from_slice(data),
            Self::Stdout => {
                let mut out = tokio::io::stdout();
                out.write_all(data).await?;
                out.flush().await?;
            }
            Self::Stderr => {
                let mut err = tokio::io::stderr();
                err.write_all(data).await?;
                err.flush().await?;
            }
            Self::Discard => {}
        }
        Ok(())
    }
}

/// Stream wiring for one session run.
pub struct SessionIo<'a> {
    pub stdin: InputSource,
    pub stdout: OutputSink<'a>,
    pub stderr: OutputSink<'a>,
}

impl<'a> SessionIo<'a> {
    /// Capture stdout into `buf`, stream stderr to the local stderr.
    pub fn capture(buf: &'a mut Vec<u8>) -> Self {
        Self {
            stdin: InputSource::Null,
            stdout: OutputSink::Capture(buf),
            stderr: OutputSink::Stderr,
        }
    }

    /// Stream both remote streams to their local equivalents.
    pub fn inherit() -> Self {
        Self {
            stdin: InputSource::Null,
            stdout: OutputSink::Stdout,
            stderr: OutputSink::Stderr,
        }
    }

    /// Wire all three local streams through, for shells.
    pub fn interactive() -> Self {
        Self {
            stdin: InputSource::Inherit,
            stdout: OutputSink::Stdout,
            stderr: OutputSink::Stderr,
        }
    }
}

/// One logical channel over an established connection.
///
/// A session is short-lived: the code path that opens it closes it before
/// returning, on every path.
#[async_trait]
pub trait RemoteSession: Send {
    /// Request a pseudo-terminal of the given type and size.
    async fn request_pty(&mut self, term: &str, cols: u16, rows: u16) -> Result<()>;

    /// Run a command with the given stream wiring and return its exit status.
    ///
    /// A session that ends without reporting a status is an error
    /// ([`crate::Error::SessionEnded`]).
    async fn run(&mut self, command: &str, io: SessionIo<'_>) -> Result<u32>;

    /// Close the session.
    async fn close(&mut self) -> Result<()>;
}

/// An established, authenticated connection able to open sessions.
///
/// The transport library's native handles are reached only through this
/// trait, so transport internals can be faked in tests.
#[async_trait]
pub trait Transport: Send + Sync {
    type Session: RemoteSession;

    /// Open a new session channel.
    async fn open_session(&self) -> Result<Self::Session>;

    /// Close the connection, terminating all derived sessions.
    async fn close(&self) -> Result<()>;
}
