// ABOUTME: In-memory transport fake that records session activity.
// ABOUTME: Lets tests observe pty requests, commands, and session lifecycle.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tether::{Error, RemoteSession, Result, SessionIo, Transport};

/// Everything a session did, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    SessionOpened,
    PtyRequested { term: String, cols: u16, rows: u16 },
    Ran(String),
    SessionClosed,
}

/// A transport whose sessions replay canned output and a scripted exit
/// status, recording every call.
pub struct FakeTransport {
    stdout: Vec<u8>,
    exit_status: Option<u32>,
    events: Arc<Mutex<Vec<Event>>>,
}

impl FakeTransport {
    /// Sessions emit `stdout` and exit with `exit_status`.
    pub fn with_output(stdout: &[u8], exit_status: u32) -> Self {
        Self {
            stdout: stdout.to_vec(),
            exit_status: Some(exit_status),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Sessions exit with `exit_status` and no output.
    pub fn with_status(exit_status: u32) -> Self {
        Self::with_output(b"", exit_status)
    }

    /// Sessions end without ever reporting an exit status.
    pub fn broken() -> Self {
        Self {
            stdout: Vec::new(),
            exit_status: None,
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn pty_requested(&self) -> bool {
        self.events
            .lock()
            .iter()
            .any(|e| matches!(e, Event::PtyRequested { .. }))
    }

    pub fn commands(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::Ran(command) => Some(command.clone()),
                _ => None,
            })
            .collect()
    }
}

pub struct FakeSession {
    stdout: Vec<u8>,
    exit_status: Option<u32>,
    events: Arc<Mutex<Vec<Event>>>,
}

#[async_trait]
impl RemoteSession for FakeSession {
    async fn request_pty(&mut self, term: &str, cols: u16, rows: u16) -> Result<()> {
        self.events.lock().push(Event::PtyRequested {
            term: term.to_string(),
            cols,
            rows,
        });
        Ok(())
    }

    async fn run(&mut self, command: &str, mut io: SessionIo<'_>) -> Result<u32> {
        self.events.lock().push(Event::Ran(command.to_string()));
        io.stdout.write(&self.stdout).await?;
        self.exit_status.ok_or(Error::SessionEnded)
    }

    async fn close(&mut self) -> Result<()> {
        self.events.lock().push(Event::SessionClosed);
        Ok(())
    }
}

#[async_trait]
impl Transport for FakeTransport {
    type Session = FakeSession;

    async fn open_session(&self) -> Result<FakeSession> {
        self.events.lock().push(Event::SessionOpened);
        Ok(FakeSession {
            stdout: self.stdout.clone(),
            exit_status: self.exit_status,
            events: Arc::clone(&self.events),
        })
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
