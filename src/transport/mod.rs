//! Transport abstraction over a remote interactive shell.
//!
//! The connection lifecycle code only ever talks to these traits, so tests
//! can drive it with an in-process stub while production uses [`ssh`].

pub mod ssh;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::keystore::UnlockedKey;
use crate::target::ConnectionTarget;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("host key rejected")]
    HostKeyRejected,

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out: {0}")]
    Timeout(String),
}

/// Authentication methods the connection loop knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethodKind {
    PublicKey,
    Password,
    KeyboardInteractive,
}

/// Result of a single authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Success,
    /// The server refused the credential; the message is shown to the user.
    Failed(String),
    /// The server does not offer this method at all.
    Unavailable,
}

#[derive(Debug, Clone)]
pub struct InteractivePrompt {
    pub prompt: String,
    pub echo: bool,
}

/// One step of a keyboard-interactive exchange.
#[derive(Debug)]
pub enum InteractiveStep {
    /// The server wants answers to these prompts before continuing.
    Prompts {
        name: String,
        instructions: String,
        prompts: Vec<InteractivePrompt>,
    },
    Outcome(AuthOutcome),
}

/// Commands accepted by an open shell channel.
#[derive(Debug, PartialEq, Eq)]
pub enum ShellCommand {
    Data(Vec<u8>),
    Resize(u16, u16),
    Close,
}

/// Both halves of an open shell: a command sender and the raw byte stream
/// coming back from the remote side.
pub struct ShellStreams {
    pub input: mpsc::Sender<ShellCommand>,
    pub output: mpsc::Receiver<Vec<u8>>,
}

/// Decides whether a presented server key is acceptable. Called during the
/// handshake, before any credentials are sent.
#[async_trait]
pub trait HostKeyCheck: Send + Sync {
    async fn check(&self, host: &str, port: u16, algorithm: &str, key_blob: &[u8]) -> bool;
}

/// An established (but not yet authenticated) connection to a remote host.
#[async_trait]
pub trait Connection: Send {
    /// Whether the server has advertised `method` as still viable. Returns
    /// true when no method list has been seen yet.
    fn supports(&self, method: AuthMethodKind) -> bool;

    async fn auth_none(&mut self, username: &str) -> Result<AuthOutcome, TransportError>;

    async fn auth_password(
        &mut self,
        username: &str,
        password: &str,
    ) -> Result<AuthOutcome, TransportError>;

    async fn auth_publickey(
        &mut self,
        username: &str,
        key: &UnlockedKey,
    ) -> Result<AuthOutcome, TransportError>;

    async fn auth_interactive_start(
        &mut self,
        username: &str,
    ) -> Result<InteractiveStep, TransportError>;

    async fn auth_interactive_respond(
        &mut self,
        responses: Vec<String>,
    ) -> Result<InteractiveStep, TransportError>;

    /// Request a pty and shell. Only valid after authentication succeeded.
    async fn open_shell(
        &mut self,
        term: &str,
        cols: u16,
        rows: u16,
    ) -> Result<ShellStreams, TransportError>;

    async fn close(&mut self);
}

/// Factory for outbound connections.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(
        &self,
        target: &ConnectionTarget,
        host_keys: Arc<dyn HostKeyCheck>,
    ) -> Result<Box<dyn Connection>, TransportError>;
}
