//! Bridge error taxonomy

use thiserror::Error;

use crate::transport::TransportError;

/// Errors surfaced by bridge and registry operations.
///
/// Authentication failures local to one method never appear here; they are
/// absorbed by the auth loop and written to the terminal as status lines.
/// Only terminal conditions escalate to a `BridgeError`.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// `open` was called for a nickname that already has a live bridge.
    /// Rejected synchronously, no side effects.
    #[error("connection already open for nickname '{0}'")]
    DuplicateConnection(String),

    /// Every available method failed across the whole retry budget.
    #[error("authentication exhausted after {tries} attempts: {last_failure}")]
    AuthenticationExhausted { tries: usize, last_failure: String },

    /// The verifier returned `Changed`, or the user declined a new key.
    /// Terminal, no retry, no override.
    #[error("host key verification failed for {host}:{port}")]
    HostKeyRejected { host: String, port: u16 },

    /// I/O failure on the underlying connection or one of its streams.
    #[error("transport failure: {0}")]
    TransportFailure(#[from] TransportError),

    /// Bad passphrase or malformed stored key. The offending key is skipped;
    /// other methods continue.
    #[error("credential decode failure for key '{key}': {reason}")]
    CredentialDecodeFailure { key: String, reason: String },

    /// Malformed connection URI passed to `Registry::open_uri`.
    #[error("invalid connection uri: {0}")]
    InvalidUri(String),
}
