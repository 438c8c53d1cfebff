//! Connection management core for an SSH terminal client.
//!
//! A [`Registry`] owns the set of live [`Bridge`]s. Each bridge drives one
//! connection end to end: host key verification, the authentication loop,
//! an interactive shell relayed into a terminal [`Screen`], and teardown
//! notifications back to the registry.
//!
//! User interaction happens over a [`prompt::PromptRelay`]: whenever the
//! lifecycle needs a password, passphrase or yes/no answer it parks a
//! prompt there and waits for whatever frontend is attached to respond.

pub mod bridge;
pub mod error;
pub mod keys;
pub mod keystore;
pub mod known_hosts;
pub mod prompt;
pub mod registry;
pub mod target;
pub mod terminal;
pub mod transport;
pub mod verifier;

pub use bridge::{Bridge, BridgeSettings, BridgeState};
pub use error::BridgeError;
pub use keystore::{KeyPolicy, KeyStore, StoredKey};
pub use known_hosts::{KnownHostsStore, Verdict};
pub use prompt::{PendingPrompt, PromptKind, PromptRelay, PromptResponse};
pub use registry::{DisconnectEvent, Registry};
pub use target::ConnectionTarget;
pub use terminal::Screen;
