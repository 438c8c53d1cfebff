//! Interactive host key verification.
//!
//! Known keys pass silently. First-seen keys print the fingerprint and ask
//! the user to confirm before the record is persisted. Changed keys print a
//! warning banner and always fail.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::known_hosts::{KnownHostsStore, Verdict};
use crate::prompt::PromptRelay;
use crate::terminal::Screen;
use crate::transport::HostKeyCheck;

pub struct HostVerifier {
    store: Arc<KnownHostsStore>,
    relay: Arc<PromptRelay>,
    screen: Arc<Screen>,
}

impl HostVerifier {
    pub fn new(store: Arc<KnownHostsStore>, relay: Arc<PromptRelay>, screen: Arc<Screen>) -> Self {
        Self {
            store,
            relay,
            screen,
        }
    }
}

#[async_trait]
impl HostKeyCheck for HostVerifier {
    async fn check(&self, host: &str, port: u16, algorithm: &str, key_blob: &[u8]) -> bool {
        match self.store.verify(host, port, algorithm, key_blob) {
            Verdict::Trusted => {
                info!("host key verified for {}:{}", host, port);
                true
            }
            Verdict::New { fingerprint } => {
                self.screen.push_line(&format!(
                    "The authenticity of host '{host}' can't be established."
                ));
                self.screen
                    .push_line(&format!("Host {algorithm} key fingerprint is {fingerprint}"));

                let accepted = self
                    .relay
                    .request_confirm("Are you sure you want\nto continue connecting?")
                    .await
                    .unwrap_or(false);

                if !accepted {
                    return false;
                }
                if let Err(e) = self.store.add(host, port, algorithm, key_blob) {
                    warn!("failed to save host key for {}:{}: {}", host, port, e);
                }
                true
            }
            Verdict::Changed {
                actual_fingerprint, ..
            } => {
                warn!(
                    "host key changed for {}:{}, refusing to continue",
                    host, port
                );
                let s = &self.screen;
                s.push_line("@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@");
                s.push_line("@    WARNING: REMOTE HOST IDENTIFICATION HAS CHANGED!     @");
                s.push_line("@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@");
                s.push_line("IT IS POSSIBLE THAT SOMEONE IS DOING SOMETHING NASTY!");
                s.push_line("Someone could be eavesdropping on you right now (man-in-the-middle attack)!");
                s.push_line("It is also possible that the host key has just been changed.");
                s.push_line(&format!(
                    "Host {algorithm} key fingerprint is {actual_fingerprint}"
                ));
                s.push_line("Host key verification failed.");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::PromptResponse;
    use tempfile::TempDir;

    const KEY_A: &[u8] = b"test-key-blob-aaaa";
    const KEY_B: &[u8] = b"test-key-blob-bbbb";

    fn verifier() -> (HostVerifier, Arc<KnownHostsStore>, Arc<PromptRelay>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(KnownHostsStore::with_path(dir.path().join("known_hosts")));
        let relay = Arc::new(PromptRelay::new());
        let screen = Arc::new(Screen::new(80, 24));
        let v = HostVerifier::new(store.clone(), relay.clone(), screen);
        (v, store, relay, dir)
    }

    async fn answer_confirm(relay: Arc<PromptRelay>, yes: bool) {
        loop {
            if relay.pending().is_some() {
                relay.respond(PromptResponse::Confirm(yes));
                break;
            }
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn accepted_new_key_is_persisted() {
        let (v, store, relay, _dir) = verifier();
        let answer = tokio::spawn(answer_confirm(relay, true));
        assert!(v.check("host.example", 22, "ssh-ed25519", KEY_A).await);
        answer.await.unwrap();
        assert_eq!(store.entry_count("host.example", 22), 1);

        // Second connection with the same key passes without a prompt.
        assert!(v.check("host.example", 22, "ssh-ed25519", KEY_A).await);
    }

    #[tokio::test]
    async fn declined_new_key_is_rejected() {
        let (v, store, relay, _dir) = verifier();
        let answer = tokio::spawn(answer_confirm(relay, false));
        assert!(!v.check("host.example", 22, "ssh-ed25519", KEY_A).await);
        answer.await.unwrap();
        assert_eq!(store.entry_count("host.example", 22), 0);
    }

    #[tokio::test]
    async fn changed_key_fails_without_prompting() {
        let (v, store, _relay, _dir) = verifier();
        store.add("host.example", 22, "ssh-ed25519", KEY_A).unwrap();
        // No answering task: a prompt would hang the test.
        assert!(!v.check("host.example", 22, "ssh-ed25519", KEY_B).await);
    }

    #[tokio::test]
    async fn cancelled_prompt_counts_as_rejection() {
        let (v, _store, relay, _dir) = verifier();
        let canceller = {
            let relay = relay.clone();
            tokio::spawn(async move {
                while relay.pending().is_none() {
                    tokio::task::yield_now().await;
                }
                relay.cancel();
            })
        };
        assert!(!v.check("host.example", 22, "ssh-ed25519", KEY_A).await);
        canceller.await.unwrap();
    }
}
