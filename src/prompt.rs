//! Prompt relay between the connection task and whatever UI is attached
//!
//! A single-slot request/response channel: the connection task publishes a
//! pending prompt and awaits the answer; the attached display observes the
//! pending prompt and posts a response. Disposal cancels the relay so a
//! blocked requester is always released instead of hanging.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{oneshot, Notify};
use tracing::{debug, warn};

/// What shape of answer a prompt expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    /// Free-form string (password, passphrase, challenge response).
    Value,
    /// Yes/no confirmation.
    Confirm,
}

/// Snapshot of the currently outstanding prompt, for display layers.
#[derive(Debug, Clone)]
pub struct PendingPrompt {
    pub hint: String,
    pub kind: PromptKind,
}

/// Answer posted by the display layer.
#[derive(Debug, Clone)]
pub enum PromptResponse {
    Value(String),
    Confirm(bool),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PromptError {
    /// The relay was cancelled (bridge teardown) while waiting.
    #[error("prompt cancelled")]
    Cancelled,

    /// A second request was issued while one was still unanswered.
    /// At most one prompt may be outstanding per bridge.
    #[error("another prompt is already outstanding")]
    AlreadyPending,
}

struct Pending {
    hint: String,
    kind: PromptKind,
    tx: oneshot::Sender<PromptResponse>,
}

/// Single-slot blocking rendezvous for credentials and confirmations.
pub struct PromptRelay {
    pending: Mutex<Option<Pending>>,
    posted: Notify,
    cancelled: AtomicBool,
}

impl PromptRelay {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(None),
            posted: Notify::new(),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Request a string value (password, passphrase, challenge answer).
    /// Blocks until the UI responds or the relay is cancelled.
    pub async fn request_value(&self, hint: &str) -> Result<String, PromptError> {
        match self.request(hint, PromptKind::Value).await? {
            PromptResponse::Value(s) => Ok(s),
            PromptResponse::Confirm(_) => {
                warn!("confirm response posted to a value prompt, treating as cancelled");
                Err(PromptError::Cancelled)
            }
        }
    }

    /// Request a yes/no confirmation.
    pub async fn request_confirm(&self, hint: &str) -> Result<bool, PromptError> {
        match self.request(hint, PromptKind::Confirm).await? {
            PromptResponse::Confirm(b) => Ok(b),
            PromptResponse::Value(_) => {
                warn!("value response posted to a confirm prompt, treating as cancelled");
                Err(PromptError::Cancelled)
            }
        }
    }

    async fn request(&self, hint: &str, kind: PromptKind) -> Result<PromptResponse, PromptError> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(PromptError::Cancelled);
        }

        let rx = {
            let mut slot = self.pending.lock();
            if slot.is_some() {
                warn!("prompt requested while another is outstanding: {hint}");
                return Err(PromptError::AlreadyPending);
            }
            let (tx, rx) = oneshot::channel();
            *slot = Some(Pending {
                hint: hint.to_string(),
                kind,
                tx,
            });
            rx
        };

        self.posted.notify_waiters();

        // The sender is dropped by cancel(), which surfaces here as RecvError.
        rx.await.map_err(|_| PromptError::Cancelled)
    }

    /// The currently outstanding prompt, if any.
    pub fn pending(&self) -> Option<PendingPrompt> {
        self.pending.lock().as_ref().map(|p| PendingPrompt {
            hint: p.hint.clone(),
            kind: p.kind,
        })
    }

    /// Completes when a new prompt is published.
    pub async fn notified(&self) {
        self.posted.notified().await;
    }

    /// Post a response from the display layer. Releases exactly one waiting
    /// request; a response with no outstanding request is a no-op.
    pub fn respond(&self, response: PromptResponse) {
        let pending = self.pending.lock().take();
        match pending {
            Some(p) => {
                // Receiver gone means the requester was already cancelled.
                let _ = p.tx.send(response);
            }
            None => debug!("prompt response with no outstanding request, ignoring"),
        }
    }

    /// Cancel the relay: releases any blocked requester with
    /// [`PromptError::Cancelled`] and fails all future requests.
    /// Called on bridge disposal so a waiting connection task never hangs.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        // Dropping the sender wakes the waiting requester with an error.
        self.pending.lock().take();
    }
}

impl Default for PromptRelay {
    fn default() -> Self {
        Self::new()
    }
}
