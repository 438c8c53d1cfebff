//! One live connection: state machine, authentication loop, shell relay
//! and keyboard handling.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use encoding_rs::Encoding;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::BridgeError;
use crate::keys::{KeyCode, KeyInput, ModifierLatch};
use crate::keystore::{KeyDecodeError, KeyPolicy, KeyStore, UnlockedKey};
use crate::known_hosts::KnownHostsStore;
use crate::prompt::PromptRelay;
use crate::target::ConnectionTarget;
use crate::terminal::Screen;
use crate::transport::{
    AuthMethodKind, AuthOutcome, Connection, InteractiveStep, ShellCommand, Transport,
};
use crate::verifier::HostVerifier;

pub const DEFAULT_FONT_SIZE: i32 = 10;
const FONT_SIZE_MIN: i32 = 4;
const FONT_SIZE_MAX: i32 = 48;
const FONT_SIZE_STEP: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Connecting,
    Authenticating,
    Connected,
    Disconnected,
}

/// Tunables for the connection lifecycle.
#[derive(Clone)]
pub struct BridgeSettings {
    /// Number of authentication rounds before giving up.
    pub auth_tries: usize,
    /// Pause between authentication rounds.
    pub retry_delay: Duration,
    /// Terminal type requested with the pty.
    pub term: String,
    /// Character encoding of the remote stream.
    pub encoding: &'static Encoding,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            auth_tries: 20,
            retry_delay: Duration::from_secs(1),
            term: "xterm-256color".into(),
            encoding: encoding_rs::UTF_8,
        }
    }
}

/// How one authentication round ended.
enum Flow {
    Done,
    Continue,
    Abort,
}

/// A bridge between one remote shell and a terminal screen.
pub struct Bridge {
    target: ConnectionTarget,
    key_policy: KeyPolicy,
    /// Commands written to the shell right after login.
    post_login: Option<String>,
    settings: BridgeSettings,

    state: Mutex<BridgeState>,
    screen: Arc<Screen>,
    relay: Arc<PromptRelay>,
    keystore: Arc<KeyStore>,
    known_hosts: Arc<KnownHostsStore>,

    input: Mutex<Option<mpsc::Sender<ShellCommand>>>,
    latch: Mutex<ModifierLatch>,
    last_size: Mutex<(usize, usize)>,
    font_size: AtomicI32,

    /// Why the bridge went down, when it went down with a reason.
    last_error: Mutex<Option<BridgeError>>,

    wants_disconnect: AtomicBool,
    notified: AtomicBool,
    /// Nickname is sent here exactly once when the bridge goes down.
    events: mpsc::UnboundedSender<String>,
}

impl Bridge {
    pub fn new(
        target: ConnectionTarget,
        key_policy: KeyPolicy,
        post_login: Option<String>,
        settings: BridgeSettings,
        keystore: Arc<KeyStore>,
        known_hosts: Arc<KnownHostsStore>,
        events: mpsc::UnboundedSender<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            target,
            key_policy,
            post_login,
            settings,
            state: Mutex::new(BridgeState::Connecting),
            screen: Arc::new(Screen::default()),
            relay: Arc::new(PromptRelay::new()),
            keystore,
            known_hosts,
            input: Mutex::new(None),
            latch: Mutex::new(ModifierLatch::new()),
            last_size: Mutex::new((0, 0)),
            font_size: AtomicI32::new(DEFAULT_FONT_SIZE),
            last_error: Mutex::new(None),
            wants_disconnect: AtomicBool::new(false),
            notified: AtomicBool::new(false),
            events,
        })
    }

    pub fn nickname(&self) -> &str {
        &self.target.nickname
    }

    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    pub fn state(&self) -> BridgeState {
        *self.state.lock()
    }

    pub fn screen(&self) -> Arc<Screen> {
        self.screen.clone()
    }

    /// Prompt relay for this connection; the frontend answers host key and
    /// credential prompts through it.
    pub fn prompts(&self) -> Arc<PromptRelay> {
        self.relay.clone()
    }

    pub fn font_size(&self) -> i32 {
        self.font_size.load(Ordering::Relaxed)
    }

    /// The terminal failure that took the bridge down, if any.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().as_ref().map(|e| e.to_string())
    }

    fn fail(&self, error: BridgeError) {
        *self.last_error.lock() = Some(error);
    }

    fn set_state(&self, state: BridgeState) {
        *self.state.lock() = state;
    }

    /// Spawn the connection task.
    pub fn start(self: &Arc<Self>, transport: Arc<dyn Transport>) {
        let this = self.clone();
        tokio::spawn(async move {
            this.run(transport).await;
        });
    }

    async fn run(self: Arc<Self>, transport: Arc<dyn Transport>) {
        self.set_state(BridgeState::Connecting);
        self.screen.push_line(&format!(
            "Connecting to {}:{}",
            self.target.hostname, self.target.port
        ));

        let verifier = Arc::new(HostVerifier::new(
            self.known_hosts.clone(),
            self.relay.clone(),
            self.screen.clone(),
        ));

        let mut conn = match transport.connect(&self.target, verifier).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("connection to {} failed: {}", self.target.address(), e);
                self.screen.push_line(&format!("Connection failed: {e}"));
                self.fail(match e {
                    crate::transport::TransportError::HostKeyRejected => {
                        BridgeError::HostKeyRejected {
                            host: self.target.hostname.clone(),
                            port: self.target.port,
                        }
                    }
                    other => BridgeError::TransportFailure(other),
                });
                self.dispatch_disconnect();
                return;
            }
        };

        self.set_state(BridgeState::Authenticating);
        self.screen.push_line("Trying to authenticate");

        if !self.authenticate(conn.as_mut()).await || self.wants_disconnect.load(Ordering::SeqCst) {
            conn.close().await;
            self.dispatch_disconnect();
            return;
        }

        info!("authentication successful for {}", self.target.address());
        self.finish(conn).await;
    }

    /// Drive the authentication rounds until one method succeeds, every
    /// round is exhausted, or the user cancels a prompt.
    async fn authenticate(&self, conn: &mut dyn Connection) -> bool {
        let username = self.target.username.clone();

        let mut pubkeys_exhausted = false;
        let mut last_failure = String::from("no viable method");

        for round in 0..self.settings.auth_tries {
            if self.wants_disconnect.load(Ordering::SeqCst) {
                return false;
            }
            if round > 0 {
                tokio::time::sleep(self.settings.retry_delay).await;
            }

            // Some servers accept 'none' outright; it also refreshes the
            // list of methods the server actually offers.
            match conn.auth_none(&username).await {
                Ok(AuthOutcome::Success) => return true,
                Ok(_) => {}
                Err(e) => {
                    self.screen.push_line(&format!("Connection failed: {e}"));
                    return false;
                }
            }

            let flow = if !pubkeys_exhausted
                && self.key_policy != KeyPolicy::Never
                && conn.supports(AuthMethodKind::PublicKey)
            {
                last_failure = "'publickey' rejected".into();
                let flow = self.try_public_keys(conn, &username).await;
                pubkeys_exhausted = true;
                flow
            } else if conn.supports(AuthMethodKind::Password) {
                last_failure = "'password' rejected".into();
                self.try_password(conn, &username).await
            } else if conn.supports(AuthMethodKind::KeyboardInteractive) {
                last_failure = "'keyboard-interactive' rejected".into();
                self.try_interactive(conn, &username).await
            } else {
                self.screen.push_line(
                    "[Your host doesn't support 'password' or 'keyboard-interactive' authentication.]",
                );
                return false;
            };

            match flow {
                Flow::Done => return true,
                Flow::Continue => {}
                Flow::Abort => return false,
            }
        }

        self.screen.push_line("Authentication failed.");
        self.fail(BridgeError::AuthenticationExhausted {
            tries: self.settings.auth_tries,
            last_failure,
        });
        false
    }

    async fn try_public_keys(&self, conn: &mut dyn Connection, username: &str) -> Flow {
        match self.key_policy.clone() {
            KeyPolicy::Never => Flow::Continue,
            KeyPolicy::Any => {
                self.screen
                    .push_line("Attempting 'publickey' authentication with any in-memory SSH keys");

                let mut candidates = self.keystore.cached_keys();
                for stored in self.keystore.all() {
                    if stored.encrypted || self.keystore.cached(&stored.nickname).is_some() {
                        continue;
                    }
                    match self.keystore.unlock(&stored, None) {
                        Ok(key) => candidates.push(key),
                        Err(e) => {
                            debug!("skipping key '{}': {}", stored.nickname, e);
                        }
                    }
                }

                for key in candidates {
                    match self.offer_key(conn, username, &key).await {
                        Flow::Continue => {}
                        other => return other,
                    }
                }
                Flow::Continue
            }
            KeyPolicy::Specific(nickname) => {
                self.screen
                    .push_line("Attempting 'publickey' authentication with a specific SSH key");

                let Some(stored) = self.keystore.get(&nickname) else {
                    self.screen
                        .push_line(&format!("Couldn't find SSH key '{nickname}'"));
                    return Flow::Continue;
                };

                let key = if stored.encrypted && self.keystore.cached(&nickname).is_none() {
                    let passphrase = match self
                        .relay
                        .request_value(&format!("Password for key '{nickname}'"))
                        .await
                    {
                        Ok(p) => p,
                        Err(_) => return Flow::Abort,
                    };
                    match self.keystore.unlock(&stored, Some(&passphrase)) {
                        Ok(key) => key,
                        Err(e @ KeyDecodeError::BadPassphrase(_)) => {
                            self.screen.push_line(&format!(
                                "Bad password for key '{nickname}'. Authentication failed."
                            ));
                            self.fail(BridgeError::CredentialDecodeFailure {
                                key: nickname.clone(),
                                reason: e.to_string(),
                            });
                            return Flow::Continue;
                        }
                        Err(e) => {
                            self.screen.push_line(&format!("{e}"));
                            return Flow::Continue;
                        }
                    }
                } else {
                    match self.keystore.unlock(&stored, None) {
                        Ok(key) => key,
                        Err(e) => {
                            self.screen.push_line(&format!("{e}"));
                            return Flow::Continue;
                        }
                    }
                };

                self.offer_key(conn, username, &key).await
            }
        }
    }

    async fn offer_key(&self, conn: &mut dyn Connection, username: &str, key: &UnlockedKey) -> Flow {
        match conn.auth_publickey(username, key).await {
            Ok(AuthOutcome::Success) => Flow::Done,
            Ok(_) => {
                self.screen.push_line(&format!(
                    "Authentication method 'publickey' with key '{}' failed",
                    key.nickname
                ));
                Flow::Continue
            }
            Err(e) => {
                self.screen.push_line(&format!("Connection failed: {e}"));
                Flow::Abort
            }
        }
    }

    async fn try_password(&self, conn: &mut dyn Connection, username: &str) -> Flow {
        self.screen.push_line("Attempting 'password' authentication");

        let password = match self.relay.request_value("Password").await {
            Ok(p) => p,
            Err(_) => return Flow::Abort,
        };

        match conn.auth_password(username, &password).await {
            Ok(AuthOutcome::Success) => Flow::Done,
            Ok(_) => {
                self.screen.push_line("Authentication method 'password' failed");
                Flow::Continue
            }
            Err(e) => {
                self.screen.push_line(&format!("Connection failed: {e}"));
                Flow::Abort
            }
        }
    }

    async fn try_interactive(&self, conn: &mut dyn Connection, username: &str) -> Flow {
        self.screen
            .push_line("Attempting 'keyboard-interactive' authentication");

        let mut step = match conn.auth_interactive_start(username).await {
            Ok(step) => step,
            Err(e) => {
                self.screen.push_line(&format!("Connection failed: {e}"));
                return Flow::Abort;
            }
        };

        loop {
            match step {
                InteractiveStep::Outcome(AuthOutcome::Success) => return Flow::Done,
                InteractiveStep::Outcome(_) => {
                    self.screen
                        .push_line("Authentication method 'keyboard-interactive' failed");
                    return Flow::Continue;
                }
                InteractiveStep::Prompts {
                    instructions,
                    prompts,
                    ..
                } => {
                    if !instructions.trim().is_empty() {
                        self.screen.push_line(&instructions);
                    }
                    let mut responses = Vec::with_capacity(prompts.len());
                    for prompt in &prompts {
                        match self.relay.request_value(&prompt.prompt).await {
                            Ok(answer) => responses.push(answer),
                            Err(_) => return Flow::Abort,
                        }
                    }
                    step = match conn.auth_interactive_respond(responses).await {
                        Ok(step) => step,
                        Err(e) => {
                            self.screen.push_line(&format!("Connection failed: {e}"));
                            return Flow::Abort;
                        }
                    };
                }
            }
        }
    }

    /// Open the shell, wire up the output relay and go to `Connected`.
    async fn finish(self: &Arc<Self>, mut conn: Box<dyn Connection>) {
        let (cols, rows) = self.screen.size();

        let streams = match conn
            .open_shell(&self.settings.term, cols as u16, rows as u16)
            .await
        {
            Ok(streams) => streams,
            Err(e) => {
                self.screen.push_line(&format!("Connection failed: {e}"));
                conn.close().await;
                self.dispatch_disconnect();
                return;
            }
        };

        *self.input.lock() = Some(streams.input.clone());
        *self.last_size.lock() = (cols, rows);
        self.set_state(BridgeState::Connected);

        if let Some(commands) = &self.post_login {
            for line in commands.lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let mut bytes = line.as_bytes().to_vec();
                bytes.push(b'\n');
                let _ = streams.input.send(ShellCommand::Data(bytes)).await;
            }
        }

        let this = self.clone();
        let mut output = streams.output;
        tokio::spawn(async move {
            let mut decoder = this.settings.encoding.new_decoder();
            while let Some(chunk) = output.recv().await {
                let mut text = String::with_capacity(chunk.len() * 2);
                let _ = decoder.decode_to_string(&chunk, &mut text, false);
                this.screen.feed(&text);
            }
            debug!("shell output stream ended for {}", this.target.address());
            if !this.wants_disconnect.load(Ordering::SeqCst) {
                this.screen.push_line("Connection closed.");
            }
            conn.close().await;
            this.dispatch_disconnect();
        });
    }

    /// Handle one key press. Returns false when the key was dropped
    /// because the bridge is not connected.
    pub fn key_event(&self, key: KeyCode) -> bool {
        if self.state() != BridgeState::Connected {
            return false;
        }
        match self.latch.lock().encode(key) {
            KeyInput::Bytes(bytes) => {
                if let Some(tx) = &*self.input.lock() {
                    tx.try_send(ShellCommand::Data(bytes)).is_ok()
                } else {
                    false
                }
            }
            KeyInput::FontDelta(delta) => {
                self.step_font(delta);
                true
            }
            KeyInput::None => true,
        }
    }

    fn step_font(&self, delta: i32) {
        let mut size = self.font_size.load(Ordering::Relaxed);
        size = (size + delta * FONT_SIZE_STEP).clamp(FONT_SIZE_MIN, FONT_SIZE_MAX);
        self.font_size.store(size, Ordering::Relaxed);
    }

    /// Propagate a new terminal geometry. Repeated calls with the same
    /// size are ignored.
    pub fn resize(&self, cols: usize, rows: usize) {
        {
            let mut last = self.last_size.lock();
            if *last == (cols, rows) {
                return;
            }
            *last = (cols, rows);
        }
        self.screen.resize(cols, rows);
        if self.state() == BridgeState::Connected {
            if let Some(tx) = &*self.input.lock() {
                let _ = tx.try_send(ShellCommand::Resize(cols as u16, rows as u16));
            }
        }
    }

    /// Tear the connection down. Safe to call from any state and more
    /// than once.
    pub fn disconnect(&self) {
        self.wants_disconnect.store(true, Ordering::SeqCst);
        self.relay.cancel();
        if let Some(tx) = self.input.lock().take() {
            let _ = tx.try_send(ShellCommand::Close);
        }
        self.dispatch_disconnect();
    }

    fn dispatch_disconnect(&self) {
        self.set_state(BridgeState::Disconnected);
        if !self.notified.swap(true, Ordering::SeqCst) {
            debug!("notifying listeners that '{}' is gone", self.target.nickname);
            let _ = self.events.send(self.target.nickname.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bridge() -> (Arc<Bridge>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let dir = std::env::temp_dir().join("termbridge-test-kh");
        let bridge = Bridge::new(
            ConnectionTarget::new("box", "user", "host.example", 22),
            KeyPolicy::Never,
            None,
            BridgeSettings::default(),
            Arc::new(KeyStore::new(false)),
            Arc::new(KnownHostsStore::with_path(dir)),
            tx,
        );
        (bridge, rx)
    }

    #[test]
    fn keys_are_dropped_before_connected() {
        let (bridge, _rx) = bridge();
        assert_eq!(bridge.state(), BridgeState::Connecting);
        assert!(!bridge.key_event(KeyCode::Char('x')));
    }

    #[test]
    fn font_size_stepping_clamps() {
        let (bridge, _rx) = bridge();
        assert_eq!(bridge.font_size(), DEFAULT_FONT_SIZE);
        for _ in 0..100 {
            bridge.step_font(1);
        }
        assert_eq!(bridge.font_size(), FONT_SIZE_MAX);
        for _ in 0..100 {
            bridge.step_font(-1);
        }
        assert_eq!(bridge.font_size(), FONT_SIZE_MIN);
    }

    #[test]
    fn resize_before_connect_updates_screen_only() {
        let (bridge, _rx) = bridge();
        bridge.resize(132, 43);
        assert_eq!(bridge.screen().size(), (132, 43));
        // Same geometry again is a no-op.
        bridge.resize(132, 43);
        assert_eq!(bridge.screen().size(), (132, 43));
    }

    #[tokio::test]
    async fn disconnect_notifies_exactly_once() {
        let (bridge, mut rx) = bridge();
        bridge.disconnect();
        bridge.disconnect();
        assert_eq!(bridge.state(), BridgeState::Disconnected);
        assert_eq!(rx.recv().await.as_deref(), Some("box"));
        assert!(rx.try_recv().is_err());
    }
}
