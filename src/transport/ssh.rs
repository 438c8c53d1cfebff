//! russh-backed implementation of the transport traits.

use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, AuthResult, KeyboardInteractiveAuthResponse};
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::{PublicKey, PublicKeyBase64};
use russh::{ChannelMsg, MethodKind, MethodSet};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{
    AuthMethodKind, AuthOutcome, Connection, HostKeyCheck, InteractivePrompt, InteractiveStep,
    ShellCommand, ShellStreams, Transport, TransportError,
};
use crate::keystore::UnlockedKey;
use crate::target::ConnectionTarget;

const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Outbound SSH connections via russh.
pub struct SshTransport {
    config: Arc<client::Config>,
}

impl SshTransport {
    pub fn new() -> Self {
        let config = client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(30)),
            keepalive_max: 3,
            ..Default::default()
        };
        Self {
            config: Arc::new(config),
        }
    }
}

impl Default for SshTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn connect(
        &self,
        target: &ConnectionTarget,
        host_keys: Arc<dyn HostKeyCheck>,
    ) -> Result<Box<dyn Connection>, TransportError> {
        let addr = format!("{}:{}", target.hostname, target.port);
        info!("connecting to {}", addr);

        let socket_addr = addr
            .to_socket_addrs()
            .map_err(|e| TransportError::ConnectionFailed(format!("address resolution: {e}")))?
            .next()
            .ok_or_else(|| TransportError::ConnectionFailed("no address found".into()))?;

        let handler = VerifierHandler {
            host: target.hostname.clone(),
            port: target.port,
            check: host_keys,
        };

        let handle = tokio::time::timeout(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            client::connect(self.config.clone(), socket_addr, handler),
        )
        .await
        .map_err(|_| TransportError::Timeout("connection timed out".into()))?
        .map_err(|e| match e {
            HandlerError::KeyRejected => TransportError::HostKeyRejected,
            HandlerError::Ssh(inner) => TransportError::ConnectionFailed(inner.to_string()),
        })?;

        debug!("handshake completed with {}", addr);

        Ok(Box::new(SshConnection {
            handle,
            remaining: None,
        }))
    }
}

/// russh callback handler that defers host key decisions to a
/// [`HostKeyCheck`].
struct VerifierHandler {
    host: String,
    port: u16,
    check: Arc<dyn HostKeyCheck>,
}

#[derive(Debug, thiserror::Error)]
enum HandlerError {
    #[error("host key rejected")]
    KeyRejected,

    #[error(transparent)]
    Ssh(#[from] russh::Error),
}

impl client::Handler for VerifierHandler {
    type Error = HandlerError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let algorithm = server_public_key.algorithm();
        let blob = server_public_key.public_key_bytes();

        if self
            .check
            .check(&self.host, self.port, algorithm.as_str(), &blob)
            .await
        {
            Ok(true)
        } else {
            warn!("host key for {}:{} was not accepted", self.host, self.port);
            Err(HandlerError::KeyRejected)
        }
    }
}

struct SshConnection {
    handle: client::Handle<VerifierHandler>,
    /// Methods the server listed in its last failure response. `None` until
    /// a failure has been seen.
    remaining: Option<MethodSet>,
}

impl SshConnection {
    fn record(&mut self, result: AuthResult) -> AuthOutcome {
        match result {
            AuthResult::Success => AuthOutcome::Success,
            AuthResult::Failure {
                remaining_methods,
                partial_success,
            } => {
                debug!(
                    "auth attempt refused (partial_success={}), remaining: {:?}",
                    partial_success, remaining_methods
                );
                self.remaining = Some(remaining_methods);
                AuthOutcome::Failed("rejected by server".into())
            }
        }
    }

    fn record_interactive(&mut self, reply: KeyboardInteractiveAuthResponse) -> InteractiveStep {
        match reply {
            KeyboardInteractiveAuthResponse::Success => {
                InteractiveStep::Outcome(AuthOutcome::Success)
            }
            KeyboardInteractiveAuthResponse::Failure {
                remaining_methods, ..
            } => {
                self.remaining = Some(remaining_methods);
                InteractiveStep::Outcome(AuthOutcome::Failed("rejected by server".into()))
            }
            KeyboardInteractiveAuthResponse::InfoRequest {
                name,
                instructions,
                prompts,
            } => InteractiveStep::Prompts {
                name,
                instructions,
                prompts: prompts
                    .into_iter()
                    .map(|p| InteractivePrompt {
                        prompt: p.prompt,
                        echo: p.echo,
                    })
                    .collect(),
            },
        }
    }
}

fn auth_err(e: russh::Error) -> TransportError {
    TransportError::Auth(e.to_string())
}

#[async_trait]
impl Connection for SshConnection {
    fn supports(&self, method: AuthMethodKind) -> bool {
        let Some(remaining) = &self.remaining else {
            // No failure seen yet, so the server has not told us anything.
            return true;
        };
        let kind = match method {
            AuthMethodKind::PublicKey => MethodKind::PublicKey,
            AuthMethodKind::Password => MethodKind::Password,
            AuthMethodKind::KeyboardInteractive => MethodKind::KeyboardInteractive,
        };
        remaining.iter().any(|m| *m == kind)
    }

    async fn auth_none(&mut self, username: &str) -> Result<AuthOutcome, TransportError> {
        let result = self
            .handle
            .authenticate_none(username)
            .await
            .map_err(auth_err)?;
        Ok(self.record(result))
    }

    async fn auth_password(
        &mut self,
        username: &str,
        password: &str,
    ) -> Result<AuthOutcome, TransportError> {
        let result = self
            .handle
            .authenticate_password(username, password)
            .await
            .map_err(auth_err)?;
        Ok(self.record(result))
    }

    async fn auth_publickey(
        &mut self,
        username: &str,
        key: &UnlockedKey,
    ) -> Result<AuthOutcome, TransportError> {
        // RSA keys need the strongest hash the server advertises.
        let hash_alg = self
            .handle
            .best_supported_rsa_hash()
            .await
            .map_err(auth_err)?
            .flatten();

        let key_with_hash = PrivateKeyWithHashAlg::new(key.key.clone(), hash_alg);
        let result = self
            .handle
            .authenticate_publickey(username, key_with_hash)
            .await
            .map_err(auth_err)?;
        Ok(self.record(result))
    }

    async fn auth_interactive_start(
        &mut self,
        username: &str,
    ) -> Result<InteractiveStep, TransportError> {
        let reply = self
            .handle
            .authenticate_keyboard_interactive_start(username, None::<String>)
            .await
            .map_err(auth_err)?;
        Ok(self.record_interactive(reply))
    }

    async fn auth_interactive_respond(
        &mut self,
        responses: Vec<String>,
    ) -> Result<InteractiveStep, TransportError> {
        let reply = self
            .handle
            .authenticate_keyboard_interactive_respond(responses)
            .await
            .map_err(auth_err)?;
        Ok(self.record_interactive(reply))
    }

    async fn open_shell(
        &mut self,
        term: &str,
        cols: u16,
        rows: u16,
    ) -> Result<ShellStreams, TransportError> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| TransportError::Channel(format!("channel open failed: {e}")))?;

        debug!("channel opened, requesting pty {}x{}", cols, rows);

        channel
            .request_pty(false, term, cols as u32, rows as u32, 0, 0, &[])
            .await
            .map_err(|e| TransportError::Channel(format!("pty request failed: {e}")))?;

        channel
            .request_shell(false)
            .await
            .map_err(|e| TransportError::Channel(format!("shell request failed: {e}")))?;

        info!("interactive shell started");

        let (cmd_tx, mut cmd_rx) = mpsc::channel::<ShellCommand>(1024);
        let (out_tx, out_rx) = mpsc::channel::<Vec<u8>>(1024);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(cmd) = cmd_rx.recv() => {
                        match cmd {
                            ShellCommand::Data(data) => {
                                if let Err(e) = channel.data(&data[..]).await {
                                    error!("failed to send data to channel: {}", e);
                                    break;
                                }
                            }
                            ShellCommand::Resize(cols, rows) => {
                                if let Err(e) = channel
                                    .window_change(cols as u32, rows as u32, 0, 0)
                                    .await
                                {
                                    error!("failed to resize pty: {}", e);
                                }
                            }
                            ShellCommand::Close => {
                                let _ = channel.eof().await;
                                break;
                            }
                        }
                    }

                    Some(msg) = channel.wait() => {
                        match msg {
                            ChannelMsg::Data { data } => {
                                if out_tx.send(data.to_vec()).await.is_err() {
                                    break;
                                }
                            }
                            ChannelMsg::ExtendedData { data, ext } => {
                                if ext == 1 && out_tx.send(data.to_vec()).await.is_err() {
                                    break;
                                }
                            }
                            ChannelMsg::Eof => {
                                debug!("channel eof");
                                break;
                            }
                            ChannelMsg::Close => {
                                debug!("channel closed");
                                break;
                            }
                            ChannelMsg::ExitStatus { exit_status } => {
                                info!("remote shell exited with status {}", exit_status);
                            }
                            ChannelMsg::ExitSignal { signal_name, .. } => {
                                info!("remote shell killed by signal {:?}", signal_name);
                            }
                            ChannelMsg::WindowAdjusted { .. } => {}
                            _ => {
                                debug!("unhandled channel message");
                            }
                        }
                    }

                    else => break,
                }
            }
            debug!("shell channel handler terminated");
        });

        Ok(ShellStreams {
            input: cmd_tx,
            output: out_rx,
        })
    }

    async fn close(&mut self) {
        let _ = self
            .handle
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await;
    }
}
