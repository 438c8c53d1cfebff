//! Registry of live bridges, keyed by nickname.
//!
//! Thread-safe bridge management using DashMap for concurrent access. A
//! background dispatcher removes bridges when they disconnect and fans the
//! event out to subscribers.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use crate::bridge::{Bridge, BridgeSettings};
use crate::error::BridgeError;
use crate::keystore::{KeyPolicy, KeyStore};
use crate::known_hosts::KnownHostsStore;
use crate::target::ConnectionTarget;
use crate::transport::Transport;

const RECENT_MAX: usize = 10;

/// A bridge went down.
#[derive(Debug, Clone)]
pub struct DisconnectEvent {
    pub nickname: String,
    pub at: DateTime<Utc>,
}

pub struct Registry {
    bridges: DashMap<String, Arc<Bridge>>,
    /// Serializes creation so two opens with the same nickname cannot race
    /// past the duplicate check.
    create_lock: parking_lot::Mutex<()>,

    transport: Arc<dyn Transport>,
    known_hosts: Arc<KnownHostsStore>,
    keystore: Arc<KeyStore>,
    settings: BridgeSettings,

    events_tx: mpsc::UnboundedSender<String>,
    notifications: broadcast::Sender<DisconnectEvent>,
    recent: Mutex<VecDeque<DisconnectEvent>>,
}

impl Registry {
    pub fn new(
        transport: Arc<dyn Transport>,
        known_hosts: Arc<KnownHostsStore>,
        keystore: Arc<KeyStore>,
        settings: BridgeSettings,
    ) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (notifications, _) = broadcast::channel(64);

        let registry = Arc::new(Self {
            bridges: DashMap::new(),
            create_lock: parking_lot::Mutex::new(()),
            transport,
            known_hosts,
            keystore,
            settings,
            events_tx,
            notifications,
            recent: Mutex::new(VecDeque::new()),
        });

        tokio::spawn(Self::dispatcher(Arc::downgrade(&registry), events_rx));
        registry
    }

    /// Consumes bridge teardown events. Holds only a weak handle so the
    /// registry can be dropped while the task is alive.
    async fn dispatcher(registry: Weak<Registry>, mut events: mpsc::UnboundedReceiver<String>) {
        while let Some(nickname) = events.recv().await {
            let Some(registry) = registry.upgrade() else {
                break;
            };
            debug!("bridge '{}' disconnected, removing from registry", nickname);
            registry.bridges.remove(&nickname);

            let event = DisconnectEvent {
                nickname,
                at: Utc::now(),
            };
            {
                let mut recent = registry.recent.lock();
                recent.push_back(event.clone());
                while recent.len() > RECENT_MAX {
                    recent.pop_front();
                }
            }
            let _ = registry.notifications.send(event);
        }
    }

    /// Open a new bridge and start connecting. Fails when a bridge with
    /// the same nickname is still up.
    pub fn open(
        self: &Arc<Self>,
        target: ConnectionTarget,
        key_policy: KeyPolicy,
        post_login: Option<String>,
    ) -> Result<Arc<Bridge>, BridgeError> {
        let _guard = self.create_lock.lock();

        if self.bridges.contains_key(&target.nickname) {
            return Err(BridgeError::DuplicateConnection(target.nickname));
        }

        info!("opening bridge '{}' to {}", target.nickname, target.address());
        let bridge = Bridge::new(
            target,
            key_policy,
            post_login,
            self.settings.clone(),
            self.keystore.clone(),
            self.known_hosts.clone(),
            self.events_tx.clone(),
        );
        self.bridges
            .insert(bridge.nickname().to_string(), bridge.clone());
        bridge.start(self.transport.clone());
        Ok(bridge)
    }

    /// Open a bridge from a `ssh://user@host:port/#nickname` URI.
    pub fn open_uri(self: &Arc<Self>, uri: &str, key_policy: KeyPolicy) -> Result<Arc<Bridge>, BridgeError> {
        let target = ConnectionTarget::parse_uri(uri)?;
        self.open(target, key_policy, None)
    }

    pub fn find(&self, nickname: &str) -> Option<Arc<Bridge>> {
        self.bridges.get(nickname).map(|b| b.value().clone())
    }

    pub fn count(&self) -> usize {
        self.bridges.len()
    }

    /// Subscribe to teardown notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<DisconnectEvent> {
        self.notifications.subscribe()
    }

    /// Bridges that went down recently, oldest first.
    pub fn recently_disconnected(&self) -> Vec<DisconnectEvent> {
        self.recent.lock().iter().cloned().collect()
    }

    /// Ask every live bridge to tear down.
    pub fn disconnect_all(&self) {
        info!("disconnecting all {} bridges", self.bridges.len());
        for entry in self.bridges.iter() {
            entry.value().disconnect();
        }
    }
}
