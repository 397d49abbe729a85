//! Push notifier: wakes an idle worker when a message is waiting for it.
//!
//! Best effort only. Events are not persisted or retried, and a worker that is not
//! subscribed simply misses them. Correctness comes from the message store.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};

/// Events sent to worker subscriptions, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PushEvent {
    /// A user message is waiting. `msg_id` is the user message, `agent_msg_id` the
    /// placeholder the worker must answer.
    #[serde(rename = "chat:incoming", rename_all = "camelCase")]
    ChatIncoming {
        msg_id: String,
        agent_msg_id: String,
        user_id: String,
        agent_id: String,
        content: String,
    },
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "shutdown")]
    Shutdown,
}

impl PushEvent {
    pub fn type_name(&self) -> &'static str {
        match self {
            PushEvent::ChatIncoming { .. } => "chat:incoming",
            PushEvent::Ping => "ping",
            PushEvent::Shutdown => "shutdown",
        }
    }
}

/// A worker channel address.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct ChannelAddress {
    pub user_id: String,
    pub agent_id: String,
}

impl ChannelAddress {
    pub fn new(user_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            agent_id: agent_id.into(),
        }
    }
}

/// One broadcast channel per address; every subscription on that address gets each event.
pub struct PushNotifier {
    capacity: usize,
    channels: RwLock<HashMap<ChannelAddress, broadcast::Sender<PushEvent>>>,
}

impl PushNotifier {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: RwLock::new(HashMap::new()),
        }
    }

    pub async fn subscribe(&self, address: ChannelAddress) -> broadcast::Receiver<PushEvent> {
        let mut g = self.channels.write().await;
        g.entry(address)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Deliver to the subscriptions on `address`. Returns how many were reached; zero
    /// means the event was dropped.
    pub async fn notify(&self, address: &ChannelAddress, event: PushEvent) -> usize {
        let typ = event.type_name();
        let sent = {
            let g = self.channels.read().await;
            g.get(address).and_then(|tx| tx.send(event).ok()).unwrap_or(0)
        };
        if sent > 0 {
            log::info!(
                "push {} to user {} agent {} ({} connection(s))",
                typ,
                address.user_id,
                address.agent_id,
                sent
            );
        } else {
            log::warn!(
                "push {} dropped: no subscriber for user {} agent {}",
                typ,
                address.user_id,
                address.agent_id
            );
            self.prune().await;
        }
        sent
    }

    /// Deliver to every address (heartbeat, shutdown).
    pub async fn broadcast(&self, event: PushEvent) -> usize {
        let g = self.channels.read().await;
        g.values()
            .map(|tx| tx.send(event.clone()).unwrap_or(0))
            .sum()
    }

    /// Drop channels nobody listens on.
    pub async fn prune(&self) {
        self.channels
            .write()
            .await
            .retain(|_, tx| tx.receiver_count() > 0);
    }

    pub async fn subscriber_count(&self) -> usize {
        let g = self.channels.read().await;
        g.values().map(|tx| tx.receiver_count()).sum()
    }
}
