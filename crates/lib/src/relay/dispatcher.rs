//! Submission routing: live worker (pending placeholder + push) or synchronous fallback.

use crate::agents::AgentRecord;
use crate::message::{Message, MessageView};
use crate::notifier::{ChannelAddress, PushEvent, PushNotifier};
use crate::relay::error::RelayError;
use crate::relay::fallback::FallbackResponder;
use crate::store::MessageStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Messages of recent history handed to the fallback responder.
const FALLBACK_HISTORY: usize = 10;

/// Result of a submission, in the wire shapes the client expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Submission {
    /// Routed to a live worker: `{ pending: true, agentMsgId, userMessageId }`.
    #[serde(rename_all = "camelCase")]
    Pending {
        pending: bool,
        agent_msg_id: String,
        user_message_id: String,
    },
    /// Answered synchronously: `{ userMessageId, agentMessage }`.
    #[serde(rename_all = "camelCase")]
    Completed {
        user_message_id: String,
        agent_message: MessageView,
    },
}

pub struct RelayDispatcher {
    store: Arc<dyn MessageStore>,
    notifier: Arc<PushNotifier>,
    fallback: Arc<dyn FallbackResponder>,
    default_agent_name: String,
}

impl RelayDispatcher {
    pub fn new(
        store: Arc<dyn MessageStore>,
        notifier: Arc<PushNotifier>,
        fallback: Arc<dyn FallbackResponder>,
        default_agent_name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            notifier,
            fallback,
            default_agent_name: default_agent_name.into(),
        }
    }

    /// Route one user message. Returns without waiting for any worker.
    ///
    /// The user message and the placeholder are created in one batch, so a failed
    /// placeholder write never leaves an orphan user message behind.
    pub async fn submit(
        &self,
        user_id: &str,
        content: &str,
        agent: Option<&AgentRecord>,
    ) -> Result<Submission, RelayError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(RelayError::BadRequest("content must not be empty".to_string()));
        }

        match agent {
            Some(agent) if agent.is_online() => self.submit_to_worker(user_id, content, agent).await,
            _ => self.submit_to_fallback(user_id, content, agent).await,
        }
    }

    async fn submit_to_worker(
        &self,
        user_id: &str,
        content: &str,
        agent: &AgentRecord,
    ) -> Result<Submission, RelayError> {
        let user_msg = Message::user(user_id, Some(agent.id.clone()), content);
        let placeholder = Message::pending(user_id, agent.id.clone(), user_msg.id.clone());
        let user_message_id = user_msg.id.clone();
        let agent_msg_id = placeholder.id.clone();
        self.store.insert(vec![user_msg, placeholder]).await?;
        log::info!(
            "routing message {} to agent {} (placeholder {})",
            user_message_id,
            agent.id,
            agent_msg_id
        );

        // Delivery is not observable here; a lost push surfaces as a client timeout.
        self.notifier
            .notify(
                &ChannelAddress::new(user_id, agent.id.clone()),
                PushEvent::ChatIncoming {
                    msg_id: user_message_id.clone(),
                    agent_msg_id: agent_msg_id.clone(),
                    user_id: user_id.to_string(),
                    agent_id: agent.id.clone(),
                    content: content.to_string(),
                },
            )
            .await;

        Ok(Submission::Pending {
            pending: true,
            agent_msg_id,
            user_message_id,
        })
    }

    async fn submit_to_fallback(
        &self,
        user_id: &str,
        content: &str,
        agent: Option<&AgentRecord>,
    ) -> Result<Submission, RelayError> {
        let agent_id = agent.map(|a| a.id.clone());
        let agent_name = agent
            .map(|a| a.name.as_str())
            .unwrap_or(self.default_agent_name.as_str());
        log::info!(
            "agent for user {} is {}, using fallback reply",
            user_id,
            if agent.is_some() { "offline" } else { "absent" }
        );

        let history = self.store.recent_for_user(user_id, FALLBACK_HISTORY).await?;
        let user_msg = Message::user(user_id, agent_id.clone(), content);
        let user_message_id = user_msg.id.clone();
        self.store.insert(vec![user_msg]).await?;

        let reply = self.fallback.reply(agent_name, content, &history).await?;
        let agent_msg = Message::agent(user_id, agent_id, user_message_id.clone(), reply);
        let view = agent_msg
            .view()
            .ok_or_else(|| anyhow::anyhow!("fallback reply is not resolved"))?;
        self.store.insert(vec![agent_msg]).await?;

        Ok(Submission::Completed {
            user_message_id,
            agent_message: view,
        })
    }
}
