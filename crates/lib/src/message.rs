//! Chat messages exchanged between a user and their agent.
//!
//! A reply placeholder is an agent message in [`MessageStatus::Pending`] with no content.
//! It becomes [`MessageStatus::Resolved`] exactly once, when the worker's reply is ingested.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque message identifier.
pub type MessageId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Reply not yet available; `content` is `None`.
    Pending,
    Resolved,
}

/// A stored message. `id`, `user_id` and `agent_id` never change after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub status: MessageStatus,
    pub content: Option<String>,
    pub user_id: String,
    pub agent_id: Option<String>,
    /// For agent messages: the user message this one answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
    pub created_at: DateTime<Utc>,
}

fn new_id() -> MessageId {
    format!("msg-{}", uuid::Uuid::new_v4())
}

impl Message {
    /// A user-authored message.
    pub fn user(
        user_id: impl Into<String>,
        agent_id: Option<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id(),
            role: Role::User,
            status: MessageStatus::Resolved,
            content: Some(content.into()),
            user_id: user_id.into(),
            agent_id,
            reply_to: None,
            created_at: Utc::now(),
        }
    }

    /// A reply placeholder awaiting the worker.
    pub fn pending(
        user_id: impl Into<String>,
        agent_id: impl Into<String>,
        reply_to: impl Into<MessageId>,
    ) -> Self {
        Self {
            id: new_id(),
            role: Role::Agent,
            status: MessageStatus::Pending,
            content: None,
            user_id: user_id.into(),
            agent_id: Some(agent_id.into()),
            reply_to: Some(reply_to.into()),
            created_at: Utc::now(),
        }
    }

    /// An agent reply that is already final (fallback path).
    pub fn agent(
        user_id: impl Into<String>,
        agent_id: Option<String>,
        reply_to: impl Into<MessageId>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id(),
            role: Role::Agent,
            status: MessageStatus::Resolved,
            content: Some(content.into()),
            user_id: user_id.into(),
            agent_id,
            reply_to: Some(reply_to.into()),
            created_at: Utc::now(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == MessageStatus::Pending
    }

    /// Client-facing projection. `None` while the message is pending.
    pub fn view(&self) -> Option<MessageView> {
        if self.is_pending() {
            return None;
        }
        Some(MessageView {
            id: self.id.clone(),
            content: self.content.clone().unwrap_or_default(),
            role: self.role,
            created_at: self.created_at,
            agent_id: self.agent_id.clone(),
        })
    }
}

/// Wire shape of a resolved message: `{ id, content, role, createdAt, agentId }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: MessageId,
    pub content: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub agent_id: Option<String>,
}
