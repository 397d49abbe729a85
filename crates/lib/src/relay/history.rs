//! Read paths besides polling: the user's chat history and the worker's catch-up view.

use crate::agents::WorkerIdentity;
use crate::message::{MessageId, MessageView, Role};
use crate::relay::error::RelayError;
use crate::store::MessageStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The user's latest `limit` resolved messages, oldest first. Placeholders that are
/// still pending (including ones whose worker never answered) are left out.
pub async fn history(
    store: &dyn MessageStore,
    user_id: &str,
    limit: usize,
) -> Result<Vec<MessageView>, RelayError> {
    let recent = store.recent_for_user(user_id, limit).await?;
    Ok(recent.iter().filter_map(|m| m.view()).collect())
}

/// A placeholder the worker has not answered yet, with the text it should answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingReply {
    pub msg_id: MessageId,
    #[serde(default)]
    pub user_msg_id: Option<MessageId>,
    #[serde(default)]
    pub content: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A user message created after the worker's `since` mark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissedMessage {
    pub msg_id: MessageId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Unread {
    pub pending_replies: Vec<PendingReply>,
    pub missed_messages: Vec<MissedMessage>,
}

/// What a reconnecting worker may have missed: every unresolved placeholder of its
/// user, and user messages after `since` when given.
pub async fn unread(
    store: &dyn MessageStore,
    worker: &WorkerIdentity,
    since: Option<DateTime<Utc>>,
) -> Result<Unread, RelayError> {
    let mut pending_replies = Vec::new();
    for p in store.pending_for_user(&worker.user_id).await? {
        let prompt = match p.reply_to.as_deref() {
            Some(id) => store.get(id).await?.filter(|m| m.role == Role::User),
            None => None,
        };
        pending_replies.push(PendingReply {
            msg_id: p.id,
            user_msg_id: prompt.as_ref().map(|m| m.id.clone()),
            content: prompt.and_then(|m| m.content),
            created_at: p.created_at,
        });
    }

    let missed_messages = match since {
        Some(since) => store
            .user_messages_since(&worker.user_id, since)
            .await?
            .into_iter()
            .map(|m| MissedMessage {
                msg_id: m.id,
                content: m.content.unwrap_or_default(),
                created_at: m.created_at,
            })
            .collect(),
        None => Vec::new(),
    };

    Ok(Unread {
        pending_replies,
        missed_messages,
    })
}
