//! Gateway wire types for the chat and agent endpoints.

use crate::agents::{AgentRecord, AgentStatus};
use crate::message::MessageView;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Body of `POST /api/chat/send`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendParams {
    #[serde(default)]
    pub content: Option<String>,
}

/// Body of `POST /api/chat/reply`: `{ msgId, content }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyParams {
    #[serde(default)]
    pub msg_id: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

/// `{ ok: true, message }` after a successful reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyResponse {
    pub ok: bool,
    pub message: MessageView,
}

/// Query of `GET /api/chat/poll`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollQuery {
    pub msg_id: Option<String>,
}

/// `{ ready: false }` or `{ ready: true, message }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollResponse {
    pub ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<MessageView>,
}

impl PollResponse {
    pub fn pending() -> Self {
        Self {
            ready: false,
            message: None,
        }
    }

    pub fn ready(message: MessageView) -> Self {
        Self {
            ready: true,
            message: Some(message),
        }
    }
}

/// Query of `GET /api/chat/history`. `limit` is parsed leniently.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub messages: Vec<MessageView>,
}

/// Query of `GET /api/chat/unread`: `since` is an RFC 3339 timestamp.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UnreadQuery {
    pub since: Option<String>,
}

/// Body of `PATCH /api/agent/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusParams {
    pub status: AgentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatusResponse {
    pub id: String,
    pub name: String,
    pub status: AgentStatus,
    pub updated_at: DateTime<Utc>,
}

impl From<AgentRecord> for AgentStatusResponse {
    fn from(r: AgentRecord) -> Self {
        Self {
            id: r.id,
            name: r.name,
            status: r.status,
            updated_at: r.updated_at,
        }
    }
}

/// Error body for every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
