//! Worker HTTP client: reply, catch up, report status.

use crate::agents::AgentStatus;
use crate::client::error::{check, ClientError};
use crate::gateway::{AgentStatusResponse, ReplyParams, ReplyResponse, StatusParams};
use crate::message::MessageView;
use crate::relay::Unread;
use chrono::{DateTime, Utc};

/// Result of posting a reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyAck {
    Accepted(MessageView),
    /// 409: an earlier attempt already resolved the placeholder. A retrying worker
    /// treats this as success.
    AlreadyResolved,
}

#[derive(Clone)]
pub struct WorkerClient {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl WorkerClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// WebSocket URL of the push subscription (`http` -> `ws`, `https` -> `wss`).
    pub fn subscribe_url(&self) -> String {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            self.base_url.clone()
        };
        format!("{}/api/agent/subscribe", ws_base)
    }

    /// POST /api/chat/reply.
    pub async fn reply(&self, msg_id: &str, content: &str) -> Result<ReplyAck, ClientError> {
        let url = format!("{}/api/chat/reply", self.base_url);
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&ReplyParams {
                msg_id: Some(msg_id.to_string()),
                content: Some(content.to_string()),
            })
            .send()
            .await?;
        match check(res).await {
            Ok(res) => {
                let body: ReplyResponse = res.json().await?;
                Ok(ReplyAck::Accepted(body.message))
            }
            Err(ClientError::Api { status: 409, .. }) => Ok(ReplyAck::AlreadyResolved),
            Err(e) => Err(e),
        }
    }

    /// GET /api/chat/unread?since=.
    pub async fn unread(&self, since: Option<DateTime<Utc>>) -> Result<Unread, ClientError> {
        let url = format!("{}/api/chat/unread", self.base_url);
        let mut req = self.client.get(&url).bearer_auth(&self.token);
        if let Some(since) = since {
            req = req.query(&[("since", since.to_rfc3339())]);
        }
        let res = req.send().await?;
        Ok(check(res).await?.json().await?)
    }

    /// PATCH /api/agent/status.
    pub async fn set_status(&self, status: AgentStatus) -> Result<AgentStatusResponse, ClientError> {
        let url = format!("{}/api/agent/status", self.base_url);
        let res = self
            .client
            .patch(&url)
            .bearer_auth(&self.token)
            .json(&StatusParams { status })
            .send()
            .await?;
        Ok(check(res).await?.json().await?)
    }
}
