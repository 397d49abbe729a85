//! End-user HTTP client: submit, poll, history.

use crate::client::error::{check, ClientError};
use crate::client::poll_loop::PollSource;
use crate::gateway::{HistoryResponse, PollResponse, SendParams};
use crate::message::MessageView;
use crate::relay::Submission;
use async_trait::async_trait;

/// Client for the chat endpoints, authenticated with a session token.
#[derive(Clone)]
pub struct ChatClient {
    base_url: String,
    session_token: String,
    client: reqwest::Client,
}

impl ChatClient {
    pub fn new(base_url: impl Into<String>, session_token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session_token: session_token.into(),
            client: reqwest::Client::new(),
        }
    }

    /// POST /api/chat/send.
    pub async fn send(&self, content: &str) -> Result<Submission, ClientError> {
        let url = format!("{}/api/chat/send", self.base_url);
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.session_token)
            .json(&SendParams {
                content: Some(content.to_string()),
            })
            .send()
            .await?;
        Ok(check(res).await?.json().await?)
    }

    /// GET /api/chat/poll?msgId=.
    pub async fn poll(&self, msg_id: &str) -> Result<PollResponse, ClientError> {
        let url = format!("{}/api/chat/poll", self.base_url);
        let res = self
            .client
            .get(&url)
            .bearer_auth(&self.session_token)
            .query(&[("msgId", msg_id)])
            .send()
            .await?;
        Ok(check(res).await?.json().await?)
    }

    /// GET /api/chat/history?limit=.
    pub async fn history(&self, limit: Option<usize>) -> Result<Vec<MessageView>, ClientError> {
        let url = format!("{}/api/chat/history", self.base_url);
        let mut req = self.client.get(&url).bearer_auth(&self.session_token);
        if let Some(limit) = limit {
            req = req.query(&[("limit", limit.to_string())]);
        }
        let res = req.send().await?;
        let body: HistoryResponse = check(res).await?.json().await?;
        Ok(body.messages)
    }
}

#[async_trait]
impl PollSource for ChatClient {
    async fn poll(&self, msg_id: &str) -> Result<PollResponse, ClientError> {
        ChatClient::poll(self, msg_id).await
    }
}
