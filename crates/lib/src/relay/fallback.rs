//! Reply path used when the user's agent is offline or absent.

use crate::config::FallbackConfig;
use crate::message::Message;
use async_trait::async_trait;

/// Produces a synchronous reply without a worker. The hosted language model lives
/// behind this trait; the relay only calls it.
#[async_trait]
pub trait FallbackResponder: Send + Sync {
    async fn reply(
        &self,
        agent_name: &str,
        content: &str,
        history: &[Message],
    ) -> anyhow::Result<String>;
}

/// Answers with configured text; `{agent}` is replaced by the agent name.
pub struct StaticFallback {
    template: String,
}

impl StaticFallback {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn from_config(config: &FallbackConfig) -> Self {
        Self::new(config.reply.clone())
    }
}

#[async_trait]
impl FallbackResponder for StaticFallback {
    async fn reply(
        &self,
        agent_name: &str,
        _content: &str,
        _history: &[Message],
    ) -> anyhow::Result<String> {
        Ok(self.template.replace("{agent}", agent_name))
    }
}
