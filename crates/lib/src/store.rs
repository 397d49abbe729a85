//! Message store: create, read by id, and the conditional `Pending -> Resolved` update.
//!
//! The relay only talks to the [`MessageStore`] trait. [`MemoryMessageStore`] keeps
//! records in process; durable engines implement the same trait.

use crate::message::{Message, MessageStatus, Role};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("duplicate message id: {0}")]
    Duplicate(String),
    #[error("message store backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Create all messages or none. A duplicate id fails the whole batch.
    async fn insert(&self, messages: Vec<Message>) -> Result<(), StoreError>;

    async fn get(&self, id: &str) -> Result<Option<Message>, StoreError>;

    /// Set `content` and mark resolved only if the record is still pending.
    /// Returns false when no record was affected (unknown id or already resolved).
    async fn resolve(&self, id: &str, content: &str) -> Result<bool, StoreError>;

    /// The user's newest `limit` messages, oldest first.
    async fn recent_for_user(&self, user_id: &str, limit: usize)
        -> Result<Vec<Message>, StoreError>;

    /// The user's unresolved reply placeholders, oldest first.
    async fn pending_for_user(&self, user_id: &str) -> Result<Vec<Message>, StoreError>;

    /// User-authored messages created strictly after `since`, oldest first.
    async fn user_messages_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Message>, StoreError>;
}

struct Entry {
    seq: u64,
    message: Message,
}

#[derive(Default)]
struct Inner {
    next_seq: u64,
    by_id: HashMap<String, Entry>,
}

impl Inner {
    /// Messages matching `pred`, in creation order.
    fn ordered<F>(&self, pred: F) -> Vec<Message>
    where
        F: Fn(&Message) -> bool,
    {
        let mut hits: Vec<&Entry> = self.by_id.values().filter(|e| pred(&e.message)).collect();
        hits.sort_by_key(|e| e.seq);
        hits.into_iter().map(|e| e.message.clone()).collect()
    }
}

/// In-memory store. The write lock is held across check-and-set, which makes
/// `resolve` a compare-and-swap.
pub struct MemoryMessageStore {
    inner: RwLock<Inner>,
}

impl Default for MemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn insert(&self, messages: Vec<Message>) -> Result<(), StoreError> {
        let mut g = self.inner.write().await;
        for (i, m) in messages.iter().enumerate() {
            if g.by_id.contains_key(&m.id) || messages[..i].iter().any(|o| o.id == m.id) {
                return Err(StoreError::Duplicate(m.id.clone()));
            }
        }
        for message in messages {
            let seq = g.next_seq;
            g.next_seq += 1;
            g.by_id.insert(message.id.clone(), Entry { seq, message });
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Message>, StoreError> {
        Ok(self.inner.read().await.by_id.get(id).map(|e| e.message.clone()))
    }

    async fn resolve(&self, id: &str, content: &str) -> Result<bool, StoreError> {
        let mut g = self.inner.write().await;
        match g.by_id.get_mut(id) {
            Some(e) if e.message.status == MessageStatus::Pending => {
                e.message.status = MessageStatus::Resolved;
                e.message.content = Some(content.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn recent_for_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let all = self.inner.read().await.ordered(|m| m.user_id == user_id);
        let skip = all.len().saturating_sub(limit);
        Ok(all.into_iter().skip(skip).collect())
    }

    async fn pending_for_user(&self, user_id: &str) -> Result<Vec<Message>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .ordered(|m| m.user_id == user_id && m.role == Role::Agent && m.is_pending()))
    }

    async fn user_messages_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Message>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .ordered(|m| m.user_id == user_id && m.role == Role::User && m.created_at > since))
    }
}
