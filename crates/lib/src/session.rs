//! End-user sessions: bearer session token -> user id.
//!
//! Seeded from `config.users`. Login and session issuance live outside the relay;
//! this table is what the submit, poll and history endpoints authenticate against.

use crate::config::Config;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// User identifier (opaque string).
pub type UserId = String;

pub struct UserSessions {
    inner: RwLock<HashMap<String, UserId>>,
}

impl Default for UserSessions {
    fn default() -> Self {
        Self::new()
    }
}

impl UserSessions {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let map = config
            .users
            .iter()
            .filter(|u| !u.session_token.trim().is_empty())
            .map(|u| (u.session_token.trim().to_string(), u.id.clone()))
            .collect();
        Self {
            inner: RwLock::new(map),
        }
    }

    pub async fn insert(&self, token: impl Into<String>, user_id: impl Into<UserId>) {
        self.inner.write().await.insert(token.into(), user_id.into());
    }

    pub async fn authenticate(&self, token: &str) -> Option<UserId> {
        self.inner.read().await.get(token.trim()).cloned()
    }
}
