//! Agent registry: one worker agent per user, its liveness, and its hashed worker token.
//!
//! Persisted as a JSON file next to the config. The file is shared: `relay register`
//! adds entries while a gateway may be running, and the gateway rewrites it when an
//! agent's status changes. Every mutation re-reads the file before writing it back,
//! and lookups reload it when its modification time or size moved, so neither process
//! works from a stale copy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::sync::RwLock;

const TOKEN_PREFIX: &str = "ta_";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Online,
    #[default]
    Offline,
}

/// One registered agent. Only the SHA-256 of the worker token is kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRecord {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub status: AgentStatus,
    pub token_hash: String,
    pub updated_at: DateTime<Utc>,
}

impl AgentRecord {
    pub fn is_online(&self) -> bool {
        self.status == AgentStatus::Online
    }
}

/// Who a worker credential speaks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerIdentity {
    pub user_id: String,
    pub agent_id: String,
}

/// New worker token: `ta_` followed by 32 random bytes in hex.
pub fn generate_token() -> anyhow::Result<String> {
    let mut bytes = [0u8; 32];
    getrandom::getrandom(&mut bytes)
        .map_err(|e| anyhow::anyhow!("generating worker token: {}", e))?;
    Ok(format!("{}{}", TOKEN_PREFIX, to_hex(&bytes)))
}

/// Hex SHA-256 of a token, the form stored in the registry.
pub fn hash_token(token: &str) -> String {
    to_hex(&Sha256::digest(token.as_bytes()))
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[derive(Default)]
struct Registry {
    records: Vec<AgentRecord>,
    /// File stamp (modification time, length) when `records` was read or last written.
    stamp: Option<(SystemTime, u64)>,
}

pub struct AgentDirectory {
    path: Option<PathBuf>,
    entries: RwLock<Registry>,
}

async fn file_stamp(path: &Path) -> Option<(SystemTime, u64)> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    Some((meta.modified().ok()?, meta.len()))
}

/// Read the registry file. Missing means empty; unparsable is logged and treated as empty.
async fn read_records(path: &Path) -> Vec<AgentRecord> {
    match tokio::fs::read_to_string(path).await {
        Ok(s) => serde_json::from_str(&s).unwrap_or_else(|e| {
            log::warn!("agent registry {} is invalid, starting empty: {}", path.display(), e);
            Vec::new()
        }),
        Err(_) => Vec::new(),
    }
}

impl AgentDirectory {
    /// Load from path; if file missing or invalid, starts empty.
    pub async fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let registry = Registry {
            stamp: file_stamp(&path).await,
            records: read_records(&path).await,
        };
        Self {
            path: Some(path),
            entries: RwLock::new(registry),
        }
    }

    /// Registry that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: RwLock::new(Registry::default()),
        }
    }

    /// Pick up changes another process wrote since the last read.
    async fn refresh(&self) {
        let Some(ref path) = self.path else {
            return;
        };
        let stamp = file_stamp(path).await;
        if stamp.is_none() || self.entries.read().await.stamp == stamp {
            return;
        }
        let mut g = self.entries.write().await;
        if g.stamp != stamp {
            log::debug!("agent registry {} changed on disk, reloading", path.display());
            g.records = read_records(path).await;
            g.stamp = stamp;
        }
    }

    /// Apply `change` to the records as they are on disk right now, then write them back.
    async fn update<T>(&self, change: impl FnOnce(&mut Vec<AgentRecord>) -> T) -> std::io::Result<T> {
        let mut g = self.entries.write().await;
        let Some(ref path) = self.path else {
            return Ok(change(&mut g.records));
        };
        if file_stamp(path).await.is_some() {
            g.records = read_records(path).await;
        }
        let out = change(&mut g.records);

        let json = serde_json::to_string_pretty(&g.records)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write then rename so a concurrent reader never sees a half-written file.
        let tmp = path.with_extension(format!("json.{}.tmp", std::process::id()));
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        g.stamp = file_stamp(path).await;
        Ok(out)
    }

    /// Register (or re-key) the agent for `user_id`. Returns the record and the
    /// plaintext token, which is not recoverable afterwards.
    pub async fn register(
        &self,
        user_id: impl Into<String>,
        name: impl Into<String>,
    ) -> anyhow::Result<(AgentRecord, String)> {
        let user_id = user_id.into();
        let name = name.into();
        let token = generate_token()?;
        let token_hash = hash_token(&token);
        let record = self
            .update(|entries| {
                if let Some(e) = entries.iter_mut().find(|e| e.user_id == user_id) {
                    e.name = name;
                    e.token_hash = token_hash;
                    e.updated_at = Utc::now();
                    e.clone()
                } else {
                    let record = AgentRecord {
                        id: format!("agent-{}", uuid::Uuid::new_v4()),
                        user_id,
                        name,
                        status: AgentStatus::Offline,
                        token_hash,
                        updated_at: Utc::now(),
                    };
                    entries.push(record.clone());
                    record
                }
            })
            .await?;
        Ok((record, token))
    }

    /// Resolve a presented worker token.
    pub async fn authenticate(&self, token: &str) -> Option<WorkerIdentity> {
        let token = token.trim();
        if token.is_empty() {
            return None;
        }
        let hash = hash_token(token);
        self.refresh().await;
        let g = self.entries.read().await;
        g.records
            .iter()
            .find(|e| e.token_hash == hash)
            .map(|e| WorkerIdentity {
                user_id: e.user_id.clone(),
                agent_id: e.id.clone(),
            })
    }

    pub async fn for_user(&self, user_id: &str) -> Option<AgentRecord> {
        self.refresh().await;
        let g = self.entries.read().await;
        g.records.iter().find(|e| e.user_id == user_id).cloned()
    }

    /// Update liveness and persist. Returns the updated record, or None for an unknown id.
    pub async fn set_status(
        &self,
        agent_id: &str,
        status: AgentStatus,
    ) -> anyhow::Result<Option<AgentRecord>> {
        let record = self
            .update(|entries| {
                let e = entries.iter_mut().find(|e| e.id == agent_id)?;
                e.status = status;
                e.updated_at = Utc::now();
                Some(e.clone())
            })
            .await?;
        Ok(record)
    }
}
