//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.relay/config.json`) and environment.
//! Every field has a default so an empty `{}` file is a valid config.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Gateway server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Relay protocol tuning (poll cadence, heartbeat, buffers).
    #[serde(default)]
    pub relay: RelayConfig,

    /// Reply used when a user's agent is offline.
    #[serde(default)]
    pub fallback: FallbackConfig,

    /// End-user session table (session token -> user id).
    #[serde(default)]
    pub users: Vec<UserConfig>,

    /// Agent registry location.
    #[serde(default)]
    pub agents: AgentsConfig,

    /// Settings for the CLI chat client and reference worker.
    #[serde(default)]
    pub client: ClientConfig,
}

/// Gateway bind and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for HTTP and WebSocket (default 15152).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
}

fn default_gateway_port() -> u16 {
    15152
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
        }
    }
}

/// Relay protocol tuning. The poll interval and deadline trade reply latency
/// against request volume; operators tune them here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayConfig {
    /// Delay between client polls of a pending reply (default 2000).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Client gives up once this much time has elapsed without a reply (default 35000).
    #[serde(default = "default_poll_deadline_ms")]
    pub poll_deadline_ms: u64,

    /// Interval of `ping` events on worker subscriptions (default 30000).
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Per-address push buffer; slow subscribers skip older events beyond this.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Default number of messages returned by the history endpoint.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Text shown by the client when a reply does not arrive in time.
    #[serde(default = "default_timeout_notice")]
    pub timeout_notice: String,
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_poll_deadline_ms() -> u64 {
    35_000
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_event_buffer() -> usize {
    64
}

fn default_history_limit() -> usize {
    50
}

fn default_timeout_notice() -> String {
    "⏱️ Agent response timed out, please try again later".to_string()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            poll_deadline_ms: default_poll_deadline_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            event_buffer: default_event_buffer(),
            history_limit: default_history_limit(),
            timeout_notice: default_timeout_notice(),
        }
    }
}

impl RelayConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_deadline(&self) -> Duration {
        Duration::from_millis(self.poll_deadline_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }
}

/// Fallback reply settings. The hosted language model is not part of this
/// system; the built-in responder answers with fixed text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackConfig {
    /// Reply text. `{agent}` is replaced by the agent name.
    #[serde(default = "default_fallback_reply")]
    pub reply: String,

    /// Name used for users without a registered agent.
    #[serde(default = "default_fallback_agent_name")]
    pub agent_name: String,
}

fn default_fallback_reply() -> String {
    "I'm {agent}, your assistant. My worker is offline right now, so this is an automatic reply."
        .to_string()
}

fn default_fallback_agent_name() -> String {
    "AI assistant".to_string()
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            reply: default_fallback_reply(),
            agent_name: default_fallback_agent_name(),
        }
    }
}

/// One end-user and the session token that authenticates them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub session_token: String,
}

/// Agent registry settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentsConfig {
    /// Registry file. Relative paths are resolved against the config file's parent.
    /// Default: `agents.json` next to the config file.
    #[serde(default)]
    pub registry: Option<PathBuf>,
}

/// Client-side settings (CLI chat and worker).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Gateway base URL. Overridden by RELAY_HUB_URL env. Default derives from gateway bind/port.
    pub hub_url: Option<String>,
    /// End-user session token. Overridden by RELAY_SESSION_TOKEN env.
    pub session_token: Option<String>,
    /// Worker token from `relay register`. Overridden by RELAY_WORKER_TOKEN env.
    pub worker_token: Option<String>,
}

/// Non-empty trimmed value of an env var.
fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

fn config_value(value: &Option<String>) -> Option<String> {
    value
        .as_ref()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Resolve the gateway base URL: env RELAY_HUB_URL overrides config, else http://bind:port.
pub fn resolve_hub_url(config: &Config) -> String {
    env_value("RELAY_HUB_URL")
        .or_else(|| config_value(&config.client.hub_url))
        .unwrap_or_else(|| {
            format!(
                "http://{}:{}",
                config.gateway.bind.trim(),
                config.gateway.port
            )
        })
        .trim_end_matches('/')
        .to_string()
}

/// Resolve the end-user session token: env RELAY_SESSION_TOKEN overrides config.
pub fn resolve_session_token(config: &Config) -> Option<String> {
    env_value("RELAY_SESSION_TOKEN").or_else(|| config_value(&config.client.session_token))
}

/// Resolve the worker token: env RELAY_WORKER_TOKEN overrides config.
pub fn resolve_worker_token(config: &Config) -> Option<String> {
    env_value("RELAY_WORKER_TOKEN").or_else(|| config_value(&config.client.worker_token))
}

/// True if the bind address is loopback (127.0.0.1, ::1, etc.).
pub fn is_loopback_bind(bind: &str) -> bool {
    let b = bind.trim();
    b == "127.0.0.1" || b == "::1" || b == "localhost"
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("RELAY_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".relay").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

fn config_parent(config_path: &Path) -> &Path {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Resolve the agent registry path: `agents.registry` if set (relative paths resolved
/// against the config file's parent), otherwise `agents.json` next to the config file.
pub fn resolve_registry_path(config: &Config, config_path: &Path) -> PathBuf {
    match &config.agents.registry {
        Some(p) if !p.as_os_str().is_empty() => {
            if p.is_absolute() {
                p.clone()
            } else {
                config_parent(config_path).join(p)
            }
        }
        _ => config_parent(config_path).join("agents.json"),
    }
}

/// Load config from the given path (or the default). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
