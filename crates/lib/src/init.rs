//! Initialize the configuration directory: create ~/.relay, a default config and an empty agent registry.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config;

/// Create the config directory and default files if they do not exist.
/// - Creates the config directory (parent of config file path).
/// - Writes `config.json` with `{}` if missing.
/// - Writes the agent registry (default `agents.json`) with `[]` if missing.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        std::fs::write(config_path, b"{}")
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    }

    let (cfg, _) = config::load_config(Some(config_path.to_path_buf()))?;
    let registry = config::resolve_registry_path(&cfg, config_path);
    if !registry.exists() {
        if let Some(parent) = registry.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating registry directory {}", parent.display()))?;
        }
        std::fs::write(&registry, b"[]")
            .with_context(|| format!("writing agent registry to {}", registry.display()))?;
        log::info!("created agent registry at {}", registry.display());
    } else {
        log::debug!("agent registry already exists at {}, skipping", registry.display());
    }

    Ok(config_dir.to_path_buf())
}
