//! Daemon configuration loaded from `~/.sentinel/config.toml`.

use fs_err as fs;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use sentinel_feed::FeedConfig;

const SENTINEL_DIR: &str = ".sentinel";
const CONFIG_FILE_NAME: &str = "config.toml";
const SOCKET_NAME: &str = "daemon.sock";
pub const SOCKET_ENV_VAR: &str = "SENTINEL_DAEMON_SOCKET";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub feed: FeedConfig,
    pub daemon: DaemonSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DaemonSection {
    pub socket_path: Option<PathBuf>,
}

pub fn sentinel_dir() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(SENTINEL_DIR))
}

pub fn default_config_path() -> Result<PathBuf, String> {
    Ok(sentinel_dir()?.join(CONFIG_FILE_NAME))
}

/// Missing file means defaults. Read or parse failures are returned so the
/// caller can decide how loud to be.
pub fn load_config(path: Option<PathBuf>) -> Result<DaemonConfig, String> {
    let config_path = match path {
        Some(path) => path,
        None => default_config_path()?,
    };

    if !config_path.exists() {
        return Ok(DaemonConfig::default());
    }

    let content = fs::read_to_string(&config_path).map_err(|err| {
        format!(
            "Failed to read config {}: {}",
            config_path.display(),
            err
        )
    })?;
    parse_config(&content, &config_path)
}

fn parse_config(content: &str, path: &Path) -> Result<DaemonConfig, String> {
    toml::from_str::<DaemonConfig>(content)
        .map_err(|err| format!("Failed to parse config {}: {}", path.display(), err))
}

/// Env override, then config, then `~/.sentinel/daemon.sock`.
pub fn resolve_socket_path(config: &DaemonConfig) -> Result<PathBuf, String> {
    if let Some(path) = std::env::var_os(SOCKET_ENV_VAR).filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    if let Some(path) = config.daemon.socket_path.as_ref() {
        return Ok(path.clone());
    }
    Ok(sentinel_dir()?.join(SOCKET_NAME))
}
