//! Valet configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, ValetError};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValetConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Telegram user id of the administrator, if restricted.
    #[serde(default)]
    pub admin_id: Option<i64>,
    /// Password for the admin HTTP API (`x-admin-password` header).
    #[serde(default = "default_admin_password")]
    pub admin_password: String,
    /// Alternative Bot API endpoint (self-hosted bot-api server).
    #[serde(default)]
    pub api_base: String,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub feeds: FeedConfig,
    #[serde(default)]
    pub connect: ConnectConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

fn default_admin_password() -> String {
    "admin123".into()
}
fn default_db_path() -> String {
    "~/.valet/valet.db".into()
}

impl Default for ValetConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            admin_id: None,
            admin_password: default_admin_password(),
            api_base: String::new(),
            db_path: default_db_path(),
            gateway: GatewayConfig::default(),
            feeds: FeedConfig::default(),
            connect: ConnectConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

impl ValetConfig {
    /// Load config from the default path (~/.valet/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ValetError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| ValetError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| ValetError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Valet home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".valet")
    }
}

/// Admin HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    3097
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Feed polling configuration. The check interval can be overridden at
/// runtime through the settings table; this is the fallback. `keywords`
/// and `exclude` are static filter rules merged with the store-managed
/// ones on every poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

fn default_check_interval() -> u64 {
    30
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
            keywords: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

/// Gateway connect retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

fn default_max_retries() -> u32 {
    5
}
fn default_retry_delay_secs() -> u64 {
    5
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

/// Supervised worker process configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Default artifact URL used when the start request carries none.
    #[serde(default)]
    pub binary_url: String,
    /// Fixed port for the worker; random high port when absent.
    #[serde(default)]
    pub port: Option<u16>,
    /// Seconds to wait before deleting the downloaded artifact. The launched
    /// process keeps its executable image open on most unix platforms, but
    /// not everywhere — set `keep_artifact` if deletion breaks the worker.
    #[serde(default = "default_cleanup_delay_secs")]
    pub cleanup_delay_secs: u64,
    #[serde(default)]
    pub keep_artifact: bool,
}

fn default_cleanup_delay_secs() -> u64 {
    2
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            binary_url: String::new(),
            port: None,
            cleanup_delay_secs: default_cleanup_delay_secs(),
            keep_artifact: false,
        }
    }
}
