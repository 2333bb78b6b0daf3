//! elasticgoose configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Commit/restore/sync behavior
    pub elastic: ElasticConfig,

    /// Host discovery
    pub discovery: DiscoveryConfig,

    /// Port range for worker services
    pub network: NetworkConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .elasticgoose.yml
        let local_config = PathBuf::from(".elasticgoose.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/elasticgoose/elasticgoose.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("elasticgoose").join("elasticgoose.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Commit/restore/sync behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElasticConfig {
    /// How long sync waits on a peer before treating it as failed
    #[serde(rename = "sync-timeout-ms")]
    pub sync_timeout_ms: u64,

    /// Rank whose live values win on sync
    #[serde(rename = "root-rank")]
    pub root_rank: usize,

    /// Broadcast plain values on sync (otherwise only special state is synced)
    #[serde(rename = "sync-regular")]
    pub sync_regular: bool,

    /// Commit right after a successful membership-change sync
    #[serde(rename = "commit-after-sync")]
    pub commit_after_sync: bool,

    /// Channel buffer size for state and driver messages
    #[serde(rename = "channel-buffer")]
    pub channel_buffer: usize,
}

impl Default for ElasticConfig {
    fn default() -> Self {
        Self {
            sync_timeout_ms: 30_000,
            root_rank: 0,
            sync_regular: false,
            commit_after_sync: true,
            channel_buffer: 256,
        }
    }
}

impl ElasticConfig {
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }
}

/// Host discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Shell command printing one `host[:slots]` per line
    pub script: Option<String>,

    /// Seconds between discovery polls
    #[serde(rename = "poll-interval-secs")]
    pub poll_interval_secs: u64,

    /// Slots for hosts listed without a count
    #[serde(rename = "default-slots")]
    pub default_slots: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            script: None,
            poll_interval_secs: 1,
            default_slots: 1,
        }
    }
}

impl DiscoveryConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Port range configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    #[serde(rename = "min-port")]
    pub min_port: u16,

    #[serde(rename = "max-port")]
    pub max_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            min_port: 20_000,
            max_port: 30_000,
        }
    }
}
