//! Guildward configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{GuildwardError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuildwardConfig {
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl GuildwardConfig {
    /// Load config from the default path (~/.guildward/config.toml).
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
            .map_err(|e| GuildwardError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| GuildwardError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| GuildwardError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Guildward home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".guildward")
    }
}

/// Discord connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Seconds between guild-membership polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
}

fn bool_true() -> bool {
    true
}
fn default_poll_interval() -> u64 {
    30
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            enabled: true,
            poll_interval: default_poll_interval(),
        }
    }
}

/// Persistent store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the sqlite database file.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    "~/.guildward/guildward.db".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// Reconciler tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Wait before every reconciliation read, bridging replication lag
    /// between an admin write and this process's read. A tunable, not a
    /// magic constant.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Seconds between periodic task reconciliations.
    #[serde(default = "default_task_resync_secs")]
    pub task_resync_secs: u64,
    /// Seconds between periodic guild reconciliations.
    #[serde(default = "default_guild_resync_secs")]
    pub guild_resync_secs: u64,
    /// Messages fetched per channel when warming history caches.
    #[serde(default = "default_backfill_limit")]
    pub backfill_limit: usize,
    /// Delete known-server rows (and their dependent rows) for guilds the
    /// bot no longer belongs to. When false, stale rows are retained and
    /// only relabeled.
    #[serde(default)]
    pub purge_departed: bool,
}

fn default_settle_delay_ms() -> u64 {
    500
}
fn default_task_resync_secs() -> u64 {
    60
}
fn default_guild_resync_secs() -> u64 {
    3600
}
fn default_backfill_limit() -> usize {
    50
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            task_resync_secs: default_task_resync_secs(),
            guild_resync_secs: default_guild_resync_secs(),
            backfill_limit: default_backfill_limit(),
            purge_departed: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GuildwardConfig::default();
        assert_eq!(config.scheduler.settle_delay_ms, 500);
        assert_eq!(config.scheduler.task_resync_secs, 60);
        assert_eq!(config.scheduler.guild_resync_secs, 3600);
        assert!(!config.scheduler.purge_departed);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: GuildwardConfig = toml::from_str(
            r#"
            [scheduler]
            settle_delay_ms = 50
            purge_departed = true
            "#,
        )
        .unwrap();
        assert_eq!(config.scheduler.settle_delay_ms, 50);
        assert!(config.scheduler.purge_departed);
        assert_eq!(config.scheduler.task_resync_secs, 60);
    }
}
