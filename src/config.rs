//! Configuration module for Lemming

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use crate::debounce::DebounceOptions;
use crate::paths;
use crate::throttle::ThrottleConfig;

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Default Lemmy instance URL
    #[serde(default = "default_instance")]
    pub instance: String,

    /// Per-host request pacing
    #[serde(default)]
    pub pacing: PacingConfig,

    /// Debounce settings for coalesced writes (recently viewed)
    #[serde(default)]
    pub debounce: DebounceConfig,

    /// Feed defaults
    #[serde(default)]
    pub feed: FeedConfig,

    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// How many recently viewed posts to keep
    #[serde(default = "default_recent_limit")]
    pub recent_limit: usize,
}

/// Request pacing for each remote host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacingConfig {
    /// Minimum spacing between requests to the same host, in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Queue polling resolution, in milliseconds
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

/// Debounce window settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebounceConfig {
    /// Quiet period in milliseconds
    #[serde(default = "default_wait_ms")]
    pub wait_ms: u64,

    /// Fire on the first call of a burst
    #[serde(default)]
    pub leading: bool,

    /// Fire after the burst goes quiet
    #[serde(default = "default_trailing")]
    pub trailing: bool,
}

/// Feed listing defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Posts per page
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Sort order passed to the server (Active, Hot, New, ...)
    #[serde(default = "default_sort")]
    pub default_sort: String,

    /// Listing type passed to the server (All, Local, Subscribed)
    #[serde(default = "default_listing")]
    pub default_listing: String,
}

fn default_instance() -> String {
    "https://lemmy.ml".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_recent_limit() -> usize {
    100
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_tick_ms() -> u64 {
    10
}

fn default_wait_ms() -> u64 {
    500
}

fn default_trailing() -> bool {
    true
}

fn default_page_size() -> usize {
    20
}

fn default_sort() -> String {
    "Active".to_string()
}

fn default_listing() -> String {
    "All".to_string()
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            tick_ms: default_tick_ms(),
        }
    }
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            wait_ms: default_wait_ms(),
            leading: false,
            trailing: default_trailing(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            default_sort: default_sort(),
            default_listing: default_listing(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            instance: default_instance(),
            pacing: PacingConfig::default(),
            debounce: DebounceConfig::default(),
            feed: FeedConfig::default(),
            request_timeout_secs: default_request_timeout(),
            recent_limit: default_recent_limit(),
        }
    }
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> Result<PathBuf> {
        paths::config_path()
    }

    /// Load config from the default path or create default
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        Self::load_from(&path)
    }

    /// Load config from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to the default path
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path()?;
        self.save_to(&path)
    }

    /// Save config to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")?;

        Ok(())
    }

    /// Pacing for a host queue
    pub fn throttle_config(&self) -> ThrottleConfig {
        ThrottleConfig::new(Duration::from_millis(self.pacing.interval_ms))
            .with_tick(Duration::from_millis(self.pacing.tick_ms))
    }

    /// Debounce options for coalesced writes
    pub fn debounce_options(&self) -> DebounceOptions {
        DebounceOptions::new(Duration::from_millis(self.debounce.wait_ms))
            .leading(self.debounce.leading)
            .trailing(self.debounce.trailing)
    }

    /// HTTP request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.instance = "https://lemmy.world".to_string();
        config.pacing.interval_ms = 250;
        config.debounce.leading = true;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "instance = \"https://beehaw.org\"\n[pacing]\ninterval_ms = 2000\n")
            .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.instance, "https://beehaw.org");
        assert_eq!(config.pacing.interval_ms, 2000);
        assert_eq!(config.pacing.tick_ms, 10);
        assert_eq!(config.feed, FeedConfig::default());
        assert!(config.debounce.trailing);
    }

    #[test]
    fn test_core_option_conversion() {
        let config = Config::default();

        let throttle = config.throttle_config();
        assert_eq!(throttle.interval, Duration::from_secs(1));
        assert_eq!(throttle.tick, Duration::from_millis(10));

        let debounce = config.debounce_options();
        assert_eq!(debounce.wait, Duration::from_millis(500));
        assert!(!debounce.leading);
        assert!(debounce.trailing);
    }
}
