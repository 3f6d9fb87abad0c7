use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::cache::DEFAULT_TTL;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    /// Address the local API listens on
    pub bind_address: String,
    pub database_url: String,
    /// Directory of the front-end files served under `/`
    pub static_dir: String,
    /// Feed-to-JSON proxy endpoint; the feed URL goes in `rss_url`
    pub proxy_url: String,
    /// Lifetime of a merged article list in seconds
    pub cache_ttl_secs: u64,
    pub request_timeout_secs: u64,
    pub sync: SyncConfig,
    /// Folders created on first start, before anything was stored
    pub folders: Vec<SeedFolder>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:3000".to_string(),
            database_url: "sqlite:orbit_reader.db?mode=rwc".to_string(),
            static_dir: "static".to_string(),
            proxy_url: "https://api.rss2json.com/v1/api.json".to_string(),
            cache_ttl_secs: DEFAULT_TTL.as_secs(),
            request_timeout_secs: 30,
            sync: SyncConfig::default(),
            folders: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SyncConfig {
    pub api_base: String,
    /// Delay before the automatic pull at startup, in milliseconds
    pub startup_pull_delay_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            startup_pull_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SeedFolder {
    pub name: String,
    #[serde(default)]
    pub feeds: Vec<String>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
