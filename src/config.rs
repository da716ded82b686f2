use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::ConfigError;

pub const BOT_TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";
pub const SEARCH_API_KEY_ENV: &str = "SEARCH_API_KEY";
pub const SEARCH_BASE_URL_ENV: &str = "SEARCH_BASE_URL";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub profiles: ProfilesConfig,
    #[serde(default)]
    pub bot: BotConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Empty means everyone may talk to the bot
    #[serde(default)]
    pub allowed_user_ids: Vec<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_search_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base_url: default_search_base_url(),
            api_key: String::new(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProfilesConfig {
    #[serde(default = "default_db_path")]
    pub database_path: PathBuf,
}

impl Default for ProfilesConfig {
    fn default() -> Self {
        Self {
            database_path: default_db_path(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BotConfig {
    /// Delay between confirming a shutdown and the process exiting
    #[serde(default = "default_shutdown_delay_secs")]
    pub shutdown_delay_secs: u64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            shutdown_delay_secs: default_shutdown_delay_secs(),
        }
    }
}

fn default_search_base_url() -> String {
    "https://solveforall-search-or-solve-v1.p.mashape.com/service/content_for_text.do"
        .to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_db_path() -> PathBuf {
    PathBuf::from("profiles.db")
}

fn default_shutdown_delay_secs() -> u64 {
    3
}

impl Config {
    /// Load the config file (if present), apply environment overrides and
    /// check that the mandatory bot token is set.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!(
                "No config file at {}, using defaults and environment",
                path.display()
            );
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Environment values win over the file. Empty values are ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(token) = get(BOT_TOKEN_ENV) {
            debug!("Using bot token from {}", BOT_TOKEN_ENV);
            self.telegram.bot_token = token;
        }
        if let Some(key) = get(SEARCH_API_KEY_ENV) {
            self.search.api_key = key;
        }
        if let Some(url) = get(SEARCH_BASE_URL_ENV) {
            self.search.base_url = url;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.telegram.bot_token.trim().is_empty() {
            return Err(ConfigError::MissingCredential {
                name: BOT_TOKEN_ENV,
            });
        }
        Ok(())
    }
}
