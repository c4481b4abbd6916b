use serde::Deserialize;
use std::path::Path;

use crate::error::ConfigError;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub spider_settings: SpiderSettings,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SpiderSettings {
    #[serde(default = "default_enable")]
    pub enable: bool,
    /// Roster location: an http(s) URL or a local file path
    pub json_url: String,
    /// Maximum number of articles taken from each feed
    #[serde(default = "default_article_count")]
    pub article_count: usize,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default)]
    pub force_ipv4: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_all_path")]
    pub all_path: String,
    #[serde(default = "default_errors_path")]
    pub errors_path: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            all_path: default_all_path(),
            errors_path: default_errors_path(),
        }
    }
}

fn default_enable() -> bool {
    true
}

fn default_article_count() -> usize {
    5
}

fn default_max_workers() -> usize {
    10
}

fn default_all_path() -> String {
    "all.json".to_string()
}

fn default_errors_path() -> String {
    "errors.json".to_string()
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.spider_settings.article_count == 0 {
            return Err(ConfigError::Invalid(
                "article_count must be at least 1".to_string(),
            ));
        }
        if self.spider_settings.json_url.trim().is_empty() {
            return Err(ConfigError::Invalid("json_url must not be blank".to_string()));
        }
        Ok(())
    }
}
