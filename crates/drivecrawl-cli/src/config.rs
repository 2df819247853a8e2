//! Configuration loading from TOML files

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use drivecrawl_core::RetryPolicy;
use serde::Deserialize;

/// Global configuration for drivecrawl
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub crawl: CrawlConfig,
    pub output: OutputConfig,
    pub retry: RetryConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Worker threads for `explore`
    pub workers: usize,
    /// Upper bound applied to `--workers`
    pub max_workers: usize,
    pub separator: String,
    pub flush_threshold: usize,
    pub channel_capacity: usize,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            workers: drivecrawl_core::default_workers(),
            max_workers: 64,
            separator: "\\".to_string(),
            flush_threshold: drivecrawl_core::worker::DEFAULT_FLUSH_THRESHOLD,
            channel_capacity: drivecrawl_core::aggregator::DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub chunk_size: usize,
    pub cell_limit: usize,
    pub diagnostics_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            chunk_size: drivecrawl_core::writer::DEFAULT_CHUNK_SIZE,
            cell_limit: drivecrawl_core::sink::DEFAULT_CELL_LIMIT,
            diagnostics_dir: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    #[serde(deserialize_with = "deserialize_env_path")]
    pub token_file: PathBuf,
    /// Identity used when `--user` is not given
    #[serde(deserialize_with = "deserialize_env_var")]
    pub identity: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_file: default_token_file(),
            identity: std::env::var("DRIVECRAWL_USER").ok(),
        }
    }
}

fn default_token_file() -> PathBuf {
    directories::ProjectDirs::from("", "", "drivecrawl")
        .map(|dirs| dirs.config_dir().join("tokens.json"))
        .unwrap_or_else(|| PathBuf::from("tokens.json"))
}

/// Deserialize a string that may contain environment variable reference like ${VAR}
fn deserialize_env_var<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| expand_env_var(&s)))
}

/// Like [`deserialize_env_var`]; an unset variable falls back to the default path.
fn deserialize_env_path<'de, D>(deserializer: D) -> Result<PathBuf, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Ok(expand_env_var(&s)
        .map(PathBuf::from)
        .unwrap_or_else(default_token_file))
}

/// Expand ${VAR} to environment variable value
fn expand_env_var(s: &str) -> Option<String> {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).ok()
    } else {
        Some(s.to_string())
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./drivecrawl.toml (current directory)
    /// 2. ~/.config/drivecrawl/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("drivecrawl.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "drivecrawl") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }
}
