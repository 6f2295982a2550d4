use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub core: CoreConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub telegraph: TelegraphConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub source: Vec<SourceConfig>,
    #[serde(default)]
    pub category: Vec<CategoryConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoreConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_max_workers")]
    pub max_workers: u32,
    #[serde(default = "default_browser_concurrency")]
    pub browser_concurrency: u32,
    #[serde(default = "default_min_content_length")]
    pub min_content_length: u32,
    #[serde(default = "default_max_content_length")]
    pub max_content_length: u32,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: String,
    #[serde(default = "default_default_category")]
    pub default_category: String,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

fn default_version() -> u32 {
    1
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_workers() -> u32 {
    5
}
fn default_browser_concurrency() -> u32 {
    2
}
fn default_min_content_length() -> u32 {
    200
}
fn default_max_content_length() -> u32 {
    20_000
}
fn default_cache_ttl() -> String {
    "24h".to_string()
}
fn default_default_category() -> String {
    "general".to_string()
}
fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "newsroom.db".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AiConfig {
    #[serde(default = "default_api_endpoint")]
    pub api_endpoint: String,
    /// Secret — normally supplied via `NEWSROOM_AI_API_KEY`, never required in the file.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_rps")]
    pub rps: u32,
    #[serde(default = "default_summarization_model")]
    pub summarization_model: String,
    #[serde(default = "default_categorization_model")]
    pub categorization_model: String,
    #[serde(default = "default_digest_model")]
    pub digest_model: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_ai_timeout")]
    pub timeout: String,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_endpoint: default_api_endpoint(),
            api_key: None,
            rps: default_rps(),
            summarization_model: default_summarization_model(),
            categorization_model: default_categorization_model(),
            digest_model: default_digest_model(),
            max_retries: default_max_retries(),
            timeout: default_ai_timeout(),
        }
    }
}

fn default_api_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_rps() -> u32 {
    3
}
fn default_summarization_model() -> String {
    "gemini-1.5-flash".to_string()
}
fn default_categorization_model() -> String {
    "gemini-1.5-flash".to_string()
}
fn default_digest_model() -> String {
    "gemini-1.5-flash".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_ai_timeout() -> String {
    "30s".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Secret — normally supplied via `NEWSROOM_TELEGRAM_TOKEN`.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub chat_id_news: Option<String>,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            token: None,
            chat_id: None,
            chat_id_news: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegraphConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Secret — normally supplied via `NEWSROOM_TELEGRAPH_ACCESS_TOKEN`.
    #[serde(default)]
    pub access_token: Option<String>,
}

impl Default for TelegraphConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            access_token: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_check_interval")]
    pub check_interval_seconds: u64,
    #[serde(default = "default_stuck_hours")]
    pub stuck_hours: u64,
    #[serde(default = "default_task_timeout")]
    pub task_timeout_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval_seconds: default_check_interval(),
            stuck_hours: default_stuck_hours(),
            task_timeout_seconds: default_task_timeout(),
        }
    }
}

fn default_check_interval() -> u64 {
    60
}
fn default_stuck_hours() -> u64 {
    4
}
fn default_task_timeout() -> u64 {
    0
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub source_type: String,
    pub url: Option<String>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,
    #[serde(default = "default_max_items")]
    pub max_items: u32,
    pub auth: Option<SourceAuthConfig>,
    #[serde(default = "default_enabled")]
    pub enabled: Option<bool>,
}

fn default_poll_interval() -> String {
    "30m".to_string()
}
fn default_max_items() -> u32 {
    200
}
fn default_enabled() -> Option<bool> {
    Some(true)
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceAuthConfig {
    #[serde(rename = "type")]
    pub auth_type: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
    pub header_name: Option<String>,
    pub header_value: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryConfig {
    pub name: String,
    pub display_name: String,
    #[serde(default = "default_category_color")]
    pub color: String,
    #[serde(default)]
    pub description: String,
}

fn default_category_color() -> String {
    "#888888".to_string()
}

impl Config {
    /// Resolve the database path (relative to data_dir if not absolute).
    pub fn db_path(&self) -> PathBuf {
        let db_path = Path::new(&self.database.path);
        if db_path.is_absolute() {
            db_path.to_path_buf()
        } else {
            self.core.data_dir.join(db_path)
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(ConfigError::ReadFile)
        .context("reading config file")?;
    let mut config: Config = toml::from_str(&content).map_err(ConfigError::Parse)?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Layer secrets from the environment over whatever the config file set.
/// Secrets never need to be present in the TOML file at all.
fn apply_env_overrides(config: &mut Config) {
    if let Ok(v) = std::env::var("NEWSROOM_AI_API_KEY") {
        config.ai.api_key = Some(v);
    }
    if let Ok(v) = std::env::var("NEWSROOM_TELEGRAM_TOKEN") {
        config.telegram.token = Some(v);
    }
    if let Ok(v) = std::env::var("NEWSROOM_TELEGRAPH_ACCESS_TOKEN") {
        config.telegraph.access_token = Some(v);
    }
    if let Ok(v) = std::env::var("DATABASE_URL") {
        config.database.path = v;
    }
}

pub fn validate_config(config: &Config) -> Result<()> {
    if config.core.version != 1 {
        return Err(ConfigError::Validation(format!(
            "unsupported config version {} (this binary supports version 1)",
            config.core.version
        ))
        .into());
    }

    for source in &config.source {
        match source.source_type.as_str() {
            "rss" => {
                if source.url.is_none() {
                    return Err(ConfigError::Validation(format!(
                        "source '{}': rss source must have a 'url'",
                        source.name
                    ))
                    .into());
                }
            }
            "telegram" => {
                if source.url.is_none() {
                    return Err(ConfigError::Validation(format!(
                        "source '{}': telegram source must have a 'url' (channel username)",
                        source.name
                    ))
                    .into());
                }
            }
            "page_monitor" => {
                if source.url.is_none() {
                    return Err(ConfigError::Validation(format!(
                        "source '{}': page_monitor source must have a 'url'",
                        source.name
                    ))
                    .into());
                }
            }
            "generic" => {}
            other => {
                return Err(
                    ConfigError::Validation(format!("source '{}': unknown type '{}'", source.name, other)).into(),
                );
            }
        }

        if let Some(auth) = &source.auth {
            match auth.auth_type.as_str() {
                "basic" => {
                    if auth.username.is_none() || auth.password.is_none() {
                        return Err(ConfigError::Validation(format!(
                            "source '{}': basic auth requires 'username' and 'password'",
                            source.name
                        ))
                        .into());
                    }
                }
                "bearer" => {
                    if auth.token.is_none() {
                        return Err(ConfigError::Validation(format!(
                            "source '{}': bearer auth requires 'token'",
                            source.name
                        ))
                        .into());
                    }
                }
                "header" => {
                    if auth.header_name.is_none() || auth.header_value.is_none() {
                        return Err(ConfigError::Validation(format!(
                            "source '{}': header auth requires 'header_name' and 'header_value'",
                            source.name
                        ))
                        .into());
                    }
                }
                other => {
                    return Err(ConfigError::Validation(format!(
                        "source '{}': unknown auth type '{}'",
                        source.name, other
                    ))
                    .into());
                }
            }
        }

        if source.max_items > i32::MAX as u32 {
            return Err(ConfigError::Validation(format!(
                "source '{}': max_items {} exceeds maximum ({})",
                source.name,
                source.max_items,
                i32::MAX
            ))
            .into());
        }

        humantime::parse_duration(&source.poll_interval).map_err(|e| {
            ConfigError::Validation(format!(
                "source '{}': invalid poll_interval '{}': {}",
                source.name, source.poll_interval, e
            ))
        })?;
    }

    let mut source_names = HashSet::new();
    for source in &config.source {
        if !source_names.insert(&source.name) {
            return Err(ConfigError::Validation(format!("duplicate source name: '{}'", source.name)).into());
        }
    }

    let mut category_names = HashSet::new();
    for category in &config.category {
        if !category_names.insert(&category.name) {
            return Err(ConfigError::Validation(format!("duplicate category name: '{}'", category.name)).into());
        }
    }
    if !config.category.is_empty() && !category_names.contains(&config.core.default_category) {
        return Err(ConfigError::Validation(format!(
            "default_category '{}' is not among the configured categories",
            config.core.default_category
        ))
        .into());
    }

    config
        .core
        .timezone
        .parse::<chrono_tz::Tz>()
        .map_err(|_| ConfigError::Validation(format!("unknown timezone '{}'", config.core.timezone)))?;

    humantime::parse_duration(&config.core.cache_ttl)
        .map_err(|e| ConfigError::Validation(format!("cache_ttl '{}': {}", config.core.cache_ttl, e)))?;

    humantime::parse_duration(&config.ai.timeout)
        .map_err(|e| ConfigError::Validation(format!("ai timeout '{}': {}", config.ai.timeout, e)))?;

    if config.ai.rps == 0 {
        return Err(ConfigError::Validation("ai.rps must be at least 1".to_string()).into());
    }

    if config.core.min_content_length >= config.core.max_content_length {
        return Err(ConfigError::Validation(format!(
            "min_content_length ({}) must be less than max_content_length ({})",
            config.core.min_content_length, config.core.max_content_length
        ))
        .into());
    }

    if config.telegram.enabled && config.telegram.token.is_none() {
        return Err(ConfigError::Validation(
            "telegram.enabled is true but no token is configured (set NEWSROOM_TELEGRAM_TOKEN)".to_string(),
        )
        .into());
    }

    if config.telegraph.enabled && config.telegraph.access_token.is_none() {
        return Err(ConfigError::Validation(
            "telegraph.enabled is true but no access_token is configured (set NEWSROOM_TELEGRAPH_ACCESS_TOKEN)"
                .to_string(),
        )
        .into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config(body: &str) -> Config {
        toml::from_str(body).expect("valid toml")
    }

    #[test]
    fn defaults_fill_in_missing_tables() {
        let config = minimal_config("[core]\nversion = 1\n");
        assert_eq!(config.database.path, "newsroom.db");
        assert_eq!(config.ai.rps, 3);
        assert_eq!(config.scheduler.check_interval_seconds, 60);
    }

    #[test]
    fn rejects_rss_source_without_url() {
        let config = minimal_config(
            "[core]\nversion = 1\n[[source]]\nname = \"a\"\ntype = \"rss\"\n",
        );
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_duplicate_source_names() {
        let config = minimal_config(
            "[core]\nversion = 1\n\
             [[source]]\nname = \"a\"\ntype = \"rss\"\nurl = \"https://x.test/feed\"\n\
             [[source]]\nname = \"a\"\ntype = \"rss\"\nurl = \"https://y.test/feed\"\n",
        );
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_default_category_not_in_list() {
        let config = minimal_config(
            "[core]\nversion = 1\ndefault_category = \"missing\"\n\
             [[category]]\nname = \"tech\"\ndisplay_name = \"Tech\"\n",
        );
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn accepts_well_formed_config() {
        let config = minimal_config(
            "[core]\nversion = 1\ndefault_category = \"general\"\n\
             [[category]]\nname = \"general\"\ndisplay_name = \"General\"\n\
             [[source]]\nname = \"a\"\ntype = \"rss\"\nurl = \"https://x.test/feed\"\n",
        );
        assert!(validate_config(&config).is_ok());
    }
}
