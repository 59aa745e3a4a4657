//! Configuration for ChatPilot

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Prefix for environment overrides, e.g. `CHATPILOT__SCHEDULER__SAFETY_MARGIN_SECS=60`
pub const ENV_PREFIX: &str = "CHATPILOT";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Campaign scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Monitor registry configuration
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Delayed dispatch configuration
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Automation bridge configuration
    #[serde(default)]
    pub automation: AutomationConfig,

    /// AI reply configuration
    #[serde(default)]
    pub ai: AiConfig,

    /// Add-friend workflow configuration
    #[serde(default)]
    pub friends: FriendsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding rules, campaigns, message logs and the friend worklist
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./config")
}

/// Campaign scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Scheduler tick cadence in milliseconds
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Due-times in the past are pushed to now + this margin
    #[serde(default = "default_safety_margin_secs")]
    pub safety_margin_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            safety_margin_secs: default_safety_margin_secs(),
        }
    }
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_safety_margin_secs() -> u64 {
    300
}

/// Monitor registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Health check interval in seconds
    #[serde(default = "default_health_check_secs")]
    pub health_check_secs: u64,

    /// Capacity of the inbound event channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            health_check_secs: default_health_check_secs(),
            event_buffer: default_event_buffer(),
        }
    }
}

fn default_health_check_secs() -> u64 {
    60
}

fn default_event_buffer() -> usize {
    256
}

/// Delayed dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// File extensions sent through the media path
    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            image_extensions: default_image_extensions(),
        }
    }
}

fn default_image_extensions() -> Vec<String> {
    [".jpg", ".jpeg", ".png", ".gif", ".bmp"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Automation sidecar configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationConfig {
    /// Base URL of the automation sidecar
    #[serde(default = "default_automation_endpoint")]
    pub endpoint: String,

    /// Request timeout in seconds
    #[serde(default = "default_automation_timeout")]
    pub timeout_secs: u64,

    /// Message polling interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            endpoint: default_automation_endpoint(),
            timeout_secs: default_automation_timeout(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_automation_endpoint() -> String {
    "http://127.0.0.1:8765".to_string()
}

fn default_automation_timeout() -> u64 {
    30
}

fn default_poll_interval_ms() -> u64 {
    500
}

/// AI reply configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// OpenAI-compatible chat completions endpoint
    #[serde(default = "default_model_endpoint")]
    pub model_endpoint: String,

    /// Model name sent with each request
    #[serde(default = "default_model_name")]
    pub model_name: String,

    /// API key (bearer token)
    pub api_key: Option<String>,

    /// Prefix prepended to AI replies when enabled
    #[serde(default = "default_reply_prefix")]
    pub reply_prefix: String,

    /// Whether the prefix is applied
    #[serde(default)]
    pub prefix_enabled: bool,

    /// Maximum reply length in characters; 500 or more disables truncation
    #[serde(default = "default_token_limit")]
    pub token_limit: usize,

    /// Request timeout in seconds
    #[serde(default = "default_ai_timeout")]
    pub timeout_secs: u64,

    /// Reserved id of the system assistant contact
    #[serde(default = "default_assistant_id")]
    pub assistant_id: String,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            model_endpoint: default_model_endpoint(),
            model_name: default_model_name(),
            api_key: None,
            reply_prefix: default_reply_prefix(),
            prefix_enabled: false,
            token_limit: default_token_limit(),
            timeout_secs: default_ai_timeout(),
            assistant_id: default_assistant_id(),
        }
    }
}

fn default_model_endpoint() -> String {
    "https://api.deepseek.com/v1/chat/completions".to_string()
}

fn default_model_name() -> String {
    "deepseek-chat".to_string()
}

fn default_reply_prefix() -> String {
    "[AI]".to_string()
}

fn default_token_limit() -> usize {
    500
}

fn default_ai_timeout() -> u64 {
    60
}

fn default_assistant_id() -> String {
    "gh_assistant".to_string()
}

/// Add-friend workflow configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendsConfig {
    /// Greeting used when a row has none
    #[serde(default = "default_greeting")]
    pub default_greeting: String,

    /// Minimum wait between requests, in minutes
    #[serde(default = "default_min_delay_minutes")]
    pub min_delay_minutes: u64,

    /// Maximum wait between requests, in minutes
    #[serde(default = "default_max_delay_minutes")]
    pub max_delay_minutes: u64,
}

impl Default for FriendsConfig {
    fn default() -> Self {
        Self {
            default_greeting: default_greeting(),
            min_delay_minutes: default_min_delay_minutes(),
            max_delay_minutes: default_max_delay_minutes(),
        }
    }
}

fn default_greeting() -> String {
    "你好".to_string()
}

fn default_min_delay_minutes() -> u64 {
    10
}

fn default_max_delay_minutes() -> u64 {
    60
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, text)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Load configuration from an optional file plus `CHATPILOT__*` environment overrides.
    ///
    /// When `path` is `None` the default locations are searched; a missing file is not an
    /// error, every section falls back to its defaults.
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let mut builder = ::config::Config::builder();

        match path {
            Some(path) => {
                if !path.exists() {
                    return Err(crate::Error::Config(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
                builder = builder.add_source(::config::File::from(path));
            }
            None => {
                let candidates = [
                    PathBuf::from("./chatpilot.toml"),
                    PathBuf::from("/etc/chatpilot/config.toml"),
                ];
                if let Some(found) = candidates.iter().find(|p| p.exists()) {
                    builder = builder.add_source(::config::File::from(found.as_path()));
                }
            }
        }

        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .and_then(|c| c.try_deserialize::<Config>())
            .map_err(|e| crate::Error::Config(format!("Failed to load config: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.scheduler.tick_interval_ms, 1000);
        assert_eq!(config.scheduler.safety_margin_secs, 300);
        assert_eq!(config.monitor.health_check_secs, 60);
        assert_eq!(config.ai.token_limit, 500);
        assert_eq!(config.friends.min_delay_minutes, 10);
        assert_eq!(config.friends.max_delay_minutes, 60);
        assert_eq!(config.storage.data_dir, PathBuf::from("./config"));
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[storage]
data_dir = "/var/lib/chatpilot"

[scheduler]
safety_margin_secs = 60

[ai]
prefix_enabled = true
reply_prefix = "[bot]"
token_limit = 120

[logging]
format = "json"
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.storage.data_dir, PathBuf::from("/var/lib/chatpilot"));
        assert_eq!(config.scheduler.safety_margin_secs, 60);
        assert_eq!(config.scheduler.tick_interval_ms, 1000);
        assert!(config.ai.prefix_enabled);
        assert_eq!(config.ai.token_limit, 120);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.dispatch.image_extensions.len(), 5);
    }

    #[test]
    fn test_from_file_missing() {
        let err = Config::from_file(Path::new("/nonexistent/chatpilot.toml")).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("chatpilot.toml");
        std::fs::write(
            &path,
            "[scheduler]\nsafety_margin_secs = 60\n\n[friends]\ndefault_greeting = \"hello\"\n",
        )
        .unwrap();

        std::env::set_var("CHATPILOT__SCHEDULER__SAFETY_MARGIN_SECS", "30");
        std::env::set_var("CHATPILOT__MONITOR__HEALTH_CHECK_SECS", "15");
        let loaded = Config::load(Some(&path));
        std::env::remove_var("CHATPILOT__SCHEDULER__SAFETY_MARGIN_SECS");
        std::env::remove_var("CHATPILOT__MONITOR__HEALTH_CHECK_SECS");

        let config = loaded.unwrap();
        assert_eq!(config.scheduler.safety_margin_secs, 30);
        assert_eq!(config.monitor.health_check_secs, 15);
        assert_eq!(config.friends.default_greeting, "hello");
        assert_eq!(config.scheduler.tick_interval_ms, 1000);
    }

    #[test]
    fn test_load_missing_explicit_path() {
        let err = Config::load(Some(Path::new("/nonexistent/chatpilot.toml"))).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }
}
