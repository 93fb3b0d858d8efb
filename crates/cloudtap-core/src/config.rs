//! Configuration system for cloudtap
//!
//! Provides:
//! - Config file discovery (CLI flag, env var, standard paths)
//! - TOML parsing with serde
//! - Environment variable overrides
//! - Validation

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default cloud endpoint
pub const DEFAULT_HOST: &str = "api.spark.io";
pub const DEFAULT_PORT: u16 = 443;
pub const DEFAULT_BASE_PATH: &str = "/v1/events";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Complete cloudtap configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudtapConfig {
    /// Logging settings
    pub logging: LoggingSettings,

    /// Stream connection settings
    pub stream: StreamSettings,

    /// Sink settings
    pub sink: SinkSettings,

    /// Periodic stats reporting
    pub stats: StatsSettings,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Output format: text, json
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Stream connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    /// Device identifier this client acts for
    pub device_id: Option<String>,

    /// Bearer token for the cloud API
    pub access_token: Option<String>,

    /// Remote host
    pub host: String,

    /// Remote port
    pub port: u16,

    /// Base request path
    pub base_path: String,

    /// Only stream events with this name (all public events when unset)
    pub event_name: Option<String>,

    /// Wrap the connection in TLS
    pub tls: bool,

    /// Client identifier sent as User-Agent
    pub user_agent: String,

    /// Bound on each wait for stream data, in milliseconds
    pub read_timeout_ms: u64,

    /// Bound on socket open and handshake reads, in milliseconds
    pub connect_timeout_ms: u64,

    /// Reconnect when no line arrived for this long, in milliseconds
    pub idle_reconnect_timeout_ms: u64,

    /// Consecutive failed handshakes tolerated before giving up
    pub connect_failures_max: u32,

    /// Pause between handshake attempts, in milliseconds
    pub connect_retry_delay_ms: u64,

    /// Pause before retrying when a fresh connection has nothing to read
    pub empty_pool_delay_ms: u64,

    /// Give up after this many empty-connection retries (unbounded if unset)
    pub empty_pool_retries_max: Option<u32>,

    /// Longest protocol line accepted, in bytes
    pub max_line_bytes: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            device_id: None,
            access_token: None,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            base_path: DEFAULT_BASE_PATH.to_string(),
            event_name: None,
            tls: true,
            user_agent: format!("cloudtap/{}", env!("CARGO_PKG_VERSION")),
            read_timeout_ms: 5_000,
            connect_timeout_ms: 5_000,
            idle_reconnect_timeout_ms: 90_000,
            connect_failures_max: 20,
            connect_retry_delay_ms: 0,
            empty_pool_delay_ms: 10_000,
            empty_pool_retries_max: None,
            max_line_bytes: 1024 * 1024,
        }
    }
}

impl StreamSettings {
    /// Request path: the base path, suffixed with `/<event_name>` when a
    /// filter is set.
    pub fn request_path(&self) -> String {
        match self.event_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => {
                format!("{}/{}", self.base_path.trim_end_matches('/'), name)
            }
            _ => self.base_path.clone(),
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn idle_reconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_reconnect_timeout_ms)
    }

    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms)
    }

    pub fn empty_pool_delay(&self) -> Duration {
        Duration::from_millis(self.empty_pool_delay_ms)
    }

    /// `host:port`, for logging
    pub fn remote(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Token with everything but the last four characters masked
    pub fn masked_token(&self) -> Option<String> {
        self.access_token.as_ref().map(|t| mask_secret(t))
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "Stream host cannot be empty".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(ConfigError::ValidationError(
                "Stream port cannot be 0".to_string(),
            ));
        }
        if !self.base_path.starts_with('/') {
            return Err(ConfigError::ValidationError(format!(
                "Base path must start with '/': {}",
                self.base_path
            )));
        }
        if self.read_timeout_ms == 0 || self.connect_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "Read and connect timeouts must be > 0".to_string(),
            ));
        }
        if self.idle_reconnect_timeout_ms <= self.read_timeout_ms {
            return Err(ConfigError::ValidationError(format!(
                "Idle reconnect timeout ({}ms) must be greater than read timeout ({}ms)",
                self.idle_reconnect_timeout_ms, self.read_timeout_ms
            )));
        }
        if self.max_line_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "max_line_bytes must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Check that the settings carry what an actual connection needs
    pub fn require_credentials(&self) -> ConfigResult<()> {
        match self.access_token.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => Ok(()),
            _ => Err(ConfigError::ValidationError(
                "An access token is required (stream.access_token or CLOUDTAP_ACCESS_TOKEN)"
                    .to_string(),
            )),
        }
    }
}

/// Sink settings container
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkSettings {
    /// JSONL file or stdout output
    pub jsonl: JsonlSinkConfig,

    /// HTTP webhook
    pub webhook: WebhookSinkConfig,
}

/// JSONL sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonlSinkConfig {
    /// Enable JSONL output
    pub enabled: bool,

    /// Output file path, `-` for stdout
    pub path: String,

    /// Append to existing file
    pub append: bool,

    /// Flush after each event
    pub flush_each: bool,
}

impl Default for JsonlSinkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "-".to_string(),
            append: true,
            flush_each: true,
        }
    }
}

/// Webhook sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookSinkConfig {
    /// Enable webhook delivery
    pub enabled: bool,

    /// Target URL
    pub url: String,

    /// Optional bearer token
    pub bearer_token: Option<String>,

    /// Request timeout in milliseconds
    pub timeout_ms: u64,

    /// Retries on 5xx/network failures
    pub max_retries: u32,
}

impl Default for WebhookSinkConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            bearer_token: None,
            timeout_ms: 10_000,
            max_retries: 3,
        }
    }
}

/// Stats reporting settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsSettings {
    /// Interval between stats log lines in milliseconds, 0 disables
    pub report_interval_ms: u64,
}

impl Default for StatsSettings {
    fn default() -> Self {
        Self {
            report_interval_ms: 60_000,
        }
    }
}

impl StatsSettings {
    pub fn report_interval(&self) -> Option<Duration> {
        (self.report_interval_ms > 0).then(|| Duration::from_millis(self.report_interval_ms))
    }
}

/// Configuration loader
pub struct ConfigLoader {
    /// Path to config file (if specified via CLI)
    cli_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader
    pub fn new() -> Self {
        Self { cli_path: None }
    }

    /// Set the config path from CLI argument
    pub fn with_cli_path(mut self, path: Option<PathBuf>) -> Self {
        self.cli_path = path;
        self
    }

    /// Load configuration with the following precedence:
    /// 1. CLI --config flag
    /// 2. CLOUDTAP_CONFIG environment variable
    /// 3. ~/.config/cloudtap/config.toml
    /// 4. /etc/cloudtap/config.toml
    /// 5. Default values
    pub fn load(&self) -> ConfigResult<CloudtapConfig> {
        if let Some(path) = &self.cli_path {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.clone()));
            }
        }

        let mut config = if let Some(path) = self.find_config_file() {
            info!("Loading configuration from: {}", path.display());
            self.load_from_file(&path)?
        } else {
            debug!("No config file found, using defaults");
            CloudtapConfig::default()
        };

        apply_overrides(&mut config, |key| std::env::var(key).ok());

        self.validate(&config)?;

        Ok(config)
    }

    /// Find the config file to use
    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.cli_path {
            return Some(path.clone());
        }

        if let Ok(env_path) = std::env::var("CLOUDTAP_CONFIG") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
            warn!("CLOUDTAP_CONFIG path does not exist: {}", env_path);
        }

        if let Some(path) = Self::default_config_path() {
            if path.exists() {
                return Some(path);
            }
        }

        #[cfg(unix)]
        {
            let path = PathBuf::from("/etc/cloudtap/config.toml");
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    /// Load configuration from a TOML file
    pub fn load_from_file(&self, path: &Path) -> ConfigResult<CloudtapConfig> {
        let content = std::fs::read_to_string(path)?;
        let config: CloudtapConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self, config: &CloudtapConfig) -> ConfigResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                config.logging.level, valid_levels
            )));
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&config.logging.format.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log format: {}. Must be one of: {:?}",
                config.logging.format, valid_formats
            )));
        }

        config.stream.validate()?;

        if config.sink.jsonl.enabled && config.sink.jsonl.path.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "JSONL sink path cannot be empty".to_string(),
            ));
        }

        if config.sink.webhook.enabled && config.sink.webhook.url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "Webhook sink is enabled but has no URL".to_string(),
            ));
        }

        Ok(())
    }

    /// Save configuration to a file
    pub fn save(&self, config: &CloudtapConfig, path: &Path) -> ConfigResult<()> {
        let content = to_toml(config)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        info!("Configuration saved to: {}", path.display());
        Ok(())
    }

    /// Get the default config file path for the current platform
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("cloudtap").join("config.toml"))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialize a configuration to pretty TOML
pub fn to_toml(config: &CloudtapConfig) -> ConfigResult<String> {
    toml::to_string_pretty(config)
        .map_err(|e| ConfigError::ValidationError(format!("Failed to serialize config: {}", e)))
}

/// Apply `CLOUDTAP_*` overrides using `lookup` to resolve variables
pub fn apply_overrides<F>(config: &mut CloudtapConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup("CLOUDTAP_LOG_LEVEL") {
        config.logging.level = val;
    }
    if let Some(val) = lookup("CLOUDTAP_LOG_FORMAT") {
        config.logging.format = val;
    }

    if let Some(val) = lookup("CLOUDTAP_ACCESS_TOKEN") {
        config.stream.access_token = Some(val);
    }
    if let Some(val) = lookup("CLOUDTAP_DEVICE_ID") {
        config.stream.device_id = Some(val);
    }
    if let Some(val) = lookup("CLOUDTAP_EVENT_NAME") {
        config.stream.event_name = Some(val);
    }
    if let Some(val) = lookup("CLOUDTAP_HOST") {
        config.stream.host = val;
    }
    if let Some(val) = lookup("CLOUDTAP_PORT") {
        if let Ok(port) = val.parse() {
            config.stream.port = port;
        }
    }
    if let Some(val) = lookup("CLOUDTAP_TLS") {
        config.stream.tls = val.parse().unwrap_or(config.stream.tls);
    }

    if let Some(val) = lookup("CLOUDTAP_JSONL_PATH") {
        config.sink.jsonl.path = val;
        config.sink.jsonl.enabled = true;
    }
    if let Some(val) = lookup("CLOUDTAP_WEBHOOK_URL") {
        config.sink.webhook.url = val;
        config.sink.webhook.enabled = true;
    }
}

/// Mask all but the last four characters of a secret
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let visible: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - 4), visible)
}

/// Helper module for platform-specific directories
mod dirs {
    use std::path::PathBuf;

    /// Get the user's config directory
    pub fn config_dir() -> Option<PathBuf> {
        #[cfg(target_os = "macos")]
        {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join(".config"))
        }

        #[cfg(target_os = "linux")]
        {
            std::env::var("XDG_CONFIG_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".config"))
                })
        }

        #[cfg(target_os = "windows")]
        {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        }

        #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
        {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = CloudtapConfig::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.stream.host, "api.spark.io");
        assert_eq!(config.stream.port, 443);
        assert_eq!(config.stream.base_path, "/v1/events");
        assert!(config.stream.tls);
        assert_eq!(config.stream.connect_failures_max, 20);
        assert_eq!(config.stream.idle_reconnect_timeout(), Duration::from_secs(90));
        assert_eq!(config.stream.read_timeout(), Duration::from_secs(5));
        assert_eq!(config.stream.empty_pool_delay(), Duration::from_secs(10));
        assert!(config.sink.jsonl.enabled);
        assert!(!config.sink.webhook.enabled);
        assert!(ConfigLoader::new().validate(&config).is_ok());
    }

    #[test]
    fn test_request_path() {
        let mut stream = StreamSettings::default();
        assert_eq!(stream.request_path(), "/v1/events");

        stream.event_name = Some("temperature".to_string());
        assert_eq!(stream.request_path(), "/v1/events/temperature");

        stream.event_name = Some("  ".to_string());
        assert_eq!(stream.request_path(), "/v1/events");
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml_str = r#"
            [stream]
            access_token = "abc123"
            event_name = "motion"
        "#;
        let config: CloudtapConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.stream.access_token.as_deref(), Some("abc123"));
        assert_eq!(config.stream.event_name.as_deref(), Some("motion"));
        assert_eq!(config.stream.host, "api.spark.io");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
            [logging]
            level = "debug"
            format = "json"

            [stream]
            host = "relay.local"
            port = 8080
            tls = false
            read_timeout_ms = 1000
            idle_reconnect_timeout_ms = 30000
            connect_failures_max = 3
            empty_pool_retries_max = 5

            [sink.jsonl]
            path = "/tmp/events.jsonl"
            append = false

            [sink.webhook]
            enabled = true
            url = "http://localhost:9000/hook"

            [stats]
            report_interval_ms = 0
        "#;

        let config: CloudtapConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.stream.remote(), "relay.local:8080");
        assert!(!config.stream.tls);
        assert_eq!(config.stream.connect_failures_max, 3);
        assert_eq!(config.stream.empty_pool_retries_max, Some(5));
        assert_eq!(config.sink.jsonl.path, "/tmp/events.jsonl");
        assert!(!config.sink.jsonl.append);
        assert!(config.sink.webhook.enabled);
        assert!(config.stats.report_interval().is_none());
        assert!(ConfigLoader::new().validate(&config).is_ok());
    }

    #[test]
    fn test_validation_invalid_log_level() {
        let config = CloudtapConfig {
            logging: LoggingSettings {
                level: "loud".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(ConfigLoader::new().validate(&config).is_err());
    }

    #[test]
    fn test_validation_idle_must_exceed_read_timeout() {
        let mut config = CloudtapConfig::default();
        config.stream.idle_reconnect_timeout_ms = config.stream.read_timeout_ms;
        assert!(ConfigLoader::new().validate(&config).is_err());
    }

    #[test]
    fn test_validation_rejects_relative_base_path() {
        let mut config = CloudtapConfig::default();
        config.stream.base_path = "v1/events".to_string();
        assert!(ConfigLoader::new().validate(&config).is_err());
    }

    #[test]
    fn test_validation_webhook_needs_url() {
        let mut config = CloudtapConfig::default();
        config.sink.webhook.enabled = true;
        assert!(ConfigLoader::new().validate(&config).is_err());
    }

    #[test]
    fn test_require_credentials() {
        let mut stream = StreamSettings::default();
        assert!(stream.require_credentials().is_err());

        stream.access_token = Some("   ".to_string());
        assert!(stream.require_credentials().is_err());

        stream.access_token = Some("token".to_string());
        assert!(stream.require_credentials().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CLOUDTAP_ACCESS_TOKEN", "secret-token"),
            ("CLOUDTAP_EVENT_NAME", "temperature"),
            ("CLOUDTAP_PORT", "8443"),
            ("CLOUDTAP_TLS", "false"),
            ("CLOUDTAP_WEBHOOK_URL", "http://localhost/hook"),
        ]
        .into_iter()
        .collect();

        let mut config = CloudtapConfig::default();
        apply_overrides(&mut config, |key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.stream.access_token.as_deref(), Some("secret-token"));
        assert_eq!(config.stream.request_path(), "/v1/events/temperature");
        assert_eq!(config.stream.port, 8443);
        assert!(!config.stream.tls);
        assert!(config.sink.webhook.enabled);
    }

    #[test]
    fn test_bad_port_override_is_ignored() {
        let mut config = CloudtapConfig::default();
        apply_overrides(&mut config, |key| {
            (key == "CLOUDTAP_PORT").then(|| "not-a-port".to_string())
        });
        assert_eq!(config.stream.port, 443);
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret("abcdefgh"), "****efgh");
        assert_eq!(mask_secret("abc"), "***");
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = CloudtapConfig::default();
        config.stream.event_name = Some("motion".to_string());

        let loader = ConfigLoader::new();
        loader.save(&config, &path).unwrap();

        let loaded = loader.load_from_file(&path).unwrap();
        assert_eq!(loaded.stream.event_name.as_deref(), Some("motion"));
    }

    #[test]
    fn test_missing_cli_path_is_an_error() {
        let loader = ConfigLoader::new().with_cli_path(Some(PathBuf::from(
            "/definitely/not/here/cloudtap.toml",
        )));
        assert!(matches!(loader.load(), Err(ConfigError::NotFound(_))));
    }
}
