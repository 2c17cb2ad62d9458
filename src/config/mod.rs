//! Configuration management.
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! `DATASET_MASTER_<SECTION>__<KEY>` environment variables.

mod file_config;

pub use file_config::{find_config_file, write_default_config, ConfigFileError};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::{default_user_agent, HttpSettings, RetryConfig};

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "DATASET_MASTER";

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// API keys for repositories that accept them
    #[serde(default)]
    pub api_keys: ApiKeys,

    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Rate limiting settings
    #[serde(default)]
    pub rate_limits: RateLimitConfig,

    /// Retry settings
    #[serde(default)]
    pub retry: RetrySettings,

    /// Source selection and endpoints
    #[serde(default)]
    pub sources: SourcesConfig,

    /// Local cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// API keys for external services
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeys {
    /// Zenodo personal access token (optional, raises page size and rate limits)
    #[serde(default)]
    pub zenodo: Option<String>,
}

impl Default for ApiKeys {
    fn default() -> Self {
        Self {
            zenodo: std::env::var("ZENODO_ACCESS_TOKEN").ok(),
        }
    }
}

/// HTTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default)]
    pub user_agent: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            user_agent: None,
        }
    }
}

fn default_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests per second per source; 0 disables rate limiting
    #[serde(default = "default_rps")]
    pub default_requests_per_second: f32,

    /// Maximum sources queried at the same time
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_requests_per_second: default_rps(),
            max_concurrent_requests: default_max_concurrent(),
        }
    }
}

fn default_rps() -> f32 {
    5.0
}

fn default_max_concurrent() -> usize {
    4
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Attempts per request, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

fn default_max_attempts() -> u32 {
    2
}

fn default_initial_delay() -> u64 {
    1000
}

fn default_max_delay() -> u64 {
    10_000
}

/// Sources configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Comma-separated list; when set, only these sources are used
    #[serde(default)]
    pub enabled_sources: Option<String>,

    /// Comma-separated list of sources never used
    #[serde(default)]
    pub disabled_sources: Option<String>,

    /// API base URLs
    #[serde(default)]
    pub endpoints: EndpointsConfig,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            enabled_sources: std::env::var(format!("{}_ENABLED_SOURCES", ENV_PREFIX)).ok(),
            disabled_sources: std::env::var(format!("{}_DISABLED_SOURCES", ENV_PREFIX)).ok(),
            endpoints: EndpointsConfig::default(),
        }
    }
}

impl SourcesConfig {
    /// Whether a source id passes the enabled/disabled lists
    ///
    /// The disabled list always takes precedence.
    pub fn is_enabled(&self, id: &str) -> bool {
        let id = id.to_lowercase();
        if parse_source_list(self.disabled_sources.as_deref()).contains(&id) {
            return false;
        }
        match self.enabled_sources.as_deref() {
            Some(list) if !list.trim().is_empty() => {
                parse_source_list(Some(list)).contains(&id)
            }
            _ => true,
        }
    }
}

fn parse_source_list(list: Option<&str>) -> Vec<String> {
    list.unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// API base URLs, overridable for mirrors and tests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointsConfig {
    #[serde(default = "default_openneuro_url")]
    pub openneuro: String,

    #[serde(default = "default_dandi_url")]
    pub dandi: String,

    #[serde(default = "default_physionet_url")]
    pub physionet: String,

    #[serde(default = "default_zenodo_url")]
    pub zenodo: String,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            openneuro: default_openneuro_url(),
            dandi: default_dandi_url(),
            physionet: default_physionet_url(),
            zenodo: default_zenodo_url(),
        }
    }
}

fn default_openneuro_url() -> String {
    "https://openneuro.org/crn/graphql".to_string()
}

fn default_dandi_url() -> String {
    "https://api.dandiarchive.org/api".to_string()
}

fn default_physionet_url() -> String {
    "https://physionet.org".to_string()
}

fn default_zenodo_url() -> String {
    "https://zenodo.org/api".to_string()
}

/// Local cache configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache directory (default: `<user cache dir>/dataset-master`)
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `json` for structured output, anything else for human-readable text
    #[serde(default)]
    pub format: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: None,
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Config {
    /// HTTP settings for one source client
    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings {
            user_agent: self
                .http
                .user_agent
                .clone()
                .unwrap_or_else(|| default_user_agent().to_string()),
            timeout: Duration::from_secs(self.http.timeout_secs),
            connect_timeout: Duration::from_secs(self.http.connect_timeout_secs),
            requests_per_second: Some(self.rate_limits.default_requests_per_second),
        }
    }

    /// Retry policy for adapters
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.retry.max_attempts.max(1),
            initial_delay: Duration::from_millis(self.retry.initial_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            ..RetryConfig::default()
        }
    }

    /// Resolved cache directory
    pub fn cache_dir(&self) -> PathBuf {
        self.cache
            .directory
            .clone()
            .unwrap_or_else(default_cache_dir)
    }

    /// Whether logs should be emitted as JSON
    pub fn json_logs(&self) -> bool {
        self.logging
            .format
            .as_deref()
            .is_some_and(|f| f.eq_ignore_ascii_case("json"))
    }
}

/// Default cache directory
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("dataset-master")
}

/// Load configuration: defaults, then an optional file, then the environment
pub fn load_config(path: Option<&Path>) -> Result<Config, config::ConfigError> {
    let mut builder =
        config::Config::builder().add_source(config::Config::try_from(&Config::default())?);

    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path));
    }

    let settings = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    settings.try_deserialize()
}

/// Get the default configuration (from env vars or defaults)
pub fn get_config() -> Config {
    Config::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = get_config();
        assert_eq!(config.rate_limits.default_requests_per_second, 5.0);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.http.timeout_secs, 30);
        assert!(config.sources.endpoints.openneuro.ends_with("/graphql"));
    }

    #[test]
    fn test_source_selection() {
        let sources = SourcesConfig {
            enabled_sources: Some("openneuro, DANDI".to_string()),
            disabled_sources: Some("dandi".to_string()),
            endpoints: EndpointsConfig::default(),
        };

        assert!(sources.is_enabled("openneuro"));
        assert!(!sources.is_enabled("dandi"));
        assert!(!sources.is_enabled("zenodo"));

        let open = SourcesConfig {
            enabled_sources: Some("  ".to_string()),
            disabled_sources: None,
            endpoints: EndpointsConfig::default(),
        };
        assert!(open.is_enabled("physionet"));
    }

    #[test]
    fn test_derived_settings() {
        let mut config = Config::default();
        config.retry.max_attempts = 0;
        config.http.user_agent = Some("custom/1.0".to_string());

        assert_eq!(config.retry_config().max_attempts, 1);
        assert_eq!(config.http_settings().user_agent, "custom/1.0");
    }

    #[test]
    fn test_load_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[rate_limits]
default_requests_per_second = 2.0

[sources]
disabled_sources = "zenodo"

[sources.endpoints]
dandi = "http://localhost:9999/api"

[cache]
directory = "/tmp/dataset-master-test"

[logging]
format = "json"
"#,
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.rate_limits.default_requests_per_second, 2.0);
        assert!(!config.sources.is_enabled("zenodo"));
        assert_eq!(config.sources.endpoints.dandi, "http://localhost:9999/api");
        assert_eq!(
            config.sources.endpoints.openneuro,
            "https://openneuro.org/crn/graphql"
        );
        assert_eq!(config.cache_dir(), PathBuf::from("/tmp/dataset-master-test"));
        assert!(config.json_logs());
    }
}
