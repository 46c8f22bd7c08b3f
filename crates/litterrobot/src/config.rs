//! Configuration file parsing and structures.
//!
//! litterrobotd uses TOML for declarative configuration. Accounts are listed
//! under `[[integrations.litterrobot.accounts]]`; every account entry is run
//! through the setup flow at startup.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;
use serde::Deserialize;
use serde::Serialize;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::filter::Targets;

/// Top-level configuration structure
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub location: LocationConfig,
    #[serde(default)]
    pub api: Option<ApiConfig>,
    #[serde(default)]
    pub integrations: IntegrationsConfig,
}

#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub level: LogLevel,

    /// Per-target levels, e.g. `"litterrobot::account" = "debug"`
    #[serde(default)]
    pub overrides: HashMap<String, LogLevel>,
}

impl LoggingConfig {
    /// Build a per-target filter from the default level and the overrides.
    pub fn targets(&self) -> Targets {
        self.overrides.iter().fold(
            Targets::new().with_default(LevelFilter::from(self.level)),
            |targets, (target, level)| {
                targets.with_target(target.clone(), LevelFilter::from(*level))
            },
        )
    }
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// Global location configuration
#[derive(Debug, Deserialize)]
pub struct LocationConfig {
    /// IANA timezone identifier (e.g., "Europe/Oslo"), used for sleep schedules
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
        }
    }
}

impl LocationConfig {
    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse()
            .map_err(|_| ConfigError::Validation(format!("unknown timezone '{}'", self.timezone)))
    }
}

fn default_listen() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8565
}

/// Native HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// Integration configuration container
#[derive(Debug, Default, Deserialize)]
pub struct IntegrationsConfig {
    #[serde(default)]
    pub litterrobot: Option<LitterRobotConfig>,
}

/// Litter-Robot integration configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LitterRobotConfig {
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,

    /// Vendor endpoint settings shared by all accounts
    #[serde(default)]
    pub cloud: CloudConfig,
}

fn default_update_interval_secs() -> u64 {
    10
}

fn default_refresh_wait_secs() -> u64 {
    12
}

/// Credentials and timings for one Litter-Robot account
#[derive(Clone, PartialEq, Deserialize, Serialize)]
pub struct AccountConfig {
    pub username: String,
    pub password: String,

    /// Seconds between polls of the vendor API
    #[serde(default = "default_update_interval_secs")]
    pub update_interval_secs: u64,

    /// Seconds to wait after an action before re-reading robot state
    #[serde(default = "default_refresh_wait_secs")]
    pub refresh_wait_secs: u64,
}

impl AccountConfig {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            update_interval_secs: default_update_interval_secs(),
            refresh_wait_secs: default_refresh_wait_secs(),
        }
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }

    pub fn refresh_wait(&self) -> Duration {
        Duration::from_secs(self.refresh_wait_secs)
    }
}

impl fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("update_interval_secs", &self.update_interval_secs)
            .field("refresh_wait_secs", &self.refresh_wait_secs)
            .finish()
    }
}

fn default_auth_url() -> String {
    "https://autopets.sso.iothings.site/oauth/token".to_string()
}

fn default_api_url() -> String {
    "https://v2.api.whisker.iothings.site".to_string()
}

/// Vendor API endpoints and OAuth client settings
#[derive(Clone, PartialEq, Deserialize)]
pub struct CloudConfig {
    #[serde(default = "default_auth_url")]
    pub auth_url: String,

    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Sent as `x-api-key` on every API request when set
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub client_id: Option<String>,

    #[serde(default)]
    pub client_secret: Option<String>,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            auth_url: default_auth_url(),
            api_url: default_api_url(),
            api_key: None,
            client_id: None,
            client_secret: None,
        }
    }
}

impl fmt::Debug for CloudConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudConfig")
            .field("auth_url", &self.auth_url)
            .field("api_url", &self.api_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Config {
    /// Load and validate configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().to_path_buf(), e))?;

        Self::parse(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.location.tz()?;

        let Some(litterrobot) = &self.integrations.litterrobot else {
            return Ok(());
        };

        for (i, account) in litterrobot.accounts.iter().enumerate() {
            if account.username.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "litterrobot account #{}: username must not be empty",
                    i + 1
                )));
            }
            if account.password.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "litterrobot account '{}': password must not be empty",
                    account.username
                )));
            }
            if account.update_interval_secs == 0 {
                return Err(ConfigError::Validation(format!(
                    "litterrobot account '{}': update_interval_secs must be positive",
                    account.username
                )));
            }
            if account.refresh_wait_secs == 0 {
                return Err(ConfigError::Validation(format!(
                    "litterrobot account '{}': refresh_wait_secs must be positive",
                    account.username
                )));
            }
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.location.tz().unwrap(), Tz::UTC);
        assert!(config.api.is_none());
        assert!(config.integrations.litterrobot.is_none());
    }

    #[test]
    fn test_parse_litterrobot_accounts() {
        let toml = r#"
            [logging]
            level = "debug"
            overrides.reqwest = "warn"

            [location]
            timezone = "Europe/Oslo"

            [[integrations.litterrobot.accounts]]
            username = "cat@example.com"
            password = "hunter2"

            [[integrations.litterrobot.accounts]]
            username = "dog@example.com"
            password = "woof"
            update_interval_secs = 60
            refresh_wait_secs = 5
        "#;

        let config = Config::parse(toml).unwrap();
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.overrides["reqwest"], LogLevel::Warn);
        assert_eq!(config.location.tz().unwrap(), chrono_tz::Europe::Oslo);

        let lr = config.integrations.litterrobot.unwrap();
        assert_eq!(lr.accounts.len(), 2);
        assert_eq!(lr.accounts[0].update_interval(), Duration::from_secs(10));
        assert_eq!(lr.accounts[0].refresh_wait(), Duration::from_secs(12));
        assert_eq!(lr.accounts[1].update_interval(), Duration::from_secs(60));
        assert_eq!(lr.accounts[1].refresh_wait(), Duration::from_secs(5));
        assert_eq!(lr.cloud, CloudConfig::default());
    }

    #[test]
    fn test_parse_api_defaults() {
        let config = Config::parse("[api]").unwrap();
        let api = config.api.unwrap();
        assert_eq!(api.listen, "127.0.0.1");
        assert_eq!(api.port, 8565);
    }

    #[test]
    fn test_rejects_empty_password() {
        let toml = r#"
            [[integrations.litterrobot.accounts]]
            username = "cat@example.com"
            password = ""
        "#;

        let err = Config::parse(toml).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("password"));
    }

    #[test]
    fn test_rejects_zero_refresh_wait() {
        let toml = r#"
            [[integrations.litterrobot.accounts]]
            username = "cat@example.com"
            password = "secret"
            refresh_wait_secs = 0
        "#;

        let err = Config::parse(toml).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("refresh_wait_secs"));
    }

    #[test]
    fn test_rejects_missing_password() {
        let toml = r#"
            [[integrations.litterrobot.accounts]]
            username = "cat@example.com"
        "#;

        assert!(matches!(Config::parse(toml), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_rejects_unknown_timezone() {
        let toml = r#"
            [location]
            timezone = "Mars/Olympus_Mons"
        "#;

        let err = Config::parse(toml).unwrap_err();
        assert!(err.to_string().contains("Mars/Olympus_Mons"));
    }

    #[test]
    fn test_debug_redacts_password() {
        let account = AccountConfig::new("cat@example.com", "hunter2");
        let debug = format!("{:?}", account);
        assert!(debug.contains("cat@example.com"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("litterrobotd.toml");
        std::fs::write(
            &path,
            r#"
            [[integrations.litterrobot.accounts]]
            username = "cat@example.com"
            password = "hunter2"
            "#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.integrations.litterrobot.unwrap().accounts.len(), 1);

        let missing = Config::from_file(dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io(..)));
    }
}
