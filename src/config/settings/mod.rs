
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

pub const ENV_INSTANCE: &str = "SERVICENOW_INSTANCE";
pub const ENV_USERNAME: &str = "SERVICENOW_USERNAME";
pub const ENV_PASSWORD: &str = "SERVICENOW_PASSWORD";

const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub servicenow: ServiceNowConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServiceNowConfig {
    /// Instance URL, e.g. `https://dev12345.service-now.com`
    pub instance: String,
    pub username: String,
    pub password: String,
    pub timeout_seconds: u64,
    pub retry_attempts: u32,
}

impl Default for ServiceNowConfig {
    fn default() -> Self {
        Self {
            instance: String::new(),
            username: String::new(),
            password: String::new(),
            timeout_seconds: 30,
            retry_attempts: 3,
        }
    }
}

// Hand-written so the password never reaches log output.
impl fmt::Debug for ServiceNowConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceNowConfig")
            .field("instance", &self.instance)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("timeout_seconds", &self.timeout_seconds)
            .field("retry_attempts", &self.retry_attempts)
            .finish()
    }
}

/// Limits applied by the record listing tools
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub default_list_limit: u32,
    pub max_list_limit: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            default_list_limit: 5,
            max_list_limit: 100,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Missing required setting: {0}")]
    MissingField(&'static str),
    #[error("Invalid ServiceNow instance URL: {0} (must be an http or https URL)")]
    InvalidInstanceUrl(String),
    #[error("Invalid request timeout: {0} (must be between 1 and 300 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid retry attempts: {0} (must be between 1 and 10)")]
    InvalidRetryAttempts(u32),
    #[error("Invalid list limit: {0} (must be between 1 and 1000, default not above max)")]
    InvalidListLimit(u32),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Directory holding `config.toml`, `~/.servicenow-mcp` on most systems
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::home_dir()
            .map(|home| home.join(".servicenow-mcp"))
            .or_else(|| dirs::config_dir().map(|dir| dir.join("servicenow-mcp")))
            .ok_or(ConfigError::DirectoryError)
    }

    /// Load configuration from the default directory.
    ///
    /// A `.env` file in the working directory is read first, so its values
    /// take part in the environment overrides.
    #[inline]
    pub fn load() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => debug!("Loaded environment from {}", path.display()),
            Err(e) if e.not_found() => {}
            Err(e) => warn!("Ignoring unreadable .env file: {}", e),
        }

        let config_dir = Self::config_dir()?;
        Self::load_from(config_dir)
    }

    /// Load `config.toml` from `config_dir`, then apply `SERVICENOW_*`
    /// environment overrides. This is the configuration the server runs with.
    #[inline]
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let mut config = Self::load_file_from(config_dir)?;

        config.apply_overrides(|key| std::env::var(key).ok());

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    /// Load only what is stored in the default directory's `config.toml`
    #[inline]
    pub fn load_file() -> Result<Self> {
        let config_dir = Self::config_dir()?;
        Self::load_file_from(config_dir)
    }

    /// Load `config.toml` from `config_dir`, falling back to defaults when it
    /// does not exist. Environment overrides are not applied, so the result
    /// is safe to edit and save back.
    #[inline]
    pub fn load_file_from<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join(CONFIG_FILE_NAME);

        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path).with_context(|| {
                format!("Failed to read config file: {}", config_path.display())
            })?;

            toml::from_str::<Config>(&content).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?
        } else {
            debug!(
                "No config file at {}, using defaults",
                config_path.display()
            );
            Self::default()
        };
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    /// Override connection settings from a key lookup. Empty values are ignored.
    #[inline]
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(instance) = non_empty(ENV_INSTANCE) {
            self.servicenow.instance = instance;
        }
        if let Some(username) = non_empty(ENV_USERNAME) {
            self.servicenow.username = username;
        }
        if let Some(password) = non_empty(ENV_PASSWORD) {
            self.servicenow.password = password;
        }
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join(CONFIG_FILE_NAME)
    }

    /// Structural validation. Missing credentials are allowed here so that a
    /// partially filled file can still be loaded and edited.
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.servicenow.validate()?;
        self.server.validate()?;
        Ok(())
    }

    /// Everything `serve` and `status` need to talk to an instance
    #[inline]
    pub fn require_credentials(&self) -> Result<(), ConfigError> {
        self.servicenow.require_credentials()
    }
}

impl ServiceNowConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.instance.trim().is_empty() {
            self.instance_url()?;
        }

        if !(1..=300).contains(&self.timeout_seconds) {
            return Err(ConfigError::InvalidTimeout(self.timeout_seconds));
        }

        if !(1..=10).contains(&self.retry_attempts) {
            return Err(ConfigError::InvalidRetryAttempts(self.retry_attempts));
        }

        Ok(())
    }

    #[inline]
    pub fn require_credentials(&self) -> Result<(), ConfigError> {
        if self.instance.trim().is_empty() {
            return Err(ConfigError::MissingField("instance"));
        }
        if self.username.trim().is_empty() {
            return Err(ConfigError::MissingField("username"));
        }
        if self.password.is_empty() {
            return Err(ConfigError::MissingField("password"));
        }

        self.instance_url()?;
        Ok(())
    }

    /// Base URL of the instance, always ending in `/`.
    ///
    /// A bare host name such as `dev12345.service-now.com` is treated as https.
    #[inline]
    pub fn instance_url(&self) -> Result<Url, ConfigError> {
        let trimmed = self.instance.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::MissingField("instance"));
        }

        let candidate = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("https://{}", trimmed)
        };

        let invalid = || ConfigError::InvalidInstanceUrl(self.instance.clone());
        let mut url = Url::parse(&candidate).map_err(|_| invalid())?;

        if (url.scheme() != "http" && url.scheme() != "https") || url.host_str().is_none() {
            return Err(invalid());
        }

        url.set_query(None);
        url.set_fragment(None);
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }

        Ok(url)
    }

    #[inline]
    pub fn set_instance(&mut self, instance: String) -> Result<(), ConfigError> {
        let temp_config = ServiceNowConfig {
            instance: instance.clone(),
            ..self.clone()
        };
        temp_config.instance_url()?;
        self.instance = instance.trim().to_string();
        Ok(())
    }

    #[inline]
    pub fn set_username(&mut self, username: String) -> Result<(), ConfigError> {
        if username.trim().is_empty() {
            return Err(ConfigError::MissingField("username"));
        }
        self.username = username.trim().to_string();
        Ok(())
    }

    #[inline]
    pub fn set_password(&mut self, password: String) -> Result<(), ConfigError> {
        if password.is_empty() {
            return Err(ConfigError::MissingField("password"));
        }
        self.password = password;
        Ok(())
    }

    #[inline]
    pub fn set_timeout_seconds(&mut self, timeout_seconds: u64) -> Result<(), ConfigError> {
        if !(1..=300).contains(&timeout_seconds) {
            return Err(ConfigError::InvalidTimeout(timeout_seconds));
        }
        self.timeout_seconds = timeout_seconds;
        Ok(())
    }

    #[inline]
    pub fn set_retry_attempts(&mut self, retry_attempts: u32) -> Result<(), ConfigError> {
        if !(1..=10).contains(&retry_attempts) {
            return Err(ConfigError::InvalidRetryAttempts(retry_attempts));
        }
        self.retry_attempts = retry_attempts;
        Ok(())
    }
}

impl ServerConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=1000).contains(&self.max_list_limit) {
            return Err(ConfigError::InvalidListLimit(self.max_list_limit));
        }

        if self.default_list_limit == 0 || self.default_list_limit > self.max_list_limit {
            return Err(ConfigError::InvalidListLimit(self.default_list_limit));
        }

        Ok(())
    }

    /// Clamp a requested record count into `1..=max_list_limit`
    #[inline]
    pub fn clamp_limit(&self, requested: Option<i64>) -> u32 {
        let max = i64::from(self.max_list_limit);
        let requested = requested.unwrap_or_else(|| i64::from(self.default_list_limit));
        u32::try_from(requested.clamp(1, max)).unwrap_or(self.max_list_limit)
    }
}
