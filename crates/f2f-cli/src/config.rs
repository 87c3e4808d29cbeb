//! Configuration management for the `f2f` CLI.
//!
//! Configuration is stored in TOML format at the platform config directory:
//!
//! - Linux: `~/.config/f2f/f2f.toml`
//! - macOS: `~/Library/Application Support/f2f/f2f.toml`
//! - Windows: `%APPDATA%\f2f\config\f2f.toml`
//!
//! Values given on the command line take precedence over the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use f2f_core::http_client::HttpClientConfig;
use f2f_core::protocol::{ProtocolConfig, SignaturePolicy};
use f2f_crypto::FreshnessWindow;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const APP_QUALIFIER: &str = "";
const APP_ORGANIZATION: &str = "";
const APP_NAME: &str = "f2f";
const CONFIG_FILE: &str = "f2f.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// CLI configuration.
///
/// # Example TOML
///
/// ```toml
/// [identity]
/// # key_dir = ""  # Empty = <data dir>/keys
///
/// [store]
/// # db_path = ""  # Empty = <data dir>/f2f.db
///
/// [remote]
/// timeout_seconds = 30
/// ack_timeout_seconds = 3
/// # ca_cert_path = "/etc/f2f/server.pem"
///
/// [protocol]
/// freshness_window_secs = 10
/// verify_peer_signature = true
///
/// [logging]
/// level = "warn"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub protocol: ProtocolSection,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Directory holding identity key files (empty = default location)
    #[serde(default)]
    pub key_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the device/profile database (empty = default location)
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_seconds: u64,

    /// Extra trusted CA certificate (PEM) for self-signed backends
    #[serde(default)]
    pub ca_cert_path: Option<PathBuf>,
}

fn default_timeout() -> u64 {
    30
}

fn default_ack_timeout() -> u64 {
    3
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout(),
            ack_timeout_seconds: default_ack_timeout(),
            ca_cert_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolSection {
    /// Maximum clock skew accepted on a peer challenge
    #[serde(default = "default_freshness")]
    pub freshness_window_secs: u64,

    /// Verify a peer's challenge signature before prompting
    #[serde(default = "default_verify")]
    pub verify_peer_signature: bool,
}

fn default_freshness() -> u64 {
    f2f_crypto::freshness::DEFAULT_MAX_SKEW_SECS
}

fn default_verify() -> bool {
    true
}

impl Default for ProtocolSection {
    fn default() -> Self {
        Self {
            freshness_window_secs: default_freshness(),
            verify_peer_signature: default_verify(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// CLI flags that override config file values.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub key_dir: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
    pub timeout_seconds: Option<u64>,
    pub verbose: Option<bool>,
    pub debug: Option<bool>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_default() -> Result<Self, ConfigError> {
        if let Some(path) = Self::default_path() {
            if path.exists() {
                return Self::load(&path);
            }
        }
        Ok(Self::default())
    }

    pub fn load_from(custom_path: Option<&Path>) -> Result<Self, ConfigError> {
        match custom_path {
            Some(path) => Self::load(path),
            None => Self::load_default(),
        }
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
    }

    pub fn default_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// Directory for keys and the database when not configured.
    pub fn data_dir() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Write the default file on first run. Returns whether one was created.
    pub fn create_default_if_missing() -> Result<bool, ConfigError> {
        if let Some(path) = Self::default_path() {
            if !path.exists() {
                Self::default().save(&path)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level '{}'. Valid values: {:?}",
                self.logging.level, valid_levels
            )));
        }

        if self.remote.timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "timeout_seconds must be greater than 0".to_string(),
            ));
        }
        if self.remote.ack_timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "ack_timeout_seconds must be greater than 0".to_string(),
            ));
        }
        if self.protocol.freshness_window_secs == 0 {
            return Err(ConfigError::ValidationError(
                "freshness_window_secs must be greater than 0".to_string(),
            ));
        }

        if let Some(path) = &self.remote.ca_cert_path {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::ValidationError(
                    "ca_cert_path must not be empty when set".to_string(),
                ));
            }
        }

        Ok(())
    }

    pub fn with_overrides(mut self, overrides: &CliOverrides) -> Self {
        if let Some(dir) = &overrides.key_dir {
            self.identity.key_dir = Some(dir.clone());
        }
        if let Some(path) = &overrides.db_path {
            self.store.db_path = Some(path.clone());
        }
        if let Some(timeout) = overrides.timeout_seconds {
            self.remote.timeout_seconds = timeout;
        }
        if overrides.debug == Some(true) {
            self.logging.level = "debug".to_string();
        } else if overrides.verbose == Some(true) {
            self.logging.level = "info".to_string();
        }
        self
    }

    pub fn key_dir(&self) -> Result<PathBuf, ConfigError> {
        self.identity
            .key_dir
            .clone()
            .or_else(|| Self::data_dir().map(|d| d.join("keys")))
            .ok_or_else(|| ConfigError::ValidationError("no key directory available".to_string()))
    }

    pub fn db_path(&self) -> Result<PathBuf, ConfigError> {
        self.store
            .db_path
            .clone()
            .or_else(|| Self::data_dir().map(|d| d.join("f2f.db")))
            .ok_or_else(|| ConfigError::ValidationError("no database path available".to_string()))
    }

    pub fn protocol_config(&self) -> ProtocolConfig {
        ProtocolConfig {
            freshness: FreshnessWindow::new(self.protocol.freshness_window_secs),
            signature_policy: if self.protocol.verify_peer_signature {
                SignaturePolicy::VerifyLocally
            } else {
                SignaturePolicy::DeferToBackend
            },
        }
    }

    /// HTTP client settings; reads the CA file if one is configured.
    pub fn http_config(&self) -> Result<HttpClientConfig, ConfigError> {
        let ca_cert_pem = match &self.remote.ca_cert_path {
            Some(path) => Some(std::fs::read(path)?),
            None => None,
        };
        Ok(HttpClientConfig {
            timeout: Duration::from_secs(self.remote.timeout_seconds),
            ack_timeout: Duration::from_secs(self.remote.ack_timeout_seconds),
            ca_cert_pem,
        })
    }
}
