//! Configuration management for tmstore.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use regex::Regex;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{Error, Result};
use crate::remote::DEFAULT_BACKUP_VERSION;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "tmstore";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "local.db";

/// Prefix for environment variable overrides.
const ENV_PREFIX: &str = "TMSTORE_";

/// Document identifiers accepted by the hosted store.
const DOCUMENT_ID_PATTERN: &str = r"^[A-Za-z0-9_-]{1,64}$";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `TMSTORE_`, sections split on `__`,
///    e.g. `TMSTORE_PROXY__MASTER_KEY`)
/// 2. TOML config file at `~/.config/tmstore/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Local durable store configuration.
    pub local: LocalConfig,
    /// Remote document configuration.
    pub remote: RemoteConfig,
    /// Document proxy configuration.
    pub proxy: ProxyConfig,
    /// Backup configuration.
    pub backup: BackupConfig,
}

/// Local store configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/tmstore/local.db`
    pub database_path: Option<PathBuf>,
}

/// Remote document configuration, as seen by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the document endpoint (normally the proxy).
    pub endpoint: String,
    /// Identifier of the document holding all application data.
    pub document_id: String,
    /// Timeout applied to every remote request, in seconds.
    pub request_timeout_secs: u64,
    /// How many times a write re-merges after losing a version race.
    pub max_conflict_retries: u32,
}

/// Document proxy configuration. Only the proxy process reads the secret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Address the proxy listens on.
    pub bind: String,
    /// Base URL of the hosted document store.
    pub upstream: String,
    /// Secret for the hosted document store.
    #[serde(serialize_with = "redact")]
    pub master_key: Option<String>,
}

/// Backup configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Version tag written into backup records.
    pub version_tag: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8787".to_string(),
            document_id: "tms-dashboard".to_string(),
            request_timeout_secs: 30,
            max_conflict_retries: 3,
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8787".to_string(),
            upstream: "https://api.jsonbin.io/v3".to_string(),
            master_key: None,
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            version_tag: DEFAULT_BACKUP_VERSION.to_string(),
        }
    }
}

fn redact<S: Serializer>(value: &Option<String>, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    match value {
        Some(_) => serializer.serialize_some("<redacted>"),
        None => serializer.serialize_none(),
    }
}

fn validate_url(field: &str, value: &str) -> Result<()> {
    let url = reqwest::Url::parse(value).map_err(|e| Error::ConfigValidation {
        message: format!("{field} is not a valid URL ({value}): {e}"),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::ConfigValidation {
            message: format!("{field} must use http or https: {value}"),
        });
    }
    Ok(())
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        validate_url("remote.endpoint", &self.remote.endpoint)?;
        validate_url("proxy.upstream", &self.proxy.upstream)?;

        let pattern = Regex::new(DOCUMENT_ID_PATTERN).map_err(|e| Error::internal(e.to_string()))?;
        if !pattern.is_match(&self.remote.document_id) {
            return Err(Error::ConfigValidation {
                message: format!(
                    "remote.document_id must match {DOCUMENT_ID_PATTERN}: '{}'",
                    self.remote.document_id
                ),
            });
        }

        if self.remote.request_timeout_secs == 0 {
            return Err(Error::ConfigValidation {
                message: "remote.request_timeout_secs must be greater than 0".to_string(),
            });
        }

        self.bind_addr()?;

        if self.backup.version_tag.trim().is_empty() {
            return Err(Error::ConfigValidation {
                message: "backup.version_tag must not be empty".to_string(),
            });
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.local
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the remote request timeout as a Duration.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.remote.request_timeout_secs)
    }

    /// Parse the proxy bind address.
    ///
    /// # Errors
    ///
    /// Returns an error if `proxy.bind` is not a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.proxy.bind.parse().map_err(|_| Error::ConfigValidation {
            message: format!("proxy.bind is not a socket address: {}", self.proxy.bind),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert!(config.local.database_path.is_none());
        assert_eq!(config.remote.endpoint, "http://127.0.0.1:8787");
        assert_eq!(config.remote.document_id, "tms-dashboard");
        assert_eq!(config.remote.request_timeout_secs, 30);
        assert_eq!(config.remote.max_conflict_retries, 3);
        assert!(config.proxy.master_key.is_none());
        assert_eq!(config.backup.version_tag, "1.0");
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_bad_endpoint() {
        let mut config = Config::default();
        config.remote.endpoint = "not a url".to_string();

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("remote.endpoint"));
    }

    #[test]
    fn test_validate_non_http_upstream() {
        let mut config = Config::default();
        config.proxy.upstream = "ftp://example.com".to_string();

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("http or https"));
    }

    #[test]
    fn test_validate_document_id() {
        let mut config = Config::default();
        config.remote.document_id = "../etc/passwd".to_string();
        assert!(config.validate().unwrap_err().to_string().contains("document_id"));

        config.remote.document_id = String::new();
        assert!(config.validate().is_err());

        config.remote.document_id = "65a1f0c2e41b4d34e47b2c1a".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_timeout() {
        let mut config = Config::default();
        config.remote.request_timeout_secs = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("request_timeout_secs"));
    }

    #[test]
    fn test_validate_bad_bind() {
        let mut config = Config::default();
        config.proxy.bind = "localhost".to_string();

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("proxy.bind"));
    }

    #[test]
    fn test_validate_empty_version_tag() {
        let mut config = Config::default();
        config.backup.version_tag = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_database_path_default() {
        let config = Config::default();
        assert!(config.database_path().to_string_lossy().contains("local.db"));
    }

    #[test]
    fn test_database_path_custom() {
        let mut config = Config::default();
        config.local.database_path = Some(PathBuf::from("/custom/path/db.sqlite"));
        assert_eq!(
            config.database_path(),
            PathBuf::from("/custom/path/db.sqlite")
        );
    }

    #[test]
    fn test_request_timeout() {
        assert_eq!(Config::default().request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_bind_addr() {
        let addr = Config::default().bind_addr().unwrap();
        assert_eq!(addr.port(), 8787);
    }

    #[test]
    fn test_master_key_redacted_when_serialized() {
        let mut config = Config::default();
        config.proxy.master_key = Some("$2b$10$secret".to_string());

        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
        assert!(json.contains("<redacted>"));
    }

    #[test]
    fn test_default_config_path() {
        let path = Config::default_config_path();
        assert!(path.to_string_lossy().contains("tmstore"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    fn test_load_nonexistent_config() {
        let config = Config::load_from(Some(PathBuf::from("/nonexistent/config.toml"))).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_from_toml_file() {
        let path = std::env::temp_dir().join(format!("tmstore_config_test_{}.toml", std::process::id()));
        std::fs::write(
            &path,
            r#"
[remote]
endpoint = "https://proxy.example.com"
document_id = "fleet"
max_conflict_retries = 5

[local]
database_path = "/tmp/fleet.db"
"#,
        )
        .unwrap();

        let config = Config::load_from(Some(path.clone())).unwrap();
        assert_eq!(config.remote.endpoint, "https://proxy.example.com");
        assert_eq!(config.remote.document_id, "fleet");
        assert_eq!(config.remote.max_conflict_retries, 5);
        assert_eq!(config.remote.request_timeout_secs, 30);
        assert_eq!(config.database_path(), PathBuf::from("/tmp/fleet.db"));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let path = std::env::temp_dir().join(format!(
            "tmstore_config_invalid_{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "[remote]\nrequest_timeout_secs = 0\n").unwrap();

        let err = Config::load_from(Some(path.clone())).unwrap_err();
        assert!(matches!(err, Error::ConfigValidation { .. }));

        let _ = std::fs::remove_file(&path);
    }
}
