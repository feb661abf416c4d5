use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;

use crate::error::{Error, Result};

pub const DEFAULT_CONFIG_PATH: &str = "telemetry.toml";
pub const CONFIG_PATH_ENV: &str = "GLANCES_RETENTION_CONFIG";

#[derive(Deserialize, Debug)]
pub struct Config {
    #[serde(default = "default_collect_interval")]
    pub collect_interval: u64,
    #[serde(default = "default_source_url")]
    pub source_url: String,
    #[serde(default = "default_timeout")]
    pub request_timeout: u64,
    #[serde(default = "default_timeout")]
    pub store_timeout: u64,
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub database: DatabaseConfig,
}

#[derive(Deserialize, Debug)]
pub struct DatabaseConfig {
    /// Full connection URL. Takes precedence over the individual fields.
    pub url: Option<String>,
    #[serde(default = "default_db_host")]
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
}

fn default_collect_interval() -> u64 {
    2
}

fn default_source_url() -> String {
    "http://localhost:61208/api/3/all".to_string()
}

fn default_timeout() -> u64 {
    10
}

fn default_log_file() -> PathBuf {
    PathBuf::from("logs/metrics_error.log")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    3306
}

impl Config {
    /// Path of the config file: `$GLANCES_RETENTION_CONFIG` or `telemetry.toml`.
    pub fn default_path() -> PathBuf {
        std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let config_str = fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&config_str).map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate().map_err(|reason| Error::InvalidConfig {
            path: path.to_path_buf(),
            reason,
        })?;
        Ok(config)
    }

    /// Rejects settings that parse but cannot drive the collector.
    fn validate(&self) -> std::result::Result<(), String> {
        for (key, value) in [
            ("collect_interval", self.collect_interval),
            ("request_timeout", self.request_timeout),
            ("store_timeout", self.store_timeout),
        ] {
            if value == 0 {
                return Err(format!("`{key}` must be at least 1 second"));
            }
        }
        Ok(())
    }

    pub fn parse(config_str: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(config_str)
    }

    pub fn collect_interval(&self) -> Duration {
        Duration::from_secs(self.collect_interval)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout)
    }
}

impl DatabaseConfig {
    /// Assembles the connection URL for the store.
    ///
    /// An explicit `url` wins; otherwise a `mysql://` URL is built from the
    /// host, port, credentials and schema name, percent-encoding credentials.
    pub fn connection_url(&self) -> Result<String> {
        if let Some(url) = &self.url {
            if url.trim().is_empty() {
                return Err(Error::InvalidDatabaseConfig { reason: "url is empty".to_string() });
            }
            return Ok(url.clone());
        }

        let database = self.database.as_deref().filter(|db| !db.is_empty()).ok_or_else(|| {
            Error::InvalidDatabaseConfig {
                reason: "either `url` or `database` must be set".to_string(),
            }
        })?;

        let invalid = |what: &str| Error::InvalidDatabaseConfig { reason: format!("invalid {what}") };

        let mut url = Url::parse(&format!("mysql://{}", self.host)).map_err(|_| invalid("host"))?;
        url.set_port(Some(self.port)).map_err(|_| invalid("port"))?;
        if let Some(user) = &self.user {
            url.set_username(user).map_err(|_| invalid("user"))?;
        }
        if let Some(password) = &self.password {
            url.set_password(Some(password)).map_err(|_| invalid("password"))?;
        }
        url.set_path(&format!("/{database}"));

        Ok(url.to_string())
    }

    /// The URL with any password masked, for log output.
    pub fn redacted_url(&self) -> String {
        match self.connection_url().ok().and_then(|u| Url::parse(&u).ok()) {
            Some(mut url) => {
                if url.password().is_some() {
                    let _ = url.set_password(Some("***"));
                }
                url.to_string()
            }
            None => "<invalid>".to_string(),
        }
    }
}
