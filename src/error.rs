use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // Startup errors
    #[error("Failed to read config file {path:?}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path:?}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid setting in {path:?}: {reason}")]
    InvalidConfig { path: PathBuf, reason: String },

    #[error("Invalid database settings: {reason}")]
    InvalidDatabaseConfig { reason: String },

    #[error("Could not determine host identity: {reason}")]
    HostIdentity { reason: String },

    #[error("Failed to initialize logging: {reason}")]
    LoggingInit { reason: String },

    // Metrics source errors
    #[error("Metrics source {endpoint} unavailable: {source}")]
    SourceUnavailable {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Malformed metrics snapshot: {reason}")]
    MalformedSnapshot { reason: String },

    // Store errors
    #[error("Failed to connect to the database: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Failed to create table {table}: {reason}")]
    SchemaCreationFailed { table: String, reason: String },

    #[error("Failed to persist snapshot into {table}: {reason}")]
    PersistFailed { table: String, reason: String },
}
