pub mod sql;

use async_trait::async_trait;

use crate::collectors::MetricSnapshot;
use crate::error::{Error, Result};

/// Rows kept in the recent table after every insert.
pub const RECENT_CAPACITY: usize = 50;

/// Physical table names for one monitored host.
///
/// Resolved once at startup and handed to every store call, so a transient
/// hostname change can never redirect writes mid-run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    host: String,
    history: String,
    recent: String,
}

impl TableNames {
    pub fn for_host(host: &str) -> Result<Self> {
        let host = host.trim();
        if host.is_empty() {
            return Err(Error::HostIdentity { reason: "hostname is empty".to_string() });
        }
        let ident: String = host
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect();

        Ok(TableNames {
            host: host.to_string(),
            history: format!("{ident}_longterm"),
            recent: format!("{ident}_limited"),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Unbounded, append-only table.
    pub fn history(&self) -> &str {
        &self.history
    }

    /// Table capped at [`RECENT_CAPACITY`] rows.
    pub fn recent(&self) -> &str {
        &self.recent
    }
}

#[async_trait]
pub trait RetentionStore: Send + Sync {
    fn name(&self) -> &str;

    /// Creates both tables if absent. Safe to call on every startup.
    async fn ensure_schema(&self, tables: &TableNames) -> Result<()>;

    /// Appends the snapshot to the history and recent tables, then trims
    /// the recent table down to the newest [`RECENT_CAPACITY`] rows.
    async fn persist(&self, tables: &TableNames, snapshot: &MetricSnapshot) -> Result<()>;
}
