use std::time::Duration;

use async_trait::async_trait;
use sqlx::any::AnyArguments;
use sqlx::query::Query;
use sqlx::{Any, AnyConnection, Connection};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{RetentionStore, TableNames, RECENT_CAPACITY};
use crate::collectors::MetricSnapshot;
use crate::config::Config;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Real,
    Integer,
}

const METRIC_COLUMNS: [(&str, ColumnKind); 11] = [
    ("cpu_total", ColumnKind::Real),
    ("memory_percent", ColumnKind::Real),
    ("swap_percent", ColumnKind::Real),
    ("disk_usage", ColumnKind::Real),
    ("disk_io_read", ColumnKind::Integer),
    ("disk_io_write", ColumnKind::Integer),
    ("network_tx", ColumnKind::Integer),
    ("network_rx", ColumnKind::Integer),
    ("cpu_temp", ColumnKind::Real),
    ("gpu_usage", ColumnKind::Real),
    ("cpu_freq", ColumnKind::Integer),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    MySql,
    Sqlite,
}

impl Dialect {
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("sqlite:") {
            Dialect::Sqlite
        } else {
            Dialect::MySql
        }
    }

    fn quote(&self, ident: &str) -> String {
        match self {
            Dialect::MySql => format!("`{ident}`"),
            Dialect::Sqlite => format!("\"{ident}\""),
        }
    }

    fn column_type(&self, kind: ColumnKind) -> &'static str {
        match (self, kind) {
            (Dialect::MySql, ColumnKind::Real) => "DOUBLE",
            (Dialect::MySql, ColumnKind::Integer) => "BIGINT",
            (Dialect::Sqlite, ColumnKind::Real) => "REAL",
            (Dialect::Sqlite, ColumnKind::Integer) => "INTEGER",
        }
    }

    fn primary_key(&self) -> &'static str {
        match self {
            Dialect::MySql => "id BIGINT AUTO_INCREMENT PRIMARY KEY",
            Dialect::Sqlite => "id INTEGER PRIMARY KEY AUTOINCREMENT",
        }
    }

    fn create_table_sql(&self, table: &str) -> String {
        let mut columns = vec![self.primary_key().to_string()];
        for (name, kind) in METRIC_COLUMNS {
            columns.push(format!("{name} {}", self.column_type(kind)));
        }
        columns.push("timestamp TIMESTAMP DEFAULT CURRENT_TIMESTAMP".to_string());

        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            self.quote(table),
            columns.join(",\n    ")
        )
    }

    fn insert_sql(&self, table: &str) -> String {
        let names: Vec<&str> = METRIC_COLUMNS.iter().map(|(name, _)| *name).collect();
        let placeholders = vec!["?"; names.len()].join(", ");
        format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            self.quote(table),
            names.join(", ")
        )
    }

    /// Deletes everything but the newest rows by id. The derived table keeps
    /// MySQL from rejecting a subquery on the table being deleted from.
    fn trim_sql(&self, table: &str, keep: usize) -> String {
        let table = self.quote(table);
        format!(
            "DELETE FROM {table} WHERE id NOT IN \
             (SELECT id FROM (SELECT id FROM {table} ORDER BY id DESC LIMIT {keep}) AS newest)"
        )
    }
}

fn bind_snapshot<'q>(
    query: Query<'q, Any, AnyArguments<'q>>,
    snapshot: &MetricSnapshot,
) -> Query<'q, Any, AnyArguments<'q>> {
    query
        .bind(snapshot.cpu_total)
        .bind(snapshot.memory_percent)
        .bind(snapshot.swap_percent)
        .bind(snapshot.disk_usage)
        .bind(snapshot.disk_io_read)
        .bind(snapshot.disk_io_write)
        .bind(snapshot.network_tx)
        .bind(snapshot.network_rx)
        .bind(snapshot.cpu_temp)
        .bind(snapshot.gpu_usage)
        .bind(snapshot.cpu_freq)
}

fn persist_failed(table: &str) -> impl FnOnce(sqlx::Error) -> Error {
    let table = table.to_string();
    move |e| Error::PersistFailed { table, reason: e.to_string() }
}

/// Store that opens a fresh connection for every operation and closes it
/// before returning, whatever the outcome.
pub struct SqlRetentionStore {
    url: String,
    dialect: Dialect,
    timeout: Duration,
}

impl SqlRetentionStore {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        sqlx::any::install_default_drivers();
        let url = url.into();
        SqlRetentionStore { dialect: Dialect::from_url(&url), url, timeout }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(config.database.connection_url()?, config.store_timeout()))
    }

    pub async fn connect(&self) -> Result<AnyConnection> {
        match timeout(self.timeout, AnyConnection::connect(&self.url)).await {
            Ok(Ok(conn)) => {
                info!("Connected to the database");
                Ok(conn)
            }
            Ok(Err(e)) => Err(Error::ConnectionFailed { reason: e.to_string() }),
            Err(_) => Err(Error::ConnectionFailed {
                reason: format!("timed out after {:?}", self.timeout),
            }),
        }
    }

    async fn release(conn: AnyConnection) {
        if let Err(e) = conn.close().await {
            warn!(error = %e, "Failed to close database connection cleanly");
        }
    }

    async fn create_tables(&self, conn: &mut AnyConnection, tables: &TableNames) -> Result<()> {
        for table in [tables.history(), tables.recent()] {
            let sql = self.dialect.create_table_sql(table);
            let schema_failed = |reason: String| Error::SchemaCreationFailed {
                table: table.to_string(),
                reason,
            };
            match timeout(self.timeout, sqlx::query(&sql).execute(&mut *conn)).await {
                Ok(Ok(_)) => debug!(table, "Table ensured"),
                Ok(Err(e)) => return Err(schema_failed(e.to_string())),
                Err(_) => return Err(schema_failed(format!("timed out after {:?}", self.timeout))),
            }
        }
        Ok(())
    }

    async fn write_snapshot(
        &self,
        conn: &mut AnyConnection,
        tables: &TableNames,
        snapshot: &MetricSnapshot,
    ) -> Result<()> {
        let mut tx = conn.begin().await.map_err(persist_failed(tables.history()))?;

        for table in [tables.history(), tables.recent()] {
            let sql = self.dialect.insert_sql(table);
            bind_snapshot(sqlx::query(&sql), snapshot)
                .execute(&mut *tx)
                .await
                .map_err(persist_failed(table))?;
        }

        let trim = self.dialect.trim_sql(tables.recent(), RECENT_CAPACITY);
        let trimmed = sqlx::query(&trim)
            .execute(&mut *tx)
            .await
            .map_err(persist_failed(tables.recent()))?
            .rows_affected();

        tx.commit().await.map_err(persist_failed(tables.history()))?;

        debug!(table = tables.recent(), trimmed, "Recent window trimmed");
        Ok(())
    }
}

#[async_trait]
impl RetentionStore for SqlRetentionStore {
    fn name(&self) -> &str {
        match self.dialect {
            Dialect::MySql => "mysql",
            Dialect::Sqlite => "sqlite",
        }
    }

    async fn ensure_schema(&self, tables: &TableNames) -> Result<()> {
        let mut conn = self.connect().await?;
        let result = self.create_tables(&mut conn, tables).await;
        Self::release(conn).await;
        result?;

        info!(
            history = tables.history(),
            recent = tables.recent(),
            "Tables created (if they didn't already exist)"
        );
        Ok(())
    }

    async fn persist(&self, tables: &TableNames, snapshot: &MetricSnapshot) -> Result<()> {
        let mut conn = self.connect().await.map_err(|e| Error::PersistFailed {
            table: tables.history().to_string(),
            reason: e.to_string(),
        })?;

        let write = self.write_snapshot(&mut conn, tables, snapshot);
        let result = match timeout(self.timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(Error::PersistFailed {
                table: tables.history().to_string(),
                reason: format!("timed out after {:?}", self.timeout),
            }),
        };
        Self::release(conn).await;
        result?;

        info!(
            history = tables.history(),
            recent = tables.recent(),
            "Inserted snapshot into history and recent tables"
        );
        Ok(())
    }
}
