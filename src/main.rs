mod collector_loop;
mod collectors;
mod config;
mod error;
mod exporters;
mod logging;

use anyhow::{Context, Result};
use sysinfo::System;
use tracing::{debug, error, info};

use crate::collector_loop::CollectorLoop;
use crate::collectors::glances::GlancesSource;
use crate::config::Config;
use crate::error::Error;
use crate::exporters::sql::SqlRetentionStore;
use crate::exporters::{RetentionStore, TableNames};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config_path = Config::default_path();
    let config = Config::load(&config_path)?;

    logging::init_logging(&config.log_level, &config.log_file)?;
    info!(path = %config_path.display(), "Loaded config");
    debug!(interval_secs = config.collect_interval, source = %config.source_url, "Effective settings");

    if let Err(e) = run(&config).await {
        error!(error = %format!("{e:#}"), "Startup failed");
        return Err(e);
    }
    Ok(())
}

async fn run(config: &Config) -> Result<()> {
    // Resolve the host identity once; every table reference derives from it.
    let hostname = System::host_name().ok_or_else(|| Error::HostIdentity {
        reason: "the operating system did not report a hostname".to_string(),
    })?;
    let tables = TableNames::for_host(&hostname)?;

    let source = GlancesSource::from_config(config)?;
    let store = SqlRetentionStore::from_config(config)?;
    info!(
        host = %hostname,
        database = %config.database.redacted_url(),
        source = source.url(),
        "Starting metrics collection"
    );

    store
        .ensure_schema(&tables)
        .await
        .with_context(|| format!("cannot prepare tables for host {hostname}"))?;

    let mut collector = CollectorLoop::new(source, store, tables, config.collect_interval());
    let cycles = collector.run_until(shutdown_signal()).await;

    info!(cycles, "Shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
