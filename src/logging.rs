use std::path::Path;

use tracing::level_filters::LevelFilter;
use tracing::Subscriber;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::error::{Error, Result};

/// Installs the global subscriber.
///
/// Stdout honours `RUST_LOG`, falling back to `level`. The file at `log_file`
/// only receives `WARN` and above; its directory is created if missing.
pub fn init_logging(level: &str, log_file: &Path) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| Error::LoggingInit { reason: format!("invalid log level {level:?}: {e}") })?;

    let stdout = fmt::layer().with_target(false).with_filter(filter);

    tracing_subscriber::registry()
        .with(stdout)
        .with(error_log_layer(log_file)?)
        .try_init()
        .map_err(|e| Error::LoggingInit { reason: e.to_string() })
}

fn error_log_layer<S>(log_file: &Path) -> Result<impl Layer<S>>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let dir = log_file.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let file_name = log_file.file_name().ok_or_else(|| Error::LoggingInit {
        reason: format!("log file path {log_file:?} has no file name"),
    })?;
    std::fs::create_dir_all(dir).map_err(|e| Error::LoggingInit {
        reason: format!("cannot create log directory {dir:?}: {e}"),
    })?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name.to_string_lossy())
        .build(dir)
        .map_err(|e| Error::LoggingInit { reason: format!("cannot open log file {log_file:?}: {e}") })?;

    Ok(fmt::layer()
        .with_writer(appender)
        .with_ansi(false)
        .with_target(true)
        .with_filter(LevelFilter::WARN))
}
