use std::fs;

use anyhow::{Context, Result, anyhow};
use lectern_core::AppConfig;
use tracing_appender::{non_blocking, non_blocking::WorkerGuard};
use tracing_subscriber::EnvFilter;

/// Installs the global tracing subscriber. Use `RUST_LOG` to control levels.
///
/// With `log_dir` unset, human-readable lines go to stdout. With it set,
/// compact JSON goes to a daily-rolling file; the returned guard must live
/// until shutdown or buffered lines are lost.
pub fn init_observability(config: &AppConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let Some(log_dir) = config.log_dir.as_deref() else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .try_init()
            .map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))?;
        return Ok(None);
    };

    fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log dir: {log_dir}"))?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "lectern.log");
    let (writer, guard) = non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(false)
        .json()
        .with_writer(writer)
        .try_init()
        .map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))?;

    Ok(Some(guard))
}
