use crate::runtime::error::RuntimeError;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_FILTER: &str = "info,esc_sensor=debug,esc_core=info";

/// Initialize the tracing subscriber with optional JSON output and an
/// optional daily rolling log file. Keep the returned guard alive until exit
/// so buffered file output is flushed.
pub fn init_tracing(
    json_output: bool,
    log_dir: Option<&Path>,
) -> Result<Option<WorkerGuard>, RuntimeError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|source| RuntimeError::LogDir {
                path: dir.to_path_buf(),
                source,
            })?;
            let appender = tracing_appender::rolling::daily(dir, "esc-sensor.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    // A second init (tests, embedding) keeps the first subscriber.
    let installed = if json_output {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().pretty()).try_init()
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
    Ok(guard)
}
