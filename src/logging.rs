use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

const LOG_FILE_NAME: &str = "editor-mcp-bridge.log";

/// Install the global subscriber: console output always, plus a daily
/// rolling file when a directory is configured. RUST_LOG takes precedence
/// over the configured level.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the life of the process.
pub fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
    };

    let console = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(filter());

    let Some(directory) = config.directory.as_ref() else {
        let _ = tracing_subscriber::registry().with(console).try_init();
        return None;
    };

    if let Err(e) = std::fs::create_dir_all(directory) {
        let _ = tracing_subscriber::registry().with(console).try_init();
        tracing::warn!(
            "Failed to create log directory {}: {}; logging to stderr only",
            directory.display(),
            e
        );
        return None;
    }

    let file_appender = tracing_appender::rolling::daily(directory, LOG_FILE_NAME);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let file = tracing_subscriber::fmt::layer()
        .with_writer(file_writer)
        .with_target(true)
        .with_ansi(false)
        .with_filter(filter());

    let _ = tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init();

    info!("Logging to {}", directory.join(LOG_FILE_NAME).display());
    Some(guard)
}
