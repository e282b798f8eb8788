use std::fs;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_DIRECTIVE: &str = "fpi_pipeline=info";

/// Initializes the logging system: human-readable console output plus a
/// JSON file with daily rotation. The log directory can be overridden with
/// `FPI_LOG_DIR`.
pub fn init_logging() {
    let log_dir = std::env::var("FPI_LOG_DIR").unwrap_or_else(|_| "logs".to_string());
    let _ = fs::create_dir_all(&log_dir);

    let file_appender = tracing_appender::rolling::daily(&log_dir, "pipeline.log");
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer().json().with_writer(non_blocking_writer);
    let console_layer = fmt::layer().with_writer(std::io::stdout);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(DEFAULT_DIRECTIVE.parse().unwrap()))
        .with(file_layer)
        .with(console_layer)
        .init();

    // The guard must stay alive for the whole process so buffered log lines
    // are flushed on exit.
    std::mem::forget(guard);
}
