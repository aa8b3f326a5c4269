use chrono::Local;
use std::env;
use std::fs;
use std::path::Path;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable overriding the console log filter.
pub const LOG_ENV: &str = "TREESYNC_LOG";

/// Install the global subscriber.
///
/// The console shows warnings (debug with `verbose`) unless `TREESYNC_LOG`
/// says otherwise; progress output is printed separately. With `log_dir`,
/// every info-level event also goes to `treesync_<timestamp>.log` there.
/// Keep the returned guard alive until exit so the file is flushed.
pub fn init_logging(verbose: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let default_level = if verbose { "debug" } else { "warn" };
    let console_filter = env::var(LOG_ENV)
        .map(EnvFilter::new)
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let mut guard = None;
    let file_layer = log_dir.and_then(|dir| {
        if let Err(e) = fs::create_dir_all(dir) {
            eprintln!("Warning: cannot create log directory {}: {}", dir.display(), e);
            return None;
        }
        let file_name = format!("treesync_{}.log", Local::now().format("%Y%m%d_%H%M%S"));
        let appender = tracing_appender::rolling::never(dir, file_name);
        let (writer, file_guard) = tracing_appender::non_blocking(appender);
        guard = Some(file_guard);

        let level = if verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };
        Some(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(level),
        )
    });

    let registry = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .without_time()
                .with_filter(console_filter),
        )
        .with(file_layer);

    if registry.try_init().is_ok() {
        if let Some(dir) = log_dir.filter(|_| guard.is_some()) {
            info!("treesync {} logging to {}", env!("CARGO_PKG_VERSION"), dir.display());
        }
    }

    guard
}
