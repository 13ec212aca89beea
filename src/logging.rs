//! Tracing setup: console output plus a rolling log file.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{self, RollingFileAppender};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::AppConfig;

/// Install the global subscriber. The returned guard owns the non-blocking
/// file writer; `main` holds it so buffered lines flush on exit.
pub fn init_logging(config: &AppConfig) -> WorkerGuard {
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender(config));
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let base = tracing_subscriber::registry().with(filter);

    if config.use_json {
        let file_layer = fmt::layer()
            .json()
            .with_writer(file_writer)
            .with_ansi(false);
        base.with(file_layer).init();
    } else {
        let file_layer = fmt::layer()
            .with_writer(file_writer)
            .with_ansi(false)
            .with_target(false);
        let console_layer = fmt::layer().with_target(false);
        base.with(file_layer).with(console_layer).init();
    }

    guard
}

fn file_appender(config: &AppConfig) -> RollingFileAppender {
    match config.rotation.as_str() {
        "hourly" => rolling::hourly(&config.log_dir, &config.log_file),
        "daily" => rolling::daily(&config.log_dir, &config.log_file),
        _ => rolling::never(&config.log_dir, &config.log_file),
    }
}
