use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

const DEFAULT_DIRECTIVES: &str = "info";

/// `RUST_LOG`, then the configured filter, then `info`.
fn filter_directives(config: &LoggingConfig, rust_log: Option<String>) -> String {
    rust_log
        .filter(|value| !value.trim().is_empty())
        .or_else(|| config.filter.clone())
        .unwrap_or_else(|| DEFAULT_DIRECTIVES.to_string())
}

pub fn init_logging(config: &LoggingConfig) {
    // Daily rotated JSON file
    let file_layer = config.file.then(|| {
        fmt::layer()
            .with_writer(rolling::daily(&config.directory, &config.file_prefix))
            .with_ansi(false)
            .json()
    });

    // Human-readable; stdout carries command output and reports
    let console_layer = fmt::layer().with_writer(std::io::stderr);

    let directives = filter_directives(config, std::env::var("RUST_LOG").ok());
    let env_filter =
        EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .init();
}
