use std::str::FromStr;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::domain::settings::LogSettings;

pub struct LoggingGuard {
    // Keeps the non-blocking file writer flushing until shutdown.
    _guards: Vec<WorkerGuard>,
}

/// Install the global subscriber: console output, plus a daily-rolling
/// file appender when enabled. `RUST_LOG` overrides the configured level.
pub fn init(settings: &LogSettings) -> anyhow::Result<LoggingGuard> {
    let mut guards = Vec::new();

    let level_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::from_str(&settings.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let console_layer = settings
        .console_logging_enabled
        .then(|| fmt::layer().with_writer(std::io::stdout).with_target(true));

    let file_layer = if settings.file_logging_enabled {
        let appender =
            tracing_appender::rolling::daily(&settings.log_dir, &settings.file_name_prefix);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        guards.push(guard);
        Some(fmt::layer().with_writer(non_blocking).with_ansi(false))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(level_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(LoggingGuard { _guards: guards })
}
