//! Tracing setup: rolling file output plus a console layer in text mode

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{self, RollingFileAppender};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::AppConfig;

/// Log file rotation; unknown values mean no rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRotation {
    Hourly,
    Daily,
    Never,
}

impl LogRotation {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "hourly" => LogRotation::Hourly,
            "daily" => LogRotation::Daily,
            _ => LogRotation::Never,
        }
    }

    fn appender(self, dir: &str, file: &str) -> RollingFileAppender {
        match self {
            LogRotation::Hourly => rolling::hourly(dir, file),
            LogRotation::Daily => rolling::daily(dir, file),
            LogRotation::Never => rolling::never(dir, file),
        }
    }
}

/// Default directives: the configured level for our crate, quieter deps
fn default_directives(level: &str) -> String {
    format!("{level},escrow_engine={level},sqlx=warn,hyper=warn,reqwest=warn")
}

/// Install the global subscriber; keep the guard alive for the process lifetime.
///
/// `RUST_LOG` overrides the configured level.
pub fn init_logging(config: &AppConfig) -> WorkerGuard {
    let rotation = LogRotation::parse(&config.rotation);
    let (writer, guard) =
        tracing_appender::non_blocking(rotation.appender(&config.log_dir, &config.log_file));

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(&config.log_level)));
    let registry = tracing_subscriber::registry().with(filter);

    if config.use_json {
        // One JSON object per line, span fields included for booking/payment ids
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(writer)
                    .with_ansi(false),
            )
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(writer).with_ansi(false))
            .with(fmt::layer().with_target(false).compact())
            .init();
    }

    guard
}
