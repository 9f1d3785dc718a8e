//! Logging setup
//!
//! Console output plus an optional rolling JSON file.

use crate::config::LoggingConfig;
use std::io;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const LOG_FILE_NAME: &str = "stencil.log";

impl LoggingConfig {
    /// Install the global subscriber.
    ///
    /// The returned guard flushes the file writer on drop; keep it alive for
    /// the lifetime of the process.
    pub fn init(&self) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error + Send + Sync>> {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        let console_layer = if self.json_console {
            fmt::layer()
                .with_target(true)
                .json()
                .with_writer(io::stdout)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(false)
                .with_ansi(true)
                .with_writer(io::stdout)
                .boxed()
        };

        let guard = if self.file_logging_enabled {
            let file_appender = rolling::daily(&self.log_dir, LOG_FILE_NAME);
            let (writer, guard) = non_blocking(file_appender);

            let file_layer = fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .json()
                .with_writer(writer);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .with(file_layer)
                .try_init()?;

            Some(guard)
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .try_init()?;

            None
        };

        tracing::info!("Logging initialized - level: {}", self.level);

        Ok(guard)
    }
}

/// Log a preview orchestration step with its namespace and sequence number
#[macro_export]
macro_rules! log_preview_step {
    ($step:expr, $namespace:expr, $sequence:expr) => {
        tracing::debug!(
            step = $step,
            namespace = %$namespace,
            sequence = $sequence,
            "Preview step"
        )
    };
    ($step:expr, $namespace:expr, $sequence:expr, $($key:ident = $value:expr),+) => {
        tracing::debug!(
            step = $step,
            namespace = %$namespace,
            sequence = $sequence,
            $($key = $value),+,
            "Preview step"
        )
    };
}
