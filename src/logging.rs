//! Process-wide tracing setup
//!
//! Installs a `tracing-subscriber` registry with an [`EnvFilter`] (taken from
//! `RUST_LOG`, falling back to [`DEFAULT_FILTER`]) and a console layer. When
//! [`LogConfig::log_dir`] is set, records are also written to a daily rolling
//! file in that directory.

use crate::config::LogConfig;
use crate::error::{Result, SyncError};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_FILTER: &str = "info,exsync=debug";

/// Install the global subscriber
///
/// The returned guard flushes the file writer when dropped and has to be kept
/// alive for as long as the process logs to the file. Fails if a global
/// subscriber is already installed.
pub fn init(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender =
                tracing_appender::rolling::daily(dir, format!("{}.log", config.module_name));
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init()
        .map_err(|e| SyncError::Config(format!("Failed to install tracing subscriber: {}", e)))?;

    Ok(guard)
}
