//! Tracing subscriber setup.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Build the log filter.
///
/// An explicit level wins over `RUST_LOG`, which wins over `info`.
pub fn env_filter(log_level: Option<&str>) -> EnvFilter {
    match log_level {
        Some(level) => EnvFilter::try_new(level.to_lowercase())
            .unwrap_or_else(|_| EnvFilter::new("info")),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    }
}

/// Install the global subscriber.
///
/// Logs always go to stdout; with `log_file` set they are also appended
/// to that file. The returned guard flushes the file writer on drop and
/// must be held for the lifetime of the process.
pub fn init(log_level: Option<&str>, log_file: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let stdout_layer = fmt::layer().with_target(false).compact();

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter(log_level))
        .with(stdout_layer)
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_level_is_used() {
        assert_eq!(env_filter(Some("DEBUG")).to_string(), "debug");
        assert_eq!(env_filter(Some("warn")).to_string(), "warn");
    }

    #[test]
    fn test_invalid_level_falls_back_to_info() {
        assert_eq!(env_filter(Some("foo=notalevel")).to_string(), "info");
    }
}
