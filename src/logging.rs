use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "learnpath.log";
const DEFAULT_LOG_DIR: &str = "./logs";

/// Keeps the non-blocking file writer alive; drop it last.
pub struct FileLogGuard {
    _guard: WorkerGuard,
}

#[derive(Debug, Clone)]
pub struct LogSettings {
    pub filter: String,
    /// Daily rolling file output in addition to stdout.
    pub file_dir: Option<PathBuf>,
}

impl LogSettings {
    pub fn from_env(filter: &str) -> Self {
        let file_enabled = std::env::var("ENABLE_FILE_LOGS")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        let file_dir = file_enabled.then(|| {
            std::env::var("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_LOG_DIR))
        });
        Self { filter: filter.to_string(), file_dir }
    }
}

/// Installs the global subscriber. Returns a guard when file output is active.
pub fn init_tracing(log_level: &str) -> Option<FileLogGuard> {
    init_with(&LogSettings::from_env(log_level))
}

pub fn init_with(settings: &LogSettings) -> Option<FileLogGuard> {
    let env_filter = EnvFilter::try_new(&settings.filter).unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match settings.file_dir.as_deref().map(open_file_writer) {
        Some(Ok((writer, guard))) => {
            let layer = fmt::layer().with_writer(writer).with_ansi(false).with_target(true);
            (Some(layer), Some(FileLogGuard { _guard: guard }))
        }
        Some(Err(err)) => {
            eprintln!("file logging disabled: {err}");
            (None, None)
        }
        None => (None, None),
    };
    let file_active = file_layer.is_some();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .with(file_layer)
        .init();

    if file_active {
        tracing::info!(log_dir = ?settings.file_dir, "file logging enabled");
    }
    guard
}

fn open_file_writer(
    dir: &std::path::Path,
) -> std::io::Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(dir)?;
    let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_PREFIX);
    Ok(tracing_appender::non_blocking(appender))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_output_is_opt_in() {
        std::env::remove_var("ENABLE_FILE_LOGS");
        let settings = LogSettings::from_env("debug");
        assert_eq!(settings.filter, "debug");
        assert!(settings.file_dir.is_none());
    }
}
