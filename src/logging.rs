use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::Subscriber;
use tracing_subscriber::EnvFilter;

use crate::errors::{LauncherError, Result};

static LOG_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

const DEFAULT_FILE_NAME: &str = "orchestrator.log";
const DEFAULT_DIRECTIVE: &str = "info";

/// Where and how the orchestrator writes its rolling log.
#[derive(Clone, Debug)]
pub struct LoggingOptions {
    pub directory: PathBuf,
    pub file_name: String,
    pub default_directive: String,
}

impl LoggingOptions {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            file_name: DEFAULT_FILE_NAME.to_string(),
            default_directive: DEFAULT_DIRECTIVE.to_string(),
        }
    }

    pub fn with_file_name(mut self, file_name: &str) -> Self {
        let trimmed = file_name.trim();
        if !trimmed.is_empty() {
            self.file_name = trimmed.to_string();
        }
        self
    }

    pub fn with_default_directive(mut self, directive: &str) -> Self {
        let trimmed = directive.trim();
        if !trimmed.is_empty() {
            self.default_directive = trimmed.to_string();
        }
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_directive))
    }
}

pub fn init(log_dir: &Path) -> Result<()> {
    init_with(&LoggingOptions::new(log_dir))
}

/// Installs the global subscriber. A second call fails with a config error
/// because only one global default can exist per process.
pub fn init_with(options: &LoggingOptions) -> Result<()> {
    fs::create_dir_all(&options.directory)?;

    let file_appender = tracing_appender::rolling::daily(&options.directory, &options.file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let subscriber = Subscriber::builder()
        .with_env_filter(options.filter())
        .with_writer(non_blocking)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| LauncherError::Config(format!("logging already initialised: {err}")))?;
    let _ = LOG_GUARD.set(guard);

    tracing::info!(
        directory = %options.directory.display(),
        file = %options.file_name,
        "orchestrator logging ready"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_ignore_blank_overrides() {
        let options = LoggingOptions::new("/tmp/logs")
            .with_file_name("   ")
            .with_default_directive("");
        assert_eq!(options.file_name, DEFAULT_FILE_NAME);
        assert_eq!(options.default_directive, DEFAULT_DIRECTIVE);

        let custom = LoggingOptions::new("/tmp/logs")
            .with_file_name(" launch.log ")
            .with_default_directive("debug");
        assert_eq!(custom.file_name, "launch.log");
        assert_eq!(custom.default_directive, "debug");
    }
}
