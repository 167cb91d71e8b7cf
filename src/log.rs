//! Tracing setup. Logs go to a file so they never interleave with the
//! NDJSON protocol or the printed header list.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to create log directory at {path:?}: {source}")]
    DirectoryCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid log file path: {0:?}")]
    InvalidPath(PathBuf),
    #[error("tracing subscriber already initialized")]
    SubscriberAlreadySet,
}

/// `$XDG_STATE_HOME/mhdr/mhdr.log`, falling back to `~/.local/state`.
pub fn log_path() -> PathBuf {
    resolve_log_path(
        std::env::var_os("XDG_STATE_HOME").map(PathBuf::from),
        std::env::var_os("HOME").map(PathBuf::from),
    )
}

fn resolve_log_path(state_home: Option<PathBuf>, home: Option<PathBuf>) -> PathBuf {
    let base = match (state_home, home) {
        (Some(state), _) if !state.as_os_str().is_empty() => state,
        (_, Some(home)) => home.join(".local").join("state"),
        _ => PathBuf::from("."),
    };
    base.join("mhdr").join("mhdr.log")
}

/// Install the file subscriber. Respects `RUST_LOG`, defaulting to `info`.
pub fn init(log_path: &Path) -> Result<(), LoggingError> {
    let (Some(directory), Some(file_name)) = (log_path.parent(), log_path.file_name()) else {
        return Err(LoggingError::InvalidPath(log_path.to_path_buf()));
    };
    std::fs::create_dir_all(directory).map_err(|source| LoggingError::DirectoryCreation {
        path: directory.to_path_buf(),
        source,
    })?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_writer(tracing_appender::rolling::never(directory, file_name))
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .try_init()
        .map_err(|_| LoggingError::SubscriberAlreadySet)
}

/// Truncate the log file if it exists.
pub fn clear(log_path: &Path) -> Result<(), String> {
    if !log_path.exists() {
        return Ok(());
    }
    OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(log_path)
        .map(|_| ())
        .map_err(|e| format!("failed to clear log file {}: {}", log_path.display(), e))
}
