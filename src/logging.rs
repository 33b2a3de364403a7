//! Tracing setup shared by the server and the CLI.
//!
//! Events go to stdout through a compact formatter and to an append-only log file. The file is
//! `RESUME_FORGE_LOG_FILE` when set, `logs/resume-forge.log` otherwise. File output goes through
//! a non-blocking writer whose guard lives for the rest of the process.
use std::{
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
    sync::OnceLock,
};

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Variable naming an explicit log file.
pub const LOG_FILE_VAR: &str = "RESUME_FORGE_LOG_FILE";

const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_LOG_FILE: &str = "resume-forge.log";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the global subscriber. `RUST_LOG` filters events (default `info`).
///
/// File logging is skipped with a note on stderr when the target cannot be opened.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_target(false).compact();
    let file_layer = file_writer(&log_file_path(std::env::var(LOG_FILE_VAR).ok())).map(|writer| {
        fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_ansi(false)
            .compact()
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();
}

/// Log file location for an optional override.
fn log_file_path(explicit: Option<String>) -> PathBuf {
    match explicit.filter(|path| !path.trim().is_empty()) {
        Some(path) => PathBuf::from(path),
        None => Path::new(DEFAULT_LOG_DIR).join(DEFAULT_LOG_FILE),
    }
}

fn file_writer(path: &Path) -> Option<NonBlocking> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty())
        && let Err(err) = fs::create_dir_all(parent)
    {
        eprintln!("Failed to create log directory {}: {err}", parent.display());
        return None;
    }
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => {
            let (writer, guard) = tracing_appender::non_blocking(file);
            let _ = LOG_GUARD.set(guard);
            Some(writer)
        }
        Err(err) => {
            eprintln!("Failed to open log file {}: {err}", path.display());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_path_wins_over_default() {
        assert_eq!(
            log_file_path(Some("/tmp/forge.log".into())),
            PathBuf::from("/tmp/forge.log")
        );
        assert_eq!(log_file_path(None), PathBuf::from("logs/resume-forge.log"));
        assert_eq!(log_file_path(Some("  ".into())), PathBuf::from("logs/resume-forge.log"));
    }

    #[test]
    fn file_writer_creates_missing_directories() {
        let dir = std::env::temp_dir().join(format!("resume-forge-log-{}", uuid::Uuid::new_v4()));
        let path = dir.join("nested").join("test.log");

        assert!(file_writer(&path).is_some());
        assert!(path.exists());
        let _ = fs::remove_dir_all(dir);
    }
}
