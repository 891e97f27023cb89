//! Logging setup for the buildsock binary.
//!
//! Logs go to stderr; `--log-file` adds a plain file sink written through a
//! non-blocking appender. A log file whose directory cannot be created is
//! reported on stderr and skipped. The returned guard must live until exit so the
//! file writer flushes.

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

const DEBUG_ENV: &str = "BUILDSOCK_DEBUG_LOG";
const DEFAULT_LOG_FILE: &str = "buildsock.log";

pub fn init(log_file: Option<&Path>) -> Option<WorkerGuard> {
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(env_filter());

    let (file_layer, guard) = match log_file.and_then(prepare_log_file) {
        Some((dir, file_name)) => {
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(env_filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

/// Splits `path` into the directory and file name the appender expects and
/// makes sure the directory exists. On failure the file sink is skipped with
/// a warning on stderr, since the subscriber is not installed yet.
fn prepare_log_file(path: &Path) -> Option<(PathBuf, OsString)> {
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| DEFAULT_LOG_FILE.into());

    match std::fs::create_dir_all(dir) {
        Ok(()) => Some((dir.to_path_buf(), file_name)),
        Err(err) => {
            eprintln!(
                "buildsock: not logging to {}: cannot create {}: {}",
                path.display(),
                dir.display(),
                err
            );
            None
        }
    }
}

fn env_filter() -> EnvFilter {
    let debug_enabled = env::var(DEBUG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_directory_is_created() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("logs/nested/buildsock.log");
        let (dir, name) = prepare_log_file(&path).unwrap();
        assert_eq!(dir, temp.path().join("logs/nested"));
        assert_eq!(name, OsString::from("buildsock.log"));
        assert!(dir.is_dir());
    }

    #[test]
    fn bare_file_name_logs_to_current_directory() {
        let (dir, name) = prepare_log_file(Path::new("run.log")).unwrap();
        assert_eq!(dir, PathBuf::from("."));
        assert_eq!(name, OsString::from("run.log"));
    }

    #[test]
    fn uncreatable_directory_skips_file_sink() {
        let temp = tempfile::tempdir().unwrap();
        let blocker = temp.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();
        assert!(prepare_log_file(&blocker.join("buildsock.log")).is_none());
    }
}
