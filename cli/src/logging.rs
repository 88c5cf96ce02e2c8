use std::env;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_FILTER: &str = "info";
const DEFAULT_LOG_FILE: &str = "backup.txt";

/// Flag, then `TRACING_LEVEL`, then `info`.
fn resolve_filter(flag: Option<&str>, env_value: Option<String>) -> String {
    flag.map(str::to_string)
        .or(env_value)
        .filter(|f| !f.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}

/// Flag, then `LOG_FILE_PATH`, then `backup.txt` in the working directory.
fn resolve_log_file(flag: Option<&Path>, env_value: Option<String>) -> PathBuf {
    flag.map(Path::to_path_buf)
        .or_else(|| env_value.filter(|v| !v.trim().is_empty()).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE))
}

/// Install stdout and file logging. Keep the guard alive until exit so the
/// file writer flushes.
pub fn init_logger(level: Option<&str>, log_file: Option<&Path>) -> WorkerGuard {
    let filter = resolve_filter(level, env::var("TRACING_LEVEL").ok());
    let filter_layer = EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let log_path = resolve_log_file(log_file, env::var("LOG_FILE_PATH").ok());
    let directory = log_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = log_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| DEFAULT_LOG_FILE.into());
    let file_appender = tracing_appender::rolling::never(directory, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stdout)
                .with_target(false)
                .with_ansi(true),
        )
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .with(filter_layer)
        .init();

    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_precedence() {
        assert_eq!(resolve_filter(Some("debug"), Some("warn".to_string())), "debug");
        assert_eq!(resolve_filter(None, Some("warn".to_string())), "warn");
        assert_eq!(resolve_filter(None, None), "info");
        assert_eq!(resolve_filter(None, Some(" ".to_string())), "info");
    }

    #[test]
    fn test_log_file_precedence() {
        assert_eq!(
            resolve_log_file(Some(Path::new("/var/log/cfgbackup.log")), Some("env.log".to_string())),
            PathBuf::from("/var/log/cfgbackup.log")
        );
        assert_eq!(resolve_log_file(None, Some("env.log".to_string())), PathBuf::from("env.log"));
        assert_eq!(resolve_log_file(None, None), PathBuf::from("backup.txt"));
    }
}
