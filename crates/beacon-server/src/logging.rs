//! Logging initialization and configuration.
//!
//! - **Production**: JSON logs to rolling files + compact logs to stdout
//! - **Development**: Pretty logs to stdout with span events
//!
//! The filter comes from `RUST_LOG` if it is set and parses, otherwise
//! `BEACON_LOG_LEVEL`, otherwise `info`.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding the fallback log filter.
pub const LOG_LEVEL_ENV: &str = "BEACON_LOG_LEVEL";

/// Filter used when neither variable is set.
const DEFAULT_LEVEL: &str = "info";

/// Prefix of the daily log files, e.g. `beacon-server.2026-10-19`.
const LOG_FILE_PREFIX: &str = "beacon-server";

/// Keeps the non-blocking writers alive for the lifetime of the program.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();
static STDOUT_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initialize the logging system.
///
/// # Production Mode
///
/// - Logs to rolling daily files in `/var/log/beacon-scan/`
/// - Also logs to stdout for systemd journal capture
/// - JSON format in files, compact format without ANSI colors on stdout
/// - If the log directory cannot be created, logs go to stdout only
///
/// # Development Mode
///
/// - Logs to stdout only with pretty formatting and span events
///
/// # Errors
///
/// Returns an error if neither `RUST_LOG` nor `BEACON_LOG_LEVEL` yields a
/// valid filter.
pub fn init(is_production: bool) -> anyhow::Result<()> {
    let env_filter = build_filter(
        std::env::var("RUST_LOG").ok().as_deref(),
        std::env::var(LOG_LEVEL_ENV).ok().as_deref(),
    )?;

    if is_production {
        init_production(env_filter);
    } else {
        init_development(env_filter);
    }

    Ok(())
}

/// `RUST_LOG` wins when it parses; a broken one falls back to the level.
fn build_filter(rust_log: Option<&str>, level: Option<&str>) -> anyhow::Result<EnvFilter> {
    if let Some(filter) = rust_log.and_then(|directives| EnvFilter::try_new(directives).ok()) {
        return Ok(filter);
    }
    Ok(EnvFilter::try_new(level.unwrap_or(DEFAULT_LEVEL))?)
}

fn init_production(env_filter: EnvFilter) {
    let log_dir = log_directory();

    let (non_blocking_stdout, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(non_blocking_stdout)
        .with_target(true)
        .with_ansi(false); // journald stores raw bytes

    let file_layer = match ensure_dir(&log_dir) {
        Ok(()) => {
            // Daily rotation; old files are left for logrotate/tmpfiles to prune.
            let file_appender =
                RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_PREFIX);
            let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);
            let _ = FILE_GUARD.set(file_guard);

            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(non_blocking_file)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true),
            )
        }
        Err(_) => None,
    };
    let file_logging = file_layer.is_some();

    // `Option<Layer>` is itself a layer, so a missing file sink is a no-op.
    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    let _ = STDOUT_GUARD.set(stdout_guard);

    if !file_logging {
        tracing::warn!(
            dir = %log_dir.display(),
            "Log directory unavailable; logging to stdout only"
        );
    }
}

fn init_development(env_filter: EnvFilter) {
    let stdout_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .init();
}

fn ensure_dir(dir: &Path) -> std::io::Result<()> {
    if dir.is_dir() {
        return Ok(());
    }
    std::fs::create_dir_all(dir)
}

/// Log directory for the current platform.
fn log_directory() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/log/beacon-scan")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "beacon-scan")
            .map(|dirs| dirs.data_dir().join("logs"))
            .unwrap_or_else(|| PathBuf::from("./logs"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_directory_is_valid_path() {
        let dir = log_directory();
        assert!(dir.ends_with("beacon-scan") || dir.ends_with("logs"));
    }

    #[test]
    fn test_rust_log_takes_precedence() {
        let filter = build_filter(Some("beacon_core=trace"), Some("warn")).unwrap();
        assert!(filter.to_string().contains("beacon_core=trace"));
    }

    #[test]
    fn test_unparsable_rust_log_falls_back_to_level() {
        let filter = build_filter(Some("beacon_core=notalevel"), Some("debug")).unwrap();
        assert_eq!(filter.to_string(), "debug");
    }

    #[test]
    fn test_default_level_is_info() {
        let filter = build_filter(None, None).unwrap();
        assert_eq!(filter.to_string(), "info");
    }

    #[test]
    fn test_invalid_level_is_an_error() {
        assert!(build_filter(None, Some("beacon_core=notalevel")).is_err());
    }

    #[test]
    fn test_ensure_dir_creates_nested_directory() {
        let temp = tempfile::tempdir().unwrap();
        let nested = temp.path().join("logs").join("beacon");

        ensure_dir(&nested).unwrap();
        assert!(nested.is_dir());
        // Existing directory is fine too.
        ensure_dir(&nested).unwrap();
    }

    #[test]
    fn test_ensure_dir_fails_under_a_file() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();

        assert!(ensure_dir(&file.join("logs")).is_err());
    }
}
