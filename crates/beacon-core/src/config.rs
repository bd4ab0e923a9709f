//! Service configuration.
//!
//! Configuration is layered: built-in defaults, then an optional TOML file,
//! then `BEACON__<SECTION>__<KEY>` environment variables. For example
//! `BEACON__DISPATCH__QUEUE_CAPACITY=64` overrides `[dispatch] queue_capacity`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::envelope::ScanPeriods;
use crate::monitoring::DEFAULT_REGION_EXIT_PERIOD_MILLIS;
use crate::region::Beacon;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "BEACON";

/// Errors raised while loading, saving or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly requested config file does not exist.
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// A source could not be read or deserialized.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// The configuration could not be rendered as TOML.
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The config file could not be written.
    #[error("failed to write {}: {source}", path.display())]
    Write {
        /// Target path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A single field holds an unusable value.
    #[error("invalid value for '{field}': {message}")]
    Validation {
        /// Dotted field name, e.g. `scan.foreground_scan_period_millis`.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// More than one field failed validation.
    #[error("{} configuration errors", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scanner timing.
    pub scan: ScanConfig,
    /// Monitoring behaviour and persistence.
    pub monitoring: MonitoringConfig,
    /// Inbound command queue.
    pub dispatch: DispatchConfig,
    /// HTTP surface.
    pub server: ServerConfig,
    /// Simulated scanner used when no radio is available.
    pub simulation: SimulationConfig,
}

/// Scanner timing defaults applied before any client sends periods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Scan window while in the foreground.
    pub foreground_scan_period_millis: i64,
    /// Idle time between foreground scans.
    pub foreground_between_scan_period_millis: i64,
    /// Scan window while in the background.
    pub background_scan_period_millis: i64,
    /// Idle time between background scans.
    pub background_between_scan_period_millis: i64,
    /// Start in background mode.
    pub background: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            foreground_scan_period_millis: 1100,
            foreground_between_scan_period_millis: 0,
            background_scan_period_millis: 10_000,
            background_between_scan_period_millis: 300_000,
            background: false,
        }
    }
}

impl ScanConfig {
    /// The periods to hand the scanner at startup.
    #[must_use]
    pub const fn initial_periods(&self) -> ScanPeriods {
        if self.background {
            ScanPeriods::new(
                self.background_scan_period_millis,
                self.background_between_scan_period_millis,
                true,
            )
        } else {
            ScanPeriods::new(
                self.foreground_scan_period_millis,
                self.foreground_between_scan_period_millis,
                false,
            )
        }
    }
}

/// Monitoring behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// How long a region may go unseen before it is exited.
    pub region_exit_period_millis: i64,
    /// Persist monitoring state across restarts.
    pub state_persistence: bool,
    /// Where to keep the snapshot. Defaults to the platform data directory.
    pub data_dir: Option<PathBuf>,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            region_exit_period_millis: DEFAULT_REGION_EXIT_PERIOD_MILLIS,
            state_persistence: true,
            data_dir: None,
        }
    }
}

/// Inbound command queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Messages that may wait before senders see `QueueFull`.
    pub queue_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
        }
    }
}

/// HTTP surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on.
    pub bind_address: String,
    /// Log JSON to files instead of pretty output to stdout.
    pub production_logging: bool,
    /// How long an undrained callback mailbox stays reachable, in seconds.
    pub callback_ttl_secs: u64,
    /// Results buffered per callback mailbox before the oldest is dropped.
    pub callback_queue_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:3000".to_string(),
            production_logging: false,
            callback_ttl_secs: 600,
            callback_queue_limit: 100,
        }
    }
}

impl ServerConfig {
    /// How long an undrained callback mailbox stays reachable.
    #[must_use]
    pub const fn callback_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.callback_ttl_secs)
    }
}

/// Simulated scanner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Drive scan cycles from the simulator.
    pub enabled: bool,
    /// Beacons reported on every simulated cycle.
    pub beacons: Vec<Beacon>,
}

impl Config {
    /// Load configuration from `path` (if it exists) and the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] if a source cannot be parsed, or a
    /// validation error if the result is unusable.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let config: Self = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, failing if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] for a missing file, otherwise as
    /// [`Config::load`].
    pub fn load_required(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        Self::load(path)
    }

    /// Load from the default location, or fall back to defaults.
    ///
    /// # Errors
    ///
    /// As [`Config::load`].
    pub fn load_or_default() -> ConfigResult<Self> {
        match default_path() {
            Some(path) => Self::load(&path),
            None => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Write the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check every field, collecting all problems.
    ///
    /// # Errors
    ///
    /// Returns the single error, or [`ConfigError::MultipleValidationErrors`].
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();

        let positive = [
            (
                "scan.foreground_scan_period_millis",
                self.scan.foreground_scan_period_millis,
            ),
            (
                "scan.background_scan_period_millis",
                self.scan.background_scan_period_millis,
            ),
            (
                "monitoring.region_exit_period_millis",
                self.monitoring.region_exit_period_millis,
            ),
        ];
        for (field, value) in positive {
            if value <= 0 {
                errors.push(invalid(field, format!("must be positive, got {value}")));
            }
        }

        let non_negative = [
            (
                "scan.foreground_between_scan_period_millis",
                self.scan.foreground_between_scan_period_millis,
            ),
            (
                "scan.background_between_scan_period_millis",
                self.scan.background_between_scan_period_millis,
            ),
        ];
        for (field, value) in non_negative {
            if value < 0 {
                errors.push(invalid(field, format!("cannot be negative, got {value}")));
            }
        }

        if self.dispatch.queue_capacity == 0 {
            errors.push(invalid("dispatch.queue_capacity", "must be at least 1".into()));
        }
        if self.server.callback_ttl_secs == 0 {
            errors.push(invalid("server.callback_ttl_secs", "must be at least 1".into()));
        }
        if self.server.callback_queue_limit == 0 {
            errors.push(invalid("server.callback_queue_limit", "must be at least 1".into()));
        }
        if self.server.bind_address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(invalid(
                "server.bind_address",
                format!("'{}' is not a socket address", self.server.bind_address),
            ));
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }
}

fn invalid(field: &str, message: String) -> ConfigError {
    ConfigError::Validation {
        field: field.to_string(),
        message,
    }
}

/// Default config file location.
///
/// On Linux: `/etc/beacon-scan/config.toml`
/// Elsewhere: the platform config directory, if one can be determined.
#[must_use]
pub fn default_path() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        Some(PathBuf::from("/etc/beacon-scan/config.toml"))
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "beacon-scan")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.scan.initial_periods(), ScanPeriods::new(1100, 0, false));
        assert_eq!(config.monitoring.region_exit_period_millis, 10_000);
        assert!(config.monitoring.state_persistence);
        assert_eq!(config.dispatch.queue_capacity, 256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_background_initial_periods() {
        let scan = ScanConfig {
            background: true,
            ..ScanConfig::default()
        };
        assert_eq!(scan.initial_periods(), ScanPeriods::new(10_000, 300_000, true));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.dispatch, DispatchConfig::default());
    }

    #[test]
    fn test_load_required_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load_required(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[dispatch]\nqueue_capacity = 8\n\n[monitoring]\nstate_persistence = false\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.dispatch.queue_capacity, 8);
        assert!(!config.monitoring.state_persistence);
        assert_eq!(config.scan, ScanConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.simulation.enabled = true;
        config.simulation.beacons.push(Beacon::new(
            vec!["uuid".into(), "1".into(), "2".into()],
            -60,
            -59,
            "AA:BB:CC:DD:EE:FF",
        ));

        config.save(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[test]
    fn test_validation_collects_every_error() {
        let mut config = Config::default();
        config.dispatch.queue_capacity = 0;
        config.scan.foreground_scan_period_millis = -1;

        let err = config.validate().unwrap_err();
        match err {
            ConfigError::MultipleValidationErrors(errors) => assert_eq!(errors.len(), 2),
            other => panic!("expected multiple errors, got {other:?}"),
        }
    }

    #[test]
    fn test_single_validation_error() {
        let mut config = Config::default();
        config.server.bind_address = "nowhere".into();

        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "server.bind_address"));
    }
}
