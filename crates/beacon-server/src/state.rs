//! Application state shared across handlers.

use std::sync::Arc;

use anyhow::Context;
use beacon_core::config::Config;
use beacon_core::dispatcher::{self, CommandSender, DispatchStats, Dispatcher};
use beacon_core::monitoring::MonitoringStatus;
use beacon_core::service::ScanService;
use beacon_core::storage::{StatusPersister, StatusStore};
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::info;

use crate::mailbox::Mailboxes;
use crate::simulator::{self, SimulatedScanner};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    service: Arc<ScanService>,
    scanner: Arc<SimulatedScanner>,
    commands: CommandSender,
    mailboxes: Arc<Mailboxes>,
    started_at: DateTime<Utc>,
}

/// Background tasks started alongside the state.
#[derive(Debug)]
pub struct BackgroundTasks {
    /// The command dispatcher.
    pub dispatcher: JoinHandle<DispatchStats>,
    /// The simulated scan loop, if simulation is enabled.
    pub scanner: Option<JoinHandle<()>>,
}

impl BackgroundTasks {
    /// Abort every task.
    pub fn abort(&self) {
        self.dispatcher.abort();
        if let Some(scanner) = &self.scanner {
            scanner.abort();
        }
    }
}

impl AppState {
    /// Build the scan service from `config` and start its background tasks.
    ///
    /// Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if monitoring persistence cannot be set up.
    pub fn start(config: Config) -> anyhow::Result<(Self, BackgroundTasks)> {
        let monitoring = if config.monitoring.state_persistence {
            let store = match &config.monitoring.data_dir {
                Some(dir) => StatusStore::new(dir),
                None => StatusStore::default_location()
                    .context("Failed to determine monitoring data directory")?,
            };
            info!(path = %store.path().display(), "Monitoring status persistence enabled");
            let persister = StatusPersister::spawn(store.clone())
                .context("Failed to start monitoring status writer")?;
            MonitoringStatus::restore(&store, persister, Utc::now())
        } else {
            MonitoringStatus::new()
        };
        monitoring.set_exit_period_millis(config.monitoring.region_exit_period_millis);

        let scanner = Arc::new(SimulatedScanner::new(config.scan.initial_periods()));
        let scanner_rx = scanner.subscribe();
        let service = Arc::new(ScanService::new(scanner.clone(), monitoring));
        let ttl = chrono::Duration::from_std(config.server.callback_ttl())
            .context("Callback TTL is out of range")?;
        let mailboxes = Arc::new(Mailboxes::new(ttl, config.server.callback_queue_limit));

        let (commands, rx) = dispatcher::channel(config.dispatch.queue_capacity);
        let dispatcher = tokio::spawn(Dispatcher::new(&service).run(rx));

        let scan_loop = config.simulation.enabled.then(|| {
            tokio::spawn(simulator::run_cycles(
                Arc::downgrade(&service),
                mailboxes.clone(),
                config.simulation.beacons.clone(),
                scanner_rx,
            ))
        });

        let state = Self {
            inner: Arc::new(AppStateInner {
                config,
                service,
                scanner,
                commands,
                mailboxes,
                started_at: Utc::now(),
            }),
        };
        let tasks = BackgroundTasks {
            dispatcher,
            scanner: scan_loop,
        };
        Ok((state, tasks))
    }

    /// The loaded configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The scan service.
    #[must_use]
    pub fn service(&self) -> &Arc<ScanService> {
        &self.inner.service
    }

    /// The scanner driven by the service.
    #[must_use]
    pub fn scanner(&self) -> &SimulatedScanner {
        &self.inner.scanner
    }

    /// Producer side of the inbound command queue.
    #[must_use]
    pub fn commands(&self) -> &CommandSender {
        &self.inner.commands
    }

    /// Buffered results per callback target.
    #[must_use]
    pub fn mailboxes(&self) -> &Mailboxes {
        &self.inner.mailboxes
    }

    /// When the server started.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    /// Stop the scanner, stop preserving monitoring state and wait for
    /// pending snapshot writes.
    pub async fn shutdown(&self) {
        let service = &self.inner.service;
        service.shutdown();
        if let Some(persister) = service.monitoring_status().persister() {
            persister.flush().await;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio_test::assert_ok;

    pub(crate) fn test_config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.monitoring.data_dir = Some(dir.to_path_buf());
        config
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let (state, tasks) = assert_ok!(AppState::start(test_config(dir.path())));

        assert!(!state.service().is_scanning());
        assert!(state.service().monitoring_status().persistence_enabled());
        assert_eq!(state.config().dispatch.queue_capacity, 256);
        assert!(tasks.scanner.is_none());

        state.shutdown().await;
        assert!(!state.service().monitoring_status().persistence_enabled());
        tasks.abort();
    }

    #[tokio::test]
    async fn test_restores_monitored_regions() {
        use beacon_core::callback::CallbackTarget;
        use beacon_core::region::Region;

        let dir = tempfile::tempdir().unwrap();
        {
            let (state, tasks) = AppState::start(test_config(dir.path())).unwrap();
            state.service().start_monitoring(
                Region::new("lobby", vec![]).unwrap(),
                CallbackTarget::new("com.example.app"),
            );
            state
                .service()
                .monitoring_status()
                .persister()
                .unwrap()
                .flush()
                .await;
            tasks.abort();
        }

        let (state, tasks) = assert_ok!(AppState::start(test_config(dir.path())));
        assert_eq!(state.service().monitoring_status().regions_count(), 1);
        assert!(state.service().is_scanning());
        assert!(state.scanner().settings().running);
        tasks.abort();
    }
}
