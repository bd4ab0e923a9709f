//! Simulated duty-cycled scanner.
//!
//! [`SimulatedScanner`] is the host's [`ScanController`]: start/stop and period
//! changes update a `watch` channel, and [`run_cycles`] follows it. While
//! running, each cycle reports the configured beacons, keeps the scan window
//! open for the scan period (delivering mid-cycle range updates if enabled),
//! runs end-of-cycle processing, then idles for the between-scan period.
//!
//! Period changes take effect from the next cycle. Stopping interrupts the
//! current wait immediately and the partial cycle is not delivered.

use std::sync::{Arc, Weak};
use std::time::Duration;

use beacon_core::controller::ScanController;
use beacon_core::envelope::{RangeUpdatePeriods, ScanPeriods};
use beacon_core::region::Beacon;
use beacon_core::service::ScanService;
use chrono::Utc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::mailbox::Mailboxes;

/// Shortest cycle the simulator will run, so a zero scan period cannot spin.
const MIN_SCAN_PERIOD_MILLIS: i64 = 10;

/// What the scanner has been told to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScannerSettings {
    /// Whether cycling is on.
    pub running: bool,
    /// Scan window and idle time.
    pub periods: ScanPeriods,
    /// Mid-cycle ranging cadence, if any.
    pub range_updates: Option<RangeUpdatePeriods>,
}

/// A scanner that fakes radio cycles on a timer.
#[derive(Debug)]
pub struct SimulatedScanner {
    settings: watch::Sender<ScannerSettings>,
}

impl SimulatedScanner {
    /// Create a stopped scanner using `periods`.
    #[must_use]
    pub fn new(periods: ScanPeriods) -> Self {
        let (settings, _) = watch::channel(ScannerSettings {
            running: false,
            periods,
            range_updates: None,
        });
        Self { settings }
    }

    /// The current settings.
    #[must_use]
    pub fn settings(&self) -> ScannerSettings {
        *self.settings.borrow()
    }

    /// A receiver that observes every settings change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ScannerSettings> {
        self.settings.subscribe()
    }
}

impl ScanController for SimulatedScanner {
    fn start(&self) {
        info!("Simulated scanner starting");
        self.settings.send_modify(|s| s.running = true);
    }

    fn stop(&self) {
        info!("Simulated scanner stopping");
        self.settings.send_modify(|s| s.running = false);
    }

    fn set_scan_periods(&self, periods: ScanPeriods) {
        self.settings.send_if_modified(|s| {
            let changed = s.periods != periods;
            s.periods = periods;
            changed
        });
    }

    fn set_range_update_periods(&self, periods: RangeUpdatePeriods) {
        self.settings.send_modify(|s| s.range_updates = Some(periods));
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Wait {
    Elapsed,
    Stopped,
    Closed,
}

/// Wait `duration`, returning early if the scanner is stopped or dropped.
async fn wait(rx: &mut watch::Receiver<ScannerSettings>, duration: Duration) -> Wait {
    let deadline = Instant::now() + duration;
    loop {
        tokio::select! {
            () = tokio::time::sleep_until(deadline) => return Wait::Elapsed,
            changed = rx.changed() => {
                if changed.is_err() {
                    return Wait::Closed;
                }
                if !rx.borrow_and_update().running {
                    return Wait::Stopped;
                }
            }
        }
    }
}

fn millis(value: i64) -> Duration {
    Duration::from_millis(u64::try_from(value).unwrap_or(0))
}

fn sweep_mailboxes(service: &Weak<ScanService>, delivery: &Mailboxes) {
    if let Some(service) = service.upgrade() {
        delivery.retain_targets(&service.callback_targets());
    }
}

/// Drive scan cycles until the scanner or the service is dropped.
pub async fn run_cycles(
    service: Weak<ScanService>,
    delivery: Arc<Mailboxes>,
    beacons: Vec<Beacon>,
    mut rx: watch::Receiver<ScannerSettings>,
) {
    info!(beacons = beacons.len(), "Simulated scan loop started");
    'cycles: loop {
        if !rx.borrow().running {
            sweep_mailboxes(&service, &delivery);
        }
        while !rx.borrow_and_update().running {
            if rx.changed().await.is_err() {
                break 'cycles;
            }
        }

        let settings = *rx.borrow();
        let scan_period = millis(settings.periods.scan_period_millis.max(MIN_SCAN_PERIOD_MILLIS));
        debug!(?settings, "Scan cycle starting");

        {
            let Some(service) = service.upgrade() else {
                break;
            };
            let now = Utc::now();
            for beacon in &beacons {
                service.process_beacon(beacon, now, delivery.as_ref());
            }
        }

        let mut remaining = scan_period;
        if let Some(updates) = settings.range_updates {
            let step = millis(updates.update_period_millis);
            while !step.is_zero() && step < remaining {
                match wait(&mut rx, step).await {
                    Wait::Elapsed => {}
                    Wait::Stopped => continue 'cycles,
                    Wait::Closed => break 'cycles,
                }
                let Some(service) = service.upgrade() else {
                    break 'cycles;
                };
                service.process_range_data(delivery.as_ref());
                remaining -= step;
            }
        }
        match wait(&mut rx, remaining).await {
            Wait::Elapsed => {}
            Wait::Stopped => continue,
            Wait::Closed => break,
        }

        {
            let Some(service) = service.upgrade() else {
                break;
            };
            service.end_scan_cycle(Utc::now(), delivery.as_ref());
        }
        sweep_mailboxes(&service, &delivery);

        let between = millis(settings.periods.between_scan_period_millis);
        if !between.is_zero() {
            match wait(&mut rx, between).await {
                Wait::Elapsed | Wait::Stopped => {}
                Wait::Closed => break,
            }
        }
    }
    info!("Simulated scan loop stopped");
}
