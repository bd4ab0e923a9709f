//! The scan service: both subscription tables plus the scanner they share.
//!
//! Every subscription change runs to completion under one control lock:
//! mutate the table, recount demand, and make at most one start/stop decision.
//! The scanner runs iff `ranged + monitored > 0`.
//!
//! Scan-cycle processing (`process_beacon`, `end_scan_cycle`) only takes the
//! table locks, so it can run concurrently with dispatch and still see
//! consistent snapshots.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::callback::{CallbackTarget, DeliveryError, ResultDelivery};
use crate::controller::ScanController;
use crate::envelope::{RangeUpdatePeriods, ScanPeriods, ScanSettings, SettingsData};
use crate::monitoring::MonitoringStatus;
use crate::ranging::RangedRegions;
use crate::region::{Beacon, Region};

/// What happened during one end-of-cycle pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Ranging batches handed to their targets.
    pub ranging_delivered: usize,
    /// Exit transitions handed to their targets.
    pub exits_delivered: usize,
    /// Deliveries that failed without dropping the subscription.
    pub failed_deliveries: usize,
    /// Subscriptions dropped because their target was gone.
    pub dropped_subscriptions: usize,
}

/// Subscriptions whose target reported gone, keyed by the target that failed.
#[derive(Debug, Default)]
struct DeadSubscriptions {
    ranged: HashSet<(Region, CallbackTarget)>,
    monitored: HashSet<(Region, CallbackTarget)>,
}

impl DeadSubscriptions {
    fn is_empty(&self) -> bool {
        self.ranged.is_empty() && self.monitored.is_empty()
    }
}

/// Coordinates ranging and monitoring subscriptions against one scanner.
pub struct ScanService {
    ranged: RangedRegions,
    monitoring: MonitoringStatus,
    controller: Arc<dyn ScanController>,
    scanning: Mutex<bool>,
}

impl std::fmt::Debug for ScanService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanService")
            .field("ranged", &self.ranged.len())
            .field("monitored", &self.monitoring.regions_count())
            .field("scanning", &*self.scanning.lock())
            .finish_non_exhaustive()
    }
}

impl ScanService {
    /// Create a service around `controller` and a (possibly restored) tracker.
    ///
    /// Restored monitored regions count as demand, so the scanner is started
    /// right away if any exist.
    pub fn new(controller: Arc<dyn ScanController>, monitoring: MonitoringStatus) -> Self {
        let service = Self {
            ranged: RangedRegions::new(),
            monitoring,
            controller,
            scanning: Mutex::new(false),
        };
        {
            let mut scanning = service.scanning.lock();
            service.reconcile(&mut scanning);
        }
        service
    }

    /// Start ranging `region`, replacing any earlier subscription for it.
    pub fn start_ranging(&self, region: Region, callback: CallbackTarget) {
        let mut scanning = self.scanning.lock();
        info!(region = %region, callback = %callback, "Start ranging");
        self.ranged.start(region, callback);
        self.reconcile(&mut scanning);
    }

    /// Stop ranging `region`. A no-op if it was not ranged.
    pub fn stop_ranging(&self, region: &Region) {
        let mut scanning = self.scanning.lock();
        info!(region = %region, "Stop ranging");
        self.ranged.stop(region);
        self.reconcile(&mut scanning);
    }

    /// Start monitoring `region`, keeping its membership if already monitored.
    pub fn start_monitoring(&self, region: Region, callback: CallbackTarget) {
        let mut scanning = self.scanning.lock();
        info!(region = %region, callback = %callback, "Start monitoring");
        self.monitoring.add_region(region, callback);
        self.reconcile(&mut scanning);
    }

    /// Stop monitoring `region`. A no-op if it was not monitored.
    pub fn stop_monitoring(&self, region: &Region) {
        let mut scanning = self.scanning.lock();
        info!(region = %region, "Stop monitoring");
        self.monitoring.remove_region(region);
        self.reconcile(&mut scanning);
    }

    /// Forward scan periods to the controller.
    pub fn set_scan_periods(&self, periods: ScanPeriods) {
        debug!(
            scan_ms = periods.scan_period_millis,
            between_ms = periods.between_scan_period_millis,
            background = periods.background,
            "Setting scan periods"
        );
        self.controller.set_scan_periods(periods);
    }

    /// Forward mid-cycle range update periods to the controller.
    pub fn set_range_update_periods(&self, periods: RangeUpdatePeriods) {
        debug!(
            update_ms = periods.update_period_millis,
            between_ms = periods.between_update_period_millis,
            "Setting range update periods"
        );
        self.controller.set_range_update_periods(periods);
    }

    /// Apply the settings a client sent alongside a command.
    pub fn apply_scan_settings(&self, settings: &ScanSettings) {
        self.set_scan_periods(settings.periods);
        if let Some(updates) = settings.range_updates {
            self.set_range_update_periods(updates);
        }
    }

    /// Apply an out-of-band settings sync. Subscriptions are not touched.
    pub fn apply_settings(&self, settings: &SettingsData) {
        if let Some(scan) = &settings.scan {
            self.apply_scan_settings(scan);
        }
        if let Some(millis) = settings.region_exit_period_millis {
            self.monitoring.set_exit_period_millis(millis);
        }
        if let Some(enabled) = settings.region_state_persistence {
            self.monitoring.set_persistence_enabled(enabled);
        }
    }

    /// Ranged plus monitored region count.
    #[must_use]
    pub fn active_demand(&self) -> usize {
        self.ranged.len() + self.monitoring.regions_count()
    }

    /// Whether the scanner was last told to run.
    #[must_use]
    pub fn is_scanning(&self) -> bool {
        *self.scanning.lock()
    }

    /// Every target holding at least one ranging or monitoring subscription.
    #[must_use]
    pub fn callback_targets(&self) -> HashSet<CallbackTarget> {
        self.ranged
            .callbacks()
            .into_iter()
            .chain(self.monitoring.callbacks())
            .collect()
    }

    /// The ranged region table.
    #[must_use]
    pub const fn ranged_regions(&self) -> &RangedRegions {
        &self.ranged
    }

    /// The monitored region tracker.
    #[must_use]
    pub const fn monitoring_status(&self) -> &MonitoringStatus {
        &self.monitoring
    }

    /// Feed one beacon observation from the scanner.
    ///
    /// The beacon is added to every matching ranged region, and enter
    /// transitions for matching monitored regions are delivered immediately.
    pub fn process_beacon(&self, beacon: &Beacon, now: DateTime<Utc>, delivery: &dyn ResultDelivery) {
        let matched = self.ranged.record_beacon(beacon);
        debug!(matched, address = %beacon.bluetooth_address, "Beacon detected");

        let mut dead = DeadSubscriptions::default();
        for (target, data) in self.monitoring.update_newly_inside(beacon, now) {
            let region = data.region.clone();
            if let Err(e) = delivery.deliver_monitoring(&target, data) {
                if note_failure(&e) {
                    dead.monitored.insert((region, target));
                }
            }
        }
        self.drop_dead(dead);
    }

    /// Deliver ranging results mid-cycle and reset the accumulators.
    pub fn process_range_data(&self, delivery: &dyn ResultDelivery) -> CycleReport {
        let mut report = CycleReport::default();
        let mut dead = DeadSubscriptions::default();
        self.deliver_ranging(delivery, &mut report, &mut dead);
        report.dropped_subscriptions = self.drop_dead(dead);
        report
    }

    /// End-of-cycle processing: deliver exits, then ranging results.
    ///
    /// Subscriptions whose target is gone are dropped through the normal stop
    /// path, so demand is recomputed and the scanner may stop.
    pub fn end_scan_cycle(&self, now: DateTime<Utc>, delivery: &dyn ResultDelivery) -> CycleReport {
        let mut report = CycleReport::default();
        let mut dead = DeadSubscriptions::default();

        for (target, data) in self.monitoring.update_newly_outside(now) {
            let region = data.region.clone();
            match delivery.deliver_monitoring(&target, data) {
                Ok(()) => report.exits_delivered += 1,
                Err(e) => {
                    if note_failure(&e) {
                        dead.monitored.insert((region, target));
                    } else {
                        report.failed_deliveries += 1;
                    }
                }
            }
        }

        self.deliver_ranging(delivery, &mut report, &mut dead);

        report.dropped_subscriptions = self.drop_dead(dead);
        debug!(?report, "Scan cycle complete");
        report
    }

    /// Stop the scanner and stop preserving monitoring state.
    pub fn shutdown(&self) {
        let mut scanning = self.scanning.lock();
        info!("Shutting down scan service, stopping scanner");
        self.controller.stop();
        *scanning = false;
        self.monitoring.stop_status_preservation();
    }

    fn deliver_ranging(
        &self,
        delivery: &dyn ResultDelivery,
        report: &mut CycleReport,
        dead: &mut DeadSubscriptions,
    ) {
        for (target, data) in self.ranged.drain_cycle() {
            let region = data.region.clone();
            match delivery.deliver_ranging(&target, data) {
                Ok(()) => report.ranging_delivered += 1,
                Err(e) => {
                    if note_failure(&e) {
                        dead.ranged.insert((region, target));
                    } else {
                        report.failed_deliveries += 1;
                    }
                }
            }
        }
    }

    /// Stop each dead subscription as if its own client had asked.
    ///
    /// An entry re-subscribed by another target since delivery is left alone.
    /// Returns how many subscriptions were actually removed.
    fn drop_dead(&self, dead: DeadSubscriptions) -> usize {
        if dead.is_empty() {
            return 0;
        }
        let mut scanning = self.scanning.lock();
        let mut dropped = 0;
        for (region, target) in &dead.ranged {
            if self.ranged.stop_if_callback(region, target) {
                info!(region = %region, callback = %target, "Stopped ranging for gone target");
                dropped += 1;
            }
        }
        for (region, target) in &dead.monitored {
            if self.monitoring.remove_if_callback(region, target) {
                info!(region = %region, callback = %target, "Stopped monitoring for gone target");
                dropped += 1;
            }
        }
        self.reconcile(&mut scanning);
        dropped
    }

    /// Recount demand and start or stop the scanner on a change.
    ///
    /// Must be called with the control lock held.
    fn reconcile(&self, scanning: &mut bool) {
        let ranged = self.ranged.len();
        let monitored = self.monitoring.regions_count();
        let wanted = ranged + monitored > 0;
        if wanted == *scanning {
            return;
        }
        if wanted {
            info!(ranged, monitored, "Demand present, starting scanner");
            self.controller.start();
        } else {
            info!("No remaining demand, stopping scanner");
            self.controller.stop();
        }
        *scanning = wanted;
    }
}

/// Log a failed delivery. Returns `true` if the subscription should be dropped.
fn note_failure(err: &DeliveryError) -> bool {
    match err {
        DeliveryError::TargetGone(target) => {
            warn!(callback = %target, "Callback target is gone, dropping its subscription");
            true
        }
        DeliveryError::Failed { .. } => {
            warn!(error = %err, "Result delivery failed");
            false
        }
    }
}
