//! Monitored region tracker.
//!
//! Keeps an inside/outside membership state per monitored region and turns
//! beacon sightings into enter/exit transitions. Re-subscribing to a region
//! swaps its callback but keeps its membership, so a client reconnecting does
//! not trigger a spurious enter or exit.
//!
//! When persistence is on, every change is snapshotted through a
//! [`StatusPersister`] so the state survives the process being killed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::callback::{CallbackTarget, MonitoringData};
use crate::region::{Beacon, Region};
use crate::storage::{PersistedRegion, StatusPersister, StatusSnapshot, StatusStore};

/// Default time a region may go unseen before it is considered exited.
pub const DEFAULT_REGION_EXIT_PERIOD_MILLIS: i64 = 10_000;

/// Membership of the device in a monitored region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionState {
    /// A matching beacon was seen within the exit period.
    Inside,
    /// No matching beacon was seen within the exit period.
    Outside,
    /// Nothing known yet.
    #[default]
    Unknown,
}

impl RegionState {
    /// Lowercase name used in logs and API responses.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inside => "inside",
            Self::Outside => "outside",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for RegionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Membership, callback and debounce timestamps for one monitored region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoringState {
    callback: CallbackTarget,
    state: RegionState,
    last_seen_at: Option<DateTime<Utc>>,
    last_transition_at: Option<DateTime<Utc>>,
}

impl MonitoringState {
    /// A fresh state in [`RegionState::Unknown`].
    #[must_use]
    pub const fn new(callback: CallbackTarget) -> Self {
        Self {
            callback,
            state: RegionState::Unknown,
            last_seen_at: None,
            last_transition_at: None,
        }
    }

    /// Where transitions for this region are delivered.
    #[must_use]
    pub const fn callback(&self) -> &CallbackTarget {
        &self.callback
    }

    /// Current membership.
    #[must_use]
    pub const fn state(&self) -> RegionState {
        self.state
    }

    /// When a matching beacon was last seen.
    #[must_use]
    pub const fn last_seen_at(&self) -> Option<DateTime<Utc>> {
        self.last_seen_at
    }

    /// When the membership last changed.
    #[must_use]
    pub const fn last_transition_at(&self) -> Option<DateTime<Utc>> {
        self.last_transition_at
    }

    /// Record a sighting. Returns `true` if this flips the region inside.
    pub fn mark_inside(&mut self, now: DateTime<Utc>) -> bool {
        self.last_seen_at = Some(now);
        if self.state == RegionState::Inside {
            return false;
        }
        self.state = RegionState::Inside;
        self.last_transition_at = Some(now);
        true
    }

    /// Returns `true` if the region is inside but unseen for `exit_period`.
    #[must_use]
    pub fn is_newly_outside(&self, now: DateTime<Utc>, exit_period: Duration) -> bool {
        self.state == RegionState::Inside
            && self
                .last_seen_at
                .map_or(true, |seen| now.signed_duration_since(seen) > exit_period)
    }

    /// Flip the region outside.
    pub fn mark_outside(&mut self, now: DateTime<Utc>) {
        self.state = RegionState::Outside;
        self.last_transition_at = Some(now);
    }
}

/// The table of monitored regions.
#[derive(Debug)]
pub struct MonitoringStatus {
    regions: Mutex<HashMap<Region, MonitoringState>>,
    exit_period_millis: AtomicI64,
    persistence_enabled: AtomicBool,
    persister: Option<StatusPersister>,
}

impl Default for MonitoringStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitoringStatus {
    /// An in-memory tracker with no persistence.
    #[must_use]
    pub fn new() -> Self {
        Self {
            regions: Mutex::new(HashMap::new()),
            exit_period_millis: AtomicI64::new(DEFAULT_REGION_EXIT_PERIOD_MILLIS),
            persistence_enabled: AtomicBool::new(false),
            persister: None,
        }
    }

    /// A tracker that persists through `persister`, seeded from `store`.
    ///
    /// A missing, unreadable or stale snapshot is treated as "no prior
    /// state"; it never fails construction.
    #[must_use]
    pub fn restore(store: &StatusStore, persister: StatusPersister, now: DateTime<Utc>) -> Self {
        let regions = match store.load() {
            Ok(Some(snapshot)) if snapshot.is_stale(now) => {
                info!(saved_at = %snapshot.saved_at, "Ignoring stale monitoring status snapshot");
                HashMap::new()
            }
            Ok(Some(snapshot)) => {
                info!(regions = snapshot.regions.len(), "Restored monitoring status");
                snapshot
                    .regions
                    .into_iter()
                    .map(|p| (p.region, p.state))
                    .collect()
            }
            Ok(None) => HashMap::new(),
            Err(e) => {
                warn!(error = %e, "Could not restore monitoring status, starting empty");
                HashMap::new()
            }
        };

        Self {
            regions: Mutex::new(regions),
            exit_period_millis: AtomicI64::new(DEFAULT_REGION_EXIT_PERIOD_MILLIS),
            persistence_enabled: AtomicBool::new(true),
            persister: Some(persister),
        }
    }

    /// Start monitoring `region`.
    ///
    /// If the region is already monitored only the callback is replaced; the
    /// membership state and timestamps are kept. Returns `true` if the region
    /// was newly added.
    pub fn add_region(&self, region: Region, callback: CallbackTarget) -> bool {
        let mut regions = self.regions.lock();
        let added = if let Some(existing) = regions.get_mut(&region) {
            info!(region = %region, state = %existing.state, "Already monitoring region, replacing callback");
            existing.callback = callback;
            false
        } else {
            regions.insert(region, MonitoringState::new(callback));
            true
        };
        debug!(count = regions.len(), "Currently monitoring regions");
        self.persist(&regions);
        added
    }

    /// Stop monitoring `region`. Returns `false` if it was not monitored.
    pub fn remove_region(&self, region: &Region) -> bool {
        let mut regions = self.regions.lock();
        let removed = regions.remove(region).is_some();
        debug!(count = regions.len(), removed, "Currently monitoring regions");
        if removed {
            self.persist(&regions);
        }
        removed
    }

    /// Stop monitoring `region` only if it still delivers to `callback`.
    ///
    /// Returns `false` if the region is gone or now belongs to another target.
    pub fn remove_if_callback(&self, region: &Region, callback: &CallbackTarget) -> bool {
        let mut regions = self.regions.lock();
        if regions.get(region).map(MonitoringState::callback) != Some(callback) {
            return false;
        }
        regions.remove(region);
        debug!(count = regions.len(), "Currently monitoring regions");
        self.persist(&regions);
        true
    }

    /// Number of monitored regions.
    #[must_use]
    pub fn regions_count(&self) -> usize {
        self.regions.lock().len()
    }

    /// All monitored regions.
    #[must_use]
    pub fn regions(&self) -> Vec<Region> {
        self.regions.lock().keys().cloned().collect()
    }

    /// Every target currently receiving transitions.
    #[must_use]
    pub fn callbacks(&self) -> Vec<CallbackTarget> {
        self.regions.lock().values().map(|s| s.callback.clone()).collect()
    }

    /// Membership of `region`, if monitored.
    #[must_use]
    pub fn state_of(&self, region: &Region) -> Option<RegionState> {
        self.regions.lock().get(region).map(MonitoringState::state)
    }

    /// The callback registered for `region`.
    #[must_use]
    pub fn callback_for(&self, region: &Region) -> Option<CallbackTarget> {
        self.regions.lock().get(region).map(|s| s.callback.clone())
    }

    /// Mark every region containing `beacon` as seen.
    ///
    /// Returns the enter transitions to deliver.
    pub fn update_newly_inside(
        &self,
        beacon: &Beacon,
        now: DateTime<Utc>,
    ) -> Vec<(CallbackTarget, MonitoringData)> {
        let mut regions = self.regions.lock();
        let mut transitions = Vec::new();
        for (region, state) in regions.iter_mut() {
            if region.matches_beacon(beacon) && state.mark_inside(now) {
                info!(region = %region, "Entered monitored region");
                transitions.push((
                    state.callback.clone(),
                    MonitoringData {
                        region: region.clone(),
                        state: RegionState::Inside,
                    },
                ));
            }
        }
        if !transitions.is_empty() {
            self.persist(&regions);
        }
        transitions
    }

    /// Flip regions unseen for the exit period to outside.
    ///
    /// Returns the exit transitions to deliver.
    pub fn update_newly_outside(&self, now: DateTime<Utc>) -> Vec<(CallbackTarget, MonitoringData)> {
        let exit_period = self.exit_period();
        let mut regions = self.regions.lock();
        let mut transitions = Vec::new();
        for (region, state) in regions.iter_mut() {
            if state.is_newly_outside(now, exit_period) {
                state.mark_outside(now);
                info!(region = %region, "Exited monitored region");
                transitions.push((
                    state.callback.clone(),
                    MonitoringData {
                        region: region.clone(),
                        state: RegionState::Outside,
                    },
                ));
            }
        }
        if !transitions.is_empty() {
            self.persist(&regions);
        }
        transitions
    }

    /// How long a region may go unseen before it is exited.
    #[must_use]
    pub fn exit_period(&self) -> Duration {
        Duration::milliseconds(self.exit_period_millis.load(Ordering::Relaxed))
    }

    /// Change the exit period. Non-positive values are ignored.
    pub fn set_exit_period_millis(&self, millis: i64) {
        if millis <= 0 {
            warn!(millis, "Ignoring non-positive region exit period");
            return;
        }
        self.exit_period_millis.store(millis, Ordering::Relaxed);
    }

    /// Whether changes are currently persisted.
    #[must_use]
    pub fn persistence_enabled(&self) -> bool {
        self.persister.is_some() && self.persistence_enabled.load(Ordering::Relaxed)
    }

    /// Turn persistence on or off.
    ///
    /// Turning it off deletes the snapshot; turning it on writes one. The flag
    /// flips under the table lock, so no save queued by a concurrent change
    /// can land after the delete.
    pub fn set_persistence_enabled(&self, enabled: bool) {
        if self.persister.is_none() {
            if enabled {
                warn!("Monitoring status persistence requested but no store is configured");
            }
            return;
        }
        let regions = self.regions.lock();
        let was = self.persistence_enabled.swap(enabled, Ordering::Relaxed);
        if was == enabled {
            return;
        }
        if enabled {
            info!("Monitoring status persistence enabled");
            self.persist(&regions);
        } else {
            self.clear_snapshot();
        }
    }

    /// Stop persisting and delete the snapshot.
    pub fn stop_status_preservation(&self) {
        let _regions = self.regions.lock();
        self.persistence_enabled.store(false, Ordering::Relaxed);
        self.clear_snapshot();
    }

    /// Queue deletion of the snapshot. Callers hold the table lock.
    fn clear_snapshot(&self) {
        if let Some(persister) = &self.persister {
            info!("Stopping monitoring status preservation");
            persister.clear();
        }
    }

    /// A copy of the table as it would be persisted.
    #[must_use]
    pub fn snapshot(&self, now: DateTime<Utc>) -> StatusSnapshot {
        snapshot_of(&self.regions.lock(), now)
    }

    /// The persister, for callers that need to wait on pending writes.
    #[must_use]
    pub const fn persister(&self) -> Option<&StatusPersister> {
        self.persister.as_ref()
    }

    fn persist(&self, regions: &HashMap<Region, MonitoringState>) {
        if !self.persistence_enabled.load(Ordering::Relaxed) {
            return;
        }
        if let Some(persister) = &self.persister {
            persister.save(snapshot_of(regions, Utc::now()));
        }
    }
}

fn snapshot_of(regions: &HashMap<Region, MonitoringState>, now: DateTime<Utc>) -> StatusSnapshot {
    StatusSnapshot {
        saved_at: now,
        regions: regions
            .iter()
            .map(|(region, state)| PersistedRegion {
                region: region.clone(),
                state: state.clone(),
            })
            .collect(),
    }
}
