//! Ranged region table.
//!
//! Tracks which regions are being ranged and accumulates the beacons seen in
//! each one between deliveries. The whole table sits behind one lock so the
//! end-of-cycle delivery always iterates a consistent snapshot while start and
//! stop calls arrive from the dispatch thread.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::callback::{CallbackTarget, RangingData};
use crate::region::{Beacon, Region};

/// Per-region accumulator for one ranging subscription.
#[derive(Debug, Clone)]
pub struct RangeState {
    callback: CallbackTarget,
    beacons: Vec<Beacon>,
}

impl RangeState {
    /// Create an empty accumulator delivering to `callback`.
    #[must_use]
    pub const fn new(callback: CallbackTarget) -> Self {
        Self {
            callback,
            beacons: Vec::new(),
        }
    }

    /// Where results for this region are delivered.
    #[must_use]
    pub const fn callback(&self) -> &CallbackTarget {
        &self.callback
    }

    /// Record an observation, replacing an earlier one of the same beacon.
    pub fn add_beacon(&mut self, beacon: Beacon) {
        match self.beacons.iter_mut().find(|b| b.same_beacon_as(&beacon)) {
            Some(existing) => *existing = beacon,
            None => self.beacons.push(beacon),
        }
    }

    /// Number of distinct beacons collected since the last delivery.
    #[must_use]
    pub fn beacon_count(&self) -> usize {
        self.beacons.len()
    }

    /// Take the collected beacons and reset the accumulator.
    pub fn finalize_beacons(&mut self) -> Vec<Beacon> {
        std::mem::take(&mut self.beacons)
    }
}

/// The table of actively ranged regions.
#[derive(Debug, Default)]
pub struct RangedRegions {
    regions: Mutex<HashMap<Region, RangeState>>,
}

impl RangedRegions {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start ranging `region`.
    ///
    /// An existing entry for the same region is replaced: the newest callback
    /// wins and any beacons it had collected are discarded. Returns `true` if
    /// an entry was replaced.
    pub fn start(&self, region: Region, callback: CallbackTarget) -> bool {
        let mut regions = self.regions.lock();
        let replaced = regions.remove(&region).is_some();
        if replaced {
            info!(region = %region, "Already ranging region, replacing existing entry");
        }
        regions.insert(region, RangeState::new(callback));
        debug!(count = regions.len(), "Currently ranging regions");
        replaced
    }

    /// Stop ranging `region`. Returns `false` if it was not being ranged.
    pub fn stop(&self, region: &Region) -> bool {
        let mut regions = self.regions.lock();
        let removed = regions.remove(region).is_some();
        debug!(count = regions.len(), removed, "Currently ranging regions");
        removed
    }

    /// Stop ranging `region` only if it still delivers to `callback`.
    ///
    /// Returns `false` if the region is gone or now belongs to another target.
    pub fn stop_if_callback(&self, region: &Region, callback: &CallbackTarget) -> bool {
        let mut regions = self.regions.lock();
        if regions.get(region).map(RangeState::callback) != Some(callback) {
            return false;
        }
        regions.remove(region);
        debug!(count = regions.len(), "Currently ranging regions");
        true
    }

    /// Number of ranged regions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.regions.lock().len()
    }

    /// Returns `true` if nothing is being ranged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regions.lock().is_empty()
    }

    /// Returns `true` if `region` is being ranged.
    #[must_use]
    pub fn contains(&self, region: &Region) -> bool {
        self.regions.lock().contains_key(region)
    }

    /// The callback registered for `region`.
    #[must_use]
    pub fn callback_for(&self, region: &Region) -> Option<CallbackTarget> {
        self.regions.lock().get(region).map(|s| s.callback.clone())
    }

    /// Beacons collected for `region` since the last delivery.
    #[must_use]
    pub fn pending_beacons(&self, region: &Region) -> usize {
        self.regions.lock().get(region).map_or(0, RangeState::beacon_count)
    }

    /// All ranged regions.
    #[must_use]
    pub fn regions(&self) -> Vec<Region> {
        self.regions.lock().keys().cloned().collect()
    }

    /// Every target currently receiving ranging results.
    #[must_use]
    pub fn callbacks(&self) -> Vec<CallbackTarget> {
        self.regions.lock().values().map(|s| s.callback.clone()).collect()
    }

    /// Add `beacon` to every ranged region it matches. Returns the match count.
    pub fn record_beacon(&self, beacon: &Beacon) -> usize {
        let mut regions = self.regions.lock();
        let mut matched = 0;
        for (region, state) in regions.iter_mut() {
            if region.matches_beacon(beacon) {
                state.add_beacon(beacon.clone());
                matched += 1;
            }
        }
        matched
    }

    /// Drain every region's accumulator into a delivery batch.
    ///
    /// Every ranged region is included, even with no beacons, so clients learn
    /// that nothing was seen this cycle.
    pub fn drain_cycle(&self) -> Vec<(CallbackTarget, RangingData)> {
        let mut regions = self.regions.lock();
        regions
            .iter_mut()
            .map(|(region, state)| {
                (
                    state.callback.clone(),
                    RangingData {
                        region: region.clone(),
                        beacons: state.finalize_beacons(),
                    },
                )
            })
            .collect()
    }
}
