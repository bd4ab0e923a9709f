//! Callback targets and result delivery.
//!
//! A [`CallbackTarget`] is an opaque handle naming where a client wants its
//! results delivered. The core never talks to a client directly: scan-cycle
//! processing hands [`RangingData`] and [`MonitoringData`] to a
//! [`ResultDelivery`] implementation supplied by the host.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::monitoring::RegionState;
use crate::region::{Beacon, Region};

/// Opaque reference to the receiver of a client's results.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallbackTarget(String);

impl CallbackTarget {
    /// Wrap a target name (for example an application package name).
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The target name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallbackTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Beacons collected for one ranged region during a scan cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangingData {
    /// The ranged region.
    pub region: Region,
    /// Beacons seen in the region since the previous delivery.
    pub beacons: Vec<Beacon>,
}

/// A membership transition for one monitored region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoringData {
    /// The monitored region.
    pub region: Region,
    /// The new membership state.
    pub state: RegionState,
}

/// Failure to hand a result to a callback target.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The target's process has exited; its subscriptions should be dropped.
    #[error("callback target '{0}' is no longer reachable")]
    TargetGone(CallbackTarget),

    /// Delivery failed for some other reason; the subscription is kept.
    #[error("delivery to '{target}' failed: {message}")]
    Failed {
        /// The target that could not be reached.
        target: CallbackTarget,
        /// What went wrong.
        message: String,
    },
}

/// Receives results produced at scan-cycle boundaries.
pub trait ResultDelivery: Send + Sync {
    /// Deliver the beacons ranged for a region.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::TargetGone`] if the target no longer exists.
    fn deliver_ranging(
        &self,
        target: &CallbackTarget,
        data: RangingData,
    ) -> Result<(), DeliveryError>;

    /// Deliver an enter/exit transition for a monitored region.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::TargetGone`] if the target no longer exists.
    fn deliver_monitoring(
        &self,
        target: &CallbackTarget,
        data: MonitoringData,
    ) -> Result<(), DeliveryError>;
}

/// Records every delivery; targets listed as gone fail with `TargetGone`.
#[cfg(any(test, feature = "mock-scanner"))]
#[derive(Debug, Default)]
pub struct RecordingDelivery {
    inner: parking_lot::Mutex<RecordedDeliveries>,
}

#[cfg(any(test, feature = "mock-scanner"))]
#[derive(Debug, Default)]
struct RecordedDeliveries {
    ranging: Vec<(CallbackTarget, RangingData)>,
    monitoring: Vec<(CallbackTarget, MonitoringData)>,
    gone: std::collections::HashSet<CallbackTarget>,
}

#[cfg(any(test, feature = "mock-scanner"))]
impl RecordingDelivery {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later delivery to `target` fail with `TargetGone`.
    pub fn mark_gone(&self, target: &CallbackTarget) {
        self.inner.lock().gone.insert(target.clone());
    }

    /// Ranging deliveries recorded so far.
    #[must_use]
    pub fn ranging(&self) -> Vec<(CallbackTarget, RangingData)> {
        self.inner.lock().ranging.clone()
    }

    /// Monitoring transitions recorded so far.
    #[must_use]
    pub fn monitoring(&self) -> Vec<(CallbackTarget, MonitoringData)> {
        self.inner.lock().monitoring.clone()
    }
}

#[cfg(any(test, feature = "mock-scanner"))]
impl ResultDelivery for RecordingDelivery {
    fn deliver_ranging(
        &self,
        target: &CallbackTarget,
        data: RangingData,
    ) -> Result<(), DeliveryError> {
        let mut inner = self.inner.lock();
        if inner.gone.contains(target) {
            return Err(DeliveryError::TargetGone(target.clone()));
        }
        inner.ranging.push((target.clone(), data));
        Ok(())
    }

    fn deliver_monitoring(
        &self,
        target: &CallbackTarget,
        data: MonitoringData,
    ) -> Result<(), DeliveryError> {
        let mut inner = self.inner.lock();
        if inner.gone.contains(target) {
            return Err(DeliveryError::TargetGone(target.clone()));
        }
        inner.monitoring.push((target.clone(), data));
        Ok(())
    }
}
