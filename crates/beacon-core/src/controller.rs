//! Duty-cycle controller contract.
//!
//! The controller owns the physical scan resource. The core only ever asks it
//! to start, stop, or retime; it never touches the radio itself.
//!
//! Implementations must treat `start` and `stop` as idempotent and accept
//! period changes at any time, applying them from the next scan cycle on.

use crate::envelope::{RangeUpdatePeriods, ScanPeriods};

/// The shared, duty-cycled scanning resource.
pub trait ScanController: Send + Sync {
    /// Begin cycling the scanner. A no-op when already running.
    fn start(&self);

    /// Stop cycling the scanner. A no-op when already stopped.
    fn stop(&self);

    /// Set the scan window and idle time for subsequent cycles.
    fn set_scan_periods(&self, periods: ScanPeriods);

    /// Set the mid-cycle ranging delivery cadence.
    fn set_range_update_periods(&self, periods: RangeUpdatePeriods);
}

#[cfg(any(test, feature = "mock-scanner"))]
pub use mock::{MockScanController, ScannerCall};

#[cfg(any(test, feature = "mock-scanner"))]
mod mock {
    use parking_lot::Mutex;

    use super::ScanController;
    use crate::envelope::{RangeUpdatePeriods, ScanPeriods};

    /// One recorded call on a [`MockScanController`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ScannerCall {
        /// `start()` was called.
        Start,
        /// `stop()` was called.
        Stop,
        /// `set_scan_periods()` was called.
        ScanPeriods(ScanPeriods),
        /// `set_range_update_periods()` was called.
        RangeUpdatePeriods(RangeUpdatePeriods),
    }

    /// In-memory controller that records every call.
    #[derive(Debug, Default)]
    pub struct MockScanController {
        inner: Mutex<MockState>,
    }

    #[derive(Debug, Default)]
    struct MockState {
        running: bool,
        calls: Vec<ScannerCall>,
        scan_periods: Option<ScanPeriods>,
        range_update_periods: Option<RangeUpdatePeriods>,
    }

    impl MockScanController {
        /// Create a stopped controller.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Whether the scanner is currently running.
        #[must_use]
        pub fn is_running(&self) -> bool {
            self.inner.lock().running
        }

        /// Every call received, in order.
        #[must_use]
        pub fn calls(&self) -> Vec<ScannerCall> {
            self.inner.lock().calls.clone()
        }

        /// Number of `start()` calls.
        #[must_use]
        pub fn start_count(&self) -> usize {
            self.count(|c| matches!(c, ScannerCall::Start))
        }

        /// Number of `stop()` calls.
        #[must_use]
        pub fn stop_count(&self) -> usize {
            self.count(|c| matches!(c, ScannerCall::Stop))
        }

        /// The last scan periods applied.
        #[must_use]
        pub fn scan_periods(&self) -> Option<ScanPeriods> {
            self.inner.lock().scan_periods
        }

        /// The last range update periods applied.
        #[must_use]
        pub fn range_update_periods(&self) -> Option<RangeUpdatePeriods> {
            self.inner.lock().range_update_periods
        }

        /// Forget recorded calls, keeping the running state.
        pub fn clear_calls(&self) {
            self.inner.lock().calls.clear();
        }

        fn count(&self, pred: impl Fn(&ScannerCall) -> bool) -> usize {
            self.inner.lock().calls.iter().filter(|c| pred(c)).count()
        }
    }

    impl ScanController for MockScanController {
        fn start(&self) {
            let mut inner = self.inner.lock();
            inner.running = true;
            inner.calls.push(ScannerCall::Start);
        }

        fn stop(&self) {
            let mut inner = self.inner.lock();
            inner.running = false;
            inner.calls.push(ScannerCall::Stop);
        }

        fn set_scan_periods(&self, periods: ScanPeriods) {
            let mut inner = self.inner.lock();
            inner.scan_periods = Some(periods);
            inner.calls.push(ScannerCall::ScanPeriods(periods));
        }

        fn set_range_update_periods(&self, periods: RangeUpdatePeriods) {
            let mut inner = self.inner.lock();
            inner.range_update_periods = Some(periods);
            inner.calls.push(ScannerCall::RangeUpdatePeriods(periods));
        }
    }
}
