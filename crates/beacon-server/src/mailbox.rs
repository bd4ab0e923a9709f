//! Per-target mailboxes for scan results.
//!
//! Clients are not reachable from the server, so results are buffered here
//! until the client polls `GET /api/callbacks/{target}`. A mailbox that goes
//! unpolled for longer than the TTL is treated as a client that has exited:
//! the next delivery reports [`DeliveryError::TargetGone`] and the core drops
//! that target's subscriptions.

use std::collections::{HashMap, HashSet, VecDeque};

use beacon_core::callback::{
    CallbackTarget, DeliveryError, MonitoringData, RangingData, ResultDelivery,
};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// One buffered result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackEvent {
    /// Beacons ranged in a region.
    Ranging(RangingData),
    /// A monitored region was entered or exited.
    Monitoring(MonitoringData),
}

#[derive(Debug)]
struct Mailbox {
    events: VecDeque<(DateTime<Utc>, CallbackEvent)>,
    last_polled_at: DateTime<Utc>,
}

/// Buffers results for every callback target.
#[derive(Debug)]
pub struct Mailboxes {
    boxes: Mutex<HashMap<CallbackTarget, Mailbox>>,
    ttl: Duration,
    queue_limit: usize,
}

impl Mailboxes {
    /// Create mailboxes with the given TTL and per-target queue limit.
    #[must_use]
    pub fn new(ttl: Duration, queue_limit: usize) -> Self {
        Self {
            boxes: Mutex::new(HashMap::new()),
            ttl,
            queue_limit: queue_limit.max(1),
        }
    }

    /// Take every buffered event for `target`, oldest first.
    ///
    /// Polling also keeps the target alive for another TTL. A target nothing
    /// has been delivered to yet gets an empty list and no mailbox.
    pub fn drain(&self, target: &CallbackTarget) -> Vec<(DateTime<Utc>, CallbackEvent)> {
        self.drain_at(target, Utc::now())
    }

    /// Number of targets with a mailbox.
    #[must_use]
    pub fn target_count(&self) -> usize {
        self.boxes.lock().len()
    }

    /// Number of events waiting for `target`.
    #[must_use]
    pub fn pending(&self, target: &CallbackTarget) -> usize {
        self.boxes.lock().get(target).map_or(0, |b| b.events.len())
    }

    pub(crate) fn drain_at(
        &self,
        target: &CallbackTarget,
        now: DateTime<Utc>,
    ) -> Vec<(DateTime<Utc>, CallbackEvent)> {
        let mut boxes = self.boxes.lock();
        let Some(mailbox) = boxes.get_mut(target) else {
            return Vec::new();
        };
        mailbox.last_polled_at = now;
        mailbox.events.drain(..).collect()
    }

    /// Drop the mailboxes of targets that no longer hold any subscription.
    ///
    /// Returns the number of mailboxes removed.
    pub fn retain_targets(&self, live: &HashSet<CallbackTarget>) -> usize {
        let mut boxes = self.boxes.lock();
        let before = boxes.len();
        boxes.retain(|target, _| live.contains(target));
        let removed = before - boxes.len();
        if removed > 0 {
            debug!(removed, remaining = boxes.len(), "Dropped mailboxes of unsubscribed targets");
        }
        removed
    }

    pub(crate) fn deliver_at(
        &self,
        target: &CallbackTarget,
        event: CallbackEvent,
        now: DateTime<Utc>,
    ) -> Result<(), DeliveryError> {
        let mut boxes = self.boxes.lock();
        let mailbox = boxes.entry(target.clone()).or_insert_with(|| {
            debug!(callback = %target, "Opening callback mailbox");
            Mailbox {
                events: VecDeque::new(),
                last_polled_at: now,
            }
        });

        if now.signed_duration_since(mailbox.last_polled_at) > self.ttl {
            info!(callback = %target, "Callback mailbox expired");
            boxes.remove(target);
            return Err(DeliveryError::TargetGone(target.clone()));
        }

        if mailbox.events.len() >= self.queue_limit {
            warn!(callback = %target, limit = self.queue_limit, "Callback mailbox full, dropping oldest event");
            mailbox.events.pop_front();
        }
        mailbox.events.push_back((now, event));
        Ok(())
    }
}

impl ResultDelivery for Mailboxes {
    fn deliver_ranging(
        &self,
        target: &CallbackTarget,
        data: RangingData,
    ) -> Result<(), DeliveryError> {
        self.deliver_at(target, CallbackEvent::Ranging(data), Utc::now())
    }

    fn deliver_monitoring(
        &self,
        target: &CallbackTarget,
        data: MonitoringData,
    ) -> Result<(), DeliveryError> {
        self.deliver_at(target, CallbackEvent::Monitoring(data), Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::monitoring::RegionState;
    use beacon_core::region::Region;

    fn ranging() -> CallbackEvent {
        CallbackEvent::Ranging(RangingData {
            region: Region::new("lobby", vec![]).unwrap(),
            beacons: vec![],
        })
    }

    fn entered() -> CallbackEvent {
        CallbackEvent::Monitoring(MonitoringData {
            region: Region::new("lobby", vec![]).unwrap(),
            state: RegionState::Inside,
        })
    }

    #[test]
    fn test_drain_returns_events_in_order() {
        let mailboxes = Mailboxes::new(Duration::minutes(10), 10);
        let target = CallbackTarget::new("com.example.app");
        let now = Utc::now();

        mailboxes.deliver_at(&target, ranging(), now).unwrap();
        mailboxes.deliver_at(&target, entered(), now + Duration::seconds(1)).unwrap();
        assert_eq!(mailboxes.pending(&target), 2);

        let events = mailboxes.drain_at(&target, now + Duration::seconds(2));
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].1, ranging());
        assert_eq!(events[1].1, entered());
        assert_eq!(mailboxes.pending(&target), 0);
    }

    #[test]
    fn test_queue_limit_drops_oldest() {
        let mailboxes = Mailboxes::new(Duration::minutes(10), 2);
        let target = CallbackTarget::new("com.example.app");
        let now = Utc::now();

        mailboxes.deliver_at(&target, ranging(), now).unwrap();
        mailboxes.deliver_at(&target, ranging(), now).unwrap();
        mailboxes.deliver_at(&target, entered(), now).unwrap();

        let events = mailboxes.drain_at(&target, now);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].1, entered());
    }

    #[test]
    fn test_unpolled_target_is_gone() {
        let mailboxes = Mailboxes::new(Duration::seconds(60), 10);
        let target = CallbackTarget::new("com.example.app");
        let now = Utc::now();

        mailboxes.deliver_at(&target, ranging(), now).unwrap();
        mailboxes.deliver_at(&target, ranging(), now + Duration::seconds(30)).unwrap();

        let err = mailboxes
            .deliver_at(&target, ranging(), now + Duration::seconds(61))
            .unwrap_err();
        assert_eq!(err, DeliveryError::TargetGone(target.clone()));
        assert_eq!(mailboxes.target_count(), 0);
    }

    #[test]
    fn test_polling_keeps_target_alive() {
        let mailboxes = Mailboxes::new(Duration::seconds(60), 10);
        let target = CallbackTarget::new("com.example.app");
        let now = Utc::now();

        mailboxes.deliver_at(&target, ranging(), now).unwrap();
        mailboxes.drain_at(&target, now + Duration::seconds(50));

        assert!(mailboxes
            .deliver_at(&target, ranging(), now + Duration::seconds(100))
            .is_ok());
    }

    #[test]
    fn test_polling_unknown_target_opens_no_mailbox() {
        let mailboxes = Mailboxes::new(Duration::seconds(60), 10);
        let now = Utc::now();

        for i in 0..1000 {
            let events = mailboxes.drain_at(&CallbackTarget::new(format!("app.{i}")), now);
            assert!(events.is_empty());
        }
        assert_eq!(mailboxes.target_count(), 0);
    }

    #[test]
    fn test_retain_targets_drops_unsubscribed_mailboxes() {
        let mailboxes = Mailboxes::new(Duration::seconds(60), 10);
        let live = CallbackTarget::new("live.app");
        let stopped = CallbackTarget::new("stopped.app");
        let now = Utc::now();
        mailboxes.deliver_at(&live, ranging(), now).unwrap();
        mailboxes.deliver_at(&stopped, ranging(), now).unwrap();

        let removed = mailboxes.retain_targets(&HashSet::from([live.clone()]));
        assert_eq!(removed, 1);
        assert_eq!(mailboxes.target_count(), 1);
        assert_eq!(mailboxes.pending(&live), 1);
        assert_eq!(mailboxes.pending(&stopped), 0);
    }
}
