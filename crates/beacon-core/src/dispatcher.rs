//! Inbound command dispatch.
//!
//! Messages arrive on a bounded queue and are applied one at a time, in
//! arrival order, by a single consumer. The dispatcher only holds a weak
//! reference to the [`ScanService`]: once the service is dropped, queued
//! messages are discarded instead of keeping it alive.
//!
//! For every region command the subscription change is applied first, then
//! the sender's scan settings, then (only if present) its range update
//! periods.

use std::sync::{Arc, Weak};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::envelope::{Command, CommandKind, EnvelopeError, Message};
use crate::error::{BeaconError, Result};
use crate::service::ScanService;

/// What became of one dispatched message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The command was decoded and applied.
    Applied(CommandKind),
    /// The message was malformed and ignored; no state changed.
    Dropped(EnvelopeError),
    /// The service no longer exists; the message was ignored.
    ServiceGone,
}

/// Counters returned when a dispatch loop ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Commands applied.
    pub applied: u64,
    /// Malformed messages dropped.
    pub dropped: u64,
    /// Messages discarded because the service was gone.
    pub discarded: u64,
}

/// Applies decoded commands to a [`ScanService`].
#[derive(Debug, Clone)]
pub struct Dispatcher {
    service: Weak<ScanService>,
}

impl Dispatcher {
    /// Create a dispatcher for `service` without extending its lifetime.
    #[must_use]
    pub fn new(service: &Arc<ScanService>) -> Self {
        Self {
            service: Arc::downgrade(service),
        }
    }

    /// Decode and apply one message.
    pub fn dispatch(&self, message: &Message) -> DispatchOutcome {
        let Some(service) = self.service.upgrade() else {
            warn!(what = message.what, "Scan service is gone, ignoring message");
            return DispatchOutcome::ServiceGone;
        };

        match Command::from_message(message) {
            Ok(command) => {
                let kind = command.kind();
                info!(command = %kind, "Received command");
                apply(&service, command);
                DispatchOutcome::Applied(kind)
            }
            Err(e) => {
                warn!(what = message.what, error = %e, "Dropping malformed message");
                DispatchOutcome::Dropped(e)
            }
        }
    }

    /// Consume `rx` until every sender is dropped or the service goes away.
    pub async fn run(self, mut rx: mpsc::Receiver<Message>) -> DispatchStats {
        let mut stats = DispatchStats::default();
        info!("Command dispatcher started");

        while let Some(message) = rx.recv().await {
            match self.dispatch(&message) {
                DispatchOutcome::Applied(_) => stats.applied += 1,
                DispatchOutcome::Dropped(_) => stats.dropped += 1,
                DispatchOutcome::ServiceGone => {
                    stats.discarded += 1;
                    rx.close();
                    while rx.recv().await.is_some() {
                        stats.discarded += 1;
                    }
                    break;
                }
            }
        }

        info!(
            applied = stats.applied,
            dropped = stats.dropped,
            discarded = stats.discarded,
            "Command dispatcher stopped"
        );
        stats
    }
}

fn apply(service: &ScanService, command: Command) {
    match command {
        Command::StartRanging {
            region,
            callback,
            settings,
        } => {
            service.start_ranging(region, callback);
            service.apply_scan_settings(&settings);
        }
        Command::StopRanging { region, settings } => {
            service.stop_ranging(&region);
            service.apply_scan_settings(&settings);
        }
        Command::StartMonitoring {
            region,
            callback,
            settings,
        } => {
            service.start_monitoring(region, callback);
            service.apply_scan_settings(&settings);
        }
        Command::StopMonitoring { region, settings } => {
            service.stop_monitoring(&region);
            service.apply_scan_settings(&settings);
        }
        Command::SetScanPeriods { settings } => service.apply_scan_settings(&settings),
        Command::SyncSettings(settings) => {
            debug!(?settings, "Applying settings from another process");
            service.apply_settings(&settings);
        }
    }
}

/// Producer half of the inbound command queue.
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: mpsc::Sender<Message>,
}

impl CommandSender {
    /// Enqueue a raw message without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::QueueFull`] when the queue is at capacity and
    /// [`BeaconError::QueueClosed`] when the dispatcher has stopped.
    pub fn send(&self, message: Message) -> Result<()> {
        self.tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(message) => {
                warn!(what = message.what, "Command queue full, dropping message");
                BeaconError::QueueFull
            }
            mpsc::error::TrySendError::Closed(message) => {
                warn!(what = message.what, "Command queue closed, dropping message");
                BeaconError::QueueClosed
            }
        })
    }

    /// Encode and enqueue a command.
    ///
    /// # Errors
    ///
    /// As [`CommandSender::send`].
    pub fn send_command(&self, command: &Command) -> Result<()> {
        self.send(command.to_message())
    }

    /// Free slots left in the queue.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.tx.capacity()
    }

    /// Returns `true` once the receiving side has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Create the inbound queue. `capacity` is clamped to at least one slot.
#[must_use]
pub fn channel(capacity: usize) -> (CommandSender, mpsc::Receiver<Message>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (CommandSender { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::Bundle;
    use crate::callback::CallbackTarget;
    use crate::controller::{MockScanController, ScannerCall};
    use crate::envelope::{RangeUpdatePeriods, ScanPeriods, ScanSettings, SettingsData};
    use crate::monitoring::MonitoringStatus;
    use crate::region::Region;
    use tokio_test::{assert_err, assert_ok};

    fn setup() -> (Arc<ScanService>, Arc<MockScanController>, Dispatcher) {
        let controller = Arc::new(MockScanController::new());
        let service = Arc::new(ScanService::new(controller.clone(), MonitoringStatus::new()));
        let dispatcher = Dispatcher::new(&service);
        (service, controller, dispatcher)
    }

    fn region(id: &str) -> Region {
        Region::new(id, vec![Some("uuid".into())]).unwrap()
    }

    fn settings() -> ScanSettings {
        ScanSettings::new(ScanPeriods::new(1100, 0, false))
    }

    fn start_ranging(id: &str) -> Command {
        Command::StartRanging {
            region: region(id),
            callback: CallbackTarget::new("com.example.app"),
            settings: settings(),
        }
    }

    #[test]
    fn test_start_applies_subscription_then_settings() {
        let (service, controller, dispatcher) = setup();

        let outcome = dispatcher.dispatch(&start_ranging("a").to_message());
        assert_eq!(outcome, DispatchOutcome::Applied(CommandKind::StartRanging));
        assert_eq!(service.active_demand(), 1);
        assert_eq!(
            controller.calls(),
            vec![
                ScannerCall::Start,
                ScannerCall::ScanPeriods(ScanPeriods::new(1100, 0, false))
            ]
        );
    }

    #[test]
    fn test_range_updates_only_when_flagged() {
        let (_service, controller, dispatcher) = setup();
        dispatcher.dispatch(&start_ranging("a").to_message());
        assert_eq!(controller.range_update_periods(), None);

        let updates = RangeUpdatePeriods {
            update_period_millis: 500,
            between_update_period_millis: 1000,
        };
        let command = Command::SetScanPeriods {
            settings: settings().with_range_updates(updates),
        };
        dispatcher.dispatch(&command.to_message());
        assert_eq!(controller.range_update_periods(), Some(updates));
    }

    #[test]
    fn test_stop_applies_settings_even_when_not_subscribed() {
        let (service, controller, dispatcher) = setup();
        let command = Command::StopMonitoring {
            region: region("never"),
            settings: ScanSettings::new(ScanPeriods::new(10_000, 300_000, true)),
        };

        let outcome = dispatcher.dispatch(&command.to_message());
        assert_eq!(outcome, DispatchOutcome::Applied(CommandKind::StopMonitoring));
        assert_eq!(service.active_demand(), 0);
        assert_eq!(controller.start_count() + controller.stop_count(), 0);
        assert_eq!(controller.scan_periods(), Some(ScanPeriods::new(10_000, 300_000, true)));
    }

    #[test]
    fn test_malformed_message_changes_nothing() {
        let (service, controller, dispatcher) = setup();

        let outcome = dispatcher.dispatch(&Message::new(2, Bundle::new()));
        assert_eq!(
            outcome,
            DispatchOutcome::Dropped(EnvelopeError::MissingData(CommandKind::StartRanging))
        );

        let outcome = dispatcher.dispatch(&Message::new(99, Bundle::new()));
        assert_eq!(outcome, DispatchOutcome::Dropped(EnvelopeError::UnknownTag(99)));

        assert_eq!(service.active_demand(), 0);
        assert!(controller.calls().is_empty());
    }

    #[test]
    fn test_sync_settings_is_routed_by_tag() {
        let (service, controller, dispatcher) = setup();
        let sync = Command::SyncSettings(SettingsData {
            scan: Some(settings()),
            region_state_persistence: None,
            region_exit_period_millis: Some(15_000),
        });

        let outcome = dispatcher.dispatch(&sync.to_message());
        assert_eq!(outcome, DispatchOutcome::Applied(CommandKind::SyncSettings));
        assert_eq!(controller.scan_periods(), Some(ScanPeriods::new(1100, 0, false)));
        assert_eq!(
            service.monitoring_status().exit_period(),
            chrono::Duration::seconds(15)
        );
    }

    #[test]
    fn test_dropped_service_is_reported() {
        let (service, controller, dispatcher) = setup();
        drop(service);

        let outcome = dispatcher.dispatch(&start_ranging("a").to_message());
        assert_eq!(outcome, DispatchOutcome::ServiceGone);
        assert!(controller.calls().is_empty());
    }

    #[test]
    fn test_full_queue_rejects() {
        let (sender, _rx) = channel(1);
        assert_ok!(sender.send_command(&start_ranging("a")));

        let err = assert_err!(sender.send_command(&start_ranging("b")));
        assert!(matches!(err, BeaconError::QueueFull));
    }

    #[test]
    fn test_closed_queue_rejects() {
        let (sender, rx) = channel(4);
        drop(rx);

        assert!(sender.is_closed());
        let err = assert_err!(sender.send_command(&start_ranging("a")));
        assert!(matches!(err, BeaconError::QueueClosed));
    }

    #[tokio::test]
    async fn test_run_applies_in_arrival_order() {
        let (service, controller, dispatcher) = setup();
        let (sender, rx) = channel(16);

        assert_ok!(sender.send_command(&start_ranging("a")));
        assert_ok!(sender.send_command(&Command::StartMonitoring {
            region: region("a"),
            callback: CallbackTarget::new("com.example.other"),
            settings: settings(),
        }));
        assert_ok!(sender.send_command(&Command::StopRanging {
            region: region("a"),
            settings: settings(),
        }));
        assert_ok!(sender.send(Message::new(42, Bundle::new())));
        assert_ok!(sender.send_command(&Command::StopMonitoring {
            region: region("a"),
            settings: settings(),
        }));
        drop(sender);

        let stats = dispatcher.run(rx).await;
        assert_eq!(
            stats,
            DispatchStats {
                applied: 4,
                dropped: 1,
                discarded: 0,
            }
        );
        assert_eq!(service.active_demand(), 0);
        assert!(!controller.is_running());
        assert_eq!(controller.start_count(), 1);
        assert_eq!(controller.stop_count(), 1);
    }

    #[tokio::test]
    async fn test_run_discards_after_service_drop() {
        let (service, _controller, dispatcher) = setup();
        let (sender, rx) = channel(16);
        drop(service);

        assert_ok!(sender.send_command(&start_ranging("a")));
        assert_ok!(sender.send_command(&start_ranging("b")));
        drop(sender);

        let stats = dispatcher.run(rx).await;
        assert_eq!(stats.applied, 0);
        assert_eq!(stats.discarded, 2);
    }
}
