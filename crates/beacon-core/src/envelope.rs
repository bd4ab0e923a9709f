//! Command envelopes: the scan/region commands exchanged across a process
//! boundary.
//!
//! A [`Message`] is what travels on the wire: a numeric tag plus a flat
//! [`Bundle`]. Decoding happens in two steps:
//!
//! 1. [`CommandData::from_bundle`] reads the shared payload record. It is
//!    permissive on purpose: older senders omit keys, so missing numbers read
//!    as `0` and missing flags as `false`. It only gives up when neither a
//!    region nor a scan period is present.
//! 2. [`Command::from_message`] checks the fields the tag requires (a region
//!    for start/stop, a callback for start) and builds the typed [`Command`].
//!
//! A malformed message produces an [`EnvelopeError`] and nothing else; no
//! state is touched before a command is fully decoded.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bundle::Bundle;
use crate::callback::CallbackTarget;
use crate::region::Region;

const SCAN_PERIOD_KEY: &str = "scanPeriod";
const BETWEEN_SCAN_PERIOD_KEY: &str = "betweenScanPeriod";
const BACKGROUND_FLAG_KEY: &str = "backgroundFlag";
const CALLBACK_PACKAGE_NAME_KEY: &str = "callbackPackageName";
const REGION_KEY: &str = "region";
const HAS_MIDCYCLE_RANGE_UPDATE_KEY: &str = "hasMidCycleRangUpdate";
const RANGE_UPDATE_PERIOD_KEY: &str = "rangeUpdatePeriod";
const BETWEEN_RANGE_UPDATE_PERIOD_KEY: &str = "betweenRangeUpdatePeriod";
const REGION_STATE_PERSISTENCE_KEY: &str = "regionStatePersistenceEnabled";
const REGION_EXIT_PERIOD_KEY: &str = "regionExitPeriod";

// =============================================================================
// Settings payloads
// =============================================================================

/// Duty-cycle timing for the scanner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanPeriods {
    /// How long each scan window lasts.
    pub scan_period_millis: i64,
    /// Idle time between scan windows.
    pub between_scan_period_millis: i64,
    /// Whether these are the background periods.
    pub background: bool,
}

impl ScanPeriods {
    /// Create a set of scan periods.
    #[must_use]
    pub const fn new(
        scan_period_millis: i64,
        between_scan_period_millis: i64,
        background: bool,
    ) -> Self {
        Self {
            scan_period_millis,
            between_scan_period_millis,
            background,
        }
    }
}

/// Cadence of mid-cycle ranging deliveries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeUpdatePeriods {
    /// Interval between ranging deliveries inside a scan window.
    pub update_period_millis: i64,
    /// Interval between ranging deliveries while idle.
    pub between_update_period_millis: i64,
}

/// Settings every client resends alongside each subscription change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSettings {
    /// Scan duty cycle.
    pub periods: ScanPeriods,
    /// Mid-cycle ranging cadence; `None` when mid-cycle updates are off.
    pub range_updates: Option<RangeUpdatePeriods>,
}

impl ScanSettings {
    /// Settings without mid-cycle range updates.
    #[must_use]
    pub const fn new(periods: ScanPeriods) -> Self {
        Self {
            periods,
            range_updates: None,
        }
    }

    /// Enable mid-cycle range updates.
    #[must_use]
    pub const fn with_range_updates(mut self, range_updates: RangeUpdatePeriods) -> Self {
        self.range_updates = Some(range_updates);
        self
    }

    fn write_to(&self, bundle: &mut Bundle) {
        bundle.put_long(SCAN_PERIOD_KEY, self.periods.scan_period_millis);
        bundle.put_long(BETWEEN_SCAN_PERIOD_KEY, self.periods.between_scan_period_millis);
        bundle.put_bool(BACKGROUND_FLAG_KEY, self.periods.background);

        let updates = self.range_updates.unwrap_or_default();
        bundle.put_bool(HAS_MIDCYCLE_RANGE_UPDATE_KEY, self.range_updates.is_some());
        bundle.put_long(RANGE_UPDATE_PERIOD_KEY, updates.update_period_millis);
        bundle.put_long(BETWEEN_RANGE_UPDATE_PERIOD_KEY, updates.between_update_period_millis);
    }

    fn read_from(bundle: &Bundle) -> Self {
        let periods = ScanPeriods {
            scan_period_millis: bundle.get_long(SCAN_PERIOD_KEY).unwrap_or(0),
            between_scan_period_millis: bundle.get_long(BETWEEN_SCAN_PERIOD_KEY).unwrap_or(0),
            background: bundle.get_bool(BACKGROUND_FLAG_KEY).unwrap_or(false),
        };

        let range_updates = bundle
            .get_bool(HAS_MIDCYCLE_RANGE_UPDATE_KEY)
            .unwrap_or(false)
            .then(|| RangeUpdatePeriods {
                update_period_millis: bundle.get_long(RANGE_UPDATE_PERIOD_KEY).unwrap_or(0),
                between_update_period_millis: bundle
                    .get_long(BETWEEN_RANGE_UPDATE_PERIOD_KEY)
                    .unwrap_or(0),
            });

        Self {
            periods,
            range_updates,
        }
    }
}

// =============================================================================
// Shared payload record
// =============================================================================

/// The payload record shared by the region commands and `SetScanPeriods`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandData {
    /// Region the command applies to; absent for pure settings updates.
    pub region: Option<Region>,
    /// Where results are delivered; required for start commands.
    pub callback: Option<CallbackTarget>,
    /// Settings resent with every command.
    pub settings: ScanSettings,
}

impl CommandData {
    /// Encode into a bundle using the fixed wire keys.
    ///
    /// An absent callback is written as an explicit null marker; an absent
    /// region is omitted.
    #[must_use]
    pub fn to_bundle(&self) -> Bundle {
        let mut bundle = Bundle::new();
        self.settings.write_to(&mut bundle);
        bundle.put_string(
            CALLBACK_PACKAGE_NAME_KEY,
            self.callback.as_ref().map(CallbackTarget::as_str),
        );
        if let Some(region) = &self.region {
            bundle.put_region(REGION_KEY, region.clone());
        }
        bundle
    }

    /// Decode from a bundle, filling missing fields with defaults.
    ///
    /// Returns `None` only when the bundle carries neither a region nor a scan
    /// period.
    #[must_use]
    pub fn from_bundle(bundle: &Bundle) -> Option<Self> {
        let region = bundle.get_region(REGION_KEY).cloned();
        let has_scan_period = bundle.contains_key(SCAN_PERIOD_KEY);
        if region.is_none() && !has_scan_period {
            return None;
        }

        Some(Self {
            region,
            callback: bundle.get_str(CALLBACK_PACKAGE_NAME_KEY).map(CallbackTarget::new),
            settings: ScanSettings::read_from(bundle),
        })
    }
}

/// Out-of-band settings pushed from another process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsData {
    /// Scan timing, when the sender included it.
    pub scan: Option<ScanSettings>,
    /// Whether monitoring state should be persisted across restarts.
    pub region_state_persistence: Option<bool>,
    /// How long a monitored region may go unseen before it is exited.
    pub region_exit_period_millis: Option<i64>,
}

impl SettingsData {
    /// Returns `true` if no setting is carried at all.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.scan.is_none()
            && self.region_state_persistence.is_none()
            && self.region_exit_period_millis.is_none()
    }

    /// Encode into a bundle; absent settings are omitted.
    #[must_use]
    pub fn to_bundle(&self) -> Bundle {
        let mut bundle = Bundle::new();
        if let Some(scan) = &self.scan {
            scan.write_to(&mut bundle);
        }
        if let Some(enabled) = self.region_state_persistence {
            bundle.put_bool(REGION_STATE_PERSISTENCE_KEY, enabled);
        }
        if let Some(millis) = self.region_exit_period_millis {
            bundle.put_long(REGION_EXIT_PERIOD_KEY, millis);
        }
        bundle
    }

    /// Decode from a bundle. Returns `None` if no setting is present.
    #[must_use]
    pub fn from_bundle(bundle: &Bundle) -> Option<Self> {
        let data = Self {
            scan: bundle
                .contains_key(SCAN_PERIOD_KEY)
                .then(|| ScanSettings::read_from(bundle)),
            region_state_persistence: bundle.get_bool(REGION_STATE_PERSISTENCE_KEY),
            region_exit_period_millis: bundle.get_long(REGION_EXIT_PERIOD_KEY),
        };
        (!data.is_empty()).then_some(data)
    }
}

// =============================================================================
// Commands
// =============================================================================

/// Numeric command tags carried by a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum CommandKind {
    /// Begin ranging a region.
    StartRanging = 2,
    /// Stop ranging a region.
    StopRanging = 3,
    /// Begin monitoring a region.
    StartMonitoring = 4,
    /// Stop monitoring a region.
    StopMonitoring = 5,
    /// Update scan periods only.
    SetScanPeriods = 6,
    /// Apply settings pushed from another process.
    SyncSettings = 7,
}

impl CommandKind {
    /// All command kinds in tag order.
    pub const ALL: [Self; 6] = [
        Self::StartRanging,
        Self::StopRanging,
        Self::StartMonitoring,
        Self::StopMonitoring,
        Self::SetScanPeriods,
        Self::SyncSettings,
    ];

    /// The numeric wire tag.
    #[must_use]
    pub const fn tag(self) -> u32 {
        self as u32
    }

    /// Look up a kind by wire tag.
    #[must_use]
    pub const fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            2 => Some(Self::StartRanging),
            3 => Some(Self::StopRanging),
            4 => Some(Self::StartMonitoring),
            5 => Some(Self::StopMonitoring),
            6 => Some(Self::SetScanPeriods),
            7 => Some(Self::SyncSettings),
            _ => None,
        }
    }

    /// Human-readable name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StartRanging => "start_ranging",
            Self::StopRanging => "stop_ranging",
            Self::StartMonitoring => "start_monitoring",
            Self::StopMonitoring => "stop_monitoring",
            Self::SetScanPeriods => "set_scan_periods",
            Self::SyncSettings => "sync_settings",
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a message could not be turned into a [`Command`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    /// The tag is not a known command.
    #[error("unknown command tag {0}")]
    UnknownTag(u32),

    /// The bundle carries neither a region nor a scan period.
    #[error("{0} bundle carries neither a region nor scan periods")]
    MissingData(CommandKind),

    /// A start/stop command arrived without a region.
    #[error("{0} requires a region")]
    MissingRegion(CommandKind),

    /// A start command arrived without a callback target.
    #[error("{0} requires a callback target")]
    MissingCallback(CommandKind),

    /// A settings sync arrived without any setting.
    #[error("settings data missing")]
    MissingSettings,
}

/// A decoded scan/region command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Begin ranging `region`, delivering to `callback`.
    StartRanging {
        /// Region to range.
        region: Region,
        /// Where ranging results go.
        callback: CallbackTarget,
        /// Sender's desired settings.
        settings: ScanSettings,
    },
    /// Stop ranging `region`.
    StopRanging {
        /// Region to stop ranging.
        region: Region,
        /// Sender's desired settings.
        settings: ScanSettings,
    },
    /// Begin monitoring `region`, delivering to `callback`.
    StartMonitoring {
        /// Region to monitor.
        region: Region,
        /// Where transitions go.
        callback: CallbackTarget,
        /// Sender's desired settings.
        settings: ScanSettings,
    },
    /// Stop monitoring `region`.
    StopMonitoring {
        /// Region to stop monitoring.
        region: Region,
        /// Sender's desired settings.
        settings: ScanSettings,
    },
    /// Update scan settings only.
    SetScanPeriods {
        /// Sender's desired settings.
        settings: ScanSettings,
    },
    /// Apply settings pushed from another process.
    SyncSettings(SettingsData),
}

impl Command {
    /// The kind (wire tag) of this command.
    #[must_use]
    pub const fn kind(&self) -> CommandKind {
        match self {
            Self::StartRanging { .. } => CommandKind::StartRanging,
            Self::StopRanging { .. } => CommandKind::StopRanging,
            Self::StartMonitoring { .. } => CommandKind::StartMonitoring,
            Self::StopMonitoring { .. } => CommandKind::StopMonitoring,
            Self::SetScanPeriods { .. } => CommandKind::SetScanPeriods,
            Self::SyncSettings(_) => CommandKind::SyncSettings,
        }
    }

    /// The region this command targets, if any.
    #[must_use]
    pub const fn region(&self) -> Option<&Region> {
        match self {
            Self::StartRanging { region, .. }
            | Self::StopRanging { region, .. }
            | Self::StartMonitoring { region, .. }
            | Self::StopMonitoring { region, .. } => Some(region),
            Self::SetScanPeriods { .. } | Self::SyncSettings(_) => None,
        }
    }

    /// Encode into a wire message.
    #[must_use]
    pub fn to_message(&self) -> Message {
        let data = match self {
            Self::StartRanging {
                region,
                callback,
                settings,
            }
            | Self::StartMonitoring {
                region,
                callback,
                settings,
            } => CommandData {
                region: Some(region.clone()),
                callback: Some(callback.clone()),
                settings: *settings,
            }
            .to_bundle(),
            Self::StopRanging { region, settings } | Self::StopMonitoring { region, settings } => {
                CommandData {
                    region: Some(region.clone()),
                    callback: None,
                    settings: *settings,
                }
                .to_bundle()
            }
            Self::SetScanPeriods { settings } => CommandData {
                region: None,
                callback: None,
                settings: *settings,
            }
            .to_bundle(),
            Self::SyncSettings(settings) => settings.to_bundle(),
        };

        Message {
            what: self.kind().tag(),
            data,
        }
    }

    /// Decode a wire message.
    ///
    /// # Errors
    ///
    /// Returns an [`EnvelopeError`] when the tag is unknown or a field the tag
    /// requires is missing.
    pub fn from_message(message: &Message) -> Result<Self, EnvelopeError> {
        let kind = CommandKind::from_tag(message.what)
            .ok_or(EnvelopeError::UnknownTag(message.what))?;

        let data = || {
            CommandData::from_bundle(&message.data).ok_or(EnvelopeError::MissingData(kind))
        };

        let command = match kind {
            CommandKind::StartRanging => {
                let (region, callback, settings) = start_fields(kind, data()?)?;
                Self::StartRanging {
                    region,
                    callback,
                    settings,
                }
            }
            CommandKind::StartMonitoring => {
                let (region, callback, settings) = start_fields(kind, data()?)?;
                Self::StartMonitoring {
                    region,
                    callback,
                    settings,
                }
            }
            CommandKind::StopRanging => {
                let data = data()?;
                Self::StopRanging {
                    region: data.region.ok_or(EnvelopeError::MissingRegion(kind))?,
                    settings: data.settings,
                }
            }
            CommandKind::StopMonitoring => {
                let data = data()?;
                Self::StopMonitoring {
                    region: data.region.ok_or(EnvelopeError::MissingRegion(kind))?,
                    settings: data.settings,
                }
            }
            CommandKind::SetScanPeriods => Self::SetScanPeriods {
                settings: data()?.settings,
            },
            CommandKind::SyncSettings => SettingsData::from_bundle(&message.data)
                .map(Self::SyncSettings)
                .ok_or(EnvelopeError::MissingSettings)?,
        };

        Ok(command)
    }
}

fn start_fields(
    kind: CommandKind,
    data: CommandData,
) -> Result<(Region, CallbackTarget, ScanSettings), EnvelopeError> {
    let region = data.region.ok_or(EnvelopeError::MissingRegion(kind))?;
    let callback = data.callback.ok_or(EnvelopeError::MissingCallback(kind))?;
    Ok((region, callback, data.settings))
}

/// What travels on the inbound command channel: a tag and its bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Numeric command tag.
    pub what: u32,
    /// Payload bundle.
    pub data: Bundle,
}

impl Message {
    /// Create a message from a raw tag and bundle.
    #[must_use]
    pub const fn new(what: u32, data: Bundle) -> Self {
        Self { what, data }
    }
}

impl From<&Command> for Message {
    fn from(command: &Command) -> Self {
        command.to_message()
    }
}

impl TryFrom<&Message> for Command {
    type Error = EnvelopeError;

    fn try_from(message: &Message) -> Result<Self, Self::Error> {
        Self::from_message(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region() -> Region {
        Region::new("lobby", vec![Some("2f234454-cf6d-4a0f-adf2-f4911ba9ffa6".into()), None])
            .unwrap()
    }

    fn settings() -> ScanSettings {
        ScanSettings::new(ScanPeriods::new(1100, 0, false))
    }

    fn sample_commands() -> Vec<Command> {
        let callback = CallbackTarget::new("com.example.app");
        let with_updates = ScanSettings::new(ScanPeriods::new(10_000, 300_000, true))
            .with_range_updates(RangeUpdatePeriods {
                update_period_millis: 500,
                between_update_period_millis: 60_000,
            });

        vec![
            Command::StartRanging {
                region: region(),
                callback: callback.clone(),
                settings: settings(),
            },
            Command::StopRanging {
                region: region(),
                settings: with_updates,
            },
            Command::StartMonitoring {
                region: region(),
                callback,
                settings: with_updates,
            },
            Command::StopMonitoring {
                region: region(),
                settings: settings(),
            },
            Command::SetScanPeriods {
                settings: with_updates,
            },
            Command::SyncSettings(SettingsData {
                scan: Some(settings()),
                region_state_persistence: Some(false),
                region_exit_period_millis: Some(30_000),
            }),
        ]
    }

    #[test]
    fn test_every_command_kind_round_trips() {
        let commands = sample_commands();
        let kinds: Vec<CommandKind> = commands.iter().map(Command::kind).collect();
        assert_eq!(kinds, CommandKind::ALL.to_vec());

        for command in commands {
            let message = command.to_message();
            assert_eq!(message.what, command.kind().tag());
            assert_eq!(Command::from_message(&message).unwrap(), command);
        }
    }

    #[test]
    fn test_round_trip_survives_json_transport() {
        for command in sample_commands() {
            let json = serde_json::to_string(&command.to_message()).unwrap();
            let message: Message = serde_json::from_str(&json).unwrap();
            assert_eq!(Command::try_from(&message).unwrap(), command);
        }
    }

    #[test]
    fn test_command_data_round_trip_preserves_absent_fields() {
        let data = CommandData {
            region: None,
            callback: None,
            settings: settings(),
        };
        let bundle = data.to_bundle();
        assert!(!bundle.contains_key("region"));
        assert!(bundle.contains_key("callbackPackageName"));
        assert_eq!(CommandData::from_bundle(&bundle), Some(data));
    }

    #[test]
    fn test_settings_only_bundle_decodes_without_region() {
        let mut bundle = Bundle::new();
        bundle.put_long("scanPeriod", 1100);
        bundle.put_long("betweenScanPeriod", 0);

        let data = CommandData::from_bundle(&bundle).unwrap();
        assert_eq!(data.region, None);
        assert_eq!(data.settings.periods.scan_period_millis, 1100);

        let command = Command::from_message(&Message::new(6, bundle)).unwrap();
        assert_eq!(command.kind(), CommandKind::SetScanPeriods);
        assert_eq!(command.region(), None);
    }

    #[test]
    fn test_missing_background_flag_defaults_to_false() {
        let mut bundle = Bundle::new();
        bundle.put_region("region", region());
        bundle.put_string("callbackPackageName", Some("com.example.app"));
        bundle.put_long("scanPeriod", 1100);

        let data = CommandData::from_bundle(&bundle).unwrap();
        assert!(!data.settings.periods.background);
        assert_eq!(data.settings.periods.between_scan_period_millis, 0);
        assert_eq!(data.settings.range_updates, None);
    }

    #[test]
    fn test_region_only_bundle_uses_zero_periods() {
        let mut bundle = Bundle::new();
        bundle.put_region("region", region());

        let command = Command::from_message(&Message::new(3, bundle)).unwrap();
        assert_eq!(
            command,
            Command::StopRanging {
                region: region(),
                settings: ScanSettings::default(),
            }
        );
    }

    #[test]
    fn test_empty_bundle_is_invalid() {
        assert_eq!(CommandData::from_bundle(&Bundle::new()), None);
        assert_eq!(
            Command::from_message(&Message::new(2, Bundle::new())),
            Err(EnvelopeError::MissingData(CommandKind::StartRanging))
        );
    }

    #[test]
    fn test_start_without_region_is_rejected() {
        let mut bundle = Bundle::new();
        bundle.put_long("scanPeriod", 1100);
        bundle.put_string("callbackPackageName", Some("com.example.app"));

        assert_eq!(
            Command::from_message(&Message::new(4, bundle)),
            Err(EnvelopeError::MissingRegion(CommandKind::StartMonitoring))
        );
    }

    #[test]
    fn test_start_without_callback_is_rejected() {
        let mut bundle = Bundle::new();
        bundle.put_region("region", region());

        assert_eq!(
            Command::from_message(&Message::new(2, bundle)),
            Err(EnvelopeError::MissingCallback(CommandKind::StartRanging))
        );
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        let message = Command::SetScanPeriods {
            settings: settings(),
        }
        .to_message();
        let message = Message::new(42, message.data);
        assert_eq!(Command::from_message(&message), Err(EnvelopeError::UnknownTag(42)));
    }

    #[test]
    fn test_mistyped_values_fall_back_to_defaults() {
        let mut bundle = Bundle::new();
        bundle.put_long("scanPeriod", 1100);
        bundle.put_string("backgroundFlag", Some("true"));
        bundle.put_bool("betweenScanPeriod", true);

        let data = CommandData::from_bundle(&bundle).unwrap();
        assert!(!data.settings.periods.background);
        assert_eq!(data.settings.periods.between_scan_period_millis, 0);
    }

    #[test]
    fn test_mid_cycle_periods_ignored_when_flag_off() {
        let mut bundle = Bundle::new();
        bundle.put_long("scanPeriod", 1100);
        bundle.put_bool("hasMidCycleRangUpdate", false);
        bundle.put_long("rangeUpdatePeriod", 250);

        let data = CommandData::from_bundle(&bundle).unwrap();
        assert_eq!(data.settings.range_updates, None);
    }

    #[test]
    fn test_sync_settings_requires_some_setting() {
        assert_eq!(
            Command::from_message(&Message::new(7, Bundle::new())),
            Err(EnvelopeError::MissingSettings)
        );

        let mut bundle = Bundle::new();
        bundle.put_bool("regionStatePersistenceEnabled", true);
        let command = Command::from_message(&Message::new(7, bundle)).unwrap();
        assert_eq!(
            command,
            Command::SyncSettings(SettingsData {
                scan: None,
                region_state_persistence: Some(true),
                region_exit_period_millis: None,
            })
        );
    }

    #[test]
    fn test_command_kind_tags() {
        for kind in CommandKind::ALL {
            assert_eq!(CommandKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(CommandKind::from_tag(1), None);
        assert_eq!(CommandKind::StartRanging.tag(), 2);
        assert_eq!(CommandKind::SyncSettings.tag(), 7);
    }
}
