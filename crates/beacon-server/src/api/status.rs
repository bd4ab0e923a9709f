//! Scan service status endpoint.

use axum::extract::State;
use axum::Json;
use beacon_core::region::{Beacon, Region};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::state::AppState;

// ============================================================================
// Shared view types
// ============================================================================

/// A region as shown by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "unique_id": "lobby",
    "identifiers": ["2f234454-cf6d-4a0f-adf2-f4911ba9ffa6", null],
    "bluetooth_address": null
}))]
pub struct RegionView {
    /// Client-chosen region name.
    #[schema(example = "lobby")]
    pub unique_id: String,

    /// Identifier filters by position; `null` matches anything.
    pub identifiers: Vec<Option<String>>,

    /// Address filter, if any.
    #[schema(nullable)]
    pub bluetooth_address: Option<String>,
}

impl From<&Region> for RegionView {
    fn from(region: &Region) -> Self {
        Self {
            unique_id: region.unique_id().to_string(),
            identifiers: region.identifiers().to_vec(),
            bluetooth_address: region.bluetooth_address().map(str::to_string),
        }
    }
}

/// A beacon observation as shown by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BeaconView {
    /// Decoded identifiers.
    pub identifiers: Vec<String>,
    /// Received signal strength in dBm.
    #[schema(example = -62)]
    pub rssi: i16,
    /// Calibrated transmit power in dBm.
    #[schema(example = -59)]
    pub tx_power: i16,
    /// Transmitter address.
    #[schema(example = "AA:BB:CC:DD:EE:FF")]
    pub bluetooth_address: String,
}

impl From<&Beacon> for BeaconView {
    fn from(beacon: &Beacon) -> Self {
        Self {
            identifiers: beacon.identifiers.clone(),
            rssi: beacon.rssi,
            tx_power: beacon.tx_power,
            bluetooth_address: beacon.bluetooth_address.clone(),
        }
    }
}

// ============================================================================
// Response Types
// ============================================================================

/// A ranged region and who receives its results.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RangedRegionStatus {
    /// The region.
    pub region: RegionView,
    /// Callback target name.
    #[schema(example = "com.example.app")]
    pub callback: String,
    /// Beacons collected since the last delivery.
    pub pending_beacons: usize,
}

/// A monitored region, its membership and who receives transitions.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MonitoredRegionStatus {
    /// The region.
    pub region: RegionView,
    /// Callback target name.
    #[schema(example = "com.example.app")]
    pub callback: String,
    /// `inside`, `outside` or `unknown`.
    #[schema(example = "inside")]
    pub state: String,
    /// When a matching beacon was last seen.
    #[schema(nullable)]
    pub last_seen_at: Option<String>,
}

/// Scanner timing currently in effect.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ScanPeriodsStatus {
    /// Scan window in milliseconds.
    #[schema(example = 1100)]
    pub scan_period_millis: i64,
    /// Idle time between scans in milliseconds.
    #[schema(example = 0)]
    pub between_scan_period_millis: i64,
    /// Whether background timing is in effect.
    pub background: bool,
    /// Mid-cycle ranging cadence in milliseconds, if enabled.
    #[schema(nullable)]
    pub range_update_period_millis: Option<i64>,
}

/// Full service status.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StatusResponse {
    /// Whether the scanner is running.
    pub scanning: bool,
    /// Ranged plus monitored region count.
    pub active_demand: usize,
    /// Ranged regions.
    pub ranged: Vec<RangedRegionStatus>,
    /// Monitored regions.
    pub monitored: Vec<MonitoredRegionStatus>,
    /// Current scanner timing.
    pub scan_periods: ScanPeriodsStatus,
    /// Whether monitoring state is persisted.
    pub state_persistence: bool,
    /// Region exit period in milliseconds.
    pub region_exit_period_millis: i64,
    /// Seconds since the server started.
    pub uptime_secs: i64,
}

// ============================================================================
// Handlers
// ============================================================================

/// Report subscriptions and scanner state.
#[utoipa::path(
    get,
    path = "/api/status",
    tag = "system",
    operation_id = "getStatus",
    summary = "Get scan service status",
    description = "Returns whether the scanner is running, the ranged and monitored \
        regions with their callbacks, monitoring membership and the scan timing \
        currently in effect.",
    responses(
        (status = 200, description = "Status retrieved", body = StatusResponse)
    )
)]
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let service = state.service();
    let ranged_table = service.ranged_regions();
    let monitoring = service.monitoring_status();

    let mut ranged: Vec<RangedRegionStatus> = ranged_table
        .regions()
        .iter()
        .filter_map(|region| {
            let callback = ranged_table.callback_for(region)?;
            Some(RangedRegionStatus {
                region: region.into(),
                callback: callback.to_string(),
                pending_beacons: ranged_table.pending_beacons(region),
            })
        })
        .collect();
    ranged.sort_by(|a, b| a.region.unique_id.cmp(&b.region.unique_id));

    let mut monitored: Vec<MonitoredRegionStatus> = monitoring
        .snapshot(Utc::now())
        .regions
        .into_iter()
        .map(|entry| MonitoredRegionStatus {
            region: (&entry.region).into(),
            callback: entry.state.callback().to_string(),
            state: entry.state.state().to_string(),
            last_seen_at: entry.state.last_seen_at().map(|t| t.to_rfc3339()),
        })
        .collect();
    monitored.sort_by(|a, b| a.region.unique_id.cmp(&b.region.unique_id));

    let settings = state.scanner().settings();

    Json(StatusResponse {
        scanning: service.is_scanning(),
        active_demand: service.active_demand(),
        ranged,
        monitored,
        scan_periods: ScanPeriodsStatus {
            scan_period_millis: settings.periods.scan_period_millis,
            between_scan_period_millis: settings.periods.between_scan_period_millis,
            background: settings.periods.background,
            range_update_period_millis: settings.range_updates.map(|r| r.update_period_millis),
        },
        state_persistence: monitoring.persistence_enabled(),
        region_exit_period_millis: monitoring.exit_period().num_milliseconds(),
        uptime_secs: (Utc::now() - state.started_at()).num_seconds(),
    })
}
