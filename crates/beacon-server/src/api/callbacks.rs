//! Callback polling endpoint.
//!
//! Each poll drains the target's mailbox and keeps the target alive. A client
//! that stops polling is eventually treated as gone and loses its
//! subscriptions.

use axum::extract::{Path, State};
use axum::Json;
use beacon_core::callback::CallbackTarget;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult};
use crate::api::status::{BeaconView, RegionView};
use crate::mailbox::CallbackEvent;
use crate::state::AppState;

// ============================================================================
// Response Types
// ============================================================================

/// One delivered result.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CallbackEventView {
    /// Beacons ranged in a region during one delivery interval.
    Ranging {
        /// When the result was delivered.
        delivered_at: String,
        /// The ranged region.
        region: RegionView,
        /// Beacons seen; may be empty.
        beacons: Vec<BeaconView>,
    },
    /// A monitored region was entered or exited.
    Monitoring {
        /// When the transition was delivered.
        delivered_at: String,
        /// The monitored region.
        region: RegionView,
        /// `inside` or `outside`.
        state: String,
    },
}

/// Everything buffered for a target since its last poll.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CallbackEventsResponse {
    /// The polled target.
    #[schema(example = "com.example.app")]
    pub target: String,
    /// Events, oldest first.
    pub events: Vec<CallbackEventView>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Drain buffered results for a callback target.
#[utoipa::path(
    get,
    path = "/api/callbacks/{target}",
    tag = "callbacks",
    operation_id = "pollCallbacks",
    summary = "Poll results for a callback target",
    description = "Returns and removes every ranging result and monitoring transition \
        buffered for the target. Targets must poll regularly; one that stays silent \
        past the configured TTL is considered gone and its subscriptions are dropped.",
    params(
        ("target" = String, Path, description = "Callback target name", example = "com.example.app")
    ),
    responses(
        (status = 200, description = "Buffered events", body = CallbackEventsResponse),
        (status = 400, description = "Empty target name", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn poll_callbacks(
    State(state): State<AppState>,
    Path(target): Path<String>,
) -> ApiResult<Json<CallbackEventsResponse>> {
    if target.trim().is_empty() {
        return Err(ApiError::BadRequest {
            error_code: "invalid_callback_target".to_string(),
            message: "Callback target cannot be empty".to_string(),
        });
    }

    let callback = CallbackTarget::new(target);
    let events = state
        .mailboxes()
        .drain(&callback)
        .into_iter()
        .map(|(delivered_at, event)| {
            let delivered_at = delivered_at.to_rfc3339();
            match event {
                CallbackEvent::Ranging(data) => CallbackEventView::Ranging {
                    delivered_at,
                    region: (&data.region).into(),
                    beacons: data.beacons.iter().map(BeaconView::from).collect(),
                },
                CallbackEvent::Monitoring(data) => CallbackEventView::Monitoring {
                    delivered_at,
                    region: (&data.region).into(),
                    state: data.state.to_string(),
                },
            }
        })
        .collect();

    Ok(Json(CallbackEventsResponse {
        target: callback.to_string(),
        events,
    }))
}
