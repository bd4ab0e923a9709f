//! Inbound command endpoint.
//!
//! Clients post raw command envelopes here. The server only enqueues them;
//! decoding and application happen later on the dispatcher, so a `202` means
//! "queued", not "applied". Malformed envelopes are dropped by the dispatcher
//! and never reported back to the sender.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use beacon_core::bundle::Bundle;
use beacon_core::envelope::{CommandKind, Message};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::ApiResult;
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// A command envelope: numeric tag plus bundle.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "what": 2,
    "data": {
        "region": {
            "type": "region",
            "value": {
                "unique_id": "lobby",
                "identifiers": ["2f234454-cf6d-4a0f-adf2-f4911ba9ffa6", null],
                "bluetooth_address": null
            }
        },
        "callbackPackageName": { "type": "str", "value": "com.example.app" },
        "scanPeriod": { "type": "long", "value": 1100 },
        "betweenScanPeriod": { "type": "long", "value": 0 },
        "backgroundFlag": { "type": "bool", "value": false }
    }
}))]
pub struct MessageRequest {
    /// Command tag: 2 start ranging, 3 stop ranging, 4 start monitoring,
    /// 5 stop monitoring, 6 set scan periods, 7 sync settings.
    #[schema(example = 2)]
    pub what: u32,

    /// Key/value payload. Each value is `{ "type": ..., "value": ... }`.
    #[schema(value_type = Object)]
    pub data: Bundle,
}

/// Acknowledgment that a message was queued.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "queued": true,
    "what": 2,
    "command": "start_ranging"
}))]
pub struct MessageAccepted {
    /// Always `true`; failures are reported as errors.
    pub queued: bool,

    /// The tag that was queued.
    #[schema(example = 2)]
    pub what: u32,

    /// Name of the command, if the tag is known.
    #[schema(example = "start_ranging", nullable)]
    pub command: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Queue a command envelope for the dispatcher.
#[utoipa::path(
    post,
    path = "/api/messages",
    tag = "commands",
    operation_id = "postMessage",
    summary = "Queue a scan command",
    description = "Enqueues a command envelope on the inbound queue. The command is \
        decoded and applied asynchronously, in arrival order. Malformed envelopes \
        are dropped silently by the dispatcher.",
    request_body = MessageRequest,
    responses(
        (status = 202, description = "Message queued", body = MessageAccepted),
        (status = 503, description = "Queue is full or closed", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn post_message(
    State(state): State<AppState>,
    Json(request): Json<MessageRequest>,
) -> ApiResult<(StatusCode, Json<MessageAccepted>)> {
    let what = request.what;
    state.commands().send(Message::new(what, request.data))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(MessageAccepted {
            queued: true,
            what,
            command: CommandKind::from_tag(what).map(|kind| kind.as_str().to_string()),
        }),
    ))
}
