//! OpenAPI specification generation for the beacon scan API.
//!
//! The document is served at `/api/openapi.json` and written to disk by the
//! `gen-openapi` binary for client generation.

use axum::Json;
use utoipa::OpenApi;

use super::callbacks::{CallbackEventView, CallbackEventsResponse};
use super::error::ErrorResponse;
use super::health::HealthResponse;
use super::messages::{MessageAccepted, MessageRequest};
use super::status::{
    BeaconView, MonitoredRegionStatus, RangedRegionStatus, RegionView, ScanPeriodsStatus,
    StatusResponse,
};

/// Serve the OpenAPI specification as JSON.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Returns the OpenAPI specification as pretty-printed JSON.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "beacon-scan API",
        version = "0.1.0",
        description = r#"
# beacon-scan API

Host interface for a background beacon scanning service.

## Overview

Clients subscribe to **regions** (a beacon identity filter) in two ways:

1. **Ranging**: receive the list of beacons seen in the region after every scan cycle
2. **Monitoring**: receive a transition whenever the device enters or exits the region

A single duty-cycled scanner serves every subscription. It runs while at least one
region is ranged or monitored and stops when none are.

## Flow

- Post command envelopes to `/api/messages`. They are applied asynchronously, in order.
- Poll `/api/callbacks/{target}` with the callback name used in the start command.
  Targets that stop polling are treated as gone and lose their subscriptions.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local beacon-scan server")
    ),
    tags(
        (name = "system", description = "Health checks and service status"),
        (name = "commands", description = "Inbound scan and region commands"),
        (name = "callbacks", description = "Ranging results and monitoring transitions per client")
    ),
    paths(
        super::health::health_check,
        super::status::get_status,
        super::messages::post_message,
        super::callbacks::poll_callbacks,
    ),
    components(
        schemas(
            ErrorResponse,
            HealthResponse,
            MessageRequest,
            MessageAccepted,
            StatusResponse,
            RangedRegionStatus,
            MonitoredRegionStatus,
            ScanPeriodsStatus,
            RegionView,
            BeaconView,
            CallbackEventView,
            CallbackEventsResponse,
        )
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_spec_generation() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "beacon-scan API");
        assert_eq!(spec.paths.paths.len(), 4);
        assert!(spec.paths.paths.contains_key("/api/callbacks/{target}"));
    }

    #[test]
    fn test_openapi_json_serialization() {
        let json = get_openapi_json().unwrap();
        assert!(json.contains("\"openapi\":"));
        assert!(json.contains("\"beacon-scan API\""));
    }
}
