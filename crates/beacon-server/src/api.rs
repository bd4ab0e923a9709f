//! HTTP API routes and handlers.
//!
//! This module contains all HTTP endpoint implementations organized by domain:
//! - `health` - Service health checks
//! - `messages` - Inbound command envelopes
//! - `status` - Subscription and scanner status
//! - `callbacks` - Result polling per callback target
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::state::AppState;

pub mod callbacks;
pub mod error;
pub mod health;
pub mod messages;
pub mod openapi;
pub mod status;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use openapi::get_openapi_json;

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                      - Health check
/// /api
/// ├── /messages                - Queue a command envelope (POST)
/// ├── /status                  - Subscriptions and scanner state
/// ├── /callbacks/{target}      - Drain results for a callback target
/// └── /openapi.json            - OpenAPI specification
/// ```
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .nest(
            "/api",
            Router::new()
                .route("/messages", post(messages::post_message))
                .route("/status", get(status::get_status))
                .route("/callbacks/{target}", get(callbacks::poll_callbacks))
                .route("/openapi.json", get(openapi::get_openapi_spec)),
        )
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_response(DefaultOnResponse::new().level(Level::INFO)),
                )
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::state::tests::test_config;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use beacon_core::callback::CallbackTarget;
    use beacon_core::envelope::{Command, ScanPeriods, ScanSettings};
    use beacon_core::region::{Beacon, Region};
    use tower::ServiceExt;

    fn start_ranging() -> Command {
        Command::StartRanging {
            region: Region::new("lobby", vec![Some("uuid".into())]).unwrap(),
            callback: CallbackTarget::new("com.example.app"),
            settings: ScanSettings::new(ScanPeriods::new(100, 0, false)),
        }
    }

    fn post_json(uri: &str, body: &serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn wait_for_demand(state: &AppState, demand: usize) {
        for _ in 0..100 {
            if state.service().active_demand() == demand {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("demand never reached {demand}");
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let (state, tasks) = AppState::start(test_config(dir.path())).unwrap();
        let app = create_router(state);

        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["scanning"], false);
        tasks.abort();
    }

    #[tokio::test]
    async fn test_posted_command_is_applied() {
        let dir = tempfile::tempdir().unwrap();
        let (state, tasks) = AppState::start(test_config(dir.path())).unwrap();
        let app = create_router(state.clone());

        let body = serde_json::to_value(start_ranging().to_message()).unwrap();
        let response = app
            .clone()
            .oneshot(post_json("/api/messages", &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(json_body(response).await["command"], "start_ranging");

        wait_for_demand(&state, 1).await;
        let response = app.oneshot(get("/api/status")).await.unwrap();
        let status = json_body(response).await;
        assert_eq!(status["scanning"], true);
        assert_eq!(status["ranged"][0]["region"]["unique_id"], "lobby");
        assert_eq!(status["ranged"][0]["callback"], "com.example.app");
        assert_eq!(status["scan_periods"]["scan_period_millis"], 100);
        tasks.abort();
    }

    #[tokio::test]
    async fn test_malformed_message_is_still_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let (state, tasks) = AppState::start(test_config(dir.path())).unwrap();
        let app = create_router(state.clone());

        let body = serde_json::json!({ "what": 2, "data": {} });
        let response = app.oneshot(post_json("/api/messages", &body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(state.service().active_demand(), 0);
        assert!(!state.service().is_scanning());
        tasks.abort();
    }

    #[tokio::test]
    async fn test_invalid_region_is_rejected_before_queueing() {
        let dir = tempfile::tempdir().unwrap();
        let (state, tasks) = AppState::start(test_config(dir.path())).unwrap();
        let app = create_router(state.clone());

        let body = serde_json::json!({
            "what": 2,
            "data": {
                "region": {
                    "type": "region",
                    "value": { "unique_id": "", "identifiers": [], "bluetooth_address": "not-a-mac" }
                },
                "callbackPackageName": { "type": "str", "value": "com.example.app" }
            }
        });
        let response = app.oneshot(post_json("/api/messages", &body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(state.service().active_demand(), 0);
        tasks.abort();
    }

    #[tokio::test]
    async fn test_closed_queue_returns_503() {
        let dir = tempfile::tempdir().unwrap();
        let (state, tasks) = AppState::start(test_config(dir.path())).unwrap();
        tasks.dispatcher.abort();
        let _ = tasks.dispatcher.await;
        let app = create_router(state);

        let body = serde_json::to_value(start_ranging().to_message()).unwrap();
        let response = app.oneshot(post_json("/api/messages", &body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json_body(response).await["error"], "queue_closed");
    }

    #[tokio::test]
    async fn test_simulated_cycle_reaches_callback() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.scan.foreground_scan_period_millis = 100;
        config.simulation.enabled = true;
        config.simulation.beacons = vec![Beacon::new(
            vec!["uuid".into(), "1".into(), "2".into()],
            -60,
            -59,
            "AA:BB:CC:DD:EE:FF",
        )];
        let (state, tasks) = AppState::start(config).unwrap();
        let app = create_router(state.clone());

        let body = serde_json::to_value(start_ranging().to_message()).unwrap();
        app.clone()
            .oneshot(post_json("/api/messages", &body))
            .await
            .unwrap();
        wait_for_demand(&state, 1).await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        let response = app
            .oneshot(get("/api/callbacks/com.example.app"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let events = body["events"].as_array().unwrap();
        assert!(!events.is_empty());
        assert_eq!(events[0]["kind"], "ranging");
        assert_eq!(events[0]["beacons"][0]["bluetooth_address"], "AA:BB:CC:DD:EE:FF");
        tasks.abort();
    }

    #[tokio::test]
    async fn test_openapi_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let (state, tasks) = AppState::start(test_config(dir.path())).unwrap();
        let app = create_router(state);

        let response = app.oneshot(get("/api/openapi.json")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert!(body["paths"]["/api/messages"].is_object());
        tasks.abort();
    }
}
