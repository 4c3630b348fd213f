//! HTTP surface of the coordinator.
//!
//! - `POST /message`: one [`Request`], answered with one [`Reply`]. Replies
//!   are always `200 OK`; failures are carried in the `error` field.
//! - `POST /events`: an [`EventNotice`] from a host.
//! - `GET /surfaces`: consumer surfaces currently open.
//! - `GET /health`: liveness.

use super::handler::Coordinator;
use crate::server::{surface::SurfaceInfo, telemetry::increment_request_errors};
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use courier::{Error, EventNotice, Reply, Request};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

pub fn router(coordinator: Arc<Coordinator>) -> Router {
    Router::new()
        .route("/message", post(message))
        .route("/events", post(events))
        .route("/surfaces", get(surfaces))
        .route("/health", get(health))
        .layer(
            ServiceBuilder::new().layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        )
        .with_state(coordinator)
}

async fn message(State(coordinator): State<Arc<Coordinator>>, body: Bytes) -> Json<Reply> {
    match Request::from_slice(&body) {
        Ok(request) => Json(coordinator.handle(request).await),
        Err(e) => {
            increment_request_errors("malformed");
            Json(e.into())
        }
    }
}

async fn events(
    State(coordinator): State<Arc<Coordinator>>,
    body: Bytes,
) -> (StatusCode, Json<Reply>) {
    let notice: EventNotice = match serde_json::from_slice(&body) {
        Ok(notice) => notice,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(Error::invalid_input(e.to_string()).into()),
            );
        }
    };

    match coordinator.notify(notice.into()).await {
        Ok(()) => (StatusCode::ACCEPTED, Json(Reply::ok())),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, Json(e.into())),
    }
}

async fn surfaces(State(coordinator): State<Arc<Coordinator>>) -> Json<Vec<SurfaceInfo>> {
    Json(coordinator.surfaces())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::config::{CliArgs, ServerConfig};
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use clap::Parser;
    use tower::ServiceExt;

    fn app() -> Router {
        let dir = std::env::temp_dir().join(format!("courier-routes-{}", std::process::id()));
        let args = CliArgs::try_parse_from([
            "courier-server",
            "--session-ttl-secs",
            "0",
            "--job-ttl-secs",
            "0",
            "--download-dir",
            dir.to_str().unwrap(),
        ])
        .unwrap();
        router(Arc::new(Coordinator::new(
            ServerConfig::try_from(args).unwrap(),
        )))
    }

    async fn call(app: Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn message_dispatches_requests() {
        let (status, body) = call(
            app(),
            "POST",
            "/message",
            json!({ "action": "openUploadSession", "chunkSize": 10 }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["chunkSize"], json!(10));
        assert_eq!(body["token"].as_str().map(str::len), Some(32));
    }

    #[tokio::test]
    async fn malformed_messages_get_an_error_reply() {
        let (status, body) = call(app(), "POST", "/message", json!({ "action": "teleport" })).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["error"].as_str().unwrap().starts_with("Invalid input"));
    }

    #[tokio::test]
    async fn events_accept_notices_and_reject_garbage() {
        let app = app();
        let (status, body) = call(
            app.clone(),
            "POST",
            "/events",
            json!({ "event": "surfaceRemoved", "tabId": 3 }),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body, json!({ "success": true }));

        let (status, body) = call(app, "POST", "/events", json!({ "event": "reboot" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn health_and_surfaces() {
        let app = app();
        let (status, body) = call(app.clone(), "GET", "/health", Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "ok" }));

        let (status, body) = call(app, "GET", "/surfaces", Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));
    }
}
