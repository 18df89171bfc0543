// Module: http
// HTTP/WebSocket signaling surface for cast sessions

pub mod error;
pub mod health;
pub mod sessions;
pub mod webrtc;
pub mod websocket;

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use dimztube_core::service::webrtc::IceServerConfig;
use dimztube_core::service::SessionNegotiator;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub negotiator: SessionNegotiator,
    pub ice_servers: IceServerConfig,
}

impl AppState {
    pub fn new(negotiator: SessionNegotiator, ice_servers: IceServerConfig) -> Self {
        Self {
            negotiator,
            ice_servers,
        }
    }
}

/// Create the HTTP router with all routes
///
/// An empty `cors_origins` list allows any origin.
pub fn create_router(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .merge(health::create_health_router())
        .route("/api/cast/ice-servers", get(webrtc::get_ice_servers))
        .route("/api/cast/sessions", post(sessions::create_session))
        .route(
            "/api/cast/sessions/{id}",
            get(sessions::get_session).patch(sessions::update_session),
        )
        .route("/api/cast/sessions/{id}/command", post(sessions::send_command))
        .route(
            "/api/cast/sessions/{id}/candidates/{origin}",
            post(sessions::append_candidate),
        )
        .route("/api/cast/sessions/{id}/ws", get(websocket::session_feed))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(cors_origins)),
        )
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(allowed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use dimztube_core::store::MemoryStore;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> Router {
        let negotiator = SessionNegotiator::new(Arc::new(MemoryStore::new()));
        create_router(
            AppState::new(negotiator, IceServerConfig::default()),
            &[],
        )
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn create(app: &Router) -> String {
        let (status, body) = send(app, "POST", "/api/cast/sessions", None).await;
        assert_eq!(status, StatusCode::CREATED);
        body["sessionId"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_create_then_get_session() {
        let app = app();
        let id = create(&app).await;

        let (status, body) = send(&app, "GET", &format!("/api/cast/sessions/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "waiting");
        assert!(body["createdAt"].as_i64().unwrap() > 0);
        assert!(body.get("offer").is_none());
    }

    #[tokio::test]
    async fn test_unknown_session_is_404() {
        let (status, body) = send(&app(), "GET", "/api/cast/sessions/missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], 404);
    }

    #[tokio::test]
    async fn test_patch_offer_and_answer() {
        let app = app();
        let id = create(&app).await;
        let uri = format!("/api/cast/sessions/{id}");

        let (status, _) = send(
            &app,
            "PATCH",
            &uri,
            Some(json!({"offer": {"type": "offer", "sdp": "v=0"}})),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = send(
            &app,
            "PATCH",
            &uri,
            Some(json!({"answer": {"type": "answer", "sdp": "v=0"}, "status": "connecting"})),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, body) = send(&app, "GET", &uri, None).await;
        assert_eq!(body["offer"]["type"], "offer");
        assert_eq!(body["answer"]["type"], "answer");
        assert_eq!(body["status"], "connecting");
    }

    #[tokio::test]
    async fn test_empty_patch_rejected() {
        let app = app();
        let id = create(&app).await;
        let (status, _) = send(&app, "PATCH", &format!("/api/cast/sessions/{id}"), Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_mismatched_or_blank_description_rejected() {
        let app = app();
        let id = create(&app).await;
        let uri = format!("/api/cast/sessions/{id}");

        for patch in [
            json!({"offer": {"type": "answer", "sdp": "v=0"}}),
            json!({"answer": {"type": "offer", "sdp": "v=0"}}),
            json!({"answer": {"type": "pranswer", "sdp": "v=0"}}),
            json!({"offer": {"type": "offer", "sdp": ""}}),
            json!({"answer": {"type": "answer", "sdp": "  "}, "status": "connecting"}),
        ] {
            let (status, _) = send(&app, "PATCH", &uri, Some(patch.clone())).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{patch}");
        }

        // Nothing was written
        let (_, body) = send(&app, "GET", &uri, None).await;
        assert!(body.get("offer").is_none_or(Value::is_null));
        assert!(body.get("answer").is_none_or(Value::is_null));
        assert_eq!(body["status"], "waiting");
    }

    #[tokio::test]
    async fn test_command_is_stamped() {
        let app = app();
        let id = create(&app).await;

        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/cast/sessions/{id}/command"),
            Some(json!({"type": "seek", "payload": 12.5})),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, body) = send(&app, "GET", &format!("/api/cast/sessions/{id}"), None).await;
        assert_eq!(body["command"]["type"], "seek");
        assert_eq!(body["command"]["payload"], 12.5);
        assert!(body["command"]["timestamp"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_command_without_required_payload() {
        let app = app();
        let id = create(&app).await;
        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/cast/sessions/{id}/command"),
            Some(json!({"type": "volume"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_candidates_by_origin() {
        let app = app();
        let id = create(&app).await;
        let candidate = json!({"candidate": "candidate:1 1 udp 1 10.0.0.1 5000 typ host", "sdpMid": "0", "sdpMLineIndex": 0});

        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/cast/sessions/{id}/candidates/sender"),
            Some(candidate.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/cast/sessions/{id}/candidates/sideways"),
            Some(candidate.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        send(
            &app,
            "PATCH",
            &format!("/api/cast/sessions/{id}"),
            Some(json!({"status": "failed"})),
        )
        .await;
        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/cast/sessions/{id}/candidates/receiver"),
            Some(candidate),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_ice_servers() {
        let (status, body) = send(&app(), "GET", "/api/cast/ice-servers", None).await;
        assert_eq!(status, StatusCode::OK);
        let urls = body["servers"][0]["urls"].as_array().unwrap();
        assert!(urls.iter().all(|u| u.as_str().unwrap().starts_with("stun:")));
    }

    #[tokio::test]
    async fn test_feed_for_missing_session() {
        let (status, _) = send(&app(), "GET", "/api/cast/sessions/missing/ws", None).await;
        assert_ne!(status, StatusCode::SWITCHING_PROTOCOLS);
        assert!(status.is_client_error());
    }
}
