//! HTTP surface: the websocket route plus read-only endpoints.
//!
//! `GET /api/rooms/{code}` returns the same snapshot as the `get_room_info`
//! socket message, for clients that rehydrate before their socket is up.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::error::RoomError;
use crate::protocol::{ServerMessage, PROTOCOL_VERSION};
use crate::state::AppState;
use crate::ws;

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub protocol: &'static str,
    pub rooms: usize,
}

/// Build the application router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(health))
        .route("/api/rooms/{code}", get(get_room))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Liveness check.
///
/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        protocol: PROTOCOL_VERSION,
        rooms: state.room_count().await,
    })
}

/// Rehydration over HTTP.
///
/// GET /api/rooms/{code}
pub async fn get_room(State(state): State<Arc<AppState>>, Path(code): Path<String>) -> Response {
    match state.get_room_info(&code).await {
        Ok(room) => Json(room).into_response(),
        Err(e) => {
            let status = match e {
                RoomError::RoomNotFound(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::BAD_REQUEST,
            };
            (status, Json(ServerMessage::from(e))).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let state = Arc::new(AppState::default());
        let response = router(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["rooms"], 0);
    }

    #[tokio::test]
    async fn test_get_room_snapshot() {
        let state = Arc::new(AppState::default());
        let host = state.create_room("Ash", None).await.unwrap();
        let uri = format!("/api/rooms/{}", host.room_code.to_lowercase());

        let response = router(state)
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["room_code"], host.room_code);
        assert_eq!(json["state"], "LOBBY");
        assert_eq!(json["players"][0]["name"], "Ash");
    }

    #[tokio::test]
    async fn test_get_missing_room() {
        let state = Arc::new(AppState::default());
        let response = router(state)
            .oneshot(Request::get("/api/rooms/NOPE").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["code"], "RoomNotFound");
    }
}
