//! HTTP route definitions

use axum::{
    extract::{Path, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Serialize;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use uuid::Uuid;

use crate::app::AppState;
use crate::error::EngineError;
use crate::matchmaking::room::RoomInfo;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

/// Upper bound for plain HTTP requests; upgraded sockets are not affected
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // CORS configuration - support multiple origins (comma-separated in CLIENT_ORIGIN)
    let allowed_origins: Vec<header::HeaderValue> = state
        .config
        .client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
        .collect();

    // No configured origins means any origin may connect
    let origin: AllowOrigin = if allowed_origins.is_empty() {
        Any.into()
    } else {
        allowed_origins.into()
    };

    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_handler))
        .route("/rooms", get(rooms_handler))
        .route("/rooms/:room_id", get(room_handler))
        .route("/ws", get(ws_handler))
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_games: usize,
    waiting_rooms: usize,
    sessions: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_games: state.manager.game_count(),
        waiting_rooms: state.manager.room_count(),
        sessions: state.manager.session_count(),
    })
}

// ============================================================================
// Room endpoints
// ============================================================================

#[derive(Serialize)]
struct RoomsResponse {
    rooms: Vec<RoomInfo>,
}

async fn rooms_handler(State(state): State<AppState>) -> Json<RoomsResponse> {
    Json(RoomsResponse {
        rooms: state.manager.list_rooms(),
    })
}

async fn room_handler(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
) -> Result<Json<RoomInfo>, AppError> {
    let room = state
        .manager
        .find_room(&room_id)
        .ok_or_else(|| EngineError::not_found(format!("waiting room {room_id}")))?;
    Ok(Json(room.info()))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NotFound(msg) => AppError::NotFound(msg),
            EngineError::InvalidState(msg) => AppError::BadRequest(msg),
            EngineError::AlreadyExists(msg) => AppError::Conflict(msg),
            EngineError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, GameSettings};
    use crate::matchmaking::ledger::{atoms, InMemoryLedger};
    use crate::matchmaking::player::PlayerId;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_state() -> (AppState, Arc<InMemoryLedger>) {
        let config = Config {
            server_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "debug".to_string(),
            client_origin: String::new(),
            game: GameSettings::default(),
        };
        let ledger = Arc::new(InMemoryLedger::new());
        (AppState::new(config, ledger.clone()), ledger)
    }

    async fn get_json(router: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health_reports_counts() {
        let (state, _) = test_state();
        let (status, body) = get_json(build_router(state), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["active_games"], 0);
        assert_eq!(body["waiting_rooms"], 0);
    }

    #[tokio::test]
    async fn test_rooms_lists_open_rooms() {
        let (state, ledger) = test_state();
        let host = PlayerId::new([5; 32]);
        state.manager.connect(host, "erin");
        ledger.reserve(host, atoms(0.5));
        let room = state.manager.create_waiting_room(&host, atoms(0.5)).unwrap();

        let (status, body) = get_json(build_router(state.clone()), "/rooms").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rooms"].as_array().unwrap().len(), 1);
        assert_eq!(body["rooms"][0]["host_id"], host.to_string());

        let (status, body) = get_json(build_router(state.clone()), &format!("/rooms/{}", room.id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["bet_amount"], atoms(0.5));

        state.manager.shutdown();
    }

    #[tokio::test]
    async fn test_unknown_room_is_404() {
        let (state, _) = test_state();
        let (status, body) = get_json(build_router(state), &format!("/rooms/{}", Uuid::new_v4())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().starts_with("waiting room"));
    }

    #[test]
    fn test_engine_error_status_mapping() {
        let response = AppError::from(EngineError::invalid_state("nope")).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let response = AppError::from(EngineError::internal("boom")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
