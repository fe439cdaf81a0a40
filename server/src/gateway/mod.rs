//! HTTP and WebSocket entry points of the jam service.

use std::sync::Arc;

use axum::{
    extract::{
        rejection::JsonRejection,
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        Path, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info};

use crate::{
    collaborators::IdentityProvider,
    error::{JamError, JamResult},
    room_manager::RoomManager,
    session,
};

/// Longest room id accepted on the join route
const MAX_ROOM_ID_LEN: usize = 64;

/// Shared state of the axum handlers
#[derive(Clone)]
pub struct AppState {
    pub room_manager: Arc<RoomManager>,
    pub identity: Arc<dyn IdentityProvider>,
    /// Cancelled when the process shuts down, every session watches a child of it
    pub shutdown: CancellationToken,
    /// Tracks live sessions so shutdown can wait for their teardown
    pub sessions: TaskTracker,
    pub max_frame_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    pub track_id: String,
    #[serde(default)]
    pub position: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomResponse {
    pub room_id: String,
    pub host_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub rooms: usize,
    pub connections: usize,
}

/// Build the router with all routes
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/jam", post(create_room))
        .route("/jam/", get(missing_room_id))
        .route("/jam/{room_id}", get(join_room))
        .route("/health", get(health))
        .with_state(state)
}

/// Serve `router(state)` on `listener` until the shutdown token is cancelled
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    let shutdown = state.shutdown.clone();

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

/// Room ids are the url safe ids handed out by the registry
pub fn is_valid_room_id(room_id: &str) -> bool {
    !room_id.is_empty()
        && room_id.len() <= MAX_ROOM_ID_LEN
        && room_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> JamResult<String> {
    state
        .identity
        .user_from_headers(headers)
        .ok_or(JamError::Unauthorized)
}

/// `POST /jam`, the caller becomes the host of a new room
async fn create_room(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<CreateRoomRequest>, JsonRejection>,
) -> JamResult<(StatusCode, Json<CreateRoomResponse>)> {
    let host_id = authenticate(&state, &headers)?;
    let Json(request) = body.map_err(|e| JamError::Validation(e.body_text()))?;

    let room_id = state
        .room_manager
        .create_room(&host_id, &request.track_id, request.position)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateRoomResponse { room_id, host_id }),
    ))
}

async fn missing_room_id(State(state): State<AppState>, headers: HeaderMap) -> JamError {
    match authenticate(&state, &headers) {
        Ok(_) => JamError::MissingRoomId,
        Err(e) => e,
    }
}

/// `GET /jam/{roomId}`, upgrades to a WebSocket bound to the room.
///
/// Identity, room id and room existence are checked before the upgrade so a
/// rejected client gets a plain HTTP status.
async fn join_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let user_id = match authenticate(&state, &headers) {
        Ok(user_id) => user_id,
        Err(e) => return e.into_response(),
    };
    if !is_valid_room_id(&room_id) {
        return JamError::MissingRoomId.into_response();
    }
    if !state.room_manager.contains(&room_id).await {
        debug!(room_id = %room_id, user_id = %user_id, "join of unknown room");
        return JamError::NotFound.into_response();
    }
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    info!(room_id = %room_id, user_id = %user_id, "upgrading jam connection");

    let AppState {
        room_manager,
        shutdown,
        sessions,
        max_frame_bytes,
        ..
    } = state;

    ws.max_frame_size(max_frame_bytes)
        .max_message_size(max_frame_bytes)
        .on_upgrade(move |socket| {
            sessions.track_future(session::handle_jam_session(
                room_manager,
                socket,
                room_id,
                user_id,
                shutdown,
            ))
        })
}

/// `GET /health`
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: String::from("ok"),
        rooms: state.room_manager.room_count().await,
        connections: state.room_manager.connection_count().await,
    })
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    use super::*;
    use crate::{
        collaborators::{HeaderIdentityProvider, StaticTrackResolver, TrackResolver},
        room_manager::RoomSettings,
    };

    struct BrokenCatalog;

    #[async_trait]
    impl TrackResolver for BrokenCatalog {
        async fn exists(&self, _track_id: &str) -> anyhow::Result<bool> {
            Err(anyhow::anyhow!("catalog is down"))
        }
    }

    fn state_with(track_resolver: Arc<dyn TrackResolver>) -> AppState {
        AppState {
            room_manager: Arc::new(RoomManager::new(track_resolver, RoomSettings::default())),
            identity: Arc::new(HeaderIdentityProvider::default()),
            shutdown: CancellationToken::new(),
            sessions: TaskTracker::new(),
            max_frame_bytes: 64 * 1024,
        }
    }

    fn state() -> AppState {
        state_with(Arc::new(StaticTrackResolver::new(["t1"])))
    }

    fn create_request(user_id: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/jam")
            .header("content-type", "application/json");
        if let Some(user_id) = user_id {
            builder = builder.header("x-user-id", user_id);
        }
        builder.body(Body::from(body.to_owned())).unwrap()
    }

    fn join_request(room_id: &str, user_id: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(format!("/jam/{}", room_id));
        if let Some(user_id) = user_id {
            builder = builder.header("x-user-id", user_id);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn json_body<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let body = axum::body::to_bytes(response.into_body(), 10_000)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn create_room_returns_the_room_and_host() {
        let state = state();
        let app = router(state.clone());

        let response = app
            .oneshot(create_request(Some("alice"), r#"{"trackId":"t1","position":0}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let created: CreateRoomResponse = json_body(response).await;
        assert_eq!(created.host_id, "alice");
        assert!(is_valid_room_id(&created.room_id));
        assert!(state.room_manager.contains(&created.room_id).await);
    }

    #[tokio::test]
    async fn create_room_requires_identity() {
        let response = router(state())
            .oneshot(create_request(None, r#"{"trackId":"t1"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn create_room_rejects_bad_input() {
        for body in [r#"{"trackId":"#, r#"{"position":1}"#, r#"{"trackId":""}"#] {
            let response = router(state())
                .oneshot(create_request(Some("alice"), body))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body: {}", body);
        }
    }

    #[tokio::test]
    async fn create_room_with_unknown_track_is_not_found() {
        let response = router(state())
            .oneshot(create_request(Some("alice"), r#"{"trackId":"t9"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body: serde_json::Value = json_body(response).await;
        assert_eq!(body["code"], "TRACK_NOT_FOUND");
    }

    #[tokio::test]
    async fn catalog_failure_is_a_bad_gateway() {
        let response = router(state_with(Arc::new(BrokenCatalog)))
            .oneshot(create_request(Some("alice"), r#"{"trackId":"t1"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn join_requires_identity() {
        let state = state();
        let room_id = state.room_manager.create_room("alice", "t1", 0).await.unwrap();

        let response = router(state).oneshot(join_request(&room_id, None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn join_with_malformed_room_id_is_rejected() {
        for path in ["/jam/", "/jam/not!valid"] {
            let request = Request::builder()
                .uri(path)
                .header("x-user-id", "bob")
                .body(Body::empty())
                .unwrap();

            let response = router(state()).oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "path: {}", path);

            let body: serde_json::Value = json_body(response).await;
            assert_eq!(body["code"], "MISSING_ROOM_ID");
        }
    }

    #[tokio::test]
    async fn join_of_unknown_room_is_not_found() {
        let state = state();

        let response = router(state.clone())
            .oneshot(join_request("doesNotExist", Some("bob")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(state.room_manager.room_count().await, 0);
    }

    #[tokio::test]
    async fn join_of_existing_room_needs_a_websocket() {
        let state = state();
        let room_id = state.room_manager.create_room("alice", "t1", 0).await.unwrap();

        let response = router(state)
            .oneshot(join_request(&room_id, Some("bob")))
            .await
            .unwrap();

        assert!(response.status().is_client_error());
        assert_ne!(response.status(), StatusCode::NOT_FOUND);
        assert_ne!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn health_reports_gauges() {
        let state = state();
        state.room_manager.create_room("alice", "t1", 0).await.unwrap();

        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let health: HealthResponse = json_body(response).await;
        assert_eq!(
            health,
            HealthResponse {
                status: "ok".into(),
                rooms: 1,
                connections: 0,
            }
        );
    }

    #[test]
    fn room_ids_are_url_safe() {
        assert!(is_valid_room_id("V1StGXR8_Z5jdHi6B-myT"));
        assert!(!is_valid_room_id(""));
        assert!(!is_valid_room_id("a/b"));
        assert!(!is_valid_room_id("room id"));
        assert!(!is_valid_room_id(&"a".repeat(MAX_ROOM_ID_LEN + 1)));
    }
}
