//! HTTP routes: the lobby handshake, health/status probes and the
//! WebSocket upgrade.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::protocol::err_code;
use crate::server::actor::{ServerHandle, ServerStopped};
use crate::server::{CreateRoomParams, EnterRoomParams, HandshakeError};
use crate::ws::connection::ws_handler;

#[derive(Clone)]
pub struct AppState {
    pub server: ServerHandle,
    pub server_id: String,
    pub next_conn: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(server: ServerHandle, server_id: String) -> Self {
        Self { server, server_id, next_conn: Arc::new(AtomicU64::new(1)) }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/create_room", get(create_room).post(create_room))
        .route("/enter_room", get(enter_room).post(enter_room))
        .route("/is_room_running", get(is_room_running).post(is_room_running))
        .route("/is_room_runing", get(is_room_running).post(is_room_running))
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/game", get(ws_handler))
        .with_state(state)
}

fn rejected(err: HandshakeError) -> Response {
    Json(json!({ "errcode": err.errcode(), "errmsg": err.to_string() })).into_response()
}

fn unavailable(err: ServerStopped) -> Response {
    (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "errcode": err_code::UNKNOWN, "errmsg": err.to_string() })))
        .into_response()
}

pub async fn create_room(State(state): State<AppState>, Query(params): Query<CreateRoomParams>) -> Response {
    match state.server.create_room(params).await {
        Ok(Ok(room_id)) => Json(json!({ "errcode": err_code::OK, "roomid": room_id })).into_response(),
        Ok(Err(err)) => rejected(err),
        Err(err) => unavailable(err),
    }
}

pub async fn enter_room(State(state): State<AppState>, Query(params): Query<EnterRoomParams>) -> Response {
    match state.server.enter_room(params).await {
        Ok(Ok(token)) => Json(json!({ "errcode": err_code::OK, "token": token })).into_response(),
        Ok(Err(err)) => rejected(err),
        Err(err) => unavailable(err),
    }
}

#[derive(Deserialize)]
pub struct RoomQuery {
    #[serde(default)]
    pub roomid: String,
}

pub async fn is_room_running(State(state): State<AppState>, Query(RoomQuery { roomid }): Query<RoomQuery>) -> Response {
    match state.server.is_room_running(roomid).await {
        // `runing` is what existing lobbies read.
        Ok(running) => Json(json!({ "errcode": err_code::OK, "running": running, "runing": running })).into_response(),
        Err(err) => unavailable(err),
    }
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "errcode": err_code::OK, "status": "UP", "serverId": state.server_id }))
}

pub async fn status(State(state): State<AppState>) -> Response {
    match state.server.status().await {
        Ok(s) => Json(json!({
            "errcode": err_code::OK,
            "serverId": s.server_id,
            "rooms": s.rooms,
            "players": s.players,
            "load": s.load,
        }))
        .into_response(),
        Err(err) => unavailable(err),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use super::*;
    use crate::game::doudizhu4::Doudizhu4;
    use crate::server::{actor, GameServer, ServerSettings};
    use crate::settlement::{AccountClient, SettlementError, SettlementReporter, SettlementTask};
    use crate::util::sign::{SignScheme, Signer};

    const SECRET: &str = "k";

    struct NullAccount;

    #[async_trait]
    impl AccountClient for NullAccount {
        async fn settle(&self, _task: &SettlementTask) -> Result<(), SettlementError> {
            Ok(())
        }
    }

    fn app() -> (Router, CancellationToken) {
        let settings = ServerSettings {
            server_id: "10.0.0.5:9001".into(),
            token_ttl: Duration::from_secs(60),
            room_idle: Duration::from_secs(60),
            trusteeship_timeout: None,
        };
        let server = GameServer::new(
            Doudizhu4::with_seed("doudizhu4", 1),
            Signer::new(SignScheme::Md5Suffix, SECRET),
            SettlementReporter::new(Arc::new(NullAccount)),
            settings,
        );
        let shutdown = CancellationToken::new();
        let (handle, _task) = actor::spawn(server, Duration::from_secs(60), shutdown.clone());
        (router(AppState::new(handle, "10.0.0.5:9001".into())), shutdown)
    }

    async fn call(app: &Router, method: &str, uri: &str) -> (StatusCode, Value) {
        let req = Request::builder().method(method).uri(uri).body(Body::empty()).expect("request");
        let resp = app.clone().oneshot(req).await.expect("response");
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.expect("body");
        (status, serde_json::from_slice(&bytes).expect("json"))
    }

    fn sign(parts: &[&str]) -> String {
        Signer::new(SignScheme::Md5Suffix, SECRET).sign(parts)
    }

    #[tokio::test]
    async fn health_reports_server_id() {
        let (app, _shutdown) = app();
        let (status, body) = call(&app, "GET", "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "errcode": 0, "status": "UP", "serverId": "10.0.0.5:9001" }));
    }

    #[tokio::test]
    async fn handshake_creates_enters_and_reports_rooms() {
        let (app, _shutdown) = app();

        let uri = format!("/create_room?userid=1&roomid=r1&sign={}", sign(&["1", "r1", "{}"]));
        let (_, body) = call(&app, "POST", &uri).await;
        assert_eq!(body, json!({ "errcode": 0, "roomid": "r1" }));

        let uri = format!("/enter_room?userid=7&name=seven&roomid=r1&sign={}", sign(&["7", "seven", "r1"]));
        let (_, body) = call(&app, "GET", &uri).await;
        assert_eq!(body["errcode"], 0);
        assert!(body["token"].as_str().is_some_and(|t| t.starts_with("7_r1_")));

        let (_, body) = call(&app, "GET", "/is_room_runing?roomid=r1").await;
        assert_eq!(body["runing"], true);
        let (_, body) = call(&app, "GET", "/is_room_running?roomid=r2").await;
        assert_eq!(body["running"], false);

        let (_, body) = call(&app, "GET", "/status").await;
        assert_eq!(body["rooms"], 1);
        assert_eq!(body["players"], 1);
        assert_eq!(body["load"], 11);
    }

    #[tokio::test]
    async fn handshake_errors_carry_errcodes() {
        let (app, _shutdown) = app();
        let (status, body) = call(&app, "GET", "/create_room?userid=1&sign=bad").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["errcode"], -1);

        let uri = format!("/enter_room?userid=7&name=seven&roomid=nope&sign={}", sign(&["7", "seven", "nope"]));
        let (_, body) = call(&app, "GET", &uri).await;
        assert_eq!(body["errcode"], err_code::ROOM_NOT_FOUND);
        assert!(body.get("token").is_none());
    }

    #[tokio::test]
    async fn stopped_server_answers_unavailable() {
        let (app, shutdown) = app();
        shutdown.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let (status, body) = call(&app, "GET", "/status").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["errcode"], err_code::UNKNOWN);
    }
}
