//! WebSocket connection lifecycle: one reader loop feeding the server actor
//! and one writer task draining the connection's outgoing queue.

use std::sync::atomic::Ordering;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::{extract::State, response::IntoResponse};
use futures::{SinkExt, StreamExt};

use crate::http::routes::AppState;
use crate::server::actor::ServerHandle;
use crate::session::{ConnId, Connection, Outgoing};

pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let conn_id = state.next_conn.fetch_add(1, Ordering::Relaxed);
    ws.on_upgrade(move |socket| handle_socket(socket, state.server, conn_id))
}

async fn handle_socket(socket: WebSocket, server: ServerHandle, conn_id: ConnId) {
    let (mut sink, mut stream) = socket.split();
    let (conn, mut outgoing) = Connection::channel(conn_id);
    tracing::debug!(conn = conn_id, "ws opened");

    let writer = tokio::spawn(async move {
        while let Some(item) = outgoing.recv().await {
            match item {
                Outgoing::Frame(msg) => {
                    let text = match serde_json::to_string(&msg) {
                        Ok(text) => text,
                        Err(err) => {
                            tracing::warn!(conn = conn_id, error = %err, "unencodable frame dropped");
                            continue;
                        }
                    };
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Outgoing::Close => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if server.frame(conn.clone(), text).await.is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
        // Evicted by a newer login.
        if !conn.is_open() {
            break;
        }
    }

    let _ = server.disconnected(conn_id).await;
    // The writer ends once the registry lets go of its copy as well.
    drop(conn);
    let _ = writer.await;
    tracing::debug!(conn = conn_id, "ws closed");
}
