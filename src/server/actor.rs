//! Single task owning the [`GameServer`]; everything else holds a
//! [`ServerHandle`] and talks to it over a channel.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;

use super::{CreateRoomParams, EnterRoomParams, GameServer, HandshakeError, ServerStatus};
use crate::game::GameEngine;
use crate::lobby::LoadProbe;
use crate::session::{ConnId, Connection};

const EVENT_BUFFER: usize = 1024;
const TAKEOVER_CHECK_EVERY: Duration = Duration::from_secs(1);

pub enum ServerEvent {
    CreateRoom { params: CreateRoomParams, reply: oneshot::Sender<Result<String, HandshakeError>> },
    EnterRoom { params: EnterRoomParams, reply: oneshot::Sender<Result<String, HandshakeError>> },
    IsRoomRunning { room_id: String, reply: oneshot::Sender<bool> },
    Status { reply: oneshot::Sender<ServerStatus> },
    Frame { conn: Connection, text: String },
    Disconnected { conn: ConnId },
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("game server is not running")]
pub struct ServerStopped;

#[derive(Clone)]
pub struct ServerHandle {
    sender: mpsc::Sender<ServerEvent>,
}

impl ServerHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> ServerEvent) -> Result<T, ServerStopped> {
        let (reply, rx) = oneshot::channel();
        self.sender.send(make(reply)).await.map_err(|_| ServerStopped)?;
        rx.await.map_err(|_| ServerStopped)
    }

    pub async fn create_room(&self, params: CreateRoomParams) -> Result<Result<String, HandshakeError>, ServerStopped> {
        self.request(|reply| ServerEvent::CreateRoom { params, reply }).await
    }

    pub async fn enter_room(&self, params: EnterRoomParams) -> Result<Result<String, HandshakeError>, ServerStopped> {
        self.request(|reply| ServerEvent::EnterRoom { params, reply }).await
    }

    pub async fn is_room_running(&self, room_id: String) -> Result<bool, ServerStopped> {
        self.request(|reply| ServerEvent::IsRoomRunning { room_id, reply }).await
    }

    pub async fn status(&self) -> Result<ServerStatus, ServerStopped> {
        self.request(|reply| ServerEvent::Status { reply }).await
    }

    pub async fn frame(&self, conn: Connection, text: String) -> Result<(), ServerStopped> {
        self.sender.send(ServerEvent::Frame { conn, text }).await.map_err(|_| ServerStopped)
    }

    pub async fn disconnected(&self, conn: ConnId) -> Result<(), ServerStopped> {
        self.sender.send(ServerEvent::Disconnected { conn }).await.map_err(|_| ServerStopped)
    }
}

#[async_trait]
impl LoadProbe for ServerHandle {
    async fn load(&self) -> u32 {
        self.status().await.map(|s| s.load).unwrap_or_default()
    }
}

/// Run `server` on its own task until `shutdown` fires or every handle is
/// dropped. `sweep_every` paces room and token garbage collection; offline
/// seats are checked for takeover once a second.
pub fn spawn<E: GameEngine>(
    mut server: GameServer<E>,
    sweep_every: Duration,
    shutdown: CancellationToken,
) -> (ServerHandle, tokio::task::JoinHandle<()>) {
    let (sender, mut events) = mpsc::channel(EVENT_BUFFER);
    let task = tokio::spawn(async move {
        // A zero period would panic.
        let sweep_every = sweep_every.max(Duration::from_millis(1));
        let mut sweep = interval_at(Instant::now() + sweep_every, sweep_every);
        let mut takeover = interval_at(Instant::now() + TAKEOVER_CHECK_EVERY, TAKEOVER_CHECK_EVERY);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sweep.tick() => server.sweep(),
                _ = takeover.tick() => {
                    server.check_trusteeship();
                }
                event = events.recv() => match event {
                    Some(event) => dispatch(&mut server, event),
                    None => break,
                },
            }
        }
        tracing::info!("game server stopped");
    });
    (ServerHandle { sender }, task)
}

fn dispatch<E: GameEngine>(server: &mut GameServer<E>, event: ServerEvent) {
    match event {
        ServerEvent::CreateRoom { params, reply } => {
            let _ = reply.send(server.create_room(&params));
        }
        ServerEvent::EnterRoom { params, reply } => {
            let _ = reply.send(server.enter_room(&params));
        }
        ServerEvent::IsRoomRunning { room_id, reply } => {
            let _ = reply.send(server.is_room_running(&room_id));
        }
        ServerEvent::Status { reply } => {
            let _ = reply.send(server.status());
        }
        ServerEvent::Frame { conn, text } => server.handle_frame(&conn, &text),
        ServerEvent::Disconnected { conn } => server.on_disconnect(conn),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::game::doudizhu4::Doudizhu4;
    use crate::protocol::{cmd, err_code};
    use crate::server::ServerSettings;
    use crate::session::Outgoing;
    use crate::settlement::{AccountClient, SettlementError, SettlementReporter, SettlementTask};
    use crate::util::sign::{SignScheme, Signer};

    struct NullAccount;

    #[async_trait]
    impl AccountClient for NullAccount {
        async fn settle(&self, _task: &SettlementTask) -> Result<(), SettlementError> {
            Ok(())
        }
    }

    fn start(shutdown: CancellationToken) -> (ServerHandle, tokio::task::JoinHandle<()>) {
        let settings = ServerSettings {
            server_id: "10.0.0.5:9001".into(),
            token_ttl: Duration::from_secs(60),
            room_idle: Duration::from_secs(60),
            trusteeship_timeout: None,
        };
        let server = GameServer::new(
            Doudizhu4::with_seed("doudizhu4", 1),
            Signer::new(SignScheme::Md5Suffix, "k"),
            SettlementReporter::new(Arc::new(NullAccount)),
            settings,
        );
        spawn(server, Duration::from_secs(60), shutdown)
    }

    #[tokio::test]
    async fn handle_round_trips_through_the_actor() {
        let shutdown = CancellationToken::new();
        let (handle, task) = start(shutdown.clone());
        let signer = Signer::new(SignScheme::Md5Suffix, "k");

        let created = handle
            .create_room(CreateRoomParams {
                userid: "1".into(),
                roomid: Some("r1".into()),
                conf: None,
                sign: signer.sign(&["1", "r1", "{}"]),
            })
            .await
            .expect("actor");
        assert_eq!(created.as_deref(), Ok("r1"));
        assert!(handle.is_room_running("r1".into()).await.expect("actor"));

        let token = handle
            .enter_room(EnterRoomParams {
                userid: "7".into(),
                name: "seven".into(),
                roomid: "r1".into(),
                sign: signer.sign(&["7", "seven", "r1"]),
            })
            .await
            .expect("actor")
            .expect("token");
        assert_eq!(handle.load().await, 11);

        let (conn, mut rx) = Connection::channel(1);
        let login = serde_json::json!({ "cmd": cmd::LOGIN, "data": { "token": token } }).to_string();
        handle.frame(conn, login).await.expect("actor");
        match rx.recv().await {
            Some(Outgoing::Frame(msg)) => assert_eq!((msg.cmd, msg.code), (cmd::LOGIN, err_code::OK)),
            other => panic!("unexpected {other:?}"),
        }
        handle.disconnected(1).await.expect("actor");

        shutdown.cancel();
        task.await.expect("join");
        assert_eq!(handle.status().await, Err(ServerStopped));
    }
}
