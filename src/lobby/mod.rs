//! Registration and heartbeat against the lobby (hall) service.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;

/// Placement weight reported to the lobby: rooms count ten times a player.
pub fn compute_load(rooms: usize, players: usize) -> u32 {
    let load = rooms.saturating_mul(10).saturating_add(players);
    u32::try_from(load).unwrap_or(u32::MAX)
}

/// How this server advertises itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub client_ip: String,
    pub client_port: u16,
    pub http_port: u16,
    pub game_type: String,
}

impl Registration {
    pub fn server_id(&self) -> String {
        format!("{}:{}", self.client_ip, self.client_port)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum LobbyError {
    #[error("lobby unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("lobby answered HTTP {0}")]
    Status(u16),
    #[error("gave up registering after {attempts} attempts")]
    GaveUp { attempts: u32 },
}

#[async_trait]
pub trait LobbyClient: Send + Sync {
    async fn register(&self, reg: &Registration, load: u32) -> Result<(), LobbyError>;
    async fn heartbeat(&self, server_id: &str, load: u32) -> Result<(), LobbyError>;
}

/// Current load, read from whoever owns the rooms.
#[async_trait]
pub trait LoadProbe: Send + Sync {
    async fn load(&self) -> u32;
}

pub struct HttpLobbyClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpLobbyClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, LobbyError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string() })
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<(), LobbyError> {
        let resp = self.client.get(format!("{}{path}", self.base_url)).query(query).send().await?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(LobbyError::Status(status.as_u16()))
        }
    }
}

#[async_trait]
impl LobbyClient for HttpLobbyClient {
    async fn register(&self, reg: &Registration, load: u32) -> Result<(), LobbyError> {
        self.get(
            "/register_gs",
            &[
                ("clientip", reg.client_ip.clone()),
                ("clientport", reg.client_port.to_string()),
                ("httpPort", reg.http_port.to_string()),
                ("load", load.to_string()),
                ("gameType", reg.game_type.clone()),
            ],
        )
        .await
    }

    async fn heartbeat(&self, server_id: &str, load: u32) -> Result<(), LobbyError> {
        self.get("/heartbeat", &[("id", server_id.to_string()), ("load", load.to_string())]).await
    }
}

/// Register with a fixed delay between attempts, giving up after `attempts`.
pub async fn register_with_retry(
    client: &dyn LobbyClient,
    reg: &Registration,
    probe: &dyn LoadProbe,
    attempts: u32,
    backoff: Duration,
) -> Result<(), LobbyError> {
    let attempts = attempts.max(1);
    for attempt in 1..=attempts {
        match client.register(reg, probe.load().await).await {
            Ok(()) => {
                tracing::info!(server_id = %reg.server_id(), attempt, "registered with lobby");
                return Ok(());
            }
            Err(err) => {
                tracing::warn!(attempt, attempts, error = %err, "lobby registration failed");
                if attempt < attempts {
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
    Err(LobbyError::GaveUp { attempts })
}

/// Heartbeat on a fixed interval; a failed heartbeat re-registers at once.
pub fn spawn_heartbeat_loop(
    client: Arc<dyn LobbyClient>,
    reg: Registration,
    probe: Arc<dyn LoadProbe>,
    every: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let server_id = reg.server_id();
        let every = every.max(Duration::from_millis(1));
        let mut ticker = interval_at(Instant::now() + every, every);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let load = probe.load().await;
                    if let Err(err) = client.heartbeat(&server_id, load).await {
                        tracing::warn!(error = %err, "lobby heartbeat failed, re-registering");
                        if let Err(err) = client.register(&reg, load).await {
                            tracing::warn!(error = %err, "lobby re-registration failed");
                        }
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use axum::{extract::Query, routing::get, Router};
    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    struct StubLobby {
        register_failures: AtomicU32,
        heartbeat_down: AtomicBool,
        registrations: AtomicU32,
        heartbeats: Mutex<Vec<(String, u32)>>,
    }

    #[async_trait]
    impl LobbyClient for StubLobby {
        async fn register(&self, _reg: &Registration, _load: u32) -> Result<(), LobbyError> {
            self.registrations.fetch_add(1, Ordering::SeqCst);
            let left = self.register_failures.load(Ordering::SeqCst);
            if left > 0 {
                self.register_failures.store(left - 1, Ordering::SeqCst);
                return Err(LobbyError::Status(502));
            }
            Ok(())
        }

        async fn heartbeat(&self, server_id: &str, load: u32) -> Result<(), LobbyError> {
            self.heartbeats.lock().push((server_id.to_string(), load));
            if self.heartbeat_down.load(Ordering::SeqCst) {
                return Err(LobbyError::Status(503));
            }
            Ok(())
        }
    }

    struct FixedLoad(u32);

    #[async_trait]
    impl LoadProbe for FixedLoad {
        async fn load(&self) -> u32 {
            self.0
        }
    }

    fn registration() -> Registration {
        Registration {
            client_ip: "10.0.0.5".into(),
            client_port: 9001,
            http_port: 9001,
            game_type: "doudizhu4".into(),
        }
    }

    #[test]
    fn load_weights_rooms_over_players() {
        assert_eq!(compute_load(0, 0), 0);
        assert_eq!(compute_load(3, 7), 37);
        assert_eq!(compute_load(usize::MAX, 1), u32::MAX);
    }

    #[tokio::test]
    async fn registration_retries_then_succeeds() {
        let lobby = StubLobby { register_failures: AtomicU32::new(2), ..Default::default() };
        register_with_retry(&lobby, &registration(), &FixedLoad(0), 5, Duration::ZERO)
            .await
            .expect("registered");
        assert_eq!(lobby.registrations.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn registration_gives_up_after_bounded_attempts() {
        let lobby = StubLobby { register_failures: AtomicU32::new(10), ..Default::default() };
        let err = register_with_retry(&lobby, &registration(), &FixedLoad(0), 3, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, LobbyError::GaveUp { attempts: 3 }));
        assert_eq!(lobby.registrations.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn failed_heartbeat_triggers_reregistration() {
        let lobby = Arc::new(StubLobby::default());
        lobby.heartbeat_down.store(true, Ordering::SeqCst);
        let shutdown = CancellationToken::new();
        let handle = spawn_heartbeat_loop(
            lobby.clone(),
            registration(),
            Arc::new(FixedLoad(42)),
            Duration::from_millis(10),
            shutdown.clone(),
        );

        for _ in 0..100 {
            if lobby.registrations.load(Ordering::SeqCst) >= 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle).await.expect("loop exits").expect("join");

        assert!(lobby.registrations.load(Ordering::SeqCst) >= 1);
        let beats = lobby.heartbeats.lock();
        assert_eq!(beats[0], ("10.0.0.5:9001".to_string(), 42));
    }

    #[tokio::test]
    async fn http_client_sends_legacy_query_fields() {
        type Seen = Arc<Mutex<Vec<HashMap<String, String>>>>;
        let seen: Seen = Arc::default();
        let (reg_seen, beat_seen) = (seen.clone(), seen.clone());
        let app = Router::new()
            .route(
                "/register_gs",
                get(move |Query(q): Query<HashMap<String, String>>| async move {
                    reg_seen.lock().push(q);
                    "ok"
                }),
            )
            .route(
                "/heartbeat",
                get(move |Query(q): Query<HashMap<String, String>>| async move {
                    beat_seen.lock().push(q);
                    "ok"
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });

        let client = HttpLobbyClient::new(&format!("http://{addr}/"), Duration::from_secs(2)).expect("client");
        client.register(&registration(), 12).await.expect("register");
        client.heartbeat("10.0.0.5:9001", 13).await.expect("heartbeat");

        let seen = seen.lock();
        assert_eq!(seen[0]["clientip"], "10.0.0.5");
        assert_eq!(seen[0]["clientport"], "9001");
        assert_eq!(seen[0]["httpPort"], "9001");
        assert_eq!(seen[0]["load"], "12");
        assert_eq!(seen[0]["gameType"], "doudizhu4");
        assert_eq!(seen[1]["id"], "10.0.0.5:9001");
        assert_eq!(seen[1]["load"], "13");
    }
}
