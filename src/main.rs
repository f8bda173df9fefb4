use std::sync::Arc;

use anyhow::Context;
use axum::http::{self, header};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::{Any, CorsLayer}, trace::TraceLayer};
use tracing::info;

use roomgame::config::Config;
use roomgame::game::doudizhu4::Doudizhu4;
use roomgame::http::routes::{self, AppState};
use roomgame::lobby::{self, HttpLobbyClient, LoadProbe, LobbyClient, Registration};
use roomgame::server::{actor, GameServer, ServerSettings};
use roomgame::settlement::{HttpAccountClient, SettlementReporter};
use roomgame::telemetry;
use roomgame::util::sign::Signer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();

    let cfg = Config::from_env();
    if cfg.hall_pri_key.is_empty() {
        tracing::warn!("HALL_PRI_KEY is empty; handshake signatures carry no secret");
    }
    info!(server_id = %cfg.server_id(), game_type = %cfg.game_type, "starting");

    let shutdown = CancellationToken::new();

    let account = HttpAccountClient::new(&cfg.account_url, cfg.http_timeout).context("building account client")?;
    let settlement = SettlementReporter::new(Arc::new(account));
    let settle_loop = settlement.spawn_retry_loop(cfg.settle_retry_interval, shutdown.clone());

    let engine = Doudizhu4::new(cfg.game_type.clone()).with_max_redeals(cfg.max_redeals);
    let signer = Signer::new(cfg.sign_scheme, cfg.hall_pri_key.clone());
    let server = GameServer::new(engine, signer, settlement, ServerSettings::from_config(&cfg));
    let (handle, server_task) = actor::spawn(server, cfg.sweep_interval, shutdown.clone());

    let addr = cfg.server_addr();
    let listener = TcpListener::bind(addr).await.with_context(|| format!("binding {addr}"))?;
    info!(%addr, "listening");

    let lobby_client: Arc<dyn LobbyClient> =
        Arc::new(HttpLobbyClient::new(&cfg.hall_url, cfg.http_timeout).context("building lobby client")?);
    let registration = Registration {
        client_ip: cfg.client_ip.clone(),
        client_port: cfg.ws_port,
        http_port: cfg.port,
        game_type: cfg.game_type.clone(),
    };
    let probe: Arc<dyn LoadProbe> = Arc::new(handle.clone());
    let register = tokio::spawn({
        let (client, registration, probe) = (lobby_client.clone(), registration.clone(), probe.clone());
        let (attempts, backoff) = (cfg.register_attempts, cfg.register_backoff);
        async move {
            if let Err(err) =
                lobby::register_with_retry(client.as_ref(), &registration, probe.as_ref(), attempts, backoff).await
            {
                tracing::error!(error = %err, "lobby registration failed; heartbeat will keep retrying");
            }
        }
    });
    let heartbeat =
        lobby::spawn_heartbeat_loop(lobby_client, registration, probe, cfg.heartbeat_interval, shutdown.clone());

    let app = routes::router(AppState::new(handle, cfg.server_id()))
        .layer(
            CorsLayer::new()
                .allow_methods([http::Method::GET, http::Method::POST])
                .allow_headers([header::CONTENT_TYPE])
                .allow_origin(Any),
        )
        .layer(TraceLayer::new_for_http());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("serving")?;

    shutdown.cancel();
    register.abort();
    let _ = tokio::join!(heartbeat, settle_loop, server_task);
    info!("bye");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(err) = res {
                tracing::warn!(error = %err, "cannot listen for ctrl-c");
                return shutdown.cancelled().await;
            }
            info!("shutdown requested");
        }
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();
}
