//! The dispatcher: lobby handshake, WebSocket command routing and the
//! glue between sessions, rooms and the pluggable game engine.
//!
//! A `GameServer` is plain single-threaded state. [`actor::spawn`] moves it
//! onto one task so every HTTP request, socket frame and sweep tick is
//! applied one at a time.

pub mod actor;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::Config;
use crate::game::{CommandOutcome, GameEngine, Outbox};
use crate::lobby::compute_load;
use crate::protocol::{cmd, err_code, Inbound, Outbound, UserId};
use crate::room::manager::{RoomError, RoomManager};
use crate::session::{ConnId, Connection, SessionError, SessionRegistry};
use crate::settlement::SettlementReporter;
use crate::util::id::new_room_id;
use crate::util::sign::Signer;

/// Query fields of `create_room`, as the lobby sends them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateRoomParams {
    #[serde(default)]
    pub userid: String,
    pub roomid: Option<String>,
    pub conf: Option<String>,
    #[serde(default)]
    pub sign: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnterRoomParams {
    #[serde(default)]
    pub userid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub roomid: String,
    #[serde(default)]
    pub sign: String,
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("userid is not a number")]
    InvalidUserId,
    #[error(transparent)]
    Room(#[from] RoomError),
}

impl HandshakeError {
    pub fn errcode(&self) -> i32 {
        match self {
            Self::InvalidSignature => err_code::INVALID_SIGNATURE,
            Self::InvalidUserId => err_code::UNKNOWN,
            Self::Room(RoomError::NotFound) => err_code::ROOM_NOT_FOUND,
            Self::Room(RoomError::Full) => err_code::ROOM_FULL,
            Self::Room(RoomError::NotSeated) => err_code::ROOM_NOT_IN,
            Self::Room(RoomError::AlreadyInRoom) => err_code::ROOM_ALREADY_IN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub server_id: String,
    pub rooms: usize,
    pub players: usize,
    pub load: u32,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub server_id: String,
    pub token_ttl: Duration,
    pub room_idle: Duration,
    pub trusteeship_timeout: Option<Duration>,
}

impl ServerSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            server_id: cfg.server_id(),
            token_ttl: cfg.token_ttl,
            room_idle: cfg.room_idle,
            trusteeship_timeout: cfg.trusteeship_timeout,
        }
    }
}

pub struct GameServer<E: GameEngine> {
    engine: E,
    sessions: SessionRegistry,
    rooms: RoomManager<E::State>,
    signer: Signer,
    settlement: SettlementReporter,
    settings: ServerSettings,
}

impl<E: GameEngine> GameServer<E> {
    pub fn new(engine: E, signer: Signer, settlement: SettlementReporter, settings: ServerSettings) -> Self {
        let rooms = RoomManager::new(engine.max_players());
        Self { engine, sessions: SessionRegistry::new(), rooms, signer, settlement, settings }
    }

    // ---- HTTP handshake ----

    pub fn create_room(&mut self, params: &CreateRoomParams) -> Result<String, HandshakeError> {
        let room_id = params.roomid.as_deref().unwrap_or_default();
        let conf = params.conf.as_deref().unwrap_or("{}");
        // Two call shapes are in the wild: with and without the room id.
        let signed = self.signer.verify(&params.sign, &[&params.userid, room_id, conf])
            || self.signer.verify(&params.sign, &[&params.userid, conf]);
        if !signed {
            tracing::warn!(userid = %params.userid, "create_room rejected: bad signature");
            return Err(HandshakeError::InvalidSignature);
        }
        let owner = parse_user(&params.userid)?;
        let room_id = if room_id.is_empty() { new_room_id() } else { room_id.to_string() };
        self.rooms.create_room(&room_id, owner);
        tracing::info!(room_id = %room_id, owner, "room created");
        Ok(room_id)
    }

    /// Seat the user and hand back a single-use entry token.
    pub fn enter_room(&mut self, params: &EnterRoomParams) -> Result<String, HandshakeError> {
        if !self.signer.verify(&params.sign, &[&params.userid, &params.name, &params.roomid]) {
            tracing::warn!(userid = %params.userid, room_id = %params.roomid, "enter_room rejected: bad signature");
            return Err(HandshakeError::InvalidSignature);
        }
        let user = parse_user(&params.userid)?;
        self.rooms.enter_room(&params.roomid, user, &params.name)?;
        let token = self.sessions.issue_token(user, &params.roomid, self.settings.token_ttl);
        tracing::info!(room_id = %params.roomid, user_id = user, "player entered room");
        Ok(token)
    }

    /// Whether this server still hosts the room.
    pub fn is_room_running(&self, room_id: &str) -> bool {
        self.rooms.has_room(room_id)
    }

    pub fn status(&self) -> ServerStatus {
        let (rooms, players) = (self.rooms.room_count(), self.rooms.player_count());
        ServerStatus { server_id: self.settings.server_id.clone(), rooms, players, load: compute_load(rooms, players) }
    }

    // ---- WebSocket ----

    pub fn handle_frame(&mut self, conn: &Connection, text: &str) {
        let msg: Inbound = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(err) => {
                tracing::warn!(conn = conn.id(), error = %err, "malformed envelope dropped");
                return;
            }
        };
        tracing::debug!(conn = conn.id(), cmd = msg.cmd, "frame");

        match msg.cmd {
            cmd::LOGIN => self.on_login(conn, &msg.data),
            cmd::PING => {
                conn.send(Outbound::empty(cmd::PING));
            }
            other => {
                let Some(user) = self.sessions.user_of(conn.id()) else {
                    conn.send(Outbound::error(other, err_code::NOT_LOGIN));
                    return;
                };
                match other {
                    cmd::READY => self.on_ready(conn, user),
                    cmd::ROOM_EXIT => self.on_exit(conn, user),
                    cmd::CHAT_SEND => self.on_chat(conn, user, msg.data),
                    _ => self.on_game_cmd(conn, user, other, &msg.data),
                }
            }
        }
    }

    pub fn on_disconnect(&mut self, conn_id: ConnId) {
        let Some(user) = self.sessions.unbind(conn_id) else {
            return;
        };
        tracing::info!(conn = conn_id, user_id = user, "player disconnected");
        self.mark_offline(user);
    }

    /// Flag seats whose players have been gone too long during a game and
    /// tell their tables. Returns how many seats were flagged.
    pub fn check_trusteeship(&mut self) -> usize {
        let Some(timeout) = self.settings.trusteeship_timeout else {
            return 0;
        };
        let mut flagged = 0;
        for room in self.rooms.rooms_mut() {
            for user in room.flag_trusteeship(timeout) {
                tracing::info!(room_id = %room.id, user_id = user, "seat taken over");
                self.sessions.broadcast(
                    &room.seats,
                    Outbound::ok(cmd::USER_STATE, json!({ "userId": user, "trusteeship": true })),
                );
                flagged += 1;
            }
        }
        flagged
    }

    /// Garbage-collect idle empty rooms and expired entry tokens.
    pub fn sweep(&mut self) {
        let rooms = self.rooms.prune_idle(self.settings.room_idle);
        let tokens = self.sessions.purge_expired();
        if rooms + tokens > 0 {
            tracing::debug!(rooms, tokens, "sweep");
        }
    }

    fn mark_offline(&mut self, user: UserId) {
        let Some(room_id) = self.rooms.room_of(user).map(str::to_owned) else {
            return;
        };
        if self.rooms.set_online(&room_id, user, false).is_ok() {
            if let Some(room) = self.rooms.get(&room_id) {
                self.sessions.broadcast_except(
                    &room.seats,
                    Outbound::ok(cmd::USER_STATE, json!({ "userId": user, "online": false })),
                    user,
                );
            }
        }
    }

    fn on_login(&mut self, conn: &Connection, data: &Value) {
        let grant = data
            .get("token")
            .and_then(Value::as_str)
            .ok_or(SessionError::InvalidToken)
            .and_then(|token| self.sessions.validate_token(token));
        let grant = match grant {
            Ok(grant) => grant,
            Err(err) => {
                tracing::warn!(conn = conn.id(), error = %err, "login rejected");
                conn.send(Outbound::error(cmd::LOGIN, err_code::INVALID_TOKEN));
                return;
            }
        };
        let user = grant.user_id;
        let Some(room) = self.rooms.get(&grant.room_id) else {
            conn.send(Outbound::error(cmd::LOGIN, err_code::ROOM_NOT_FOUND));
            return;
        };
        let Some(seat) = room.seat_index(user) else {
            conn.send(Outbound::error(cmd::LOGIN, err_code::ROOM_NOT_IN));
            return;
        };

        if let Some(released) = self.sessions.bind(user, conn.clone()).released {
            tracing::info!(conn = conn.id(), user_id = released, "connection switched identity");
            self.mark_offline(released);
        }
        let Some(room) = self.rooms.get_mut(&grant.room_id) else {
            return;
        };
        let (first_visit, was_taken_over) =
            room.seat_of(user).map_or((false, false), |s| (s.is_fresh(), s.trusteeship));
        // Seat presence was checked above.
        let _ = room.set_online(user, true);
        tracing::info!(conn = conn.id(), user_id = user, room_id = %room.id, seat, "login");

        conn.send(Outbound::ok(
            cmd::LOGIN,
            json!({
                "roomId": room.id,
                "seats": room.seats,
                "game": self.engine.snapshot(room, seat),
            }),
        ));
        if first_visit {
            if let Some(joined) = room.seat_of(user) {
                self.sessions.broadcast_except(&room.seats, Outbound::ok(cmd::USER_JOIN, joined), user);
            }
        }
        self.sessions.broadcast_except(
            &room.seats,
            Outbound::ok(cmd::USER_STATE, json!({ "userId": user, "online": true })),
            user,
        );
        if was_taken_over {
            self.sessions.broadcast(
                &room.seats,
                Outbound::ok(cmd::USER_STATE, json!({ "userId": user, "trusteeship": false })),
            );
        }
    }

    fn on_ready(&mut self, conn: &Connection, user: UserId) {
        let Some(room_id) = self.rooms.room_of(user).map(str::to_owned) else {
            conn.send(Outbound::error(cmd::READY, err_code::NOT_IN_ROOM));
            return;
        };
        let Some(room) = self.rooms.get_mut(&room_id) else {
            return;
        };
        if room.is_running() {
            conn.send(Outbound::error(cmd::READY, err_code::GAME_ALREADY_STARTED));
            return;
        }
        let Ok(seat) = room.set_ready(user, true) else {
            conn.send(Outbound::error(cmd::READY, err_code::ROOM_NOT_IN));
            return;
        };
        let seat_index = seat.seat_index;
        self.sessions.broadcast(
            &room.seats,
            Outbound::ok(cmd::USER_READY, json!({ "userId": user, "seatIndex": seat_index, "ready": true })),
        );

        if room.is_all_ready() {
            tracing::info!(room_id = %room_id, "all seats ready, starting game");
            self.engine.start(room, &self.sessions);
        }
    }

    fn on_exit(&mut self, conn: &Connection, user: UserId) {
        let Some(room) = self.rooms.room_of(user).and_then(|id| self.rooms.get(id)) else {
            conn.send(Outbound::error(cmd::ROOM_EXIT, err_code::NOT_IN_ROOM));
            return;
        };
        if room.is_running() {
            conn.send(Outbound::error(cmd::ROOM_EXIT, err_code::GAME_ALREADY_STARTED));
            return;
        }
        self.sessions.broadcast_except(
            &room.seats,
            Outbound::ok(cmd::USER_EXIT, json!({ "userId": user, "seatIndex": room.seat_index(user) })),
            user,
        );
        if let Some(room_id) = self.rooms.exit_room(user) {
            tracing::info!(room_id = %room_id, user_id = user, "player left room");
            conn.send(Outbound::ok(cmd::ROOM_EXIT, json!({ "roomId": room_id })));
        }
    }

    fn on_chat(&mut self, conn: &Connection, user: UserId, data: Value) {
        let Some(room) = self.rooms.room_of(user).and_then(|id| self.rooms.get(id)) else {
            conn.send(Outbound::error(cmd::CHAT_SEND, err_code::NOT_IN_ROOM));
            return;
        };
        let content = data.get("content").cloned().unwrap_or(Value::Null);
        self.sessions.broadcast(&room.seats, Outbound::ok(cmd::CHAT_MSG, json!({ "userId": user, "content": content })));
    }

    fn on_game_cmd(&mut self, conn: &Connection, user: UserId, command: i32, data: &Value) {
        let Some(room_id) = self.rooms.room_of(user).map(str::to_owned) else {
            tracing::debug!(user_id = user, cmd = command, "no room, command dropped");
            return;
        };
        let Some(room) = self.rooms.get_mut(&room_id).filter(|r| r.is_running()) else {
            tracing::debug!(user_id = user, cmd = command, "no active game, command dropped");
            return;
        };
        let Some(seat) = room.seat_index(user) else {
            return;
        };

        match self.engine.handle_command(room, seat, command, data, &self.sessions) {
            Ok(CommandOutcome::Continue) => {}
            Ok(CommandOutcome::Restart) => {
                room.redeals += 1;
                room.reset();
                tracing::info!(room_id = %room_id, redeals = room.redeals, "round abandoned, redealing");
                self.engine.start(room, &self.sessions);
            }
            Ok(CommandOutcome::GameOver(result)) => {
                tracing::info!(room_id = %room_id, winner = result.winner_seat, "game over");
                room.reset();
                room.redeals = 0;
                self.settlement.submit(&room_id, self.engine.game_type(), result.settlements);
            }
            Err(err) => match err.code() {
                Some(code) => {
                    tracing::debug!(user_id = user, cmd = command, error = %err, "command rejected");
                    conn.send(Outbound::error(command, code));
                }
                None => tracing::debug!(user_id = user, cmd = command, "unknown command dropped"),
            },
        }
    }
}

fn parse_user(raw: &str) -> Result<UserId, HandshakeError> {
    raw.trim().parse().map_err(|_| HandshakeError::InvalidUserId)
}
