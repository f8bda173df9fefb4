//! Room-based real-time card game server: lobby handshake over HTTP,
//! game traffic over WebSocket, match results posted to the account
//! service.

pub mod config;
pub mod game;
pub mod http;
pub mod lobby;
pub mod protocol;
pub mod room;
pub mod server;
pub mod session;
pub mod settlement;
pub mod telemetry;
pub mod util;
pub mod ws;
