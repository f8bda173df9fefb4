//! Wire envelope and numbering shared by every game on this server.
//!
//! Command numbers are partitioned by range: system 1-99, room 100-149,
//! chat 150-199, matchmaking 300-499, generic game 500-599 and
//! game-specific 1000 and up.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type UserId = i64;

pub mod cmd {
    pub const LOGIN: i32 = 1;
    pub const PING: i32 = 4;
    pub const KICK: i32 = 5;

    pub const ROOM_EXIT: i32 = 106;

    pub const CHAT_SEND: i32 = 150;
    pub const CHAT_MSG: i32 = 151;

    pub const USER_JOIN: i32 = 500;
    pub const USER_EXIT: i32 = 501;
    pub const USER_STATE: i32 = 502;
    pub const USER_READY: i32 = 503;
    pub const READY: i32 = 504;
    pub const GAME_START: i32 = 510;
    pub const GAME_OVER: i32 = 511;
    pub const DEAL: i32 = 520;
    pub const TURN: i32 = 522;
}

pub mod err_code {
    pub const OK: i32 = 0;
    pub const INVALID_SIGNATURE: i32 = -1;
    pub const UNKNOWN: i32 = 1;
    pub const NOT_LOGIN: i32 = 2;
    pub const NOT_IN_ROOM: i32 = 3;
    pub const ALREADY_MATCHING: i32 = 4;
    pub const NO_SERVER: i32 = 5;
    pub const KICKED: i32 = 6;
    pub const INVALID_TOKEN: i32 = 7;

    pub const ROOM_NOT_FOUND: i32 = 20;
    pub const ROOM_FULL: i32 = 21;
    pub const ROOM_NOT_IN: i32 = 22;
    pub const ROOM_ALREADY_IN: i32 = 23;

    pub const GAME_NOT_STARTED: i32 = 40;
    pub const GAME_ALREADY_STARTED: i32 = 41;
    pub const GAME_OVER: i32 = 42;
    pub const NOT_YOUR_TURN: i32 = 43;
    pub const INVALID_ACTION: i32 = 44;
}

/// Client -> server envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct Inbound {
    pub cmd: i32,
    #[serde(default)]
    pub data: Value,
}

/// Server -> client envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outbound {
    pub cmd: i32,
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Outbound {
    pub fn ok(cmd: i32, data: impl Serialize) -> Self {
        let data = match serde_json::to_value(data) {
            Ok(Value::Null) => None,
            Ok(v) => Some(v),
            Err(err) => {
                tracing::warn!(cmd, error = %err, "dropping unserializable payload");
                None
            }
        };
        Self { cmd, code: err_code::OK, data }
    }

    pub fn empty(cmd: i32) -> Self {
        Self { cmd, code: err_code::OK, data: None }
    }

    pub fn error(cmd: i32, code: i32) -> Self {
        Self { cmd, code, data: None }
    }
}
