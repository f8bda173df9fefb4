//! Per-game contract plugged into the dispatcher.
//!
//! An engine owns nothing but the state it attaches to `Room::game`. It
//! talks to players only through an [`Outbox`], and reports terminal or
//! abandoned rounds back to the dispatcher through [`CommandOutcome`].

pub mod cards;
pub mod doudizhu4;

use serde::Serialize;
use serde_json::Value;

use crate::protocol::{err_code, Outbound, UserId};
use crate::room::manager::{Room, Seat};

/// Delivery primitives the dispatcher lends to an engine.
pub trait Outbox {
    fn send_to(&self, user: UserId, msg: Outbound);
    fn broadcast(&self, seats: &[Seat], msg: Outbound);
    fn broadcast_except(&self, seats: &[Seat], msg: Outbound, except: UserId);
}

pub trait GameEngine: Send + 'static {
    type State: Send + 'static;

    fn game_type(&self) -> &str;

    fn max_players(&self) -> usize;

    /// Called once every seat is ready, and again after an abandoned round.
    fn start(&mut self, room: &mut Room<Self::State>, out: &dyn Outbox);

    fn handle_command(
        &mut self,
        room: &mut Room<Self::State>,
        seat: usize,
        cmd: i32,
        data: &Value,
        out: &dyn Outbox,
    ) -> Result<CommandOutcome, EngineError>;

    /// Per-seat view of the active game, for (re)connecting players.
    fn snapshot(&self, room: &Room<Self::State>, seat: usize) -> Option<Value>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Continue,
    /// The round was abandoned; the room must be reset and dealt again.
    Restart,
    GameOver(MatchResult),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub winner_seat: usize,
    pub settlements: Vec<SeatSettlement>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatSettlement {
    pub user_id: UserId,
    pub seat_index: usize,
    pub win: bool,
    pub score: i64,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("not your turn")]
    NotYourTurn,
    #[error("command not allowed in the current phase")]
    WrongPhase,
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("unknown command {0}")]
    UnknownCommand(i32),
}

impl EngineError {
    /// Wire code for an error reply; `None` means drop silently.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::NotYourTurn => Some(err_code::NOT_YOUR_TURN),
            Self::WrongPhase | Self::InvalidPayload(_) => Some(err_code::INVALID_ACTION),
            Self::UnknownCommand(_) => None,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use parking_lot::Mutex;

    use super::*;

    /// Records deliveries instead of writing to sockets.
    #[derive(Default)]
    pub struct RecordingOutbox {
        pub sent: Mutex<Vec<(UserId, Outbound)>>,
        pub broadcasts: Mutex<Vec<Outbound>>,
    }

    impl RecordingOutbox {
        pub fn broadcast_cmds(&self) -> Vec<i32> {
            self.broadcasts.lock().iter().map(|m| m.cmd).collect()
        }

        pub fn take_broadcasts(&self) -> Vec<Outbound> {
            std::mem::take(&mut *self.broadcasts.lock())
        }

        pub fn sent_to(&self, user: UserId) -> Vec<Outbound> {
            self.sent
                .lock()
                .iter()
                .filter(|(u, _)| *u == user)
                .map(|(_, m)| m.clone())
                .collect()
        }
    }

    impl Outbox for RecordingOutbox {
        fn send_to(&self, user: UserId, msg: Outbound) {
            self.sent.lock().push((user, msg));
        }

        fn broadcast(&self, _seats: &[Seat], msg: Outbound) {
            self.broadcasts.lock().push(msg);
        }

        fn broadcast_except(&self, _seats: &[Seat], msg: Outbound, _except: UserId) {
            self.broadcasts.lock().push(msg);
        }
    }
}
