//! Four-player landlord card game on two merged decks.
//!
//! Phases run `Dealing -> Bidding -> Playing -> GameOver`. Seats bid 0-3
//! starting from seat 0; a bid of 3 or the pointer wrapping back to seat 0
//! closes bidding. The landlord takes the eight bottom cards and leads.
//! Turn order is a fixed rotation regardless of who is online.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::cards::{self, CardId};
use super::{CommandOutcome, EngineError, GameEngine, MatchResult, Outbox, SeatSettlement};
use crate::protocol::{cmd, Outbound};
use crate::room::manager::{Room, Seat};

pub mod ddz_cmd {
    pub const BID: i32 = 1001;
    pub const BID_RESULT: i32 = 1002;
    pub const PLAY: i32 = 1003;
    pub const PLAY_RESULT: i32 = 1004;
    pub const PASS: i32 = 1005;
}

pub const PLAYERS: usize = 4;
pub const MAX_BID: u8 = 3;
pub const BASE_SCORE: i64 = 100;
/// Passes after which nobody has to beat the last play.
const PASSES_TO_CLEAR: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Dealing,
    Bidding,
    Playing,
    GameOver,
}

#[derive(Debug, Clone)]
pub struct Doudizhu4State {
    pub phase: Phase,
    pub hands: Vec<Vec<CardId>>,
    pub bottom: Vec<CardId>,
    pub landlord: Option<usize>,
    pub current_bidder: usize,
    pub highest_bid: u8,
    pub highest_bidder: Option<usize>,
    pub current_turn: usize,
    pub last_play: Vec<CardId>,
    pub last_player: Option<usize>,
    pub pass_count: u8,
}

impl Doudizhu4State {
    fn dealt(deal: cards::Deal) -> Self {
        Self {
            phase: Phase::Dealing,
            hands: deal.hands,
            bottom: deal.bottom,
            landlord: None,
            current_bidder: 0,
            highest_bid: 0,
            highest_bidder: None,
            current_turn: 0,
            last_play: Vec::new(),
            last_player: None,
            pass_count: 0,
        }
    }
}

#[derive(Deserialize)]
struct BidReq {
    score: u8,
}

#[derive(Deserialize)]
struct PlayReq {
    cards: Vec<CardId>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SeatView<'a> {
    phase: Phase,
    my_cards: &'a [CardId],
    hand_counts: Vec<usize>,
    landlord: Option<usize>,
    landlord_cards: &'a [CardId],
    current_bidder: usize,
    highest_bid: u8,
    current_turn: usize,
    last_play: &'a [CardId],
    last_player: Option<usize>,
    pass_count: u8,
}

pub struct Doudizhu4 {
    game_type: String,
    rng: StdRng,
    max_redeals: Option<u32>,
}

impl Doudizhu4 {
    pub fn new(game_type: impl Into<String>) -> Self {
        Self { game_type: game_type.into(), rng: StdRng::from_entropy(), max_redeals: None }
    }

    /// Deterministic shuffles, for tests and replays.
    pub fn with_seed(game_type: impl Into<String>, seed: u64) -> Self {
        Self { game_type: game_type.into(), rng: StdRng::seed_from_u64(seed), max_redeals: None }
    }

    /// After `limit` consecutive abandoned rounds, an all-pass round makes
    /// seat 0 the landlord instead of dealing again.
    pub fn with_max_redeals(mut self, limit: Option<u32>) -> Self {
        self.max_redeals = limit;
        self
    }

    pub fn on_bid(
        &mut self,
        room: &mut Room<Doudizhu4State>,
        seat: usize,
        score: u8,
        out: &dyn Outbox,
    ) -> Result<CommandOutcome, EngineError> {
        let forced_allowed = self.max_redeals.is_some_and(|limit| room.redeals >= limit);
        let state = room.game.as_mut().ok_or(EngineError::WrongPhase)?;
        if state.phase != Phase::Bidding {
            return Err(EngineError::WrongPhase);
        }
        if seat != state.current_bidder {
            return Err(EngineError::NotYourTurn);
        }
        if score > MAX_BID {
            return Err(EngineError::InvalidPayload(format!("bid {score} above {MAX_BID}")));
        }

        if score > state.highest_bid {
            state.highest_bid = score;
            state.highest_bidder = Some(seat);
        }
        out.broadcast(&room.seats, Outbound::ok(ddz_cmd::BID_RESULT, json!({ "seatIndex": seat, "score": score })));

        state.current_bidder = (state.current_bidder + 1) % PLAYERS;
        if state.current_bidder != 0 && state.highest_bid < MAX_BID {
            out.broadcast(&room.seats, Outbound::ok(cmd::TURN, json!({ "seatIndex": state.current_bidder, "phase": "bid" })));
            return Ok(CommandOutcome::Continue);
        }

        match state.highest_bidder {
            Some(landlord) => confirm_landlord(state, &room.seats, landlord, out),
            None if forced_allowed => {
                tracing::info!(room_id = %room.id, redeals = room.redeals, "redeal limit reached, seat 0 takes landlord");
                state.highest_bid = 1;
                state.highest_bidder = Some(0);
                confirm_landlord(state, &room.seats, 0, out);
            }
            None => {
                tracing::info!(room_id = %room.id, "nobody bid, dealing again");
                return Ok(CommandOutcome::Restart);
            }
        }
        Ok(CommandOutcome::Continue)
    }

    pub fn on_play(
        &mut self,
        room: &mut Room<Doudizhu4State>,
        seat: usize,
        played: Vec<CardId>,
        out: &dyn Outbox,
    ) -> Result<CommandOutcome, EngineError> {
        let state = room.game.as_mut().ok_or(EngineError::WrongPhase)?;
        if state.phase != Phase::Playing {
            return Err(EngineError::WrongPhase);
        }
        if seat != state.current_turn {
            return Err(EngineError::NotYourTurn);
        }
        if played.is_empty() {
            return Err(EngineError::InvalidPayload("empty play".into()));
        }

        let hand = &mut state.hands[seat];
        cards::remove_cards(hand, &played);
        let remain = hand.len();
        out.broadcast(
            &room.seats,
            Outbound::ok(ddz_cmd::PLAY_RESULT, json!({ "seatIndex": seat, "cards": &played, "remain": remain })),
        );
        state.last_play = played;
        state.last_player = Some(seat);
        state.pass_count = 0;

        if remain == 0 {
            state.phase = Phase::GameOver;
            let result = settle(state, &room.seats, seat);
            let landlord = state.landlord;
            let scores: Vec<i64> = seat_scores(state, seat);
            out.broadcast(
                &room.seats,
                Outbound::ok(
                    cmd::GAME_OVER,
                    json!({
                        "winner": seat,
                        "landlordWin": landlord == Some(seat),
                        "landlord": landlord,
                        "scores": scores,
                    }),
                ),
            );
            return Ok(CommandOutcome::GameOver(result));
        }

        next_turn(state, &room.seats, out);
        Ok(CommandOutcome::Continue)
    }

    pub fn on_pass(
        &mut self,
        room: &mut Room<Doudizhu4State>,
        seat: usize,
        out: &dyn Outbox,
    ) -> Result<CommandOutcome, EngineError> {
        let state = room.game.as_mut().ok_or(EngineError::WrongPhase)?;
        if state.phase != Phase::Playing {
            return Err(EngineError::WrongPhase);
        }
        if seat != state.current_turn {
            return Err(EngineError::NotYourTurn);
        }

        state.pass_count += 1;
        out.broadcast(&room.seats, Outbound::ok(ddz_cmd::PLAY_RESULT, json!({ "seatIndex": seat, "pass": true })));
        if state.pass_count >= PASSES_TO_CLEAR {
            state.last_play.clear();
            state.last_player = None;
            state.pass_count = 0;
        }

        next_turn(state, &room.seats, out);
        Ok(CommandOutcome::Continue)
    }
}

fn confirm_landlord(state: &mut Doudizhu4State, seats: &[Seat], landlord: usize, out: &dyn Outbox) {
    state.landlord = Some(landlord);
    let bottom = state.bottom.clone();
    state.hands[landlord].extend_from_slice(&bottom);
    state.phase = Phase::Playing;
    state.current_turn = landlord;
    out.broadcast(
        seats,
        Outbound::ok(
            cmd::TURN,
            json!({
                "seatIndex": landlord,
                "phase": "play",
                "landlord": landlord,
                "landlordCards": bottom,
            }),
        ),
    );
}

fn next_turn(state: &mut Doudizhu4State, seats: &[Seat], out: &dyn Outbox) {
    state.current_turn = (state.current_turn + 1) % PLAYERS;
    out.broadcast(seats, Outbound::ok(cmd::TURN, json!({ "seatIndex": state.current_turn, "phase": "play" })));
}

/// Zero-sum per-seat scores: the landlord's stake is three times a
/// farmer's, scaled by the winning bid.
fn seat_scores(state: &Doudizhu4State, winner: usize) -> Vec<i64> {
    let Some(landlord) = state.landlord else {
        return vec![0; PLAYERS];
    };
    let stake = BASE_SCORE * i64::from(state.highest_bid.max(1));
    let sign = if winner == landlord { 1 } else { -1 };
    (0..PLAYERS)
        .map(|i| {
            if i == landlord {
                sign * stake * (PLAYERS as i64 - 1)
            } else {
                -sign * stake
            }
        })
        .collect()
}

fn settle(state: &Doudizhu4State, seats: &[Seat], winner: usize) -> MatchResult {
    let scores = seat_scores(state, winner);
    let landlord_won = state.landlord == Some(winner);
    let settlements = seats
        .iter()
        .filter_map(|seat| {
            let user_id = seat.user_id?;
            let on_landlord_side = state.landlord == Some(seat.seat_index);
            Some(SeatSettlement {
                user_id,
                seat_index: seat.seat_index,
                win: on_landlord_side == landlord_won,
                score: scores.get(seat.seat_index).copied().unwrap_or_default(),
            })
        })
        .collect();
    MatchResult { winner_seat: winner, settlements }
}

impl GameEngine for Doudizhu4 {
    type State = Doudizhu4State;

    fn game_type(&self) -> &str {
        &self.game_type
    }

    fn max_players(&self) -> usize {
        PLAYERS
    }

    fn start(&mut self, room: &mut Room<Doudizhu4State>, out: &dyn Outbox) {
        let mut state = Doudizhu4State::dealt(cards::deal(&mut self.rng, PLAYERS));
        for seat in room.occupied() {
            if let (Some(user), Some(hand)) = (seat.user_id, state.hands.get(seat.seat_index)) {
                out.send_to(user, Outbound::ok(cmd::DEAL, json!({ "cards": hand })));
            }
        }
        state.phase = Phase::Bidding;
        room.game = Some(state);
        room.rounds += 1;
        tracing::info!(room_id = %room.id, round = room.rounds, "cards dealt");

        out.broadcast(&room.seats, Outbound::ok(cmd::GAME_START, json!({ "round": room.rounds })));
        out.broadcast(&room.seats, Outbound::ok(cmd::TURN, json!({ "seatIndex": 0, "phase": "bid" })));
    }

    fn handle_command(
        &mut self,
        room: &mut Room<Doudizhu4State>,
        seat: usize,
        command: i32,
        data: &Value,
        out: &dyn Outbox,
    ) -> Result<CommandOutcome, EngineError> {
        match command {
            ddz_cmd::BID => {
                let req: BidReq = parse(data)?;
                self.on_bid(room, seat, req.score, out)
            }
            ddz_cmd::PLAY => {
                let req: PlayReq = parse(data)?;
                self.on_play(room, seat, req.cards, out)
            }
            ddz_cmd::PASS => self.on_pass(room, seat, out),
            other => Err(EngineError::UnknownCommand(other)),
        }
    }

    fn snapshot(&self, room: &Room<Doudizhu4State>, seat: usize) -> Option<Value> {
        let state = room.game.as_ref()?;
        let landlord_cards: &[CardId] = if state.landlord.is_some() { &state.bottom } else { &[] };
        let view = SeatView {
            phase: state.phase,
            my_cards: state.hands.get(seat).map(Vec::as_slice).unwrap_or_default(),
            hand_counts: state.hands.iter().map(Vec::len).collect(),
            landlord: state.landlord,
            landlord_cards,
            current_bidder: state.current_bidder,
            highest_bid: state.highest_bid,
            current_turn: state.current_turn,
            last_play: &state.last_play,
            last_player: state.last_player,
            pass_count: state.pass_count,
        };
        serde_json::to_value(view).ok()
    }
}

fn parse<T: DeserializeOwned>(data: &Value) -> Result<T, EngineError> {
    T::deserialize(data).map_err(|e| EngineError::InvalidPayload(e.to_string()))
}
