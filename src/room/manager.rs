//! Registry of rooms, their seats and the identity -> room index.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Serialize, Serializer};

use crate::protocol::UserId;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Seat {
    pub seat_index: usize,
    #[serde(serialize_with = "vacant_as_zero")]
    pub user_id: Option<UserId>,
    pub name: String,
    pub ready: bool,
    pub online: bool,
    /// Set once the seat has been offline past the takeover timeout.
    pub trusteeship: bool,
    #[serde(skip)]
    pub disconnected_at: Option<Instant>,
}

// Existing clients treat userId 0 as an empty seat.
fn vacant_as_zero<S: Serializer>(user: &Option<UserId>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_i64(user.unwrap_or(0))
}

impl Seat {
    fn vacant(seat_index: usize) -> Self {
        Self {
            seat_index,
            user_id: None,
            name: String::new(),
            ready: false,
            online: false,
            trusteeship: false,
            disconnected_at: None,
        }
    }

    pub fn is_occupied(&self) -> bool {
        self.user_id.is_some()
    }

    /// Seated but never logged in on this server yet.
    pub fn is_fresh(&self) -> bool {
        self.is_occupied() && !self.online && self.disconnected_at.is_none()
    }

    fn vacate(&mut self) {
        *self = Self::vacant(self.seat_index);
    }
}

#[derive(Debug)]
pub struct Room<G> {
    pub id: String,
    pub owner_id: UserId,
    pub seats: Vec<Seat>,
    pub game: Option<G>,
    /// Games started in this room, redeals included.
    pub rounds: u32,
    /// Consecutive rounds abandoned because nobody bid.
    pub redeals: u32,
    created_at: Instant,
}

impl<G> Room<G> {
    fn new(id: String, owner_id: UserId, max_players: usize) -> Self {
        Self {
            id,
            owner_id,
            seats: (0..max_players).map(Seat::vacant).collect(),
            game: None,
            rounds: 0,
            redeals: 0,
            created_at: Instant::now(),
        }
    }

    pub fn seat_of(&self, user: UserId) -> Option<&Seat> {
        self.seats.iter().find(|s| s.user_id == Some(user))
    }

    pub fn seat_index(&self, user: UserId) -> Option<usize> {
        self.seat_of(user).map(|s| s.seat_index)
    }

    pub fn occupied(&self) -> impl Iterator<Item = &Seat> {
        self.seats.iter().filter(|s| s.is_occupied())
    }

    pub fn player_count(&self) -> usize {
        self.occupied().count()
    }

    pub fn is_running(&self) -> bool {
        self.game.is_some()
    }

    /// Every seat is taken and every occupant has readied up.
    pub fn is_all_ready(&self) -> bool {
        self.player_count() == self.seats.len() && self.occupied().all(|s| s.ready)
    }

    /// Going online clears any takeover flag; going offline starts its clock.
    pub fn set_online(&mut self, user: UserId, online: bool) -> Result<&Seat, RoomError> {
        let seat = self.seat_mut(user)?;
        seat.online = online;
        if online {
            seat.trusteeship = false;
            seat.disconnected_at = None;
        } else {
            seat.disconnected_at = Some(Instant::now());
        }
        Ok(seat)
    }

    /// Flag every seat offline for at least `timeout` during a game; returns
    /// the users newly taken over.
    pub fn flag_trusteeship(&mut self, timeout: Duration) -> Vec<UserId> {
        if !self.is_running() {
            return Vec::new();
        }
        let mut flagged = Vec::new();
        for seat in &mut self.seats {
            let overdue = seat.disconnected_at.is_some_and(|at| at.elapsed() >= timeout);
            if seat.online || seat.trusteeship || !overdue {
                continue;
            }
            if let Some(user) = seat.user_id {
                seat.trusteeship = true;
                flagged.push(user);
            }
        }
        flagged
    }

    pub fn set_ready(&mut self, user: UserId, ready: bool) -> Result<&Seat, RoomError> {
        let seat = self.seat_mut(user)?;
        seat.ready = ready;
        Ok(seat)
    }

    /// Drop the active game and all ready flags; seats keep their occupants.
    pub fn reset(&mut self) {
        self.game = None;
        for seat in &mut self.seats {
            seat.ready = false;
        }
    }

    fn seat_mut(&mut self, user: UserId) -> Result<&mut Seat, RoomError> {
        self.seats
            .iter_mut()
            .find(|s| s.user_id == Some(user))
            .ok_or(RoomError::NotSeated)
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomError {
    #[error("room not found")]
    NotFound,
    #[error("room full")]
    Full,
    #[error("identity has no seat in this room")]
    NotSeated,
    #[error("identity is playing in another room")]
    AlreadyInRoom,
}

pub struct RoomManager<G> {
    max_players: usize,
    rooms: HashMap<String, Room<G>>,
    user_room: HashMap<UserId, String>,
}

impl<G> RoomManager<G> {
    pub fn new(max_players: usize) -> Self {
        Self { max_players, rooms: HashMap::new(), user_room: HashMap::new() }
    }

    /// Create (or replace) a room with all seats vacant.
    pub fn create_room(&mut self, room_id: &str, owner_id: UserId) -> &Room<G> {
        if let Some(old) = self.rooms.remove(room_id) {
            tracing::debug!(room_id, "replacing existing room");
            for seat in old.occupied() {
                if let Some(user) = seat.user_id {
                    self.user_room.remove(&user);
                }
            }
        }
        let room = Room::new(room_id.to_string(), owner_id, self.max_players);
        self.rooms.entry(room_id.to_string()).or_insert(room)
    }

    /// Seat `user` in the room, reusing their seat if they already hold one.
    /// Moving out of a room whose game is still running is refused.
    pub fn enter_room(&mut self, room_id: &str, user: UserId, name: &str) -> Result<&Room<G>, RoomError> {
        if !self.rooms.contains_key(room_id) {
            return Err(RoomError::NotFound);
        }
        let prev = self.user_room.get(&user).filter(|prev| prev.as_str() != room_id);
        if prev.and_then(|prev| self.rooms.get(prev)).is_some_and(Room::is_running) {
            return Err(RoomError::AlreadyInRoom);
        }
        let room = self.rooms.get_mut(room_id).ok_or(RoomError::NotFound)?;
        if room.seat_of(user).is_none() {
            let seat = room
                .seats
                .iter_mut()
                .find(|s| !s.is_occupied())
                .ok_or(RoomError::Full)?;
            seat.user_id = Some(user);
            seat.name = name.to_string();
        }
        // A user sits in at most one room.
        if let Some(prev) = self.user_room.insert(user, room_id.to_string()) {
            if prev != room_id {
                if let Some(seat) = self.rooms.get_mut(&prev).and_then(|r| r.seat_mut(user).ok()) {
                    seat.vacate();
                }
            }
        }
        self.rooms.get(room_id).ok_or(RoomError::NotFound)
    }

    /// Vacate the user's seat; returns the room id they left.
    pub fn exit_room(&mut self, user: UserId) -> Option<String> {
        let room_id = self.user_room.remove(&user)?;
        if let Some(seat) = self.rooms.get_mut(&room_id).and_then(|r| r.seat_mut(user).ok()) {
            seat.vacate();
        }
        Some(room_id)
    }

    pub fn room_of(&self, user: UserId) -> Option<&str> {
        self.user_room.get(&user).map(String::as_str)
    }

    pub fn get(&self, room_id: &str) -> Option<&Room<G>> {
        self.rooms.get(room_id)
    }

    pub fn get_mut(&mut self, room_id: &str) -> Option<&mut Room<G>> {
        self.rooms.get_mut(room_id)
    }

    pub fn has_room(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    pub fn set_online(&mut self, room_id: &str, user: UserId, online: bool) -> Result<&Seat, RoomError> {
        self.rooms.get_mut(room_id).ok_or(RoomError::NotFound)?.set_online(user, online)
    }

    pub fn set_ready(&mut self, room_id: &str, user: UserId, ready: bool) -> Result<&Seat, RoomError> {
        self.rooms.get_mut(room_id).ok_or(RoomError::NotFound)?.set_ready(user, ready)
    }

    pub fn is_all_ready(&self, room_id: &str) -> bool {
        self.rooms.get(room_id).is_some_and(Room::is_all_ready)
    }

    pub fn reset_room(&mut self, room_id: &str) {
        if let Some(room) = self.rooms.get_mut(room_id) {
            room.reset();
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn player_count(&self) -> usize {
        self.user_room.len()
    }

    /// Drop rooms that are empty, idle and older than `max_age`.
    pub fn rooms_mut(&mut self) -> impl Iterator<Item = &mut Room<G>> {
        self.rooms.values_mut()
    }

    pub fn prune_idle(&mut self, max_age: Duration) -> usize {
        let before = self.rooms.len();
        self.rooms.retain(|_, r| {
            r.game.is_some() || r.player_count() > 0 || r.created_at.elapsed() < max_age
        });
        before - self.rooms.len()
    }
}
