//! Entry tokens and the identity <-> connection binding.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::connection::{ConnId, Connection};
use crate::game::Outbox;
use crate::protocol::{cmd, err_code, Outbound, UserId};
use crate::room::manager::Seat;
use crate::util::id::new_entry_token;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    #[error("entry token absent, expired or already used")]
    InvalidToken,
}

/// What a consumed entry token grants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub user_id: UserId,
    pub room_id: String,
}

/// Side effects of [`SessionRegistry::bind`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    /// Another socket held this identity and was kicked.
    pub evicted: bool,
    /// Identity this socket held before, now without a session.
    pub released: Option<UserId>,
}

#[derive(Debug)]
struct EntryToken {
    grant: TokenGrant,
    expires_at: Instant,
}

#[derive(Default)]
pub struct SessionRegistry {
    tokens: HashMap<String, EntryToken>,
    sessions: HashMap<UserId, Connection>,
    conn_user: HashMap<ConnId, UserId>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue_token(&mut self, user_id: UserId, room_id: &str, ttl: Duration) -> String {
        let token = new_entry_token(user_id, room_id);
        let grant = TokenGrant { user_id, room_id: room_id.to_string() };
        self.tokens.insert(token.clone(), EntryToken { grant, expires_at: Instant::now() + ttl });
        token
    }

    /// Consume a token. Expired tokens are removed and rejected.
    pub fn validate_token(&mut self, token: &str) -> Result<TokenGrant, SessionError> {
        let entry = self.tokens.remove(token).ok_or(SessionError::InvalidToken)?;
        if Instant::now() >= entry.expires_at {
            return Err(SessionError::InvalidToken);
        }
        Ok(entry.grant)
    }

    pub fn purge_expired(&mut self) -> usize {
        let now = Instant::now();
        let before = self.tokens.len();
        self.tokens.retain(|_, t| t.expires_at > now);
        before - self.tokens.len()
    }

    pub fn pending_tokens(&self) -> usize {
        self.tokens.len()
    }

    /// Bind `user` to `conn`. A different connection already bound to `user`
    /// is sent a KICK and closed.
    pub fn bind(&mut self, user: UserId, conn: Connection) -> Binding {
        let conn_id = conn.id();
        let mut binding = Binding::default();
        // The same socket logging in as someone else releases its old identity.
        if let Some(prev_user) = self.conn_user.insert(conn_id, user) {
            if prev_user != user && self.sessions.get(&prev_user).is_some_and(|c| c.id() == conn_id) {
                self.sessions.remove(&prev_user);
                binding.released = Some(prev_user);
            }
        }

        if let Some(old) = self.sessions.insert(user, conn) {
            if old.id() != conn_id {
                tracing::info!(user_id = user, old_conn = old.id(), conn = conn_id, "evicting previous connection");
                self.conn_user.remove(&old.id());
                old.send(Outbound::error(cmd::KICK, err_code::KICKED));
                old.close();
                binding.evicted = true;
            }
        }
        binding
    }

    /// Drop both directions of the binding held by `conn_id`.
    pub fn unbind(&mut self, conn_id: ConnId) -> Option<UserId> {
        let user = self.conn_user.remove(&conn_id)?;
        if self.sessions.get(&user).is_some_and(|c| c.id() == conn_id) {
            self.sessions.remove(&user);
        }
        Some(user)
    }

    pub fn user_of(&self, conn_id: ConnId) -> Option<UserId> {
        self.conn_user.get(&conn_id).copied()
    }

    pub fn is_online(&self, user: UserId) -> bool {
        self.sessions.get(&user).is_some_and(Connection::is_open)
    }
}

impl Outbox for SessionRegistry {
    fn send_to(&self, user: UserId, msg: Outbound) {
        match self.sessions.get(&user) {
            Some(conn) if conn.send(msg) => {}
            Some(conn) => tracing::debug!(user_id = user, conn = conn.id(), "writer gone, frame dropped"),
            None => tracing::debug!(user_id = user, "no session, frame dropped"),
        }
    }

    fn broadcast(&self, seats: &[Seat], msg: Outbound) {
        for user in seats.iter().filter_map(|s| s.user_id) {
            self.send_to(user, msg.clone());
        }
    }

    fn broadcast_except(&self, seats: &[Seat], msg: Outbound, except: UserId) {
        for user in seats.iter().filter_map(|s| s.user_id).filter(|u| *u != except) {
            self.send_to(user, msg.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::manager::RoomManager;
    use crate::session::connection::Outgoing;

    #[test]
    fn token_validates_exactly_once() {
        let mut sessions = SessionRegistry::new();
        let token = sessions.issue_token(7, "r1", Duration::from_secs(300));
        let grant = sessions.validate_token(&token).expect("first use");
        assert_eq!(grant, TokenGrant { user_id: 7, room_id: "r1".into() });
        assert_eq!(sessions.validate_token(&token), Err(SessionError::InvalidToken));
        assert_eq!(sessions.validate_token("bogus"), Err(SessionError::InvalidToken));
    }

    #[test]
    fn expired_token_is_rejected() {
        let mut sessions = SessionRegistry::new();
        let token = sessions.issue_token(7, "r1", Duration::ZERO);
        assert_eq!(sessions.validate_token(&token), Err(SessionError::InvalidToken));
        assert_eq!(sessions.pending_tokens(), 0);
    }

    #[test]
    fn purge_drops_only_expired_tokens() {
        let mut sessions = SessionRegistry::new();
        sessions.issue_token(1, "r1", Duration::ZERO);
        let live = sessions.issue_token(2, "r1", Duration::from_secs(60));
        assert_eq!(sessions.purge_expired(), 1);
        assert!(sessions.validate_token(&live).is_ok());
    }

    #[test]
    fn rebinding_kicks_and_closes_the_old_connection() {
        let mut sessions = SessionRegistry::new();
        let (a, mut a_rx) = Connection::channel(1);
        let (b, _b_rx) = Connection::channel(2);

        assert_eq!(sessions.bind(7, a.clone()), Binding::default());
        assert_eq!(sessions.bind(7, b), Binding { evicted: true, released: None });

        assert_eq!(a_rx.try_recv().ok(), Some(Outgoing::Frame(Outbound::error(cmd::KICK, err_code::KICKED))));
        assert_eq!(a_rx.try_recv().ok(), Some(Outgoing::Close));
        assert!(!a.is_open());
        assert_eq!(sessions.user_of(1), None);
        assert_eq!(sessions.user_of(2), Some(7));
        assert!(sessions.is_online(7));

        // The stale socket's disconnect must not unbind the new one.
        assert_eq!(sessions.unbind(1), None);
        assert!(sessions.is_online(7));
        assert_eq!(sessions.unbind(2), Some(7));
        assert!(!sessions.is_online(7));
    }

    #[test]
    fn binding_same_connection_twice_is_not_an_eviction() {
        let mut sessions = SessionRegistry::new();
        let (a, mut a_rx) = Connection::channel(1);
        sessions.bind(7, a.clone());
        assert_eq!(sessions.bind(7, a), Binding::default());
        assert!(a_rx.try_recv().is_err());
    }

    #[test]
    fn connection_switching_identity_releases_the_old_one() {
        let mut sessions = SessionRegistry::new();
        let (a, _rx) = Connection::channel(1);
        sessions.bind(7, a.clone());
        assert_eq!(sessions.bind(8, a), Binding { evicted: false, released: Some(7) });
        assert!(!sessions.is_online(7));
        assert!(sessions.is_online(8));
        assert_eq!(sessions.user_of(1), Some(8));
    }

    #[test]
    fn dropped_writer_reads_as_offline() {
        let mut sessions = SessionRegistry::new();
        let (a, rx) = Connection::channel(1);
        sessions.bind(7, a);
        drop(rx);
        assert!(!sessions.is_online(7));
    }

    #[test]
    fn broadcast_except_skips_sender_and_vacant_seats() {
        let mut rooms: RoomManager<()> = RoomManager::new(3);
        rooms.create_room("r1", 1);
        rooms.enter_room("r1", 10, "a").expect("enter");
        rooms.enter_room("r1", 11, "b").expect("enter");

        let mut sessions = SessionRegistry::new();
        let (a, mut a_rx) = Connection::channel(1);
        let (b, mut b_rx) = Connection::channel(2);
        sessions.bind(10, a);
        sessions.bind(11, b);

        let seats = &rooms.get("r1").expect("room").seats;
        sessions.broadcast_except(seats, Outbound::empty(cmd::USER_STATE), 10);
        assert!(a_rx.try_recv().is_err());
        assert_eq!(b_rx.try_recv().ok(), Some(Outgoing::Frame(Outbound::empty(cmd::USER_STATE))));
    }
}
