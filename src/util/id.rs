//! ID utilities (room ids, entry tokens).

use std::time::{SystemTime, UNIX_EPOCH};

use rand::{distributions::Alphanumeric, Rng};
use ulid::Ulid;

use crate::protocol::UserId;

/// Generate a short room ID using ULID, truncated for readability.
///
/// Only used when the lobby does not supply its own room id.
pub fn new_room_id() -> String {
    let ulid = Ulid::new().to_string();
    // 26-char ULID; the first 10 chars are timestamp-derived.
    ulid.chars().take(10).collect()
}

/// Compose an entry token from identity, room and the current time, with a
/// short random suffix so two tokens issued in the same millisecond differ.
pub fn new_entry_token(user_id: UserId, room_id: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let salt: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!("{user_id}_{room_id}_{millis}_{salt}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_tokens_carry_identity_and_room() {
        let token = new_entry_token(42, "r1");
        assert!(token.starts_with("42_r1_"));
        assert_ne!(token, new_entry_token(42, "r1"));
    }

    #[test]
    fn room_ids_are_short() {
        assert_eq!(new_room_id().len(), 10);
    }
}
