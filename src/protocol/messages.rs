//! Protocol message types for the presence engine
//!
//! All payloads that can be serialized/deserialized within frames, both
//! client-to-server events and server-to-client notifications. JSON via
//! serde; the binary framing lives in `frame`.

use serde::{Deserialize, Serialize};

/// Maximum room display-name length in characters; longer names are rejected
pub const MAX_ROOM_NAME_CHARS: usize = 30;

/// Maximum room description length in characters; longer text is truncated
pub const MAX_ROOM_DESC_CHARS: usize = 100;

/// Maximum chat message length in characters; longer text is truncated
pub const MAX_MESSAGE_CHARS: usize = 500;

/// Truncate a string to at most `max` characters, on character boundaries
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

// =============================================================================
// Control messages
// =============================================================================

/// Ping message for keepalive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ping {
    /// Timestamp when ping was sent (for RTT measurement)
    pub timestamp: u64,
}

/// Pong response to Ping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pong {
    /// Echo back the timestamp from Ping
    pub timestamp: u64,
}

/// Graceful disconnect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goodbye {
    /// Reason for disconnect
    pub reason: String,
}

// =============================================================================
// Client -> server events
// =============================================================================

/// Join a room (implicitly leaving the current one)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRoom {
    /// Room id; unknown ids fall back to the default room
    pub room: String,
    /// Display nickname; a fallback is generated when absent
    #[serde(default)]
    pub nickname: Option<String>,
    /// Stable identity token; the connection id stands in when absent
    #[serde(default)]
    pub user_id: Option<String>,
    /// Cosmetic level badge
    #[serde(default)]
    pub level: Option<u32>,
}

/// Explicitly leave a room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaveRoom {
    pub room: String,
}

/// Send a chat message to the current room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendChat {
    /// Message text; truncated to [`MAX_MESSAGE_CHARS`] server-side
    pub text: String,
    /// Display nickname override for this message
    #[serde(default)]
    pub nickname: Option<String>,
    /// Avatar glyph; defaults to the nickname's first character
    #[serde(default)]
    pub avatar: Option<String>,
}

/// Create an ephemeral room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRoomRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub private: bool,
}

/// Update identity display fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default)]
    pub nickname: Option<String>,
    pub user_id: String,
    #[serde(default)]
    pub anonymous: bool,
    #[serde(default)]
    pub level: Option<u32>,
}

/// Typing indicator; ephemeral, never stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypingUpdate {
    pub is_typing: bool,
}

// =============================================================================
// Server -> client events
// =============================================================================

/// One room as listed in `connected` and `room_created` events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub icon: String,
    /// Distinct identities currently present, never raw connections
    pub member_count: usize,
    pub permanent: bool,
    pub private: bool,
    /// Creator's nickname for user-created rooms
    #[serde(default)]
    pub owner: Option<String>,
    pub last_activity: u64,
}

/// Process-wide counters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub connections: usize,
    pub rooms: usize,
    pub total_messages: u64,
    pub peak_connections: usize,
    pub rooms_created: u64,
}

/// Initial payload sent once per new connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedInfo {
    pub rooms: Vec<RoomSummary>,
    pub stats: StatsSnapshot,
}

/// A chat message, both on the wire and in the retained history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub room: String,
    pub text: String,
    pub nickname: String,
    pub avatar: String,
    /// Author's stable identity token
    pub user_id: String,
    /// Creation time, millis since epoch
    pub timestamp: u64,
}

/// Sent only to the joining connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomJoinedInfo {
    pub room: String,
    pub room_name: String,
    /// Retained history within the retention window, oldest first
    pub messages: Vec<StoredMessage>,
    pub member_count: usize,
}

/// `user_joined` / `user_left` notice; emitted at most once per
/// identity-presence-session, not per connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceNotice {
    pub room: String,
    pub nickname: String,
    pub user_id: String,
    /// Unique presence count after the change
    pub count: usize,
    pub timestamp: u64,
}

/// Member-count / activity change, broadcast to all connections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomActivity {
    pub room: String,
    pub member_count: usize,
    pub last_activity: u64,
}

/// An ephemeral room expired and was removed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomDeletedNotice {
    pub room: String,
    pub reason: String,
}

/// Relayed typing indicator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypingNotice {
    pub room: String,
    pub nickname: String,
    pub is_typing: bool,
}

/// Error response, sent only to the offending connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub code: u32,
    pub message: String,
}

/// Broadcast to all connections before the server closes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShutdownNotice {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_ascii() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel");
        assert_eq!(truncate_chars("", 5), "");
    }

    #[test]
    fn test_truncate_multibyte() {
        // Korean syllables are 3 bytes each; truncation must count chars
        assert_eq!(truncate_chars("러너스클럽", 3), "러너스");
        assert_eq!(truncate_chars("러너스", 30), "러너스");
    }

    #[test]
    fn test_join_optional_fields() {
        let json = r#"{"room":"main"}"#;
        let join: JoinRoom = serde_json::from_str(json).unwrap();
        assert_eq!(join.room, "main");
        assert!(join.nickname.is_none());
        assert!(join.user_id.is_none());
    }

    #[test]
    fn test_create_room_defaults() {
        let json = r#"{"name":"pace crew"}"#;
        let req: CreateRoomRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.name, "pace crew");
        assert!(!req.private);
        assert!(req.icon.is_none());
    }

    #[test]
    fn test_stored_message_roundtrip() {
        let msg = StoredMessage {
            id: "msg_1".to_string(),
            room: "main".to_string(),
            text: "hi".to_string(),
            nickname: "runner".to_string(),
            avatar: "r".to_string(),
            user_id: "tok-1".to_string(),
            timestamp: 1234567890,
        };

        let json = serde_json::to_string(&msg).unwrap();
        let decoded: StoredMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, decoded);
    }
}
