//! Real-time room & presence engine over QUIC with JSON payloads
//!
//! This library accepts many concurrent client connections, groups them into
//! named rooms, tracks which logical users are actually present (independent
//! of how many tabs they hold open), retains a bounded per-room message
//! history, and garbage-collects user-created rooms that go quiet.

pub mod client;
pub mod engine;
pub mod error;
pub mod protocol;

pub use client::{PacerClient, PacerClientConfig};
pub use engine::{Engine, Server};
pub use error::{EngineError, Result};

use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Generate a unique message ID
pub fn generate_message_id() -> String {
    format!("msg_{}", Uuid::new_v4().simple())
}

/// Generate a unique room ID for a user-created room
pub fn generate_room_id() -> String {
    format!("room_{}", Uuid::new_v4().simple())
}

/// Get current timestamp in milliseconds since UNIX epoch
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A logical user as seen by the engine: stable across reconnects and tabs.
///
/// Identities are not created by the engine; the nickname and token arrive
/// with `join` and `profile_update` events. The token is the unit of
/// presence counting, everything else is display-only.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Identity {
    /// Display nickname (mutable via profile updates)
    pub nickname: String,
    /// Stable identity token, assigned client-side
    pub token: String,
    /// Whether the user asked to appear anonymous
    #[serde(default)]
    pub anonymous: bool,
    /// Cosmetic level badge; ignored by presence accounting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<u32>,
}

impl Identity {
    pub fn new(nickname: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            nickname: nickname.into(),
            token: token.into(),
            anonymous: false,
            level: None,
        }
    }
}

/// Definition of a room that exists from process start and is never deleted
#[derive(Clone, Debug)]
pub struct PermanentRoom {
    pub id: String,
    pub name: String,
    pub description: String,
    pub icon: String,
}

impl PermanentRoom {
    /// The default lobby every deployment gets
    pub fn main() -> Self {
        Self {
            id: "main".to_string(),
            name: "Main Lobby".to_string(),
            description: "Open to all runners".to_string(),
            icon: "💬".to_string(),
        }
    }
}

/// Engine configuration
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Server listen address
    pub bind_addr: std::net::SocketAddr,
    /// Maximum number of concurrent connections
    pub max_connections: usize,
    /// Interval between server pings to each connection
    pub heartbeat_interval: Duration,
    /// A connection silent for longer than this is treated as disconnected
    pub heartbeat_timeout: Duration,
    /// How long an empty ephemeral room survives before deletion
    pub room_inactivity_timeout: Duration,
    /// Maximum age of a retained message
    pub message_retention: Duration,
    /// Maximum retained messages per room
    pub max_retained_messages: usize,
    /// Interval between retention sweeps over silent rooms
    pub retention_sweep_interval: Duration,
    /// Broadcast a stats_update every Nth message
    pub stats_broadcast_every: u64,
    /// Rooms created at startup; the first one is the join fallback
    pub permanent_rooms: Vec<PermanentRoom>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:4433".parse().unwrap(),
            max_connections: 10000,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(60),
            room_inactivity_timeout: Duration::from_secs(30 * 60),
            message_retention: Duration::from_secs(24 * 60 * 60),
            max_retained_messages: 5000,
            retention_sweep_interval: Duration::from_secs(60 * 60),
            stats_broadcast_every: 10,
            permanent_rooms: vec![PermanentRoom::main()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.bind_addr.port(), 4433);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.room_inactivity_timeout, Duration::from_secs(1800));
        assert_eq!(config.max_retained_messages, 5000);
        assert_eq!(config.permanent_rooms.len(), 1);
        assert_eq!(config.permanent_rooms[0].id, "main");
    }

    #[test]
    fn test_generated_ids_unique() {
        let a = generate_message_id();
        let b = generate_message_id();
        assert_ne!(a, b);
        assert!(a.starts_with("msg_"));
        assert!(generate_room_id().starts_with("room_"));
    }

    #[test]
    fn test_identity_defaults() {
        let id = Identity::new("runner", "tok-1");
        assert_eq!(id.nickname, "runner");
        assert!(!id.anonymous);
        assert!(id.level.is_none());
    }
}
