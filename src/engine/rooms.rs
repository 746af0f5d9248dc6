//! Room state and the room registry
//!
//! A room composes its presence table and message log behind per-room locks,
//! so concurrent join/leave/append on the same room serialize while
//! different rooms never contend. The registry owns the room map; all
//! creation, lookup and deletion funnels through it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::engine::history::MessageLog;
use crate::engine::presence::{JoinOutcome, LeaveOutcome, RoomPresence};
use crate::error::{EngineError, Result};
use crate::protocol::{
    truncate_chars, RoomSummary, StoredMessage, MAX_ROOM_DESC_CHARS, MAX_ROOM_NAME_CHARS,
};
use crate::{generate_room_id, Identity, PermanentRoom};

/// A chat room: metadata plus presence and retained history
#[derive(Debug)]
pub struct Room {
    pub id: String,
    pub name: String,
    pub description: String,
    pub icon: String,
    /// Permanent rooms exist from startup and are never deleted
    pub permanent: bool,
    pub private: bool,
    /// Creator identity for user-created rooms
    pub owner: Option<Identity>,
    pub created_at: u64,
    last_activity: RwLock<u64>,
    presence: RwLock<RoomPresence>,
    log: RwLock<MessageLog>,
}

impl Room {
    fn new(
        id: String,
        name: String,
        description: String,
        icon: String,
        permanent: bool,
        private: bool,
        owner: Option<Identity>,
        now: u64,
        retention_ms: u64,
        max_messages: usize,
    ) -> Self {
        Self {
            id,
            name,
            description,
            icon,
            permanent,
            private,
            owner,
            created_at: now,
            last_activity: RwLock::new(now),
            presence: RwLock::new(RoomPresence::new()),
            log: RwLock::new(MessageLog::new(retention_ms, max_messages)),
        }
    }

    /// Add a connection under an identity token
    pub async fn join(&self, token: &str, conn_id: &str) -> JoinOutcome {
        self.presence.write().await.join(token, conn_id)
    }

    /// Remove a connection from under an identity token
    pub async fn leave(&self, token: &str, conn_id: &str) -> LeaveOutcome {
        self.presence.write().await.leave(token, conn_id)
    }

    /// Distinct identities currently present
    pub async fn unique_count(&self) -> usize {
        self.presence.read().await.unique_count()
    }

    /// All connection ids currently mapped to this room
    pub async fn connection_ids(&self) -> Vec<String> {
        self.presence.read().await.connection_ids()
    }

    pub async fn is_vacant(&self) -> bool {
        self.presence.read().await.is_empty()
    }

    /// Append a message to the retained history (prunes as it goes)
    pub async fn append_message(&self, message: StoredMessage) {
        self.log.write().await.append(message);
    }

    /// Retained history within the window, oldest first
    pub async fn message_snapshot(&self, now: u64) -> Vec<StoredMessage> {
        self.log.read().await.snapshot(now)
    }

    /// Prune stale history; returns removed count
    pub async fn prune_messages(&self, now: u64) -> usize {
        self.log.write().await.prune(now)
    }

    pub async fn message_count(&self) -> usize {
        self.log.read().await.len()
    }

    /// Record activity
    pub async fn touch(&self, now: u64) {
        *self.last_activity.write().await = now;
    }

    pub async fn last_activity(&self) -> u64 {
        *self.last_activity.read().await
    }

    /// Snapshot for room lists and `room_created` events
    pub async fn summary(&self) -> RoomSummary {
        RoomSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            icon: self.icon.clone(),
            member_count: self.unique_count().await,
            permanent: self.permanent,
            private: self.private,
            owner: self.owner.as_ref().map(|o| o.nickname.clone()),
            last_activity: self.last_activity().await,
        }
    }
}

/// Owns all rooms; composes presence and history per room
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    /// Joins to unknown room ids land here; permanent by construction, so it
    /// can never dangle
    fallback: Arc<Room>,
    retention_ms: u64,
    max_messages: usize,
}

impl RoomRegistry {
    /// Create the registry with its fixed permanent rooms. The first
    /// definition becomes the fallback; an empty list gets the default lobby.
    pub fn new(definitions: &[PermanentRoom], retention_ms: u64, max_messages: usize, now: u64) -> Self {
        let defs = if definitions.is_empty() {
            vec![PermanentRoom::main()]
        } else {
            definitions.to_vec()
        };

        let mut rooms = HashMap::new();
        let mut fallback = None;
        for def in &defs {
            let room = Arc::new(Room::new(
                def.id.clone(),
                def.name.clone(),
                def.description.clone(),
                def.icon.clone(),
                true,
                false,
                None,
                now,
                retention_ms,
                max_messages,
            ));
            if fallback.is_none() {
                fallback = Some(Arc::clone(&room));
            }
            rooms.insert(def.id.clone(), room);
        }

        Self {
            rooms: RwLock::new(rooms),
            // the list above is never empty
            fallback: fallback.unwrap_or_else(|| {
                Arc::new(Room::new(
                    "main".to_string(),
                    "Main Lobby".to_string(),
                    String::new(),
                    "💬".to_string(),
                    true,
                    false,
                    None,
                    now,
                    retention_ms,
                    max_messages,
                ))
            }),
            retention_ms,
            max_messages,
        }
    }

    /// Idempotently re-create any missing permanent room (startup safety;
    /// calling it twice changes nothing)
    pub async fn ensure_permanent(&self, definitions: &[PermanentRoom], now: u64) {
        let mut rooms = self.rooms.write().await;
        for def in definitions {
            rooms.entry(def.id.clone()).or_insert_with(|| {
                Arc::new(Room::new(
                    def.id.clone(),
                    def.name.clone(),
                    def.description.clone(),
                    def.icon.clone(),
                    true,
                    false,
                    None,
                    now,
                    self.retention_ms,
                    self.max_messages,
                ))
            });
        }
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Room>> {
        self.rooms.read().await.get(id).cloned()
    }

    /// Look up a room, falling back to the default room for unknown ids so a
    /// join never errors out
    pub async fn get_or_default(&self, id: &str) -> Arc<Room> {
        match self.rooms.read().await.get(id) {
            Some(room) => Arc::clone(room),
            None => Arc::clone(&self.fallback),
        }
    }

    /// Create an ephemeral room after validating its display name
    pub async fn create(
        &self,
        name: &str,
        description: Option<String>,
        icon: Option<String>,
        private: bool,
        owner: Identity,
        now: u64,
    ) -> Result<Arc<Room>> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::invalid_name("room name must not be empty"));
        }
        if name.chars().count() > MAX_ROOM_NAME_CHARS {
            return Err(EngineError::invalid_name(format!(
                "room name exceeds {} characters",
                MAX_ROOM_NAME_CHARS
            )));
        }

        let mut rooms = self.rooms.write().await;

        // Case-sensitive exact match on the display name
        if rooms.values().any(|room| room.name == name) {
            return Err(EngineError::duplicate_name(format!(
                "a room named '{}' already exists",
                name
            )));
        }

        let description = truncate_chars(description.unwrap_or_default().trim(), MAX_ROOM_DESC_CHARS);
        let icon = icon.unwrap_or_else(|| "💬".to_string());

        let room = Arc::new(Room::new(
            generate_room_id(),
            name.to_string(),
            description,
            icon,
            false,
            private,
            Some(owner),
            now,
            self.retention_ms,
            self.max_messages,
        ));
        rooms.insert(room.id.clone(), Arc::clone(&room));

        Ok(room)
    }

    /// Remove a non-permanent, vacant room. No-op (returns None) for
    /// permanent or still-occupied rooms.
    pub async fn delete(&self, id: &str) -> Option<Arc<Room>> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.get(id)?;

        if room.permanent || !room.is_vacant().await {
            return None;
        }

        rooms.remove(id)
    }

    /// Snapshot of every room for stats and the `connected` bootstrap
    pub async fn list(&self) -> Vec<RoomSummary> {
        let rooms: Vec<Arc<Room>> = self.rooms.read().await.values().cloned().collect();
        let mut summaries = Vec::with_capacity(rooms.len());
        for room in rooms {
            summaries.push(room.summary().await);
        }
        summaries
    }

    pub async fn count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Prune every room's history; covers rooms with no recent traffic
    pub async fn sweep_messages(&self, now: u64) -> usize {
        let rooms: Vec<Arc<Room>> = self.rooms.read().await.values().cloned().collect();
        let mut removed = 0;
        for room in rooms {
            removed += room.prune_messages(now).await;
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY_MS: u64 = 24 * 60 * 60 * 1000;

    fn registry() -> RoomRegistry {
        RoomRegistry::new(&[PermanentRoom::main()], DAY_MS, 5000, 1000)
    }

    fn runner(n: u32) -> Identity {
        Identity::new(format!("runner{}", n), format!("tok-{}", n))
    }

    #[tokio::test]
    async fn test_permanent_rooms_exist() {
        let registry = registry();
        let main = registry.get("main").await.unwrap();
        assert!(main.permanent);
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn test_ensure_permanent_idempotent() {
        let registry = registry();
        let main = registry.get("main").await.unwrap();
        main.join("tok-1", "conn-1").await;

        registry.ensure_permanent(&[PermanentRoom::main()], 2000).await;

        // Re-ensuring must not replace the live room
        let after = registry.get("main").await.unwrap();
        assert_eq!(after.unique_count().await, 1);
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_room_falls_back() {
        let registry = registry();
        let room = registry.get_or_default("no-such-room").await;
        assert_eq!(room.id, "main");
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let registry = registry();

        let first = registry
            .create("러너스", None, None, false, runner(1), 1000)
            .await;
        assert!(first.is_ok());

        let second = registry
            .create("러너스", None, None, false, runner(2), 1001)
            .await;
        assert!(matches!(second, Err(EngineError::DuplicateName(_))));

        // Exactly one room was added on top of the permanent set
        assert_eq!(registry.count().await, 2);
    }

    #[tokio::test]
    async fn test_invalid_names_rejected() {
        let registry = registry();

        let empty = registry.create("   ", None, None, false, runner(1), 0).await;
        assert!(matches!(empty, Err(EngineError::InvalidName(_))));

        let long = "r".repeat(MAX_ROOM_NAME_CHARS + 1);
        let over = registry.create(&long, None, None, false, runner(1), 0).await;
        assert!(matches!(over, Err(EngineError::InvalidName(_))));
    }

    #[tokio::test]
    async fn test_description_truncated() {
        let registry = registry();
        let description = "d".repeat(500);
        let room = registry
            .create("pace crew", Some(description), None, false, runner(1), 0)
            .await
            .unwrap();
        assert_eq!(room.description.chars().count(), MAX_ROOM_DESC_CHARS);
    }

    #[tokio::test]
    async fn test_delete_refuses_permanent_and_occupied() {
        let registry = registry();
        assert!(registry.delete("main").await.is_none());

        let room = registry
            .create("pace crew", None, None, false, runner(1), 0)
            .await
            .unwrap();
        room.join("tok-1", "conn-1").await;
        assert!(registry.delete(&room.id).await.is_none());

        room.leave("tok-1", "conn-1").await;
        assert!(registry.delete(&room.id).await.is_some());
        assert!(registry.get(&room.id).await.is_none());
    }

    #[tokio::test]
    async fn test_owner_shown_in_summary() {
        let registry = registry();
        let room = registry
            .create("pace crew", None, None, true, runner(7), 0)
            .await
            .unwrap();

        let summary = room.summary().await;
        assert_eq!(summary.owner.as_deref(), Some("runner7"));
        assert!(summary.private);
        assert!(!summary.permanent);
    }
}
