//! Connection registry: the single owner of live connection state
//!
//! Rooms and presence reference connections only by id; the registry owns
//! the per-connection record (identity, current room, liveness, heartbeat)
//! and the outbound command channel. Cleanup runs leave logic before the
//! record is dropped, guarded by `begin_close` so it runs exactly once no
//! matter how many paths (stream end, send failure, heartbeat sweep) race to
//! report the same death.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::engine::handler::ConnectionCommand;
use crate::error::{EngineError, Result};
use crate::Identity;

/// Per-connection record
struct ConnectionState {
    identity: Option<Identity>,
    room: Option<String>,
    /// Cleared by `begin_close`; a dead connection is skipped by delivery
    /// and by the heartbeat sweep
    alive: bool,
    last_heartbeat: Instant,
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
}

/// Snapshot handed to the cleanup path when a connection begins closing
#[derive(Debug, Clone)]
pub struct CloseInfo {
    pub identity: Option<Identity>,
    pub room: Option<String>,
}

/// Owns the set of live connections
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, ConnectionState>>,
    max_connections: usize,
}

impl ConnectionRegistry {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            max_connections,
        }
    }

    /// Register a new connection, returning its id
    pub async fn register(
        &self,
        command_tx: mpsc::UnboundedSender<ConnectionCommand>,
        remote_addr: SocketAddr,
    ) -> Result<String> {
        let mut connections = self.connections.write().await;

        if connections.len() >= self.max_connections {
            return Err(EngineError::resource_limit(format!(
                "Maximum connections reached: {}",
                self.max_connections
            )));
        }

        let conn_id = Uuid::new_v4().to_string();
        connections.insert(
            conn_id.clone(),
            ConnectionState {
                identity: None,
                room: None,
                alive: true,
                last_heartbeat: Instant::now(),
                command_tx,
            },
        );

        debug!("registered connection {} from {}", conn_id, remote_addr);
        Ok(conn_id)
    }

    /// Drop a connection's record. The caller must have run leave logic
    /// (via `begin_close`) first so presence never observes a dangling member.
    pub async fn unregister(&self, conn_id: &str) {
        self.connections.write().await.remove(conn_id);
    }

    /// Mark a connection as closing and return what cleanup needs to know.
    /// The first caller wins; later callers get None.
    pub async fn begin_close(&self, conn_id: &str) -> Option<CloseInfo> {
        let mut connections = self.connections.write().await;
        let state = connections.get_mut(conn_id)?;
        if !state.alive {
            return None;
        }
        state.alive = false;
        Some(CloseInfo {
            identity: state.identity.clone(),
            room: state.room.clone(),
        })
    }

    pub async fn identity(&self, conn_id: &str) -> Option<Identity> {
        self.connections
            .read()
            .await
            .get(conn_id)
            .and_then(|c| c.identity.clone())
    }

    pub async fn room(&self, conn_id: &str) -> Option<String> {
        self.connections
            .read()
            .await
            .get(conn_id)
            .and_then(|c| c.room.clone())
    }

    pub async fn set_identity(&self, conn_id: &str, identity: Identity) {
        if let Some(state) = self.connections.write().await.get_mut(conn_id) {
            state.identity = Some(identity);
        }
    }

    pub async fn set_room(&self, conn_id: &str, room: Option<String>) {
        if let Some(state) = self.connections.write().await.get_mut(conn_id) {
            state.room = room;
        }
    }

    /// Refresh a connection's heartbeat; any inbound frame counts
    pub async fn mark_heartbeat(&self, conn_id: &str) {
        if let Some(state) = self.connections.write().await.get_mut(conn_id) {
            state.last_heartbeat = Instant::now();
        }
    }

    /// Connections silent for longer than `timeout`. The caller runs them
    /// through the normal disconnect path.
    pub async fn sweep_dead(&self, timeout: Duration) -> Vec<String> {
        let now = Instant::now();
        self.connections
            .read()
            .await
            .iter()
            .filter(|(_, state)| state.alive && now.duration_since(state.last_heartbeat) > timeout)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Queue an event for one connection; errors when the peer is gone
    pub async fn deliver(&self, conn_id: &str, command: ConnectionCommand) -> Result<()> {
        let connections = self.connections.read().await;
        let state = connections
            .get(conn_id)
            .filter(|state| state.alive)
            .ok_or_else(|| EngineError::connection(format!("connection {} is gone", conn_id)))?;

        state
            .command_tx
            .send(command)
            .map_err(|_| EngineError::connection(format!("connection {} closed its channel", conn_id)))
    }

    /// Ids of all live connections
    pub async fn ids(&self) -> Vec<String> {
        self.connections
            .read()
            .await
            .iter()
            .filter(|(_, state)| state.alive)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ServerEvent, StatsSnapshot};

    fn addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    fn stats_event() -> ConnectionCommand {
        ConnectionCommand::Deliver(ServerEvent::StatsUpdate(StatsSnapshot {
            connections: 0,
            rooms: 0,
            total_messages: 0,
            peak_connections: 0,
            rooms_created: 0,
        }))
    }

    #[tokio::test]
    async fn test_register_and_state() {
        let registry = ConnectionRegistry::new(10);
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn_id = registry.register(tx, addr()).await.unwrap();

        assert!(registry.identity(&conn_id).await.is_none());
        registry
            .set_identity(&conn_id, Identity::new("runner", "tok-1"))
            .await;
        registry.set_room(&conn_id, Some("main".to_string())).await;

        assert_eq!(registry.identity(&conn_id).await.unwrap().token, "tok-1");
        assert_eq!(registry.room(&conn_id).await.as_deref(), Some("main"));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let registry = ConnectionRegistry::new(1);
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register(tx, addr()).await.unwrap();

        let (tx2, _rx2) = mpsc::unbounded_channel();
        let err = registry.register(tx2, addr()).await;
        assert!(matches!(err, Err(EngineError::ResourceLimit(_))));
    }

    #[tokio::test]
    async fn test_begin_close_first_caller_wins() {
        let registry = ConnectionRegistry::new(10);
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn_id = registry.register(tx, addr()).await.unwrap();
        registry.set_room(&conn_id, Some("main".to_string())).await;

        let info = registry.begin_close(&conn_id).await.unwrap();
        assert_eq!(info.room.as_deref(), Some("main"));

        // A racing cleanup path gets nothing
        assert!(registry.begin_close(&conn_id).await.is_none());

        registry.unregister(&conn_id).await;
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_deliver_to_closed_channel_fails() {
        let registry = ConnectionRegistry::new(10);
        let (tx, rx) = mpsc::unbounded_channel();
        let conn_id = registry.register(tx, addr()).await.unwrap();

        assert!(registry.deliver(&conn_id, stats_event()).await.is_ok());

        drop(rx);
        assert!(registry.deliver(&conn_id, stats_event()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_dead_by_silence() {
        let registry = ConnectionRegistry::new(10);
        let (tx, _rx) = mpsc::unbounded_channel();
        let stale = registry.register(tx, addr()).await.unwrap();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        let fresh = registry.register(tx2, addr()).await.unwrap();

        tokio::time::advance(Duration::from_secs(45)).await;
        registry.mark_heartbeat(&fresh).await;
        tokio::time::advance(Duration::from_secs(30)).await;

        // `stale` has been silent for 75s, `fresh` for 30s
        let dead = registry.sweep_dead(Duration::from_secs(60)).await;
        assert_eq!(dead, vec![stale.clone()]);

        // Once closing, a connection is not reported again
        registry.begin_close(&stale).await;
        assert!(registry.sweep_dead(Duration::from_secs(60)).await.is_empty());
    }
}
