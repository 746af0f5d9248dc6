//! Event fan-out to room members and to all connections
//!
//! One dead peer must never abort delivery to the rest: a failed send is
//! reported on the dead-peer channel (the composition root runs the normal
//! disconnect path for it) and the fan-out continues.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::engine::connections::ConnectionRegistry;
use crate::engine::handler::ConnectionCommand;
use crate::engine::rooms::RoomRegistry;
use crate::protocol::ServerEvent;

/// Fans events out over the connection registry's command channels
pub struct Broadcaster {
    connections: Arc<ConnectionRegistry>,
    rooms: Arc<RoomRegistry>,
    dead_tx: mpsc::UnboundedSender<String>,
}

impl Broadcaster {
    /// Create the broadcaster and the channel dead peers are reported on
    pub fn new(
        connections: Arc<ConnectionRegistry>,
        rooms: Arc<RoomRegistry>,
    ) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (dead_tx, dead_rx) = mpsc::unbounded_channel();
        (
            Self {
                connections,
                rooms,
                dead_tx,
            },
            dead_rx,
        )
    }

    /// Deliver an event to every connection currently in a room, except the
    /// excluded one if given
    pub async fn to_room(&self, room_id: &str, event: ServerEvent, exclude: Option<&str>) {
        let Some(room) = self.rooms.get(room_id).await else {
            return;
        };

        for conn_id in room.connection_ids().await {
            if exclude == Some(conn_id.as_str()) {
                continue;
            }
            self.send(&conn_id, event.clone()).await;
        }
    }

    /// Deliver an event to every registered connection
    pub async fn to_all(&self, event: ServerEvent) {
        for conn_id in self.connections.ids().await {
            self.send(&conn_id, event.clone()).await;
        }
    }

    /// Deliver an event to one connection, reporting it when dead
    pub async fn to_connection(&self, conn_id: &str, event: ServerEvent) {
        self.send(conn_id, event).await;
    }

    async fn send(&self, conn_id: &str, event: ServerEvent) {
        if self
            .connections
            .deliver(conn_id, ConnectionCommand::Deliver(event))
            .await
            .is_err()
        {
            debug!("send to {} failed, scheduling cleanup", conn_id);
            let _ = self.dead_tx.send(conn_id.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{RoomDeletedNotice, TypingNotice};
    use crate::PermanentRoom;

    const DAY_MS: u64 = 24 * 60 * 60 * 1000;

    struct Fixture {
        connections: Arc<ConnectionRegistry>,
        rooms: Arc<RoomRegistry>,
        broadcaster: Broadcaster,
        dead_rx: mpsc::UnboundedReceiver<String>,
    }

    fn fixture() -> Fixture {
        let connections = Arc::new(ConnectionRegistry::new(100));
        let rooms = Arc::new(RoomRegistry::new(&[PermanentRoom::main()], DAY_MS, 5000, 0));
        let (broadcaster, dead_rx) = Broadcaster::new(Arc::clone(&connections), Arc::clone(&rooms));
        Fixture {
            connections,
            rooms,
            broadcaster,
            dead_rx,
        }
    }

    async fn connect(
        fixture: &Fixture,
        token: &str,
    ) -> (String, mpsc::UnboundedReceiver<ConnectionCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn_id = fixture
            .connections
            .register(tx, "127.0.0.1:9000".parse().unwrap())
            .await
            .unwrap();
        let room = fixture.rooms.get("main").await.unwrap();
        room.join(token, &conn_id).await;
        (conn_id, rx)
    }

    fn typing_event() -> ServerEvent {
        ServerEvent::Typing(TypingNotice {
            room: "main".to_string(),
            nickname: "runner".to_string(),
            is_typing: true,
        })
    }

    #[tokio::test]
    async fn test_dead_peer_does_not_abort_fanout() {
        let mut fixture = fixture();
        let (_a, mut rx_a) = connect(&fixture, "tok-a").await;
        let (b, rx_b) = connect(&fixture, "tok-b").await;
        let (_c, mut rx_c) = connect(&fixture, "tok-c").await;

        // b's transport is gone
        drop(rx_b);

        fixture.broadcaster.to_room("main", typing_event(), None).await;

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_c.try_recv().is_ok());
        assert_eq!(fixture.dead_rx.try_recv().unwrap(), b);
    }

    #[tokio::test]
    async fn test_exclusion() {
        let mut fixture = fixture();
        let (a, mut rx_a) = connect(&fixture, "tok-a").await;
        let (_b, mut rx_b) = connect(&fixture, "tok-b").await;

        fixture
            .broadcaster
            .to_room("main", typing_event(), Some(&a))
            .await;

        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
        assert!(fixture.dead_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_to_all_reaches_roomless_connections() {
        let fixture = fixture();
        let (tx, mut rx) = mpsc::unbounded_channel();
        fixture
            .connections
            .register(tx, "127.0.0.1:9000".parse().unwrap())
            .await
            .unwrap();

        let event = ServerEvent::RoomDeleted(RoomDeletedNotice {
            room: "room_x".to_string(),
            reason: "inactive for 30 minutes".to_string(),
        });
        fixture.broadcaster.to_all(event).await;

        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_unknown_room_is_noop() {
        let fixture = fixture();
        // Must not panic or report anything
        fixture
            .broadcaster
            .to_room("missing", typing_event(), None)
            .await;
    }
}
