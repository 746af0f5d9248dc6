//! Process-wide counters derived from engine activity

use tokio::sync::RwLock;

use crate::protocol::StatsSnapshot;

#[derive(Debug, Default)]
struct Counters {
    connections: usize,
    peak_connections: usize,
    total_messages: u64,
    rooms_created: u64,
}

/// Derived bookkeeping; no invariants beyond `peak >= current` and
/// non-negative counters
#[derive(Debug, Default)]
pub struct StatsAggregator {
    counters: RwLock<Counters>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new connection; returns the current concurrent count
    pub async fn on_connect(&self) -> usize {
        let mut counters = self.counters.write().await;
        counters.connections += 1;
        if counters.connections > counters.peak_connections {
            counters.peak_connections = counters.connections;
        }
        counters.connections
    }

    pub async fn on_disconnect(&self) {
        let mut counters = self.counters.write().await;
        counters.connections = counters.connections.saturating_sub(1);
    }

    /// Record a sent message; returns the running total (used to throttle
    /// stats broadcasts)
    pub async fn on_message(&self) -> u64 {
        let mut counters = self.counters.write().await;
        counters.total_messages += 1;
        counters.total_messages
    }

    pub async fn on_room_created(&self) {
        self.counters.write().await.rooms_created += 1;
    }

    /// Current counters; the room count comes from the room registry
    pub async fn snapshot(&self, rooms: usize) -> StatsSnapshot {
        let counters = self.counters.read().await;
        StatsSnapshot {
            connections: counters.connections,
            rooms,
            total_messages: counters.total_messages,
            peak_connections: counters.peak_connections,
            rooms_created: counters.rooms_created,
        }
    }
}
