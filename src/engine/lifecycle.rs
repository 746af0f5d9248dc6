//! Deletion timers for ephemeral rooms
//!
//! Per ephemeral room: Active (members present) ⇄ Draining (empty, timer
//! armed) → Deleted. Arming always cancels the previous timer first so at
//! most one is outstanding; every expiry carries the generation it was armed
//! under, so a fire that raced a cancel is recognized as stale and dropped.
//! Permanent rooms never enter this machine.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

/// An armed deletion timer
struct TimerEntry {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Emitted when a room's inactivity timer elapses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expiry {
    pub room_id: String,
    pub generation: u64,
}

/// Schedules and cancels per-room deletion timers
pub struct LifecycleManager {
    timers: Mutex<HashMap<String, TimerEntry>>,
    expired_tx: mpsc::UnboundedSender<Expiry>,
    timeout: Duration,
    next_generation: Mutex<u64>,
}

impl LifecycleManager {
    /// Create the manager and the channel its expiries arrive on
    pub fn new(timeout: Duration) -> (Self, mpsc::UnboundedReceiver<Expiry>) {
        let (expired_tx, expired_rx) = mpsc::unbounded_channel();
        (
            Self {
                timers: Mutex::new(HashMap::new()),
                expired_tx,
                timeout,
                next_generation: Mutex::new(0),
            },
            expired_rx,
        )
    }

    /// Arm the deletion timer for a room that just became empty.
    /// Cancel-before-arm keeps the one-timer-per-room invariant; a live
    /// predecessor is a programming error.
    pub async fn arm(&self, room_id: &str) {
        let generation = {
            let mut next = self.next_generation.lock().await;
            *next += 1;
            *next
        };

        let mut timers = self.timers.lock().await;
        if let Some(prev) = timers.remove(room_id) {
            debug_assert!(
                prev.handle.is_finished(),
                "deletion timer armed twice for room {}",
                room_id
            );
            prev.handle.abort();
        }

        let tx = self.expired_tx.clone();
        let id = room_id.to_string();
        let timeout = self.timeout;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(Expiry {
                room_id: id,
                generation,
            });
        });

        timers.insert(room_id.to_string(), TimerEntry { generation, handle });
        debug!("armed deletion timer for room {}", room_id);
    }

    /// Cancel any outstanding timer for a room (a join arrived in time)
    pub async fn cancel(&self, room_id: &str) {
        if let Some(entry) = self.timers.lock().await.remove(room_id) {
            entry.handle.abort();
            debug!("cancelled deletion timer for room {}", room_id);
        }
    }

    /// Check an expiry against the currently armed timer and consume it when
    /// it matches. A stale fire (cancelled or superseded) returns false and
    /// is a no-op.
    pub async fn take_if_current(&self, expiry: &Expiry) -> bool {
        let mut timers = self.timers.lock().await;
        match timers.get(&expiry.room_id) {
            Some(entry) if entry.generation == expiry.generation => {
                timers.remove(&expiry.room_id);
                true
            }
            _ => false,
        }
    }

    /// Number of outstanding timers
    pub async fn armed_count(&self) -> usize {
        self.timers.lock().await.len()
    }

    /// Abort every outstanding timer (server shutdown)
    pub async fn shutdown(&self) {
        let mut timers = self.timers.lock().await;
        for (_, entry) in timers.drain() {
            entry.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(30 * 60);

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_timeout() {
        let (lifecycle, mut expired_rx) = LifecycleManager::new(TIMEOUT);
        lifecycle.arm("room_a").await;
        assert_eq!(lifecycle.armed_count().await, 1);

        tokio::time::advance(TIMEOUT + Duration::from_secs(1)).await;

        let expiry = expired_rx.recv().await.unwrap();
        assert_eq!(expiry.room_id, "room_a");
        assert!(lifecycle.take_if_current(&expiry).await);
        assert_eq!(lifecycle.armed_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_expiry() {
        let (lifecycle, mut expired_rx) = LifecycleManager::new(TIMEOUT);
        lifecycle.arm("room_a").await;

        // A join at t=29min cancels the timer
        tokio::time::advance(Duration::from_secs(29 * 60)).await;
        lifecycle.cancel("room_a").await;

        tokio::time::advance(TIMEOUT).await;
        assert!(expired_rx.try_recv().is_err());
        assert_eq!(lifecycle.armed_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_fire_is_rejected() {
        let (lifecycle, mut expired_rx) = LifecycleManager::new(TIMEOUT);
        lifecycle.arm("room_a").await;

        tokio::time::advance(TIMEOUT + Duration::from_secs(1)).await;
        let expiry = expired_rx.recv().await.unwrap();

        // The fire raced a cancel (a join was processed first): stale
        lifecycle.cancel("room_a").await;
        assert!(!lifecycle.take_if_current(&expiry).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_supersedes_old_generation() {
        let (lifecycle, mut expired_rx) = LifecycleManager::new(TIMEOUT);
        lifecycle.arm("room_a").await;

        tokio::time::advance(TIMEOUT + Duration::from_secs(1)).await;
        let first = expired_rx.recv().await.unwrap();

        // Join + leave before the first expiry is processed re-arms
        lifecycle.cancel("room_a").await;
        lifecycle.arm("room_a").await;

        // The stale expiry must not delete the freshly re-armed room
        assert!(!lifecycle.take_if_current(&first).await);
        assert_eq!(lifecycle.armed_count().await, 1);

        tokio::time::advance(TIMEOUT + Duration::from_secs(1)).await;
        let second = expired_rx.recv().await.unwrap();
        assert!(lifecycle.take_if_current(&second).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exactly_one_deletion_per_drain() {
        let (lifecycle, mut expired_rx) = LifecycleManager::new(TIMEOUT);
        lifecycle.arm("room_a").await;

        tokio::time::advance(2 * TIMEOUT).await;
        let expiry = expired_rx.recv().await.unwrap();

        // Even if the consumer processes the same expiry twice, only the
        // first take succeeds
        assert!(lifecycle.take_if_current(&expiry).await);
        assert!(!lifecycle.take_if_current(&expiry).await);
        assert!(expired_rx.try_recv().is_err());
    }
}
