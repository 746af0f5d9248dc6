//! Bounded, time-windowed message history per room
//!
//! Appends prune as they go; a periodic sweep covers rooms that went silent,
//! since append-triggered pruning alone would leave stale data in them
//! indefinitely.

use crate::protocol::StoredMessage;

/// Ordered log of retained messages for one room
#[derive(Debug)]
pub struct MessageLog {
    entries: Vec<StoredMessage>,
    /// Maximum message age in milliseconds
    retention_ms: u64,
    /// Hard cap on retained entries
    max_entries: usize,
}

impl MessageLog {
    pub fn new(retention_ms: u64, max_entries: usize) -> Self {
        Self {
            entries: Vec::new(),
            retention_ms,
            max_entries,
        }
    }

    /// Append a message, then prune relative to its timestamp
    pub fn append(&mut self, message: StoredMessage) {
        let now = message.timestamp;
        self.entries.push(message);
        self.prune(now);
    }

    /// Drop entries older than the retention window, then evict oldest-first
    /// down to the cap. Returns how many entries were removed.
    pub fn prune(&mut self, now: u64) -> usize {
        let before = self.entries.len();
        let cutoff = now.saturating_sub(self.retention_ms);

        self.entries.retain(|msg| msg.timestamp > cutoff);

        if self.entries.len() > self.max_entries {
            let excess = self.entries.len() - self.max_entries;
            self.entries.drain(..excess);
        }

        before - self.entries.len()
    }

    /// Messages within the retention window, oldest first, for delivery to a
    /// newly joined connection
    pub fn snapshot(&self, now: u64) -> Vec<StoredMessage> {
        let cutoff = now.saturating_sub(self.retention_ms);
        self.entries
            .iter()
            .filter(|msg| msg.timestamp > cutoff)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR_MS: u64 = 60 * 60 * 1000;
    const DAY_MS: u64 = 24 * HOUR_MS;

    fn message(id: &str, timestamp: u64) -> StoredMessage {
        StoredMessage {
            id: id.to_string(),
            room: "main".to_string(),
            text: "hi".to_string(),
            nickname: "runner".to_string(),
            avatar: "r".to_string(),
            user_id: "tok-1".to_string(),
            timestamp,
        }
    }

    #[test]
    fn test_retention_window() {
        let mut log = MessageLog::new(DAY_MS, 5000);
        let start = 100 * DAY_MS;

        log.append(message("old", start));
        log.append(message("fresh", start + 24 * HOUR_MS));

        // 25 hours after the first message: it falls out, the 1-hour-old
        // message survives
        let now = start + 25 * HOUR_MS;
        let removed = log.prune(now);
        assert_eq!(removed, 1);

        let snapshot = log.snapshot(now);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, "fresh");
    }

    #[test]
    fn test_cap_evicts_oldest_first() {
        let mut log = MessageLog::new(DAY_MS, 3);
        let base = 100 * DAY_MS;

        for i in 0..5u64 {
            log.append(message(&format!("m{}", i), base + i));
        }

        assert_eq!(log.len(), 3);
        let snapshot = log.snapshot(base + 10);
        let ids: Vec<&str> = snapshot.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn test_snapshot_oldest_first() {
        let mut log = MessageLog::new(DAY_MS, 100);
        let base = 100 * DAY_MS;

        log.append(message("a", base + 1));
        log.append(message("b", base + 2));
        log.append(message("c", base + 3));

        let ids: Vec<String> = log
            .snapshot(base + 10)
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_sweep_on_silent_log() {
        let mut log = MessageLog::new(DAY_MS, 100);
        let base = 100 * DAY_MS;
        log.append(message("only", base));

        // No appends happen, but a later sweep still clears the stale entry
        assert_eq!(log.prune(base + DAY_MS + 1), 1);
        assert!(log.is_empty());
        assert_eq!(log.prune(base + DAY_MS + 2), 0);
    }
}
