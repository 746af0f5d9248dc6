//! Unique-identity presence tracking per room
//!
//! A user with two open tabs must not produce two join announcements nor be
//! double-counted in "N users online", so the table maps identity tokens to
//! the set of connections currently held under them. Join/leave notices are
//! gated on the first connection in and the last connection out.

use std::collections::{HashMap, HashSet};

/// Result of adding a connection under an identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOutcome {
    /// True only if this identity had no open connections in the room before
    pub is_new_identity: bool,
    /// Distinct identities present after the join
    pub unique_count: usize,
}

/// Result of removing a connection from under an identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaveOutcome {
    /// True only if this removal dropped the identity's connection count to zero
    pub is_last_connection: bool,
    /// Distinct identities present after the leave
    pub unique_count: usize,
}

/// Per-room presence table: identity token -> open connection ids
#[derive(Debug, Default)]
pub struct RoomPresence {
    occupants: HashMap<String, HashSet<String>>,
}

impl RoomPresence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection under an identity token
    pub fn join(&mut self, token: &str, conn_id: &str) -> JoinOutcome {
        let connections = self.occupants.entry(token.to_string()).or_default();
        let is_new_identity = connections.is_empty();
        connections.insert(conn_id.to_string());

        JoinOutcome {
            is_new_identity,
            unique_count: self.occupants.len(),
        }
    }

    /// Remove a connection from under an identity token
    pub fn leave(&mut self, token: &str, conn_id: &str) -> LeaveOutcome {
        let mut is_last_connection = false;

        if let Some(connections) = self.occupants.get_mut(token) {
            connections.remove(conn_id);
            if connections.is_empty() {
                self.occupants.remove(token);
                is_last_connection = true;
            }
        }

        LeaveOutcome {
            is_last_connection,
            unique_count: self.occupants.len(),
        }
    }

    /// Distinct identities with at least one open connection
    pub fn unique_count(&self) -> usize {
        self.occupants.len()
    }

    /// All connection ids currently in the room, across identities
    pub fn connection_ids(&self) -> Vec<String> {
        self.occupants.values().flatten().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.occupants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_tabs_count_once() {
        let mut presence = RoomPresence::new();

        let first = presence.join("tok-u", "conn-1");
        assert!(first.is_new_identity);
        assert_eq!(first.unique_count, 1);

        // Second tab of the same user: no new identity, count unchanged
        let second = presence.join("tok-u", "conn-2");
        assert!(!second.is_new_identity);
        assert_eq!(second.unique_count, 1);

        // Closing one tab leaves the identity present
        let leave = presence.leave("tok-u", "conn-1");
        assert!(!leave.is_last_connection);
        assert_eq!(leave.unique_count, 1);

        // Closing the last tab removes the identity
        let last = presence.leave("tok-u", "conn-2");
        assert!(last.is_last_connection);
        assert_eq!(last.unique_count, 0);
        assert!(presence.is_empty());
    }

    #[test]
    fn test_distinct_identities() {
        let mut presence = RoomPresence::new();
        presence.join("tok-a", "conn-1");
        presence.join("tok-b", "conn-2");
        presence.join("tok-b", "conn-3");

        assert_eq!(presence.unique_count(), 2);
        let mut ids = presence.connection_ids();
        ids.sort();
        assert_eq!(ids, vec!["conn-1", "conn-2", "conn-3"]);
    }

    #[test]
    fn test_leave_unknown_is_noop() {
        let mut presence = RoomPresence::new();
        presence.join("tok-a", "conn-1");

        let outcome = presence.leave("tok-missing", "conn-9");
        assert!(!outcome.is_last_connection);
        assert_eq!(outcome.unique_count, 1);

        // Same connection leaving twice must not report last-connection twice
        presence.leave("tok-a", "conn-1");
        let again = presence.leave("tok-a", "conn-1");
        assert!(!again.is_last_connection);
        assert_eq!(again.unique_count, 0);
    }
}
