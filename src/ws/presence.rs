use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::models::{CursorPosition, PresenceUser, UserId};

/// Liveness record of one user on one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEntry {
    pub user_id: UserId,
    pub display_name: Option<String>,
    pub cursor_position: Option<CursorPosition>,
    pub last_heartbeat_at: Instant,
}

impl PresenceEntry {
    fn to_user(&self, now: Instant) -> PresenceUser {
        let age = now.saturating_duration_since(self.last_heartbeat_at);
        let last_seen = chrono::Duration::from_std(age)
            .map(|age| Utc::now() - age)
            .unwrap_or_else(|_| Utc::now());
        PresenceUser {
            user_id: self.user_id.clone(),
            display_name: self.display_name.clone(),
            cursor_position: self.cursor_position,
            last_seen: last_seen.to_rfc3339(),
        }
    }
}

/// Outcome of a heartbeat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Heartbeat {
    /// No live entry existed; the roster changed
    Joined,
    Refreshed,
}

/// Connected identities of a document keyed by user, judged by heartbeat age
#[derive(Debug)]
pub struct PresenceTracker {
    stale_threshold: Duration,
    entries: HashMap<UserId, PresenceEntry>,
}

impl PresenceTracker {
    pub fn new(stale_threshold: Duration) -> Self {
        Self {
            stale_threshold,
            entries: HashMap::new(),
        }
    }

    fn is_fresh(&self, entry: &PresenceEntry, now: Instant) -> bool {
        now.saturating_duration_since(entry.last_heartbeat_at) <= self.stale_threshold
    }

    /// Record a heartbeat. An entry that already expired is replaced, which
    /// makes a late reconnect indistinguishable from a first join.
    pub fn heartbeat(
        &mut self,
        user_id: &str,
        display_name: Option<&str>,
        cursor_position: Option<CursorPosition>,
        now: Instant,
    ) -> Heartbeat {
        let live = self
            .entries
            .get(user_id)
            .is_some_and(|entry| self.is_fresh(entry, now));

        if live {
            if let Some(entry) = self.entries.get_mut(user_id) {
                entry.last_heartbeat_at = now;
                if cursor_position.is_some() {
                    entry.cursor_position = cursor_position;
                }
                if let Some(name) = display_name {
                    entry.display_name = Some(name.to_string());
                }
            }
            return Heartbeat::Refreshed;
        }

        self.entries.insert(
            user_id.to_string(),
            PresenceEntry {
                user_id: user_id.to_string(),
                display_name: display_name.map(str::to_string),
                cursor_position,
                last_heartbeat_at: now,
            },
        );
        Heartbeat::Joined
    }

    /// Entries whose last heartbeat is within the stale threshold, by user id
    pub fn roster(&self, now: Instant) -> Vec<PresenceEntry> {
        let mut live: Vec<PresenceEntry> = self
            .entries
            .values()
            .filter(|entry| self.is_fresh(entry, now))
            .cloned()
            .collect();
        live.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        live
    }

    /// Roster in wire form
    pub fn users(&self, now: Instant) -> Vec<PresenceUser> {
        self.roster(now).iter().map(|entry| entry.to_user(now)).collect()
    }

    /// Drop expired entries, returning the users that left
    pub fn sweep(&mut self, now: Instant) -> Vec<UserId> {
        let expired: Vec<UserId> = self
            .entries
            .values()
            .filter(|entry| !self.is_fresh(entry, now))
            .map(|entry| entry.user_id.clone())
            .collect();
        for user_id in &expired {
            self.entries.remove(user_id);
        }
        expired
    }

    pub fn remove(&mut self, user_id: &str) -> bool {
        self.entries.remove(user_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
