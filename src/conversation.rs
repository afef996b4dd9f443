//! In-memory conversation state: bounded per-channel history and the
//! recent-author window behind the double-response guard.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Maximum turns retained per (scope, channel) conversation.
pub const MAX_HISTORY_TURNS: usize = 50;

/// How long a recent-author entry stays relevant.
pub const RECENT_AUTHOR_TTL: Duration = Duration::from_secs(5);

/// Speaker role of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// A single turn in a conversation. Ordering is insertion order;
/// timestamps are informational.
#[derive(Debug, Clone)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Sliding window over the most recent turns of one conversation.
#[derive(Debug, Default)]
pub struct ConversationHistory {
    turns: VecDeque<ConversationTurn>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn, evicting the oldest once the window is full.
    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push_back(turn);
        while self.turns.len() > MAX_HISTORY_TURNS {
            self.turns.pop_front();
        }
    }

    /// Turns in arrival order, oldest first.
    pub fn turns(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// Per-channel record of who posted in the last few seconds.
///
/// Used to detect that a different agent just answered in the same channel,
/// so two bots don't pile onto one human message. Time-windowed, not
/// exclusive: a heuristic, not a lock.
#[derive(Debug, Default)]
pub struct RecentAuthorWindow {
    entries: VecDeque<(u64, Instant)>,
}

impl RecentAuthorWindow {
    /// Record an author posting now, dropping entries past the TTL.
    pub fn record(&mut self, author_id: u64, now: Instant) {
        self.entries.push_back((author_id, now));
        self.prune(now);
    }

    /// Drop entries older than the TTL.
    pub fn prune(&mut self, now: Instant) {
        self.entries
            .retain(|(_, at)| now.duration_since(*at) < RECENT_AUTHOR_TTL);
    }

    /// True when someone other than `author_id` or the agent itself posted
    /// within the window.
    pub fn has_other_recent_author(&self, author_id: u64, self_id: u64) -> bool {
        self.entries
            .iter()
            .any(|(author, _)| *author != author_id && *author != self_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_bounded_to_most_recent_turns() {
        let mut history = ConversationHistory::new();
        for n in 0..60 {
            history.push(ConversationTurn::user(format!("message {n}")));
        }
        assert_eq!(history.len(), MAX_HISTORY_TURNS);
        let contents: Vec<&str> = history.turns().map(|t| t.content.as_str()).collect();
        assert_eq!(contents.first(), Some(&"message 10"));
        assert_eq!(contents.last(), Some(&"message 59"));
    }

    #[test]
    fn test_history_shorter_than_bound_keeps_everything() {
        let mut history = ConversationHistory::new();
        for n in 0..7 {
            history.push(ConversationTurn::user(format!("message {n}")));
        }
        assert_eq!(history.len(), 7);
        let contents: Vec<&str> = history.turns().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, ["message 0", "message 1", "message 2", "message 3", "message 4", "message 5", "message 6"]);
    }

    #[test]
    fn test_window_prunes_expired_entries() {
        let start = Instant::now();
        let mut window = RecentAuthorWindow::default();
        window.record(1, start);
        window.record(2, start + Duration::from_secs(1));
        assert!(window.has_other_recent_author(1, 99));

        window.prune(start + Duration::from_secs(10));
        assert!(!window.has_other_recent_author(1, 99));
    }

    #[test]
    fn test_window_ignores_current_author_and_self() {
        let now = Instant::now();
        let mut window = RecentAuthorWindow::default();
        window.record(1, now);
        window.record(99, now);
        // Only the author themselves and the agent posted recently.
        assert!(!window.has_other_recent_author(1, 99));
        // A third party trips the guard.
        window.record(2, now);
        assert!(window.has_other_recent_author(1, 99));
    }
}
