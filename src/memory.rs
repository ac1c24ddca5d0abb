//! Bounded per-session conversation memory.
//!
//! Shared by every concurrent invocation through the gateway. Reads hand out
//! clones so no lock is held across an `.await`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One remembered prompt/response exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub prompt: String,
    pub response: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn new(prompt: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            response: response.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug)]
pub struct ConversationMemory {
    max_turns: AtomicUsize,
    sessions: Mutex<HashMap<String, VecDeque<Turn>>>,
}

impl ConversationMemory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            max_turns: AtomicUsize::new(max_turns.max(1)),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Append a turn, evicting the oldest ones past `max_turns`.
    pub fn append(&self, session: &str, turn: Turn) {
        let max = self.max_turns.load(Ordering::Relaxed);
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let turns = sessions.entry(session.to_string()).or_default();
        turns.push_back(turn);
        while turns.len() > max {
            turns.pop_front();
        }
    }

    /// Turns of the session, oldest first.
    pub fn history(&self, session: &str) -> Vec<Turn> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session)
            .map(|turns| turns.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear(&self, session: &str) {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session);
    }

    /// Ids of the sessions with at least one remembered turn, sorted.
    pub fn sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Change the bound for future appends. Sessions already over the new
    /// bound are trimmed on their next append.
    pub fn set_max_turns(&self, max_turns: usize) {
        self.max_turns.store(max_turns.max(1), Ordering::Relaxed);
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns.load(Ordering::Relaxed)
    }
}
