//! Token estimation and per-session accounting.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;

/// Rough token count: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> u64 {
    let chars = text.chars().count() as u64;
    chars.div_ceil(4)
}

/// Cumulative usage for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub response_tokens: u64,
    pub requests: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.response_tokens
    }
}

/// Thread-safe token ledger keyed by session id.
#[derive(Debug, Default)]
pub struct UsageLedger {
    sessions: Mutex<HashMap<String, Usage>>,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed request.
    pub fn record(&self, session: &str, prompt_tokens: u64, response_tokens: u64) {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        add(&mut sessions, session, prompt_tokens, response_tokens);
    }

    /// Record one completed request unless it would take the session past
    /// `budget`. The check and the update happen under one lock, so
    /// concurrent requests cannot overshoot together. On refusal, returns the
    /// tokens already used.
    pub fn record_within(
        &self,
        session: &str,
        prompt_tokens: u64,
        response_tokens: u64,
        budget: Option<u64>,
    ) -> Result<(), u64> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(budget) = budget {
            let used = sessions.get(session).map(Usage::total).unwrap_or(0);
            if used + prompt_tokens + response_tokens > budget {
                return Err(used);
            }
        }
        add(&mut sessions, session, prompt_tokens, response_tokens);
        Ok(())
    }

    pub fn usage(&self, session: &str) -> Usage {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session)
            .copied()
            .unwrap_or_default()
    }

    /// Total tokens consumed by the session so far.
    pub fn total(&self, session: &str) -> u64 {
        self.usage(session).total()
    }

    pub fn reset(&self, session: &str) {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session);
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

fn add(sessions: &mut HashMap<String, Usage>, session: &str, prompt_tokens: u64, response_tokens: u64) {
    let usage = sessions.entry(session.to_string()).or_default();
    usage.prompt_tokens += prompt_tokens;
    usage.response_tokens += response_tokens;
    usage.requests += 1;
}
