//! Human approval for `Ask` verdicts.
//!
//! A policy rule with `"action": "ask"` suspends the gate until a person
//! decides. The gate hands an [`ApprovalRequest`] to the [`AskBroadcaster`],
//! which puts it in front of every registered [`AskResponder`] at once and
//! adopts the first decision. Anything short of an explicit approval (no
//! responders, every responder abstaining, or the timeout) denies.

pub mod terminal;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::check::Stage;
use crate::gateway::AgentRequest;

/// Responders never see more than this many bytes of the gated text.
const MAX_EXCERPT_BYTES: usize = 4096;

/// A pending approval, as shown to responders.
#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    pub id: String,
    pub stage: Stage,
    pub agent_id: String,
    pub role: Option<String>,
    /// Why approval is needed, e.g. `"Matched rule: payments-need-approval"`.
    pub reason: String,
    pub excerpt: String,
}

impl ApprovalRequest {
    pub fn new(stage: Stage, request: &AgentRequest, reason: &str, text: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            stage,
            agent_id: request.agent_id.clone(),
            role: request.role.clone(),
            reason: reason.to_string(),
            excerpt: excerpt(text),
        }
    }
}

/// An approval backend.
#[async_trait::async_trait]
pub trait AskResponder: Send + Sync {
    /// `Some(true)` approves, `Some(false)` rejects, `None` abstains.
    async fn decide(&self, request: &ApprovalRequest) -> Option<bool>;

    /// Called on every responder once the request is settled.
    async fn resolved(&self, _id: &str, _allowed: bool) {}

    fn name(&self) -> &str;
}

pub struct AskBroadcaster {
    responders: Vec<Arc<dyn AskResponder>>,
    timeout: Duration,
}

impl AskBroadcaster {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            responders: Vec::new(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn add_responder(&mut self, responder: Arc<dyn AskResponder>) {
        self.responders.push(responder);
    }

    pub fn responder_count(&self) -> usize {
        self.responders.len()
    }

    /// Race all responders and return whether the request was approved.
    pub async fn ask(&self, request: ApprovalRequest) -> bool {
        if self.responders.is_empty() {
            warn!(
                "Approval {} for agent '{}' has no responders, denying",
                request.id, request.agent_id
            );
            return false;
        }

        let shared = Arc::new(request);
        let mut pending = JoinSet::new();
        for responder in &self.responders {
            let responder = responder.clone();
            let request = shared.clone();
            pending.spawn(async move { responder.decide(&request).await });
        }

        let first_decision = async {
            while let Some(joined) = pending.join_next().await {
                if let Ok(Some(decision)) = joined {
                    return Some(decision);
                }
            }
            None
        };
        let allowed = match tokio::time::timeout(self.timeout, first_decision).await {
            Ok(Some(decision)) => decision,
            Ok(None) => {
                warn!("Approval {}: every responder abstained, denying", shared.id);
                false
            }
            Err(_) => {
                warn!("Approval {} timed out after {:?}, denying", shared.id, self.timeout);
                false
            }
        };
        pending.abort_all();

        info!(
            "Approval {} ({} gate, agent '{}'): {}",
            shared.id,
            shared.stage,
            shared.agent_id,
            if allowed { "approved" } else { "rejected" }
        );
        for responder in &self.responders {
            responder.resolved(&shared.id, allowed).await;
        }
        allowed
    }
}

fn excerpt(text: &str) -> String {
    if text.len() <= MAX_EXCERPT_BYTES {
        return text.to_string();
    }
    let mut end = MAX_EXCERPT_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}
