//! Checks applied by the input and output gates.
//!
//! A [`Check`] inspects the text crossing a gate and returns a [`Verdict`].
//! Built-in checks:
//!
//! | Stage | Check | Module |
//! |-------|-------|--------|
//! | input, output | `rbac` | [`rbac`] |
//! | input | `policy` | [`policy`] |
//! | input, output | `token_limit` | [`token_limit`] |
//! | input | `misuse` | [`misuse`] |
//! | input, output | `privacy` | [`privacy`] |
//! | output | `toxicity`, `hallucination`, `groundedness`, `relevancy` | [`scored`] |

pub mod misuse;
pub mod policy;
pub mod privacy;
pub mod rbac;
pub mod scored;
pub mod token_limit;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::gateway::AgentRequest;

/// Which side of the agent call a gate sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Input,
    Output,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Input => "input",
            Stage::Output => "output",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of a single check.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Pass,
    /// The check transformed the text; later checks and the caller see `text`.
    Rewrite { text: String, reason: String },
    Deny { reason: String },
    /// A human has to approve before the text may pass.
    Ask { reason: String },
}

impl Verdict {
    pub fn deny(reason: impl Into<String>) -> Self {
        Verdict::Deny {
            reason: reason.into(),
        }
    }
}

/// Everything a check can look at.
pub struct CheckContext<'a> {
    pub stage: Stage,
    pub request: &'a AgentRequest,
    /// Text under inspection: the prompt at the input gate, the response at the
    /// output gate. Reflects rewrites made by earlier checks.
    pub text: &'a str,
    /// The prompt as it was handed to the agent.
    pub prompt: &'a str,
}

/// A validation rule run by a gate.
#[async_trait::async_trait]
pub trait Check: Send + Sync {
    /// Stable name used in reports, audit entries and notifications.
    fn name(&self) -> &str;

    /// Inspect the context. Errors are handled by the gate's `on_error` policy.
    async fn check(&self, ctx: &CheckContext<'_>) -> Result<Verdict>;
}

/// Split text into lowercase alphanumeric words.
pub(crate) fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}
