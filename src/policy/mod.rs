//! Content policy rules for the input gate.
//!
//! This module holds the rule types deserialized from the `input_gate.policy`
//! section ([`PolicyConfig`], [`Rule`]) and the rule evaluation engine
//! ([`evaluator`]) that decides whether a prompt is allowed, denied, or
//! escalated to a human for approval.

pub mod evaluator;

use serde::{Deserialize, Serialize};

/// The action to take when a prompt matches a policy rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Let the prompt through to the next check.
    #[default]
    Allow,
    /// Stop the prompt at the input gate.
    Deny,
    /// Ask a human responder for an allow/deny decision.
    Ask,
}

/// A single policy rule matching prompts by agent, role and content.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Rule {
    /// Human-readable rule name (e.g., `"no-payments"`).
    pub name: String,
    /// Agent id patterns. Supports `"*"`, `"prefix*"`, `"*suffix"` and exact ids.
    #[serde(default = "match_all")]
    pub agents: Vec<String>,
    /// Optional role filter. If `None`, matches every role (and requests without one).
    #[serde(default)]
    pub roles: Option<Vec<String>>,
    /// Case-insensitive content regexes; any match counts. Empty matches every prompt.
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Action to take when this rule matches.
    pub action: Action,
    /// Optional note for documentation purposes.
    #[serde(default)]
    pub note: Option<String>,
}

fn match_all() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_true() -> bool {
    true
}

/// Policy check configuration (`input_gate.policy` section).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PolicyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Action when no rule matches.
    #[serde(default)]
    pub default: Action,
    /// Ordered list of rules; first match wins.
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// Match `value` against a simple glob: `"*"`, `"prefix*"`, `"*suffix"` or an exact string.
pub fn glob_match(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        true
    } else if let Some(prefix) = pattern.strip_suffix('*') {
        value.starts_with(prefix)
    } else if let Some(suffix) = pattern.strip_prefix('*') {
        value.ends_with(suffix)
    } else {
        pattern == value
    }
}
