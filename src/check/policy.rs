use tracing::debug;

use super::{Check, CheckContext, Verdict};
use crate::error::Result;
use crate::policy::evaluator::{self, CompiledPolicy, RuleInput};
use crate::policy::{Action, PolicyConfig};

/// Runs the ordered content policy rules against the prompt.
pub struct PolicyCheck {
    policy: CompiledPolicy,
}

impl PolicyCheck {
    pub fn new(config: &PolicyConfig) -> Result<Self> {
        Ok(Self {
            policy: CompiledPolicy::compile(config)?,
        })
    }
}

#[async_trait::async_trait]
impl Check for PolicyCheck {
    fn name(&self) -> &str {
        "policy"
    }

    async fn check(&self, ctx: &CheckContext<'_>) -> Result<Verdict> {
        let input = RuleInput {
            agent_id: &ctx.request.agent_id,
            role: ctx.request.role.as_deref(),
            text: ctx.text,
        };
        let result = evaluator::evaluate(&input, &self.policy);
        debug!(
            agent = %ctx.request.agent_id,
            rule = ?result.matched_rule,
            "policy evaluated to {:?}",
            result.action
        );
        Ok(match result.action {
            Action::Allow => Verdict::Pass,
            Action::Deny => Verdict::Deny {
                reason: result.reason,
            },
            Action::Ask => Verdict::Ask {
                reason: result.reason,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::Stage;
    use crate::gateway::AgentRequest;

    fn policy(json: &str) -> PolicyCheck {
        let config: PolicyConfig = serde_json::from_str(json).unwrap();
        PolicyCheck::new(&config).unwrap()
    }

    async fn run(check: &PolicyCheck, prompt: &str) -> Verdict {
        let request = AgentRequest::new("Agent1", prompt);
        let ctx = CheckContext {
            stage: Stage::Input,
            request: &request,
            text: prompt,
            prompt,
        };
        check.check(&ctx).await.unwrap()
    }

    #[tokio::test]
    async fn matching_deny_rule_denies() {
        let check = policy(
            r#"{"rules": [{"name": "no-delete", "patterns": ["drop\\s+table"], "action": "deny"}]}"#,
        );
        let verdict = run(&check, "please DROP TABLE users").await;
        assert_eq!(verdict, Verdict::deny("Matched rule: no-delete"));
    }

    #[tokio::test]
    async fn ask_rule_escalates() {
        let check = policy(r#"{"rules": [{"name": "money", "patterns": ["refund"], "action": "ask"}]}"#);
        assert!(matches!(run(&check, "issue a refund").await, Verdict::Ask { .. }));
    }

    #[tokio::test]
    async fn default_allow_passes() {
        let check = policy(r#"{"default": "allow"}"#);
        assert_eq!(run(&check, "hello").await, Verdict::Pass);
    }

    #[tokio::test]
    async fn default_deny_denies_unmatched() {
        let check = policy(
            r#"{"default": "deny", "rules": [{"name": "routes", "patterns": ["route"], "action": "allow"}]}"#,
        );
        assert_eq!(run(&check, "find a route").await, Verdict::Pass);
        assert!(matches!(run(&check, "tell me a joke").await, Verdict::Deny { .. }));
    }
}
