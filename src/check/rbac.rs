//! Role-based access control.
//!
//! At the input gate a role must exist and be allowed to call the target
//! agent. At the output gate the response must not contain content the
//! role is barred from receiving.

use std::collections::HashMap;

use regex::{Regex, RegexBuilder};

use super::{Check, CheckContext, Stage, Verdict};
use crate::config::RbacConfig;
use crate::error::Result;
use crate::policy::glob_match;

struct CompiledRole {
    agents: Vec<String>,
    output_deny: Vec<Regex>,
}

pub struct RbacCheck {
    default_role: Option<String>,
    roles: HashMap<String, CompiledRole>,
}

impl RbacCheck {
    pub fn new(config: &RbacConfig) -> Result<Self> {
        let mut roles = HashMap::with_capacity(config.roles.len());
        for (name, role) in &config.roles {
            let output_deny = role
                .output_deny_patterns
                .iter()
                .map(|p| RegexBuilder::new(p).case_insensitive(true).build())
                .collect::<std::result::Result<Vec<_>, _>>()?;
            roles.insert(
                name.clone(),
                CompiledRole {
                    agents: role.agents.clone(),
                    output_deny,
                },
            );
        }
        Ok(Self {
            default_role: config.default_role.clone(),
            roles,
        })
    }
}

#[async_trait::async_trait]
impl Check for RbacCheck {
    fn name(&self) -> &str {
        "rbac"
    }

    async fn check(&self, ctx: &CheckContext<'_>) -> Result<Verdict> {
        let Some(role_name) = ctx
            .request
            .role
            .as_deref()
            .or(self.default_role.as_deref())
        else {
            return Ok(Verdict::deny("request carries no role and no default role is set"));
        };

        let Some(role) = self.roles.get(role_name) else {
            return Ok(Verdict::deny(format!("unknown role '{role_name}'")));
        };

        match ctx.stage {
            Stage::Input => {
                let agent = &ctx.request.agent_id;
                if role.agents.iter().any(|p| glob_match(p, agent)) {
                    Ok(Verdict::Pass)
                } else {
                    Ok(Verdict::deny(format!(
                        "role '{role_name}' may not call agent '{agent}'"
                    )))
                }
            }
            Stage::Output => {
                match role.output_deny.iter().find(|re| re.is_match(ctx.text)) {
                    Some(re) => Ok(Verdict::deny(format!(
                        "response matches content restricted for role '{role_name}' ({})",
                        re.as_str()
                    ))),
                    None => Ok(Verdict::Pass),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::AgentRequest;

    fn rbac() -> RbacCheck {
        let config: RbacConfig = serde_json::from_str(
            r#"{
                "roles": {
                    "analyst": { "agents": ["Agent*"], "output_deny_patterns": ["salary"] },
                    "admin": { "agents": ["*"] }
                }
            }"#,
        )
        .unwrap();
        RbacCheck::new(&config).unwrap()
    }

    async fn run(check: &RbacCheck, stage: Stage, request: &AgentRequest, text: &str) -> Verdict {
        let ctx = CheckContext {
            stage,
            request,
            text,
            prompt: &request.prompt,
        };
        check.check(&ctx).await.unwrap()
    }

    #[tokio::test]
    async fn permitted_agent_passes() {
        let request = AgentRequest::new("Agent1", "hi").with_role("analyst");
        assert_eq!(run(&rbac(), Stage::Input, &request, "hi").await, Verdict::Pass);
    }

    #[tokio::test]
    async fn foreign_agent_is_denied() {
        let request = AgentRequest::new("billing", "hi").with_role("analyst");
        let verdict = run(&rbac(), Stage::Input, &request, "hi").await;
        assert_eq!(
            verdict,
            Verdict::deny("role 'analyst' may not call agent 'billing'")
        );
    }

    #[tokio::test]
    async fn missing_role_is_denied() {
        let request = AgentRequest::new("Agent1", "hi");
        assert!(matches!(
            run(&rbac(), Stage::Input, &request, "hi").await,
            Verdict::Deny { .. }
        ));
    }

    #[tokio::test]
    async fn unknown_role_is_denied() {
        let request = AgentRequest::new("Agent1", "hi").with_role("intruder");
        assert_eq!(
            run(&rbac(), Stage::Input, &request, "hi").await,
            Verdict::deny("unknown role 'intruder'")
        );
    }

    #[tokio::test]
    async fn default_role_fills_in() {
        let config: RbacConfig = serde_json::from_str(
            r#"{ "default_role": "guest", "roles": { "guest": { "agents": ["public-*"] } } }"#,
        )
        .unwrap();
        let check = RbacCheck::new(&config).unwrap();
        let request = AgentRequest::new("public-faq", "hi");
        assert_eq!(run(&check, Stage::Input, &request, "hi").await, Verdict::Pass);
    }

    #[tokio::test]
    async fn restricted_output_is_denied() {
        let request = AgentRequest::new("Agent1", "hi").with_role("analyst");
        let verdict = run(&rbac(), Stage::Output, &request, "Her SALARY is 90k").await;
        assert!(matches!(verdict, Verdict::Deny { reason } if reason.contains("analyst")));

        let admin = AgentRequest::new("Agent1", "hi").with_role("admin");
        assert_eq!(
            run(&rbac(), Stage::Output, &admin, "Her salary is 90k").await,
            Verdict::Pass
        );
    }
}
