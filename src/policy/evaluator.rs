use regex::{Regex, RegexBuilder};

use super::{glob_match, Action, PolicyConfig, Rule};
use crate::error::Result;

/// The prompt being evaluated against policy rules.
pub struct RuleInput<'a> {
    pub agent_id: &'a str,
    pub role: Option<&'a str>,
    pub text: &'a str,
}

/// Result of a policy evaluation, including the action and the reason.
#[derive(Debug, Clone)]
pub struct EvalResult {
    pub action: Action,
    pub reason: String,
    pub matched_rule: Option<String>,
}

struct CompiledRule {
    rule: Rule,
    patterns: Vec<Regex>,
}

/// A [`PolicyConfig`] with every rule's content patterns compiled once.
pub struct CompiledPolicy {
    default: Action,
    rules: Vec<CompiledRule>,
}

impl CompiledPolicy {
    /// Compile all rule patterns (case-insensitive).
    pub fn compile(config: &PolicyConfig) -> Result<Self> {
        let mut rules = Vec::with_capacity(config.rules.len());
        for rule in &config.rules {
            let patterns = rule
                .patterns
                .iter()
                .map(|p| RegexBuilder::new(p).case_insensitive(true).build())
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rules.push(CompiledRule {
                rule: rule.clone(),
                patterns,
            });
        }
        Ok(Self {
            default: config.default,
            rules,
        })
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

/// Evaluate a prompt against the compiled policy.
/// Rules are matched sequentially; the first matching rule wins.
/// If no rule matches, the default action is returned.
pub fn evaluate(input: &RuleInput<'_>, policy: &CompiledPolicy) -> EvalResult {
    for compiled in &policy.rules {
        if matches_rule(input, compiled) {
            return EvalResult {
                action: compiled.rule.action,
                reason: format!("Matched rule: {}", compiled.rule.name),
                matched_rule: Some(compiled.rule.name.clone()),
            };
        }
    }

    EvalResult {
        action: policy.default,
        reason: "No matching rule; default policy applied".to_string(),
        matched_rule: None,
    }
}

fn matches_rule(input: &RuleInput<'_>, compiled: &CompiledRule) -> bool {
    let rule = &compiled.rule;

    if !rule.agents.iter().any(|a| glob_match(a, input.agent_id)) {
        return false;
    }

    if let Some(roles) = &rule.roles {
        match input.role {
            Some(role) if roles.iter().any(|r| r == role) => {}
            _ => return false,
        }
    }

    compiled.patterns.is_empty() || compiled.patterns.iter().any(|re| re.is_match(input.text))
}
