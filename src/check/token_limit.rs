use std::sync::Arc;

use super::{Check, CheckContext, Stage, Verdict};
use crate::config::TokenLimitConfig;
use crate::error::Result;
use crate::usage::{estimate_tokens, UsageLedger};

/// Caps the size of a single prompt/response and, optionally, a session's
/// cumulative token usage.
pub struct TokenLimitCheck {
    max_tokens: u64,
    session_budget: Option<u64>,
    ledger: Arc<UsageLedger>,
}

impl TokenLimitCheck {
    pub fn new(config: &TokenLimitConfig, ledger: Arc<UsageLedger>) -> Self {
        Self {
            max_tokens: config.max_tokens,
            session_budget: config.session_budget,
            ledger,
        }
    }
}

#[async_trait::async_trait]
impl Check for TokenLimitCheck {
    fn name(&self) -> &str {
        "token_limit"
    }

    async fn check(&self, ctx: &CheckContext<'_>) -> Result<Verdict> {
        let tokens = estimate_tokens(ctx.text);
        if tokens > self.max_tokens {
            return Ok(Verdict::deny(format!(
                "{} of ~{tokens} tokens exceeds limit of {}",
                match ctx.stage {
                    Stage::Input => "prompt",
                    Stage::Output => "response",
                },
                self.max_tokens
            )));
        }

        if let Some(budget) = self.session_budget {
            let session = &ctx.request.session_id;
            // The prompt of this request is not in the ledger until it completes.
            let pending = match ctx.stage {
                Stage::Input => tokens,
                Stage::Output => estimate_tokens(ctx.prompt) + tokens,
            };
            let used = self.ledger.total(session);
            if used + pending > budget {
                return Ok(Verdict::deny(format!(
                    "session '{session}' budget exhausted: {used} used + {pending} requested > {budget}"
                )));
            }
        }

        Ok(Verdict::Pass)
    }
}
