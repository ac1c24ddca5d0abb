use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::info;

use super::{Check, CheckContext, Verdict};
use crate::config::{PrivacyConfig, PrivacyMode};
use crate::dlp::patterns::RegexScanner;
use crate::dlp::DlpScanner;
use crate::error::Result;
use crate::notification::{Dispatcher, NotificationEvent};

/// Scans the text for secrets and personal data, masking or denying it.
pub struct PrivacyCheck {
    scanner: Arc<dyn DlpScanner>,
    mode: PrivacyMode,
    notifications: Dispatcher,
}

impl PrivacyCheck {
    pub fn new(scanner: Arc<dyn DlpScanner>, mode: PrivacyMode, notifications: Dispatcher) -> Self {
        Self {
            scanner,
            mode,
            notifications,
        }
    }

    /// Build the check from its config section: all built-in patterns, or the
    /// named subset when `patterns` is set.
    pub fn from_config(config: &PrivacyConfig, notifications: Dispatcher) -> Self {
        let scanner = match &config.patterns {
            Some(names) => RegexScanner::with_patterns(names),
            None => RegexScanner::new(),
        };
        Self::new(Arc::new(scanner), config.mode, notifications)
    }
}

#[async_trait::async_trait]
impl Check for PrivacyCheck {
    fn name(&self) -> &str {
        "privacy"
    }

    async fn check(&self, ctx: &CheckContext<'_>) -> Result<Verdict> {
        let (masked, findings) = self.scanner.mask(ctx.text);
        if findings.is_empty() {
            return Ok(Verdict::Pass);
        }

        for finding in &findings {
            info!(
                stage = %ctx.stage,
                agent = %ctx.request.agent_id,
                pattern = %finding.pattern_name,
                severity = %finding.severity,
                excerpt = %finding.matched_text,
                "Sensitive data found"
            );
            self.notifications.dispatch(NotificationEvent::SensitiveData {
                stage: ctx.stage,
                agent_id: ctx.request.agent_id.clone(),
                pattern_name: finding.pattern_name.clone(),
                severity: finding.severity.to_string(),
            });
        }

        let names: BTreeSet<&str> = findings.iter().map(|f| f.pattern_name.as_str()).collect();
        let names = names.into_iter().collect::<Vec<_>>().join(", ");

        Ok(match self.mode {
            PrivacyMode::Mask => Verdict::Rewrite {
                text: masked,
                reason: format!("masked {} finding(s): {names}", findings.len()),
            },
            PrivacyMode::Deny => Verdict::deny(format!("sensitive data detected: {names}")),
        })
    }
}
