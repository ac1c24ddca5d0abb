//! Prompt misuse detection.
//!
//! Ships with built-in patterns for common prompt-injection, jailbreak and
//! system-prompt exfiltration phrasings. All patterns are case-insensitive.

use regex::{Regex, RegexBuilder};

use super::{Check, CheckContext, Verdict};
use crate::config::MisuseConfig;
use crate::error::Result;

const BUILTIN_PATTERNS: &[(&str, &str)] = &[
    (
        "ignore-instructions",
        r"\b(ignore|disregard|forget)\s+(all\s+|any\s+)?(the\s+)?(previous|prior|above|earlier)\s+(instructions|rules|directions|prompts?)",
    ),
    (
        "system-prompt-exfiltration",
        r"\b(reveal|show|print|repeat|leak)\s+(me\s+)?(your|the)\s+(system|hidden|initial)\s+(prompt|instructions)",
    ),
    (
        "jailbreak-persona",
        r"\b(you\s+are\s+now|act\s+as|pretend\s+to\s+be)\s+(dan|an?\s+unrestricted|an?\s+unfiltered|jailbroken)",
    ),
    ("developer-mode", r"\b(enable|enter|activate)\s+developer\s+mode\b"),
    (
        "safety-bypass",
        r"\b(bypass|disable|turn\s+off)\s+(your\s+|the\s+|all\s+)?(safety|content)\s+(filters?|guidelines|policies|restrictions)",
    ),
];

struct MisusePattern {
    name: String,
    regex: Regex,
}

pub struct MisuseCheck {
    patterns: Vec<MisusePattern>,
}

impl MisuseCheck {
    pub fn new(config: &MisuseConfig) -> Result<Self> {
        let mut patterns = Vec::new();
        if config.builtin {
            for (name, src) in BUILTIN_PATTERNS {
                patterns.push(MisusePattern {
                    name: (*name).to_string(),
                    regex: RegexBuilder::new(src).case_insensitive(true).build()?,
                });
            }
        }
        for (i, src) in config.patterns.iter().enumerate() {
            patterns.push(MisusePattern {
                name: format!("custom-{}", i + 1),
                regex: RegexBuilder::new(src).case_insensitive(true).build()?,
            });
        }
        Ok(Self { patterns })
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }
}

#[async_trait::async_trait]
impl Check for MisuseCheck {
    fn name(&self) -> &str {
        "misuse"
    }

    async fn check(&self, ctx: &CheckContext<'_>) -> Result<Verdict> {
        Ok(match self.patterns.iter().find(|p| p.regex.is_match(ctx.text)) {
            Some(p) => Verdict::deny(format!("prompt matches misuse pattern '{}'", p.name)),
            None => Verdict::Pass,
        })
    }
}
