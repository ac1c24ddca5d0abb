//! Regex-based sensitive-data scanner.
//!
//! Ships with built-in patterns for secrets and personal data that should
//! never cross a gate unmasked:
//!
//! | Category | Patterns |
//! |----------|----------|
//! | AI Provider Keys | OpenAI, Anthropic, Google AI, HuggingFace, Groq, Replicate, Fireworks |
//! | Cloud Keys | AWS Access Key |
//! | Generic | `api_key=...` assignments |
//! | Credentials | Private key headers, GitHub PAT |
//! | PII | Email address, US SSN, payment card number, phone number |
//!
//! Matched text in findings is **redacted** (first 4 + last 4 chars) so that
//! findings can be logged and sent as notifications.

use std::collections::BTreeMap;

use regex::Regex;

use super::{DlpScanner, Finding, Severity};

const BUILTIN: &[(&str, &str, Severity)] = &[
    ("anthropic-api-key", r"sk-ant-(?:api03|admin)[A-Za-z0-9_-]{20,}", Severity::Critical),
    ("openai-api-key", r"sk-(?:proj-|svcacct-)?[A-Za-z0-9_-]{20,}", Severity::Critical),
    ("google-ai-api-key", r"AIzaSy[A-Za-z0-9_-]{33}", Severity::Critical),
    ("huggingface-token", r"hf_[A-Za-z0-9]{20,}", Severity::Critical),
    ("groq-api-key", r"gsk_[A-Za-z0-9]{20,}", Severity::Critical),
    ("replicate-api-token", r"r8_[A-Za-z0-9]{20,}", Severity::Critical),
    ("fireworks-api-key", r"fw_[A-Za-z0-9]{20,}", Severity::Critical),
    ("aws-access-key", r"AKIA[0-9A-Z]{16}", Severity::Critical),
    ("github-token", r"ghp_[A-Za-z0-9]{36}", Severity::Critical),
    ("private-key", r"-----BEGIN (?:RSA |EC |DSA |OPENSSH )?PRIVATE KEY-----", Severity::Critical),
    (
        "generic-api-key",
        r##"(?i)(?:api[_-]?key|apikey)\s*[:=]\s*["']?[A-Za-z0-9_-]{20,}["']?"##,
        Severity::High,
    ),
    ("us-ssn", r"\b\d{3}-\d{2}-\d{4}\b", Severity::High),
    ("payment-card", r"\b(?:\d{4}[ -]?){3}\d{4}\b", Severity::High),
    ("email-address", r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}", Severity::Medium),
    ("phone-number", r"\+?\b\d{1,3}[ .-]\(?\d{3}\)?[ .-]\d{3}[ .-]\d{4}\b", Severity::Low),
];

struct PatternDef {
    regex: Regex,
    severity: Severity,
}

/// A scanner that matches text against a set of named regex patterns.
///
/// Use [`RegexScanner::new()`] for all built-in patterns, or
/// [`RegexScanner::with_patterns()`] for a subset.
pub struct RegexScanner {
    patterns: BTreeMap<String, PatternDef>,
}

impl RegexScanner {
    /// Create a scanner with all built-in patterns.
    pub fn new() -> Self {
        let patterns = BUILTIN
            .iter()
            .map(|(name, src, severity)| {
                let regex = Regex::new(src).expect("built-in DLP pattern is valid");
                (
                    (*name).to_string(),
                    PatternDef {
                        regex,
                        severity: *severity,
                    },
                )
            })
            .collect();
        Self { patterns }
    }

    /// Create a scanner with only the named built-in patterns.
    ///
    /// Names that are not built in are ignored.
    pub fn with_patterns(pattern_names: &[String]) -> Self {
        let mut all = Self::new();
        all.patterns.retain(|name, _| pattern_names.contains(name));
        all
    }

    /// Names of every built-in pattern.
    pub fn builtin_names() -> Vec<&'static str> {
        BUILTIN.iter().map(|(name, _, _)| *name).collect()
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    /// All matches as `(start, end, pattern name)`, earliest first, with
    /// overlapping matches collapsed to the longest one starting first.
    fn spans<'a>(&'a self, text: &str) -> Vec<(usize, usize, &'a str, Severity)> {
        let mut spans: Vec<(usize, usize, &str, Severity)> = self
            .patterns
            .iter()
            .flat_map(|(name, def)| {
                def.regex
                    .find_iter(text)
                    .map(move |m| (m.start(), m.end(), name.as_str(), def.severity))
            })
            .collect();
        spans.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));

        let mut kept: Vec<(usize, usize, &str, Severity)> = Vec::with_capacity(spans.len());
        for span in spans {
            match kept.last() {
                Some(last) if span.0 < last.1 => continue,
                _ => kept.push(span),
            }
        }
        kept
    }
}

impl Default for RegexScanner {
    fn default() -> Self {
        Self::new()
    }
}

fn redact(matched: &str) -> String {
    let chars: Vec<char> = matched.chars().collect();
    if chars.len() > 12 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}...{tail}")
    } else {
        "*".repeat(chars.len())
    }
}

impl DlpScanner for RegexScanner {
    fn scan(&self, payload: &[u8]) -> Vec<Finding> {
        let Ok(text) = std::str::from_utf8(payload) else {
            return Vec::new();
        };

        self.spans(text)
            .into_iter()
            .map(|(start, end, name, severity)| Finding {
                pattern_name: name.to_string(),
                matched_text: redact(&text[start..end]),
                severity,
            })
            .collect()
    }

    fn mask(&self, text: &str) -> (String, Vec<Finding>) {
        let spans = self.spans(text);
        let mut masked = String::with_capacity(text.len());
        let mut findings = Vec::with_capacity(spans.len());
        let mut cursor = 0;

        for (start, end, name, severity) in spans {
            masked.push_str(&text[cursor..start]);
            masked.push_str(&format!("[REDACTED:{name}]"));
            findings.push(Finding {
                pattern_name: name.to_string(),
                matched_text: redact(&text[start..end]),
                severity,
            });
            cursor = end;
        }
        masked.push_str(&text[cursor..]);
        (masked, findings)
    }
}
