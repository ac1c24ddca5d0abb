pub mod patterns;

use serde::Serialize;

/// Severity level for a sensitive-data finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// A single finding from scanning a payload.
#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub pattern_name: String,
    /// Redacted excerpt of the match, safe to log.
    pub matched_text: String,
    pub severity: Severity,
}

/// Trait for scanners that inspect payloads for sensitive data.
pub trait DlpScanner: Send + Sync {
    fn scan(&self, payload: &[u8]) -> Vec<Finding>;

    /// Replace every sensitive span with `[REDACTED:<pattern>]`.
    fn mask(&self, text: &str) -> (String, Vec<Finding>);
}
