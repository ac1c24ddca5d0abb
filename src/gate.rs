//! Ordered composition of checks for one side of the agent call.
//!
//! A [`Gate`] runs its checks one after another. The first denial stops the
//! gate, rewrites are chained so later checks see the rewritten text, and
//! `Ask` verdicts are resolved through the [`AskBroadcaster`]. Every check is
//! bounded by the gate's `check_timeout_ms`; a check that errors or times out
//! is handled according to `on_error`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::ask::{ApprovalRequest, AskBroadcaster};
use crate::check::{Check, CheckContext, Stage, Verdict};
use crate::config::{ErrorMode, GateSettings};
use crate::error::HailstormError;
use crate::gateway::AgentRequest;

/// What happened to one check during an evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckRecord {
    pub check: String,
    /// `pass`, `rewrite`, `deny`, `ask-allow`, `ask-deny` or `error`.
    pub action: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum GateDecision {
    Allowed { text: String, rewritten: bool },
    Denied { check: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateReport {
    pub stage: Stage,
    #[serde(flatten)]
    pub decision: GateDecision,
    pub records: Vec<CheckRecord>,
}

impl GateReport {
    pub fn is_allowed(&self) -> bool {
        matches!(self.decision, GateDecision::Allowed { .. })
    }

    /// The text handed onward, if the gate allowed it.
    pub fn text(&self) -> Option<&str> {
        match &self.decision {
            GateDecision::Allowed { text, .. } => Some(text),
            GateDecision::Denied { .. } => None,
        }
    }
}

pub struct Gate {
    stage: Stage,
    settings: GateSettings,
    checks: Vec<Arc<dyn Check>>,
    ask: Option<Arc<AskBroadcaster>>,
}

impl Gate {
    pub fn new(stage: Stage, settings: GateSettings) -> Self {
        Self {
            stage,
            settings,
            checks: Vec::new(),
            ask: None,
        }
    }

    /// Append a check; checks run in the order they were added.
    pub fn with_check(mut self, check: Arc<dyn Check>) -> Self {
        self.checks.push(check);
        self
    }

    pub fn with_ask(mut self, ask: Arc<AskBroadcaster>) -> Self {
        self.ask = Some(ask);
        self
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn settings(&self) -> &GateSettings {
        &self.settings
    }

    pub fn check_names(&self) -> Vec<String> {
        self.checks.iter().map(|c| c.name().to_string()).collect()
    }

    /// Run every check against `text`. `prompt` is the prompt handed to the
    /// agent; at the input gate it tracks `text` as checks rewrite it.
    pub async fn evaluate(&self, request: &AgentRequest, text: &str, prompt: &str) -> GateReport {
        let mut current = text.to_string();
        let mut rewritten = false;
        let mut records = Vec::with_capacity(self.checks.len());

        if !self.settings.enabled {
            return self.report(GateDecision::Allowed { text: current, rewritten }, records);
        }

        let timeout = Duration::from_millis(self.settings.check_timeout_ms);
        for check in &self.checks {
            let name = check.name().to_string();
            let started = Instant::now();
            let ctx = CheckContext {
                stage: self.stage,
                request,
                text: &current,
                prompt: match self.stage {
                    Stage::Input => &current,
                    Stage::Output => prompt,
                },
            };

            let outcome = match tokio::time::timeout(timeout, check.check(&ctx)).await {
                Ok(result) => result,
                Err(_) => Err(HailstormError::CheckTimeout {
                    check: name.clone(),
                    timeout_ms: self.settings.check_timeout_ms,
                }),
            };

            let verdict = match outcome {
                Ok(verdict) => verdict,
                Err(e) => {
                    records.push(record(&name, "error", e.to_string(), started));
                    match self.settings.on_error {
                        ErrorMode::Deny => {
                            warn!("{} gate: check '{}' failed, denying: {}", self.stage, name, e);
                            return self.denied(name, format!("check error: {e}"), records);
                        }
                        ErrorMode::Allow => {
                            warn!("{} gate: check '{}' failed, continuing: {}", self.stage, name, e);
                            continue;
                        }
                    }
                }
            };

            match verdict {
                Verdict::Pass => {
                    debug!("{} gate: '{}' passed", self.stage, name);
                    records.push(record(&name, "pass", String::new(), started));
                }
                Verdict::Rewrite { text, reason } => {
                    debug!("{} gate: '{}' rewrote text ({})", self.stage, name, reason);
                    records.push(record(&name, "rewrite", reason, started));
                    current = text;
                    rewritten = true;
                }
                Verdict::Deny { reason } => {
                    records.push(record(&name, "deny", reason.clone(), started));
                    return self.denied(name, reason, records);
                }
                Verdict::Ask { reason } => {
                    let approved = match &self.ask {
                        Some(ask) => {
                            ask.ask(ApprovalRequest::new(self.stage, request, &reason, &current))
                                .await
                        }
                        None => false,
                    };
                    if approved {
                        info!("{} gate: '{}' approved by responder", self.stage, name);
                        records.push(record(&name, "ask-allow", reason, started));
                    } else {
                        records.push(record(&name, "ask-deny", reason.clone(), started));
                        return self.denied(name, format!("ask denied: {reason}"), records);
                    }
                }
            }
        }

        self.report(GateDecision::Allowed { text: current, rewritten }, records)
    }

    fn denied(&self, check: String, reason: String, records: Vec<CheckRecord>) -> GateReport {
        info!("{} gate DENY by '{}': {}", self.stage, check, reason);
        self.report(GateDecision::Denied { check, reason }, records)
    }

    fn report(&self, decision: GateDecision, records: Vec<CheckRecord>) -> GateReport {
        GateReport {
            stage: self.stage,
            decision,
            records,
        }
    }
}

fn record(check: &str, action: &str, reason: String, started: Instant) -> CheckRecord {
    CheckRecord {
        check: check.to_string(),
        action: action.to_string(),
        reason,
        elapsed_ms: started.elapsed().as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::ask::AskResponder;
    use crate::config::FailMode;
    use crate::error::Result;

    /// A check that returns a fixed result and counts its calls.
    struct Scripted {
        name: &'static str,
        result: fn(&CheckContext<'_>) -> Result<Verdict>,
        delay_ms: u64,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(name: &'static str, result: fn(&CheckContext<'_>) -> Result<Verdict>) -> Arc<Self> {
            Arc::new(Self {
                name,
                result,
                delay_ms: 0,
                calls: AtomicUsize::new(0),
            })
        }

        fn slow(name: &'static str, delay_ms: u64) -> Arc<Self> {
            Arc::new(Self {
                name,
                result: pass,
                delay_ms,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl Check for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        async fn check(&self, ctx: &CheckContext<'_>) -> Result<Verdict> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            (self.result)(ctx)
        }
    }

    struct FixedResponder(Option<bool>);

    #[async_trait::async_trait]
    impl AskResponder for FixedResponder {
        async fn decide(&self, _request: &ApprovalRequest) -> Option<bool> {
            self.0
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    fn settings(on_error: ErrorMode, timeout_ms: u64) -> GateSettings {
        GateSettings {
            enabled: true,
            on_fail: FailMode::Deny,
            on_error,
            check_timeout_ms: timeout_ms,
        }
    }

    fn pass(_: &CheckContext<'_>) -> Result<Verdict> {
        Ok(Verdict::Pass)
    }

    fn deny(_: &CheckContext<'_>) -> Result<Verdict> {
        Ok(Verdict::deny("nope"))
    }

    fn fail(_: &CheckContext<'_>) -> Result<Verdict> {
        Err(HailstormError::Classifier("model offline".to_string()))
    }

    fn ask(_: &CheckContext<'_>) -> Result<Verdict> {
        Ok(Verdict::Ask {
            reason: "Matched rule: review".to_string(),
        })
    }

    fn upper(ctx: &CheckContext<'_>) -> Result<Verdict> {
        Ok(Verdict::Rewrite {
            text: ctx.text.to_uppercase(),
            reason: "shout".to_string(),
        })
    }

    fn deny_if_upper(ctx: &CheckContext<'_>) -> Result<Verdict> {
        if ctx.text == "HELLO" && ctx.prompt == "HELLO" {
            Ok(Verdict::deny("saw rewritten text"))
        } else {
            Ok(Verdict::Pass)
        }
    }

    fn request() -> AgentRequest {
        AgentRequest::new("Agent1", "hello")
    }

    #[tokio::test]
    async fn all_pass_allows_original_text() {
        let gate = Gate::new(Stage::Input, settings(ErrorMode::Deny, 1000))
            .with_check(Scripted::new("a", pass))
            .with_check(Scripted::new("b", pass));
        let report = gate.evaluate(&request(), "hello", "hello").await;
        assert_eq!(
            report.decision,
            GateDecision::Allowed {
                text: "hello".to_string(),
                rewritten: false
            }
        );
        assert_eq!(report.records.len(), 2);
        assert!(report.records.iter().all(|r| r.action == "pass"));
    }

    #[tokio::test]
    async fn first_denial_stops_the_gate() {
        let later = Scripted::new("later", pass);
        let gate = Gate::new(Stage::Input, settings(ErrorMode::Deny, 1000))
            .with_check(Scripted::new("first", pass))
            .with_check(Scripted::new("blocker", deny))
            .with_check(later.clone());
        let report = gate.evaluate(&request(), "hello", "hello").await;
        assert_eq!(
            report.decision,
            GateDecision::Denied {
                check: "blocker".to_string(),
                reason: "nope".to_string()
            }
        );
        assert_eq!(later.calls(), 0);
        assert_eq!(report.records.len(), 2);
    }

    #[tokio::test]
    async fn rewrites_are_chained_to_later_checks() {
        let gate = Gate::new(Stage::Input, settings(ErrorMode::Deny, 1000))
            .with_check(Scripted::new("upper", upper))
            .with_check(Scripted::new("inspector", deny_if_upper));
        let report = gate.evaluate(&request(), "hello", "hello").await;
        assert!(matches!(report.decision, GateDecision::Denied { ref check, .. } if check == "inspector"));
    }

    #[tokio::test]
    async fn rewrite_marks_report() {
        let gate = Gate::new(Stage::Output, settings(ErrorMode::Deny, 1000))
            .with_check(Scripted::new("upper", upper));
        let report = gate.evaluate(&request(), "done", "hello").await;
        assert_eq!(report.text(), Some("DONE"));
        assert_eq!(
            report.decision,
            GateDecision::Allowed {
                text: "DONE".to_string(),
                rewritten: true
            }
        );
        assert_eq!(report.records[0].action, "rewrite");
        assert_eq!(report.records[0].reason, "shout");
    }

    #[tokio::test]
    async fn check_error_fails_closed_by_default() {
        let later = Scripted::new("later", pass);
        let gate = Gate::new(Stage::Output, settings(ErrorMode::Deny, 1000))
            .with_check(Scripted::new("toxicity", fail))
            .with_check(later.clone());
        let report = gate.evaluate(&request(), "text", "hello").await;
        match report.decision {
            GateDecision::Denied { check, reason } => {
                assert_eq!(check, "toxicity");
                assert!(reason.starts_with("check error:"));
                assert!(reason.contains("model offline"));
            }
            other => panic!("expected denial, got {other:?}"),
        }
        assert_eq!(later.calls(), 0);
        assert_eq!(report.records[0].action, "error");
    }

    #[tokio::test]
    async fn check_error_can_be_allowed() {
        let later = Scripted::new("later", pass);
        let gate = Gate::new(Stage::Output, settings(ErrorMode::Allow, 1000))
            .with_check(Scripted::new("toxicity", fail))
            .with_check(later.clone());
        let report = gate.evaluate(&request(), "text", "hello").await;
        assert!(report.is_allowed());
        assert_eq!(later.calls(), 1);
        assert_eq!(report.records[0].action, "error");
        assert_eq!(report.records[1].action, "pass");
    }

    #[tokio::test]
    async fn slow_check_times_out() {
        let gate = Gate::new(Stage::Input, settings(ErrorMode::Deny, 20))
            .with_check(Scripted::slow("sluggish", 500));
        let report = gate.evaluate(&request(), "hello", "hello").await;
        match report.decision {
            GateDecision::Denied { check, reason } => {
                assert_eq!(check, "sluggish");
                assert!(reason.contains("20ms timeout"));
            }
            other => panic!("expected denial, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn disabled_gate_allows_without_running_checks() {
        let check = Scripted::new("blocker", deny);
        let mut s = settings(ErrorMode::Deny, 1000);
        s.enabled = false;
        let gate = Gate::new(Stage::Input, s).with_check(check.clone());
        let report = gate.evaluate(&request(), "hello", "hello").await;
        assert!(report.is_allowed());
        assert!(report.records.is_empty());
        assert_eq!(check.calls(), 0);
    }

    #[tokio::test]
    async fn ask_without_responders_denies() {
        let gate = Gate::new(Stage::Input, settings(ErrorMode::Deny, 1000))
            .with_check(Scripted::new("policy", ask));
        let report = gate.evaluate(&request(), "hello", "hello").await;
        assert_eq!(
            report.decision,
            GateDecision::Denied {
                check: "policy".to_string(),
                reason: "ask denied: Matched rule: review".to_string()
            }
        );
        assert_eq!(report.records[0].action, "ask-deny");
    }

    #[tokio::test]
    async fn ask_approval_continues() {
        let mut broadcaster = AskBroadcaster::new(5);
        broadcaster.add_responder(Arc::new(FixedResponder(Some(true))));
        let gate = Gate::new(Stage::Input, settings(ErrorMode::Deny, 1000))
            .with_ask(Arc::new(broadcaster))
            .with_check(Scripted::new("policy", ask))
            .with_check(Scripted::new("misuse", pass));
        let report = gate.evaluate(&request(), "hello", "hello").await;
        assert!(report.is_allowed());
        assert_eq!(report.records[0].action, "ask-allow");
        assert_eq!(report.records[1].action, "pass");
    }

    #[tokio::test]
    async fn ask_refusal_denies() {
        let mut broadcaster = AskBroadcaster::new(5);
        broadcaster.add_responder(Arc::new(FixedResponder(Some(false))));
        let gate = Gate::new(Stage::Input, settings(ErrorMode::Deny, 1000))
            .with_ask(Arc::new(broadcaster))
            .with_check(Scripted::new("policy", ask));
        let report = gate.evaluate(&request(), "hello", "hello").await;
        assert!(!report.is_allowed());
    }

    #[test]
    fn report_serializes_flat() {
        let report = GateReport {
            stage: Stage::Input,
            decision: GateDecision::Denied {
                check: "misuse".to_string(),
                reason: "x".to_string(),
            },
            records: vec![],
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["stage"], "input");
        assert_eq!(json["decision"], "denied");
        assert_eq!(json["check"], "misuse");
    }
}
